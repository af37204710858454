use crate::domain::health::ProcessorHealth;
use crate::domain::processor::Processor;
use crate::repo::{HealthStore, PersistedHealth};
use anyhow::Result;
use sqlx::{PgPool, Row};

#[derive(Clone)]
pub struct HealthRepo {
    pub pool: PgPool,
}

#[async_trait::async_trait]
impl HealthStore for HealthRepo {
    async fn save(&self, processor: Processor, health: &ProcessorHealth) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO processor_health (processor, failing, min_response_time, falling_cycles, updated_at)
            VALUES ($1, $2, $3, $4, now())
            ON CONFLICT (processor) DO UPDATE
            SET failing = EXCLUDED.failing,
                min_response_time = EXCLUDED.min_response_time,
                falling_cycles = EXCLUDED.falling_cycles,
                updated_at = now()
            "#,
        )
        .bind(processor.as_str())
        .bind(health.failing)
        .bind(health.min_response_time)
        .bind(health.falling_cycles)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load(&self) -> Result<Vec<PersistedHealth>> {
        let rows = sqlx::query(
            "SELECT processor, failing, min_response_time, falling_cycles, updated_at FROM processor_health ORDER BY processor ASC",
        )
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(|r| -> Result<PersistedHealth> {
                let processor: String = r.get("processor");
                Ok(PersistedHealth {
                    processor: processor.parse::<Processor>()?,
                    health: ProcessorHealth {
                        failing: r.get("failing"),
                        min_response_time: r.get("min_response_time"),
                        falling_cycles: r.get("falling_cycles"),
                    },
                    updated_at: r.get("updated_at"),
                })
            })
            .collect()
    }
}
