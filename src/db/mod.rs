mod mappers;
mod read_ops;
mod readiness;
mod write_ops;

#[cfg(test)]
mod flow_behaviors;
#[cfg(test)]
mod queue_behaviors;
#[cfg(test)]
pub(crate) mod test_support;

use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tracing::info;

use crate::error::{FlowError, Result};

pub use readiness::ready_run;

#[derive(Clone)]
pub struct FlowDb {
    pool: PgPool,
}

impl FlowDb {
    pub async fn new(database_url: &str) -> Result<Self> {
        let max_connections = resolve_pool_max_connections();

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await?;

        info!("Connected to PostgreSQL flow database");
        Ok(Self { pool })
    }

    /// Create a new FlowDb with an existing pool (for testing).
    pub fn new_with_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub(crate) fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn initialize_schema_from_sql(&self, schema_sql: &str) -> Result<()> {
        sqlx::raw_sql(schema_sql)
            .execute(self.pool())
            .await
            .map(|_result| ())
            .map_err(|e| FlowError::DatabaseError(format!("Failed to initialize schema: {e}")))
    }

    /// Apply the canonical schema shipped with the crate.
    pub async fn initialize_schema(&self) -> Result<()> {
        self.initialize_schema_from_sql(include_str!("../../schema.sql"))
            .await
    }
}

fn resolve_pool_max_connections() -> u32 {
    resolve_pool_max_connections_from(|key| std::env::var(key).ok())
}

fn resolve_pool_max_connections_from<F>(env_lookup: F) -> u32
where
    F: Fn(&str) -> Option<String>,
{
    env_lookup("FLEETFLOW_DB_MAX_CONNECTIONS")
        .and_then(|v| v.parse::<u32>().ok())
        .filter(|v| *v > 0)
        .unwrap_or_else(|| {
            let worker_count = env_lookup("FLEETFLOW_MAX_WORKERS")
                .and_then(|v| v.parse::<u32>().ok())
                .filter(|v| *v > 0)
                .unwrap_or(12);

            32_u32.max(worker_count.saturating_mul(3))
        })
}
