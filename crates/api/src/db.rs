//! PostgreSQL pool set-up.

use std::time::Duration;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;

use crate::config::Config;

/// Pause between start-up connection attempts.
pub const CONNECT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Connects to `url`, retrying up to `db_connect_attempts` times.
///
/// Failed attempts are retried after [`CONNECT_RETRY_DELAY`]; the last
/// error is returned once attempts run out.
pub async fn connect(config: &Config, url: &str) -> Result<PgPool, sqlx::Error> {
    let attempts = config.db_connect_attempts.max(1);
    let mut last_error = None;

    for attempt in 1..=attempts {
        let result = PgPoolOptions::new()
            .max_connections(config.db_max_connections)
            .acquire_timeout(config.call_timeout)
            .connect(url)
            .await;

        match result {
            Ok(pool) => {
                tracing::info!(attempt, "connected to PostgreSQL");
                return Ok(pool);
            }
            Err(e) => {
                tracing::warn!(attempt, attempts, error = %e, "database connection failed");
                last_error = Some(e);
                if attempt < attempts {
                    tokio::time::sleep(CONNECT_RETRY_DELAY).await;
                }
            }
        }
    }

    Err(last_error.unwrap_or(sqlx::Error::PoolTimedOut))
}
