//! SurrealDB connection setup.
//!
//! The server starts alongside the database in most deployments, so
//! [`connect`] retries with exponential backoff before giving up. Every
//! attempt signs in, selects the namespace and database, and runs a
//! round-trip query, so a returned client is known to be usable.

use std::time::Duration;

use serde::Deserialize;
use surrealdb::engine::remote::ws::{Client, Ws};
use surrealdb::opt::auth::Root;
use surrealdb::{Connection, Surreal};
use tracing::{info, warn};

/// Upper bound for the delay between two connection attempts.
const MAX_RETRY_DELAY: Duration = Duration::from_secs(10);

/// Where and how to reach SurrealDB.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// WebSocket address, e.g. `127.0.0.1:8000`.
    pub url: String,
    pub namespace: String,
    pub database: String,
    /// Root credentials.
    pub username: String,
    pub password: String,
    /// Attempts before [`connect`] returns the last error. At least one
    /// attempt is always made.
    pub connect_attempts: u32,
    /// Delay after the first failed attempt, doubled after each further
    /// failure.
    pub retry_delay_ms: u64,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            url: "127.0.0.1:8000".into(),
            namespace: "bastion".into(),
            database: "main".into(),
            username: "root".into(),
            password: "root".into(),
            connect_attempts: 5,
            retry_delay_ms: 500,
        }
    }
}

impl DbConfig {
    /// Delay before attempt `failed + 1`, given `failed` failures so far.
    fn retry_delay(&self, failed: u32) -> Duration {
        let factor = 2u64.saturating_pow(failed.saturating_sub(1));
        Duration::from_millis(self.retry_delay_ms.saturating_mul(factor)).min(MAX_RETRY_DELAY)
    }
}

/// Connect to SurrealDB, retrying failed attempts.
pub async fn connect(config: &DbConfig) -> Result<Surreal<Client>, surrealdb::Error> {
    let attempts = config.connect_attempts.max(1);
    let mut failed = 0;
    loop {
        info!(
            url = %config.url,
            namespace = %config.namespace,
            database = %config.database,
            attempt = failed + 1,
            "connecting to SurrealDB"
        );
        match open(config).await {
            Ok(db) => {
                info!("connected to SurrealDB");
                return Ok(db);
            }
            Err(e) => {
                failed += 1;
                if failed >= attempts {
                    return Err(e);
                }
                let delay = config.retry_delay(failed);
                warn!(
                    error = %e,
                    attempt = failed,
                    retry_in_ms = delay.as_millis() as u64,
                    "SurrealDB connection failed"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

async fn open(config: &DbConfig) -> Result<Surreal<Client>, surrealdb::Error> {
    let db = Surreal::new::<Ws>(&config.url).await?;
    db.signin(Root {
        username: config.username.clone(),
        password: config.password.clone(),
    })
    .await?;
    db.use_ns(&config.namespace)
        .use_db(&config.database)
        .await?;
    ping(&db).await?;
    Ok(db)
}

/// Round-trip a trivial query.
pub async fn ping<C: Connection>(db: &Surreal<C>) -> Result<(), surrealdb::Error> {
    db.query("RETURN true").await?.check()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_retry_a_few_times() {
        let config = DbConfig::default();
        assert_eq!(config.connect_attempts, 5);
        assert_eq!(config.retry_delay(1), Duration::from_millis(500));
    }

    #[test]
    fn retry_delay_doubles_up_to_cap() {
        let config = DbConfig {
            retry_delay_ms: 200,
            ..DbConfig::default()
        };
        assert_eq!(config.retry_delay(1), Duration::from_millis(200));
        assert_eq!(config.retry_delay(2), Duration::from_millis(400));
        assert_eq!(config.retry_delay(4), Duration::from_millis(1600));
        assert_eq!(config.retry_delay(30), MAX_RETRY_DELAY);
        assert_eq!(config.retry_delay(u32::MAX), MAX_RETRY_DELAY);
    }

    #[test]
    fn partial_config_keeps_defaults() {
        let config: DbConfig =
            serde_json::from_value(serde_json::json!({ "url": "db:8000", "connect_attempts": 1 }))
                .unwrap();
        assert_eq!(config.url, "db:8000");
        assert_eq!(config.connect_attempts, 1);
        assert_eq!(config.namespace, "bastion");
        assert_eq!(config.retry_delay_ms, 500);
    }
}
