//! Postgres sentinel probe.

use std::str::FromStr;

use async_trait::async_trait;
use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions, PgSslMode};

use crate::db::bootstrap::{BootstrapError, SchemaStore};

const SENTINEL_QUERY: &str = "SELECT EXISTS (
    SELECT 1
    FROM   pg_tables
    WHERE  schemaname = 'public'
    AND    tablename = $1
)";

/// Local databases are reached without TLS; anything else requires it.
pub fn ssl_mode_for(url: &str) -> PgSslMode {
    if url.contains("localhost") || url.contains("127.0.0.1") {
        PgSslMode::Disable
    } else {
        PgSslMode::Require
    }
}

/// A single-connection pool used only for the bootstrap probe.
pub struct PgSchemaStore {
    pool: Option<PgPool>,
}

impl PgSchemaStore {
    pub async fn connect(url: &str) -> Result<Self, BootstrapError> {
        let options = PgConnectOptions::from_str(url)
            .map_err(|e| BootstrapError::InvalidUrl(e.to_string()))?
            .ssl_mode(ssl_mode_for(url));
        let pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await
            .map_err(|e| BootstrapError::Probe(e.to_string()))?;
        Ok(Self { pool: Some(pool) })
    }
}

#[async_trait]
impl SchemaStore for PgSchemaStore {
    async fn sentinel_exists(&mut self, table: &str) -> Result<bool, BootstrapError> {
        let pool = self
            .pool
            .as_ref()
            .ok_or_else(|| BootstrapError::Probe("pool already released".to_string()))?;
        sqlx::query_scalar::<_, bool>(SENTINEL_QUERY)
            .bind(table)
            .fetch_one(pool)
            .await
            .map_err(|e| BootstrapError::Probe(e.to_string()))
    }

    async fn release(&mut self) -> Result<(), BootstrapError> {
        let Some(pool) = self.pool.take() else {
            return Ok(());
        };
        pool.close().await;
        if !pool.is_closed() || pool.size() != 0 {
            return Err(BootstrapError::Release(format!(
                "{} connection(s) still open",
                pool.size()
            )));
        }
        tracing::debug!(service = "setup-db", "Bootstrap pool released");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_off_only_for_local_databases() {
        assert!(matches!(ssl_mode_for("postgres://u@localhost:5432/db"), PgSslMode::Disable));
        assert!(matches!(ssl_mode_for("postgres://u@db.internal:5432/db"), PgSslMode::Require));
    }
}
