//! Idempotent schema provisioning.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Serialize;
use thiserror::Error;
use url::Url;

use crate::config::EngineConfig;

const PRODUCTION_SCHEMA: &str = "./dist/prisma/schema.prisma";
const DEVELOPMENT_SCHEMA: &str = "./prisma/schema.prisma";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("DATABASE_URL is not set")]
    MissingDatabaseUrl,

    #[error("invalid database URL: {0}")]
    InvalidUrl(String),

    #[error("schema probe failed: {0}")]
    Probe(String),

    #[error("failed to release bootstrap connections: {0}")]
    Release(String),

    #[error("migration deploy failed: {0}")]
    Migrate(String),

    #[error("client generation failed: {0}")]
    Generate(String),
}

/// Where the sentinel table is looked up.
#[async_trait]
pub trait SchemaStore: Send {
    async fn sentinel_exists(&mut self, table: &str) -> Result<bool, BootstrapError>;

    /// Close every connection. Returns only once the pool confirms it holds
    /// no live connection.
    async fn release(&mut self) -> Result<(), BootstrapError>;
}

/// The external schema-migration tool.
#[async_trait]
pub trait SchemaTool: Send + Sync {
    async fn deploy(&self, schema: &Path, database_url: &str) -> Result<(), BootstrapError>;

    async fn generate(&self, schema: &Path) -> Result<(), BootstrapError>;
}

/// What a bootstrap run did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BootstrapOutcome {
    pub sentinel_present: bool,
    pub migrated: bool,
    pub schema_path: PathBuf,
}

/// Schema file for the environment.
pub fn schema_path(production: bool) -> PathBuf {
    if production {
        PathBuf::from(PRODUCTION_SCHEMA)
    } else {
        PathBuf::from(DEVELOPMENT_SCHEMA)
    }
}

/// `url` with `connection_limit=1`, replacing any existing limit.
pub fn with_connection_limit(url: &str) -> Result<String, BootstrapError> {
    let mut parsed = Url::parse(url).map_err(|e| BootstrapError::InvalidUrl(e.to_string()))?;
    let kept: Vec<(String, String)> = parsed
        .query_pairs()
        .filter(|(key, _)| key != "connection_limit")
        .map(|(k, v)| (k.into_owned(), v.into_owned()))
        .collect();

    parsed
        .query_pairs_mut()
        .clear()
        .extend_pairs(kept)
        .append_pair("connection_limit", "1");
    Ok(parsed.into())
}

/// One bootstrap run.
#[derive(Debug, Clone)]
pub struct DbBootstrap {
    database_url: String,
    sentinel_table: String,
    schema_path: PathBuf,
    release_timeout: Duration,
}

impl DbBootstrap {
    pub fn from_config(config: &EngineConfig) -> Result<Self, BootstrapError> {
        let database_url = config
            .database
            .url
            .clone()
            .ok_or(BootstrapError::MissingDatabaseUrl)?;
        Ok(Self {
            database_url,
            sentinel_table: config.database.sentinel_table.clone(),
            schema_path: schema_path(config.is_production()),
            release_timeout: Duration::from_millis(config.database.release_timeout_ms),
        })
    }

    pub fn database_url(&self) -> &str {
        &self.database_url
    }

    pub fn schema_path(&self) -> &Path {
        &self.schema_path
    }

    pub async fn run<S, T>(&self, store: &mut S, tool: &T) -> Result<BootstrapOutcome, BootstrapError>
    where
        S: SchemaStore,
        T: SchemaTool,
    {
        tracing::info!(service = "setup-db", table = %self.sentinel_table, "Checking database tables");
        let probed = store.sentinel_exists(&self.sentinel_table).await;

        // Released whether or not the probe succeeded.
        let released = match tokio::time::timeout(self.release_timeout, store.release()).await {
            Ok(result) => result,
            Err(_) => Err(BootstrapError::Release(format!(
                "not acknowledged within {}ms",
                self.release_timeout.as_millis()
            ))),
        };
        let sentinel_present = probed?;
        released?;

        tracing::info!(
            service = "setup-db",
            schema = %self.schema_path.display(),
            sentinel_present,
            "Schema probe complete"
        );

        let migrated = if sentinel_present {
            tracing::info!(service = "setup-db", "Tables exist, skipping migrations");
            false
        } else {
            tracing::info!(service = "setup-db", "Deploying migrations");
            let url = with_connection_limit(&self.database_url)?;
            tool.deploy(&self.schema_path, &url).await?;
            true
        };

        tracing::info!(service = "setup-db", "Generating client");
        tool.generate(&self.schema_path).await?;

        tracing::info!(service = "setup-db", migrated, "Database setup completed");
        Ok(BootstrapOutcome {
            sentinel_present,
            migrated,
            schema_path: self.schema_path.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct FakeStore {
        exists: Result<bool, &'static str>,
        released: bool,
        hang_on_release: bool,
    }

    impl FakeStore {
        fn with(exists: bool) -> Self {
            Self {
                exists: Ok(exists),
                released: false,
                hang_on_release: false,
            }
        }
    }

    #[async_trait]
    impl SchemaStore for FakeStore {
        async fn sentinel_exists(&mut self, _table: &str) -> Result<bool, BootstrapError> {
            self.exists.map_err(|e| BootstrapError::Probe(e.to_string()))
        }

        async fn release(&mut self) -> Result<(), BootstrapError> {
            if self.hang_on_release {
                std::future::pending::<()>().await;
            }
            self.released = true;
            Ok(())
        }
    }

    #[derive(Default)]
    struct FakeTool {
        calls: Mutex<Vec<String>>,
        fail_deploy: bool,
        fail_generate: bool,
    }

    impl FakeTool {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SchemaTool for FakeTool {
        async fn deploy(&self, _schema: &Path, url: &str) -> Result<(), BootstrapError> {
            self.calls.lock().unwrap().push(format!("deploy {url}"));
            if self.fail_deploy {
                return Err(BootstrapError::Migrate("exit status 1".to_string()));
            }
            Ok(())
        }

        async fn generate(&self, _schema: &Path) -> Result<(), BootstrapError> {
            self.calls.lock().unwrap().push("generate".to_string());
            if self.fail_generate {
                return Err(BootstrapError::Generate("exit status 1".to_string()));
            }
            Ok(())
        }
    }

    fn bootstrap() -> DbBootstrap {
        let mut config = EngineConfig::default();
        config.database.url = Some("postgres://engine@localhost:5432/engine".to_string());
        config.database.release_timeout_ms = 50;
        DbBootstrap::from_config(&config).unwrap()
    }

    #[tokio::test]
    async fn absent_sentinel_deploys_then_generates() {
        let mut store = FakeStore::with(false);
        let tool = FakeTool::default();
        let outcome = bootstrap().run(&mut store, &tool).await.unwrap();

        assert!(store.released);
        assert!(outcome.migrated);
        assert!(!outcome.sentinel_present);
        assert_eq!(
            tool.calls(),
            vec![
                "deploy postgres://engine@localhost:5432/engine?connection_limit=1".to_string(),
                "generate".to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn present_sentinel_skips_deploy() {
        let mut store = FakeStore::with(true);
        let tool = FakeTool::default();
        let outcome = bootstrap().run(&mut store, &tool).await.unwrap();

        assert!(!outcome.migrated);
        assert_eq!(tool.calls(), vec!["generate".to_string()]);
    }

    #[tokio::test]
    async fn deploy_failure_is_fatal() {
        let mut store = FakeStore::with(false);
        let tool = FakeTool {
            fail_deploy: true,
            ..Default::default()
        };
        let err = bootstrap().run(&mut store, &tool).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Migrate(_)));
        assert!(!tool.calls().contains(&"generate".to_string()));
    }

    #[tokio::test]
    async fn generate_failure_is_fatal() {
        let mut store = FakeStore::with(true);
        let tool = FakeTool {
            fail_generate: true,
            ..Default::default()
        };
        let err = bootstrap().run(&mut store, &tool).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Generate(_)));
    }

    #[tokio::test]
    async fn probe_failure_still_releases() {
        let mut store = FakeStore {
            exists: Err("connection refused"),
            released: false,
            hang_on_release: false,
        };
        let tool = FakeTool::default();
        let err = bootstrap().run(&mut store, &tool).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Probe(_)));
        assert!(store.released);
        assert!(tool.calls().is_empty());
    }

    #[tokio::test]
    async fn unacknowledged_release_blocks_the_tool() {
        let mut store = FakeStore {
            hang_on_release: true,
            ..FakeStore::with(false)
        };
        let tool = FakeTool::default();
        let err = bootstrap().run(&mut store, &tool).await.unwrap_err();
        assert!(matches!(err, BootstrapError::Release(_)));
        assert!(tool.calls().is_empty());
    }

    #[test]
    fn schema_path_by_environment() {
        assert_eq!(schema_path(true), PathBuf::from("./dist/prisma/schema.prisma"));
        assert_eq!(schema_path(false), PathBuf::from("./prisma/schema.prisma"));
    }

    #[test]
    fn connection_limit_replaces_existing() {
        let url = with_connection_limit("postgres://u:p@db:5432/engine?sslmode=require&connection_limit=10")
            .unwrap();
        assert_eq!(url, "postgres://u:p@db:5432/engine?sslmode=require&connection_limit=1");
    }

    #[test]
    fn missing_url_rejected() {
        let err = DbBootstrap::from_config(&EngineConfig::default()).unwrap_err();
        assert!(matches!(err, BootstrapError::MissingDatabaseUrl));
    }
}
