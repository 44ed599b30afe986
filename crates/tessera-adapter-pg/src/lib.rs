//! PostgreSQL/PostGIS backend.
//!
//! Every namespace is a schema of one database. Sessions of all namespaces
//! share a single connection pool; a session only owns its metadata cache.

pub mod introspect;
pub mod sql;

use async_stream::stream;
use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions, PgRow, PgSslMode};
use sqlx::{PgPool, Row};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tessera_core::config::SslMode;
use sql::Relation;
use tessera_core::{CollectionSchema, Record, UpstreamConfig};
use tessera_runtime::{
    BackendQuery, BackendSession, ConnectionSource, FederationError, RecordStream, Result,
};
use tokio::sync::RwLock;

fn ssl_mode(mode: SslMode) -> PgSslMode {
    match mode {
        SslMode::Disable => PgSslMode::Disable,
        SslMode::Allow => PgSslMode::Allow,
        SslMode::Prefer => PgSslMode::Prefer,
        SslMode::Require => PgSslMode::Require,
        SslMode::VerifyCa => PgSslMode::VerifyCa,
        SslMode::VerifyFull => PgSslMode::VerifyFull,
    }
}

/// Opens [`PgSession`]s over a shared pool.
#[derive(Clone)]
pub struct PgConnectionSource {
    pool: PgPool,
}

impl PgConnectionSource {
    /// Build the pool described by `config`. Connections are opened lazily
    /// beyond the configured minimum.
    pub async fn connect(config: &UpstreamConfig) -> anyhow::Result<Self> {
        let options = PgConnectOptions::from_str(&config.connection_string())?
            .ssl_mode(ssl_mode(config.ssl_mode))
            .application_name(&config.application_name);

        let pool = PgPoolOptions::new()
            .min_connections(config.pool.min_connections)
            .max_connections(config.pool.max_connections)
            .acquire_timeout(Duration::from_secs(config.pool.acquire_timeout_seconds))
            .idle_timeout(Some(Duration::from_secs(config.pool.idle_timeout_seconds)))
            .connect_with(options)
            .await?;

        tracing::info!(
            host = %config.host,
            database = %config.database,
            max_connections = config.pool.max_connections,
            "Connected to upstream database"
        );
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Close every pooled connection.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

#[async_trait]
impl ConnectionSource for PgConnectionSource {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        introspect::list_schemas(&self.pool)
            .await
            .map_err(FederationError::classify)
    }

    async fn connect(&self, namespace: &str) -> Result<Arc<dyn BackendSession>> {
        let exists = introspect::schema_exists(&self.pool, namespace)
            .await
            .map_err(FederationError::classify)?;
        if !exists {
            return Err(FederationError::NamespaceNotFound(namespace.to_string()));
        }
        tracing::debug!(namespace = %namespace, "Opened schema session");
        Ok(Arc::new(PgSession::new(namespace, self.pool.clone())))
    }
}

/// A schema-bound session. Table metadata is loaded on first use and kept
/// until [`BackendSession::refresh_metadata`] or disposal.
pub struct PgSession {
    namespace: String,
    pool: PgPool,
    metadata: RwLock<HashMap<String, Arc<Relation>>>,
    disposed: AtomicBool,
}

impl PgSession {
    pub fn new(namespace: impl Into<String>, pool: PgPool) -> Self {
        Self {
            namespace: namespace.into(),
            pool,
            metadata: RwLock::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.disposed.load(Ordering::Acquire) {
            return Err(FederationError::backend(anyhow::anyhow!(
                "session for schema '{}' is closed",
                self.namespace
            )));
        }
        Ok(())
    }

    async fn relation(&self, name: &str) -> Result<Arc<Relation>> {
        self.ensure_open()?;
        if let Some(relation) = self.metadata.read().await.get(name) {
            return Ok(Arc::clone(relation));
        }

        let loaded = introspect::describe_table(&self.pool, &self.namespace, name)
            .await
            .map_err(FederationError::classify)?
            .ok_or_else(|| FederationError::CollectionNotFound(name.to_string()))?;
        let loaded = Arc::new(loaded);
        self.metadata
            .write()
            .await
            .insert(name.to_string(), Arc::clone(&loaded));
        tracing::debug!(
            namespace = %self.namespace,
            collection = %name,
            "Loaded table metadata"
        );
        Ok(loaded)
    }
}

/// Errors raised while running a statement. A filter literal PostgreSQL can't
/// convert to the column's type is the caller's mistake, not a lost
/// connection.
fn query_error(error: sqlx::Error) -> FederationError {
    if let sqlx::Error::Database(db) = &error
        && db.code().is_some_and(|code| sql::is_caller_error(&code))
    {
        return FederationError::InvalidInput(db.message().to_string());
    }
    FederationError::backend(error)
}

fn record_from_row(row: &PgRow, collection: &str) -> anyhow::Result<Record> {
    let properties: serde_json::Value = row.try_get("row")?;
    let geometry: Option<serde_json::Value> = row.try_get("geometry")?;
    let id: Option<String> = row.try_get("id")?;

    let serde_json::Value::Object(properties) = properties else {
        anyhow::bail!("row of '{}' is not a JSON object", collection);
    };
    let record = Record::new(id.unwrap_or_default(), collection, properties);
    Ok(match geometry {
        Some(geometry) => record.with_geometry(geometry),
        None => record,
    })
}

#[async_trait]
impl BackendSession for PgSession {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn list_collection_names(&self) -> Result<Vec<String>> {
        self.ensure_open()?;
        introspect::list_tables(&self.pool, &self.namespace)
            .await
            .map_err(FederationError::classify)
    }

    async fn describe_collection(&self, name: &str) -> Result<CollectionSchema> {
        Ok(self.relation(name).await?.schema.clone())
    }

    async fn refresh_metadata(&self, name: &str) -> Result<()> {
        self.ensure_open()?;
        self.metadata.write().await.remove(name);
        Ok(())
    }

    async fn open_for_read(&self, query: &BackendQuery) -> Result<RecordStream> {
        let relation = self.relation(&query.collection).await?;
        let statement = sql::select(&self.namespace, &relation, query).map_err(FederationError::classify)?;
        let arguments = statement.arguments().map_err(FederationError::classify)?;
        let pool = self.pool.clone();
        let collection = query.collection.clone();

        tracing::debug!(
            namespace = %self.namespace,
            collection = %collection,
            sql = %statement.sql,
            "Opening read"
        );

        let stream = stream! {
            let mut rows = sqlx::query_with(&statement.sql, arguments).fetch(&pool);
            loop {
                match rows.try_next().await {
                    Ok(Some(row)) => {
                        yield record_from_row(&row, &collection).map_err(FederationError::backend);
                    }
                    Ok(None) => break,
                    Err(e) => {
                        yield Err(query_error(e));
                        break;
                    }
                }
            }
        };
        Ok(Box::pin(stream))
    }

    async fn count(&self, query: &BackendQuery) -> Result<u64> {
        let relation = self.relation(&query.collection).await?;
        let statement = sql::count(&self.namespace, &relation, query).map_err(FederationError::classify)?;
        let arguments = statement.arguments().map_err(FederationError::classify)?;

        let (count,): (i64,) = sqlx::query_as_with(&statement.sql, arguments)
            .fetch_one(&self.pool)
            .await
            .map_err(query_error)?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, Ordering::AcqRel) {
            return Err(FederationError::backend(anyhow::anyhow!(
                "session for schema '{}' already closed",
                self.namespace
            )));
        }
        self.metadata.write().await.clear();
        Ok(())
    }
}
