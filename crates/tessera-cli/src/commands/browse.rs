//! Read-only browsing commands: `namespaces`, `collections`, `describe`,
//! `items` and `get`. Everything is printed as pretty JSON.

use anyhow::{Context, Result, anyhow};
use clap::Args;
use futures::TryStreamExt;
use serde_json::{Value, json};
use std::sync::Arc;
use tessera_adapter_pg::PgConnectionSource;
use tessera_core::{BoundingBox, CollectionQuery, Record, SortBy, TesseraConfig};
use tessera_runtime::{CollectionRepository, ConnectionSource, FederatedStore, MemoryBackend};

#[derive(Args, Debug, Default)]
pub struct ItemsArgs {
    /// Published collection id
    pub id: String,

    #[arg(long)]
    pub limit: Option<u64>,

    #[arg(long)]
    pub offset: Option<u64>,

    /// Filter expression, e.g. "population > 1000 AND name LIKE 'A%'"
    #[arg(long)]
    pub filter: Option<String>,

    /// Comma-separated properties, "-" prefix for descending
    #[arg(long)]
    pub sortby: Option<String>,

    /// minx,miny,maxx,maxy
    #[arg(long)]
    pub bbox: Option<String>,

    /// CRS of --bbox (default CRS84)
    #[arg(long = "bbox-crs", requires = "bbox")]
    pub bbox_crs: Option<String>,

    /// CRS to return geometries in
    #[arg(long)]
    pub crs: Option<String>,
}

impl ItemsArgs {
    pub fn to_query(&self) -> Result<CollectionQuery> {
        let bbox = match &self.bbox {
            Some(text) => {
                let bbox: BoundingBox = text.parse()?;
                Some(match &self.bbox_crs {
                    Some(crs) => bbox.with_crs(crs),
                    None => bbox,
                })
            }
            None => None,
        };
        let sort_by = self
            .sortby
            .as_deref()
            .map(SortBy::parse_list)
            .unwrap_or_default();

        Ok(CollectionQuery::new(&self.id)
            .with_limit(self.limit)
            .with_offset(self.offset)
            .with_filter(self.filter.clone())
            .with_sort_by(sort_by)
            .with_bbox(bbox)
            .with_target_crs(self.crs.clone()))
    }
}

/// Where browsing commands read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataSource {
    /// The configured upstream database.
    Postgres,
    /// The built-in sample dataset, no database needed.
    Sample,
}

/// A repository over the chosen data source, plus the pool to close.
struct Session {
    repository: Arc<CollectionRepository>,
    pool: Option<Arc<PgConnectionSource>>,
}

impl Session {
    async fn open(config: &TesseraConfig, data: DataSource) -> Result<Self> {
        let (source, pool): (Arc<dyn ConnectionSource>, Option<Arc<PgConnectionSource>>) = match data {
            DataSource::Postgres => {
                let pool = Arc::new(
                    PgConnectionSource::connect(&config.upstream)
                        .await
                        .context("Failed to connect to upstream database")?,
                );
                let source: Arc<dyn ConnectionSource> = pool.clone();
                (source, Some(pool))
            }
            DataSource::Sample => {
                tracing::info!("Serving the built-in sample dataset");
                let source: Arc<dyn ConnectionSource> = Arc::new(MemoryBackend::sample());
                (source, None)
            }
        };
        let store = FederatedStore::new(source, &config.schemas)?;
        Ok(Self {
            repository: Arc::new(CollectionRepository::new(Arc::new(store))),
            pool,
        })
    }

    async fn close(self) {
        self.repository.store().dispose().await;
        if let Some(pool) = self.pool {
            pool.close().await;
        }
        tracing::debug!("Session closed");
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run `f` against a fresh session and close it whatever the outcome.
async fn fetch<F, Fut>(config: &TesseraConfig, data: DataSource, f: F) -> Result<Value>
where
    F: FnOnce(Arc<CollectionRepository>) -> Fut,
    Fut: std::future::Future<Output = Result<Value>>,
{
    let session = Session::open(config, data).await?;
    let result = f(Arc::clone(&session.repository)).await;
    session.close().await;
    if let Err(e) = &result {
        tracing::warn!(error = %e, "Command failed");
    }
    result
}

async fn list_namespaces(repository: Arc<CollectionRepository>) -> Result<Value> {
    let store = repository.store();
    let namespaces = store.directory().namespaces().await?;
    tracing::info!(count = namespaces.len(), "Listed namespaces");
    let entries: Vec<Value> = namespaces
        .iter()
        .map(|ns| json!({"namespace": ns, "prefix": store.naming().prefix(ns)}))
        .collect();
    Ok(Value::Array(entries))
}

async fn list_collections(repository: Arc<CollectionRepository>) -> Result<Value> {
    let collections = repository.list_collections().await?;
    tracing::info!(count = collections.len(), "Listed collections");
    Ok(serde_json::to_value(collections)?)
}

async fn describe_one(repository: Arc<CollectionRepository>, id: &str) -> Result<Value> {
    let schema = repository
        .describe_collection(id)
        .await?
        .ok_or_else(|| anyhow!("Collection '{}' not found", id))?;
    Ok(serde_json::to_value(schema)?)
}

async fn query_items(repository: Arc<CollectionRepository>, query: CollectionQuery) -> Result<Value> {
    let result = repository
        .query(&query)
        .await?
        .ok_or_else(|| anyhow!("Collection '{}' not found", query.collection_id))?;
    let features: Vec<Record> = result.features.try_collect().await?;
    tracing::info!(
        collection = %result.collection.id,
        matched = result.number_matched,
        returned = result.number_returned,
        "Query complete"
    );
    Ok(json!({
        "collection": result.collection.id,
        "numberMatched": result.number_matched,
        "numberReturned": result.number_returned,
        "crs": result.target_crs,
        "features": features,
    }))
}

async fn get_one(repository: Arc<CollectionRepository>, id: &str, record_id: &str) -> Result<Value> {
    let record = repository
        .get_record(id, record_id)
        .await?
        .ok_or_else(|| anyhow!("Record '{}' not found in '{}'", record_id, id))?;
    Ok(serde_json::to_value(record)?)
}

pub async fn namespaces(config: &TesseraConfig, data: DataSource) -> Result<()> {
    print_json(&fetch(config, data, list_namespaces).await?)
}

pub async fn collections(config: &TesseraConfig, data: DataSource) -> Result<()> {
    print_json(&fetch(config, data, list_collections).await?)
}

pub async fn describe(config: &TesseraConfig, data: DataSource, id: &str) -> Result<()> {
    print_json(&fetch(config, data, |repository| describe_one(repository, id)).await?)
}

pub async fn items(config: &TesseraConfig, data: DataSource, args: &ItemsArgs) -> Result<()> {
    let query = args.to_query()?;
    print_json(&fetch(config, data, |repository| query_items(repository, query)).await?)
}

pub async fn get(config: &TesseraConfig, data: DataSource, id: &str, record_id: &str) -> Result<()> {
    print_json(&fetch(config, data, |repository| get_one(repository, id, record_id)).await?)
}
