//! In-memory backend.
//!
//! Serves the [`crate::sample`] dataset and drives the federation tests.
//! Namespaces and tables can be created, dropped and altered while sessions
//! are open, and failures can be injected:
//!
//! - [`MemoryBackend::fail_next`] makes the next session operations fail as a
//!   lost connection would;
//! - [`MemoryBackend::fail_next_scans`] makes namespace listings fail;
//! - [`MemoryBackend::replace_schema`] bumps a table's version, and sessions
//!   that cached the previous version report stale metadata until
//!   [`BackendSession::refresh_metadata`] or a new session.
//!
//! Filters are evaluated with [`tessera_filter::Filter::matches`]; geometries
//! are never reprojected.

use crate::backend::{BackendQuery, BackendSession, ConnectionSource, RecordStream, SortKey};
use crate::error::{FederationError, Result};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use tessera_core::{CollectionSchema, Record};

#[derive(Debug, Clone)]
struct MemoryTable {
    schema: CollectionSchema,
    rows: Vec<Record>,
    version: u64,
}

#[derive(Debug, Default)]
struct MemoryState {
    namespaces: BTreeMap<String, BTreeMap<String, MemoryTable>>,
    next_version: u64,
    failing_operations: u32,
    failing_scans: u32,
    connects: usize,
}

impl MemoryState {
    fn next_version(&mut self) -> u64 {
        self.next_version += 1;
        self.next_version
    }
}

/// A database held in memory. Clones share the same data.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

fn lock(state: &Mutex<MemoryState>) -> MutexGuard<'_, MemoryState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_namespace(&self, namespace: &str) {
        lock(&self.state)
            .namespaces
            .entry(namespace.to_string())
            .or_default();
    }

    pub fn drop_namespace(&self, namespace: &str) {
        lock(&self.state).namespaces.remove(namespace);
    }

    /// Create or replace a table, creating its namespace if needed. Rows keep
    /// their order, which is the table's natural order.
    pub fn create_collection(&self, namespace: &str, schema: CollectionSchema, rows: Vec<Record>) {
        let mut state = lock(&self.state);
        let version = state.next_version();
        state
            .namespaces
            .entry(namespace.to_string())
            .or_default()
            .insert(
                schema.name.clone(),
                MemoryTable {
                    schema,
                    rows,
                    version,
                },
            );
    }

    pub fn drop_collection(&self, namespace: &str, name: &str) {
        if let Some(tables) = lock(&self.state).namespaces.get_mut(namespace) {
            tables.remove(name);
        }
    }

    /// Alter a table's structure in place, keeping its rows.
    pub fn replace_schema(&self, namespace: &str, schema: CollectionSchema) {
        let mut state = lock(&self.state);
        let version = state.next_version();
        if let Some(table) = state
            .namespaces
            .get_mut(namespace)
            .and_then(|tables| tables.get_mut(&schema.name))
        {
            table.schema = schema;
            table.version = version;
        }
    }

    pub fn insert(&self, namespace: &str, table: &str, record: Record) {
        if let Some(table) = lock(&self.state)
            .namespaces
            .get_mut(namespace)
            .and_then(|tables| tables.get_mut(table))
        {
            table.rows.push(record);
        }
    }

    /// Fail the next `count` session operations with a backend error.
    pub fn fail_next(&self, count: u32) {
        lock(&self.state).failing_operations = count;
    }

    /// Fail the next `count` namespace listings.
    pub fn fail_next_scans(&self, count: u32) {
        lock(&self.state).failing_scans = count;
    }

    /// Sessions opened so far.
    pub fn connect_count(&self) -> usize {
        lock(&self.state).connects
    }
}

#[async_trait]
impl ConnectionSource for MemoryBackend {
    async fn list_namespaces(&self) -> Result<Vec<String>> {
        let mut state = lock(&self.state);
        if state.failing_scans > 0 {
            state.failing_scans -= 1;
            return Err(FederationError::backend(anyhow::anyhow!(
                "simulated failure listing schemas"
            )));
        }
        Ok(state.namespaces.keys().cloned().collect())
    }

    async fn connect(&self, namespace: &str) -> Result<Arc<dyn BackendSession>> {
        let mut state = lock(&self.state);
        if !state.namespaces.contains_key(namespace) {
            return Err(FederationError::NamespaceNotFound(namespace.to_string()));
        }
        state.connects += 1;
        Ok(Arc::new(MemorySession {
            namespace: namespace.to_string(),
            state: Arc::clone(&self.state),
            versions: Mutex::new(HashMap::new()),
            disposed: AtomicBool::new(false),
        }))
    }
}

/// Session over one namespace of a [`MemoryBackend`].
pub struct MemorySession {
    namespace: String,
    state: Arc<Mutex<MemoryState>>,
    /// Table versions as of the last describe.
    versions: Mutex<HashMap<String, u64>>,
    disposed: AtomicBool,
}

impl MemorySession {
    /// Lock the shared state after the disposal and injected-failure checks.
    fn begin(&self) -> Result<MutexGuard<'_, MemoryState>> {
        if self.disposed.load(AtomicOrdering::SeqCst) {
            return Err(FederationError::backend(anyhow::anyhow!(
                "session for schema '{}' is closed",
                self.namespace
            )));
        }
        let mut state = lock(&self.state);
        if state.failing_operations > 0 {
            state.failing_operations -= 1;
            return Err(FederationError::backend(anyhow::anyhow!(
                "simulated connection loss on schema '{}'",
                self.namespace
            )));
        }
        Ok(state)
    }

    fn table<'s>(&self, state: &'s MemoryState, name: &str) -> Result<&'s MemoryTable> {
        state
            .namespaces
            .get(&self.namespace)
            .and_then(|tables| tables.get(name))
            .ok_or_else(|| FederationError::CollectionNotFound(name.to_string()))
    }

    /// Fail when this session cached an older version of the table.
    fn check_version(&self, table: &MemoryTable) -> Result<()> {
        let versions = self.versions.lock().unwrap_or_else(PoisonError::into_inner);
        match versions.get(&table.schema.name) {
            Some(cached) if *cached != table.version => Err(FederationError::backend(anyhow::anyhow!(
                "cached metadata for '{}.{}' is stale",
                self.namespace,
                table.schema.name
            ))),
            _ => Ok(()),
        }
    }

    fn select(&self, query: &BackendQuery) -> Result<Vec<Record>> {
        let state = self.begin()?;
        let table = self.table(&state, &query.collection)?;
        self.check_version(table)?;

        let mut rows: Vec<Record> = table
            .rows
            .iter()
            .filter(|record| query.filter.matches(record))
            .cloned()
            .collect();
        rows.sort_by(|a, b| compare_records(a, b, &query.sort));

        let offset = usize::try_from(query.offset.unwrap_or(0)).unwrap_or(usize::MAX);
        let limit = query
            .limit
            .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX))
            .unwrap_or(usize::MAX);
        Ok(rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|mut record| {
                record.collection = query.collection.clone();
                record
            })
            .collect())
    }
}

/// Stable sort keeps insertion order, which is the natural order.
fn compare_records(a: &Record, b: &Record, sort: &[SortKey]) -> Ordering {
    for key in sort {
        let ordering = match key {
            SortKey::Property { name, ascending } => {
                let ordering = compare_values(
                    a.properties.get(name).unwrap_or(&Value::Null),
                    b.properties.get(name).unwrap_or(&Value::Null),
                );
                if *ascending { ordering } else { ordering.reverse() }
            }
            SortKey::Natural => Ordering::Equal,
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

/// Nulls sort last, like PostgreSQL's default ascending order.
fn compare_values(a: &Value, b: &Value) -> Ordering {
    match (a, b) {
        (Value::Null, Value::Null) => Ordering::Equal,
        (Value::Null, _) => Ordering::Greater,
        (_, Value::Null) => Ordering::Less,
        (Value::Number(x), Value::Number(y)) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .unwrap_or(Ordering::Equal),
        (Value::String(x), Value::String(y)) => x.cmp(y),
        (Value::Bool(x), Value::Bool(y)) => x.cmp(y),
        (x, y) => x.to_string().cmp(&y.to_string()),
    }
}

#[async_trait]
impl BackendSession for MemorySession {
    fn namespace(&self) -> &str {
        &self.namespace
    }

    async fn list_collection_names(&self) -> Result<Vec<String>> {
        let state = self.begin()?;
        Ok(state
            .namespaces
            .get(&self.namespace)
            .map(|tables| tables.keys().cloned().collect())
            .unwrap_or_default())
    }

    async fn describe_collection(&self, name: &str) -> Result<CollectionSchema> {
        let state = self.begin()?;
        let table = self.table(&state, name)?;
        self.check_version(table)?;
        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), table.version);
        Ok(table.schema.clone())
    }

    async fn refresh_metadata(&self, name: &str) -> Result<()> {
        let state = self.begin()?;
        self.table(&state, name)?;
        self.versions
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(name);
        Ok(())
    }

    async fn open_for_read(&self, query: &BackendQuery) -> Result<RecordStream> {
        let rows = self.select(query)?;
        Ok(futures::stream::iter(rows.into_iter().map(Ok)).boxed())
    }

    async fn count(&self, query: &BackendQuery) -> Result<u64> {
        Ok(self.select(query)?.len() as u64)
    }

    async fn dispose(&self) -> Result<()> {
        if self.disposed.swap(true, AtomicOrdering::SeqCst) {
            return Err(FederationError::backend(anyhow::anyhow!(
                "session for schema '{}' was already closed",
                self.namespace
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::TryStreamExt;
    use serde_json::json;
    use tessera_core::PropertyDef;
    use tessera_filter::Filter;

    fn record(id: &str, population: i64) -> Record {
        let properties = json!({"population": population})
            .as_object()
            .cloned()
            .unwrap_or_default();
        Record::new(id, "cities", properties)
    }

    fn schema() -> CollectionSchema {
        CollectionSchema::new("cities").with_property(PropertyDef::new("population", "int4"))
    }

    async fn session(backend: &MemoryBackend) -> Arc<dyn BackendSession> {
        backend.create_collection(
            "public",
            schema(),
            vec![record("a", 3), record("b", 1), record("c", 2)],
        );
        backend.connect("public").await.unwrap()
    }

    async fn ids(session: &Arc<dyn BackendSession>, query: &BackendQuery) -> Vec<String> {
        let records: Vec<Record> = session
            .open_for_read(query)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        records.into_iter().map(|r| r.id).collect()
    }

    #[tokio::test]
    async fn sorts_filters_and_pages() {
        let backend = MemoryBackend::new();
        let session = session(&backend).await;

        let natural = BackendQuery::new("cities");
        assert_eq!(ids(&session, &natural).await, vec!["a", "b", "c"]);

        let mut sorted = BackendQuery::new("cities");
        sorted.sort = vec![SortKey::Property {
            name: "population".to_string(),
            ascending: true,
        }];
        assert_eq!(ids(&session, &sorted).await, vec!["b", "c", "a"]);

        sorted.offset = Some(1);
        sorted.limit = Some(1);
        assert_eq!(ids(&session, &sorted).await, vec!["c"]);
        assert_eq!(session.count(&sorted).await.unwrap(), 1);

        let filtered = BackendQuery::new("cities")
            .with_filter(tessera_filter::parse("population >= 2").unwrap());
        assert_eq!(session.count(&filtered).await.unwrap(), 2);

        let by_id = BackendQuery::new("cities").with_filter(Filter::Ids(vec!["b".to_string()]));
        assert_eq!(ids(&session, &by_id).await, vec!["b"]);
    }

    #[tokio::test]
    async fn stale_metadata_until_refreshed() {
        let backend = MemoryBackend::new();
        let session = session(&backend).await;
        session.describe_collection("cities").await.unwrap();

        backend.replace_schema(
            "public",
            schema().with_property(PropertyDef::new("name", "text")),
        );
        assert!(session.count(&BackendQuery::new("cities")).await.unwrap_err().is_retryable());

        session.refresh_metadata("cities").await.unwrap();
        let refreshed = session.describe_collection("cities").await.unwrap();
        assert!(refreshed.property("name").is_some());
        assert_eq!(session.count(&BackendQuery::new("cities")).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn injected_failures_are_consumed() {
        let backend = MemoryBackend::new();
        let session = session(&backend).await;
        backend.fail_next(2);
        assert!(session.list_collection_names().await.is_err());
        assert!(session.list_collection_names().await.is_err());
        assert_eq!(session.list_collection_names().await.unwrap(), vec!["cities"]);
    }

    #[tokio::test]
    async fn missing_tables_and_namespaces() {
        let backend = MemoryBackend::new();
        let session = session(&backend).await;
        assert!(matches!(
            session.describe_collection("roads").await,
            Err(FederationError::CollectionNotFound(_))
        ));
        assert!(matches!(
            backend.connect("nowhere").await,
            Err(FederationError::NamespaceNotFound(_))
        ));
    }

    #[tokio::test]
    async fn disposed_sessions_refuse_work() {
        let backend = MemoryBackend::new();
        let session = session(&backend).await;
        session.dispose().await.unwrap();
        assert!(session.list_collection_names().await.is_err());
        assert!(session.dispose().await.is_err());
    }
}
