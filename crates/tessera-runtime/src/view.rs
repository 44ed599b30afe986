//! Read-only, renaming view over one namespace.

use crate::backend::{BackendQuery, RecordStream};
use crate::error::{FederationError, Result, WriteOperation};
use crate::provider::ConnectionProvider;
use futures::StreamExt;
use std::sync::Arc;
use tessera_core::CollectionSchema;

pub type RenameFn = Arc<dyn Fn(&str) -> String + Send + Sync>;
pub type UnrenameFn = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Publishes the collections of one namespace under renamed identifiers.
///
/// `rename` maps a physical table name to its published name and `unrename`
/// maps it back, returning `None` for names this view doesn't publish. The
/// session is fetched from the provider on every call so a reinitialized
/// session is picked up immediately.
#[derive(Clone)]
pub struct RenamingView {
    provider: Arc<ConnectionProvider>,
    rename: RenameFn,
    unrename: UnrenameFn,
}

impl RenamingView {
    pub fn new(provider: Arc<ConnectionProvider>, rename: RenameFn, unrename: UnrenameFn) -> Self {
        Self {
            provider,
            rename,
            unrename,
        }
    }

    /// Publish every table as `prefix` + table name.
    pub fn prefixing(provider: Arc<ConnectionProvider>, prefix: impl Into<String>) -> Self {
        let prefix: Arc<str> = prefix.into().into();
        let strip = Arc::clone(&prefix);
        Self::new(
            provider,
            Arc::new(move |name: &str| format!("{}{}", prefix, name)),
            Arc::new(move |name: &str| {
                name.strip_prefix(&*strip)
                    .filter(|local| !local.is_empty())
                    .map(str::to_string)
            }),
        )
    }

    pub fn namespace(&self) -> &str {
        self.provider.namespace()
    }

    pub fn provider(&self) -> &Arc<ConnectionProvider> {
        &self.provider
    }

    pub fn published_name(&self, local: &str) -> String {
        (self.rename)(local)
    }

    fn local_name(&self, published: &str) -> Result<String> {
        (self.unrename)(published)
            .ok_or_else(|| FederationError::CollectionNotFound(published.to_string()))
    }

    /// Published names of the namespace's collections.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let session = self.provider.get().await?;
        let names = session.list_collection_names().await?;
        Ok(names.iter().map(|name| self.published_name(name)).collect())
    }

    pub async fn describe_collection(&self, name: &str) -> Result<CollectionSchema> {
        let local = self.local_name(name)?;
        let session = self.provider.get().await?;
        let schema = session.describe_collection(&local).await?;
        Ok(schema.renamed(name))
    }

    pub async fn refresh_metadata(&self, name: &str) -> Result<()> {
        let local = self.local_name(name)?;
        self.provider.get().await?.refresh_metadata(&local).await
    }

    pub async fn count(&self, query: &BackendQuery) -> Result<u64> {
        let local = query.with_collection(self.local_name(&query.collection)?);
        self.provider.get().await?.count(&local).await
    }

    /// Records come back tagged with the published collection name.
    pub async fn open_for_read(&self, query: &BackendQuery) -> Result<RecordStream> {
        let local = query.with_collection(self.local_name(&query.collection)?);
        let records = self.provider.get().await?.open_for_read(&local).await?;
        let published = query.collection.clone();
        Ok(records
            .map(move |record| {
                record.map(|mut record| {
                    record.collection = published.clone();
                    record
                })
            })
            .boxed())
    }

    /// Views never write, whatever the backend supports.
    pub fn mutate(&self, collection: &str, operation: WriteOperation) -> Result<()> {
        Err(FederationError::ReadOnly {
            collection: collection.to_string(),
            operation: operation.to_string(),
        })
    }
}

impl std::fmt::Debug for RenamingView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenamingView")
            .field("namespace", &self.namespace())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use futures::TryStreamExt;
    use serde_json::json;
    use tessera_core::{PropertyDef, Record};

    fn view(prefix: &str) -> (MemoryBackend, RenamingView) {
        let backend = MemoryBackend::new();
        let properties = json!({"name": "Lille"}).as_object().cloned().unwrap_or_default();
        backend.create_collection(
            "secondary",
            CollectionSchema::new("locations")
                .with_property(PropertyDef::new("name", "text"))
                .with_primary_key(["id"]),
            vec![Record::new("1", "locations", properties)],
        );
        let provider = Arc::new(ConnectionProvider::new("secondary", Arc::new(backend.clone())));
        (backend, RenamingView::prefixing(provider, prefix))
    }

    #[tokio::test]
    async fn renames_names_schemas_and_records() {
        let (_backend, view) = view("alt:");
        assert_eq!(view.list_collections().await.unwrap(), vec!["alt:locations"]);

        let schema = view.describe_collection("alt:locations").await.unwrap();
        assert_eq!(schema.name, "alt:locations");

        let records: Vec<Record> = view
            .open_for_read(&BackendQuery::new("alt:locations"))
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].collection, "alt:locations");
        assert_eq!(records[0].properties["name"], "Lille");
    }

    #[tokio::test]
    async fn names_without_the_prefix_are_not_found() {
        let (_backend, view) = view("alt:");
        for name in ["locations", "secondary:locations", "alt:"] {
            assert!(matches!(
                view.describe_collection(name).await,
                Err(FederationError::CollectionNotFound(_))
            ));
        }
    }

    #[tokio::test]
    async fn empty_prefix_is_identity() {
        let (_backend, view) = view("");
        assert_eq!(view.list_collections().await.unwrap(), vec!["locations"]);
        assert_eq!(
            view.count(&BackendQuery::new("locations")).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn writes_are_refused() {
        let (_backend, view) = view("alt:");
        let err = view
            .mutate("alt:locations", WriteOperation::Delete)
            .unwrap_err();
        assert!(matches!(err, FederationError::ReadOnly { .. }));
        assert!(err.to_string().contains("delete"));
    }
}
