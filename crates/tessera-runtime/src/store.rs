//! One collection namespace over every included schema.

use crate::backend::{BackendQuery, ConnectionSource, RecordStream};
use crate::directory::NamespaceDirectory;
use crate::error::{FederationError, Result, WriteOperation};
use crate::view::RenamingView;
use std::sync::Arc;
use tessera_core::{CollectionSchema, ConfigError, NamingScheme, SchemasConfig};

/// Routes composite collection names to the renaming view of the namespace
/// that owns them.
pub struct FederatedStore {
    directory: NamespaceDirectory,
    naming: Arc<NamingScheme>,
}

impl FederatedStore {
    /// Validate the naming rules and set up discovery over `source`.
    pub fn new(source: Arc<dyn ConnectionSource>, config: &SchemasConfig) -> Result<Self> {
        let naming = Arc::new(NamingScheme::new(config)?);
        let directory = NamespaceDirectory::new(source, Arc::clone(&naming), config.refresh);
        Ok(Self { directory, naming })
    }

    pub fn naming(&self) -> &NamingScheme {
        &self.naming
    }

    pub fn directory(&self) -> &NamespaceDirectory {
        &self.directory
    }

    async fn view(&self, namespace: &str) -> RenamingView {
        let provider = self.directory.provider(namespace).await;
        RenamingView::prefixing(provider, self.naming.prefix(namespace))
    }

    /// Published names across all included namespaces, sorted.
    pub async fn list_collections(&self) -> Result<Vec<String>> {
        let mut names = Vec::new();
        for namespace in self.directory.namespaces().await? {
            match self.view(&namespace).await.list_collections().await {
                Ok(published) => names.extend(published),
                // dropped since the namespace list was cached
                Err(e) if e.is_not_found() => {
                    tracing::warn!(namespace = %namespace, error = %e, "Skipping vanished namespace");
                }
                Err(e) => return Err(e),
            }
        }
        names.sort();
        Ok(names)
    }

    /// The namespace owning `name`. Fails with not-found when the prefix
    /// resolves to nothing currently included.
    pub async fn namespace_of(&self, name: &str) -> Result<String> {
        let prefix = self.naming.extract_prefix(name);
        let namespace = match self.naming.unalias(prefix) {
            Ok(namespace) => namespace,
            Err(ConfigError::NoUnprefixedSchema) => {
                tracing::debug!(
                    collection = %name,
                    "Unprefixed collection name but no schema is published unprefixed"
                );
                return Err(FederationError::CollectionNotFound(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        };

        if !self.directory.namespaces().await?.contains(&namespace) {
            tracing::debug!(collection = %name, namespace = %namespace, "Namespace is not published");
            return Err(FederationError::CollectionNotFound(name.to_string()));
        }
        Ok(namespace)
    }

    pub async fn resolve(&self, name: &str) -> Result<RenamingView> {
        let namespace = self.namespace_of(name).await?;
        tracing::debug!(collection = %name, namespace = %namespace, "Resolved collection");
        Ok(self.view(&namespace).await)
    }

    pub async fn describe_collection(&self, name: &str) -> Result<CollectionSchema> {
        self.resolve(name).await?.describe_collection(name).await
    }

    pub async fn refresh_metadata(&self, name: &str) -> Result<()> {
        self.resolve(name).await?.refresh_metadata(name).await
    }

    pub async fn count(&self, query: &BackendQuery) -> Result<u64> {
        self.resolve(&query.collection).await?.count(query).await
    }

    pub async fn open_for_read(&self, query: &BackendQuery) -> Result<RecordStream> {
        self.resolve(&query.collection).await?.open_for_read(query).await
    }

    /// Replace the session of the namespace owning `name`.
    pub async fn reinit(&self, name: &str) -> Result<()> {
        let namespace = self.namespace_of(name).await?;
        self.directory.provider(&namespace).await.re_init().await
    }

    pub async fn mutate(&self, name: &str, operation: WriteOperation) -> Result<()> {
        self.resolve(name).await?.mutate(name, operation)
    }

    /// Close every session.
    pub async fn dispose(&self) {
        self.directory.dispose_all().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use tessera_core::{PropertyDef, RefreshConfig, SchemaRule};

    fn locations() -> CollectionSchema {
        CollectionSchema::new("locations").with_property(PropertyDef::new("name", "text"))
    }

    fn store(backend: &MemoryBackend, include: Vec<SchemaRule>) -> FederatedStore {
        FederatedStore::new(
            Arc::new(backend.clone()),
            &SchemasConfig {
                include,
                refresh: RefreshConfig::disabled(),
                ..Default::default()
            },
        )
        .unwrap()
    }

    fn populated() -> MemoryBackend {
        let backend = MemoryBackend::new();
        backend.create_collection("public", locations(), Vec::new());
        backend.create_collection("secondary", locations(), Vec::new());
        backend.create_collection("other", CollectionSchema::new("roads"), Vec::new());
        backend
    }

    #[tokio::test]
    async fn lists_sorted_union_of_published_names() {
        let backend = populated();
        let store = store(
            &backend,
            vec![
                SchemaRule::all(),
                SchemaRule::new("public").unprefixed(),
                SchemaRule::new("secondary").with_alias("alt"),
            ],
        );
        assert_eq!(
            store.list_collections().await.unwrap(),
            vec!["alt:locations", "locations", "other:roads"]
        );
    }

    #[tokio::test]
    async fn resolves_aliases_and_unprefixed_names() {
        let backend = populated();
        let store = store(
            &backend,
            vec![
                SchemaRule::all(),
                SchemaRule::new("public").unprefixed(),
                SchemaRule::new("secondary").with_alias("alt"),
            ],
        );
        assert_eq!(store.resolve("alt:locations").await.unwrap().namespace(), "secondary");
        assert_eq!(store.resolve("locations").await.unwrap().namespace(), "public");
        assert_eq!(
            store.describe_collection("alt:locations").await.unwrap().name,
            "alt:locations"
        );

        // the raw schema name is not published once an alias exists
        assert!(matches!(
            store.describe_collection("secondary:locations").await,
            Err(FederationError::CollectionNotFound(_))
        ));
    }

    #[tokio::test]
    async fn unknown_or_excluded_namespaces_are_not_found() {
        let backend = populated();
        let store = store(&backend, vec![SchemaRule::new("public")]);
        for name in ["secondary:locations", "nowhere:locations", "locations"] {
            assert!(
                matches!(
                    store.resolve(name).await,
                    Err(FederationError::CollectionNotFound(_))
                ),
                "{}",
                name
            );
        }
        assert!(store.resolve("public:locations").await.is_ok());
    }

    #[tokio::test]
    async fn writes_are_refused() {
        let backend = populated();
        let store = store(&backend, vec![SchemaRule::all()]);
        assert!(matches!(
            store.mutate("public:locations", WriteOperation::Insert).await,
            Err(FederationError::ReadOnly { .. })
        ));
    }

    #[tokio::test]
    async fn reinit_reconnects_the_owning_namespace() {
        let backend = populated();
        let store = store(&backend, vec![SchemaRule::all()]);
        store.describe_collection("public:locations").await.unwrap();
        assert_eq!(backend.connect_count(), 1);

        store.reinit("public:locations").await.unwrap();
        assert_eq!(backend.connect_count(), 2);

        store.dispose().await;
        assert!(store.directory().status().await.connected.is_empty());
    }
}
