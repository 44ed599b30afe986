//! Read API over the federated store.
//!
//! Every backend-touching operation runs under [`CollectionRepository::run_with_retry`]:
//! a backend failure (dropped connection, metadata that went stale after a
//! schema change) reinitializes the owning namespace's session and the
//! operation runs once more.

use crate::backend::{BackendQuery, RecordStream, SortKey};
use crate::error::{FederationError, Result};
use crate::store::FederatedStore;
use futures::TryStreamExt;
use std::future::Future;
use std::sync::Arc;
use tessera_core::geometry::epsg_code;
use tessera_core::{CollectionInfo, CollectionQuery, CollectionSchema, Record};
use tessera_filter::{Filter, FilterParser};

/// Result of a collection query.
pub struct FeatureCollection {
    pub collection: CollectionInfo,
    /// Records matching the filter, ignoring limit and offset.
    pub number_matched: u64,
    /// Records in this page.
    pub number_returned: u64,
    pub target_crs: Option<String>,
    pub features: RecordStream,
}

impl std::fmt::Debug for FeatureCollection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FeatureCollection")
            .field("collection", &self.collection)
            .field("number_matched", &self.number_matched)
            .field("number_returned", &self.number_returned)
            .field("target_crs", &self.target_crs)
            .finish_non_exhaustive()
    }
}

pub struct CollectionRepository {
    store: Arc<FederatedStore>,
    parser: FilterParser,
}

impl CollectionRepository {
    pub fn new(store: Arc<FederatedStore>) -> Self {
        Self {
            store,
            parser: FilterParser::new(),
        }
    }

    pub fn store(&self) -> &Arc<FederatedStore> {
        &self.store
    }

    /// Every published collection. Collections dropped between listing and
    /// describing are skipped.
    pub async fn list_collections(&self) -> Result<Vec<CollectionInfo>> {
        let mut collections = Vec::new();
        for name in self.store.list_collections().await? {
            match self.describe_collection(&name).await? {
                Some(schema) => collections.push(schema.info()),
                None => tracing::debug!(collection = %name, "Collection vanished while listing"),
            }
        }
        Ok(collections)
    }

    pub async fn describe_collection(&self, collection_id: &str) -> Result<Option<CollectionSchema>> {
        let store = &self.store;
        let result = self
            .run_with_retry("describe", collection_id, move || {
                store.describe_collection(collection_id)
            })
            .await;
        found(result)
    }

    /// Run `query`. `None` when the collection doesn't exist.
    pub async fn query(&self, query: &CollectionQuery) -> Result<Option<FeatureCollection>> {
        let filter = match &query.filter {
            Some(text) => self.parser.parse(text)?,
            None => Filter::Include,
        };
        let filter = &filter;
        let result = self
            .run_with_retry("query", &query.collection_id, move || {
                self.query_once(query, filter)
            })
            .await;
        found(result)
    }

    async fn query_once(&self, query: &CollectionQuery, filter: &Filter) -> Result<FeatureCollection> {
        let collection_id = &query.collection_id;
        self.store.refresh_metadata(collection_id).await?;
        let schema = self.store.describe_collection(collection_id).await?;

        let page = backend_query(&schema, query, filter.clone())?;
        let number_matched = self.store.count(&page.unpaged()).await?;
        let number_returned = if page.is_paged() {
            self.store.count(&page).await?
        } else {
            number_matched
        };
        let features = self.store.open_for_read(&page).await?;

        Ok(FeatureCollection {
            collection: schema.info(),
            number_matched,
            number_returned,
            target_crs: query.target_crs.clone(),
            features,
        })
    }

    /// A single record by id. `None` when the collection or the record
    /// doesn't exist.
    pub async fn get_record(&self, collection_id: &str, record_id: &str) -> Result<Option<Record>> {
        let query = BackendQuery::new(collection_id)
            .with_filter(Filter::Ids(vec![record_id.to_string()]))
            .with_limit(Some(1));
        let store = &self.store;
        let query = &query;
        let result = self
            .run_with_retry("get_record", collection_id, move || async move {
                store.refresh_metadata(collection_id).await?;
                let mut records = store.open_for_read(query).await?;
                records.try_next().await
            })
            .await;
        Ok(found(result)?.flatten())
    }

    /// Run `attempt`, and once more after reinitializing the namespace's
    /// session if it fails with a backend error.
    ///
    /// A second backend failure is reported as `RetryExhausted`, carrying the
    /// first failure as its source. Other errors are returned as they are.
    pub async fn run_with_retry<T, F, Fut>(
        &self,
        operation: &str,
        collection_id: &str,
        attempt: F,
    ) -> Result<T>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let first = match attempt().await {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retryable() => return Err(e),
            Err(e) => e,
        };

        tracing::info!(
            collection = %collection_id,
            operation = %operation,
            error = %first,
            "Reinitializing namespace connection and retrying"
        );
        if let Err(e) = self.store.reinit(collection_id).await {
            tracing::warn!(collection = %collection_id, error = %e, "Failed to reinitialize namespace connection");
        }

        match attempt().await {
            Ok(value) => Ok(value),
            Err(e) if !e.is_retryable() => Err(e),
            Err(e) => Err(FederationError::RetryExhausted {
                operation: format!("{} on '{}'", operation, collection_id),
                cause: Box::new(first),
                last: e.to_string(),
            }),
        }
    }
}

/// Map not-found errors to `None`.
fn found<T>(result: Result<T>) -> Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.is_not_found() => Ok(None),
        Err(e) => Err(e),
    }
}

/// Translate `query` for the session, checking it against `schema`.
fn backend_query(schema: &CollectionSchema, query: &CollectionQuery, filter: Filter) -> Result<BackendQuery> {
    let mut filter = filter;
    if let Some(bbox) = &query.bbox {
        let geometry = schema.geometry.as_ref().ok_or_else(|| {
            FederationError::InvalidInput(format!(
                "collection '{}' has no geometry, bbox can't be applied",
                schema.name
            ))
        })?;
        bbox.srid()
            .map_err(|e| FederationError::InvalidInput(e.to_string()))?;
        filter = filter.and(Filter::Bbox {
            property: geometry.name.clone(),
            bbox: bbox.clone(),
        });
    }

    for property in filter.properties() {
        if !schema.has_property(property) {
            return Err(FederationError::InvalidInput(format!(
                "unknown property '{}' in filter on '{}'",
                property, schema.name
            )));
        }
    }

    let mut sort = Vec::with_capacity(query.sort_by.len() + 1);
    for key in &query.sort_by {
        if schema.property(&key.property).is_none() {
            return Err(FederationError::InvalidInput(format!(
                "unknown sort property '{}' on '{}'",
                key.property, schema.name
            )));
        }
        sort.push(SortKey::Property {
            name: key.property.clone(),
            ascending: key.ascending,
        });
    }
    if query.is_paged() {
        sort.push(SortKey::Natural);
    }

    if let Some(crs) = &query.target_crs {
        epsg_code(crs).map_err(|e| FederationError::InvalidInput(e.to_string()))?;
    }

    Ok(BackendQuery {
        collection: query.collection_id.clone(),
        filter,
        limit: query.limit,
        offset: query.offset,
        sort,
        target_crs: query.target_crs.clone(),
    })
}
