//! The seam between the federation layer and concrete databases.

use crate::error::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::sync::Arc;
use tessera_core::{CollectionSchema, Record};
use tessera_filter::Filter;

/// Lazily produced records of a read.
pub type RecordStream = BoxStream<'static, Result<Record>>;

/// Opens sessions against the namespaces (schemas) of one database.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    /// Every namespace currently present, unfiltered.
    async fn list_namespaces(&self) -> Result<Vec<String>>;

    /// Open a session bound to `namespace`.
    async fn connect(&self, namespace: &str) -> Result<Arc<dyn BackendSession>>;
}

/// A live session bound to one namespace. Collection names are physical
/// table names.
///
/// Sessions may cache collection metadata. A cache that no longer matches the
/// database surfaces as a `Backend` error, which callers handle by
/// reinitializing the session.
#[async_trait]
pub trait BackendSession: Send + Sync {
    fn namespace(&self) -> &str;

    async fn list_collection_names(&self) -> Result<Vec<String>>;

    async fn describe_collection(&self, name: &str) -> Result<CollectionSchema>;

    /// Drop cached metadata for `name` so the next use reloads it.
    async fn refresh_metadata(&self, name: &str) -> Result<()>;

    async fn open_for_read(&self, query: &BackendQuery) -> Result<RecordStream>;

    /// Number of records `query` would return, honouring limit and offset.
    async fn count(&self, query: &BackendQuery) -> Result<u64>;

    /// Release the session's resources. Called once by its provider.
    async fn dispose(&self) -> Result<()>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SortKey {
    Property { name: String, ascending: bool },
    /// Primary key order, or physical row order when there is no key.
    Natural,
}

/// A read translated for a backend session.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendQuery {
    pub collection: String,
    pub filter: Filter,
    pub limit: Option<u64>,
    pub offset: Option<u64>,
    pub sort: Vec<SortKey>,
    /// CRS identifier geometries are reprojected to.
    pub target_crs: Option<String>,
}

impl BackendQuery {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            filter: Filter::Include,
            limit: None,
            offset: None,
            sort: Vec::new(),
            target_crs: None,
        }
    }

    pub fn with_collection(&self, collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            ..self.clone()
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }

    /// The same read without its page window.
    pub fn unpaged(&self) -> Self {
        Self {
            limit: None,
            offset: None,
            ..self.clone()
        }
    }

    pub fn is_paged(&self) -> bool {
        self.limit.is_some() || self.offset.is_some()
    }
}
