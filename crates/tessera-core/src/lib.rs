//! # tessera-core
//!
//! Types shared by every Tessera crate:
//!
//! - [`config`]: the YAML configuration (`tessera.yaml`) and its validation
//! - [`naming`]: the [`NamingScheme`] that maps PostgreSQL schemas to the
//!   prefixes under which their tables are published
//! - [`query`]: the immutable [`CollectionQuery`] request value
//! - [`model`]: collection metadata and records
//! - [`geometry`]: bounding boxes and CRS identifiers

pub mod config;
pub mod geometry;
pub mod model;
pub mod naming;
pub mod query;

pub use config::{
    ConfigError, LoggingConfig, RefreshConfig, SchemaRule, SchemasConfig, TesseraConfig,
    UpstreamConfig,
};
pub use geometry::{BoundingBox, GeometryError};
pub use model::{
    CollectionInfo, CollectionSchema, GeometryProperty, ItemType, PropertyDef, Record,
};
pub use naming::NamingScheme;
pub use query::{CollectionQuery, SortBy};
