//! # tessera-runtime
//!
//! Publishes the tables of many PostgreSQL schemas as one flat set of
//! collections, and keeps reads working while schemas are created, dropped
//! or altered underneath.
//!
//! Bottom-up:
//!
//! - [`ConnectionProvider`]: one lazily opened session per namespace
//! - [`NamespaceDirectory`]: periodic namespace discovery and the provider registry
//! - [`RenamingView`]: a namespace's collections under their published names
//! - [`FederatedStore`]: routes composite names to the owning view
//! - [`CollectionRepository`]: the read API, with a single reconnect-and-retry
//!   on backend failures
//!
//! Databases plug in through [`ConnectionSource`] and [`BackendSession`].
//! [`MemoryBackend`] is an in-process implementation; [`MemoryBackend::sample`]
//! preloads it with the [`sample`] dataset.

pub mod backend;
pub mod directory;
pub mod error;
pub mod memory;
pub mod provider;
pub mod repository;
pub mod sample;
pub mod store;
pub mod view;

pub use backend::{BackendQuery, BackendSession, ConnectionSource, RecordStream, SortKey};
pub use directory::{DirectoryStatus, NamespaceDirectory};
pub use error::{FederationError, Result, WriteOperation};
pub use memory::MemoryBackend;
pub use provider::ConnectionProvider;
pub use repository::{CollectionRepository, FeatureCollection};
pub use store::FederatedStore;
pub use view::RenamingView;
