//! Namespace discovery and the provider-per-namespace registry.
//!
//! Namespaces come and go at the backend. The directory lists them, keeps
//! the included ones for `refresh.interval`, and disposes the providers of
//! namespaces that disappeared. Providers for new namespaces are created on
//! first use.

use crate::backend::ConnectionSource;
use crate::error::Result;
use crate::provider::ConnectionProvider;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tessera_core::{NamingScheme, RefreshConfig};
use tokio::sync::{Mutex, RwLock};
use tokio::time::Instant;

struct SchemaCache {
    namespaces: Vec<String>,
    fetched_at: Instant,
    refreshed_at: DateTime<Utc>,
}

impl SchemaCache {
    fn new(namespaces: Vec<String>) -> Self {
        Self {
            namespaces,
            fetched_at: Instant::now(),
            refreshed_at: Utc::now(),
        }
    }
}

/// Diagnostic snapshot of the directory.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DirectoryStatus {
    /// Included namespaces as of the last successful scan.
    pub namespaces: Vec<String>,
    pub refreshed_at: Option<DateTime<Utc>>,
    /// Namespaces with a live session.
    pub connected: Vec<String>,
}

pub struct NamespaceDirectory {
    source: Arc<dyn ConnectionSource>,
    naming: Arc<NamingScheme>,
    refresh: RefreshConfig,
    cache: RwLock<Option<SchemaCache>>,
    refresh_lock: Mutex<()>,
    providers: Mutex<HashMap<String, Arc<ConnectionProvider>>>,
}

impl NamespaceDirectory {
    pub fn new(
        source: Arc<dyn ConnectionSource>,
        naming: Arc<NamingScheme>,
        refresh: RefreshConfig,
    ) -> Self {
        Self {
            source,
            naming,
            refresh,
            cache: RwLock::new(None),
            refresh_lock: Mutex::new(()),
            providers: Mutex::new(HashMap::new()),
        }
    }

    pub fn naming(&self) -> &NamingScheme {
        &self.naming
    }

    /// Currently included namespaces, sorted.
    ///
    /// With refresh enabled the list is reused until it is older than the
    /// refresh interval. If a re-scan fails, the previous list keeps being
    /// served for one more interval.
    pub async fn namespaces(&self) -> Result<Vec<String>> {
        if !self.refresh.enabled {
            let namespaces = self.scan().await?;
            self.reconcile(&namespaces).await;
            *self.cache.write().await = Some(SchemaCache::new(namespaces.clone()));
            return Ok(namespaces);
        }

        if let Some(namespaces) = self.fresh().await {
            return Ok(namespaces);
        }

        let _refresh = self.refresh_lock.lock().await;
        if let Some(namespaces) = self.fresh().await {
            return Ok(namespaces);
        }

        match self.scan().await {
            Ok(namespaces) => {
                self.reconcile(&namespaces).await;
                *self.cache.write().await = Some(SchemaCache::new(namespaces.clone()));
                Ok(namespaces)
            }
            Err(e) => {
                let mut cache = self.cache.write().await;
                let Some(stale) = cache.as_mut() else {
                    return Err(e);
                };
                tracing::warn!(
                    error = %e,
                    namespaces = stale.namespaces.len(),
                    "Namespace scan failed, serving the previous namespace list"
                );
                stale.fetched_at = Instant::now();
                Ok(stale.namespaces.clone())
            }
        }
    }

    async fn fresh(&self) -> Option<Vec<String>> {
        let cache = self.cache.read().await;
        cache
            .as_ref()
            .filter(|cache| cache.fetched_at.elapsed() < self.refresh.interval)
            .map(|cache| cache.namespaces.clone())
    }

    async fn scan(&self) -> Result<Vec<String>> {
        let raw = self.source.list_namespaces().await?;
        let included: BTreeSet<String> = raw
            .into_iter()
            .filter(|namespace| self.naming.include_schema(namespace))
            .filter(|namespace| {
                let invertible = self.naming.is_invertible(namespace);
                if !invertible {
                    tracing::warn!(
                        namespace = %namespace,
                        delimiter = %self.naming.delimiter(),
                        "Skipping schema whose name contains the delimiter, configure an alias to publish it"
                    );
                }
                invertible
            })
            .collect();
        Ok(included.into_iter().collect())
    }

    /// Retire providers of namespaces missing from `current`.
    async fn reconcile(&self, current: &[String]) {
        let previous: Option<BTreeSet<String>> = self
            .cache
            .read()
            .await
            .as_ref()
            .map(|cache| cache.namespaces.iter().cloned().collect());
        let current_set: BTreeSet<&String> = current.iter().collect();

        let gone: Vec<Arc<ConnectionProvider>> = {
            let mut providers = self.providers.lock().await;
            let names: Vec<String> = providers
                .keys()
                .filter(|name| !current_set.contains(name))
                .cloned()
                .collect();
            names
                .iter()
                .filter_map(|name| providers.remove(name))
                .collect()
        };
        for provider in gone {
            provider.retire().await;
        }

        if let Some(previous) = previous {
            let added: Vec<&String> = current.iter().filter(|ns| !previous.contains(*ns)).collect();
            let removed: Vec<&String> = previous.iter().filter(|ns| !current_set.contains(ns)).collect();
            if !added.is_empty() {
                tracing::info!(namespaces = ?added, "New schemas found");
            }
            if !removed.is_empty() {
                tracing::info!(namespaces = ?removed, "Schemas removed");
            }
        }
    }

    /// The provider for `namespace`, created on first request.
    ///
    /// A provider handed out here and removed by a later scan is retired, so
    /// holders of the old handle can't reopen a session outside the registry.
    pub async fn provider(&self, namespace: &str) -> Arc<ConnectionProvider> {
        let mut providers = self.providers.lock().await;
        Arc::clone(providers.entry(namespace.to_string()).or_insert_with(|| {
            tracing::debug!(namespace = %namespace, "Provisioning connection provider");
            Arc::new(ConnectionProvider::new(namespace, Arc::clone(&self.source)))
        }))
    }

    pub async fn status(&self) -> DirectoryStatus {
        let (namespaces, refreshed_at) = match self.cache.read().await.as_ref() {
            Some(cache) => (cache.namespaces.clone(), Some(cache.refreshed_at)),
            None => (Vec::new(), None),
        };
        let providers: Vec<Arc<ConnectionProvider>> =
            self.providers.lock().await.values().cloned().collect();
        let mut connected = Vec::new();
        for provider in providers {
            if provider.is_connected().await {
                connected.push(provider.namespace().to_string());
            }
        }
        connected.sort();
        DirectoryStatus {
            namespaces,
            refreshed_at,
            connected,
        }
    }

    /// Dispose every provider and forget the cached namespace list.
    pub async fn dispose_all(&self) {
        let providers: Vec<Arc<ConnectionProvider>> =
            self.providers.lock().await.drain().map(|(_, p)| p).collect();
        for provider in providers {
            provider.retire().await;
        }
        *self.cache.write().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FederationError;
    use crate::memory::MemoryBackend;
    use std::time::Duration;
    use tessera_core::{SchemaRule, SchemasConfig};

    fn directory(backend: &MemoryBackend, refresh: RefreshConfig) -> NamespaceDirectory {
        let naming = NamingScheme::new(&SchemasConfig {
            include: vec![SchemaRule::all(), SchemaRule::new("odd:name").with_alias("odd")],
            exclude: vec!["staging".to_string()],
            ..Default::default()
        })
        .unwrap();
        NamespaceDirectory::new(Arc::new(backend.clone()), Arc::new(naming), refresh)
    }

    #[tokio::test]
    async fn scan_filters_and_sorts() {
        let backend = MemoryBackend::new();
        for ns in ["zeta", "pg_catalog", "alpha", "staging", "information_schema", "a:b", "odd:name"] {
            backend.create_namespace(ns);
        }
        let directory = directory(&backend, RefreshConfig::disabled());
        assert_eq!(
            directory.namespaces().await.unwrap(),
            vec!["alpha", "odd:name", "zeta"]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cache_expires_after_interval() {
        let backend = MemoryBackend::new();
        backend.create_namespace("public");
        let directory = directory(&backend, RefreshConfig::every(Duration::from_secs(5)));

        assert_eq!(directory.namespaces().await.unwrap(), vec!["public"]);
        backend.create_namespace("secondary");
        assert_eq!(directory.namespaces().await.unwrap(), vec!["public"]);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(
            directory.namespaces().await.unwrap(),
            vec!["public", "secondary"]
        );
    }

    #[tokio::test]
    async fn disabled_refresh_scans_every_time() {
        let backend = MemoryBackend::new();
        let directory = directory(&backend, RefreshConfig::disabled());
        assert!(directory.namespaces().await.unwrap().is_empty());
        backend.create_namespace("public");
        assert_eq!(directory.namespaces().await.unwrap(), vec!["public"]);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_scan_serves_stale_list() {
        let backend = MemoryBackend::new();
        backend.create_namespace("public");
        let directory = directory(&backend, RefreshConfig::every(Duration::from_secs(5)));
        directory.namespaces().await.unwrap();

        tokio::time::advance(Duration::from_secs(6)).await;
        backend.fail_next_scans(1);
        backend.create_namespace("secondary");
        assert_eq!(directory.namespaces().await.unwrap(), vec!["public"]);

        // the stale entry counts as fresh for one more interval
        assert_eq!(directory.namespaces().await.unwrap(), vec!["public"]);
        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(
            directory.namespaces().await.unwrap(),
            vec!["public", "secondary"]
        );
    }

    #[tokio::test]
    async fn failed_first_scan_propagates() {
        let backend = MemoryBackend::new();
        backend.fail_next_scans(1);
        let directory = directory(&backend, RefreshConfig::default());
        assert!(directory.namespaces().await.is_err());
    }

    #[tokio::test]
    async fn dropped_namespaces_lose_their_provider() {
        let backend = MemoryBackend::new();
        backend.create_namespace("public");
        backend.create_namespace("secondary");
        let directory = directory(&backend, RefreshConfig::disabled());
        directory.namespaces().await.unwrap();

        let provider = directory.provider("secondary").await;
        provider.get().await.unwrap();
        assert_eq!(directory.status().await.connected, vec!["secondary"]);

        backend.drop_namespace("secondary");
        assert_eq!(directory.namespaces().await.unwrap(), vec!["public"]);
        assert!(!provider.is_connected().await);
        assert!(directory.status().await.connected.is_empty());

        let again = directory.provider("secondary").await;
        assert!(!Arc::ptr_eq(&provider, &again));
    }

    #[tokio::test]
    async fn removed_providers_cannot_reconnect() {
        let backend = MemoryBackend::new();
        backend.create_namespace("public");
        backend.create_namespace("secondary");
        let directory = directory(&backend, RefreshConfig::disabled());
        directory.namespaces().await.unwrap();

        // looked up before the scan that drops the namespace, used after it
        let stale = directory.provider("secondary").await;
        backend.drop_namespace("secondary");
        directory.namespaces().await.unwrap();
        backend.create_namespace("secondary");

        assert!(matches!(
            stale.get().await,
            Err(FederationError::NamespaceNotFound(_))
        ));
        assert!(!stale.is_connected().await);
        assert_eq!(backend.connect_count(), 0);

        directory.namespaces().await.unwrap();
        let fresh = directory.provider("secondary").await;
        fresh.get().await.unwrap();
        assert_eq!(directory.status().await.connected, vec!["secondary"]);

        directory.dispose_all().await;
        assert!(fresh.get().await.is_err());
        assert_eq!(backend.connect_count(), 1);
    }

    #[tokio::test]
    async fn dispose_all_closes_sessions() {
        let backend = MemoryBackend::new();
        backend.create_namespace("public");
        let directory = directory(&backend, RefreshConfig::default());
        directory.namespaces().await.unwrap();
        let provider = directory.provider("public").await;
        provider.get().await.unwrap();

        directory.dispose_all().await;
        assert!(!provider.is_connected().await);
        let status = directory.status().await;
        assert!(status.namespaces.is_empty());
        assert!(status.refreshed_at.is_none());
    }
}
