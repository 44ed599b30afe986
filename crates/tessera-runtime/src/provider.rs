//! Lazy lifecycle of the session bound to one namespace.

use crate::backend::{BackendSession, ConnectionSource};
use crate::error::{FederationError, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// Owns at most one live session for a namespace.
///
/// The session is opened on first use and shared by every caller. Readers
/// never see a half-built session: creation happens under the write lock,
/// which is downgraded before the new session is handed out.
///
/// A retired provider never opens another session; callers still holding it
/// get not-found instead of a connection nobody will close.
pub struct ConnectionProvider {
    namespace: String,
    source: Arc<dyn ConnectionSource>,
    session: RwLock<Option<Arc<dyn BackendSession>>>,
    retired: AtomicBool,
}

impl ConnectionProvider {
    pub fn new(namespace: impl Into<String>, source: Arc<dyn ConnectionSource>) -> Self {
        Self {
            namespace: namespace.into(),
            source,
            session: RwLock::new(None),
            retired: AtomicBool::new(false),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// The live session, opening it if needed. Connection failures are
    /// returned to the caller; the next call tries again.
    pub async fn get(&self) -> Result<Arc<dyn BackendSession>> {
        {
            let current = self.session.read().await;
            if let Some(session) = current.as_ref() {
                return Ok(Arc::clone(session));
            }
        }

        let mut slot = self.session.write().await;
        if slot.is_none() {
            self.ensure_active()?;
            tracing::debug!(namespace = %self.namespace, "Opening backend session");
            *slot = Some(self.source.connect(&self.namespace).await?);
        }
        let current = slot.downgrade();
        current
            .clone()
            .ok_or_else(|| FederationError::NamespaceNotFound(self.namespace.clone()))
    }

    /// Dispose the live session, if any. Disposal errors are logged only.
    pub async fn destroy(&self) {
        let mut slot = self.session.write().await;
        self.dispose(&mut slot).await;
    }

    /// [`destroy`](Self::destroy), and refuse to open another session.
    pub async fn retire(&self) {
        let mut slot = self.session.write().await;
        self.retired.store(true, Ordering::Release);
        self.dispose(&mut slot).await;
    }

    pub fn is_retired(&self) -> bool {
        self.retired.load(Ordering::Acquire)
    }

    fn ensure_active(&self) -> Result<()> {
        if self.is_retired() {
            return Err(FederationError::NamespaceNotFound(self.namespace.clone()));
        }
        Ok(())
    }

    /// Replace the live session with a fresh one.
    pub async fn re_init(&self) -> Result<()> {
        let mut slot = self.session.write().await;
        self.dispose(&mut slot).await;
        self.ensure_active()?;
        *slot = Some(self.source.connect(&self.namespace).await?);
        tracing::info!(namespace = %self.namespace, "Backend session reinitialized");
        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.session.read().await.is_some()
    }

    async fn dispose(&self, slot: &mut Option<Arc<dyn BackendSession>>) {
        let Some(session) = slot.take() else {
            return;
        };
        match session.dispose().await {
            Ok(()) => tracing::debug!(namespace = %self.namespace, "Backend session disposed"),
            Err(e) => tracing::warn!(
                namespace = %self.namespace,
                error = %e,
                "Failed to dispose backend session"
            ),
        }
    }
}

impl std::fmt::Debug for ConnectionProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionProvider")
            .field("namespace", &self.namespace)
            .finish_non_exhaustive()
    }
}
