//! Error types for the federation runtime.

use tessera_core::ConfigError;
use tessera_filter::FilterError;
use thiserror::Error;

pub type Result<T, E = FederationError> = std::result::Result<T, E>;

/// Errors surfaced by sessions, the federated store and the repository.
#[derive(Debug, Error)]
pub enum FederationError {
    /// Naming rules or configuration are unusable.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// The request itself is wrong (unknown property, bad bbox, ...).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid filter: {0}")]
    Filter(#[from] FilterError),

    #[error("collection '{0}' not found")]
    CollectionNotFound(String),

    #[error("namespace '{0}' not found")]
    NamespaceNotFound(String),

    #[error("collection '{collection}' is read-only, {operation} is not allowed")]
    ReadOnly {
        collection: String,
        operation: String,
    },

    /// Connection loss, stale metadata or any other backend failure.
    #[error("backend error: {0}")]
    Backend(anyhow::Error),

    /// The automatic retry failed as well.
    #[error("{operation} failed after reinitializing the connection: {last} (first failure: {cause})")]
    RetryExhausted {
        operation: String,
        #[source]
        cause: Box<FederationError>,
        last: String,
    },
}

impl FederationError {
    pub fn backend(error: impl Into<anyhow::Error>) -> Self {
        FederationError::Backend(error.into())
    }

    /// Turn an adapter error into a federation error, keeping a
    /// `FederationError` raised inside the adapter as is.
    pub fn classify(error: anyhow::Error) -> Self {
        match error.downcast::<FederationError>() {
            Ok(federation) => federation,
            Err(other) => FederationError::Backend(other),
        }
    }

    /// Only backend failures are worth a reconnect and a second attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FederationError::Backend(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FederationError::CollectionNotFound(_) | FederationError::NamespaceNotFound(_)
        )
    }
}

/// Kinds of write refused by read-only views.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOperation {
    Insert,
    Update,
    Delete,
}

impl std::fmt::Display for WriteOperation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WriteOperation::Insert => "insert",
            WriteOperation::Update => "update",
            WriteOperation::Delete => "delete",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_backend_errors_are_retryable() {
        assert!(FederationError::backend(anyhow::anyhow!("connection reset")).is_retryable());
        assert!(!FederationError::InvalidInput("x".to_string()).is_retryable());
        assert!(!FederationError::CollectionNotFound("x".to_string()).is_retryable());
        assert!(!FederationError::Config(ConfigError::NoUnprefixedSchema).is_retryable());
    }

    #[test]
    fn backend_message_does_not_repeat_its_source() {
        #[derive(Debug, thiserror::Error)]
        #[error("error communicating with database: {0}")]
        struct Io(#[source] std::io::Error);

        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let err = FederationError::backend(Io(io));
        assert_eq!(
            err.to_string(),
            "backend error: error communicating with database: connection reset"
        );
    }

    #[test]
    fn classify_keeps_federation_errors() {
        let raised = anyhow::Error::new(FederationError::CollectionNotFound("roads".to_string()));
        assert!(matches!(
            FederationError::classify(raised),
            FederationError::CollectionNotFound(name) if name == "roads"
        ));
        assert!(matches!(
            FederationError::classify(anyhow::anyhow!("boom")),
            FederationError::Backend(_)
        ));
    }

    #[test]
    fn retry_exhausted_names_both_failures() {
        let err = FederationError::RetryExhausted {
            operation: "query on 'locations'".to_string(),
            cause: Box::new(FederationError::backend(anyhow::anyhow!("first"))),
            last: "second".to_string(),
        };
        let message = err.to_string();
        assert!(message.contains("first"));
        assert!(message.contains("second"));
        assert!(message.starts_with("query on 'locations'"));
    }
}
