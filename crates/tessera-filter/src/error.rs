//! Error types for filter parsing.

use thiserror::Error;

/// Errors raised while turning filter text into a [`crate::Filter`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FilterError {
    /// The text is not a valid expression.
    #[error("failed to parse filter '{text}': {message}")]
    Syntax { text: String, message: String },

    /// Valid syntax that has no filter meaning, e.g. `a + 1`.
    #[error("unsupported filter expression: {0}")]
    Unsupported(String),

    #[error("invalid literal: {0}")]
    InvalidLiteral(String),

    #[error("invalid BBOX: {0}")]
    InvalidBbox(String),
}
