//! Unified infrastructure error type.

use thiserror::Error as ThisError;

use crate::token::TokenError;

/// The error type returned by arbol's fallible setup and lifecycle operations.
///
/// Request-level failures (401, 403, 404, …) are expressed as
/// [`ApplicationError`](crate::ApplicationError) values inside the envelope,
/// not as `Error`s. This type surfaces what stops a tree from growing at all:
/// bad configuration, conflicting routes, unusable keys, or socket failures.
#[derive(Debug, ThisError)]
pub enum Error {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("invalid route `{path}`: {reason}")]
    Route { path: String, reason: String },

    #[error("branch `{0}` requires permission but the tree has no security enabled")]
    SecurityNotEnabled(String),

    #[error("invalid schema for {target} check: {reason}")]
    Schema { target: &'static str, reason: String },

    #[error("token authority: {0}")]
    Token(#[from] TokenError),

    #[error("server task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}
