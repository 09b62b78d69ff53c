//! Application errors and the fixed name → status table.
//!
//! An [`ApplicationError`] is what a client sees in the `error` slot of the
//! envelope. It is built where the failure is detected (a check, the gateway,
//! a service) and consumed once by [`emit`](crate::envelope::emit).
//!
//! | Name | Code |
//! |---|---|
//! | `BadRequest`, `InvalidRequestParameters` | 400 |
//! | `Unauthorized`, `InvalidCredentials`, `TokenExpired` | 401 |
//! | `Forbidden`, `InvalidPermission` | 403 |
//! | `NotFound`, `DoesNotExist` | 404 |
//! | `NotImplemented` | 501 |
//! | `Unavailable` | 503 |
//! | `ServerError` and anything unrecognised | 500 |

use std::fmt;
use std::str::FromStr;

use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Name used when none is supplied.
pub const DEFAULT_NAME: &str = "ServerError";

/// Code used for names missing from the table.
pub const DEFAULT_CODE: u16 = 500;

// ── ErrorName ─────────────────────────────────────────────────────────────────

/// The names the table knows about.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorName {
    // 400
    BadRequest,
    InvalidRequestParameters,
    // 401
    Unauthorized,
    InvalidCredentials,
    TokenExpired,
    // 403
    Forbidden,
    InvalidPermission,
    // 404
    NotFound,
    DoesNotExist,
    // 5xx
    NotImplemented,
    Unavailable,
    ServerError,
}

impl ErrorName {
    pub const ALL: [Self; 12] = [
        Self::BadRequest,
        Self::InvalidRequestParameters,
        Self::Unauthorized,
        Self::InvalidCredentials,
        Self::TokenExpired,
        Self::Forbidden,
        Self::InvalidPermission,
        Self::NotFound,
        Self::DoesNotExist,
        Self::NotImplemented,
        Self::Unavailable,
        Self::ServerError,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::BadRequest               => "BadRequest",
            Self::InvalidRequestParameters => "InvalidRequestParameters",
            Self::Unauthorized             => "Unauthorized",
            Self::InvalidCredentials       => "InvalidCredentials",
            Self::TokenExpired             => "TokenExpired",
            Self::Forbidden                => "Forbidden",
            Self::InvalidPermission        => "InvalidPermission",
            Self::NotFound                 => "NotFound",
            Self::DoesNotExist             => "DoesNotExist",
            Self::NotImplemented           => "NotImplemented",
            Self::Unavailable              => "Unavailable",
            Self::ServerError              => "ServerError",
        }
    }

    /// The HTTP status this name maps to.
    pub fn code(self) -> u16 {
        match self {
            Self::BadRequest | Self::InvalidRequestParameters => 400,
            Self::Unauthorized | Self::InvalidCredentials | Self::TokenExpired => 401,
            Self::Forbidden | Self::InvalidPermission => 403,
            Self::NotFound | Self::DoesNotExist => 404,
            Self::NotImplemented => 501,
            Self::Unavailable => 503,
            Self::ServerError => DEFAULT_CODE,
        }
    }
}

/// Case-sensitive: `"notfound"` is not a known name.
impl FromStr for ErrorName {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL.into_iter().find(|n| n.as_str() == s).ok_or(())
    }
}

impl fmt::Display for ErrorName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Maps an error name to its HTTP status. Total: unknown names yield 500.
pub fn classify(name: &str) -> u16 {
    name.parse::<ErrorName>().map_or(DEFAULT_CODE, ErrorName::code)
}

// ── ApplicationError ──────────────────────────────────────────────────────────

/// A failure destined for the client.
///
/// `code` is always a valid HTTP status. When the caller does not supply one
/// (or supplies something outside `100..=999`) it comes from [`classify`].
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ApplicationError {
    name: String,
    message: String,
    code: u16,
}

impl ApplicationError {
    /// Builds an error whose code is looked up from `name`.
    pub fn new(name: impl Into<String>, message: impl Into<String>) -> Self {
        let name = non_empty_name(name.into());
        let code = classify(&name);
        Self { name, message: message.into(), code }
    }

    /// Builds an error with an explicit code. The code is kept verbatim when it
    /// is a valid HTTP status; otherwise the table decides.
    pub fn with_code(name: impl Into<String>, message: impl Into<String>, code: u16) -> Self {
        let name = non_empty_name(name.into());
        let code = if StatusCode::from_u16(code).is_ok() { code } else { classify(&name) };
        Self { name, message: message.into(), code }
    }

    /// Wraps an arbitrary error raised inside a service.
    ///
    /// Rust errors carry no symbolic name, so the result is always a
    /// `ServerError` holding the error's display text.
    pub fn from_error(err: &(dyn std::error::Error + 'static)) -> Self {
        Self::new(DEFAULT_NAME, err.to_string())
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(ErrorName::BadRequest.as_str(), message)
    }

    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::new(ErrorName::Unauthorized.as_str(), message)
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        Self::new(ErrorName::Forbidden.as_str(), message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorName::NotFound.as_str(), message)
    }

    pub fn server_error(message: impl Into<String>) -> Self {
        Self::new(ErrorName::ServerError.as_str(), message)
    }

    pub fn name(&self) -> &str { &self.name }
    pub fn message(&self) -> &str { &self.message }
    pub fn code(&self) -> u16 { self.code }

    /// The code as a [`StatusCode`]. Infallible because the constructors only
    /// ever store valid codes.
    pub fn status(&self) -> StatusCode {
        StatusCode::from_u16(self.code).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR)
    }
}

fn non_empty_name(name: String) -> String {
    if name.is_empty() { DEFAULT_NAME.to_owned() } else { name }
}

impl fmt::Display for ApplicationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}): {}", self.name, self.code, self.message)
    }
}

impl std::error::Error for ApplicationError {}

impl From<ErrorName> for ApplicationError {
    fn from(name: ErrorName) -> Self {
        Self::new(name.as_str(), name.as_str())
    }
}

impl From<std::io::Error> for ApplicationError {
    fn from(e: std::io::Error) -> Self {
        Self::from_error(&e)
    }
}

impl From<serde_json::Error> for ApplicationError {
    fn from(e: serde_json::Error) -> Self {
        Self::from_error(&e)
    }
}
