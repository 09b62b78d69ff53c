//! Who is making the request.

use serde_json::{Map, Value};

use crate::app_error::ApplicationError;
use crate::token::Claims;

/// An authenticated principal: the verified claims of its token, or whatever
/// object a custom resolver attached.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Identity {
    claims: Map<String, Value>,
}

impl Identity {
    pub fn new(claims: Claims) -> Self {
        Self { claims }
    }

    pub fn claims(&self) -> &Map<String, Value> { &self.claims }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.claims.get(field)
    }

    /// The `sub` claim, when it is a string.
    pub fn subject(&self) -> Option<&str> {
        self.get("sub").and_then(Value::as_str)
    }

    /// Group names held under `field`. A single string counts as one group;
    /// non-string array entries are ignored.
    pub fn groups<'a>(&'a self, field: &str) -> Vec<&'a str> {
        match self.get(field) {
            Some(Value::Array(items)) => items.iter().filter_map(Value::as_str).collect(),
            Some(Value::String(one)) => vec![one.as_str()],
            _ => Vec::new(),
        }
    }

    /// `true` when `field` is falsy in the loose sense: `false`, `0`, an empty
    /// or blank string, or a string that reads as zero (`"0"`, `"0.0"`). A
    /// missing field, `null` and strings like `"false"` mean enabled.
    pub fn is_disabled(&self, field: &str) -> bool {
        match self.get(field) {
            Some(Value::Bool(active)) => !active,
            Some(Value::Number(n)) => n.as_f64() == Some(0.0),
            Some(Value::String(s)) => {
                let s = s.trim();
                s.is_empty() || s.parse::<f64>().is_ok_and(|n| n == 0.0)
            }
            _ => false,
        }
    }
}

impl From<Claims> for Identity {
    fn from(claims: Claims) -> Self { Self::new(claims) }
}

/// The three states a request's user can be in. "Failed" is never conflated
/// with "nobody tried".
#[derive(Clone, Debug, Default, PartialEq)]
pub enum UserState {
    /// No authentication was attempted (no token presented).
    #[default]
    Unresolved,
    Authenticated(Identity),
    /// Authentication was attempted and produced this error.
    Failed(ApplicationError),
}

impl UserState {
    pub fn identity(&self) -> Option<&Identity> {
        match self {
            Self::Authenticated(identity) => Some(identity),
            _ => None,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self, Self::Authenticated(_))
    }
}

impl From<Result<Identity, ApplicationError>> for UserState {
    fn from(r: Result<Identity, ApplicationError>) -> Self {
        match r {
            Ok(identity) => Self::Authenticated(identity),
            Err(e) => Self::Failed(e),
        }
    }
}
