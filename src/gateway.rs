//! Permission gateway.
//!
//! The only real decision procedure in arbol. Given the request's
//! [`UserState`] and the groups a branch admits, it either lets the request
//! through or names the error to send back:
//!
//! ```text
//! Unresolved            → Unauthorized (401)
//! Failed(e)             → e
//! Authenticated, disabled → Forbidden (403)
//! Authenticated, no groups required → pass
//! Authenticated, groups ∩ allowed ≠ ∅ → pass
//! otherwise             → Forbidden (403)
//! ```
//!
//! The disabled check always runs, even when no groups are required.

use std::sync::Arc;

use serde::Deserialize;

use crate::app_error::{ApplicationError, ErrorName};
use crate::identity::UserState;
use crate::middleware::Twig;
use crate::request::Request;

pub const USER_MISSING: &str = "No user provided";
pub const USER_DISABLED: &str = "Access denied. User is disabled";
pub const PERMISSION_MISSING: &str = "User is missing the required permission for access";

/// Where the gateway looks inside an identity, and how it compares groups.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct GatewayConfig {
    /// Claim holding the user's groups.
    pub groups_field: String,
    /// Claim that, when `false`, marks the user disabled.
    pub active_field: String,
    /// ASCII case-insensitive group comparison.
    pub case_insensitive: bool,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            groups_field: "groups".to_owned(),
            active_field: "active".to_owned(),
            case_insensitive: false,
        }
    }
}

/// Outcome of one gateway evaluation.
#[derive(Clone, Debug, PartialEq)]
pub enum Decision {
    Pass,
    Reject(ApplicationError),
}

/// A gateway bound to one set of allowed groups.
#[derive(Clone, Debug)]
pub struct Gateway {
    config: Arc<GatewayConfig>,
    /// `None` means any valid, enabled user.
    allowed: Option<Vec<String>>,
}

impl Gateway {
    /// An empty list is the same as no list.
    pub fn new(config: Arc<GatewayConfig>, allowed: Option<Vec<String>>) -> Self {
        let allowed = allowed.filter(|groups| !groups.is_empty());
        Self { config, allowed }
    }

    pub fn allowed(&self) -> Option<&[String]> {
        self.allowed.as_deref()
    }

    pub fn decide(&self, user: &UserState) -> Decision {
        let identity = match user {
            UserState::Unresolved => {
                return Decision::Reject(ApplicationError::unauthorized(USER_MISSING));
            }
            UserState::Failed(e) => return Decision::Reject(e.clone()),
            UserState::Authenticated(identity) => identity,
        };

        if identity.is_disabled(&self.config.active_field) {
            return Decision::Reject(ApplicationError::forbidden(USER_DISABLED));
        }

        let Some(allowed) = &self.allowed else {
            return Decision::Pass;
        };

        let held = identity.groups(&self.config.groups_field);
        let granted = held
            .iter()
            .any(|g| allowed.iter().any(|a| self.same_group(g, a)));

        if granted {
            Decision::Pass
        } else {
            Decision::Reject(ApplicationError::new(ErrorName::Forbidden.as_str(), PERMISSION_MISSING))
        }
    }

    fn same_group(&self, held: &str, allowed: &str) -> bool {
        if self.config.case_insensitive {
            held.eq_ignore_ascii_case(allowed)
        } else {
            held == allowed
        }
    }
}

impl Twig for Gateway {
    fn apply(&self, req: &mut Request) -> Result<(), ApplicationError> {
        match self.decide(req.user()) {
            Decision::Pass => Ok(()),
            Decision::Reject(e) => {
                tracing::debug!(uuid = %req.uuid(), name = e.name(), "permission gateway rejected request");
                Err(e)
            }
        }
    }
}
