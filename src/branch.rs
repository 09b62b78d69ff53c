//! Branches: a path prefix, the steps that guard it, and what grows from it.
//!
//! Steps run in a fixed order no matter the order the builder methods are
//! called in:
//!
//! 1. the request log, if enabled
//! 2. custom twigs, in the order added
//! 3. the permission gateway, if a permission is required
//! 4. checks, in the order added
//!
//! Nested branches inherit the full chain of their parent and append their own.

use std::fmt;
use std::sync::Arc;

use crate::check::Check;
use crate::error::Error;
use crate::gateway::{Gateway, GatewayConfig};
use crate::leaf::Leaf;
use crate::middleware::trace::RequestLog;
use crate::middleware::{BoxedTwig, Twig};
use crate::request::Request;
use crate::router::{RouteTable, join_paths};

pub struct Branch {
    path: String,
    log: Option<BoxedTwig>,
    twigs: Vec<BoxedTwig>,
    permission: Option<Vec<String>>,
    checks: Vec<BoxedTwig>,
    leaves: Vec<Leaf>,
    branches: Vec<Branch>,
}

impl Branch {
    pub fn new(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            log: None,
            twigs: Vec::new(),
            permission: None,
            checks: Vec::new(),
            leaves: Vec::new(),
            branches: Vec::new(),
        }
    }

    pub fn twig(mut self, twig: impl Twig) -> Self {
        self.twigs.push(Arc::new(twig));
        self
    }

    /// Only users in one of `groups` get through. An empty list admits any
    /// authenticated, enabled user. Calling this again replaces the list.
    pub fn require_permission<I, S>(mut self, groups: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.permission = Some(groups.into_iter().map(Into::into).collect());
        self
    }

    /// Any authenticated, enabled user.
    pub fn require_user(self) -> Self {
        self.require_permission(std::iter::empty::<String>())
    }

    pub fn log_requests(mut self) -> Self {
        self.log = Some(Arc::new(RequestLog::new()));
        self
    }

    pub fn log_requests_with(mut self, writer: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        self.log = Some(Arc::new(RequestLog::with(writer)));
        self
    }

    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(Arc::new(check));
        self
    }

    pub fn leaf(mut self, leaf: Leaf) -> Self {
        self.leaves.push(leaf);
        self
    }

    pub fn branch(mut self, branch: Branch) -> Self {
        self.branches.push(branch);
        self
    }

    pub fn path(&self) -> &str { &self.path }

    /// Registers every leaf under this branch (recursively) into `table`.
    pub(crate) fn plant(
        self,
        prefix: &str,
        inherited: &[BoxedTwig],
        gateway: Option<&Arc<GatewayConfig>>,
        table: &mut RouteTable,
    ) -> Result<(), Error> {
        let base = join_paths(prefix, &self.path);

        let mut chain = inherited.to_vec();
        chain.extend(self.log);
        chain.extend(self.twigs);
        if let Some(allowed) = self.permission {
            let config = gateway.ok_or_else(|| Error::SecurityNotEnabled(base.clone()))?;
            chain.push(Arc::new(Gateway::new(Arc::clone(config), Some(allowed))));
        }
        chain.extend(self.checks);

        for leaf in self.leaves {
            leaf.plant(&base, &chain, table)?;
        }
        for child in self.branches {
            child.plant(&base, &chain, gateway, table)?;
        }
        Ok(())
    }
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("path", &self.path)
            .field("log", &self.log.is_some())
            .field("permission", &self.permission)
            .field("leaves", &self.leaves)
            .field("branches", &self.branches)
            .finish_non_exhaustive()
    }
}
