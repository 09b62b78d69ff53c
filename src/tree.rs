//! The tree: configuration, security, tree-wide twigs and top-level branches.
//!
//! Building a tree is pure composition. Nothing is bound or spawned until
//! [`Tree::start`] or [`Tree::serve`]; [`Tree::compile`] alone yields an
//! [`App`] that can answer requests in-process.
//!
//! Every route's chain starts with the tree-level steps:
//!
//! 1. token resolution, if [`Tree::security`] was set
//! 2. tree twigs, in the order added
//!
//! followed by the steps of each branch on the way down to the leaf.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::branch::Branch;
use crate::config::Config;
use crate::error::Error;
use crate::gateway::GatewayConfig;
use crate::middleware::auth::Security;
use crate::middleware::{BoxedTwig, Twig};
use crate::router::RouteTable;
use crate::server::{App, Running, UuidGenerator};

pub struct Tree {
    config: Config,
    security: Option<Security>,
    gateway: Option<GatewayConfig>,
    uuid: UuidGenerator,
    twigs: Vec<BoxedTwig>,
    branches: Vec<Branch>,
}

impl Tree {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            security: None,
            gateway: None,
            uuid: Arc::new(|| uuid::Uuid::new_v4().to_string()),
            twigs: Vec::new(),
            branches: Vec::new(),
        }
    }

    /// Enables token resolution on every route and permission gateways on
    /// branches that ask for them.
    pub fn security(mut self, security: Security) -> Self {
        self.security = Some(security);
        self
    }

    /// Enables permission gateways without token resolution, for trees whose
    /// own twigs put the user on the request. Overrides the gateway settings
    /// carried by [`Tree::security`].
    pub fn permissions(mut self, config: GatewayConfig) -> Self {
        self.gateway = Some(config);
        self
    }

    /// Replaces the correlation-id source (v4 UUIDs by default).
    pub fn uuid_generator(mut self, generate: impl Fn() -> String + Send + Sync + 'static) -> Self {
        self.uuid = Arc::new(generate);
        self
    }

    /// A twig run before every branch on every route.
    pub fn twig(mut self, twig: impl Twig) -> Self {
        self.twigs.push(Arc::new(twig));
        self
    }

    pub fn branch(mut self, branch: Branch) -> Self {
        self.branches.push(branch);
        self
    }

    pub fn config(&self) -> &Config { &self.config }

    /// Resolves every branch and leaf into a route table.
    ///
    /// # Errors
    ///
    /// - [`Error::Config`] when the configuration is invalid
    /// - [`Error::SecurityNotEnabled`] when a branch requires a permission and
    ///   neither [`Tree::security`] nor [`Tree::permissions`] was set
    /// - [`Error::Route`] when two leaves claim the same method and path
    pub fn compile(self) -> Result<App, Error> {
        self.config.validate()?;

        let gateway = match (self.gateway, &self.security) {
            (Some(config), _) => Some(Arc::new(config)),
            (None, Some(security)) => Some(Arc::clone(&security.gateway)),
            (None, None) => None,
        };

        let mut root: Vec<BoxedTwig> = Vec::with_capacity(self.twigs.len() + 1);
        if let Some(security) = &self.security {
            root.push(Arc::new(security.resolver()));
        }
        root.extend(self.twigs);

        let mut table = RouteTable::new();
        for branch in self.branches {
            branch.plant("", &root, gateway.as_ref(), &mut table)?;
        }
        for (method, pattern) in table.routes() {
            debug!(%method, %pattern, "route planted");
        }

        Ok(App::new(table, self.config, self.uuid))
    }

    /// Compiles, binds and serves in the background.
    pub async fn start(self) -> Result<Running, Error> {
        self.compile()?.start().await
    }

    /// Compiles, binds and serves until SIGTERM or Ctrl-C, then drains.
    pub async fn serve(self) -> Result<(), Error> {
        self.start().await?.wait().await
    }
}

impl fmt::Debug for Tree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tree")
            .field("config", &self.config)
            .field("security", &self.security.is_some())
            .field("twigs", &self.twigs.len())
            .field("branches", &self.branches)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::sync;
    use crate::leaf::Leaf;
    use crate::method::Method;
    use crate::request::Request;

    fn hello() -> Leaf {
        Leaf::get("/", sync(|_req: Request| "hello"))
    }

    #[test]
    fn compile_joins_branch_paths() {
        let app = Tree::new(Config::default())
            .branch(Branch::new("/").leaf(hello()))
            .branch(Branch::new("/api").branch(Branch::new("/v1").leaf(Leaf::post("/items", sync(|_req: Request| ())))))
            .compile()
            .unwrap();
        assert_eq!(
            app.routes().routes(),
            &[(Method::Get, "/".to_owned()), (Method::Post, "/api/v1/items".to_owned())]
        );
    }

    #[test]
    fn permission_needs_security_or_gateway_config() {
        let guarded = || Branch::new("/admin").require_permission(["admin"]).leaf(hello());

        let err = Tree::new(Config::default()).branch(guarded()).compile().unwrap_err();
        assert!(matches!(err, Error::SecurityNotEnabled(_)));

        let ok = Tree::new(Config::default())
            .permissions(GatewayConfig::default())
            .branch(guarded())
            .compile();
        assert!(ok.is_ok());
    }

    #[test]
    fn duplicate_leaf_is_rejected() {
        let err = Tree::new(Config::default())
            .branch(Branch::new("/").leaf(hello()).leaf(hello()))
            .compile()
            .unwrap_err();
        assert!(matches!(err, Error::Route { .. }));
    }

    #[test]
    fn invalid_config_is_rejected() {
        let config = Config { body_limit: 0, ..Config::default() };
        assert!(matches!(Tree::new(config).compile(), Err(Error::Config(_))));
    }
}
