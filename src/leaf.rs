//! Leaves: one endpoint each.

use std::fmt;
use std::sync::Arc;

use crate::check::Check;
use crate::envelope::ResponseType;
use crate::error::Error;
use crate::handler::{BoxedService, Service};
use crate::method::Method;
use crate::middleware::{BoxedTwig, Twig};
use crate::router::{Route, RouteTable, join_paths};

/// A single endpoint: a method, a path relative to its branch, the service
/// that answers it, and any twigs or checks that only apply here.
///
/// ```rust,no_run
/// use arbol::{Leaf, Request};
///
/// async fn report(_req: Request) -> serde_json::Value {
///     serde_json::json!([{"day": "mon", "hits": 12}])
/// }
///
/// let leaf = Leaf::get("/daily", report).csv("daily-hits");
/// ```
pub struct Leaf {
    method: Method,
    path: String,
    service: BoxedService,
    response_type: ResponseType,
    twigs: Vec<BoxedTwig>,
    checks: Vec<BoxedTwig>,
}

impl Leaf {
    pub fn new(method: Method, path: impl Into<String>, service: impl Service) -> Self {
        Self {
            method,
            path: path.into(),
            service: service.into_boxed_service(),
            response_type: ResponseType::Json,
            twigs: Vec::new(),
            checks: Vec::new(),
        }
    }

    pub fn get(path: impl Into<String>, service: impl Service) -> Self { Self::new(Method::Get, path, service) }
    pub fn put(path: impl Into<String>, service: impl Service) -> Self { Self::new(Method::Put, path, service) }
    pub fn patch(path: impl Into<String>, service: impl Service) -> Self { Self::new(Method::Patch, path, service) }
    pub fn post(path: impl Into<String>, service: impl Service) -> Self { Self::new(Method::Post, path, service) }
    pub fn delete(path: impl Into<String>, service: impl Service) -> Self { Self::new(Method::Delete, path, service) }
    pub fn all(path: impl Into<String>, service: impl Service) -> Self { Self::new(Method::All, path, service) }

    /// Render successes as a CSV attachment named `file_name` (`.csv` is
    /// appended when missing).
    pub fn csv(mut self, file_name: impl Into<String>) -> Self {
        self.response_type = ResponseType::csv(file_name);
        self
    }

    /// Sets the CSV delimiter. No effect on JSON leaves.
    pub fn delimiter(mut self, delimiter: impl Into<String>) -> Self {
        if let ResponseType::Csv { delimiter: d, .. } = &mut self.response_type {
            *d = delimiter.into();
        }
        self
    }

    pub fn response_type(mut self, response_type: ResponseType) -> Self {
        self.response_type = response_type;
        self
    }

    /// A twig that runs after every branch-level step, just for this leaf.
    pub fn twig(mut self, twig: impl Twig) -> Self {
        self.twigs.push(Arc::new(twig));
        self
    }

    /// A check run after this leaf's twigs.
    pub fn check(mut self, check: Check) -> Self {
        self.checks.push(Arc::new(check));
        self
    }

    pub fn method(&self) -> Method { self.method }
    pub fn path(&self) -> &str { &self.path }

    /// Registers this leaf under `base`, guarded by `chain` and then its own steps.
    pub(crate) fn plant(self, base: &str, chain: &[BoxedTwig], table: &mut RouteTable) -> Result<(), Error> {
        let pattern = join_paths(base, &self.path);
        let chain: Vec<BoxedTwig> = chain.iter().cloned().chain(self.twigs).chain(self.checks).collect();
        table.insert(
            self.method,
            Route {
                pattern,
                chain: Arc::from(chain),
                service: self.service,
                response_type: self.response_type,
            },
        )
    }
}

impl fmt::Debug for Leaf {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Leaf")
            .field("method", &self.method)
            .field("path", &self.path)
            .field("response_type", &self.response_type)
            .field("twigs", &self.twigs.len())
            .field("checks", &self.checks.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::handler::sync;
    use crate::request::Request;

    #[test]
    fn csv_leaf_keeps_delimiter() {
        let leaf = Leaf::get("/export", sync(|_req: Request| json!([])))
            .csv("export")
            .delimiter(";");
        assert_eq!(
            leaf.response_type,
            ResponseType::Csv { file_name: "export.csv".into(), delimiter: ";".into() }
        );
    }

    #[test]
    fn plant_joins_base_and_appends_own_steps() {
        let leaf = Leaf::post("/:id", sync(|_req: Request| ()))
            .twig(|_: &mut Request| -> Result<(), crate::ApplicationError> { Ok(()) });
        let mut table = RouteTable::new();
        leaf.plant("/things", &[], &mut table).unwrap();
        assert_eq!(table.routes(), &[(Method::Post, "/things/:id".to_owned())]);

        let (route, _) = table.lookup(&http::Method::POST, "/things/9").unwrap();
        assert_eq!(route.chain.len(), 1);
    }
}
