//! Compiled route table.
//!
//! One radix tree per HTTP method plus one for `all` leaves. O(path-length)
//! lookup via `matchit`. The table is produced once by
//! [`Tree::compile`](crate::Tree::compile) and never changes afterwards.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;
use serde_json::{Map, Value};

use crate::app_error::ApplicationError;
use crate::envelope::ResponseType;
use crate::error::Error;
use crate::handler::BoxedService;
use crate::method::Method;
use crate::middleware::BoxedTwig;

/// Everything needed to answer one matched request.
pub(crate) struct Route {
    pub(crate) pattern: String,
    pub(crate) chain: Arc<[BoxedTwig]>,
    pub(crate) service: BoxedService,
    pub(crate) response_type: ResponseType,
}

#[derive(Default)]
pub struct RouteTable {
    routes: HashMap<http::Method, MatchitRouter<Arc<Route>>>,
    any: MatchitRouter<Arc<Route>>,
    registered: Vec<(Method, String)>,
}

impl RouteTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, method: Method, route: Route) -> Result<(), Error> {
        let pattern = route.pattern.clone();
        let tree = match method.to_http() {
            Some(m) => self.routes.entry(m).or_default(),
            None => &mut self.any,
        };
        tree.insert(to_matchit(&pattern), Arc::new(route))
            .map_err(|e| Error::Route { path: pattern.clone(), reason: e.to_string() })?;
        self.registered.push((method, pattern));
        Ok(())
    }

    /// Method-specific routes win over `all` routes on the same path. `HEAD`
    /// falls back to the `GET` tree.
    ///
    /// Params are returned as they appear in the URI; see [`decode_params`].
    pub(crate) fn lookup(
        &self,
        method: &http::Method,
        path: &str,
    ) -> Option<(Arc<Route>, Map<String, Value>)> {
        let at = |m: &http::Method| self.routes.get(m).and_then(|tree| tree.at(path).ok());
        let matched = at(method)
            .or_else(|| if *method == http::Method::HEAD { at(&http::Method::GET) } else { None })
            .or_else(|| self.any.at(path).ok())?;
        let route = Arc::clone(matched.value);
        let params = matched.params.iter()
            .map(|(k, v)| (k.to_owned(), Value::from(v)))
            .collect();
        Some((route, params))
    }

    /// `(method, pattern)` for every registered leaf, in registration order.
    pub fn routes(&self) -> &[(Method, String)] {
        &self.registered
    }

    pub fn len(&self) -> usize { self.registered.len() }
    pub fn is_empty(&self) -> bool { self.registered.is_empty() }
}

/// Percent-decodes every matched param. A param that does not decode to UTF-8
/// is a `BadRequest`.
pub(crate) fn decode_params(raw: Map<String, Value>) -> Result<Map<String, Value>, ApplicationError> {
    raw.into_iter()
        .map(|(name, value)| match value {
            Value::String(s) => {
                let decoded = urlencoding::decode(&s)
                    .map_err(|_| ApplicationError::bad_request(format!("path parameter `{name}` is not valid UTF-8")))?;
                Ok((name, Value::from(decoded.into_owned())))
            }
            other => Ok((name, other)),
        })
        .collect()
}

/// Joins two path fragments into one absolute path with no trailing slash.
pub(crate) fn join_paths(prefix: &str, path: &str) -> String {
    let segments: Vec<&str> = prefix
        .split('/')
        .chain(path.split('/'))
        .filter(|s| !s.is_empty())
        .collect();
    format!("/{}", segments.join("/"))
}

/// Strips a trailing slash so `/users/` and `/users` hit the same leaf.
pub(crate) fn normalize_request_path(path: &str) -> &str {
    match path.strip_suffix('/') {
        Some(stripped) if !stripped.is_empty() => stripped,
        _ => path,
    }
}

/// Translates `:name` and `*name` segments to `matchit`'s `{name}` / `{*name}`.
pub(crate) fn to_matchit(pattern: &str) -> String {
    let segments: Vec<String> = pattern
        .split('/')
        .map(|seg| {
            if let Some(name) = seg.strip_prefix(':') {
                format!("{{{name}}}")
            } else if let Some(name) = seg.strip_prefix('*') {
                format!("{{*{name}}}")
            } else {
                seg.to_owned()
            }
        })
        .collect();
    segments.join("/")
}
