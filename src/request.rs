//! Incoming request, as seen by twigs and services.
//!
//! One `Request` exists per HTTP request. The server fills in the transport
//! parts (method, path, headers, parsed body, correlation id), twigs refine it
//! (resolve the user, coerce validated fields), and the service receives it
//! by value with [`Request::data`] merged.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};

use bytes::Bytes;
use http::{HeaderMap, Method};
use serde_json::{Map, Value};

use crate::config::TrustProxy;
use crate::identity::{Identity, UserState};

pub struct Request {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) uuid: String,
    pub(crate) user: UserState,
    pub(crate) params: Map<String, Value>,
    pub(crate) query: Map<String, Value>,
    pub(crate) headers: HeaderMap,
    pub(crate) body: Value,
    pub(crate) raw_body: Bytes,
    pub(crate) cookies: HashMap<String, String>,
    pub(crate) ip: IpAddr,
    pub(crate) data: Map<String, Value>,
}

impl Request {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        method: Method,
        path: String,
        uuid: String,
        query: Map<String, Value>,
        headers: HeaderMap,
        body: Value,
        raw_body: Bytes,
        ip: IpAddr,
    ) -> Self {
        let cookies = headers
            .get_all(http::header::COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(parse_cookies)
            .collect();
        Self {
            method,
            path,
            uuid,
            user: UserState::Unresolved,
            params: Map::new(),
            query,
            headers,
            body,
            raw_body,
            cookies,
            ip,
            data: Map::new(),
        }
    }

    pub fn method(&self) -> &Method { &self.method }
    pub fn path(&self) -> &str { &self.path }

    /// Correlation id, echoed as the envelope's `uuid`.
    pub fn uuid(&self) -> &str { &self.uuid }

    pub fn user(&self) -> &UserState { &self.user }
    pub fn set_user(&mut self, user: UserState) { self.user = user; }

    /// Shortcut for the authenticated identity, if any.
    pub fn identity(&self) -> Option<&Identity> { self.user.identity() }

    pub fn params(&self) -> &Map<String, Value> { &self.params }
    pub fn params_mut(&mut self) -> &mut Map<String, Value> { &mut self.params }

    /// A path parameter as text. For a route `/users/:id`, `param("id")` on
    /// `/users/42` is `Some("42")` until a check coerces it to a number.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).and_then(Value::as_str)
    }

    pub fn query(&self) -> &Map<String, Value> { &self.query }
    pub fn query_mut(&mut self) -> &mut Map<String, Value> { &mut self.query }

    pub fn headers(&self) -> &HeaderMap { &self.headers }

    /// Case-insensitive header lookup; non-UTF-8 values read as absent.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// Headers as a JSON object (lower-case names, last value wins).
    pub fn headers_json(&self) -> Map<String, Value> {
        self.headers
            .iter()
            .filter_map(|(k, v)| Some((k.as_str().to_owned(), Value::from(v.to_str().ok()?))))
            .collect()
    }

    /// The parsed body: the decoded value for JSON and form payloads, an empty
    /// object when there was no body or the content type is neither.
    pub fn body(&self) -> &Value { &self.body }
    pub fn body_mut(&mut self) -> &mut Value { &mut self.body }

    pub fn raw_body(&self) -> &[u8] { &self.raw_body }

    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(String::as_str)
    }

    /// Client address after applying the `trust_proxy` policy.
    pub fn ip(&self) -> IpAddr { self.ip }

    /// Path params, query and body merged into one object (later sources win).
    /// Filled in just before the service runs.
    pub fn data(&self) -> &Map<String, Value> { &self.data }

    pub(crate) fn merge_data(&mut self) {
        let mut data = self.params.clone();
        data.extend(self.query.iter().map(|(k, v)| (k.clone(), v.clone())));
        if let Value::Object(body) = &self.body {
            data.extend(body.iter().map(|(k, v)| (k.clone(), v.clone())));
        }
        self.data = data;
    }

    #[cfg(test)]
    pub(crate) fn for_test(method: Method, path: &str) -> Self {
        Self::new(
            method,
            path.to_owned(),
            "test-uuid".to_owned(),
            Map::new(),
            HeaderMap::new(),
            Value::Object(Map::new()),
            Bytes::new(),
            IpAddr::from([127, 0, 0, 1]),
        )
    }
}

/// Splits a `Cookie` header into `(name, value)` pairs, dropping surrounding
/// quotes and percent-decoding values. A value that does not decode to UTF-8
/// is kept as sent.
pub(crate) fn parse_cookies(header: &str) -> impl Iterator<Item = (String, String)> + '_ {
    header.split(';').filter_map(|pair| {
        let (name, value) = pair.trim().split_once('=')?;
        let value = value.trim().trim_matches('"');
        let value = urlencoding::decode(value).map_or_else(|_| value.to_owned(), |v| v.into_owned());
        Some((name.trim().to_owned(), value))
    })
}

/// Picks the client address from the socket peer and `X-Forwarded-For`.
pub(crate) fn client_ip(headers: &HeaderMap, peer: SocketAddr, trust: TrustProxy) -> IpAddr {
    let forwarded: Vec<IpAddr> = headers
        .get_all("x-forwarded-for")
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(','))
        .filter_map(|a| a.trim().parse().ok())
        .collect();

    match trust {
        TrustProxy::All(false) => peer.ip(),
        TrustProxy::All(true) => forwarded.first().copied().unwrap_or(peer.ip()),
        TrustProxy::Hops(n) => {
            // peer first, then the forwarded chain from nearest to farthest
            let chain: Vec<IpAddr> = std::iter::once(peer.ip())
                .chain(forwarded.into_iter().rev())
                .collect();
            let idx = (n as usize).min(chain.len() - 1);
            chain[idx]
        }
    }
}
