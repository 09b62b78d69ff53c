//! Token resolution: the twig that fills in [`Request::user`].
//!
//! It never rejects a request itself. A missing token leaves the user
//! `Unresolved`; a bad one records `Failed(..)`. Whether that matters is the
//! [`Gateway`](crate::Gateway)'s call, so unguarded routes stay public.

use std::sync::Arc;

use tracing::debug;

use crate::app_error::ApplicationError;
use crate::gateway::GatewayConfig;
use crate::identity::{Identity, UserState};
use crate::middleware::Twig;
use crate::request::Request;
use crate::token::{TokenAuthority, TokenError};

/// Where clients put their token.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum TokenTransport {
    /// `<header>: Bearer <token>`.
    Bearer { header: String },
    /// A cookie holding the raw token.
    Cookie { name: String },
}

impl Default for TokenTransport {
    fn default() -> Self {
        Self::Bearer { header: http::header::AUTHORIZATION.as_str().to_owned() }
    }
}

impl TokenTransport {
    pub fn bearer() -> Self { Self::default() }

    pub fn cookie(name: impl Into<String>) -> Self {
        Self::Cookie { name: name.into() }
    }

    /// `None` when no token was presented at all.
    fn extract<'r>(&self, req: &'r Request) -> Option<&'r str> {
        match self {
            Self::Bearer { header } => {
                let value = req.header(header)?.trim();
                let (scheme, token) = value.split_once(' ')?;
                scheme.eq_ignore_ascii_case("bearer").then(|| token.trim())
            }
            Self::Cookie { name } => req.cookie(name),
        }
    }
}

/// Everything a tree needs to authenticate and authorise requests.
#[derive(Clone, Debug)]
pub struct Security {
    pub authority: Arc<TokenAuthority>,
    pub transport: TokenTransport,
    pub gateway: Arc<GatewayConfig>,
}

impl Security {
    pub fn new(authority: TokenAuthority) -> Self {
        Self::from_shared(Arc::new(authority))
    }

    /// Shares an authority the application also signs with.
    pub fn from_shared(authority: Arc<TokenAuthority>) -> Self {
        Self {
            authority,
            transport: TokenTransport::default(),
            gateway: Arc::new(GatewayConfig::default()),
        }
    }

    pub fn transport(mut self, transport: TokenTransport) -> Self {
        self.transport = transport;
        self
    }

    pub fn gateway(mut self, config: GatewayConfig) -> Self {
        self.gateway = Arc::new(config);
        self
    }

    pub(crate) fn resolver(&self) -> TokenResolver {
        TokenResolver {
            authority: Arc::clone(&self.authority),
            transport: self.transport.clone(),
        }
    }
}

#[derive(Debug)]
pub struct TokenResolver {
    authority: Arc<TokenAuthority>,
    transport: TokenTransport,
}

impl TokenResolver {
    pub fn new(authority: Arc<TokenAuthority>, transport: TokenTransport) -> Self {
        Self { authority, transport }
    }

    pub fn resolve(&self, req: &Request) -> UserState {
        let Some(token) = self.transport.extract(req) else {
            return UserState::Unresolved;
        };
        if token.is_empty() {
            return UserState::Failed(TokenError::Invalid("empty token".to_owned()).into());
        }
        match self.authority.verify(token) {
            Ok(claims) => UserState::Authenticated(Identity::new(claims)),
            Err(e) => {
                debug!(uuid = %req.uuid(), error = %e, "token rejected");
                UserState::Failed(e.into())
            }
        }
    }
}

impl Twig for TokenResolver {
    fn apply(&self, req: &mut Request) -> Result<(), ApplicationError> {
        let user = self.resolve(req);
        req.set_user(user);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use http::{HeaderValue, Method};
    use jsonwebtoken::Algorithm;
    use serde_json::json;

    use super::*;

    fn authority() -> Arc<TokenAuthority> {
        Arc::new(TokenAuthority::hmac(Algorithm::HS256, "resolver-secret").unwrap())
    }

    fn request_with(name: &'static str, value: &str) -> Request {
        let mut req = Request::for_test(Method::GET, "/");
        req.headers.insert(name, HeaderValue::from_str(value).unwrap());
        req
    }

    #[test]
    fn no_token_leaves_user_unresolved() {
        let resolver = TokenResolver::new(authority(), TokenTransport::bearer());
        let mut req = Request::for_test(Method::GET, "/");
        resolver.apply(&mut req).unwrap();
        assert_eq!(req.user(), &UserState::Unresolved);
    }

    #[test]
    fn valid_bearer_token_authenticates() {
        let auth = authority();
        let token = auth.sign(&json!({"sub": "u1", "groups": ["admin"]}), "1h").unwrap();
        let resolver = TokenResolver::new(auth, TokenTransport::bearer());
        let mut req = request_with("authorization", &format!("Bearer {token}"));
        resolver.apply(&mut req).unwrap();
        assert_eq!(req.identity().and_then(Identity::subject), Some("u1"));
    }

    #[test]
    fn bad_token_is_recorded_not_rejected() {
        let resolver = TokenResolver::new(authority(), TokenTransport::bearer());
        let mut req = request_with("authorization", "Bearer abc.def.ghi");
        assert!(resolver.apply(&mut req).is_ok());
        match req.user() {
            UserState::Failed(e) => assert_eq!(e.code(), 401),
            other => panic!("expected failure, got {other:?}"),
        }
    }

    #[test]
    fn other_schemes_are_ignored() {
        let resolver = TokenResolver::new(authority(), TokenTransport::bearer());
        let req = request_with("authorization", "Basic dXNlcjpwYXNz");
        assert_eq!(resolver.resolve(&req), UserState::Unresolved);
    }

    #[test]
    fn cookie_transport() {
        let auth = authority();
        let token = auth.sign(&json!({"sub": "u2"}), "1h").unwrap();
        let resolver = TokenResolver::new(auth, TokenTransport::cookie("session"));
        let req = Request::for_test(Method::GET, "/");
        let mut req = Request {
            cookies: [("session".to_owned(), token)].into_iter().collect(),
            ..req
        };
        resolver.apply(&mut req).unwrap();
        assert!(req.user().is_authenticated());
    }
}
