//! # arbol
//!
//! Declarative HTTP services over hyper. A service is a [`Tree`] of
//! [`Branch`]es, each guarding a path prefix, with [`Leaf`] endpoints at the
//! tips.
//!
//! ## The contract
//!
//! Every enveloped response has the same shape, success or failure:
//!
//! ```json
//! { "uuid": "…", "data": { … } | null, "error": { "name", "message", "code" } | null }
//! ```
//!
//! Services return anything that is [`IntoReply`]: a [`serde_json::Value`],
//! [`Json<T>`], an [`ApplicationError`], a `Result` of those, a [`CsvFile`],
//! or [`NoEnvelope<T>`] when a client needs the raw body. Errors carry a name;
//! the name picks the status code ([`classify`]).
//!
//! What a branch can do before its leaves run:
//!
//! - Log the request ([`Branch::log_requests`])
//! - Run custom twigs ([`Twig`])
//! - Require a permission group from a verified JWT ([`Branch::require_permission`])
//! - Validate params, query, headers or body against a JSON Schema ([`Check`])
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use arbol::{
//!     Algorithm, ApplicationError, Branch, Check, Config, Leaf, Request, Security,
//!     TokenAuthority, Tree,
//! };
//! use serde_json::{Value, json};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), arbol::Error> {
//!     let authority = TokenAuthority::random_hmac(Algorithm::HS256)?;
//!
//!     Tree::new(Config::from_env()?)
//!         .security(Security::new(authority))
//!         .branch(
//!             Branch::new("/users")
//!                 .log_requests()
//!                 .require_permission(["admin"])
//!                 .check(Check::params(json!({
//!                     "type": "object",
//!                     "properties": {"id": {"type": "integer"}}
//!                 }))?)
//!                 .leaf(Leaf::get("/:id", get_user)),
//!         )
//!         .serve()
//!         .await
//! }
//!
//! async fn get_user(req: Request) -> Result<Value, ApplicationError> {
//!     match req.params().get("id").and_then(Value::as_i64) {
//!         Some(7) => Ok(json!({"id": 7, "name": "Ada"})),
//!         _ => Err(ApplicationError::not_found("no such user")),
//!     }
//! }
//! ```

mod app_error;
mod branch;
mod check;
mod config;
mod envelope;
mod error;
mod gateway;
mod handler;
mod identity;
mod leaf;
mod method;
mod reply;
mod request;
mod response;
mod router;
mod server;
mod token;
mod tree;

pub mod middleware;

pub use app_error::{ApplicationError, DEFAULT_CODE, DEFAULT_NAME, ErrorName, classify};
pub use branch::Branch;
pub use check::{Check, Target};
pub use config::{Config, DEFAULT_BODY_LIMIT, DEFAULT_PORT, Host, TrustProxy};
pub use envelope::{Envelope, ResponseType, emit, emit_as};
pub use error::Error;
pub use gateway::{Decision, Gateway, GatewayConfig, PERMISSION_MISSING, USER_DISABLED, USER_MISSING};
pub use handler::{Service, sync};
pub use identity::{Identity, UserState};
pub use leaf::Leaf;
pub use method::Method;
pub use middleware::Twig;
pub use middleware::auth::{Security, TokenTransport};
pub use reply::{Cookie, CsvFile, CsvHeader, DEFAULT_CSV_NAME, IntoReply, Json, NoEnvelope, Reply, SameSite, WithCookie};
pub use request::Request;
pub use response::{ContentType, Response, ResponseBuilder};
pub use router::RouteTable;
pub use server::{App, Running};
pub use token::{
    Claims, DEFAULT_ALGORITHM, DEFAULT_TTL, TokenAuthority, TokenError, decode_unverified, parse_algorithm,
    parse_ttl,
};
pub use tree::Tree;

pub use jsonwebtoken::Algorithm;
