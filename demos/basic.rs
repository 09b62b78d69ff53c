//! Minimal arbol service: a login leaf that issues tokens, a guarded user
//! branch with validation, and a CSV export.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   TOKEN=$(curl -s -X POST http://localhost:3000/auth/login \
//!        -H 'content-type: application/json' \
//!        -d '{"user":"ada","password":"lovelace"}' | jq -r .data.token)
//!   curl http://localhost:3000/users/7 -H "authorization: Bearer $TOKEN"
//!   curl http://localhost:3000/users/abc -H "authorization: Bearer $TOKEN"   # 400
//!   curl http://localhost:3000/users/7                                         # 401
//!   curl -OJ http://localhost:3000/reports/users -H "authorization: Bearer $TOKEN"

use std::sync::Arc;

use arbol::{
    Algorithm, ApplicationError, Branch, Check, Config, Cookie, ErrorName, Leaf, Request, Security,
    TokenAuthority, Tree, WithCookie,
};
use serde_json::{Value, json};

#[tokio::main]
async fn main() -> Result<(), arbol::Error> {
    tracing_subscriber::fmt::init();

    let authority = Arc::new(TokenAuthority::random_hmac(Algorithm::HS256)?);
    let issuer = Arc::clone(&authority);

    Tree::new(Config::from_env()?)
        .security(Security::from_shared(authority))
        .branch(
            Branch::new("/auth")
                .log_requests()
                .check(Check::body(json!({
                    "type": "object",
                    "properties": {"user": {"type": "string"}, "password": {"type": "string"}},
                    "required": ["user", "password"]
                }))?)
                .leaf(Leaf::post("/login", move |req: Request| {
                    let issuer = Arc::clone(&issuer);
                    async move { login(&issuer, &req) }
                })),
        )
        .branch(
            Branch::new("/users")
                .log_requests()
                .require_user()
                .check(Check::params(json!({
                    "type": "object",
                    "properties": {"id": {"type": "integer", "minimum": 1}}
                }))?)
                .leaf(Leaf::get("/:id", get_user)),
        )
        .branch(
            Branch::new("/reports")
                .require_permission(["admin"])
                .leaf(Leaf::get("/users", list_users).csv("users")),
        )
        .serve()
        .await
}

// POST /auth/login
//
// The token goes back in the envelope and as a cookie.
fn login(authority: &TokenAuthority, req: &Request) -> Result<WithCookie<Value>, ApplicationError> {
    let body = req.body();
    if body["password"] != "lovelace" {
        return Err(ErrorName::InvalidCredentials.into());
    }
    let token = authority.sign(&json!({"sub": body["user"], "groups": ["admin"], "active": true}), "1h")?;
    let cookie = Cookie::new("token", token.clone()).http_only(true).path("/");
    Ok(WithCookie(cookie, json!({"token": token})))
}

// GET /users/:id
//
// `id` is already an integer: the params check coerced it.
async fn get_user(req: Request) -> Result<Value, ApplicationError> {
    let id = req.params().get("id").and_then(Value::as_i64).unwrap_or_default();
    users()
        .into_iter()
        .find(|u| u["id"] == id)
        .ok_or_else(|| ApplicationError::new("DoesNotExist", format!("no user {id}")))
}

// GET /reports/users → users.csv
async fn list_users(_req: Request) -> Value {
    Value::Array(users())
}

fn users() -> Vec<Value> {
    vec![
        json!({"id": 7, "name": "Ada", "role": "admin"}),
        json!({"id": 8, "name": "Grace", "role": "user"}),
    ]
}
