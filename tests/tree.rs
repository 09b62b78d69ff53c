//! End-to-end behaviour of compiled trees, driven in-process through
//! `App::handle`.

use std::net::SocketAddr;
use std::sync::Arc;

use arbol::{
    Algorithm, App, ApplicationError, Branch, Check, Config, Cookie, GatewayConfig, Leaf,
    NoEnvelope, PERMISSION_MISSING, Request, Security, TokenAuthority, TrustProxy, Tree,
    USER_DISABLED, USER_MISSING, WithCookie, sync,
};
use bytes::Bytes;
use http::{HeaderMap, StatusCode};
use http_body_util::{BodyExt, Full};
use serde_json::{Value, json};

const SECRET: &str = "integration-secret";

fn peer() -> SocketAddr {
    "10.0.0.1:40000".parse().unwrap()
}

fn authority() -> TokenAuthority {
    TokenAuthority::hmac(Algorithm::HS256, SECRET).unwrap()
}

fn token(claims: Value) -> String {
    authority().sign(&claims, "1h").unwrap()
}

fn fixed_uuid(tree: Tree) -> Tree {
    tree.uuid_generator(|| "req-0001".to_owned())
}

struct Reply {
    status: StatusCode,
    headers: HeaderMap,
    body: Bytes,
}

impl Reply {
    fn json(&self) -> Value {
        serde_json::from_slice(&self.body).unwrap()
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }
}

async fn send(app: &App, req: http::Request<Full<Bytes>>) -> Reply {
    let res = app.handle(req, peer()).await;
    let (parts, body) = res.into_parts();
    let body = body.collect().await.unwrap().to_bytes();
    Reply { status: parts.status, headers: parts.headers, body }
}

fn get(uri: &str) -> http::Request<Full<Bytes>> {
    http::Request::get(uri).body(Full::default()).unwrap()
}

fn get_with_token(uri: &str, token: &str) -> http::Request<Full<Bytes>> {
    http::Request::get(uri)
        .header("authorization", format!("Bearer {token}"))
        .body(Full::default())
        .unwrap()
}

fn post_json(uri: &str, body: &'static str) -> http::Request<Full<Bytes>> {
    http::Request::post(uri)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from_static(body.as_bytes())))
        .unwrap()
}

// ── Envelope ──────────────────────────────────────────────────────────────────

#[tokio::test]
async fn success_is_enveloped_with_the_request_uuid() {
    let app = fixed_uuid(Tree::new(Config::default()))
        .branch(Branch::new("/hello").leaf(Leaf::get("/", sync(|_req: Request| json!({"hello": "world"})))))
        .compile()
        .unwrap();

    let res = send(&app, get("/hello")).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.header("content-type"), Some("application/json"));
    assert_eq!(res.json(), json!({"uuid": "req-0001", "data": {"hello": "world"}, "error": null}));
}

#[tokio::test]
async fn service_error_uses_the_name_table() {
    let app = fixed_uuid(Tree::new(Config::default()))
        .branch(Branch::new("/").leaf(Leaf::get("/gone", sync(|_req: Request| {
            Err::<Value, _>(ApplicationError::new("DoesNotExist", "it went away"))
        }))))
        .compile()
        .unwrap();

    let res = send(&app, get("/gone")).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    assert_eq!(
        res.json(),
        json!({"uuid": "req-0001", "data": null, "error": {"name": "DoesNotExist", "message": "it went away", "code": 404}})
    );
}

#[tokio::test]
async fn unknown_route_is_a_not_found_envelope() {
    let app = Tree::new(Config::default()).compile().unwrap();
    let res = send(&app, get("/nowhere")).await;
    assert_eq!(res.status, StatusCode::NOT_FOUND);
    let body = res.json();
    assert_eq!(body["error"]["name"], "NotFound");
    assert_eq!(body["error"]["message"], "Cannot GET /nowhere");
    assert!(body["uuid"].as_str().is_some_and(|u| u.len() == 36));
}

#[tokio::test]
async fn no_envelope_sends_the_raw_body() {
    let app = Tree::new(Config::default())
        .branch(Branch::new("/oauth").leaf(Leaf::post("/token", sync(|_req: Request| {
            NoEnvelope(json!({"access_token": "abc", "token_type": "bearer"}))
        }))))
        .compile()
        .unwrap();

    let res = send(&app, post_json("/oauth/token", "{}")).await;
    assert_eq!(res.json(), json!({"access_token": "abc", "token_type": "bearer"}));
}

#[tokio::test]
async fn cookies_ride_along_with_the_envelope() {
    let app = Tree::new(Config::default())
        .branch(Branch::new("/session").leaf(Leaf::post("/", sync(|_req: Request| {
            WithCookie(Cookie::new("sid", "s-1").http_only(true).path("/"), json!({"ok": true}))
        }))))
        .compile()
        .unwrap();

    let res = send(&app, post_json("/session", "{}")).await;
    assert_eq!(res.header("set-cookie"), Some("sid=s-1; Path=/; HttpOnly"));
    assert_eq!(res.json()["data"], json!({"ok": true}));
}

#[tokio::test]
async fn cookies_set_by_a_leaf_read_back_intact() {
    let app = Tree::new(Config::default())
        .branch(
            Branch::new("/prefs")
                .leaf(Leaf::post("/", sync(|_req: Request| {
                    WithCookie(Cookie::json("prefs", &json!({"theme": "dark"})).unwrap(), json!({}))
                })))
                .leaf(Leaf::get("/", sync(|req: Request| json!(req.cookie("prefs"))))),
        )
        .compile()
        .unwrap();

    let set = send(&app, post_json("/prefs", "{}")).await;
    let pair = set.header("set-cookie").unwrap().split(';').next().unwrap().to_owned();

    let req = http::Request::get("/prefs").header("cookie", pair).body(Full::default()).unwrap();
    let res = send(&app, req).await;
    assert_eq!(res.json()["data"], r#"{"theme":"dark"}"#);
}

// ── Permission gateway ────────────────────────────────────────────────────────

fn guarded_app() -> App {
    Tree::new(Config::default())
        .security(Security::new(authority()))
        .branch(
            Branch::new("/admin")
                .require_permission(["admin"])
                .leaf(Leaf::get("/stats", sync(|req: Request| {
                    json!({"sub": req.identity().and_then(|i| i.subject()).unwrap_or_default()})
                }))),
        )
        .branch(Branch::new("/public").leaf(Leaf::get("/", sync(|req: Request| {
            json!({"authenticated": req.user().is_authenticated()})
        }))))
        .compile()
        .unwrap()
}

#[tokio::test]
async fn gateway_rejects_anonymous_requests() {
    let res = send(&guarded_app(), get("/admin/stats")).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
    assert_eq!(res.json()["error"]["message"], USER_MISSING);
}

#[tokio::test]
async fn gateway_rejects_tokens_from_another_key() {
    let foreign = TokenAuthority::hmac(Algorithm::HS256, "someone-else").unwrap();
    let t = foreign.sign(&json!({"sub": "mallory", "groups": ["admin"]}), "1h").unwrap();
    let res = send(&guarded_app(), get_with_token("/admin/stats", &t)).await;
    assert_eq!(res.status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn gateway_rejects_disabled_users_before_checking_groups() {
    let t = token(json!({"sub": "ada", "groups": ["admin"], "active": false}));
    let res = send(&guarded_app(), get_with_token("/admin/stats", &t)).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.json()["error"]["message"], USER_DISABLED);
}

#[tokio::test]
async fn gateway_rejects_users_outside_the_groups() {
    let t = token(json!({"sub": "bob", "groups": ["viewer"]}));
    let res = send(&guarded_app(), get_with_token("/admin/stats", &t)).await;
    assert_eq!(res.status, StatusCode::FORBIDDEN);
    assert_eq!(res.json()["error"]["name"], "Forbidden");
    assert_eq!(res.json()["error"]["message"], PERMISSION_MISSING);
}

#[tokio::test]
async fn gateway_admits_members() {
    let t = token(json!({"sub": "ada", "groups": ["admin"], "active": true}));
    let res = send(&guarded_app(), get_with_token("/admin/stats", &t)).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.json()["data"], json!({"sub": "ada"}));
}

#[tokio::test]
async fn unguarded_routes_stay_public_but_see_the_user() {
    let app = guarded_app();
    let anonymous = send(&app, get("/public")).await;
    assert_eq!(anonymous.json()["data"], json!({"authenticated": false}));

    let t = token(json!({"sub": "ada"}));
    let known = send(&app, get_with_token("/public", &t)).await;
    assert_eq!(known.json()["data"], json!({"authenticated": true}));
}

#[tokio::test]
async fn tree_twigs_can_stand_in_for_token_resolution() {
    let app = Tree::new(Config::default())
        .permissions(GatewayConfig { groups_field: "roles".into(), ..GatewayConfig::default() })
        .twig(|req: &mut Request| -> Result<(), ApplicationError> {
            if req.header("x-api-key") == Some("k-1") {
                let claims = json!({"sub": "service", "roles": "ops"});
                let identity = arbol::Identity::new(claims.as_object().cloned().unwrap_or_default());
                req.set_user(arbol::UserState::Authenticated(identity));
            }
            Ok(())
        })
        .branch(Branch::new("/ops").require_permission(["ops"]).leaf(Leaf::get("/", sync(|_req: Request| ()))))
        .compile()
        .unwrap();

    let keyed = http::Request::get("/ops").header("x-api-key", "k-1").body(Full::default()).unwrap();
    assert_eq!(send(&app, keyed).await.status, StatusCode::OK);
    assert_eq!(send(&app, get("/ops")).await.status, StatusCode::UNAUTHORIZED);
}

// ── Validation and parsing ────────────────────────────────────────────────────

fn validated_app(config: Config) -> App {
    Tree::new(config)
        .branch(
            Branch::new("/items")
                .check(Check::params(json!({
                    "type": "object",
                    "properties": {"id": {"type": "integer", "minimum": 1}}
                })).unwrap())
                .leaf(Leaf::get("/:id", sync(|req: Request| json!({"id": req.params()["id"]}))))
                .leaf(
                    Leaf::post("/", sync(|req: Request| json!({"data": req.data()})))
                        .check(Check::body(json!({
                            "type": "object",
                            "properties": {"name": {"type": "string"}},
                            "required": ["name"]
                        })).unwrap()),
                ),
        )
        .compile()
        .unwrap()
}

#[tokio::test]
async fn params_are_coerced_before_the_service_runs() {
    let res = send(&validated_app(Config::default()), get("/items/12")).await;
    assert_eq!(res.json()["data"], json!({"id": 12}));
}

#[tokio::test]
async fn invalid_params_are_a_400() {
    let res = send(&validated_app(Config::default()), get("/items/zero")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json()["error"]["name"], "InvalidUrlParameters");
}

#[tokio::test]
async fn invalid_body_is_a_400() {
    let res = send(&validated_app(Config::default()), post_json("/items", r#"{"colour":"red"}"#)).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json()["error"]["name"], "InvalidBody");
}

#[tokio::test]
async fn malformed_json_is_a_bad_request() {
    let res = send(&validated_app(Config::default()), post_json("/items", "{not json")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json()["error"]["name"], "BadRequest");
}

#[tokio::test]
async fn oversized_body_is_rejected() {
    let config = Config { body_limit: 8, ..Config::default() };
    let res = send(&validated_app(config), post_json("/items", r#"{"name":"far too long"}"#)).await;
    assert_eq!(res.status, StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(res.json()["error"]["name"], "PayloadTooLarge");
}

#[tokio::test]
async fn data_merges_query_and_body() {
    let req = http::Request::post("/items?source=web")
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from_static(br#"{"name":"widget"}"#)))
        .unwrap();
    let res = send(&validated_app(Config::default()), req).await;
    assert_eq!(res.json()["data"]["data"], json!({"source": "web", "name": "widget"}));
}

// ── Leaves ────────────────────────────────────────────────────────────────────

#[tokio::test]
async fn csv_leaf_downloads_an_attachment() {
    let app = Tree::new(Config::default())
        .branch(Branch::new("/reports").leaf(
            Leaf::get("/numbers", sync(|_req: Request| json!([{"a": 1, "b": 2}, {"a": 3, "b": 4}]))).csv("numbers"),
        ))
        .compile()
        .unwrap();

    let res = send(&app, get("/reports/numbers")).await;
    assert_eq!(res.status, StatusCode::OK);
    assert_eq!(res.header("content-type"), Some("text/csv"));
    assert_eq!(res.header("content-disposition"), Some("attachment; filename=\"numbers.csv\""));
    assert_eq!(&res.body[..], b"a,b\n1,2\n3,4");
}

#[tokio::test]
async fn path_params_are_percent_decoded() {
    let app = Tree::new(Config::default())
        .branch(Branch::new("/u").leaf(Leaf::get("/:name", sync(|req: Request| {
            json!({"param": req.param("name"), "data": req.data()["name"]})
        }))))
        .compile()
        .unwrap();

    let res = send(&app, get("/u/Jos%C3%A9%20Luis")).await;
    assert_eq!(res.json()["data"], json!({"param": "José Luis", "data": "José Luis"}));

    let res = send(&app, get("/u/%FF")).await;
    assert_eq!(res.status, StatusCode::BAD_REQUEST);
    assert_eq!(res.json()["error"]["name"], "BadRequest");
}

#[tokio::test]
async fn head_is_answered_by_get_leaves() {
    let app = Tree::new(Config::default())
        .branch(Branch::new("/ping").leaf(Leaf::get("/", sync(|_req: Request| "pong"))))
        .compile()
        .unwrap();

    let head = http::Request::head("/ping").body(Full::default()).unwrap();
    assert_eq!(send(&app, head).await.status, StatusCode::OK);
}

#[tokio::test]
async fn all_leaf_answers_every_method_and_trailing_slash() {
    let app = Tree::new(Config::default())
        .branch(Branch::new("/echo").leaf(Leaf::all("/", sync(|req: Request| req.method().to_string()))))
        .compile()
        .unwrap();

    let delete = http::Request::delete("/echo/").body(Full::default()).unwrap();
    let res = send(&app, delete).await;
    assert_eq!(res.json()["data"], "DELETE");
}

#[tokio::test]
async fn client_ip_follows_trust_proxy() {
    let app = |trust| {
        Tree::new(Config { trust_proxy: trust, ..Config::default() })
            .branch(Branch::new("/ip").leaf(Leaf::get("/", sync(|req: Request| req.ip().to_string()))))
            .compile()
            .unwrap()
    };
    let forwarded = || {
        http::Request::get("/ip")
            .header("x-forwarded-for", "203.0.113.9")
            .body(Full::default())
            .unwrap()
    };

    assert_eq!(send(&app(TrustProxy::All(false)), forwarded()).await.json()["data"], "10.0.0.1");
    assert_eq!(send(&app(TrustProxy::All(true)), forwarded()).await.json()["data"], "203.0.113.9");
}

// ── Failure containment ───────────────────────────────────────────────────────

fn panicking_app(production: bool) -> App {
    Tree::new(Config { production, ..Config::default() })
        .branch(Branch::new("/boom").leaf(Leaf::get("/", sync(|_req: Request| -> Value {
            panic!("wires crossed")
        }))))
        .compile()
        .unwrap()
}

#[tokio::test]
async fn panics_become_server_errors() {
    let res = send(&panicking_app(false), get("/boom")).await;
    assert_eq!(res.status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        res.json()["error"],
        json!({"name": "ServerError", "message": "wires crossed", "code": 500})
    );
}

#[tokio::test]
async fn production_hides_panic_details() {
    let res = send(&panicking_app(true), get("/boom")).await;
    assert_eq!(res.json()["error"]["message"], "Internal server error");
}

#[tokio::test]
async fn twig_rejection_skips_the_service() {
    let called = Arc::new(std::sync::atomic::AtomicBool::new(false));
    let seen = Arc::clone(&called);
    let app = Tree::new(Config::default())
        .branch(
            Branch::new("/closed")
                .twig(|_: &mut Request| -> Result<(), ApplicationError> {
                    Err(ApplicationError::new("Unavailable", "down for maintenance"))
                })
                .leaf(Leaf::get("/", sync(move |_req: Request| {
                    seen.store(true, std::sync::atomic::Ordering::SeqCst);
                }))),
        )
        .compile()
        .unwrap();

    let res = send(&app, get("/closed")).await;
    assert_eq!(res.status, StatusCode::SERVICE_UNAVAILABLE);
    assert!(!called.load(std::sync::atomic::Ordering::SeqCst));
}
