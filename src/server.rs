//! HTTP server, request pipeline and graceful shutdown.
//!
//! # One request
//!
//! ```text
//! accept → uuid → route lookup ──miss──→ 404 NotFound envelope
//!                      │
//!          body (size-limited) + query parsing ──bad──→ 400 / 413 envelope
//!                      │
//!          twig chain ──reject──→ error envelope
//!                      │
//!          service → Reply → emit / emit_as
//! ```
//!
//! The twig chain and the service run under `catch_unwind`; a panic becomes a
//! 500 envelope and the connection keeps serving.
//!
//! # Graceful shutdown
//!
//! On SIGTERM, Ctrl-C or [`Running::stop`]:
//! 1. `listener.accept()` stops being polled, so no new connections are made.
//! 2. Open connections are told to finish their current request and close.
//! 3. Once every connection task has ended, the server task returns.

use std::any::Any;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use bytes::Bytes;
use futures_util::FutureExt;
use http::HeaderMap;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited};
use hyper::body::Body;
use hyper::service::service_fn;
use hyper_util::rt::{TokioExecutor, TokioIo};
use hyper_util::server::conn::auto::Builder as ConnBuilder;
use hyper_util::server::graceful::GracefulShutdown;
use serde_json::{Map, Value};
use tokio::net::TcpListener;
use tokio::sync::oneshot;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{Instrument, debug, error, info, info_span};

use crate::app_error::ApplicationError;
use crate::config::Config;
use crate::envelope::{emit, emit_as};
use crate::error::Error;
use crate::middleware::run_chain;
use crate::reply::Reply;
use crate::request::{Request, client_ip};
use crate::response::Response;
use crate::router::{Route, RouteTable, decode_params, normalize_request_path};

pub(crate) type UuidGenerator = Arc<dyn Fn() -> String + Send + Sync>;

/// Message sent instead of a panic's text when running in production.
const PANIC_MESSAGE: &str = "Internal server error";

/// A compiled tree: routes, configuration and the correlation-id source.
///
/// Produced by [`Tree::compile`](crate::Tree::compile). Immutable; shared by
/// every connection.
pub struct App {
    table: RouteTable,
    config: Config,
    uuid: UuidGenerator,
}

impl App {
    pub(crate) fn new(table: RouteTable, config: Config, uuid: UuidGenerator) -> Self {
        Self { table, config, uuid }
    }

    pub fn config(&self) -> &Config { &self.config }
    pub fn routes(&self) -> &RouteTable { &self.table }

    /// Answers one request without a socket. `peer` stands in for the
    /// connection's remote address.
    pub async fn handle<B>(&self, req: http::Request<B>, peer: SocketAddr) -> http::Response<Full<Bytes>>
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let started = Instant::now();
        let uuid = (self.uuid)();
        let span = info_span!("request", uuid = %uuid, method = %req.method(), path = %req.uri().path());

        async move {
            let res = self.respond(uuid, req, peer).await;
            let latency_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
            info!(status = res.status().as_u16(), latency_ms, "response");
            res.into_inner()
        }
        .instrument(span)
        .await
    }

    async fn respond<B>(&self, uuid: String, req: http::Request<B>, peer: SocketAddr) -> Response
    where
        B: Body<Data = Bytes> + Send,
        B::Error: Into<Box<dyn std::error::Error + Send + Sync>>,
    {
        let (parts, body) = req.into_parts();
        let path = normalize_request_path(parts.uri.path()).to_owned();

        let Some((route, params)) = self.table.lookup(&parts.method, &path) else {
            let message = format!("Cannot {} {}", parts.method, path);
            return emit(&uuid, Reply::Error(ApplicationError::not_found(message)));
        };
        let params = match decode_params(params) {
            Ok(p) => p,
            Err(e) => return emit(&uuid, Reply::Error(e)),
        };

        let raw = match Limited::new(body, self.config.body_limit).collect().await {
            Ok(collected) => collected.to_bytes(),
            Err(e) => return emit(&uuid, Reply::Error(body_error(&*e, self.config.body_limit))),
        };
        let parsed = parse_body(&parts.headers, &raw).and_then(|body| Ok((body, parse_query(parts.uri.query())?)));
        let (body, query) = match parsed {
            Ok(v) => v,
            Err(e) => return emit(&uuid, Reply::Error(e)),
        };

        let ip = client_ip(&parts.headers, peer, self.config.trust_proxy);
        let mut req = Request::new(parts.method, path, uuid.clone(), query, parts.headers, body, raw, ip);
        req.params = params;

        match AssertUnwindSafe(run_route(&route, req)).catch_unwind().await {
            Ok(Outcome::Served(reply)) => emit_as(&uuid, reply, &route.response_type),
            Ok(Outcome::Rejected(e)) => emit(&uuid, Reply::Error(e)),
            Err(panic) => {
                let detail = panic_message(&*panic);
                error!(route = %route.pattern, panic = %detail, "service panicked");
                let message = if self.config.production { PANIC_MESSAGE.to_owned() } else { detail };
                emit_as(&uuid, Reply::Error(ApplicationError::server_error(message)), &route.response_type)
            }
        }
    }

    /// Binds the configured address and serves on a background task.
    ///
    /// The server stops on [`Running::stop`], when the [`Running`] handle is
    /// dropped, or on SIGTERM / Ctrl-C.
    pub async fn start(self) -> Result<Running, Error> {
        let listener = TcpListener::bind(self.config.socket_addr()).await?;
        let addr = listener.local_addr()?;
        let (stop, stopped) = oneshot::channel::<()>();

        let shutdown = async move {
            tokio::select! {
                _ = stopped => {}
                () = shutdown_signal() => {}
            }
        };

        info!(%addr, production = self.config.production, routes = self.table.len(), "arbol listening");
        let task = tokio::spawn(serve(listener, Arc::new(self), shutdown));
        Ok(Running { addr, stop, task })
    }
}

impl std::fmt::Debug for App {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("App")
            .field("config", &self.config)
            .field("routes", &self.table.routes())
            .finish_non_exhaustive()
    }
}

enum Outcome {
    /// The chain passed and the service produced a reply.
    Served(Reply),
    /// A twig ended the request.
    Rejected(ApplicationError),
}

async fn run_route(route: &Route, mut req: Request) -> Outcome {
    if let Err(e) = run_chain(&route.chain, &mut req) {
        return Outcome::Rejected(e);
    }
    req.merge_data();
    Outcome::Served(route.service.call(req).await)
}

// ── Running server ────────────────────────────────────────────────────────────

/// Handle to a started server.
#[derive(Debug)]
pub struct Running {
    addr: SocketAddr,
    stop: oneshot::Sender<()>,
    task: JoinHandle<Result<(), Error>>,
}

impl Running {
    /// The bound address. Useful when the configured port was `0`.
    pub fn local_addr(&self) -> SocketAddr { self.addr }

    /// Stops accepting, drains open connections and waits for the server task.
    pub async fn stop(self) -> Result<(), Error> {
        // the receiver is gone only if the server already exited
        let _ = self.stop.send(());
        self.task.await?
    }

    /// Waits until the server exits on its own (a shutdown signal).
    pub async fn wait(self) -> Result<(), Error> {
        let Self { stop, task, .. } = self;
        let res = task.await;
        drop(stop);
        res?
    }
}

// ── Accept loop ───────────────────────────────────────────────────────────────

async fn serve(
    listener: TcpListener,
    app: Arc<App>,
    shutdown: impl Future<Output = ()>,
) -> Result<(), Error> {
    let builder = ConnBuilder::new(TokioExecutor::new());
    let graceful = GracefulShutdown::new();
    let mut tasks = JoinSet::new();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            biased;

            () = &mut shutdown => {
                info!(in_flight = tasks.len(), "shutdown requested, draining connections");
                break;
            }

            res = listener.accept() => {
                let (stream, peer) = match res {
                    Ok(v) => v,
                    Err(e) => {
                        error!("accept error: {e}");
                        continue;
                    }
                };

                let app = Arc::clone(&app);
                let svc = service_fn(move |req| {
                    let app = Arc::clone(&app);
                    async move { Ok::<_, Infallible>(app.handle(req, peer).await) }
                });
                let conn = graceful.watch(builder.serve_connection(TokioIo::new(stream), svc).into_owned());

                tasks.spawn(async move {
                    if let Err(e) = conn.await {
                        debug!(%peer, "connection error: {e}");
                    }
                });
            }

            Some(_) = tasks.join_next(), if !tasks.is_empty() => {}
        }
    }

    drop(listener);
    graceful.shutdown().await;
    while tasks.join_next().await.is_some() {}

    info!("arbol stopped");
    Ok(())
}

/// Resolves on SIGTERM or Ctrl-C. A handler that cannot be installed is
/// logged and never fires.
pub(crate) async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("cannot listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let sigterm = async {
        use tokio::signal::unix::{SignalKind, signal};
        match signal(SignalKind::terminate()) {
            Ok(mut term) => {
                term.recv().await;
            }
            Err(e) => {
                error!("cannot listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let sigterm = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c  => {}
        () = sigterm => {}
    }
}

// ── Body and query parsing ────────────────────────────────────────────────────

fn body_error(e: &(dyn std::error::Error + Send + Sync + 'static), limit: usize) -> ApplicationError {
    if e.is::<LengthLimitError>() {
        ApplicationError::with_code("PayloadTooLarge", format!("request body exceeds {limit} bytes"), 413)
    } else {
        ApplicationError::bad_request(format!("request body could not be read: {e}"))
    }
}

/// JSON and urlencoded bodies are parsed; anything else (or nothing) is `{}`
/// and only available through [`Request::raw_body`].
fn parse_body(headers: &HeaderMap, raw: &Bytes) -> Result<Value, ApplicationError> {
    if raw.is_empty() {
        return Ok(Value::Object(Map::new()));
    }
    let mime = headers
        .get(http::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(';').next())
        .map(|v| v.trim().to_ascii_lowercase())
        .unwrap_or_default();

    if mime == "application/json" || mime.ends_with("+json") {
        serde_json::from_slice(raw).map_err(|e| ApplicationError::bad_request(format!("malformed JSON body: {e}")))
    } else if mime == "application/x-www-form-urlencoded" {
        serde_urlencoded::from_bytes::<Vec<(String, String)>>(raw)
            .map(|pairs| Value::Object(collect_pairs(pairs)))
            .map_err(|e| ApplicationError::bad_request(format!("malformed form body: {e}")))
    } else {
        Ok(Value::Object(Map::new()))
    }
}

fn parse_query(query: Option<&str>) -> Result<Map<String, Value>, ApplicationError> {
    let Some(query) = query.filter(|q| !q.is_empty()) else {
        return Ok(Map::new());
    };
    serde_urlencoded::from_str::<Vec<(String, String)>>(query)
        .map(collect_pairs)
        .map_err(|e| ApplicationError::bad_request(format!("malformed query string: {e}")))
}

/// Repeated keys collect into an array, in order of appearance.
fn collect_pairs(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut map = Map::new();
    for (key, value) in pairs {
        match map.get_mut(&key) {
            None => {
                map.insert(key, Value::String(value));
            }
            Some(Value::Array(values)) => values.push(Value::String(value)),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, Value::String(value)]);
            }
        }
    }
    map
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "service panicked".to_owned()
    }
}
