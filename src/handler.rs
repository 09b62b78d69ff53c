//! Service trait and type erasure.
//!
//! # How services are stored
//!
//! A route table holds services of *different* types side by side, so each
//! one is hidden behind a trait object (`dyn ErasedService`):
//!
//! ```text
//! async fn get_user(req: Request) -> Result<Json<User>, ApplicationError>   ← user writes this
//!        ↓ Leaf::get("/users/:id", get_user)
//! get_user.into_boxed_service()                  ← Service blanket impl
//!        ↓
//! Arc::new(FnService(get_user))                  ← shared wrapper
//!        ↓  stored as BoxedService = Arc<dyn ErasedService>
//! service.call(req)  at request time             ← one vtable dispatch
//!        ↓
//! Box::pin(async { get_user(req).await.into_reply() })
//! ```
//!
//! Synchronous services go through [`sync`], which wraps the return value in
//! an already-ready future.

use std::future::{Future, Ready, ready};
use std::pin::Pin;
use std::sync::Arc;

use crate::reply::{IntoReply, Reply};
use crate::request::Request;

// ── Internal types ────────────────────────────────────────────────────────────

/// A heap-allocated, type-erased future resolving to a [`Reply`].
pub(crate) type BoxFuture = Pin<Box<dyn Future<Output = Reply> + Send + 'static>>;

/// `#[doc(hidden)] pub` because it appears in the public `Service` trait's
/// `into_boxed_service` signature.
#[doc(hidden)]
pub trait ErasedService {
    fn call(&self, req: Request) -> BoxFuture;
}

#[doc(hidden)]
pub type BoxedService = Arc<dyn ErasedService + Send + Sync + 'static>;

// ── Public Service trait ──────────────────────────────────────────────────────

/// Implemented for every valid leaf service:
///
/// ```text
/// async fn name(req: Request) -> impl IntoReply
/// ```
///
/// Sealed: only the blanket impl below satisfies it.
pub trait Service: private::Sealed + Send + Sync + 'static {
    #[doc(hidden)]
    fn into_boxed_service(self) -> BoxedService;
}

mod private {
    pub trait Sealed {}
}

impl<F, Fut, R> private::Sealed for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
}

impl<F, Fut, R> Service for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn into_boxed_service(self) -> BoxedService {
        Arc::new(FnService(self))
    }
}

/// Adapts a synchronous `Fn(Request) -> impl IntoReply` into a [`Service`].
pub fn sync<F, R>(f: F) -> impl Fn(Request) -> Ready<R> + Send + Sync + 'static
where
    F: Fn(Request) -> R + Send + Sync + 'static,
    R: IntoReply + Send + 'static,
{
    move |req| ready(f(req))
}

// ── Concrete wrapper ──────────────────────────────────────────────────────────

struct FnService<F>(F);

impl<F, Fut, R> ErasedService for FnService<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoReply + Send + 'static,
{
    fn call(&self, req: Request) -> BoxFuture {
        let fut = (self.0)(req);
        Box::pin(async move { fut.await.into_reply() })
    }
}
