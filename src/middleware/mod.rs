//! Middleware layer.
//!
//! A **twig** is a synchronous step run before a leaf's service. It may
//! inspect or refine the [`Request`] and either let it continue (`Ok(())`) or
//! end it with an [`ApplicationError`], which is sent back in the envelope
//! without the service ever running.
//!
//! Built-in twigs:
//! - [`auth::TokenResolver`] — turns a bearer header or cookie into a [`UserState`](crate::UserState)
//! - [`Gateway`](crate::Gateway) — the permission check
//! - [`Check`](crate::Check) — JSON-Schema validation of params, query, headers, body
//! - [`trace::RequestLog`] — one log line per request
//!
//! Any `Fn(&mut Request) -> Result<(), ApplicationError>` is a twig too.

use std::sync::Arc;

use crate::app_error::ApplicationError;
use crate::request::Request;

pub mod auth;
pub mod trace;

pub trait Twig: Send + Sync + 'static {
    fn apply(&self, req: &mut Request) -> Result<(), ApplicationError>;
}

impl<F> Twig for F
where
    F: Fn(&mut Request) -> Result<(), ApplicationError> + Send + Sync + 'static,
{
    fn apply(&self, req: &mut Request) -> Result<(), ApplicationError> {
        self(req)
    }
}

/// A shared, type-erased twig. Chains are cloned into every route they guard.
pub type BoxedTwig = Arc<dyn Twig>;

/// Runs `chain` in order, stopping at the first error.
pub(crate) fn run_chain(chain: &[BoxedTwig], req: &mut Request) -> Result<(), ApplicationError> {
    chain.iter().try_for_each(|twig| twig.apply(req))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use http::Method;

    use super::*;

    #[test]
    fn chain_stops_at_first_error() {
        let calls = Arc::new(AtomicUsize::new(0));
        let seen = Arc::clone(&calls);
        let counter: BoxedTwig = Arc::new(move |_: &mut Request| -> Result<(), ApplicationError> {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        let deny: BoxedTwig = Arc::new(|_: &mut Request| -> Result<(), ApplicationError> {
            Err(ApplicationError::forbidden("no"))
        });

        let chain = vec![Arc::clone(&counter), deny, counter];
        let mut req = Request::for_test(Method::GET, "/");
        let err = run_chain(&chain, &mut req).unwrap_err();

        assert_eq!(err.code(), 403);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
