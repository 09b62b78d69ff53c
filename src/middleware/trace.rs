//! Request logging twig.

use std::fmt;

use tracing::info;

use crate::app_error::ApplicationError;
use crate::middleware::Twig;
use crate::request::Request;

type LogFn = dyn Fn(&Request) + Send + Sync;

/// Logs every request that reaches the branch it is attached to.
///
/// The default writer emits one `info` event with the correlation id, method,
/// path and client ip. Never rejects a request.
pub struct RequestLog {
    writer: Option<Box<LogFn>>,
}

impl RequestLog {
    pub fn new() -> Self {
        Self { writer: None }
    }

    /// Hand each request to `writer` instead of `tracing`.
    pub fn with(writer: impl Fn(&Request) + Send + Sync + 'static) -> Self {
        Self { writer: Some(Box::new(writer)) }
    }
}

impl Default for RequestLog {
    fn default() -> Self { Self::new() }
}

impl fmt::Debug for RequestLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestLog").field("custom", &self.writer.is_some()).finish()
    }
}

impl Twig for RequestLog {
    fn apply(&self, req: &mut Request) -> Result<(), ApplicationError> {
        match &self.writer {
            Some(write) => write(req),
            None => info!(
                uuid = %req.uuid(),
                method = %req.method(),
                path = %req.path(),
                ip = %req.ip(),
                "request"
            ),
        }
        Ok(())
    }
}
