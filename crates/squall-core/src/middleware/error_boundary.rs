//! Error boundary middleware
//!
//! Converts errors raised anywhere downstream into structured JSON
//! responses. Must be registered as the first global middleware so it
//! observes every failure; nothing enforces that ordering structurally.
//!
//! Once a response is finalized an error can no longer become a response,
//! so it is dropped to the log instead of propagating further.

use super::{Middleware, Next};
use crate::{BoxFuture, Context, HttpError};
use std::sync::Arc;

/// Error boundary configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct ErrorBoundaryConfig {
    /// Include the original message of Internal errors in responses.
    /// Diagnostics only; off by default so unknown failures never leak.
    pub expose_internal: bool,
}

impl ErrorBoundaryConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn expose_internal(mut self, expose: bool) -> Self {
        self.expose_internal = expose;
        self
    }
}

/// Error boundary middleware
pub struct ErrorBoundary {
    config: ErrorBoundaryConfig,
}

impl ErrorBoundary {
    pub fn new(config: ErrorBoundaryConfig) -> Self {
        Self { config }
    }
}

impl Default for ErrorBoundary {
    fn default() -> Self {
        Self::new(ErrorBoundaryConfig::default())
    }
}

impl Middleware for ErrorBoundary {
    fn call(&self, ctx: Arc<Context>, next: Next) -> BoxFuture {
        let config = self.config;
        Box::pin(async move {
            if let Err(err) = next.run(ctx.clone()).await {
                render(&ctx, &err, config);
            }
            Ok(())
        })
    }
}

fn render(ctx: &Context, err: &HttpError, config: ErrorBoundaryConfig) {
    if ctx.finalized() {
        // Cannot un-send bytes; the log is the only remaining channel
        tracing::error!(
            code = err.code(),
            status = err.status().as_u16(),
            method = %ctx.method(),
            path = %ctx.path(),
            "error raised after response was finalized: {err}"
        );
        return;
    }

    if matches!(err, HttpError::Internal { .. }) {
        tracing::error!(
            method = %ctx.method(),
            path = %ctx.path(),
            "request failed: {err}"
        );
    } else {
        tracing::debug!(
            code = err.code(),
            status = err.status().as_u16(),
            method = %ctx.method(),
            path = %ctx.path(),
            "request rejected: {err}"
        );
    }
    ctx.fail(err, config.expose_internal);
}
