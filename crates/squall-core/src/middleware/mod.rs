//! Middleware contract and chain executor
//!
//! A middleware is one unit of request processing: it receives the context
//! and a continuation, and either calls `next.run(ctx)` to keep the chain
//! going or returns without calling it to short-circuit (answer from cache,
//! reject unauthenticated requests, finish a CORS preflight).
//!
//! Execution is cooperative continuation passing: `Next` carries a cursor
//! into the chain plus the terminal handler. Nothing runs concurrently
//! within one request's chain; errors propagate to whichever caller awaited
//! the chain, uninterpreted.

pub mod body_limit;
pub mod cors;
pub mod error_boundary;
pub mod request_id;
pub mod timeout;

// Re-exports for convenience
pub use body_limit::{format_size, BodyLimit, BodyLimitConfig};
pub use cors::{Cors, CorsConfig};
pub use error_boundary::{ErrorBoundary, ErrorBoundaryConfig};
pub use request_id::{
    generate_counter_id, generate_nano_id, generate_short_id, generate_uuid, IdGenerator,
    RequestId, RequestIdConfig,
};
pub use timeout::Timeout;

use crate::{Context, Result};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// Boxed completion future returned by middleware and handlers
pub type BoxFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Terminal request handler
///
/// Expected to finalize a response, directly or by having let an earlier
/// middleware do it.
pub trait Handler: Send + Sync {
    fn call(&self, ctx: Arc<Context>) -> BoxFuture;
}

/// A middleware unit: `(context, next) -> completion`
pub trait Middleware: Send + Sync {
    fn call(&self, ctx: Arc<Context>, next: Next) -> BoxFuture;
}

struct FnHandler<F>(F);

impl<F, Fut> Handler for FnHandler<F>
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call(&self, ctx: Arc<Context>) -> BoxFuture {
        Box::pin((self.0)(ctx))
    }
}

/// Wrap an async closure as a boxed handler
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn Handler>
where
    F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct FnMiddleware<F>(F);

impl<F, Fut> Middleware for FnMiddleware<F>
where
    F: Fn(Arc<Context>, Next) -> Fut + Send + Sync,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    fn call(&self, ctx: Arc<Context>, next: Next) -> BoxFuture {
        Box::pin((self.0)(ctx, next))
    }
}

/// Wrap an async closure as a boxed middleware
pub fn middleware_fn<F, Fut>(f: F) -> Arc<dyn Middleware>
where
    F: Fn(Arc<Context>, Next) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    Arc::new(FnMiddleware(f))
}

/// Continuation into the remaining chain
///
/// Holds the full chain slice, a cursor, and the terminal handler. Cheap to
/// construct per step; the slice itself is shared.
pub struct Next {
    chain: Arc<[Arc<dyn Middleware>]>,
    index: usize,
    terminal: Arc<dyn Handler>,
}

impl Next {
    pub(crate) fn new(chain: Arc<[Arc<dyn Middleware>]>, terminal: Arc<dyn Handler>) -> Self {
        Self {
            chain,
            index: 0,
            terminal,
        }
    }

    /// Run the rest of the chain
    ///
    /// Returns immediately once the response is finalized: nothing past a
    /// completed write may run, and a unit resuming after someone else
    /// finalized continues into a no-op. This is both the double-write
    /// guard and the implicit cancellation signal.
    pub async fn run(self, ctx: Arc<Context>) -> Result<()> {
        if ctx.finalized() {
            return Ok(());
        }
        match self.chain.get(self.index).cloned() {
            Some(unit) => {
                let next = Next {
                    chain: self.chain,
                    index: self.index + 1,
                    terminal: self.terminal,
                };
                unit.call(ctx, next).await
            }
            None => self.terminal.call(ctx).await,
        }
    }
}

/// Run `chain ++ terminal` over a context
pub async fn execute(
    chain: Arc<[Arc<dyn Middleware>]>,
    terminal: Arc<dyn Handler>,
    ctx: Arc<Context>,
) -> Result<()> {
    Next::new(chain, terminal).run(ctx).await
}
