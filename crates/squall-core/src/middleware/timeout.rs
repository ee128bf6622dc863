//! Request timeout middleware
//!
//! Races the rest of the chain against a timer. On expiry it raises the
//! Timeout error (rendered by the boundary as 408) while the downstream
//! chain keeps running to completion on its own task; once the timeout
//! response is finalized, every late write is a no-op. Cancellation is
//! implicit, never forceful.

use super::{Middleware, Next};
use crate::{BoxFuture, Context, HttpError};
use std::sync::Arc;
use std::time::Duration;

/// Timeout middleware
pub struct Timeout {
    duration: Duration,
}

impl Timeout {
    pub fn new(duration: Duration) -> Self {
        Self { duration }
    }

    pub fn secs(secs: u64) -> Self {
        Self::new(Duration::from_secs(secs))
    }

    pub fn millis(millis: u64) -> Self {
        Self::new(Duration::from_millis(millis))
    }
}

impl Middleware for Timeout {
    fn call(&self, ctx: Arc<Context>, next: Next) -> BoxFuture {
        let duration = self.duration;
        Box::pin(async move {
            let mut downstream = tokio::spawn(next.run(ctx.clone()));
            tokio::select! {
                joined = &mut downstream => match joined {
                    Ok(result) => result,
                    Err(err) => Err(HttpError::internal(format!("request task failed: {err}"))),
                },
                _ = tokio::time::sleep(duration) => {
                    // Late completion only has the log left as an outlet
                    let method = ctx.method();
                    let path = ctx.path().to_string();
                    tokio::spawn(async move {
                        match downstream.await {
                            Ok(Err(err)) => tracing::error!(
                                method = %method,
                                path = %path,
                                "chain failed after its timeout elapsed: {err}"
                            ),
                            Err(err) => tracing::error!("request task failed: {err}"),
                            Ok(Ok(())) => {}
                        }
                    });
                    Err(HttpError::timeout(duration))
                }
            }
        })
    }
}
