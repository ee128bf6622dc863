//! Body size limit middleware
//!
//! Rejects oversized request bodies before the rest of the chain runs.

use super::{Middleware, Next};
use crate::{BoxFuture, Context, HttpError};
use std::sync::Arc;

/// Body limit configuration
#[derive(Clone)]
pub struct BodyLimitConfig {
    /// Maximum body size in bytes
    pub max_size: usize,
}

impl BodyLimitConfig {
    pub fn new(max_size: usize) -> Self {
        Self { max_size }
    }

    /// Set limit in bytes
    pub fn bytes(size: usize) -> Self {
        Self::new(size)
    }

    /// Set limit in kilobytes
    pub fn kb(size: usize) -> Self {
        Self::new(size * 1024)
    }

    /// Set limit in megabytes
    pub fn mb(size: usize) -> Self {
        Self::new(size * 1024 * 1024)
    }

    /// Set limit in gigabytes
    pub fn gb(size: usize) -> Self {
        Self::new(size * 1024 * 1024 * 1024)
    }

    /// Parse size from string (e.g., "10mb", "1gb", "500kb")
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim().to_lowercase();

        let (num_str, multiplier) = if s.ends_with("gb") {
            (&s[..s.len() - 2], 1024 * 1024 * 1024)
        } else if s.ends_with("mb") {
            (&s[..s.len() - 2], 1024 * 1024)
        } else if s.ends_with("kb") {
            (&s[..s.len() - 2], 1024)
        } else if s.ends_with('b') {
            (&s[..s.len() - 1], 1)
        } else {
            (s.as_str(), 1)
        };

        let num: usize = num_str.trim().parse().ok()?;
        Some(Self::new(num * multiplier))
    }
}

/// Format size for display
pub fn format_size(bytes: usize) -> String {
    if bytes >= 1024 * 1024 * 1024 {
        format!("{:.1}GB", bytes as f64 / (1024.0 * 1024.0 * 1024.0))
    } else if bytes >= 1024 * 1024 {
        format!("{:.1}MB", bytes as f64 / (1024.0 * 1024.0))
    } else if bytes >= 1024 {
        format!("{:.1}KB", bytes as f64 / 1024.0)
    } else {
        format!("{}B", bytes)
    }
}

/// Body limit middleware
pub struct BodyLimit {
    config: BodyLimitConfig,
}

impl BodyLimit {
    pub fn new(config: BodyLimitConfig) -> Self {
        Self { config }
    }

    /// JSON body limit (default 1MB)
    pub fn json() -> Self {
        Self::new(BodyLimitConfig::mb(1))
    }

    /// Form upload limit (default 10MB)
    pub fn upload() -> Self {
        Self::new(BodyLimitConfig::mb(10))
    }
}

impl Middleware for BodyLimit {
    fn call(&self, ctx: Arc<Context>, next: Next) -> BoxFuture {
        let max_size = self.config.max_size;
        Box::pin(async move {
            // Declared length first, then the bytes actually buffered
            if let Some(length) = ctx.request().content_length() {
                if length > max_size {
                    return Err(HttpError::payload_too_large(max_size, length));
                }
            }

            let actual = ctx.request().body.len();
            if actual > max_size {
                return Err(HttpError::payload_too_large(max_size, actual));
            }

            next.run(ctx).await
        })
    }
}
