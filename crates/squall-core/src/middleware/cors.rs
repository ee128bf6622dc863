//! CORS (Cross-Origin Resource Sharing) middleware
//!
//! Sets the Access-Control headers before delegating, and finalizes
//! preflight OPTIONS requests itself (a deliberate short-circuit; the
//! dispatcher's synthesized OPTIONS route then defaults to nothing
//! further running).

use super::{Middleware, Next};
use crate::request::Method;
use crate::response::StatusCode;
use crate::{BoxFuture, Context, HttpError};
use smallvec::SmallVec;
use std::sync::Arc;

/// CORS configuration
#[derive(Clone)]
pub struct CorsConfig {
    /// Allowed origins (empty = all)
    pub origins: SmallVec<[String; 4]>,
    /// Allowed methods
    pub methods: SmallVec<[Method; 8]>,
    /// Allowed headers
    pub headers: SmallVec<[String; 8]>,
    /// Exposed headers
    pub expose_headers: SmallVec<[String; 4]>,
    /// Allow credentials
    pub credentials: bool,
    /// Max age (seconds)
    pub max_age: u32,
}

impl Default for CorsConfig {
    fn default() -> Self {
        Self {
            origins: SmallVec::new(), // Empty = allow all
            methods: smallvec::smallvec![
                Method::Get,
                Method::Post,
                Method::Put,
                Method::Delete,
                Method::Patch,
                Method::Head,
                Method::Options,
            ],
            headers: smallvec::smallvec![
                "Content-Type".to_string(),
                "Authorization".to_string(),
                "X-Requested-With".to_string(),
            ],
            expose_headers: SmallVec::new(),
            credentials: false,
            max_age: 86400, // 24 hours
        }
    }
}

impl CorsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow_origin(mut self, origin: impl Into<String>) -> Self {
        self.origins.push(origin.into());
        self
    }

    pub fn allow_all_origins(mut self) -> Self {
        self.origins.clear();
        self
    }

    pub fn allow_method(mut self, method: Method) -> Self {
        if !self.methods.contains(&method) {
            self.methods.push(method);
        }
        self
    }

    pub fn allow_header(mut self, header: impl Into<String>) -> Self {
        self.headers.push(header.into());
        self
    }

    pub fn expose_header(mut self, header: impl Into<String>) -> Self {
        self.expose_headers.push(header.into());
        self
    }

    pub fn allow_credentials(mut self) -> Self {
        self.credentials = true;
        self
    }

    pub fn max_age(mut self, seconds: u32) -> Self {
        self.max_age = seconds;
        self
    }

    fn is_origin_allowed(&self, origin: &str) -> bool {
        if self.origins.is_empty() {
            return true; // Allow all
        }
        self.origins.iter().any(|o| o == origin || o == "*")
    }

    fn methods_string(&self) -> String {
        self.methods
            .iter()
            .map(|m| m.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn headers_string(&self) -> String {
        self.headers.join(", ")
    }

    fn apply_headers(&self, ctx: &Context, origin: &str) {
        let origin_value = if self.origins.is_empty() {
            "*".to_string()
        } else {
            origin.to_string()
        };
        ctx.header("Access-Control-Allow-Origin", origin_value);
        ctx.header("Access-Control-Allow-Methods", self.methods_string());

        if !self.headers.is_empty() {
            ctx.header("Access-Control-Allow-Headers", self.headers_string());
        }
        if !self.expose_headers.is_empty() {
            ctx.header(
                "Access-Control-Expose-Headers",
                self.expose_headers.join(", "),
            );
        }
        if self.credentials {
            ctx.header("Access-Control-Allow-Credentials", "true");
        }
        ctx.header("Access-Control-Max-Age", self.max_age.to_string());
    }
}

/// CORS middleware
pub struct Cors {
    config: CorsConfig,
}

impl Cors {
    pub fn new(config: CorsConfig) -> Self {
        Self { config }
    }

    /// Simple CORS - allow all origins
    pub fn permissive() -> Self {
        Self::new(CorsConfig::default().allow_all_origins())
    }
}

impl Middleware for Cors {
    fn call(&self, ctx: Arc<Context>, next: Next) -> BoxFuture {
        let config = self.config.clone();
        Box::pin(async move {
            let origin = ctx
                .request()
                .header("origin")
                .unwrap_or_default()
                .to_string();

            // No origin header = same-origin request, skip CORS
            if origin.is_empty() {
                return next.run(ctx).await;
            }

            if !config.is_origin_allowed(&origin) {
                return Err(HttpError::authorization(
                    "CORS: origin not allowed",
                    Vec::new(),
                ));
            }

            // Headers go on before delegating; body writers downstream
            // finalize them along with whatever they send
            config.apply_headers(&ctx, &origin);

            // Preflight: answer here, never continue the chain
            if ctx.method() == Method::Options {
                ctx.empty(StatusCode::NO_CONTENT);
                return Ok(());
            }

            next.run(ctx).await
        })
    }
}
