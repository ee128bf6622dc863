//! squall-core: HTTP request router and middleware dispatch engine
//!
//! Resolves (method, path) against a prefix trie with deterministic
//! precedence, then runs an ordered middleware chain around the matched
//! handler via cooperative continuation passing. Unmatched OPTIONS
//! requests are synthesized from the routes that do exist on the path;
//! unmatched paths fall through the global chain into a 404.
//!
//! The write-once response contract holds under any composition: the
//! first finalizing write wins and every later write is a no-op.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod app;
pub mod context;
pub mod error;
pub mod middleware;
pub mod request;
pub mod response;
pub mod server;

// Re-exports
pub use app::{App, CompiledRoute};
pub use context::Context;
pub use error::{HttpError, Result};
pub use request::{Method, Request, RequestBuilder};
pub use response::{Response, ResponseBuilder, StatusCode};

// Middleware contract re-exports
pub use middleware::{handler_fn, middleware_fn, BoxFuture, Handler, Middleware, Next};

pub use server::{create_listener_socket, read_request, to_hyper_response, Server, ServerConfig};
