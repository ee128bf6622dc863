//! Transport listener
//!
//! Thin hyper/tokio glue around the dispatcher: accept connections, decode
//! each request into the engine's `Request`, call `App::dispatch`, send the
//! result back. Register every route before calling `serve`; the trie is
//! read-only once traffic begins.

use crate::app::App;
use crate::error::{HttpError, Result};
use crate::request::{Method, Request};
use crate::response::{Response, ResponseBuilder};
use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use hyper::body::Incoming;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use socket2::{Domain, Protocol, Socket, Type};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

/// Server configuration
#[derive(Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub hostname: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            hostname: "0.0.0.0".to_string(),
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn hostname(mut self, hostname: impl Into<String>) -> Self {
        self.hostname = hostname.into();
        self
    }
}

/// Create a TCP socket with optimizations
///
/// SO_REUSEPORT lets multiple processes share the port for kernel-level
/// load balancing; TCP_NODELAY keeps small responses from waiting on Nagle.
pub fn create_listener_socket(addr: &SocketAddr) -> std::io::Result<Socket> {
    let domain = if addr.is_ipv4() {
        Domain::IPV4
    } else {
        Domain::IPV6
    };

    let socket = Socket::new(domain, Type::STREAM, Some(Protocol::TCP))?;

    // SO_REUSEADDR - allow binding to address in TIME_WAIT
    socket.set_reuse_address(true)?;

    // SO_REUSEPORT - enable kernel load balancing across processes
    #[cfg(unix)]
    socket.set_reuse_port(true)?;

    // TCP_NODELAY - disable Nagle's algorithm for lower latency
    socket.set_nodelay(true)?;

    socket.bind(&(*addr).into())?;
    socket.listen(1024)?;

    Ok(socket)
}

/// Decode a hyper request into the engine's Request type
///
/// Buffers the whole body; streaming bodies are not part of this engine.
pub async fn read_request(req: hyper::Request<Incoming>) -> Result<Request> {
    let (parts, body) = req.into_parts();

    let method = Method::from_str(parts.method.as_str())?;
    let path = parts.uri.path().to_string();
    let query = parts.uri.query().map(|s| s.to_string());

    let mut request = Request::new(method, path);
    request.query = query;

    for (name, value) in &parts.headers {
        if let Ok(v) = value.to_str() {
            request.headers.push((name.to_string(), v.to_string()));
        }
    }

    request.body = body
        .collect()
        .await
        .map_err(|err| HttpError::bad_request(format!("failed to read request body: {err}")))?
        .to_bytes();

    Ok(request)
}

/// Convert the engine's Response to a hyper response
pub fn to_hyper_response(res: Response) -> hyper::Response<Full<Bytes>> {
    let status = http::StatusCode::from_u16(res.status.as_u16())
        .unwrap_or(http::StatusCode::INTERNAL_SERVER_ERROR);

    let mut builder = hyper::Response::builder().status(status);
    for (name, value) in &res.headers {
        builder = builder.header(name.as_str(), value.as_str());
    }

    builder.body(Full::new(res.body)).unwrap_or_else(|err| {
        tracing::error!("response failed to materialize: {err}");
        let mut fallback = hyper::Response::new(Full::new(Bytes::new()));
        *fallback.status_mut() = http::StatusCode::INTERNAL_SERVER_ERROR;
        fallback
    })
}

/// HTTP/1 server driving an `App`
pub struct Server {
    app: Arc<App>,
    config: ServerConfig,
}

impl Server {
    pub fn new(app: Arc<App>, config: ServerConfig) -> Self {
        Self { app, config }
    }

    /// Accept loop; runs until the listener fails
    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = format!("{}:{}", self.config.hostname, self.config.port)
            .parse()
            .map_err(HttpError::from_any)?;

        let socket = create_listener_socket(&addr)?;
        socket.set_nonblocking(true)?;
        let listener = TcpListener::from_std(socket.into())?;
        tracing::info!(%addr, "listening");

        loop {
            let (stream, _peer) = listener.accept().await?;
            // Not inherited from the listening socket on every platform
            stream.set_nodelay(true).ok();
            let io = TokioIo::new(stream);
            let app = self.app.clone();

            tokio::spawn(async move {
                let service = service_fn(move |req| handle(app.clone(), req));
                if let Err(err) = http1::Builder::new().serve_connection(io, service).await {
                    tracing::debug!("connection closed with error: {err}");
                }
            });
        }
    }
}

/// Per-request service entry: decode, dispatch, encode
async fn handle(
    app: Arc<App>,
    req: hyper::Request<Incoming>,
) -> std::result::Result<hyper::Response<Full<Bytes>>, std::convert::Infallible> {
    let response = match read_request(req).await {
        Ok(request) => app.dispatch(request).await,
        Err(err) => {
            // Decode failed before a context existed; answer in the same
            // structured shape the boundary would use
            let body = serde_json::to_vec(&err.to_body(false)).unwrap_or_default();
            ResponseBuilder::new(err.status())
                .header("content-type", "application/json")
                .body(body)
                .build()
        }
    };
    Ok(to_hyper_response(response))
}
