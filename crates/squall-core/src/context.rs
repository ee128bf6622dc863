//! Per-request context
//!
//! One `Context` per inbound request, owned by that request's chain and
//! dropped once the response goes out. Response helpers are fluent and
//! write-once: after the first finalizing write, every later write is a
//! no-op, so "whoever writes first wins" holds no matter how the chain is
//! composed.
//!
//! The state bag is scratch space for cross-middleware data (request id,
//! authenticated user). Each request executes sequentially over its own
//! Context; the mutexes exist to satisfy `Send + Sync`, not because units
//! of one chain contend.

use crate::request::{Method, Request};
use crate::response::{Response, StatusCode};
use crate::HttpError;
use parking_lot::Mutex;
use serde::Serialize;
use serde_json::Value;
use smallvec::SmallVec;
use std::collections::HashMap;

/// Accumulated response, mirroring what the transport will send
#[derive(Debug)]
struct ResponseState {
    status: StatusCode,
    headers: SmallVec<[(String, String); 8]>,
    body: bytes::Bytes,
    finalized: bool,
}

impl Default for ResponseState {
    fn default() -> Self {
        Self {
            status: StatusCode::OK,
            headers: SmallVec::new(),
            body: bytes::Bytes::new(),
            finalized: false,
        }
    }
}

/// Per-request mutable record
pub struct Context {
    request: Request,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    body: Option<Value>,
    state: Mutex<HashMap<String, Value>>,
    response: Mutex<ResponseState>,
}

impl Context {
    /// Create a context for a decoded request
    ///
    /// `params` are the path parameters bound by the route matcher (empty
    /// when no route matched). Query and JSON body decoding happen here, at
    /// the listener edge of the pipeline.
    pub fn new(request: Request, params: HashMap<String, String>) -> Self {
        let query = request.query_params();
        let body = request.json_body();
        Self {
            request,
            params,
            query,
            body,
            state: Mutex::new(HashMap::new()),
            response: Mutex::new(ResponseState::default()),
        }
    }

    // --- request side ---

    /// The underlying request
    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn method(&self) -> Method {
        self.request.method
    }

    pub fn path(&self) -> &str {
        &self.request.path
    }

    /// Bound path parameters
    pub fn params(&self) -> &HashMap<String, String> {
        &self.params
    }

    /// Get a single path parameter
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(|s| s.as_str())
    }

    /// Decoded query parameters
    pub fn query(&self) -> &HashMap<String, String> {
        &self.query
    }

    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(|s| s.as_str())
    }

    /// Decoded JSON body, if the request carried one
    pub fn body(&self) -> Option<&Value> {
        self.body.as_ref()
    }

    // --- state bag ---

    /// Store a cross-middleware value
    pub fn set_state(&self, key: impl Into<String>, value: Value) {
        self.state.lock().insert(key.into(), value);
    }

    /// Fetch a cross-middleware value
    pub fn get_state(&self, key: &str) -> Option<Value> {
        self.state.lock().get(key).cloned()
    }

    // --- response side ---

    /// Whether the response has been finalized (headers-sent mirror)
    pub fn finalized(&self) -> bool {
        self.response.lock().finalized
    }

    /// Current status mirror
    pub fn status_code(&self) -> StatusCode {
        self.response.lock().status
    }

    /// Set the status without writing a body. No-op once finalized.
    pub fn set_status(&self, status: StatusCode) -> &Self {
        let mut res = self.response.lock();
        if !res.finalized {
            res.status = status;
        }
        self
    }

    /// Append a response header. No-op once finalized.
    pub fn header(&self, name: impl Into<String>, value: impl Into<String>) -> &Self {
        let mut res = self.response.lock();
        if !res.finalized {
            res.headers.push((name.into(), value.into()));
        }
        self
    }

    /// Append a Set-Cookie header. No-op once finalized.
    pub fn set_cookie(&self, name: &str, value: &str) -> &Self {
        self.header("set-cookie", format!("{name}={value}"))
    }

    /// Serialize a payload as the JSON response body, finalizing with the
    /// current status. No-op once finalized.
    pub fn json<T: Serialize>(&self, payload: &T) -> &Self {
        match serde_json::to_vec(payload) {
            Ok(buf) => self.write(None, "application/json", buf.into()),
            Err(err) => {
                tracing::error!("response payload failed to serialize: {err}");
                let body = HttpError::internal("response serialization failed").to_body(false);
                self.fail_with_body(StatusCode::INTERNAL_SERVER_ERROR, &body)
            }
        }
    }

    /// Set a status and serialize a JSON payload in one step
    pub fn send<T: Serialize>(&self, status: StatusCode, payload: &T) -> &Self {
        self.set_status(status);
        self.json(payload)
    }

    /// 200 with a JSON payload
    pub fn ok<T: Serialize>(&self, payload: &T) -> &Self {
        self.send(StatusCode::OK, payload)
    }

    /// 201 with a JSON payload
    pub fn created<T: Serialize>(&self, payload: &T) -> &Self {
        self.send(StatusCode::CREATED, payload)
    }

    /// 204 with no body
    pub fn no_content(&self) -> &Self {
        self.empty(StatusCode::NO_CONTENT)
    }

    /// Finalize with the given status and an empty body
    pub fn empty(&self, status: StatusCode) -> &Self {
        self.write(Some(status), "", bytes::Bytes::new())
    }

    /// Plain-text response body, finalizing with the current status
    pub fn text(&self, body: impl Into<bytes::Bytes>) -> &Self {
        self.write(None, "text/plain; charset=utf-8", body.into())
    }

    /// Redirect to a location
    pub fn redirect(&self, location: &str, permanent: bool) -> &Self {
        let status = if permanent {
            StatusCode::PERMANENT_REDIRECT
        } else {
            StatusCode::TEMPORARY_REDIRECT
        };
        self.header("location", location);
        self.empty(status)
    }

    /// Render an error in the structured shape `{error, status, code, ...}`
    pub fn fail(&self, err: &HttpError, expose_internal: bool) -> &Self {
        self.fail_with_body(err.status(), &err.to_body(expose_internal))
    }

    fn fail_with_body(&self, status: StatusCode, body: &Value) -> &Self {
        // to_vec on a Value only fails on non-string map keys, which
        // to_body never produces
        let buf = serde_json::to_vec(body).unwrap_or_default();
        self.write(Some(status), "application/json", buf.into())
    }

    /// The single finalizing write. Everything body-shaped funnels through
    /// here so the headers-sent guard has one enforcement point.
    fn write(&self, status: Option<StatusCode>, content_type: &str, body: bytes::Bytes) -> &Self {
        let mut res = self.response.lock();
        if res.finalized {
            return self;
        }
        if let Some(status) = status {
            res.status = status;
        }
        let has_content_type = res
            .headers
            .iter()
            .any(|(k, _)| k.eq_ignore_ascii_case("content-type"));
        if !content_type.is_empty() && !has_content_type {
            res.headers
                .push(("content-type".to_string(), content_type.to_string()));
        }
        res.body = body;
        res.finalized = true;
        self
    }

    /// Hand the accumulated response to the transport. Marks the context
    /// finalized so any still-running unit's writes become no-ops.
    pub fn take_response(&self) -> Response {
        let mut res = self.response.lock();
        res.finalized = true;
        Response {
            status: res.status,
            headers: std::mem::take(&mut res.headers),
            body: std::mem::take(&mut res.body),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::RequestBuilder;
    use serde_json::json;

    fn ctx(method: Method, path: &str) -> Context {
        Context::new(Request::new(method, path), HashMap::new())
    }

    #[test]
    fn test_first_write_wins() {
        let ctx = ctx(Method::Get, "/");
        ctx.ok(&json!({"first": true}));
        ctx.send(StatusCode::CREATED, &json!({"second": true}));

        let res = ctx.take_response();
        assert_eq!(res.status, StatusCode::OK);
        assert!(res.body_string().unwrap().contains("first"));
    }

    #[test]
    fn test_headers_frozen_after_finalize() {
        let ctx = ctx(Method::Get, "/");
        ctx.header("x-early", "yes");
        ctx.ok(&json!({}));
        ctx.header("x-late", "no");
        ctx.set_status(StatusCode::BAD_GATEWAY);

        let res = ctx.take_response();
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.header("x-early"), Some("yes"));
        assert!(res.header("x-late").is_none());
    }

    #[test]
    fn test_status_mirror() {
        let ctx = ctx(Method::Get, "/");
        assert_eq!(ctx.status_code(), StatusCode::OK);
        ctx.set_status(StatusCode::ACCEPTED);
        assert_eq!(ctx.status_code(), StatusCode::ACCEPTED);
        assert!(!ctx.finalized());

        ctx.json(&json!({"done": true}));
        assert!(ctx.finalized());
        assert_eq!(ctx.take_response().status, StatusCode::ACCEPTED);
    }

    #[test]
    fn test_fluent_chaining() {
        let ctx = ctx(Method::Get, "/");
        ctx.header("x-a", "1").header("x-b", "2").ok(&json!({}));

        let res = ctx.take_response();
        assert_eq!(res.header("x-a"), Some("1"));
        assert_eq!(res.header("x-b"), Some("2"));
        assert_eq!(res.content_type(), Some("application/json"));
    }

    #[test]
    fn test_explicit_content_type_not_overridden() {
        let ctx = ctx(Method::Get, "/");
        ctx.header("content-type", "application/vnd.api+json");
        ctx.json(&json!({}));

        let res = ctx.take_response();
        assert_eq!(res.content_type(), Some("application/vnd.api+json"));
    }

    #[test]
    fn test_fail_shape() {
        let ctx = ctx(Method::Get, "/missing");
        ctx.fail(&HttpError::route_not_found(), false);

        let res = ctx.take_response();
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        let body: Value = serde_json::from_slice(&res.body).unwrap();
        assert_eq!(body["error"], "Not Found");
        assert_eq!(body["status"], 404);
    }

    #[test]
    fn test_state_bag() {
        let ctx = ctx(Method::Get, "/");
        ctx.set_state("request_id", json!("abc-123"));
        assert_eq!(ctx.get_state("request_id"), Some(json!("abc-123")));
        assert!(ctx.get_state("missing").is_none());
    }

    #[test]
    fn test_query_and_body_seeding() {
        let request = RequestBuilder::new(Method::Post, "/items")
            .query("page=2&q=rust%20router")
            .header("content-type", "application/json")
            .body(r#"{"name":"widget"}"#)
            .build();
        let ctx = Context::new(request, HashMap::new());

        assert_eq!(ctx.query_param("page"), Some("2"));
        assert_eq!(ctx.query_param("q"), Some("rust router"));
        assert_eq!(ctx.body().unwrap()["name"], "widget");
    }

    #[test]
    fn test_set_cookie() {
        let ctx = ctx(Method::Get, "/");
        ctx.set_cookie("session", "tok-9").ok(&json!({}));

        let res = ctx.take_response();
        assert_eq!(res.header("set-cookie"), Some("session=tok-9"));
    }

    #[test]
    fn test_redirect() {
        let ctx = ctx(Method::Get, "/old");
        ctx.redirect("/new", false);

        let res = ctx.take_response();
        assert_eq!(res.status, StatusCode::TEMPORARY_REDIRECT);
        assert_eq!(res.header("location"), Some("/new"));
    }

    #[test]
    fn test_no_content() {
        let ctx = ctx(Method::Delete, "/items/3");
        ctx.no_content();

        let res = ctx.take_response();
        assert_eq!(res.status, StatusCode::NO_CONTENT);
        assert!(res.body.is_empty());
    }
}
