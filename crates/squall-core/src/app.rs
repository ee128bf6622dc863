//! Application dispatcher
//!
//! Owns the route trie and the ordered global middleware list. Both are
//! mutated only while the app is being set up; serving wraps the app in an
//! `Arc`, so registration is frozen once traffic begins.
//!
//! Dispatch resolves a route, builds the per-request context, and runs
//! global middleware ++ route middleware ++ handler. Unmatched OPTIONS
//! requests get a synthesized transient route; unmatched paths run the
//! global chain into a not-found terminal.

use crate::context::Context;
use crate::error::{HttpError, Result};
use crate::middleware::{handler_fn, Handler, Middleware, Next};
use crate::request::{Method, Request};
use crate::response::{Response, StatusCode};
use squall_router::Router;
use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::Arc;

/// A registered route: handler plus its per-route middleware
///
/// Immutable after registration; re-registering the same (method, exact
/// pattern) replaces the whole entry at the trie leaf.
pub struct CompiledRoute {
    pub method: Method,
    pub pattern: String,
    pub handler: Arc<dyn Handler>,
    pub middleware: Vec<Arc<dyn Middleware>>,
}

/// What an unfinalized chain settles to
enum Fallback {
    /// Synthesized OPTIONS default
    Ok,
    /// Everything else: nobody wrote, nothing matched the request's intent
    NotFound,
}

/// Request router and middleware dispatcher
pub struct App {
    router: Router<CompiledRoute>,
    global: Vec<Arc<dyn Middleware>>,
}

impl Default for App {
    fn default() -> Self {
        Self::new()
    }
}

impl App {
    pub fn new() -> Self {
        Self {
            router: Router::new(),
            global: Vec::new(),
        }
    }

    /// Append a global middleware. Order is execution order; the error
    /// boundary belongs first so it observes every downstream failure.
    pub fn middleware(&mut self, mw: Arc<dyn Middleware>) -> &mut Self {
        self.global.push(mw);
        self
    }

    /// Register a route with per-route middleware
    pub fn register(
        &mut self,
        method: Method,
        pattern: &str,
        handler: Arc<dyn Handler>,
        middleware: Vec<Arc<dyn Middleware>>,
    ) -> &mut Self {
        let route = CompiledRoute {
            method,
            pattern: pattern.to_string(),
            handler,
            middleware,
        };
        self.router.insert(method.as_str(), pattern, route);
        self
    }

    /// Register a route from an async closure, without route middleware
    pub fn route<F, Fut>(&mut self, method: Method, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.register(method, pattern, handler_fn(handler), Vec::new())
    }

    /// Add a GET route
    pub fn get<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.route(Method::Get, pattern, handler)
    }

    /// Add a POST route
    pub fn post<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.route(Method::Post, pattern, handler)
    }

    /// Add a PUT route
    pub fn put<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.route(Method::Put, pattern, handler)
    }

    /// Add a DELETE route
    pub fn delete<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.route(Method::Delete, pattern, handler)
    }

    /// Add a PATCH route
    pub fn patch<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.route(Method::Patch, pattern, handler)
    }

    /// Add a HEAD route
    pub fn head<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.route(Method::Head, pattern, handler)
    }

    /// Add an explicit OPTIONS route (disables synthesis for its path)
    pub fn options<F, Fut>(&mut self, pattern: &str, handler: F) -> &mut Self
    where
        F: Fn(Arc<Context>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        self.route(Method::Options, pattern, handler)
    }

    /// Dispatch one decoded request through the pipeline
    ///
    /// The single entry point the transport listener calls per request.
    pub async fn dispatch(&self, request: Request) -> Response {
        let method = request.method;
        let path = request.path.clone();

        // Ordinary match: global ++ route middleware ++ handler
        if let Some(matched) = self.router.find(method.as_str(), &path) {
            let handler = matched.value.handler.clone();
            let chain = self.compose(&matched.value.middleware);
            let params: HashMap<String, String> = matched.params.into_iter().collect();

            let ctx = Arc::new(Context::new(request, params));
            let result = Next::new(chain, handler).run(ctx.clone()).await;
            return Self::settle(ctx, result, Fallback::NotFound);
        }

        // Unmatched OPTIONS with routes on the path under other methods:
        // transient route concatenating their middleware, no-op terminal
        if method == Method::Options {
            let discovered = self.router.routes_on_path(&path);
            if !discovered.is_empty() {
                let allow = allow_list(&discovered);
                let mut synthesized: Vec<Arc<dyn Middleware>> = Vec::new();
                for route in &discovered {
                    synthesized.extend(route.middleware.iter().cloned());
                }
                let chain = self.compose(&synthesized);

                let ctx = Arc::new(Context::new(request, HashMap::new()));
                ctx.header("Allow", allow);
                let result = Next::new(chain, noop_terminal()).run(ctx.clone()).await;
                return Self::settle(ctx, result, Fallback::Ok);
            }
        }

        // No route on this path at all: global middleware only, then 404
        let ctx = Arc::new(Context::new(request, HashMap::new()));
        let chain = self.compose(&[]);
        let result = Next::new(chain, not_found_terminal())
            .run(ctx.clone())
            .await;
        Self::settle(ctx, result, Fallback::NotFound)
    }

    /// global ++ route middleware, shared with the executor
    fn compose(&self, route_mw: &[Arc<dyn Middleware>]) -> Arc<[Arc<dyn Middleware>]> {
        let mut chain = Vec::with_capacity(self.global.len() + route_mw.len());
        chain.extend(self.global.iter().cloned());
        chain.extend(route_mw.iter().cloned());
        chain.into()
    }

    /// Turn the chain outcome into the response the transport sends
    fn settle(ctx: Arc<Context>, result: Result<()>, fallback: Fallback) -> Response {
        if let Err(err) = result {
            // Escaped every boundary; the transport still needs bytes
            tracing::error!(
                code = err.code(),
                method = %ctx.method(),
                path = %ctx.path(),
                "unhandled error escaped the middleware chain: {err}"
            );
            if !ctx.finalized() {
                ctx.fail(&err, false);
            }
        }
        if !ctx.finalized() {
            match fallback {
                Fallback::Ok => {
                    ctx.empty(StatusCode::OK);
                }
                Fallback::NotFound => {
                    ctx.fail(&HttpError::route_not_found(), false);
                }
            }
        }
        ctx.take_response()
    }
}

fn allow_list(routes: &[&CompiledRoute]) -> String {
    let methods: BTreeSet<&'static str> = routes.iter().map(|r| r.method.as_str()).collect();
    methods.into_iter().collect::<Vec<_>>().join(", ")
}

fn noop_terminal() -> Arc<dyn Handler> {
    handler_fn(|_ctx| async { Ok(()) })
}

fn not_found_terminal() -> Arc<dyn Handler> {
    handler_fn(|_ctx| async { Err(HttpError::route_not_found()) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::middleware::{middleware_fn, Cors, ErrorBoundary};
    use crate::request::RequestBuilder;
    use parking_lot::Mutex;
    use serde_json::{json, Value};

    fn app_with_boundary() -> App {
        let mut app = App::new();
        app.middleware(Arc::new(ErrorBoundary::default()));
        app
    }

    fn body_json(res: &Response) -> Value {
        serde_json::from_slice(&res.body).unwrap()
    }

    fn probe(events: Arc<Mutex<Vec<&'static str>>>, label: &'static str) -> Arc<dyn Middleware> {
        middleware_fn(move |ctx, next: Next| {
            let events = events.clone();
            async move {
                events.lock().push(label);
                next.run(ctx).await
            }
        })
    }

    #[tokio::test]
    async fn test_param_route_round_trip() {
        let mut app = app_with_boundary();
        app.get("/a/:x", |ctx: Arc<Context>| async move {
            let x = ctx.param("x").unwrap_or_default().to_string();
            ctx.ok(&json!({ "x": x }));
            Ok(())
        });

        let res = app
            .dispatch(RequestBuilder::new(Method::Get, "/a/42").build())
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(body_json(&res)["x"], "42");

        // Same path, method with no route anywhere: 404
        let res = app
            .dispatch(RequestBuilder::new(Method::Delete, "/a/42").build())
            .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        assert_eq!(body_json(&res)["error"], "Not Found");
    }

    #[tokio::test]
    async fn test_literal_wins_over_param() {
        let mut app = app_with_boundary();
        app.get("/users/:id", |ctx: Arc<Context>| async move {
            ctx.ok(&json!({"route": "param"}));
            Ok(())
        });
        app.get("/users/active", |ctx: Arc<Context>| async move {
            ctx.ok(&json!({"route": "literal"}));
            Ok(())
        });

        let res = app
            .dispatch(RequestBuilder::new(Method::Get, "/users/active").build())
            .await;
        assert_eq!(body_json(&res)["route"], "literal");
    }

    #[tokio::test]
    async fn test_wildcard_runs_once_without_params() {
        let calls = Arc::new(Mutex::new(0u32));
        let handler_calls = calls.clone();

        let mut app = app_with_boundary();
        app.get("/files/*", move |ctx: Arc<Context>| {
            let calls = handler_calls.clone();
            async move {
                *calls.lock() += 1;
                ctx.ok(&json!({ "params": ctx.params().len() }));
                Ok(())
            }
        });

        let res = app
            .dispatch(RequestBuilder::new(Method::Get, "/files/a/b").build())
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(body_json(&res)["params"], 0);
        assert_eq!(*calls.lock(), 1);
    }

    #[tokio::test]
    async fn test_reregistration_last_write_wins() {
        let mut app = app_with_boundary();
        app.get("/v", |ctx: Arc<Context>| async move {
            ctx.ok(&json!({"version": 1}));
            Ok(())
        });
        app.get("/v", |ctx: Arc<Context>| async move {
            ctx.ok(&json!({"version": 2}));
            Ok(())
        });

        let res = app
            .dispatch(RequestBuilder::new(Method::Get, "/v").build())
            .await;
        assert_eq!(body_json(&res)["version"], 2);
    }

    #[tokio::test]
    async fn test_global_then_route_then_handler_order() {
        let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let mut app = App::new();
        app.middleware(Arc::new(ErrorBoundary::default()));
        app.middleware(probe(events.clone(), "global"));

        let handler_events = events.clone();
        app.register(
            Method::Get,
            "/ordered",
            handler_fn(move |ctx: Arc<Context>| {
                let events = handler_events.clone();
                async move {
                    events.lock().push("handler");
                    ctx.ok(&json!({}));
                    Ok(())
                }
            }),
            vec![probe(events.clone(), "route")],
        );

        app.dispatch(RequestBuilder::new(Method::Get, "/ordered").build())
            .await;
        assert_eq!(*events.lock(), vec!["global", "route", "handler"]);
    }

    #[tokio::test]
    async fn test_short_circuit_blocks_handler() {
        let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let gate = middleware_fn(|ctx: Arc<Context>, _next: Next| async move {
            ctx.send(StatusCode::FORBIDDEN, &json!({"denied": true}));
            Ok(())
        });

        let handler_events = events.clone();
        let mut app = app_with_boundary();
        app.register(
            Method::Get,
            "/guarded",
            handler_fn(move |_ctx| {
                let events = handler_events.clone();
                async move {
                    events.lock().push("handler");
                    Ok(())
                }
            }),
            vec![gate],
        );

        let res = app
            .dispatch(RequestBuilder::new(Method::Get, "/guarded").build())
            .await;
        assert_eq!(res.status, StatusCode::FORBIDDEN);
        assert!(events.lock().is_empty());
    }

    #[tokio::test]
    async fn test_options_synthesis_reflects_methods() {
        let mut app = app_with_boundary();
        app.get("/things", |ctx: Arc<Context>| async move {
            ctx.ok(&json!({}));
            Ok(())
        });
        app.post("/things", |ctx: Arc<Context>| async move {
            ctx.created(&json!({}));
            Ok(())
        });

        let res = app
            .dispatch(RequestBuilder::new(Method::Options, "/things").build())
            .await;
        assert_eq!(res.status, StatusCode::OK);
        assert_eq!(res.header("Allow"), Some("GET, POST"));
    }

    #[tokio::test]
    async fn test_options_synthesis_runs_route_middleware() {
        let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let mut app = app_with_boundary();
        app.register(
            Method::Get,
            "/things",
            handler_fn(|ctx: Arc<Context>| async move {
                ctx.ok(&json!({}));
                Ok(())
            }),
            vec![probe(events.clone(), "get-mw")],
        );
        app.register(
            Method::Post,
            "/things",
            handler_fn(|ctx: Arc<Context>| async move {
                ctx.created(&json!({}));
                Ok(())
            }),
            vec![probe(events.clone(), "post-mw")],
        );

        let res = app
            .dispatch(RequestBuilder::new(Method::Options, "/things").build())
            .await;
        assert_eq!(res.status, StatusCode::OK);
        // Concatenated in discovery order, none of the handlers ran
        assert_eq!(*events.lock(), vec!["get-mw", "post-mw"]);
    }

    #[tokio::test]
    async fn test_options_preflight_finalized_by_cors() {
        let mut app = App::new();
        app.middleware(Arc::new(ErrorBoundary::default()));
        app.middleware(Arc::new(Cors::permissive()));
        app.get("/things", |ctx: Arc<Context>| async move {
            ctx.ok(&json!({}));
            Ok(())
        });

        let res = app
            .dispatch(
                RequestBuilder::new(Method::Options, "/things")
                    .header("origin", "https://example.com")
                    .build(),
            )
            .await;
        // CORS finalized the preflight before the synthesized default
        assert_eq!(res.status, StatusCode::NO_CONTENT);
    }

    #[tokio::test]
    async fn test_explicit_options_route_wins_over_synthesis() {
        let mut app = app_with_boundary();
        app.get("/things", |ctx: Arc<Context>| async move {
            ctx.ok(&json!({}));
            Ok(())
        });
        app.options("/things", |ctx: Arc<Context>| async move {
            ctx.send(StatusCode::OK, &json!({"explicit": true}));
            Ok(())
        });

        let res = app
            .dispatch(RequestBuilder::new(Method::Options, "/things").build())
            .await;
        assert_eq!(body_json(&res)["explicit"], true);
    }

    #[tokio::test]
    async fn test_options_on_unknown_path_is_404() {
        let mut app = app_with_boundary();
        app.get("/known", |ctx: Arc<Context>| async move {
            ctx.ok(&json!({}));
            Ok(())
        });

        let res = app
            .dispatch(RequestBuilder::new(Method::Options, "/unknown").build())
            .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_unmatched_path_runs_global_middleware() {
        let events: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));

        let mut app = App::new();
        app.middleware(Arc::new(ErrorBoundary::default()));
        app.middleware(probe(events.clone(), "global"));

        let res = app
            .dispatch(RequestBuilder::new(Method::Get, "/nowhere").build())
            .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
        let body = body_json(&res);
        assert_eq!(body["error"], "Not Found");
        assert_eq!(body["status"], 404);
        assert_eq!(*events.lock(), vec!["global"]);
    }

    #[tokio::test]
    async fn test_error_without_boundary_still_answered() {
        // No boundary installed: the dispatcher's backstop renders the
        // shape instead of crashing or hanging the transport
        let mut app = App::new();
        app.get("/fails", |_ctx: Arc<Context>| async move {
            Err(HttpError::conflict("ledger-3"))
        });

        let res = app
            .dispatch(RequestBuilder::new(Method::Get, "/fails").build())
            .await;
        assert_eq!(res.status, StatusCode::CONFLICT);
        assert_eq!(body_json(&res)["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn test_handler_that_never_writes_falls_through() {
        let mut app = app_with_boundary();
        app.get("/silent", |_ctx: Arc<Context>| async move { Ok(()) });

        let res = app
            .dispatch(RequestBuilder::new(Method::Get, "/silent").build())
            .await;
        assert_eq!(res.status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_trailing_slash_collapses() {
        let mut app = app_with_boundary();
        app.get("/a/b", |ctx: Arc<Context>| async move {
            ctx.ok(&json!({}));
            Ok(())
        });

        let res = app
            .dispatch(RequestBuilder::new(Method::Get, "/a//b/").build())
            .await;
        assert_eq!(res.status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_query_reaches_handler() {
        let mut app = app_with_boundary();
        app.get("/search", |ctx: Arc<Context>| async move {
            let q = ctx.query_param("q").unwrap_or_default().to_string();
            ctx.ok(&json!({ "q": q }));
            Ok(())
        });

        let res = app
            .dispatch(
                RequestBuilder::new(Method::Get, "/search")
                    .query("q=trie%20router")
                    .build(),
            )
            .await;
        assert_eq!(body_json(&res)["q"], "trie router");
    }
}
