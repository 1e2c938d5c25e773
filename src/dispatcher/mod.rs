//! Per-request lifecycle: resolve, run the handler, and guarantee one response.
//!
//! Each request moves through
//! `Received → Resolving → (Matched | Unmatched) → HandlerRunning → (Responded | Faulted) → Completed`.
//!
//! - Unmatched requests get a synthesized `404`, or `405` with an `Allow` header
//!   when the path is routed under other methods. No handler runs.
//! - Matched requests run their handler on its own Tokio task. The first
//!   successful send on the [`RequestContext`] is forwarded immediately, even if
//!   the handler keeps working afterwards.
//! - A handler that panics, returns an error before sending, or finishes (or
//!   drops its context) without sending is answered with `500`.
//!
//! Handlers are never cancelled. A handler still running after its response went
//! out is left to finish, and any failure it reports is logged.

use std::any::Any;
use std::sync::Arc;

use tokio::sync::oneshot::error::TryRecvError;
use tokio::task::{JoinError, JoinHandle};
use tracing::{debug, error, trace};

use crate::context::{ReplyReceiver, RequestContext};
use crate::http::{Method, Request, Response, StatusCode};
use crate::router::{HandlerResult, ResolveError, RouteTable};

/// Resolves requests against a frozen [`RouteTable`] and runs their handlers.
///
/// Cloning is cheap; every clone shares the same table.
#[derive(Debug, Clone)]
pub struct Dispatcher {
    table: Arc<RouteTable>,
}

impl Dispatcher {
    pub fn new(table: RouteTable) -> Self {
        Self {
            table: Arc::new(table),
        }
    }

    pub fn table(&self) -> &RouteTable {
        &self.table
    }

    /// Produce exactly one response for `request`.
    ///
    /// Never fails: routing misses and handler faults become error responses.
    pub async fn dispatch(&self, request: Request) -> Response {
        let path = request.path().to_owned();
        trace!(method = %request.method_str(), %path, "request received");

        let resolved = match request.method() {
            Some(method) => self.table.resolve(method, &path),
            None => Err(self.table.unroutable(&path)),
        };

        let found = match resolved {
            Ok(found) => found,
            Err(miss) => {
                debug!(method = %request.method_str(), %path, reason = %miss, "unmatched");
                return unmatched(miss);
            }
        };

        let route = found.entry.pattern().as_str().to_owned();
        let handler = Arc::clone(found.entry.handler());
        let (ctx, reply) = RequestContext::new(request, Some(found.params));

        trace!(%route, %path, "handler running");
        let task = tokio::spawn(handler(ctx));
        let response = await_reply(task, reply, &route, &path).await;
        trace!(%route, %path, status = response.status().as_u16(), "completed");
        response
    }
}

async fn await_reply(
    mut task: JoinHandle<HandlerResult>,
    mut reply: ReplyReceiver,
    route: &str,
    path: &str,
) -> Response {
    tokio::select! {
        biased;

        sent = &mut reply => match sent {
            Ok(reply) => {
                debug!(%route, %path, "responded");
                tokio::spawn(observe_after_reply(task, route.to_owned(), path.to_owned()));
                reply.into_response()
            }
            Err(_) => {
                error!(%route, %path, "handler dropped its request context without responding");
                tokio::spawn(observe_after_reply(task, route.to_owned(), path.to_owned()));
                fault()
            }
        },

        joined = &mut task => {
            match reply.try_recv() {
                Ok(sent) => {
                    report_late(joined, route, path);
                    debug!(%route, %path, "responded");
                    sent.into_response()
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => {
                    match joined {
                        Ok(Ok(())) => {
                            error!(%route, %path, "handler returned without sending a response");
                        }
                        Ok(Err(e)) => error!(%route, %path, error = %e, "handler failed"),
                        Err(e) => report_join_error(e, route, path),
                    }
                    fault()
                }
            }
        }
    }
}

// Log whatever a handler did after its reply had already been committed.
fn report_late(joined: Result<HandlerResult, JoinError>, route: &str, path: &str) {
    match joined {
        Ok(Ok(())) => {}
        Ok(Err(e)) => error!(%route, %path, error = %e, "handler failed after responding"),
        Err(e) => report_join_error(e, route, path),
    }
}

async fn observe_after_reply(task: JoinHandle<HandlerResult>, route: String, path: String) {
    report_late(task.await, &route, &path);
}

fn report_join_error(e: JoinError, route: &str, path: &str) {
    if e.is_panic() {
        let message = panic_message(e.into_panic());
        error!(%route, %path, panic = %message, "handler panicked");
    } else {
        error!(%route, %path, error = %e, "handler task cancelled");
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

fn unmatched(miss: ResolveError) -> Response {
    match miss {
        ResolveError::NotFound => Response::new(StatusCode::NotFound).body("Not Found"),
        ResolveError::MethodNotAllowed { allowed } => {
            let allow = allowed
                .iter()
                .map(|m| Method::as_str(*m))
                .collect::<Vec<_>>()
                .join(", ");
            Response::new(StatusCode::MethodNotAllowed)
                .header("Allow", allow)
                .body("Method Not Allowed")
        }
    }
}

fn fault() -> Response {
    Response::new(StatusCode::InternalServerError).body("Internal Server Error")
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;

    use super::*;
    use crate::Router;
    use crate::context::ContextError;
    use crate::router::HandlerError;

    fn text(response: &Response) -> &str {
        std::str::from_utf8(response.payload()).unwrap()
    }

    async fn echo_params(mut ctx: RequestContext) -> HandlerResult {
        let params = ctx.params().cloned().unwrap_or_default();
        ctx.send_json(&params)?;
        Ok(())
    }

    async fn silent(_ctx: RequestContext) -> HandlerResult {
        Ok(())
    }

    async fn failing(_ctx: RequestContext) -> HandlerResult {
        Err("database unavailable".into())
    }

    async fn panicking(_ctx: RequestContext) -> HandlerResult {
        panic!("handler bug");
    }

    async fn ok(mut ctx: RequestContext) -> HandlerResult {
        ctx.send_text("ok")?;
        Ok(())
    }

    fn dispatcher(configure: impl FnOnce(&mut Router)) -> Dispatcher {
        let mut router = Router::new();
        configure(&mut router);
        router.into_dispatcher()
    }

    #[tokio::test]
    async fn matched_route_gets_its_params() {
        let d = dispatcher(|r| r.get("/a/:x/:y", echo_params).unwrap());
        let res = d.dispatch(Request::new("GET", "/a/1/2")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(res.headers().get("content-type"), Some("application/json"));
        let body: serde_json::Value = serde_json::from_slice(res.payload()).unwrap();
        assert_eq!(body, serde_json::json!({"x": "1", "y": "2"}));
    }

    #[tokio::test]
    async fn unknown_path_is_404() {
        let d = dispatcher(|r| r.get("/users/:id", ok).unwrap());
        let res = d.dispatch(Request::new("GET", "/users/1/edit")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
        assert_eq!(text(&res), "Not Found");
    }

    #[tokio::test]
    async fn empty_router_is_404() {
        let d = Router::new().into_dispatcher();
        let res = d.dispatch(Request::new("GET", "/")).await;
        assert_eq!(res.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn wrong_method_is_405_with_allow() {
        let d = dispatcher(|r| {
            r.get("/items/:id", ok).unwrap();
            r.delete("/items/:id", ok).unwrap();
        });
        let res = d.dispatch(Request::new("POST", "/items/3")).await;
        assert_eq!(res.status(), StatusCode::MethodNotAllowed);
        assert_eq!(res.headers().get("allow"), Some("GET, DELETE"));
    }

    #[tokio::test]
    async fn unsupported_method_token() {
        let d = dispatcher(|r| r.get("/items", ok).unwrap());
        let routed = d.dispatch(Request::new("HEAD", "/items")).await;
        assert_eq!(routed.status(), StatusCode::MethodNotAllowed);
        let unrouted = d.dispatch(Request::new("HEAD", "/nothing")).await;
        assert_eq!(unrouted.status(), StatusCode::NotFound);
    }

    #[tokio::test]
    async fn handler_without_response_is_500() {
        let d = dispatcher(|r| r.get("/silent", silent).unwrap());
        let res = d.dispatch(Request::new("GET", "/silent")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn handler_error_is_500() {
        let d = dispatcher(|r| r.get("/fail", failing).unwrap());
        let res = d.dispatch(Request::new("GET", "/fail")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn panic_is_contained_and_serving_continues() {
        let d = dispatcher(|r| {
            r.get("/boom", panicking).unwrap();
            r.get("/ok", ok).unwrap();
        });
        let res = d.dispatch(Request::new("GET", "/boom")).await;
        assert_eq!(res.status(), StatusCode::InternalServerError);

        let res = d.dispatch(Request::new("GET", "/ok")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(text(&res), "ok");
    }

    #[tokio::test]
    async fn error_after_send_keeps_the_response() {
        let d = dispatcher(|r| {
            r.get("/late", |mut ctx: RequestContext| async move {
                ctx.send_text("done")?;
                Err::<(), HandlerError>("cleanup failed".into())
            })
            .unwrap();
        });
        let res = d.dispatch(Request::new("GET", "/late")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(text(&res), "done");
    }

    #[tokio::test]
    async fn second_send_does_not_alter_the_response() {
        let d = dispatcher(|r| {
            r.get("/twice", |mut ctx: RequestContext| async move {
                ctx.send_text("first")?;
                let second = ctx.send_bytes("application/octet-stream", Bytes::from_static(b"x"));
                assert!(matches!(second, Err(ContextError::AlreadyResponded)));
                Ok(())
            })
            .unwrap();
        });
        let res = d.dispatch(Request::new("GET", "/twice")).await;
        assert_eq!(res.status(), StatusCode::Ok);
        assert_eq!(text(&res), "first");
        assert_eq!(
            res.headers().get("content-type"),
            Some("text/plain; charset=utf-8")
        );
    }

    #[tokio::test]
    async fn response_is_forwarded_before_handler_finishes() {
        let d = dispatcher(|r| {
            r.get("/slow", |mut ctx: RequestContext| async move {
                ctx.send_text("early")?;
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .unwrap();
        });
        let res = tokio::time::timeout(
            Duration::from_secs(5),
            d.dispatch(Request::new("GET", "/slow")),
        )
        .await
        .expect("response waited for the handler to finish");
        assert_eq!(text(&res), "early");
    }

    #[tokio::test]
    async fn dropped_context_is_500() {
        let d = dispatcher(|r| {
            r.get("/drop", |ctx: RequestContext| async move {
                drop(ctx);
                tokio::time::sleep(Duration::from_secs(30)).await;
                Ok(())
            })
            .unwrap();
        });
        let res = tokio::time::timeout(
            Duration::from_secs(5),
            d.dispatch(Request::new("GET", "/drop")),
        )
        .await
        .unwrap();
        assert_eq!(res.status(), StatusCode::InternalServerError);
    }

    #[tokio::test]
    async fn handler_reads_headers_and_body() {
        let d = dispatcher(|r| {
            r.post("/echo", |mut ctx: RequestContext| async move {
                let kind = ctx.header("content-type").unwrap_or("none").to_owned();
                let body = ctx.body().await.unwrap_or_default();
                ctx.send_bytes(kind, body)?;
                Ok(())
            })
            .unwrap();
        });
        let request = Request::new("POST", "/echo")
            .header("Content-Type", "application/x-test")
            .body("ping");
        let res = d.dispatch(request).await;
        assert_eq!(res.headers().get("content-type"), Some("application/x-test"));
        assert_eq!(text(&res), "ping");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_requests_do_not_cross_talk() {
        let d = dispatcher(|r| {
            r.post("/n/:id", |mut ctx: RequestContext| async move {
                let id = ctx.param("id").unwrap_or_default().to_owned();
                tokio::task::yield_now().await;
                let body = ctx.body().await.unwrap_or_default();
                let body = String::from_utf8_lossy(&body).into_owned();
                ctx.send_text(format!("{id}:{body}"))?;
                Ok(())
            })
            .unwrap();
        });

        let tasks: Vec<_> = (0..64)
            .map(|i| {
                let d = d.clone();
                tokio::spawn(async move {
                    let request = Request::new("POST", &format!("/n/{i}")).body(format!("body-{i}"));
                    (i, d.dispatch(request).await)
                })
            })
            .collect();

        for task in tasks {
            let (i, res) = task.await.unwrap();
            assert_eq!(res.status(), StatusCode::Ok);
            assert_eq!(text(&res), format!("{i}:body-{i}"));
        }
    }
}
