use crate::context::Context;
use crate::error::LokstraError;
use crate::route::{MiddlewareFn, Next};
use futures_util::FutureExt;
use lokstra_http::{IntoResponse, Response, StatusCode};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tracing::error;

/// CORS headers applied to every response; mirrors the teacher's `Cors`
/// plugin but as a middleware closure instead of an `AppBuilder` plugin
/// hook, to match this router's `around(ctx, next)` chain.
pub fn cors(allowed_origin: impl Into<String>) -> MiddlewareFn {
    let allowed_origin = allowed_origin.into();
    Arc::new(move |ctx: Context, next: Next| {
        let allowed_origin = allowed_origin.clone();
        Box::pin(async move {
            let mut resp = next(ctx).await?;
            resp.headers_mut().insert(
                http::header::ACCESS_CONTROL_ALLOW_ORIGIN,
                allowed_origin.parse().unwrap_or_else(|_| "*".parse().unwrap()),
            );
            Ok(resp)
        })
    })
}

/// Opens a `DEBUG`-level request span carrying method, path, and request id,
/// the same fields the teacher's `tower-http::TraceLayer` records, logged
/// directly here since the listener doesn't run a `tower::Service` stack.
pub fn tracing_span() -> MiddlewareFn {
    Arc::new(move |ctx: Context, next: Next| {
        Box::pin(async move {
            let span = tracing::debug_span!(
                "request",
                method = %ctx.method(),
                path = %ctx.path(),
                request_id = %ctx.request_id(),
            );
            let _enter = span.enter();
            tracing::debug!("request started");
            let result = next(ctx).await;
            match &result {
                Ok(resp) => tracing::debug!(status = %resp.status(), "request completed"),
                Err(err) => tracing::debug!(%err, "request failed"),
            }
            result
        })
    })
}

/// Catches handler panics and turns them into a 500, logging the captured
/// payload. Installed as the outermost middleware by the builder — mirrors
/// the teacher's `tower-http::catch_panic` feature.
pub fn recovery() -> MiddlewareFn {
    Arc::new(move |ctx: Context, next: Next| {
        Box::pin(async move {
            match AssertUnwindSafe(next(ctx)).catch_unwind().await {
                Ok(result) => result,
                Err(panic) => {
                    let message = panic_message(&panic);
                    error!(panic = %message, "handler panicked, recovering with 500");
                    Ok(internal_error_response())
                }
            }
        })
    })
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

fn internal_error_response() -> Response {
    let body = serde_json::json!({ "error": "internal server error" });
    (StatusCode::INTERNAL_SERVER_ERROR, lokstra_http::Json(body)).into_response()
}

/// A request-rejecting guard, e.g. role/scope checks, run before the
/// handler. Returning `Err` short-circuits the chain and skips `next`
/// entirely.
pub trait Guard: Send + Sync + 'static {
    fn check(&self, ctx: &Context) -> Result<(), LokstraError>;
}

/// Adapts any [`Guard`] into a [`MiddlewareFn`].
pub fn guard_middleware<G: Guard>(guard: G) -> MiddlewareFn {
    let guard = Arc::new(guard);
    Arc::new(move |ctx: Context, next: Next| {
        let guard = guard.clone();
        Box::pin(async move {
            guard.check(&ctx)?;
            next(ctx).await
        })
    })
}

/// A guard that requires a role previously stashed on the context's storage
/// map (by an authentication middleware earlier in the chain) under the key
/// `"roles"`.
pub struct RolesGuard {
    pub required: Vec<String>,
}

impl Guard for RolesGuard {
    fn check(&self, ctx: &Context) -> Result<(), LokstraError> {
        let roles: Vec<String> = ctx.get("roles").unwrap_or_default();
        if self.required.iter().any(|r| roles.contains(r)) {
            Ok(())
        } else {
            Err(LokstraError::MiddlewareRejection(
                "missing required role".to_string(),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::route::BoxFuture;
    use http::Request as HttpRequest;

    fn test_ctx() -> Context {
        let (parts, _) = HttpRequest::builder().uri("/").body(()).unwrap().into_parts();
        let request = lokstra_http::Request {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body: bytes::Bytes::new(),
            request_id: uuid::Uuid::new_v4(),
        };
        Context::new(request, Default::default(), tokio_util::sync::CancellationToken::new(), None)
    }

    fn ok_next() -> Next {
        Arc::new(|_ctx| -> BoxFuture<Result<Response, LokstraError>> {
            Box::pin(async move { Ok(StatusCode::OK.into_response()) })
        })
    }

    #[tokio::test]
    async fn cors_middleware_sets_header() {
        let mw = cors("https://example.com");
        let resp = mw(test_ctx(), ok_next()).await.unwrap();
        assert_eq!(
            resp.headers().get(http::header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "https://example.com"
        );
    }

    #[tokio::test]
    async fn recovery_middleware_converts_panic_to_500() {
        let panicking_next: Next = Arc::new(|_ctx| -> BoxFuture<Result<Response, LokstraError>> {
            Box::pin(async move { panic!("boom") })
        });
        let mw = recovery();
        let resp = mw(test_ctx(), panicking_next).await.unwrap();
        assert_eq!(resp.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn roles_guard_rejects_missing_role() {
        let ctx = test_ctx();
        let mw = guard_middleware(RolesGuard { required: vec!["admin".into()] });
        let err = mw(ctx, ok_next()).await.unwrap_err();
        assert!(matches!(err, LokstraError::MiddlewareRejection(_)));
    }

    #[tokio::test]
    async fn roles_guard_allows_matching_role() {
        let ctx = test_ctx();
        ctx.set("roles", vec!["admin".to_string()]);
        let mw = guard_middleware(RolesGuard { required: vec!["admin".into()] });
        let resp = mw(ctx, ok_next()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }
}
