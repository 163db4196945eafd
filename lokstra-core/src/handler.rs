use crate::binding::Bindable;
use crate::context::Context;
use crate::error::LokstraError;
use crate::formatter::{ApiErrorInfo, Formatter};
use crate::route::{BoxFuture, HandlerFn};
use lokstra_http::{IntoResponse, Response, StatusCode};
use std::future::Future;
use std::sync::Arc;

/// Routes a handler's returned data through the request's captured
/// `Formatter` instead of a fixed `IntoResponse` impl, the way
/// `Context::api().ok(data)` does (§4.F). A value that serializes to
/// `null` — chiefly `()`, the "no data" return — still yields the spec's
/// literal empty 204 rather than a `{"data": null}` envelope.
fn respond_with_data<T: serde::Serialize>(formatter: &dyn Formatter, data: T) -> Response {
    match serde_json::to_value(&data) {
        Ok(serde_json::Value::Null) => ().into_response(),
        Ok(value) => formatter.success(value),
        Err(err) => formatter.error(
            StatusCode::INTERNAL_SERVER_ERROR,
            &ApiErrorInfo::new("INTERNAL_ERROR", format!("failed to serialize response: {err}")),
        ),
    }
}

/// A domain error a handler returns instead of reaching for
/// `LokstraError::Internal` directly, carrying the status code the caller
/// wants preserved on the wire.
pub struct ApiError {
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        ApiError { status, message: message.into() }
    }
}

impl From<ApiError> for LokstraError {
    fn from(err: ApiError) -> Self {
        LokstraError::Api { status: err.status, message: err.message }
    }
}

/// Marker-dispatched conversion from one of the nine handler call shapes
/// into the canonical `HandlerFn`. Sealed so downstream crates can't add
/// their own marker and silently change dispatch.
///
/// The nine shapes mirror axum's own extractor-marker trick, narrowed to
/// what this router's handler contract actually needs. `R`/`Fut::Output`
/// being `()` is how the "err-only" shapes (`() -> err`, `(*Ctx) -> err`,
/// `(*T) -> err`, `(*Ctx, *T) -> err`) fall out of the `(data, err)`
/// shapes below rather than needing their own impls — `().into_response()`
/// is the spec's "no response already written yields an empty 204":
///
/// 1/2. `Fn() -> R` / `Fn() -> Result<R, E>` (sync, no args)
/// 3/4. `Fn(T) -> Result<R, E>` where `T: Bindable` (sync, request struct)
/// 5/6. `Fn(Context) -> R` / `Fn(Context) -> Result<R, E>` (sync, context)
/// 7/8. `Fn(Context, T) -> Result<R, E>` where `T: Bindable` (sync, both)
/// — each of the above also has an async (`Fut: Future<Output = ...>`)
/// counterpart, for ten additional blanket impls covering the same nine
/// logical shapes in both sync and async form.
/// 9. `Raw(Fn(Context) -> Fut<Output = Response>)` (the raw `(w, r)` form —
///    full manual control of the response, no adapter-side conversion) and
///    `Fn(Context) -> BoxFuture<Result<Response, LokstraError>>` (the
///    canonical form itself — already-adapted handlers pass through as-is)
pub trait IntoHandler<Marker>: Send + Sync + Sized + 'static {
    fn into_handler(self) -> HandlerFn;
}

pub struct ViaSync;
pub struct ViaSyncCtx;
pub struct ViaAsync;
pub struct ViaAsyncCtx;
pub struct ViaSyncResult;
pub struct ViaSyncCtxResult;
pub struct ViaAsyncResult;
pub struct ViaAsyncCtxResult;
pub struct ViaCanonical;
pub struct ViaSyncBindResult;
pub struct ViaSyncCtxBindResult;
pub struct ViaAsyncBindResult;
pub struct ViaAsyncCtxBindResult;
pub struct ViaRaw;

// 1. Fn() -> R
impl<F, R> IntoHandler<ViaSync> for F
where
    F: Fn() -> R + Send + Sync + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(move |_ctx| {
            let resp = self().into_response();
            Box::pin(async move { Ok(resp) })
        })
    }
}

// 2. Fn(Context) -> R
impl<F, R> IntoHandler<ViaSyncCtx> for F
where
    F: Fn(Context) -> R + Send + Sync + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(move |ctx| {
            let resp = self(ctx).into_response();
            Box::pin(async move { Ok(resp) })
        })
    }
}

// 5. Fn() -> Result<R, E>
impl<F, R, E> IntoHandler<ViaSyncResult> for F
where
    F: Fn() -> Result<R, E> + Send + Sync + 'static,
    R: serde::Serialize + Send + 'static,
    E: Into<LokstraError> + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(move |ctx| {
            let result = self()
                .map(|data| respond_with_data(&*ctx.formatter(), data))
                .map_err(Into::into);
            Box::pin(async move { result })
        })
    }
}

// 6. Fn(Context) -> Result<R, E>
impl<F, R, E> IntoHandler<ViaSyncCtxResult> for F
where
    F: Fn(Context) -> Result<R, E> + Send + Sync + 'static,
    R: serde::Serialize + Send + 'static,
    E: Into<LokstraError> + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(move |ctx| {
            let formatter = ctx.formatter();
            let result = self(ctx)
                .map(|data| respond_with_data(&*formatter, data))
                .map_err(Into::into);
            Box::pin(async move { result })
        })
    }
}

// 4. Fn(Context) -> Fut (async, no Result)
impl<F, Fut, R> IntoHandler<ViaAsyncCtx> for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(move |ctx| {
            let fut = self(ctx);
            Box::pin(async move { Ok(fut.await.into_response()) })
        })
    }
}

// 3. Fn() -> Fut (async, no args, no Result)
impl<F, Fut, R> IntoHandler<ViaAsync> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = R> + Send + 'static,
    R: IntoResponse + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(move |_ctx| {
            let fut = self();
            Box::pin(async move { Ok(fut.await.into_response()) })
        })
    }
}

// 8. Fn(Context) -> Fut, Fut: Future<Output = Result<R, E>>
impl<F, Fut, R, E> IntoHandler<ViaAsyncCtxResult> for F
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: serde::Serialize + Send + 'static,
    E: Into<LokstraError> + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(move |ctx| {
            let formatter = ctx.formatter();
            let fut = self(ctx);
            Box::pin(async move {
                fut.await
                    .map(|data| respond_with_data(&*formatter, data))
                    .map_err(Into::into)
            })
        })
    }
}

// 7. Fn() -> Fut, Fut: Future<Output = Result<R, E>>
impl<F, Fut, R, E> IntoHandler<ViaAsyncResult> for F
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    R: serde::Serialize + Send + 'static,
    E: Into<LokstraError> + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(move |ctx| {
            let fut = self();
            Box::pin(async move {
                fut.await
                    .map(|data| respond_with_data(&*ctx.formatter(), data))
                    .map_err(Into::into)
            })
        })
    }
}

// 9. Already-canonical form: Fn(Context) -> BoxFuture<Result<Response, LokstraError>>
impl<F> IntoHandler<ViaCanonical> for F
where
    F: Fn(Context) -> BoxFuture<Result<Response, LokstraError>> + Send + Sync + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(self)
    }
}

// 3/4. Fn(T) -> Result<R, E>, T: Bindable. `BindAll(T)` runs before the
// handler is ever called; a binding failure short-circuits straight to a
// `LokstraError::Binding` response without touching the handler body.
impl<F, T, R, E> IntoHandler<ViaSyncBindResult> for F
where
    F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    T: Bindable + Send + 'static,
    R: serde::Serialize + Send + 'static,
    E: Into<LokstraError> + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(move |ctx| {
            let bound = T::bind(&ctx);
            let result = bound.map_err(LokstraError::Binding).and_then(|value| {
                self(value).map(|data| respond_with_data(&*ctx.formatter(), data)).map_err(Into::into)
            });
            Box::pin(async move { result })
        })
    }
}

// 7/8. Fn(Context, T) -> Result<R, E>, T: Bindable.
impl<F, T, R, E> IntoHandler<ViaSyncCtxBindResult> for F
where
    F: Fn(Context, T) -> Result<R, E> + Send + Sync + 'static,
    T: Bindable + Send + 'static,
    R: serde::Serialize + Send + 'static,
    E: Into<LokstraError> + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(move |ctx| {
            let formatter = ctx.formatter();
            let bound = T::bind(&ctx);
            let result = bound.map_err(LokstraError::Binding).and_then(|value| {
                self(ctx.clone(), value).map(|data| respond_with_data(&*formatter, data)).map_err(Into::into)
            });
            Box::pin(async move { result })
        })
    }
}

// Async counterpart of 3/4: Fn(T) -> Fut, Fut: Future<Output = Result<R, E>>.
impl<F, Fut, T, R, E> IntoHandler<ViaAsyncBindResult> for F
where
    F: Fn(T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    T: Bindable + Send + 'static,
    R: serde::Serialize + Send + 'static,
    E: Into<LokstraError> + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(move |ctx| {
            let bound = T::bind(&ctx);
            let fut = bound.map(|value| self(value));
            Box::pin(async move {
                match fut {
                    Ok(fut) => fut.await.map(|data| respond_with_data(&*ctx.formatter(), data)).map_err(Into::into),
                    Err(resp) => Err(LokstraError::Binding(resp)),
                }
            })
        })
    }
}

// Async counterpart of 7/8: Fn(Context, T) -> Fut, Fut: Future<Output = Result<R, E>>.
impl<F, Fut, T, R, E> IntoHandler<ViaAsyncCtxBindResult> for F
where
    F: Fn(Context, T) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<R, E>> + Send + 'static,
    T: Bindable + Send + 'static,
    R: serde::Serialize + Send + 'static,
    E: Into<LokstraError> + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        Arc::new(move |ctx| {
            let formatter = ctx.formatter();
            let bound = T::bind(&ctx);
            let fut = bound.map(|value| self(ctx.clone(), value));
            Box::pin(async move {
                match fut {
                    Ok(fut) => fut.await.map(|data| respond_with_data(&*formatter, data)).map_err(Into::into),
                    Err(resp) => Err(LokstraError::Binding(resp)),
                }
            })
        })
    }
}

/// Wraps a raw `(Context) -> Response` handler with no adapter-side error
/// conversion or formatting — the Rust analog of the spec's raw `(w, r)`
/// form. Middleware still runs around it; the handler alone owns the
/// response from status line to body.
pub struct Raw<F>(pub F);

impl<F, Fut> IntoHandler<ViaRaw> for Raw<F>
where
    F: Fn(Context) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    fn into_handler(self) -> HandlerFn {
        let inner = self.0;
        Arc::new(move |ctx| {
            let fut = inner(ctx);
            Box::pin(async move { Ok(fut.await) })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request as HttpRequest;

    fn test_ctx() -> Context {
        let (parts, _) = HttpRequest::builder()
            .uri("/")
            .body(())
            .unwrap()
            .into_parts();
        let request = lokstra_http::Request {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body: bytes::Bytes::new(),
            request_id: uuid::Uuid::new_v4(),
        };
        Context::new(request, Default::default(), tokio_util::sync::CancellationToken::new(), None)
    }

    #[tokio::test]
    async fn sync_no_args_shape_dispatches() {
        fn handler() -> &'static str {
            "hello"
        }
        let h = IntoHandler::into_handler(handler);
        let resp = h(test_ctx()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn sync_ctx_result_shape_propagates_error() {
        fn handler(_ctx: Context) -> Result<&'static str, ApiError> {
            Err(ApiError::new(StatusCode::IM_A_TEAPOT, "nope"))
        }
        let h = IntoHandler::into_handler(handler);
        let err = h(test_ctx()).await.unwrap_err();
        match err {
            LokstraError::Api { status, .. } => assert_eq!(status, StatusCode::IM_A_TEAPOT),
            other => panic!("expected Api error, got {other}"),
        }
    }

    #[tokio::test]
    async fn async_ctx_shape_dispatches() {
        async fn handler(_ctx: Context) -> &'static str {
            "hi"
        }
        let h = IntoHandler::into_handler(handler);
        let resp = h(test_ctx()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn async_ctx_result_shape_propagates_ok() {
        async fn handler(_ctx: Context) -> Result<&'static str, ApiError> {
            Ok("hi")
        }
        let h = IntoHandler::into_handler(handler);
        let resp = h(test_ctx()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    struct Id {
        id: String,
    }

    impl Bindable for Id {
        fn bind(ctx: &Context) -> Result<Self, crate::validation::ValidationErrorResponse> {
            match ctx.path_param("id") {
                Some(id) => Ok(Id { id: id.to_string() }),
                None => Err(crate::validation::ValidationErrorResponse {
                    errors: vec![crate::binding::field_error("id", "missing path parameter")],
                }),
            }
        }
    }

    fn ctx_with_id(id: &str) -> Context {
        let (parts, _) = HttpRequest::builder().uri("/").body(()).unwrap().into_parts();
        let request = lokstra_http::Request {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body: bytes::Bytes::new(),
            request_id: uuid::Uuid::new_v4(),
        };
        let mut params = std::collections::HashMap::new();
        params.insert("id".to_string(), id.to_string());
        Context::new(request, params, tokio_util::sync::CancellationToken::new(), None)
    }

    #[tokio::test]
    async fn bind_only_shape_dispatches_on_successful_bind() {
        fn handler(req: Id) -> Result<String, ApiError> {
            Ok(req.id)
        }
        let h = IntoHandler::into_handler(handler);
        let resp = h(ctx_with_id("7")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn bind_only_shape_short_circuits_on_binding_failure() {
        fn handler(req: Id) -> Result<String, ApiError> {
            Ok(req.id)
        }
        let h = IntoHandler::into_handler(handler);
        let err = h(test_ctx()).await.unwrap_err();
        assert!(matches!(err, LokstraError::Binding(_)));
    }

    #[tokio::test]
    async fn ctx_and_bind_shape_dispatches() {
        fn handler(ctx: Context, req: Id) -> Result<String, ApiError> {
            assert_eq!(ctx.path(), "/");
            Ok(req.id)
        }
        let h = IntoHandler::into_handler(handler);
        let resp = h(ctx_with_id("9")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn async_ctx_and_bind_shape_dispatches() {
        async fn handler(_ctx: Context, req: Id) -> Result<String, ApiError> {
            Ok(req.id)
        }
        let h = IntoHandler::into_handler(handler);
        let resp = h(ctx_with_id("11")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn raw_shape_bypasses_adapter_conversion() {
        let h = IntoHandler::into_handler(Raw(|_ctx: Context| async move {
            http::Response::builder()
                .status(StatusCode::IM_A_TEAPOT)
                .body(lokstra_http::Body::empty())
                .unwrap()
        }));
        let resp = h(test_ctx()).await.unwrap();
        assert_eq!(resp.status(), StatusCode::IM_A_TEAPOT);
    }
}
