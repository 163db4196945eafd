use crate::formatter::{ApiErrorInfo, ApiFormatter, Formatter, ListMeta};
use crate::validation::ValidationErrorResponse;
use bytes::Bytes;
use dashmap::DashMap;
use lokstra_http::{HeaderMap, Method, Response, StatusCode};
use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// The per-request context threaded through the middleware chain and handed
/// to the final handler. Cheap to clone — everything is behind an `Arc`, so
/// middleware can hold onto a copy across an `.await` without fighting the
/// borrow checker.
#[derive(Clone)]
pub struct Context {
    inner: Arc<Inner>,
}

struct Inner {
    request_id: Uuid,
    method: Method,
    path: String,
    query: String,
    path_params: HashMap<String, String>,
    headers: HeaderMap,
    body: Bytes,
    query_cache: OnceLock<HashMap<String, String>>,
    storage: DashMap<&'static str, Box<dyn Any + Send + Sync>>,
    cancel: CancellationToken,
    deadline: Option<Instant>,
    /// The Formatter in effect for this request, captured once at dispatch
    /// entry. A `set_default` on the registry mid-flight never changes a
    /// request already in progress (spec §5, testable property 7).
    formatter: OnceLock<Arc<dyn Formatter>>,
}

impl Context {
    pub fn new(
        request: lokstra_http::Request,
        path_params: HashMap<String, String>,
        cancel: CancellationToken,
        deadline: Option<Instant>,
    ) -> Self {
        Context {
            inner: Arc::new(Inner {
                request_id: request.request_id,
                method: request.method,
                path: request.uri.path().to_string(),
                query: request.uri.query().unwrap_or("").to_string(),
                path_params,
                headers: request.headers,
                body: request.body,
                query_cache: OnceLock::new(),
                storage: DashMap::new(),
                cancel,
                deadline,
                formatter: OnceLock::new(),
            }),
        }
    }

    /// Captures the Formatter this request will use for its whole lifetime.
    /// Called once by the dispatcher before the middleware chain runs; a
    /// later call (e.g. a race with another request's dispatch setting the
    /// process-wide default) is a silent no-op — first entry wins.
    pub fn set_formatter(&self, formatter: Arc<dyn Formatter>) {
        let _ = self.inner.formatter.set(formatter);
    }

    /// The Formatter captured for this request, or `api` if none was set
    /// (e.g. constructing a bare `Context` in a test).
    pub fn formatter(&self) -> Arc<dyn Formatter> {
        self.inner
            .formatter
            .get()
            .cloned()
            .unwrap_or_else(|| Arc::new(ApiFormatter))
    }

    /// The API-layer response surface (spec §4.F): `Ok`/`Created`/`Error`/
    /// `ValidationError`/`NotFound`/`OkList`, each delegating to whichever
    /// Formatter this request captured at entry.
    pub fn api(&self) -> ApiResponder<'_> {
        ApiResponder { ctx: self }
    }

    pub fn request_id(&self) -> Uuid {
        self.inner.request_id
    }

    pub fn method(&self) -> &Method {
        &self.inner.method
    }

    pub fn path(&self) -> &str {
        &self.inner.path
    }

    pub fn path_param(&self, name: &str) -> Option<&str> {
        self.inner.path_params.get(name).map(String::as_str)
    }

    pub fn path_params(&self) -> &HashMap<String, String> {
        &self.inner.path_params
    }

    /// Lazily parses and caches the query string on first access — repeated
    /// lookups in the same request don't re-parse.
    fn query_map(&self) -> &HashMap<String, String> {
        self.inner
            .query_cache
            .get_or_init(|| form_urlencoded::parse(self.inner.query.as_bytes()).into_owned().collect())
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query_map().get(name).map(String::as_str)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.inner.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn headers(&self) -> &HeaderMap {
        &self.inner.headers
    }

    pub fn body(&self) -> &Bytes {
        &self.inner.body
    }

    pub fn json<T: serde::de::DeserializeOwned>(&self) -> Result<T, serde_json::Error> {
        serde_json::from_slice(&self.inner.body)
    }

    /// Stores a value in the request-scoped storage map, keyed by a static
    /// string (conventionally the type's name). Set by guards/middleware,
    /// read by downstream middleware or the handler.
    pub fn set<T: Send + Sync + 'static>(&self, key: &'static str, value: T) {
        self.inner.storage.insert(key, Box::new(value));
    }

    pub fn get<T: Clone + Send + Sync + 'static>(&self, key: &str) -> Option<T> {
        self.inner
            .storage
            .get(key)
            .and_then(|entry| entry.downcast_ref::<T>().cloned())
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.inner.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancel.is_cancelled()
    }

    pub fn time_remaining(&self) -> Option<Duration> {
        self.inner
            .deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }
}

/// Returned by [`Context::api`]; each method serializes `data` through
/// `serde_json` and hands it to the captured Formatter.
pub struct ApiResponder<'a> {
    ctx: &'a Context,
}

impl ApiResponder<'_> {
    pub fn ok<T: serde::Serialize>(&self, data: T) -> Response {
        self.ctx.formatter().success(to_value(data))
    }

    pub fn created<T: serde::Serialize>(&self, data: T) -> Response {
        self.ctx.formatter().created(to_value(data))
    }

    pub fn error(&self, status: StatusCode, info: &ApiErrorInfo) -> Response {
        self.ctx.formatter().error(status, info)
    }

    pub fn validation_error(&self, errors: &ValidationErrorResponse) -> Response {
        self.ctx.formatter().validation_error(errors)
    }

    pub fn not_found(&self, message: &str) -> Response {
        self.ctx.formatter().not_found(message)
    }

    pub fn ok_list<T: serde::Serialize>(&self, data: T, meta: &ListMeta) -> Response {
        self.ctx.formatter().list(to_value(data), meta)
    }
}

fn to_value<T: serde::Serialize>(data: T) -> serde_json::Value {
    serde_json::to_value(data).unwrap_or(serde_json::Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::Request as HttpRequest;

    fn ctx_for(uri: &str, params: HashMap<String, String>) -> Context {
        let (parts, _) = HttpRequest::builder()
            .method(Method::GET)
            .uri(uri)
            .body(())
            .unwrap()
            .into_parts();
        let request = lokstra_http::Request {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body: Bytes::from_static(b"{\"ok\":true}"),
            request_id: Uuid::new_v4(),
        };
        Context::new(request, params, CancellationToken::new(), None)
    }

    #[test]
    fn path_param_lookup() {
        let mut params = HashMap::new();
        params.insert("id".to_string(), "42".to_string());
        let ctx = ctx_for("/widgets/42", params);
        assert_eq!(ctx.path_param("id"), Some("42"));
        assert_eq!(ctx.path_param("missing"), None);
    }

    #[test]
    fn query_parsing_is_cached_and_correct() {
        let ctx = ctx_for("/widgets?limit=10&q=foo", HashMap::new());
        assert_eq!(ctx.query("limit"), Some("10"));
        assert_eq!(ctx.query("q"), Some("foo"));
        // second call exercises the cached path
        assert_eq!(ctx.query("limit"), Some("10"));
    }

    #[test]
    fn json_body_deserializes() {
        let ctx = ctx_for("/widgets", HashMap::new());
        #[derive(serde::Deserialize)]
        struct Body {
            ok: bool,
        }
        let body: Body = ctx.json().unwrap();
        assert!(body.ok);
    }

    #[test]
    fn storage_roundtrip() {
        let ctx = ctx_for("/widgets", HashMap::new());
        ctx.set("user_id", 7u64);
        assert_eq!(ctx.get::<u64>("user_id"), Some(7));
        assert_eq!(ctx.get::<u64>("missing"), None);
    }

    #[test]
    fn cloning_context_shares_storage() {
        let ctx = ctx_for("/widgets", HashMap::new());
        let clone = ctx.clone();
        ctx.set("seen", true);
        assert_eq!(clone.get::<bool>("seen"), Some(true));
    }

    #[test]
    fn formatter_defaults_to_api_when_unset() {
        let ctx = ctx_for("/widgets", HashMap::new());
        let resp = ctx.api().ok(serde_json::json!({"id": 1}));
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn formatter_set_is_captured_once() {
        use crate::formatter::SimpleFormatter;
        use http_body_util::BodyExt;

        let ctx = ctx_for("/widgets", HashMap::new());
        ctx.set_formatter(Arc::new(SimpleFormatter));
        ctx.set_formatter(Arc::new(ApiFormatter));
        let resp = ctx.api().ok(serde_json::json!({"id": 1}));
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        // SimpleFormatter (the first `set_formatter` call) won the race —
        // the payload is unwrapped, not nested under "data".
        assert_eq!(body["id"], 1);
        assert!(body.get("data").is_none());
    }
}
