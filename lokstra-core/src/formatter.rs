use crate::validation::{FieldError, ValidationErrorResponse};
use dashmap::DashMap;
use lokstra_http::{HeaderMap, IntoResponse, Json, Response, StatusCode};
use serde_json::Value;
use std::sync::Arc;

/// Pagination metadata carried by the `api` envelope's `meta.list` field and
/// returned verbatim by the `simple`/`legacy` formatters' list payload.
#[derive(Debug, Clone, Default)]
pub struct ListMeta {
    pub page: Option<u64>,
    pub per_page: Option<u64>,
    pub total: Option<u64>,
}

impl ListMeta {
    fn to_json(&self) -> Value {
        serde_json::json!({
            "page": self.page,
            "per_page": self.per_page,
            "total": self.total,
        })
    }
}

/// The server-side shape of a domain error, independent of which envelope a
/// `Formatter` ends up wrapping it in.
#[derive(Debug, Clone)]
pub struct ApiErrorInfo {
    pub code: String,
    pub message: String,
    pub details: Option<Value>,
    pub fields: Option<Vec<FieldError>>,
}

impl ApiErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        ApiErrorInfo { code: code.into(), message: message.into(), details: None, fields: None }
    }

    pub fn with_fields(mut self, fields: Vec<FieldError>) -> Self {
        self.fields = Some(fields);
        self
    }
}

/// The client-side inverse of a `Formatter`'s envelope: what `ParseClientResponse`
/// populates from an HTTP response, whatever shape it arrived in.
#[derive(Debug, Clone)]
pub struct ClientResponse {
    pub status_code: u16,
    pub data: Option<Value>,
    pub message: Option<String>,
    pub error: Option<ApiErrorInfo>,
    pub meta: Option<Value>,
    pub headers: HeaderMap,
    pub raw_body: Vec<u8>,
}

/// A capability set, not just an encoder: `Success`/`Created`/`List` shape
/// a payload that already succeeded; `Error`/`ValidationError`/`NotFound`
/// shape the corresponding `LokstraError` variant; `ParseClientResponse` is
/// the client-side inverse, used by [`crate::proxy::ClientRouter`].
/// Registered by name so a route/group can opt into a non-default
/// formatter, e.g. to match a legacy API's response shape during migration.
pub trait Formatter: Send + Sync {
    fn success(&self, data: Value) -> Response;

    /// Defaults to `success` with the status overridden to 201; formatters
    /// whose envelope doesn't carry a status code at all (`simple`) can
    /// leave this as the default.
    fn created(&self, data: Value) -> Response {
        let mut resp = self.success(data);
        *resp.status_mut() = StatusCode::CREATED;
        resp
    }

    fn error(&self, status: StatusCode, info: &ApiErrorInfo) -> Response;

    fn validation_error(&self, errors: &ValidationErrorResponse) -> Response;

    fn not_found(&self, message: &str) -> Response;

    fn list(&self, data: Value, meta: &ListMeta) -> Response;

    fn parse_client_response(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ClientResponse, String>;
}

fn validation_error_info(errors: &ValidationErrorResponse) -> ApiErrorInfo {
    ApiErrorInfo::new("VALIDATION_ERROR", "validation failed").with_fields(errors.errors.clone())
}

/// `{ "status": "success"|"error", "data", "message"?, "error"?, "meta"? }` —
/// the envelope documented in spec §6 under the name `api`.
pub struct ApiFormatter;

impl Formatter for ApiFormatter {
    fn success(&self, data: Value) -> Response {
        Json(serde_json::json!({ "status": "success", "data": data })).into_response()
    }

    fn error(&self, status: StatusCode, info: &ApiErrorInfo) -> Response {
        let mut error = serde_json::json!({ "code": info.code, "message": info.message });
        if let Some(details) = &info.details {
            error["details"] = details.clone();
        }
        if let Some(fields) = &info.fields {
            error["fields"] = serde_json::to_value(fields).unwrap_or(Value::Null);
        }
        let body = serde_json::json!({ "status": "error", "error": error });
        (status, Json(body)).into_response()
    }

    fn validation_error(&self, errors: &ValidationErrorResponse) -> Response {
        self.error(StatusCode::BAD_REQUEST, &validation_error_info(errors))
    }

    fn not_found(&self, message: &str) -> Response {
        self.error(StatusCode::NOT_FOUND, &ApiErrorInfo::new("NOT_FOUND", message))
    }

    fn list(&self, data: Value, meta: &ListMeta) -> Response {
        Json(serde_json::json!({
            "status": "success",
            "data": data,
            "meta": { "list": meta.to_json() },
        }))
        .into_response()
    }

    fn parse_client_response(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ClientResponse, String> {
        let parsed: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
        let error = parsed.get("error").and_then(|e| {
            Some(ApiErrorInfo {
                code: e.get("code")?.as_str()?.to_string(),
                message: e.get("message")?.as_str().unwrap_or_default().to_string(),
                details: e.get("details").cloned(),
                fields: e
                    .get("fields")
                    .and_then(|f| serde_json::from_value(f.clone()).ok()),
            })
        });
        Ok(ClientResponse {
            status_code: status.as_u16(),
            data: parsed.get("data").cloned(),
            message: parsed.get("message").and_then(|m| m.as_str()).map(str::to_string),
            error,
            meta: parsed.get("meta").cloned(),
            headers: headers.clone(),
            raw_body: body.to_vec(),
        })
    }
}

/// Success → the payload verbatim; error → `{ "error", "code", "details"?, "fields"? }`.
pub struct SimpleFormatter;

impl Formatter for SimpleFormatter {
    fn success(&self, data: Value) -> Response {
        Json(data).into_response()
    }

    fn error(&self, status: StatusCode, info: &ApiErrorInfo) -> Response {
        let mut body = serde_json::json!({ "error": info.message, "code": info.code });
        if let Some(details) = &info.details {
            body["details"] = details.clone();
        }
        if let Some(fields) = &info.fields {
            body["fields"] = serde_json::to_value(fields).unwrap_or(Value::Null);
        }
        (status, Json(body)).into_response()
    }

    fn validation_error(&self, errors: &ValidationErrorResponse) -> Response {
        self.error(StatusCode::BAD_REQUEST, &validation_error_info(errors))
    }

    fn not_found(&self, message: &str) -> Response {
        self.error(StatusCode::NOT_FOUND, &ApiErrorInfo::new("NOT_FOUND", message))
    }

    fn list(&self, data: Value, _meta: &ListMeta) -> Response {
        Json(data).into_response()
    }

    fn parse_client_response(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ClientResponse, String> {
        let parsed: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
        if !status.is_success() {
            let error = Some(ApiErrorInfo {
                code: parsed.get("code").and_then(|c| c.as_str()).unwrap_or("ERROR").to_string(),
                message: parsed.get("error").and_then(|m| m.as_str()).unwrap_or_default().to_string(),
                details: parsed.get("details").cloned(),
                fields: parsed
                    .get("fields")
                    .and_then(|f| serde_json::from_value(f.clone()).ok()),
            });
            return Ok(ClientResponse {
                status_code: status.as_u16(),
                data: None,
                message: None,
                error,
                meta: None,
                headers: headers.clone(),
                raw_body: body.to_vec(),
            });
        }
        Ok(ClientResponse {
            status_code: status.as_u16(),
            data: Some(parsed),
            message: None,
            error: None,
            meta: None,
            headers: headers.clone(),
            raw_body: body.to_vec(),
        })
    }
}

/// Success → `{ "success": true, "result": <payload> }`; error →
/// `{ "success": false, "errorCode", "errorMsg" }` — matching an older
/// client integration's expected shape during migration.
pub struct LegacyFormatter;

impl Formatter for LegacyFormatter {
    fn success(&self, data: Value) -> Response {
        Json(serde_json::json!({ "success": true, "result": data })).into_response()
    }

    fn error(&self, status: StatusCode, info: &ApiErrorInfo) -> Response {
        let body = serde_json::json!({
            "success": false,
            "errorCode": info.code,
            "errorMsg": info.message,
        });
        (status, Json(body)).into_response()
    }

    fn validation_error(&self, errors: &ValidationErrorResponse) -> Response {
        self.error(StatusCode::BAD_REQUEST, &validation_error_info(errors))
    }

    fn not_found(&self, message: &str) -> Response {
        self.error(StatusCode::NOT_FOUND, &ApiErrorInfo::new("NOT_FOUND", message))
    }

    fn list(&self, data: Value, _meta: &ListMeta) -> Response {
        self.success(data)
    }

    fn parse_client_response(
        &self,
        status: StatusCode,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ClientResponse, String> {
        let parsed: Value = serde_json::from_slice(body).map_err(|e| e.to_string())?;
        if !status.is_success() {
            let error = Some(ApiErrorInfo {
                code: parsed.get("errorCode").and_then(|c| c.as_str()).unwrap_or("ERROR").to_string(),
                message: parsed.get("errorMsg").and_then(|m| m.as_str()).unwrap_or_default().to_string(),
                details: None,
                fields: None,
            });
            return Ok(ClientResponse {
                status_code: status.as_u16(),
                data: None,
                message: None,
                error,
                meta: None,
                headers: headers.clone(),
                raw_body: body.to_vec(),
            });
        }
        Ok(ClientResponse {
            status_code: status.as_u16(),
            data: parsed.get("result").cloned(),
            message: None,
            error: None,
            meta: None,
            headers: headers.clone(),
            raw_body: body.to_vec(),
        })
    }
}

/// Concurrent, read-biased registry of named formatters plus a default
/// switch, the same role the teacher's `MetaRegistry` plays for type-erased
/// per-type metadata, narrowed here to one concrete trait. Mutating the
/// default has no ordering guarantee w.r.t. in-flight requests (spec §5) —
/// [`crate::context::Context`] captures a reference at handler entry so one
/// request is never formatted with two different envelopes mid-flight.
pub struct FormatterRegistry {
    formatters: DashMap<String, Arc<dyn Formatter>>,
    default: DashMap<(), String>,
}

const DEFAULT_KEY: () = ();

impl Default for FormatterRegistry {
    fn default() -> Self {
        let formatters = DashMap::new();
        formatters.insert("api".to_string(), Arc::new(ApiFormatter) as Arc<dyn Formatter>);
        formatters.insert("simple".to_string(), Arc::new(SimpleFormatter) as Arc<dyn Formatter>);
        formatters.insert("legacy".to_string(), Arc::new(LegacyFormatter) as Arc<dyn Formatter>);
        let default = DashMap::new();
        default.insert(DEFAULT_KEY, "api".to_string());
        FormatterRegistry { formatters, default }
    }
}

impl FormatterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, formatter: Arc<dyn Formatter>) {
        self.formatters.insert(name.into(), formatter);
    }

    pub fn set_default(&self, name: impl Into<String>) {
        self.default.insert(DEFAULT_KEY, name.into());
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Formatter>> {
        self.formatters.get(name).map(|entry| entry.clone())
    }

    pub fn default_formatter(&self) -> Arc<dyn Formatter> {
        let name = self
            .default
            .get(&DEFAULT_KEY)
            .map(|entry| entry.clone())
            .unwrap_or_else(|| "api".to_string());
        self.get(&name).expect("default formatter must be registered")
    }
}
