use crate::formatter::{ApiErrorInfo, Formatter};
use crate::validation::ValidationErrorResponse;
use lokstra_http::{IntoResponse, Json, Response, StatusCode};

/// The single error type every handler, middleware, and registry operation
/// funnels into. Each variant maps to exactly one wire-level status code and
/// envelope shape; see [`IntoResponse`]'s impl below for the mapping.
pub enum LokstraError {
    /// Request binding failed: a tagged field couldn't be extracted, or
    /// `#[validate]` rejected the bound value.
    Binding(ValidationErrorResponse),
    /// A handler returned a domain error carrying its own status code.
    Api { status: StatusCode, message: String },
    NotFound(String),
    /// A middleware (guard, interceptor) rejected the request before the
    /// handler ran.
    MiddlewareRejection(String),
    Internal(String),
    /// Graceful shutdown didn't drain in-flight requests before its deadline.
    ShutdownDeadline,
    /// The service registry cannot satisfy a request: missing dependency,
    /// cycle, or a factory that failed and poisoned its `Cached<T>` slot.
    RegistryFatal(String),
    /// A proxied call to a remote service failed at the transport level.
    RemoteTransport { url: String, source: String },
}

impl LokstraError {
    /// The formatter-aware conversion used at dispatch time (spec §7): each
    /// variant routes through the capability on `Formatter` that matches its
    /// kind, so a request formatted as `simple` still gets a 404 shaped like
    /// every other `simple` response instead of this type's own envelope.
    pub fn into_response_with(self, formatter: &dyn Formatter) -> Response {
        match self {
            LokstraError::Binding(resp) => formatter.validation_error(&resp),
            LokstraError::Api { status, message } => {
                formatter.error(status, &ApiErrorInfo::new("API_ERROR", message))
            }
            LokstraError::NotFound(message) => formatter.not_found(&message),
            LokstraError::MiddlewareRejection(message) => formatter.error(
                StatusCode::FORBIDDEN,
                &ApiErrorInfo::new("MIDDLEWARE_REJECTION", message),
            ),
            LokstraError::Internal(message) => formatter.error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &ApiErrorInfo::new("INTERNAL_ERROR", message),
            ),
            LokstraError::ShutdownDeadline => formatter.error(
                StatusCode::SERVICE_UNAVAILABLE,
                &ApiErrorInfo::new("SHUTDOWN_DEADLINE", "shutdown deadline exceeded"),
            ),
            LokstraError::RegistryFatal(message) => formatter.error(
                StatusCode::INTERNAL_SERVER_ERROR,
                &ApiErrorInfo::new("REGISTRY_FATAL", message),
            ),
            LokstraError::RemoteTransport { url, source } => formatter.error(
                StatusCode::BAD_GATEWAY,
                &ApiErrorInfo::new("REMOTE_TRANSPORT", format!("{source} (calling {url})")),
            ),
        }
    }
}

impl IntoResponse for LokstraError {
    /// Formatter-less fallback for call sites with no request in flight
    /// (startup errors, tests). Dispatch always prefers
    /// [`LokstraError::into_response_with`] so a handler's error comes back
    /// in the same envelope as its success path.
    fn into_response(self) -> Response {
        match self {
            LokstraError::Binding(resp) => {
                let body = serde_json::json!({
                    "error": "validation failed",
                    "fields": resp.errors,
                });
                (StatusCode::BAD_REQUEST, Json(body)).into_response()
            }
            LokstraError::Api { status, message } => {
                let body = serde_json::json!({ "error": message });
                (status, Json(body)).into_response()
            }
            LokstraError::NotFound(message) => {
                let body = serde_json::json!({ "error": message });
                (StatusCode::NOT_FOUND, Json(body)).into_response()
            }
            LokstraError::MiddlewareRejection(message) => {
                let body = serde_json::json!({ "error": message });
                (StatusCode::FORBIDDEN, Json(body)).into_response()
            }
            LokstraError::Internal(message) => {
                let body = serde_json::json!({ "error": message });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
            LokstraError::ShutdownDeadline => {
                let body = serde_json::json!({ "error": "shutdown deadline exceeded" });
                (StatusCode::SERVICE_UNAVAILABLE, Json(body)).into_response()
            }
            LokstraError::RegistryFatal(message) => {
                let body = serde_json::json!({ "error": message });
                (StatusCode::INTERNAL_SERVER_ERROR, Json(body)).into_response()
            }
            LokstraError::RemoteTransport { url, source } => {
                let body = serde_json::json!({
                    "error": "upstream call failed",
                    "url": url,
                    "detail": source,
                });
                (StatusCode::BAD_GATEWAY, Json(body)).into_response()
            }
        }
    }
}

impl std::fmt::Display for LokstraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            LokstraError::Binding(resp) => write!(f, "binding error: {} fields", resp.errors.len()),
            LokstraError::Api { status, message } => write!(f, "api error ({status}): {message}"),
            LokstraError::NotFound(msg) => write!(f, "not found: {msg}"),
            LokstraError::MiddlewareRejection(msg) => write!(f, "middleware rejection: {msg}"),
            LokstraError::Internal(msg) => write!(f, "internal error: {msg}"),
            LokstraError::ShutdownDeadline => write!(f, "shutdown deadline exceeded"),
            LokstraError::RegistryFatal(msg) => write!(f, "registry fatal: {msg}"),
            LokstraError::RemoteTransport { url, source } => {
                write!(f, "remote transport error calling {url}: {source}")
            }
        }
    }
}

impl std::fmt::Debug for LokstraError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        <Self as std::fmt::Display>::fmt(self, f)
    }
}

impl std::error::Error for LokstraError {}

impl From<ValidationErrorResponse> for LokstraError {
    fn from(resp: ValidationErrorResponse) -> Self {
        LokstraError::Binding(resp)
    }
}

impl From<std::io::Error> for LokstraError {
    fn from(err: std::io::Error) -> Self {
        LokstraError::Internal(err.to_string())
    }
}

impl From<reqwest::Error> for LokstraError {
    fn from(err: reqwest::Error) -> Self {
        let url = err
            .url()
            .map(|u| u.to_string())
            .unwrap_or_else(|| "<unknown>".to_string());
        LokstraError::RemoteTransport {
            url,
            source: err.to_string(),
        }
    }
}

/// Generates `From<E> for LokstraError` implementations that map a domain
/// error type onto a specific variant, e.g.:
///
/// ```ignore
/// lokstra_core::map_error! {
///     MyDbError => Internal,
/// }
/// ```
#[macro_export]
macro_rules! map_error {
    ( $( $err_ty:ty => $variant:ident ),* $(,)? ) => {
        $(
            impl From<$err_ty> for $crate::error::LokstraError {
                fn from(err: $err_ty) -> Self {
                    $crate::error::LokstraError::$variant(err.to_string())
                }
            }
        )*
    };
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn error_parts(err: LokstraError) -> (StatusCode, serde_json::Value) {
        let resp = err.into_response();
        let status = resp.status();
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        (status, json)
    }

    #[tokio::test]
    async fn not_found_maps_to_404() {
        let (status, body) = error_parts(LokstraError::NotFound("widget missing".into())).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "widget missing");
    }

    #[tokio::test]
    async fn middleware_rejection_maps_to_403() {
        let (status, _) =
            error_parts(LokstraError::MiddlewareRejection("no role".into())).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn api_error_preserves_declared_status() {
        let (status, body) = error_parts(LokstraError::Api {
            status: StatusCode::IM_A_TEAPOT,
            message: "teapot".into(),
        })
        .await;
        assert_eq!(status, StatusCode::IM_A_TEAPOT);
        assert_eq!(body["error"], "teapot");
    }

    #[tokio::test]
    async fn shutdown_deadline_maps_to_503() {
        let (status, _) = error_parts(LokstraError::ShutdownDeadline).await;
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    }

    #[tokio::test]
    async fn binding_error_carries_field_list() {
        let resp = ValidationErrorResponse {
            errors: vec![crate::validation::FieldError {
                field: "email".into(),
                message: "invalid email".into(),
                code: "validation".into(),
            }],
        };
        let (status, body) = error_parts(LokstraError::Binding(resp)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["fields"][0]["field"], "email");
    }

    #[tokio::test]
    async fn into_response_with_routes_through_the_given_formatter() {
        use crate::formatter::SimpleFormatter;

        let resp = LokstraError::NotFound("widget missing".into())
            .into_response_with(&SimpleFormatter);
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        // SimpleFormatter's error shape, not the plain fallback's.
        assert_eq!(json["error"], "widget missing");
        assert_eq!(json["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn into_response_with_binding_error_is_a_validation_error() {
        use crate::formatter::ApiFormatter;

        let resp = ValidationErrorResponse {
            errors: vec![crate::validation::FieldError {
                field: "email".into(),
                message: "invalid email".into(),
                code: "email".into(),
            }],
        };
        let resp = LokstraError::Binding(resp).into_response_with(&ApiFormatter);
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body = resp.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(json["error"]["code"], "VALIDATION_ERROR");
        assert_eq!(json["error"]["fields"][0]["field"], "email");
    }

    #[test]
    fn display_formatting() {
        assert_eq!(
            LokstraError::NotFound("x".into()).to_string(),
            "not found: x"
        );
        assert_eq!(
            LokstraError::ShutdownDeadline.to_string(),
            "shutdown deadline exceeded"
        );
    }
}
