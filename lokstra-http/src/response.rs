use crate::body::Body;
use bytes::Bytes;
use http::{HeaderName, HeaderValue, StatusCode};

pub type Response = http::Response<Body>;

/// Converts a value into a wire [`Response`]. Mirrors the small set of
/// blanket impls axum provides for its own `IntoResponse`, narrowed to what
/// handler return values actually need.
pub trait IntoResponse {
    fn into_response(self) -> Response;
}

impl IntoResponse for Response {
    fn into_response(self) -> Response {
        self
    }
}

impl IntoResponse for () {
    fn into_response(self) -> Response {
        http::Response::builder()
            .status(StatusCode::NO_CONTENT)
            .body(Body::empty())
            .expect("empty response is always valid")
    }
}

impl IntoResponse for StatusCode {
    fn into_response(self) -> Response {
        http::Response::builder()
            .status(self)
            .body(Body::empty())
            .expect("status-only response is always valid")
    }
}

impl IntoResponse for String {
    fn into_response(self) -> Response {
        text_response(StatusCode::OK, self)
    }
}

impl IntoResponse for &'static str {
    fn into_response(self) -> Response {
        text_response(StatusCode::OK, self.to_string())
    }
}

impl IntoResponse for Bytes {
    fn into_response(self) -> Response {
        http::Response::builder()
            .status(StatusCode::OK)
            .header(http::header::CONTENT_TYPE, "application/octet-stream")
            .body(Body::from_bytes(self))
            .expect("bytes response is always valid")
    }
}

fn text_response(status: StatusCode, body: String) -> Response {
    http::Response::builder()
        .status(status)
        .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(Body::from(body))
        .expect("text response is always valid")
}

/// JSON wrapper, the same role `axum::Json` plays for the teacher.
pub struct Json<T>(pub T);

impl<T: serde::Serialize> IntoResponse for Json<T> {
    fn into_response(self) -> Response {
        match serde_json::to_vec(&self.0) {
            Ok(bytes) => http::Response::builder()
                .status(StatusCode::OK)
                .header(http::header::CONTENT_TYPE, "application/json")
                .body(Body::from_bytes(Bytes::from(bytes)))
                .expect("json response is always valid"),
            Err(err) => http::Response::builder()
                .status(StatusCode::INTERNAL_SERVER_ERROR)
                .header(http::header::CONTENT_TYPE, "text/plain; charset=utf-8")
                .body(Body::from(format!("failed to serialize response: {err}")))
                .expect("error response is always valid"),
        }
    }
}

impl<T: IntoResponse> IntoResponse for (StatusCode, T) {
    fn into_response(self) -> Response {
        let mut resp = self.1.into_response();
        *resp.status_mut() = self.0;
        resp
    }
}

impl<T: IntoResponse> IntoResponse for (StatusCode, Vec<(HeaderName, HeaderValue)>, T) {
    fn into_response(self) -> Response {
        let mut resp = self.2.into_response();
        *resp.status_mut() = self.0;
        for (name, value) in self.1 {
            resp.headers_mut().insert(name, value);
        }
        resp
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;

    async fn body_bytes(resp: Response) -> Bytes {
        resp.into_body().collect().await.unwrap().to_bytes()
    }

    #[tokio::test]
    async fn unit_into_response_is_204_with_empty_body() {
        let resp = ().into_response();
        assert_eq!(resp.status(), StatusCode::NO_CONTENT);
        assert!(body_bytes(resp).await.is_empty());
    }

    #[tokio::test]
    async fn json_into_response_sets_content_type() {
        let resp = Json(serde_json::json!({"ok": true})).into_response();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers().get(http::header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let bytes = body_bytes(resp).await;
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["ok"], true);
    }

    #[tokio::test]
    async fn status_tuple_overrides_status() {
        let resp = (StatusCode::CREATED, Json(serde_json::json!({"id": 1}))).into_response();
        assert_eq!(resp.status(), StatusCode::CREATED);
    }
}
