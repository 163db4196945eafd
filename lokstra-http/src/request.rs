use bytes::Bytes;
use http::{HeaderMap, Method, Uri};
use uuid::Uuid;

/// A fully-buffered inbound request: headers and body are read from the
/// socket once by the listener and handed to the router as an owned value.
#[derive(Debug, Clone)]
pub struct Request {
    pub method: Method,
    pub uri: Uri,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub request_id: Uuid,
}

impl Request {
    pub async fn from_incoming(
        parts: http::request::Parts,
        body: hyper::body::Incoming,
    ) -> Result<Self, hyper::Error> {
        let body = crate::body::Body::collect_bytes(body).await?;
        let request_id = resolve_request_id(&parts.headers);
        Ok(Request {
            method: parts.method,
            uri: parts.uri,
            headers: parts.headers,
            body,
            request_id,
        })
    }

    pub fn path(&self) -> &str {
        self.uri.path()
    }

    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }
}

/// Reuses an inbound `X-Request-Id` header when it parses as a UUID,
/// otherwise mints a fresh v4.
fn resolve_request_id(headers: &HeaderMap) -> Uuid {
    headers
        .get("x-request-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|s| Uuid::parse_str(s).ok())
        .unwrap_or_else(Uuid::new_v4)
}
