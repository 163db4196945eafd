use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use std::convert::Infallible;
use std::pin::Pin;
use std::task::{Context, Poll};

/// The wire-level body type shared by requests and responses.
///
/// Request bodies are always read into a single buffered [`Bytes`] the first
/// time they're consumed and cached on the [`crate::request::Request`] — the
/// listener never hands out a streaming body to handler code.
#[derive(Debug, Clone)]
pub struct Body(Full<Bytes>);

impl Body {
    pub fn empty() -> Self {
        Body(Full::new(Bytes::new()))
    }

    pub fn from_bytes(bytes: Bytes) -> Self {
        Body(Full::new(bytes))
    }

    pub async fn collect_bytes(body: hyper::body::Incoming) -> Result<Bytes, hyper::Error> {
        Ok(body.collect().await?.to_bytes())
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body::from_bytes(bytes)
    }
}

impl From<Vec<u8>> for Body {
    fn from(v: Vec<u8>) -> Self {
        Body::from_bytes(Bytes::from(v))
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Body::from_bytes(Bytes::from(s))
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Body::from_bytes(Bytes::from(s))
    }
}

impl http_body::Body for Body {
    type Data = Bytes;
    type Error = Infallible;

    fn poll_frame(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
    ) -> Poll<Option<Result<http_body::Frame<Self::Data>, Self::Error>>> {
        Pin::new(&mut self.0).poll_frame(cx)
    }

    fn is_end_stream(&self) -> bool {
        self.0.is_end_stream()
    }

    fn size_hint(&self) -> http_body::SizeHint {
        self.0.size_hint()
    }
}
