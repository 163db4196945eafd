//! Wire-level HTTP plumbing for Lokstra: body buffering, the request/response
//! types handler code actually sees, and the listener backend. Nothing in
//! this crate knows about routes, services, or formatters — that's
//! `lokstra-core`'s job.

pub mod body;
pub mod listener;
pub mod request;
pub mod response;

pub use body::Body;
pub use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
pub use listener::{
    ActiveRequests, BoundListener, BoxedHandler, HandlerFuture, ListenAddr, ListenerBackend,
    ListenerConfig, TlsAcceptor, TokioHttp1Listener,
};
pub use request::Request;
pub use response::{IntoResponse, Json, Response};
