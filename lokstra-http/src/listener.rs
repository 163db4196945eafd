use crate::body::Body;
use crate::request::Request;
use hyper::service::service_fn;
use hyper_util::rt::TokioIo;
use hyper_util::server::conn::auto::Builder as AutoBuilder;
use std::fmt;
use std::future::Future;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
#[cfg(unix)]
use tokio::net::UnixListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

pub type HandlerFuture = Pin<Box<dyn Future<Output = http::Response<Body>> + Send>>;
pub type BoxedHandler = Arc<dyn Fn(Request) -> HandlerFuture + Send + Sync>;

/// Where a listener binds. Mirrors the wire-level `addr` key's two forms:
/// a plain socket address, or `unix:/path` for a Unix domain socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListenAddr {
    Tcp(SocketAddr),
    Unix(PathBuf),
}

impl ListenAddr {
    /// Parses the wire-level form documented for listener config: a bare
    /// socket address, or `unix:/path/to.sock`.
    pub fn parse(s: &str) -> Result<Self, std::net::AddrParseError> {
        match s.strip_prefix("unix:") {
            Some(path) => Ok(ListenAddr::Unix(PathBuf::from(path))),
            None => s.parse().map(ListenAddr::Tcp),
        }
    }
}

impl From<SocketAddr> for ListenAddr {
    fn from(addr: SocketAddr) -> Self {
        ListenAddr::Tcp(addr)
    }
}

impl fmt::Display for ListenAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ListenAddr::Tcp(addr) => write!(f, "{addr}"),
            ListenAddr::Unix(path) => write!(f, "unix:{}", path.display()),
        }
    }
}

/// Configuration accepted by every [`ListenerBackend`]. Populated from a
/// `ConfigMap` by the app builder; field names match the wire-level keys
/// documented for the listener.
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    pub addr: ListenAddr,
    pub read_timeout: Option<Duration>,
    pub write_timeout: Option<Duration>,
    pub idle_timeout: Option<Duration>,
    pub shutdown_timeout: Duration,
    pub secure: bool,
    pub cert_file: Option<PathBuf>,
    pub key_file: Option<PathBuf>,
    pub ca_file: Option<PathBuf>,
}

impl ListenerConfig {
    pub fn new(addr: impl Into<ListenAddr>) -> Self {
        ListenerConfig {
            addr: addr.into(),
            read_timeout: None,
            write_timeout: None,
            idle_timeout: Some(Duration::from_secs(75)),
            shutdown_timeout: Duration::from_secs(30),
            secure: false,
            cert_file: None,
            key_file: None,
            ca_file: None,
        }
    }
}

/// Tracks requests currently in flight so shutdown can wait for drain.
#[derive(Clone, Default)]
pub struct ActiveRequests(Arc<AtomicUsize>);

impl ActiveRequests {
    pub fn count(&self) -> usize {
        self.0.load(Ordering::SeqCst)
    }

    /// Entered once per request, not once per accepted connection — a
    /// keep-alive connection serving ten requests should never read as one.
    fn enter(&self) -> ActiveRequestGuard {
        self.0.fetch_add(1, Ordering::SeqCst);
        ActiveRequestGuard(self.0.clone())
    }
}

struct ActiveRequestGuard(Arc<AtomicUsize>);

impl Drop for ActiveRequestGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Certificate/acceptor boundary for secure listeners. Deliberately has no
/// implementation in this crate — TLS certificate management is handled by a
/// separate collaborator. Binding with `secure = true` and no acceptor
/// installed is a startup-time configuration error, not a silent fallback.
pub trait TlsAcceptor: Send + Sync + 'static {}

/// One pluggable network backend. The workspace ships exactly one
/// implementation (`TokioHttp1Listener`); additional backends (HTTP/3,
/// alternate runtimes) are out of scope and only the trait boundary is
/// provided.
pub trait ListenerBackend: Send + Sync + 'static {
    fn serve(
        self: Arc<Self>,
        config: ListenerConfig,
        handler: BoxedHandler,
        shutdown: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<BoundListener>> + Send>>;
}

/// What a backend hands back once it's actually bound: the drain counter
/// `serve()` waits on at shutdown, and (for TCP) the address it ended up
/// listening on — distinct from the requested one when the caller asked
/// for port `0`, which is how the loopback round-trip tests get a free
/// port without racing a separate bind.
pub struct BoundListener {
    pub active: ActiveRequests,
    pub local_addr: Option<SocketAddr>,
}

/// The only backend this workspace ships: plain HTTP/1.1 (with h2 upgrade
/// negotiation via `hyper_util`'s auto builder) over a Tokio `TcpListener`.
#[derive(Default)]
pub struct TokioHttp1Listener;

impl ListenerBackend for TokioHttp1Listener {
    fn serve(
        self: Arc<Self>,
        config: ListenerConfig,
        handler: BoxedHandler,
        shutdown: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = std::io::Result<BoundListener>> + Send>> {
        Box::pin(async move {
            if config.secure {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::Unsupported,
                    "secure = true requires a TLS acceptor, none is installed in this build",
                ));
            }

            let active = ActiveRequests::default();
            let mut local_addr = None;

            match config.addr.clone() {
                ListenAddr::Tcp(addr) => {
                    let listener = TcpListener::bind(addr).await?;
                    local_addr = Some(listener.local_addr()?);
                    info!(%addr, "lokstra listener bound");
                    let active_for_loop = active.clone();
                    tokio::spawn(async move {
                        loop {
                            let accept = tokio::select! {
                                biased;
                                _ = shutdown.cancelled() => break,
                                res = listener.accept() => res,
                            };
                            let (stream, peer) = match accept {
                                Ok(pair) => pair,
                                Err(err) => {
                                    error!(%err, "accept failed");
                                    continue;
                                }
                            };
                            debug!(%peer, "accepted connection");
                            spawn_connection(
                                TokioIo::new(stream),
                                handler.clone(),
                                active_for_loop.clone(),
                                shutdown.clone(),
                            );
                        }
                    });
                }
                #[cfg(unix)]
                ListenAddr::Unix(path) => {
                    let _ = std::fs::remove_file(&path);
                    let listener = UnixListener::bind(&path)?;
                    info!(path = %path.display(), "lokstra listener bound (unix)");
                    let active_for_loop = active.clone();
                    tokio::spawn(async move {
                        loop {
                            let accept = tokio::select! {
                                biased;
                                _ = shutdown.cancelled() => break,
                                res = listener.accept() => res,
                            };
                            let (stream, _peer) = match accept {
                                Ok(pair) => pair,
                                Err(err) => {
                                    error!(%err, "accept failed");
                                    continue;
                                }
                            };
                            debug!("accepted connection");
                            spawn_connection(
                                TokioIo::new(stream),
                                handler.clone(),
                                active_for_loop.clone(),
                                shutdown.clone(),
                            );
                        }
                    });
                }
                #[cfg(not(unix))]
                ListenAddr::Unix(_) => {
                    return Err(std::io::Error::new(
                        std::io::ErrorKind::Unsupported,
                        "unix domain sockets are not supported on this platform",
                    ));
                }
            }

            Ok(BoundListener { active, local_addr })
        })
    }
}

fn spawn_connection<IO>(
    io: TokioIo<IO>,
    handler: BoxedHandler,
    active: ActiveRequests,
    shutdown: CancellationToken,
) where
    IO: tokio::io::AsyncRead + tokio::io::AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let svc = service_fn(move |req: hyper::Request<hyper::body::Incoming>| {
            let handler = handler.clone();
            let guard = active.enter();
            async move {
                let _guard = guard;
                let (parts, body) = req.into_parts();
                let request = Request::from_incoming(parts, body).await?;
                let response = handler(request).await;
                Ok::<_, hyper::Error>(response)
            }
        });

        let conn = AutoBuilder::new(hyper_util::rt::TokioExecutor::new()).serve_connection(io, svc);
        tokio::pin!(conn);
        tokio::select! {
            res = conn.as_mut() => {
                if let Err(err) = res {
                    error!(%err, "connection error");
                }
            }
            _ = shutdown.cancelled() => {
                // Stop accepting new requests on this connection but let
                // whatever's in flight finish instead of dropping it.
                conn.as_mut().graceful_shutdown();
                if let Err(err) = conn.await {
                    error!(%err, "connection error during graceful shutdown");
                }
            }
        }
    });
}
