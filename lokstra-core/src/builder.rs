use crate::config::ConfigMap;
use crate::error::LokstraError;
use crate::formatter::FormatterRegistry;
use crate::registry::ServiceRegistry;
use crate::router::{BuildError, Router, RouterEngine};
use lokstra_http::{
    ActiveRequests, BoundListener, ListenAddr, ListenerBackend, ListenerConfig, Response,
    TokioHttp1Listener,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Ties the router, service registry, and formatter registry together and
/// drives the listener. Two-phase in spirit with the teacher's
/// `AppBuilder<NoState, P, R>`: a `Router`/`ServiceRegistry` must be
/// supplied before `build()` produces something `serve()`-able, but this
/// workspace doesn't need the teacher's compile-time type-list tracking —
/// the router/registry already fail at `Router::build()`/eager-init time
/// if something's missing, so the builder stays a plain runtime struct.
pub struct AppBuilder {
    router: Router,
    registry: ServiceRegistry,
    formatters: Arc<FormatterRegistry>,
    config: ConfigMap,
    backend: Arc<dyn ListenerBackend>,
}

impl Default for AppBuilder {
    fn default() -> Self {
        AppBuilder {
            router: Router::new(),
            registry: ServiceRegistry::builder().build(),
            formatters: Arc::new(FormatterRegistry::new()),
            config: ConfigMap::new(),
            backend: Arc::new(TokioHttp1Listener),
        }
    }
}

impl AppBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn router(mut self, router: Router) -> Self {
        self.router = router;
        self
    }

    /// Mounts an additional `Router` alongside whatever's already set,
    /// rather than replacing it — the multi-app pattern (spec.md's
    /// combined-listener requirement) of serving several independently
    /// assembled routers from one `App`.
    pub fn merge_router(mut self, router: Router) -> Self {
        self.router = self.router.merge(router);
        self
    }

    pub fn registry(mut self, registry: ServiceRegistry) -> Self {
        self.registry = registry;
        self
    }

    pub fn formatters(mut self, formatters: FormatterRegistry) -> Self {
        self.formatters = Arc::new(formatters);
        self
    }

    pub fn config(mut self, config: ConfigMap) -> Self {
        self.config = config;
        self
    }

    pub fn backend(mut self, backend: impl ListenerBackend) -> Self {
        self.backend = Arc::new(backend);
        self
    }

    pub fn build(self) -> Result<App, BuildError> {
        let engine = self.router.build()?;
        Ok(App {
            engine: Arc::new(engine),
            registry: self.registry,
            formatters: self.formatters,
            config: self.config,
            backend: self.backend,
        })
    }
}

/// The built, immutable application: a compiled route table plus the
/// services it was wired against. `serve()` eagerly validates the service
/// graph (if any dependencies were declared), binds the listener, and runs
/// until a shutdown signal arrives, then waits (bounded by
/// `shutdown_timeout`) for in-flight requests to drain.
pub struct App {
    engine: Arc<RouterEngine>,
    registry: ServiceRegistry,
    formatters: Arc<FormatterRegistry>,
    config: ConfigMap,
    backend: Arc<dyn ListenerBackend>,
}

impl App {
    pub fn registry(&self) -> &ServiceRegistry {
        &self.registry
    }

    pub fn formatters(&self) -> &FormatterRegistry {
        &self.formatters
    }

    /// Runs a single request through the compiled route table and middleware
    /// chain without a listener — the oneshot pattern the teacher's
    /// `r2e-core::builder` uses (via `tower::ServiceExt::oneshot`) for
    /// embedding the app in another service or for tests.
    pub async fn dispatch(&self, request: lokstra_http::Request) -> Response {
        dispatch(self.engine.clone(), self.formatters.clone(), request).await
    }

    pub async fn serve(self, addr: impl Into<ListenAddr>) -> Result<(), LokstraError> {
        self.registry
            .eager_init_all()
            .await
            .map_err(|e| LokstraError::RegistryFatal(e.to_string()))?;

        let shutdown_timeout = self.shutdown_timeout();
        let mut listener_config = ListenerConfig::new(addr);
        listener_config.shutdown_timeout = shutdown_timeout;

        let shutdown = CancellationToken::new();
        let shutdown_for_wait = shutdown.clone();
        let bound = self.bind(listener_config.clone(), shutdown).await?;

        shutdown_signal().await;
        info!("shutdown signal received, starting graceful shutdown");
        shutdown_for_wait.cancel();

        drain(&bound.active, listener_config.shutdown_timeout).await
    }

    /// Binds the listener and returns immediately instead of waiting for a
    /// shutdown signal — the caller owns the returned `CancellationToken`
    /// and drives shutdown itself. Used by the loopback round-trip tests
    /// (spec §4.G's equivalence invariant), which need the actual bound
    /// port before they can dispatch a client call against it.
    pub async fn serve_in_background(
        &self,
        addr: impl Into<ListenAddr>,
    ) -> Result<(BoundListener, CancellationToken), LokstraError> {
        self.registry
            .eager_init_all()
            .await
            .map_err(|e| LokstraError::RegistryFatal(e.to_string()))?;

        let mut listener_config = ListenerConfig::new(addr);
        listener_config.shutdown_timeout = self.shutdown_timeout();
        let shutdown = CancellationToken::new();
        let bound = self.bind(listener_config, shutdown.clone()).await?;
        Ok((bound, shutdown))
    }

    fn shutdown_timeout(&self) -> Duration {
        self.config
            .get("shutdown_timeout_secs")
            .and_then(|v| v.as_i64())
            .map(|secs| Duration::from_secs(secs as u64))
            .unwrap_or(Duration::from_secs(30))
    }

    async fn bind(
        &self,
        listener_config: ListenerConfig,
        shutdown: CancellationToken,
    ) -> Result<BoundListener, LokstraError> {
        let engine = self.engine.clone();
        let formatters = self.formatters.clone();
        let handler: lokstra_http::BoxedHandler = Arc::new(move |request| {
            let engine = engine.clone();
            let formatters = formatters.clone();
            Box::pin(dispatch(engine, formatters, request))
        });

        Ok(self.backend.clone().serve(listener_config, handler, shutdown).await?)
    }
}

async fn drain(active: &ActiveRequests, timeout: Duration) -> Result<(), LokstraError> {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if active.count() == 0 {
            return Ok(());
        }
        if tokio::time::Instant::now() >= deadline {
            return Err(LokstraError::ShutdownDeadline);
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn dispatch(
    engine: Arc<RouterEngine>,
    formatters: Arc<FormatterRegistry>,
    request: lokstra_http::Request,
) -> Pin<Box<dyn Future<Output = Response> + Send>> {
    use crate::context::Context;
    use lokstra_http::IntoResponse;

    Box::pin(async move {
        let method = request.method.clone();
        let path = request.path().to_string();

        let matched = match engine.matches(&method, &path) {
            Some(m) => m,
            None => {
                let allowed = engine.allowed_methods(&path);
                if allowed.is_empty() {
                    return LokstraError::NotFound(format!("no route for {path}"))
                        .into_response_with(&*formatters.default_formatter());
                }
                return http::StatusCode::METHOD_NOT_ALLOWED.into_response();
            }
        };

        let ctx = Context::new(
            request,
            matched.path_params,
            CancellationToken::new(),
            None,
        );
        // Captured once, before the chain runs, so a mid-flight
        // `set_default` on the registry never changes this request's
        // envelope (spec §5, testable property 7).
        ctx.set_formatter(formatters.default_formatter());

        let mut chain = matched.route.handler.clone();
        for mw in matched.route.middleware.iter().rev() {
            let mw = mw.clone();
            let next = chain.clone();
            chain = Arc::new(move |ctx| {
                let mw = mw.clone();
                let next = next.clone();
                Box::pin(async move { mw(ctx, next).await })
            });
        }

        let formatter = ctx.formatter();
        match chain(ctx).await {
            Ok(resp) => resp,
            Err(err) => err.into_response_with(&*formatter),
        }
    })
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to listen for Ctrl-C");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to listen for SIGTERM")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
