use std::any::Any;
use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{error, info};

tokio::task_local! {
    /// The chain of service names currently being resolved on this task,
    /// innermost call last. A factory awaiting `registry.get(...)` stays on
    /// the same task, so this catches a cycle the moment the lazy path
    /// revisits a name already under construction — without it, a cyclic
    /// factory graph resolved outside `eager_init_all` would hang forever
    /// on the revisited name's `OnceCell` instead of erroring.
    static RESOLUTION_CHAIN: RefCell<Vec<String>>;
}

/// A constructor invoked at most once per service, with access to everything
/// already registered. Returns a boxed `Any` so the registry can store
/// heterogeneous service types in one map.
pub type Factory = Arc<
    dyn Fn(ServiceRegistry) -> Pin<Box<dyn Future<Output = Result<Arc<dyn Any + Send + Sync>, RegistryError>> + Send>>
        + Send
        + Sync,
>;

/// Either a single local-only factory, or a local/remote pair selected at
/// first use by consulting a named `ClientRouter` (spec §4.E step 3,
/// testable property E6). `Single` is the common case — most services never
/// leave the process.
#[derive(Clone)]
enum Factories {
    Single(Factory),
    Dual { router_name: String, local: Option<Factory>, remote: Option<Factory> },
}

/// One entry in the registry: a name, the dependencies it declares (used
/// only for the optional eager pre-warm ordering — lookups themselves never
/// consult this list), and its factory or factory pair.
#[derive(Clone)]
pub struct ServiceDefinition {
    pub name: String,
    pub dependencies: Vec<String>,
    factories: Factories,
}

#[derive(Debug, Clone)]
pub enum RegistryError {
    NotFound(String),
    Cycle(Vec<String>),
    FactoryFailed { name: String, reason: String },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::NotFound(name) => write!(f, "no service registered under `{name}`"),
            RegistryError::Cycle(path) => write!(f, "dependency cycle: {}", path.join(" -> ")),
            RegistryError::FactoryFailed { name, reason } => {
                write!(f, "factory for `{name}` failed: {reason}")
            }
        }
    }
}

impl std::error::Error for RegistryError {}

/// A single-firing, lazily-constructed slot. The first caller to resolve it
/// runs the factory; every subsequent caller (concurrent or not) receives
/// the same value, or the same cached error — a construction failure is
/// never retried.
struct Cached {
    cell: OnceCell<Result<Arc<dyn Any + Send + Sync>, RegistryError>>,
}

impl Cached {
    fn new() -> Self {
        Cached { cell: OnceCell::new() }
    }
}

struct Inner {
    defs: HashMap<String, ServiceDefinition>,
    slots: HashMap<String, Arc<Cached>>,
    /// Named `ClientRouter` targets, each resolved once at registration time
    /// to whether it points at the current server (`isLocal` in spec
    /// terms). A `Dual` service whose `router_name` isn't present here
    /// resolves local, matching spec §4.E step 3 ("if absent or isLocal,
    /// require local factory").
    client_routers: HashMap<String, bool>,
}

/// The service registry: maps a name to a lazily-constructed, type-erased
/// singleton. Cheap to clone (an `Arc` around the definition/slot maps), so
/// factories can hold their own registry handle to resolve dependencies.
#[derive(Clone)]
pub struct ServiceRegistry {
    inner: Arc<Inner>,
}

impl ServiceRegistry {
    pub fn builder() -> ServiceRegistryBuilder {
        ServiceRegistryBuilder {
            defs: HashMap::new(),
            client_routers: HashMap::new(),
            server_name: "local".to_string(),
        }
    }

    /// Resolves a named service, constructing it on first access. Returns a
    /// clone of the cached `Arc` (or the cached error) on every later call —
    /// the factory itself runs exactly once, even under concurrent first
    /// access, guarded by `OnceCell`.
    pub async fn get<T: Send + Sync + 'static>(&self, name: &str) -> Result<Arc<T>, RegistryError> {
        let any = self.get_any(name).await?;
        any.downcast::<T>()
            .map_err(|_| RegistryError::FactoryFailed {
                name: name.to_string(),
                reason: "registered value does not match the requested type".to_string(),
            })
    }

    async fn get_any(&self, name: &str) -> Result<Arc<dyn Any + Send + Sync>, RegistryError> {
        if RESOLUTION_CHAIN.try_with(|_| ()).is_ok() {
            let cycle = RESOLUTION_CHAIN.with(|chain| {
                let chain = chain.borrow();
                chain.iter().any(|seen| seen == name).then(|| {
                    let mut path = chain.clone();
                    path.push(name.to_string());
                    path
                })
            });
            if let Some(path) = cycle {
                return Err(RegistryError::Cycle(path));
            }
            RESOLUTION_CHAIN.with(|chain| chain.borrow_mut().push(name.to_string()));
            let result = self.get_any_uncycled(name).await;
            RESOLUTION_CHAIN.with(|chain| {
                chain.borrow_mut().pop();
            });
            result
        } else {
            RESOLUTION_CHAIN
                .scope(RefCell::new(vec![name.to_string()]), self.get_any_uncycled(name))
                .await
        }
    }

    async fn get_any_uncycled(&self, name: &str) -> Result<Arc<dyn Any + Send + Sync>, RegistryError> {
        let def = self
            .inner
            .defs
            .get(name)
            .ok_or_else(|| RegistryError::NotFound(name.to_string()))?
            .clone();
        let slot = self
            .inner
            .slots
            .get(name)
            .expect("every definition has a matching slot")
            .clone();

        let registry = self.clone();
        slot.cell
            .get_or_init(move || async move {
                let factory = registry.select_factory(&def)?;
                factory(registry.clone()).await
            })
            .await
            .clone()
    }

    /// Picks the factory to invoke for `def`: the sole factory for a
    /// `Single` definition, or — for a `Dual` one — whichever of
    /// local/remote matches the named `ClientRouter`'s resolved locality.
    /// A required-but-absent factory is the "fatal panic at first use" spec
    /// §4.E step 3 describes, surfaced here as a `RegistryError` instead so
    /// it flows through the normal error path rather than unwinding.
    fn select_factory(&self, def: &ServiceDefinition) -> Result<Factory, RegistryError> {
        match &def.factories {
            Factories::Single(factory) => Ok(factory.clone()),
            Factories::Dual { router_name, local, remote } => {
                let is_local = self.inner.client_routers.get(router_name).copied().unwrap_or(true);
                if is_local {
                    local.clone().ok_or_else(|| RegistryError::FactoryFailed {
                        name: def.name.clone(),
                        reason: format!(
                            "ClientRouter `{router_name}` resolved local but `{}` has no local factory",
                            def.name
                        ),
                    })
                } else {
                    remote.clone().ok_or_else(|| RegistryError::FactoryFailed {
                        name: def.name.clone(),
                        reason: format!(
                            "ClientRouter `{router_name}` resolved remote but `{}` has no remote factory",
                            def.name
                        ),
                    })
                }
            }
        }
    }

    /// Walks the declared dependency graph with Kahn's algorithm and
    /// resolves every service in dependency order. Optional: lookups work
    /// fine without ever calling this, but calling it up front turns a
    /// misconfigured dependency graph into a single start-up error instead
    /// of a surprise on whichever request happens to touch it first.
    pub async fn eager_init_all(&self) -> Result<(), RegistryError> {
        let order = topological_order(&self.inner.defs)?;
        for name in &order {
            self.get_any(name).await?;
        }
        info!(order = ?order, "lokstra: eager-initialized services");
        Ok(())
    }
}

fn topological_order(defs: &HashMap<String, ServiceDefinition>) -> Result<Vec<String>, RegistryError> {
    let mut in_degree: HashMap<&str, usize> = defs.keys().map(|k| (k.as_str(), 0)).collect();
    let mut dependents: HashMap<&str, Vec<&str>> = HashMap::new();

    for def in defs.values() {
        for dep in &def.dependencies {
            if !defs.contains_key(dep) {
                return Err(RegistryError::NotFound(dep.clone()));
            }
            *in_degree.get_mut(def.name.as_str()).unwrap() += 1;
            dependents.entry(dep.as_str()).or_default().push(def.name.as_str());
        }
    }

    let mut queue: Vec<&str> = in_degree
        .iter()
        .filter(|(_, deg)| **deg == 0)
        .map(|(name, _)| *name)
        .collect();
    queue.sort_unstable();

    let mut order = Vec::with_capacity(defs.len());
    let mut visited = HashSet::new();

    while let Some(name) = queue.pop() {
        if !visited.insert(name) {
            continue;
        }
        order.push(name.to_string());
        if let Some(children) = dependents.get(name) {
            let mut next_ready = Vec::new();
            for child in children {
                let deg = in_degree.get_mut(child).unwrap();
                *deg -= 1;
                if *deg == 0 {
                    next_ready.push(*child);
                }
            }
            next_ready.sort_unstable();
            queue.extend(next_ready);
        }
    }

    if order.len() != defs.len() {
        let remaining: Vec<String> = defs
            .keys()
            .filter(|k| !order.contains(k))
            .cloned()
            .collect();
        error!(cycle = ?remaining, "lokstra: service dependency cycle detected");
        return Err(RegistryError::Cycle(remaining));
    }

    Ok(order)
}

fn wrap_factory<T, F, Fut>(factory: F) -> Factory
where
    T: Send + Sync + 'static,
    F: Fn(ServiceRegistry) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<T, RegistryError>> + Send + 'static,
{
    Arc::new(move |registry| {
        let fut = factory(registry);
        Box::pin(async move {
            let value = fut.await?;
            Ok(Arc::new(value) as Arc<dyn Any + Send + Sync>)
        })
    })
}

pub struct ServiceRegistryBuilder {
    defs: HashMap<String, ServiceDefinition>,
    client_routers: HashMap<String, bool>,
    server_name: String,
}

impl ServiceRegistryBuilder {
    pub fn register<T, F, Fut>(mut self, name: impl Into<String>, dependencies: Vec<String>, factory: F) -> Self
    where
        T: Send + Sync + 'static,
        F: Fn(ServiceRegistry) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, RegistryError>> + Send + 'static,
    {
        let name = name.into();
        self.defs.insert(
            name.clone(),
            ServiceDefinition { name, dependencies, factories: Factories::Single(wrap_factory(factory)) },
        );
        self
    }

    /// Registers a service that may be satisfied locally or remotely,
    /// selecting between `local_factory`/`remote_factory` at first use
    /// according to whether the named `ClientRouter` (registered via
    /// [`Self::client_router`]) resolves local or remote. At least one of
    /// the two should be `Some` — an absent-but-selected side fails with a
    /// `RegistryError` the first time the service is resolved, not at
    /// registration (spec §4.E step 3).
    pub fn register_dual<T, FL, FutL, FR, FutR>(
        mut self,
        name: impl Into<String>,
        dependencies: Vec<String>,
        router_name: impl Into<String>,
        local_factory: Option<FL>,
        remote_factory: Option<FR>,
    ) -> Self
    where
        T: Send + Sync + 'static,
        FL: Fn(ServiceRegistry) -> FutL + Send + Sync + 'static,
        FutL: Future<Output = Result<T, RegistryError>> + Send + 'static,
        FR: Fn(ServiceRegistry) -> FutR + Send + Sync + 'static,
        FutR: Future<Output = Result<T, RegistryError>> + Send + 'static,
    {
        let name = name.into();
        self.defs.insert(
            name.clone(),
            ServiceDefinition {
                name,
                dependencies,
                factories: Factories::Dual {
                    router_name: router_name.into(),
                    local: local_factory.map(wrap_factory),
                    remote: remote_factory.map(wrap_factory),
                },
            },
        );
        self
    }

    /// Sets the current process's server name, consulted by
    /// [`Self::client_router`] to compute each router's `isLocal` flag.
    /// Defaults to `"local"`, matching the common case of a registry with
    /// no remote services at all.
    pub fn server_name(mut self, name: impl Into<String>) -> Self {
        self.server_name = name.into();
        self
    }

    /// Registers a named `ClientRouter` target. `isLocal` is computed now,
    /// by comparing `server_name` against [`Self::server_name`] — call
    /// `server_name` first if you need a non-default current server.
    pub fn client_router(mut self, router_name: impl Into<String>, server_name: impl Into<String>) -> Self {
        let is_local = server_name.into() == self.server_name;
        self.client_routers.insert(router_name.into(), is_local);
        self
    }

    pub fn build(self) -> ServiceRegistry {
        let slots = self.defs.keys().map(|k| (k.clone(), Arc::new(Cached::new()))).collect();
        ServiceRegistry {
            inner: Arc::new(Inner { defs: self.defs, slots, client_routers: self.client_routers }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn resolves_a_simple_service() {
        let registry = ServiceRegistry::builder()
            .register::<String, _, _>("greeting", vec![], |_| async { Ok("hi".to_string()) })
            .build();
        let value = registry.get::<String>("greeting").await.unwrap();
        assert_eq!(*value, "hi");
    }

    #[tokio::test]
    async fn factory_runs_exactly_once() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let registry = ServiceRegistry::builder()
            .register::<u32, _, _>("counter", vec![], move |_| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(42)
                }
            })
            .build();

        let (a, b) = tokio::join!(registry.get::<u32>("counter"), registry.get::<u32>("counter"));
        assert_eq!(*a.unwrap(), 42);
        assert_eq!(*b.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn missing_service_is_not_found() {
        let registry = ServiceRegistry::builder().build();
        let err = registry.get::<String>("missing").await.unwrap_err();
        assert!(matches!(err, RegistryError::NotFound(_)));
    }

    #[tokio::test]
    async fn construction_failure_is_cached_not_retried() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let registry = ServiceRegistry::builder()
            .register::<u32, _, _>("flaky", vec![], move |_| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Err(RegistryError::FactoryFailed {
                        name: "flaky".into(),
                        reason: "boom".into(),
                    })
                }
            })
            .build();

        let _ = registry.get::<u32>("flaky").await;
        let _ = registry.get::<u32>("flaky").await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn eager_init_resolves_in_dependency_order() {
        let registry = ServiceRegistry::builder()
            .register::<String, _, _>("base", vec![], |_| async { Ok("base".to_string()) })
            .register::<String, _, _>("derived", vec!["base".to_string()], |reg| async move {
                let base = reg.get::<String>("base").await?;
                Ok(format!("{base}-derived"))
            })
            .build();

        registry.eager_init_all().await.unwrap();
        let derived = registry.get::<String>("derived").await.unwrap();
        assert_eq!(*derived, "base-derived");
    }

    #[tokio::test]
    async fn lazy_get_detects_a_cycle_without_eager_init() {
        let registry = ServiceRegistry::builder()
            .register::<u32, _, _>("a", vec![], |reg| async move {
                let _ = reg.get::<u32>("b").await?;
                Ok(1)
            })
            .register::<u32, _, _>("b", vec![], |reg| async move {
                let _ = reg.get::<u32>("a").await?;
                Ok(2)
            })
            .build();

        match registry.get::<u32>("a").await {
            Err(RegistryError::Cycle(path)) => {
                assert_eq!(path, vec!["a".to_string(), "b".to_string(), "a".to_string()])
            }
            other => panic!("expected a Cycle error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn dual_factory_selects_local_when_router_resolves_local() {
        let registry = ServiceRegistry::builder()
            .server_name("S1")
            .client_router("user-service-router", "S1")
            .register_dual::<String, _, _, _, _>(
                "user-service",
                vec![],
                "user-service-router",
                Some(|_: ServiceRegistry| async { Ok("local-user-service".to_string()) }),
                Some(|_: ServiceRegistry| async { Ok("remote-user-service".to_string()) }),
            )
            .build();

        let value = registry.get::<String>("user-service").await.unwrap();
        assert_eq!(*value, "local-user-service");
    }

    #[tokio::test]
    async fn dual_factory_selects_remote_when_router_resolves_remote() {
        let registry = ServiceRegistry::builder()
            .server_name("S1")
            .client_router("user-service-router", "S2")
            .register_dual::<String, _, _, _, _>(
                "user-service",
                vec![],
                "user-service-router",
                Some(|_: ServiceRegistry| async { Ok("local-user-service".to_string()) }),
                Some(|_: ServiceRegistry| async { Ok("remote-user-service".to_string()) }),
            )
            .build();

        let value = registry.get::<String>("user-service").await.unwrap();
        assert_eq!(*value, "remote-user-service");
    }

    #[tokio::test]
    async fn dual_factory_without_a_registered_router_defaults_to_local() {
        let registry = ServiceRegistry::builder()
            .register_dual::<String, _, _, _, _>(
                "user-service",
                vec![],
                "unregistered-router",
                Some(|_: ServiceRegistry| async { Ok("local-user-service".to_string()) }),
                None::<fn(ServiceRegistry) -> std::future::Ready<Result<String, RegistryError>>>,
            )
            .build();

        let value = registry.get::<String>("user-service").await.unwrap();
        assert_eq!(*value, "local-user-service");
    }

    #[tokio::test]
    async fn dual_factory_errors_when_resolved_side_is_absent() {
        let registry = ServiceRegistry::builder()
            .server_name("S1")
            .client_router("user-service-router", "S2")
            .register_dual::<String, _, _, _, _>(
                "user-service",
                vec![],
                "user-service-router",
                Some(|_: ServiceRegistry| async { Ok("local-user-service".to_string()) }),
                None::<fn(ServiceRegistry) -> std::future::Ready<Result<String, RegistryError>>>,
            )
            .build();

        let err = registry.get::<String>("user-service").await.unwrap_err();
        assert!(matches!(err, RegistryError::FactoryFailed { .. }));
    }

    #[tokio::test]
    async fn dependency_cycle_is_detected() {
        let registry = ServiceRegistry::builder()
            .register::<u32, _, _>("a", vec!["b".to_string()], |_| async { Ok(1) })
            .register::<u32, _, _>("b", vec!["a".to_string()], |_| async { Ok(2) })
            .build();
        let err = registry.eager_init_all().await.unwrap_err();
        assert!(matches!(err, RegistryError::Cycle(_)));
    }
}
