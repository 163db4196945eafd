//! Router engine, handler adapter, lazy service registry, and
//! proxy/auto-router bridge on top of `lokstra-http`'s wire layer.

pub mod binding;
pub mod builder;
pub mod config;
pub mod context;
pub mod error;
pub mod formatter;
pub mod handler;
pub mod middleware;
pub mod prelude;
pub mod proxy;
pub mod registry;
pub mod route;
pub mod router;
pub mod validation;

pub use binding::Bindable;
pub use builder::{App, AppBuilder};
pub use config::{ConfigMap, ConfigValue};
pub use context::Context;
pub use error::LokstraError;
pub use formatter::{
    ApiErrorInfo, ApiFormatter, ClientResponse, Formatter, FormatterRegistry, LegacyFormatter,
    ListMeta, SimpleFormatter,
};
pub use handler::{ApiError, IntoHandler, Raw};
pub use registry::{RegistryError, ServiceRegistry};
pub use route::{GroupDef, RouteDef, RouteMethod};
pub use router::{BuildError, Router, RouterEngine};
