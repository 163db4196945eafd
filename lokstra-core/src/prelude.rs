//! Lokstra prelude — import everything a typical handler module needs with
//! a single `use lokstra_core::prelude::*;`.

pub use crate::binding::Bindable;
pub use crate::builder::{App, AppBuilder};
pub use crate::config::{ConfigMap, ConfigValue};
pub use crate::context::Context;
pub use crate::error::LokstraError;
pub use crate::formatter::{ApiErrorInfo, Formatter, FormatterRegistry, ListMeta};
pub use crate::handler::{ApiError, IntoHandler, Raw};
pub use crate::middleware::{cors, recovery, tracing_span, Guard, RolesGuard};
pub use crate::proxy::{ClientRouter, ConversionRule, Proxy};
pub use crate::registry::{RegistryError, ServiceRegistry};
pub use crate::route::{GroupDef, RouteDef, RouteMethod};
pub use crate::router::{Router, RouterEngine};
pub use lokstra_http::{IntoResponse, Json, Response, StatusCode};
pub use lokstra_macros::Bind;
