use crate::context::Context;
use crate::error::LokstraError;
use lokstra_http::{Method, Response};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

pub type BoxFuture<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// The canonical shape every one of the nine handler forms is adapted to.
pub type HandlerFn = Arc<dyn Fn(Context) -> BoxFuture<Result<Response, LokstraError>> + Send + Sync>;

/// A middleware wraps the call to the rest of the chain (`next`), matching
/// the `around(ctx, next)` continuation shape.
pub type Next = Arc<dyn Fn(Context) -> BoxFuture<Result<Response, LokstraError>> + Send + Sync>;
pub type MiddlewareFn =
    Arc<dyn Fn(Context, Next) -> BoxFuture<Result<Response, LokstraError>> + Send + Sync>;

/// The HTTP methods a route can be registered under. `Any` is expanded into
/// the concrete method set at `Build()` time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteMethod {
    Get,
    Post,
    Put,
    Delete,
    Patch,
    Options,
    Head,
    Any,
}

impl RouteMethod {
    /// The methods `Any` expands to, in registration order.
    pub const ANY_EXPANSION: [RouteMethod; 5] = [
        RouteMethod::Get,
        RouteMethod::Post,
        RouteMethod::Put,
        RouteMethod::Delete,
        RouteMethod::Patch,
    ];

    pub fn to_http(self) -> Method {
        match self {
            RouteMethod::Get => Method::GET,
            RouteMethod::Post => Method::POST,
            RouteMethod::Put => Method::PUT,
            RouteMethod::Delete => Method::DELETE,
            RouteMethod::Patch => Method::PATCH,
            RouteMethod::Options => Method::OPTIONS,
            RouteMethod::Head => Method::HEAD,
            RouteMethod::Any => unreachable!("Any must be expanded before reaching the wire"),
        }
    }
}

impl fmt::Display for RouteMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteMethod::Any => write!(f, "ANY"),
            other => write!(f, "{}", other.to_http()),
        }
    }
}

/// One route as registered by the caller, before `Build()` resolves full
/// paths/names and expands `Any`/`Head`/`Options`.
#[derive(Clone)]
pub struct RouteDef {
    pub method: RouteMethod,
    /// Pattern relative to the group it was registered under, e.g. `/{id}`.
    pub pattern: String,
    pub name: Option<String>,
    pub handler: HandlerFn,
    /// Middleware attached directly to this route (runs innermost, after
    /// every enclosing group's middleware, unless `override_parent_mw` is
    /// set).
    pub middleware: Vec<MiddlewareFn>,
    /// When `true`, `fullMiddleware` is exactly `middleware` — every
    /// ancestor group's middleware is ignored for this route.
    pub override_parent_mw: bool,
}

impl RouteDef {
    pub fn new(method: RouteMethod, pattern: impl Into<String>, handler: HandlerFn) -> Self {
        RouteDef {
            method,
            pattern: pattern.into(),
            name: None,
            handler,
            middleware: Vec::new(),
            override_parent_mw: false,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn middleware(mut self, mw: MiddlewareFn) -> Self {
        self.middleware.push(mw);
        self
    }

    /// Marks this route so `Build()` ignores every ancestor group's
    /// middleware — `fullMiddleware` becomes exactly this route's own list.
    pub fn override_parent_mw(mut self) -> Self {
        self.override_parent_mw = true;
        self
    }
}

/// A route after `Build()`: absolute path, absolute dotted name, and the
/// full middleware chain (outermost group first, route-local last).
#[derive(Clone)]
pub struct CompiledRoute {
    pub method: Method,
    pub full_path: String,
    pub full_name: String,
    pub handler: HandlerFn,
    pub middleware: Vec<MiddlewareFn>,
}

/// A named prefix carrying its own middleware, nestable to arbitrary depth.
#[derive(Clone)]
pub struct GroupDef {
    pub prefix: String,
    pub name: Option<String>,
    pub middleware: Vec<MiddlewareFn>,
    pub routes: Vec<RouteDef>,
    pub children: Vec<GroupDef>,
}

impl GroupDef {
    pub fn new(prefix: impl Into<String>) -> Self {
        GroupDef {
            prefix: prefix.into(),
            name: None,
            middleware: Vec::new(),
            routes: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn middleware(mut self, mw: MiddlewareFn) -> Self {
        self.middleware.push(mw);
        self
    }

    pub fn route(mut self, route: RouteDef) -> Self {
        self.routes.push(route);
        self
    }

    pub fn group(mut self, child: GroupDef) -> Self {
        self.children.push(child);
        self
    }
}

fn join_path(prefix: &str, pattern: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    let pattern = pattern.trim_start_matches('/');
    if pattern.is_empty() {
        if prefix.is_empty() { "/".to_string() } else { prefix.to_string() }
    } else if prefix.is_empty() {
        format!("/{pattern}")
    } else {
        format!("{prefix}/{pattern}")
    }
}

/// `route.name`, or the literal `"<METHOD>[" + path + "]_handler"` fallback
/// (§4.C step 2) built from the route's own registered pattern — not its
/// resolved `fullPath`.
fn join_name(prefix: Option<&str>, name: Option<&str>, fallback_method: RouteMethod, pattern: &str) -> String {
    let leaf = name
        .map(str::to_string)
        .unwrap_or_else(|| format!("{fallback_method}[{pattern}]_handler"));
    match prefix {
        Some(p) if !p.is_empty() => format!("{p}.{leaf}"),
        _ => leaf,
    }
}

/// Walks a group tree pre-order, producing the flat list of fully-resolved
/// routes `Build()` hands to the trie compiler. `Any` is expanded here; `Head`
/// and `Options` are synthesized one level up, in `RouterEngine::build`.
pub fn flatten(group: &GroupDef, parent_path: &str, parent_name: Option<&str>) -> Vec<CompiledRoute> {
    flatten_inner(group, parent_path, parent_name, &[])
}

/// `ancestor_mw` is the full chain from the root down to (but excluding)
/// `group`, already concatenated in outermost-first order — so a route three
/// groups deep still sees every enclosing group's middleware, not just its
/// immediate parent's.
fn flatten_inner(
    group: &GroupDef,
    parent_path: &str,
    parent_name: Option<&str>,
    ancestor_mw: &[MiddlewareFn],
) -> Vec<CompiledRoute> {
    let full_prefix = join_path(parent_path, &group.prefix);
    let full_name_prefix = match (parent_name, &group.name) {
        (Some(p), Some(n)) => Some(format!("{p}.{n}")),
        (None, Some(n)) => Some(n.clone()),
        (Some(p), None) => Some(p.to_string()),
        (None, None) => None,
    };

    let mut full_ancestor_mw: Vec<MiddlewareFn> = ancestor_mw.to_vec();
    full_ancestor_mw.extend(group.middleware.iter().cloned());

    let mut out = Vec::new();

    for route in &group.routes {
        let full_path = join_path(&full_prefix, &route.pattern);
        let full_name =
            join_name(full_name_prefix.as_deref(), route.name.as_deref(), route.method, &route.pattern);
        let middleware = if route.override_parent_mw {
            route.middleware.clone()
        } else {
            let mut mw = full_ancestor_mw.clone();
            mw.extend(route.middleware.iter().cloned());
            mw
        };

        let methods: Vec<RouteMethod> = if route.method == RouteMethod::Any {
            RouteMethod::ANY_EXPANSION.to_vec()
        } else {
            vec![route.method]
        };

        for method in methods {
            out.push(CompiledRoute {
                method: method.to_http(),
                full_path: full_path.clone(),
                full_name: full_name.clone(),
                handler: route.handler.clone(),
                middleware: middleware.clone(),
            });
        }
    }

    for child in &group.children {
        out.extend(flatten_inner(child, &full_prefix, full_name_prefix.as_deref(), &full_ancestor_mw));
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_path_handles_root_prefix() {
        assert_eq!(join_path("", "/widgets"), "/widgets");
        assert_eq!(join_path("/api", "/widgets"), "/api/widgets");
        assert_eq!(join_path("/api", ""), "/api");
        assert_eq!(join_path("", ""), "/");
    }

    #[test]
    fn join_name_falls_back_to_method_and_path_literal() {
        assert_eq!(join_name(None, None, RouteMethod::Get, "/widgets/{id}"), "GET[/widgets/{id}]_handler");
        assert_eq!(
            join_name(Some("widgets"), Some("list"), RouteMethod::Get, "/"),
            "widgets.list"
        );
        assert_eq!(join_name(None, Some("list"), RouteMethod::Get, "/"), "list");
    }
}
