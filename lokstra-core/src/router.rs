use crate::route::{flatten, CompiledRoute, GroupDef, HandlerFn, MiddlewareFn, RouteDef, RouteMethod};
use lokstra_http::Method;
use std::collections::HashMap;
use tracing::debug;

/// Builder-side router: a root [`GroupDef`] plus a fluent API for
/// registering routes and nested groups before calling [`Router::build`].
pub struct Router {
    root: GroupDef,
}

impl Default for Router {
    fn default() -> Self {
        Router { root: GroupDef::new("") }
    }
}

impl Router {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn route(mut self, method: RouteMethod, pattern: impl Into<String>, handler: HandlerFn) -> Self {
        self.root.routes.push(RouteDef::new(method, pattern, handler));
        self
    }

    pub fn named_route(
        mut self,
        method: RouteMethod,
        pattern: impl Into<String>,
        name: impl Into<String>,
        handler: HandlerFn,
    ) -> Self {
        self.root.routes.push(RouteDef::new(method, pattern, handler).named(name));
        self
    }

    pub fn middleware(mut self, mw: MiddlewareFn) -> Self {
        self.root.middleware.push(mw);
        self
    }

    pub fn group(mut self, group: GroupDef) -> Self {
        self.root.children.push(group);
        self
    }

    /// Combines a second, independently-assembled `Router` onto this one as
    /// a nested group, the multi-app pattern of mounting several
    /// applications behind one listener. `other`'s own middleware stays
    /// scoped to its routes; `self`'s root-level middleware still wraps
    /// both. Duplicate `(method, path)` pairs across the two are caught by
    /// `build()`'s existing check over the fully-flattened table, the same
    /// as any other overlapping registration.
    pub fn merge(mut self, other: Router) -> Self {
        self.root.children.push(other.root);
        self
    }

    /// Walks the group tree, expands `Any`, synthesizes `HEAD` for every
    /// `GET` and `OPTIONS` for every distinct path, and compiles the result
    /// into a matchable trie. Panics-as-build-errors: a duplicate
    /// `(method, path)` registration is returned as an error rather than
    /// silently shadowing one handler with another.
    pub fn build(self) -> Result<RouterEngine, BuildError> {
        let mut compiled = flatten(&self.root, "", None);

        let mut by_path: HashMap<String, Vec<Method>> = HashMap::new();
        for route in &compiled {
            by_path
                .entry(route.full_path.clone())
                .or_default()
                .push(route.method.clone());
        }

        let mut synthesized = Vec::new();
        for route in &compiled {
            if route.method == Method::GET {
                let already_has_head = by_path
                    .get(&route.full_path)
                    .map(|methods| methods.contains(&Method::HEAD))
                    .unwrap_or(false);
                if !already_has_head {
                    synthesized.push(CompiledRoute {
                        method: Method::HEAD,
                        full_path: route.full_path.clone(),
                        full_name: format!("{}.head", route.full_name),
                        handler: head_handler(route.handler.clone()),
                        middleware: route.middleware.clone(),
                    });
                }
            }
        }
        compiled.extend(synthesized);

        for path in by_path.keys() {
            let methods: Vec<Method> = compiled
                .iter()
                .filter(|r| &r.full_path == path)
                .map(|r| r.method.clone())
                .collect();
            if !methods.contains(&Method::OPTIONS) {
                let allow = allow_header_value(&methods);
                compiled.push(CompiledRoute {
                    method: Method::OPTIONS,
                    full_path: path.clone(),
                    full_name: format!("{path}.options"),
                    handler: std::sync::Arc::new(move |_ctx| {
                        let allow = allow.clone();
                        Box::pin(async move {
                            Ok(http::Response::builder()
                                .status(http::StatusCode::NO_CONTENT)
                                .header(http::header::ALLOW, allow)
                                .body(lokstra_http::Body::empty())
                                .expect("options response is always valid"))
                        })
                    }),
                    middleware: Vec::new(),
                });
            }
        }

        let mut seen = std::collections::HashSet::new();
        for route in &compiled {
            let key = (route.method.clone(), route.full_path.clone());
            if !seen.insert(key) {
                return Err(BuildError::DuplicateRoute {
                    method: route.method.clone(),
                    path: route.full_path.clone(),
                });
            }
        }

        debug!(count = compiled.len(), "lokstra: compiled route table");
        for route in &compiled {
            debug!(method = %route.method, path = %route.full_path, name = %route.full_name, "route");
        }

        let mut root = Node::default();
        for route in compiled {
            insert(&mut root, &route);
        }

        Ok(RouterEngine { root })
    }
}

/// Runs the GET handler it was synthesized from but discards the body,
/// keeping status and headers intact — a `HEAD` response must never carry
/// bytes on the wire even though its handler computed them (§4.B).
fn head_handler(inner: HandlerFn) -> HandlerFn {
    std::sync::Arc::new(move |ctx| {
        let inner = inner.clone();
        Box::pin(async move {
            let resp = inner(ctx).await?;
            let (parts, _) = resp.into_parts();
            Ok(http::Response::from_parts(parts, lokstra_http::Body::empty()))
        })
    })
}

fn allow_header_value(methods: &[Method]) -> String {
    let mut names: Vec<&str> = methods.iter().map(|m| m.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    names.join(", ")
}

#[derive(Debug)]
pub enum BuildError {
    DuplicateRoute { method: Method, path: String },
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BuildError::DuplicateRoute { method, path } => {
                write!(f, "duplicate route registration: {method} {path}")
            }
        }
    }
}

impl std::error::Error for BuildError {}

#[derive(Default)]
struct Node {
    static_children: HashMap<String, Node>,
    param_child: Option<(String, Box<Node>)>,
    wildcard: Option<(String, CompiledRoute)>,
    routes: HashMap<Method, CompiledRoute>,
}

fn insert(root: &mut Node, route: &CompiledRoute) {
    let segments: Vec<&str> = route
        .full_path
        .trim_start_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    insert_segments(root, &segments, route);
}

fn insert_segments(node: &mut Node, segments: &[&str], route: &CompiledRoute) {
    let Some((head, rest)) = segments.split_first() else {
        node.routes.insert(route.method.clone(), route.clone());
        return;
    };

    if let Some(tail_name) = head.strip_prefix('{').and_then(|s| s.strip_suffix("...}")) {
        node.wildcard = Some((tail_name.to_string(), route.clone()));
        return;
    }

    if let Some(param_name) = head.strip_prefix('{').and_then(|s| s.strip_suffix('}')) {
        let entry = node
            .param_child
            .get_or_insert_with(|| (param_name.to_string(), Box::new(Node::default())));
        insert_segments(&mut entry.1, rest, route);
        return;
    }

    let child = node.static_children.entry(head.to_string()).or_default();
    insert_segments(child, rest, route);
}

/// The compiled, immutable route tree produced by [`Router::build`].
/// Matching walks static segments first, then a single param child, then
/// falls back to a `{tail...}` wildcard — the same precedence order most
/// trie-based HTTP routers use (most specific match wins).
pub struct RouterEngine {
    root: Node,
}

pub struct Matched {
    pub route: CompiledRoute,
    pub path_params: HashMap<String, String>,
}

impl RouterEngine {
    pub fn matches(&self, method: &Method, path: &str) -> Option<Matched> {
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect();
        let mut params = HashMap::new();
        match_segments(&self.root, &segments, method, &mut params)
            .map(|route| Matched { route, path_params: params })
    }

    /// The set of methods registered for `path`, used to build `Allow`
    /// headers and to distinguish 404 (no such path) from 405 (wrong
    /// method).
    pub fn allowed_methods(&self, path: &str) -> Vec<Method> {
        let segments: Vec<&str> = path.trim_start_matches('/').split('/').filter(|s| !s.is_empty()).collect();
        allowed_methods_segments(&self.root, &segments)
    }
}

fn match_segments(
    node: &Node,
    segments: &[&str],
    method: &Method,
    params: &mut HashMap<String, String>,
) -> Option<CompiledRoute> {
    if segments.is_empty() {
        return node.routes.get(method).cloned();
    }

    let (head, rest) = segments.split_first().unwrap();

    if let Some(child) = node.static_children.get(*head) {
        if let Some(route) = match_segments(child, rest, method, params) {
            return Some(route);
        }
    }

    if let Some((name, child)) = &node.param_child {
        let mut attempt = params.clone();
        attempt.insert(name.clone(), head.to_string());
        if let Some(route) = match_segments(child, rest, method, &mut attempt) {
            *params = attempt;
            return Some(route);
        }
    }

    if let Some((name, route)) = &node.wildcard {
        if route.method == *method {
            params.insert(name.clone(), segments.join("/"));
            return Some(route.clone());
        }
    }

    None
}

fn allowed_methods_segments(node: &Node, segments: &[&str]) -> Vec<Method> {
    if segments.is_empty() {
        return node.routes.keys().cloned().collect();
    }
    let (head, rest) = segments.split_first().unwrap();
    if let Some(child) = node.static_children.get(*head) {
        let methods = allowed_methods_segments(child, rest);
        if !methods.is_empty() {
            return methods;
        }
    }
    if let Some((_, child)) = &node.param_child {
        let methods = allowed_methods_segments(child, rest);
        if !methods.is_empty() {
            return methods;
        }
    }
    if let Some((_, route)) = &node.wildcard {
        return vec![route.method.clone()];
    }
    Vec::new()
}
