//! Route groups and the radix-tree route table.
//!
//! Routes are declared through [`Group`]s: a path prefix plus handlers that
//! run before every route in the group. Groups nest; at build time they
//! flatten into one table with one `matchit` tree per method.

use std::collections::HashMap;
use std::sync::Arc;

use matchit::Router as MatchitRouter;

use crate::error::{Error, Result};
use crate::handler::{BoxedHandler, Chain, Handler};
use crate::method::Method;

/// A registered route before flattening.
pub(crate) struct Route {
    pub(crate) method: Method,
    pub(crate) path: String,
    pub(crate) handlers: Vec<BoxedHandler>,
}

/// A set of routes sharing a path prefix and leading handlers.
///
/// ```rust,no_run
/// # use trellis::{disable_journal, health, Group};
/// # fn declare(g: Group) -> Group {
/// g.with(disable_journal)
///     .get("/ping", health::ping)
///     .get("/info", health::info)
/// # }
/// ```
pub struct Group {
    prefix: String,
    handlers: Vec<BoxedHandler>,
    routes: Vec<Route>,
}

impl Group {
    pub(crate) fn new(prefix: &str) -> Self {
        Self { prefix: prefix.to_owned(), handlers: Vec::new(), routes: Vec::new() }
    }

    /// Run `handler` before every route of this group, in `with` order.
    pub fn with(mut self, handler: impl Handler) -> Self {
        self.handlers.push(handler.into_boxed_handler());
        self
    }

    /// Declare a nested group under `prefix`.
    pub fn group(mut self, prefix: &str, build: impl FnOnce(Group) -> Group) -> Self {
        let child = build(Group::new(prefix));
        self.routes.extend(child.into_routes());
        self
    }

    /// Register a handler chain for a method + path pair. Returns `self` for chaining.
    ///
    /// Path parameters use `{name}` syntax; `{*name}` captures the rest.
    pub fn handle(mut self, method: Method, path: &str, chain: impl Into<Chain>) -> Self {
        self.routes.push(Route {
            method,
            path: path.to_owned(),
            handlers: chain.into().into_handlers(),
        });
        self
    }

    /// Register `chain` under every routable method.
    pub fn any(self, path: &str, chain: impl Into<Chain>) -> Self {
        let chain = chain.into();
        Method::ALL
            .into_iter()
            .fold(self, |group, method| group.handle(method, path, chain.clone()))
    }

    pub fn get(self, path: &str, handler: impl Into<Chain>) -> Self { self.handle(Method::Get, path, handler) }
    pub fn post(self, path: &str, handler: impl Into<Chain>) -> Self { self.handle(Method::Post, path, handler) }
    pub fn put(self, path: &str, handler: impl Into<Chain>) -> Self { self.handle(Method::Put, path, handler) }
    pub fn patch(self, path: &str, handler: impl Into<Chain>) -> Self { self.handle(Method::Patch, path, handler) }
    pub fn delete(self, path: &str, handler: impl Into<Chain>) -> Self { self.handle(Method::Delete, path, handler) }
    pub fn options(self, path: &str, handler: impl Into<Chain>) -> Self { self.handle(Method::Options, path, handler) }
    pub fn head(self, path: &str, handler: impl Into<Chain>) -> Self { self.handle(Method::Head, path, handler) }

    /// Apply this group's prefix and leading handlers to its routes.
    pub(crate) fn into_routes(self) -> Vec<Route> {
        let Self { prefix, handlers, routes } = self;
        routes
            .into_iter()
            .map(|route| Route {
                method: route.method,
                path: join(&prefix, &route.path),
                handlers: handlers.iter().cloned().chain(route.handlers).collect(),
            })
            .collect()
    }
}

fn join(prefix: &str, path: &str) -> String {
    let prefix = prefix.trim_end_matches('/');
    match path.trim_start_matches('/') {
        "" if prefix.is_empty() => "/".to_owned(),
        "" => prefix.to_owned(),
        rest => format!("{prefix}/{rest}"),
    }
}

// ── Route table ───────────────────────────────────────────────────────────────

/// Result of a route lookup.
pub(crate) enum Lookup {
    Found(Arc<[BoxedHandler]>, HashMap<String, String>),
    MethodNotAllowed,
    NotFound,
}

/// One radix tree per HTTP method. O(path-length) lookup. Built once at
/// startup, shared read-only across requests.
#[derive(Default)]
pub(crate) struct Routes {
    trees: HashMap<Method, MatchitRouter<Arc<[BoxedHandler]>>>,
    paths: Vec<(Method, String)>,
}

impl Routes {
    pub(crate) fn build(routes: Vec<Route>) -> Result<Self> {
        let mut table = Self::default();
        for route in routes {
            table
                .trees
                .entry(route.method)
                .or_default()
                .insert(route.path.clone(), Arc::from(route.handlers))
                .map_err(|source| Error::InvalidRoute { path: route.path.clone(), source })?;
            table.paths.push((route.method, route.path));
        }
        Ok(table)
    }

    pub(crate) fn lookup(&self, method: &http::Method, path: &str) -> Lookup {
        let matched = Method::try_from(method)
            .ok()
            .and_then(|m| self.trees.get(&m))
            .and_then(|tree| tree.at(path).ok());

        if let Some(matched) = matched {
            let params = matched.params.iter()
                .map(|(k, v)| (k.to_owned(), v.to_owned()))
                .collect();
            return Lookup::Found(Arc::clone(matched.value), params);
        }

        if self.trees.values().any(|tree| tree.at(path).is_ok()) {
            Lookup::MethodNotAllowed
        } else {
            Lookup::NotFound
        }
    }

    /// Every registered `(method, path)`, in registration order.
    pub(crate) fn paths(&self) -> impl Iterator<Item = (Method, &str)> {
        self.paths.iter().map(|(m, p)| (*m, p.as_str()))
    }
}
