//! Method registry: name → handler + metadata, with wildcard fallback.

use crate::handler::{MethodHandler, Middleware};
use crate::config::RateLimitConfig;
use relay_protocol::method_name;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::RwLock;

// ---------------------------------------------------------------------------
// Descriptors
// ---------------------------------------------------------------------------

/// Type tag for a documented parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParamKind {
    String,
    Number,
    Boolean,
    Object,
    Array,
}

impl ParamKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ParamKind::String => "string",
            ParamKind::Number => "number",
            ParamKind::Boolean => "boolean",
            ParamKind::Object => "object",
            ParamKind::Array => "array",
        }
    }
}

/// Documentation for one named parameter.
#[derive(Debug, Clone)]
pub struct ParamSpec {
    pub name: String,
    pub kind: ParamKind,
    pub required: bool,
    pub default: Option<Value>,
    pub description: Option<String>,
}

/// Options attached to a registered method.
#[derive(Debug, Clone, Default)]
pub struct MethodOptions {
    pub description: Option<String>,
    pub params: Vec<ParamSpec>,
    pub returns: Option<String>,
    /// Permission tags required to invoke the method; enforcement is left
    /// to middleware.
    pub permissions: Vec<String>,
    /// Per-handler override of the global rate-limit budget.
    pub rate_limit: Option<RateLimitConfig>,
}

/// A registered method: handler plus metadata.
#[derive(Clone)]
pub struct MethodEntry {
    pub handler: MethodHandler,
    pub options: MethodOptions,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("method name must not be empty")]
    EmptyName,
    #[error("method already registered: {0}")]
    Duplicate(String),
}

// ---------------------------------------------------------------------------
// MethodRegistry
// ---------------------------------------------------------------------------

/// Mapping from method name to handler and metadata.
///
/// Written at setup, read concurrently thereafter.  Insertion order is
/// preserved so discovery listings are stable.
#[derive(Default)]
pub struct MethodRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    methods: HashMap<String, MethodEntry>,
    order: Vec<String>,
    middleware: Vec<Middleware>,
}

impl MethodRegistry {
    pub fn new() -> Self {
        MethodRegistry::default()
    }

    /// Register a method.  Fails on an empty or duplicate name.
    pub async fn register(
        &self,
        name: impl Into<String>,
        handler: MethodHandler,
        options: MethodOptions,
    ) -> Result<(), RegistryError> {
        let name = name.into();
        if !method_name::is_valid_method_name(&name) {
            return Err(RegistryError::EmptyName);
        }
        let mut inner = self.inner.write().await;
        if inner.methods.contains_key(&name) {
            return Err(RegistryError::Duplicate(name));
        }
        inner.order.push(name.clone());
        inner.methods.insert(name, MethodEntry { handler, options });
        Ok(())
    }

    /// Remove a method; returns whether it existed.
    pub async fn unregister(&self, name: &str) -> bool {
        let mut inner = self.inner.write().await;
        inner.order.retain(|n| n != name);
        inner.methods.remove(name).is_some()
    }

    /// Exact lookup, no wildcard fallback.
    pub async fn get(&self, name: &str) -> Option<MethodEntry> {
        self.inner.read().await.methods.get(name).cloned()
    }

    pub async fn contains(&self, name: &str) -> bool {
        self.inner.read().await.methods.contains_key(name)
    }

    /// Lookup with wildcard fallback.
    ///
    /// An exact match always wins.  Otherwise progressively shorter dotted
    /// prefixes suffixed with `.*` are consulted, longest prefix first:
    /// `a.b.c.d` consults `a.b.c.*`, then `a.b.*`, then `a.*`.
    pub async fn resolve(&self, name: &str) -> Option<MethodEntry> {
        let inner = self.inner.read().await;
        if let Some(entry) = inner.methods.get(name) {
            return Some(entry.clone());
        }
        let segments: Vec<&str> = name.split('.').collect();
        for end in (1..segments.len()).rev() {
            let pattern = format!("{}.*", segments[..end].join("."));
            if let Some(entry) = inner.methods.get(&pattern) {
                return Some(entry.clone());
            }
        }
        None
    }

    /// Registered names in insertion order, optionally filtered by
    /// namespace (the second dotted segment).
    pub async fn list(&self, namespace: Option<&str>) -> Vec<String> {
        let inner = self.inner.read().await;
        inner
            .order
            .iter()
            .filter(|name| match namespace {
                None => true,
                Some(ns) => method_name::namespace_of(name) == Some(ns),
            })
            .cloned()
            .collect()
    }

    /// Map from namespace to registered names, preserving insertion order
    /// within each namespace.  Names without a namespace are skipped.
    pub async fn list_by_namespace(&self) -> Vec<(String, Vec<String>)> {
        let inner = self.inner.read().await;
        let mut groups: Vec<(String, Vec<String>)> = Vec::new();
        for name in &inner.order {
            let Some(ns) = method_name::namespace_of(name) else {
                continue;
            };
            match groups.iter_mut().find(|(key, _)| key == ns) {
                Some((_, names)) => names.push(name.clone()),
                None => groups.push((ns.to_owned(), vec![name.clone()])),
            }
        }
        groups
    }

    pub async fn len(&self) -> usize {
        self.inner.read().await.methods.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.inner.read().await.methods.is_empty()
    }

    /// Append an interceptor to the middleware chain.
    pub async fn use_middleware(&self, mw: Middleware) {
        self.inner.write().await.middleware.push(mw);
    }

    /// Snapshot of the middleware chain at this moment.
    pub async fn middleware_snapshot(&self) -> Arc<[Middleware]> {
        Arc::from(self.inner.read().await.middleware.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::handler_fn;
    use serde_json::json;

    fn noop() -> MethodHandler {
        handler_fn(|_, _| async move { Ok(json!(null)) })
    }

    #[tokio::test]
    async fn duplicate_and_empty_registration_fail() {
        let registry = MethodRegistry::new();
        registry
            .register("api.users.list", noop(), MethodOptions::default())
            .await
            .unwrap();
        assert_eq!(
            registry
                .register("api.users.list", noop(), MethodOptions::default())
                .await,
            Err(RegistryError::Duplicate("api.users.list".to_owned()))
        );
        assert_eq!(
            registry.register("", noop(), MethodOptions::default()).await,
            Err(RegistryError::EmptyName)
        );
    }

    #[tokio::test]
    async fn wildcard_matches_deeper_names_but_not_siblings() {
        let registry = MethodRegistry::new();
        registry
            .register("a.b.*", noop(), MethodOptions::default())
            .await
            .unwrap();
        assert!(registry.resolve("a.b.c.d").await.is_some());
        assert!(registry.resolve("a.b.c").await.is_some());
        assert!(registry.resolve("a.c").await.is_none());
        assert!(registry.resolve("a").await.is_none());
    }

    #[tokio::test]
    async fn longer_wildcard_prefix_wins_over_shorter() {
        let registry = MethodRegistry::new();
        let deep = handler_fn(|_, _| async move { Ok(json!("deep")) });
        let shallow = handler_fn(|_, _| async move { Ok(json!("shallow")) });
        registry
            .register("a.*", shallow, MethodOptions::default())
            .await
            .unwrap();
        registry
            .register("a.b.*", deep, MethodOptions::default())
            .await
            .unwrap();
        let entry = registry.resolve("a.b.c").await.unwrap();
        let result = (entry.handler)(None, crate::handler::RequestContext::detached())
            .await
            .unwrap();
        assert_eq!(result, json!("deep"));
    }

    #[tokio::test]
    async fn exact_match_beats_any_wildcard() {
        let registry = MethodRegistry::new();
        let exact = handler_fn(|_, _| async move { Ok(json!("exact")) });
        registry
            .register("a.b.*", noop(), MethodOptions::default())
            .await
            .unwrap();
        registry
            .register("a.b.c", exact, MethodOptions::default())
            .await
            .unwrap();
        let entry = registry.resolve("a.b.c").await.unwrap();
        let result = (entry.handler)(None, crate::handler::RequestContext::detached())
            .await
            .unwrap();
        assert_eq!(result, json!("exact"));
    }

    #[tokio::test]
    async fn listing_preserves_insertion_order_and_groups_by_namespace() {
        let registry = MethodRegistry::new();
        for name in ["api.users.list", "api.jobs.run", "api.users.get", "ping"] {
            registry
                .register(name, noop(), MethodOptions::default())
                .await
                .unwrap();
        }
        assert_eq!(
            registry.list(None).await,
            vec!["api.users.list", "api.jobs.run", "api.users.get", "ping"]
        );
        assert_eq!(
            registry.list(Some("users")).await,
            vec!["api.users.list", "api.users.get"]
        );
        let grouped = registry.list_by_namespace().await;
        assert_eq!(
            grouped,
            vec![
                (
                    "users".to_owned(),
                    vec!["api.users.list".to_owned(), "api.users.get".to_owned()]
                ),
                ("jobs".to_owned(), vec!["api.jobs.run".to_owned()]),
            ]
        );
    }

    #[tokio::test]
    async fn unregister_removes_from_order_and_lookup() {
        let registry = MethodRegistry::new();
        registry
            .register("api.users.list", noop(), MethodOptions::default())
            .await
            .unwrap();
        assert!(registry.unregister("api.users.list").await);
        assert!(!registry.unregister("api.users.list").await);
        assert!(registry.get("api.users.list").await.is_none());
        assert!(registry.is_empty().await);
    }
}
