//! Capability registry
//!
//! Maps a reference kind (`tool:search`, `db`) to the resolver that fulfils
//! it. A registry is built once, then shared read-only (behind an `Arc`) by
//! every run, so concurrent runs never observe a registration in progress.

use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use thiserror::Error;

use crate::parser::semantic_validator::rules::is_valid_kind;

/// Everything a resolver gets to see about one reference annotation.
#[derive(Debug, Clone, Copy)]
pub struct ResolveRequest<'a> {
    pub kind: &'a str,
    /// Quoted target of `@kind:"target"`
    pub target: Option<&'a str>,
    pub body: &'a str,
    pub params: &'a BTreeMap<String, String>,
    pub context: &'a Map<String, Value>,
}

/// Fulfils reference annotations of one kind. May suspend on external work;
/// the interpreter awaits each call before moving to the next reference.
#[async_trait]
pub trait CapabilityResolver: Send + Sync {
    async fn resolve(&self, request: ResolveRequest<'_>) -> anyhow::Result<Value>;
}

struct FnResolver<F>(F);

#[async_trait]
impl<F> CapabilityResolver for FnResolver<F>
where
    F: Fn(&ResolveRequest<'_>) -> anyhow::Result<Value> + Send + Sync,
{
    async fn resolve(&self, request: ResolveRequest<'_>) -> anyhow::Result<Value> {
        (self.0)(&request)
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a resolver is already registered for '{0}'")]
    Duplicate(String),
    #[error("'{0}' is not a valid reference kind")]
    InvalidKind(String),
}

#[derive(Clone, Default)]
pub struct CapabilityRegistry {
    resolvers: HashMap<String, Arc<dyn CapabilityResolver>>,
}

impl CapabilityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `resolver` for `kind`. A kind may have at most one resolver.
    pub fn register(
        &mut self,
        kind: impl Into<String>,
        resolver: impl CapabilityResolver + 'static,
    ) -> Result<(), RegistryError> {
        let kind = kind.into();
        if !is_valid_kind(&kind) {
            return Err(RegistryError::InvalidKind(kind));
        }
        if self.resolvers.contains_key(&kind) {
            return Err(RegistryError::Duplicate(kind));
        }
        tracing::debug!(kind = %kind, "registered capability resolver");
        self.resolvers.insert(kind, Arc::new(resolver));
        Ok(())
    }

    /// Register a synchronous closure as a resolver
    pub fn register_fn<F>(&mut self, kind: impl Into<String>, resolve: F) -> Result<(), RegistryError>
    where
        F: Fn(&ResolveRequest<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(kind, FnResolver(resolve))
    }

    /// Resolver for `kind`: an exact match first, then the kind's namespace
    /// (`tool` for `tool:search`).
    pub fn lookup(&self, kind: &str) -> Option<&Arc<dyn CapabilityResolver>> {
        self.resolvers.get(kind).or_else(|| {
            let (namespace, _) = kind.split_once(':')?;
            self.resolvers.get(namespace)
        })
    }

    pub fn contains(&self, kind: &str) -> bool {
        self.lookup(kind).is_some()
    }

    /// Registered kinds, sorted
    pub fn kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.resolvers.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn len(&self) -> usize {
        self.resolvers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.resolvers.is_empty()
    }
}

impl std::fmt::Debug for CapabilityRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityRegistry")
            .field("kinds", &self.kinds())
            .finish()
    }
}
