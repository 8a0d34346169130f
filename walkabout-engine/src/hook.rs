use std::any::Any;
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use crate::outcome::{HookError, HookResult};
use crate::traversal::Visit;

/// A boxed hook future borrowing the walker and the visit context.
pub type HookFuture<'a> = futures_util::future::BoxFuture<'a, HookResult>;

/// A visit hook on walker type `W`.
///
/// Hooks are plain functions returning a boxed future:
///
/// ```ignore
/// fn greet<'a>(w: &'a mut Greeter, v: &'a mut Visit<'_>) -> HookFuture<'a> {
///     Box::pin(async move {
///         v.report(serde_json::json!("hello"));
///         Ok(Outcome::Continue)
///     })
/// }
/// ```
pub type Hook<W> = for<'a, 'b> fn(&'a mut W, &'a mut Visit<'b>) -> HookFuture<'a>;

/// What a hook targets: one kind, several kinds, or anything.
///
/// Specificity drives resolution order: exact-kind hooks fire before
/// multi-kind hooks, which fire before catch-alls; registration order breaks
/// ties within a tier.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Target {
    Any,
    Kind(String),
    Kinds(Vec<String>),
}

impl Target {
    pub fn kind(name: impl Into<String>) -> Self {
        Target::Kind(name.into())
    }

    pub fn kinds<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Target::Kinds(names.into_iter().map(Into::into).collect())
    }

    fn tier(&self) -> u8 {
        match self {
            Target::Kind(_) => 0,
            Target::Kinds(_) => 1,
            Target::Any => 2,
        }
    }

    fn accepts(&self, kind: &str) -> bool {
        match self {
            Target::Any => true,
            Target::Kind(k) => k == kind,
            Target::Kinds(ks) => ks.iter().any(|k| k == kind),
        }
    }
}

/// Type-erased hook, downcast to its walker type at call time.
#[async_trait]
pub(crate) trait ErasedHook: Send + Sync {
    async fn call(&self, walker: &mut (dyn Any + Send + Sync), visit: &mut Visit<'_>) -> HookResult;
}

struct TypedHook<W> {
    f: Hook<W>,
}

#[async_trait]
impl<W: Send + Sync + 'static> ErasedHook for TypedHook<W> {
    async fn call(&self, walker: &mut (dyn Any + Send + Sync), visit: &mut Visit<'_>) -> HookResult {
        match walker.downcast_mut::<W>() {
            Some(walker) => (self.f)(walker, visit).await,
            None => Err(HookError::fatal(walkabout_core::Error::internal(
                "walker type mismatch in hook dispatch",
            ))),
        }
    }
}

pub(crate) fn erase<W: Send + Sync + 'static>(f: Hook<W>) -> Arc<dyn ErasedHook> {
    Arc::new(TypedHook { f })
}

/// An ordered table of hooks keyed by target.
#[derive(Default)]
pub struct HookTable {
    entries: Vec<(Target, Arc<dyn ErasedHook>)>,
}

impl HookTable {
    pub(crate) fn push(&mut self, target: Target, hook: Arc<dyn ErasedHook>) {
        self.entries.push((target, hook));
    }

    /// Hooks matching `kind`, most specific tier first, registration order
    /// within a tier.
    pub(crate) fn resolve(&self, kind: &str) -> Vec<Arc<dyn ErasedHook>> {
        let mut out = Vec::new();
        for tier in 0..=2 {
            for (target, hook) in &self.entries {
                if target.tier() == tier && target.accepts(kind) {
                    out.push(hook.clone());
                }
            }
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Entity-side hook registry: hooks declared on node/edge kinds, targeting
/// walker kinds. The engine fires these before the walker's own hooks.
#[derive(Default)]
pub struct EntityHooks {
    node: DashMap<String, HookTable>,
    edge: DashMap<String, HookTable>,
}

impl EntityHooks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a hook on a node kind, fired when a walker matching `target`
    /// visits a node of that kind.
    pub fn on_node_visit<W: Send + Sync + 'static>(&self, node_kind: &str, target: Target, hook: Hook<W>) {
        self.node
            .entry(node_kind.to_string())
            .or_default()
            .push(target, erase(hook));
    }

    pub fn on_edge_visit<W: Send + Sync + 'static>(&self, edge_kind: &str, target: Target, hook: Hook<W>) {
        self.edge
            .entry(edge_kind.to_string())
            .or_default()
            .push(target, erase(hook));
    }

    pub(crate) fn resolve_node(&self, node_kind: &str, walker_kind: &str) -> Vec<Arc<dyn ErasedHook>> {
        self.node
            .get(node_kind)
            .map(|table| table.resolve(walker_kind))
            .unwrap_or_default()
    }

    pub(crate) fn resolve_edge(&self, edge_kind: &str, walker_kind: &str) -> Vec<Arc<dyn ErasedHook>> {
        self.edge
            .get(edge_kind)
            .map(|table| table.resolve(walker_kind))
            .unwrap_or_default()
    }
}
