use std::any::Any;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use walkabout_core::{Error, FieldSet};

use crate::hook::{erase, ErasedHook, Hook, HookTable, Target};

type Decoder = Arc<dyn Fn(&Value) -> Result<Box<dyn Any + Send + Sync>, Error> + Send + Sync>;

/// The immutable description of a walker kind: its name, declared fields,
/// hook tables, and protection limits. Built once at startup and shared.
pub struct WalkerSpec {
    pub name: String,
    pub fields: FieldSet,
    pub(crate) decode: Decoder,
    pub(crate) node_hooks: HookTable,
    pub(crate) edge_hooks: HookTable,
    pub(crate) exit_hooks: Vec<Arc<dyn ErasedHook>>,
    pub max_depth: Option<u32>,
    pub max_visits: Option<u64>,
    pub acyclic: bool,
    pub record_trail: bool,
}

impl WalkerSpec {
    pub fn builder<W>(name: impl Into<String>) -> WalkerSpecBuilder<W>
    where
        W: DeserializeOwned + Send + Sync + 'static,
    {
        WalkerSpecBuilder {
            name: name.into(),
            fields: FieldSet::default(),
            node_hooks: HookTable::default(),
            edge_hooks: HookTable::default(),
            exit_hooks: Vec::new(),
            max_depth: None,
            max_visits: None,
            acyclic: false,
            record_trail: false,
            _walker: PhantomData,
        }
    }

    pub(crate) fn instantiate(&self, body: &Value) -> Result<Box<dyn Any + Send + Sync>, Error> {
        (self.decode)(body)
    }
}

/// Typed builder for a [`WalkerSpec`].
pub struct WalkerSpecBuilder<W> {
    name: String,
    fields: FieldSet,
    node_hooks: HookTable,
    edge_hooks: HookTable,
    exit_hooks: Vec<Arc<dyn ErasedHook>>,
    max_depth: Option<u32>,
    max_visits: Option<u64>,
    acyclic: bool,
    record_trail: bool,
    _walker: PhantomData<fn() -> W>,
}

impl<W> WalkerSpecBuilder<W>
where
    W: DeserializeOwned + Send + Sync + 'static,
{
    /// Declare the walker's fields; they become the endpoint request schema.
    pub fn fields(mut self, fields: FieldSet) -> Self {
        self.fields = fields;
        self
    }

    /// Hook fired when visiting nodes matching `target`.
    pub fn on_node(mut self, target: Target, hook: Hook<W>) -> Self {
        self.node_hooks.push(target, erase(hook));
        self
    }

    /// Hook fired when visiting nodes of one kind.
    pub fn on_node_kind(self, kind: &str, hook: Hook<W>) -> Self {
        self.on_node(Target::kind(kind), hook)
    }

    /// Catch-all node hook.
    pub fn on_any_node(self, hook: Hook<W>) -> Self {
        self.on_node(Target::Any, hook)
    }

    pub fn on_edge(mut self, target: Target, hook: Hook<W>) -> Self {
        self.edge_hooks.push(target, erase(hook));
        self
    }

    pub fn on_edge_kind(self, kind: &str, hook: Hook<W>) -> Self {
        self.on_edge(Target::kind(kind), hook)
    }

    pub fn on_any_edge(self, hook: Hook<W>) -> Self {
        self.on_edge(Target::Any, hook)
    }

    /// Finalization hook, run after the queue drains, after `disengage`, on
    /// a protection limit, and on cancellation.
    pub fn on_exit(mut self, hook: Hook<W>) -> Self {
        self.exit_hooks.push(erase(hook));
        self
    }

    pub fn max_depth(mut self, depth: u32) -> Self {
        self.max_depth = Some(depth);
        self
    }

    pub fn max_visits(mut self, visits: u64) -> Self {
        self.max_visits = Some(visits);
        self
    }

    /// Track visited ids and never process an entity twice.
    pub fn acyclic(mut self) -> Self {
        self.acyclic = true;
        self
    }

    /// Record each visited entity id into the serialized response.
    pub fn record_trail(mut self) -> Self {
        self.record_trail = true;
        self
    }

    pub fn build(self) -> Arc<WalkerSpec> {
        let fields = self.fields.clone();
        let decode: Decoder = Arc::new(move |body: &Value| {
            let walker: W = serde_json::from_value(body.clone())
                .map_err(|e| Error::new(walkabout_core::ErrorKind::Validation, e.to_string()))?;
            Ok(Box::new(walker) as Box<dyn Any + Send + Sync>)
        });
        Arc::new(WalkerSpec {
            name: self.name,
            fields,
            decode,
            node_hooks: self.node_hooks,
            edge_hooks: self.edge_hooks,
            exit_hooks: self.exit_hooks,
            max_depth: self.max_depth,
            max_visits: self.max_visits,
            acyclic: self.acyclic,
            record_trail: self.record_trail,
        })
    }
}
