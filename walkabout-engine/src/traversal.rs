use std::any::Any;
use std::collections::HashSet;
use std::sync::Arc;

use serde_json::{json, Map, Value};
use tokio_util::sync::CancellationToken;
use walkabout_core::{EntityId, EntityKind, Error, ErrorKind};
use walkabout_graph::{Entity, GraphContext};

use crate::events::EventBus;
use crate::hook::{EntityHooks, ErasedHook};
use crate::outcome::{HookError, HookResult, Outcome};
use crate::queue::{Queue, QueueError};
use crate::spec::WalkerSpec;

/// Lifecycle of a traversal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WalkerState {
    Ready,
    Running,
    Paused,
    Disengaged,
    Done,
}

enum Flow {
    Continue,
    SkipEntity,
    Disengage,
    Pause,
    Cancelled,
}

/// One walker run: the decoded walker instance, its queue, and the response
/// being assembled. Ephemeral per request; never persisted.
///
/// The drain loop is a cooperative state machine: it awaits each hook,
/// folds the hook's outcome with the flags set through [`Visit`], applies
/// queued mutations, then yields. Hooks may suspend freely; the engine
/// holds no locks across suspension.
pub struct Traversal {
    spec: Arc<WalkerSpec>,
    ctx: Arc<GraphContext>,
    entity_hooks: Arc<EntityHooks>,
    events: EventBus,
    cancel: CancellationToken,
    walker: Box<dyn Any + Send + Sync>,
    queue: Queue,
    max_depth: Option<u32>,
    max_visits: Option<u64>,
    state: WalkerState,
    response: Map<String, Value>,
    trail: Vec<EntityId>,
    visited: HashSet<String>,
    total_visits: u64,
    current_depth: u32,
    skip_requested: bool,
    disengage_requested: bool,
    pause_requested: bool,
    cancelled: bool,
}

impl Traversal {
    /// Decode a walker instance from a request body.
    pub fn decode(
        spec: Arc<WalkerSpec>,
        ctx: Arc<GraphContext>,
        body: &Value,
    ) -> Result<Self, Error> {
        let walker = spec.instantiate(body)?;
        Ok(Self::from_parts(spec, ctx, walker))
    }

    /// Wrap an already-constructed walker instance.
    pub fn with_walker<W: Send + Sync + 'static>(
        spec: Arc<WalkerSpec>,
        ctx: Arc<GraphContext>,
        walker: W,
    ) -> Self {
        Self::from_parts(spec, ctx, Box::new(walker))
    }

    fn from_parts(
        spec: Arc<WalkerSpec>,
        ctx: Arc<GraphContext>,
        walker: Box<dyn Any + Send + Sync>,
    ) -> Self {
        let mut response = Map::new();
        response.insert("reports".into(), Value::Array(Vec::new()));
        let max_depth = spec.max_depth;
        let max_visits = spec.max_visits;
        Self {
            spec,
            ctx,
            entity_hooks: Arc::new(EntityHooks::new()),
            events: crate::events::global().clone(),
            cancel: CancellationToken::new(),
            walker,
            queue: Queue::new(),
            max_depth,
            max_visits,
            state: WalkerState::Ready,
            response,
            trail: Vec::new(),
            visited: HashSet::new(),
            total_visits: 0,
            current_depth: 0,
            skip_requested: false,
            disengage_requested: false,
            pause_requested: false,
            cancelled: false,
        }
    }

    pub fn with_entity_hooks(mut self, hooks: Arc<EntityHooks>) -> Self {
        self.entity_hooks = hooks;
        self
    }

    pub fn with_events(mut self, events: EventBus) -> Self {
        self.events = events;
        self
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Fill in caps the spec left open, typically from engine configuration.
    /// Explicit per-spec limits always win.
    pub fn with_default_limits(mut self, max_depth: u32, max_visits: u64) -> Self {
        self.max_depth.get_or_insert(max_depth);
        self.max_visits.get_or_insert(max_visits);
        self
    }

    pub fn state(&self) -> WalkerState {
        self.state
    }

    pub fn response(&self) -> &Map<String, Value> {
        &self.response
    }

    pub fn trail(&self) -> &[EntityId] {
        &self.trail
    }

    pub fn queue(&self) -> &Queue {
        &self.queue
    }

    pub fn queue_mut(&mut self) -> &mut Queue {
        &mut self.queue
    }

    pub fn walker_ref<W: 'static>(&self) -> Option<&W> {
        self.walker.downcast_ref()
    }

    pub fn walker_mut<W: 'static>(&mut self) -> Option<&mut W> {
        self.walker.downcast_mut()
    }

    /// Ready → Running; the start entity is prepended to the queue.
    pub fn spawn(&mut self, start: EntityId) {
        self.queue.prepend([start], 0);
        if self.state == WalkerState::Ready {
            self.state = WalkerState::Running;
        }
    }

    /// Spawn on `start` and drain to completion.
    pub async fn run(&mut self, start: EntityId) -> Result<(), Error> {
        self.spawn(start);
        self.drain().await
    }

    /// Continue a paused traversal.
    pub async fn resume(&mut self) -> Result<(), Error> {
        if self.state == WalkerState::Paused {
            self.state = WalkerState::Running;
            self.drain().await
        } else {
            Ok(())
        }
    }

    /// Drain the queue, dispatching hooks per entity, until it empties or
    /// the walker disengages, pauses, hits a limit, or is cancelled.
    pub async fn drain(&mut self) -> Result<(), Error> {
        match self.state {
            WalkerState::Ready => self.state = WalkerState::Running,
            WalkerState::Running => {}
            WalkerState::Paused | WalkerState::Disengaged | WalkerState::Done => return Ok(()),
        }
        while self.state == WalkerState::Running {
            if self.cancel.is_cancelled() {
                self.cancelled = true;
                break;
            }
            let Some(entry) = self.queue.pop() else {
                break;
            };
            let Some(mut entity) = self.load(&entry.id).await? else {
                tracing::debug!(id = %entry.id, "queued entity no longer resolves");
                continue;
            };
            if let Some(max) = self.max_visits {
                if self.total_visits >= max {
                    self.record_limit(format!("visit cap of {max} reached"));
                    break;
                }
            }
            if let Some(max) = self.max_depth {
                if entry.depth > max {
                    self.record_limit(format!("depth cap of {max} reached"));
                    break;
                }
            }
            if self.spec.acyclic && !self.visited.insert(entry.id.as_str().to_string()) {
                continue;
            }
            self.total_visits += 1;
            if self.spec.record_trail {
                self.trail.push(entry.id.clone());
            }
            self.current_depth = entry.depth;
            self.events.emit(
                "walker.visit",
                &json!({"walker": self.spec.name, "entity": entry.id.as_str()}),
            );

            let entity_side = match &entity {
                Entity::Node(n) => self.entity_hooks.resolve_node(n.kind(), &self.spec.name),
                Entity::Edge(e) => self.entity_hooks.resolve_edge(e.kind(), &self.spec.name),
            };
            let walker_side = match &entity {
                Entity::Node(n) => self.spec.node_hooks.resolve(n.kind()),
                Entity::Edge(e) => self.spec.edge_hooks.resolve(e.kind()),
            };
            let mut walker = std::mem::replace(&mut self.walker, Box::new(()));
            let flow = self
                .dispatch(walker.as_mut(), &mut entity, entity_side, walker_side)
                .await;
            self.walker = walker;
            match flow {
                Flow::Continue | Flow::SkipEntity => {}
                Flow::Disengage => self.state = WalkerState::Disengaged,
                Flow::Cancelled => break,
                Flow::Pause => {
                    self.state = WalkerState::Paused;
                    return Ok(());
                }
            }
            tokio::task::yield_now().await;
        }
        if self.state != WalkerState::Disengaged {
            self.state = WalkerState::Done;
        }
        self.run_exit_hooks().await;
        Ok(())
    }

    async fn dispatch(
        &mut self,
        walker: &mut (dyn Any + Send + Sync),
        entity: &mut Entity,
        entity_side: Vec<Arc<dyn ErasedHook>>,
        walker_side: Vec<Arc<dyn ErasedHook>>,
    ) -> Flow {
        for hook in entity_side.into_iter().chain(walker_side) {
            let result = {
                let mut visit = Visit {
                    t: &mut *self,
                    current: Some(&mut *entity),
                };
                hook.call(&mut *walker, &mut visit).await
            };
            let flow = self.fold(result);
            if !matches!(flow, Flow::Continue) {
                return flow;
            }
            if self.cancel.is_cancelled() {
                self.cancelled = true;
                return Flow::Cancelled;
            }
        }
        Flow::Continue
    }

    fn fold(&mut self, result: HookResult) -> Flow {
        let pause = std::mem::take(&mut self.pause_requested);
        let skip = std::mem::take(&mut self.skip_requested);
        let disengage = std::mem::take(&mut self.disengage_requested);
        match result {
            Err(err) => {
                self.record_error(&err.error);
                if err.recoverable {
                    Flow::SkipEntity
                } else {
                    Flow::Disengage
                }
            }
            Ok(outcome) => {
                if disengage || outcome == Outcome::Disengage {
                    Flow::Disengage
                } else if pause {
                    Flow::Pause
                } else if skip || outcome == Outcome::Skip {
                    Flow::SkipEntity
                } else {
                    Flow::Continue
                }
            }
        }
    }

    async fn run_exit_hooks(&mut self) {
        if self.cancelled {
            self.response.insert("cancelled".into(), Value::Bool(true));
        }
        let hooks = self.spec.exit_hooks.clone();
        let mut walker = std::mem::replace(&mut self.walker, Box::new(()));
        for hook in hooks {
            let result = {
                let mut visit = Visit {
                    t: &mut *self,
                    current: None,
                };
                hook.call(walker.as_mut(), &mut visit).await
            };
            if let Err(err) = result {
                self.record_error(&err.error);
            }
            self.skip_requested = false;
            self.disengage_requested = false;
            self.pause_requested = false;
        }
        self.walker = walker;
    }

    async fn load(&self, id: &EntityId) -> Result<Option<Entity>, Error> {
        match id.kind() {
            EntityKind::Node => Ok(self.ctx.get_node(id).await?.map(Entity::Node)),
            EntityKind::Edge => Ok(self.ctx.get_edge(id).await?.map(Entity::Edge)),
        }
    }

    fn record_limit(&mut self, message: String) {
        tracing::debug!(walker = %self.spec.name, %message, "walker limit exceeded");
        self.record_error(&Error::new(ErrorKind::WalkerLimit, message));
    }

    fn record_error(&mut self, error: &Error) {
        let mut entry = Map::new();
        entry.insert("error_code".into(), Value::String(error.kind.code().into()));
        entry.insert("message".into(), Value::String(error.message.clone()));
        if let Some(details) = &error.details {
            entry.insert("details".into(), details.clone());
        }
        let errors = self
            .response
            .entry("errors")
            .or_insert_with(|| Value::Array(Vec::new()));
        if let Value::Array(items) = errors {
            items.push(Value::Object(entry));
        }
    }

    /// The serialized walker response: reports, errors, and the trail when
    /// recording is enabled.
    pub fn into_response(mut self) -> Value {
        if self.spec.record_trail {
            let trail: Vec<&str> = self.trail.iter().map(EntityId::as_str).collect();
            self.response.insert("trail".into(), json!(trail));
        }
        Value::Object(self.response)
    }
}

/// The context a hook runs in: the entity being visited (`here`), the
/// response under assembly, and the queue manipulation surface.
pub struct Visit<'t> {
    t: &'t mut Traversal,
    current: Option<&'t mut Entity>,
}

impl<'t> Visit<'t> {
    /// The entity being visited. Always present inside visit hooks; exit
    /// hooks must use [`try_here`](Self::try_here).
    pub fn here(&self) -> &Entity {
        self.current
            .as_deref()
            .expect("here is only available inside visit hooks")
    }

    pub fn here_mut(&mut self) -> &mut Entity {
        self.current
            .as_deref_mut()
            .expect("here is only available inside visit hooks")
    }

    pub fn try_here(&self) -> Option<&Entity> {
        self.current.as_deref()
    }

    /// The graph context governing this traversal.
    pub fn ctx(&self) -> Arc<GraphContext> {
        self.t.ctx.clone()
    }

    /// Depth of the current entity, in hops from the start node.
    pub fn depth(&self) -> u32 {
        self.t.current_depth
    }

    /// Set only during exit hooks after a cancellation.
    pub fn cancelled(&self) -> bool {
        self.t.cancelled
    }

    pub fn trail(&self) -> &[EntityId] {
        &self.t.trail
    }

    /// Append a value to `response.reports`.
    pub fn report(&mut self, value: Value) {
        if let Some(Value::Array(reports)) = self.t.response.get_mut("reports") {
            reports.push(value);
        }
    }

    /// The free-form response object returned to the HTTP caller.
    pub fn response_mut(&mut self) -> &mut Map<String, Value> {
        &mut self.t.response
    }

    /// Emit an observability event. Non-blocking; subscriber failures are
    /// swallowed.
    pub fn emit(&self, event: &str, payload: &Value) {
        self.t.events.emit(event, payload);
    }

    /// Abort the remaining hooks for the current entity only.
    pub fn skip(&mut self) {
        self.t.skip_requested = true;
    }

    /// Stop consuming the queue; `on_exit` still runs.
    pub fn disengage(&mut self) {
        self.t.disengage_requested = true;
    }

    /// Suspend after this hook, preserving the queue.
    pub fn pause(&mut self) {
        self.t.pause_requested = true;
    }

    /// Queue targets for visiting. When the current entity is a node and a
    /// target is a connected node, the connecting edge enters the queue
    /// first, so edge hooks fire on the hop.
    pub async fn visit(
        &mut self,
        targets: impl IntoIterator<Item = EntityId>,
    ) -> Result<(), HookError> {
        let depth = self.t.current_depth + 1;
        let ctx = self.t.ctx.clone();
        let current = self
            .current
            .as_deref()
            .and_then(Entity::as_node)
            .map(|n| (n.id.clone(), n.edge_ids().to_vec()));
        for target in targets {
            if target.kind() == EntityKind::Node {
                if let Some((current_id, edge_ids)) = current.as_ref() {
                    for edge_id in edge_ids {
                        let Some(edge) = ctx.get_edge(edge_id).await.map_err(HookError::fatal)?
                        else {
                            continue;
                        };
                        if edge.other_endpoint(current_id) == &target {
                            self.t.queue.append([edge.id.clone()], depth);
                            break;
                        }
                    }
                }
            }
            self.t.queue.append([target], depth);
        }
        Ok(())
    }

    /// Persist the current entity.
    pub async fn save_here(&mut self) -> Result<(), HookError> {
        let ctx = self.t.ctx.clone();
        match self.current.as_deref_mut() {
            Some(Entity::Node(node)) => ctx.save_node(node).await.map_err(HookError::fatal),
            Some(Entity::Edge(edge)) => ctx.save_edge(edge).await.map_err(HookError::fatal),
            None => Ok(()),
        }
    }

    /// Extend the queue tail.
    pub fn append(&mut self, ids: impl IntoIterator<Item = EntityId>) {
        self.t.queue.append(ids, self.t.current_depth + 1);
    }

    /// Extend the queue head.
    pub fn prepend(&mut self, ids: impl IntoIterator<Item = EntityId>) {
        self.t.queue.prepend(ids, self.t.current_depth + 1);
    }

    /// Insert immediately after the current entity, i.e. at the head of the
    /// remaining queue.
    pub fn add_next(&mut self, ids: impl IntoIterator<Item = EntityId>) {
        self.prepend(ids);
    }

    pub fn insert_before(
        &mut self,
        target: &EntityId,
        ids: impl IntoIterator<Item = EntityId>,
    ) -> Result<(), QueueError> {
        self.t.queue.insert_before(target, ids)
    }

    pub fn insert_after(
        &mut self,
        target: &EntityId,
        ids: impl IntoIterator<Item = EntityId>,
    ) -> Result<(), QueueError> {
        self.t.queue.insert_after(target, ids)
    }

    /// Remove matching entries; returns the removed ids.
    pub fn dequeue(&mut self, ids: &[EntityId]) -> Vec<EntityId> {
        self.t.queue.dequeue(ids)
    }

    pub fn clear_queue(&mut self) {
        self.t.queue.clear();
    }

    /// Snapshot copy of the queued ids.
    pub fn get_queue(&self) -> Vec<EntityId> {
        self.t.queue.snapshot()
    }

    pub fn is_queued(&self, id: &EntityId) -> bool {
        self.t.queue.is_queued(id)
    }
}

impl From<QueueError> for HookError {
    fn from(err: QueueError) -> Self {
        HookError::recoverable(Error::internal(err.to_string()))
    }
}
