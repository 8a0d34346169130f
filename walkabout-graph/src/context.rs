use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};

use dashmap::DashMap;
use serde_json::{Map, Value};
use walkabout_core::{EntityId, EntityKind, Error};
use walkabout_store::{Backend, FindOptions, StorageError};

use crate::entity::{Direction, Edge, Node};
use crate::kind::KindRegistry;

pub const NODE_COLLECTION: &str = "node";
pub const EDGE_COLLECTION: &str = "edge";

static DEFERRED_ENABLED: AtomicBool = AtomicBool::new(true);

/// Process-wide kill switch for deferred writes. When off, `save` on a
/// deferred instance writes immediately.
pub fn set_deferred_saves_enabled(enabled: bool) {
    DEFERRED_ENABLED.store(enabled, Ordering::Relaxed);
}

pub fn deferred_saves_enabled() -> bool {
    DEFERRED_ENABLED.load(Ordering::Relaxed)
}

pub(crate) fn from_storage(err: StorageError) -> Error {
    match err {
        StorageError::DuplicateKey { collection, index } => {
            Error::conflict(format!("duplicate key in {collection} ({index})"))
        }
        StorageError::Query(err) => Error::query(err.to_string()),
        other => Error::storage(other.to_string()),
    }
}

/// The binding of the entity layer to one storage backend.
///
/// One context per logical database. All entity persistence flows through
/// here; the first write of each kind triggers its declared index creation.
pub struct GraphContext {
    backend: Arc<dyn Backend>,
    kinds: Arc<KindRegistry>,
    indexed: DashMap<String, ()>,
}

impl GraphContext {
    pub fn new(backend: Arc<dyn Backend>, kinds: Arc<KindRegistry>) -> Arc<Self> {
        Arc::new(Self {
            backend,
            kinds,
            indexed: DashMap::new(),
        })
    }

    pub fn backend(&self) -> &Arc<dyn Backend> {
        &self.backend
    }

    pub fn kinds(&self) -> &Arc<KindRegistry> {
        &self.kinds
    }

    async fn ensure_indexes(&self, entity: EntityKind, kind: &str) -> Result<(), Error> {
        let key = format!("{}:{kind}", entity.prefix());
        if self.indexed.contains_key(&key) {
            return Ok(());
        }
        let (collection, specs) = match entity {
            EntityKind::Node => (NODE_COLLECTION, self.kinds.node_indexes(kind)),
            EntityKind::Edge => (EDGE_COLLECTION, self.kinds.edge_indexes(kind)),
        };
        for spec in &specs {
            self.backend
                .create_index(collection, spec)
                .await
                .map_err(from_storage)?;
        }
        self.indexed.insert(key, ());
        Ok(())
    }

    /// Create the singleton root node if missing. Idempotent.
    pub async fn ensure_root(&self) -> Result<Node, Error> {
        if let Some(root) = self.get_node(&EntityId::root()).await? {
            return Ok(root);
        }
        let root = Node::new(EntityId::root(), Map::new());
        self.backend
            .save(NODE_COLLECTION, root.to_doc())
            .await
            .map_err(from_storage)?;
        Ok(root)
    }

    /// Create and persist a node of the given kind.
    pub async fn create_node(
        &self,
        kind: &str,
        context: Map<String, Value>,
    ) -> Result<Node, Error> {
        let context = self.kinds.validate_node(kind, context)?;
        self.ensure_indexes(EntityKind::Node, kind).await?;
        let node = Node::new(EntityId::generate(EntityKind::Node, kind), context);
        self.backend
            .save(NODE_COLLECTION, node.to_doc())
            .await
            .map_err(from_storage)?;
        Ok(node)
    }

    pub async fn get_node(&self, id: &EntityId) -> Result<Option<Node>, Error> {
        let doc = self
            .backend
            .get(NODE_COLLECTION, id.as_str())
            .await
            .map_err(from_storage)?;
        Ok(doc.as_ref().and_then(Node::from_doc))
    }

    pub async fn require_node(&self, id: &EntityId) -> Result<Node, Error> {
        self.get_node(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("node {id}")))
    }

    /// Persist a node. While the instance is in deferred mode (and the
    /// process switch is on) this only marks it dirty; `flush_node` performs
    /// the physical write.
    pub async fn save_node(&self, node: &mut Node) -> Result<(), Error> {
        if node.is_deferred() && deferred_saves_enabled() {
            node.mark_dirty();
            return Ok(());
        }
        self.write_node(node).await
    }

    /// Write the latest observable state, regardless of deferral.
    pub async fn flush_node(&self, node: &mut Node) -> Result<(), Error> {
        self.write_node(node).await
    }

    async fn write_node(&self, node: &mut Node) -> Result<(), Error> {
        let kind = node.kind().to_string();
        let context = self.kinds.validate_node(&kind, node.context.clone())?;
        node.context = context;
        self.ensure_indexes(EntityKind::Node, &kind).await?;
        self.backend
            .save(NODE_COLLECTION, node.to_doc())
            .await
            .map_err(from_storage)?;
        node.mark_clean();
        Ok(())
    }

    /// Delete a node. With `cascade`, every incident edge is removed and the
    /// peer endpoint's `edge_ids` repaired; the in-memory list mutations are
    /// applied before any document write is issued.
    pub async fn delete_node(&self, node: &Node, cascade: bool) -> Result<(), Error> {
        if cascade {
            for edge_id in node.edge_ids() {
                let Some(edge) = self.get_edge(edge_id).await? else {
                    continue;
                };
                let peer_id = edge.other_endpoint(&node.id);
                let mut peer = if peer_id == &node.id {
                    None
                } else {
                    self.get_node(peer_id).await?
                };
                if let Some(peer) = peer.as_mut() {
                    peer.remove_edge_id(&edge.id);
                }
                self.backend
                    .delete(EDGE_COLLECTION, edge.id.as_str())
                    .await
                    .map_err(from_storage)?;
                if let Some(mut peer) = peer {
                    self.flush_node(&mut peer).await?;
                }
            }
        }
        self.backend
            .delete(NODE_COLLECTION, node.id.as_str())
            .await
            .map_err(from_storage)?;
        Ok(())
    }

    /// Create an edge between two nodes and append its id to both endpoints,
    /// in memory first, then persist edge and endpoints.
    pub async fn connect_nodes(
        &self,
        source: &mut Node,
        target: &mut Node,
        kind: &str,
        direction: Direction,
        context: Map<String, Value>,
    ) -> Result<Edge, Error> {
        let context = self.kinds.validate_edge(kind, context)?;
        self.ensure_indexes(EntityKind::Edge, kind).await?;
        let edge = Edge::new(
            EntityId::generate(EntityKind::Edge, kind),
            source.id.clone(),
            target.id.clone(),
            direction,
            context,
        );
        source.add_edge_id(edge.id.clone());
        target.add_edge_id(edge.id.clone());
        self.backend
            .save(EDGE_COLLECTION, edge.to_doc())
            .await
            .map_err(from_storage)?;
        self.flush_node(source).await?;
        self.flush_node(target).await?;
        Ok(edge)
    }

    /// Remove edges between two nodes: with a kind, every edge of that
    /// kind; without one, only the first matching edge in `edge_ids` order.
    /// Returns how many edges were removed.
    pub async fn disconnect_nodes(
        &self,
        source: &mut Node,
        target: &mut Node,
        kind: Option<&str>,
    ) -> Result<usize, Error> {
        let mut removed = 0;
        for edge_id in source.edge_ids().to_vec() {
            let Some(edge) = self.get_edge(&edge_id).await? else {
                continue;
            };
            let joins = (edge.source == source.id && edge.target == target.id)
                || (edge.source == target.id && edge.target == source.id);
            if !joins {
                continue;
            }
            if let Some(kind) = kind {
                if edge.kind() != kind {
                    continue;
                }
            }
            source.remove_edge_id(&edge.id);
            target.remove_edge_id(&edge.id);
            self.backend
                .delete(EDGE_COLLECTION, edge.id.as_str())
                .await
                .map_err(from_storage)?;
            removed += 1;
            if kind.is_none() {
                break;
            }
        }
        if removed > 0 {
            self.flush_node(source).await?;
            self.flush_node(target).await?;
        }
        Ok(removed)
    }

    pub async fn get_edge(&self, id: &EntityId) -> Result<Option<Edge>, Error> {
        let doc = self
            .backend
            .get(EDGE_COLLECTION, id.as_str())
            .await
            .map_err(from_storage)?;
        Ok(doc.as_ref().and_then(Edge::from_doc))
    }

    pub async fn require_edge(&self, id: &EntityId) -> Result<Edge, Error> {
        self.get_edge(id)
            .await?
            .ok_or_else(|| Error::not_found(format!("edge {id}")))
    }

    pub async fn save_edge(&self, edge: &mut Edge) -> Result<(), Error> {
        let kind = edge.kind().to_string();
        let context = self.kinds.validate_edge(&kind, edge.context.clone())?;
        edge.context = context;
        self.ensure_indexes(EntityKind::Edge, &kind).await?;
        self.backend
            .save(EDGE_COLLECTION, edge.to_doc())
            .await
            .map_err(from_storage)?;
        edge.mark_clean();
        Ok(())
    }

    /// Delete an edge, repairing both endpoints' `edge_ids`.
    pub async fn delete_edge(&self, edge: &Edge) -> Result<(), Error> {
        let mut source = self.get_node(&edge.source).await?;
        let mut target = if edge.source == edge.target {
            None
        } else {
            self.get_node(&edge.target).await?
        };
        if let Some(node) = source.as_mut() {
            node.remove_edge_id(&edge.id);
        }
        if let Some(node) = target.as_mut() {
            node.remove_edge_id(&edge.id);
        }
        self.backend
            .delete(EDGE_COLLECTION, edge.id.as_str())
            .await
            .map_err(from_storage)?;
        if let Some(mut node) = source {
            self.flush_node(&mut node).await?;
        }
        if let Some(mut node) = target {
            self.flush_node(&mut node).await?;
        }
        Ok(())
    }

    /// Find nodes, optionally restricted to one kind. User-data constraints
    /// address `context.<field>` paths.
    pub async fn find_nodes(
        &self,
        kind: Option<&str>,
        query: Value,
        options: FindOptions,
    ) -> Result<Vec<Node>, Error> {
        let query = restrict_kind(query, EntityKind::Node, kind)?;
        let docs = self
            .backend
            .find(NODE_COLLECTION, &query, options)
            .await
            .map_err(from_storage)?;
        Ok(docs.iter().filter_map(Node::from_doc).collect())
    }

    pub async fn find_one_node(
        &self,
        kind: Option<&str>,
        query: Value,
    ) -> Result<Option<Node>, Error> {
        let query = restrict_kind(query, EntityKind::Node, kind)?;
        let doc = self
            .backend
            .find_one(NODE_COLLECTION, &query)
            .await
            .map_err(from_storage)?;
        Ok(doc.as_ref().and_then(Node::from_doc))
    }

    pub async fn count_nodes(&self, kind: Option<&str>, query: Value) -> Result<u64, Error> {
        let query = restrict_kind(query, EntityKind::Node, kind)?;
        self.backend
            .count(NODE_COLLECTION, Some(&query))
            .await
            .map_err(from_storage)
    }

    pub async fn find_edges(
        &self,
        kind: Option<&str>,
        query: Value,
        options: FindOptions,
    ) -> Result<Vec<Edge>, Error> {
        let query = restrict_kind(query, EntityKind::Edge, kind)?;
        let docs = self
            .backend
            .find(EDGE_COLLECTION, &query, options)
            .await
            .map_err(from_storage)?;
        Ok(docs.iter().filter_map(Edge::from_doc).collect())
    }

    /// Sweep edges whose endpoints no longer resolve.
    pub async fn clean(&self) -> Result<u64, Error> {
        self.backend.clean().await.map_err(from_storage)
    }
}

/// Narrow a query to ids of one entity kind by prefix. The caller's query
/// is preserved under `$and` so its own `id` constraints still apply.
fn restrict_kind(query: Value, entity: EntityKind, kind: Option<&str>) -> Result<Value, Error> {
    let Some(kind) = kind else { return Ok(query) };
    if !query.is_object() {
        return Err(Error::query("query must be an object"));
    }
    let prefix = format!("^{}:{}:", entity.prefix(), regex_escape(kind));
    Ok(serde_json::json!({
        "$and": [query, { "id": { "$regex": prefix } }]
    }))
}

fn regex_escape(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for c in raw.chars() {
        if !c.is_ascii_alphanumeric() {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

tokio::task_local! {
    static CURRENT_CONTEXT: Arc<GraphContext>;
}

static DEFAULT_CONTEXT: RwLock<Option<Arc<GraphContext>>> = RwLock::new(None);

/// Install the process-default context, used when no scoped context is
/// active. Mainly for scripts and simple binaries.
pub fn set_default_context(ctx: Arc<GraphContext>) {
    *DEFAULT_CONTEXT.write().unwrap() = Some(ctx);
}

pub fn clear_default_context() {
    *DEFAULT_CONTEXT.write().unwrap() = None;
}

/// The context governing the current execution scope: the innermost
/// [`with_context`] binding, else the process default.
pub fn current() -> Option<Arc<GraphContext>> {
    CURRENT_CONTEXT
        .try_with(|ctx| ctx.clone())
        .ok()
        .or_else(|| DEFAULT_CONTEXT.read().unwrap().clone())
}

pub(crate) fn require_current() -> Result<Arc<GraphContext>, Error> {
    current().ok_or_else(|| Error::internal("no graph context active"))
}

/// Run a future with `ctx` as the current context. Nested calls inside the
/// future (hooks included) resolve to this binding.
pub async fn with_context<F>(ctx: Arc<GraphContext>, fut: F) -> F::Output
where
    F: Future,
{
    CURRENT_CONTEXT.scope(ctx, fut).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use walkabout_store::MemoryBackend;

    fn memory_context() -> Arc<GraphContext> {
        GraphContext::new(
            Arc::new(MemoryBackend::new()),
            Arc::new(KindRegistry::new()),
        )
    }

    #[tokio::test]
    async fn ensure_root_is_idempotent() {
        let ctx = memory_context();
        let a = ctx.ensure_root().await.unwrap();
        let b = ctx.ensure_root().await.unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(
            ctx.backend().count(NODE_COLLECTION, None).await.unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn connect_maintains_both_endpoints() {
        let ctx = memory_context();
        let mut a = ctx.create_node("City", Map::new()).await.unwrap();
        let mut b = ctx.create_node("City", Map::new()).await.unwrap();
        let edge = ctx
            .connect_nodes(&mut a, &mut b, "Highway", Direction::Out, Map::new())
            .await
            .unwrap();
        let a = ctx.require_node(&a.id).await.unwrap();
        let b = ctx.require_node(&b.id).await.unwrap();
        assert!(a.edge_ids().contains(&edge.id));
        assert!(b.edge_ids().contains(&edge.id));
        let stored = ctx.require_edge(&edge.id).await.unwrap();
        assert_eq!(stored.source, a.id);
        assert_eq!(stored.target, b.id);
    }

    #[tokio::test]
    async fn cascade_delete_leaves_no_incident_edges() {
        let ctx = memory_context();
        let mut a = ctx.create_node("City", Map::new()).await.unwrap();
        let mut b = ctx.create_node("City", Map::new()).await.unwrap();
        let edge = ctx
            .connect_nodes(&mut a, &mut b, "Highway", Direction::Out, Map::new())
            .await
            .unwrap();
        ctx.delete_node(&a, true).await.unwrap();
        assert!(ctx.get_edge(&edge.id).await.unwrap().is_none());
        let b = ctx.require_node(&b.id).await.unwrap();
        assert!(!b.edge_ids().contains(&edge.id));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn deferred_saves_coalesce_until_flush() {
        let ctx = memory_context();
        let mut node = ctx.create_node("City", Map::new()).await.unwrap();
        node.defer_saves(true);
        node.set("name", json!("first"));
        ctx.save_node(&mut node).await.unwrap();
        node.set("name", json!("latest"));
        ctx.save_node(&mut node).await.unwrap();
        assert!(node.is_dirty());
        let stored = ctx.require_node(&node.id).await.unwrap();
        assert!(stored.get("name").is_none());

        ctx.flush_node(&mut node).await.unwrap();
        assert!(!node.is_dirty());
        let stored = ctx.require_node(&node.id).await.unwrap();
        assert_eq!(stored.get("name"), Some(&json!("latest")));
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn kill_switch_disables_deferral() {
        set_deferred_saves_enabled(false);
        let ctx = memory_context();
        let mut node = ctx.create_node("City", Map::new()).await.unwrap();
        node.defer_saves(true);
        node.set("name", json!("now"));
        ctx.save_node(&mut node).await.unwrap();
        let stored = ctx.require_node(&node.id).await.unwrap();
        assert_eq!(stored.get("name"), Some(&json!("now")));
        set_deferred_saves_enabled(true);
    }

    #[tokio::test]
    #[serial_test::serial]
    async fn scoped_context_wins_over_default() {
        let scoped = memory_context();
        let fallback = memory_context();
        set_default_context(fallback.clone());
        let seen = with_context(scoped.clone(), async { current().unwrap() }).await;
        assert!(Arc::ptr_eq(&seen, &scoped));
        let seen = current().unwrap();
        assert!(Arc::ptr_eq(&seen, &fallback));
        clear_default_context();
    }

    #[tokio::test]
    async fn find_nodes_restricts_by_kind() {
        let ctx = memory_context();
        ctx.create_node("City", json!({"name": "NYC"}).as_object().unwrap().clone())
            .await
            .unwrap();
        ctx.create_node("Person", Map::new()).await.unwrap();
        let cities = ctx
            .find_nodes(Some("City"), json!({}), FindOptions::default())
            .await
            .unwrap();
        assert_eq!(cities.len(), 1);
        assert_eq!(cities[0].get("name"), Some(&json!("NYC")));
        let all = ctx
            .find_nodes(None, json!({}), FindOptions::default())
            .await
            .unwrap();
        assert_eq!(all.len(), 2);
    }
}
