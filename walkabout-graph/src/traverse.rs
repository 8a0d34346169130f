use serde_json::{Map, Value};
use walkabout_core::Error;
use walkabout_store::FindOptions;

use crate::context::{require_current, GraphContext};
use crate::entity::{Direction, Edge, Node};

/// Options for `Node::connect`.
#[derive(Debug, Clone)]
pub struct ConnectOptions {
    pub kind: String,
    pub direction: Direction,
    pub context: Map<String, Value>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            kind: "Edge".into(),
            direction: Direction::Out,
            context: Map::new(),
        }
    }
}

impl ConnectOptions {
    pub fn kind(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            ..Self::default()
        }
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = direction;
        self
    }

    pub fn field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.context.insert(name.into(), value);
        self
    }
}

/// Predicates for semantic traversal (`nodes` / `node`): filter connected
/// nodes on edge kind/fields and on target-node kind/fields.
#[derive(Debug, Clone, Default)]
pub struct TraversalFilter {
    pub direction: Option<Direction>,
    node_kinds: Vec<(String, Option<Value>)>,
    edge_kinds: Vec<(String, Option<Value>)>,
    context_eq: Map<String, Value>,
    limit: Option<usize>,
}

impl TraversalFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn direction(mut self, direction: Direction) -> Self {
        self.direction = Some(direction);
        self
    }

    /// Accept target nodes of this kind.
    pub fn node_kind(mut self, kind: impl Into<String>) -> Self {
        self.node_kinds.push((kind.into(), None));
        self
    }

    /// Accept target nodes of this kind matching a query over their document
    /// (user fields under `context.`).
    pub fn node_kind_where(mut self, kind: impl Into<String>, query: Value) -> Self {
        self.node_kinds.push((kind.into(), Some(query)));
        self
    }

    pub fn edge_kind(mut self, kind: impl Into<String>) -> Self {
        self.edge_kinds.push((kind.into(), None));
        self
    }

    pub fn edge_kind_where(mut self, kind: impl Into<String>, query: Value) -> Self {
        self.edge_kinds.push((kind.into(), Some(query)));
        self
    }

    /// Shorthand equality on a target-node context field
    /// (`where_eq("active", true)` is sugar for `context.active: {$eq: true}`).
    pub fn where_eq(mut self, field: impl Into<String>, value: Value) -> Self {
        self.context_eq.insert(field.into(), value);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    fn edge_accepts(&self, edge: &Edge) -> Result<bool, Error> {
        kind_filter_accepts(&self.edge_kinds, edge.kind(), &edge.to_doc())
    }

    fn node_accepts(&self, node: &Node) -> Result<bool, Error> {
        let doc = node.to_doc();
        if !kind_filter_accepts(&self.node_kinds, node.kind(), &doc)? {
            return Ok(false);
        }
        if !self.context_eq.is_empty() {
            let mut query = Map::new();
            for (field, value) in &self.context_eq {
                query.insert(format!("context.{field}"), value.clone());
            }
            let hit = walkabout_query::matches(&doc, &Value::Object(query))
                .map_err(|e| Error::query(e.to_string()))?;
            if !hit {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

fn kind_filter_accepts(
    filters: &[(String, Option<Value>)],
    kind: &str,
    doc: &Value,
) -> Result<bool, Error> {
    if filters.is_empty() {
        return Ok(true);
    }
    for (wanted, query) in filters {
        if wanted != kind {
            continue;
        }
        match query {
            None => return Ok(true),
            Some(query) => {
                if walkabout_query::matches(doc, query).map_err(|e| Error::query(e.to_string()))? {
                    return Ok(true);
                }
            }
        }
    }
    Ok(false)
}

impl GraphContext {
    /// The node's incident edges in `edge_ids` insertion order, filtered by
    /// direction as seen from the node. Dangling ids are skipped.
    pub async fn edges_of(
        &self,
        node: &Node,
        direction: Option<Direction>,
    ) -> Result<Vec<Edge>, Error> {
        let mut out = Vec::with_capacity(node.edge_ids().len());
        for edge_id in node.edge_ids() {
            let Some(edge) = self.get_edge(edge_id).await? else {
                continue;
            };
            if direction_accepts(direction, edge.direction_from(&node.id)) {
                out.push(edge);
            }
        }
        Ok(out)
    }

    /// Connected nodes in insertion order.
    pub async fn neighbors_of(
        &self,
        node: &Node,
        direction: Option<Direction>,
        limit: Option<usize>,
    ) -> Result<Vec<Node>, Error> {
        let mut out = Vec::new();
        for edge in self.edges_of(node, direction).await? {
            if let Some(peer) = self.get_node(edge.other_endpoint(&node.id)).await? {
                out.push(peer);
                if limit.map(|l| out.len() >= l).unwrap_or(false) {
                    break;
                }
            }
        }
        Ok(out)
    }

    /// Semantic traversal: connected nodes filtered on both edge predicates
    /// and target-node predicates, in insertion order.
    pub async fn traverse(&self, node: &Node, filter: &TraversalFilter) -> Result<Vec<Node>, Error> {
        let mut out = Vec::new();
        for edge in self.edges_of(node, filter.direction).await? {
            if !filter.edge_accepts(&edge)? {
                continue;
            }
            let Some(peer) = self.get_node(edge.other_endpoint(&node.id)).await? else {
                continue;
            };
            if !filter.node_accepts(&peer)? {
                continue;
            }
            out.push(peer);
            if filter.limit.map(|l| out.len() >= l).unwrap_or(false) {
                break;
            }
        }
        Ok(out)
    }
}

fn direction_accepts(wanted: Option<Direction>, seen: Direction) -> bool {
    match wanted {
        None | Some(Direction::Both) => true,
        Some(Direction::Out) => matches!(seen, Direction::Out | Direction::Both),
        Some(Direction::In) => matches!(seen, Direction::In | Direction::Both),
    }
}

/// Entity-level persistence surface, routed through the current context.
impl Node {
    /// Create and persist a node of `kind` via the current context.
    pub async fn create(kind: &str, context: Map<String, Value>) -> Result<Node, Error> {
        require_current()?.create_node(kind, context).await
    }

    pub async fn save(&mut self) -> Result<(), Error> {
        let ctx = require_current()?;
        ctx.save_node(self).await
    }

    pub async fn flush(&mut self) -> Result<(), Error> {
        let ctx = require_current()?;
        ctx.flush_node(self).await
    }

    /// Destroy this node. Cascades to incident edges by default.
    pub async fn destroy(self, cascade: bool) -> Result<(), Error> {
        require_current()?.delete_node(&self, cascade).await
    }

    pub async fn connect(
        &mut self,
        other: &mut Node,
        options: ConnectOptions,
    ) -> Result<Edge, Error> {
        let ctx = require_current()?;
        ctx.connect_nodes(self, other, &options.kind, options.direction, options.context)
            .await
    }

    /// Remove edges to `other`: every edge of the given kind, or just the
    /// first matching edge when no kind is given. Returns whether anything
    /// was removed.
    pub async fn disconnect(&mut self, other: &mut Node, kind: Option<&str>) -> Result<bool, Error> {
        let ctx = require_current()?;
        Ok(ctx.disconnect_nodes(self, other, kind).await? > 0)
    }

    pub async fn edges(&self, direction: Option<Direction>) -> Result<Vec<Edge>, Error> {
        require_current()?.edges_of(self, direction).await
    }

    pub async fn neighbors(
        &self,
        direction: Option<Direction>,
        limit: Option<usize>,
    ) -> Result<Vec<Node>, Error> {
        require_current()?.neighbors_of(self, direction, limit).await
    }

    /// Connected nodes matching the filter.
    pub async fn nodes(&self, filter: TraversalFilter) -> Result<Vec<Node>, Error> {
        require_current()?.traverse(self, &filter).await
    }

    /// The first connected node matching the filter, materializing at most
    /// one match.
    pub async fn node(&self, filter: TraversalFilter) -> Result<Option<Node>, Error> {
        let mut hits = require_current()?
            .traverse(self, &filter.limit(1))
            .await?;
        Ok(hits.pop())
    }

    pub async fn find(
        kind: Option<&str>,
        query: Value,
        options: FindOptions,
    ) -> Result<Vec<Node>, Error> {
        require_current()?.find_nodes(kind, query, options).await
    }

    pub async fn find_one(kind: Option<&str>, query: Value) -> Result<Option<Node>, Error> {
        require_current()?.find_one_node(kind, query).await
    }

    pub async fn count(kind: Option<&str>, query: Value) -> Result<u64, Error> {
        require_current()?.count_nodes(kind, query).await
    }

    /// Every node of a kind.
    pub async fn all(kind: &str) -> Result<Vec<Node>, Error> {
        Self::find(Some(kind), Value::Object(Map::new()), FindOptions::default()).await
    }
}

impl Edge {
    pub async fn save(&mut self) -> Result<(), Error> {
        let ctx = require_current()?;
        ctx.save_edge(self).await
    }

    pub async fn destroy(self) -> Result<(), Error> {
        require_current()?.delete_edge(&self).await
    }
}
