use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use walkabout_core::{EntityId, EntityKind};

/// Direction of an edge, from its source's point of view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Out,
    In,
    Both,
}

/// A node: an ordered list of incident edge ids plus user fields.
///
/// `edge_ids` preserves the order in which the node participated in
/// `connect` calls and is the single source of truth for incidence; the
/// entity itself never holds pointers to other entities.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: EntityId,
    edge_ids: Vec<EntityId>,
    pub context: Map<String, Value>,
    dirty: bool,
    deferred: bool,
}

impl Node {
    pub(crate) fn new(id: EntityId, context: Map<String, Value>) -> Self {
        Self {
            id,
            edge_ids: Vec::new(),
            context,
            dirty: false,
            deferred: false,
        }
    }

    /// The entity-kind name embedded in the id.
    pub fn kind(&self) -> &str {
        self.id.kind_name()
    }

    pub fn is_root(&self) -> bool {
        self.id.is_root()
    }

    pub fn edge_ids(&self) -> &[EntityId] {
        &self.edge_ids
    }

    /// Append an edge id, preserving insertion order and uniqueness.
    pub(crate) fn add_edge_id(&mut self, id: EntityId) {
        if !self.edge_ids.contains(&id) {
            self.edge_ids.push(id);
            self.dirty = true;
        }
    }

    pub(crate) fn remove_edge_id(&mut self, id: &EntityId) -> bool {
        let before = self.edge_ids.len();
        self.edge_ids.retain(|e| e != id);
        let removed = self.edge_ids.len() != before;
        self.dirty |= removed;
        removed
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.context.get(field)
    }

    /// Set a context field, marking the instance dirty.
    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.context.insert(field.into(), value);
        self.dirty = true;
    }

    /// Toggle deferred-write mode for this instance. While deferred (and the
    /// process-wide switch is on), `save` coalesces into the dirty flag and
    /// only `flush` performs a physical write.
    pub fn defer_saves(&mut self, on: bool) {
        self.deferred = on;
    }

    pub fn is_deferred(&self) -> bool {
        self.deferred
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// The persisted document: structural fields top-level, user data under
    /// `context`.
    pub fn to_doc(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "edge_ids": self.edge_ids,
            "context": self.context,
        })
    }

    pub fn from_doc(doc: &Value) -> Option<Self> {
        let id = EntityId::parse(doc.get("id")?.as_str()?).ok()?;
        let edge_ids = doc
            .get("edge_ids")
            .and_then(Value::as_array)
            .map(|ids| {
                ids.iter()
                    .filter_map(|v| v.as_str())
                    .filter_map(|s| EntityId::parse(s).ok())
                    .collect()
            })
            .unwrap_or_default();
        let context = doc
            .get("context")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Some(Self {
            id,
            edge_ids,
            context,
            dirty: false,
            deferred: false,
        })
    }
}

/// An edge: a typed, directional connection between two nodes.
#[derive(Debug, Clone)]
pub struct Edge {
    pub id: EntityId,
    pub source: EntityId,
    pub target: EntityId,
    pub direction: Direction,
    pub context: Map<String, Value>,
    dirty: bool,
}

impl Edge {
    pub(crate) fn new(
        id: EntityId,
        source: EntityId,
        target: EntityId,
        direction: Direction,
        context: Map<String, Value>,
    ) -> Self {
        Self {
            id,
            source,
            target,
            direction,
            context,
            dirty: false,
        }
    }

    pub fn kind(&self) -> &str {
        self.id.kind_name()
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.context.get(field)
    }

    pub fn set(&mut self, field: impl Into<String>, value: Value) {
        self.context.insert(field.into(), value);
        self.dirty = true;
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    pub(crate) fn mark_clean(&mut self) {
        self.dirty = false;
    }

    /// The id of the endpoint that is not `node_id`, or `node_id` itself for
    /// a self-loop.
    pub fn other_endpoint(&self, node_id: &EntityId) -> &EntityId {
        if &self.source == node_id {
            &self.target
        } else {
            &self.source
        }
    }

    /// This edge's direction as seen from `node_id`.
    pub fn direction_from(&self, node_id: &EntityId) -> Direction {
        match self.direction {
            Direction::Both => Direction::Both,
            Direction::Out if &self.source == node_id => Direction::Out,
            Direction::Out => Direction::In,
            Direction::In if &self.source == node_id => Direction::In,
            Direction::In => Direction::Out,
        }
    }

    pub fn to_doc(&self) -> Value {
        serde_json::json!({
            "id": self.id,
            "source": self.source,
            "target": self.target,
            "direction": self.direction,
            "context": self.context,
        })
    }

    pub fn from_doc(doc: &Value) -> Option<Self> {
        let id = EntityId::parse(doc.get("id")?.as_str()?).ok()?;
        let source = EntityId::parse(doc.get("source")?.as_str()?).ok()?;
        let target = EntityId::parse(doc.get("target")?.as_str()?).ok()?;
        let direction =
            serde_json::from_value(doc.get("direction").cloned().unwrap_or(Value::Null))
                .unwrap_or(Direction::Out);
        let context = doc
            .get("context")
            .and_then(Value::as_object)
            .cloned()
            .unwrap_or_default();
        Some(Self {
            id,
            source,
            target,
            direction,
            context,
            dirty: false,
        })
    }
}

/// Either kind of entity, as handled uniformly by the walker engine.
#[derive(Debug, Clone)]
pub enum Entity {
    Node(Node),
    Edge(Edge),
}

impl Entity {
    pub fn id(&self) -> &EntityId {
        match self {
            Entity::Node(n) => &n.id,
            Entity::Edge(e) => &e.id,
        }
    }

    pub fn kind(&self) -> &str {
        self.id().kind_name()
    }

    pub fn entity_kind(&self) -> EntityKind {
        self.id().kind()
    }

    pub fn as_node(&self) -> Option<&Node> {
        match self {
            Entity::Node(n) => Some(n),
            Entity::Edge(_) => None,
        }
    }

    pub fn as_node_mut(&mut self) -> Option<&mut Node> {
        match self {
            Entity::Node(n) => Some(n),
            Entity::Edge(_) => None,
        }
    }

    pub fn as_edge(&self) -> Option<&Edge> {
        match self {
            Entity::Edge(e) => Some(e),
            Entity::Node(_) => None,
        }
    }

    pub fn as_edge_mut(&mut self) -> Option<&mut Edge> {
        match self {
            Entity::Edge(e) => Some(e),
            Entity::Node(_) => None,
        }
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        match self {
            Entity::Node(n) => n.get(field),
            Entity::Edge(e) => e.get(field),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn node(id: &str) -> Node {
        Node::new(EntityId::parse(id).unwrap(), Map::new())
    }

    #[test]
    fn edge_ids_preserve_insertion_order_without_duplicates() {
        let mut n = node("n:City:1");
        let e1 = EntityId::parse("e:Road:1").unwrap();
        let e2 = EntityId::parse("e:Road:2").unwrap();
        n.add_edge_id(e1.clone());
        n.add_edge_id(e2.clone());
        n.add_edge_id(e1.clone());
        assert_eq!(n.edge_ids(), &[e1.clone(), e2]);
        assert!(n.remove_edge_id(&e1));
        assert!(!n.remove_edge_id(&e1));
    }

    #[test]
    fn node_doc_round_trip() {
        let mut n = node("n:City:1");
        n.set("name", json!("NYC"));
        n.add_edge_id(EntityId::parse("e:Road:1").unwrap());
        let doc = n.to_doc();
        assert_eq!(doc["context"]["name"], json!("NYC"));
        let back = Node::from_doc(&doc).unwrap();
        assert_eq!(back.id, n.id);
        assert_eq!(back.edge_ids(), n.edge_ids());
        assert!(!back.is_dirty());
    }

    #[test]
    fn direction_from_perspective() {
        let edge = Edge::new(
            EntityId::parse("e:Road:1").unwrap(),
            EntityId::parse("n:City:a").unwrap(),
            EntityId::parse("n:City:b").unwrap(),
            Direction::Out,
            Map::new(),
        );
        let a = EntityId::parse("n:City:a").unwrap();
        let b = EntityId::parse("n:City:b").unwrap();
        assert_eq!(edge.direction_from(&a), Direction::Out);
        assert_eq!(edge.direction_from(&b), Direction::In);
        assert_eq!(edge.other_endpoint(&a), &b);
        assert_eq!(edge.other_endpoint(&b), &a);
    }

    #[test]
    fn set_marks_dirty() {
        let mut n = node("n:City:1");
        assert!(!n.is_dirty());
        n.set("name", json!("NYC"));
        assert!(n.is_dirty());
    }
}
