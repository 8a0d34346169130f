//! The typed property-graph model: nodes and edges over documents, a kind
//! registry with declared fields and indexes, and the [`GraphContext`] that
//! binds an entity family to a storage backend.
//!
//! Entity instances are snapshots of documents; `edge_ids` on a node is the
//! single source of truth for incidence, and the engine only ever holds ids.

mod context;
mod entity;
mod kind;
mod traverse;

pub use context::{
    clear_default_context, current, deferred_saves_enabled, set_default_context,
    set_deferred_saves_enabled, with_context, GraphContext, EDGE_COLLECTION, NODE_COLLECTION,
};
pub use entity::{Direction, Edge, Entity, Node};
pub use kind::{EdgeKind, KindRegistry, NodeKind};
pub use traverse::{ConnectOptions, TraversalFilter};
