//! The walker engine: queue-driven cooperative traversal over the graph.
//!
//! A walker is described once by a [`WalkerSpec`] (fields, hook tables,
//! protection limits) and run per request as a [`Traversal`]. The engine
//! pops one entity at a time off the FIFO queue, fires entity-side hooks
//! then walker-side hooks (most specific target first), folds each hook's
//! [`Outcome`], and yields between steps so a run can be cancelled at any
//! suspension point.

mod events;
mod hook;
mod outcome;
mod queue;
mod spec;
mod traversal;

pub use events::{global as global_events, EventBus};
pub use hook::{EntityHooks, Hook, HookFuture, HookTable, Target};
pub use outcome::{HookError, HookResult, Outcome};
pub use queue::{Queue, QueueError};
pub use spec::{WalkerSpec, WalkerSpecBuilder};
pub use traversal::{Traversal, Visit, WalkerState};
