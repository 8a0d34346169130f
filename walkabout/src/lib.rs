//! Walkabout — an object-spatial application framework.
//!
//! A typed property graph stored in a pluggable document backend, traversed
//! by *walkers* (cooperative state machines with typed visit hooks), and
//! exposed over HTTP through a registry-driven endpoint dispatcher.
//!
//! This facade crate re-exports the sub-crates through a single dependency:
//!
//! ```ignore
//! use walkabout::prelude::*;
//! ```
//!
//! # Feature flags
//!
//! | Feature  | Default | Crates                                          |
//! |----------|---------|-------------------------------------------------|
//! | `server` | **yes** | `walkabout-server`, `-security`, `-rate-limit`  |

pub use walkabout_core;
pub use walkabout_engine;
pub use walkabout_graph;
pub use walkabout_query;
pub use walkabout_store;

// Everything from walkabout-core is available at the top level.
pub use walkabout_core::*;

#[cfg(feature = "server")]
pub use walkabout_rate_limit;
#[cfg(feature = "server")]
pub use walkabout_security;
#[cfg(feature = "server")]
pub use walkabout_server;

pub mod prelude {
    pub use walkabout_core::{
        AppConfig, EntityId, Error, ErrorKind, FieldSet, FieldSpec, FieldType,
    };
    pub use walkabout_engine::{
        EntityHooks, Hook, HookFuture, Outcome, Target, Traversal, Visit, WalkerSpec,
    };
    pub use walkabout_graph::{
        ConnectOptions, Direction, Edge, EdgeKind, Entity, GraphContext, KindRegistry, Node,
        NodeKind, TraversalFilter,
    };
    pub use walkabout_store::{Backend, BackendRegistry, FindOptions, MemoryBackend};

    #[cfg(feature = "server")]
    pub use walkabout_server::{App, AppBuilder, EndpointDef, WebhookSpec};
}
