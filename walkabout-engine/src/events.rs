use std::panic::AssertUnwindSafe;
use std::sync::{Arc, OnceLock, RwLock};

use serde_json::Value;

type Subscriber = Arc<dyn Fn(&str, &Value) + Send + Sync>;

/// In-process fan-out for walker observability events.
///
/// Emission is non-blocking; a panicking subscriber is logged and swallowed,
/// never surfaced to the walker.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe<F>(&self, subscriber: F)
    where
        F: Fn(&str, &Value) + Send + Sync + 'static,
    {
        self.subscribers.write().unwrap().push(Arc::new(subscriber));
    }

    pub fn emit(&self, event: &str, payload: &Value) {
        let subscribers = self.subscribers.read().unwrap().clone();
        for subscriber in subscribers {
            let result = std::panic::catch_unwind(AssertUnwindSafe(|| subscriber(event, payload)));
            if result.is_err() {
                tracing::warn!(event, "event subscriber panicked");
            }
        }
    }
}

/// The process-wide bus used when a traversal is not given its own.
pub fn global() -> &'static EventBus {
    static GLOBAL: OnceLock<EventBus> = OnceLock::new();
    GLOBAL.get_or_init(EventBus::new)
}
