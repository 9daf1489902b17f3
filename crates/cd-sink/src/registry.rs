//! A named registry of sinks, grounded on the teacher's `providers/registry.rs`
//! (`HashMap<String, Arc<dyn Trait>>` keyed by name). Lets a scheduler hold more
//! than one sink — e.g. a broker sink for production tasks and a simple queue
//! sink for a legacy one — and route by name if ever needed, though most
//! deployments register exactly one.

use std::collections::HashMap;
use std::sync::Arc;

use cd_core::{Error, Result};

use crate::traits::TaskSink;

#[derive(Default)]
pub struct SinkRegistry {
    sinks: HashMap<String, Arc<dyn TaskSink>>,
}

impl SinkRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, name: impl Into<String>, sink: Arc<dyn TaskSink>) {
        self.sinks.insert(name.into(), sink);
    }

    pub fn get(&self, name: &str) -> Result<Arc<dyn TaskSink>> {
        self.sinks
            .get(name)
            .cloned()
            .ok_or_else(|| Error::Sink(format!("no sink registered under '{name}'")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simple::SimpleQueueSink;

    #[test]
    fn get_unregistered_name_is_an_error() {
        let registry = SinkRegistry::new();
        assert!(registry.get("missing").is_err());
    }

    #[test]
    fn register_then_get_round_trips() {
        let mut registry = SinkRegistry::new();
        registry.register("main", Arc::new(SimpleQueueSink::new()));
        assert!(registry.get("main").is_ok());
    }
}
