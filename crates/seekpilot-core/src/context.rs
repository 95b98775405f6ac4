//! Context handed to each plugin at init time.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::bus::EventBus;
use crate::config::AppConfig;
use crate::storage::{MemoryStorage, Storage};

/// Where the plugins are running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Env {
    #[default]
    Cli,
    Node,
}

/// Shared services for a plugin. Cheap to clone.
#[derive(Clone)]
pub struct PluginContext {
    pub bus: Arc<EventBus>,
    pub storage: Arc<dyn Storage>,
    pub env: Env,
    pub config: Arc<AppConfig>,
    /// Span every log line of the plugin should be emitted under.
    pub log: tracing::Span,
}

impl PluginContext {
    pub fn new(config: Arc<AppConfig>, env: Env) -> Self {
        Self {
            bus: Arc::new(EventBus::new()),
            storage: Arc::new(MemoryStorage::new()),
            env,
            config,
            log: tracing::Span::none(),
        }
    }

    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = storage;
        self
    }

    pub fn with_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.bus = bus;
        self
    }

    /// A copy whose log span is scoped to `plugin_id`.
    pub fn for_plugin(&self, plugin_id: &str) -> Self {
        let mut ctx = self.clone();
        ctx.log = tracing::info_span!("plugin", plugin_id = %plugin_id);
        ctx
    }
}

impl std::fmt::Debug for PluginContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginContext")
            .field("env", &self.env)
            .field("bus", &self.bus)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_plugin_copies_share_services() {
        let ctx = PluginContext::new(Arc::new(AppConfig::default()), Env::Cli);
        let a = ctx.for_plugin("a");
        let b = ctx.for_plugin("b");

        a.storage.set("shared", serde_json::json!(true)).await.unwrap();
        assert_eq!(b.storage.get("shared").await.unwrap(), Some(serde_json::json!(true)));
        assert!(Arc::ptr_eq(&a.bus, &b.bus));
    }

    #[test]
    fn test_env_serializes_lowercase() {
        assert_eq!(serde_json::to_string(&Env::Node).unwrap(), "\"node\"");
        assert_eq!(serde_json::from_str::<Env>("\"node\"").unwrap(), Env::Node);
        assert_eq!(serde_json::from_str::<Env>("\"cli\"").unwrap(), Env::Cli);
        assert_eq!(Env::default(), Env::Cli);
    }
}
