//! Plugin manager: registration, lifecycle loops, sequential runs.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;

use futures::FutureExt;
use tracing::{debug, info, warn, Instrument};

use crate::bus::{Event, EventBus};
use crate::context::PluginContext;
use crate::error::{Error, Result};
use crate::plugin::{Plugin, PluginMeta, StartOutcome};
use crate::types::{events, ExecutionResult, HookOutcome};

pub(crate) const EXECUTION_FAILED: &str = "Plugin execution failed";

/// Per-registration flags. These override the plugin's own metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Registration {
    pub enabled: bool,
    pub order: Option<i32>,
}

impl Registration {
    pub fn from_meta(meta: &PluginMeta) -> Self {
        Self {
            enabled: meta.enabled,
            order: meta.order,
        }
    }
}

pub(crate) struct Entry {
    pub(crate) plugin: Box<dyn Plugin>,
    pub(crate) registration: Registration,
    pub(crate) span: tracing::Span,
}

/// Owns the registered plugins and drives them one at a time.
///
/// Every run method takes `&mut self`, so a manager can only ever have one
/// run in flight.
#[derive(Default)]
pub struct PluginManager {
    pub(crate) entries: Vec<Entry>,
    pub(crate) index: HashMap<String, usize>,
    pub(crate) bus: Option<Arc<EventBus>>,
}

impl PluginManager {
    pub fn new() -> Self {
        Self::default()
    }

    // ---------------------------------------------------------------
    // Registry
    // ---------------------------------------------------------------

    /// Register a plugin using the flags from its metadata.
    pub fn register(&mut self, plugin: Box<dyn Plugin>) -> Result<()> {
        let registration = Registration::from_meta(plugin.meta());
        self.register_with(plugin, registration)
    }

    /// Register a plugin with explicit flags. Fails on a duplicate id and
    /// leaves the registry unchanged.
    pub fn register_with(&mut self, plugin: Box<dyn Plugin>, registration: Registration) -> Result<()> {
        let id = plugin.meta().id.clone();
        if self.index.contains_key(&id) {
            return Err(Error::DuplicatePlugin(id));
        }
        debug!("Registered plugin {} (enabled: {})", id, registration.enabled);
        self.index.insert(id.clone(), self.entries.len());
        self.entries.push(Entry {
            plugin,
            registration,
            span: tracing::info_span!("plugin", plugin_id = %id),
        });
        Ok(())
    }

    pub fn get_plugin(&self, id: &str) -> Option<&dyn Plugin> {
        self.index.get(id).map(|&i| self.entries[i].plugin.as_ref())
    }

    pub fn get_plugin_mut(&mut self, id: &str) -> Option<&mut (dyn Plugin + 'static)> {
        let i = *self.index.get(id)?;
        Some(self.entries[i].plugin.as_mut())
    }

    /// Ids in registration order.
    pub fn plugin_ids(&self) -> Vec<String> {
        self.entries.iter().map(|e| e.plugin.meta().id.clone()).collect()
    }

    /// Metadata in registration order, with registration flags applied.
    pub fn metas(&self) -> Vec<PluginMeta> {
        self.entries
            .iter()
            .map(|e| {
                let mut meta = e.plugin.meta().clone();
                meta.enabled = e.registration.enabled;
                meta.order = e.registration.order;
                meta
            })
            .collect()
    }

    pub fn is_enabled(&self, id: &str) -> Option<bool> {
        self.index
            .get(id)
            .map(|&i| self.entries[i].registration.enabled)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    // ---------------------------------------------------------------
    // Lifecycle
    // ---------------------------------------------------------------

    /// Call `init` on every plugin in registration order.
    ///
    /// The context's bus becomes the bus the manager publishes run events on.
    pub async fn init_all(&mut self, ctx: &PluginContext) -> Vec<HookOutcome> {
        self.bus = Some(ctx.bus.clone());
        let mut outcomes = Vec::with_capacity(self.entries.len());
        for entry in &mut self.entries {
            let id = entry.plugin.meta().id.clone();
            let plugin_ctx = ctx.for_plugin(&id);
            let span = plugin_ctx.log.clone();
            entry.span = span.clone();
            let result = guarded(entry.plugin.init(plugin_ctx))
                .instrument(span)
                .await;
            outcomes.push(hook_outcome("init", id, result));
        }
        outcomes
    }

    /// Call `stop` on every plugin, enabled or not.
    pub async fn stop_all(&mut self) -> Vec<HookOutcome> {
        let mut outcomes = Vec::with_capacity(self.entries.len());
        for entry in &mut self.entries {
            let id = entry.plugin.meta().id.clone();
            let result = guarded(entry.plugin.stop())
                .instrument(entry.span.clone())
                .await;
            outcomes.push(hook_outcome("stop", id, result));
        }
        outcomes
    }

    /// Call `dispose` on every plugin, enabled or not.
    pub async fn dispose_all(&mut self) -> Vec<HookOutcome> {
        let mut outcomes = Vec::with_capacity(self.entries.len());
        for entry in &mut self.entries {
            let id = entry.plugin.meta().id.clone();
            let result = guarded(entry.plugin.dispose())
                .instrument(entry.span.clone())
                .await;
            outcomes.push(hook_outcome("dispose", id, result));
        }
        outcomes
    }

    /// Start every enabled plugin in registration order, regardless of how
    /// the previous one went.
    pub async fn start_all(&mut self) -> Vec<ExecutionResult> {
        info!("Starting {} plugins in sequence", self.entries.len());
        let mut ledger = Vec::new();
        for i in 0..self.entries.len() {
            if !self.entries[i].registration.enabled {
                continue;
            }
            let result = self.run_start(i).await;
            self.publish(events::PLUGIN_FINISHED, &result);
            ledger.push(result);
        }
        ledger
    }

    // ---------------------------------------------------------------
    // Internals
    // ---------------------------------------------------------------

    /// Invoke `start` on entry `i` and fold the outcome into a ledger entry.
    pub(crate) async fn run_start(&mut self, i: usize) -> ExecutionResult {
        let entry = &mut self.entries[i];
        let id = entry.plugin.meta().id.clone();
        let started = Instant::now();
        let outcome = guarded(entry.plugin.start())
            .instrument(entry.span.clone())
            .await;
        let elapsed = started.elapsed();

        let result = match outcome {
            Ok(StartOutcome::Implicit) => ExecutionResult {
                plugin_id: id,
                success: true,
                message: None,
                data: None,
                error: None,
                execution_time_ms: elapsed.as_millis() as u64,
            },
            Ok(StartOutcome::Explicit(r)) => ExecutionResult {
                plugin_id: id,
                success: r.success,
                message: r.message,
                data: r.data,
                error: r.error.map(Arc::new),
                execution_time_ms: elapsed.as_millis() as u64,
            },
            Err(e) => {
                warn!("Plugin {} failed: {}", id, e);
                ExecutionResult::failed(&id, EXECUTION_FAILED, Some(e), elapsed)
            }
        };

        info!(
            "Plugin {} finished: success={} in {}ms",
            result.plugin_id, result.success, result.execution_time_ms
        );
        result
    }

    pub(crate) fn publish<T: serde::Serialize>(&self, kind: &str, payload: &T) {
        if let Some(bus) = &self.bus {
            let payload = serde_json::to_value(payload).unwrap_or(serde_json::Value::Null);
            bus.emit(&Event::new(kind, payload));
        }
    }
}

impl std::fmt::Debug for PluginManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginManager")
            .field("plugins", &self.plugin_ids())
            .finish()
    }
}

/// Run a hook future, turning a panic into `Error::Panic`.
pub(crate) async fn guarded<T, F>(fut: F) -> Result<T>
where
    F: Future<Output = Result<T>>,
{
    match AssertUnwindSafe(fut).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(Error::Panic(panic_message(payload.as_ref()))),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn hook_outcome(hook: &str, plugin_id: String, result: Result<()>) -> HookOutcome {
    if let Err(e) = &result {
        warn!("{} failed for plugin {}: {}", hook, plugin_id, e);
    }
    HookOutcome { plugin_id, result }
}
