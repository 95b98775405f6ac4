//! seekpilot core: plugin contract, configuration, context services and
//! the workflow engine that sequences plugins.

pub mod bus;
pub mod config;
pub mod context;
pub mod error;
pub mod manager;
pub mod plugin;
pub mod storage;
pub mod types;
pub mod workflow;

pub use bus::{Event, EventBus, HandlerId};
pub use config::AppConfig;
pub use context::{Env, PluginContext};
pub use error::{Error, Result};
pub use manager::{PluginManager, Registration};
pub use plugin::{Plugin, PluginCategory, PluginMeta, PluginResult, StartOutcome};
pub use storage::{MemoryStorage, Storage};
pub use types::{ExecutionResult, HookOutcome, WorkflowConfig, WorkflowRule};
pub use workflow::{DEADLINE_EXCEEDED, DEPENDENCY_NOT_MET};
