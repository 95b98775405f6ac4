//! Plugin contract: metadata, start results and the lifecycle trait.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::context::PluginContext;
use crate::error::{Error, Result};

/// Plugin category (informational; used by the `list` command).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginCategory {
    Chat,
    Exporters,
    Extractors,
    Maintenance,
    Diagnostics,
}

impl PluginCategory {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Chat => "chat",
            Self::Exporters => "exporters",
            Self::Extractors => "extractors",
            Self::Maintenance => "maintenance",
            Self::Diagnostics => "diagnostics",
        }
    }
}

impl fmt::Display for PluginCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Static description of a plugin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginMeta {
    pub id: String,
    pub name: String,
    pub version: String,
    pub category: PluginCategory,
    #[serde(default, rename = "dependsOn", skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub order: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl PluginMeta {
    /// Enabled metadata with no dependencies, order or description.
    pub fn new(id: impl Into<String>, name: impl Into<String>, category: PluginCategory) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: "1.0.0".into(),
            category,
            depends_on: Vec::new(),
            enabled: true,
            order: None,
            description: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }

    pub fn depends_on<I, S>(mut self, ids: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.depends_on = ids.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    pub fn with_order(mut self, order: i32) -> Self {
        self.order = Some(order);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

/// Explicit result returned from [`Plugin::start`].
#[derive(Debug, Default)]
pub struct PluginResult {
    pub success: bool,
    pub message: Option<String>,
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
    pub error: Option<Error>,
}

impl PluginResult {
    pub fn success() -> Self {
        Self {
            success: true,
            ..Self::default()
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: Some(message.into()),
            ..Self::default()
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Attach one entry to the result data.
    pub fn with_data(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
        self.data
            .get_or_insert_with(serde_json::Map::new)
            .insert(key.into(), value.into());
        self
    }

    pub fn with_error(mut self, error: Error) -> Self {
        self.error = Some(error);
        self
    }
}

/// What a successful `start` call produced.
///
/// `Implicit` means the plugin returned nothing; it counts as success with
/// no message or data. It is not the same thing as an explicit failure.
#[derive(Debug)]
pub enum StartOutcome {
    Implicit,
    Explicit(PluginResult),
}

impl From<()> for StartOutcome {
    fn from(_: ()) -> Self {
        StartOutcome::Implicit
    }
}

impl From<PluginResult> for StartOutcome {
    fn from(result: PluginResult) -> Self {
        StartOutcome::Explicit(result)
    }
}

/// A unit of work driven by the [`PluginManager`](crate::PluginManager).
///
/// Returning `Err` from `start` is the equivalent of the plugin throwing:
/// the workflow records it as "Plugin execution failed". Errors from the
/// other hooks are collected by the manager and never abort its loops.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn meta(&self) -> &PluginMeta;

    /// One-time setup. Calling it twice on one instance is a caller bug.
    async fn init(&mut self, _ctx: PluginContext) -> Result<()> {
        Ok(())
    }

    async fn start(&mut self) -> Result<StartOutcome>;

    /// Cooperative halt; does not interrupt an in-flight `start`.
    async fn stop(&mut self) -> Result<()> {
        Ok(())
    }

    async fn dispose(&mut self) -> Result<()> {
        Ok(())
    }
}
