//! Workflow and ledger types.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize, Serializer};

use crate::error::{Error, Result};

/// Recorded outcome of one plugin invocation within a run.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionResult {
    pub plugin_id: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Map<String, serde_json::Value>>,
    #[serde(
        skip_serializing_if = "Option::is_none",
        serialize_with = "serialize_error"
    )]
    pub error: Option<Arc<Error>>,
    pub execution_time_ms: u64,
}

fn serialize_error<S: Serializer>(
    error: &Option<Arc<Error>>,
    serializer: S,
) -> std::result::Result<S::Ok, S::Error> {
    match error {
        Some(e) => serializer.serialize_str(&e.to_string()),
        None => serializer.serialize_none(),
    }
}

impl ExecutionResult {
    pub(crate) fn failed(plugin_id: &str, message: &str, error: Option<Error>, elapsed: Duration) -> Self {
        Self {
            plugin_id: plugin_id.to_string(),
            success: false,
            message: Some(message.to_string()),
            data: None,
            error: error.map(Arc::new),
            execution_time_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Successor selection for one plugin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowRule {
    pub plugin_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_success: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub on_failure: Option<String>,
}

impl WorkflowRule {
    pub fn new(plugin_id: impl Into<String>) -> Self {
        Self {
            plugin_id: plugin_id.into(),
            on_success: None,
            on_failure: None,
        }
    }

    pub fn on_success(mut self, next: impl Into<String>) -> Self {
        self.on_success = Some(next.into());
        self
    }

    pub fn on_failure(mut self, next: impl Into<String>) -> Self {
        self.on_failure = Some(next.into());
        self
    }
}

/// A workflow run request.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkflowConfig {
    pub starts: Vec<String>,
    #[serde(default)]
    pub rules: Vec<WorkflowRule>,
    #[serde(default)]
    pub skip_disabled: bool,
    /// Overall budget for the run.
    #[serde(
        default,
        rename = "deadlineMs",
        with = "duration_ms",
        skip_serializing_if = "Option::is_none"
    )]
    pub deadline: Option<Duration>,
}

impl WorkflowConfig {
    pub fn new<I, S>(starts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            starts: starts.into_iter().map(Into::into).collect(),
            ..Self::default()
        }
    }

    pub fn rule(mut self, rule: WorkflowRule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn skip_disabled(mut self, skip: bool) -> Self {
        self.skip_disabled = skip;
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Read a workflow definition from a JSON file.
    pub fn from_file(path: &std::path::Path) -> Result<Self> {
        let data = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&data)?)
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Option<Duration>, s: S) -> Result<S::Ok, S::Error> {
        match value {
            Some(d) => s.serialize_u64(d.as_millis() as u64),
            None => s.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Duration>, D::Error> {
        Ok(Option::<u64>::deserialize(d)?.map(Duration::from_millis))
    }
}

/// Outcome of one lifecycle hook in `init_all`, `stop_all` or `dispose_all`.
#[derive(Debug)]
pub struct HookOutcome {
    pub plugin_id: String,
    pub result: Result<()>,
}

impl HookOutcome {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Events the manager publishes on the bus.
pub mod events {
    pub const WORKFLOW_STARTED: &str = "workflow.started";
    pub const PLUGIN_FINISHED: &str = "plugin.finished";
    pub const WORKFLOW_FINISHED: &str = "workflow.finished";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_workflow_config_from_json() {
        let config: WorkflowConfig = serde_json::from_str(
            r#"{
                "starts": ["newChatOpener"],
                "rules": [
                    { "pluginId": "newChatOpener", "onSuccess": "chatInjector" },
                    { "pluginId": "chatInjector", "onFailure": "snapshot" }
                ],
                "skipDisabled": true,
                "deadlineMs": 90000
            }"#,
        )
        .unwrap();
        assert_eq!(config.starts, vec!["newChatOpener"]);
        assert_eq!(
            config.rules[0],
            WorkflowRule::new("newChatOpener").on_success("chatInjector")
        );
        assert_eq!(config.rules[1].on_failure.as_deref(), Some("snapshot"));
        assert!(config.skip_disabled);
        assert_eq!(config.deadline, Some(Duration::from_secs(90)));
    }

    #[test]
    fn test_workflow_config_defaults() {
        let config: WorkflowConfig = serde_json::from_str(r#"{ "starts": ["a"] }"#).unwrap();
        assert!(config.rules.is_empty());
        assert!(!config.skip_disabled);
        assert!(config.deadline.is_none());

        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("deadlineMs").is_none());
    }

    #[test]
    fn test_execution_result_serializes_error_as_text() {
        let result = ExecutionResult::failed(
            "chatInjector",
            "Plugin execution failed",
            Some(Error::Plugin("no input".into())),
            Duration::from_millis(12),
        );
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["pluginId"], "chatInjector");
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "Plugin error: no input");
        assert_eq!(json["executionTimeMs"], 12);
        assert!(json.get("data").is_none());
    }

    #[test]
    fn test_workflow_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("flow.json");
        let flow = WorkflowConfig::new(["a"]).rule(WorkflowRule::new("a").on_success("b"));
        std::fs::write(&path, serde_json::to_string(&flow).unwrap()).unwrap();
        let loaded = WorkflowConfig::from_file(&path).unwrap();
        assert_eq!(loaded.rules, flow.rules);
    }
}
