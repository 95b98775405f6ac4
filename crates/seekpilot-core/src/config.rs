//! Application configuration: builtin defaults, environment, JSON file.

use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::WorkflowConfig;

pub const DEFAULT_CONFIG_PATH: &str = "config/app.config.json";
pub const DEFAULT_DEVTOOLS_URL: &str = "http://127.0.0.1:9222";
pub const DEFAULT_LLM_BASE_URL: &str = "https://api.siliconflow.cn/v1";
pub const DEFAULT_MODEL: &str = "deepseek-ai/DeepSeek-V3.2-Exp";
pub const DEEPSEEK_URL: &str = "https://chat.deepseek.com";

/// Plugin ids in their default run order.
pub const DEFAULT_PLUGIN_ORDER: &[&str] = &[
    "newChatOpener",
    "chatInjector",
    "clearHistory",
    "totalLinks",
    "snapshot",
    "llmPing",
    "historyRecord",
    "deepSeekDomExport",
];

fn env_or(key: &str, fallback: &str) -> String {
    std::env::var(key)
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| fallback.to_string())
}

fn env_num<T: std::str::FromStr>(key: &str, fallback: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(fallback)
}

// ---------------------------------------------------------------
// Sections
// ---------------------------------------------------------------

/// Chrome DevTools endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChromeConfig {
    #[serde(default = "default_devtools_url")]
    pub devtools_url: String,
    #[serde(default = "default_chrome_timeout")]
    pub timeout_ms: u64,
}

fn default_devtools_url() -> String {
    env_or("CHROME_DEVTOOLS_URL", DEFAULT_DEVTOOLS_URL)
}
fn default_chrome_timeout() -> u64 {
    env_num("CHROME_TIMEOUT_MS", 30_000)
}

impl Default for ChromeConfig {
    fn default() -> Self {
        Self {
            devtools_url: default_devtools_url(),
            timeout_ms: default_chrome_timeout(),
        }
    }
}

/// OpenAI-compatible completion endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LlmConfig {
    #[serde(default = "default_api_key")]
    pub api_key: String,
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,
    #[serde(default = "default_llm_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_html_max_chars")]
    pub html_max_chars: usize,
    #[serde(default = "default_json_max_chars")]
    pub json_max_chars: usize,
}

fn default_api_key() -> String {
    std::env::var("SILICONFLOW_API_KEY")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| env_or("OPENAI_API_KEY", ""))
}
fn default_llm_base_url() -> String {
    std::env::var("LLM_BASE_URL")
        .ok()
        .filter(|v| !v.is_empty())
        .unwrap_or_else(|| env_or("OPENAI_BASE_URL", DEFAULT_LLM_BASE_URL))
}
fn default_llm_timeout() -> u64 {
    env_num("LLM_TIMEOUT", 30_000)
}
fn default_llm_retries() -> u32 {
    env_num("LLM_MAX_RETRIES", 2)
}
fn default_model() -> String {
    env_or("MODEL_NAME", DEFAULT_MODEL)
}
fn default_max_tokens() -> u32 {
    env_num("LLM_MAX_TOKENS", 2000)
}
fn default_html_max_chars() -> usize {
    env_num("HTML_MAX_CHARS", 200_000)
}
fn default_json_max_chars() -> usize {
    env_num("JSON_MAX_CHARS", 200_000)
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key(),
            base_url: default_llm_base_url(),
            timeout_ms: default_llm_timeout(),
            max_retries: default_llm_retries(),
            model: default_model(),
            max_tokens: default_max_tokens(),
            html_max_chars: default_html_max_chars(),
            json_max_chars: default_json_max_chars(),
        }
    }
}

/// "New chat" button lookup budgets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewChatConfig {
    #[serde(default = "default_target_url")]
    pub target_url: String,
    #[serde(default = "default_ax_name")]
    pub ax_name: String,
    #[serde(default = "default_ax_role")]
    pub ax_role: String,
    #[serde(default = "default_cdp_timeout")]
    pub cdp_timeout_ms: u64,
    #[serde(default = "default_max_total")]
    pub max_total_ms: u64,
    #[serde(default = "default_ax_timeout")]
    pub ax_timeout_ms: u64,
    #[serde(default = "default_frame_timeout")]
    pub frame_timeout_ms: u64,
}

fn default_target_url() -> String {
    DEEPSEEK_URL.into()
}
fn default_ax_name() -> String {
    env_or("NEWCHAT_AX_NAME", "开启新对话")
}
fn default_ax_role() -> String {
    env_or("NEWCHAT_AX_ROLE", "button")
}
fn default_cdp_timeout() -> u64 {
    env_num("CDP_TIMEOUT_MS", 10_000)
}
fn default_max_total() -> u64 {
    env_num("NEWCHAT_MAX_TOTAL_MS", 20_000)
}
fn default_ax_timeout() -> u64 {
    env_num("NEWCHAT_AX_TIMEOUT_MS", 6_000)
}
fn default_frame_timeout() -> u64 {
    env_num("NEWCHAT_FRAME_TIMEOUT_MS", 6_000)
}

impl Default for NewChatConfig {
    fn default() -> Self {
        Self {
            target_url: default_target_url(),
            ax_name: default_ax_name(),
            ax_role: default_ax_role(),
            cdp_timeout_ms: default_cdp_timeout(),
            max_total_ms: default_max_total(),
            ax_timeout_ms: default_ax_timeout(),
            frame_timeout_ms: default_frame_timeout(),
        }
    }
}

/// Prompt injection and answer detection.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatInjectorConfig {
    #[serde(default = "default_chat_text")]
    pub text: String,
    #[serde(default = "default_target_url")]
    pub target_url: String,
    #[serde(default = "default_answer_timeout")]
    pub answer_timeout_ms: u64,
    #[serde(default = "default_polling_interval")]
    pub polling_interval_ms: u64,
    #[serde(default = "default_stable_threshold")]
    pub stable_threshold_ms: u64,
    #[serde(default = "default_true")]
    pub wait_for_answer: bool,
}

fn default_chat_text() -> String {
    env_or("CHAT_TEXT", "请搜索NemoVideo这家公司的信息")
}
fn default_answer_timeout() -> u64 {
    30_000
}
fn default_polling_interval() -> u64 {
    1_000
}
fn default_stable_threshold() -> u64 {
    2_000
}
fn default_true() -> bool {
    true
}

impl Default for ChatInjectorConfig {
    fn default() -> Self {
        Self {
            text: default_chat_text(),
            target_url: default_target_url(),
            answer_timeout_ms: default_answer_timeout(),
            polling_interval_ms: default_polling_interval(),
            stable_threshold_ms: default_stable_threshold(),
            wait_for_answer: true,
        }
    }
}

/// History deletion loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClearHistoryConfig {
    #[serde(default = "default_clear_timeout")]
    pub timeout_ms: u64,
    #[serde(default = "default_clear_attempts")]
    pub max_attempts: u32,
}

fn default_clear_timeout() -> u64 {
    env_num("CLEAR_TIMEOUT_MS", 20_000)
}
fn default_clear_attempts() -> u32 {
    50
}

impl Default for ClearHistoryConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_clear_timeout(),
            max_attempts: default_clear_attempts(),
        }
    }
}

/// Per-plugin enable flag and run order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PluginToggle {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub order: i32,
}

fn default_plugins() -> BTreeMap<String, PluginToggle> {
    DEFAULT_PLUGIN_ORDER
        .iter()
        .enumerate()
        .map(|(i, id)| {
            (
                id.to_string(),
                PluginToggle {
                    enabled: false,
                    order: i as i32 + 1,
                },
            )
        })
        .collect()
}

fn default_log_level() -> String {
    env_or("LOG_LEVEL", "info")
}
fn default_log_dir() -> Option<PathBuf> {
    std::env::var("LOG_DIR")
        .ok()
        .filter(|v| !v.is_empty())
        .map(PathBuf::from)
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(env_or("OUTPUT_DIR", "output"))
}

// ---------------------------------------------------------------
// AppConfig
// ---------------------------------------------------------------

/// Top-level seekpilot configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppConfig {
    #[serde(default)]
    pub chrome: ChromeConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub new_chat: NewChatConfig,
    #[serde(default)]
    pub chat_injector: ChatInjectorConfig,
    #[serde(default)]
    pub clear_history: ClearHistoryConfig,
    #[serde(default = "default_plugins")]
    pub plugins: BTreeMap<String, PluginToggle>,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_dir", skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow: Option<WorkflowConfig>,
    /// Path to config file for saving.
    #[serde(skip)]
    pub config_path: PathBuf,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            chrome: ChromeConfig::default(),
            llm: LlmConfig::default(),
            new_chat: NewChatConfig::default(),
            chat_injector: ChatInjectorConfig::default(),
            clear_history: ClearHistoryConfig::default(),
            plugins: default_plugins(),
            log_level: default_log_level(),
            log_dir: default_log_dir(),
            output_dir: default_output_dir(),
            workflow: None,
            config_path: PathBuf::from(DEFAULT_CONFIG_PATH),
        }
    }
}

impl AppConfig {
    /// Load config from file, falling back to env vars and defaults.
    ///
    /// A missing file yields the defaults. A file that exists but does not
    /// parse is an error.
    pub fn load(config_path: &Path) -> Result<Self> {
        let mut config: AppConfig = match std::fs::read_to_string(config_path) {
            Ok(s) => serde_json::from_str(&s).map_err(|e| {
                Error::Config(format!("{}: {}", config_path.display(), e))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No config at {}, using defaults", config_path.display());
                AppConfig::default()
            }
            Err(e) => return Err(e.into()),
        };

        // File entries replace defaults per id; ids it does not mention keep theirs.
        let mut plugins = default_plugins();
        plugins.extend(config.plugins);
        config.plugins = plugins;

        config.config_path = config_path.to_path_buf();
        Ok(config)
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&self.config_path, json)?;
        info!("Saved config to {}", self.config_path.display());
        Ok(())
    }

    /// Human-readable problems with the current values. Empty means valid.
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.llm.api_key.trim().is_empty() {
            errors.push("missing API key (OPENAI_API_KEY or SILICONFLOW_API_KEY)".to_string());
        }
        if self.llm.timeout_ms < 1000 {
            errors.push("llm.timeoutMs must be at least 1000".to_string());
        }
        if self.chrome.timeout_ms < 5000 {
            errors.push("chrome.timeoutMs must be at least 5000".to_string());
        }
        if self.new_chat.max_total_ms < self.new_chat.cdp_timeout_ms {
            errors.push("newChat.maxTotalMs must not be smaller than newChat.cdpTimeoutMs".to_string());
        }
        if let Some(workflow) = &self.workflow {
            let mut seen = HashSet::new();
            for rule in &workflow.rules {
                if !seen.insert(rule.plugin_id.as_str()) {
                    errors.push(format!("workflow has more than one rule for {}", rule.plugin_id));
                }
            }
        }

        if !errors.is_empty() {
            warn!("Config has {} problem(s)", errors.len());
        }
        errors
    }

    pub fn is_valid(&self) -> bool {
        self.validate().is_empty()
    }

    /// Enabled plugin ids sorted by their configured order.
    pub fn enabled_plugin_ids(&self) -> Vec<String> {
        let mut enabled: Vec<(&String, &PluginToggle)> =
            self.plugins.iter().filter(|(_, t)| t.enabled).collect();
        enabled.sort_by_key(|(id, t)| (t.order, id.as_str()));
        enabled.into_iter().map(|(id, _)| id.clone()).collect()
    }

    /// The toggle for `id`, disabled with order 0 when unknown.
    pub fn toggle(&self, id: &str) -> PluginToggle {
        self.plugins.get(id).copied().unwrap_or(PluginToggle {
            enabled: false,
            order: 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nope.json");
        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.config_path, path);
        assert_eq!(config.plugins.len(), DEFAULT_PLUGIN_ORDER.len());
        assert!(config.enabled_plugin_ids().is_empty());
        assert!(config.workflow.is_none());
    }

    #[test]
    fn test_partial_file_keeps_other_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.config.json");
        std::fs::write(
            &path,
            r#"{
                "chrome": { "timeoutMs": 45000 },
                "plugins": { "totalLinks": { "enabled": true, "order": 2 },
                             "snapshot": { "enabled": true, "order": 1 } },
                "outputDir": "out"
            }"#,
        )
        .unwrap();

        let config = AppConfig::load(&path).unwrap();
        assert_eq!(config.chrome.timeout_ms, 45_000);
        assert!(!config.chrome.devtools_url.is_empty());
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert_eq!(config.plugins.len(), DEFAULT_PLUGIN_ORDER.len());
        assert_eq!(config.enabled_plugin_ids(), vec!["snapshot", "totalLinks"]);
    }

    #[test]
    fn test_invalid_json_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(matches!(AppConfig::load(&path), Err(Error::Config(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("app.config.json");
        let mut config = AppConfig::load(&path).unwrap();
        config.chat_injector.text = "hello".into();
        config.plugins.insert(
            "llmPing".into(),
            PluginToggle {
                enabled: true,
                order: 6,
            },
        );
        config.save().unwrap();

        let reloaded = AppConfig::load(&path).unwrap();
        assert_eq!(reloaded.chat_injector.text, "hello");
        assert_eq!(reloaded.enabled_plugin_ids(), vec!["llmPing"]);
    }

    #[test]
    fn test_validate_reports_each_problem() {
        let mut config = AppConfig::default();
        config.llm.api_key = String::new();
        config.llm.timeout_ms = 10;
        config.chrome.timeout_ms = 100;
        config.new_chat.cdp_timeout_ms = 10_000;
        config.new_chat.max_total_ms = 5_000;
        config.workflow = Some(
            serde_json::from_str(
                r#"{ "starts": ["a"], "rules": [{ "pluginId": "a" }, { "pluginId": "a" }] }"#,
            )
            .unwrap(),
        );

        let problems = config.validate();
        assert_eq!(problems.len(), 5);
        assert!(!config.is_valid());
    }

    #[test]
    fn test_validate_accepts_sane_config() {
        let mut config = AppConfig::default();
        config.llm.api_key = "sk-test".into();
        config.llm.timeout_ms = 30_000;
        config.chrome.timeout_ms = 30_000;
        config.new_chat.cdp_timeout_ms = 10_000;
        config.new_chat.max_total_ms = 20_000;
        assert!(config.validate().is_empty());
    }

    #[test]
    fn test_unknown_toggle_is_disabled() {
        let config = AppConfig::default();
        assert!(!config.toggle("missing").enabled);
        assert_eq!(config.toggle("chatInjector").order, 2);
    }
}
