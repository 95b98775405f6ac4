//! The `run`, `workflow`, `list` and `validate` commands.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Local};
use serde::Serialize;
use tracing::{info, warn};
use uuid::Uuid;

use seekpilot_core::{
    AppConfig, Env, ExecutionResult, HookOutcome, PluginContext, PluginManager, WorkflowConfig,
};
use seekpilot_plugins::catalog;

/// Everything written to `run-<timestamp>.json`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunReport {
    pub run_id: String,
    pub started_at: DateTime<Local>,
    pub finished_at: DateTime<Local>,
    pub mode: &'static str,
    pub interrupted: bool,
    pub results: Vec<ExecutionResult>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        !self.interrupted && self.results.iter().all(|r| r.success)
    }
}

/// Register plugins, run them, print and save the ledger, then tear down.
///
/// Without a workflow only enabled plugins are registered, in configured
/// order. With one, every catalog plugin is registered so rules can name
/// disabled plugins when `skipDisabled` is off.
pub async fn run(config: AppConfig, workflow: Option<WorkflowConfig>) -> anyhow::Result<RunReport> {
    let config = Arc::new(config);
    let mut manager = PluginManager::new();

    let ids: Vec<String> = match &workflow {
        Some(_) => {
            let mut ids = config.enabled_plugin_ids();
            ids.extend(
                catalog::all_ids()
                    .iter()
                    .map(|id| id.to_string())
                    .filter(|id| !config.toggle(id).enabled),
            );
            ids
        }
        None => config.enabled_plugin_ids(),
    };
    for id in &ids {
        match catalog::build_configured(id, &config) {
            Some((plugin, registration)) => manager.register_with(plugin, registration)?,
            None => warn!("Unknown plugin '{}' in config, skipping", id),
        }
    }
    if manager.is_empty() {
        warn!("No plugins enabled; enable some under \"plugins\" in the config");
    }

    let ctx = PluginContext::new(config.clone(), Env::Cli);
    report_hooks("init", &manager.init_all(&ctx).await);

    let started_at = Local::now();
    let outcome = tokio::select! {
        r = execute(&mut manager, workflow.as_ref()) => Some(r),
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, shutting plugins down");
            None
        }
    };

    report_hooks("stop", &manager.stop_all().await);
    report_hooks("dispose", &manager.dispose_all().await);

    let (results, interrupted) = match outcome {
        Some(r) => (r?, false),
        None => (Vec::new(), true),
    };

    let report = RunReport {
        run_id: Uuid::new_v4().to_string(),
        started_at,
        finished_at: Local::now(),
        mode: if workflow.is_some() { "workflow" } else { "sequential" },
        interrupted,
        results,
    };
    print_ledger(&report.results);
    let path = save_report(&config.output_dir, &report)?;
    info!("Run report saved to {}", path.display());
    Ok(report)
}

async fn execute(
    manager: &mut PluginManager,
    workflow: Option<&WorkflowConfig>,
) -> seekpilot_core::Result<Vec<ExecutionResult>> {
    match workflow {
        Some(w) => manager.start_workflow(w).await,
        None => Ok(manager.start_all().await),
    }
}

fn report_hooks(hook: &str, outcomes: &[HookOutcome]) {
    for o in outcomes.iter().filter(|o| !o.is_ok()) {
        if let Err(e) = &o.result {
            eprintln!("  {} {} failed: {}", hook, o.plugin_id, e);
        }
    }
}

pub fn ledger_line(result: &ExecutionResult) -> String {
    let mark = if result.success { "ok  " } else { "FAIL" };
    let mut line = format!(
        "{} {:<20} {:>7}ms",
        mark, result.plugin_id, result.execution_time_ms
    );
    if let Some(message) = &result.message {
        line.push_str("  ");
        line.push_str(message);
    }
    if let Some(error) = &result.error {
        line.push_str(&format!(" ({})", error));
    }
    line
}

fn print_ledger(results: &[ExecutionResult]) {
    println!();
    if results.is_empty() {
        println!("No plugins ran.");
        return;
    }
    for r in results {
        println!("{}", ledger_line(r));
    }
    let ok = results.iter().filter(|r| r.success).count();
    println!();
    println!("{}/{} succeeded", ok, results.len());
}

pub fn save_report(dir: &Path, report: &RunReport) -> anyhow::Result<PathBuf> {
    std::fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;
    let path = dir.join(format!(
        "run-{}.json",
        report.started_at.format("%Y-%m-%d_%H-%M-%S")
    ));
    std::fs::write(&path, serde_json::to_string_pretty(report)?)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

pub fn list(config: &AppConfig) {
    println!(
        "{:<20} {:<26} {:<8} {:<12} {:<8} {:>5}  DESCRIPTION",
        "ID", "NAME", "VERSION", "CATEGORY", "ENABLED", "ORDER"
    );
    for meta in catalog::describe(config) {
        println!(
            "{:<20} {:<26} {:<8} {:<12} {:<8} {:>5}  {}",
            meta.id,
            meta.name,
            meta.version,
            meta.category,
            if meta.enabled { "yes" } else { "no" },
            meta.order.map(|o| o.to_string()).unwrap_or_default(),
            meta.description.as_deref().unwrap_or("")
        );
        if !meta.depends_on.is_empty() {
            println!("{:<20} depends on: {}", "", meta.depends_on.join(", "));
        }
    }
}

/// Print problems with the config. Returns whether it is valid.
pub fn validate(config: &AppConfig) -> bool {
    let problems = config.validate();
    if problems.is_empty() {
        println!("{}: OK", config.config_path.display());
        return true;
    }
    println!("{}: {} problem(s)", config.config_path.display(), problems.len());
    for p in &problems {
        println!("  - {}", p);
    }
    false
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(id: &str, success: bool, message: Option<&str>) -> ExecutionResult {
        ExecutionResult {
            plugin_id: id.into(),
            success,
            message: message.map(String::from),
            data: None,
            error: None,
            execution_time_ms: 12,
        }
    }

    #[test]
    fn test_ledger_line() {
        let line = ledger_line(&result("snapshot", true, Some("saved output/snapshot.png")));
        assert!(line.starts_with("ok   snapshot"));
        assert!(line.ends_with("saved output/snapshot.png"));

        let line = ledger_line(&result("historyRecord", false, Some("Dependency not met")));
        assert!(line.starts_with("FAIL historyRecord"));
    }

    #[test]
    fn test_save_report() {
        let dir = tempfile::tempdir().unwrap();
        let now = Local::now();
        let report = RunReport {
            run_id: "r1".into(),
            started_at: now,
            finished_at: now,
            mode: "sequential",
            interrupted: false,
            results: vec![result("llmPing", true, None)],
        };
        assert!(report.succeeded());

        let path = save_report(&dir.path().join("out"), &report).unwrap();
        let name = path.file_name().unwrap().to_string_lossy().into_owned();
        assert!(name.starts_with("run-") && name.ends_with(".json"));

        let saved: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(saved["runId"], "r1");
        assert_eq!(saved["results"][0]["pluginId"], "llmPing");
        assert_eq!(saved["results"][0]["executionTimeMs"], 12);
    }

    #[tokio::test]
    async fn test_run_with_nothing_enabled() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = AppConfig::default();
        config.output_dir = dir.path().to_path_buf();

        let report = run(config, None).await.unwrap();
        assert!(report.results.is_empty());
        assert!(!report.interrupted);
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }
}
