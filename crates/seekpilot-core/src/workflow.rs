//! Rule-driven workflow traversal over plugin ids.

use std::collections::{HashMap, HashSet, VecDeque};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::manager::PluginManager;
use crate::types::{events, ExecutionResult, WorkflowConfig, WorkflowRule};

pub const DEPENDENCY_NOT_MET: &str = "Dependency not met";
pub const DEADLINE_EXCEEDED: &str = "Workflow deadline exceeded";

/// Index rules by plugin id, rejecting a second rule for the same id.
fn rule_table(rules: &[WorkflowRule]) -> Result<HashMap<&str, &WorkflowRule>> {
    let mut table = HashMap::with_capacity(rules.len());
    for rule in rules {
        if table.insert(rule.plugin_id.as_str(), rule).is_some() {
            return Err(Error::DuplicateRule(rule.plugin_id.clone()));
        }
    }
    Ok(table)
}

impl PluginManager {
    /// Run a workflow and return its ledger in invocation order.
    ///
    /// Plugin failures never surface as `Err`; they are entries in the
    /// ledger. `Err` means the workflow itself is malformed.
    pub async fn start_workflow(&mut self, config: &WorkflowConfig) -> Result<Vec<ExecutionResult>> {
        let rules = rule_table(&config.rules)?;
        let started = Instant::now();

        info!(
            "Workflow starting from {:?} ({} rules, skip_disabled={})",
            config.starts,
            config.rules.len(),
            config.skip_disabled
        );
        self.publish(events::WORKFLOW_STARTED, config);

        let mut queue: VecDeque<String> = config.starts.iter().cloned().collect();
        let mut visited: HashSet<String> = HashSet::new();
        let mut succeeded: HashMap<String, bool> = HashMap::new();
        let mut ledger: Vec<ExecutionResult> = Vec::new();

        while let Some(id) = queue.pop_front() {
            if visited.contains(&id) {
                continue;
            }
            let Some(&i) = self.index.get(&id) else {
                debug!("Workflow skipping unknown plugin {}", id);
                continue;
            };
            if config.skip_disabled && !self.entries[i].registration.enabled {
                debug!("Workflow skipping disabled plugin {}", id);
                continue;
            }

            let deps_ok = self.entries[i]
                .plugin
                .meta()
                .depends_on
                .iter()
                .all(|dep| succeeded.get(dep).copied().unwrap_or(false));

            let mut out_of_time = false;
            let result = if !deps_ok {
                warn!("Plugin {} skipped: dependency not met", id);
                ExecutionResult::failed(&id, DEPENDENCY_NOT_MET, None, Duration::ZERO)
            } else if let Some(budget) = config.deadline {
                let remaining = budget.saturating_sub(started.elapsed());
                let attempt = Instant::now();
                let finished = if remaining.is_zero() {
                    None
                } else {
                    tokio::time::timeout(remaining, self.run_start(i)).await.ok()
                };
                match finished {
                    Some(result) => result,
                    None => {
                        warn!("Workflow deadline of {:?} hit while running {}", budget, id);
                        out_of_time = true;
                        ExecutionResult::failed(
                            &id,
                            DEADLINE_EXCEEDED,
                            Some(Error::DeadlineExceeded(budget)),
                            attempt.elapsed(),
                        )
                    }
                }
            } else {
                self.run_start(i).await
            };

            let success = result.success;
            self.publish(events::PLUGIN_FINISHED, &result);
            ledger.push(result);
            visited.insert(id.clone());
            succeeded.insert(id.clone(), success);

            if out_of_time {
                break;
            }

            let next = rules.get(id.as_str()).and_then(|rule| {
                if success {
                    rule.on_success.as_ref()
                } else {
                    rule.on_failure.as_ref()
                }
            });
            if let Some(next) = next {
                if !visited.contains(next) {
                    queue.push_back(next.clone());
                }
            }
        }

        info!(
            "Workflow finished: {} plugins ran, {} succeeded, {}ms",
            ledger.len(),
            ledger.iter().filter(|r| r.success).count(),
            started.elapsed().as_millis()
        );
        self.publish(events::WORKFLOW_FINISHED, &ledger);
        Ok(ledger)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rule_table_rejects_duplicates() {
        let rules = vec![
            WorkflowRule::new("a").on_success("b"),
            WorkflowRule::new("b"),
            WorkflowRule::new("a").on_failure("c"),
        ];
        assert!(matches!(rule_table(&rules), Err(Error::DuplicateRule(ref id)) if id == "a"));
    }

    #[test]
    fn test_rule_table_indexes_by_id() {
        let rules = vec![WorkflowRule::new("a").on_success("b"), WorkflowRule::new("b")];
        let table = rule_table(&rules).unwrap();
        assert_eq!(table["a"].on_success.as_deref(), Some("b"));
        assert!(table["b"].on_failure.is_none());
    }
}
