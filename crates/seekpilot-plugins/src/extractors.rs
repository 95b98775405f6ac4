//! Link inventory and LLM-based extraction over it.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{info, warn};

use seekpilot_core::{
    Error, Plugin, PluginCategory, PluginContext, PluginMeta, PluginResult, Result, StartOutcome,
};
use seekpilot_llm::{ChatMessage, LlmClient};

use crate::page::{fold_channel_error, write_output, PageSession, PluginBase};
use crate::scripts;

pub const LINKS_FILE: &str = "page-text-content.json";
pub const HISTORY_FILE: &str = "history-record.txt";

/// Storage key holding the inventory written by [`TotalLinks`].
pub const LINKS_KEY: &str = "totalLinks.links";

/// Rough serialized size of one link entry, used to size batches.
const CHARS_PER_LINK: usize = 200;
const BATCH_PAUSE: Duration = Duration::from_secs(1);

const EXTRACT_SYSTEM: &str = "你是一个专业的JSON数据分析师，只提取deepseek页面对话历史信息，不添加任何分析或解释。请准确识别对话标题和对应的URL，严格按照指定格式输出。";

// ---------------------------------------------------------------
// totalLinks
// ---------------------------------------------------------------

/// Collects every visible link on the page.
pub struct TotalLinks {
    base: PluginBase,
}

impl TotalLinks {
    pub const ID: &'static str = "totalLinks";

    pub fn new() -> Self {
        Self {
            base: PluginBase::new(
                PluginMeta::new(Self::ID, "Total Links", PluginCategory::Extractors)
                    .with_version("1.0.0")
                    .with_description("Lists the page's links with text, href and position"),
            ),
        }
    }

    async fn run(&self) -> Result<PluginResult> {
        let ctx = self.base.ctx()?;
        let session = PageSession::deepseek(&ctx.config, &["Runtime", "Page"]).await?;

        let inventory = session.evaluate(scripts::LINK_INVENTORY).await?;
        let total = inventory.get("totalLinks").and_then(Value::as_u64).unwrap_or(0);

        let pretty = serde_json::to_string_pretty(&inventory)?;
        let path = write_output(&ctx.config.output_dir, LINKS_FILE, pretty.as_bytes())?;
        ctx.storage.set(LINKS_KEY, inventory).await?;

        info!("Found {} links, saved to {}", total, path.display());
        Ok(PluginResult::success()
            .with_message(format!("{} links", total))
            .with_data("totalLinks", total)
            .with_data("path", path.display().to_string()))
    }
}

impl Default for TotalLinks {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for TotalLinks {
    fn meta(&self) -> &PluginMeta {
        &self.base.meta
    }

    async fn init(&mut self, ctx: PluginContext) -> Result<()> {
        self.base.set_context(ctx);
        Ok(())
    }

    async fn start(&mut self) -> Result<StartOutcome> {
        fold_channel_error(self.run().await)
    }
}

// ---------------------------------------------------------------
// historyRecord
// ---------------------------------------------------------------

/// Asks the LLM which links in the inventory are not conversation history.
pub struct HistoryRecord {
    base: PluginBase,
}

impl HistoryRecord {
    pub const ID: &'static str = "historyRecord";

    pub fn new() -> Self {
        Self {
            base: PluginBase::new(
                PluginMeta::new(Self::ID, "History Record Extractor", PluginCategory::Extractors)
                    .with_version("1.0.0")
                    .depends_on([TotalLinks::ID])
                    .with_description("Filters the link inventory through the LLM and saves the non-history URLs"),
            ),
        }
    }

    /// The inventory from shared storage, else from the file `totalLinks` wrote.
    async fn inventory(&self, ctx: &PluginContext) -> Result<Option<Value>> {
        if let Some(v) = ctx.storage.get(LINKS_KEY).await? {
            return Ok(Some(v));
        }
        let path = ctx.config.output_dir.join(LINKS_FILE);
        read_inventory(&path)
    }

    async fn run(&self) -> Result<PluginResult> {
        let ctx = self.base.ctx()?;
        let Some(inventory) = self.inventory(ctx).await? else {
            return Ok(PluginResult::failure(format!(
                "no link inventory; run {} first",
                TotalLinks::ID
            )));
        };
        let client = LlmClient::new(&ctx.config.llm)?;
        let max_tokens = ctx.config.llm.max_tokens;

        let links = inventory
            .get("links")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let serialized = serde_json::to_string(&inventory)?;
        let batches = plan_batches(&links, serialized.chars().count(), ctx.config.llm.json_max_chars);
        info!("{} links in {} batch(es)", links.len(), batches.len());

        let mut sections = Vec::with_capacity(batches.len());
        let mut tokens: u64 = 0;
        for (i, batch) in batches.iter().enumerate() {
            let body = json!({ "totalLinks": batch.len(), "links": batch });
            let messages = [
                ChatMessage::system(EXTRACT_SYSTEM),
                ChatMessage::user(extraction_prompt(&body, i + 1, batches.len())?),
            ];
            match client.complete(&messages, max_tokens, 0.3).await {
                Ok(c) => {
                    tokens += c.total_tokens.unwrap_or(0);
                    sections.push(c.content);
                }
                Err(e) => {
                    warn!("Batch {} failed: {}", i + 1, e);
                    sections.push(format!("Error: batch {} failed - {}", i + 1, e));
                }
            }
            if i + 1 < batches.len() {
                tokio::time::sleep(BATCH_PAUSE).await;
            }
        }

        let report = format!(
            "LLM Dialogue History Extraction Results\nGenerated at: {}\nModel: {}\nJSON Size: {} characters\nTotal Links: {}\nToken Usage: {}\nBatches: {}\n\n{}",
            chrono::Local::now().to_rfc3339(),
            client.model(),
            serialized.chars().count(),
            links.len(),
            tokens,
            batches.len(),
            sections.join("\n\n")
        );
        let path = write_output(&ctx.config.output_dir, HISTORY_FILE, report.as_bytes())?;
        Ok(PluginResult::success()
            .with_message(format!("saved {}", path.display()))
            .with_data("path", path.display().to_string())
            .with_data("batches", batches.len())
            .with_data("tokenUsage", tokens))
    }
}

impl Default for HistoryRecord {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for HistoryRecord {
    fn meta(&self) -> &PluginMeta {
        &self.base.meta
    }

    async fn init(&mut self, ctx: PluginContext) -> Result<()> {
        self.base.set_context(ctx);
        Ok(())
    }

    async fn start(&mut self) -> Result<StartOutcome> {
        fold_channel_error(self.run().await)
    }
}

fn read_inventory(path: &Path) -> Result<Option<Value>> {
    match std::fs::read_to_string(path) {
        Ok(s) => serde_json::from_str(&s)
            .map(Some)
            .map_err(|e| Error::Plugin(format!("{}: {}", path.display(), e))),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Split `links` so each request stays near `max_chars`. An inventory that
/// already fits goes out as a single batch.
fn plan_batches(links: &[Value], json_chars: usize, max_chars: usize) -> Vec<&[Value]> {
    if links.is_empty() {
        return Vec::new();
    }
    if json_chars <= max_chars {
        return vec![links];
    }
    let size = (max_chars / CHARS_PER_LINK).max(1);
    links.chunks(size).collect()
}

fn extraction_prompt(body: &Value, index: usize, total: usize) -> Result<String> {
    let data = serde_json::to_string_pretty(body)?;
    let part = if total > 1 {
        format!("这是第 {}/{} 个片段。", index, total)
    } else {
        String::new()
    };
    Ok(format!(
        "从JSON数据中提取除deepseek页面左边栏对话控制区对话历史之外的所有其他数据，只输出这些数据的URL，不要包含任何分析、解释或总结文字，也不要输出标题。{}\n\nJSON数据：\n{}\n\n按以下格式输出：\nURL: [对应的数据URL]\n\n如果没有找到除对话历史之外的其他数据，不要输出任何内容。",
        part, data
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn links(n: usize) -> Vec<Value> {
        (0..n)
            .map(|i| json!({ "text": format!("link {}", i), "href": format!("https://x/{}", i) }))
            .collect()
    }

    #[test]
    fn test_plan_batches_single_when_fits() {
        let l = links(30);
        let batches = plan_batches(&l, 5_000, 200_000);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].len(), 30);
    }

    #[test]
    fn test_plan_batches_splits_by_size() {
        let l = links(25);
        // 2000 / 200 = 10 links per batch
        let batches = plan_batches(&l, 9_000, 2_000);
        let sizes: Vec<usize> = batches.iter().map(|b| b.len()).collect();
        assert_eq!(sizes, vec![10, 10, 5]);
    }

    #[test]
    fn test_plan_batches_tiny_limit() {
        let l = links(3);
        assert_eq!(plan_batches(&l, 900, 50).len(), 3);
        assert!(plan_batches(&[], 0, 50).is_empty());
    }

    #[test]
    fn test_extraction_prompt_marks_part() {
        let body = json!({ "totalLinks": 1, "links": [] });
        assert!(extraction_prompt(&body, 2, 3).unwrap().contains("第 2/3 个片段"));
        assert!(!extraction_prompt(&body, 1, 1).unwrap().contains("片段"));
    }

    #[test]
    fn test_read_inventory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(LINKS_FILE);
        assert!(read_inventory(&path).unwrap().is_none());

        std::fs::write(&path, r#"{ "totalLinks": 1, "links": [{ "text": "a" }] }"#).unwrap();
        assert_eq!(read_inventory(&path).unwrap().unwrap()["totalLinks"], 1);

        std::fs::write(&path, "not json").unwrap();
        assert!(read_inventory(&path).is_err());
    }

    #[test]
    fn test_history_depends_on_links() {
        assert_eq!(HistoryRecord::new().meta().depends_on, vec![TotalLinks::ID.to_string()]);
    }
}
