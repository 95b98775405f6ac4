//! Conversation history cleanup.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use seekpilot_cdp::runtime;
use seekpilot_core::config::DEEPSEEK_URL;
use seekpilot_core::{Plugin, PluginCategory, PluginContext, PluginMeta, PluginResult, Result, StartOutcome};

use crate::page::{file_stamp, fold_channel_error, write_output, PageSession, PluginBase};
use crate::scripts;

/// Upper bound for one deletion round inside the page script.
const PER_DELETE: Duration = Duration::from_secs(3);

/// Deletes every conversation listed in the sidebar.
pub struct ClearHistory {
    base: PluginBase,
}

impl ClearHistory {
    pub const ID: &'static str = "clearHistory";

    pub fn new() -> Self {
        Self {
            base: PluginBase::new(
                PluginMeta::new(Self::ID, "Clear History", PluginCategory::Maintenance)
                    .with_version("1.0.0")
                    .with_description("Deletes all conversations from the sidebar, with before and after screenshots"),
            ),
        }
    }

    async fn run(&self) -> Result<PluginResult> {
        let ctx = self.base.ctx()?;
        let cfg = &ctx.config.clear_history;
        let timeout = Duration::from_millis(cfg.timeout_ms);
        let session = PageSession::open(
            &ctx.config,
            DEEPSEEK_URL,
            timeout,
            &["Runtime", "DOM", "Accessibility", "Page"],
        )
        .await?;

        if let Err(e) = session
            .channel
            .call("Target.activateTarget", json!({ "targetId": session.target.id }))
            .await
        {
            debug!("activateTarget ignored: {}", e);
        }
        if !runtime::wait_for_ready_state(&session.channel, timeout).await? {
            warn!("Page not fully loaded, continuing anyway");
        }

        let out = &ctx.config.output_dir;
        let before = session.screenshot().await?;
        write_output(out, &format!("history-before_{}.png", file_stamp()), &before)?;

        session.evaluate(scripts::OPEN_SIDEBAR).await?;

        let budget = (PER_DELETE * cfg.max_attempts.max(1)).max(timeout);
        let deleted = session
            .evaluate_with(&scripts::delete_chats(cfg.max_attempts), budget)
            .await?;
        let verified = session.evaluate(&scripts::verify_history_empty()).await?;

        let after = session.screenshot().await?;
        write_output(out, &format!("history-after_{}.png", file_stamp()), &after)?;

        let count = deleted.get("deleted").and_then(Value::as_u64).unwrap_or(0);
        let remaining = verified
            .get("remaining")
            .and_then(Value::as_u64)
            .or_else(|| deleted.get("remaining").and_then(Value::as_u64))
            .unwrap_or(0);
        info!("Deleted {} conversation(s), {} remaining", count, remaining);

        let result = if remaining == 0 {
            PluginResult::success().with_message(format!("history cleared ({} deleted)", count))
        } else {
            PluginResult::failure(format!("{} conversation(s) could not be deleted", remaining))
        };
        Ok(result.with_data("deleted", count).with_data("remaining", remaining))
    }
}

impl Default for ClearHistory {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ClearHistory {
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
