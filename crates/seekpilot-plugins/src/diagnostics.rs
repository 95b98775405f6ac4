//! Diagnostics: a page screenshot and an LLM round trip.

use async_trait::async_trait;
use tracing::info;

use seekpilot_core::{Plugin, PluginCategory, PluginContext, PluginMeta, PluginResult, Result, StartOutcome};
use seekpilot_llm::{ChatMessage, LlmClient};

use crate::page::{fold_channel_error, unique_path, write_output, PageSession, PluginBase};

const PING_PROMPT: &str = "你好";
const PING_MAX_TOKENS: u32 = 50;

/// Screenshot of the DeepSeek tab.
pub struct Snapshot {
    base: PluginBase,
}

impl Snapshot {
    pub const ID: &'static str = "snapshot";

    pub fn new() -> Self {
        Self {
            base: PluginBase::new(
                PluginMeta::new(Self::ID, "Snapshot", PluginCategory::Diagnostics)
                    .with_version("1.0.0")
                    .with_description("Saves a PNG screenshot of the page without overwriting earlier ones"),
            ),
        }
    }

    async fn run(&self) -> Result<PluginResult> {
        let ctx = self.base.ctx()?;
        let session = PageSession::deepseek(&ctx.config, &["Page"]).await?;
        let png = session.screenshot().await?;

        let dir = &ctx.config.output_dir;
        std::fs::create_dir_all(dir)?;
        let path = unique_path(dir, "snapshot", "png")?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "snapshot.png".into());
        let path = write_output(dir, &name, &png)?;

        info!("Screenshot saved to {}", path.display());
        Ok(PluginResult::success()
            .with_message(format!("saved {}", path.display()))
            .with_data("path", path.display().to_string())
            .with_data("bytes", png.len()))
    }
}

impl Default for Snapshot {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for Snapshot {
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

/// One short completion to check the LLM endpoint and key.
pub struct LlmPing {
    base: PluginBase,
}

impl LlmPing {
    pub const ID: &'static str = "llmPing";

    pub fn new() -> Self {
        Self {
            base: PluginBase::new(
                PluginMeta::new(Self::ID, "LLM Ping", PluginCategory::Diagnostics)
                    .with_version("1.0.0")
                    .with_description("Sends a greeting to the configured model and reports the reply"),
            ),
        }
    }

    async fn run(&self) -> Result<PluginResult> {
        let ctx = self.base.ctx()?;
        let client = LlmClient::new(&ctx.config.llm)?;
        let completion = client
            .complete(&[ChatMessage::user(PING_PROMPT)], PING_MAX_TOKENS, 0.0)
            .await?;

        info!("{} replied: {}", completion.model, completion.content.trim());
        Ok(PluginResult::success()
            .with_message("LLM reachable")
            .with_data("reply", completion.content.trim().to_string())
            .with_data("model", completion.model))
    }
}

impl Default for LlmPing {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for LlmPing {
    fn meta(&self) -> &PluginMeta {
        &self.base.meta
    }

    async fn init(&mut self, ctx: PluginContext) -> Result<()> {
        self.base.set_context(ctx);
        Ok(())
    }

    async fn start(&mut self) -> Result<StartOutcome> {
        self.run().await.map(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use seekpilot_core::{AppConfig, Env, Error};

    use super::*;

    #[tokio::test]
    async fn test_llm_ping_without_key_fails() {
        let mut config = AppConfig::default();
        config.llm.api_key.clear();
        let mut plugin = LlmPing::new();
        plugin
            .init(PluginContext::new(Arc::new(config), Env::Cli))
            .await
            .unwrap();
        assert!(matches!(plugin.start().await, Err(Error::Config(_))));
    }

    #[test]
    fn test_snapshot_meta() {
        let plugin = Snapshot::new();
        assert_eq!(plugin.meta().id, "snapshot");
        assert_eq!(plugin.meta().category, PluginCategory::Diagnostics);
    }
}
