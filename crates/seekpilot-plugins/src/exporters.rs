//! Page exporters.

use async_trait::async_trait;
use serde_json::Value;
use tracing::info;

use seekpilot_core::{Plugin, PluginCategory, PluginContext, PluginMeta, PluginResult, Result, StartOutcome};

use crate::page::{fold_channel_error, write_output, PageSession, PluginBase};
use crate::scripts;

pub const CAPTURED_HTML: &str = "page-captured.html";

/// Saves the live DOM of the DeepSeek tab as HTML.
pub struct DeepSeekDomExport {
    base: PluginBase,
}

impl DeepSeekDomExport {
    pub const ID: &'static str = "deepSeekDomExport";

    pub fn new() -> Self {
        Self {
            base: PluginBase::new(
                PluginMeta::new(Self::ID, "DeepSeek DOM Export", PluginCategory::Exporters)
                    .with_version("1.0.0")
                    .with_description("Writes the page's current outer HTML to the output directory"),
            ),
        }
    }

    async fn run(&self) -> Result<PluginResult> {
        let ctx = self.base.ctx()?;
        let session = PageSession::deepseek(&ctx.config, &["Runtime", "Page"]).await?;

        let html = match session.evaluate(scripts::OUTER_HTML).await? {
            Value::String(s) => s,
            other => {
                return Ok(PluginResult::failure(format!(
                    "outerHTML evaluated to {}",
                    kind_of(&other)
                )))
            }
        };

        let path = write_output(&ctx.config.output_dir, CAPTURED_HTML, html.as_bytes())?;
        info!("Captured {} chars of HTML to {}", html.len(), path.display());
        Ok(PluginResult::success()
            .with_message(format!("saved {}", path.display()))
            .with_data("path", path.display().to_string())
            .with_data("bytes", html.len()))
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

impl Default for DeepSeekDomExport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for DeepSeekDomExport {
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
