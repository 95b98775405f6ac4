//! Shared plumbing for the page plugins: context handling, attaching to the
//! DeepSeek tab, and writing output files.

use std::path::{Path, PathBuf};
use std::time::Duration;

use base64::Engine;
use serde_json::{json, Value};
use tracing::{debug, info};

use seekpilot_cdp::{runtime, CallOptions, CdpChannel, DevTools, Target};
use seekpilot_core::{AppConfig, Error, PluginContext, PluginMeta, PluginResult, Result, StartOutcome};

/// Metadata plus the context received at init.
pub struct PluginBase {
    pub meta: PluginMeta,
    ctx: Option<PluginContext>,
}

impl PluginBase {
    pub fn new(meta: PluginMeta) -> Self {
        Self { meta, ctx: None }
    }

    pub fn set_context(&mut self, ctx: PluginContext) {
        self.ctx = Some(ctx);
    }

    pub fn ctx(&self) -> Result<&PluginContext> {
        self.ctx
            .as_ref()
            .ok_or_else(|| Error::Plugin(format!("{} started before init", self.meta.id)))
    }
}

/// Turn a browser channel failure into a failed result instead of an error.
///
/// Anything else stays an error and is recorded by the manager.
pub fn fold_channel_error(result: Result<PluginResult>) -> Result<StartOutcome> {
    match result {
        Ok(r) => Ok(r.into()),
        Err(e) if e.is_channel() => Ok(PluginResult::failure(format!("browser channel failed: {}", e))
            .with_error(e)
            .into()),
        Err(e) => Err(e),
    }
}

/// A CDP connection to one tab.
pub struct PageSession {
    pub target: Target,
    pub channel: CdpChannel,
}

impl PageSession {
    /// Reuse or open a tab on `url`, connect, and bring it to the front.
    pub async fn open(config: &AppConfig, url: &str, call_timeout: Duration, domains: &[&str]) -> Result<Self> {
        let devtools = DevTools::new(
            &config.chrome.devtools_url,
            Duration::from_millis(config.chrome.timeout_ms),
        )?;
        let (target, channel) = devtools.attach(url, call_timeout).await?;
        info!("Attached to {} ({})", target.url, target.id);

        runtime::enable(&channel, domains).await?;
        channel.call("Page.bringToFront", json!({})).await?;
        Ok(Self { target, channel })
    }

    /// The DeepSeek tab with the default call timeout.
    pub async fn deepseek(config: &AppConfig, domains: &[&str]) -> Result<Self> {
        Self::open(
            config,
            &config.new_chat.target_url,
            Duration::from_millis(config.new_chat.cdp_timeout_ms),
            domains,
        )
        .await
    }

    pub async fn evaluate(&self, expression: &str) -> Result<Value> {
        runtime::evaluate(&self.channel, expression).await
    }

    pub async fn evaluate_with(&self, expression: &str, timeout: Duration) -> Result<Value> {
        runtime::evaluate_with(&self.channel, expression, CallOptions::timeout(timeout)).await
    }

    /// PNG screenshot of the viewport.
    pub async fn screenshot(&self) -> Result<Vec<u8>> {
        let response = self
            .channel
            .call("Page.captureScreenshot", json!({ "format": "png" }))
            .await?;
        let data = response
            .get("data")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::Protocol("captureScreenshot returned no data".into()))?;
        base64::engine::general_purpose::STANDARD
            .decode(data)
            .map_err(|e| Error::Protocol(format!("screenshot is not base64: {}", e)))
    }
}

impl Drop for PageSession {
    fn drop(&mut self) {
        self.channel.close();
    }
}

/// Write `contents` to `dir/name`, creating `dir` if needed.
pub fn write_output(dir: &Path, name: &str, contents: &[u8]) -> Result<PathBuf> {
    std::fs::create_dir_all(dir)?;
    let path = dir.join(name);
    std::fs::write(&path, contents)?;
    debug!("Wrote {} bytes to {}", contents.len(), path.display());
    Ok(path)
}

/// `dir/stem.ext`, or the first free `dir/stem-N.ext`.
pub fn unique_path(dir: &Path, stem: &str, ext: &str) -> Result<PathBuf> {
    let first = dir.join(format!("{}.{}", stem, ext));
    if !first.exists() {
        return Ok(first);
    }
    (1..=999)
        .map(|n| dir.join(format!("{}-{}.{}", stem, n, ext)))
        .find(|p| !p.exists())
        .ok_or_else(|| Error::Internal(format!("no free file name for {} in {}", stem, dir.display())))
}

/// Local time formatted for file names.
pub fn file_stamp() -> String {
    chrono::Local::now().format("%Y-%m-%d_%H-%M-%S").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use seekpilot_core::PluginCategory;

    #[test]
    fn test_write_output_creates_dir() {
        let dir = tempfile::tempdir().unwrap();
        let out = dir.path().join("output");
        let path = write_output(&out, "page.html", b"<html></html>").unwrap();
        assert_eq!(std::fs::read_to_string(path).unwrap(), "<html></html>");
    }

    #[test]
    fn test_unique_path_counts_up() {
        let dir = tempfile::tempdir().unwrap();
        let first = unique_path(dir.path(), "snapshot", "png").unwrap();
        assert!(first.ends_with("snapshot.png"));
        std::fs::write(&first, b"x").unwrap();

        let second = unique_path(dir.path(), "snapshot", "png").unwrap();
        assert!(second.ends_with("snapshot-1.png"));
        std::fs::write(&second, b"x").unwrap();

        assert!(unique_path(dir.path(), "snapshot", "png")
            .unwrap()
            .ends_with("snapshot-2.png"));
    }

    #[test]
    fn test_fold_channel_error() {
        let folded = fold_channel_error(Err(Error::Timeout {
            method: "Runtime.evaluate".into(),
        }))
        .unwrap();
        match folded {
            StartOutcome::Explicit(r) => {
                assert!(!r.success);
                assert!(r.message.unwrap().contains("Runtime.evaluate"));
                assert!(r.error.is_some());
            }
            StartOutcome::Implicit => panic!("expected explicit failure"),
        }

        assert!(fold_channel_error(Err(Error::Target("down".into()))).is_err());
    }

    #[test]
    fn test_ctx_before_init_is_error() {
        let base = PluginBase::new(PluginMeta::new("x", "X", PluginCategory::Chat));
        assert!(matches!(base.ctx(), Err(Error::Plugin(_))));
    }
}
