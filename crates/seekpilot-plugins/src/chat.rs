//! Chat plugins: opening a fresh conversation and sending a prompt.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use seekpilot_cdp::runtime;
use seekpilot_core::config::NewChatConfig;
use seekpilot_core::{
    Error, Plugin, PluginCategory, PluginContext, PluginMeta, PluginResult, Result, StartOutcome,
};

use crate::answer::{AnswerWatcher, Detection, Verdict};
use crate::page::{fold_channel_error, PageSession, PluginBase};
use crate::scripts;

const OPEN_ATTEMPTS: u32 = 5;
const RETRY_PAUSE: Duration = Duration::from_millis(500);

/// Storage key holding the last answer seen by [`ChatInjector`].
pub const ANSWER_KEY: &str = "chatInjector.answer";

// ---------------------------------------------------------------
// newChatOpener
// ---------------------------------------------------------------

/// Where a click landed and how the button was found.
#[derive(Debug, Clone, PartialEq)]
struct Click {
    via: &'static str,
    x: f64,
    y: f64,
}

/// Clicks DeepSeek's "new chat" button.
pub struct NewChatOpener {
    base: PluginBase,
}

impl NewChatOpener {
    pub const ID: &'static str = "newChatOpener";

    pub fn new() -> Self {
        Self {
            base: PluginBase::new(
                PluginMeta::new(Self::ID, "New Chat Opener", PluginCategory::Chat)
                    .with_version("1.0.0")
                    .with_description(
                        "Finds the new-chat button through the accessibility tree or page text and clicks it",
                    ),
            ),
        }
    }

    async fn run(&self) -> Result<PluginResult> {
        let ctx = self.base.ctx()?;
        let cfg = &ctx.config.new_chat;
        let session = PageSession::open(
            &ctx.config,
            &cfg.target_url,
            Duration::from_millis(cfg.cdp_timeout_ms),
            &["Runtime", "DOM", "Accessibility", "Page"],
        )
        .await?;

        let budget = Duration::from_millis(cfg.max_total_ms);
        let started = Instant::now();
        let mut attempts = 0;
        let mut click = None;

        while attempts < OPEN_ATTEMPTS && click.is_none() {
            attempts += 1;
            click = match click_by_ax(&session, cfg).await {
                Ok(Some(c)) => Some(c),
                Ok(None) => click_by_text(&session, &cfg.ax_name).await?,
                Err(e) if session.channel.is_closed() => return Err(e),
                Err(e) => {
                    debug!("AX lookup failed: {}", e);
                    click_by_text(&session, &cfg.ax_name).await?
                }
            };
            if click.is_some() || started.elapsed() > budget {
                break;
            }
            tokio::time::sleep(RETRY_PAUSE).await;
        }

        let Some(Click { via, x, y }) = click else {
            let verified = session.evaluate(scripts::VERIFY_NEW_CHAT).await?;
            if verified.get("ok").and_then(Value::as_bool) == Some(true) {
                info!("Composer is already empty, treating as a new chat");
                return Ok(PluginResult::success()
                    .with_message("new chat already open")
                    .with_data("via", "verify")
                    .with_data("attempts", attempts));
            }
            return Ok(PluginResult::failure(format!(
                "new chat button '{}' not found after {} attempt(s)",
                cfg.ax_name, attempts
            ))
            .with_data("attempts", attempts));
        };

        info!("Opened new chat via {} at ({}, {})", via, x, y);
        Ok(PluginResult::success()
            .with_message("new chat opened")
            .with_data("via", via)
            .with_data("x", x)
            .with_data("y", y)
            .with_data("attempts", attempts))
    }
}

impl Default for NewChatOpener {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for NewChatOpener {
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

/// Find the button by accessible name and role, then click the centre of
/// the largest matching box.
async fn click_by_ax(session: &PageSession, cfg: &NewChatConfig) -> Result<Option<Click>> {
    let channel = &session.channel;
    let doc = channel.call("DOM.getDocument", json!({ "depth": 0 })).await?;
    let root = doc
        .pointer("/root/nodeId")
        .and_then(Value::as_i64)
        .ok_or_else(|| Error::Protocol("DOM.getDocument returned no root".into()))?;

    let tree = channel
        .call_with(
            "Accessibility.queryAXTree",
            json!({ "nodeId": root, "accessibleName": cfg.ax_name }),
            seekpilot_cdp::CallOptions::timeout(Duration::from_millis(cfg.ax_timeout_ms)),
        )
        .await?;
    let backend_ids = matching_backend_ids(&tree, &cfg.ax_role);
    if backend_ids.is_empty() {
        return Ok(None);
    }

    let mut quads = Vec::with_capacity(backend_ids.len());
    for id in backend_ids {
        match channel.call("DOM.getBoxModel", json!({ "backendNodeId": id })).await {
            Ok(model) => {
                if let Some(q) = box_quad(&model) {
                    quads.push(q);
                }
            }
            Err(e) if e.is_channel() => return Err(e),
            Err(e) => debug!("No box model for node {}: {}", id, e),
        }
    }

    let Some((x, y)) = largest_quad_center(&quads) else {
        return Ok(None);
    };
    runtime::click_at(channel, x, y).await?;
    Ok(Some(Click { via: "ax", x, y }))
}

async fn click_by_text(session: &PageSession, label: &str) -> Result<Option<Click>> {
    let r = session.evaluate(&scripts::click_by_text(label)).await?;
    if r.get("ok").and_then(Value::as_bool) != Some(true) {
        return Ok(None);
    }
    Ok(Some(Click {
        via: "dom",
        x: r.get("x").and_then(Value::as_f64).unwrap_or_default(),
        y: r.get("y").and_then(Value::as_f64).unwrap_or_default(),
    }))
}

/// Backend node ids of `queryAXTree` nodes whose role is `role`.
fn matching_backend_ids(tree: &Value, role: &str) -> Vec<i64> {
    tree.get("nodes")
        .and_then(Value::as_array)
        .map(|nodes| {
            nodes
                .iter()
                .filter(|n| n.pointer("/role/value").and_then(Value::as_str) == Some(role))
                .filter_map(|n| n.get("backendDOMNodeId").and_then(Value::as_i64))
                .collect()
        })
        .unwrap_or_default()
}

/// The content quad of a `DOM.getBoxModel` result, falling back to border
/// then margin.
fn box_quad(model: &Value) -> Option<Vec<f64>> {
    ["content", "border", "margin"].iter().find_map(|k| {
        let quad: Vec<f64> = model
            .pointer(&format!("/model/{}", k))?
            .as_array()?
            .iter()
            .filter_map(Value::as_f64)
            .collect();
        (quad.len() >= 8).then_some(quad)
    })
}

/// Centre of the quad with the largest bounding box. Boxes under one pixel
/// in either direction are ignored.
fn largest_quad_center(quads: &[Vec<f64>]) -> Option<(f64, f64)> {
    quads
        .iter()
        .filter(|q| q.len() >= 8)
        .filter_map(|q| {
            let xs = [q[0], q[2], q[4], q[6]];
            let ys = [q[1], q[3], q[5], q[7]];
            let width = xs.iter().cloned().fold(f64::MIN, f64::max) - xs.iter().cloned().fold(f64::MAX, f64::min);
            let height = ys.iter().cloned().fold(f64::MIN, f64::max) - ys.iter().cloned().fold(f64::MAX, f64::min);
            if width < 1.0 || height < 1.0 {
                return None;
            }
            let cx = xs.iter().sum::<f64>() / 4.0;
            let cy = ys.iter().sum::<f64>() / 4.0;
            Some((width * height, cx.round(), cy.round()))
        })
        .fold(None, |best: Option<(f64, f64, f64)>, c| match best {
            Some(b) if b.0 >= c.0 => Some(b),
            _ => Some(c),
        })
        .map(|(_, x, y)| (x, y))
}

// ---------------------------------------------------------------
// chatInjector
// ---------------------------------------------------------------

/// Types a prompt into the composer, submits it and waits for the answer.
pub struct ChatInjector {
    base: PluginBase,
}

impl ChatInjector {
    pub const ID: &'static str = "chatInjector";

    pub fn new() -> Self {
        Self {
            base: PluginBase::new(
                PluginMeta::new(Self::ID, "Chat Injector", PluginCategory::Chat)
                    .with_version("1.0.0")
                    .with_description("Sends the configured prompt and waits until the answer stops changing"),
            ),
        }
    }

    async fn run(&self) -> Result<PluginResult> {
        let ctx = self.base.ctx()?;
        let cfg = &ctx.config.chat_injector;
        let session = PageSession::open(
            &ctx.config,
            &cfg.target_url,
            Duration::from_millis(ctx.config.new_chat.cdp_timeout_ms),
            &["Runtime", "Page"],
        )
        .await?;

        let injected = session.evaluate(&scripts::inject_prompt(&cfg.text)).await?;
        if injected.get("ok").and_then(Value::as_bool) != Some(true) {
            let msg = injected.get("msg").and_then(Value::as_str).unwrap_or("injection failed");
            return Ok(PluginResult::failure(format!("could not inject prompt: {}", msg)));
        }
        info!(
            "Prompt submitted through {}",
            injected.get("selector").and_then(serde_json::Value::as_str).unwrap_or("?")
        );

        if !cfg.wait_for_answer {
            return Ok(PluginResult::success()
                .with_message("prompt submitted")
                .with_data("text", cfg.text.clone()));
        }

        let mut watcher = AnswerWatcher::new(
            Duration::from_millis(cfg.answer_timeout_ms),
            Duration::from_millis(cfg.stable_threshold_ms),
        );
        let interval = Duration::from_millis(cfg.polling_interval_ms.max(1));
        let started = Instant::now();

        loop {
            tokio::time::sleep(interval).await;
            let detection = match session.evaluate(scripts::DETECT_ANSWER).await {
                Ok(v) => serde_json::from_value::<Detection>(v).ok(),
                Err(e) if session.channel.is_closed() => return Err(e),
                Err(e) => {
                    warn!("Answer check failed: {}", e);
                    None
                }
            };

            match watcher.observe(started.elapsed(), detection.as_ref()) {
                Verdict::Pending => continue,
                Verdict::Complete { reason, content } => {
                    info!(
                        "Answer complete after {} check(s): {}",
                        watcher.checks(),
                        reason
                    );
                    ctx.storage
                        .set(
                            ANSWER_KEY,
                            json!({ "text": cfg.text, "content": content, "reason": reason }),
                        )
                        .await?;
                    return Ok(PluginResult::success()
                        .with_message("answer received")
                        .with_data("reason", reason)
                        .with_data("content", content)
                        .with_data("checks", watcher.checks()));
                }
                Verdict::TimedOut => {
                    return Ok(PluginResult::failure(format!(
                        "no complete answer within {}ms",
                        cfg.answer_timeout_ms
                    ))
                    .with_data("content", watcher.last_content().to_string())
                    .with_data("checks", watcher.checks()));
                }
            }
        }
    }
}

impl Default for ChatInjector {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Plugin for ChatInjector {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matching_backend_ids_filters_role() {
        let tree = json!({ "nodes": [
            { "role": { "value": "button" }, "backendDOMNodeId": 11 },
            { "role": { "value": "StaticText" }, "backendDOMNodeId": 12 },
            { "role": { "value": "button" } },
            { "role": { "value": "button" }, "backendDOMNodeId": 13 }
        ]});
        assert_eq!(matching_backend_ids(&tree, "button"), vec![11, 13]);
        assert!(matching_backend_ids(&json!({}), "button").is_empty());
    }

    #[test]
    fn test_box_quad_fallbacks() {
        let content = json!({ "model": { "content": [0, 0, 10, 0, 10, 10, 0, 10] } });
        assert_eq!(box_quad(&content).unwrap()[2], 10.0);

        let border_only = json!({ "model": { "content": [1, 2], "border": [0, 0, 4, 0, 4, 4, 0, 4] } });
        assert_eq!(box_quad(&border_only).unwrap()[4], 4.0);

        assert!(box_quad(&json!({ "model": {} })).is_none());
    }

    #[test]
    fn test_largest_quad_center() {
        let small = vec![0.0, 0.0, 10.0, 0.0, 10.0, 10.0, 0.0, 10.0];
        let large = vec![100.0, 50.0, 300.0, 50.0, 300.0, 90.0, 100.0, 90.0];
        let flat = vec![0.0, 0.0, 500.0, 0.0, 500.0, 0.5, 0.0, 0.5];
        assert_eq!(
            largest_quad_center(&[small.clone(), large, flat]),
            Some((200.0, 70.0))
        );
        assert_eq!(largest_quad_center(&[small]), Some((5.0, 5.0)));
        assert_eq!(largest_quad_center(&[]), None);
    }

    #[tokio::test]
    async fn test_start_before_init_is_error() {
        let mut plugin = ChatInjector::new();
        assert!(plugin.start().await.is_err());
        assert_eq!(plugin.meta().id, ChatInjector::ID);
        assert_eq!(NewChatOpener::new().meta().category, PluginCategory::Chat);
    }
}
