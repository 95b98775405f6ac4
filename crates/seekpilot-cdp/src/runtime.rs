//! Page-level helpers built on `Runtime`, `Page` and `Input` commands.

use std::time::{Duration, Instant};

use serde_json::{json, Value};
use tracing::debug;

use seekpilot_core::{Error, Result};

use crate::channel::{CallOptions, CdpChannel};

const READY_POLL: Duration = Duration::from_millis(250);

/// Evaluate `expression` in the page and return its value.
pub async fn evaluate(channel: &CdpChannel, expression: &str) -> Result<Value> {
    evaluate_with(channel, expression, CallOptions::default()).await
}

pub async fn evaluate_with(channel: &CdpChannel, expression: &str, options: CallOptions) -> Result<Value> {
    let response = channel
        .call_with(
            "Runtime.evaluate",
            json!({
                "expression": expression,
                "returnByValue": true,
                "awaitPromise": true,
            }),
            options,
        )
        .await?;
    evaluation_value(response)
}

/// Pull the value out of a `Runtime.evaluate` result, surfacing a thrown
/// page exception as an error.
pub fn evaluation_value(response: Value) -> Result<Value> {
    if let Some(details) = response.get("exceptionDetails") {
        let message = details
            .pointer("/exception/description")
            .and_then(Value::as_str)
            .or_else(|| details.get("text").and_then(Value::as_str))
            .unwrap_or("page script threw")
            .to_string();
        return Err(Error::Remote {
            method: "Runtime.evaluate".into(),
            message,
        });
    }
    Ok(response
        .pointer("/result/value")
        .cloned()
        .unwrap_or(Value::Null))
}

/// Enable the given CDP domains, e.g. `["Runtime", "Page"]`.
pub async fn enable(channel: &CdpChannel, domains: &[&str]) -> Result<()> {
    for domain in domains {
        channel.call(&format!("{}.enable", domain), json!({})).await?;
    }
    Ok(())
}

/// Poll `document.readyState` until it is `complete` or the budget runs out.
pub async fn wait_for_ready_state(channel: &CdpChannel, budget: Duration) -> Result<bool> {
    let started = Instant::now();
    loop {
        let state = evaluate_with(
            channel,
            "document.readyState",
            CallOptions::timeout(READY_POLL.max(budget.saturating_sub(started.elapsed()))),
        )
        .await?;
        if state.as_str() == Some("complete") {
            return Ok(true);
        }
        if started.elapsed() + READY_POLL >= budget {
            debug!("Page still '{}' after {:?}", state, budget);
            return Ok(false);
        }
        tokio::time::sleep(READY_POLL).await;
    }
}

/// Navigate the attached page.
pub async fn navigate(channel: &CdpChannel, url: &str) -> Result<()> {
    channel.call("Page.navigate", json!({ "url": url })).await?;
    Ok(())
}

/// Press and release the left mouse button at page coordinates.
pub async fn click_at(channel: &CdpChannel, x: f64, y: f64) -> Result<()> {
    for kind in ["mouseMoved", "mousePressed", "mouseReleased"] {
        channel
            .call(
                "Input.dispatchMouseEvent",
                json!({ "type": kind, "x": x, "y": y, "button": "left", "clickCount": 1 }),
            )
            .await?;
    }
    Ok(())
}
