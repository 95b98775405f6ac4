//! Channel behaviour over an in-memory transport.

use std::time::Duration;

use futures::future::join_all;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

use seekpilot_cdp::{CallOptions, CdpChannel};
use seekpilot_core::{Error, Result};

/// The browser side of an in-memory transport.
struct Peer {
    requests: mpsc::UnboundedReceiver<String>,
    replies: mpsc::UnboundedSender<Result<String>>,
}

impl Peer {
    async fn next_request(&mut self) -> Value {
        let frame = self.requests.recv().await.expect("channel dropped");
        serde_json::from_str(&frame).unwrap()
    }

    fn reply(&self, frame: Value) {
        self.replies.send(Ok(frame.to_string())).unwrap();
    }

    fn raw(&self, frame: &str) {
        self.replies.send(Ok(frame.to_string())).unwrap();
    }
}

fn connect(default_timeout: Duration) -> (CdpChannel, Peer) {
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let channel = CdpChannel::spawn(out_tx, UnboundedReceiverStream::new(in_rx), default_timeout);
    (
        channel,
        Peer {
            requests: out_rx,
            replies: in_tx,
        },
    )
}

/// Answer every request with its own params, in arrival order.
fn spawn_echo(mut peer: Peer) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(frame) = peer.requests.recv().await {
            let msg: Value = serde_json::from_str(&frame).unwrap();
            let reply = json!({ "id": msg["id"], "result": { "echo": msg["params"] } });
            if peer.replies.send(Ok(reply.to_string())).is_err() {
                break;
            }
        }
    })
}

#[tokio::test]
async fn test_request_frame_shape_and_result() {
    let (channel, mut peer) = connect(Duration::from_secs(5));

    let (result, _) = tokio::join!(channel.call("Page.navigate", json!({ "url": "about:blank" })), async {
        let req = peer.next_request().await;
        assert_eq!(req["id"], 1);
        assert_eq!(req["method"], "Page.navigate");
        assert_eq!(req["params"]["url"], "about:blank");
        peer.reply(json!({ "id": 1, "result": { "frameId": "F1" } }));
    });

    assert_eq!(result.unwrap(), json!({ "frameId": "F1" }));
    assert_eq!(channel.pending_count(), 0);
}

#[tokio::test]
async fn test_ids_increase_per_call() {
    let (channel, peer) = connect(Duration::from_secs(5));
    let (seen_tx, mut seen_rx) = mpsc::unbounded_channel();
    let mut requests = peer.requests;
    let replies = peer.replies;
    tokio::spawn(async move {
        while let Some(frame) = requests.recv().await {
            let msg: Value = serde_json::from_str(&frame).unwrap();
            seen_tx.send(msg["id"].as_u64().unwrap()).unwrap();
            replies
                .send(Ok(json!({ "id": msg["id"], "result": {} }).to_string()))
                .unwrap();
        }
    });

    for _ in 0..3 {
        channel.call("Runtime.enable", json!({})).await.unwrap();
    }
    let ids: Vec<u64> = (0..3).map(|_| seen_rx.try_recv().unwrap()).collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_out_of_order_responses_reach_their_callers() {
    let (channel, mut peer) = connect(Duration::from_secs(5));

    let (a, b, _) = tokio::join!(
        channel.call("A.first", json!({})),
        channel.call("B.second", json!({})),
        async {
            let first = peer.next_request().await;
            let second = peer.next_request().await;
            peer.reply(json!({ "id": second["id"], "result": { "who": second["method"] } }));
            peer.reply(json!({ "id": first["id"], "result": { "who": first["method"] } }));
        }
    );

    assert_eq!(a.unwrap()["who"], "A.first");
    assert_eq!(b.unwrap()["who"], "B.second");
}

#[tokio::test]
async fn test_many_concurrent_calls() {
    let (channel, peer) = connect(Duration::from_secs(5));
    let echo = spawn_echo(peer);

    let calls = (0..50).map(|n| channel.call("Echo.n", json!({ "n": n })));
    let results = join_all(calls).await;
    for (n, result) in results.into_iter().enumerate() {
        assert_eq!(result.unwrap()["echo"]["n"], n);
    }
    assert_eq!(channel.pending_count(), 0);
    echo.abort();
}

#[tokio::test]
async fn test_timeout_evicts_and_late_response_is_ignored() {
    let (channel, mut peer) = connect(Duration::from_secs(5));

    let err = channel
        .call_with(
            "DOM.getDocument",
            json!({}),
            CallOptions::timeout(Duration::from_millis(30)),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Timeout { ref method } if method == "DOM.getDocument"));
    assert!(err.to_string().contains("DOM.getDocument"));
    assert_eq!(channel.pending_count(), 0);

    // The stale request is still in the transport; answer it late.
    let stale = peer.next_request().await;
    peer.reply(json!({ "id": stale["id"], "result": { "late": true } }));

    let (result, _) = tokio::join!(channel.call("Runtime.enable", json!({})), async {
        let req = peer.next_request().await;
        assert_ne!(req["id"], stale["id"]);
        peer.reply(json!({ "id": req["id"], "result": { "fresh": true } }));
    });
    assert_eq!(result.unwrap(), json!({ "fresh": true }));
    assert!(!channel.is_closed());
}

#[tokio::test]
async fn test_default_timeout_applies_without_override() {
    let (channel, _peer) = connect(Duration::from_millis(20));
    let err = channel.call("Page.enable", json!({})).await.unwrap_err();
    assert!(matches!(err, Error::Timeout { .. }));
    assert_eq!(channel.default_timeout(), Duration::from_millis(20));
}

#[tokio::test]
async fn test_remote_error_carries_message() {
    let (channel, mut peer) = connect(Duration::from_secs(5));

    let (result, _) = tokio::join!(channel.call("Accessibility.queryAXTree", json!({})), async {
        let req = peer.next_request().await;
        peer.reply(json!({ "id": req["id"], "error": { "code": -32601, "message": "method not found" } }));
    });

    match result {
        Err(Error::Remote { method, message }) => {
            assert_eq!(method, "Accessibility.queryAXTree");
            assert_eq!(message, "method not found");
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn test_malformed_frames_are_ignored() {
    let (channel, mut peer) = connect(Duration::from_secs(5));

    let (result, _) = tokio::join!(channel.call("Runtime.enable", json!({})), async {
        let req = peer.next_request().await;
        peer.raw("not json at all");
        peer.raw("{\"id\":");
        peer.raw(r#"{"method":"Runtime.consoleAPICalled","params":{}}"#);
        peer.raw(r#"{"id":"seven","result":{}}"#);
        peer.reply(json!({ "id": req["id"], "result": { "ok": true } }));
    });

    assert_eq!(result.unwrap()["ok"], true);
    assert!(!channel.is_closed());
}

#[tokio::test]
async fn test_close_rejects_pending_and_future_calls() {
    let (channel, peer) = connect(Duration::from_secs(5));
    let Peer {
        mut requests,
        replies,
    } = peer;

    let (a, b, _) = tokio::join!(
        channel.call("Page.navigate", json!({})),
        channel.call("Page.reload", json!({})),
        async move {
            requests.recv().await;
            requests.recv().await;
            drop(replies);
        }
    );

    assert!(matches!(a, Err(Error::ChannelClosed)));
    assert!(matches!(b, Err(Error::ChannelClosed)));
    assert_eq!(channel.pending_count(), 0);
    assert!(channel.is_closed());

    let later = channel.call("Page.enable", json!({})).await;
    assert!(matches!(later, Err(Error::ChannelClosed)));
}

#[tokio::test]
async fn test_transport_error_rejects_with_channel_error() {
    let (channel, mut peer) = connect(Duration::from_secs(5));

    let (result, _) = tokio::join!(channel.call("Page.enable", json!({})), async {
        peer.next_request().await;
        peer.replies
            .send(Err(Error::ChannelError("connection reset".into())))
            .unwrap();
    });

    assert!(matches!(result, Err(Error::ChannelError(ref m)) if m.contains("connection reset")));
    let later = channel.call("Page.enable", json!({})).await;
    assert!(matches!(later, Err(Error::ChannelError(_))));
    assert!(later.unwrap_err().is_channel());
}

#[tokio::test]
async fn test_explicit_close() {
    let (channel, _peer) = connect(Duration::from_secs(5));
    channel.close();
    assert!(channel.is_closed());
    assert!(matches!(
        channel.call("Page.enable", json!({})).await,
        Err(Error::ChannelClosed)
    ));
}
