use crate::common::{request, spawn_hub, Conn};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

/// S4: backlog continuity into live delivery. Three messages are persisted
/// before the watch opens; `since=m1.id` should replay m2 and m3 as backlog,
/// then a fourth message sent after the watch is live should arrive on the
/// same stream with no gap and no duplicate.
#[tokio::test]
async fn backlog_then_live_messages_arrive_without_gaps_or_duplicates() {
    let hub = spawn_hub().await;

    let mut ids = Vec::new();
    for i in 0..3 {
        let resp = request(
            hub.addr,
            &json!({"cmd": "send", "project_id": hub.project_id, "agent": "alice", "to": "task", "body": format!("m{i}")}),
        )
        .await;
        assert_eq!(resp["ok"], true);
        ids.push(resp["id"].as_str().unwrap().to_string());
    }

    let mut conn = Conn::connect(hub.addr).await;
    conn.send(&json!({
        "cmd": "watch", "project_id": hub.project_id, "agent": "bob", "topic": "task", "since": ids[0],
    }))
    .await;
    let (reader, _writer) = conn.split();
    let mut lines = BufReader::new(reader).lines();

    let ack: serde_json::Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(ack["ok"], true);

    let backlog_1: serde_json::Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(backlog_1["msg"]["id"], ids[1]);
    let backlog_2: serde_json::Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(backlog_2["msg"]["id"], ids[2]);

    let sent = request(
        hub.addr,
        &json!({"cmd": "send", "project_id": hub.project_id, "agent": "alice", "to": "task", "body": "m3"}),
    )
    .await;
    assert_eq!(sent["ok"], true);
    let live_id = sent["id"].as_str().unwrap().to_string();

    let live: serde_json::Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(live["msg"]["id"], live_id);
    assert_ne!(live["msg"]["id"], backlog_1["msg"]["id"]);
    assert_ne!(live["msg"]["id"], backlog_2["msg"]["id"]);
}

/// S7: backpressure. A watcher that never reads its stream eventually
/// saturates its outbound buffers; the hub must terminate that connection
/// with a final `backpressure` error frame rather than hang or silently drop
/// messages forever.
#[tokio::test]
async fn stalled_watcher_is_closed_with_a_backpressure_frame() {
    let hub = spawn_hub().await;

    let mut conn = Conn::connect(hub.addr).await;
    conn.shrink_recv_buffer(1024);
    conn.send(&json!({"cmd": "watch", "project_id": hub.project_id, "agent": "bob", "topic": "task"}))
        .await;

    // Flood enough messages to exceed both the shrunk kernel buffer and the
    // subscriber's C_out channel (128) without the watcher reading any of it.
    for i in 0..1500 {
        let resp = request(
            hub.addr,
            &json!({
                "cmd": "send", "project_id": hub.project_id, "agent": "alice", "to": "task",
                "body": format!("padding-to-fill-buffers-{i:04}"),
            }),
        )
        .await;
        assert_eq!(resp["ok"], true);
    }

    let (reader, _writer) = conn.split();
    let mut lines = BufReader::new(reader).lines();

    let mut saw_backpressure = false;
    loop {
        match tokio::time::timeout(std::time::Duration::from_secs(10), lines.next_line()).await {
            Ok(Ok(Some(line))) => {
                let frame: serde_json::Value = serde_json::from_str(&line).unwrap();
                if frame["ok"] == false {
                    assert_eq!(frame["error"]["code"], "backpressure");
                    assert_eq!(frame["error"]["retryable"], true);
                    saw_backpressure = true;
                }
            }
            Ok(Ok(None)) => break,
            Ok(Err(e)) => panic!("read error: {e}"),
            Err(_) => panic!("timed out waiting for the hub to close the stalled watcher"),
        }
    }
    assert!(saw_backpressure, "connection closed without a backpressure frame");
}
