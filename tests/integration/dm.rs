use crate::common::{request, spawn_hub, Conn};
use serde_json::json;
use tokio::io::{AsyncBufReadExt, BufReader};

/// S3: DM access — any watcher of `@bob` sees it, but only `bob` himself may
/// open that watch; anyone else is rejected with `invalid_request`.
#[tokio::test]
async fn dm_watch_is_restricted_to_the_owning_agent() {
    let hub = spawn_hub().await;

    let sent = request(
        hub.addr,
        &json!({"cmd": "send", "project_id": hub.project_id, "agent": "alice", "to": "@Bob", "body": "hi"}),
    )
    .await;
    assert_eq!(sent["ok"], true);

    // bob watching his own mailbox succeeds and sees the backlog.
    let mut conn = Conn::connect(hub.addr).await;
    conn.send(&json!({"cmd": "watch", "project_id": hub.project_id, "agent": "bob", "topic": "@bob"}))
        .await;
    let (reader, _writer) = conn.split();
    let mut lines = BufReader::new(reader).lines();
    let ack: serde_json::Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(ack["ok"], true);
    let frame: serde_json::Value = serde_json::from_str(&lines.next_line().await.unwrap().unwrap()).unwrap();
    assert_eq!(frame["msg"]["to"], "@bob");
    assert_eq!(frame["msg"]["from"], "alice");

    // alice watching bob's mailbox is rejected outright.
    let rejected = request(
        hub.addr,
        &json!({"cmd": "watch", "project_id": hub.project_id, "agent": "alice", "topic": "@bob"}),
    )
    .await;
    assert_eq!(rejected["ok"], false);
    assert_eq!(rejected["error"]["code"], "invalid_request");
}
