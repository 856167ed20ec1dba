use crate::common::{request, spawn_hub};
use serde_json::json;

/// S1: standalone round-trip.
#[tokio::test]
async fn standalone_round_trip() {
    let hub = spawn_hub().await;

    let resp = request(
        hub.addr,
        &json!({"cmd": "send", "project_id": hub.project_id, "agent": "alice", "to": "task", "body": "hello"}),
    )
    .await;
    assert_eq!(resp["ok"], true);
    let id = resp["id"].as_str().unwrap().to_string();
    assert_eq!(id.len(), 20, "id should be YYYYMMDD-HHMMSS-NNNN");

    let files: Vec<_> = std::fs::read_dir(hub.dir.path().join(".fmail/topics/task"))
        .unwrap()
        .filter_map(|e| e.ok())
        .collect();
    assert_eq!(files.len(), 1);
    assert_eq!(files[0].file_name().to_str().unwrap(), format!("{id}.json"));

    let listed = request(
        hub.addr,
        &json!({"cmd": "list_topics", "project_id": hub.project_id, "agent": "alice"}),
    )
    .await;
    let topics = listed["topics"].as_array().unwrap();
    assert_eq!(topics.len(), 1);
    assert_eq!(topics[0]["name"], "task");
    assert_eq!(topics[0]["messages"], 1);
}

/// S2: case folding.
#[tokio::test]
async fn case_folding() {
    let hub = spawn_hub().await;

    let resp = request(
        hub.addr,
        &json!({"cmd": "send", "project_id": hub.project_id, "agent": "Alice", "to": "Task", "body": "x"}),
    )
    .await;
    assert_eq!(resp["ok"], true);

    let dir = hub.dir.path().join(".fmail/topics/task");
    assert!(dir.exists(), "topic directory should use the lowercased name");
    let bytes = std::fs::read(dir.join(format!("{}.json", resp["id"].as_str().unwrap()))).unwrap();
    let saved: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
    assert_eq!(saved["from"], "alice");
    assert_eq!(saved["to"], "task");
}

/// S5: size limit.
#[tokio::test]
async fn oversized_message_is_rejected() {
    let hub = spawn_hub().await;

    let big = "x".repeat(fmail::store::MAX_MESSAGE_BYTES + 16);
    let resp = request(
        hub.addr,
        &json!({"cmd": "send", "project_id": hub.project_id, "agent": "alice", "to": "task", "body": big}),
    )
    .await;
    assert_eq!(resp["ok"], false);
    assert_eq!(resp["error"]["code"], "too_large");

    let dir = hub.dir.path().join(".fmail/topics/task");
    assert!(!dir.exists() || std::fs::read_dir(&dir).unwrap().count() == 0);
}
