//! L8: the supervised outbound relay client. §4.9, §5.

use crate::hub::Hub;
use crate::model::Message;
use serde::Deserialize;
use serde_json::json;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Fixed backoff schedule between reconnect attempts, §5: 0, 200ms, 400ms,
/// 800ms, then clamped at a 2s ceiling.
const BACKOFF_SCHEDULE_MS: [u64; 4] = [0, 200, 400, 800];
const BACKOFF_CEILING: Duration = Duration::from_secs(2);

#[derive(Debug, Deserialize)]
struct Frame {
    #[serde(default)]
    msg: Option<Message>,
    #[serde(default)]
    ok: Option<bool>,
}

fn backoff_for(attempt: usize) -> Duration {
    BACKOFF_SCHEDULE_MS
        .get(attempt)
        .map(|ms| Duration::from_millis(*ms))
        .unwrap_or(BACKOFF_CEILING)
}

/// Advance `cursor` to `id` if `id` sorts after whatever's there, per the
/// same lexical ordering `Since` uses. Ids are monotone but messages can
/// still arrive out of order across reconnects, so this is a max, not an
/// assignment.
fn advance_cursor(cursor: &mut Option<String>, id: &str) {
    if cursor.as_deref().is_none_or(|current| id > current) {
        *cursor = Some(id.to_string());
    }
}

/// Runs until `cancel` fires: connect to `peer`, issue a `relay` watch, and
/// ingest every message frame into `hub`. Reconnects with backoff on any
/// failure, logging and continuing rather than giving up (§4.9). Tracks the
/// last successfully ingested message id across reconnects so a resumed
/// session asks the peer for only what it's missing (§4.9).
pub async fn run(hub: Arc<Hub>, project_id: String, peer: SocketAddr, cancel: CancellationToken) {
    let mut attempt = 0usize;
    let mut since_id: Option<String> = None;
    loop {
        if cancel.is_cancelled() {
            return;
        }

        match relay_once(&hub, &project_id, peer, &cancel, &mut since_id).await {
            Ok(()) => {
                info!(%peer, "relay session ended cleanly");
                attempt = 0;
            }
            Err(e) => {
                warn!(%peer, error = %e, attempt, "relay session failed, reconnecting");
                attempt += 1;
            }
        }

        if cancel.is_cancelled() {
            return;
        }
        let delay = backoff_for(attempt);
        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

async fn relay_once(
    hub: &Arc<Hub>,
    project_id: &str,
    peer: SocketAddr,
    cancel: &CancellationToken,
    since_id: &mut Option<String>,
) -> std::io::Result<()> {
    let stream = TcpStream::connect(peer).await?;
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let request = json!({
        "cmd": "relay",
        "project_id": project_id,
        "agent": "relay",
        "since": since_id.as_deref(),
    });
    let mut line = serde_json::to_string(&request)?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;

    // First frame is the ack for the relay request itself.
    let ack = lines
        .next_line()
        .await?
        .ok_or_else(|| std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "peer closed before ack"))?;
    let ack: Frame = serde_json::from_str(&ack)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    if ack.ok == Some(false) {
        return Err(std::io::Error::new(std::io::ErrorKind::InvalidData, "peer rejected relay request"));
    }

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            line = lines.next_line() => {
                let Some(line) = line? else { return Ok(()) };
                let frame: Frame = match serde_json::from_str(&line) {
                    Ok(f) => f,
                    Err(e) => {
                        debug!(error = %e, "skipping unparseable relay frame");
                        continue;
                    }
                };
                if let Some(msg) = frame.msg {
                    match hub.ingest_message(&msg) {
                        Ok(_) => advance_cursor(since_id, &msg.id),
                        Err(e) => warn!(error = %e, "failed to ingest relayed message"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_follows_fixed_schedule_then_clamps() {
        assert_eq!(backoff_for(0), Duration::from_millis(0));
        assert_eq!(backoff_for(1), Duration::from_millis(200));
        assert_eq!(backoff_for(2), Duration::from_millis(400));
        assert_eq!(backoff_for(3), Duration::from_millis(800));
        assert_eq!(backoff_for(4), BACKOFF_CEILING);
        assert_eq!(backoff_for(100), BACKOFF_CEILING);
    }

    #[test]
    fn cursor_advances_only_forward() {
        let mut cursor = None;
        advance_cursor(&mut cursor, "20260101-120000-0001");
        assert_eq!(cursor.as_deref(), Some("20260101-120000-0001"));

        advance_cursor(&mut cursor, "20260101-120000-0000");
        assert_eq!(cursor.as_deref(), Some("20260101-120000-0001"), "must not go backwards");

        advance_cursor(&mut cursor, "20260101-120000-0002");
        assert_eq!(cursor.as_deref(), Some("20260101-120000-0002"));
    }
}
