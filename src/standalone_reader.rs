//! L9: standalone mailbox reader. §4.10 — reads a project's store directly
//! off disk with no hub process running, for tooling that only needs a
//! point-in-time view (or slow polling) rather than a live stream.

use crate::backlog;
use crate::error::Result;
use crate::model::Message;
use crate::since::{looks_like_id, Since};
use crate::store::Store;
use crate::subscriber::WatchTarget;
use chrono::{DateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Default poll interval when none is configured: coarser than the hub's
/// live push path since nothing here holds an open subscriber (§9).
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

fn target_dirs(store: &Store, target: &WatchTarget) -> Result<Vec<PathBuf>> {
    Ok(match target {
        WatchTarget::Topic(name) => vec![store.topic_dir(name)],
        WatchTarget::Dm(agent) => vec![store.dm_mailbox_dir(agent)],
        WatchTarget::All(agent) => {
            let mut dirs: Vec<PathBuf> = store
                .list_all_topic_names()?
                .into_iter()
                .map(|t| store.topic_dir(&t))
                .collect();
            dirs.push(store.dm_mailbox_dir(agent));
            dirs
        }
        WatchTarget::Relay => {
            let mut dirs: Vec<PathBuf> = store
                .list_all_topic_names()?
                .into_iter()
                .map(|t| store.topic_dir(&t))
                .collect();
            dirs.extend(store.list_dm_agents()?.into_iter().map(|a| store.dm_mailbox_dir(&a)));
            dirs
        }
    })
}

/// A filename-first, mtime-fallback pre-filter (§9 open question): a
/// conforming `<id>.json` name is compared lexically against `since` without
/// opening the file. A name that doesn't parse as an id (e.g. dropped by
/// external tooling) falls back to the file's modification time compared
/// against `since`'s time floor, so it is never silently skipped just
/// because it doesn't follow the id convention. This is only a cheap
/// pre-filter: every candidate that survives it is still opened, parsed,
/// and checked against `since.allows` for the authoritative answer.
fn candidate_passes(path: &Path, since: &Since) -> bool {
    let stem = path.file_stem().and_then(|s| s.to_str()).unwrap_or("");
    if looks_like_id(stem) {
        match since.id() {
            Some(id) => stem > id,
            None => true,
        }
    } else {
        let floor = since.time().unwrap_or(DateTime::<Utc>::UNIX_EPOCH);
        fs::metadata(path)
            .and_then(|m| m.modified())
            .map(|mtime| DateTime::<Utc>::from(mtime) > floor)
            .unwrap_or(true)
    }
}

/// One-shot read: every message currently on disk for `target` that passes
/// both the filename/mtime pre-filter and the authoritative `since` check,
/// in the same `(id, time, from, to)` order the live watch path delivers
/// backlog in.
pub fn read_once(store: &Store, target: &WatchTarget, since: &Since) -> Result<Vec<Message>> {
    let dirs = target_dirs(store, target)?;
    let mut out = Vec::new();
    for dir in dirs {
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };
        let mut candidates: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .filter(|p| candidate_passes(p, since))
            .collect();
        candidates.sort();

        for path in candidates {
            match fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<Message>(&bytes) {
                    Ok(msg) if since.allows(&msg) => out.push(msg),
                    Ok(_) => {}
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable message file"),
                },
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
    }
    out.sort_by(|a, b| backlog::sort_key(a).cmp(&backlog::sort_key(b)));
    Ok(out)
}

/// Poll `store` on `interval`, invoking `on_batch` with each newly-visible
/// run of messages until `cancel` fires. Advances its own cursor by the
/// highest id seen so a message is never handed to `on_batch` twice.
pub async fn poll(
    store: Store,
    target: WatchTarget,
    mut since: Since,
    interval: Duration,
    cancel: CancellationToken,
    mut on_batch: impl FnMut(Vec<Message>),
) {
    loop {
        match read_once(&store, &target, &since) {
            Ok(batch) if !batch.is_empty() => {
                if let Some(last) = batch.last() {
                    since = Since::from_id(last.id.clone());
                }
                on_batch(batch);
            }
            Ok(_) => {}
            Err(e) => warn!(error = %e, "standalone poll failed"),
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}
