//! L7: connection acceptor, request router, presence lifecycle. §4.8, §5, §6.

use crate::backlog;
use crate::error::{Error, Result};
use crate::hub::Hub;
use crate::model::Message;
use crate::naming::{self, Target};
use crate::protocol::{self, ListAgentsRequest, ListTopicsRequest, Request, SendRequest, StatusRequest, WatchRequest};
use crate::resolver::ProjectResolver;
use crate::since::Since;
use crate::store::Store;
use crate::subscriber::WatchTarget;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, UnixListener};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Owns the per-project hub map and drives connection acceptance for both
/// transports named in §6.
pub struct Server {
    resolver: Arc<dyn ProjectResolver>,
    hubs: Mutex<HashMap<PathBuf, Arc<Hub>>>,
    cancel: CancellationToken,
    presence_interval: std::time::Duration,
}

impl Server {
    pub fn new(resolver: Arc<dyn ProjectResolver>, cancel: CancellationToken) -> Arc<Self> {
        Self::with_presence_interval(resolver, cancel, crate::presence::T_PRESENCE)
    }

    pub fn with_presence_interval(
        resolver: Arc<dyn ProjectResolver>,
        cancel: CancellationToken,
        presence_interval: std::time::Duration,
    ) -> Arc<Self> {
        Arc::new(Server {
            resolver,
            hubs: Mutex::new(HashMap::new()),
            cancel,
            presence_interval,
        })
    }

    /// Racy by design (§5): two concurrent lookups for a new root may both
    /// build a `Hub`; the loser is discarded, the first winner wins.
    fn hub_for(&self, id: &str, root: &Path) -> Result<Arc<Hub>> {
        {
            let hubs = self.hubs.lock().unwrap();
            if let Some(hub) = hubs.get(root) {
                return Ok(hub.clone());
            }
        }
        let store = Store::new(root);
        store.ensure_root()?;
        store.ensure_project(id)?;
        let candidate = Hub::with_presence_interval(store, self.presence_interval);
        let mut hubs = self.hubs.lock().unwrap();
        let hub = hubs.entry(root.to_path_buf()).or_insert(candidate).clone();
        Ok(hub)
    }

    fn resolve(&self, project_id: Option<&str>) -> Result<Arc<Hub>> {
        let (id, root) = self.resolver.resolve(project_id.unwrap_or(""))?;
        self.hub_for(&id, &root)
    }

    pub async fn run_tcp(self: Arc<Self>, addr: std::net::SocketAddr) -> std::io::Result<()> {
        let listener = TcpListener::bind(addr).await?;
        info!(%addr, "fmail hub listening (tcp)");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("tcp acceptor shutting down");
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, peer)) => {
                            let server = self.clone();
                            tokio::spawn(async move {
                                debug!(%peer, "tcp connection accepted");
                                server.handle_connection(stream).await;
                            });
                        }
                        Err(e) => warn!(error = %e, "failed to accept tcp connection"),
                    }
                }
            }
        }
    }

    pub async fn run_unix(self: Arc<Self>, path: PathBuf) -> std::io::Result<()> {
        let _ = std::fs::remove_file(&path);
        let listener = UnixListener::bind(&path)?;
        info!(path = %path.display(), "fmail hub listening (unix)");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("unix acceptor shutting down");
                    let _ = std::fs::remove_file(&path);
                    return Ok(());
                }
                accepted = listener.accept() => {
                    match accepted {
                        Ok((stream, _addr)) => {
                            let server = self.clone();
                            tokio::spawn(async move {
                                server.handle_connection(stream).await;
                            });
                        }
                        Err(e) => warn!(error = %e, "failed to accept unix connection"),
                    }
                }
            }
        }
    }

    async fn handle_connection<S>(self: Arc<Self>, stream: S)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (reader, mut writer) = tokio::io::split(stream);
        let mut lines = BufReader::new(reader).lines();

        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => return,
            Err(e) => {
                warn!(error = %e, "failed to read request line");
                return;
            }
        };

        let request: Request = match serde_json::from_str(&line) {
            Ok(req) => req,
            Err(e) => {
                let err = Error::InvalidRequest(format!("malformed request: {e}"));
                write_frame(&mut writer, &protocol::failure(&err, None)).await;
                return;
            }
        };

        match request {
            Request::Send(req) => self.handle_send(req, &mut writer).await,
            Request::Status(req) => self.handle_status(req, &mut writer).await,
            Request::ListTopics(req) => self.handle_list_topics(req, &mut writer).await,
            Request::ListAgents(req) => self.handle_list_agents(req, &mut writer).await,
            Request::Watch(req) => {
                self.handle_watch(req, &mut lines, &mut writer, false).await;
            }
            Request::Relay(req) => {
                let watch = WatchRequest {
                    project_id: req.project_id,
                    agent: req.agent,
                    host: req.host,
                    req_id: req.req_id,
                    topic: None,
                    since: req.since,
                };
                self.handle_watch(watch, &mut lines, &mut writer, true).await;
            }
        }
    }

    async fn handle_send<W: AsyncWrite + Unpin>(&self, req: SendRequest, writer: &mut W) {
        let req_id = req.req_id.clone();
        match self.do_send(req) {
            Ok(id) => write_frame(writer, &protocol::success(req_id.as_deref(), json!({"id": id}))).await,
            Err(e) => write_frame(writer, &protocol::failure(&e, req_id.as_deref())).await,
        }
    }

    fn do_send(&self, req: SendRequest) -> Result<String> {
        let agent = naming::normalize_agent(&req.agent)?;
        let hub = self.resolve(req.project_id.as_deref())?;
        let host = req.host.unwrap_or_default();
        let priority = req.priority.unwrap_or_default();
        let tags = req.tags.unwrap_or_default();

        hub.store().update_agent_record(&agent, &host)?;

        let msg = Message {
            id: String::new(),
            from: agent,
            to: req.to,
            time: chrono::DateTime::<chrono::Utc>::UNIX_EPOCH,
            body: req.body,
            reply_to: req.reply_to,
            priority,
            host,
            tags,
        };
        let saved = hub.store().save_message(msg)?;
        hub.broadcast(&saved);
        Ok(saved.id)
    }

    async fn handle_status<W: AsyncWrite + Unpin>(&self, req: StatusRequest, writer: &mut W) {
        let req_id = req.req_id.clone();
        let result = (|| -> Result<()> {
            let agent = naming::normalize_agent(&req.agent)?;
            let hub = self.resolve(req.project_id.as_deref())?;
            let host = req.host.unwrap_or_default();
            hub.store().set_agent_status(&agent, &req.status, &host)?;
            Ok(())
        })();
        match result {
            Ok(()) => write_frame(writer, &protocol::success(req_id.as_deref(), json!({}))).await,
            Err(e) => write_frame(writer, &protocol::failure(&e, req_id.as_deref())).await,
        }
    }

    async fn handle_list_topics<W: AsyncWrite + Unpin>(&self, req: ListTopicsRequest, writer: &mut W) {
        let req_id = req.req_id.clone();
        let result = (|| -> Result<Value> {
            let hub = self.resolve(req.project_id.as_deref())?;
            let topics = hub.store().list_topics()?;
            Ok(json!({"topics": topics}))
        })();
        match result {
            Ok(extra) => write_frame(writer, &protocol::success(req_id.as_deref(), extra)).await,
            Err(e) => write_frame(writer, &protocol::failure(&e, req_id.as_deref())).await,
        }
    }

    async fn handle_list_agents<W: AsyncWrite + Unpin>(&self, req: ListAgentsRequest, writer: &mut W) {
        let req_id = req.req_id.clone();
        let result = (|| -> Result<Value> {
            let hub = self.resolve(req.project_id.as_deref())?;
            let agents = hub.store().list_agents()?;
            Ok(json!({"agents": agents}))
        })();
        match result {
            Ok(extra) => write_frame(writer, &protocol::success(req_id.as_deref(), extra)).await,
            Err(e) => write_frame(writer, &protocol::failure(&e, req_id.as_deref())).await,
        }
    }

    /// Shared by `watch` and `relay` (§4.8: "Exactly like watch but with
    /// target kind relay"). `force_relay` short-circuits target resolution.
    async fn handle_watch<R, W>(
        &self,
        req: WatchRequest,
        lines: &mut tokio::io::Lines<BufReader<R>>,
        writer: &mut W,
        force_relay: bool,
    ) where
        R: AsyncRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let req_id = req.req_id.clone();
        let setup = (|| -> Result<(String, Arc<Hub>, WatchTarget, Since)> {
            let agent = naming::normalize_agent(&req.agent)?;
            let hub = self.resolve(req.project_id.as_deref())?;
            let since = match &req.since {
                Some(s) => Since::parse(s)?,
                None => Since::none(),
            };
            let target = if force_relay {
                WatchTarget::Relay
            } else {
                resolve_watch_target(&agent, req.topic.as_deref())?
            };
            Ok((agent, hub, target, since))
        })();

        let (agent, hub, target, since) = match setup {
            Ok(v) => v,
            Err(e) => {
                write_frame(writer, &protocol::failure(&e, req_id.as_deref())).await;
                return;
            }
        };

        let host = req.host.clone().unwrap_or_default();
        hub.store().update_agent_record(&agent, &host).ok();
        let _presence_guard = hub.track_presence(&agent, &host);

        let (subscriber, mut rx) = hub.subscribe(target.clone(), since.clone());

        write_frame(writer, &protocol::success(req_id.as_deref(), json!({}))).await;

        let backlog = match backlog::load(hub.store(), &target, &since) {
            Ok(b) => b,
            Err(e) => {
                write_frame(writer, &protocol::failure(&e, req_id.as_deref())).await;
                hub.unsubscribe(subscriber.sub_id);
                return;
            }
        };

        let mut emitted: std::collections::HashSet<String> = std::collections::HashSet::new();
        for msg in &backlog {
            write_frame(writer, &protocol::msg_frame(msg)).await;
            emitted.insert(msg.id.clone());
        }

        let mut buffered = subscriber.resume();
        buffered.retain(|m| since.allows(m) && !emitted.contains(&m.id));
        buffered.sort_by(|a, b| backlog::sort_key(a).cmp(&backlog::sort_key(b)));
        for msg in &buffered {
            write_frame(writer, &protocol::msg_frame(msg)).await;
        }

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                line = lines.next_line() => {
                    match line {
                        Ok(Some(_)) => continue,
                        _ => break,
                    }
                }
                received = rx.recv() => {
                    match received {
                        Some(msg) => write_frame(writer, &protocol::msg_frame(&msg)).await,
                        None => break,
                    }
                }
                // A different connection's broadcast can close this subscriber
                // for backpressure without ever touching `rx` (`enqueue` does
                // not drop the sender on that path), so `rx.recv()` alone
                // would never notice.
                _ = subscriber.wait_closed() => break,
            }
        }

        if subscriber.is_backpressured() {
            write_frame(
                writer,
                &json!({"ok": false, "error": {"code": "backpressure", "retryable": true}}),
            )
            .await;
        }
        hub.unsubscribe(subscriber.sub_id);
    }
}

/// §4.8 validation: `watch` resolves `topic` into a target. `None` or `"*"`
/// means the agent's own `all` view; `@agent` must name the caller; anything
/// else is a topic name.
fn resolve_watch_target(agent: &str, topic: Option<&str>) -> Result<WatchTarget> {
    match topic {
        None | Some("*") => Ok(WatchTarget::All(agent.to_string())),
        Some(t) => match Target::parse(t)? {
            Target::Dm(dm_agent) if dm_agent == agent => Ok(WatchTarget::Dm(dm_agent)),
            Target::Dm(_) => Err(Error::InvalidRequest(
                "cannot watch another agent's DM mailbox".to_string(),
            )),
            Target::Topic(name) => Ok(WatchTarget::Topic(name)),
        },
    }
}

async fn write_frame<W: AsyncWrite + Unpin>(writer: &mut W, value: &Value) {
    let mut line = match serde_json::to_string(value) {
        Ok(s) => s,
        Err(e) => {
            error!(error = %e, "failed to serialize response frame");
            return;
        }
    };
    line.push('\n');
    if let Err(e) = writer.write_all(line.as_bytes()).await {
        debug!(error = %e, "failed to write response frame");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn watch_target_defaults_to_all() {
        assert_eq!(resolve_watch_target("alice", None).unwrap(), WatchTarget::All("alice".to_string()));
        assert_eq!(resolve_watch_target("alice", Some("*")).unwrap(), WatchTarget::All("alice".to_string()));
    }

    #[test]
    fn watch_target_rejects_foreign_dm() {
        assert!(resolve_watch_target("alice", Some("@bob")).is_err());
        assert_eq!(
            resolve_watch_target("bob", Some("@bob")).unwrap(),
            WatchTarget::Dm("bob".to_string())
        );
    }

    #[test]
    fn watch_target_parses_topic() {
        assert_eq!(
            resolve_watch_target("alice", Some("task")).unwrap(),
            WatchTarget::Topic("task".to_string())
        );
    }
}
