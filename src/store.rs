//! L3: the project-rooted filesystem store. §4.3, §6 filesystem layout.

use crate::error::{Error, Result};
use crate::id::{next_id, MAX_ID_RETRIES};
use crate::model::{AgentRecord, Message, ProjectRecord, TopicInfo};
use crate::naming::Target;
use chrono::Utc;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Envelope headroom beyond the message body itself, per §6.
pub const MAX_MESSAGE_BYTES: usize = 1024 * 1024;

/// A project-rooted store. Cheap to clone (just a path) and safe to share
/// across tasks; all mutation goes through atomic filesystem operations.
#[derive(Debug, Clone)]
pub struct Store {
    root: PathBuf,
}

impl Store {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Store { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn fmail_dir(&self) -> PathBuf {
        self.root.join(".fmail")
    }

    fn topics_dir(&self) -> PathBuf {
        self.fmail_dir().join("topics")
    }

    fn dm_dir(&self) -> PathBuf {
        self.fmail_dir().join("dm")
    }

    fn agents_dir(&self) -> PathBuf {
        self.fmail_dir().join("agents")
    }

    pub fn project_path(&self) -> PathBuf {
        self.fmail_dir().join("project.json")
    }

    pub fn socket_path(&self) -> PathBuf {
        self.fmail_dir().join("forged.sock")
    }

    /// Directory holding one topic's message files, for callers (the
    /// standalone reader) that need to walk it directly rather than through
    /// [`Store::list_topic_messages`].
    pub fn topic_dir(&self, topic: &str) -> PathBuf {
        self.topics_dir().join(topic)
    }

    /// Directory holding one agent's DM mailbox files.
    pub fn dm_mailbox_dir(&self, agent: &str) -> PathBuf {
        self.dm_dir().join(agent)
    }

    fn target_dir(&self, target: &Target) -> PathBuf {
        match target {
            Target::Topic(name) => self.topics_dir().join(name),
            Target::Dm(agent) => self.dm_dir().join(agent),
        }
    }

    /// Create `<root>/.fmail` and its required subdirectories.
    pub fn ensure_root(&self) -> Result<()> {
        fs::create_dir_all(self.topics_dir())?;
        fs::create_dir_all(self.dm_dir())?;
        fs::create_dir_all(self.agents_dir())?;
        Ok(())
    }

    fn target_of(msg: &Message) -> Result<Target> {
        Target::parse(&msg.to)
    }

    fn validate_message(msg: &Message) -> Result<()> {
        if msg.from.is_empty() {
            return Err(Error::InvalidRequest("message has no sender".to_string()));
        }
        if msg.body.is_null() {
            return Err(Error::InvalidRequest("message body is empty".to_string()));
        }
        Ok(())
    }

    /// Canonicalise, fill in `time`/`id` if zero, validate, then write via an
    /// exclusive-create, retrying on id collision up to [`MAX_ID_RETRIES`]
    /// times (§4.2, §4.3).
    pub fn save_message(&self, mut msg: Message) -> Result<Message> {
        msg.from = crate::naming::normalize_agent(&msg.from)?;
        let target = Self::target_of(&msg)?;
        msg.to = target.to_field();
        Self::validate_message(&msg)?;

        if msg.is_zero_time() {
            msg.time = Utc::now();
        }

        let dir = self.target_dir(&target);
        fs::create_dir_all(&dir)?;

        for attempt in 0..MAX_ID_RETRIES {
            if msg.id.is_empty() || attempt > 0 {
                msg.id = next_id(Utc::now());
            }
            let bytes = serde_json::to_vec_pretty(&msg)?;
            if bytes.len() > MAX_MESSAGE_BYTES {
                return Err(Error::TooLarge {
                    size: bytes.len(),
                    limit: MAX_MESSAGE_BYTES,
                });
            }
            let path = dir.join(format!("{}.json", msg.id));
            match write_exclusive(&path, &bytes) {
                Ok(()) => return Ok(msg),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                    debug!(id = %msg.id, "id collision, regenerating");
                    continue;
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Err(Error::IdCollision)
    }

    /// Caller supplies `id` and `to` already canonical. Idempotent: an
    /// existing file is reported via `already_present`, never retried.
    pub fn save_message_exact(&self, msg: &Message) -> Result<bool> {
        let target = Target::parse(&msg.to)?;
        let dir = self.target_dir(&target);
        fs::create_dir_all(&dir)?;
        let bytes = serde_json::to_vec_pretty(msg)?;
        if bytes.len() > MAX_MESSAGE_BYTES {
            return Err(Error::TooLarge {
                size: bytes.len(),
                limit: MAX_MESSAGE_BYTES,
            });
        }
        let path = dir.join(format!("{}.json", msg.id));
        match write_exclusive(&path, &bytes) {
            Ok(()) => Ok(false),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Ok(true),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn list_dir_messages(&self, dir: &Path) -> Result<Vec<Message>> {
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut names: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        names.sort();

        let mut out = Vec::with_capacity(names.len());
        for path in names {
            match fs::read(&path) {
                Ok(bytes) => match serde_json::from_slice::<Message>(&bytes) {
                    Ok(msg) => out.push(msg),
                    Err(e) => warn!(path = %path.display(), error = %e, "skipping unreadable message file"),
                },
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    // Disappeared between readdir and open; tolerate it.
                }
                Err(e) => return Err(Error::Io(e)),
            }
        }
        Ok(out)
    }

    pub fn list_topic_messages(&self, topic: &str) -> Result<Vec<Message>> {
        self.list_dir_messages(&self.topics_dir().join(topic))
    }

    pub fn list_dm_messages(&self, agent: &str) -> Result<Vec<Message>> {
        self.list_dir_messages(&self.dm_dir().join(agent))
    }

    /// Every topic name with at least one message on disk, per §4.3.
    pub fn list_topics(&self) -> Result<Vec<TopicInfo>> {
        let dir = self.topics_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };

        let mut topics = Vec::new();
        for entry in entries.filter_map(|e| e.ok()) {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if crate::naming::validate_topic(name).is_err() {
                continue;
            }
            let messages = self.list_topic_messages(name)?;
            if messages.is_empty() {
                continue;
            }
            let last_activity = messages
                .iter()
                .map(|m| m.time)
                .max()
                .unwrap_or_else(Utc::now);
            topics.push(TopicInfo {
                name: name.to_string(),
                messages: messages.len(),
                last_activity,
            });
        }
        topics.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(topics)
    }

    /// Every agent name with a DM mailbox directory on disk, used by the
    /// relay's full-mailbox backlog (§4.8, SPEC_FULL §4.3).
    pub fn list_dm_agents(&self) -> Result<Vec<String>> {
        let dir = self.dm_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        let mut agents: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .filter(|name| crate::naming::validate_agent(name).is_ok())
            .collect();
        agents.sort();
        Ok(agents)
    }

    /// Every topic name, regardless of whether it currently has messages,
    /// used by the relay/"all" backlog to cover topics that only ever had
    /// messages pruned by external tooling.
    pub fn list_all_topic_names(&self) -> Result<Vec<String>> {
        let dir = self.topics_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        let mut names: Vec<String> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir())
            .filter_map(|p| p.file_name().and_then(|n| n.to_str()).map(str::to_string))
            .filter(|name| crate::naming::validate_topic(name).is_ok())
            .collect();
        names.sort();
        Ok(names)
    }

    fn agent_path(&self, name: &str) -> PathBuf {
        self.agents_dir().join(format!("{name}.json"))
    }

    fn read_agent(&self, name: &str) -> Result<Option<AgentRecord>> {
        match fs::read(self.agent_path(name)) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Error::Io(e)),
        }
    }

    fn write_agent(&self, record: &AgentRecord) -> Result<()> {
        fs::create_dir_all(self.agents_dir())?;
        let bytes = serde_json::to_vec_pretty(record)?;
        let tmp = self.agent_path(&record.name).with_extension("json.tmp");
        fs::write(&tmp, &bytes)?;
        fs::rename(&tmp, self.agent_path(&record.name))?;
        Ok(())
    }

    /// Read-modify-write: create on first contact, set `first_seen` only
    /// once, always bump `last_seen`.
    pub fn update_agent_record(&self, name: &str, host: &str) -> Result<AgentRecord> {
        let name = crate::naming::normalize_agent(name)?;
        let now = Utc::now();
        let mut record = match self.read_agent(&name)? {
            Some(existing) => existing,
            None => AgentRecord {
                name: name.clone(),
                host: host.to_string(),
                status: String::new(),
                first_seen: now,
                last_seen: now,
            },
        };
        record.host = host.to_string();
        record.last_seen = now;
        self.write_agent(&record)?;
        Ok(record)
    }

    pub fn set_agent_status(&self, name: &str, status: &str, host: &str) -> Result<AgentRecord> {
        let mut record = self.update_agent_record(name, host)?;
        record.status = status.to_string();
        self.write_agent(&record)?;
        Ok(record)
    }

    pub fn list_agents(&self) -> Result<Vec<AgentRecord>> {
        let dir = self.agents_dir();
        let entries = match fs::read_dir(&dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(Error::Io(e)),
        };
        let mut names: Vec<PathBuf> = entries
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.extension().is_some_and(|ext| ext == "json"))
            .collect();
        names.sort();

        let mut out = Vec::with_capacity(names.len());
        for path in names {
            if let Ok(bytes) = fs::read(&path) {
                if let Ok(record) = serde_json::from_slice(&bytes) {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }

    /// If the project file exists, read and return it; otherwise write a
    /// new one with exclusive-create, re-reading on a race (§4.3, §3).
    pub fn ensure_project(&self, id: &str) -> Result<ProjectRecord> {
        fs::create_dir_all(self.fmail_dir())?;
        match fs::read(self.project_path()) {
            Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                let record = ProjectRecord {
                    id: id.to_string(),
                    created: Utc::now(),
                };
                let bytes = serde_json::to_vec_pretty(&record)?;
                match write_exclusive(&self.project_path(), &bytes) {
                    Ok(()) => Ok(record),
                    Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                        let bytes = fs::read(self.project_path())?;
                        Ok(serde_json::from_slice(&bytes)?)
                    }
                    Err(e) => Err(Error::Io(e)),
                }
            }
            Err(e) => Err(Error::Io(e)),
        }
    }
}

fn write_exclusive(path: &Path, bytes: &[u8]) -> io::Result<()> {
    use std::fs::OpenOptions;
    use std::io::Write;
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(bytes)
}
