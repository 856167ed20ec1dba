//! §4.8 backlog construction, shared by the live server and the standalone
//! reader (§4.10): per-target mailbox enumeration, `since`-filtered, merged
//! and sorted by `(id, time, from, to)`.

use crate::error::Result;
use crate::model::Message;
use crate::since::Since;
use crate::store::Store;
use crate::subscriber::WatchTarget;

pub fn sort_key(m: &Message) -> (String, chrono::DateTime<chrono::Utc>, String, String) {
    (m.id.clone(), m.time, m.from.clone(), m.to.clone())
}

pub fn load(store: &Store, target: &WatchTarget, since: &Since) -> Result<Vec<Message>> {
    let mut messages = match target {
        WatchTarget::Topic(name) => store.list_topic_messages(name)?,
        WatchTarget::Dm(agent) => store.list_dm_messages(agent)?,
        WatchTarget::All(agent) => {
            let mut v = Vec::new();
            for topic in store.list_all_topic_names()? {
                v.extend(store.list_topic_messages(&topic)?);
            }
            v.extend(store.list_dm_messages(agent)?);
            v
        }
        WatchTarget::Relay => {
            let mut v = Vec::new();
            for topic in store.list_all_topic_names()? {
                v.extend(store.list_topic_messages(&topic)?);
            }
            for agent in store.list_dm_agents()? {
                v.extend(store.list_dm_messages(&agent)?);
            }
            v
        }
    };
    messages.retain(|m| since.allows(m));
    messages.sort_by(|a, b| sort_key(a).cmp(&sort_key(b)));
    Ok(messages)
}
