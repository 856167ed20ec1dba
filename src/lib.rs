//! Agent-to-agent mail broker: file-backed store, topic/DM fan-out over a
//! newline-delimited JSON wire protocol, and presence tracking. See
//! `SPEC_FULL.md` for the full component design.

pub mod backlog;
pub mod config;
pub mod error;
pub mod hub;
pub mod id;
pub mod model;
pub mod naming;
pub mod presence;
pub mod project_id;
pub mod protocol;
pub mod relay;
pub mod resolver;
pub mod server;
pub mod since;
pub mod standalone_reader;
pub mod store;
pub mod subscriber;

pub use error::{Error, Result};
pub use hub::Hub;
pub use server::Server;
pub use store::Store;
