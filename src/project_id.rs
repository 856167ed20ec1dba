//! §3 Project: derivation of the stable `proj-XXXX` id for a directory.

use sha2::{Digest, Sha256};
use std::path::Path;
use std::process::Command;

const ENV_OVERRIDE: &str = "FMAIL_PROJECT_ID";
const PREFIX: &str = "proj-";
const HASH_CHARS: usize = 12;

/// Derivation order (§3): explicit env override; else SHA-256 of the git
/// remote origin URL; else SHA-256 of the directory basename; truncated and
/// given the fixed `proj-` prefix for display.
pub fn derive_project_id(root: &Path) -> String {
    if let Ok(explicit) = std::env::var(ENV_OVERRIDE) {
        if !explicit.is_empty() {
            return explicit;
        }
    }

    if let Some(remote) = git_remote_origin(root) {
        return format!("{PREFIX}{}", truncated_hash(remote.trim()));
    }

    let basename = root
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("unknown");
    format!("{PREFIX}{}", truncated_hash(basename))
}

fn truncated_hash(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    let hex = hex::encode(digest);
    hex[..HASH_CHARS].to_string()
}

fn git_remote_origin(root: &Path) -> Option<String> {
    let output = Command::new("git")
        .args(["remote", "get-url", "origin"])
        .current_dir(root)
        .output()
        .ok()?;
    if !output.status.success() {
        return None;
    }
    let url = String::from_utf8(output.stdout).ok()?;
    let url = url.trim();
    if url.is_empty() {
        None
    } else {
        Some(url.to_string())
    }
}
