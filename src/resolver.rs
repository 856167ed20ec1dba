//! L4: project resolution. §4.4, §9 ("dynamic dispatch over heterogeneous
//! resolvers... no inheritance required").

use crate::error::{Error, Result};
use crate::project_id::derive_project_id;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

/// Shared contract: map an incoming `project_id` to `(id, root)`.
pub trait ProjectResolver: Send + Sync {
    fn resolve(&self, project_id: &str) -> Result<(String, PathBuf)>;
}

/// Bound to a single known root. Accepts the empty `project_id` (the Unix
/// socket case, §6) or the root's own derived id; rejects anything else.
pub struct StaticResolver {
    id: String,
    root: PathBuf,
}

impl StaticResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let id = derive_project_id(&root);
        StaticResolver { id, root }
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl ProjectResolver for StaticResolver {
    fn resolve(&self, project_id: &str) -> Result<(String, PathBuf)> {
        if project_id.is_empty() || project_id == self.id {
            Ok((self.id.clone(), self.root.clone()))
        } else {
            Err(Error::ProjectMismatch {
                expected: self.id.clone(),
                got: project_id.to_string(),
            })
        }
    }
}

/// Enumerates workspaces from an external catalogue (a list of candidate
/// roots supplied at construction) and caches successful id→root mappings.
pub struct DynamicResolver {
    candidates: Vec<PathBuf>,
    cache: RwLock<HashMap<String, PathBuf>>,
}

impl DynamicResolver {
    pub fn new(candidates: Vec<PathBuf>) -> Self {
        DynamicResolver {
            candidates,
            cache: RwLock::new(HashMap::new()),
        }
    }

    fn scan(&self, project_id: &str) -> Option<PathBuf> {
        for root in &self.candidates {
            if derive_project_id(root) == project_id {
                return Some(root.clone());
            }
        }
        None
    }
}

impl ProjectResolver for DynamicResolver {
    fn resolve(&self, project_id: &str) -> Result<(String, PathBuf)> {
        if project_id.is_empty() {
            return Err(Error::InvalidRequest(
                "project_id is required for the dynamic resolver".to_string(),
            ));
        }

        if let Some(root) = self.cache.read().unwrap().get(project_id) {
            return Ok((project_id.to_string(), root.clone()));
        }

        match self.scan(project_id) {
            Some(root) => {
                self.cache
                    .write()
                    .unwrap()
                    .insert(project_id.to_string(), root.clone());
                Ok((project_id.to_string(), root))
            }
            None => Err(Error::ProjectNotFound(project_id.to_string())),
        }
    }
}

#[allow(dead_code)]
fn _assert_object_safe(_r: &dyn ProjectResolver) {}
