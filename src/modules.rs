//! Module-deletion collaborator, invoked only at device teardown.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModuleError {
    #[error("failed to delete module {name}: {message}")]
    DeleteFailed { name: String, message: String },
}

/// External facility that unloads modules defined by evaluated code.
///
/// `delete_module` is idempotent: deleting a module that is missing or
/// already unloaded succeeds without effect.
#[async_trait]
pub trait ModuleHost: Send + Sync {
    async fn delete_module(&self, name: &str, path: &Path) -> Result<(), ModuleError>;
}

/// DashMap-backed host recording loads and delete invocations.
///
/// The invocation counter exists so cleanup behavior can be asserted
/// precisely: exactly one delete per module, no duplicates.
#[derive(Debug, Default)]
pub struct InMemoryModuleHost {
    loaded: DashMap<String, PathBuf>,
    delete_calls: DashMap<String, usize>,
}

impl InMemoryModuleHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, name: &str, path: impl Into<PathBuf>) {
        self.loaded.insert(name.to_string(), path.into());
    }

    pub fn is_loaded(&self, name: &str) -> bool {
        self.loaded.contains_key(name)
    }

    pub fn delete_calls(&self, name: &str) -> usize {
        self.delete_calls.get(name).map(|n| *n).unwrap_or(0)
    }
}

#[async_trait]
impl ModuleHost for InMemoryModuleHost {
    async fn delete_module(&self, name: &str, _path: &Path) -> Result<(), ModuleError> {
        *self.delete_calls.entry(name.to_string()).or_insert(0) += 1;
        // Missing modules are skipped without error.
        self.loaded.remove(name);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let host = InMemoryModuleHost::new();
        host.load("Widget", "/tmp/mods");
        host.delete_module("Widget", Path::new("/tmp/mods"))
            .await
            .unwrap();
        assert!(!host.is_loaded("Widget"));
        // Already unloaded: still fine.
        host.delete_module("Widget", Path::new("/tmp/mods"))
            .await
            .unwrap();
        assert_eq!(host.delete_calls("Widget"), 2);
    }

    #[tokio::test]
    async fn test_delete_unknown_module_is_noop() {
        let host = InMemoryModuleHost::new();
        host.delete_module("Ghost", Path::new("/tmp/mods"))
            .await
            .unwrap();
        assert_eq!(host.delete_calls("Ghost"), 1);
    }
}
