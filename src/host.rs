use std::{
    path::{Path, PathBuf},
    sync::atomic::{AtomicU64, Ordering},
};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::db::Database;

/// The task runtime the node is embedded in.
#[async_trait]
pub trait TaskHost: Send + Sync {
    fn current_round(&self) -> u64;

    /// Root of this task's private storage.
    fn base_path(&self) -> &Path;

    fn submitter_identity(&self) -> &str;

    async fn store_get(&self, key: &str) -> Result<Option<Value>>;

    async fn store_set(&self, key: &str, value: Value) -> Result<()>;
}

/// Host backed by the node's own database, for running outside a task runtime.
pub struct LocalTaskHost {
    db: Database,
    base_path: PathBuf,
    identity: String,
    round: AtomicU64,
}

impl LocalTaskHost {
    pub fn new(db: Database, base_path: PathBuf, identity: impl Into<String>) -> Self {
        Self {
            db,
            base_path,
            identity: identity.into(),
            round: AtomicU64::new(0),
        }
    }

    pub fn set_round(&self, round: u64) {
        self.round.store(round, Ordering::SeqCst);
    }
}

#[async_trait]
impl TaskHost for LocalTaskHost {
    fn current_round(&self) -> u64 {
        self.round.load(Ordering::SeqCst)
    }

    fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn submitter_identity(&self) -> &str {
        &self.identity
    }

    async fn store_get(&self, key: &str) -> Result<Option<Value>> {
        self.db.kv_get_value(key).await
    }

    async fn store_set(&self, key: &str, value: Value) -> Result<()> {
        self.db.kv_set_value(key, value).await
    }
}
