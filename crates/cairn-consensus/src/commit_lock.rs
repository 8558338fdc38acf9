use std::sync::Arc;

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Excludes message processing while a block is being committed.
///
/// Processors hold the shared guard while they validate and apply a message;
/// the consensus service holds the exclusive guard while committing.
#[derive(Debug, Clone, Default)]
pub struct CommitLock {
    inner: Arc<RwLock<()>>,
}

impl CommitLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn shared(&self) -> RwLockReadGuard<'_, ()> {
        self.inner.read().await
    }

    pub async fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.inner.write().await
    }
}
