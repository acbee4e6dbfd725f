//! Local database daemon boundary
//!
//! One implementation per managed database flavor; the action loop only
//! needs replication-source introspection and the two control operations.

use crate::common::Result;
use async_trait::async_trait;
use std::sync::Mutex;

#[async_trait]
pub trait DatabaseDaemon: Send + Sync {
    /// The replication source currently in effect, if the local database is
    /// replicating at all.
    async fn replication_source(&self) -> Result<Option<String>>;

    /// Finalize the local database as primary (stop replication, allow
    /// writes).
    async fn promote(&self) -> Result<()>;

    /// Redirect the local replication stream at a new primary address.
    async fn repoint(&self, primary_db_addr: &str) -> Result<()>;
}

/// Scriptable daemon for tests and demos.
///
/// A "stuck" daemon accepts the repoint call but keeps reporting its old
/// source, which is how a replica that silently failed to converge looks
/// from the outside.
pub struct FakeDaemon {
    source: Mutex<Option<String>>,
    follow_repoints: bool,
    fail_promote: bool,
}

impl FakeDaemon {
    /// Daemon with no replication source that follows every instruction.
    pub fn new() -> Self {
        Self {
            source: Mutex::new(None),
            follow_repoints: true,
            fail_promote: false,
        }
    }

    /// Daemon currently replicating from `addr`, following repoints.
    pub fn following(addr: &str) -> Self {
        Self {
            source: Mutex::new(Some(addr.to_string())),
            follow_repoints: true,
            fail_promote: false,
        }
    }

    /// Daemon pinned to `addr`: repoint calls succeed but change nothing.
    pub fn stuck_on(addr: &str) -> Self {
        Self {
            source: Mutex::new(Some(addr.to_string())),
            follow_repoints: false,
            fail_promote: false,
        }
    }

    /// Daemon that refuses promotion.
    pub fn failing_promote() -> Self {
        Self {
            source: Mutex::new(None),
            follow_repoints: true,
            fail_promote: true,
        }
    }
}

impl Default for FakeDaemon {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl DatabaseDaemon for FakeDaemon {
    async fn replication_source(&self) -> Result<Option<String>> {
        Ok(self.source.lock().unwrap().clone())
    }

    async fn promote(&self) -> Result<()> {
        if self.fail_promote {
            return Err(crate::Error::Internal("promotion refused".into()));
        }
        *self.source.lock().unwrap() = None;
        Ok(())
    }

    async fn repoint(&self, primary_db_addr: &str) -> Result<()> {
        if self.follow_repoints {
            *self.source.lock().unwrap() = Some(primary_db_addr.to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_following_daemon_repoints() {
        let daemon = FakeDaemon::following("100.0.0.1:3300");
        daemon.repoint("101.0.0.1:3301").await.unwrap();
        assert_eq!(
            daemon.replication_source().await.unwrap().as_deref(),
            Some("101.0.0.1:3301")
        );
    }

    #[tokio::test]
    async fn test_stuck_daemon_keeps_old_source() {
        let daemon = FakeDaemon::stuck_on("234.0.0.1:3301");
        daemon.repoint("101.0.0.1:3301").await.unwrap();
        assert_eq!(
            daemon.replication_source().await.unwrap().as_deref(),
            Some("234.0.0.1:3301")
        );
    }

    #[tokio::test]
    async fn test_promote_clears_source() {
        let daemon = FakeDaemon::following("100.0.0.1:3300");
        daemon.promote().await.unwrap();
        assert!(daemon.replication_source().await.unwrap().is_none());

        assert!(FakeDaemon::failing_promote().promote().await.is_err());
    }
}
