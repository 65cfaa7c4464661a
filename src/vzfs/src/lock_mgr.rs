//! Cross-transaction advisory locking.
//!
//! The store only guarantees per-transaction atomicity, so every
//! multi-step mutation takes a row in the `lock` store first. The row's
//! primary key is the locked path prefix: an exact collision on insert is
//! the contention signal, and overlapping-ancestor locks are caught by
//! re-reading the table after acquisition.

use log::{debug, warn};
use std::time::{SystemTime, UNIX_EPOCH};

use vzfs_lib::path::{abs_path_to_pieces, normalize};
use vzfs_lib::{LockRecord, VzfsError, VzfsResult};
use vzfs_store::FsDb;

fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone)]
pub struct LockManager {
    db: FsDb,
}

impl LockManager {
    pub fn new(db: FsDb) -> Self {
        Self { db }
    }

    /// Acquire a lock on the normalized prefix for `duration_ms`.
    ///
    /// On collision the existing row is inspected: if its holder already
    /// expired, the row is reclaimed and the insert retried exactly once;
    /// a live holder means `Contended`. Locks never queue.
    pub async fn lock_path(&self, cwd: &str, path: &str, duration_ms: u64) -> VzfsResult<String> {
        let prefix = normalize(path, &abs_path_to_pieces(cwd))?;
        let now = unix_timestamp_ms();
        let record = LockRecord {
            path_prefix: prefix.clone(),
            expiry: now + duration_ms,
            created_at: now,
        };
        match self.db.insert_lock(&record).await {
            Ok(()) => return Ok(prefix),
            Err(e) if e.is_constraint() => {}
            Err(e) => return Err(e.into()),
        }

        match self.db.get_lock(&prefix).await.map_err(VzfsError::from)? {
            Some(existing) if existing.is_expired(now) => {
                debug!(
                    "lock_path: reclaiming expired lock {} (expiry {})",
                    prefix, existing.expiry
                );
                let _ = self.db.delete_lock(&prefix).await;
            }
            Some(_) => return Err(VzfsError::Contended(prefix)),
            // The holder released between our insert and the probe.
            None => {}
        }

        let now = unix_timestamp_ms();
        let record = LockRecord {
            path_prefix: prefix.clone(),
            expiry: now + duration_ms,
            created_at: now,
        };
        match self.db.insert_lock(&record).await {
            Ok(()) => Ok(prefix),
            Err(e) if e.is_constraint() => Err(VzfsError::Contended(prefix)),
            Err(e) => Err(e.into()),
        }
    }

    /// Best-effort release. Errors are swallowed and reported as zero
    /// deleted rows so a failed release never masks the command result.
    pub async fn remove_lock(&self, path_prefix: &str) -> u64 {
        match self.db.delete_lock(path_prefix).await {
            Ok(n) => n,
            Err(e) => {
                warn!("remove_lock: releasing {} failed: {}", path_prefix, e);
                0
            }
        }
    }

    /// Re-read the lock table and fail `Contended` if any lock other than
    /// the just-acquired ones is a proper prefix of an acquired path.
    /// This is how an already-held ancestor lock is detected even though
    /// the store only enforces exact-key uniqueness.
    pub async fn reject_if_conflicting_prefixes(
        &self,
        just_acquired: &[String],
        unexpired_only: bool,
    ) -> VzfsResult<()> {
        let locks = if unexpired_only {
            self.db
                .get_unexpired_locks(unix_timestamp_ms())
                .await
                .map_err(VzfsError::from)?
        } else {
            self.db.get_all_locks().await.map_err(VzfsError::from)?
        };

        for lock in &locks {
            if just_acquired.iter().any(|p| *p == lock.path_prefix) {
                continue;
            }
            for acquired in just_acquired {
                if acquired.starts_with(&lock.path_prefix)
                    && acquired.len() > lock.path_prefix.len()
                {
                    return Err(VzfsError::Contended(format!(
                        "{} overlaps held lock {}",
                        acquired, lock.path_prefix
                    )));
                }
            }
        }
        Ok(())
    }

    /// Janitor sweep: delete every lock whose expiry has passed.
    /// Individual deletions are best-effort; the count of removed rows is
    /// returned.
    pub async fn prune_expired_locks(&self) -> VzfsResult<u64> {
        let prefixes = self
            .db
            .get_expired_lock_prefixes(unix_timestamp_ms())
            .await
            .map_err(VzfsError::from)?;
        let mut pruned = 0u64;
        for prefix in &prefixes {
            match self.db.delete_lock(prefix).await {
                Ok(n) => pruned += n,
                Err(e) => warn!("prune_expired_locks: deleting {} failed: {}", prefix, e),
            }
        }
        Ok(pruned)
    }
}
