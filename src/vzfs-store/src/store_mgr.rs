//! Base-directory lifecycle: every filesystem is an independent database
//! file `<name>.db` under one base directory.

use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::fs;

use vzfs_lib::{path::validate_name, FsBackup, VzfsError, VzfsResult};

use crate::store_db::FsDb;

const DB_EXT: &str = "db";

fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone, Debug)]
pub struct FsStoreMgr {
    base_dir: PathBuf,
}

impl FsStoreMgr {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    fn db_file_path(&self, fs_name: &str) -> VzfsResult<PathBuf> {
        // Filesystem names obey the entity-name grammar, which also keeps
        // them safe as file names.
        validate_name(fs_name)?;
        Ok(self.base_dir.join(format!("{}.{}", fs_name, DB_EXT)))
    }

    /// Open or create the named filesystem at the given schema version.
    pub async fn open_filesystem(&self, fs_name: &str, version: u32) -> VzfsResult<FsDb> {
        let db_path = self.db_file_path(fs_name)?;
        fs::create_dir_all(&self.base_dir)
            .await
            .map_err(|e| VzfsError::store(format!("create base dir failed: {}", e)))?;
        let db = tokio::task::spawn_blocking(move || FsDb::open(&db_path, version))
            .await
            .map_err(|e| VzfsError::store(format!("open task join failed: {}", e)))??;
        Ok(db)
    }

    /// Enumerate the filesystems visible under the base directory. A
    /// missing or unreadable base directory reads as "none".
    pub async fn list_filesystems(&self) -> VzfsResult<Vec<String>> {
        let mut read_dir = match fs::read_dir(&self.base_dir).await {
            Ok(rd) => rd,
            Err(e) => {
                info!(
                    "FsStoreMgr: base dir {} not listable ({}), reporting no filesystems",
                    self.base_dir.display(),
                    e
                );
                return Ok(Vec::new());
            }
        };

        let mut names = Vec::new();
        while let Some(entry) = read_dir
            .next_entry()
            .await
            .map_err(|e| VzfsError::store(format!("read base dir failed: {}", e)))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(DB_EXT) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Delete the named filesystem database. WAL sidecar files are removed
    /// best-effort.
    pub async fn drop_filesystem(&self, fs_name: &str) -> VzfsResult<()> {
        let db_path = self.db_file_path(fs_name)?;
        if !db_path.exists() {
            return Err(VzfsError::NotFound(fs_name.to_string()));
        }
        fs::remove_file(&db_path)
            .await
            .map_err(|e| VzfsError::store(format!("drop filesystem failed: {}", e)))?;
        for suffix in ["-wal", "-shm"] {
            let sidecar = PathBuf::from(format!("{}{}", db_path.display(), suffix));
            if let Err(e) = fs::remove_file(&sidecar).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!(
                        "FsStoreMgr: remove sidecar {} failed: {}",
                        sidecar.display(),
                        e
                    );
                }
            }
        }
        info!("FsStoreMgr: dropped filesystem {}", fs_name);
        Ok(())
    }

    /// Serialize one filesystem's raw rows as a single JSON document.
    pub async fn export_to_json(db: &FsDb) -> VzfsResult<String> {
        let backup = db.export_backup().await.map_err(VzfsError::from)?;
        serde_json::to_string(&backup)
            .map_err(|e| VzfsError::store(format!("serialize backup failed: {}", e)))
    }

    /// Materialize a backup document as a brand-new filesystem. Refuses to
    /// merge into an existing database. Lock rows already expired at
    /// import time are dropped.
    pub async fn restore_from_json(
        &self,
        fs_name: &str,
        version: u32,
        backup: &str,
    ) -> VzfsResult<()> {
        let db_path = self.db_file_path(fs_name)?;
        if db_path.exists() {
            return Err(VzfsError::Exists(fs_name.to_string()));
        }
        let backup: FsBackup = serde_json::from_str(backup)
            .map_err(|e| VzfsError::store(format!("invalid backup document: {}", e)))?;

        let db = self.open_filesystem(fs_name, version).await?;
        for entity in &backup.entity {
            db.put_entity(entity).await.map_err(VzfsError::from)?;
        }
        for content in &backup.content {
            db.put_content(content).await.map_err(VzfsError::from)?;
        }
        let now = unix_timestamp_ms();
        let mut dropped = 0usize;
        for lock in &backup.lock {
            if lock.is_expired(now) {
                dropped += 1;
                continue;
            }
            db.put_lock(lock).await.map_err(VzfsError::from)?;
        }
        info!(
            "FsStoreMgr: restored filesystem {} ({} entities, {} content rows, {} locks dropped as expired)",
            fs_name,
            backup.entity.len(),
            backup.content.len(),
            dropped
        );
        Ok(())
    }
}
