//! Per-filesystem store handle and the single-transaction primitives over
//! the three object stores (`entity`, `content`, `lock`).
//!
//! Every public method runs exactly one transaction: single statements ride
//! SQLite's implicit transaction, batch updates open an explicit one.
//! Unique-index violations surface as [`StoreError::Constraint`] so callers
//! can tell "already exists" from an I/O failure.

use log::{debug, warn};
use rusqlite::{params, Connection, ErrorCode, OpenFlags, OptionalExtension};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};
use thiserror::Error;

use vzfs_lib::{ContentRecord, Entity, FsBackup, LockRecord, VzfsError};

fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

/// Upper bound of a half-open key range over everything below a prefix.
fn range_end(prefix: &str) -> String {
    format!("{}\u{ffff}", prefix)
}

#[derive(Error, Debug)]
pub enum StoreError {
    /// A unique-index or primary-key violation. Callers map this to
    /// `Exists` (entity stores) or `Contended` (lock store).
    #[error("unique constraint violated: {0}")]
    Constraint(String),

    #[error("store error: {0}")]
    Db(String),
}

impl StoreError {
    pub fn is_constraint(&self) -> bool {
        matches!(self, StoreError::Constraint(_))
    }

    fn db(msg: impl Into<String>) -> Self {
        StoreError::Db(msg.into())
    }
}

impl From<StoreError> for VzfsError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Constraint(msg) => {
                VzfsError::StoreError(format!("unexpected constraint: {}", msg))
            }
            StoreError::Db(msg) => VzfsError::StoreError(msg),
        }
    }
}

pub type StoreResult<T> = std::result::Result<T, StoreError>;

fn map_db_err(e: rusqlite::Error) -> StoreError {
    if e.sqlite_error_code() == Some(ErrorCode::ConstraintViolation) {
        StoreError::Constraint(e.to_string())
    } else {
        StoreError::Db(e.to_string())
    }
}

const ENTITY_COLS: &str = "path, name, is_leaf, parent_path, created_at, updated_at";

fn entity_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Entity> {
    Ok(Entity {
        path: row.get(0)?,
        name: row.get(1)?,
        is_leaf: row.get::<_, i64>(2)? != 0,
        parent_path: row.get(3)?,
        created_at: row.get::<_, i64>(4)? as u64,
        updated_at: row.get::<_, i64>(5)? as u64,
    })
}

fn lock_from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<LockRecord> {
    Ok(LockRecord {
        path_prefix: row.get(0)?,
        expiry: row.get::<_, i64>(1)? as u64,
        created_at: row.get::<_, i64>(2)? as u64,
    })
}

const SCHEMA_SQL: &str = "CREATE TABLE IF NOT EXISTS entity (
        path TEXT PRIMARY KEY,
        name TEXT NOT NULL,
        is_leaf INTEGER NOT NULL,
        parent_path TEXT,
        created_at INTEGER NOT NULL,
        updated_at INTEGER NOT NULL
    ) WITHOUT ROWID;

    CREATE INDEX IF NOT EXISTS idx_entity_name ON entity(name);
    CREATE INDEX IF NOT EXISTS idx_entity_parent_path ON entity(parent_path);
    CREATE INDEX IF NOT EXISTS idx_entity_created_at ON entity(created_at);
    CREATE INDEX IF NOT EXISTS idx_entity_updated_at ON entity(updated_at);
    CREATE UNIQUE INDEX IF NOT EXISTS uniq_entity_sibling_name
        ON entity(parent_path, name);

    CREATE TABLE IF NOT EXISTS content (
        leaf_path TEXT PRIMARY KEY,
        content TEXT NOT NULL
    ) WITHOUT ROWID;

    CREATE TABLE IF NOT EXISTS lock (
        path_prefix TEXT PRIMARY KEY,
        expiry INTEGER NOT NULL,
        created_at INTEGER NOT NULL
    ) WITHOUT ROWID;

    CREATE INDEX IF NOT EXISTS idx_lock_expiry ON lock(expiry);
    CREATE INDEX IF NOT EXISTS idx_lock_created_at ON lock(created_at);";

/// Handle to one filesystem database. Cloning shares the connection;
/// several handles (including handles opened by other processes on the
/// same file) may point at one database, which is why multi-step
/// mutations go through the lock table.
#[derive(Clone)]
pub struct FsDb {
    db_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl FsDb {
    /// Open or create the database file and bring the schema up to
    /// `version` (tracked through `PRAGMA user_version`).
    pub fn open(db_path: &Path, version: u32) -> StoreResult<Self> {
        debug!("FsDb: open {} at schema v{}", db_path.display(), version);
        let conn = Connection::open_with_flags(
            db_path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_FULL_MUTEX,
        )
        .map_err(|e| {
            warn!("FsDb: open {} failed! {}", db_path.display(), e);
            StoreError::db(format!("open db failed: {}", e))
        })?;
        Self::init_connection(&conn)?;
        Self::apply_upgrades(&conn, version)?;
        Ok(Self {
            db_path: db_path.to_path_buf(),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    fn init_connection(conn: &Connection) -> StoreResult<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(|e| StoreError::db(format!("pragma failed: {}", e)))
    }

    fn apply_upgrades(conn: &Connection, version: u32) -> StoreResult<()> {
        let current: i64 = conn
            .pragma_query_value(None, "user_version", |row| row.get(0))
            .map_err(map_db_err)?;
        if (current as u32) >= version {
            return Ok(());
        }
        conn.execute_batch(SCHEMA_SQL)
            .map_err(|e| StoreError::db(format!("create schema failed: {}", e)))?;
        conn.pragma_update(None, "user_version", version as i64)
            .map_err(|e| StoreError::db(format!("set user_version failed: {}", e)))?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> StoreResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> StoreResult<T> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| StoreError::db(format!("conn lock poisoned: {}", e)))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| StoreError::db(format!("db task join failed: {}", e)))?
    }

    // ========== entity store ==========

    pub async fn get_entity(&self, path: &str) -> StoreResult<Option<Entity>> {
        let path = path.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                &format!("SELECT {} FROM entity WHERE path = ?1", ENTITY_COLS),
                params![path],
                entity_from_row,
            )
            .optional()
            .map_err(map_db_err)
        })
        .await
    }

    /// All entities whose path falls in `[prefix, prefix + "\u{ffff}")`,
    /// in ascending path order.
    pub async fn get_entities_with_prefix(&self, prefix: &str) -> StoreResult<Vec<Entity>> {
        let lower = prefix.to_string();
        let upper = range_end(prefix);
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!(
                    "SELECT {} FROM entity WHERE path >= ?1 AND path < ?2 ORDER BY path ASC",
                    ENTITY_COLS
                ))
                .map_err(map_db_err)?;
            let rows = stmt
                .query_map(params![lower, upper], entity_from_row)
                .map_err(map_db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)
        })
        .await
    }

    /// Primary keys of the immediate children of `parent_path`, through
    /// the `parent_path` index.
    pub async fn get_child_keys(&self, parent_path: &str) -> StoreResult<Vec<String>> {
        let parent_path = parent_path.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT path FROM entity WHERE parent_path = ?1 ORDER BY path ASC")
                .map_err(map_db_err)?;
            let rows = stmt
                .query_map(params![parent_path], |row| row.get::<_, String>(0))
                .map_err(map_db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)
        })
        .await
    }

    pub async fn count_children(&self, parent_path: &str) -> StoreResult<u64> {
        let parent_path = parent_path.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM entity WHERE parent_path = ?1",
                params![parent_path],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
            .map_err(map_db_err)
        })
        .await
    }

    /// Probe of the composite `(parent_path, name)` unique index, used to
    /// validate a rename/move destination before any destructive step.
    pub async fn count_sibling(&self, parent_path: &str, name: &str) -> StoreResult<u64> {
        let parent_path = parent_path.to_string();
        let name = name.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT COUNT(*) FROM entity WHERE parent_path = ?1 AND name = ?2",
                params![parent_path, name],
                |row| row.get::<_, i64>(0),
            )
            .map(|n| n as u64)
            .map_err(map_db_err)
        })
        .await
    }

    pub async fn insert_entity(&self, entity: &Entity) -> StoreResult<()> {
        let entity = entity.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO entity (path, name, is_leaf, parent_path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entity.path,
                    entity.name,
                    entity.is_leaf as i64,
                    entity.parent_path,
                    entity.created_at as i64,
                    entity.updated_at as i64,
                ],
            )
            .map_err(map_db_err)?;
            Ok(())
        })
        .await
    }

    /// Upsert used by the restore path.
    pub async fn put_entity(&self, entity: &Entity) -> StoreResult<()> {
        let entity = entity.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO entity
                 (path, name, is_leaf, parent_path, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    entity.path,
                    entity.name,
                    entity.is_leaf as i64,
                    entity.parent_path,
                    entity.created_at as i64,
                    entity.updated_at as i64,
                ],
            )
            .map_err(map_db_err)?;
            Ok(())
        })
        .await
    }

    pub async fn touch_entity(&self, path: &str, updated_at: u64) -> StoreResult<u64> {
        let path = path.to_string();
        self.with_conn(move |conn| {
            conn.execute(
                "UPDATE entity SET updated_at = ?1 WHERE path = ?2",
                params![updated_at as i64, path],
            )
            .map(|n| n as u64)
            .map_err(map_db_err)
        })
        .await
    }

    pub async fn delete_entity(&self, path: &str) -> StoreResult<u64> {
        let path = path.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM entity WHERE path = ?1", params![path])
                .map(|n| n as u64)
                .map_err(map_db_err)
        })
        .await
    }

    /// Delete every entity strictly below `prefix` (exclusive lower bound:
    /// the row at `prefix` itself is preserved) in one readwrite
    /// transaction. Returns the paths of the deleted leaves so their
    /// content rows can be cleaned up.
    pub async fn delete_descendants(&self, prefix: &str) -> StoreResult<Vec<String>> {
        let lower = prefix.to_string();
        let upper = range_end(prefix);
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(map_db_err)?;
            let leaves = {
                let mut stmt = tx
                    .prepare(
                        "SELECT path FROM entity
                         WHERE path > ?1 AND path < ?2 AND is_leaf = 1
                         ORDER BY path ASC",
                    )
                    .map_err(map_db_err)?;
                let rows = stmt
                    .query_map(params![lower, upper], |row| row.get::<_, String>(0))
                    .map_err(map_db_err)?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)?
            };
            tx.execute(
                "DELETE FROM entity WHERE path > ?1 AND path < ?2",
                params![lower, upper],
            )
            .map_err(map_db_err)?;
            tx.commit().map_err(map_db_err)?;
            Ok(leaves)
        })
        .await
    }

    /// Rewrite every entity strictly below `old_prefix` to live below
    /// `new_prefix`, walking the subtree in ascending path order inside
    /// one readwrite transaction. Parent pointers under the old prefix
    /// are rewritten alongside so invariant paths stay consistent at
    /// commit. Returns `(old_path, new_path)` for each moved leaf; the
    /// caller moves the content rows in lockstep.
    pub async fn rewrite_descendants(
        &self,
        old_prefix: &str,
        new_prefix: &str,
        updated_at: u64,
    ) -> StoreResult<Vec<(String, String)>> {
        let old_prefix = old_prefix.to_string();
        let new_prefix = new_prefix.to_string();
        self.with_conn(move |conn| {
            let lower = old_prefix.clone();
            let upper = range_end(&old_prefix);
            let tx = conn.transaction().map_err(map_db_err)?;
            let rows = {
                let mut stmt = tx
                    .prepare(
                        "SELECT path, parent_path, is_leaf FROM entity
                         WHERE path > ?1 AND path < ?2
                         ORDER BY path ASC",
                    )
                    .map_err(map_db_err)?;
                let mapped = stmt
                    .query_map(params![lower, upper], |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, Option<String>>(1)?,
                            row.get::<_, i64>(2)? != 0,
                        ))
                    })
                    .map_err(map_db_err)?;
                mapped
                    .collect::<rusqlite::Result<Vec<_>>>()
                    .map_err(map_db_err)?
            };

            let mut moved_leaves = Vec::new();
            for (path, parent_path, is_leaf) in rows {
                let new_path = format!("{}{}", new_prefix, &path[old_prefix.len()..]);
                let new_parent = parent_path.map(|pp| {
                    if pp.starts_with(&old_prefix) {
                        format!("{}{}", new_prefix, &pp[old_prefix.len()..])
                    } else {
                        pp
                    }
                });
                tx.execute(
                    "UPDATE entity SET path = ?1, parent_path = ?2, updated_at = ?3
                     WHERE path = ?4",
                    params![new_path, new_parent, updated_at as i64, path],
                )
                .map_err(map_db_err)?;
                if is_leaf {
                    moved_leaves.push((path, new_path));
                }
            }

            tx.commit().map_err(map_db_err)?;
            Ok(moved_leaves)
        })
        .await
    }

    pub async fn get_all_entities(&self) -> StoreResult<Vec<Entity>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(&format!("SELECT {} FROM entity ORDER BY path ASC", ENTITY_COLS))
                .map_err(map_db_err)?;
            let rows = stmt.query_map([], entity_from_row).map_err(map_db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)
        })
        .await
    }

    /// Conditionally insert the root entity. A constraint violation means
    /// the root already exists and counts as success.
    pub async fn seed_root(&self) -> StoreResult<bool> {
        let now = unix_timestamp_ms();
        let root = Entity {
            name: String::new(),
            path: "/".to_string(),
            is_leaf: false,
            parent_path: None,
            created_at: now,
            updated_at: now,
        };
        match self.insert_entity(&root).await {
            Ok(()) => Ok(true),
            Err(e) if e.is_constraint() => Ok(false),
            Err(e) => Err(e),
        }
    }

    // ========== content store ==========

    pub async fn get_content(&self, leaf_path: &str) -> StoreResult<Option<ContentRecord>> {
        let leaf_path = leaf_path.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT leaf_path, content FROM content WHERE leaf_path = ?1",
                params![leaf_path],
                |row| {
                    Ok(ContentRecord {
                        leaf_path: row.get(0)?,
                        content: row.get(1)?,
                    })
                },
            )
            .optional()
            .map_err(map_db_err)
        })
        .await
    }

    pub async fn put_content(&self, record: &ContentRecord) -> StoreResult<()> {
        let record = record.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO content (leaf_path, content) VALUES (?1, ?2)",
                params![record.leaf_path, record.content],
            )
            .map_err(map_db_err)?;
            Ok(())
        })
        .await
    }

    pub async fn delete_content(&self, leaf_path: &str) -> StoreResult<u64> {
        let leaf_path = leaf_path.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM content WHERE leaf_path = ?1", params![leaf_path])
                .map(|n| n as u64)
                .map_err(map_db_err)
        })
        .await
    }

    /// Re-key content rows after a subtree rewrite, in one readwrite
    /// transaction over the content store.
    pub async fn rewrite_content_keys(&self, moves: &[(String, String)]) -> StoreResult<u64> {
        let moves = moves.to_vec();
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(map_db_err)?;
            let mut rewritten = 0u64;
            for (old_path, new_path) in &moves {
                rewritten += tx
                    .execute(
                        "UPDATE content SET leaf_path = ?1 WHERE leaf_path = ?2",
                        params![new_path, old_path],
                    )
                    .map_err(map_db_err)? as u64;
            }
            tx.commit().map_err(map_db_err)?;
            Ok(rewritten)
        })
        .await
    }

    pub async fn get_all_content(&self) -> StoreResult<Vec<ContentRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT leaf_path, content FROM content ORDER BY leaf_path ASC")
                .map_err(map_db_err)?;
            let rows = stmt
                .query_map([], |row| {
                    Ok(ContentRecord {
                        leaf_path: row.get(0)?,
                        content: row.get(1)?,
                    })
                })
                .map_err(map_db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)
        })
        .await
    }

    // ========== lock store ==========

    pub async fn insert_lock(&self, lock: &LockRecord) -> StoreResult<()> {
        let lock = lock.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO lock (path_prefix, expiry, created_at) VALUES (?1, ?2, ?3)",
                params![lock.path_prefix, lock.expiry as i64, lock.created_at as i64],
            )
            .map_err(map_db_err)?;
            Ok(())
        })
        .await
    }

    pub async fn put_lock(&self, lock: &LockRecord) -> StoreResult<()> {
        let lock = lock.clone();
        self.with_conn(move |conn| {
            conn.execute(
                "INSERT OR REPLACE INTO lock (path_prefix, expiry, created_at)
                 VALUES (?1, ?2, ?3)",
                params![lock.path_prefix, lock.expiry as i64, lock.created_at as i64],
            )
            .map_err(map_db_err)?;
            Ok(())
        })
        .await
    }

    pub async fn get_lock(&self, path_prefix: &str) -> StoreResult<Option<LockRecord>> {
        let path_prefix = path_prefix.to_string();
        self.with_conn(move |conn| {
            conn.query_row(
                "SELECT path_prefix, expiry, created_at FROM lock WHERE path_prefix = ?1",
                params![path_prefix],
                lock_from_row,
            )
            .optional()
            .map_err(map_db_err)
        })
        .await
    }

    pub async fn delete_lock(&self, path_prefix: &str) -> StoreResult<u64> {
        let path_prefix = path_prefix.to_string();
        self.with_conn(move |conn| {
            conn.execute("DELETE FROM lock WHERE path_prefix = ?1", params![path_prefix])
                .map(|n| n as u64)
                .map_err(map_db_err)
        })
        .await
    }

    /// Locks that are still live at `now`, through the `expiry` index.
    pub async fn get_unexpired_locks(&self, now: u64) -> StoreResult<Vec<LockRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare(
                    "SELECT path_prefix, expiry, created_at FROM lock
                     WHERE expiry > ?1 ORDER BY expiry ASC",
                )
                .map_err(map_db_err)?;
            let rows = stmt
                .query_map(params![now as i64], lock_from_row)
                .map_err(map_db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)
        })
        .await
    }

    /// Prefixes of locks whose expiry has passed, through the `expiry`
    /// index, for the janitor to delete.
    pub async fn get_expired_lock_prefixes(&self, now: u64) -> StoreResult<Vec<String>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT path_prefix FROM lock WHERE expiry <= ?1 ORDER BY expiry ASC")
                .map_err(map_db_err)?;
            let rows = stmt
                .query_map(params![now as i64], |row| row.get::<_, String>(0))
                .map_err(map_db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)
        })
        .await
    }

    pub async fn get_all_locks(&self) -> StoreResult<Vec<LockRecord>> {
        self.with_conn(move |conn| {
            let mut stmt = conn
                .prepare("SELECT path_prefix, expiry, created_at FROM lock ORDER BY path_prefix ASC")
                .map_err(map_db_err)?;
            let rows = stmt.query_map([], lock_from_row).map_err(map_db_err)?;
            rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)
        })
        .await
    }

    // ========== backup ==========

    /// Snapshot all three stores into a backup document inside one
    /// readonly transaction.
    pub async fn export_backup(&self) -> StoreResult<FsBackup> {
        self.with_conn(move |conn| {
            let tx = conn.transaction().map_err(map_db_err)?;
            let entity = {
                let mut stmt = tx
                    .prepare(&format!("SELECT {} FROM entity ORDER BY path ASC", ENTITY_COLS))
                    .map_err(map_db_err)?;
                let rows = stmt.query_map([], entity_from_row).map_err(map_db_err)?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)?
            };
            let content = {
                let mut stmt = tx
                    .prepare("SELECT leaf_path, content FROM content ORDER BY leaf_path ASC")
                    .map_err(map_db_err)?;
                let rows = stmt
                    .query_map([], |row| {
                        Ok(ContentRecord {
                            leaf_path: row.get(0)?,
                            content: row.get(1)?,
                        })
                    })
                    .map_err(map_db_err)?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)?
            };
            let lock = {
                let mut stmt = tx
                    .prepare(
                        "SELECT path_prefix, expiry, created_at FROM lock ORDER BY path_prefix ASC",
                    )
                    .map_err(map_db_err)?;
                let rows = stmt.query_map([], lock_from_row).map_err(map_db_err)?;
                rows.collect::<rusqlite::Result<Vec<_>>>().map_err(map_db_err)?
            };
            tx.commit().map_err(map_db_err)?;
            Ok(FsBackup {
                entity,
                content,
                lock,
            })
        })
        .await
    }
}
