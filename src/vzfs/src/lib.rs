// vzfs: a persistent, hierarchical, multi-rooted filesystem emulation over
// per-filesystem SQLite databases. The operator actor sequences each host
// command as resolve -> lock -> mutate -> release on top of the advisory
// path-prefix lock table, which is what makes multi-transaction mutations
// safe against sibling actors sharing the same database file.

mod client;
mod lock_mgr;
mod operator;
mod tree_ops;

#[cfg(test)]
mod lock_mgr_tests;

pub use client::VzfsClient;
pub use lock_mgr::LockManager;
pub use operator::{spawn_operator, VzfsActorHandle, VzfsServiceConfig};
pub use tree_ops::TreeOps;

pub use vzfs_lib::{
    ContentRecord, DirectoryRecord, Entity, FileRecord, FsBackup, LockRecord, VzfsCommand,
    VzfsError, VzfsReply, VzfsResult, DEFAULT_LOCK_DURATION_MS,
};
pub use vzfs_store::{FsDb, FsStoreMgr};
