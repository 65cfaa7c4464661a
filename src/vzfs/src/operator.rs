//! The operator actor.
//!
//! A single-threaded message loop: the host sends [`VzfsCommand`] events
//! and receives named [`VzfsReply`] events. Until `init` succeeds the
//! actor only answers lifecycle commands; once initialized it dispatches
//! one filesystem command at a time, sequencing each as
//! resolve -> lock -> conflict-check -> mutate -> release, and re-enters
//! the awaiting state (emitting `vzfsAwaitingCommand` and kicking the
//! lock janitor) after every reply.

use log::{debug, info, warn};
use serde::Deserialize;
use std::path::PathBuf;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use vzfs_lib::path::{greatest_common_prefix, normalize, validate_name};
use vzfs_lib::{
    DirectoryRecord, Entity, FileRecord, VzfsCommand, VzfsError, VzfsReply, VzfsResult,
    DEFAULT_LOCK_DURATION_MS,
};
use vzfs_store::{FsDb, FsStoreMgr};

use crate::lock_mgr::LockManager;
use crate::tree_ops::TreeOps;

const COMMAND_CHANNEL_CAPACITY: usize = 32;

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct VzfsServiceConfig {
    /// Directory holding one database file per filesystem.
    #[serde(alias = "base_path")]
    pub base_dir: PathBuf,
    /// Lock lifetime applied when a command carries no `durationMs`.
    pub default_lock_duration_ms: u64,
}

impl Default for VzfsServiceConfig {
    fn default() -> Self {
        Self {
            base_dir: PathBuf::from("vzfs-data"),
            default_lock_duration_ms: DEFAULT_LOCK_DURATION_MS,
        }
    }
}

impl VzfsServiceConfig {
    /// Load the config from a JSON file; missing fields take defaults.
    pub fn load_from_file(path: &std::path::Path) -> VzfsResult<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| VzfsError::store(format!("read {} failed: {}", path.display(), e)))?;
        serde_json::from_str(&content)
            .map_err(|e| VzfsError::store(format!("parse {} failed: {}", path.display(), e)))
    }
}

/// Host-side handle to a spawned operator.
pub struct VzfsActorHandle {
    pub commands: mpsc::Sender<VzfsCommand>,
    pub replies: mpsc::UnboundedReceiver<VzfsReply>,
    pub join: JoinHandle<()>,
}

/// Spawn an operator actor on the current runtime.
pub fn spawn_operator(config: VzfsServiceConfig) -> VzfsActorHandle {
    let (command_tx, command_rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
    let (reply_tx, reply_rx) = mpsc::unbounded_channel();
    let operator = Operator::new(config, command_rx, reply_tx);
    let join = tokio::spawn(operator.run());
    VzfsActorHandle {
        commands: command_tx,
        replies: reply_rx,
        join,
    }
}

/// State owned by the initialized region: the open database, the
/// actor-local working directory and the lock-pruner service.
struct Session {
    db: FsDb,
    tree: TreeOps,
    locks: LockManager,
    cwd: String,
    default_lock_duration_ms: u64,
    pruner_tx: mpsc::UnboundedSender<()>,
    pruner_handle: JoinHandle<()>,
}

struct Operator {
    store_mgr: FsStoreMgr,
    default_lock_duration_ms: u64,
    commands: mpsc::Receiver<VzfsCommand>,
    replies: mpsc::UnboundedSender<VzfsReply>,
    session: Option<Session>,
}

impl Operator {
    fn new(
        config: VzfsServiceConfig,
        commands: mpsc::Receiver<VzfsCommand>,
        replies: mpsc::UnboundedSender<VzfsReply>,
    ) -> Self {
        Self {
            store_mgr: FsStoreMgr::new(config.base_dir),
            default_lock_duration_ms: config.default_lock_duration_ms,
            commands,
            replies,
            session: None,
        }
    }

    async fn run(mut self) {
        while let Some(cmd) = self.commands.recv().await {
            debug!("vzfs operator: received {}", cmd.event_name());
            if self.session.is_some() {
                self.handle_initialized(cmd).await;
            } else {
                self.handle_uninitialized(cmd).await;
            }
        }
        // Host dropped the command channel: tear down like a close.
        self.close_session();
    }

    fn emit(&self, reply: VzfsReply) {
        if self.replies.send(reply).is_err() {
            debug!("vzfs operator: reply receiver dropped");
        }
    }

    /// Entry action of the awaiting-command state: tell the host and kick
    /// the pruner region.
    fn enter_awaiting(&self) {
        if let Some(session) = &self.session {
            let _ = session.pruner_tx.send(());
        }
        self.emit(VzfsReply::AwaitingCommand);
    }

    async fn handle_uninitialized(&mut self, cmd: VzfsCommand) {
        match cmd {
            VzfsCommand::Init {
                filesystem_name,
                version,
            } => match self.init_session(&filesystem_name, version).await {
                Ok(()) => self.enter_awaiting(),
                Err(error) => {
                    warn!("vzfs operator: init {} failed: {}", filesystem_name, error);
                    self.emit(VzfsReply::InitFailure { error });
                }
            },
            VzfsCommand::ListFilesystems => {
                let reply = match self.store_mgr.list_filesystems().await {
                    Ok(filesystems) => VzfsReply::ListFilesystemsSuccess { filesystems },
                    Err(error) => VzfsReply::ListFilesystemsFailure { error },
                };
                self.emit(reply);
            }
            VzfsCommand::DropFilesystem { fs_name } => {
                let reply = match self.store_mgr.drop_filesystem(&fs_name).await {
                    Ok(()) => VzfsReply::DropFilesystemSuccess,
                    Err(error) => VzfsReply::DropFilesystemFailure { error },
                };
                self.emit(reply);
            }
            VzfsCommand::RestoreFilesystemFromJson {
                fs_name,
                version,
                backup,
            } => {
                let reply = match self
                    .store_mgr
                    .restore_from_json(&fs_name, version, &backup)
                    .await
                {
                    Ok(()) => VzfsReply::RestoreFilesystemFromJsonSuccess,
                    Err(error) => VzfsReply::RestoreFilesystemFromJsonFailure { error },
                };
                self.emit(reply);
            }
            other => {
                warn!(
                    "vzfs operator: {} ignored while uninitialized",
                    other.event_name()
                );
            }
        }
    }

    async fn handle_initialized(&mut self, cmd: VzfsCommand) {
        if matches!(cmd, VzfsCommand::Close) {
            self.close_session();
            return;
        }

        let reply = {
            let Some(session) = self.session.as_mut() else {
                return;
            };
            match cmd {
                VzfsCommand::ChangeDirectory {
                    new_directory_path,
                    duration_ms,
                } => Some(session.change_directory(&new_directory_path, duration_ms).await),
                VzfsCommand::CreateFile {
                    name,
                    parent_path,
                    content,
                    duration_ms,
                } => Some(
                    session
                        .create_file(&name, &parent_path, content, duration_ms)
                        .await,
                ),
                VzfsCommand::ReadFile { path, duration_ms } => {
                    Some(session.read_file(&path, duration_ms).await)
                }
                VzfsCommand::UpdateFileTimestamp { path, duration_ms } => {
                    Some(session.update_file_timestamp(&path, duration_ms).await)
                }
                VzfsCommand::UpdateFileContent {
                    path,
                    content,
                    duration_ms,
                } => Some(session.update_file_content(&path, content, duration_ms).await),
                VzfsCommand::DeleteFile { path, duration_ms } => {
                    Some(session.delete_file(&path, duration_ms).await)
                }
                VzfsCommand::CreateDirectory {
                    name,
                    parent_path,
                    duration_ms,
                } => Some(session.create_directory(&name, &parent_path, duration_ms).await),
                VzfsCommand::GetDirectoryRecord { path, duration_ms } => {
                    Some(session.get_directory_record(path.as_deref(), duration_ms).await)
                }
                VzfsCommand::EmptyDirectory { path, duration_ms } => {
                    Some(session.empty_directory(&path, duration_ms).await)
                }
                VzfsCommand::DeleteDirectoryIfEmpty { path, duration_ms } => {
                    Some(session.delete_directory_if_empty(&path, duration_ms).await)
                }
                VzfsCommand::RenameFile {
                    path,
                    new_name,
                    duration_ms,
                } => Some(session.rename_file(&path, &new_name, duration_ms).await),
                VzfsCommand::MoveFile {
                    path,
                    new_parent_path,
                    duration_ms,
                } => Some(session.move_file(&path, &new_parent_path, duration_ms).await),
                VzfsCommand::MoveDirectory {
                    path,
                    new_parent_path,
                    duration_ms,
                } => Some(session.move_directory(&path, &new_parent_path, duration_ms).await),
                VzfsCommand::RipFilesystemToJson => Some(session.rip_filesystem_to_json().await),
                other => {
                    warn!(
                        "vzfs operator: {} ignored while initialized",
                        other.event_name()
                    );
                    None
                }
            }
        };

        if let Some(reply) = reply {
            self.emit(reply);
            self.enter_awaiting();
        }
    }

    async fn init_session(&mut self, fs_name: &str, version: u32) -> VzfsResult<()> {
        let db = self.store_mgr.open_filesystem(fs_name, version).await?;
        // Conditionally insert the root: a primary-key collision means a
        // sibling actor already seeded it.
        let seeded = db.seed_root().await.map_err(VzfsError::from)?;
        info!(
            "vzfs operator: filesystem {} initialized (root {})",
            fs_name,
            if seeded { "seeded" } else { "already present" }
        );
        self.session = Some(Session::new(db, self.default_lock_duration_ms));
        Ok(())
    }

    fn close_session(&mut self) {
        if let Some(session) = self.session.take() {
            session.pruner_handle.abort();
            info!("vzfs operator: session closed, back to uninitialized");
        }
    }
}

impl Session {
    fn new(db: FsDb, default_lock_duration_ms: u64) -> Self {
        let (pruner_tx, pruner_handle) = Self::spawn_pruner(db.clone());
        Self {
            tree: TreeOps::new(db.clone()),
            locks: LockManager::new(db.clone()),
            db,
            cwd: "/".to_string(),
            default_lock_duration_ms,
            pruner_tx,
            pruner_handle,
        }
    }

    /// The lock-pruner region: a background task that sweeps expired
    /// locks each time the operator re-enters the awaiting state. It
    /// swallows its own errors and keeps serving until the session ends.
    fn spawn_pruner(db: FsDb) -> (mpsc::UnboundedSender<()>, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::unbounded_channel::<()>();
        let locks = LockManager::new(db);
        let handle = tokio::spawn(async move {
            while rx.recv().await.is_some() {
                match locks.prune_expired_locks().await {
                    Ok(0) => {}
                    Ok(n) => info!("vzfs lock pruner: reaped {} expired locks", n),
                    Err(e) => warn!("vzfs lock pruner: sweep failed: {}", e),
                }
            }
        });
        (tx, handle)
    }

    fn duration(&self, duration_ms: Option<u64>) -> u64 {
        duration_ms.unwrap_or(self.default_lock_duration_ms)
    }

    /// The post-acquisition overlap check shared by every locked command.
    async fn guard(&self, prefix: &str) -> VzfsResult<()> {
        self.locks
            .reject_if_conflicting_prefixes(&[prefix.to_string()], true)
            .await
    }

    // ========== per-command bodies ==========
    //
    // Every body resolves its target(s) before locking, holds exactly one
    // lock for the mutation, and releases it in a final step regardless
    // of the outcome.

    async fn change_directory(
        &mut self,
        new_directory_path: &str,
        duration_ms: Option<u64>,
    ) -> VzfsReply {
        let result = self
            .change_directory_inner(new_directory_path, duration_ms)
            .await;
        match result {
            Ok(cwd) => VzfsReply::ChangeDirectorySuccess { cwd },
            Err(error) => VzfsReply::ChangeDirectoryFailure { error },
        }
    }

    async fn change_directory_inner(
        &mut self,
        new_directory_path: &str,
        duration_ms: Option<u64>,
    ) -> VzfsResult<String> {
        let target = self.tree.get_entity(&self.cwd, new_directory_path).await?;
        if target.is_leaf {
            return Err(VzfsError::NotADirectory(target.path));
        }
        let prefix = self
            .locks
            .lock_path(&self.cwd, &target.path, self.duration(duration_ms))
            .await?;
        let checked = self.guard(&prefix).await;
        self.locks.remove_lock(&prefix).await;
        checked?;
        // cwd is actor-local, in-memory state; it is never persisted.
        self.cwd = target.path.clone();
        Ok(target.path)
    }

    async fn create_file(
        &self,
        name: &str,
        parent_path: &str,
        content: String,
        duration_ms: Option<u64>,
    ) -> VzfsReply {
        match self
            .create_file_inner(name, parent_path, content, duration_ms)
            .await
        {
            Ok(new_file_path) => VzfsReply::CreateFileSuccess { new_file_path },
            Err(error) => VzfsReply::CreateFileFailure { error },
        }
    }

    async fn create_file_inner(
        &self,
        name: &str,
        parent_path: &str,
        content: String,
        duration_ms: Option<u64>,
    ) -> VzfsResult<String> {
        let parent = self.tree.get_entity(&self.cwd, parent_path).await?;
        if parent.is_leaf {
            return Err(VzfsError::NotADirectory(parent.path));
        }
        // The new leaf does not exist yet; the parent's prefix covers it.
        let prefix = self
            .locks
            .lock_path(&self.cwd, &parent.path, self.duration(duration_ms))
            .await?;
        let result = match self.guard(&prefix).await {
            Ok(()) => {
                self.tree
                    .add_file_entity(&self.cwd, name, &parent.path, content)
                    .await
            }
            Err(e) => Err(e),
        };
        self.locks.remove_lock(&prefix).await;
        result
    }

    async fn read_file(&self, path: &str, duration_ms: Option<u64>) -> VzfsReply {
        match self.read_file_inner(path, duration_ms).await {
            Ok(file) => VzfsReply::ReadFileSuccess { file },
            Err(error) => VzfsReply::ReadFileFailure { error },
        }
    }

    async fn read_file_inner(
        &self,
        path: &str,
        duration_ms: Option<u64>,
    ) -> VzfsResult<FileRecord> {
        let leaf = self.tree.get_entity(&self.cwd, path).await?;
        if !leaf.is_leaf {
            return Err(VzfsError::NotALeaf(leaf.path));
        }
        let prefix = self
            .locks
            .lock_path(&self.cwd, &leaf.path, self.duration(duration_ms))
            .await?;
        let result = match self.guard(&prefix).await {
            Ok(()) => self.tree.join_content_to_leaf(&leaf).await,
            Err(e) => Err(e),
        };
        self.locks.remove_lock(&prefix).await;
        result
    }

    async fn update_file_timestamp(&self, path: &str, duration_ms: Option<u64>) -> VzfsReply {
        match self
            .locked_leaf_op(path, duration_ms, |tree, cwd, leaf_path| async move {
                tree.update_file_timestamp(&cwd, &leaf_path).await
            })
            .await
        {
            Ok(()) => VzfsReply::UpdateFileTimestampSuccess,
            Err(error) => VzfsReply::UpdateFileTimestampFailure { error },
        }
    }

    async fn update_file_content(
        &self,
        path: &str,
        content: String,
        duration_ms: Option<u64>,
    ) -> VzfsReply {
        let result = self
            .locked_leaf_op(path, duration_ms, move |tree, cwd, leaf_path| async move {
                tree.update_file(&cwd, &leaf_path, content).await
            })
            .await;
        match result {
            Ok(()) => VzfsReply::UpdateFileSuccess,
            Err(error) => VzfsReply::UpdateFileFailure { error },
        }
    }

    async fn delete_file(&self, path: &str, duration_ms: Option<u64>) -> VzfsReply {
        let result = self
            .locked_leaf_op(path, duration_ms, |tree, cwd, leaf_path| async move {
                tree.delete_leaf_entity(&cwd, &leaf_path).await
            })
            .await;
        match result {
            Ok(()) => VzfsReply::DeleteFileSuccess,
            Err(error) => VzfsReply::DeleteFileFailure { error },
        }
    }

    /// Shared resolve -> lock -> check -> op -> release sequence for the
    /// leaf-addressed single-path commands.
    async fn locked_leaf_op<F, Fut>(
        &self,
        path: &str,
        duration_ms: Option<u64>,
        op: F,
    ) -> VzfsResult<()>
    where
        F: FnOnce(TreeOps, String, String) -> Fut,
        Fut: std::future::Future<Output = VzfsResult<()>>,
    {
        let leaf = self.tree.get_entity(&self.cwd, path).await?;
        if !leaf.is_leaf {
            return Err(VzfsError::NotALeaf(leaf.path));
        }
        let prefix = self
            .locks
            .lock_path(&self.cwd, &leaf.path, self.duration(duration_ms))
            .await?;
        let result = match self.guard(&prefix).await {
            Ok(()) => op(self.tree.clone(), self.cwd.clone(), leaf.path.clone()).await,
            Err(e) => Err(e),
        };
        self.locks.remove_lock(&prefix).await;
        result
    }

    async fn create_directory(
        &self,
        name: &str,
        parent_path: &str,
        duration_ms: Option<u64>,
    ) -> VzfsReply {
        match self
            .create_directory_inner(name, parent_path, duration_ms)
            .await
        {
            Ok(_) => VzfsReply::CreateDirectorySuccess,
            Err(error) => VzfsReply::CreateDirectoryFailure { error },
        }
    }

    async fn create_directory_inner(
        &self,
        name: &str,
        parent_path: &str,
        duration_ms: Option<u64>,
    ) -> VzfsResult<String> {
        let parent = self.tree.get_entity(&self.cwd, parent_path).await?;
        if parent.is_leaf {
            return Err(VzfsError::NotADirectory(parent.path));
        }
        let prefix = self
            .locks
            .lock_path(&self.cwd, &parent.path, self.duration(duration_ms))
            .await?;
        let result = match self.guard(&prefix).await {
            Ok(()) => {
                self.tree
                    .add_directory_entity(&self.cwd, name, &parent.path)
                    .await
            }
            Err(e) => Err(e),
        };
        self.locks.remove_lock(&prefix).await;
        result
    }

    async fn get_directory_record(
        &self,
        path: Option<&str>,
        duration_ms: Option<u64>,
    ) -> VzfsReply {
        match self.get_directory_record_inner(path, duration_ms).await {
            Ok(data) => VzfsReply::GetDirectoryRecordSuccess { data },
            Err(error) => VzfsReply::GetDirectoryRecordFailure { error },
        }
    }

    async fn get_directory_record_inner(
        &self,
        path: Option<&str>,
        duration_ms: Option<u64>,
    ) -> VzfsResult<DirectoryRecord> {
        let Some(path) = path else {
            // Without a payload the command only reports the actor's cwd.
            return Ok(DirectoryRecord {
                entity: None,
                child_keys: Vec::new(),
                cwd: Some(self.cwd.clone()),
            });
        };

        let dir = self.tree.get_entity(&self.cwd, path).await?;
        if dir.is_leaf {
            return Err(VzfsError::NotADirectory(dir.path));
        }
        let prefix = self
            .locks
            .lock_path(&self.cwd, &dir.path, self.duration(duration_ms))
            .await?;
        let result = match self.guard(&prefix).await {
            Ok(()) => {
                self.tree
                    .get_immediate_child_keys(&self.cwd, &dir.path)
                    .await
            }
            Err(e) => Err(e),
        };
        self.locks.remove_lock(&prefix).await;
        Ok(DirectoryRecord {
            entity: Some(dir),
            child_keys: result?,
            cwd: None,
        })
    }

    async fn empty_directory(&self, path: &str, duration_ms: Option<u64>) -> VzfsReply {
        match self.empty_directory_inner(path, duration_ms).await {
            Ok(()) => VzfsReply::EmptyDirectorySuccess,
            Err(error) => VzfsReply::EmptyDirectoryFailure { error },
        }
    }

    async fn empty_directory_inner(
        &self,
        path: &str,
        duration_ms: Option<u64>,
    ) -> VzfsResult<()> {
        let dir = self.tree.get_entity(&self.cwd, path).await?;
        if dir.is_leaf {
            return Err(VzfsError::NotADirectory(dir.path));
        }
        let prefix = self
            .locks
            .lock_path(&self.cwd, &dir.path, self.duration(duration_ms))
            .await?;
        let result = match self.guard(&prefix).await {
            Ok(()) => self.tree.empty_directory(&self.cwd, &dir.path).await,
            Err(e) => Err(e),
        };
        self.locks.remove_lock(&prefix).await;
        result
    }

    async fn delete_directory_if_empty(&self, path: &str, duration_ms: Option<u64>) -> VzfsReply {
        match self.delete_directory_if_empty_inner(path, duration_ms).await {
            Ok(()) => VzfsReply::DeleteDirectoryIfEmptySuccess,
            Err(error) => VzfsReply::DeleteDirectoryIfEmptyFailure { error },
        }
    }

    async fn delete_directory_if_empty_inner(
        &self,
        path: &str,
        duration_ms: Option<u64>,
    ) -> VzfsResult<()> {
        let dir = self.tree.get_entity(&self.cwd, path).await?;
        if dir.is_leaf {
            return Err(VzfsError::NotADirectory(dir.path));
        }
        let prefix = self
            .locks
            .lock_path(&self.cwd, &dir.path, self.duration(duration_ms))
            .await?;
        let result = match self.guard(&prefix).await {
            Ok(()) => {
                self.tree
                    .delete_directory_if_empty(&self.cwd, &dir.path)
                    .await
            }
            Err(e) => Err(e),
        };
        self.locks.remove_lock(&prefix).await;
        result
    }

    async fn rename_file(
        &self,
        path: &str,
        new_name: &str,
        duration_ms: Option<u64>,
    ) -> VzfsReply {
        match self.rename_file_inner(path, new_name, duration_ms).await {
            Ok(new_file_path) => VzfsReply::RenameFileSuccess { new_file_path },
            Err(error) => VzfsReply::RenameFileFailure { error },
        }
    }

    async fn rename_file_inner(
        &self,
        path: &str,
        new_name: &str,
        duration_ms: Option<u64>,
    ) -> VzfsResult<String> {
        let leaf = self.tree.get_entity(&self.cwd, path).await?;
        if !leaf.is_leaf {
            return Err(VzfsError::NotALeaf(leaf.path));
        }
        validate_name(new_name)?;
        let parent_path = leaf
            .parent_path
            .clone()
            .ok_or_else(|| VzfsError::InvalidPath(leaf.path.clone()))?;
        let new_path = normalize(&format!("{}{}", parent_path, new_name), &[])?;

        // Source and destination share one lock on their greatest common
        // string prefix.
        let gcp = greatest_common_prefix(&leaf.path, &new_path);
        let prefix = self
            .locks
            .lock_path(&self.cwd, &gcp, self.duration(duration_ms))
            .await?;
        let result = match self.guard(&prefix).await {
            Ok(()) => self.tree.rename_file(&self.cwd, &leaf.path, new_name).await,
            Err(e) => Err(e),
        };
        self.locks.remove_lock(&prefix).await;
        result
    }

    async fn move_file(
        &self,
        path: &str,
        new_parent_path: &str,
        duration_ms: Option<u64>,
    ) -> VzfsReply {
        match self.move_file_inner(path, new_parent_path, duration_ms).await {
            Ok(new_file_path) => VzfsReply::MoveFileSuccess { new_file_path },
            Err(error) => VzfsReply::MoveFileFailure { error },
        }
    }

    async fn move_file_inner(
        &self,
        path: &str,
        new_parent_path: &str,
        duration_ms: Option<u64>,
    ) -> VzfsResult<String> {
        let leaf = self.tree.get_entity(&self.cwd, path).await?;
        if !leaf.is_leaf {
            return Err(VzfsError::NotALeaf(leaf.path));
        }
        let new_parent = self.tree.get_entity(&self.cwd, new_parent_path).await?;
        if new_parent.is_leaf {
            return Err(VzfsError::NotADirectory(new_parent.path));
        }

        let gcp = greatest_common_prefix(&leaf.path, &new_parent.path);
        let prefix = self
            .locks
            .lock_path(&self.cwd, &gcp, self.duration(duration_ms))
            .await?;
        let result = match self.guard(&prefix).await {
            Ok(()) => {
                self.tree
                    .reparent_leaf(&self.cwd, &leaf.path, &new_parent.path)
                    .await
            }
            Err(e) => Err(e),
        };
        self.locks.remove_lock(&prefix).await;
        result
    }

    async fn move_directory(
        &self,
        path: &str,
        new_parent_path: &str,
        duration_ms: Option<u64>,
    ) -> VzfsReply {
        match self
            .move_directory_inner(path, new_parent_path, duration_ms)
            .await
        {
            Ok(new_directory_path) => VzfsReply::MoveDirectorySuccess { new_directory_path },
            Err(error) => VzfsReply::MoveDirectoryFailure { error },
        }
    }

    async fn move_directory_inner(
        &self,
        path: &str,
        new_parent_path: &str,
        duration_ms: Option<u64>,
    ) -> VzfsResult<String> {
        let src = self.tree.get_entity(&self.cwd, path).await?;
        if src.is_leaf {
            return Err(VzfsError::NotADirectory(src.path));
        }
        if src.is_root() {
            return Err(VzfsError::InvalidPath(
                "cannot move the root directory".to_string(),
            ));
        }
        if self.cwd.starts_with(&src.path) {
            return Err(VzfsError::InvalidPath(format!(
                "cannot move {}: it contains the current working directory",
                src.path
            )));
        }
        let dest_parent = self.tree.get_entity(&self.cwd, new_parent_path).await?;
        if dest_parent.is_leaf {
            return Err(VzfsError::NotADirectory(dest_parent.path));
        }
        if dest_parent.path.starts_with(&src.path) {
            return Err(VzfsError::InvalidPath(format!(
                "cannot move {} into its own subtree {}",
                src.path, dest_parent.path
            )));
        }

        let gcp = greatest_common_prefix(&src.path, &dest_parent.path);
        let prefix = self
            .locks
            .lock_path(&self.cwd, &gcp, self.duration(duration_ms))
            .await?;
        let result = match self.guard(&prefix).await {
            Ok(()) => self.move_directory_locked(&src, &dest_parent).await,
            Err(e) => Err(e),
        };
        self.locks.remove_lock(&prefix).await;
        result
    }

    /// Runs under the GCP lock: probe the destination, create the
    /// destination directory, transplant the children, delete the
    /// now-empty source.
    async fn move_directory_locked(
        &self,
        src: &Entity,
        dest_parent: &Entity,
    ) -> VzfsResult<String> {
        let taken = self
            .db
            .count_sibling(&dest_parent.path, &src.name)
            .await
            .map_err(VzfsError::from)?;
        if taken > 0 {
            return Err(VzfsError::Exists(format!(
                "{}{}/",
                dest_parent.path, src.name
            )));
        }
        let new_dir_path = self
            .tree
            .add_directory_entity(&self.cwd, &src.name, &dest_parent.path)
            .await?;
        self.tree
            .transplant_ancestors(&self.cwd, &src.path, &new_dir_path)
            .await?;
        self.db
            .delete_entity(&src.path)
            .await
            .map_err(VzfsError::from)?;
        Ok(new_dir_path)
    }

    async fn rip_filesystem_to_json(&self) -> VzfsReply {
        match FsStoreMgr::export_to_json(&self.db).await {
            Ok(backup) => VzfsReply::RipFilesystemToJsonSuccess { backup },
            Err(error) => VzfsReply::RipFilesystemToJsonFailure { error },
        }
    }
}
