//! Typed request/response client over the operator channels.
//!
//! The actor protocol is event-shaped: commands go in, named replies come
//! out, with `vzfsAwaitingCommand` emitted between them. [`VzfsClient`]
//! folds that back into plain async calls for hosts that want one result
//! per request. Because the operator answers strictly in arrival order,
//! the next non-awaiting reply always belongs to the last command sent.

use vzfs_lib::{
    DirectoryRecord, FileRecord, VzfsCommand, VzfsError, VzfsReply, VzfsResult,
};

use crate::operator::{spawn_operator, VzfsActorHandle, VzfsServiceConfig};

pub struct VzfsClient {
    handle: VzfsActorHandle,
}

fn unexpected(reply: VzfsReply) -> VzfsError {
    VzfsError::store(format!("unexpected reply: {:?}", reply))
}

impl VzfsClient {
    pub fn new(handle: VzfsActorHandle) -> Self {
        Self { handle }
    }

    /// Spawn a fresh operator and wrap it.
    pub fn spawn(config: VzfsServiceConfig) -> Self {
        Self::new(spawn_operator(config))
    }

    /// The wrapped handle, for hosts that need the raw event stream.
    pub fn handle_mut(&mut self) -> &mut VzfsActorHandle {
        &mut self.handle
    }

    async fn send(&self, cmd: VzfsCommand) -> VzfsResult<()> {
        self.handle
            .commands
            .send(cmd)
            .await
            .map_err(|_| VzfsError::store("operator terminated"))
    }

    async fn next_reply(&mut self) -> VzfsResult<VzfsReply> {
        self.handle
            .replies
            .recv()
            .await
            .ok_or_else(|| VzfsError::store("operator terminated"))
    }

    /// Send a command and return the reply it produced, skipping the
    /// awaiting-command entries interleaved with it.
    async fn call(&mut self, cmd: VzfsCommand) -> VzfsResult<VzfsReply> {
        self.send(cmd).await?;
        loop {
            let reply = self.next_reply().await?;
            if reply != VzfsReply::AwaitingCommand {
                return Ok(reply);
            }
        }
    }

    /// `init` is the one command whose success reply is the awaiting
    /// event itself.
    pub async fn init(&mut self, filesystem_name: &str, version: u32) -> VzfsResult<()> {
        self.send(VzfsCommand::Init {
            filesystem_name: filesystem_name.to_string(),
            version,
        })
        .await?;
        match self.next_reply().await? {
            VzfsReply::AwaitingCommand => Ok(()),
            VzfsReply::InitFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    /// `close` has no reply; the actor is uninitialized once it drains
    /// the command.
    pub async fn close(&self) -> VzfsResult<()> {
        self.send(VzfsCommand::Close).await
    }

    pub async fn list_filesystems(&mut self) -> VzfsResult<Vec<String>> {
        match self.call(VzfsCommand::ListFilesystems).await? {
            VzfsReply::ListFilesystemsSuccess { filesystems } => Ok(filesystems),
            VzfsReply::ListFilesystemsFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn drop_filesystem(&mut self, fs_name: &str) -> VzfsResult<()> {
        let cmd = VzfsCommand::DropFilesystem {
            fs_name: fs_name.to_string(),
        };
        match self.call(cmd).await? {
            VzfsReply::DropFilesystemSuccess => Ok(()),
            VzfsReply::DropFilesystemFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn restore_filesystem_from_json(
        &mut self,
        fs_name: &str,
        version: u32,
        backup: String,
    ) -> VzfsResult<()> {
        let cmd = VzfsCommand::RestoreFilesystemFromJson {
            fs_name: fs_name.to_string(),
            version,
            backup,
        };
        match self.call(cmd).await? {
            VzfsReply::RestoreFilesystemFromJsonSuccess => Ok(()),
            VzfsReply::RestoreFilesystemFromJsonFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    /// Returns the new working directory.
    pub async fn change_directory(&mut self, new_directory_path: &str) -> VzfsResult<String> {
        let cmd = VzfsCommand::ChangeDirectory {
            new_directory_path: new_directory_path.to_string(),
            duration_ms: None,
        };
        match self.call(cmd).await? {
            VzfsReply::ChangeDirectorySuccess { cwd } => Ok(cwd),
            VzfsReply::ChangeDirectoryFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    /// Returns the canonical path of the new leaf.
    pub async fn create_file(
        &mut self,
        name: &str,
        parent_path: &str,
        content: impl Into<String>,
    ) -> VzfsResult<String> {
        let cmd = VzfsCommand::CreateFile {
            name: name.to_string(),
            parent_path: parent_path.to_string(),
            content: content.into(),
            duration_ms: None,
        };
        match self.call(cmd).await? {
            VzfsReply::CreateFileSuccess { new_file_path } => Ok(new_file_path),
            VzfsReply::CreateFileFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn read_file(&mut self, path: &str) -> VzfsResult<FileRecord> {
        let cmd = VzfsCommand::ReadFile {
            path: path.to_string(),
            duration_ms: None,
        };
        match self.call(cmd).await? {
            VzfsReply::ReadFileSuccess { file } => Ok(file),
            VzfsReply::ReadFileFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn update_file_timestamp(&mut self, path: &str) -> VzfsResult<()> {
        let cmd = VzfsCommand::UpdateFileTimestamp {
            path: path.to_string(),
            duration_ms: None,
        };
        match self.call(cmd).await? {
            VzfsReply::UpdateFileTimestampSuccess => Ok(()),
            VzfsReply::UpdateFileTimestampFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn update_file_content(
        &mut self,
        path: &str,
        content: impl Into<String>,
    ) -> VzfsResult<()> {
        let cmd = VzfsCommand::UpdateFileContent {
            path: path.to_string(),
            content: content.into(),
            duration_ms: None,
        };
        match self.call(cmd).await? {
            VzfsReply::UpdateFileSuccess => Ok(()),
            VzfsReply::UpdateFileFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn delete_file(&mut self, path: &str) -> VzfsResult<()> {
        let cmd = VzfsCommand::DeleteFile {
            path: path.to_string(),
            duration_ms: None,
        };
        match self.call(cmd).await? {
            VzfsReply::DeleteFileSuccess => Ok(()),
            VzfsReply::DeleteFileFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn create_directory(&mut self, name: &str, parent_path: &str) -> VzfsResult<()> {
        let cmd = VzfsCommand::CreateDirectory {
            name: name.to_string(),
            parent_path: parent_path.to_string(),
            duration_ms: None,
        };
        match self.call(cmd).await? {
            VzfsReply::CreateDirectorySuccess => Ok(()),
            VzfsReply::CreateDirectoryFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn get_directory_record(
        &mut self,
        path: Option<&str>,
    ) -> VzfsResult<DirectoryRecord> {
        let cmd = VzfsCommand::GetDirectoryRecord {
            path: path.map(str::to_string),
            duration_ms: None,
        };
        match self.call(cmd).await? {
            VzfsReply::GetDirectoryRecordSuccess { data } => Ok(data),
            VzfsReply::GetDirectoryRecordFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn empty_directory(&mut self, path: &str) -> VzfsResult<()> {
        let cmd = VzfsCommand::EmptyDirectory {
            path: path.to_string(),
            duration_ms: None,
        };
        match self.call(cmd).await? {
            VzfsReply::EmptyDirectorySuccess => Ok(()),
            VzfsReply::EmptyDirectoryFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn delete_directory_if_empty(&mut self, path: &str) -> VzfsResult<()> {
        let cmd = VzfsCommand::DeleteDirectoryIfEmpty {
            path: path.to_string(),
            duration_ms: None,
        };
        match self.call(cmd).await? {
            VzfsReply::DeleteDirectoryIfEmptySuccess => Ok(()),
            VzfsReply::DeleteDirectoryIfEmptyFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn rename_file(&mut self, path: &str, new_name: &str) -> VzfsResult<String> {
        let cmd = VzfsCommand::RenameFile {
            path: path.to_string(),
            new_name: new_name.to_string(),
            duration_ms: None,
        };
        match self.call(cmd).await? {
            VzfsReply::RenameFileSuccess { new_file_path } => Ok(new_file_path),
            VzfsReply::RenameFileFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn move_file(&mut self, path: &str, new_parent_path: &str) -> VzfsResult<String> {
        let cmd = VzfsCommand::MoveFile {
            path: path.to_string(),
            new_parent_path: new_parent_path.to_string(),
            duration_ms: None,
        };
        match self.call(cmd).await? {
            VzfsReply::MoveFileSuccess { new_file_path } => Ok(new_file_path),
            VzfsReply::MoveFileFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn move_directory(
        &mut self,
        path: &str,
        new_parent_path: &str,
    ) -> VzfsResult<String> {
        let cmd = VzfsCommand::MoveDirectory {
            path: path.to_string(),
            new_parent_path: new_parent_path.to_string(),
            duration_ms: None,
        };
        match self.call(cmd).await? {
            VzfsReply::MoveDirectorySuccess { new_directory_path } => Ok(new_directory_path),
            VzfsReply::MoveDirectoryFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }

    pub async fn rip_filesystem_to_json(&mut self) -> VzfsResult<String> {
        match self.call(VzfsCommand::RipFilesystemToJson).await? {
            VzfsReply::RipFilesystemToJsonSuccess { backup } => Ok(backup),
            VzfsReply::RipFilesystemToJsonFailure { error } => Err(error),
            other => Err(unexpected(other)),
        }
    }
}
