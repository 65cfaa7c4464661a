//! Typed actor protocol.
//!
//! The host drives the operator with [`VzfsCommand`] events and receives
//! named [`VzfsReply`] events back. Wire names are the camelCase event
//! names of the protocol, so a serialized command looks like
//! `{"type":"createFile","name":"a.txt","parentPath":"/","content":"..."}`.

use serde::{Deserialize, Serialize};

use crate::{DirectoryRecord, FileRecord, VzfsError};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum VzfsCommand {
    /// Open (or create and upgrade) the named filesystem database and
    /// enter the initialized state.
    Init {
        filesystem_name: String,
        version: u32,
    },
    ListFilesystems,
    DropFilesystem {
        fs_name: String,
    },
    #[serde(rename = "restoreFilesystemFromJSON")]
    RestoreFilesystemFromJson {
        fs_name: String,
        version: u32,
        backup: String,
    },

    ChangeDirectory {
        new_directory_path: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    CreateFile {
        name: String,
        parent_path: String,
        content: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    ReadFile {
        path: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    UpdateFileTimestamp {
        path: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    UpdateFileContent {
        path: String,
        content: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    DeleteFile {
        path: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    CreateDirectory {
        name: String,
        parent_path: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    /// With a path: the directory entity plus its immediate child keys.
    /// Without one: just the actor's current working directory.
    GetDirectoryRecord {
        #[serde(default)]
        path: Option<String>,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    EmptyDirectory {
        path: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    DeleteDirectoryIfEmpty {
        path: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    RenameFile {
        path: String,
        new_name: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    MoveFile {
        path: String,
        new_parent_path: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    MoveDirectory {
        path: String,
        new_parent_path: String,
        #[serde(default)]
        duration_ms: Option<u64>,
    },
    #[serde(rename = "ripFilesystemToJSON")]
    RipFilesystemToJson,
    Close,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum VzfsReply {
    /// Emitted on every entry into the awaiting-command state, including
    /// right after a successful `init`.
    #[serde(rename = "vzfsAwaitingCommand")]
    AwaitingCommand,
    InitFailure {
        error: VzfsError,
    },

    ListFilesystemsSuccess {
        filesystems: Vec<String>,
    },
    ListFilesystemsFailure {
        error: VzfsError,
    },
    DropFilesystemSuccess,
    DropFilesystemFailure {
        error: VzfsError,
    },
    #[serde(rename = "restoreFilesystemFromJSONSuccess")]
    RestoreFilesystemFromJsonSuccess,
    #[serde(rename = "restoreFilesystemFromJSONFailure")]
    RestoreFilesystemFromJsonFailure {
        error: VzfsError,
    },

    ChangeDirectorySuccess {
        cwd: String,
    },
    ChangeDirectoryFailure {
        error: VzfsError,
    },
    CreateFileSuccess {
        new_file_path: String,
    },
    CreateFileFailure {
        error: VzfsError,
    },
    ReadFileSuccess {
        file: FileRecord,
    },
    ReadFileFailure {
        error: VzfsError,
    },
    UpdateFileTimestampSuccess,
    UpdateFileTimestampFailure {
        error: VzfsError,
    },
    /// Reply to `updateFileContent`.
    UpdateFileSuccess,
    UpdateFileFailure {
        error: VzfsError,
    },
    DeleteFileSuccess,
    DeleteFileFailure {
        error: VzfsError,
    },
    CreateDirectorySuccess,
    CreateDirectoryFailure {
        error: VzfsError,
    },
    GetDirectoryRecordSuccess {
        data: DirectoryRecord,
    },
    GetDirectoryRecordFailure {
        error: VzfsError,
    },
    EmptyDirectorySuccess,
    EmptyDirectoryFailure {
        error: VzfsError,
    },
    DeleteDirectoryIfEmptySuccess,
    DeleteDirectoryIfEmptyFailure {
        error: VzfsError,
    },
    RenameFileSuccess {
        new_file_path: String,
    },
    RenameFileFailure {
        error: VzfsError,
    },
    MoveFileSuccess {
        new_file_path: String,
    },
    MoveFileFailure {
        error: VzfsError,
    },
    MoveDirectorySuccess {
        new_directory_path: String,
    },
    MoveDirectoryFailure {
        error: VzfsError,
    },
    #[serde(rename = "ripFilesystemToJSONSuccess")]
    RipFilesystemToJsonSuccess {
        backup: String,
    },
    #[serde(rename = "ripFilesystemToJSONFailure")]
    RipFilesystemToJsonFailure {
        error: VzfsError,
    },
}

impl VzfsCommand {
    /// The wire name of the command, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            VzfsCommand::Init { .. } => "init",
            VzfsCommand::ListFilesystems => "listFilesystems",
            VzfsCommand::DropFilesystem { .. } => "dropFilesystem",
            VzfsCommand::RestoreFilesystemFromJson { .. } => "restoreFilesystemFromJSON",
            VzfsCommand::ChangeDirectory { .. } => "changeDirectory",
            VzfsCommand::CreateFile { .. } => "createFile",
            VzfsCommand::ReadFile { .. } => "readFile",
            VzfsCommand::UpdateFileTimestamp { .. } => "updateFileTimestamp",
            VzfsCommand::UpdateFileContent { .. } => "updateFileContent",
            VzfsCommand::DeleteFile { .. } => "deleteFile",
            VzfsCommand::CreateDirectory { .. } => "createDirectory",
            VzfsCommand::GetDirectoryRecord { .. } => "getDirectoryRecord",
            VzfsCommand::EmptyDirectory { .. } => "emptyDirectory",
            VzfsCommand::DeleteDirectoryIfEmpty { .. } => "deleteDirectoryIfEmpty",
            VzfsCommand::RenameFile { .. } => "renameFile",
            VzfsCommand::MoveFile { .. } => "moveFile",
            VzfsCommand::MoveDirectory { .. } => "moveDirectory",
            VzfsCommand::RipFilesystemToJson => "ripFilesystemToJSON",
            VzfsCommand::Close => "close",
        }
    }
}
