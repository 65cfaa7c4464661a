// vzfs-lib carries everything the store crate and the operator crate share:
// the error enum, the persisted record types, the pure path normalizer and
// the typed command/reply protocol spoken over the actor channels.

mod fs_types;
pub mod path;
mod protocol;

pub use fs_types::{
    ContentRecord, DirectoryRecord, Entity, FileRecord, FsBackup, LockRecord,
    DEFAULT_LOCK_DURATION_MS,
};
pub use protocol::{VzfsCommand, VzfsReply};

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error kinds surfaced by the vzfs core. Failure replies carry these
/// verbatim; the `Display` rendering is the human-readable message.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VzfsError {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("not a file: {0}")]
    NotALeaf(String),

    #[error("not a directory: {0}")]
    NotADirectory(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("directory not empty: {0}")]
    NotEmpty(String),

    #[error("directory already empty: {0}")]
    AlreadyEmpty(String),

    #[error("lock contended: {0}")]
    Contended(String),

    #[error("store error: {0}")]
    StoreError(String),
}

impl VzfsError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, VzfsError::NotFound(_))
    }

    pub fn is_exists(&self) -> bool {
        matches!(self, VzfsError::Exists(_))
    }

    pub fn is_contended(&self) -> bool {
        matches!(self, VzfsError::Contended(_))
    }

    pub fn store(msg: impl Into<String>) -> Self {
        VzfsError::StoreError(msg.into())
    }
}

pub type VzfsResult<T> = std::result::Result<T, VzfsError>;
