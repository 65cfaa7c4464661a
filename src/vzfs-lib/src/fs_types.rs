use serde::{Deserialize, Serialize};

/// Lock lifetime applied when a command does not carry `durationMs`.
pub const DEFAULT_LOCK_DURATION_MS: u64 = 5000;

/// One node of the materialized-path tree.
///
/// `path` is the canonical absolute path and the primary key: directory
/// paths end in `/`, leaf paths never do. `parent_path` is `None` only for
/// the root entity (`path == "/"`, `name == ""`). Timestamps are
/// millisecond Unix epochs.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub name: String,
    pub path: String,
    pub is_leaf: bool,
    pub parent_path: Option<String>,
    pub created_at: u64,
    pub updated_at: u64,
}

impl Entity {
    pub fn is_root(&self) -> bool {
        self.parent_path.is_none()
    }
}

/// Content body of one leaf, keyed by the leaf's entity path.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentRecord {
    pub leaf_path: String,
    pub content: String,
}

/// One advisory lock row. The primary key is the path prefix itself;
/// inserting a duplicate prefix is the contention signal.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRecord {
    pub path_prefix: String,
    pub expiry: u64,
    pub created_at: u64,
}

impl LockRecord {
    pub fn is_expired(&self, now: u64) -> bool {
        self.expiry <= now
    }
}

/// A leaf entity joined with its content row. A missing content row reads
/// as `content: None` so reads stay total.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    #[serde(flatten)]
    pub entity: Entity,
    pub content: Option<String>,
}

/// Payload of `getDirectoryRecordSuccess`. With a path, `entity` and
/// `child_keys` are populated; without one, only `cwd` is reported.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DirectoryRecord {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub entity: Option<Entity>,
    pub child_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub cwd: Option<String>,
}

/// The document produced by `ripFilesystemToJSON` and consumed by
/// `restoreFilesystemFromJSON`: the raw rows of the three stores.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FsBackup {
    pub entity: Vec<Entity>,
    pub content: Vec<ContentRecord>,
    pub lock: Vec<LockRecord>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_record_flattens_entity() {
        let record = FileRecord {
            entity: Entity {
                name: "a.txt".to_string(),
                path: "/a.txt".to_string(),
                is_leaf: true,
                parent_path: Some("/".to_string()),
                created_at: 1,
                updated_at: 2,
            },
            content: Some("body".to_string()),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["path"], "/a.txt");
        assert_eq!(json["parentPath"], "/");
        assert_eq!(json["isLeaf"], true);
        assert_eq!(json["content"], "body");
    }

    #[test]
    fn test_backup_round_trip() {
        let backup = FsBackup {
            entity: vec![Entity {
                name: String::new(),
                path: "/".to_string(),
                is_leaf: false,
                parent_path: None,
                created_at: 10,
                updated_at: 10,
            }],
            content: Vec::new(),
            lock: vec![LockRecord {
                path_prefix: "/a/".to_string(),
                expiry: 99,
                created_at: 42,
            }],
        };
        let json = serde_json::to_string(&backup).unwrap();
        let parsed: FsBackup = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, backup);
    }

    #[test]
    fn test_lock_expiry() {
        let lock = LockRecord {
            path_prefix: "/".to_string(),
            expiry: 100,
            created_at: 0,
        };
        assert!(lock.is_expired(100));
        assert!(lock.is_expired(101));
        assert!(!lock.is_expired(99));
    }
}
