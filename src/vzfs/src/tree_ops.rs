//! Multi-step domain operations on the materialized-path tree.
//!
//! Each operation composes store primitives outside any single
//! transaction; cross-transaction safety comes from the path-prefix lock
//! the operator holds around the call.

use log::warn;
use std::time::{SystemTime, UNIX_EPOCH};

use vzfs_lib::path::{abs_path_to_pieces, normalize, validate_name};
use vzfs_lib::{ContentRecord, Entity, FileRecord, VzfsError, VzfsResult};
use vzfs_store::FsDb;

fn unix_timestamp_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[derive(Clone)]
pub struct TreeOps {
    db: FsDb,
}

impl TreeOps {
    pub fn new(db: FsDb) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &FsDb {
        &self.db
    }

    async fn require_entity(&self, path: &str) -> VzfsResult<Entity> {
        self.db
            .get_entity(path)
            .await
            .map_err(VzfsError::from)?
            .ok_or_else(|| VzfsError::NotFound(path.to_string()))
    }

    /// Resolve `p` against `cwd` and fetch the entity at the canonical
    /// path. Directory entities are addressed with their trailing-`/`
    /// form.
    pub async fn get_entity(&self, cwd: &str, p: &str) -> VzfsResult<Entity> {
        let n = normalize(p, &abs_path_to_pieces(cwd))?;
        self.require_entity(&n).await
    }

    /// All entities whose path starts with the normalized prefix, the
    /// prefix row included.
    pub async fn get_entities_by_prefix(&self, cwd: &str, p: &str) -> VzfsResult<Vec<Entity>> {
        let n = normalize(p, &abs_path_to_pieces(cwd))?;
        self.db
            .get_entities_with_prefix(&n)
            .await
            .map_err(VzfsError::from)
    }

    /// Primary keys of the direct children of the directory at `p`.
    pub async fn get_immediate_child_keys(&self, cwd: &str, p: &str) -> VzfsResult<Vec<String>> {
        let dir = self.get_entity(cwd, p).await?;
        if dir.is_leaf {
            return Err(VzfsError::NotADirectory(dir.path));
        }
        self.db.get_child_keys(&dir.path).await.map_err(VzfsError::from)
    }

    /// Join a leaf with its content row. A missing row reads as `None`
    /// rather than failing, so reads stay total.
    pub async fn join_content_to_leaf(&self, leaf: &Entity) -> VzfsResult<FileRecord> {
        let content = self
            .db
            .get_content(&leaf.path)
            .await
            .map_err(VzfsError::from)?;
        Ok(FileRecord {
            entity: leaf.clone(),
            content: content.map(|c| c.content),
        })
    }

    /// Create a leaf named `name` under the directory at `parent_path`
    /// and write its content row. Returns the new canonical path.
    pub async fn add_file_entity(
        &self,
        cwd: &str,
        name: &str,
        parent_path: &str,
        body: String,
    ) -> VzfsResult<String> {
        let parent = self.get_entity(cwd, parent_path).await?;
        if parent.is_leaf {
            return Err(VzfsError::NotADirectory(parent.path));
        }
        validate_name(name)?;

        let new_path = normalize(&format!("{}{}", parent.path, name), &[])?;
        let now = unix_timestamp_ms();
        let entity = Entity {
            name: name.to_string(),
            path: new_path.clone(),
            is_leaf: true,
            parent_path: Some(parent.path),
            created_at: now,
            updated_at: now,
        };
        match self.db.insert_entity(&entity).await {
            Ok(()) => {}
            Err(e) if e.is_constraint() => return Err(VzfsError::Exists(new_path)),
            Err(e) => return Err(e.into()),
        }
        self.db
            .put_content(&ContentRecord {
                leaf_path: new_path.clone(),
                content: body,
            })
            .await
            .map_err(VzfsError::from)?;
        Ok(new_path)
    }

    /// Create a directory named `name` under `parent_path`. No content
    /// row; the canonical path carries the trailing `/`.
    pub async fn add_directory_entity(
        &self,
        cwd: &str,
        name: &str,
        parent_path: &str,
    ) -> VzfsResult<String> {
        let parent = self.get_entity(cwd, parent_path).await?;
        if parent.is_leaf {
            return Err(VzfsError::NotADirectory(parent.path));
        }
        validate_name(name)?;

        let new_path = normalize(&format!("{}{}/", parent.path, name), &[])?;
        let now = unix_timestamp_ms();
        let entity = Entity {
            name: name.to_string(),
            path: new_path.clone(),
            is_leaf: false,
            parent_path: Some(parent.path),
            created_at: now,
            updated_at: now,
        };
        match self.db.insert_entity(&entity).await {
            Ok(()) => Ok(new_path),
            Err(e) if e.is_constraint() => Err(VzfsError::Exists(new_path)),
            Err(e) => Err(e.into()),
        }
    }

    /// Delete a leaf and its content row.
    pub async fn delete_leaf_entity(&self, cwd: &str, p: &str) -> VzfsResult<()> {
        let leaf = self.get_entity(cwd, p).await?;
        if !leaf.is_leaf {
            return Err(VzfsError::NotALeaf(leaf.path));
        }
        self.db.delete_entity(&leaf.path).await.map_err(VzfsError::from)?;
        self.db
            .delete_content(&leaf.path)
            .await
            .map_err(VzfsError::from)?;
        Ok(())
    }

    /// Delete a childless directory. Refuses the root, the current
    /// working directory (or any ancestor of it), and non-empty targets.
    pub async fn delete_directory_if_empty(&self, cwd: &str, p: &str) -> VzfsResult<()> {
        let dir = self.get_entity(cwd, p).await?;
        if dir.is_leaf {
            return Err(VzfsError::NotADirectory(dir.path));
        }
        if dir.is_root() {
            return Err(VzfsError::InvalidPath(
                "cannot delete the root directory".to_string(),
            ));
        }
        if cwd.starts_with(&dir.path) {
            return Err(VzfsError::InvalidPath(format!(
                "cannot delete {}: it contains the current working directory",
                dir.path
            )));
        }
        let children = self.db.count_children(&dir.path).await.map_err(VzfsError::from)?;
        if children > 0 {
            return Err(VzfsError::NotEmpty(dir.path));
        }
        self.db.delete_entity(&dir.path).await.map_err(VzfsError::from)?;
        Ok(())
    }

    /// Delete everything below a directory, keeping the directory itself.
    /// Content rows of the removed leaves are cleaned up best-effort.
    pub async fn empty_directory(&self, cwd: &str, p: &str) -> VzfsResult<()> {
        let dir = self.get_entity(cwd, p).await?;
        if dir.is_leaf {
            return Err(VzfsError::NotADirectory(dir.path));
        }
        let children = self.db.count_children(&dir.path).await.map_err(VzfsError::from)?;
        if children == 0 {
            return Err(VzfsError::AlreadyEmpty(dir.path));
        }
        let leaves = self
            .db
            .delete_descendants(&dir.path)
            .await
            .map_err(VzfsError::from)?;
        for leaf_path in &leaves {
            if let Err(e) = self.db.delete_content(leaf_path).await {
                warn!("empty_directory: content cleanup for {} failed: {}", leaf_path, e);
            }
        }
        Ok(())
    }

    /// Overwrite a leaf's content and bump its `updated_at`.
    pub async fn update_file(&self, cwd: &str, p: &str, body: String) -> VzfsResult<()> {
        let leaf = self.get_entity(cwd, p).await?;
        if !leaf.is_leaf {
            return Err(VzfsError::NotALeaf(leaf.path));
        }
        self.db
            .touch_entity(&leaf.path, unix_timestamp_ms())
            .await
            .map_err(VzfsError::from)?;
        self.db
            .put_content(&ContentRecord {
                leaf_path: leaf.path,
                content: body,
            })
            .await
            .map_err(VzfsError::from)?;
        Ok(())
    }

    /// Bump a leaf's `updated_at` without touching its content.
    pub async fn update_file_timestamp(&self, cwd: &str, p: &str) -> VzfsResult<()> {
        let leaf = self.get_entity(cwd, p).await?;
        if !leaf.is_leaf {
            return Err(VzfsError::NotALeaf(leaf.path));
        }
        self.db
            .touch_entity(&leaf.path, unix_timestamp_ms())
            .await
            .map_err(VzfsError::from)?;
        Ok(())
    }

    /// Rename a leaf within its directory. Because `path` is the primary
    /// key this is a delete-then-insert pair; the destination is probed
    /// first so the destructive steps only run when they can succeed, and
    /// a late collision re-inserts the captured original rows.
    pub async fn rename_file(&self, cwd: &str, p: &str, new_name: &str) -> VzfsResult<String> {
        let leaf = self.get_entity(cwd, p).await?;
        if !leaf.is_leaf {
            return Err(VzfsError::NotALeaf(leaf.path));
        }
        validate_name(new_name)?;
        let parent_path = leaf
            .parent_path
            .clone()
            .ok_or_else(|| VzfsError::InvalidPath(leaf.path.clone()))?;
        let parent = self.require_entity(&parent_path).await?;
        let new_path = normalize(&format!("{}{}", parent.path, new_name), &[])?;

        if new_path == leaf.path {
            // Renaming to the current name refreshes the timestamp; the
            // destination probe would only count the leaf itself.
            self.db
                .touch_entity(&leaf.path, unix_timestamp_ms())
                .await
                .map_err(VzfsError::from)?;
            return Ok(new_path);
        }

        let taken = self
            .db
            .count_sibling(&parent.path, new_name)
            .await
            .map_err(VzfsError::from)?;
        if taken > 0 {
            return Err(VzfsError::Exists(new_path));
        }

        self.move_leaf_rows(&leaf, new_name, &parent.path, &new_path)
            .await?;
        Ok(new_path)
    }

    /// Move a leaf under another directory, keeping its name.
    pub async fn reparent_leaf(
        &self,
        cwd: &str,
        p: &str,
        new_parent_path: &str,
    ) -> VzfsResult<String> {
        let leaf = self.get_entity(cwd, p).await?;
        if !leaf.is_leaf {
            return Err(VzfsError::NotALeaf(leaf.path));
        }
        let new_parent = self.get_entity(cwd, new_parent_path).await?;
        if new_parent.is_leaf {
            return Err(VzfsError::NotADirectory(new_parent.path));
        }
        let new_path = normalize(&format!("{}{}", new_parent.path, leaf.name), &[])?;

        if new_path == leaf.path {
            self.db
                .touch_entity(&leaf.path, unix_timestamp_ms())
                .await
                .map_err(VzfsError::from)?;
            return Ok(new_path);
        }

        let taken = self
            .db
            .count_sibling(&new_parent.path, &leaf.name)
            .await
            .map_err(VzfsError::from)?;
        if taken > 0 {
            return Err(VzfsError::Exists(new_path));
        }

        let name = leaf.name.clone();
        self.move_leaf_rows(&leaf, &name, &new_parent.path, &new_path)
            .await?;
        Ok(new_path)
    }

    /// The shared delete-then-insert step of rename and reparent. Runs
    /// under the operator's lock; on a late constraint collision the
    /// captured original rows are re-inserted before `Exists` surfaces.
    async fn move_leaf_rows(
        &self,
        old: &Entity,
        new_name: &str,
        new_parent_path: &str,
        new_path: &str,
    ) -> VzfsResult<()> {
        let old_content = self
            .db
            .get_content(&old.path)
            .await
            .map_err(VzfsError::from)?;

        self.db.delete_entity(&old.path).await.map_err(VzfsError::from)?;
        self.db
            .delete_content(&old.path)
            .await
            .map_err(VzfsError::from)?;

        let new_entity = Entity {
            name: new_name.to_string(),
            path: new_path.to_string(),
            is_leaf: true,
            parent_path: Some(new_parent_path.to_string()),
            created_at: old.created_at,
            updated_at: unix_timestamp_ms(),
        };
        match self.db.insert_entity(&new_entity).await {
            Ok(()) => {}
            Err(e) => {
                let exists = e.is_constraint();
                if let Err(undo) = self.db.insert_entity(old).await {
                    warn!(
                        "move_leaf_rows: restoring {} after failed insert also failed: {}",
                        old.path, undo
                    );
                }
                if let Some(content) = &old_content {
                    if let Err(undo) = self.db.put_content(content).await {
                        warn!(
                            "move_leaf_rows: restoring content of {} failed: {}",
                            old.path, undo
                        );
                    }
                }
                if exists {
                    return Err(VzfsError::Exists(new_path.to_string()));
                }
                return Err(e.into());
            }
        }
        if let Some(content) = old_content {
            self.db
                .put_content(&ContentRecord {
                    leaf_path: new_path.to_string(),
                    content: content.content,
                })
                .await
                .map_err(VzfsError::from)?;
        }
        Ok(())
    }

    /// Rewrite every descendant of `old_parent_path` to live below
    /// `new_parent_path`, in ascending path order, content rows in
    /// lockstep. The subtree roots themselves are untouched. Returns the
    /// number of moved entities.
    pub async fn transplant_ancestors(
        &self,
        cwd: &str,
        old_parent_path: &str,
        new_parent_path: &str,
    ) -> VzfsResult<u64> {
        let old_parent = self.get_entity(cwd, old_parent_path).await?;
        if old_parent.is_leaf {
            return Err(VzfsError::NotADirectory(old_parent.path));
        }
        let new_parent = self.get_entity(cwd, new_parent_path).await?;
        if new_parent.is_leaf {
            return Err(VzfsError::NotADirectory(new_parent.path));
        }
        if new_parent.path.starts_with(&old_parent.path) {
            return Err(VzfsError::InvalidPath(format!(
                "cannot transplant {} into its own subtree {}",
                old_parent.path, new_parent.path
            )));
        }

        let descendants = self
            .db
            .get_entities_with_prefix(&old_parent.path)
            .await
            .map_err(VzfsError::from)?
            .len() as u64;

        let moved_leaves = match self
            .db
            .rewrite_descendants(&old_parent.path, &new_parent.path, unix_timestamp_ms())
            .await
        {
            Ok(moved) => moved,
            Err(e) if e.is_constraint() => {
                return Err(VzfsError::Exists(new_parent.path));
            }
            Err(e) => return Err(e.into()),
        };
        self.db
            .rewrite_content_keys(&moved_leaves)
            .await
            .map_err(VzfsError::from)?;

        // Range included the subtree root itself, which stays behind.
        Ok(descendants.saturating_sub(1))
    }
}
