use tempfile::TempDir;

use vzfs_lib::{ContentRecord, Entity, LockRecord};

use crate::store_db::FsDb;

fn open_test_db() -> (FsDb, TempDir) {
    let tmp = TempDir::new().unwrap();
    let db = FsDb::open(&tmp.path().join("test.db"), 1).unwrap();
    (db, tmp)
}

fn dir_entity(path: &str, name: &str, parent: Option<&str>) -> Entity {
    Entity {
        name: name.to_string(),
        path: path.to_string(),
        is_leaf: false,
        parent_path: parent.map(str::to_string),
        created_at: 1000,
        updated_at: 1000,
    }
}

fn leaf_entity(path: &str, name: &str, parent: &str) -> Entity {
    Entity {
        name: name.to_string(),
        path: path.to_string(),
        is_leaf: true,
        parent_path: Some(parent.to_string()),
        created_at: 1000,
        updated_at: 1000,
    }
}

async fn seed_tree(db: &FsDb) {
    // /
    // ├── a/
    // │   ├── f1
    // │   └── sub/
    // │       └── f2
    // └── b/
    db.seed_root().await.unwrap();
    db.insert_entity(&dir_entity("/a/", "a", Some("/"))).await.unwrap();
    db.insert_entity(&dir_entity("/b/", "b", Some("/"))).await.unwrap();
    db.insert_entity(&leaf_entity("/a/f1", "f1", "/a/")).await.unwrap();
    db.insert_entity(&dir_entity("/a/sub/", "sub", Some("/a/")))
        .await
        .unwrap();
    db.insert_entity(&leaf_entity("/a/sub/f2", "f2", "/a/sub/"))
        .await
        .unwrap();
    db.put_content(&ContentRecord {
        leaf_path: "/a/f1".to_string(),
        content: "one".to_string(),
    })
    .await
    .unwrap();
    db.put_content(&ContentRecord {
        leaf_path: "/a/sub/f2".to_string(),
        content: "two".to_string(),
    })
    .await
    .unwrap();
}

#[tokio::test]
async fn test_seed_root_is_idempotent() {
    let (db, _tmp) = open_test_db();
    assert!(db.seed_root().await.unwrap());
    // Second seeding hits the primary key and counts as success.
    assert!(!db.seed_root().await.unwrap());

    let root = db.get_entity("/").await.unwrap().unwrap();
    assert_eq!(root.name, "");
    assert!(!root.is_leaf);
    assert!(root.parent_path.is_none());
}

#[tokio::test]
async fn test_reopen_at_same_version_keeps_data() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("test.db");
    {
        let db = FsDb::open(&db_path, 1).unwrap();
        db.seed_root().await.unwrap();
    }
    let db = FsDb::open(&db_path, 1).unwrap();
    assert!(db.get_entity("/").await.unwrap().is_some());
}

#[tokio::test]
async fn test_insert_entity_duplicate_path_is_constraint() {
    let (db, _tmp) = open_test_db();
    seed_tree(&db).await;

    let err = db
        .insert_entity(&leaf_entity("/a/f1", "f1", "/a/"))
        .await
        .unwrap_err();
    assert!(err.is_constraint());
}

#[tokio::test]
async fn test_sibling_name_uniqueness_is_constraint() {
    let (db, _tmp) = open_test_db();
    seed_tree(&db).await;

    // Distinct primary key, same (parent_path, name) pair.
    let err = db
        .insert_entity(&dir_entity("/a/f1/", "f1", Some("/a/")))
        .await
        .unwrap_err();
    assert!(err.is_constraint());
}

#[tokio::test]
async fn test_prefix_range_is_inclusive_of_the_prefix() {
    let (db, _tmp) = open_test_db();
    seed_tree(&db).await;

    let all = db.get_entities_with_prefix("/a/").await.unwrap();
    let paths: Vec<&str> = all.iter().map(|e| e.path.as_str()).collect();
    assert_eq!(paths, vec!["/a/", "/a/f1", "/a/sub/", "/a/sub/f2"]);
}

#[tokio::test]
async fn test_child_keys_and_counts() {
    let (db, _tmp) = open_test_db();
    seed_tree(&db).await;

    assert_eq!(
        db.get_child_keys("/a/").await.unwrap(),
        vec!["/a/f1".to_string(), "/a/sub/".to_string()]
    );
    assert_eq!(db.count_children("/a/").await.unwrap(), 2);
    assert_eq!(db.count_children("/b/").await.unwrap(), 0);
    assert_eq!(db.count_sibling("/a/", "f1").await.unwrap(), 1);
    assert_eq!(db.count_sibling("/a/", "nope").await.unwrap(), 0);
}

#[tokio::test]
async fn test_delete_descendants_preserves_the_directory_itself() {
    let (db, _tmp) = open_test_db();
    seed_tree(&db).await;

    let leaves = db.delete_descendants("/a/").await.unwrap();
    assert_eq!(leaves, vec!["/a/f1".to_string(), "/a/sub/f2".to_string()]);

    // Exclusive lower bound: "/a/" survives, everything below is gone.
    assert!(db.get_entity("/a/").await.unwrap().is_some());
    assert!(db.get_entity("/a/f1").await.unwrap().is_none());
    assert!(db.get_entity("/a/sub/").await.unwrap().is_none());
    assert_eq!(db.count_children("/a/").await.unwrap(), 0);
}

#[tokio::test]
async fn test_rewrite_descendants_moves_subtree_in_order() {
    let (db, _tmp) = open_test_db();
    seed_tree(&db).await;

    let moved = db.rewrite_descendants("/a/", "/b/", 2000).await.unwrap();
    assert_eq!(
        moved,
        vec![
            ("/a/f1".to_string(), "/b/f1".to_string()),
            ("/a/sub/f2".to_string(), "/b/sub/f2".to_string()),
        ]
    );
    db.rewrite_content_keys(&moved).await.unwrap();

    // The subtree root itself is untouched (exclusive lower bound).
    assert!(db.get_entity("/a/").await.unwrap().is_some());

    let f1 = db.get_entity("/b/f1").await.unwrap().unwrap();
    assert_eq!(f1.parent_path.as_deref(), Some("/b/"));
    assert_eq!(f1.updated_at, 2000);

    let sub = db.get_entity("/b/sub/").await.unwrap().unwrap();
    assert_eq!(sub.parent_path.as_deref(), Some("/b/"));
    let f2 = db.get_entity("/b/sub/f2").await.unwrap().unwrap();
    assert_eq!(f2.parent_path.as_deref(), Some("/b/sub/"));

    let c = db.get_content("/b/sub/f2").await.unwrap().unwrap();
    assert_eq!(c.content, "two");
    assert!(db.get_content("/a/sub/f2").await.unwrap().is_none());
}

#[tokio::test]
async fn test_touch_entity() {
    let (db, _tmp) = open_test_db();
    seed_tree(&db).await;

    assert_eq!(db.touch_entity("/a/f1", 9999).await.unwrap(), 1);
    assert_eq!(db.touch_entity("/missing", 9999).await.unwrap(), 0);
    let e = db.get_entity("/a/f1").await.unwrap().unwrap();
    assert_eq!(e.updated_at, 9999);
    assert_eq!(e.created_at, 1000);
}

#[tokio::test]
async fn test_lock_insert_collision_is_constraint() {
    let (db, _tmp) = open_test_db();
    let lock = LockRecord {
        path_prefix: "/a/".to_string(),
        expiry: 10_000,
        created_at: 5_000,
    };
    db.insert_lock(&lock).await.unwrap();
    let err = db.insert_lock(&lock).await.unwrap_err();
    assert!(err.is_constraint());

    assert_eq!(db.delete_lock("/a/").await.unwrap(), 1);
    assert_eq!(db.delete_lock("/a/").await.unwrap(), 0);
}

#[tokio::test]
async fn test_lock_expiry_index_queries() {
    let (db, _tmp) = open_test_db();
    for (prefix, expiry) in [("/a/", 100u64), ("/b/", 200), ("/c/", 300)] {
        db.insert_lock(&LockRecord {
            path_prefix: prefix.to_string(),
            expiry,
            created_at: 1,
        })
        .await
        .unwrap();
    }

    let unexpired = db.get_unexpired_locks(200).await.unwrap();
    assert_eq!(unexpired.len(), 1);
    assert_eq!(unexpired[0].path_prefix, "/c/");

    let expired = db.get_expired_lock_prefixes(200).await.unwrap();
    assert_eq!(expired, vec!["/a/".to_string(), "/b/".to_string()]);
}

#[tokio::test]
async fn test_export_backup_covers_all_stores() {
    let (db, _tmp) = open_test_db();
    seed_tree(&db).await;
    db.insert_lock(&LockRecord {
        path_prefix: "/a/".to_string(),
        expiry: 42,
        created_at: 1,
    })
    .await
    .unwrap();

    let backup = db.export_backup().await.unwrap();
    assert_eq!(backup.entity.len(), 6);
    assert_eq!(backup.content.len(), 2);
    assert_eq!(backup.lock.len(), 1);
}

#[tokio::test]
async fn test_two_handles_share_one_database_file() {
    let tmp = TempDir::new().unwrap();
    let db_path = tmp.path().join("shared.db");
    let a = FsDb::open(&db_path, 1).unwrap();
    let b = FsDb::open(&db_path, 1).unwrap();

    a.seed_root().await.unwrap();
    assert!(b.get_entity("/").await.unwrap().is_some());

    // The unique key arbitrates between handles exactly as between tabs.
    b.insert_lock(&LockRecord {
        path_prefix: "/".to_string(),
        expiry: u64::MAX / 2,
        created_at: 0,
    })
    .await
    .unwrap();
    let err = a
        .insert_lock(&LockRecord {
            path_prefix: "/".to_string(),
            expiry: u64::MAX / 2,
            created_at: 0,
        })
        .await
        .unwrap_err();
    assert!(err.is_constraint());
}
