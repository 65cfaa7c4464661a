use tempfile::TempDir;

use vzfs_lib::{ContentRecord, Entity, FsBackup, LockRecord, VzfsError};

use crate::store_mgr::FsStoreMgr;

fn test_mgr() -> (FsStoreMgr, TempDir) {
    let tmp = TempDir::new().unwrap();
    (FsStoreMgr::new(tmp.path()), tmp)
}

fn ms_now() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

#[tokio::test]
async fn test_list_filesystems_empty_when_base_dir_missing() {
    let tmp = TempDir::new().unwrap();
    let mgr = FsStoreMgr::new(tmp.path().join("does-not-exist"));
    assert!(mgr.list_filesystems().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_open_list_drop_round_trip() {
    let (mgr, _tmp) = test_mgr();

    let db = mgr.open_filesystem("alpha", 1).await.unwrap();
    db.seed_root().await.unwrap();
    drop(db);
    mgr.open_filesystem("beta", 1).await.unwrap();

    assert_eq!(
        mgr.list_filesystems().await.unwrap(),
        vec!["alpha".to_string(), "beta".to_string()]
    );

    mgr.drop_filesystem("alpha").await.unwrap();
    assert_eq!(mgr.list_filesystems().await.unwrap(), vec!["beta".to_string()]);

    let err = mgr.drop_filesystem("alpha").await.unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn test_fs_name_grammar_is_enforced() {
    let (mgr, _tmp) = test_mgr();
    for bad in ["", ".", "..", "a/b", "a b"] {
        assert!(
            matches!(
                mgr.open_filesystem(bad, 1).await,
                Err(VzfsError::InvalidPath(_))
            ),
            "name {:?} should be rejected",
            bad
        );
    }
}

#[tokio::test]
async fn test_export_restore_round_trip_drops_expired_locks() {
    let (mgr, _tmp) = test_mgr();
    let now = ms_now();

    let db = mgr.open_filesystem("source", 1).await.unwrap();
    db.seed_root().await.unwrap();
    db.insert_entity(&Entity {
        name: "f".to_string(),
        path: "/f".to_string(),
        is_leaf: true,
        parent_path: Some("/".to_string()),
        created_at: 1,
        updated_at: 1,
    })
    .await
    .unwrap();
    db.put_content(&ContentRecord {
        leaf_path: "/f".to_string(),
        content: "payload".to_string(),
    })
    .await
    .unwrap();
    db.insert_lock(&LockRecord {
        path_prefix: "/dead/".to_string(),
        expiry: 1,
        created_at: 1,
    })
    .await
    .unwrap();
    db.insert_lock(&LockRecord {
        path_prefix: "/live/".to_string(),
        expiry: now + 60_000,
        created_at: now,
    })
    .await
    .unwrap();

    let json = FsStoreMgr::export_to_json(&db).await.unwrap();
    mgr.restore_from_json("copy", 1, &json).await.unwrap();

    let copy = mgr.open_filesystem("copy", 1).await.unwrap();
    let restored = copy.export_backup().await.unwrap();
    let original = db.export_backup().await.unwrap();

    // Entities and content match the source as sets; only the expired
    // lock is gone.
    assert_eq!(restored.entity, original.entity);
    assert_eq!(restored.content, original.content);
    assert_eq!(restored.lock.len(), 1);
    assert_eq!(restored.lock[0].path_prefix, "/live/");
}

#[tokio::test]
async fn test_restore_refuses_existing_database() {
    let (mgr, _tmp) = test_mgr();
    mgr.open_filesystem("taken", 1).await.unwrap();

    let backup = serde_json::to_string(&FsBackup::default()).unwrap();
    let err = mgr.restore_from_json("taken", 1, &backup).await.unwrap_err();
    assert!(err.is_exists());
}

#[tokio::test]
async fn test_restore_rejects_malformed_backup() {
    let (mgr, _tmp) = test_mgr();
    let err = mgr
        .restore_from_json("fresh", 1, "this is not json")
        .await
        .unwrap_err();
    assert!(matches!(err, VzfsError::StoreError(_)));
}
