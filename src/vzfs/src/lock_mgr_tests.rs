use std::time::{SystemTime, UNIX_EPOCH};
use tempfile::TempDir;

use vzfs_lib::LockRecord;
use vzfs_store::FsDb;

use crate::lock_mgr::LockManager;

fn ms_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

fn create_test_locks() -> (LockManager, FsDb, TempDir) {
    let tmp = TempDir::new().unwrap();
    let db = FsDb::open(&tmp.path().join("locks.db"), 1).unwrap();
    (LockManager::new(db.clone()), db, tmp)
}

#[tokio::test]
async fn test_lock_path_returns_normalized_prefix() {
    let (locks, db, _tmp) = create_test_locks();
    let prefix = locks.lock_path("/", "/a/b/../c/", 5000).await.unwrap();
    assert_eq!(prefix, "/a/c/");

    let record = db.get_lock("/a/c/").await.unwrap().unwrap();
    assert_eq!(record.expiry - record.created_at, 5000);
}

#[tokio::test]
async fn test_exact_collision_is_contended() {
    let (locks, _db, _tmp) = create_test_locks();
    locks.lock_path("/", "/a/", 60_000).await.unwrap();
    let err = locks.lock_path("/", "/a/", 60_000).await.unwrap_err();
    assert!(err.is_contended());
}

#[tokio::test]
async fn test_expired_holder_is_reclaimed_with_one_retry() {
    let (locks, db, _tmp) = create_test_locks();
    db.insert_lock(&LockRecord {
        path_prefix: "/a/".to_string(),
        expiry: ms_now().saturating_sub(10_000),
        created_at: 1,
    })
    .await
    .unwrap();

    let prefix = locks.lock_path("/", "/a/", 60_000).await.unwrap();
    assert_eq!(prefix, "/a/");
    let record = db.get_lock("/a/").await.unwrap().unwrap();
    assert!(record.expiry > ms_now().saturating_sub(1000));
}

#[tokio::test]
async fn test_remove_lock_is_best_effort() {
    let (locks, _db, _tmp) = create_test_locks();
    locks.lock_path("/", "/a/", 60_000).await.unwrap();
    assert_eq!(locks.remove_lock("/a/").await, 1);
    // A second release finds nothing and stays silent.
    assert_eq!(locks.remove_lock("/a/").await, 0);
}

#[tokio::test]
async fn test_overlapping_ancestor_lock_is_rejected() {
    let (locks, _db, tmp) = create_test_locks();

    // A sibling actor on the same database holds "/a/".
    let other_db = FsDb::open(&tmp.path().join("locks.db"), 1).unwrap();
    let other = LockManager::new(other_db);
    other.lock_path("/", "/a/", 60_000).await.unwrap();

    // A deeper prefix is a distinct key, so acquisition itself succeeds.
    let acquired = locks.lock_path("/", "/a/b/", 60_000).await.unwrap();
    let err = locks
        .reject_if_conflicting_prefixes(&[acquired.clone()], true)
        .await
        .unwrap_err();
    assert!(err.is_contended());
    locks.remove_lock(&acquired).await;
}

#[tokio::test]
async fn test_own_and_unrelated_locks_do_not_conflict() {
    let (locks, _db, _tmp) = create_test_locks();
    locks.lock_path("/", "/other/", 60_000).await.unwrap();
    let acquired = locks.lock_path("/", "/a/b/", 60_000).await.unwrap();

    // Neither the acquired lock itself nor a non-prefix sibling counts.
    locks
        .reject_if_conflicting_prefixes(&[acquired], true)
        .await
        .unwrap();
}

#[tokio::test]
async fn test_expired_ancestor_is_ignored_when_unexpired_only() {
    let (locks, db, _tmp) = create_test_locks();
    db.insert_lock(&LockRecord {
        path_prefix: "/a/".to_string(),
        expiry: ms_now().saturating_sub(10_000),
        created_at: 1,
    })
    .await
    .unwrap();

    let acquired = locks.lock_path("/", "/a/b/", 60_000).await.unwrap();
    locks
        .reject_if_conflicting_prefixes(&[acquired.clone()], true)
        .await
        .unwrap();
    // Without the expiry filter the stale row still counts.
    let err = locks
        .reject_if_conflicting_prefixes(&[acquired], false)
        .await
        .unwrap_err();
    assert!(err.is_contended());
}

#[tokio::test]
async fn test_prune_expired_locks() {
    let (locks, db, _tmp) = create_test_locks();
    let now = ms_now();
    db.insert_lock(&LockRecord {
        path_prefix: "/dead1/".to_string(),
        expiry: now.saturating_sub(10),
        created_at: 1,
    })
    .await
    .unwrap();
    db.insert_lock(&LockRecord {
        path_prefix: "/dead2/".to_string(),
        expiry: now.saturating_sub(5),
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

    assert_eq!(locks.prune_expired_locks().await.unwrap(), 2);

    let remaining = db.get_all_locks().await.unwrap();
    assert_eq!(remaining.len(), 1);
    assert_eq!(remaining[0].path_prefix, "/live/");
    // After a sweep no lock row is expired.
    assert!(db.get_expired_lock_prefixes(ms_now()).await.unwrap().is_empty());

    // An empty sweep is a no-op.
    assert_eq!(locks.prune_expired_locks().await.unwrap(), 0);
}

#[tokio::test]
async fn test_lock_path_rejects_invalid_paths() {
    let (locks, _db, _tmp) = create_test_locks();
    assert!(locks.lock_path("/", "", 5000).await.is_err());
    assert!(locks.lock_path("/", "/..", 5000).await.is_err());
}
