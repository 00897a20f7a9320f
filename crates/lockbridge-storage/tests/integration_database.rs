//! Integration tests for the preference database and restart diagnostics
//!
//! These tests run against an in-memory SQLite database and temporary
//! directories.
//!
//! Run with: cargo test --package lockbridge-storage --test integration_database

use std::sync::Arc;

use lockbridge_core::{Action, ConfigField, ConfigTier, DeviceKind, LockAction, OpenerAction, RestartReason};
use lockbridge_storage::preferences::{
    KEY_ACL_ACTIONS, KEY_MAX_RETRIES, KEY_NETWORK_HARDWARE, KEY_RESTART_ON_DISCONNECT,
    config_acl_key,
};
use lockbridge_storage::{
    AclTable, BootloopPolicy, Database, MemoryRegion, PreferenceStore, RestartSupervisor,
};
use proptest::prelude::*;
use tokio::sync::Barrier;

#[tokio::test]
async fn test_migration_idempotency() {
    let db = Database::in_memory().await.unwrap();

    db.migrate().await.unwrap();
    db.migrate().await.unwrap();

    let result: (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='preferences'",
    )
    .fetch_one(db.pool())
    .await
    .unwrap();

    assert_eq!(result.0, 1);
    db.close().await;
}

#[tokio::test]
async fn test_missing_acl_denies_all() {
    let db = Database::in_memory().await.unwrap();
    let prefs = PreferenceStore::new(&db);

    let table = prefs.load_acl().await.unwrap();

    assert_eq!(table, AclTable::deny_all());
    assert_eq!(table.version(), 0);
}

#[tokio::test]
async fn test_acl_round_trip_bumps_version() {
    let db = Database::in_memory().await.unwrap();
    let prefs = PreferenceStore::new(&db);

    let table = AclTable::deny_all()
        .allow_action(Action::Lock(LockAction::Unlock), true)
        .allow_action(Action::Opener(OpenerAction::ElectricStrikeActuation), true)
        .allow_field(DeviceKind::Lock, "autoLockTimeOut", true);

    let version = prefs.save_acl(&table).await.unwrap();
    assert_eq!(version, 1);

    let loaded = prefs.load_acl().await.unwrap();
    assert_eq!(loaded.version(), 1);
    assert!(loaded.action_allowed(Action::Lock(LockAction::Unlock)));
    assert!(loaded.action_allowed(Action::Opener(OpenerAction::ElectricStrikeActuation)));
    assert!(!loaded.action_allowed(Action::Lock(LockAction::Unlatch)));

    let field = ConfigField::find(DeviceKind::Lock, "autoLockTimeOut").unwrap();
    assert_eq!(field.tier, ConfigTier::Advanced);
    assert!(loaded.field_allowed(DeviceKind::Lock, field));

    assert_eq!(prefs.save_acl(&loaded).await.unwrap(), 2);
}

#[tokio::test]
async fn test_corrupt_table_denies_only_that_table() {
    let db = Database::in_memory().await.unwrap();
    let prefs = PreferenceStore::new(&db);
    prefs.save_acl(&AclTable::allow_all()).await.unwrap();

    // one word short
    prefs.put_bytes(KEY_ACL_ACTIONS, &[1u8; 64]).await.unwrap();
    // a word that is neither 0 nor 1
    let mut advanced = vec![0u8; 20 * 4];
    advanced[0] = 2;
    prefs
        .put_bytes(config_acl_key(DeviceKind::Opener, ConfigTier::Advanced), &advanced)
        .await
        .unwrap();

    let loaded = prefs.load_acl().await.unwrap();
    for action in LockAction::ALL {
        assert!(!loaded.action_allowed(Action::Lock(action)));
    }
    let sound = ConfigField::find(DeviceKind::Opener, "soundLevel").unwrap();
    assert!(!loaded.field_allowed(DeviceKind::Opener, sound));
    let name = ConfigField::find(DeviceKind::Opener, "name").unwrap();
    assert!(loaded.field_allowed(DeviceKind::Opener, name));
}

#[tokio::test]
async fn test_safe_defaults_keep_acl() {
    let db = Database::in_memory().await.unwrap();
    let prefs = PreferenceStore::new(&db);
    prefs.save_acl(&AclTable::allow_all()).await.unwrap();
    prefs.put_string(KEY_NETWORK_HARDWARE, "w5500").await.unwrap();
    prefs.put_i64(KEY_MAX_RETRIES, 9).await.unwrap();
    prefs.put_bool(KEY_RESTART_ON_DISCONNECT, true).await.unwrap();

    prefs.apply_safe_defaults().await.unwrap();

    assert_eq!(
        prefs.get_string(KEY_NETWORK_HARDWARE).await.unwrap().as_deref(),
        Some("wifi")
    );
    assert_eq!(prefs.get_i64(KEY_MAX_RETRIES).await.unwrap(), Some(3));
    assert_eq!(prefs.get_bool(KEY_RESTART_ON_DISCONNECT).await.unwrap(), Some(false));
    assert!(prefs
        .load_acl()
        .await
        .unwrap()
        .action_allowed(Action::Lock(LockAction::Lock)));
}

#[tokio::test]
async fn test_bootloop_recovery_resets_preferences() {
    let db = Database::in_memory().await.unwrap();
    let prefs = PreferenceStore::new(&db);
    prefs.put_string(KEY_NETWORK_HARDWARE, "lan8720").await.unwrap();

    let region = MemoryRegion::new();
    let policy = BootloopPolicy {
        enable_reset: true,
        threshold: 2,
        ..BootloopPolicy::default()
    };
    let restarts = RestartSupervisor::new(region, policy);
    restarts.boot().unwrap();

    restarts
        .record_reason(RestartReason::NetworkTimeoutWatchdog)
        .unwrap();
    assert!(!restarts.boot().unwrap().bootloop_detected);

    restarts
        .record_reason(RestartReason::NetworkTimeoutWatchdog)
        .unwrap();
    let report = restarts.boot().unwrap();
    assert!(report.bootloop_detected);

    restarts.recover_from_bootloop(&prefs).await.unwrap();

    assert_eq!(restarts.bootloop_counter().unwrap(), 0);
    assert_eq!(
        prefs.get_string(KEY_NETWORK_HARDWARE).await.unwrap().as_deref(),
        Some("wifi")
    );
}

#[tokio::test]
async fn test_concurrent_writers() {
    let db = Database::in_memory().await.unwrap();
    let prefs = PreferenceStore::new(&db);

    const NUM_CONCURRENT_TASKS: usize = 8;
    let barrier = Arc::new(Barrier::new(NUM_CONCURRENT_TASKS));
    let mut handles = vec![];

    for i in 0..NUM_CONCURRENT_TASKS {
        let prefs = prefs.clone();
        let barrier = barrier.clone();
        handles.push(tokio::spawn(async move {
            barrier.wait().await;
            prefs.put_i64(&format!("key{i}"), i as i64).await.unwrap();
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    for i in 0..NUM_CONCURRENT_TASKS {
        let value = prefs.get_i64(&format!("key{i}")).await.unwrap();
        assert_eq!(value, Some(i as i64));
    }
}

proptest! {
    #[test]
    fn test_acl_blob_of_any_other_length_is_rejected(len in 0usize..200) {
        prop_assume!(len != 17 * 4);
        let blob = vec![1u8; len];
        prop_assert!(lockbridge_storage::AclBits::from_blob(&blob, 17).is_none());
    }
}
