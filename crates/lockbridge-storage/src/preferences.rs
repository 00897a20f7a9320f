//! Key-value preference store.
//!
//! Runtime settings that the gateway changes itself (ACL tables, network
//! hardware selection, restart policy, published entry counts) live in the
//! `preferences` table and take precedence over the configuration file.

use lockbridge_core::constants::{DEFAULT_MAX_RETRIES, DEFAULT_RETRY_DELAY_MS};
use lockbridge_core::{ACTION_ACL_BITS, ConfigTier, DeviceKind, DynamicList, config_fields};
use sqlx::SqlitePool;
use tracing::{debug, info, warn};

use crate::acl::{AclBits, AclTable};
use crate::connection::Database;
use crate::error::{StorageError, StorageResult};

pub const KEY_ACL_ACTIONS: &str = "aclLckOpn";
pub const KEY_ACL_VERSION: &str = "aclVersion";
pub const KEY_NETWORK_HARDWARE: &str = "networkHardware";
pub const KEY_MAX_RETRIES: &str = "maxRetries";
pub const KEY_RETRY_DELAY_MS: &str = "retryDelayMs";
pub const KEY_RESTART_ON_DISCONNECT: &str = "restartOnDisconnect";
pub const KEY_NETWORK_TIMEOUT_SECS: &str = "networkTimeout";

/// Hardware selected by the safe defaults and the wireless fallback.
pub const SAFE_NETWORK_HARDWARE: &str = "wifi";

const UPSERT: &str = r#"
    INSERT INTO preferences (key, value) VALUES (?, ?)
    ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
"#;

/// Preference key of one configuration ACL tier.
pub fn config_acl_key(kind: DeviceKind, tier: ConfigTier) -> &'static str {
    match (kind, tier) {
        (DeviceKind::Lock, ConfigTier::Basic) => "confLckBasAcl",
        (DeviceKind::Lock, ConfigTier::Advanced) => "confLckAdvAcl",
        (DeviceKind::Opener, ConfigTier::Basic) => "confOpnBasAcl",
        (DeviceKind::Opener, ConfigTier::Advanced) => "confOpnAdvAcl",
    }
}

/// Preference key holding how many entries of `list` were last published.
pub fn max_entries_key(kind: DeviceKind, list: DynamicList) -> String {
    format!("{}_{}_max", kind.as_str(), list.object_prefix())
}

/// SQLite-backed preference store.
#[derive(Debug, Clone)]
pub struct PreferenceStore {
    pool: SqlitePool,
}

impl PreferenceStore {
    pub fn new(database: &Database) -> Self {
        Self {
            pool: database.pool().clone(),
        }
    }

    pub async fn get_bytes(&self, key: &str) -> StorageResult<Option<Vec<u8>>> {
        let value = sqlx::query_scalar::<_, Vec<u8>>("SELECT value FROM preferences WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(value)
    }

    pub async fn put_bytes(&self, key: &str, value: &[u8]) -> StorageResult<()> {
        sqlx::query(UPSERT)
            .bind(key)
            .bind(value)
            .execute(&self.pool)
            .await?;
        debug!("Stored preference {} ({} bytes)", key, value.len());
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> StorageResult<()> {
        sqlx::query("DELETE FROM preferences WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn get_bool(&self, key: &str) -> StorageResult<Option<bool>> {
        match self.get_bytes(key).await?.as_deref() {
            None => Ok(None),
            Some([value]) => Ok(Some(*value != 0)),
            Some(other) => Err(StorageError::corrupt(
                key,
                format!("expected 1 byte, found {}", other.len()),
            )),
        }
    }

    pub async fn put_bool(&self, key: &str, value: bool) -> StorageResult<()> {
        self.put_bytes(key, &[u8::from(value)]).await
    }

    pub async fn get_i64(&self, key: &str) -> StorageResult<Option<i64>> {
        let Some(bytes) = self.get_bytes(key).await? else {
            return Ok(None);
        };
        let bytes: [u8; 8] = bytes.as_slice().try_into().map_err(|_| {
            StorageError::corrupt(key, format!("expected 8 bytes, found {}", bytes.len()))
        })?;
        Ok(Some(i64::from_le_bytes(bytes)))
    }

    pub async fn put_i64(&self, key: &str, value: i64) -> StorageResult<()> {
        self.put_bytes(key, &value.to_le_bytes()).await
    }

    pub async fn get_string(&self, key: &str) -> StorageResult<Option<String>> {
        match self.get_bytes(key).await? {
            None => Ok(None),
            Some(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StorageError::corrupt(key, e.to_string())),
        }
    }

    pub async fn put_string(&self, key: &str, value: &str) -> StorageResult<()> {
        self.put_bytes(key, value.as_bytes()).await
    }

    /// Load the ACL.
    ///
    /// A missing or corrupt table is replaced by an all-deny table of the
    /// right size; the other tables are unaffected.
    pub async fn load_acl(&self) -> StorageResult<AclTable> {
        let version = match self.get_i64(KEY_ACL_VERSION).await {
            Ok(version) => version.unwrap_or(0).max(0) as u64,
            Err(e) => {
                warn!("{}", e);
                0
            }
        };
        let mut table = AclTable::deny_all().with_version(version);

        table.set_actions(self.load_bits(KEY_ACL_ACTIONS, ACTION_ACL_BITS).await?);
        for kind in [DeviceKind::Lock, DeviceKind::Opener] {
            for tier in [ConfigTier::Basic, ConfigTier::Advanced] {
                let key = config_acl_key(kind, tier);
                let bits = self.load_bits(key, config_fields(kind, tier).len()).await?;
                table.set_config(kind, tier, bits);
            }
        }
        Ok(table)
    }

    async fn load_bits(&self, key: &str, len: usize) -> StorageResult<AclBits> {
        match self.get_bytes(key).await? {
            None => {
                debug!("ACL {} not set, denying all", key);
                Ok(AclBits::deny_all(len))
            }
            Some(blob) => Ok(AclBits::from_blob(&blob, len).unwrap_or_else(|| {
                warn!("ACL {} is corrupt ({} bytes), denying all", key, blob.len());
                AclBits::deny_all(len)
            })),
        }
    }

    /// Store every table of `table` in one transaction, under a new version.
    ///
    /// Returns the stored version.
    pub async fn save_acl(&self, table: &AclTable) -> StorageResult<u64> {
        let version = table.version() + 1;
        let mut tx = self.pool.begin().await?;

        let mut entries = vec![(KEY_ACL_ACTIONS, table.actions().to_blob())];
        for kind in [DeviceKind::Lock, DeviceKind::Opener] {
            for tier in [ConfigTier::Basic, ConfigTier::Advanced] {
                entries.push((config_acl_key(kind, tier), table.config(kind, tier).to_blob()));
            }
        }
        entries.push((KEY_ACL_VERSION, (version as i64).to_le_bytes().to_vec()));

        for (key, value) in entries {
            sqlx::query(UPSERT)
                .bind(key)
                .bind(value)
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!("Stored ACL version {}", version);
        Ok(version)
    }

    pub async fn max_entries(&self, kind: DeviceKind, list: DynamicList) -> StorageResult<usize> {
        let count = self.get_i64(&max_entries_key(kind, list)).await?.unwrap_or(0);
        Ok(usize::try_from(count).unwrap_or(0))
    }

    pub async fn set_max_entries(
        &self,
        kind: DeviceKind,
        list: DynamicList,
        count: usize,
    ) -> StorageResult<()> {
        let count = i64::try_from(count)
            .map_err(|_| StorageError::Configuration(format!("entry count {count} too large")))?;
        self.put_i64(&max_entries_key(kind, list), count).await
    }

    /// Reset network and retry settings to values that are known to boot.
    ///
    /// The ACL is left untouched.
    pub async fn apply_safe_defaults(&self) -> StorageResult<()> {
        warn!("Resetting preferences to safe defaults");
        self.put_string(KEY_NETWORK_HARDWARE, SAFE_NETWORK_HARDWARE).await?;
        self.put_i64(KEY_MAX_RETRIES, i64::from(DEFAULT_MAX_RETRIES)).await?;
        self.put_i64(KEY_RETRY_DELAY_MS, i64::from(DEFAULT_RETRY_DELAY_MS)).await?;
        self.put_bool(KEY_RESTART_ON_DISCONNECT, false).await?;
        self.remove(KEY_NETWORK_TIMEOUT_SECS).await?;
        Ok(())
    }
}
