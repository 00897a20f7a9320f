//! Restart diagnostics that survive a warm reboot.
//!
//! The record lives in a [`RetainedRegion`]: memory that keeps its content
//! across a process or warm restart but not across power loss. On Linux that
//! is a file on a tmpfs such as `/run`. The region holds two independently
//! validated parts:
//!
//! | bytes  | content                           |
//! |--------|-----------------------------------|
//! | 0..4   | restart reason code, LE `u32`     |
//! | 4..12  | restart validity marker, LE `u64` |
//! | 12..16 | bootloop counter, LE `u32`        |
//! | 16..24 | bootloop validity marker, LE `u64`|
//!
//! A part is trusted only if its marker equals the part's sentinel.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use lockbridge_core::RestartReason;
use lockbridge_core::constants::{
    BOOTLOOP_RECORD_SENTINEL, DEFAULT_BOOTLOOP_THRESHOLD, DEFAULT_STABLE_UPTIME,
    RESTART_RECORD_SENTINEL,
};
use parking_lot::Mutex;
use tracing::{info, warn};

use crate::error::StorageResult;
use crate::preferences::PreferenceStore;

/// Size of the retained record in bytes.
pub const RECORD_LEN: usize = 24;

/// Marker written after the restart record has been read at boot.
const CONSUMED_MARKER: u64 = 0;

/// Memory that survives a warm reboot.
pub trait RetainedRegion: Send + Sync {
    /// Current content, or `None` if the region was lost (cold boot).
    fn load(&self) -> StorageResult<Option<Vec<u8>>>;

    /// Replace the content. Must be durable in the region when it returns.
    fn store(&self, bytes: &[u8]) -> StorageResult<()>;
}

/// Region backed by a file on a RAM-backed filesystem.
#[derive(Debug, Clone)]
pub struct FileRegion {
    path: PathBuf,
}

impl FileRegion {
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl RetainedRegion for FileRegion {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Writes a sibling temp file and renames it over the record, so a
    /// reset mid-write leaves either the old record or the new one.
    fn store(&self, bytes: &[u8]) -> StorageResult<()> {
        let parent = self.path.parent().filter(|p| !p.as_os_str().is_empty());
        if let Some(parent) = parent {
            std::fs::create_dir_all(parent)?;
        }
        let staging = self.staging_path();
        {
            let mut file = std::fs::File::create(&staging)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        if let Err(e) = std::fs::rename(&staging, &self.path) {
            let _ = std::fs::remove_file(&staging);
            return Err(e.into());
        }
        if let Some(parent) = parent
            && let Ok(dir) = std::fs::File::open(parent)
        {
            // directory fsync is not supported everywhere
            let _ = dir.sync_all();
        }
        Ok(())
    }
}

/// Region held in process memory, for tests.
///
/// Clones share the content, so dropping one supervisor and building another
/// over a clone simulates a warm reboot.
#[derive(Debug, Clone, Default)]
pub struct MemoryRegion {
    content: Arc<Mutex<Option<Vec<u8>>>>,
}

impl MemoryRegion {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lose the content, as a cold boot does.
    pub fn power_loss(&self) {
        *self.content.lock() = None;
    }
}

impl RetainedRegion for MemoryRegion {
    fn load(&self) -> StorageResult<Option<Vec<u8>>> {
        Ok(self.content.lock().clone())
    }

    fn store(&self, bytes: &[u8]) -> StorageResult<()> {
        *self.content.lock() = Some(bytes.to_vec());
        Ok(())
    }
}

/// Decoded content of the retained region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RestartRecord {
    pub reason_code: u32,
    pub validity_marker: u64,
    pub bootloop_counter: u32,
    pub bootloop_marker: u64,
}

impl RestartRecord {
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let mut bytes = [0u8; RECORD_LEN];
        bytes[0..4].copy_from_slice(&self.reason_code.to_le_bytes());
        bytes[4..12].copy_from_slice(&self.validity_marker.to_le_bytes());
        bytes[12..16].copy_from_slice(&self.bootloop_counter.to_le_bytes());
        bytes[16..24].copy_from_slice(&self.bootloop_marker.to_le_bytes());
        bytes
    }

    /// Decode `bytes`. Anything but exactly [`RECORD_LEN`] bytes decodes to
    /// a record with both markers invalid.
    pub fn from_bytes(bytes: &[u8]) -> Self {
        let Ok(bytes) = <&[u8; RECORD_LEN]>::try_from(bytes) else {
            return Self::default();
        };
        let u32_at = |at: usize| u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
        let u64_at = |at: usize| {
            let mut word = [0u8; 8];
            word.copy_from_slice(&bytes[at..at + 8]);
            u64::from_le_bytes(word)
        };
        Self {
            reason_code: u32_at(0),
            validity_marker: u64_at(4),
            bootloop_counter: u32_at(12),
            bootloop_marker: u64_at(16),
        }
    }

    fn bootloop_counter(&self) -> Option<u32> {
        (self.bootloop_marker == BOOTLOOP_RECORD_SENTINEL).then_some(self.bootloop_counter)
    }
}

/// Save/load/validate access to the retained restart record.
#[derive(Debug, Clone)]
pub struct PersistentDiagnostics<R> {
    region: R,
}

impl<R: RetainedRegion> PersistentDiagnostics<R> {
    pub fn new(region: R) -> Self {
        Self { region }
    }

    /// Read the region. `None` means the region was lost.
    pub fn load(&self) -> StorageResult<Option<RestartRecord>> {
        Ok(self
            .region
            .load()?
            .map(|bytes| RestartRecord::from_bytes(&bytes)))
    }

    pub fn store(&self, record: &RestartRecord) -> StorageResult<()> {
        self.region.store(&record.to_bytes())
    }

    /// Write `reason` with a valid marker, keeping the bootloop part.
    pub fn save(&self, reason: RestartReason) -> StorageResult<()> {
        let mut record = self.load()?.unwrap_or_default();
        record.reason_code = reason.code();
        record.validity_marker = RESTART_RECORD_SENTINEL;
        self.store(&record)
    }

    /// The recorded reason, if the record is trustworthy.
    pub fn validate(record: &RestartRecord) -> Option<RestartReason> {
        if record.validity_marker != RESTART_RECORD_SENTINEL {
            return None;
        }
        RestartReason::from_code(record.reason_code).ok()
    }
}

/// Bootloop mitigation settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootloopPolicy {
    /// Reset preferences to safe defaults when the threshold is reached.
    pub enable_reset: bool,
    /// Consecutive abnormal boots that count as a bootloop.
    pub threshold: u32,
    /// Uptime after which the boot counts as stable.
    pub stable_uptime: Duration,
}

impl Default for BootloopPolicy {
    fn default() -> Self {
        Self {
            enable_reset: false,
            threshold: DEFAULT_BOOTLOOP_THRESHOLD,
            stable_uptime: DEFAULT_STABLE_UPTIME,
        }
    }
}

/// What the diagnostics found at boot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BootReport {
    /// Reason recorded before the previous restart.
    pub last_reason: Option<RestartReason>,
    /// The retained region was lost: power-on or cold reset.
    pub cold_boot: bool,
    /// The previous run ended abnormally.
    pub abnormal: bool,
    pub bootloop_counter: u32,
    /// The counter reached the threshold and the reset is enabled.
    pub bootloop_detected: bool,
}

/// Records why the gateway restarts and detects boot loops.
#[derive(Debug)]
pub struct RestartSupervisor<R> {
    diagnostics: PersistentDiagnostics<R>,
    policy: BootloopPolicy,
}

impl<R: RetainedRegion> RestartSupervisor<R> {
    pub fn new(region: R, policy: BootloopPolicy) -> Self {
        Self {
            diagnostics: PersistentDiagnostics::new(region),
            policy,
        }
    }

    pub fn policy(&self) -> BootloopPolicy {
        self.policy
    }

    /// Persist `reason`. Call right before restarting; the record is durable
    /// when this returns.
    pub fn record_reason(&self, reason: RestartReason) -> StorageResult<()> {
        info!("Recording restart reason {}", reason);
        self.diagnostics.save(reason)
    }

    /// The reason recorded before the last restart, without consuming it.
    pub fn read_last_reason(&self) -> StorageResult<Option<RestartReason>> {
        Ok(self
            .diagnostics
            .load()?
            .and_then(|record| PersistentDiagnostics::<R>::validate(&record)))
    }

    /// Evaluate the previous run. Call once per boot.
    ///
    /// The restart record is consumed: a later boot that finds the region
    /// intact but the record consumed knows the run in between crashed.
    pub fn boot(&self) -> StorageResult<BootReport> {
        let loaded = self.diagnostics.load()?;
        let cold_boot = loaded.is_none();
        let record = loaded.unwrap_or_default();

        let last_reason = PersistentDiagnostics::<R>::validate(&record);
        let abnormal = match last_reason {
            Some(reason) => reason.is_abnormal(),
            None => !cold_boot && record.validity_marker == CONSUMED_MARKER,
        };

        let mut counter = record.bootloop_counter().unwrap_or(0);
        if abnormal {
            counter = counter.saturating_add(1);
        }

        self.diagnostics.store(&RestartRecord {
            reason_code: record.reason_code,
            validity_marker: CONSUMED_MARKER,
            bootloop_counter: counter,
            bootloop_marker: BOOTLOOP_RECORD_SENTINEL,
        })?;

        let bootloop_detected = self.policy.enable_reset && counter >= self.policy.threshold;
        match last_reason {
            Some(reason) => info!("Last restart reason: {} ({:?})", reason, reason.class()),
            None if cold_boot => info!("Cold boot"),
            None => warn!("Restart reason unknown, the previous run did not record one"),
        }
        if abnormal {
            warn!("Abnormal restart, bootloop counter at {}", counter);
        }

        Ok(BootReport {
            last_reason,
            cold_boot,
            abnormal,
            bootloop_counter: counter,
            bootloop_detected,
        })
    }

    pub fn bootloop_counter(&self) -> StorageResult<u32> {
        Ok(self
            .diagnostics
            .load()?
            .and_then(|record| record.bootloop_counter())
            .unwrap_or(0))
    }

    /// Reset the counter, once the boot has been stable long enough.
    pub fn clear_bootloop_counter(&self) -> StorageResult<()> {
        let mut record = self.diagnostics.load()?.unwrap_or_default();
        record.bootloop_counter = 0;
        record.bootloop_marker = BOOTLOOP_RECORD_SENTINEL;
        self.diagnostics.store(&record)
    }

    /// Apply the safe defaults after a detected bootloop and clear the
    /// counter.
    pub async fn recover_from_bootloop(&self, preferences: &PreferenceStore) -> StorageResult<()> {
        warn!(
            "Bootloop detected after {} abnormal restarts",
            self.policy.threshold
        );
        preferences.apply_safe_defaults().await?;
        self.clear_bootloop_counter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn supervisor(region: &MemoryRegion) -> RestartSupervisor<MemoryRegion> {
        RestartSupervisor::new(region.clone(), BootloopPolicy::default())
    }

    #[test]
    fn test_record_layout() {
        let record = RestartRecord {
            reason_code: 3,
            validity_marker: RESTART_RECORD_SENTINEL,
            bootloop_counter: 2,
            bootloop_marker: BOOTLOOP_RECORD_SENTINEL,
        };
        let bytes = record.to_bytes();
        assert_eq!(&bytes[0..4], &[3, 0, 0, 0]);
        assert_eq!(&bytes[4..12], &RESTART_RECORD_SENTINEL.to_le_bytes());
        assert_eq!(RestartRecord::from_bytes(&bytes), record);
    }

    #[test]
    fn test_short_region_is_untrusted() {
        let record = RestartRecord::from_bytes(&[1, 2, 3]);
        assert_eq!(PersistentDiagnostics::<MemoryRegion>::validate(&record), None);
        assert_eq!(record.bootloop_counter(), None);
    }

    #[test]
    fn test_warm_reboot_keeps_reason() {
        let region = MemoryRegion::new();
        supervisor(&region)
            .record_reason(RestartReason::ConfigurationUpdated)
            .unwrap();

        // new process, same retained memory
        let after = supervisor(&region);
        assert_eq!(
            after.read_last_reason().unwrap(),
            Some(RestartReason::ConfigurationUpdated)
        );
    }

    #[test]
    fn test_cold_boot_loses_reason() {
        let region = MemoryRegion::new();
        supervisor(&region)
            .record_reason(RestartReason::RequestedViaMqtt)
            .unwrap();
        region.power_loss();

        let after = supervisor(&region);
        assert_eq!(after.read_last_reason().unwrap(), None);
        let report = after.boot().unwrap();
        assert!(report.cold_boot);
        assert!(!report.abnormal);
        assert_eq!(report.bootloop_counter, 0);
    }

    #[test]
    fn test_wrong_marker_is_untrusted() {
        let region = MemoryRegion::new();
        let record = RestartRecord {
            reason_code: RestartReason::OtaCompleted.code(),
            validity_marker: RESTART_RECORD_SENTINEL ^ 1,
            ..RestartRecord::default()
        };
        region.store(&record.to_bytes()).unwrap();

        assert_eq!(supervisor(&region).read_last_reason().unwrap(), None);
    }

    #[test]
    fn test_boot_consumes_record() {
        let region = MemoryRegion::new();
        let supervisor = supervisor(&region);
        supervisor.record_reason(RestartReason::RequestedViaMqtt).unwrap();

        let report = supervisor.boot().unwrap();
        assert_eq!(report.last_reason, Some(RestartReason::RequestedViaMqtt));
        assert!(!report.abnormal);
        assert_eq!(supervisor.read_last_reason().unwrap(), None);
    }

    #[rstest]
    #[case(RestartReason::RestartOnDisconnectWatchdog, 1)]
    #[case(RestartReason::NetworkDeviceCriticalFailure, 1)]
    #[case(RestartReason::RequestedViaMqtt, 0)]
    #[case(RestartReason::OtaCompleted, 0)]
    fn test_abnormal_reasons_count(#[case] reason: RestartReason, #[case] expected: u32) {
        let region = MemoryRegion::new();
        let supervisor = supervisor(&region);
        supervisor.boot().unwrap();

        supervisor.record_reason(reason).unwrap();
        assert_eq!(supervisor.boot().unwrap().bootloop_counter, expected);
    }

    #[test]
    fn test_crash_without_reason_counts() {
        let region = MemoryRegion::new();
        let supervisor = supervisor(&region);
        supervisor.boot().unwrap();

        // the next run dies without recording anything
        let report = supervisor.boot().unwrap();
        assert!(report.abnormal);
        assert_eq!(report.last_reason, None);
        assert_eq!(report.bootloop_counter, 1);
    }

    #[test]
    fn test_bootloop_detection_and_clear() {
        let region = MemoryRegion::new();
        let policy = BootloopPolicy {
            enable_reset: true,
            threshold: 3,
            ..BootloopPolicy::default()
        };
        let supervisor = RestartSupervisor::new(region.clone(), policy);
        supervisor.boot().unwrap();

        let mut detected = false;
        for _ in 0..3 {
            supervisor
                .record_reason(RestartReason::BleBeaconWatchdog)
                .unwrap();
            detected = supervisor.boot().unwrap().bootloop_detected;
        }
        assert!(detected);
        assert_eq!(supervisor.bootloop_counter().unwrap(), 3);

        supervisor.clear_bootloop_counter().unwrap();
        assert_eq!(supervisor.bootloop_counter().unwrap(), 0);
    }

    #[test]
    fn test_disabled_reset_never_detects() {
        let region = MemoryRegion::new();
        let policy = BootloopPolicy {
            threshold: 1,
            ..BootloopPolicy::default()
        };
        let supervisor = RestartSupervisor::new(region, policy);
        supervisor.boot().unwrap();
        supervisor.record_reason(RestartReason::WifiInitFailed).unwrap();

        let report = supervisor.boot().unwrap();
        assert_eq!(report.bootloop_counter, 1);
        assert!(!report.bootloop_detected);
    }

    #[test]
    fn test_file_region_round_trip() {
        let dir = tempfile::TempDir::new().unwrap();
        let region = FileRegion::new(dir.path().join("run/restart.bin"));
        assert!(region.load().unwrap().is_none());

        let supervisor = RestartSupervisor::new(region.clone(), BootloopPolicy::default());
        supervisor.record_reason(RestartReason::ReconfigureWifi).unwrap();

        let again = RestartSupervisor::new(region, BootloopPolicy::default());
        assert_eq!(
            again.read_last_reason().unwrap(),
            Some(RestartReason::ReconfigureWifi)
        );
    }

    #[test]
    fn test_file_region_store_replaces_whole_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("restart.bin");
        let region = FileRegion::new(&path);

        region.store(&[1u8; RECORD_LEN]).unwrap();
        region.store(&[2u8; RECORD_LEN]).unwrap();

        assert_eq!(region.load().unwrap(), Some(vec![2u8; RECORD_LEN]));
        let names: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|entry| entry.unwrap().file_name())
            .collect();
        assert_eq!(names, vec![std::ffi::OsString::from("restart.bin")]);
    }

    #[test]
    fn test_interrupted_store_keeps_previous_record() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("restart.bin");
        let region = FileRegion::new(&path);
        region.store(&[7u8; RECORD_LEN]).unwrap();

        // a reset between staging and rename leaves a partial temp file
        std::fs::write(region.staging_path(), [9u8; 3]).unwrap();

        assert_eq!(region.load().unwrap(), Some(vec![7u8; RECORD_LEN]));
        region.store(&[8u8; RECORD_LEN]).unwrap();
        assert_eq!(region.load().unwrap(), Some(vec![8u8; RECORD_LEN]));
        assert!(!region.staging_path().exists());
    }
}
