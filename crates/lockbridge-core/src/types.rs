use crate::{Result, error::Error};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Kind of device behind a bridge instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    /// Smart lock mounted on a door cylinder.
    Lock,
    /// Intercom opener driving an electric strike.
    Opener,
}

impl DeviceKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Opener => "opener",
        }
    }
}

impl fmt::Display for DeviceKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Accept both `lockNgo` and `LockNgo` for a canonical `lockNgo`.
fn matches_name(input: &str, canonical: &str) -> bool {
    let mut input_chars = input.chars();
    let mut canonical_chars = canonical.chars();
    match (input_chars.next(), canonical_chars.next()) {
        (Some(a), Some(b)) if a.to_ascii_lowercase() == b => {
            input_chars.as_str() == canonical_chars.as_str()
        }
        _ => false,
    }
}

/// Actions a lock accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockAction {
    Lock,
    Unlock,
    Unlatch,
    LockNgo,
    LockNgoUnlatch,
    FullLock,
    FobAction1,
    FobAction2,
    FobAction3,
}

impl LockAction {
    pub const ALL: [LockAction; 9] = [
        Self::Lock,
        Self::Unlock,
        Self::Unlatch,
        Self::LockNgo,
        Self::LockNgoUnlatch,
        Self::FullLock,
        Self::FobAction1,
        Self::FobAction2,
        Self::FobAction3,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lock => "lock",
            Self::Unlock => "unlock",
            Self::Unlatch => "unlatch",
            Self::LockNgo => "lockNgo",
            Self::LockNgoUnlatch => "lockNgoUnlatch",
            Self::FullLock => "fullLock",
            Self::FobAction1 => "fobAction1",
            Self::FobAction2 => "fobAction2",
            Self::FobAction3 => "fobAction3",
        }
    }

    /// Position of this action in the lock's ACL bit array.
    pub fn acl_bit(self) -> usize {
        match self {
            Self::Lock => 0,
            Self::Unlock => 1,
            Self::Unlatch => 2,
            Self::LockNgo => 3,
            Self::LockNgoUnlatch => 4,
            Self::FullLock => 5,
            Self::FobAction1 => 6,
            Self::FobAction2 => 7,
            Self::FobAction3 => 8,
        }
    }

    fn parse(input: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|action| matches_name(input, action.as_str()))
    }
}

/// Actions an opener accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OpenerAction {
    ActivateRto,
    DeactivateRto,
    ElectricStrikeActuation,
    ActivateContinuousMode,
    DeactivateContinuousMode,
    FobAction1,
    FobAction2,
    FobAction3,
}

impl OpenerAction {
    pub const ALL: [OpenerAction; 8] = [
        Self::ActivateRto,
        Self::DeactivateRto,
        Self::ElectricStrikeActuation,
        Self::ActivateContinuousMode,
        Self::DeactivateContinuousMode,
        Self::FobAction1,
        Self::FobAction2,
        Self::FobAction3,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ActivateRto => "activateRTO",
            Self::DeactivateRto => "deactivateRTO",
            Self::ElectricStrikeActuation => "electricStrikeActuation",
            Self::ActivateContinuousMode => "activateCM",
            Self::DeactivateContinuousMode => "deactivateCM",
            Self::FobAction1 => "fobAction1",
            Self::FobAction2 => "fobAction2",
            Self::FobAction3 => "fobAction3",
        }
    }

    /// Position of this action in the shared ACL bit array. Opener bits
    /// follow the nine lock bits.
    pub fn acl_bit(self) -> usize {
        match self {
            Self::ActivateRto => 9,
            Self::DeactivateRto => 10,
            Self::ElectricStrikeActuation => 11,
            Self::ActivateContinuousMode => 12,
            Self::DeactivateContinuousMode => 13,
            Self::FobAction1 => 14,
            Self::FobAction2 => 15,
            Self::FobAction3 => 16,
        }
    }

    fn parse(input: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|action| matches_name(input, action.as_str()))
    }
}

/// A command for either device kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Action {
    Lock(LockAction),
    Opener(OpenerAction),
}

/// Number of bits in the action ACL (9 lock + 8 opener).
pub const ACTION_ACL_BITS: usize = 17;

impl Action {
    /// Parse an action name for a device kind.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownAction`] for names that kind does not know,
    /// including the empty string.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockbridge_core::{Action, DeviceKind, LockAction};
    ///
    /// let action = Action::parse(DeviceKind::Lock, "Unlatch").unwrap();
    /// assert_eq!(action, Action::Lock(LockAction::Unlatch));
    /// assert!(Action::parse(DeviceKind::Opener, "unlatch").is_err());
    /// ```
    pub fn parse(kind: DeviceKind, input: &str) -> Result<Self> {
        let parsed = match kind {
            DeviceKind::Lock => LockAction::parse(input).map(Self::Lock),
            DeviceKind::Opener => OpenerAction::parse(input).map(Self::Opener),
        };
        parsed.ok_or_else(|| Error::UnknownAction(input.to_string()))
    }

    pub fn acl_bit(self) -> usize {
        match self {
            Self::Lock(action) => action.acl_bit(),
            Self::Opener(action) => action.acl_bit(),
        }
    }

    pub fn kind(self) -> DeviceKind {
        match self {
            Self::Lock(_) => DeviceKind::Lock,
            Self::Opener(_) => DeviceKind::Opener,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Lock(action) => action.as_str(),
            Self::Opener(action) => action.as_str(),
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result reported by the device driver for one command attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CmdResult {
    Success,
    Failed,
    TimeOut,
    Working,
    NotPaired,
    Error,
}

impl CmdResult {
    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failed => "failed",
            Self::TimeOut => "timeOut",
            Self::Working => "working",
            Self::NotPaired => "notPaired",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for CmdResult {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What happened to an inbound command before or after it reached the
/// device. Published as the acknowledgement on the action topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CommandOutcome {
    /// Accepted into the device queue.
    Accepted,
    /// Rejected by the ACL.
    Denied,
    /// Not a known action for this device kind.
    UnknownAction,
    /// The device failed after all retries.
    Failed,
    /// The device queue is full.
    Busy,
}

impl CommandOutcome {
    pub fn ack_payload(self) -> &'static str {
        match self {
            Self::Accepted => "ack",
            Self::Denied => "denied",
            Self::UnknownAction => "unknown_action",
            Self::Failed => "error",
            Self::Busy => "busy",
        }
    }
}

/// The two permission tiers of configuration fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfigTier {
    Basic,
    Advanced,
}

const LOCK_BASIC_FIELDS: [&str; 16] = [
    "name",
    "latitude",
    "longitude",
    "autoUnlatch",
    "pairingEnabled",
    "buttonEnabled",
    "ledEnabled",
    "ledBrightness",
    "timeZoneOffset",
    "dstMode",
    "fobAction1",
    "fobAction2",
    "fobAction3",
    "singleLock",
    "advertisingMode",
    "timeZone",
];

const LOCK_ADVANCED_FIELDS: [&str; 22] = [
    "unlockedPositionOffsetDegrees",
    "lockedPositionOffsetDegrees",
    "singleLockedPositionOffsetDegrees",
    "unlockedToLockedTransitionOffsetDegrees",
    "lockNgoTimeout",
    "singleButtonPressAction",
    "doubleButtonPressAction",
    "detachedCylinder",
    "batteryType",
    "automaticBatteryTypeDetection",
    "unlatchDuration",
    "autoLockTimeOut",
    "autoUnLockDisabled",
    "nightModeEnabled",
    "nightModeStartTime",
    "nightModeEndTime",
    "nightModeAutoLockEnabled",
    "nightModeAutoUnlockDisabled",
    "nightModeImmediateLockOnStart",
    "autoLockEnabled",
    "immediateAutoLockEnabled",
    "autoUpdateEnabled",
];

const OPENER_BASIC_FIELDS: [&str; 14] = [
    "name",
    "latitude",
    "longitude",
    "pairingEnabled",
    "buttonEnabled",
    "ledFlashEnabled",
    "timeZoneOffset",
    "dstMode",
    "fobAction1",
    "fobAction2",
    "fobAction3",
    "operatingMode",
    "advertisingMode",
    "timeZone",
];

const OPENER_ADVANCED_FIELDS: [&str; 20] = [
    "intercomID",
    "busModeSwitch",
    "shortCircuitDuration",
    "electricStrikeDelay",
    "randomElectricStrikeDelay",
    "electricStrikeDuration",
    "disableRtoAfterRing",
    "rtoTimeout",
    "doorbellSuppression",
    "doorbellSuppressionDuration",
    "soundRing",
    "soundOpen",
    "soundRto",
    "soundCm",
    "soundConfirmation",
    "soundLevel",
    "singleButtonPressAction",
    "doubleButtonPressAction",
    "batteryType",
    "automaticBatteryTypeDetection",
];

/// Names of the configuration fields of one tier, in ACL bit order.
pub fn config_fields(kind: DeviceKind, tier: ConfigTier) -> &'static [&'static str] {
    match (kind, tier) {
        (DeviceKind::Lock, ConfigTier::Basic) => &LOCK_BASIC_FIELDS,
        (DeviceKind::Lock, ConfigTier::Advanced) => &LOCK_ADVANCED_FIELDS,
        (DeviceKind::Opener, ConfigTier::Basic) => &OPENER_BASIC_FIELDS,
        (DeviceKind::Opener, ConfigTier::Advanced) => &OPENER_ADVANCED_FIELDS,
    }
}

/// A named configuration field located in its ACL tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConfigField {
    pub tier: ConfigTier,
    pub bit: usize,
    pub name: &'static str,
}

impl ConfigField {
    /// Look a field up by its exact name. Basic fields shadow advanced ones.
    pub fn find(kind: DeviceKind, name: &str) -> Option<Self> {
        [ConfigTier::Basic, ConfigTier::Advanced]
            .into_iter()
            .find_map(|tier| {
                config_fields(kind, tier)
                    .iter()
                    .position(|field| *field == name)
                    .map(|bit| Self {
                        tier,
                        bit,
                        name: config_fields(kind, tier)[bit],
                    })
            })
    }
}

/// Lists of entries the device reports with variable length.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DynamicList {
    KeypadCodes,
    TimeControl,
    Authorizations,
}

impl DynamicList {
    pub const ALL: [DynamicList; 3] = [Self::KeypadCodes, Self::TimeControl, Self::Authorizations];

    /// Topic suffix under which entry `n` lives as `<suffix>/<n>`.
    pub fn topic_suffix(self) -> &'static str {
        match self {
            Self::KeypadCodes => crate::constants::TOPIC_KEYPAD_CODES,
            Self::TimeControl => crate::constants::TOPIC_TIMECONTROL_ENTRIES,
            Self::Authorizations => crate::constants::TOPIC_AUTH_ENTRIES,
        }
    }

    /// Prefix of the discovery object id, completed with `_<n>`.
    pub fn object_prefix(self) -> &'static str {
        match self {
            Self::KeypadCodes => "keypad",
            Self::TimeControl => "timecontrol",
            Self::Authorizations => "authorization",
        }
    }
}

impl fmt::Display for DynamicList {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.object_prefix())
    }
}

/// Data a client can ask the gateway to read from the device again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StateQuery {
    LockState,
    Config,
    Keypad,
    Battery,
}

impl StateQuery {
    pub const ALL: [StateQuery; 4] = [Self::LockState, Self::Config, Self::Keypad, Self::Battery];

    /// Topic suffix a client writes `1` to.
    pub fn topic_suffix(self) -> &'static str {
        match self {
            Self::LockState => crate::constants::TOPIC_QUERY_LOCKSTATE,
            Self::Config => crate::constants::TOPIC_QUERY_CONFIG,
            Self::Keypad => crate::constants::TOPIC_QUERY_KEYPAD,
            Self::Battery => crate::constants::TOPIC_QUERY_BATTERY,
        }
    }

    /// Whether the answer is part of the device snapshot.
    pub fn is_snapshot(self) -> bool {
        matches!(self, Self::LockState | Self::Battery)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::LockState => "lockstate",
            Self::Config => "config",
            Self::Keypad => "keypad",
            Self::Battery => "battery",
        }
    }
}

impl fmt::Display for StateQuery {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case("lock", LockAction::Lock)]
    #[case("Lock", LockAction::Lock)]
    #[case("lockNgo", LockAction::LockNgo)]
    #[case("LockNgoUnlatch", LockAction::LockNgoUnlatch)]
    #[case("fullLock", LockAction::FullLock)]
    #[case("FobAction3", LockAction::FobAction3)]
    fn test_lock_action_parse(#[case] input: &str, #[case] expected: LockAction) {
        assert_eq!(
            Action::parse(DeviceKind::Lock, input).unwrap(),
            Action::Lock(expected)
        );
    }

    #[rstest]
    #[case("activateRTO", OpenerAction::ActivateRto)]
    #[case("DeactivateRTO", OpenerAction::DeactivateRto)]
    #[case("electricStrikeActuation", OpenerAction::ElectricStrikeActuation)]
    #[case("activateCM", OpenerAction::ActivateContinuousMode)]
    #[case("fobAction1", OpenerAction::FobAction1)]
    fn test_opener_action_parse(#[case] input: &str, #[case] expected: OpenerAction) {
        assert_eq!(
            Action::parse(DeviceKind::Opener, input).unwrap(),
            Action::Opener(expected)
        );
    }

    #[rstest]
    #[case(DeviceKind::Lock, "")]
    #[case(DeviceKind::Lock, "LOCK")]
    #[case(DeviceKind::Lock, "lockngo")]
    #[case(DeviceKind::Lock, "activateRTO")]
    #[case(DeviceKind::Opener, "unlock")]
    #[case(DeviceKind::Opener, "activateRto")]
    fn test_unknown_actions(#[case] kind: DeviceKind, #[case] input: &str) {
        assert!(matches!(
            Action::parse(kind, input),
            Err(Error::UnknownAction(_))
        ));
    }

    #[test]
    fn test_acl_bits_are_dense_and_unique() {
        let mut bits: Vec<usize> = LockAction::ALL.iter().map(|a| a.acl_bit()).collect();
        bits.extend(OpenerAction::ALL.iter().map(|a| a.acl_bit()));
        bits.sort_unstable();
        assert_eq!(bits, (0..ACTION_ACL_BITS).collect::<Vec<_>>());
    }

    #[test]
    fn test_ack_payloads() {
        assert_eq!(CommandOutcome::Accepted.ack_payload(), "ack");
        assert_eq!(CommandOutcome::Denied.ack_payload(), "denied");
        assert_eq!(CommandOutcome::UnknownAction.ack_payload(), "unknown_action");
        assert_eq!(CommandOutcome::Failed.ack_payload(), "error");
    }

    #[test]
    fn test_config_field_tables() {
        assert_eq!(config_fields(DeviceKind::Lock, ConfigTier::Basic).len(), 16);
        assert_eq!(config_fields(DeviceKind::Lock, ConfigTier::Advanced).len(), 22);
        assert_eq!(config_fields(DeviceKind::Opener, ConfigTier::Basic).len(), 14);
        assert_eq!(config_fields(DeviceKind::Opener, ConfigTier::Advanced).len(), 20);
    }

    #[test]
    fn test_config_field_lookup() {
        let field = ConfigField::find(DeviceKind::Lock, "ledBrightness").unwrap();
        assert_eq!(field.tier, ConfigTier::Basic);
        assert_eq!(field.bit, 7);

        let field = ConfigField::find(DeviceKind::Lock, "autoUpdateEnabled").unwrap();
        assert_eq!(field.tier, ConfigTier::Advanced);
        assert_eq!(field.bit, 21);

        assert!(ConfigField::find(DeviceKind::Opener, "autoUnlatch").is_none());
        assert!(ConfigField::find(DeviceKind::Lock, "").is_none());
    }

    #[test]
    fn test_dynamic_list_suffixes() {
        assert_eq!(DynamicList::KeypadCodes.topic_suffix(), "/keypad/codes");
        assert_eq!(DynamicList::Authorizations.topic_suffix(), "/auth/entries");
        assert_eq!(DynamicList::TimeControl.object_prefix(), "timecontrol");
    }

    #[rstest]
    #[case(StateQuery::LockState, "/query/lockstate", true)]
    #[case(StateQuery::Config, "/query/config", false)]
    #[case(StateQuery::Keypad, "/query/keypad", false)]
    #[case(StateQuery::Battery, "/query/battery", true)]
    fn test_state_query_topics(
        #[case] query: StateQuery,
        #[case] suffix: &str,
        #[case] snapshot: bool,
    ) {
        assert_eq!(query.topic_suffix(), suffix);
        assert!(suffix.ends_with(query.as_str()));
        assert_eq!(query.is_snapshot(), snapshot);
    }
}
