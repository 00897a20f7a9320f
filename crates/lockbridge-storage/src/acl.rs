//! Access control tables.
//!
//! Each table is a fixed-length array of permission bits. On disk a table is
//! a blob of little-endian `u32` words, one per bit, each `0` or `1`. A blob
//! of the wrong length or with any other word value is corrupt, and a
//! corrupt or missing table denies everything.

use lockbridge_core::{ACTION_ACL_BITS, Action, ConfigField, ConfigTier, DeviceKind, config_fields};

const WORD_LEN: usize = 4;

/// One fixed-length permission bit array.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclBits {
    bits: Vec<bool>,
}

impl AclBits {
    pub fn deny_all(len: usize) -> Self {
        Self {
            bits: vec![false; len],
        }
    }

    pub fn allow_all(len: usize) -> Self {
        Self {
            bits: vec![true; len],
        }
    }

    /// Whether `bit` is set. Out-of-range bits are never set.
    pub fn allows(&self, bit: usize) -> bool {
        self.bits.get(bit).copied().unwrap_or(false)
    }

    /// Set one bit. Returns `false` if `bit` is out of range.
    pub fn set(&mut self, bit: usize, allowed: bool) -> bool {
        match self.bits.get_mut(bit) {
            Some(slot) => {
                *slot = allowed;
                true
            }
            None => false,
        }
    }

    pub fn len(&self) -> usize {
        self.bits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bits.is_empty()
    }

    pub fn to_blob(&self) -> Vec<u8> {
        self.bits
            .iter()
            .flat_map(|&allowed| u32::from(allowed).to_le_bytes())
            .collect()
    }

    /// Decode a blob holding exactly `len` words.
    ///
    /// Returns `None` if the blob is corrupt.
    ///
    /// # Examples
    ///
    /// ```
    /// use lockbridge_storage::acl::AclBits;
    ///
    /// let bits = AclBits::from_blob(&[1, 0, 0, 0, 0, 0, 0, 0], 2).unwrap();
    /// assert!(bits.allows(0));
    /// assert!(!bits.allows(1));
    ///
    /// assert!(AclBits::from_blob(&[1, 0, 0, 0], 2).is_none());
    /// assert!(AclBits::from_blob(&[7, 0, 0, 0], 1).is_none());
    /// ```
    pub fn from_blob(blob: &[u8], len: usize) -> Option<Self> {
        if blob.len() != len * WORD_LEN {
            return None;
        }
        blob.chunks_exact(WORD_LEN)
            .map(|word| match u32::from_le_bytes([word[0], word[1], word[2], word[3]]) {
                0 => Some(false),
                1 => Some(true),
                _ => None,
            })
            .collect::<Option<Vec<_>>>()
            .map(|bits| Self { bits })
    }
}

/// The complete ACL: action bits plus two configuration tiers per device
/// kind.
///
/// Readers get a whole table; a new table replaces the old one, it is never
/// patched in place while shared. The default table denies everything.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AclTable {
    version: u64,
    actions: AclBits,
    lock_basic: AclBits,
    lock_advanced: AclBits,
    opener_basic: AclBits,
    opener_advanced: AclBits,
}

impl Default for AclTable {
    fn default() -> Self {
        Self::deny_all()
    }
}

impl AclTable {
    pub fn deny_all() -> Self {
        Self::filled(AclBits::deny_all)
    }

    pub fn allow_all() -> Self {
        Self::filled(AclBits::allow_all)
    }

    fn filled(make: fn(usize) -> AclBits) -> Self {
        let tier_len = |kind, tier| config_fields(kind, tier).len();
        Self {
            version: 0,
            actions: make(ACTION_ACL_BITS),
            lock_basic: make(tier_len(DeviceKind::Lock, ConfigTier::Basic)),
            lock_advanced: make(tier_len(DeviceKind::Lock, ConfigTier::Advanced)),
            opener_basic: make(tier_len(DeviceKind::Opener, ConfigTier::Basic)),
            opener_advanced: make(tier_len(DeviceKind::Opener, ConfigTier::Advanced)),
        }
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn actions(&self) -> &AclBits {
        &self.actions
    }

    pub fn config(&self, kind: DeviceKind, tier: ConfigTier) -> &AclBits {
        match (kind, tier) {
            (DeviceKind::Lock, ConfigTier::Basic) => &self.lock_basic,
            (DeviceKind::Lock, ConfigTier::Advanced) => &self.lock_advanced,
            (DeviceKind::Opener, ConfigTier::Basic) => &self.opener_basic,
            (DeviceKind::Opener, ConfigTier::Advanced) => &self.opener_advanced,
        }
    }

    fn config_mut(&mut self, kind: DeviceKind, tier: ConfigTier) -> &mut AclBits {
        match (kind, tier) {
            (DeviceKind::Lock, ConfigTier::Basic) => &mut self.lock_basic,
            (DeviceKind::Lock, ConfigTier::Advanced) => &mut self.lock_advanced,
            (DeviceKind::Opener, ConfigTier::Basic) => &mut self.opener_basic,
            (DeviceKind::Opener, ConfigTier::Advanced) => &mut self.opener_advanced,
        }
    }

    pub fn set_actions(&mut self, bits: AclBits) {
        self.actions = bits;
    }

    pub fn set_config(&mut self, kind: DeviceKind, tier: ConfigTier, bits: AclBits) {
        *self.config_mut(kind, tier) = bits;
    }

    pub fn action_allowed(&self, action: Action) -> bool {
        self.actions.allows(action.acl_bit())
    }

    pub fn allow_action(mut self, action: Action, allowed: bool) -> Self {
        self.actions.set(action.acl_bit(), allowed);
        self
    }

    pub fn field_allowed(&self, kind: DeviceKind, field: ConfigField) -> bool {
        self.config(kind, field.tier).allows(field.bit)
    }

    /// Grant or revoke a named configuration field. Unknown names are
    /// ignored.
    pub fn allow_field(mut self, kind: DeviceKind, name: &str, allowed: bool) -> Self {
        if let Some(field) = ConfigField::find(kind, name) {
            self.config_mut(kind, field.tier).set(field.bit, allowed);
        }
        self
    }
}
