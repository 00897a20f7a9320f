//! Authorization of inbound actions and configuration writes.
//!
//! The [`AccessController`] answers from an [`AclTable`] held behind an
//! `Arc`. A new table is swapped in as a whole, so a lookup sees either the
//! previous table or the new one, never a mix.

use std::sync::Arc;

use lockbridge_core::{Action, CommandOutcome, ConfigField, DeviceKind};
use lockbridge_storage::AclTable;
use parking_lot::RwLock;
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Result of authorizing an action name.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Authorization {
    Granted(Action),
    /// The action exists but its ACL bit is not set.
    Denied(Action),
    /// The name is not an action of this device kind.
    UnknownAction,
}

impl Authorization {
    pub fn is_granted(&self) -> bool {
        matches!(self, Self::Granted(_))
    }

    /// The acknowledgement for a rejected command, `None` when granted.
    pub fn rejection(&self) -> Option<CommandOutcome> {
        match self {
            Self::Granted(_) => None,
            Self::Denied(_) => Some(CommandOutcome::Denied),
            Self::UnknownAction => Some(CommandOutcome::UnknownAction),
        }
    }
}

/// Whether per-field configuration permissions can be relied on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    /// The device has a credential; field bits decide.
    Enforced,
    /// No credential is configured for the device. Every configuration
    /// change must be refused, whatever the field bits say.
    NoCredential,
}

/// Decision for one field of a configuration update.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldDecision {
    /// Forward `value` to the device.
    Allowed { field: ConfigField, value: Value },
    /// Unknown field or ACL bit not set.
    Denied,
    /// The value is null or an empty string.
    NoValue,
}

impl FieldDecision {
    /// Payload reported for a field that is not forwarded.
    pub fn rejection(&self) -> Option<&'static str> {
        match self {
            Self::Allowed { .. } => None,
            Self::Denied => Some("denied"),
            Self::NoValue => Some("noValueSet"),
        }
    }
}

/// Lock-protected, swappable ACL.
///
/// # Examples
///
/// ```
/// use lockbridge_bridge::access::{AccessController, Authorization};
/// use lockbridge_core::{Action, DeviceKind, LockAction};
/// use lockbridge_storage::AclTable;
///
/// let acl = AccessController::new(
///     AclTable::deny_all().allow_action(Action::Lock(LockAction::Lock), true),
/// );
///
/// assert!(acl.is_allowed(DeviceKind::Lock, "Lock"));
/// assert_eq!(
///     acl.authorize(DeviceKind::Lock, "unlock"),
///     Authorization::Denied(Action::Lock(LockAction::Unlock))
/// );
/// assert_eq!(acl.authorize(DeviceKind::Lock, "dance"), Authorization::UnknownAction);
/// ```
#[derive(Debug)]
pub struct AccessController {
    table: RwLock<Arc<AclTable>>,
}

impl Default for AccessController {
    fn default() -> Self {
        Self::new(AclTable::deny_all())
    }
}

impl AccessController {
    pub fn new(table: AclTable) -> Self {
        Self {
            table: RwLock::new(Arc::new(table)),
        }
    }

    /// The table currently in force.
    pub fn table(&self) -> Arc<AclTable> {
        Arc::clone(&self.table.read())
    }

    pub fn version(&self) -> u64 {
        self.table.read().version()
    }

    /// Swap in a complete new table.
    pub fn replace(&self, table: AclTable) {
        let version = table.version();
        let previous = std::mem::replace(&mut *self.table.write(), Arc::new(table));
        info!(
            "ACL replaced (version {} -> {})",
            previous.version(),
            version
        );
    }

    pub fn authorize(&self, kind: DeviceKind, action_id: &str) -> Authorization {
        let Ok(action) = Action::parse(kind, action_id) else {
            debug!("Unknown {} action {:?}", kind, action_id);
            return Authorization::UnknownAction;
        };

        if self.table.read().action_allowed(action) {
            Authorization::Granted(action)
        } else {
            warn!("{} action {} denied by ACL", kind, action);
            Authorization::Denied(action)
        }
    }

    pub fn is_allowed(&self, kind: DeviceKind, action_id: &str) -> bool {
        self.authorize(kind, action_id).is_granted()
    }

    /// Whether the named configuration field may be written. Unknown fields
    /// are denied.
    pub fn authorize_config_field(&self, kind: DeviceKind, field: &str) -> bool {
        ConfigField::find(kind, field)
            .is_some_and(|field| self.table.read().field_allowed(kind, field))
    }

    pub fn config_mode(&self, credential_configured: bool) -> ConfigMode {
        if credential_configured {
            ConfigMode::Enforced
        } else {
            ConfigMode::NoCredential
        }
    }

    /// Decide every field of a configuration update against one table.
    pub fn review_config_update(
        &self,
        kind: DeviceKind,
        update: &Map<String, Value>,
    ) -> Vec<(String, FieldDecision)> {
        let table = self.table();
        update
            .iter()
            .map(|(name, value)| {
                let decision = match ConfigField::find(kind, name) {
                    Some(field) if table.field_allowed(kind, field) => {
                        if is_empty_value(value) {
                            FieldDecision::NoValue
                        } else {
                            FieldDecision::Allowed {
                                field,
                                value: value.clone(),
                            }
                        }
                    }
                    _ => {
                        warn!("{} configuration field {:?} denied by ACL", kind, name);
                        FieldDecision::Denied
                    }
                };
                (name.clone(), decision)
            })
            .collect()
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.is_empty(),
        _ => false,
    }
}
