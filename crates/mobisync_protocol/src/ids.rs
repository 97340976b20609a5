//! Identifier types.

use crate::error::{ProtocolError, ProtocolResult};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

fn validate(kind: &'static str, value: String) -> ProtocolResult<String> {
    if value.trim().is_empty() {
        return Err(ProtocolError::InvalidIdentifier { kind, value });
    }
    Ok(value)
}

/// Client-supplied, stable device identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct DeviceId(String);

impl DeviceId {
    /// Creates a device ID, rejecting blank values.
    pub fn new(value: impl Into<String>) -> ProtocolResult<Self> {
        validate("device", value.into()).map(Self)
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for DeviceId {
    type Error = ProtocolError;

    fn try_from(value: String) -> ProtocolResult<Self> {
        Self::new(value)
    }
}

impl From<DeviceId> for String {
    fn from(id: DeviceId) -> Self {
        id.0
    }
}

impl fmt::Display for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identifier of the user owning one or more devices.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct UserId(String);

impl UserId {
    /// Creates a user ID, rejecting blank values.
    pub fn new(value: impl Into<String>) -> ProtocolResult<Self> {
        validate("user", value.into()).map(Self)
    }

    /// Returns the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for UserId {
    type Error = ProtocolError;

    fn try_from(value: String) -> ProtocolResult<Self> {
        Self::new(value)
    }
}

impl From<UserId> for String {
    fn from(id: UserId) -> Self {
        id.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Sync operation identifier.
///
/// Assigned from a monotonically increasing counter, so ordering by ID
/// matches creation order.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OperationId(pub u64);

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op-{}", self.0)
    }
}

/// Identifier of an entry in a device's offline queue.
///
/// Unique within one device's queue.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct OfflineOpId(pub u64);

impl fmt::Display for OfflineOpId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "offline-{}", self.0)
    }
}

/// Notification identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NotificationId(Uuid);

impl NotificationId {
    /// Generates a fresh random notification ID.
    pub fn new_v4() -> Self {
        Self(Uuid::new_v4())
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl fmt::Display for NotificationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blank_identifiers_are_rejected() {
        assert!(DeviceId::new("").is_err());
        assert!(DeviceId::new("   ").is_err());
        assert!(UserId::new("\t").is_err());

        let device = DeviceId::new("d1").unwrap();
        assert_eq!(device.as_str(), "d1");
        assert_eq!(device.to_string(), "d1");
    }

    #[test]
    fn operation_ids_order_by_value() {
        assert!(OperationId(1) < OperationId(2));
        assert_eq!(OperationId(7).to_string(), "op-7");
        assert_eq!(OfflineOpId(3).to_string(), "offline-3");
    }

    #[test]
    fn notification_ids_are_unique() {
        assert_ne!(NotificationId::new_v4(), NotificationId::new_v4());
    }

    #[test]
    fn ids_serialize_transparently() {
        let device = DeviceId::new("phone-1").unwrap();
        assert_eq!(serde_json::to_string(&device).unwrap(), "\"phone-1\"");
        assert_eq!(serde_json::to_string(&OperationId(9)).unwrap(), "9");

        let parsed: DeviceId = serde_json::from_str("\"phone-1\"").unwrap();
        assert_eq!(parsed, device);
        assert!(serde_json::from_str::<DeviceId>("\"\"").is_err());
    }
}
