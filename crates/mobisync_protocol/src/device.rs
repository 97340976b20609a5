//! Device records.

use crate::ids::{now_millis, DeviceId, UserId};
use serde::{Deserialize, Serialize};

/// Client platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    /// Apple iOS.
    Ios,
    /// Android.
    Android,
    /// Browser client.
    Web,
    /// Desktop application.
    Desktop,
}

impl Platform {
    /// Returns the lowercase platform name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Ios => "ios",
            Platform::Android => "android",
            Platform::Web => "web",
            Platform::Desktop => "desktop",
        }
    }
}

/// Network the device is currently attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkType {
    /// Wi-Fi.
    Wifi,
    /// Mobile data.
    Cellular,
    /// Wired connection.
    Ethernet,
    /// Not reported.
    #[default]
    Unknown,
}

/// Hardware capabilities reported at registration.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct DeviceCapabilities {
    /// Free storage in bytes.
    pub storage_bytes: u64,
    /// Memory in bytes.
    pub memory_bytes: u64,
    /// Number of CPU cores.
    pub cpu_cores: u16,
    /// Current network type.
    pub network: NetworkType,
}

/// User-facing sync toggles.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevicePreferences {
    /// Whether sync is enabled at all.
    pub sync_enabled: bool,
    /// Whether offline mode has been enabled.
    pub offline_mode: bool,
    /// Whether sync may run while the app is in the background.
    pub background_sync: bool,
}

impl Default for DevicePreferences {
    fn default() -> Self {
        Self {
            sync_enabled: true,
            offline_mode: false,
            background_sync: true,
        }
    }
}

/// Settings applied when offline mode is enabled for a device.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OfflineSettings {
    /// Per-device queue limit overriding the engine default.
    pub max_queue_size: Option<usize>,
    /// Whether reconnecting drains the queue automatically.
    pub sync_on_reconnect: bool,
}

impl Default for OfflineSettings {
    fn default() -> Self {
        Self {
            max_queue_size: None,
            sync_on_reconnect: true,
        }
    }
}

/// Registration payload supplied by the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    /// Stable device identifier.
    pub device_id: DeviceId,
    /// Push token, if the device accepts push notifications.
    pub push_token: Option<String>,
    /// Reported capabilities.
    pub capabilities: DeviceCapabilities,
    /// Sync preferences.
    pub preferences: DevicePreferences,
    /// Connectivity at registration time.
    pub online: bool,
}

impl DeviceInfo {
    /// Creates registration info for an online device with default settings.
    pub fn new(device_id: DeviceId) -> Self {
        Self {
            device_id,
            push_token: None,
            capabilities: DeviceCapabilities::default(),
            preferences: DevicePreferences::default(),
            online: true,
        }
    }

    /// Sets the push token.
    pub fn with_push_token(mut self, token: impl Into<String>) -> Self {
        self.push_token = Some(token.into());
        self
    }

    /// Sets the capabilities.
    pub fn with_capabilities(mut self, capabilities: DeviceCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Sets the preferences.
    pub fn with_preferences(mut self, preferences: DevicePreferences) -> Self {
        self.preferences = preferences;
        self
    }

    /// Sets the initial connectivity.
    pub fn with_online(mut self, online: bool) -> Self {
        self.online = online;
        self
    }
}

/// A registered client endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    /// Stable device identifier.
    pub device_id: DeviceId,
    /// Owning user.
    pub user_id: UserId,
    /// Platform.
    pub platform: Platform,
    /// Whether the device is currently reachable.
    pub online: bool,
    /// Push token.
    pub push_token: Option<String>,
    /// Reported capabilities.
    pub capabilities: DeviceCapabilities,
    /// Sync preferences.
    pub preferences: DevicePreferences,
    /// Offline settings, once offline mode has been enabled.
    pub offline_settings: Option<OfflineSettings>,
    /// First registration time (ms since epoch).
    pub registered_at: u64,
    /// Last registration or connectivity change (ms since epoch).
    pub last_seen: u64,
}

impl Device {
    /// Creates a device record from a first registration.
    pub fn register(platform: Platform, user_id: UserId, info: DeviceInfo) -> Self {
        let now = now_millis();
        Self {
            device_id: info.device_id,
            user_id,
            platform,
            online: info.online,
            push_token: info.push_token,
            capabilities: info.capabilities,
            preferences: info.preferences,
            offline_settings: None,
            registered_at: now,
            last_seen: now,
        }
    }

    /// Applies a repeated registration.
    ///
    /// Identity, first-registration time and offline settings are kept.
    pub fn reregister(&mut self, platform: Platform, user_id: UserId, info: DeviceInfo) {
        self.user_id = user_id;
        self.platform = platform;
        self.online = info.online;
        self.push_token = info.push_token;
        self.capabilities = info.capabilities;
        self.preferences.sync_enabled = info.preferences.sync_enabled;
        self.preferences.background_sync = info.preferences.background_sync;
        self.preferences.offline_mode |= info.preferences.offline_mode;
        self.last_seen = now_millis();
    }

    /// Returns true if the device can receive push notifications.
    pub fn has_push_token(&self) -> bool {
        self.push_token.as_deref().is_some_and(|t| !t.is_empty())
    }

    /// Returns true if reconnecting should drain the offline queue.
    pub fn drains_on_reconnect(&self) -> bool {
        self.offline_settings
            .as_ref()
            .map_or(true, |settings| settings.sync_on_reconnect)
    }
}
