//! Session identity
//!
//! The user id and device description are resolved once per session and
//! persisted, so every envelope a host ever sends carries the same identity.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::storage::KeyValueStore;
use crate::types::User;

/// Slot holding the persisted user id
pub const USER_ID_KEY: &str = "__sdk_user_id__";

/// Slot holding the detected device info
pub const DEVICE_INFO_KEY: &str = "__sdk_device_info__";

/// Device, runtime and OS of the reporting host
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceInfo {
    pub device: String,
    pub browser: String,
    pub os: String,
}

impl DeviceInfo {
    /// Describe the current process
    pub fn detect() -> Self {
        Self {
            device: std::env::consts::ARCH.to_string(),
            browser: format!("trackwire/{}", env!("CARGO_PKG_VERSION")),
            os: std::env::consts::OS.to_string(),
        }
    }
}

/// Resolve the session's [`User`]
///
/// User id precedence: the id persisted by an earlier session, then
/// `configured_id`, then a fresh UUID v4. Device info supplied by the host
/// wins over the persisted one, which wins over [`DeviceInfo::detect`].
/// Whatever is chosen is written back.
pub fn resolve_user(
    kv: &dyn KeyValueStore,
    configured_id: Option<&str>,
    device: Option<DeviceInfo>,
) -> Result<User> {
    let user_id = match kv.get(USER_ID_KEY)? {
        Some(Value::String(id)) if !id.is_empty() => id,
        Some(other) if !other.is_null() && !other.is_string() => {
            return Err(Error::Storage(format!(
                "{} holds a non-string value: {}",
                USER_ID_KEY, other
            )))
        }
        _ => {
            let id = configured_id
                .filter(|id| !id.is_empty())
                .map(str::to_string)
                .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
            kv.set(USER_ID_KEY, &Value::String(id.clone()))?;
            tracing::info!(user_id = %id, "Assigned user id");
            id
        }
    };

    let device = match device {
        Some(info) => {
            kv.set(DEVICE_INFO_KEY, &serde_json::to_value(&info)?)?;
            info
        }
        None => match load_device_info(kv) {
            Some(info) => info,
            None => {
                let info = DeviceInfo::detect();
                kv.set(DEVICE_INFO_KEY, &serde_json::to_value(&info)?)?;
                info
            }
        },
    };

    Ok(User {
        user_id,
        device: device.device,
        browser: device.browser,
        os: device.os,
    })
}

fn load_device_info(kv: &dyn KeyValueStore) -> Option<DeviceInfo> {
    let value = kv.get(DEVICE_INFO_KEY).ok()??;
    match serde_json::from_value(value) {
        Ok(info) => Some(info),
        Err(e) => {
            tracing::warn!(error = %e, "Ignoring malformed device info");
            None
        }
    }
}
