//! Playback device selection and the preferred-device memory

use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::UpstreamError;
use crate::model::{DeviceInfo, PlaybackState};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DeviceChoice {
    /// A device is already active; commands go to it without a transfer
    Active(String),
    /// Playback has to be transferred here first
    Transfer(String),
}

/// Remembers the last device seen active. Last write wins.
#[derive(Clone, Default)]
pub struct DevicePreference {
    preferred: Arc<RwLock<Option<String>>>,
    name_hint: Option<String>,
}

impl DevicePreference {
    pub fn new(name_hint: Option<String>) -> Self {
        Self {
            preferred: Arc::default(),
            name_hint: name_hint.filter(|n| !n.is_empty()),
        }
    }

    pub async fn preferred(&self) -> Option<String> {
        self.preferred.read().await.clone()
    }

    async fn remember(&self, device_id: &str) {
        let mut preferred = self.preferred.write().await;
        if preferred.as_deref() != Some(device_id) {
            tracing::debug!(device_id, "Remembering preferred device");
            *preferred = Some(device_id.to_string());
        }
    }

    pub async fn observe_devices(&self, devices: &[DeviceInfo]) {
        if let Some(id) = devices
            .iter()
            .find(|d| d.is_active)
            .and_then(|d| d.id.as_deref())
        {
            self.remember(id).await;
        }
    }

    pub async fn observe_state(&self, state: &PlaybackState) {
        if let Some(id) = state
            .device
            .as_ref()
            .filter(|d| d.is_active)
            .and_then(|d| d.id.as_deref())
        {
            self.remember(id).await;
        }
    }

    /// Active device, then the remembered one, then the first whose name
    /// matches the hint, then the first listed
    pub async fn select(&self, devices: &[DeviceInfo]) -> Result<DeviceChoice, UpstreamError> {
        if let Some(active) = devices
            .iter()
            .find(|d| d.is_active)
            .and_then(|d| d.id.clone())
        {
            self.remember(&active).await;
            return Ok(DeviceChoice::Active(active));
        }

        let listed = |id: &str| devices.iter().any(|d| d.id.as_deref() == Some(id));
        if let Some(preferred) = self.preferred().await.filter(|id| listed(id)) {
            tracing::debug!(device_id = %preferred, "No active device, using preferred device");
            return Ok(DeviceChoice::Transfer(preferred));
        }

        if let Some(hint) = &self.name_hint {
            let hint = hint.to_lowercase();
            if let Some(id) = devices
                .iter()
                .filter(|d| d.name.to_lowercase().contains(&hint))
                .find_map(|d| d.id.clone())
            {
                tracing::debug!(
                    device_id = %id,
                    "No active device, using device matching name hint"
                );
                return Ok(DeviceChoice::Transfer(id));
            }
        }

        match devices.iter().find_map(|d| d.id.clone()) {
            Some(id) => {
                tracing::debug!(
                    device_id = %id,
                    available = devices.len(),
                    "Falling back to first listed device"
                );
                Ok(DeviceChoice::Transfer(id))
            }
            None => Err(UpstreamError::NoDeviceAvailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn device(id: &str, name: &str, active: bool) -> DeviceInfo {
        DeviceInfo {
            id: Some(id.to_string()),
            name: name.to_string(),
            is_active: active,
            volume_percent: Some(50),
        }
    }

    #[tokio::test]
    async fn active_device_wins_and_is_remembered() {
        let preference = DevicePreference::new(None);
        let devices = [device("a", "Phone", false), device("b", "Laptop", true)];

        assert_eq!(
            preference.select(&devices).await,
            Ok(DeviceChoice::Active("b".to_string()))
        );
        assert_eq!(preference.preferred().await.as_deref(), Some("b"));
    }

    #[tokio::test]
    async fn falls_back_through_preferred_hint_and_first() {
        let preference = DevicePreference::new(Some("radiostream".to_string()));
        let devices = [
            device("a", "Phone", false),
            device("r", "RadioStream", false),
            device("c", "Kitchen", false),
        ];

        assert_eq!(
            preference.select(&devices).await,
            Ok(DeviceChoice::Transfer("r".to_string()))
        );

        preference.observe_devices(&[device("c", "Kitchen", true)]).await;
        assert_eq!(
            preference.select(&devices).await,
            Ok(DeviceChoice::Transfer("c".to_string()))
        );

        let plain = DevicePreference::new(None);
        assert_eq!(
            plain.select(&devices).await,
            Ok(DeviceChoice::Transfer("a".to_string()))
        );
    }

    #[tokio::test]
    async fn empty_list_has_no_device() {
        let preference = DevicePreference::new(Some("RadioStream".to_string()));
        assert_eq!(
            preference.select(&[]).await,
            Err(UpstreamError::NoDeviceAvailable)
        );
    }
}
