//! User preferences persisted under `trackingPreferences` and
//! `notificationsEnabled`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::completion::CompletionPolicy;
use crate::error::Result;
use crate::storage::{StorageBridge, StorageKey};

/// Stored `trackingPreferences`. The settings page keeps its own keys in the
/// same object (`autoTrack`, `autoMint`, ...); they are carried in `extra`
/// so a patch from here never drops them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TrackingPreferences {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tracking_enabled: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_track: Option<bool>,
    pub completion: CompletionPolicy,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl TrackingPreferences {
    /// `trackingEnabled`, then the settings page's `autoTrack`, then on.
    pub fn is_tracking_enabled(&self) -> bool {
        self.tracking_enabled.or(self.auto_track).unwrap_or(true)
    }

    fn set_tracking_enabled(&mut self, enabled: bool) {
        self.tracking_enabled = Some(enabled);
        self.auto_track = Some(enabled);
    }
}

/// Shape returned by `GET_SETTINGS`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Settings {
    pub tracking_enabled: bool,
    pub notifications_enabled: bool,
    pub completion: CompletionPolicy,
}

/// `UPDATE_SETTINGS` payload; only provided fields are written.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SettingsPatch {
    #[serde(default)]
    pub tracking_enabled: Option<bool>,
    #[serde(default)]
    pub notifications_enabled: Option<bool>,
    #[serde(default)]
    pub completion: Option<CompletionPolicy>,
}

impl SettingsPatch {
    pub fn is_empty(&self) -> bool {
        self.tracking_enabled.is_none()
            && self.notifications_enabled.is_none()
            && self.completion.is_none()
    }
}

pub async fn load_settings(storage: &StorageBridge) -> Result<Settings> {
    let preferences: TrackingPreferences = storage
        .load(StorageKey::TrackingPreferences)
        .await?
        .unwrap_or_default();
    let notifications_enabled = notifications_enabled(storage).await?;

    Ok(Settings {
        tracking_enabled: preferences.is_tracking_enabled(),
        notifications_enabled,
        completion: preferences.completion,
    })
}

pub async fn apply_patch(storage: &StorageBridge, patch: SettingsPatch) -> Result<Settings> {
    if patch.tracking_enabled.is_some() || patch.completion.is_some() {
        let mut preferences: TrackingPreferences = storage
            .load(StorageKey::TrackingPreferences)
            .await?
            .unwrap_or_default();
        if let Some(enabled) = patch.tracking_enabled {
            preferences.set_tracking_enabled(enabled);
        }
        if let Some(completion) = patch.completion {
            preferences.completion = completion;
        }
        storage.save(StorageKey::TrackingPreferences, &preferences).await?;
    }

    if let Some(enabled) = patch.notifications_enabled {
        storage.save(StorageKey::NotificationsEnabled, &enabled).await?;
    }

    load_settings(storage).await
}

/// Notifications are on unless explicitly switched off.
pub async fn notifications_enabled(storage: &StorageBridge) -> Result<bool> {
    Ok(storage
        .load::<bool>(StorageKey::NotificationsEnabled)
        .await?
        .unwrap_or(true))
}

/// [`notifications_enabled`] for callers that already did their work: an
/// unreadable flag counts as on.
pub async fn should_notify(storage: &StorageBridge) -> bool {
    match notifications_enabled(storage).await {
        Ok(enabled) => enabled,
        Err(e) => {
            log::warn!("Unreadable notification setting, assuming on: {}", e);
            true
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStorage;
    use futures::executor::block_on;
    use serde_json::json;
    use std::rc::Rc;

    fn create_test_bridge() -> StorageBridge {
        StorageBridge::new(Rc::new(MemoryStorage::new()))
    }

    #[test]
    fn test_defaults_when_nothing_stored() {
        let storage = create_test_bridge();
        let settings = block_on(load_settings(&storage)).unwrap();

        assert!(settings.tracking_enabled);
        assert!(settings.notifications_enabled);
        assert_eq!(settings.completion, CompletionPolicy::default());
    }

    #[test]
    fn test_patch_writes_only_given_fields() {
        let storage = create_test_bridge();
        let patch = SettingsPatch {
            notifications_enabled: Some(false),
            ..SettingsPatch::default()
        };

        let settings = block_on(apply_patch(&storage, patch)).unwrap();
        assert!(!settings.notifications_enabled);
        assert!(settings.tracking_enabled);

        let stored: Option<TrackingPreferences> =
            block_on(storage.load(StorageKey::TrackingPreferences)).unwrap();
        assert!(stored.is_none());
    }

    #[test]
    fn test_patch_completion_policy() {
        let storage = create_test_bridge();
        let mut completion = CompletionPolicy::default();
        completion.video_progress_percent = 95.0;

        let patch = SettingsPatch {
            completion: Some(completion.clone()),
            ..SettingsPatch::default()
        };
        let settings = block_on(apply_patch(&storage, patch)).unwrap();

        assert_eq!(settings.completion, completion);
        assert!(settings.tracking_enabled);
    }

    #[test]
    fn test_patch_keeps_settings_page_keys() {
        let area = Rc::new(MemoryStorage::new());
        let storage = StorageBridge::new(area.clone());
        block_on(storage.save(
            StorageKey::TrackingPreferences,
            &json!({"autoTrack": true, "notifications": true, "autoMint": true, "trackOnAllSites": false}),
        ))
        .unwrap();

        let patch = SettingsPatch {
            completion: Some(CompletionPolicy::default()),
            ..SettingsPatch::default()
        };
        block_on(apply_patch(&storage, patch)).unwrap();

        let stored = area.peek(StorageKey::TrackingPreferences).unwrap();
        assert_eq!(stored["autoMint"], true);
        assert_eq!(stored["notifications"], true);
        assert_eq!(stored["trackOnAllSites"], false);
        assert_eq!(stored["autoTrack"], true);
        assert!(stored.get("trackingEnabled").is_none());
    }

    #[test]
    fn test_auto_track_switches_tracking_off() {
        let storage = create_test_bridge();
        block_on(storage.save(StorageKey::TrackingPreferences, &json!({"autoTrack": false}))).unwrap();
        assert!(!block_on(load_settings(&storage)).unwrap().tracking_enabled);

        // An explicit flag wins and keeps autoTrack in step
        let patch = SettingsPatch {
            tracking_enabled: Some(true),
            ..SettingsPatch::default()
        };
        assert!(block_on(apply_patch(&storage, patch)).unwrap().tracking_enabled);
        let stored: TrackingPreferences =
            block_on(storage.load(StorageKey::TrackingPreferences)).unwrap().unwrap();
        assert_eq!(stored.auto_track, Some(true));
    }

    #[test]
    fn test_should_notify_tolerates_bad_value() {
        let storage = create_test_bridge();
        block_on(storage.save(StorageKey::NotificationsEnabled, &json!("yes"))).unwrap();

        assert!(block_on(notifications_enabled(&storage)).is_err());
        assert!(block_on(should_notify(&storage)));
    }

    #[test]
    fn test_empty_patch() {
        assert!(SettingsPatch::default().is_empty());
    }
}
