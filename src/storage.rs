/// Storage bridge over chrome.storage.local
///
/// Every writer replaces a whole collection; the unit of atomicity is one key.
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use futures::channel::mpsc::{self, UnboundedReceiver, UnboundedSender};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use crate::error::Result;

/// Keys of the persisted schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    UserData,
    Completions,
    PendingCompletions,
    ActiveTracking,
    SeriesBookmarks,
    CustomSites,
    TrackingPreferences,
    NotificationsEnabled,
}

impl StorageKey {
    pub const ALL: [StorageKey; 8] = [
        StorageKey::UserData,
        StorageKey::Completions,
        StorageKey::PendingCompletions,
        StorageKey::ActiveTracking,
        StorageKey::SeriesBookmarks,
        StorageKey::CustomSites,
        StorageKey::TrackingPreferences,
        StorageKey::NotificationsEnabled,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            StorageKey::UserData => "userData",
            StorageKey::Completions => "completions",
            StorageKey::PendingCompletions => "pendingCompletions",
            StorageKey::ActiveTracking => "activeTracking",
            StorageKey::SeriesBookmarks => "seriesBookmarks",
            StorageKey::CustomSites => "customSites",
            StorageKey::TrackingPreferences => "trackingPreferences",
            StorageKey::NotificationsEnabled => "notificationsEnabled",
        }
    }

    pub fn from_name(name: &str) -> Option<StorageKey> {
        StorageKey::ALL.into_iter().find(|key| key.as_str() == name)
    }
}

/// One key's transition, delivered to subscribers after a write lands.
#[derive(Debug, Clone, PartialEq)]
pub struct StorageChange {
    pub key: StorageKey,
    pub old_value: Option<Value>,
    pub new_value: Option<Value>,
}

/// Asynchronous key/value area. Implementations must survive the caller
/// being torn down between any two calls; nothing is cached on this side.
#[async_trait(?Send)]
pub trait StorageArea {
    async fn get(&self, key: StorageKey) -> Result<Option<Value>>;
    async fn set(&self, key: StorageKey, value: Value) -> Result<()>;
    async fn remove(&self, key: StorageKey) -> Result<()>;
}

/// Typed access on top of a [`StorageArea`].
#[derive(Clone)]
pub struct StorageBridge {
    area: Rc<dyn StorageArea>,
}

impl StorageBridge {
    pub fn new(area: Rc<dyn StorageArea>) -> Self {
        StorageBridge { area }
    }

    pub async fn load<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Option<T>> {
        match self.area.get(key).await? {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
        }
    }

    /// Load a collection. A missing key is an empty list; entries that no
    /// longer parse are skipped with a warning instead of failing the read.
    pub async fn load_list<T: DeserializeOwned>(&self, key: StorageKey) -> Result<Vec<T>> {
        let entries = match self.area.get(key).await? {
            Some(Value::Array(entries)) => entries,
            None | Some(Value::Null) => return Ok(Vec::new()),
            Some(other) => {
                log::warn!("Expected a list under {}, found {}", key.as_str(), other);
                return Ok(Vec::new());
            }
        };

        Ok(entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value(entry) {
                Ok(item) => Some(item),
                Err(e) => {
                    log::warn!("Skipping malformed entry in {}: {}", key.as_str(), e);
                    None
                }
            })
            .collect())
    }

    pub async fn save<T: Serialize + ?Sized>(&self, key: StorageKey, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;
        self.area.set(key, value).await
    }

    pub async fn remove(&self, key: StorageKey) -> Result<()> {
        self.area.remove(key).await
    }
}

/// In-process storage area with change notifications.
#[derive(Default)]
pub struct MemoryStorage {
    values: RefCell<HashMap<StorageKey, Value>>,
    listeners: RefCell<Vec<UnboundedSender<StorageChange>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream of changes for every subsequent write.
    pub fn subscribe(&self) -> UnboundedReceiver<StorageChange> {
        let (tx, rx) = mpsc::unbounded();
        self.listeners.borrow_mut().push(tx);
        rx
    }

    /// Current value without going through the async interface.
    pub fn peek(&self, key: StorageKey) -> Option<Value> {
        self.values.borrow().get(&key).cloned()
    }

    fn emit(&self, change: StorageChange) {
        // Closed receivers are dropped from the listener list.
        self.listeners
            .borrow_mut()
            .retain(|listener| listener.unbounded_send(change.clone()).is_ok());
    }
}

#[async_trait(?Send)]
impl StorageArea for MemoryStorage {
    async fn get(&self, key: StorageKey) -> Result<Option<Value>> {
        Ok(self.peek(key))
    }

    async fn set(&self, key: StorageKey, value: Value) -> Result<()> {
        let old_value = self.values.borrow_mut().insert(key, value.clone());
        self.emit(StorageChange {
            key,
            old_value,
            new_value: Some(value),
        });
        Ok(())
    }

    async fn remove(&self, key: StorageKey) -> Result<()> {
        let old_value = self.values.borrow_mut().remove(&key);
        if old_value.is_some() {
            self.emit(StorageChange {
                key,
                old_value,
                new_value: None,
            });
        }
        Ok(())
    }
}
