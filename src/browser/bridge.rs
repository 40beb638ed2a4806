/// Promise-returning wrappers over chrome.* callbacks, and the Rust
/// collaborators built on them.

use async_trait::async_trait;
use futures::future::{FutureExt, LocalBoxFuture};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use wasm_bindgen::prelude::*;

use crate::coordinator::effects::{Badge, Clock, Notification, Notifier};
use crate::domain::origin_match_pattern;
use crate::error::{Result, TrackerError};
use crate::media::TabId;
use crate::protocol::Request;
use crate::series::PageFetcher;
use crate::storage::{StorageArea, StorageKey};
use crate::tracker::MessageSink;

#[wasm_bindgen(module = "/extension.js")]
extern "C" {
    #[wasm_bindgen(catch)]
    async fn getStorage(key: &str) -> std::result::Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn setStorage(key: &str, value: JsValue) -> std::result::Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn removeStorage(key: &str) -> std::result::Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn fetchText(url: &str) -> std::result::Result<JsValue, JsValue>;

    #[wasm_bindgen(catch, js_name = sleep)]
    async fn sleepMs(ms: u32) -> std::result::Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn showNotification(options: JsValue) -> std::result::Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn setBadge(text: &str, color: Option<String>) -> std::result::Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn createAlarm(name: &str, period_minutes: u32) -> std::result::Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn grantedOrigins() -> std::result::Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn unregisterContentScripts() -> std::result::Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn registerContentScripts(matches: JsValue) -> std::result::Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn openTabs() -> std::result::Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn injectTracker(tab_id: i32) -> std::result::Result<(), JsValue>;

    fn sendRuntimeMessage(message: JsValue);
}

fn js_error(context: &str, e: JsValue) -> TrackerError {
    TrackerError::Browser(format!("{}: {:?}", context, e))
}

fn to_js<T: Serialize + ?Sized>(value: &T) -> Result<JsValue> {
    // Maps must arrive as plain objects for chrome.storage.
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    value
        .serialize(&serializer)
        .map_err(|e| TrackerError::Serialization(e.to_string()))
}

/// chrome.storage.local
pub struct ChromeStorage;

#[async_trait(?Send)]
impl StorageArea for ChromeStorage {
    async fn get(&self, key: StorageKey) -> Result<Option<Value>> {
        let value = getStorage(key.as_str())
            .await
            .map_err(|e| TrackerError::Storage(format!("{:?}", e)))?;
        if value.is_undefined() || value.is_null() {
            return Ok(None);
        }
        serde_wasm_bindgen::from_value(value)
            .map(Some)
            .map_err(|e| TrackerError::Serialization(e.to_string()))
    }

    async fn set(&self, key: StorageKey, value: Value) -> Result<()> {
        setStorage(key.as_str(), to_js(&value)?)
            .await
            .map_err(|e| TrackerError::Storage(format!("{:?}", e)))
    }

    async fn remove(&self, key: StorageKey) -> Result<()> {
        removeStorage(key.as_str())
            .await
            .map_err(|e| TrackerError::Storage(format!("{:?}", e)))
    }
}

pub struct BrowserFetcher;

#[async_trait(?Send)]
impl PageFetcher for BrowserFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        let body = fetchText(url).await.map_err(|e| TrackerError::Fetch {
            url: url.to_string(),
            reason: format!("{:?}", e),
        })?;
        body.as_string().ok_or_else(|| TrackerError::Fetch {
            url: url.to_string(),
            reason: "response body was not text".to_string(),
        })
    }
}

pub struct BrowserClock;

impl Clock for BrowserClock {
    fn now_ms(&self) -> f64 {
        js_sys::Date::now()
    }

    fn sleep(&self, ms: u32) -> LocalBoxFuture<'static, ()> {
        async move {
            if let Err(e) = sleepMs(ms).await {
                log::warn!("Timer failed: {:?}", e);
            }
        }
        .boxed_local()
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct NotificationOptions<'a> {
    title: &'a str,
    message: &'a str,
    priority: i8,
}

pub struct ChromeNotifier;

#[async_trait(?Send)]
impl Notifier for ChromeNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        let options = to_js(&NotificationOptions {
            title: &notification.title,
            message: &notification.message,
            priority: notification.priority,
        })?;
        showNotification(options)
            .await
            .map_err(|e| js_error("notification", e))
    }

    async fn set_badge(&self, badge: Badge) -> Result<()> {
        setBadge(&badge.text(), badge.color().map(str::to_string))
            .await
            .map_err(|e| js_error("badge", e))
    }
}

pub async fn create_alarm(name: &str, period_minutes: u32) -> Result<()> {
    createAlarm(name, period_minutes)
        .await
        .map_err(|e| js_error("alarm", e))
}

fn from_js<T: for<'de> Deserialize<'de>>(value: JsValue) -> Result<T> {
    serde_wasm_bindgen::from_value(value).map_err(|e| TrackerError::Serialization(e.to_string()))
}

/// Host origins the user has granted so far.
pub async fn granted_origins() -> Result<Vec<String>> {
    let origins = grantedOrigins()
        .await
        .map_err(|e| js_error("permissions", e))?;
    from_js(origins)
}

pub async fn unregister_content_scripts() -> Result<()> {
    unregisterContentScripts()
        .await
        .map_err(|e| js_error("script unregistration", e))
}

/// Replace the tracker registration with one covering `origins`. Nothing is
/// registered for an empty list.
pub async fn register_content_scripts(origins: &[String]) -> Result<()> {
    if let Err(e) = unregister_content_scripts().await {
        // Nothing registered yet
        log::debug!("{}", e);
    }
    if origins.is_empty() {
        return Ok(());
    }
    let matches: Vec<String> = origins.iter().map(|o| origin_match_pattern(o)).collect();
    registerContentScripts(to_js(&matches)?)
        .await
        .map_err(|e| js_error("script registration", e))
}

#[derive(Debug, Deserialize)]
pub struct OpenTab {
    pub id: TabId,
    pub url: String,
}

pub async fn open_tabs() -> Result<Vec<OpenTab>> {
    let tabs = openTabs().await.map_err(|e| js_error("tabs", e))?;
    from_js(tabs)
}

pub async fn inject_tracker(tab_id: TabId) -> Result<()> {
    injectTracker(tab_id)
        .await
        .map_err(|e| js_error("script injection", e))
}

/// chrome.runtime.sendMessage with the reply ignored.
pub struct RuntimeSink;

impl MessageSink for RuntimeSink {
    fn send(&self, request: Request) {
        match to_js(&request.to_message()) {
            Ok(message) => sendRuntimeMessage(message),
            Err(e) => log::error!("Could not encode {}: {}", request.kind(), e),
        }
    }
}
