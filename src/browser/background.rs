/// Service-worker entry point.

use std::rc::Rc;

use js_sys::Promise;
use serde_json::Value;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::{future_to_promise, spawn_local};

use super::bridge::{self, BrowserClock, BrowserFetcher, ChromeNotifier, ChromeStorage};
use crate::coordinator::effects::{notify_best_effort, Notification, Notifier};
use crate::coordinator::{CoordinatorConfig, CoordinatorHandle, SessionCoordinator};
use crate::domain::matches_any_origin;
use crate::error::Result as TrackerResult;
use crate::media::TabId;
use crate::protocol::Response;
use crate::storage::StorageBridge;

#[wasm_bindgen]
pub struct BackgroundService {
    handle: CoordinatorHandle,
    notifier: Rc<dyn Notifier>,
}

/// Build the coordinator, start its mailbox and schedule the series alarm.
#[wasm_bindgen]
pub fn start_background() -> BackgroundService {
    let config = CoordinatorConfig::default();
    let notifier: Rc<dyn Notifier> = Rc::new(ChromeNotifier);

    let alarm_name = config.alarm_name.clone();
    let period = config.alarm_period_minutes;
    spawn_local(async move {
        if let Err(e) = bridge::create_alarm(&alarm_name, period).await {
            log::error!("Failed to schedule series checks: {}", e);
        }
    });

    spawn_local(async {
        if let Err(e) = sync_registration().await {
            log::error!("Failed to register tracker at startup: {}", e);
        }
    });

    let coordinator = SessionCoordinator::new(
        StorageBridge::new(Rc::new(ChromeStorage)),
        notifier.clone(),
        Rc::new(BrowserClock),
        Rc::new(BrowserFetcher),
        config,
    );
    let (handle, run) = coordinator.into_actor();
    spawn_local(run);

    log::info!("Background coordinator started");
    BackgroundService { handle, notifier }
}

/// Point the tracker registration at every origin granted so far.
async fn sync_registration() -> TrackerResult<usize> {
    let origins = bridge::granted_origins().await?;
    bridge::register_content_scripts(&origins).await?;
    log::info!("Tracker registered on {} origins", origins.len());
    Ok(origins.len())
}

/// Inject the tracker into open tabs under newly granted origins, so they
/// start tracking without a reload. Returns how many tabs got it.
async fn inject_open_tabs(origins: &[String]) -> TrackerResult<usize> {
    let mut injected = 0;
    for tab in bridge::open_tabs().await? {
        if !matches_any_origin(origins, &tab.url) {
            continue;
        }
        match bridge::inject_tracker(tab.id).await {
            Ok(()) => injected += 1,
            Err(e) => log::warn!("Could not inject tracker into {}: {}", tab.url, e),
        }
    }
    Ok(injected)
}

fn response_to_js(response: &Response) -> Result<JsValue, JsValue> {
    let serializer = serde_wasm_bindgen::Serializer::json_compatible();
    serde::Serialize::serialize(response, &serializer).map_err(|e| JsValue::from_str(&e.to_string()))
}

#[wasm_bindgen]
impl BackgroundService {
    /// Resolves with the `{success, data?, count?, error?}` reply.
    #[wasm_bindgen(js_name = handleMessage)]
    pub fn handle_message(&self, message: JsValue, sender_tab: Option<i32>) -> Promise {
        let handle = self.handle.clone();
        future_to_promise(async move {
            let response = match serde_wasm_bindgen::from_value::<Value>(message) {
                Ok(raw) => handle.dispatch(sender_tab.map(|tab| tab as TabId), raw).await,
                Err(e) => Response::failure(format!("malformed message: {}", e)),
            };
            response_to_js(&response)
        })
    }

    #[wasm_bindgen(js_name = tabRemoved)]
    pub fn tab_removed(&self, tab_id: i32) -> Promise {
        let handle = self.handle.clone();
        future_to_promise(async move {
            handle
                .tab_removed(tab_id as TabId)
                .await
                .map_err(|e| JsValue::from_str(&e.to_string()))?;
            Ok(JsValue::UNDEFINED)
        })
    }

    pub fn alarm(&self, name: String) -> Promise {
        let handle = self.handle.clone();
        future_to_promise(async move {
            match handle.on_alarm(&name).await {
                Some(response) => response_to_js(&response),
                None => Ok(JsValue::UNDEFINED),
            }
        })
    }

    /// Re-register the tracker on all granted origins, then inject it into
    /// open tabs under the new ones.
    #[wasm_bindgen(js_name = permissionsAdded)]
    pub fn permissions_added(&self, origins: JsValue) -> Promise {
        let notifier = self.notifier.clone();
        future_to_promise(async move {
            let origins: Vec<String> = serde_wasm_bindgen::from_value(origins)
                .map_err(|e| JsValue::from_str(&e.to_string()))?;
            if origins.is_empty() {
                return Ok(JsValue::FALSE);
            }

            if let Err(e) = sync_registration().await {
                log::error!("Failed to register tracker on {:?}: {}", origins, e);
                let notification = Notification::registration_failed(&origins, &e.to_string());
                notify_best_effort(notifier.as_ref(), notification).await;
                return Ok(JsValue::FALSE);
            }

            match inject_open_tabs(&origins).await {
                Ok(count) => log::info!("Injected tracker into {} open tabs", count),
                Err(e) => log::warn!("Could not list open tabs: {}", e),
            }
            Ok(JsValue::TRUE)
        })
    }

    /// Drop the registration and rebuild it from the origins still granted.
    #[wasm_bindgen(js_name = permissionsRemoved)]
    pub fn permissions_removed(&self) -> Promise {
        future_to_promise(async move {
            if let Err(e) = bridge::unregister_content_scripts().await {
                log::debug!("{}", e);
            }
            match sync_registration().await {
                Ok(count) => Ok(JsValue::from(count as u32)),
                Err(e) => {
                    log::error!("Failed to re-register tracker: {}", e);
                    Ok(JsValue::FALSE)
                }
            }
        })
    }
}
