/// Content-script side: DOM probing and the exported tracker handle.

use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;
use wasm_bindgen::prelude::*;
use wasm_bindgen::JsCast;
use web_sys::{Document, HtmlMediaElement, Window};

use super::bridge::{ChromeStorage, RuntimeSink};
use crate::completion::PagePosition;
use crate::error::{Result, TrackerError};
use crate::media::CustomSite;
use crate::platforms::match_platform;
use crate::settings;
use crate::storage::{StorageBridge, StorageKey};
use crate::tracker::{ContentTracker, PageView, TrackerConfig, VideoState};

/// Page counters rendered by paged readers, e.g. "3 / 20".
const PAGE_INDICATOR_SELECTORS: &[&str] = &[
    ".md--progress-page",
    "[class*='page-number']",
    "[class*='page-indicator']",
    ".reader-page-count",
];

static PAGE_COUNTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+)\s*(?:/|of)\s*(\d+)").expect("valid page counter pattern"));

pub struct DomView {
    window: Window,
    document: Document,
}

impl DomView {
    pub fn new() -> Option<Self> {
        let window = web_sys::window()?;
        let document = window.document()?;
        Some(DomView { window, document })
    }

    fn query(&self, selector: &str) -> Result<Option<web_sys::Element>> {
        self.document
            .query_selector(selector)
            .map_err(|e| TrackerError::Browser(format!("{:?}", e)))
    }
}

impl PageView for DomView {
    fn location(&self) -> String {
        self.window.location().href().unwrap_or_default()
    }

    fn first_text(&self, selectors: &[&str]) -> Result<Option<String>> {
        for selector in selectors {
            let Some(element) = self.query(selector)? else {
                continue;
            };
            let text = element.text_content().unwrap_or_default();
            let text = text.trim();
            if !text.is_empty() {
                return Ok(Some(text.to_string()));
            }
        }
        Ok(None)
    }

    fn meta_content(&self, property: &str) -> Option<String> {
        let selector = format!("meta[property=\"{}\"]", property);
        let element = self.query(&selector).ok().flatten()?;
        element
            .get_attribute("content")
            .filter(|content| !content.trim().is_empty())
    }

    fn document_title(&self) -> Option<String> {
        let title = self.document.title();
        (!title.trim().is_empty()).then_some(title)
    }

    fn video_state(&self) -> Option<VideoState> {
        let video = self
            .query("video")
            .ok()
            .flatten()?
            .dyn_into::<HtmlMediaElement>()
            .ok()?;
        let duration = video.duration();
        Some(VideoState {
            current_time: video.current_time(),
            duration: if duration.is_finite() { duration } else { 0.0 },
        })
    }

    fn scroll_progress(&self) -> f64 {
        let Some(root) = self.document.document_element() else {
            return 0.0;
        };
        let scrollable = f64::from(root.scroll_height() - root.client_height());
        if scrollable <= 0.0 {
            return 0.0;
        }
        let top = self.window.scroll_y().unwrap_or(0.0);
        (top / scrollable * 100.0).clamp(0.0, 100.0)
    }

    fn page_position(&self) -> Option<PagePosition> {
        let text = self.first_text(PAGE_INDICATOR_SELECTORS).ok().flatten()?;
        let captures = PAGE_COUNTER.captures(&text)?;
        Some(PagePosition {
            current: captures[1].parse().ok()?,
            total: captures[2].parse().ok()?,
        })
    }
}

#[wasm_bindgen]
pub struct PageTracker {
    tracker: ContentTracker,
}

/// Resolve the current page against the registry and start tracking.
/// Resolves to `null` when the page is not a supported site or tracking
/// is switched off.
#[wasm_bindgen]
pub async fn start_content_tracker() -> std::result::Result<JsValue, JsValue> {
    let view = DomView::new().ok_or_else(|| JsValue::from_str("no document"))?;
    let storage = StorageBridge::new(Rc::new(ChromeStorage));
    let to_js = |e: TrackerError| JsValue::from_str(&e.to_string());

    let settings = settings::load_settings(&storage).await.map_err(to_js)?;
    if !settings.tracking_enabled {
        log::info!("Tracking is disabled");
        return Ok(JsValue::NULL);
    }

    let custom_sites: Vec<CustomSite> = storage
        .load_list(StorageKey::CustomSites)
        .await
        .map_err(to_js)?;
    let location = view.location();
    let Some(platform) = match_platform(&location, &custom_sites) else {
        log::debug!("No platform for {}", location);
        return Ok(JsValue::NULL);
    };

    let now = js_sys::Date::now();
    let mut tracker = ContentTracker::new(
        platform,
        Rc::new(view),
        Rc::new(RuntimeSink),
        Box::new(settings.completion),
        TrackerConfig::default(),
        now,
    );
    tracker.start(now);
    Ok(PageTracker { tracker }.into())
}

#[wasm_bindgen]
impl PageTracker {
    pub fn tick(&mut self) {
        self.tracker.tick(js_sys::Date::now());
    }

    #[wasm_bindgen(js_name = noteActivity)]
    pub fn note_activity(&mut self) {
        self.tracker.note_activity(js_sys::Date::now());
    }

    pub fn stop(&mut self) {
        self.tracker.stop(js_sys::Date::now());
    }

    pub fn reinitialize(&mut self) -> bool {
        self.tracker.reinitialize(js_sys::Date::now())
    }

    #[wasm_bindgen(js_name = wantsApiResponse)]
    pub fn wants_api_response(&self, url: &str) -> bool {
        self.tracker.wants_api_response(url)
    }

    #[wasm_bindgen(js_name = observeApiResponse)]
    pub fn observe_api_response(&mut self, url: &str, body: &str) -> bool {
        self.tracker.observe_api_response(url, body)
    }

    #[wasm_bindgen(js_name = updateIntervalMs)]
    pub fn update_interval_ms(&self) -> f64 {
        TrackerConfig::default().update_interval_ms
    }

    /// `{isTracking, session}` for `GET_TRACKING_STATUS`.
    pub fn status(&self) -> std::result::Result<JsValue, JsValue> {
        let serializer = serde_wasm_bindgen::Serializer::json_compatible();
        serde::Serialize::serialize(&self.tracker.status_reply(), &serializer)
            .map_err(|e| JsValue::from_str(&e.to_string()))
    }

    pub fn platform(&self) -> String {
        self.tracker.platform().name.clone()
    }
}
