//! Per-tab media tracker.
//!
//! The tracker owns no timers. The page glue calls [`ContentTracker::tick`]
//! on an interval and on DOM activity; the tracker samples the page through
//! a [`PageView`], keeps a local copy of the session and reports lifecycle
//! messages through a [`MessageSink`]. Updates are throttled to one per
//! [`TrackerConfig::update_interval_ms`].

use std::rc::Rc;
use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::completion::{CompletionRule, PagePosition, ProgressSample};
use crate::error::Result;
use crate::media::{CompletedMedia, MediaInfo, MediaPatch};
use crate::metadata::{apply_metadata, is_metadata_url, parse_api_response, MediaMetadata, PLACEHOLDER_TITLE};
use crate::platforms::MatchedPlatform;
use crate::protocol::Request;

const SERIES_TITLE_SELECTORS: &[&str] = &[
    ".subj",
    ".info a.subj",
    "a.subj_info",
    "[class*=\"series\"] a",
    ".og-title",
    ".manga-title a",
    ".manga-info-title",
    ".series-title",
    ".manga-title",
    ".comic-title",
];

const EPISODE_TITLE_SELECTORS: &[&str] = &[
    ".subj_episode",
    ".episode__title",
    "h1.subj_episode",
    ".detail_lst .subj",
    ".chapter-title",
    ".episode-title",
    ".reader-header-title",
    "h1",
];

const VIDEO_TITLE_SELECTORS: &[&str] = &[
    ".heading-name",
    ".film-name",
    ".movie-title",
    ".video-title",
    ".dp-i-title",
    ".title h1",
    "h1.title",
    ".detail-page h1",
    ".movie-info h1",
    ".video-info h1",
    "h1",
];

static URL_CHAPTER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [
        r"(?i)chapter[/-](\d+(?:\.\d+)?)",
        r"(?i)ch[/-](\d+(?:\.\d+)?)",
        r"(?i)episode[/-]no?[/-]?(\d+)",
        r"(?i)episode[/-](\d+)",
        r"(?i)ep[/-](\d+(?:\.\d+)?)",
        r"(?i)s\d+-ep-(\d+)",
        r"(?i)episode_no=(\d+)",
        r"/(\d+)/?(?:\?|$)",
    ]
    .iter()
    .map(|pattern| Regex::new(pattern).expect("valid chapter url pattern"))
    .collect()
});

static READING_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[-|]\s*(?:WEBTOONS?|Read Online|MangaDex)$").expect("valid suffix pattern")
});

static VIDEO_SUFFIX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\s*[-|]\s*(?:Watch Online|Free|HD|Full Movie)$").expect("valid suffix pattern")
});

static PERCENT: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(\d+(?:\.\d+)?)\s*%").expect("valid percent pattern"));

static NUMBER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d+(?:\.\d+)?").expect("valid number pattern"));

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TrackerConfig {
    pub update_interval_ms: f64,
    /// Without input for this long the user counts as away and active time
    /// stops accumulating.
    pub idle_after_ms: f64,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        TrackerConfig {
            update_interval_ms: 5_000.0,
            idle_after_ms: 30_000.0,
        }
    }
}

/// Playback position of the page's main video element, in seconds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VideoState {
    pub current_time: f64,
    pub duration: f64,
}

/// Read-only view of the page. Selector lookups may fail on pages that
/// reject a selector; the tracker treats that as "not found".
pub trait PageView {
    fn location(&self) -> String;
    /// Trimmed text of the first selector resolving to a non-empty element.
    fn first_text(&self, selectors: &[&str]) -> Result<Option<String>>;
    /// `content` of `<meta property=...>`.
    fn meta_content(&self, property: &str) -> Option<String>;
    fn document_title(&self) -> Option<String>;
    fn video_state(&self) -> Option<VideoState>;
    /// Percent of the reading container scrolled, 0..=100.
    fn scroll_progress(&self) -> f64;
    fn page_position(&self) -> Option<PagePosition>;
}

/// Fire-and-forget channel to the background.
pub trait MessageSink {
    fn send(&self, request: Request);
}

/// Session summary inside a [`StatusReply`].
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingStatus {
    pub title: String,
    pub platform: String,
    pub progress: f64,
    pub watch_time: f64,
}

/// Answer to a `GET_TRACKING_STATUS` query sent to the page.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReply {
    pub is_tracking: bool,
    pub session: Option<TrackingStatus>,
}

#[derive(Debug, Clone)]
struct LocalSession {
    info: MediaInfo,
    start_time: f64,
    watch_time: f64,
    completed: bool,
    last_sent: Option<f64>,
}

pub struct ContentTracker {
    platform: MatchedPlatform,
    view: Rc<dyn PageView>,
    sink: Rc<dyn MessageSink>,
    rule: Box<dyn CompletionRule>,
    config: TrackerConfig,
    api_pattern: Option<Regex>,
    session: Option<LocalSession>,
    captured: MediaMetadata,
    active_ms: f64,
    last_tick: Option<f64>,
    last_activity: f64,
    max_scroll: f64,
}

impl ContentTracker {
    pub fn new(
        platform: MatchedPlatform,
        view: Rc<dyn PageView>,
        sink: Rc<dyn MessageSink>,
        rule: Box<dyn CompletionRule>,
        config: TrackerConfig,
        now: f64,
    ) -> Self {
        let api_pattern = platform.api_pattern.and_then(|pattern| match Regex::new(pattern) {
            Ok(regex) => Some(regex),
            Err(e) => {
                log::warn!("Ignoring API pattern for {}: {}", platform.name, e);
                None
            }
        });

        ContentTracker {
            platform,
            view,
            sink,
            rule,
            config,
            api_pattern,
            session: None,
            captured: MediaMetadata::default(),
            active_ms: 0.0,
            last_tick: None,
            last_activity: now,
            max_scroll: 0.0,
        }
    }

    pub fn platform(&self) -> &MatchedPlatform {
        &self.platform
    }

    pub fn is_tracking(&self) -> bool {
        self.session.is_some()
    }

    pub fn status(&self) -> Option<TrackingStatus> {
        self.session.as_ref().map(|session| TrackingStatus {
            title: session.info.title.clone(),
            platform: session.info.platform.clone(),
            progress: session.info.progress,
            watch_time: session.watch_time,
        })
    }

    pub fn status_reply(&self) -> StatusReply {
        StatusReply {
            is_tracking: self.is_tracking(),
            session: self.status(),
        }
    }

    /// User input seen on the page.
    pub fn note_activity(&mut self, now: f64) {
        self.last_activity = now;
    }

    /// Start a session if the page yields media info. Returns whether a
    /// session is running afterwards.
    pub fn start(&mut self, now: f64) -> bool {
        if self.session.is_some() {
            return true;
        }
        let Some(mut info) = self.extract_media_info(now) else {
            log::debug!("No media info on {} yet", self.platform.name);
            return false;
        };
        apply_metadata(&mut info, &self.captured);

        log::info!("Tracking {} on {}", info.title, info.platform);
        self.sink.send(Request::TrackingStart(info.clone()));
        self.session = Some(LocalSession {
            info,
            start_time: now,
            watch_time: 0.0,
            completed: false,
            last_sent: Some(now),
        });
        self.active_ms = 0.0;
        self.max_scroll = 0.0;
        true
    }

    /// Sample the page, accumulate active time and report progress.
    pub fn tick(&mut self, now: f64) {
        let elapsed = self.last_tick.map_or(0.0, |last| (now - last).max(0.0));
        self.last_tick = Some(now);
        if now - self.last_activity <= self.config.idle_after_ms {
            self.active_ms += elapsed;
        }

        let location = self.view.location();
        let moved = self.session.as_ref().is_some_and(|s| s.info.url != location);
        if moved {
            log::info!("Page moved to {}, restarting session", location);
            self.stop(now);
            self.captured = MediaMetadata::default();
        }

        if self.session.is_none() && !self.start(now) {
            return;
        }

        self.sample(now);
    }

    /// Send a final update and end the session. Once the page has moved on,
    /// the final update carries the last sampled state of the old media.
    pub fn stop(&mut self, now: f64) {
        let Some(session) = self.session.as_ref() else {
            return;
        };
        if session.info.url == self.view.location() {
            self.sample(now);
        }
        if let Some(session) = self.session.as_mut() {
            session.last_sent = None;
        }
        self.send_update(now);
        self.sink.send(Request::TrackingEnd);
        self.session = None;
        self.active_ms = 0.0;
        self.max_scroll = 0.0;
    }

    /// Start tracking again after the page became trackable, e.g. once the
    /// user granted host permission.
    pub fn reinitialize(&mut self, now: f64) -> bool {
        self.start(now)
    }

    /// Whether the page glue should hand this response to
    /// [`observe_api_response`](Self::observe_api_response).
    pub fn wants_api_response(&self, url: &str) -> bool {
        is_metadata_url(url) || self.api_pattern.as_ref().is_some_and(|p| p.is_match(url))
    }

    /// Merge metadata from an intercepted API response.
    pub fn observe_api_response(&mut self, url: &str, body: &str) -> bool {
        let Some(metadata) = parse_api_response(url, body) else {
            return false;
        };
        log::debug!("Captured metadata from {}: {:?}", url, metadata);

        if let Some(session) = self.session.as_mut() {
            apply_metadata(&mut session.info, &metadata);
        }
        self.captured.merge(metadata);
        true
    }

    fn sample(&mut self, now: f64) {
        let view = Rc::clone(&self.view);
        let reading = self.platform.media_type.is_reading();
        let scroll = view.scroll_progress().clamp(0.0, 100.0);
        self.max_scroll = self.max_scroll.max(scroll);
        let page = view.page_position().filter(|p| p.total > 0);
        let fresh = self.extract_media_info(now);
        let active_secs = self.active_ms / 1000.0;
        let max_scroll = self.max_scroll;

        let Some(session) = self.session.as_mut() else {
            return;
        };
        let info = &mut session.info;
        info.timestamp = now;

        if let Some(fresh) = fresh {
            if fresh.duration.is_some() {
                info.duration = fresh.duration;
            }
            if fresh.chapter.is_some() {
                info.chapter = fresh.chapter;
            }
            if fresh.episode.is_some() {
                info.episode = fresh.episode;
            }
            if info.thumbnail.is_none() {
                info.thumbnail = fresh.thumbnail;
            }
            info.progress = fresh.progress;
        }

        if reading {
            info.progress = match page {
                Some(page) => (page.current as f64 / page.total as f64 * 100.0).round(),
                None => max_scroll,
            };
            session.watch_time = active_secs.round();
        } else if let Some(video) = view.video_state().filter(|v| v.duration > 0.0) {
            session.watch_time = video.current_time;
        } else {
            session.watch_time = active_secs;
            if let Some(duration) = info.duration.filter(|d| *d > 0.0) {
                info.progress = (active_secs / duration * 100.0).round().min(100.0);
            }
        }

        let sample = ProgressSample {
            platform: &info.platform,
            media_type: info.media_type,
            progress: if reading { info.progress.max(max_scroll) } else { info.progress },
            duration: info.duration,
            page,
        };
        let just_completed = !session.completed && self.rule.is_complete(&sample);

        if just_completed {
            session.completed = true;
            log::info!("Completed {}", session.info.title);
            self.sink.send(Request::MediaCompleted(CompletedMedia {
                media: session.info.clone(),
                watch_time: Some(session.watch_time),
            }));
            session.last_sent = None;
        }

        self.send_update(now);
    }

    fn send_update(&mut self, now: f64) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        if let Some(last) = session.last_sent {
            if now - last < self.config.update_interval_ms {
                return;
            }
        }
        session.last_sent = Some(now);

        let info = &session.info;
        self.sink.send(Request::TrackingUpdate(MediaPatch {
            platform: Some(info.platform.clone()),
            media_type: Some(info.media_type),
            title: Some(info.title.clone()),
            url: Some(info.url.clone()),
            progress: Some(info.progress),
            duration: info.duration,
            thumbnail: info.thumbnail.clone(),
            chapter: info.chapter.clone(),
            episode: info.episode.clone(),
            watch_time: Some(session.watch_time.round()),
            completed: Some(session.completed),
            start_time: Some(session.start_time),
        }));
    }

    fn text(&self, selectors: &[&str]) -> Option<String> {
        match self.view.first_text(selectors) {
            Ok(text) => text.filter(|t| !t.trim().is_empty()),
            Err(e) => {
                log::debug!("Selector lookup failed on {}: {}", self.platform.name, e);
                None
            }
        }
    }

    fn extract_media_info(&self, now: f64) -> Option<MediaInfo> {
        let url = self.view.location();
        let media_type = self.platform.media_type;
        let thumbnail = self.view.meta_content("og:image").filter(|t| !t.is_empty());
        let url_chapter = chapter_from_url(&url);

        let mut duration = None;
        let mut progress = 0.0;
        let mut chapter = None;
        let mut episode = None;

        let mut title = if media_type.is_reading() {
            if let Some(number) = &url_chapter {
                chapter = Some(format!("Chapter {}", number));
                episode = Some(number.clone());
            }
            if let Some(page) = self.view.page_position().filter(|p| p.total > 0) {
                progress = (page.current as f64 / page.total as f64 * 100.0).round();
            } else {
                progress = self.view.scroll_progress().clamp(0.0, 100.0);
            }
            self.reading_title(chapter.as_deref())
                .map(|t| strip_suffixes(&t, &READING_SUFFIX))
        } else {
            if let Some(video) = self.view.video_state().filter(|v| v.duration > 0.0) {
                duration = Some(video.duration);
                progress = video.current_time / video.duration * 100.0;
            } else if let Some(percent) = self.text(self.platform.selectors.progress).as_deref().and_then(percent_in) {
                progress = percent;
            }
            episode = url_chapter.or_else(|| {
                self.text(self.platform.selectors.episode)
                    .and_then(|t| NUMBER.find(&t).map(|m| m.as_str().to_string()))
            });
            self.video_title().map(|t| strip_suffixes(&t, &VIDEO_SUFFIX))
        };

        if title.as_deref().is_none_or(str::is_empty) {
            title = self
                .view
                .document_title()
                .map(|t| cut_document_title(&t))
                .filter(|t| !t.is_empty());
        }
        if title.is_none() {
            title = self.captured.title.clone();
        }
        let title = match title {
            Some(title) => title,
            None if media_type.is_reading() => slug_title(&url).unwrap_or_else(|| PLACEHOLDER_TITLE.to_string()),
            None => return None,
        };

        Some(MediaInfo {
            platform: self.platform.name.clone(),
            media_type,
            title,
            url,
            progress,
            duration,
            thumbnail,
            timestamp: now,
            chapter,
            episode,
        })
    }

    fn reading_title(&self, chapter: Option<&str>) -> Option<String> {
        let mut series = self.text(SERIES_TITLE_SELECTORS).filter(|t| t.chars().count() > 2);
        if series.is_none() {
            series = self
                .view
                .meta_content("og:site_name")
                .map(|t| t.trim().to_string())
                .filter(|t| !t.is_empty() && !t.to_lowercase().contains("webtoon"));
        }
        let mut episode = self
            .text(EPISODE_TITLE_SELECTORS)
            .or_else(|| self.text(self.platform.selectors.title))
            .filter(|t| t.chars().count() > 2);

        if series.is_none() && episode.is_none() {
            if let Some(og_title) = self.view.meta_content("og:title") {
                let parts: Vec<&str> = og_title
                    .split(['-', '|'])
                    .map(str::trim)
                    .filter(|p| !p.is_empty())
                    .collect();
                match parts.as_slice() {
                    [] => {}
                    [only] => episode = Some(only.to_string()),
                    [first, rest @ ..] => {
                        series = Some(first.to_string());
                        episode = Some(rest.join(" - "));
                    }
                }
            }
        }

        match (series, episode) {
            (Some(series), Some(episode)) if !episode.contains(&series) => {
                Some(format!("{} - {}", series, episode))
            }
            (Some(series), _) if chapter.is_some() => {
                Some(format!("{} - {}", series, chapter.unwrap_or_default()))
            }
            (_, Some(episode)) => Some(episode),
            (series, None) => series,
        }
    }

    fn video_title(&self) -> Option<String> {
        self.text(self.platform.selectors.title)
            .filter(|t| t.chars().count() > 1)
            .or_else(|| self.text(VIDEO_TITLE_SELECTORS).filter(|t| t.chars().count() > 2))
            .or_else(|| {
                self.view
                    .meta_content("og:title")
                    .map(|t| t.trim().to_string())
                    .filter(|t| !t.is_empty())
            })
    }
}

/// Chapter or episode number carried in the page address
/// (`/chapter-12.5`, `/ep-3`, `?episode_no=7`, a trailing `/42`).
pub fn chapter_from_url(url: &str) -> Option<String> {
    URL_CHAPTER_PATTERNS
        .iter()
        .find_map(|pattern| pattern.captures(url).map(|c| c[1].to_string()))
}

fn strip_suffixes(title: &str, suffix: &Regex) -> String {
    let mut title = title.trim().to_string();
    loop {
        let stripped = suffix.replace(&title, "").trim().to_string();
        if stripped == title || stripped.is_empty() {
            return title;
        }
        title = stripped;
    }
}

/// Site name and separators dropped from a document title.
pub fn cut_document_title(title: &str) -> String {
    let head = title.split('|').next().unwrap_or_default();
    head.split(" - ").next().unwrap_or_default().trim().to_string()
}

/// Title derived from the first non-numeric path segment longer than three
/// characters (`/12/the-price-is-right` → `The Price Is Right`,
/// `/series/the-price-is-right/12` → `Series`).
pub fn slug_title(url: &str) -> Option<String> {
    let path = match url::Url::parse(url) {
        Ok(parsed) => parsed.path().to_string(),
        Err(_) => url.split(['?', '#']).next().unwrap_or_default().to_string(),
    };
    let parts: Vec<&str> = path.split('/').filter(|p| !p.is_empty()).collect();
    let slug = parts
        .iter()
        .find(|p| p.len() > 3 && !p.chars().all(|c| c.is_ascii_digit()))
        .or(parts.first())?;

    let words: Vec<String> = slug
        .split(['-', '_'])
        .filter(|w| !w.is_empty())
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect();
    (!words.is_empty()).then(|| words.join(" "))
}

fn percent_in(text: &str) -> Option<f64> {
    PERCENT
        .captures(text)
        .and_then(|c| c[1].parse::<f64>().ok())
        .map(|p| p.clamp(0.0, 100.0))
}
