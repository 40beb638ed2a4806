//! Periodic check of bookmarked series pages for new chapters or episodes.
//!
//! Every bookmark is fetched concurrently with its own timeout. The whole
//! list is written back once after all fetches have settled, so a check
//! cycle is one collection replace. A bookmark edited by the user while a
//! cycle is in flight loses that edit (last writer wins on the collection).

use std::cell::Cell;
use std::rc::Rc;
use std::sync::LazyLock;

use async_trait::async_trait;
use futures::future::{self, Either};
use regex::Regex;
use serde_json::Value;

use crate::coordinator::effects::{
    notify_best_effort, set_badge_best_effort, Badge, Clock, Notification, Notifier,
};
use crate::domain::extract_hostname;
use crate::error::{Result, TrackerError};
use crate::media::{CheckedAt, SeriesBookmark};
use crate::settings::should_notify;
use crate::storage::{StorageBridge, StorageKey};

static CHAPTER_MENTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(?:Episode|Ep\.|Chapter|Ch\.)\s*(\d+(?:\.\d+)?)").expect("valid chapter pattern")
});

static LEADING_NUMBER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*[+-]?(?:\d+(?:\.\d*)?|\.\d+)").expect("valid number pattern")
});

/// A chapter or episode number as it appeared on the page.
#[derive(Debug, Clone, PartialEq)]
pub struct ChapterNumber {
    pub raw: String,
    pub value: f64,
}

/// Numeric value of the leading number in `text`, ignoring anything after
/// it (`"12.5 - Finale"` is 12.5). `None` when the text does not start with
/// a number.
pub fn parse_chapter_value(text: &str) -> Option<f64> {
    let found = LEADING_NUMBER.find(text)?;
    found.as_str().trim().parse().ok()
}

/// Extracts the newest chapter number from a fetched page.
pub trait ChapterParser {
    fn parse(&self, page_text: &str) -> Option<ChapterNumber>;
}

/// Scans for `Episode N`, `Ep. N`, `Chapter N` and `Ch. N` and keeps the
/// highest N. Equal values keep the earliest mention.
#[derive(Debug, Default, Clone, Copy)]
pub struct GenericChapterParser;

impl ChapterParser for GenericChapterParser {
    fn parse(&self, page_text: &str) -> Option<ChapterNumber> {
        let mut best: Option<ChapterNumber> = None;
        for captures in CHAPTER_MENTION.captures_iter(page_text) {
            let raw = &captures[1];
            let Some(value) = parse_chapter_value(raw) else {
                continue;
            };
            if best.as_ref().is_none_or(|b| value > b.value) {
                best = Some(ChapterNumber {
                    raw: raw.to_string(),
                    value,
                });
            }
        }
        best
    }
}

/// Host-specific parsers with a generic fallback. Hosts are matched by
/// substring of the bookmark's hostname, first registration wins.
pub struct ParserRegistry {
    by_host: Vec<(String, Box<dyn ChapterParser>)>,
    fallback: Box<dyn ChapterParser>,
}

impl Default for ParserRegistry {
    fn default() -> Self {
        ParserRegistry {
            by_host: Vec::new(),
            fallback: Box::new(GenericChapterParser),
        }
    }
}

impl ParserRegistry {
    pub fn register(&mut self, host_fragment: &str, parser: Box<dyn ChapterParser>) {
        self.by_host.push((host_fragment.to_lowercase(), parser));
    }

    pub fn parser_for(&self, url: &str) -> &dyn ChapterParser {
        let host = extract_hostname(url).unwrap_or_default();
        self.by_host
            .iter()
            .find(|(fragment, _)| host.contains(fragment.as_str()))
            .map(|(_, parser)| parser.as_ref())
            .unwrap_or(self.fallback.as_ref())
    }
}

/// True when a numeric latest chapter was found and it is ahead of the
/// reader, or the reader has no recorded position yet.
pub fn has_update(current_chapter: Option<&str>, latest: Option<&ChapterNumber>) -> bool {
    let Some(latest) = latest else {
        return false;
    };
    match current_chapter.map(str::trim).filter(|c| !c.is_empty()) {
        None => true,
        Some(current) => match parse_chapter_value(current) {
            Some(current) => latest.value > current,
            None => false,
        },
    }
}

fn known_latest(bookmark: &SeriesBookmark) -> Option<ChapterNumber> {
    let raw = bookmark.latest_episode.as_deref()?;
    Some(ChapterNumber {
        raw: raw.to_string(),
        value: parse_chapter_value(raw)?,
    })
}

#[async_trait(?Send)]
pub trait PageFetcher {
    /// GET `url` and return the body. Non-success statuses are errors.
    async fn fetch_text(&self, url: &str) -> Result<String>;
}

/// Outcome of one check cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CycleReport {
    /// Entries in the bookmark list, checked or not.
    pub checked: usize,
    /// Bookmarks whose update flag went from false to true.
    pub newly_updated: usize,
    pub failed: usize,
}

struct CycleGuard<'a>(&'a Cell<bool>);

impl<'a> CycleGuard<'a> {
    fn acquire(flag: &'a Cell<bool>) -> Option<Self> {
        if flag.replace(true) {
            None
        } else {
            Some(CycleGuard(flag))
        }
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}

pub struct SeriesUpdateChecker {
    storage: StorageBridge,
    fetcher: Rc<dyn PageFetcher>,
    notifier: Rc<dyn Notifier>,
    clock: Rc<dyn Clock>,
    parsers: ParserRegistry,
    fetch_timeout_ms: u32,
    in_progress: Cell<bool>,
}

impl SeriesUpdateChecker {
    pub fn new(
        storage: StorageBridge,
        fetcher: Rc<dyn PageFetcher>,
        notifier: Rc<dyn Notifier>,
        clock: Rc<dyn Clock>,
        fetch_timeout_ms: u32,
    ) -> Self {
        SeriesUpdateChecker {
            storage,
            fetcher,
            notifier,
            clock,
            parsers: ParserRegistry::default(),
            fetch_timeout_ms,
            in_progress: Cell::new(false),
        }
    }

    pub fn with_parsers(mut self, parsers: ParserRegistry) -> Self {
        self.parsers = parsers;
        self
    }

    pub fn is_running(&self) -> bool {
        self.in_progress.get()
    }

    /// Fetch every bookmark, update flags, write the list back once and
    /// announce new content. Fails with [`TrackerError::CheckInProgress`]
    /// when another cycle has not finished yet.
    pub async fn run_cycle(&self) -> Result<CycleReport> {
        let _guard = CycleGuard::acquire(&self.in_progress).ok_or(TrackerError::CheckInProgress)?;

        let entries: Vec<Value> = self.storage.load_list(StorageKey::SeriesBookmarks).await?;
        let parsed: Vec<Option<SeriesBookmark>> = entries
            .iter()
            .map(|entry| serde_json::from_value(entry.clone()).ok())
            .collect();

        let fetches = parsed.iter().map(|bookmark| async move {
            match bookmark {
                Some(bookmark) => Some(self.fetch_latest(&bookmark.url).await),
                None => None,
            }
        });
        let results = future::join_all(fetches).await;

        let now = self.clock.now_ms();
        let mut report = CycleReport {
            checked: entries.len(),
            ..CycleReport::default()
        };
        let mut written = Vec::with_capacity(entries.len());

        for ((entry, bookmark), result) in entries.into_iter().zip(parsed).zip(results) {
            let (Some(mut bookmark), Some(result)) = (bookmark, result) else {
                log::warn!("Skipping unreadable series bookmark: {}", entry);
                written.push(entry);
                continue;
            };

            match result {
                Ok(found) => {
                    // A page without a chapter mention keeps the last known one.
                    let latest = found.or_else(|| known_latest(&bookmark));
                    let flag = has_update(bookmark.current_chapter.as_deref(), latest.as_ref());
                    if flag && !bookmark.has_update {
                        report.newly_updated += 1;
                    }
                    bookmark.has_update = flag;
                    if let Some(latest) = latest {
                        bookmark.latest_episode = Some(latest.raw);
                    }
                }
                Err(e) => {
                    log::warn!("Series check failed for {}: {}", bookmark.url, e);
                    report.failed += 1;
                }
            }
            bookmark.last_checked = Some(CheckedAt::Millis(now));
            written.push(serde_json::to_value(&bookmark)?);
        }

        self.storage.save(StorageKey::SeriesBookmarks, &written).await?;
        log::info!(
            "Series check finished: {} bookmarks, {} new, {} failed",
            report.checked,
            report.newly_updated,
            report.failed
        );

        if report.newly_updated > 0 {
            set_badge_best_effort(self.notifier.as_ref(), Badge::SeriesUpdate).await;
            if should_notify(&self.storage).await {
                notify_best_effort(
                    self.notifier.as_ref(),
                    Notification::series_updates(report.newly_updated),
                )
                .await;
            }
        }

        Ok(report)
    }

    async fn fetch_latest(&self, url: &str) -> Result<Option<ChapterNumber>> {
        let fetch = self.fetcher.fetch_text(url);
        let timeout = self.clock.sleep(self.fetch_timeout_ms);

        match future::select(fetch, timeout).await {
            Either::Left((body, _)) => Ok(self.parsers.parser_for(url).parse(&body?)),
            Either::Right(_) => Err(TrackerError::Timeout {
                url: url.to_string(),
                after_ms: self.fetch_timeout_ms,
            }),
        }
    }

    /// Move every reader to the latest known chapter and clear the flags.
    pub async fn mark_all_read(&self) -> Result<usize> {
        let entries: Vec<Value> = self.storage.load_list(StorageKey::SeriesBookmarks).await?;
        let mut written = Vec::with_capacity(entries.len());

        for entry in entries {
            match serde_json::from_value::<SeriesBookmark>(entry.clone()) {
                Ok(mut bookmark) => {
                    if bookmark.latest_episode.is_some() {
                        bookmark.current_chapter = bookmark.latest_episode.clone();
                    }
                    bookmark.has_update = false;
                    written.push(serde_json::to_value(&bookmark)?);
                }
                Err(e) => {
                    log::warn!("Leaving unreadable series bookmark as is: {}", e);
                    written.push(entry);
                }
            }
        }

        self.storage.save(StorageKey::SeriesBookmarks, &written).await?;
        set_badge_best_effort(self.notifier.as_ref(), Badge::Clear).await;
        Ok(written.len())
    }

    /// Append a bookmark. A missing id gets a generated one.
    pub async fn add_bookmark(&self, mut bookmark: SeriesBookmark) -> Result<SeriesBookmark> {
        if bookmark.id.is_empty() {
            bookmark.id = format!("series-{}", uuid::Uuid::new_v4());
        }
        bookmark.has_update = false;
        bookmark.last_checked = Some(CheckedAt::Millis(self.clock.now_ms()));

        let mut entries: Vec<Value> = self.storage.load_list(StorageKey::SeriesBookmarks).await?;
        entries.push(serde_json::to_value(&bookmark)?);
        self.storage.save(StorageKey::SeriesBookmarks, &entries).await?;

        log::info!("Bookmarked series {}", bookmark.title);
        Ok(bookmark)
    }

    pub async fn bookmarks(&self) -> Result<Vec<Value>> {
        self.storage.load_list(StorageKey::SeriesBookmarks).await
    }
}
