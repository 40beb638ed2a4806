/// In-memory session map and the deduplicated `activeTracking` view
use std::collections::HashMap;

use crate::domain::normalize_media_url;
use crate::media::{ActiveTrackingRecord, MediaInfo, MediaPatch, MediaType, TabId, TrackingSession};

/// Result of [`SessionStore::upsert`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Patched,
    /// No session existed for the tab; one was synthesized from the patch.
    Created,
}

/// Exactly one session per tab. The map is a cache of the persisted view;
/// see [`SessionStore::rehydrate`].
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: HashMap<TabId, TrackingSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh session, replacing whatever the tab had before.
    pub fn start(&mut self, tab_id: TabId, mut media_info: MediaInfo, now: f64) -> &TrackingSession {
        media_info.timestamp = now;
        let session = TrackingSession {
            tab_id,
            media_info,
            start_time: now,
            watch_time: 0.0,
            completed: false,
        };
        self.sessions.insert(tab_id, session);
        &self.sessions[&tab_id]
    }

    /// Patch the tab's session, or create one when the tab reports before
    /// (or without) a start, e.g. after the background restarted.
    ///
    /// Patching keeps the previous value of every absent field. Creation
    /// fills absent fields with: platform `"unknown"`, type `video`, title
    /// `"Unknown"`, url empty, progress 0, watch time 0, not completed,
    /// start time `now`.
    pub fn upsert(&mut self, tab_id: TabId, patch: MediaPatch, now: f64) -> UpsertOutcome {
        if let Some(session) = self.sessions.get_mut(&tab_id) {
            apply_patch(session, patch);
            return UpsertOutcome::Patched;
        }

        let session = TrackingSession {
            tab_id,
            media_info: MediaInfo {
                platform: patch.platform.unwrap_or_else(|| "unknown".to_string()),
                media_type: patch.media_type.unwrap_or(MediaType::Video),
                title: patch.title.unwrap_or_else(|| "Unknown".to_string()),
                url: patch.url.unwrap_or_default(),
                progress: patch.progress.unwrap_or(0.0),
                duration: patch.duration,
                thumbnail: patch.thumbnail,
                timestamp: now,
                chapter: patch.chapter,
                episode: patch.episode,
            },
            start_time: patch.start_time.unwrap_or(now),
            watch_time: patch.watch_time.unwrap_or(0.0),
            completed: patch.completed.unwrap_or(false),
        };
        self.sessions.insert(tab_id, session);
        UpsertOutcome::Created
    }

    /// Remove the tab's session. Absent sessions are not an error.
    pub fn end(&mut self, tab_id: TabId) -> Option<TrackingSession> {
        self.sessions.remove(&tab_id)
    }

    /// Flag the tab's session completed; returns whether one existed.
    pub fn mark_completed(&mut self, tab_id: TabId) -> bool {
        match self.sessions.get_mut(&tab_id) {
            Some(session) => {
                session.completed = true;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, tab_id: TabId) -> Option<&TrackingSession> {
        self.sessions.get(&tab_id)
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Owned copy of every session, ordered by tab id.
    pub fn snapshot(&self) -> Vec<TrackingSession> {
        let mut sessions: Vec<TrackingSession> = self.sessions.values().cloned().collect();
        sessions.sort_by_key(|s| s.tab_id);
        sessions
    }

    /// The consumer-facing view: one record per normalized URL.
    pub fn active_view(&self, now: f64) -> Vec<ActiveTrackingRecord> {
        dedup_by_url(&self.snapshot())
            .into_iter()
            .map(|session| to_record(session, now))
            .collect()
    }

    /// Seed the cache from a persisted view. Tabs already present win;
    /// records the view dropped during dedup are gone for good.
    pub fn rehydrate(&mut self, records: &[ActiveTrackingRecord]) -> usize {
        let mut restored = 0;
        for record in records {
            if self.sessions.contains_key(&record.tab_id) {
                continue;
            }
            self.sessions.insert(record.tab_id, from_record(record));
            restored += 1;
        }
        restored
    }
}

fn apply_patch(session: &mut TrackingSession, patch: MediaPatch) {
    let info = &mut session.media_info;
    if let Some(platform) = patch.platform {
        info.platform = platform;
    }
    if let Some(media_type) = patch.media_type {
        info.media_type = media_type;
    }
    if let Some(title) = patch.title {
        info.title = title;
    }
    if let Some(url) = patch.url {
        info.url = url;
    }
    if let Some(progress) = patch.progress {
        info.progress = progress;
    }
    if patch.duration.is_some() {
        info.duration = patch.duration;
    }
    if patch.thumbnail.is_some() {
        info.thumbnail = patch.thumbnail;
    }
    if patch.chapter.is_some() {
        info.chapter = patch.chapter;
    }
    if patch.episode.is_some() {
        info.episode = patch.episode;
    }
    if let Some(watch_time) = patch.watch_time {
        session.watch_time = watch_time;
    }
    // A tracker may clear completion when the page says so (e.g. a rewatch).
    if let Some(completed) = patch.completed {
        session.completed = completed;
    }
}

/// Keep one session per normalized URL: the one with the greatest watch
/// time, the earlier one on ties. Output follows input order of the kept
/// sessions.
pub fn dedup_by_url(sessions: &[TrackingSession]) -> Vec<&TrackingSession> {
    let mut best: HashMap<String, usize> = HashMap::new();
    let mut order: Vec<String> = Vec::new();

    for (index, session) in sessions.iter().enumerate() {
        let key = normalize_media_url(&session.media_info.url);
        match best.get(&key) {
            Some(&kept) if sessions[kept].watch_time >= session.watch_time => {}
            Some(_) => {
                best.insert(key, index);
            }
            None => {
                best.insert(key.clone(), index);
                order.push(key);
            }
        }
    }

    order.iter().map(|key| &sessions[best[key]]).collect()
}

fn to_record(session: &TrackingSession, now: f64) -> ActiveTrackingRecord {
    let info = &session.media_info;
    ActiveTrackingRecord {
        id: format!("track-{}-{}", session.tab_id, session.start_time),
        tab_id: session.tab_id,
        platform: info.platform.clone(),
        media_type: info.media_type,
        title: info.title.clone(),
        url: info.url.clone(),
        progress: info.progress,
        duration: info.duration.unwrap_or(0.0),
        watch_time: session.watch_time.max(0.0).round() as u64,
        thumbnail: info.thumbnail.clone().unwrap_or_default(),
        completed: session.completed,
        start_time: session.start_time,
        last_update: now,
    }
}

fn from_record(record: &ActiveTrackingRecord) -> TrackingSession {
    TrackingSession {
        tab_id: record.tab_id,
        media_info: MediaInfo {
            platform: record.platform.clone(),
            media_type: record.media_type,
            title: record.title.clone(),
            url: record.url.clone(),
            progress: record.progress,
            duration: (record.duration > 0.0).then_some(record.duration),
            thumbnail: (!record.thumbnail.is_empty()).then(|| record.thumbnail.clone()),
            timestamp: record.last_update,
            chapter: None,
            episode: None,
        },
        start_time: record.start_time,
        watch_time: record.watch_time as f64,
        completed: record.completed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const URL: &str = "https://youtube.com/watch?v=abc";

    fn create_test_media(url: &str) -> MediaInfo {
        MediaInfo {
            platform: "youtube".to_string(),
            media_type: MediaType::Video,
            title: "T".to_string(),
            url: url.to_string(),
            progress: 0.0,
            duration: None,
            thumbnail: None,
            timestamp: 0.0,
            chapter: None,
            episode: None,
        }
    }

    #[test]
    fn test_start_initializes_session() {
        let mut store = SessionStore::new();
        let session = store.start(7, create_test_media(URL), 1000.0);

        assert_eq!(session.watch_time, 0.0);
        assert!(!session.completed);
        assert_eq!(session.start_time, 1000.0);
        assert_eq!(session.media_info.timestamp, 1000.0);
    }

    #[test]
    fn test_start_overwrites_existing_session() {
        let mut store = SessionStore::new();
        store.start(7, create_test_media(URL), 1000.0);
        store.upsert(
            7,
            MediaPatch {
                watch_time: Some(50.0),
                ..MediaPatch::default()
            },
            2000.0,
        );

        store.start(7, create_test_media("https://youtube.com/watch?v=other"), 3000.0);

        assert_eq!(store.len(), 1);
        let session = store.get(7).unwrap();
        assert_eq!(session.watch_time, 0.0);
        assert_eq!(session.start_time, 3000.0);
    }

    #[test]
    fn test_patch_keeps_absent_fields() {
        let mut store = SessionStore::new();
        let mut media = create_test_media(URL);
        media.duration = Some(240.0);
        media.thumbnail = Some("thumb.jpg".to_string());
        store.start(7, media, 1000.0);

        let outcome = store.upsert(
            7,
            MediaPatch {
                watch_time: Some(120.0),
                progress: Some(50.0),
                ..MediaPatch::default()
            },
            2000.0,
        );

        assert_eq!(outcome, UpsertOutcome::Patched);
        let session = store.get(7).unwrap();
        assert_eq!(session.media_info.progress, 50.0);
        assert_eq!(session.media_info.duration, Some(240.0));
        assert_eq!(session.media_info.thumbnail.as_deref(), Some("thumb.jpg"));
        assert_eq!(session.media_info.title, "T");
        assert_eq!(session.watch_time, 120.0);
    }

    #[test]
    fn test_upsert_creates_with_defaults() {
        let mut store = SessionStore::new();
        let outcome = store.upsert(
            8,
            MediaPatch {
                watch_time: Some(200.0),
                ..MediaPatch::default()
            },
            5000.0,
        );

        assert_eq!(outcome, UpsertOutcome::Created);
        let session = store.get(8).unwrap();
        assert_eq!(session.media_info.platform, "unknown");
        assert_eq!(session.media_info.media_type, MediaType::Video);
        assert_eq!(session.media_info.title, "Unknown");
        assert_eq!(session.media_info.url, "");
        assert_eq!(session.start_time, 5000.0);
        assert_eq!(session.watch_time, 200.0);
        assert!(!session.completed);
    }

    #[test]
    fn test_completed_can_be_cleared() {
        let mut store = SessionStore::new();
        store.start(1, create_test_media(URL), 0.0);
        assert!(store.mark_completed(1));

        store.upsert(
            1,
            MediaPatch {
                completed: Some(false),
                ..MediaPatch::default()
            },
            1.0,
        );
        assert!(!store.get(1).unwrap().completed);
        assert!(!store.mark_completed(2));
    }

    #[test]
    fn test_end_is_idempotent() {
        let mut store = SessionStore::new();
        store.start(1, create_test_media(URL), 0.0);

        assert!(store.end(1).is_some());
        assert!(store.end(1).is_none());
        assert!(store.is_empty());
    }

    #[test]
    fn test_dedup_keeps_greatest_watch_time() {
        let mut store = SessionStore::new();
        store.start(1, create_test_media(URL), 0.0);
        store.start(2, create_test_media("https://YOUTUBE.com/watch/?v=abc"), 0.0);
        store.start(3, create_test_media("https://mangadex.org/chapter/x"), 0.0);
        store.upsert(1, MediaPatch { watch_time: Some(50.0), ..MediaPatch::default() }, 1.0);
        store.upsert(2, MediaPatch { watch_time: Some(80.4), ..MediaPatch::default() }, 1.0);

        let view = store.active_view(10.0);

        assert_eq!(view.len(), 2);
        let youtube = view.iter().find(|r| r.tab_id == 2).unwrap();
        assert_eq!(youtube.watch_time, 80);
        assert_eq!(youtube.last_update, 10.0);
        assert!(view.iter().all(|r| r.tab_id != 1));
    }

    #[test]
    fn test_dedup_tie_keeps_first() {
        let sessions = vec![
            TrackingSession {
                tab_id: 1,
                media_info: create_test_media(URL),
                start_time: 0.0,
                watch_time: 10.0,
                completed: false,
            },
            TrackingSession {
                tab_id: 2,
                media_info: create_test_media(URL),
                start_time: 0.0,
                watch_time: 10.0,
                completed: false,
            },
        ];

        let kept = dedup_by_url(&sessions);
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].tab_id, 1);
    }

    #[test]
    fn test_record_rounds_watch_time_and_fills_blanks() {
        let mut store = SessionStore::new();
        store.start(4, create_test_media(URL), 100.0);
        store.upsert(4, MediaPatch { watch_time: Some(12.6), ..MediaPatch::default() }, 1.0);

        let record = &store.active_view(0.0)[0];
        assert_eq!(record.id, "track-4-100");
        assert_eq!(record.watch_time, 13);
        assert_eq!(record.duration, 0.0);
        assert_eq!(record.thumbnail, "");
    }

    #[test]
    fn test_rehydrate_from_view() {
        let mut original = SessionStore::new();
        original.start(7, create_test_media(URL), 100.0);
        original.upsert(7, MediaPatch { watch_time: Some(30.0), ..MediaPatch::default() }, 1.0);
        let view = original.active_view(200.0);

        let mut restarted = SessionStore::new();
        restarted.start(9, create_test_media("https://netflix.com/watch/1"), 300.0);
        let restored = restarted.rehydrate(&view);

        assert_eq!(restored, 1);
        assert_eq!(restarted.len(), 2);
        let session = restarted.get(7).unwrap();
        assert_eq!(session.watch_time, 30.0);
        assert_eq!(session.start_time, 100.0);
        assert_eq!(session.media_info.duration, None);
    }
}
