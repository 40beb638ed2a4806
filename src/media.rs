/// Data structures shared by the tracker, the coordinator and storage
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};

/// Browser tab id as reported by `chrome.tabs`.
pub type TabId = i32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaType {
    #[default]
    Video,
    Movie,
    Tvshow,
    Anime,
    Manga,
    Book,
    Comic,
}

impl MediaType {
    /// Reading content is tracked by scroll/page position instead of a player.
    pub fn is_reading(self) -> bool {
        matches!(self, MediaType::Manga | MediaType::Book | MediaType::Comic)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MediaType::Video => "video",
            MediaType::Movie => "movie",
            MediaType::Tvshow => "tvshow",
            MediaType::Anime => "anime",
            MediaType::Manga => "manga",
            MediaType::Book => "book",
            MediaType::Comic => "comic",
        }
    }

    /// Duration in seconds assumed when neither the page nor an API reports one.
    pub fn default_duration_secs(self) -> Option<f64> {
        match self {
            MediaType::Movie => Some(2.0 * 60.0 * 60.0),
            MediaType::Tvshow | MediaType::Anime => Some(45.0 * 60.0),
            _ => None,
        }
    }
}

/// What a tracker knows about the media on its page.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaInfo {
    pub platform: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub title: String,
    pub url: String,
    #[serde(default)]
    pub progress: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub timestamp: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<String>,
}

/// Partial media info carried by `TRACKING_UPDATE`. Every field is optional;
/// absent fields keep the session's previous value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub platform: Option<String>,
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub media_type: Option<MediaType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thumbnail: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chapter: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub episode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_time: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_time: Option<f64>,
}

/// Live per-tab record owned by the coordinator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingSession {
    pub tab_id: TabId,
    pub media_info: MediaInfo,
    pub start_time: f64,
    pub watch_time: f64,
    pub completed: bool,
}

/// One entry of the persisted `activeTracking` view.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActiveTrackingRecord {
    pub id: String,
    pub tab_id: TabId,
    pub platform: String,
    #[serde(rename = "type")]
    pub media_type: MediaType,
    pub title: String,
    pub url: String,
    pub progress: f64,
    pub duration: f64,
    pub watch_time: u64,
    pub thumbnail: String,
    pub completed: bool,
    pub start_time: f64,
    pub last_update: f64,
}

/// `MEDIA_COMPLETED` payload: the media plus how long it was watched.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedMedia {
    #[serde(flatten)]
    pub media: MediaInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_time: Option<f64>,
}

/// A completion waiting for the user to mint or dismiss it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingCompletion {
    #[serde(default)]
    pub id: String,
    #[serde(flatten)]
    pub media: MediaInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub watch_time: Option<f64>,
    pub detected_at: f64,
}

/// A saved series checked periodically for new chapters or episodes.
///
/// Fields written by other parts of the extension are kept in `extra` so a
/// check cycle never drops them on write-back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeriesBookmark {
    #[serde(default)]
    pub id: String,
    pub title: String,
    pub url: String,
    #[serde(
        default,
        deserialize_with = "lenient_chapter",
        skip_serializing_if = "Option::is_none"
    )]
    pub current_chapter: Option<String>,
    #[serde(
        default,
        deserialize_with = "lenient_chapter",
        skip_serializing_if = "Option::is_none"
    )]
    pub latest_episode: Option<String>,
    #[serde(default)]
    pub has_update: bool,
    #[serde(
        default,
        deserialize_with = "lenient_checked_at",
        skip_serializing_if = "Option::is_none"
    )]
    pub last_checked: Option<CheckedAt>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// When a bookmark was last checked. Written as epoch milliseconds; entries
/// saved by the extension UI carry an ISO-8601 string instead.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CheckedAt {
    Millis(f64),
    Text(String),
}

/// User-added site tracked with generic selectors. The settings page
/// writes a bare `domain` with an optional `url`; either one locates the site.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomSite {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub name: String,
    #[serde(rename = "type", default)]
    pub media_type: MediaType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
}

impl CustomSite {
    /// Sites without an explicit `enabled` flag count as enabled.
    pub fn is_enabled(&self) -> bool {
        self.enabled != Some(false)
    }

    /// `domain` when set, otherwise `url`.
    pub fn address(&self) -> Option<&str> {
        [self.domain.as_deref(), self.url.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|address| !address.is_empty())
    }
}

// Chapter numbers arrive as strings from the page parser but as numbers from
// hand-edited bookmarks.
fn lenient_chapter<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::String(s)) if !s.trim().is_empty() => Some(s),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    })
}

fn lenient_checked_at<'de, D>(deserializer: D) -> Result<Option<CheckedAt>, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Option::<Value>::deserialize(deserializer)?;
    Ok(match value {
        Some(Value::Number(n)) => n.as_f64().map(CheckedAt::Millis),
        Some(Value::String(s)) if !s.trim().is_empty() => Some(CheckedAt::Text(s)),
        _ => None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_media() -> MediaInfo {
        MediaInfo {
            platform: "youtube".to_string(),
            media_type: MediaType::Video,
            title: "T".to_string(),
            url: "https://youtube.com/watch?v=abc".to_string(),
            progress: 0.0,
            duration: None,
            thumbnail: None,
            timestamp: 0.0,
            chapter: None,
            episode: None,
        }
    }

    #[test]
    fn test_media_info_wire_names() {
        let value = serde_json::to_value(create_test_media()).unwrap();
        assert_eq!(value["type"], "video");
        assert_eq!(value["platform"], "youtube");
        assert!(value.get("duration").is_none());
    }

    #[test]
    fn test_media_patch_ignores_unknown_fields() {
        let patch: MediaPatch = serde_json::from_value(json!({
            "id": "youtube-1",
            "watchTime": 120,
            "progress": 50,
            "currentPage": 3,
        }))
        .unwrap();

        assert_eq!(patch.watch_time, Some(120.0));
        assert_eq!(patch.progress, Some(50.0));
        assert_eq!(patch.title, None);
    }

    #[test]
    fn test_unknown_media_type_is_rejected() {
        let parsed: Result<MediaPatch, _> = serde_json::from_value(json!({"type": "podcast"}));
        assert!(parsed.is_err());
    }

    #[test]
    fn test_pending_completion_flattens_media() {
        let pending = PendingCompletion {
            id: "p-1".to_string(),
            media: create_test_media(),
            watch_time: Some(30.0),
            detected_at: 1_700_000_000_000.0,
        };

        let value = serde_json::to_value(&pending).unwrap();
        assert_eq!(value["title"], "T");
        assert_eq!(value["detectedAt"], 1_700_000_000_000.0);
        assert!(value.get("media").is_none());
    }

    #[test]
    fn test_bookmark_accepts_numeric_chapters_and_keeps_extra_fields() {
        let bookmark: SeriesBookmark = serde_json::from_value(json!({
            "id": "b1",
            "title": "Solo Leveling",
            "url": "https://example.com/series",
            "currentChapter": 10,
            "coverImage": "https://example.com/cover.jpg",
        }))
        .unwrap();

        assert_eq!(bookmark.current_chapter.as_deref(), Some("10"));
        assert!(!bookmark.has_update);

        let value = serde_json::to_value(&bookmark).unwrap();
        assert_eq!(value["coverImage"], "https://example.com/cover.jpg");
    }

    #[test]
    fn test_bookmark_accepts_iso_last_checked() {
        let bookmark: SeriesBookmark = serde_json::from_value(json!({
            "id": "b1",
            "title": "S",
            "url": "https://example.com/s",
            "lastChecked": "2024-01-01T00:00:00.000Z",
        }))
        .unwrap();
        assert_eq!(
            bookmark.last_checked,
            Some(CheckedAt::Text("2024-01-01T00:00:00.000Z".to_string()))
        );
        assert_eq!(
            serde_json::to_value(&bookmark).unwrap()["lastChecked"],
            "2024-01-01T00:00:00.000Z"
        );

        let bookmark: SeriesBookmark = serde_json::from_value(json!({
            "title": "S", "url": "https://example.com/s", "lastChecked": 1_700_000_000_000u64,
        }))
        .unwrap();
        assert_eq!(bookmark.last_checked, Some(CheckedAt::Millis(1_700_000_000_000.0)));
    }

    #[test]
    fn test_custom_site_enabled_default() {
        let site: CustomSite =
            serde_json::from_value(json!({"url": "https://kisskh.co", "name": "KissKH"})).unwrap();
        assert!(site.is_enabled());
        assert_eq!(site.media_type, MediaType::Video);
        assert_eq!(site.address(), Some("https://kisskh.co"));
    }

    #[test]
    fn test_custom_site_from_settings_page() {
        let site: CustomSite = serde_json::from_value(json!({
            "domain": "mydrama.example", "name": "My Drama", "type": "tvshow"
        }))
        .unwrap();
        assert_eq!(site.address(), Some("mydrama.example"));
        assert_eq!(site.media_type, MediaType::Tvshow);

        let site: CustomSite = serde_json::from_value(json!({
            "domain": "", "url": "https://mydrama.example", "name": "My Drama"
        }))
        .unwrap();
        assert_eq!(site.address(), Some("https://mydrama.example"));
    }

    #[test]
    fn test_default_durations() {
        assert_eq!(MediaType::Movie.default_duration_secs(), Some(7200.0));
        assert_eq!(MediaType::Anime.default_duration_secs(), Some(2700.0));
        assert_eq!(MediaType::Manga.default_duration_secs(), None);
        assert!(MediaType::Comic.is_reading());
    }
}
