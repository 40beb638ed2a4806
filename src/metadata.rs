//! Metadata captured from the JSON APIs some sites call while a page loads.
//!
//! The page glue hands every intercepted response to
//! [`parse_api_response`]; whatever it recognizes is merged into the local
//! session with [`apply_metadata`].

use std::sync::LazyLock;

use regex::Regex;
use serde::Deserialize;

use crate::media::MediaInfo;

/// Title a tracker uses until it learns a better one.
pub const PLACEHOLDER_TITLE: &str = "Unknown Title";

static EPISODE_IN_HTML: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)Episode\s*(\d+)").expect("valid episode pattern"));

#[derive(Debug, Clone, Default, PartialEq)]
pub struct MediaMetadata {
    pub title: Option<String>,
    pub thumbnail: Option<String>,
    /// Seconds.
    pub duration: Option<f64>,
    pub chapter: Option<String>,
    pub episode: Option<String>,
}

impl MediaMetadata {
    pub fn is_empty(&self) -> bool {
        *self == MediaMetadata::default()
    }

    /// Fold a newer capture into this one; newer values win.
    pub fn merge(&mut self, newer: MediaMetadata) {
        if newer.title.is_some() {
            self.title = newer.title;
        }
        if newer.thumbnail.is_some() {
            self.thumbnail = newer.thumbnail;
        }
        if newer.duration.is_some() {
            self.duration = newer.duration;
        }
        if newer.chapter.is_some() {
            self.chapter = newer.chapter;
        }
        if newer.episode.is_some() {
            self.episode = newer.episode;
        }
    }
}

#[derive(Deserialize)]
struct FilmboomEnvelope<T> {
    #[serde(default = "error_code")]
    code: i64,
    data: Option<T>,
}

fn error_code() -> i64 {
    -1
}

#[derive(Deserialize)]
struct FilmboomSubjectData {
    subject: Option<FilmboomSubject>,
    metadata: Option<FilmboomPageMetadata>,
}

#[derive(Deserialize)]
struct FilmboomSubject {
    title: Option<String>,
    duration: Option<f64>,
    cover: Option<FilmboomCover>,
    trailer: Option<FilmboomTrailer>,
}

#[derive(Deserialize)]
struct FilmboomCover {
    url: Option<String>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct FilmboomTrailer {
    video_address: Option<FilmboomVideoAddress>,
}

#[derive(Deserialize)]
struct FilmboomVideoAddress {
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct FilmboomPageMetadata {
    image: Option<String>,
}

#[derive(Deserialize)]
struct FilmboomStreams {
    #[serde(default)]
    streams: Vec<FilmboomStream>,
}

#[derive(Deserialize)]
struct FilmboomStream {
    duration: Option<f64>,
}

#[derive(Deserialize)]
struct MangaDexChapterList {
    result: String,
    #[serde(default)]
    data: Vec<MangaDexChapter>,
}

#[derive(Deserialize)]
struct MangaDexChapter {
    attributes: MangaDexAttributes,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct MangaDexAttributes {
    volume: Option<String>,
    chapter: Option<String>,
    title: Option<String>,
    translated_language: Option<String>,
}

#[derive(Deserialize)]
struct NineAnimeServers {
    #[serde(default)]
    status: bool,
    #[serde(default)]
    html: String,
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| *v > 0.0)
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn parse_filmboom_subject(body: &str) -> Option<MediaMetadata> {
    let envelope: FilmboomEnvelope<FilmboomSubjectData> = serde_json::from_str(body).ok()?;
    if envelope.code != 0 {
        return None;
    }
    let data = envelope.data?;
    let subject = data.subject?;

    let trailer_duration = subject
        .trailer
        .and_then(|t| t.video_address)
        .and_then(|v| positive(v.duration));
    let cover = non_empty(subject.cover.and_then(|c| c.url))
        .or_else(|| non_empty(data.metadata.and_then(|m| m.image)));

    Some(MediaMetadata {
        title: non_empty(subject.title),
        thumbnail: cover,
        duration: positive(subject.duration).or(trailer_duration),
        ..MediaMetadata::default()
    })
}

fn parse_filmboom_streams(body: &str) -> Option<MediaMetadata> {
    let envelope: FilmboomEnvelope<FilmboomStreams> = serde_json::from_str(body).ok()?;
    if envelope.code != 0 {
        return None;
    }
    let duration = positive(envelope.data?.streams.first()?.duration)?;
    log::debug!("Captured stream duration: {}", duration);

    Some(MediaMetadata {
        duration: Some(duration),
        ..MediaMetadata::default()
    })
}

fn parse_mangadex_chapters(body: &str) -> Option<MediaMetadata> {
    let list: MangaDexChapterList = serde_json::from_str(body).ok()?;
    if list.result != "ok" {
        return None;
    }
    let chapter = list
        .data
        .iter()
        .find(|c| c.attributes.translated_language.as_deref() == Some("en"))
        .or_else(|| list.data.first())?;
    let attributes = &chapter.attributes;
    let number = attributes.chapter.clone().unwrap_or_default();
    let volume = non_empty(attributes.volume.clone()).unwrap_or_else(|| "?".to_string());

    Some(MediaMetadata {
        title: non_empty(attributes.title.clone()).or_else(|| Some(format!("Chapter {}", number))),
        chapter: Some(format!("Vol. {} Ch. {}", volume, number)),
        ..MediaMetadata::default()
    })
}

fn parse_nine_anime_servers(body: &str) -> Option<MediaMetadata> {
    let servers: NineAnimeServers = serde_json::from_str(body).ok()?;
    if !servers.status || servers.html.is_empty() {
        return None;
    }
    let episode = EPISODE_IN_HTML
        .captures(&servers.html)
        .map(|c| c[1].to_string());

    Some(MediaMetadata {
        episode,
        ..MediaMetadata::default()
    })
}

const METADATA_ENDPOINTS: &[&str] = &[
    "subject/detail",
    "resource/streams",
    "api.mangadex.org/chapter",
    "/ajax/episode/",
    "servers?episodeid",
];

/// Whether `url` is one of the metadata endpoints [`parse_api_response`] knows.
pub fn is_metadata_url(url: &str) -> bool {
    METADATA_ENDPOINTS.iter().any(|endpoint| url.contains(endpoint))
}

/// Recognize a metadata response by its URL and extract what it carries.
/// Unknown URLs, non-JSON bodies and error payloads yield `None`.
pub fn parse_api_response(url: &str, body: &str) -> Option<MediaMetadata> {
    let parsed = if url.contains("subject/detail") {
        parse_filmboom_subject(body)
    } else if url.contains("resource/streams") {
        parse_filmboom_streams(body)
    } else if url.contains("api.mangadex.org/chapter") {
        parse_mangadex_chapters(body)
    } else if url.contains("/ajax/episode/") || url.contains("servers?episodeid") {
        parse_nine_anime_servers(body)
    } else {
        None
    };

    parsed.filter(|metadata| !metadata.is_empty())
}

/// Merge captured metadata into the session's media info. The title only
/// replaces the placeholder; thumbnail and duration only fill blanks;
/// chapter and episode always take the captured value. A still-missing
/// duration falls back to the media type's default.
pub fn apply_metadata(info: &mut MediaInfo, metadata: &MediaMetadata) {
    if let Some(title) = &metadata.title {
        if info.title == PLACEHOLDER_TITLE {
            info.title = title.clone();
        }
    }
    if info.thumbnail.as_deref().is_none_or(str::is_empty) {
        if let Some(thumbnail) = &metadata.thumbnail {
            info.thumbnail = Some(thumbnail.clone());
        }
    }
    if positive(info.duration).is_none() {
        info.duration = metadata.duration;
    }
    if metadata.chapter.is_some() {
        info.chapter = metadata.chapter.clone();
    }
    if metadata.episode.is_some() {
        info.episode = metadata.episode.clone();
    }
    if positive(info.duration).is_none() {
        info.duration = info.media_type.default_duration_secs();
    }
}
