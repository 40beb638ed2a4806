/// Runtime message protocol between trackers, the popup and the background
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Result, TrackerError};
use crate::media::{CompletedMedia, MediaInfo, MediaPatch, SeriesBookmark};
use crate::settings::SettingsPatch;

/// Every message the background understands, with its validated payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Request {
    TrackingStart(MediaInfo),
    TrackingUpdate(MediaPatch),
    TrackingEnd,
    MediaCompleted(CompletedMedia),
    GetActiveSessions,
    GetPendingCompletions,
    ClearPendingCompletions,
    DismissPendingCompletion { id: String },
    CheckSeriesUpdates,
    MarkAllSeriesRead,
    AddSeriesBookmark(SeriesBookmark),
    GetSeriesBookmarks,
    GetSettings,
    UpdateSettings(SettingsPatch),
    GetUserData,
    SaveUserData(Value),
    ClearUserData,
    GetCompletions,
    AddCompletion(serde_json::Map<String, Value>),
}

#[derive(Deserialize)]
struct Envelope {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct DismissPayload {
    id: String,
}

fn payload<T: DeserializeOwned>(kind: &str, data: Value) -> Result<T> {
    serde_json::from_value(data).map_err(|e| TrackerError::Malformed {
        kind: kind.to_string(),
        reason: e.to_string(),
    })
}

impl Request {
    /// Validate a raw `{type, data}` message.
    pub fn parse(raw: Value) -> Result<Request> {
        let envelope: Envelope = serde_json::from_value(raw).map_err(|e| TrackerError::Malformed {
            kind: "message".to_string(),
            reason: e.to_string(),
        })?;
        let kind = envelope.kind.unwrap_or_default();
        let data = envelope.data;

        let request = match kind.as_str() {
            "TRACKING_START" => Request::TrackingStart(payload(&kind, data)?),
            "TRACKING_UPDATE" => Request::TrackingUpdate(payload(&kind, data)?),
            // Trackers attach their final session state; it carries nothing we need.
            "TRACKING_END" => Request::TrackingEnd,
            "MEDIA_COMPLETED" => Request::MediaCompleted(payload(&kind, data)?),
            "GET_ACTIVE_SESSIONS" => Request::GetActiveSessions,
            "GET_PENDING_COMPLETIONS" => Request::GetPendingCompletions,
            "CLEAR_PENDING_COMPLETIONS" => Request::ClearPendingCompletions,
            "DISMISS_PENDING_COMPLETION" => {
                let DismissPayload { id } = payload(&kind, data)?;
                Request::DismissPendingCompletion { id }
            }
            "CHECK_SERIES_UPDATES" => Request::CheckSeriesUpdates,
            "MARK_ALL_SERIES_READ" => Request::MarkAllSeriesRead,
            "ADD_SERIES_BOOKMARK" => Request::AddSeriesBookmark(payload(&kind, data)?),
            "GET_SERIES_BOOKMARKS" => Request::GetSeriesBookmarks,
            "GET_SETTINGS" => Request::GetSettings,
            "UPDATE_SETTINGS" => Request::UpdateSettings(payload(&kind, data)?),
            "GET_USER_DATA" => Request::GetUserData,
            "SAVE_USER_DATA" => Request::SaveUserData(data),
            "CLEAR_USER_DATA" => Request::ClearUserData,
            "GET_COMPLETIONS" => Request::GetCompletions,
            "ADD_COMPLETION" => Request::AddCompletion(payload(&kind, data)?),
            _ => return Err(TrackerError::UnknownMessage(kind)),
        };

        Ok(request)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Request::TrackingStart(_) => "TRACKING_START",
            Request::TrackingUpdate(_) => "TRACKING_UPDATE",
            Request::TrackingEnd => "TRACKING_END",
            Request::MediaCompleted(_) => "MEDIA_COMPLETED",
            Request::GetActiveSessions => "GET_ACTIVE_SESSIONS",
            Request::GetPendingCompletions => "GET_PENDING_COMPLETIONS",
            Request::ClearPendingCompletions => "CLEAR_PENDING_COMPLETIONS",
            Request::DismissPendingCompletion { .. } => "DISMISS_PENDING_COMPLETION",
            Request::CheckSeriesUpdates => "CHECK_SERIES_UPDATES",
            Request::MarkAllSeriesRead => "MARK_ALL_SERIES_READ",
            Request::AddSeriesBookmark(_) => "ADD_SERIES_BOOKMARK",
            Request::GetSeriesBookmarks => "GET_SERIES_BOOKMARKS",
            Request::GetSettings => "GET_SETTINGS",
            Request::UpdateSettings(_) => "UPDATE_SETTINGS",
            Request::GetUserData => "GET_USER_DATA",
            Request::SaveUserData(_) => "SAVE_USER_DATA",
            Request::ClearUserData => "CLEAR_USER_DATA",
            Request::GetCompletions => "GET_COMPLETIONS",
            Request::AddCompletion(_) => "ADD_COMPLETION",
        }
    }

    /// Serialize back into the `{type, data}` wire shape trackers send.
    pub fn to_message(&self) -> Value {
        let data = match self {
            Request::TrackingStart(info) => serde_json::to_value(info).ok(),
            Request::TrackingUpdate(patch) => serde_json::to_value(patch).ok(),
            Request::MediaCompleted(media) => serde_json::to_value(media).ok(),
            Request::DismissPendingCompletion { id } => Some(serde_json::json!({ "id": id })),
            Request::AddSeriesBookmark(bookmark) => serde_json::to_value(bookmark).ok(),
            Request::UpdateSettings(patch) => serde_json::to_value(patch).ok(),
            Request::SaveUserData(data) => Some(data.clone()),
            Request::AddCompletion(entry) => Some(Value::Object(entry.clone())),
            _ => None,
        };

        match data {
            Some(data) => serde_json::json!({ "type": self.kind(), "data": data }),
            None => serde_json::json!({ "type": self.kind() }),
        }
    }
}

/// Reply sent back through `sendResponse`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Response {
    pub fn ok() -> Self {
        Response {
            success: true,
            data: None,
            count: None,
            error: None,
        }
    }

    pub fn with_data<T: Serialize + ?Sized>(data: &T) -> Self {
        match serde_json::to_value(data) {
            Ok(data) => Response {
                data: Some(data),
                ..Response::ok()
            },
            Err(e) => Response::failure(TrackerError::from(e)),
        }
    }

    pub fn with_count(count: usize) -> Self {
        Response {
            count: Some(count),
            ..Response::ok()
        }
    }

    pub fn failure(error: impl std::fmt::Display) -> Self {
        Response {
            success: false,
            data: None,
            count: None,
            error: Some(error.to_string()),
        }
    }
}

impl From<TrackerError> for Response {
    fn from(error: TrackerError) -> Self {
        Response::failure(error)
    }
}
