//! Storage-backed message handlers that do not touch the session map.
//!
//! Collections are read and written whole; entries are kept as raw JSON so
//! fields added by other parts of the extension survive a rewrite.

use serde_json::{Map, Value};

use crate::error::Result;
use crate::media::{ActiveTrackingRecord, CompletedMedia, PendingCompletion};
use crate::storage::{StorageBridge, StorageKey};

pub async fn persist_active_view(storage: &StorageBridge, records: &[ActiveTrackingRecord]) -> Result<()> {
    storage.save(StorageKey::ActiveTracking, records).await
}

pub async fn load_active_view(storage: &StorageBridge) -> Result<Vec<ActiveTrackingRecord>> {
    storage.load_list(StorageKey::ActiveTracking).await
}

/// Append a completion awaiting mint. Never merged with earlier entries.
pub async fn append_pending(
    storage: &StorageBridge,
    completed: CompletedMedia,
    now: f64,
) -> Result<PendingCompletion> {
    let pending = PendingCompletion {
        id: format!("pending-{}", uuid::Uuid::new_v4()),
        media: completed.media,
        watch_time: completed.watch_time,
        detected_at: now,
    };

    let mut entries: Vec<Value> = storage.load_list(StorageKey::PendingCompletions).await?;
    entries.push(serde_json::to_value(&pending)?);
    storage.save(StorageKey::PendingCompletions, &entries).await?;
    Ok(pending)
}

pub async fn pending_completions(storage: &StorageBridge) -> Result<Vec<Value>> {
    storage.load_list(StorageKey::PendingCompletions).await
}

pub async fn clear_pending(storage: &StorageBridge) -> Result<()> {
    storage.remove(StorageKey::PendingCompletions).await
}

/// Drop one pending completion by id; returns how many remain.
pub async fn dismiss_pending(storage: &StorageBridge, id: &str) -> Result<usize> {
    let entries: Vec<Value> = storage.load_list(StorageKey::PendingCompletions).await?;
    let before = entries.len();
    let remaining: Vec<Value> = entries
        .into_iter()
        .filter(|entry| entry.get("id").and_then(Value::as_str) != Some(id))
        .collect();

    if remaining.len() == before {
        log::debug!("No pending completion with id {}", id);
    } else {
        storage.save(StorageKey::PendingCompletions, &remaining).await?;
    }
    Ok(remaining.len())
}

pub async fn user_data(storage: &StorageBridge) -> Result<Option<Value>> {
    storage.load(StorageKey::UserData).await
}

pub async fn save_user_data(storage: &StorageBridge, data: &Value) -> Result<()> {
    storage.save(StorageKey::UserData, data).await
}

pub async fn clear_user_data(storage: &StorageBridge) -> Result<()> {
    storage.remove(StorageKey::UserData).await
}

pub async fn completions(storage: &StorageBridge) -> Result<Vec<Value>> {
    storage.load_list(StorageKey::Completions).await
}

/// Record a minted completion; returns the new total.
pub async fn add_completion(storage: &StorageBridge, mut entry: Map<String, Value>, now: f64) -> Result<usize> {
    entry.insert("id".to_string(), Value::from(format!("completion-{}", now as u64)));
    entry.insert("addedAt".to_string(), Value::from(now));

    let mut entries: Vec<Value> = storage.load_list(StorageKey::Completions).await?;
    entries.push(Value::Object(entry));
    storage.save(StorageKey::Completions, &entries).await?;
    Ok(entries.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaInfo, MediaType};
    use crate::testing::create_test_storage;
    use futures::executor::block_on;
    use serde_json::json;

    fn create_test_completed(title: &str) -> CompletedMedia {
        CompletedMedia {
            media: MediaInfo {
                platform: "netflix".to_string(),
                media_type: MediaType::Movie,
                title: title.to_string(),
                url: "https://netflix.com/watch/1".to_string(),
                progress: 95.0,
                duration: Some(7200.0),
                thumbnail: None,
                timestamp: 0.0,
                chapter: None,
                episode: None,
            },
            watch_time: Some(6800.0),
        }
    }

    #[test]
    fn test_pending_appends_never_merge() {
        let (_, storage) = create_test_storage();
        let first = block_on(append_pending(&storage, create_test_completed("A"), 10.0)).unwrap();
        block_on(append_pending(&storage, create_test_completed("A"), 20.0)).unwrap();

        let list = block_on(pending_completions(&storage)).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0]["detectedAt"], 10.0);
        assert_eq!(list[0]["title"], "A");
        assert_ne!(list[0]["id"], list[1]["id"]);

        let remaining = block_on(dismiss_pending(&storage, &first.id)).unwrap();
        assert_eq!(remaining, 1);
        assert_eq!(block_on(dismiss_pending(&storage, "missing")).unwrap(), 1);

        block_on(clear_pending(&storage)).unwrap();
        assert!(block_on(pending_completions(&storage)).unwrap().is_empty());
    }

    #[test]
    fn test_add_completion_stamps_entry() {
        let (_, storage) = create_test_storage();
        let entry = json!({"title": "Dune", "tokenId": 7});
        let Value::Object(entry) = entry else { unreachable!() };

        let total = block_on(add_completion(&storage, entry, 1_700_000_000_123.0)).unwrap();

        assert_eq!(total, 1);
        let list = block_on(completions(&storage)).unwrap();
        assert_eq!(list[0]["id"], "completion-1700000000123");
        assert_eq!(list[0]["tokenId"], 7);
        assert_eq!(list[0]["addedAt"], 1_700_000_000_123.0);
    }

    #[test]
    fn test_user_data_lifecycle() {
        let (_, storage) = create_test_storage();
        assert_eq!(block_on(user_data(&storage)).unwrap(), None);

        block_on(save_user_data(&storage, &json!({"wallet": "0xabc"}))).unwrap();
        assert_eq!(block_on(user_data(&storage)).unwrap(), Some(json!({"wallet": "0xabc"})));

        block_on(clear_user_data(&storage)).unwrap();
        assert_eq!(block_on(user_data(&storage)).unwrap(), None);
    }
}
