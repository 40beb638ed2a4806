//! Background coordinator: owns the session map and answers runtime messages.
//!
//! [`SessionCoordinator`] handles one message at a time to completion. It is
//! normally driven through [`CoordinatorHandle`], which queues commands on a
//! single-consumer mailbox so that handlers never interleave their session
//! map mutations. Series checks bypass the mailbox: they spend most of their
//! time waiting on the network and have their own overlap guard.

pub mod effects;
pub mod handlers;

use std::rc::Rc;

use futures::channel::{mpsc, oneshot};
use futures::future::LocalBoxFuture;
use futures::{FutureExt, StreamExt};
use serde_json::Value;

use crate::error::{Result, TrackerError};
use crate::media::TabId;
use crate::protocol::{Request, Response};
use crate::series::{PageFetcher, SeriesUpdateChecker};
use crate::sessions::{SessionStore, UpsertOutcome};
use crate::settings;
use crate::storage::StorageBridge;

use effects::{notify_best_effort, set_badge_best_effort, Badge, Clock, Notification, Notifier};

pub const SERIES_ALARM: &str = "check-series-updates";

#[derive(Debug, Clone, PartialEq)]
pub struct CoordinatorConfig {
    pub fetch_timeout_ms: u32,
    pub alarm_name: String,
    pub alarm_period_minutes: u32,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            fetch_timeout_ms: 15_000,
            alarm_name: SERIES_ALARM.to_string(),
            alarm_period_minutes: 60,
        }
    }
}

pub struct SessionCoordinator {
    sessions: SessionStore,
    storage: StorageBridge,
    notifier: Rc<dyn Notifier>,
    clock: Rc<dyn Clock>,
    series: Rc<SeriesUpdateChecker>,
    config: CoordinatorConfig,
}

impl SessionCoordinator {
    pub fn new(
        storage: StorageBridge,
        notifier: Rc<dyn Notifier>,
        clock: Rc<dyn Clock>,
        fetcher: Rc<dyn PageFetcher>,
        config: CoordinatorConfig,
    ) -> Self {
        let series = Rc::new(SeriesUpdateChecker::new(
            storage.clone(),
            fetcher,
            notifier.clone(),
            clock.clone(),
            config.fetch_timeout_ms,
        ));

        SessionCoordinator {
            sessions: SessionStore::new(),
            storage,
            notifier,
            clock,
            series,
            config,
        }
    }

    pub fn config(&self) -> &CoordinatorConfig {
        &self.config
    }

    pub fn series(&self) -> Rc<SeriesUpdateChecker> {
        Rc::clone(&self.series)
    }

    /// Rebuild the session cache from the persisted view after a restart.
    pub async fn rehydrate(&mut self) -> Result<usize> {
        let records = handlers::load_active_view(&self.storage).await?;
        let restored = self.sessions.rehydrate(&records);
        if restored > 0 {
            log::info!("Restored {} tracking sessions from storage", restored);
        }
        Ok(restored)
    }

    /// Answer one message. Failures become `{success: false, error}`.
    pub async fn handle(&mut self, sender: Option<TabId>, request: Request) -> Response {
        let kind = request.kind();
        log::debug!("Handling {} from tab {:?}", kind, sender);

        match self.route(sender, request).await {
            Ok(response) => response,
            Err(e) => {
                log::error!("{} failed: {}", kind, e);
                Response::from(e)
            }
        }
    }

    /// A tab went away: same as `TRACKING_END` for that tab.
    pub async fn tab_removed(&mut self, tab_id: TabId) {
        if self.sessions.end(tab_id).is_some() {
            log::info!("Tab {} closed, ending its session", tab_id);
        }
        self.persist_view().await;
    }

    async fn route(&mut self, sender: Option<TabId>, request: Request) -> Result<Response> {
        let now = self.clock.now_ms();

        let response = match request {
            Request::TrackingStart(info) => {
                let tab_id = require_tab(sender, "TRACKING_START")?;
                let session = self.sessions.start(tab_id, info, now);
                log::info!("Started session for tab {}: {}", tab_id, session.media_info.title);
                self.persist_view().await;
                Response::ok()
            }
            Request::TrackingUpdate(patch) => {
                let tab_id = require_tab(sender, "TRACKING_UPDATE")?;
                if self.sessions.upsert(tab_id, patch, now) == UpsertOutcome::Created {
                    log::info!("Created session for tab {} from an update", tab_id);
                }
                self.persist_view().await;
                Response::ok()
            }
            Request::TrackingEnd => {
                if let Some(tab_id) = sender {
                    if self.sessions.end(tab_id).is_some() {
                        log::info!("Ended session for tab {}", tab_id);
                    }
                }
                self.persist_view().await;
                Response::ok()
            }
            Request::MediaCompleted(completed) => {
                if let Some(tab_id) = sender {
                    if self.sessions.mark_completed(tab_id) {
                        self.persist_view().await;
                    }
                }
                let title = completed.media.title.clone();
                handlers::append_pending(&self.storage, completed, now).await?;
                log::info!("Media completed: {}", title);

                if settings::should_notify(&self.storage).await {
                    notify_best_effort(self.notifier.as_ref(), Notification::media_completed(&title)).await;
                }
                set_badge_best_effort(self.notifier.as_ref(), Badge::Attention).await;
                Response::ok()
            }
            Request::GetActiveSessions => Response::with_data(&self.sessions.snapshot()),
            Request::GetPendingCompletions => {
                Response::with_data(&handlers::pending_completions(&self.storage).await?)
            }
            Request::ClearPendingCompletions => {
                handlers::clear_pending(&self.storage).await?;
                set_badge_best_effort(self.notifier.as_ref(), Badge::Clear).await;
                Response::ok()
            }
            Request::DismissPendingCompletion { id } => {
                let remaining = handlers::dismiss_pending(&self.storage, &id).await?;
                if remaining == 0 {
                    set_badge_best_effort(self.notifier.as_ref(), Badge::Clear).await;
                }
                Response::with_count(remaining)
            }
            Request::CheckSeriesUpdates => {
                let report = self.series.run_cycle().await?;
                Response::with_count(report.checked)
            }
            Request::MarkAllSeriesRead => {
                self.series.mark_all_read().await?;
                Response::ok()
            }
            Request::AddSeriesBookmark(bookmark) => {
                Response::with_data(&self.series.add_bookmark(bookmark).await?)
            }
            Request::GetSeriesBookmarks => Response::with_data(&self.series.bookmarks().await?),
            Request::GetSettings => Response::with_data(&settings::load_settings(&self.storage).await?),
            Request::UpdateSettings(patch) => {
                Response::with_data(&settings::apply_patch(&self.storage, patch).await?)
            }
            Request::GetUserData => Response::with_data(&handlers::user_data(&self.storage).await?),
            Request::SaveUserData(data) => {
                handlers::save_user_data(&self.storage, &data).await?;
                Response::ok()
            }
            Request::ClearUserData => {
                handlers::clear_user_data(&self.storage).await?;
                Response::ok()
            }
            Request::GetCompletions => Response::with_data(&handlers::completions(&self.storage).await?),
            Request::AddCompletion(entry) => {
                let total = handlers::add_completion(&self.storage, entry, now).await?;
                set_badge_best_effort(self.notifier.as_ref(), Badge::Count(total)).await;
                Response::ok()
            }
        };

        Ok(response)
    }

    async fn persist_view(&self) {
        let view = self.sessions.active_view(self.clock.now_ms());
        if let Err(e) = handlers::persist_active_view(&self.storage, &view).await {
            log::error!("Failed to persist active tracking view: {}", e);
        }
    }

    /// Move the coordinator onto a mailbox. The returned future rehydrates
    /// the session cache, then serves commands until every handle is gone;
    /// the caller spawns it on the local executor.
    pub fn into_actor(mut self) -> (CoordinatorHandle, LocalBoxFuture<'static, ()>) {
        let (tx, mut rx) = mpsc::unbounded::<Command>();
        let handle = CoordinatorHandle {
            tx,
            series: self.series(),
            alarm_name: self.config.alarm_name.clone(),
        };

        let run = async move {
            if let Err(e) = self.rehydrate().await {
                log::warn!("Could not restore sessions: {}", e);
            }
            while let Some(command) = rx.next().await {
                match command {
                    Command::Message { sender, request, reply } => {
                        let response = self.handle(sender, request).await;
                        if reply.send(response).is_err() {
                            log::debug!("Caller dropped before the reply");
                        }
                    }
                    Command::TabRemoved { tab_id, done } => {
                        self.tab_removed(tab_id).await;
                        let _ = done.send(());
                    }
                }
            }
            log::info!("Coordinator mailbox closed");
        };

        (handle, run.boxed_local())
    }
}

fn require_tab(sender: Option<TabId>, kind: &str) -> Result<TabId> {
    sender.ok_or_else(|| TrackerError::Malformed {
        kind: kind.to_string(),
        reason: "message did not come from a tab".to_string(),
    })
}

enum Command {
    Message {
        sender: Option<TabId>,
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    TabRemoved {
        tab_id: TabId,
        done: oneshot::Sender<()>,
    },
}

/// Cheap handle to a running coordinator.
#[derive(Clone)]
pub struct CoordinatorHandle {
    tx: mpsc::UnboundedSender<Command>,
    series: Rc<SeriesUpdateChecker>,
    alarm_name: String,
}

impl CoordinatorHandle {
    /// Validate a raw runtime message and answer it.
    pub async fn dispatch(&self, sender: Option<TabId>, raw: Value) -> Response {
        match Request::parse(raw) {
            Ok(request) => self.request(sender, request).await,
            Err(e) => {
                log::warn!("Rejected message: {}", e);
                Response::from(e)
            }
        }
    }

    pub async fn request(&self, sender: Option<TabId>, request: Request) -> Response {
        if request == Request::CheckSeriesUpdates {
            return self.check_series().await;
        }

        let (reply, response) = oneshot::channel();
        let command = Command::Message {
            sender,
            request,
            reply,
        };
        if self.tx.unbounded_send(command).is_err() {
            return Response::from(TrackerError::CoordinatorGone);
        }
        response
            .await
            .unwrap_or_else(|_| Response::from(TrackerError::CoordinatorGone))
    }

    pub async fn tab_removed(&self, tab_id: TabId) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.tx
            .unbounded_send(Command::TabRemoved { tab_id, done })
            .map_err(|_| TrackerError::CoordinatorGone)?;
        finished.await.map_err(|_| TrackerError::CoordinatorGone)
    }

    /// Run a series check if `alarm` is the series alarm.
    pub async fn on_alarm(&self, alarm: &str) -> Option<Response> {
        if alarm != self.alarm_name {
            log::debug!("Ignoring alarm {}", alarm);
            return None;
        }
        Some(self.check_series().await)
    }

    pub async fn check_series(&self) -> Response {
        match self.series.run_cycle().await {
            Ok(report) => Response::with_count(report.checked),
            Err(e) => {
                log::warn!("Series check not run: {}", e);
                Response::from(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{ActiveTrackingRecord, MediaInfo, MediaPatch, MediaType, TrackingSession};
    use crate::storage::{MemoryStorage, StorageKey};
    use crate::testing::{create_test_storage, FakeClock, FakeFetcher, FakePage, RecordingNotifier};
    use futures::executor::{block_on, LocalPool};
    use futures::task::LocalSpawnExt;
    use serde_json::json;

    const URL: &str = "https://youtube.com/watch?v=abc";

    struct Harness {
        storage: Rc<MemoryStorage>,
        notifier: Rc<RecordingNotifier>,
        fetcher: Rc<FakeFetcher>,
        clock: Rc<FakeClock>,
        coordinator: SessionCoordinator,
    }

    fn create_test_coordinator() -> Harness {
        let (storage, bridge) = create_test_storage();
        let notifier = RecordingNotifier::new();
        let fetcher = FakeFetcher::new();
        let clock = FakeClock::new(1_000.0);
        let coordinator = SessionCoordinator::new(
            bridge,
            notifier.clone(),
            clock.clone(),
            fetcher.clone(),
            CoordinatorConfig::default(),
        );
        Harness {
            storage,
            notifier,
            fetcher,
            clock,
            coordinator,
        }
    }

    fn create_test_media() -> MediaInfo {
        MediaInfo {
            platform: "youtube".to_string(),
            media_type: MediaType::Video,
            title: "T".to_string(),
            url: URL.to_string(),
            progress: 0.0,
            duration: None,
            thumbnail: None,
            timestamp: 0.0,
            chapter: None,
            episode: None,
        }
    }

    fn sessions_of(response: &Response) -> Vec<TrackingSession> {
        serde_json::from_value(response.data.clone().unwrap()).unwrap()
    }

    fn persisted_view(storage: &MemoryStorage) -> Vec<ActiveTrackingRecord> {
        serde_json::from_value(storage.peek(StorageKey::ActiveTracking).unwrap()).unwrap()
    }

    #[test]
    fn test_session_scenarios() {
        let mut h = create_test_coordinator();
        let c = &mut h.coordinator;

        // A: start
        let response = block_on(c.handle(Some(7), Request::TrackingStart(create_test_media())));
        assert!(response.success);
        let sessions = sessions_of(&block_on(c.handle(None, Request::GetActiveSessions)));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].watch_time, 0.0);
        assert!(!sessions[0].completed);

        // B: patch
        block_on(c.handle(
            Some(7),
            Request::TrackingUpdate(MediaPatch {
                watch_time: Some(120.0),
                progress: Some(50.0),
                duration: Some(240.0),
                ..MediaPatch::default()
            }),
        ));
        let sessions = sessions_of(&block_on(c.handle(None, Request::GetActiveSessions)));
        assert_eq!(sessions[0].media_info.progress, 50.0);
        assert_eq!(sessions[0].media_info.duration, Some(240.0));
        assert_eq!(sessions[0].watch_time, 120.0);

        // C: update without start creates a second session
        block_on(c.handle(
            Some(8),
            Request::TrackingUpdate(MediaPatch {
                url: Some(URL.to_string()),
                watch_time: Some(200.0),
                ..MediaPatch::default()
            }),
        ));
        let sessions = sessions_of(&block_on(c.handle(None, Request::GetActiveSessions)));
        assert_eq!(sessions.len(), 2);
        let view = persisted_view(&h.storage);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].tab_id, 8);
        assert_eq!(view[0].watch_time, 200);

        // D: end tab 7
        let c = &mut h.coordinator;
        block_on(c.handle(Some(7), Request::TrackingEnd));
        let sessions = sessions_of(&block_on(c.handle(None, Request::GetActiveSessions)));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].tab_id, 8);
        let view = persisted_view(&h.storage);
        assert_eq!(view.len(), 1);
        assert_eq!(view[0].tab_id, 8);
    }

    #[test]
    fn test_end_without_session_succeeds() {
        let mut h = create_test_coordinator();
        let response = block_on(h.coordinator.handle(Some(3), Request::TrackingEnd));
        assert_eq!(response, Response::ok());
    }

    #[test]
    fn test_start_requires_sender_tab() {
        let mut h = create_test_coordinator();
        let response = block_on(h.coordinator.handle(None, Request::TrackingStart(create_test_media())));
        assert!(!response.success);
        assert!(h.storage.peek(StorageKey::ActiveTracking).is_none());
    }

    #[test]
    fn test_media_completed() {
        let mut h = create_test_coordinator();
        block_on(h.coordinator.handle(Some(7), Request::TrackingStart(create_test_media())));

        let completed = crate::media::CompletedMedia {
            media: create_test_media(),
            watch_time: Some(300.0),
        };
        let response = block_on(h.coordinator.handle(Some(7), Request::MediaCompleted(completed.clone())));
        assert!(response.success);

        // Appended independently of session state
        block_on(h.coordinator.handle(None, Request::MediaCompleted(completed)));
        let pending = block_on(h.coordinator.handle(None, Request::GetPendingCompletions));
        assert_eq!(pending.data.unwrap().as_array().unwrap().len(), 2);

        assert!(persisted_view(&h.storage)[0].completed);
        assert_eq!(h.notifier.notifications.borrow().len(), 2);
        assert_eq!(h.notifier.last_badge(), Some(Badge::Attention));

        block_on(h.coordinator.handle(None, Request::ClearPendingCompletions));
        assert_eq!(h.notifier.last_badge(), Some(Badge::Clear));
    }

    #[test]
    fn test_completion_respects_notification_setting() {
        let mut h = create_test_coordinator();
        block_on(h.coordinator.handle(
            None,
            Request::UpdateSettings(settings::SettingsPatch {
                notifications_enabled: Some(false),
                ..settings::SettingsPatch::default()
            }),
        ));

        let completed = crate::media::CompletedMedia {
            media: create_test_media(),
            watch_time: None,
        };
        block_on(h.coordinator.handle(Some(1), Request::MediaCompleted(completed)));

        assert!(h.notifier.notifications.borrow().is_empty());
        assert_eq!(h.notifier.last_badge(), Some(Badge::Attention));
    }

    #[test]
    fn test_completion_with_unreadable_notification_setting() {
        let mut h = create_test_coordinator();
        block_on(StorageBridge::new(h.storage.clone()).save(StorageKey::NotificationsEnabled, &json!("yes")))
            .unwrap();

        let completed = crate::media::CompletedMedia {
            media: create_test_media(),
            watch_time: None,
        };
        let response = block_on(h.coordinator.handle(Some(1), Request::MediaCompleted(completed)));

        assert!(response.success);
        assert_eq!(h.notifier.notifications.borrow().len(), 1);
        assert_eq!(h.notifier.last_badge(), Some(Badge::Attention));
        let pending = block_on(h.coordinator.handle(None, Request::GetPendingCompletions));
        assert_eq!(pending.data.unwrap().as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_dismiss_clears_badge_when_empty() {
        let mut h = create_test_coordinator();
        let completed = crate::media::CompletedMedia {
            media: create_test_media(),
            watch_time: None,
        };
        block_on(h.coordinator.handle(Some(1), Request::MediaCompleted(completed)));
        let pending = block_on(h.coordinator.handle(None, Request::GetPendingCompletions));
        let id = pending.data.unwrap()[0]["id"].as_str().unwrap().to_string();

        let response = block_on(h.coordinator.handle(None, Request::DismissPendingCompletion { id }));
        assert_eq!(response.count, Some(0));
        assert_eq!(h.notifier.last_badge(), Some(Badge::Clear));
    }

    #[test]
    fn test_tab_close_recomputes_view() {
        let mut h = create_test_coordinator();
        block_on(h.coordinator.handle(Some(7), Request::TrackingStart(create_test_media())));
        assert_eq!(persisted_view(&h.storage).len(), 1);

        block_on(h.coordinator.tab_removed(7));
        assert!(persisted_view(&h.storage).is_empty());
    }

    #[test]
    fn test_rehydrates_after_restart() {
        let mut h = create_test_coordinator();
        block_on(h.coordinator.handle(Some(7), Request::TrackingStart(create_test_media())));

        let mut restarted = SessionCoordinator::new(
            StorageBridge::new(h.storage.clone()),
            h.notifier.clone(),
            h.clock.clone(),
            h.fetcher.clone(),
            CoordinatorConfig::default(),
        );
        assert_eq!(block_on(restarted.rehydrate()).unwrap(), 1);

        let sessions = sessions_of(&block_on(restarted.handle(None, Request::GetActiveSessions)));
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].tab_id, 7);
    }

    #[test]
    fn test_settings_and_user_data() {
        let mut h = create_test_coordinator();
        let settings = block_on(h.coordinator.handle(None, Request::GetSettings));
        assert_eq!(settings.data.as_ref().unwrap()["trackingEnabled"], true);
        assert_eq!(settings.data.as_ref().unwrap()["notificationsEnabled"], true);

        block_on(h.coordinator.handle(None, Request::SaveUserData(json!({"name": "ana"}))));
        let data = block_on(h.coordinator.handle(None, Request::GetUserData));
        assert_eq!(data.data, Some(json!({"name": "ana"})));
    }

    #[test]
    fn test_add_completion_updates_badge_count() {
        let mut h = create_test_coordinator();
        let Value::Object(entry) = json!({"title": "Dune"}) else { unreachable!() };
        block_on(h.coordinator.handle(None, Request::AddCompletion(entry.clone())));
        block_on(h.coordinator.handle(None, Request::AddCompletion(entry)));

        assert_eq!(h.notifier.last_badge(), Some(Badge::Count(2)));
        let list = block_on(h.coordinator.handle(None, Request::GetCompletions));
        assert_eq!(list.data.unwrap().as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_actor_serves_messages_and_series_checks() {
        let h = create_test_coordinator();
        block_on(StorageBridge::new(h.storage.clone()).save(
            StorageKey::SeriesBookmarks,
            &json!([{"id": "b1", "title": "S", "url": "https://x.example/s", "currentChapter": "10"}]),
        ))
        .unwrap();
        h.fetcher
            .serve("https://x.example/s", FakePage::Body("Chapter 10.5".to_string()));

        let mut pool = LocalPool::new();
        let (handle, run) = h.coordinator.into_actor();
        pool.spawner().spawn_local(run).unwrap();

        let start = json!({
            "type": "TRACKING_START",
            "data": {"platform": "youtube", "type": "video", "title": "T", "url": URL, "progress": 0}
        });
        assert!(pool.run_until(handle.dispatch(Some(7), start)).success);

        let unknown = pool.run_until(handle.dispatch(None, json!({"type": "PING"})));
        assert_eq!(unknown.error.as_deref(), Some("Unknown message type"));

        // E: series check through the alarm
        let response = pool.run_until(handle.on_alarm(SERIES_ALARM)).unwrap();
        assert_eq!(response.count, Some(1));
        assert_eq!(h.notifier.last_badge(), Some(Badge::SeriesUpdate));
        assert_eq!(h.notifier.notifications.borrow().len(), 1);
        assert!(pool.run_until(handle.on_alarm("other")).is_none());

        // F: mark everything read
        let response = pool.run_until(handle.dispatch(None, json!({"type": "MARK_ALL_SERIES_READ"})));
        assert!(response.success);
        assert_eq!(h.notifier.last_badge(), Some(Badge::Clear));
        let bookmarks = pool.run_until(handle.dispatch(None, json!({"type": "GET_SERIES_BOOKMARKS"})));
        let bookmark = &bookmarks.data.unwrap()[0];
        assert_eq!(bookmark["currentChapter"], "10.5");
        assert_eq!(bookmark["hasUpdate"], false);

        pool.run_until(handle.tab_removed(7)).unwrap();
        let sessions = pool.run_until(handle.dispatch(None, json!({"type": "GET_ACTIVE_SESSIONS"})));
        assert_eq!(sessions.data, Some(json!([])));
    }

    #[test]
    fn test_handle_reports_gone_coordinator() {
        let h = create_test_coordinator();
        let (handle, run) = h.coordinator.into_actor();
        drop(run);

        let response = block_on(handle.request(None, Request::GetSettings));
        assert_eq!(response.error, Some(TrackerError::CoordinatorGone.to_string()));
    }
}
