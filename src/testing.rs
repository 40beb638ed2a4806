//! In-memory collaborators shared by the unit tests.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::rc::Rc;

use async_trait::async_trait;
use futures::future::{self, FutureExt, LocalBoxFuture};

use crate::coordinator::effects::{Badge, Clock, Notification, Notifier};
use crate::error::{Result, TrackerError};
use crate::series::PageFetcher;
use crate::storage::{MemoryStorage, StorageBridge};

/// Clock whose timers fire on the first poll unless held.
pub struct FakeClock {
    now: Cell<f64>,
    timers_fire: Cell<bool>,
}

impl FakeClock {
    pub fn new(now: f64) -> Rc<Self> {
        Rc::new(FakeClock {
            now: Cell::new(now),
            timers_fire: Cell::new(true),
        })
    }

    /// Timers created from now on never fire.
    pub fn hold_timers(&self) {
        self.timers_fire.set(false);
    }

    pub fn advance(&self, ms: f64) {
        self.now.set(self.now.get() + ms);
    }
}

impl Clock for FakeClock {
    fn now_ms(&self) -> f64 {
        self.now.get()
    }

    fn sleep(&self, _ms: u32) -> LocalBoxFuture<'static, ()> {
        if self.timers_fire.get() {
            future::ready(()).boxed_local()
        } else {
            future::pending().boxed_local()
        }
    }
}

#[derive(Default)]
pub struct RecordingNotifier {
    pub notifications: RefCell<Vec<Notification>>,
    pub badges: RefCell<Vec<Badge>>,
}

impl RecordingNotifier {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn last_badge(&self) -> Option<Badge> {
        self.badges.borrow().last().copied()
    }
}

#[async_trait(?Send)]
impl Notifier for RecordingNotifier {
    async fn notify(&self, notification: Notification) -> Result<()> {
        self.notifications.borrow_mut().push(notification);
        Ok(())
    }

    async fn set_badge(&self, badge: Badge) -> Result<()> {
        self.badges.borrow_mut().push(badge);
        Ok(())
    }
}

pub enum FakePage {
    Body(String),
    Fail,
    /// Never resolves; only a timeout gets the caller out.
    Hang,
}

#[derive(Default)]
pub struct FakeFetcher {
    pages: RefCell<HashMap<String, FakePage>>,
    pub requests: RefCell<Vec<String>>,
}

impl FakeFetcher {
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    pub fn serve(&self, url: &str, page: FakePage) {
        self.pages.borrow_mut().insert(url.to_string(), page);
    }
}

#[async_trait(?Send)]
impl PageFetcher for FakeFetcher {
    async fn fetch_text(&self, url: &str) -> Result<String> {
        self.requests.borrow_mut().push(url.to_string());
        let body = match self.pages.borrow().get(url) {
            Some(FakePage::Body(body)) => Some(body.clone()),
            Some(FakePage::Hang) => None,
            Some(FakePage::Fail) | None => {
                return Err(TrackerError::Fetch {
                    url: url.to_string(),
                    reason: "connection refused".to_string(),
                });
            }
        };
        match body {
            Some(body) => Ok(body),
            None => future::pending().await,
        }
    }
}

pub fn create_test_storage() -> (Rc<MemoryStorage>, StorageBridge) {
    let storage = Rc::new(MemoryStorage::new());
    let bridge = StorageBridge::new(storage.clone());
    (storage, bridge)
}
