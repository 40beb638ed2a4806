//! Side effects the coordinator and the series checker ask the browser for:
//! notifications, the action badge, wall-clock time and timers.

use async_trait::async_trait;
use futures::future::LocalBoxFuture;

use crate::error::Result;

/// Action badge states. Completion and series updates use different colors
/// so the user can tell them apart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Badge {
    Clear,
    /// A completion is waiting to be minted.
    Attention,
    SeriesUpdate,
    /// Number of recorded completions.
    Count(usize),
}

impl Badge {
    pub fn text(self) -> String {
        match self {
            Badge::Clear => String::new(),
            Badge::Attention => "!".to_string(),
            Badge::SeriesUpdate => "NEW".to_string(),
            Badge::Count(0) => String::new(),
            Badge::Count(n) => n.to_string(),
        }
    }

    /// Background color, `None` when the badge is hidden.
    pub fn color(self) -> Option<&'static str> {
        match self {
            Badge::Clear | Badge::Count(0) => None,
            Badge::Attention => Some("#00d4ff"),
            Badge::SeriesUpdate | Badge::Count(_) => Some("#7c3aed"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub message: String,
    /// Chrome notification priority, -2..=2.
    pub priority: i8,
}

impl Notification {
    pub fn media_completed(title: &str) -> Self {
        Notification {
            title: "Media Completed! 🎉".to_string(),
            message: format!(
                "You finished \"{}\". Mint an NFT to record your achievement!",
                title
            ),
            priority: 2,
        }
    }

    pub fn series_updates(count: usize) -> Self {
        Notification {
            title: "Series Updates".to_string(),
            message: format!("{} series may have new chapters", count),
            priority: 1,
        }
    }

    pub fn registration_failed(origins: &[String], reason: &str) -> Self {
        Notification {
            title: "Tracking unavailable".to_string(),
            message: format!("Could not start tracking on {}: {}", origins.join(", "), reason),
            priority: 1,
        }
    }
}

#[async_trait(?Send)]
pub trait Notifier {
    async fn notify(&self, notification: Notification) -> Result<()>;
    async fn set_badge(&self, badge: Badge) -> Result<()>;
}

pub trait Clock {
    /// Milliseconds since the Unix epoch.
    fn now_ms(&self) -> f64;
    fn sleep(&self, ms: u32) -> LocalBoxFuture<'static, ()>;
}

/// Show a notification and log instead of failing the caller when the
/// browser refuses it.
pub async fn notify_best_effort(notifier: &dyn Notifier, notification: Notification) {
    if let Err(e) = notifier.notify(notification).await {
        log::warn!("Notification failed: {}", e);
    }
}

pub async fn set_badge_best_effort(notifier: &dyn Notifier, badge: Badge) {
    if let Err(e) = notifier.set_badge(badge).await {
        log::warn!("Badge update failed: {}", e);
    }
}
