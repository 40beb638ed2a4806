//! Deciding when a piece of media counts as finished.
//!
//! The thresholds are data, not code: the default values live in
//! [`CompletionPolicy::default`], users can change them through
//! `UPDATE_SETTINGS`, and callers that need something else entirely can hand
//! the tracker their own [`CompletionRule`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::media::MediaType;

/// Position inside a paged reader (manga panels, book pages).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PagePosition {
    pub current: u32,
    pub total: u32,
}

/// What the tracker observed on its latest sample.
#[derive(Debug, Clone, Copy)]
pub struct ProgressSample<'a> {
    pub platform: &'a str,
    pub media_type: MediaType,
    /// Percent, 0..=100.
    pub progress: f64,
    /// Seconds, when known.
    pub duration: Option<f64>,
    pub page: Option<PagePosition>,
}

pub trait CompletionRule {
    fn is_complete(&self, sample: &ProgressSample<'_>) -> bool;
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CompletionPolicy {
    pub video_progress_percent: f64,
    /// Video also completes once fewer than this many seconds remain.
    pub video_remaining_secs: f64,
    pub reading_progress_percent: f64,
    /// Platform name → progress percent, replacing the per-type threshold.
    pub platform_overrides: BTreeMap<String, f64>,
}

impl Default for CompletionPolicy {
    fn default() -> Self {
        CompletionPolicy {
            video_progress_percent: 90.0,
            video_remaining_secs: 30.0,
            reading_progress_percent: 85.0,
            platform_overrides: BTreeMap::new(),
        }
    }
}

impl CompletionPolicy {
    fn threshold_for(&self, sample: &ProgressSample<'_>) -> f64 {
        if let Some(threshold) = self.platform_overrides.get(sample.platform) {
            return *threshold;
        }
        if sample.media_type.is_reading() {
            self.reading_progress_percent
        } else {
            self.video_progress_percent
        }
    }
}

impl CompletionRule for CompletionPolicy {
    fn is_complete(&self, sample: &ProgressSample<'_>) -> bool {
        if sample.progress >= self.threshold_for(sample) {
            return true;
        }

        if sample.media_type.is_reading() {
            // Reaching the last-but-one page counts; the final page is often credits.
            return sample
                .page
                .is_some_and(|page| page.total > 0 && page.current + 1 >= page.total);
        }

        match sample.duration {
            Some(duration) if duration > 0.0 && sample.progress > 0.0 => {
                let remaining = duration - (sample.progress / 100.0) * duration;
                remaining < self.video_remaining_secs
            }
            _ => false,
        }
    }
}
