/// Trex Tracker - media progress tracking for a Chrome extension
/// Built with Rust + WASM

pub mod completion;
pub mod coordinator;
pub mod domain;
pub mod error;
pub mod media;
pub mod metadata;
pub mod platforms;
pub mod protocol;
pub mod series;
pub mod sessions;
pub mod settings;
pub mod storage;
pub mod tracker;

#[cfg(target_arch = "wasm32")]
pub mod browser;

#[cfg(test)]
mod testing;

use wasm_bindgen::prelude::*;

// Set up panic hook for better error messages in the browser console
#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

// Re-export platform matching for JavaScript access
#[wasm_bindgen]
pub fn detect_platform(url: &str) -> Option<String> {
    platforms::match_builtin(url).map(|descriptor| descriptor.name.to_string())
}
