//! Browser-side checks, run with `wasm-pack test --headless --chrome`.

#![cfg(target_arch = "wasm32")]

use trex_tracker::browser::page::DomView;
use trex_tracker::tracker::PageView;
use wasm_bindgen_test::*;

wasm_bindgen_test_configure!(run_in_browser);

#[wasm_bindgen_test]
fn test_detect_platform_export() {
    assert_eq!(
        trex_tracker::detect_platform("https://www.youtube.com/watch?v=abc").as_deref(),
        Some("youtube")
    );
    assert_eq!(trex_tracker::detect_platform("https://example.org"), None);
}

#[wasm_bindgen_test]
fn test_dom_view_reads_document() {
    let document = web_sys::window().unwrap().document().unwrap();
    document.set_title("Dune | Netflix");

    let view = DomView::new().unwrap();
    assert_eq!(view.document_title().as_deref(), Some("Dune | Netflix"));
    assert!(view.location().starts_with("http"));
    assert!(view.video_state().is_none());
}

#[wasm_bindgen_test]
fn test_invalid_selector_is_an_error() {
    let view = DomView::new().unwrap();
    assert!(view.first_text(&["[[nope"]).is_err());
}
