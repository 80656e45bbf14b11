/// Tab Organizer - Chrome Extension for automatic tab grouping
/// Built with Rust + WASM

pub mod background;
pub mod bridge;
pub mod classifier;
pub mod engine;
pub mod error;
pub mod lifecycle;
pub mod lock;
pub mod operations;
pub mod pattern;
pub mod pinned;
pub mod platform;
pub mod registry;
pub mod settings;
pub mod storage;
pub mod tab_data;

#[cfg(test)]
mod testing;

use crate::background::Background;
use crate::bridge::{ChromePlatform, ChromeStorage, FetchTransport};
use crate::classifier::ChatClassifier;
use crate::engine::GroupingEngine;
use crate::operations::DefinitionInput;
use crate::platform::Clock;
use crate::settings::ClassifierSettings;
use std::rc::Rc;
use wasm_bindgen::prelude::*;

// Set up panic hook for better error messages in the browser console
#[wasm_bindgen(start)]
pub fn main() {
    console_error_panic_hook::set_once();
    wasm_logger::init(wasm_logger::Config::default());
}

fn to_js(e: impl std::fmt::Display) -> JsValue {
    JsValue::from_str(&e.to_string())
}

// Entry point of the background service worker
#[wasm_bindgen]
pub async fn start_background() -> Result<(), JsValue> {
    let clock: Clock = Rc::new(js_sys::Date::now);
    let classifier = ChatClassifier::new(FetchTransport, ClassifierSettings::default(), clock.clone());
    let engine = GroupingEngine::new(ChromePlatform, ChromeStorage, classifier, clock);
    let background = Rc::new(Background::new(engine));

    bridge::install(background.clone())?;
    background.start().await;
    Ok(())
}

// Popup operations. They only write storage; the background reacts to the change.

#[wasm_bindgen]
pub async fn save_group_definition(json: String) -> Result<String, JsValue> {
    let input: DefinitionInput = serde_json::from_str(&json).map_err(to_js)?;
    operations::create_or_update_group_definition(&ChromeStorage, input, js_sys::Date::now())
        .await
        .map_err(to_js)
}

#[wasm_bindgen]
pub async fn delete_group_definition(id: String) -> Result<(), JsValue> {
    operations::delete_group_definition(&ChromeStorage, &id)
        .await
        .map(|_| ())
        .map_err(to_js)
}

#[wasm_bindgen]
pub async fn set_feature_enabled(feature: String, enabled: bool) -> Result<(), JsValue> {
    operations::set_feature_enabled(&ChromeStorage, &feature, enabled)
        .await
        .map_err(to_js)
}

#[wasm_bindgen]
pub async fn set_threshold(feature: String, minutes: u32, seconds: u32) -> Result<(), JsValue> {
    operations::set_threshold(&ChromeStorage, &feature, minutes, seconds)
        .await
        .map_err(to_js)
}

#[wasm_bindgen]
pub async fn pin_group(group_id: i32) -> Result<(), JsValue> {
    pinned::pin_group(&ChromePlatform, &ChromeStorage, group_id)
        .await
        .map(|_| ())
        .map_err(to_js)
}

#[wasm_bindgen]
pub async fn unpin_group(group_id: i32) -> Result<bool, JsValue> {
    pinned::unpin_group(&ChromeStorage, group_id).await.map_err(to_js)
}

// Lets the popup preview a pattern before saving it
#[wasm_bindgen]
pub fn matches_pattern(url: &str, pattern: &str) -> bool {
    pattern::matches(url, pattern)
}
