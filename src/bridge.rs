/// Bindings to the chrome.* APIs through `background_bridge.js`.

use crate::background::Background;
use crate::classifier::{ChatClassifier, ChatTransport};
use crate::error::{ClassifyError, PlatformError, StorageError};
use crate::lifecycle::SWEEP_INTERVAL_MS;
use crate::platform::TabPlatform;
use crate::storage::{STORAGE_KEY, StorageData, Store};
use crate::tab_data::{GroupColor, NativeGroup, NativeGroupId, TabId, TabInfo};
use log::{debug, warn};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::rc::Rc;
use wasm_bindgen::closure::WasmClosure;
use wasm_bindgen::prelude::*;
use wasm_bindgen_futures::spawn_local;

#[wasm_bindgen(module = "/background_bridge.js")]
extern "C" {
    #[wasm_bindgen(catch)]
    async fn queryTabs() -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn getTab(tab_id: i32) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn queryGroups() -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn groupTabs(tab_ids: JsValue, group_id: Option<i32>) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn updateGroup(group_id: i32, title: &str, color: &str) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn ungroupTabs(tab_ids: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn discardTab(tab_id: i32) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn removeTab(tab_id: i32) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn createTab(url: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn moveTab(tab_id: i32, index: i32) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn getStorage(key: &str) -> Result<JsValue, JsValue>;

    #[wasm_bindgen(catch)]
    async fn setStorage(key: &str, value: JsValue) -> Result<(), JsValue>;

    #[wasm_bindgen(catch)]
    async fn postJson(url: &str, api_key: Option<String>, body: &str) -> Result<JsValue, JsValue>;

    fn registerListeners(handlers: &js_sys::Object);
}

/// Map a rejected chrome.* promise onto the vanished-tab/group cases
fn call_failed(call: &'static str, e: JsValue, tab_id: Option<TabId>, group_id: Option<NativeGroupId>) -> PlatformError {
    let message = format!("{:?}", e);
    match (tab_id, group_id) {
        (Some(id), _) if message.contains("No tab with id") => PlatformError::TabGone(id),
        (_, Some(id)) if message.contains("No group with id") => PlatformError::GroupGone(id),
        _ => PlatformError::Call { call, message },
    }
}

fn decode<T: DeserializeOwned>(what: &'static str, value: JsValue) -> Result<T, PlatformError> {
    serde_wasm_bindgen::from_value(value).map_err(|e| PlatformError::Decode {
        what,
        message: format!("{:?}", e),
    })
}

fn tab_id_array(tab_ids: &[TabId]) -> JsValue {
    tab_ids.iter().copied().map(JsValue::from).collect::<js_sys::Array>().into()
}

/// chrome.tabs and chrome.tabGroups
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromePlatform;

impl TabPlatform for ChromePlatform {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, PlatformError> {
        let tabs = queryTabs().await.map_err(|e| call_failed("tabs.query", e, None, None))?;
        decode("tabs", tabs)
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<TabInfo, PlatformError> {
        let tab = getTab(tab_id)
            .await
            .map_err(|e| call_failed("tabs.get", e, Some(tab_id), None))?;
        decode("tab", tab)
    }

    async fn query_groups(&self) -> Result<Vec<NativeGroup>, PlatformError> {
        let groups = queryGroups()
            .await
            .map_err(|e| call_failed("tabGroups.query", e, None, None))?;
        decode("tab groups", groups)
    }

    async fn create_group(&self, tab_ids: &[TabId]) -> Result<NativeGroupId, PlatformError> {
        let first = tab_ids.first().copied();
        let group_id = groupTabs(tab_id_array(tab_ids), None)
            .await
            .map_err(|e| call_failed("tabs.group", e, first, None))?;
        decode("group id", group_id)
    }

    async fn update_group(&self, group_id: NativeGroupId, title: &str, color: GroupColor) -> Result<(), PlatformError> {
        updateGroup(group_id, title, color.as_str())
            .await
            .map_err(|e| call_failed("tabGroups.update", e, None, Some(group_id)))
    }

    async fn move_to_group(&self, tab_ids: &[TabId], group_id: NativeGroupId) -> Result<(), PlatformError> {
        groupTabs(tab_id_array(tab_ids), Some(group_id))
            .await
            .map_err(|e| call_failed("tabs.group", e, tab_ids.first().copied(), Some(group_id)))?;
        Ok(())
    }

    async fn ungroup(&self, tab_ids: &[TabId]) -> Result<(), PlatformError> {
        ungroupTabs(tab_id_array(tab_ids))
            .await
            .map_err(|e| call_failed("tabs.ungroup", e, tab_ids.first().copied(), None))
    }

    async fn discard_tab(&self, tab_id: TabId) -> Result<(), PlatformError> {
        discardTab(tab_id)
            .await
            .map_err(|e| call_failed("tabs.discard", e, Some(tab_id), None))
    }

    async fn close_tab(&self, tab_id: TabId) -> Result<(), PlatformError> {
        removeTab(tab_id)
            .await
            .map_err(|e| call_failed("tabs.remove", e, Some(tab_id), None))
    }

    async fn create_tab(&self, url: &str) -> Result<TabInfo, PlatformError> {
        let tab = createTab(url)
            .await
            .map_err(|e| call_failed("tabs.create", e, None, None))?;
        decode("tab", tab)
    }

    async fn move_tab(&self, tab_id: TabId, index: i32) -> Result<(), PlatformError> {
        moveTab(tab_id, index)
            .await
            .map_err(|e| call_failed("tabs.move", e, Some(tab_id), None))
    }
}

/// chrome.storage.local, one record under [`STORAGE_KEY`]
#[derive(Debug, Default, Clone, Copy)]
pub struct ChromeStorage;

impl Store for ChromeStorage {
    async fn load(&self) -> Result<StorageData, StorageError> {
        let value = getStorage(STORAGE_KEY)
            .await
            .map_err(|e| StorageError::Read(format!("{:?}", e)))?;
        if value.is_undefined() || value.is_null() {
            return Ok(StorageData::new());
        }
        serde_wasm_bindgen::from_value(value).map_err(|e| StorageError::Decode(format!("{:?}", e)))
    }

    async fn save(&self, data: &StorageData) -> Result<(), StorageError> {
        // Plain objects rather than JS Maps, so storage can hold them
        let value = data
            .serialize(&serde_wasm_bindgen::Serializer::json_compatible())
            .map_err(|e| StorageError::Write(format!("Failed to serialize: {:?}", e)))?;
        setStorage(STORAGE_KEY, value)
            .await
            .map_err(|e| StorageError::Write(format!("{:?}", e)))
    }
}

/// Classifier requests via fetch()
#[derive(Debug, Default, Clone, Copy)]
pub struct FetchTransport;

impl ChatTransport for FetchTransport {
    async fn post_json(&self, url: &str, api_key: Option<&str>, body: &Value) -> Result<Value, ClassifyError> {
        let response = postJson(url, api_key.map(str::to_string), &body.to_string())
            .await
            .map_err(|e| ClassifyError::Transport(format!("{:?}", e)))?;
        serde_wasm_bindgen::from_value(response).map_err(|e| ClassifyError::MalformedResponse(format!("{:?}", e)))
    }
}

pub type ExtensionBackground = Background<ChromePlatform, ChromeStorage, ChatClassifier<FetchTransport>>;

fn set_handler<F>(handlers: &js_sys::Object, name: &str, closure: Closure<F>) -> Result<(), JsValue>
where
    F: ?Sized + WasmClosure,
{
    js_sys::Reflect::set(handlers, &JsValue::from_str(name), closure.as_ref())?;
    // Listeners live as long as the service worker
    closure.forget();
    Ok(())
}

/// Register every browser listener and start the sweep timer
pub fn install(background: Rc<ExtensionBackground>) -> Result<(), JsValue> {
    let handlers = js_sys::Object::new();

    let bg = background.clone();
    set_handler(
        &handlers,
        "onTabCreated",
        Closure::wrap(Box::new(move |tab: JsValue| {
            let bg = bg.clone();
            spawn_local(async move {
                match serde_wasm_bindgen::from_value::<TabInfo>(tab) {
                    Ok(tab) => {
                        bg.on_tab_created(&tab).await;
                    }
                    Err(e) => warn!("Ignoring malformed created tab: {:?}", e),
                }
            });
        }) as Box<dyn Fn(JsValue)>),
    )?;

    let bg = background.clone();
    set_handler(
        &handlers,
        "onTabUpdated",
        Closure::wrap(Box::new(move |tab_id: i32, url_changed: bool| {
            let bg = bg.clone();
            spawn_local(async move {
                bg.on_tab_updated(tab_id, url_changed).await;
            });
        }) as Box<dyn Fn(i32, bool)>),
    )?;

    let bg = background.clone();
    set_handler(
        &handlers,
        "onTabActivated",
        Closure::wrap(Box::new(move |tab_id: i32| bg.on_tab_activated(tab_id)) as Box<dyn Fn(i32)>),
    )?;

    let bg = background.clone();
    set_handler(
        &handlers,
        "onTabRemoved",
        Closure::wrap(Box::new(move |tab_id: i32| bg.on_tab_removed(tab_id)) as Box<dyn Fn(i32)>),
    )?;

    let bg = background.clone();
    set_handler(
        &handlers,
        "onGroupChanged",
        Closure::wrap(Box::new(move |group: JsValue| {
            let bg = bg.clone();
            spawn_local(async move {
                match serde_wasm_bindgen::from_value::<NativeGroup>(group) {
                    Ok(group) => bg.on_group_changed(&group).await,
                    Err(e) => warn!("Ignoring malformed tab group: {:?}", e),
                }
            });
        }) as Box<dyn Fn(JsValue)>),
    )?;

    let bg = background.clone();
    set_handler(
        &handlers,
        "onGroupRemoved",
        Closure::wrap(Box::new(move |group_id: i32| {
            let bg = bg.clone();
            spawn_local(async move {
                bg.on_group_removed(group_id).await;
            });
        }) as Box<dyn Fn(i32)>),
    )?;

    let bg = background.clone();
    set_handler(
        &handlers,
        "onStorageChanged",
        Closure::wrap(Box::new(move |old: JsValue, new: JsValue| {
            let bg = bg.clone();
            spawn_local(async move {
                let old = serde_wasm_bindgen::from_value::<Option<StorageData>>(old);
                let new = serde_wasm_bindgen::from_value::<Option<StorageData>>(new);
                match (old, new) {
                    (Ok(old), Ok(new)) => {
                        let report = bg.on_storage_changed(old, new).await;
                        debug!("Storage change handled: {:?}", report);
                    }
                    (Err(e), _) | (_, Err(e)) => warn!("Ignoring malformed storage change: {:?}", e),
                }
            });
        }) as Box<dyn Fn(JsValue, JsValue)>),
    )?;

    registerListeners(&handlers);

    let bg = background;
    let tick = Closure::wrap(Box::new(move || {
        let bg = bg.clone();
        spawn_local(async move {
            bg.tick().await;
        });
    }) as Box<dyn Fn()>);
    let scope: web_sys::WorkerGlobalScope = js_sys::global().unchecked_into();
    scope.set_interval_with_callback_and_timeout_and_arguments_0(
        tick.as_ref().unchecked_ref(),
        SWEEP_INTERVAL_MS as i32,
    )?;
    tick.forget();

    Ok(())
}
