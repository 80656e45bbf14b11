/// Platform tab/group primitives consumed by the engine and the sweep.
///
/// Every call may fail because a tab or group vanished concurrently;
/// callers abandon that one operation and never propagate further.
use crate::error::PlatformError;
use crate::tab_data::{GroupColor, NativeGroup, NativeGroupId, TabId, TabInfo};

#[allow(async_fn_in_trait)]
pub trait TabPlatform {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, PlatformError>;

    /// Fresh state of one tab; `TabGone` once it is closed
    async fn get_tab(&self, tab_id: TabId) -> Result<TabInfo, PlatformError>;

    async fn query_groups(&self) -> Result<Vec<NativeGroup>, PlatformError>;

    /// Group `tab_ids` into a brand-new native group and return its id
    async fn create_group(&self, tab_ids: &[TabId]) -> Result<NativeGroupId, PlatformError>;

    async fn update_group(&self, group_id: NativeGroupId, title: &str, color: GroupColor) -> Result<(), PlatformError>;

    async fn move_to_group(&self, tab_ids: &[TabId], group_id: NativeGroupId) -> Result<(), PlatformError>;

    async fn ungroup(&self, tab_ids: &[TabId]) -> Result<(), PlatformError>;

    async fn discard_tab(&self, tab_id: TabId) -> Result<(), PlatformError>;

    async fn close_tab(&self, tab_id: TabId) -> Result<(), PlatformError>;

    /// Open a background tab (used to reconstitute pinned groups)
    async fn create_tab(&self, url: &str) -> Result<TabInfo, PlatformError>;

    async fn move_tab(&self, tab_id: TabId, index: i32) -> Result<(), PlatformError>;

    async fn tabs_in_group(&self, group_id: NativeGroupId) -> Result<Vec<TabInfo>, PlatformError> {
        Ok(self
            .query_tabs()
            .await?
            .into_iter()
            .filter(|tab| tab.group_id == group_id)
            .collect())
    }
}

/// Milliseconds since the epoch; `js_sys::Date::now` in the extension
pub type Clock = std::rc::Rc<dyn Fn() -> f64>;
