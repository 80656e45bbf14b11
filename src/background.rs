/// Background service worker: wires browser events into the engine and
/// the lifecycle sweep. Every handler logs its failures and returns.

use crate::classifier::Classifier;
use crate::engine::{BulkReport, GroupOutcome, GroupingEngine};
use crate::lifecycle::{SweepReport, TabLifecycleManager};
use crate::pinned::{refresh_pinned_groups, restore_pinned_groups};
use crate::platform::TabPlatform;
use crate::storage::{StorageData, Store};
use crate::tab_data::{NativeGroup, NativeGroupId, TabId, TabInfo};
use log::{info, warn};
use std::rc::Rc;

pub struct Background<P, S, C> {
    engine: Rc<GroupingEngine<P, S, C>>,
    lifecycle: TabLifecycleManager<P, S, C>,
}

impl<P, S, C> Background<P, S, C>
where
    P: TabPlatform,
    S: Store,
    C: Classifier,
{
    pub fn new(engine: GroupingEngine<P, S, C>) -> Self {
        let engine = Rc::new(engine);
        let lifecycle = TabLifecycleManager::new(engine.clone());
        Background { engine, lifecycle }
    }

    pub fn engine(&self) -> &GroupingEngine<P, S, C> {
        &self.engine
    }

    /// Load config, bring back pinned groups, then reconcile live groups
    /// with the stored definitions.
    pub async fn start(&self) {
        if !self.engine.load_config().await {
            warn!("Starting with default configuration");
        }

        restore_pinned_groups(self.engine()).await;

        match self.engine.reconcile().await {
            Ok(report) => info!("Background started: {:?}", report),
            Err(e) => warn!("Startup reconciliation failed: {}", e),
        }
    }

    pub async fn on_tab_created(&self, tab: &TabInfo) -> GroupOutcome {
        if tab.active {
            self.lifecycle.record_access(tab.id, self.engine.now());
        }
        self.engine.group_tab(tab.id).await
    }

    /// A navigation invalidates whatever the tab was assigned to
    pub async fn on_tab_updated(&self, tab_id: TabId, url_changed: bool) -> GroupOutcome {
        if url_changed {
            self.engine.forget_tab(tab_id);
        }
        self.engine.group_tab(tab_id).await
    }

    pub fn on_tab_activated(&self, tab_id: TabId) {
        self.lifecycle.record_access(tab_id, self.engine.now());
    }

    pub fn on_tab_removed(&self, tab_id: TabId) {
        self.lifecycle.forget(tab_id);
        self.engine.forget_tab(tab_id);
    }

    /// Created and updated groups are handled alike
    pub async fn on_group_changed(&self, group: &NativeGroup) {
        if let Err(e) = self.engine.on_group_changed(group).await {
            warn!("Failed to record group {}: {}", group.id, e);
        }
    }

    pub async fn on_group_removed(&self, group_id: NativeGroupId) {
        if let Err(e) = self.engine.on_group_removed(group_id).await {
            warn!("Failed to unlink group {}: {}", group_id, e);
        }
    }

    /// Storage change notification. A missing side means the record did not
    /// exist (old) or was cleared (new).
    pub async fn on_storage_changed(&self, old: Option<StorageData>, new: Option<StorageData>) -> BulkReport {
        let old = old.unwrap_or_default();
        let new = new.unwrap_or_default();
        self.engine.on_config_changed(&old, new).await
    }

    pub async fn tick(&self) -> SweepReport {
        let report = self.lifecycle.sweep().await;
        refresh_pinned_groups(self.engine()).await;
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::NoClassifier;
    use crate::operations::{DefinitionInput, create_or_update_group_definition, set_feature_enabled};
    use crate::settings::IdleThreshold;
    use crate::tab_data::{GroupColor, PinnedGroup, SavedTab, TAB_GROUP_ID_NONE};
    use crate::testing::{FakePlatform, MemoryStore, definition, grouping_enabled_with};
    use futures::future::join_all;
    use std::cell::Cell;

    type TestBackground = Background<FakePlatform, MemoryStore, NoClassifier>;

    fn background(data: StorageData, now: Rc<Cell<f64>>) -> TestBackground {
        let engine = GroupingEngine::new(
            FakePlatform::new(),
            MemoryStore::with(data),
            NoClassifier,
            Rc::new(move || now.get()),
        );
        Background::new(engine)
    }

    fn platform(background: &TestBackground) -> &FakePlatform {
        background.engine().platform()
    }

    fn store(background: &TestBackground) -> &MemoryStore {
        background.engine().store()
    }

    /// Delivers the change notification for everything written since `old`
    async fn notify_since(background: &TestBackground, old: StorageData) -> BulkReport {
        let new = store(background).snapshot();
        background.on_storage_changed(Some(old), Some(new)).await
    }

    #[tokio::test]
    async fn test_two_github_tabs_share_one_dev_group() {
        let data = grouping_enabled_with(vec![definition("1", "Dev", GroupColor::Blue, &["github"], 0.0)]);
        let background = background(data, Rc::new(Cell::new(0.0)));
        background.start().await;

        let first = platform(&background).add_tab(1, "https://github.com/rust-lang");
        let second = platform(&background).add_tab(2, "https://gist.github.com/x");
        join_all([background.on_tab_created(&first), background.on_tab_created(&second)]).await;

        let groups = platform(&background).groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].title, "Dev");
        assert_eq!(platform(&background).tab(1).unwrap().group_id, groups[0].id);
        assert_eq!(platform(&background).tab(2).unwrap().group_id, groups[0].id);
    }

    #[tokio::test]
    async fn test_startup_reconciles_existing_groups() {
        let mut dev = definition("dev", "Dev", GroupColor::Blue, &["github"], 0.0);
        dev.native_group_id = Some(3);
        let background = background(grouping_enabled_with(vec![dev]), Rc::new(Cell::new(0.0)));
        platform(&background).add_tab(1, "https://github.com/a");
        let live = platform(&background).add_group("Dev", GroupColor::Blue, &[1]);

        background.start().await;

        assert_eq!(background.engine().native_group_of("dev"), Some(live));
        assert_eq!(store(&background).snapshot().definition("dev").unwrap().native_group_id, Some(live));
        platform(&background).clear_mutations();
        let tab = platform(&background).tab(1).unwrap();
        assert!(matches!(background.on_tab_created(&tab).await, GroupOutcome::Skipped(_)));
        assert!(platform(&background).mutations().is_empty());
    }

    #[tokio::test]
    async fn test_startup_restores_pinned_group_without_grouping_it() {
        let mut data = grouping_enabled_with(vec![definition("mail", "Mail", GroupColor::Red, &["mail"], 0.0)]);
        data.pinned_groups.insert(
            "8".to_string(),
            PinnedGroup {
                title: "Inbox".to_string(),
                color: GroupColor::Yellow,
                tabs: vec![SavedTab { url: "https://mail.example.com".to_string(), title: "Mail".to_string() }],
            },
        );
        let background = background(data, Rc::new(Cell::new(0.0)));

        background.start().await;

        let groups = platform(&background).groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].title, "Inbox");
        assert!(background.engine().snapshot().is_pinned_group(groups[0].id));

        // The restored tab matches "mail" but belongs to the pinned group
        let report = background.tick().await;
        assert_eq!(report.grouped, 0);
        assert_eq!(platform(&background).groups().len(), 1);
    }

    #[tokio::test]
    async fn test_popup_pattern_edit_regroups() {
        let data = grouping_enabled_with(vec![definition("dev", "Dev", GroupColor::Blue, &["github"], 0.0)]);
        let background = background(data, Rc::new(Cell::new(0.0)));
        background.start().await;
        let github = platform(&background).add_tab(1, "https://github.com/a");
        let gitlab = platform(&background).add_tab(2, "https://gitlab.com/b");
        background.on_tab_created(&github).await;
        background.on_tab_created(&gitlab).await;

        let old = store(&background).snapshot();
        let input = DefinitionInput {
            id: Some("dev".to_string()),
            display_name: "Dev".to_string(),
            color: GroupColor::Blue,
            patterns: vec!["gitlab".to_string()],
        };
        create_or_update_group_definition(store(&background), input, 0.0).await.unwrap();
        let report = notify_since(&background, old).await;

        assert_eq!(report.ungrouped, 1);
        assert_eq!(report.regrouped, 1);
        assert_eq!(platform(&background).tab(1).unwrap().group_id, TAB_GROUP_ID_NONE);
        assert_eq!(platform(&background).group_of(2).unwrap().title, "Dev");
    }

    #[tokio::test]
    async fn test_closed_group_keeps_definition() {
        let data = grouping_enabled_with(vec![definition("dev", "Dev", GroupColor::Blue, &["github"], 0.0)]);
        let background = background(data, Rc::new(Cell::new(0.0)));
        background.start().await;
        let tab = platform(&background).add_tab(1, "https://github.com/a");
        background.on_tab_created(&tab).await;
        let group = platform(&background).tab(1).unwrap().group_id;

        platform(&background).close_group_externally(group);
        background.on_tab_removed(1);
        background.on_group_removed(group).await;

        let kept = store(&background).snapshot().definition("dev").cloned().unwrap();
        assert_eq!(kept.native_group_id, None);
        assert_eq!(kept.patterns, vec!["github".to_string()]);

        let tab = platform(&background).add_tab(2, "https://github.com/b");
        assert!(matches!(
            background.on_tab_created(&tab).await,
            GroupOutcome::Assigned { created: true, .. }
        ));
    }

    #[tokio::test]
    async fn test_navigation_moves_tab_between_groups() {
        let data = grouping_enabled_with(vec![
            definition("dev", "Dev", GroupColor::Blue, &["github"], 0.0),
            definition("docs", "Docs", GroupColor::Green, &["docs.rs"], 1.0),
        ]);
        let background = background(data, Rc::new(Cell::new(0.0)));
        background.start().await;
        let tab = platform(&background).add_tab(1, "https://github.com/a");
        background.on_tab_created(&tab).await;

        let mut navigated = platform(&background).tab(1).unwrap();
        navigated.url = "https://docs.rs/serde".to_string();
        platform(&background).put_tab(navigated);
        background.on_tab_updated(1, true).await;

        assert_eq!(platform(&background).group_of(1).unwrap().title, "Docs");
        assert_eq!(background.engine().assignment(1).as_deref(), Some("docs"));
    }

    #[tokio::test]
    async fn test_tick_closes_idle_tab_after_threshold() {
        let now = Rc::new(Cell::new(1_000_000.0));
        let mut data = StorageData::new();
        data.settings.auto_close_enabled = true;
        data.settings.auto_close_time = IdleThreshold::new(1, 0);
        let background = background(data, now.clone());
        background.start().await;

        platform(&background).add_tab(1, "https://example.com/old");
        platform(&background).add_tab(2, "https://example.com/recent");
        background.on_tab_activated(1);
        now.set(now.get() + 2_000.0);
        background.on_tab_activated(2);

        now.set(1_000_000.0 + 61_000.0);
        let report = background.tick().await;

        assert_eq!(report.closed, vec![1]);
        assert!(platform(&background).tab(2).is_some());
    }

    #[tokio::test]
    async fn test_disable_from_popup_ungroups() {
        let data = grouping_enabled_with(vec![definition("dev", "Dev", GroupColor::Blue, &["github"], 0.0)]);
        let background = background(data, Rc::new(Cell::new(0.0)));
        background.start().await;
        let tab = platform(&background).add_tab(1, "https://github.com/a");
        background.on_tab_created(&tab).await;

        let old = store(&background).snapshot();
        set_feature_enabled(store(&background), "auto-group", false).await.unwrap();
        let report = notify_since(&background, old).await;

        assert_eq!(report.ungrouped, 1);
        assert!(platform(&background).groups().is_empty());
        assert!(matches!(
            background.on_tab_updated(1, false).await,
            GroupOutcome::Skipped(_)
        ));
    }

    #[tokio::test]
    async fn test_user_group_gets_a_definition() {
        let background = background(grouping_enabled_with(Vec::new()), Rc::new(Cell::new(5.0)));
        background.start().await;
        platform(&background).add_tab(1, "https://example.com");
        let id = platform(&background).add_group("Reading", GroupColor::Pink, &[1]);

        background.on_group_changed(&platform(&background).group(id).unwrap()).await;

        let stored = store(&background).snapshot();
        let synthesized = stored.definition_by_native(id).unwrap();
        assert_eq!(synthesized.display_name, "Reading");
        assert_eq!(synthesized.created_at, 5.0);
    }
}
