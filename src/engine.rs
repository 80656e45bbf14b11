/// Grouping decision engine.
///
/// One grouping attempt walks a tab through Skip, Evaluate, ResolveNative,
/// Assign and Persist while holding the [`GroupingLock`]. Platform failures
/// abandon the attempt for that tab only; the next trigger tries again.
///
/// The engine also owns the bulk regroup path taken when group definitions
/// change in storage, and the handlers that keep the native group registry
/// in step with groups the user creates, edits or closes.

use crate::classifier::{Classifier, Verdict, is_classifiable};
use crate::error::{GroupingError, PlatformError};
use crate::lock::{GroupingGuard, GroupingLock};
use crate::pattern::matches_any;
use crate::platform::{Clock, TabPlatform};
use crate::registry::{Claim, NativeGroupRegistry, ReconcileReport, claim_or_synthesize, reconcile_with_live};
use crate::settings::Settings;
use crate::storage::{StorageData, Store, modify};
use crate::tab_data::{GroupDefinition, NativeGroup, NativeGroupId, TabId, TabInfo};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Disabled,
    PinnedTab,
    PinnedGroup,
    /// In a group the user made by hand and manual access is off
    ManualGroup,
    AlreadyGrouped,
    CreationInFlight,
    /// The classifier was not consulted this time; the tab stays put
    ClassifierBusy,
}

#[derive(Debug, Clone, PartialEq)]
pub enum GroupOutcome {
    Skipped(SkipReason),
    Assigned {
        definition_id: String,
        group_id: NativeGroupId,
        created: bool,
    },
    /// Nothing matched any more, so the tab left its auto group
    Ungrouped { definition_id: String },
    Unmatched,
    Failed,
}

/// What a bulk regroup after a definition change did
#[derive(Debug, Default, Clone, PartialEq)]
pub struct BulkReport {
    pub ungrouped: usize,
    pub regrouped: usize,
    pub retitled: usize,
}

enum Resolved {
    Existing(NativeGroupId),
    Adopted(NativeGroupId),
    Created(NativeGroupId),
    InFlight,
}

/// First definition, in evaluation order, with a pattern matching `url`
pub fn first_match<'a>(data: &'a StorageData, url: &str) -> Option<&'a GroupDefinition> {
    data.ordered_definitions()
        .into_iter()
        .find(|definition| matches_any(url, &definition.patterns))
}

fn skip_reason(tab: &TabInfo, config: &StorageData) -> Option<SkipReason> {
    if !config.settings.auto_grouping_enabled {
        Some(SkipReason::Disabled)
    } else if tab.pinned {
        Some(SkipReason::PinnedTab)
    } else if tab.is_grouped() && config.is_pinned_group(tab.group_id) {
        Some(SkipReason::PinnedGroup)
    } else {
        None
    }
}

pub struct GroupingEngine<P, S, C> {
    platform: P,
    store: S,
    classifier: C,
    clock: Clock,
    lock: GroupingLock,
    /// Last-known-good copy of the durable record
    config: RefCell<StorageData>,
    registry: RefCell<NativeGroupRegistry>,
    /// Definition each tab was last put under by this engine
    assignments: RefCell<HashMap<TabId, String>>,
}

impl<P, S, C> GroupingEngine<P, S, C>
where
    P: TabPlatform,
    S: Store,
    C: Classifier,
{
    pub fn new(platform: P, store: S, classifier: C, clock: Clock) -> Self {
        GroupingEngine {
            platform,
            store,
            classifier,
            clock,
            lock: GroupingLock::new(),
            config: RefCell::new(StorageData::new()),
            registry: RefCell::new(NativeGroupRegistry::new()),
            assignments: RefCell::new(HashMap::new()),
        }
    }

    pub fn platform(&self) -> &P {
        &self.platform
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn now(&self) -> f64 {
        (self.clock)()
    }

    pub fn settings(&self) -> Settings {
        self.config.borrow().settings.clone()
    }

    pub fn snapshot(&self) -> StorageData {
        self.config.borrow().clone()
    }

    pub fn native_group_of(&self, definition_id: &str) -> Option<NativeGroupId> {
        self.registry.borrow().native_id(definition_id)
    }

    pub fn assignment(&self, tab_id: TabId) -> Option<String> {
        self.assignments.borrow().get(&tab_id).cloned()
    }

    /// Holds off every grouping attempt until the guard is dropped
    pub async fn exclusive(&self) -> GroupingGuard<'_> {
        self.lock.acquire().await
    }

    /// Refresh the snapshot from storage. On failure the previous snapshot
    /// stays in effect.
    pub async fn load_config(&self) -> bool {
        match self.store.load().await {
            Ok(data) => {
                self.apply_config(data);
                true
            }
            Err(e) => {
                warn!("Keeping last known configuration: {}", e);
                false
            }
        }
    }

    /// Take a newer record without dropping runtime native links
    pub fn apply_config(&self, data: StorageData) {
        self.classifier.configure(&data.settings.classifier);
        self.registry.borrow_mut().sync_definitions(&data);
        *self.config.borrow_mut() = data;
    }

    /// Take a record whose native ids were just reconciled against the platform
    pub fn replace_config(&self, data: StorageData) {
        self.classifier.configure(&data.settings.classifier);
        *self.registry.borrow_mut() = NativeGroupRegistry::rebuild(&data);
        *self.config.borrow_mut() = data;
    }

    pub fn forget_tab(&self, tab_id: TabId) {
        self.assignments.borrow_mut().remove(&tab_id);
    }

    /// Run one full grouping attempt for `tab_id`. Never fails: errors are
    /// logged and reported as [`GroupOutcome::Failed`].
    pub async fn group_tab(&self, tab_id: TabId) -> GroupOutcome {
        let _guard = self.lock.acquire().await;

        match self.attempt(tab_id).await {
            Ok(outcome) => {
                debug!("Grouping tab {}: {:?}", tab_id, outcome);
                outcome
            }
            Err(e) => {
                warn!("Grouping tab {} abandoned: {}", tab_id, e);
                GroupOutcome::Failed
            }
        }
    }

    async fn attempt(&self, tab_id: TabId) -> Result<GroupOutcome, GroupingError> {
        let tab = self.platform.get_tab(tab_id).await?;
        let config = self.snapshot();

        if let Some(reason) = skip_reason(&tab, &config) {
            return Ok(GroupOutcome::Skipped(reason));
        }

        let current = if tab.is_grouped() {
            self.backing_definition(&config, tab.group_id)
        } else {
            None
        };
        let in_auto_group = current.as_ref().is_some_and(GroupDefinition::is_auto_managed);
        if tab.is_grouped() && !in_auto_group && !config.settings.allow_manual_group_access {
            return Ok(GroupOutcome::Skipped(SkipReason::ManualGroup));
        }

        let selected = match first_match(&config, &tab.url) {
            Some(definition) => Some(definition.clone()),
            None if self.keeps_assignment(&tab) => {
                return Ok(GroupOutcome::Skipped(SkipReason::AlreadyGrouped));
            }
            None => match self.classify(&tab, &config).await {
                Verdict::Match(definition) => Some(definition),
                Verdict::NoMatch => None,
                Verdict::NotConsulted => return Ok(GroupOutcome::Skipped(SkipReason::ClassifierBusy)),
            },
        };

        let Some(definition) = selected else {
            return self.release(&tab, current.filter(GroupDefinition::is_auto_managed)).await;
        };

        if self.native_group_of(&definition.id) == Some(tab.group_id) {
            self.assignments.borrow_mut().insert(tab.id, definition.id.clone());
            return Ok(GroupOutcome::Skipped(SkipReason::AlreadyGrouped));
        }

        let (group_id, created) = match self.resolve_native(&definition, &tab).await? {
            Resolved::InFlight => return Ok(GroupOutcome::Skipped(SkipReason::CreationInFlight)),
            // The new group already holds the tab
            Resolved::Created(id) => (id, true),
            Resolved::Existing(id) | Resolved::Adopted(id) => {
                self.assign(&tab, id).await?;
                (id, false)
            }
        };

        self.persist(&definition.id, group_id).await;
        self.assignments.borrow_mut().insert(tab.id, definition.id.clone());

        Ok(GroupOutcome::Assigned {
            definition_id: definition.id,
            group_id,
            created,
        })
    }

    fn backing_definition(&self, config: &StorageData, group_id: NativeGroupId) -> Option<GroupDefinition> {
        let known = self.registry.borrow().definition_for(group_id);
        known
            .and_then(|id| config.definition(&id).cloned())
            .or_else(|| config.definition_by_native(group_id).cloned())
    }

    /// A tab we placed earlier (possibly on the classifier's word) is still
    /// in that definition's group
    fn keeps_assignment(&self, tab: &TabInfo) -> bool {
        let assigned = self.assignments.borrow().get(&tab.id).cloned();
        tab.is_grouped()
            && assigned.is_some_and(|id| self.native_group_of(&id) == Some(tab.group_id))
    }

    async fn classify(&self, tab: &TabInfo, config: &StorageData) -> Verdict<GroupDefinition> {
        if !self.classifier.is_enabled() || !is_classifiable(tab) {
            return Verdict::NoMatch;
        }

        let definitions = config.ordered_definitions();
        if definitions.is_empty() {
            return Verdict::NoMatch;
        }
        let candidates: Vec<String> = definitions.iter().map(|d| d.display_name.clone()).collect();

        self.classifier
            .classify(&tab.title, &candidates)
            .await
            .and_then(|answer| {
                let chosen = definitions.iter().find(|d| d.display_name == answer).map(|d| (*d).clone());
                if chosen.is_none() {
                    debug!("Classifier suggested unknown group {:?} for tab {}", answer, tab.id);
                }
                Verdict::from(chosen)
            })
    }

    async fn release(&self, tab: &TabInfo, current: Option<GroupDefinition>) -> Result<GroupOutcome, GroupingError> {
        let Some(definition) = current else {
            return Ok(GroupOutcome::Unmatched);
        };

        self.platform.ungroup(&[tab.id]).await?;
        self.forget_tab(tab.id);
        info!("Tab {} no longer matches {:?}, ungrouped", tab.id, definition.display_name);

        Ok(GroupOutcome::Ungrouped {
            definition_id: definition.id,
        })
    }

    async fn resolve_native(&self, definition: &GroupDefinition, tab: &TabInfo) -> Result<Resolved, GroupingError> {
        let cached = self.native_group_of(&definition.id);
        let live = self.platform.query_groups().await?;

        if let Some(id) = cached {
            if live.iter().any(|group| group.id == id) {
                return Ok(Resolved::Existing(id));
            }
            debug!("Cached group {} for {:?} is gone", id, definition.display_name);
            self.registry.borrow_mut().clear_native(id);
        }

        let claimed = self.registry.borrow().claimed_ids();
        let mut candidates = live
            .iter()
            .filter(|group| !claimed.contains(&group.id) && group.matches(definition));

        if let Some(found) = candidates.next() {
            if candidates.next().is_some() {
                warn!(
                    "Several live groups look like {:?}; adopting {} and leaving the rest alone",
                    definition.display_name, found.id
                );
            }
            self.registry.borrow_mut().record(&definition.id, found.id, &definition.patterns);
            return Ok(Resolved::Adopted(found.id));
        }

        if !self.registry.borrow_mut().begin_creation(&definition.id) {
            warn!("Group for {:?} is already being created", definition.display_name);
            return Ok(Resolved::InFlight);
        }

        let created = self.platform.create_group(&[tab.id]).await;
        if let Ok(id) = created {
            self.registry.borrow_mut().record(&definition.id, id, &definition.patterns);
        }
        self.registry.borrow_mut().end_creation(&definition.id);
        let id = created?;

        if let Err(e) = self
            .platform
            .update_group(id, &definition.display_name, definition.color)
            .await
        {
            warn!("Failed to title new group {}: {}", id, e);
        }
        info!("Created group {} for {:?}", id, definition.display_name);

        Ok(Resolved::Created(id))
    }

    async fn assign(&self, tab: &TabInfo, group_id: NativeGroupId) -> Result<(), GroupingError> {
        if let Err(e) = self.platform.move_to_group(&[tab.id], group_id).await {
            if matches!(e, PlatformError::GroupGone(_)) {
                self.registry.borrow_mut().clear_native(group_id);
            }
            return Err(e.into());
        }
        Ok(())
    }

    /// Write the native id back, only when it differs from the snapshot
    async fn persist(&self, definition_id: &str, group_id: NativeGroupId) {
        let stored = self
            .config
            .borrow()
            .definition(definition_id)
            .and_then(|d| d.native_group_id);
        if stored == Some(group_id) {
            return;
        }

        match modify(&self.store, |data| data.set_native_group(definition_id, Some(group_id))).await {
            Ok((written, _)) => self.apply_config(written),
            Err(e) => warn!("Failed to record group {} for {}: {}", group_id, definition_id, e),
        }
    }

    /// Startup pass: match live groups to definitions and persist the result
    pub async fn reconcile(&self) -> Result<ReconcileReport, GroupingError> {
        let _guard = self.lock.acquire().await;

        let live = self.platform.query_groups().await?;
        let now = self.now();
        let (written, report) = modify(&self.store, |data| reconcile_with_live(data, &live, now)).await?;
        self.replace_config(written);

        Ok(report)
    }

    /// A native group was closed. The definition stays, unlinked.
    pub async fn on_group_removed(&self, group_id: NativeGroupId) -> Result<(), GroupingError> {
        let _guard = self.lock.acquire().await;

        let known = self.registry.borrow_mut().clear_native(group_id);
        let stored = self.config.borrow().definition_by_native(group_id).map(|d| d.id.clone());
        let Some(definition_id) = stored.or(known) else {
            return Ok(());
        };

        let (written, _) = modify(&self.store, |data| {
            let linked = data.definition_by_native(group_id).map(|d| d.id.clone());
            linked.is_some_and(|id| data.set_native_group(&id, None))
        })
        .await?;
        self.apply_config(written);
        info!("Group {} closed; definition {} kept", group_id, definition_id);

        Ok(())
    }

    /// A native group appeared or was retitled/recolored outside the engine
    pub async fn on_group_changed(&self, group: &NativeGroup) -> Result<Option<Claim>, GroupingError> {
        if group.title.is_empty() {
            // Freshly created groups report an empty title until named
            debug!("Ignoring untitled group {}", group.id);
            return Ok(None);
        }

        let _guard = self.lock.acquire().await;

        let known = self.registry.borrow().definition_for(group.id);
        if let Some(definition_id) = known {
            let unchanged = self
                .config
                .borrow()
                .definition(&definition_id)
                .is_none_or(|d| group.matches(d));
            if !unchanged {
                let (written, _) = modify(&self.store, |data| {
                    data.set_appearance(&definition_id, &group.title, group.color)
                })
                .await?;
                self.apply_config(written);
            }
            return Ok(Some(Claim::Known(definition_id)));
        }

        let now = self.now();
        let (written, claim) = modify(&self.store, |data| claim_or_synthesize(data, group, now)).await?;
        if let Some(definition) = written.definition(claim.definition_id()) {
            self.registry
                .borrow_mut()
                .record(&definition.id, group.id, &definition.patterns);
        }
        self.apply_config(written);
        debug!("Group {} claimed: {:?}", group.id, claim);

        Ok(Some(claim))
    }

    /// Bulk regroup after the durable record changed underneath us.
    ///
    /// Removed definitions lose their tabs, renamed ones retitle their live
    /// group, and definitions with new patterns release tabs that no longer
    /// match. Ungrouped tabs that now match something are then grouped one
    /// at a time through [`group_tab`](Self::group_tab).
    pub async fn on_config_changed(&self, old: &StorageData, new: StorageData) -> BulkReport {
        let mut report = BulkReport::default();
        let was_enabled = old.settings.auto_grouping_enabled;
        let enabled = new.settings.auto_grouping_enabled;

        let removed: Vec<(String, Option<NativeGroupId>)> = old
            .ordered_definitions()
            .into_iter()
            .filter(|d| new.definition(&d.id).is_none())
            .map(|d| (d.id.clone(), self.native_group_of(&d.id).or(d.native_group_id)))
            .collect();
        let reshaped: Vec<String> = new
            .ordered_definitions()
            .into_iter()
            .filter(|d| old.definition(&d.id).is_none_or(|o| o.patterns != d.patterns))
            .map(|d| d.id.clone())
            .collect();
        let restyled: Vec<GroupDefinition> = new
            .ordered_definitions()
            .into_iter()
            .filter(|d| {
                old.definition(&d.id)
                    .is_some_and(|o| o.display_name != d.display_name || o.color != d.color)
            })
            .cloned()
            .collect();

        self.apply_config(new);
        let config = self.snapshot();

        {
            let _guard = self.lock.acquire().await;

            for (definition_id, group_id) in &removed {
                self.registry.borrow_mut().forget(definition_id);
                if let Some(group_id) = group_id {
                    report.ungrouped += self.ungroup_members(*group_id, |_| true).await;
                }
            }

            if was_enabled && !enabled {
                report.ungrouped += self.ungroup_auto_groups(&config).await;
            }

            report.retitled = self.restyle(&restyled).await;

            if enabled {
                for definition_id in &reshaped {
                    let Some(definition) = config.definition(definition_id) else {
                        continue;
                    };
                    if let Some(group_id) = self.native_group_of(definition_id) {
                        report.ungrouped += self
                            .ungroup_members(group_id, |tab| !matches_any(&tab.url, &definition.patterns))
                            .await;
                    }
                }
            }
        }

        let touched = !removed.is_empty() || !reshaped.is_empty() || !was_enabled;
        if enabled && touched {
            for tab_id in self.regroup_candidates(&config).await {
                if matches!(self.group_tab(tab_id).await, GroupOutcome::Assigned { .. }) {
                    report.regrouped += 1;
                }
            }
        }

        if report != BulkReport::default() {
            info!(
                "Definitions changed: {} ungrouped, {} regrouped, {} retitled",
                report.ungrouped, report.regrouped, report.retitled
            );
        }
        report
    }

    async fn ungroup_members(&self, group_id: NativeGroupId, release: impl Fn(&TabInfo) -> bool) -> usize {
        let members = match self.platform.tabs_in_group(group_id).await {
            Ok(members) => members,
            Err(e) => {
                warn!("Failed to list tabs of group {}: {}", group_id, e);
                return 0;
            }
        };

        let tab_ids: Vec<TabId> = members.iter().filter(|tab| release(*tab)).map(|tab| tab.id).collect();
        if tab_ids.is_empty() {
            return 0;
        }

        match self.platform.ungroup(&tab_ids).await {
            Ok(()) => {
                let mut assignments = self.assignments.borrow_mut();
                for tab_id in &tab_ids {
                    assignments.remove(tab_id);
                }
                tab_ids.len()
            }
            Err(e) => {
                warn!("Failed to ungroup tabs of group {}: {}", group_id, e);
                0
            }
        }
    }

    async fn ungroup_auto_groups(&self, config: &StorageData) -> usize {
        let mut ungrouped = 0;
        for definition in config.ordered_definitions() {
            if !definition.is_auto_managed() {
                continue;
            }
            if let Some(group_id) = self.native_group_of(&definition.id) {
                ungrouped += self.ungroup_members(group_id, |_| true).await;
            }
        }
        ungrouped
    }

    async fn restyle(&self, definitions: &[GroupDefinition]) -> usize {
        if definitions.is_empty() {
            return 0;
        }
        let live = match self.platform.query_groups().await {
            Ok(live) => live,
            Err(e) => {
                warn!("Failed to query groups for retitling: {}", e);
                return 0;
            }
        };

        let mut retitled = 0;
        for definition in definitions {
            let Some(group_id) = self.native_group_of(&definition.id) else {
                continue;
            };
            let stale = live
                .iter()
                .any(|group| group.id == group_id && !group.matches(definition));
            if !stale {
                continue;
            }
            match self
                .platform
                .update_group(group_id, &definition.display_name, definition.color)
                .await
            {
                Ok(()) => retitled += 1,
                Err(e) => warn!("Failed to retitle group {}: {}", group_id, e),
            }
        }
        retitled
    }

    async fn regroup_candidates(&self, config: &StorageData) -> Vec<TabId> {
        match self.platform.query_tabs().await {
            Ok(tabs) => tabs
                .into_iter()
                .filter(|tab| !tab.is_grouped() && !tab.pinned && first_match(config, &tab.url).is_some())
                .map(|tab| tab.id)
                .collect(),
            Err(e) => {
                warn!("Failed to list tabs for regrouping: {}", e);
                Vec::new()
            }
        }
    }
}
