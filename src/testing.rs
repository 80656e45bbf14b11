/// In-memory stand-ins for the browser, used by unit tests.

use crate::classifier::{Classifier, Verdict};
use crate::error::{PlatformError, StorageError};
use crate::platform::{Clock, TabPlatform};
use crate::storage::{StorageData, Store};
use crate::tab_data::{GroupColor, GroupDefinition, NativeGroup, NativeGroupId, TabId, TabInfo, TAB_GROUP_ID_NONE};
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;
use tokio::task::yield_now;

/// Every state-changing platform call, in the order it was issued
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    CreateGroup(Vec<TabId>, NativeGroupId),
    UpdateGroup(NativeGroupId, String, GroupColor),
    Move(Vec<TabId>, NativeGroupId),
    Ungroup(Vec<TabId>),
    Discard(TabId),
    Close(TabId),
    CreateTab(TabId),
    MoveTab(TabId, i32),
}

#[derive(Debug, Default)]
struct FakeState {
    tabs: BTreeMap<TabId, TabInfo>,
    groups: BTreeMap<NativeGroupId, NativeGroup>,
    next_group_id: NativeGroupId,
    next_tab_id: TabId,
    mutations: Vec<Mutation>,
}

impl FakeState {
    /// The browser drops a group as soon as its last tab leaves
    fn prune_empty_groups(&mut self) {
        let tabs = &self.tabs;
        self.groups
            .retain(|id, _| tabs.values().any(|tab| tab.group_id == *id));
    }

    fn require_tabs(&self, tab_ids: &[TabId]) -> Result<(), PlatformError> {
        match tab_ids.iter().find(|id| !self.tabs.contains_key(*id)) {
            Some(missing) => Err(PlatformError::TabGone(*missing)),
            None => Ok(()),
        }
    }
}

/// Fake tab/group platform. Every call yields first, so concurrently
/// running grouping attempts interleave the way browser callbacks do.
#[derive(Debug)]
pub struct FakePlatform {
    state: RefCell<FakeState>,
}

impl Default for FakePlatform {
    fn default() -> Self {
        FakePlatform {
            state: RefCell::new(FakeState {
                next_group_id: 100,
                next_tab_id: 1000,
                ..FakeState::default()
            }),
        }
    }
}

impl FakePlatform {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_tab(&self, id: TabId, url: &str) -> TabInfo {
        let tab = TabInfo::new(id, url.to_string(), format!("Tab {}", id));
        self.put_tab(tab.clone());
        tab
    }

    pub fn put_tab(&self, tab: TabInfo) {
        self.state.borrow_mut().tabs.insert(tab.id, tab);
    }

    /// A group the user made by hand, holding `tab_ids`
    pub fn add_group(&self, title: &str, color: GroupColor, tab_ids: &[TabId]) -> NativeGroupId {
        let mut state = self.state.borrow_mut();
        let id = state.next_group_id;
        state.next_group_id += 1;
        state.groups.insert(id, NativeGroup { id, title: title.to_string(), color });
        for tab_id in tab_ids {
            if let Some(tab) = state.tabs.get_mut(tab_id) {
                tab.group_id = id;
            }
        }
        id
    }

    /// The user closes a group from the tab strip: its tabs go with it
    pub fn close_group_externally(&self, group_id: NativeGroupId) {
        let mut state = self.state.borrow_mut();
        state.tabs.retain(|_, tab| tab.group_id != group_id);
        state.groups.remove(&group_id);
    }

    pub fn tab(&self, id: TabId) -> Option<TabInfo> {
        self.state.borrow().tabs.get(&id).cloned()
    }

    pub fn group(&self, id: NativeGroupId) -> Option<NativeGroup> {
        self.state.borrow().groups.get(&id).cloned()
    }

    pub fn groups(&self) -> Vec<NativeGroup> {
        self.state.borrow().groups.values().cloned().collect()
    }

    /// The group currently holding `tab_id`
    pub fn group_of(&self, tab_id: TabId) -> Option<NativeGroup> {
        let group_id = self.tab(tab_id)?.group_id;
        self.group(group_id)
    }

    pub fn mutations(&self) -> Vec<Mutation> {
        self.state.borrow().mutations.clone()
    }

    pub fn clear_mutations(&self) {
        self.state.borrow_mut().mutations.clear();
    }

    pub fn created_groups(&self) -> usize {
        self.mutations()
            .iter()
            .filter(|m| matches!(m, Mutation::CreateGroup(..)))
            .count()
    }
}

impl TabPlatform for FakePlatform {
    async fn query_tabs(&self) -> Result<Vec<TabInfo>, PlatformError> {
        yield_now().await;
        Ok(self.state.borrow().tabs.values().cloned().collect())
    }

    async fn get_tab(&self, tab_id: TabId) -> Result<TabInfo, PlatformError> {
        yield_now().await;
        self.tab(tab_id).ok_or(PlatformError::TabGone(tab_id))
    }

    async fn query_groups(&self) -> Result<Vec<NativeGroup>, PlatformError> {
        yield_now().await;
        Ok(self.groups())
    }

    async fn create_group(&self, tab_ids: &[TabId]) -> Result<NativeGroupId, PlatformError> {
        yield_now().await;
        let mut state = self.state.borrow_mut();
        state.require_tabs(tab_ids)?;
        let id = state.next_group_id;
        state.next_group_id += 1;
        state.groups.insert(id, NativeGroup { id, title: String::new(), color: GroupColor::Grey });
        for tab_id in tab_ids {
            if let Some(tab) = state.tabs.get_mut(tab_id) {
                tab.group_id = id;
            }
        }
        state.prune_empty_groups();
        state.mutations.push(Mutation::CreateGroup(tab_ids.to_vec(), id));
        Ok(id)
    }

    async fn update_group(&self, group_id: NativeGroupId, title: &str, color: GroupColor) -> Result<(), PlatformError> {
        yield_now().await;
        let mut state = self.state.borrow_mut();
        let group = state.groups.get_mut(&group_id).ok_or(PlatformError::GroupGone(group_id))?;
        group.title = title.to_string();
        group.color = color;
        state.mutations.push(Mutation::UpdateGroup(group_id, title.to_string(), color));
        Ok(())
    }

    async fn move_to_group(&self, tab_ids: &[TabId], group_id: NativeGroupId) -> Result<(), PlatformError> {
        yield_now().await;
        let mut state = self.state.borrow_mut();
        state.require_tabs(tab_ids)?;
        if !state.groups.contains_key(&group_id) {
            return Err(PlatformError::GroupGone(group_id));
        }
        for tab_id in tab_ids {
            if let Some(tab) = state.tabs.get_mut(tab_id) {
                tab.group_id = group_id;
            }
        }
        state.prune_empty_groups();
        state.mutations.push(Mutation::Move(tab_ids.to_vec(), group_id));
        Ok(())
    }

    async fn ungroup(&self, tab_ids: &[TabId]) -> Result<(), PlatformError> {
        yield_now().await;
        let mut state = self.state.borrow_mut();
        state.require_tabs(tab_ids)?;
        for tab_id in tab_ids {
            if let Some(tab) = state.tabs.get_mut(tab_id) {
                tab.group_id = TAB_GROUP_ID_NONE;
            }
        }
        state.prune_empty_groups();
        state.mutations.push(Mutation::Ungroup(tab_ids.to_vec()));
        Ok(())
    }

    async fn discard_tab(&self, tab_id: TabId) -> Result<(), PlatformError> {
        yield_now().await;
        let mut state = self.state.borrow_mut();
        let tab = state.tabs.get_mut(&tab_id).ok_or(PlatformError::TabGone(tab_id))?;
        tab.discarded = true;
        state.mutations.push(Mutation::Discard(tab_id));
        Ok(())
    }

    async fn close_tab(&self, tab_id: TabId) -> Result<(), PlatformError> {
        yield_now().await;
        let mut state = self.state.borrow_mut();
        state.tabs.remove(&tab_id).ok_or(PlatformError::TabGone(tab_id))?;
        state.prune_empty_groups();
        state.mutations.push(Mutation::Close(tab_id));
        Ok(())
    }

    async fn create_tab(&self, url: &str) -> Result<TabInfo, PlatformError> {
        yield_now().await;
        let mut state = self.state.borrow_mut();
        let id = state.next_tab_id;
        state.next_tab_id += 1;
        let tab = TabInfo::new(id, url.to_string(), String::new());
        state.tabs.insert(id, tab.clone());
        state.mutations.push(Mutation::CreateTab(id));
        Ok(tab)
    }

    async fn move_tab(&self, tab_id: TabId, index: i32) -> Result<(), PlatformError> {
        yield_now().await;
        let mut state = self.state.borrow_mut();
        let tab = state.tabs.get_mut(&tab_id).ok_or(PlatformError::TabGone(tab_id))?;
        tab.index = index;
        state.mutations.push(Mutation::MoveTab(tab_id, index));
        Ok(())
    }
}

/// chrome.storage.local stand-in
#[derive(Debug, Default)]
pub struct MemoryStore {
    data: RefCell<StorageData>,
    fail_reads: Cell<bool>,
    fail_writes: Cell<bool>,
    saves: Cell<usize>,
}

impl MemoryStore {
    pub fn with(data: StorageData) -> Self {
        MemoryStore { data: RefCell::new(data), ..MemoryStore::default() }
    }

    pub fn snapshot(&self) -> StorageData {
        self.data.borrow().clone()
    }

    /// Simulates another context (the popup) writing the record
    pub fn replace(&self, data: StorageData) {
        *self.data.borrow_mut() = data;
    }

    pub fn fail_reads(&self, fail: bool) {
        self.fail_reads.set(fail);
    }

    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.set(fail);
    }

    pub fn saves(&self) -> usize {
        self.saves.get()
    }
}

impl Store for MemoryStore {
    async fn load(&self) -> Result<StorageData, StorageError> {
        yield_now().await;
        if self.fail_reads.get() {
            return Err(StorageError::Read("quota exceeded".to_string()));
        }
        Ok(self.snapshot())
    }

    async fn save(&self, data: &StorageData) -> Result<(), StorageError> {
        yield_now().await;
        if self.fail_writes.get() {
            return Err(StorageError::Write("quota exceeded".to_string()));
        }
        self.replace(data.clone());
        self.saves.set(self.saves.get() + 1);
        Ok(())
    }
}

/// Answers whatever it was last told to
#[derive(Debug)]
pub struct ScriptedClassifier {
    verdict: RefCell<Verdict<String>>,
    pub calls: Cell<usize>,
}

impl ScriptedClassifier {
    pub fn answering(answer: &str) -> Self {
        ScriptedClassifier {
            verdict: RefCell::new(Verdict::Match(answer.to_string())),
            calls: Cell::new(0),
        }
    }

    pub fn set_verdict(&self, verdict: Verdict<String>) {
        *self.verdict.borrow_mut() = verdict;
    }
}

impl Classifier for ScriptedClassifier {
    fn is_enabled(&self) -> bool {
        true
    }

    async fn classify(&self, _title: &str, _candidates: &[String]) -> Verdict<String> {
        yield_now().await;
        self.calls.set(self.calls.get() + 1);
        // Not vetted against the candidates; the engine must do that
        self.verdict.borrow().clone()
    }
}

pub fn fixed_clock(now: f64) -> Clock {
    Rc::new(move || now)
}

pub fn definition(id: &str, name: &str, color: GroupColor, patterns: &[&str], created_at: f64) -> GroupDefinition {
    GroupDefinition {
        id: id.to_string(),
        display_name: name.to_string(),
        color,
        patterns: patterns.iter().map(|p| p.to_string()).collect(),
        native_group_id: None,
        created_at,
    }
}

/// A record with auto-grouping on and the given definitions
pub fn grouping_enabled_with(definitions: Vec<GroupDefinition>) -> StorageData {
    let mut data = StorageData::new();
    data.settings.auto_grouping_enabled = true;
    for definition in definitions {
        data.upsert_definition(definition);
    }
    data
}
