/// Storage serialization utilities for chrome.storage.local

use crate::error::StorageError;
use crate::settings::Settings;
use crate::tab_data::{GroupColor, GroupDefinition, NativeGroupId, PinnedGroup};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Key of the single durable record
pub const STORAGE_KEY: &str = "tab_organizer_data";

/// Root storage structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct StorageData {
    pub settings: Settings,
    /// Group definitions keyed by their stable id
    pub tab_groups: BTreeMap<String, GroupDefinition>,
    /// Pinned groups keyed by the native group id they had when pinned
    pub pinned_groups: BTreeMap<String, PinnedGroup>,
}

impl StorageData {
    pub fn new() -> Self {
        Self::default()
    }

    /// Definitions in evaluation order: creation time, then id
    pub fn ordered_definitions(&self) -> Vec<&GroupDefinition> {
        let mut definitions: Vec<&GroupDefinition> = self.tab_groups.values().collect();
        definitions.sort_by(|a, b| {
            a.created_at
                .total_cmp(&b.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        definitions
    }

    pub fn definition(&self, id: &str) -> Option<&GroupDefinition> {
        self.tab_groups.get(id)
    }

    pub fn definition_by_native(&self, native_id: NativeGroupId) -> Option<&GroupDefinition> {
        self.ordered_definitions()
            .into_iter()
            .find(|d| d.native_group_id == Some(native_id))
    }

    pub fn upsert_definition(&mut self, definition: GroupDefinition) {
        self.tab_groups.insert(definition.id.clone(), definition);
    }

    pub fn remove_definition(&mut self, id: &str) -> Option<GroupDefinition> {
        self.tab_groups.remove(id)
    }

    /// Rewrites only `nativeGroupId`; returns whether anything changed
    pub fn set_native_group(&mut self, id: &str, native_id: Option<NativeGroupId>) -> bool {
        self.tab_groups
            .get_mut(id)
            .filter(|d| d.native_group_id != native_id)
            .map(|d| d.native_group_id = native_id)
            .is_some()
    }

    /// Take over a title/color the user set on the live group
    pub fn set_appearance(&mut self, id: &str, title: &str, color: GroupColor) -> bool {
        self.tab_groups
            .get_mut(id)
            .filter(|d| d.display_name != title || d.color != color)
            .map(|d| {
                d.display_name = title.to_string();
                d.color = color;
            })
            .is_some()
    }

    pub fn is_pinned_group(&self, native_id: NativeGroupId) -> bool {
        self.pinned_groups.contains_key(&native_id.to_string())
    }
}

/// Durable key-value storage. There are no transactions: use [`modify`]
/// so every write starts from a fresh read.
#[allow(async_fn_in_trait)]
pub trait Store {
    async fn load(&self) -> Result<StorageData, StorageError>;

    async fn save(&self, data: &StorageData) -> Result<(), StorageError>;
}

/// Re-read the record, apply `change`, write it back.
/// Returns the record as written along with the closure's result.
pub async fn modify<S, R>(
    store: &S,
    change: impl FnOnce(&mut StorageData) -> R,
) -> Result<(StorageData, R), StorageError>
where
    S: Store,
{
    let mut data = store.load().await?;
    let result = change(&mut data);
    store.save(&data).await?;
    Ok((data, result))
}

/// Like [`modify`], but nothing is written when `change` rejects the record
pub async fn try_modify<S, R, E>(
    store: &S,
    change: impl FnOnce(&mut StorageData) -> Result<R, E>,
) -> Result<(StorageData, R), E>
where
    S: Store,
    E: From<StorageError>,
{
    let mut data = store.load().await?;
    let result = change(&mut data)?;
    store.save(&data).await?;
    Ok((data, result))
}
