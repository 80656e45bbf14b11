/// Popup operations: edit group definitions and feature settings.
///
/// These only write the durable record. The running background engine
/// picks the change up from the storage change notification.

use crate::error::DefinitionError;
use crate::settings::{Feature, IdleThreshold};
use crate::storage::{Store, modify, try_modify};
use crate::tab_data::{GroupColor, GroupDefinition};
use log::info;
use serde::Deserialize;
use std::collections::HashSet;

/// What the save-group form submits
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DefinitionInput {
    /// Present when editing an existing definition
    #[serde(default)]
    pub id: Option<String>,
    pub display_name: String,
    #[serde(default)]
    pub color: GroupColor,
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Trim patterns, drop blank ones and duplicates (keep first occurrence)
pub fn normalize_patterns(patterns: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    patterns
        .iter()
        .map(|pattern| pattern.trim())
        .filter(|pattern| !pattern.is_empty() && seen.insert(pattern.to_string()))
        .map(str::to_string)
        .collect()
}

/// Returns the id of the saved definition
pub async fn create_or_update_group_definition<S: Store>(
    store: &S,
    input: DefinitionInput,
    now: f64,
) -> Result<String, DefinitionError> {
    let display_name = input.display_name.trim().to_string();
    if display_name.is_empty() {
        return Err(DefinitionError::EmptyName);
    }
    let patterns = normalize_patterns(&input.patterns);

    let (_, id) = try_modify(store, |data| {
        let definition = match input.id {
            Some(id) => {
                let existing = data
                    .definition(&id)
                    .ok_or_else(|| DefinitionError::UnknownDefinition(id.clone()))?;
                GroupDefinition {
                    display_name,
                    color: input.color,
                    patterns,
                    ..existing.clone()
                }
            }
            None => GroupDefinition::new(display_name, input.color, patterns, now),
        };
        let id = definition.id.clone();
        data.upsert_definition(definition);
        Ok::<_, DefinitionError>(id)
    })
    .await?;

    info!("Saved group definition {}", id);
    Ok(id)
}

pub async fn delete_group_definition<S: Store>(store: &S, id: &str) -> Result<GroupDefinition, DefinitionError> {
    let (_, removed) = try_modify(store, |data| {
        data.remove_definition(id)
            .ok_or_else(|| DefinitionError::UnknownDefinition(id.to_string()))
    })
    .await?;

    info!("Deleted group definition {:?}", removed.display_name);
    Ok(removed)
}

pub async fn set_feature_enabled<S: Store>(store: &S, feature: &str, enabled: bool) -> Result<(), DefinitionError> {
    let parsed = Feature::parse(feature).ok_or_else(|| DefinitionError::UnknownFeature(feature.to_string()))?;
    modify(store, |data| data.settings.set_enabled(parsed, enabled)).await?;
    Ok(())
}

/// Auto-grouping has no threshold and is rejected
pub async fn set_threshold<S: Store>(
    store: &S,
    feature: &str,
    minutes: u32,
    seconds: u32,
) -> Result<(), DefinitionError> {
    let parsed = match Feature::parse(feature) {
        Some(parsed @ (Feature::AutoClose | Feature::AutoSleep)) => parsed,
        _ => return Err(DefinitionError::UnknownFeature(feature.to_string())),
    };
    let threshold = IdleThreshold::new(minutes, seconds);
    modify(store, |data| data.settings.set_threshold(parsed, threshold)).await?;
    Ok(())
}
