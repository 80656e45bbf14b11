/// Pinned groups: snapshots of live groups that are exempt from auto-close
/// and auto-grouping, and that are re-opened when the browser restarts.
///
/// Entries are keyed by the native group id they had when pinned. Native
/// ids do not survive a restart, so restoring an entry re-keys it.

use crate::classifier::Classifier;
use crate::engine::GroupingEngine;
use crate::error::DefinitionError;
use crate::platform::TabPlatform;
use crate::storage::{Store, modify};
use crate::tab_data::{NativeGroup, NativeGroupId, PinnedGroup, SavedTab, TabId, TabInfo};
use futures::future::join_all;
use log::{info, warn};
use std::collections::{BTreeMap, HashSet};

fn snapshot_of(group: &NativeGroup, members: &[TabInfo]) -> PinnedGroup {
    PinnedGroup {
        title: group.title.clone(),
        color: group.color,
        tabs: members
            .iter()
            .map(|tab| SavedTab {
                url: tab.url.clone(),
                title: tab.title.clone(),
            })
            .collect(),
    }
}

async fn live_group<P: TabPlatform>(platform: &P, group_id: NativeGroupId) -> Result<Option<NativeGroup>, DefinitionError> {
    Ok(platform
        .query_groups()
        .await?
        .into_iter()
        .find(|group| group.id == group_id))
}

pub async fn pin_group<P, S>(platform: &P, store: &S, group_id: NativeGroupId) -> Result<PinnedGroup, DefinitionError>
where
    P: TabPlatform,
    S: Store,
{
    let group = live_group(platform, group_id)
        .await?
        .ok_or(DefinitionError::UnknownGroup(group_id))?;
    let members = platform.tabs_in_group(group_id).await?;
    let pinned = snapshot_of(&group, &members);

    modify(store, |data| {
        data.pinned_groups.insert(group_id.to_string(), pinned.clone())
    })
    .await?;
    info!("Pinned group {:?} with {} tabs", pinned.title, pinned.tabs.len());

    Ok(pinned)
}

/// Returns whether the group was pinned
pub async fn unpin_group<S: Store>(store: &S, group_id: NativeGroupId) -> Result<bool, DefinitionError> {
    let (_, removed) = modify(store, |data| data.pinned_groups.remove(&group_id.to_string())).await?;
    Ok(removed.is_some())
}

/// Re-snapshot pinned groups that are live, writing only when a title,
/// color or member list changed. Returns how many entries were rewritten.
pub async fn refresh_pinned_groups<P, S, C>(engine: &GroupingEngine<P, S, C>) -> usize
where
    P: TabPlatform,
    S: Store,
    C: Classifier,
{
    let pinned = engine.snapshot().pinned_groups;
    if pinned.is_empty() {
        return 0;
    }

    let (groups, tabs) = match (engine.platform().query_groups().await, engine.platform().query_tabs().await) {
        (Ok(groups), Ok(tabs)) => (groups, tabs),
        (Err(e), _) | (_, Err(e)) => {
            warn!("Failed to refresh pinned groups: {}", e);
            return 0;
        }
    };

    let mut changed = BTreeMap::new();
    for group in &groups {
        let key = group.id.to_string();
        let Some(saved) = pinned.get(&key) else {
            continue;
        };
        let members: Vec<TabInfo> = tabs.iter().filter(|tab| tab.group_id == group.id).cloned().collect();
        let current = snapshot_of(group, &members);
        if &current != saved {
            changed.insert(key, current);
        }
    }

    if changed.is_empty() {
        return 0;
    }
    let count = changed.len();
    match modify(engine.store(), |data| {
        for (key, current) in changed {
            if data.pinned_groups.contains_key(&key) {
                data.pinned_groups.insert(key, current);
            }
        }
    })
    .await
    {
        Ok((written, _)) => {
            engine.apply_config(written);
            count
        }
        Err(e) => {
            warn!("Failed to save pinned groups: {}", e);
            0
        }
    }
}

/// Bring back every pinned group whose native id is not live. Runs with
/// grouping held off so the restored tabs are not grabbed mid-restore.
pub async fn restore_pinned_groups<P, S, C>(engine: &GroupingEngine<P, S, C>) -> usize
where
    P: TabPlatform,
    S: Store,
    C: Classifier,
{
    let _guard = engine.exclusive().await;
    let platform = engine.platform();

    let pinned = engine.snapshot().pinned_groups;
    if pinned.is_empty() {
        return 0;
    }

    let live = match platform.query_groups().await {
        Ok(live) => live,
        Err(e) => {
            warn!("Failed to query groups, pinned groups not restored: {}", e);
            return 0;
        }
    };
    let live_ids: HashSet<NativeGroupId> = live.iter().map(|group| group.id).collect();
    let mut taken = HashSet::new();
    let mut rekeyed: Vec<(String, NativeGroupId)> = Vec::new();

    for (key, saved) in &pinned {
        if key.parse::<NativeGroupId>().is_ok_and(|id| live_ids.contains(&id)) {
            continue;
        }

        // The browser may have restored the group on its own
        let reopened = live.iter().find(|group| {
            !taken.contains(&group.id)
                && !pinned.contains_key(&group.id.to_string())
                && group.title == saved.title
                && group.color == saved.color
        });
        if let Some(group) = reopened {
            taken.insert(group.id);
            rekeyed.push((key.clone(), group.id));
            continue;
        }

        if saved.tabs.is_empty() {
            continue;
        }

        let opened = join_all(saved.tabs.iter().map(|tab| platform.create_tab(&tab.url))).await;
        let tab_ids: Vec<TabId> = opened
            .into_iter()
            .filter_map(|result| match result {
                Ok(tab) => Some(tab.id),
                Err(e) => {
                    warn!("Failed to reopen a tab of {:?}: {}", saved.title, e);
                    None
                }
            })
            .collect();
        if tab_ids.is_empty() {
            continue;
        }

        // Keep the group's tabs side by side at the front of the strip
        for (index, tab_id) in (0..).zip(&tab_ids) {
            if let Err(e) = platform.move_tab(*tab_id, index).await {
                warn!("Failed to move restored tab {}: {}", tab_id, e);
            }
        }

        let group_id = match platform.create_group(&tab_ids).await {
            Ok(id) => id,
            Err(e) => {
                warn!("Failed to regroup pinned group {:?}: {}", saved.title, e);
                continue;
            }
        };
        if let Err(e) = platform.update_group(group_id, &saved.title, saved.color).await {
            warn!("Failed to title restored group {}: {}", group_id, e);
        }
        taken.insert(group_id);
        rekeyed.push((key.clone(), group_id));
    }

    if rekeyed.is_empty() {
        return 0;
    }

    let restored = rekeyed.len();
    let result = modify(engine.store(), |data| {
        // Take every old key out first so a new id cannot collide with one
        let moved: Vec<(PinnedGroup, NativeGroupId)> = rekeyed
            .into_iter()
            .filter_map(|(key, id)| data.pinned_groups.remove(&key).map(|entry| (entry, id)))
            .collect();
        for (entry, id) in moved {
            data.pinned_groups.insert(id.to_string(), entry);
        }
    })
    .await;

    match result {
        Ok((written, _)) => {
            engine.apply_config(written);
            info!("Restored {} pinned groups", restored);
            restored
        }
        Err(e) => {
            warn!("Restored pinned groups but failed to save their new ids: {}", e);
            restored
        }
    }
}
