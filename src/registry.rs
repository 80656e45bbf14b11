/// Runtime cache of native group handles.
///
/// Native group ids are ephemeral: they reset on browser restart, and the
/// user can close or retitle groups at any time. The registry maps each
/// definition id to the native group currently backing it. It is rebuilt
/// at startup from the durable record plus a live query, then kept
/// current by the change listeners.

use crate::storage::StorageData;
use crate::tab_data::{GroupDefinition, NativeGroup, NativeGroupId};
use log::{info, warn};
use std::collections::{BTreeMap, HashSet};

/// Transient per-definition state
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuntimeGroupState {
    pub native_group_id: Option<NativeGroupId>,
    /// Patterns active when the native group was last assigned
    pub patterns: Vec<String>,
    /// Set while a native group is being created for this definition
    pub creating: bool,
}

#[derive(Debug, Default)]
pub struct NativeGroupRegistry {
    entries: BTreeMap<String, RuntimeGroupState>,
}

impl NativeGroupRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed from durable state; ids there are assumed already reconciled
    pub fn rebuild(data: &StorageData) -> Self {
        let entries = data
            .tab_groups
            .values()
            .map(|definition| {
                let state = RuntimeGroupState {
                    native_group_id: definition.native_group_id,
                    patterns: definition.patterns.clone(),
                    creating: false,
                };
                (definition.id.clone(), state)
            })
            .collect();

        NativeGroupRegistry { entries }
    }

    pub fn state(&self, definition_id: &str) -> Option<&RuntimeGroupState> {
        self.entries.get(definition_id)
    }

    pub fn native_id(&self, definition_id: &str) -> Option<NativeGroupId> {
        self.entries.get(definition_id).and_then(|s| s.native_group_id)
    }

    pub fn definition_for(&self, native_id: NativeGroupId) -> Option<String> {
        self.entries
            .iter()
            .find(|(_, state)| state.native_group_id == Some(native_id))
            .map(|(id, _)| id.clone())
    }

    pub fn claimed_ids(&self) -> HashSet<NativeGroupId> {
        self.entries.values().filter_map(|s| s.native_group_id).collect()
    }

    pub fn record(&mut self, definition_id: &str, native_id: NativeGroupId, patterns: &[String]) {
        let state = self.entries.entry(definition_id.to_string()).or_default();
        state.native_group_id = Some(native_id);
        state.patterns = patterns.to_vec();
    }

    /// Drop the link to a native group that no longer exists
    pub fn clear_native(&mut self, native_id: NativeGroupId) -> Option<String> {
        let definition_id = self.definition_for(native_id)?;
        if let Some(state) = self.entries.get_mut(&definition_id) {
            state.native_group_id = None;
        }
        Some(definition_id)
    }

    /// Definition deleted; returns the native group it was linked to
    pub fn forget(&mut self, definition_id: &str) -> Option<NativeGroupId> {
        self.entries.remove(definition_id).and_then(|s| s.native_group_id)
    }

    /// Returns false if a creation is already in flight for this definition
    pub fn begin_creation(&mut self, definition_id: &str) -> bool {
        let state = self.entries.entry(definition_id.to_string()).or_default();
        if state.creating {
            return false;
        }
        state.creating = true;
        true
    }

    pub fn end_creation(&mut self, definition_id: &str) {
        if let Some(state) = self.entries.get_mut(definition_id) {
            state.creating = false;
        }
    }

    /// Keep entries in step with an edited durable record without losing
    /// native links the record does not know about yet.
    pub fn sync_definitions(&mut self, data: &StorageData) {
        self.entries.retain(|id, _| data.tab_groups.contains_key(id));
        for definition in data.tab_groups.values() {
            let state = self.entries.entry(definition.id.clone()).or_default();
            if state.native_group_id.is_none() {
                state.native_group_id = definition.native_group_id;
            }
        }
    }
}

/// How a live group ended up represented in the durable record
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    /// Already linked to this definition
    Known(String),
    /// Linked to an existing definition by (displayName, color)
    Adopted(String),
    /// No definition matched; a fresh one with no patterns was added
    Synthesized(String),
}

impl Claim {
    pub fn definition_id(&self) -> &str {
        match self {
            Claim::Known(id) | Claim::Adopted(id) | Claim::Synthesized(id) => id,
        }
    }
}

/// Make sure `group` is backed by exactly one definition in `data`.
pub fn claim_or_synthesize(data: &mut StorageData, group: &NativeGroup, now: f64) -> Claim {
    if let Some(known) = data.definition_by_native(group.id) {
        return Claim::Known(known.id.clone());
    }

    let adopted = data
        .ordered_definitions()
        .into_iter()
        .find(|d| d.native_group_id.is_none() && group.matches(d))
        .map(|d| d.id.clone());

    if let Some(id) = adopted {
        data.set_native_group(&id, Some(group.id));
        return Claim::Adopted(id);
    }

    if data.ordered_definitions().iter().any(|d| group.matches(d)) {
        warn!(
            "Live group {} duplicates definition {:?}; treating it as a separate group",
            group.id, group.title
        );
    }

    let definition = GroupDefinition::synthesized_from(group, now);
    let id = definition.id.clone();
    data.upsert_definition(definition);
    Claim::Synthesized(id)
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct ReconcileReport {
    pub adopted: usize,
    pub synthesized: usize,
    pub released: usize,
    pub retitled: usize,
}

/// Startup reconciliation of the durable record against live groups.
///
/// Stale native ids are reset to null, every live group is either matched
/// to a definition or gets a synthesized one. Definitions are never deleted.
pub fn reconcile_with_live(data: &mut StorageData, live: &[NativeGroup], now: f64) -> ReconcileReport {
    let mut report = ReconcileReport::default();
    let live_ids: HashSet<NativeGroupId> = live.iter().map(|g| g.id).collect();

    let mut seen = HashSet::new();
    let stale: Vec<String> = data
        .ordered_definitions()
        .into_iter()
        .filter_map(|d| {
            let native = d.native_group_id?;
            // A second claim on the same live id loses; first in order wins
            let keep = live_ids.contains(&native) && seen.insert(native);
            (!keep).then(|| d.id.clone())
        })
        .collect();

    for id in stale {
        data.set_native_group(&id, None);
        report.released += 1;
    }

    for group in live {
        match claim_or_synthesize(data, group, now) {
            Claim::Known(id) => {
                if data.set_appearance(&id, &group.title, group.color) {
                    report.retitled += 1;
                }
            }
            Claim::Adopted(_) => report.adopted += 1,
            Claim::Synthesized(_) => report.synthesized += 1,
        }
    }

    info!(
        "Reconciled {} live groups: {} adopted, {} synthesized, {} released, {} retitled",
        live.len(),
        report.adopted,
        report.synthesized,
        report.released,
        report.retitled
    );
    report
}
