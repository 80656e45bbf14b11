/// Periodic sweep over open tabs: auto-close, auto-sleep, auto-group.

use crate::classifier::Classifier;
use crate::engine::{GroupOutcome, GroupingEngine};
use crate::platform::TabPlatform;
use crate::settings::Settings;
use crate::storage::Store;
use crate::tab_data::{TabId, TabInfo};
use log::{debug, info, warn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

pub const SWEEP_INTERVAL_MS: u32 = 20_000;

/// Close a tab that is idle, inactive, unpinned and not in a pinned group
pub fn should_close(tab: &TabInfo, settings: &Settings, idle_ms: f64, in_pinned_group: bool) -> bool {
    settings.auto_close_enabled
        && !tab.active
        && !tab.pinned
        && !in_pinned_group
        && settings.auto_close_time.is_exceeded_by(idle_ms)
}

/// Discard an idle, inactive tab that is still loaded
pub fn should_sleep(tab: &TabInfo, settings: &Settings, idle_ms: f64) -> bool {
    settings.auto_sleep_enabled
        && !tab.active
        && !tab.discarded
        && settings.auto_sleep_time.is_exceeded_by(idle_ms)
}

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub closed: Vec<TabId>,
    pub discarded: Vec<TabId>,
    pub grouped: usize,
}

pub struct TabLifecycleManager<P, S, C> {
    engine: Rc<GroupingEngine<P, S, C>>,
    /// Last time each tab was seen active, in epoch milliseconds
    access_times: RefCell<HashMap<TabId, f64>>,
}

impl<P, S, C> TabLifecycleManager<P, S, C>
where
    P: TabPlatform,
    S: Store,
    C: Classifier,
{
    pub fn new(engine: Rc<GroupingEngine<P, S, C>>) -> Self {
        TabLifecycleManager {
            engine,
            access_times: RefCell::new(HashMap::new()),
        }
    }

    pub fn record_access(&self, tab_id: TabId, now: f64) {
        self.access_times.borrow_mut().insert(tab_id, now);
    }

    pub fn forget(&self, tab_id: TabId) {
        self.access_times.borrow_mut().remove(&tab_id);
    }

    /// Time since the tab was last seen active. Falls back to the browser's
    /// own timestamp, and to "just now" when neither is known.
    pub fn idle_ms(&self, tab: &TabInfo, now: f64) -> f64 {
        let mut access_times = self.access_times.borrow_mut();
        let last = match access_times.get(&tab.id) {
            Some(last) => *last,
            None if tab.last_accessed > 0.0 => tab.last_accessed,
            None => *access_times.entry(tab.id).or_insert(now),
        };
        (now - last).max(0.0)
    }

    pub async fn sweep(&self) -> SweepReport {
        let mut report = SweepReport::default();
        let now = self.engine.now();
        let config = self.engine.snapshot();
        let settings = &config.settings;

        let tabs = match self.engine.platform().query_tabs().await {
            Ok(tabs) => tabs,
            Err(e) => {
                warn!("Sweep skipped: {}", e);
                return report;
            }
        };

        for tab in tabs {
            if tab.active {
                self.record_access(tab.id, now);
            }
            let idle_ms = self.idle_ms(&tab, now);
            let in_pinned_group = tab.is_grouped() && config.is_pinned_group(tab.group_id);

            if should_close(&tab, settings, idle_ms, in_pinned_group) {
                match self.engine.platform().close_tab(tab.id).await {
                    Ok(()) => {
                        debug!("Closed tab {} after {:.0}s idle", tab.id, idle_ms / 1000.0);
                        self.forget(tab.id);
                        self.engine.forget_tab(tab.id);
                        report.closed.push(tab.id);
                        // Nothing left to sleep or group
                        continue;
                    }
                    Err(e) => warn!("Failed to close tab {}: {}", tab.id, e),
                }
            }

            if should_sleep(&tab, settings, idle_ms) {
                match self.engine.platform().discard_tab(tab.id).await {
                    Ok(()) => report.discarded.push(tab.id),
                    Err(e) => warn!("Failed to discard tab {}: {}", tab.id, e),
                }
            }

            if settings.auto_grouping_enabled
                && matches!(self.engine.group_tab(tab.id).await, GroupOutcome::Assigned { .. })
            {
                report.grouped += 1;
            }
        }

        if !report.closed.is_empty() || !report.discarded.is_empty() || report.grouped > 0 {
            info!(
                "Sweep: {} closed, {} discarded, {} grouped",
                report.closed.len(),
                report.discarded.len(),
                report.grouped
            );
        }
        report
    }
}
