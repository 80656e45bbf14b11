/// Feature toggles and thresholds, persisted inside the durable record
use serde::{Deserialize, Serialize};

/// Idle time before a lifecycle policy fires
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct IdleThreshold {
    pub minutes: u32,
    pub seconds: u32,
}

impl IdleThreshold {
    pub fn new(minutes: u32, seconds: u32) -> Self {
        IdleThreshold { minutes, seconds }
    }

    pub fn as_millis(&self) -> f64 {
        (f64::from(self.minutes) * 60.0 + f64::from(self.seconds)) * 1000.0
    }

    /// Strictly greater: a tab idle for exactly the threshold is kept
    pub fn is_exceeded_by(&self, idle_ms: f64) -> bool {
        idle_ms > self.as_millis()
    }
}

fn default_auto_close_time() -> IdleThreshold {
    IdleThreshold::new(120, 0)
}

fn default_auto_sleep_time() -> IdleThreshold {
    IdleThreshold::new(60, 0)
}

/// Features the popup can toggle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feature {
    AutoClose,
    AutoSleep,
    AutoGroup,
}

impl Feature {
    pub fn parse(name: &str) -> Option<Feature> {
        match name {
            "auto-close" | "autoClose" => Some(Feature::AutoClose),
            "auto-sleep" | "autoSleep" => Some(Feature::AutoSleep),
            "auto-group" | "autoGroup" => Some(Feature::AutoGroup),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct Settings {
    pub auto_close_enabled: bool,
    pub auto_close_time: IdleThreshold,
    pub auto_sleep_enabled: bool,
    pub auto_sleep_time: IdleThreshold,
    pub auto_grouping_enabled: bool,
    /// Let auto-grouping move tabs out of groups the user made by hand
    pub allow_manual_group_access: bool,
    pub classifier: ClassifierSettings,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            auto_close_enabled: false,
            auto_close_time: default_auto_close_time(),
            auto_sleep_enabled: false,
            auto_sleep_time: default_auto_sleep_time(),
            auto_grouping_enabled: false,
            allow_manual_group_access: false,
            classifier: ClassifierSettings::default(),
        }
    }
}

impl Settings {
    pub fn is_enabled(&self, feature: Feature) -> bool {
        match feature {
            Feature::AutoClose => self.auto_close_enabled,
            Feature::AutoSleep => self.auto_sleep_enabled,
            Feature::AutoGroup => self.auto_grouping_enabled,
        }
    }

    pub fn set_enabled(&mut self, feature: Feature, enabled: bool) {
        match feature {
            Feature::AutoClose => self.auto_close_enabled = enabled,
            Feature::AutoSleep => self.auto_sleep_enabled = enabled,
            Feature::AutoGroup => self.auto_grouping_enabled = enabled,
        }
    }

    /// Returns false for features without a threshold
    pub fn set_threshold(&mut self, feature: Feature, threshold: IdleThreshold) -> bool {
        match feature {
            Feature::AutoClose => self.auto_close_time = threshold,
            Feature::AutoSleep => self.auto_sleep_time = threshold,
            Feature::AutoGroup => return false,
        }
        true
    }
}

/// Chat-completion backend used when no pattern matches
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase", default)]
pub struct ClassifierSettings {
    pub enabled: bool,
    pub endpoint: String,
    pub model: String,
    pub api_key: Option<String>,
    pub min_interval_ms: f64,
}

impl Default for ClassifierSettings {
    fn default() -> Self {
        ClassifierSettings {
            enabled: false,
            endpoint: "http://localhost:11434/api/chat".to_string(),
            model: "gemma2".to_string(),
            api_key: None,
            min_interval_ms: 3000.0,
        }
    }
}
