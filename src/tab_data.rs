/// Data structures for Tab Organizer
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub type TabId = i32;
pub type NativeGroupId = i32;

/// `chrome.tabGroups.TAB_GROUP_ID_NONE`
pub const TAB_GROUP_ID_NONE: NativeGroupId = -1;

fn no_group() -> NativeGroupId {
    TAB_GROUP_ID_NONE
}

/// Information about a browser tab
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct TabInfo {
    pub id: TabId,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub pinned: bool,
    #[serde(default)]
    pub active: bool,
    #[serde(default)]
    pub discarded: bool,
    #[serde(default = "no_group")]
    pub group_id: NativeGroupId,
    /// Platform's own last-active timestamp, ms since epoch
    #[serde(default)]
    pub last_accessed: f64,
    #[serde(default)]
    pub index: i32,
}

impl TabInfo {
    pub fn new(id: TabId, url: String, title: String) -> TabInfo {
        TabInfo {
            id,
            url,
            title,
            pinned: false,
            active: false,
            discarded: false,
            group_id: TAB_GROUP_ID_NONE,
            last_accessed: 0.0,
            index: 0,
        }
    }

    pub fn is_grouped(&self) -> bool {
        self.group_id != TAB_GROUP_ID_NONE
    }
}

/// The fixed palette of native group colors
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum GroupColor {
    Grey,
    #[default]
    Blue,
    Red,
    Yellow,
    Green,
    Pink,
    Purple,
    Cyan,
    Orange,
}

impl GroupColor {
    pub fn as_str(&self) -> &'static str {
        match self {
            GroupColor::Grey => "grey",
            GroupColor::Blue => "blue",
            GroupColor::Red => "red",
            GroupColor::Yellow => "yellow",
            GroupColor::Green => "green",
            GroupColor::Pink => "pink",
            GroupColor::Purple => "purple",
            GroupColor::Cyan => "cyan",
            GroupColor::Orange => "orange",
        }
    }
}

/// A live platform tab group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct NativeGroup {
    pub id: NativeGroupId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub color: GroupColor,
}

impl NativeGroup {
    /// The (displayName, color) heuristic used to pair live groups with definitions
    pub fn matches(&self, definition: &GroupDefinition) -> bool {
        self.title == definition.display_name && self.color == definition.color
    }
}

/// A durable, user-authored logical group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GroupDefinition {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub color: GroupColor,
    #[serde(default)]
    pub patterns: Vec<String>,
    #[serde(default)]
    pub native_group_id: Option<NativeGroupId>,
    /// Creation time in ms; fixes the evaluation order of definitions
    #[serde(default)]
    pub created_at: f64,
}

impl GroupDefinition {
    pub fn new(display_name: String, color: GroupColor, patterns: Vec<String>, created_at: f64) -> Self {
        GroupDefinition {
            id: Uuid::new_v4().to_string(),
            display_name,
            color,
            patterns,
            native_group_id: None,
            created_at,
        }
    }

    /// Back-fill a definition for a live group nobody has claimed yet
    pub fn synthesized_from(group: &NativeGroup, created_at: f64) -> Self {
        let mut definition = GroupDefinition::new(group.title.clone(), group.color, Vec::new(), created_at);
        definition.native_group_id = Some(group.id);
        definition
    }

    /// Definitions with no patterns are manual groups, never auto-managed
    pub fn is_auto_managed(&self) -> bool {
        !self.patterns.is_empty()
    }
}

/// A group marked to survive lifecycle policies and browser restarts
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PinnedGroup {
    pub title: String,
    #[serde(default)]
    pub color: GroupColor,
    #[serde(default)]
    pub tabs: Vec<SavedTab>,
}

/// A saved tab within a pinned group
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SavedTab {
    pub url: String,
    #[serde(default)]
    pub title: String,
}
