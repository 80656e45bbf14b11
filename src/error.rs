/// Error types for Tab Organizer.
///
/// None of these ever escape an event listener: the handlers in
/// `background` log them and carry on.

use crate::tab_data::{NativeGroupId, TabId};

/// A platform tab/group primitive failed. Always transient from our side:
/// the operation is abandoned and the next trigger retries.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("tab {0} no longer exists")]
    TabGone(TabId),

    #[error("tab group {0} no longer exists")]
    GroupGone(NativeGroupId),

    #[error("{call} failed: {message}")]
    Call { call: &'static str, message: String },

    #[error("failed to decode {what}: {message}")]
    Decode { what: &'static str, message: String },
}

#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("storage read failed: {0}")]
    Read(String),

    #[error("storage write failed: {0}")]
    Write(String),

    #[error("stored record is malformed: {0}")]
    Decode(String),
}

/// Classification failures are reported as "no match" to the engine.
#[derive(Debug, thiserror::Error)]
pub enum ClassifyError {
    #[error("classifier request failed: {0}")]
    Transport(String),

    #[error("classifier response malformed: {0}")]
    MalformedResponse(String),
}

/// Errors surfaced to the popup through the exported operations.
#[derive(Debug, thiserror::Error)]
pub enum DefinitionError {
    #[error("group name must not be empty")]
    EmptyName,

    #[error("no group definition with id {0}")]
    UnknownDefinition(String),

    #[error("no live tab group with id {0}")]
    UnknownGroup(NativeGroupId),

    #[error("unknown feature: {0}")]
    UnknownFeature(String),

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error(transparent)]
    Platform(#[from] PlatformError),
}

/// Internal error for one grouping attempt.
#[derive(Debug, thiserror::Error)]
pub enum GroupingError {
    #[error(transparent)]
    Platform(#[from] PlatformError),

    #[error(transparent)]
    Storage(#[from] StorageError),
}
