use serde::{Deserialize, Serialize};

/// Scroll direction for [`SliceNavigator::advance`](crate::navigator::SliceNavigator::advance).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Forward,
    Backward,
}

/// How a [`SliceNavigator`](crate::navigator::SliceNavigator) replays its stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceMode {
    /// Frames are emitted only in response to external scroll/seek events.
    Interactive,
    /// Every slice is emitted once, first to last.
    Export,
}

/// Lifecycle of an export sequence. `Done` and `Cancelled` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SequenceState {
    Ready,
    Running,
    Done,
    Cancelled,
}

impl SequenceState {
    pub fn is_terminal(self) -> bool {
        matches!(self, SequenceState::Done | SequenceState::Cancelled)
    }
}

/// Where the record handed out by the metadata cache came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    Computed,
    Retrieved,
}

/// Ordering applied when stacking single-frame files from a directory.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub enum SortBy {
    #[default]
    ImagePositionPatient,
    TablePosition,
    InstanceNumber,
    None,
}
