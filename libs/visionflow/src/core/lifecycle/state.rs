//! Graph lifecycle state machine types
//!
//! - `LifecycleState` - top-level graph state
//! - `LifecycleAction` - requests that move the graph between states
//! - `BranchState` - per-branch worker state acknowledged by worker threads

use serde::{Deserialize, Serialize};

/// Top-level graph state.
///
/// # State Transitions
///
/// ```text
/// ┌───────────────┐
/// │ Uninitialized │
/// └──────┬────────┘
///        │ build()
///        ▼
/// ┌───────┐ start() ┌────────┐  run()   ┌─────────┐
/// │ Ready │────────►│ Paused │─────────►│ Running │
/// └───────┘         └───┬────┘◄─────────┴────┬────┘
///                       │       pause()      │
///                       │ stop()             │ stop()
///                       ▼                    ▼
///                   ┌──────────┐  drained or timeout  ┌─────────┐
///                   │ Draining │─────────────────────►│ Stopped │
///                   └──────────┘                      └─────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LifecycleState {
    /// No graph has been assembled yet.
    Uninitialized,
    /// Graph assembled, no worker threads running.
    Ready,
    /// Workers running, sources not producing.
    Paused,
    /// Data flowing.
    Running,
    /// End-of-stream injected, waiting for in-flight data.
    Draining,
    /// Every branch stopped. Terminal.
    Stopped,
}

impl LifecycleState {
    /// Worker threads exist in this state.
    pub fn has_workers(&self) -> bool {
        matches!(
            self,
            LifecycleState::Paused | LifecycleState::Running | LifecycleState::Draining
        )
    }

    /// Data may move through branches in this state.
    pub fn is_flowing(&self) -> bool {
        matches!(self, LifecycleState::Running | LifecycleState::Draining)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LifecycleState::Stopped)
    }

    /// Apply `action`, returning the next state or `None` when the action is
    /// illegal from this state.
    pub fn transition(self, action: LifecycleAction) -> Option<LifecycleState> {
        use LifecycleAction as A;
        use LifecycleState as S;
        match (self, action) {
            (S::Uninitialized, A::Build) => Some(S::Ready),
            (S::Ready, A::Start) => Some(S::Paused),
            (S::Paused, A::Run) => Some(S::Running),
            (S::Running, A::Pause) => Some(S::Paused),
            (S::Paused | S::Running, A::Stop) => Some(S::Draining),
            (S::Draining, A::Drained) => Some(S::Stopped),
            _ => None,
        }
    }

    pub(crate) fn as_u8(self) -> u8 {
        match self {
            LifecycleState::Uninitialized => 0,
            LifecycleState::Ready => 1,
            LifecycleState::Paused => 2,
            LifecycleState::Running => 3,
            LifecycleState::Draining => 4,
            LifecycleState::Stopped => 5,
        }
    }

    pub(crate) fn from_u8(value: u8) -> LifecycleState {
        match value {
            0 => LifecycleState::Uninitialized,
            1 => LifecycleState::Ready,
            2 => LifecycleState::Paused,
            3 => LifecycleState::Running,
            4 => LifecycleState::Draining,
            _ => LifecycleState::Stopped,
        }
    }
}

impl std::fmt::Display for LifecycleState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

/// Requests accepted by the lifecycle state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleAction {
    Build,
    Start,
    Run,
    Pause,
    Stop,
    /// Internal: draining finished or its deadline passed.
    Drained,
}

impl LifecycleAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            LifecycleAction::Build => "build",
            LifecycleAction::Start => "start",
            LifecycleAction::Run => "run",
            LifecycleAction::Pause => "pause",
            LifecycleAction::Stop => "stop",
            LifecycleAction::Drained => "finish draining",
        }
    }
}

/// Per-branch worker state, as last acknowledged by the worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BranchState {
    /// Worker not spawned yet.
    Idle,
    Paused,
    Running,
    /// Worker exited or was abandoned during teardown.
    Stopped,
}

impl BranchState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            BranchState::Idle => 0,
            BranchState::Paused => 1,
            BranchState::Running => 2,
            BranchState::Stopped => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> BranchState {
        match value {
            0 => BranchState::Idle,
            1 => BranchState::Paused,
            2 => BranchState::Running,
            _ => BranchState::Stopped,
        }
    }

    /// Whether this branch state satisfies the graph-level target.
    pub fn satisfies(&self, target: LifecycleState) -> bool {
        match target {
            LifecycleState::Paused => *self == BranchState::Paused,
            LifecycleState::Running | LifecycleState::Draining => *self == BranchState::Running,
            LifecycleState::Stopped => *self == BranchState::Stopped,
            LifecycleState::Uninitialized | LifecycleState::Ready => *self == BranchState::Idle,
        }
    }
}
