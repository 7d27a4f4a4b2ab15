// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Graph-level state cell with pending transition tracking.
//!
//! The controller sets a target; branch workers acknowledge it through
//! their [`BranchStatus`]; the transition settles once every branch agrees.

use std::sync::Arc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::error::LifecycleError;
use crate::core::events::{EventOrigin, EventSender, GraphEvent};
use crate::core::graph::BranchStatus;

use super::state::LifecycleState;

#[derive(Debug, Clone, Copy)]
struct StateCell {
    current: LifecycleState,
    pending: Option<LifecycleState>,
}

pub(crate) struct TransitionTracker {
    cell: Mutex<StateCell>,
    cond: Condvar,
    target: AtomicU8,
    branches: Vec<Arc<BranchStatus>>,
    events: EventSender,
}

impl TransitionTracker {
    pub(crate) fn new(branches: Vec<Arc<BranchStatus>>, events: EventSender) -> Self {
        Self {
            cell: Mutex::new(StateCell {
                current: LifecycleState::Ready,
                pending: None,
            }),
            cond: Condvar::new(),
            target: AtomicU8::new(LifecycleState::Ready.as_u8()),
            branches,
            events,
        }
    }

    /// State workers should be in.
    pub(crate) fn target(&self) -> LifecycleState {
        LifecycleState::from_u8(self.target.load(Ordering::Acquire))
    }

    pub(crate) fn current(&self) -> LifecycleState {
        self.cell.lock().current
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> Option<LifecycleState> {
        self.cell.lock().pending
    }

    /// Start moving toward `to`; settles asynchronously as workers acknowledge.
    pub(crate) fn begin(&self, to: LifecycleState) {
        {
            let mut cell = self.cell.lock();
            cell.pending = Some(to);
            self.target.store(to.as_u8(), Ordering::Release);
        }
        self.acknowledge();
    }

    /// Called by workers after updating their branch status.
    pub(crate) fn acknowledge(&self) {
        let mut cell = self.cell.lock();
        let Some(pending) = cell.pending else {
            return;
        };
        if !self.branches.iter().all(|b| b.state().satisfies(pending)) {
            return;
        }
        let old = cell.current;
        cell.current = pending;
        cell.pending = None;
        self.cond.notify_all();
        drop(cell);
        tracing::debug!("graph state {} -> {}", old, pending);
        self.publish(old, pending);
    }

    /// Set the state immediately, dropping any pending transition.
    pub(crate) fn force(&self, state: LifecycleState) {
        let old = {
            let mut cell = self.cell.lock();
            let old = cell.current;
            cell.current = state;
            cell.pending = None;
            self.target.store(state.as_u8(), Ordering::Release);
            self.cond.notify_all();
            old
        };
        if old != state {
            self.publish(old, state);
        }
    }

    /// Current state, waiting up to `timeout` for an in-flight transition.
    pub(crate) fn query(&self, timeout: Duration) -> Result<LifecycleState, LifecycleError> {
        let deadline = Instant::now() + timeout;
        let mut cell = self.cell.lock();
        while cell.pending.is_some() {
            if self.cond.wait_until(&mut cell, deadline).timed_out() {
                break;
            }
        }
        match cell.pending {
            Some(to) => Err(LifecycleError::Busy {
                from: cell.current,
                to,
            }),
            None => Ok(cell.current),
        }
    }

    pub(crate) fn wait_for(&self, state: LifecycleState, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut cell = self.cell.lock();
        while cell.current != state {
            if self.cond.wait_until(&mut cell, deadline).timed_out() {
                return cell.current == state;
            }
        }
        true
    }

    fn publish(&self, old: LifecycleState, new: LifecycleState) {
        let _ = self.events.send(GraphEvent::StateChanged {
            origin: EventOrigin::Graph,
            old,
            new,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::lifecycle::BranchState;

    fn tracker(n: usize) -> (TransitionTracker, Vec<Arc<BranchStatus>>, crossbeam_channel::Receiver<GraphEvent>) {
        let statuses: Vec<_> = (0..n).map(|_| Arc::new(BranchStatus::default())).collect();
        let (tx, rx) = crossbeam_channel::unbounded();
        (TransitionTracker::new(statuses.clone(), tx), statuses, rx)
    }

    #[test]
    fn test_settles_when_all_branches_acknowledge() {
        let (tracker, statuses, rx) = tracker(2);
        tracker.begin(LifecycleState::Paused);
        assert_eq!(tracker.current(), LifecycleState::Ready);
        assert_eq!(tracker.target(), LifecycleState::Paused);

        statuses[0].set_state(BranchState::Paused);
        tracker.acknowledge();
        assert_eq!(tracker.pending(), Some(LifecycleState::Paused));

        statuses[1].set_state(BranchState::Paused);
        tracker.acknowledge();
        assert_eq!(tracker.current(), LifecycleState::Paused);
        assert_eq!(tracker.pending(), None);
        assert!(matches!(
            rx.try_recv(),
            Ok(GraphEvent::StateChanged {
                old: LifecycleState::Ready,
                new: LifecycleState::Paused,
                ..
            })
        ));
    }

    #[test]
    fn test_query_reports_busy_while_pending() {
        let (tracker, _statuses, _rx) = tracker(1);
        tracker.begin(LifecycleState::Paused);
        let result = tracker.query(Duration::from_millis(5));
        assert_eq!(
            result,
            Err(LifecycleError::Busy {
                from: LifecycleState::Ready,
                to: LifecycleState::Paused
            })
        );
    }

    #[test]
    fn test_force_clears_pending() {
        let (tracker, _statuses, _rx) = tracker(1);
        tracker.begin(LifecycleState::Paused);
        tracker.force(LifecycleState::Stopped);
        assert_eq!(tracker.query(Duration::ZERO), Ok(LifecycleState::Stopped));
        assert!(tracker.wait_for(LifecycleState::Stopped, Duration::ZERO));
    }
}
