// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::events::{EventOrigin, EventSender, GraphEvent};
use crate::core::graph::BranchId;

/// Collects end-of-stream arrivals at terminal branches and posts the
/// graph-level end-of-stream once all of them have drained.
pub(crate) struct EosTracker {
    terminals: BTreeSet<BranchId>,
    reached: Mutex<BTreeSet<BranchId>>,
    cond: Condvar,
    events: EventSender,
}

impl EosTracker {
    pub(crate) fn new(terminals: BTreeSet<BranchId>, events: EventSender) -> Self {
        Self {
            terminals,
            reached: Mutex::new(BTreeSet::new()),
            cond: Condvar::new(),
            events,
        }
    }

    pub(crate) fn reached(&self, branch: BranchId) {
        let mut reached = self.reached.lock();
        if !self.terminals.contains(&branch) || !reached.insert(branch) {
            return;
        }
        tracing::debug!(
            "[{}] end of stream ({}/{})",
            branch,
            reached.len(),
            self.terminals.len()
        );
        if reached.len() == self.terminals.len() {
            self.cond.notify_all();
            drop(reached);
            let _ = self.events.send(GraphEvent::EndOfStream {
                origin: EventOrigin::Graph,
            });
        }
    }

    #[cfg(test)]
    pub(crate) fn is_complete(&self) -> bool {
        self.reached.lock().len() == self.terminals.len()
    }

    pub(crate) fn wait_all(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut reached = self.reached.lock();
        while reached.len() < self.terminals.len() {
            if self.cond.wait_until(&mut reached, deadline).timed_out() {
                return reached.len() == self.terminals.len();
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_eos_posted_once_all_terminals_reached() {
        let (tx, rx) = crossbeam_channel::unbounded();
        let a = BranchId::new(1);
        let b = BranchId::new(2);
        let tracker = EosTracker::new([a, b].into_iter().collect(), tx);

        tracker.reached(a);
        tracker.reached(a);
        assert!(!tracker.is_complete());
        assert!(rx.try_recv().is_err());

        tracker.reached(BranchId::new(9));
        tracker.reached(b);
        assert!(tracker.is_complete());
        assert!(tracker.wait_all(Duration::ZERO));
        assert!(matches!(
            rx.try_recv(),
            Ok(GraphEvent::EndOfStream {
                origin: EventOrigin::Graph
            })
        ));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_wait_all_times_out() {
        let (tx, _rx) = crossbeam_channel::unbounded();
        let tracker = EosTracker::new([BranchId::new(0)].into_iter().collect(), tx);
        assert!(!tracker.wait_all(Duration::from_millis(10)));
    }
}
