// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Event monitor: the single consumer of a graph's event channel.
//!
//! Stage errors are mapped to the branch that owns the failing stage and
//! classified. Network sources are reset in place on a short-lived thread
//! while the rest of the graph keeps flowing; capture format problems on
//! local cameras are only logged; anything else is fatal for the instance.

mod shutdown;

pub use shutdown::{FATAL_EXIT_STATUS, ShutdownSignal};

use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;

use crossbeam_channel::Sender;
use parking_lot::Mutex;

use crate::core::context::{GraphContext, StageId};
use crate::core::error::StageErrorCode;
use crate::core::events::{EventOrigin, EventReceiver, GraphEvent};
use crate::core::graph::{BranchId, BranchRole, BranchStatus, StageInstance};
use crate::core::lifecycle::{LifecycleState, TransitionTracker};
use crate::core::stages::StageState;

/// How the monitor reacts to a stage error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Reset the owning source branch; the graph keeps running.
    RecoverableSource,
    /// Log only.
    Advisory,
    /// Flag the instance as failed and request shutdown.
    Fatal,
}

/// What the monitor needs to know about one branch to recover it.
pub(crate) struct RecoveryTarget {
    pub(crate) name: String,
    pub(crate) role: BranchRole,
    pub(crate) status: Arc<BranchStatus>,
    pub(crate) stages: Weak<Mutex<Vec<StageInstance>>>,
}

pub struct EventMonitor {
    context: Arc<GraphContext>,
    targets: BTreeMap<BranchId, RecoveryTarget>,
    tracker: Arc<TransitionTracker>,
}

impl EventMonitor {
    pub(crate) fn new(
        context: Arc<GraphContext>,
        targets: BTreeMap<BranchId, RecoveryTarget>,
        tracker: Arc<TransitionTracker>,
    ) -> Self {
        Self {
            context,
            targets,
            tracker,
        }
    }

    /// Map a stage error to its owning branch and fault class.
    pub fn classify(&self, source: StageId, code: StageErrorCode) -> (FaultClass, Option<BranchId>) {
        let Some(branch) = self.context.directory().owning_branch(source) else {
            return (FaultClass::Fatal, None);
        };
        let class = match self.targets.get(&branch).map(|t| t.role) {
            Some(role) if role.is_recoverable() => FaultClass::RecoverableSource,
            Some(role) if role.is_camera() && code.is_capture_format_problem() => {
                FaultClass::Advisory
            }
            _ => FaultClass::Fatal,
        };
        (class, Some(branch))
    }

    pub fn handle(&self, event: GraphEvent) {
        match event {
            GraphEvent::Error {
                source,
                code,
                detail,
            } => self.handle_error(source, code, &detail),
            GraphEvent::EndOfStream { origin } => {
                tracing::info!("[{}] End of stream", origin);
                if origin == EventOrigin::Graph {
                    self.context.shutdown().request_quit();
                }
            }
            GraphEvent::StateChanged { origin, old, new } => {
                tracing::info!("[{}] state changed {} -> {}", origin, old, new);
                if origin == EventOrigin::Graph && new == LifecycleState::Stopped {
                    self.context.shutdown().mark_stopped();
                }
            }
            GraphEvent::Info { origin, detail } => {
                tracing::info!("[{}] {}", origin, detail);
            }
        }
    }

    fn handle_error(&self, source: StageId, code: StageErrorCode, detail: &str) {
        let name = self
            .context
            .directory()
            .name(source)
            .unwrap_or_else(|| source.to_string());
        let (class, branch) = self.classify(source, code);
        match (class, branch) {
            (FaultClass::RecoverableSource, Some(branch)) => {
                tracing::warn!("[{}] {} ({}), resetting {}", name, code, detail, branch);
                self.recover(branch, is_server_error(detail));
            }
            (FaultClass::Advisory, _) => {
                tracing::warn!(
                    "[{}] {} ({}); the camera may not support the requested format",
                    name,
                    code,
                    detail
                );
            }
            _ => {
                tracing::error!("[{}] {}: {}", name, code, detail);
                self.context.shutdown().record_fatal();
            }
        }
    }

    /// Reset one branch asynchronously. A reset already in flight absorbs
    /// further errors from the same branch unless `force` is set.
    fn recover(&self, branch: BranchId, force: bool) {
        let Some(target) = self.targets.get(&branch) else {
            return;
        };
        if !target.status.try_begin_recovery() {
            if !force {
                tracing::debug!("[{}] reset already in progress", target.name);
                return;
            }
            tracing::info!("[{}] server error during reset, resetting again", target.name);
            target.status.join_recovery();
        }

        let name = target.name.clone();
        let stages = target.stages.clone();
        let status = target.status.clone();
        let tracker = self.tracker.clone();
        let shutdown = self.context.shutdown().clone();

        let spawned = std::thread::Builder::new()
            .name(format!("reset-{}", name))
            .spawn(move || {
                let Some(stages) = stages.upgrade() else {
                    status.finish_recovery();
                    return;
                };
                let mut failed = false;
                {
                    let mut stages = stages.lock();
                    // Read under the lock so a pause applied meanwhile wins.
                    let resume = if tracker.target().is_flowing() {
                        StageState::Running
                    } else {
                        StageState::Paused
                    };
                    for instance in stages.iter_mut() {
                        if let Err(e) = instance
                            .stage
                            .reset()
                            .and_then(|()| instance.stage.set_state(resume))
                        {
                            tracing::error!("[{}] reset of {} failed: {}", name, instance.name, e);
                            failed = true;
                        }
                    }
                }
                status.finish_recovery();
                if failed {
                    shutdown.record_fatal();
                } else {
                    tracing::info!("[{}] reset complete", name);
                }
            });

        if let Err(e) = spawned {
            tracing::error!("[{}] could not spawn reset thread: {}", target.name, e);
            target.status.finish_recovery();
            self.context.shutdown().record_fatal();
        }
    }

    /// Handle everything already queued, on the calling thread.
    pub fn drain(&self, events: &EventReceiver) -> usize {
        let mut handled = 0;
        while let Ok(event) = events.try_recv() {
            self.handle(event);
            handled += 1;
        }
        handled
    }

    /// Run the consumer loop on its own thread.
    pub(crate) fn spawn(self: Arc<Self>) -> std::io::Result<MonitorHandle> {
        let events = self.context.event_receiver();
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let thread = std::thread::Builder::new()
            .name(format!("monitor-{}", self.context.instance()))
            .spawn(move || {
                tracing::debug!("[monitor-{}] started", self.context.instance());
                loop {
                    crossbeam_channel::select! {
                        recv(stop_rx) -> _ => break,
                        recv(events) -> msg => match msg {
                            Ok(event) => self.handle(event),
                            Err(_) => break,
                        },
                    }
                }
                tracing::debug!("[monitor-{}] stopped", self.context.instance());
            })?;
        Ok(MonitorHandle {
            stop_tx,
            thread: Some(thread),
        })
    }
}

impl std::fmt::Debug for EventMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventMonitor")
            .field("instance", &self.context.instance())
            .field("branches", &self.targets.len())
            .finish()
    }
}

/// RTSP servers report a failed session setup this way.
fn is_server_error(detail: &str) -> bool {
    detail.contains("500 (Internal Server Error)") || detail.contains("500 Internal Server Error")
}

/// Running monitor thread.
pub(crate) struct MonitorHandle {
    stop_tx: Sender<()>,
    thread: Option<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Stop the loop and wait for it; events still queued stay queued.
    pub(crate) fn stop(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("monitor thread panicked");
            }
        }
    }
}

impl Drop for MonitorHandle {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::config::SourceType;
    use crate::core::context::StageParent;
    use crate::core::error::StageError;
    use crate::core::stages::{Stage, StageKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::{Duration, Instant};

    struct SlowReset {
        resets: Arc<AtomicUsize>,
        states: Arc<Mutex<Vec<StageState>>>,
    }
    impl Stage for SlowReset {
        fn reset(&mut self) -> Result<(), StageError> {
            std::thread::sleep(Duration::from_millis(100));
            self.resets.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn set_state(&mut self, state: StageState) -> Result<(), StageError> {
            self.states.lock().push(state);
            Ok(())
        }
    }

    struct Fixture {
        context: Arc<GraphContext>,
        monitor: EventMonitor,
        stages: Vec<Arc<Mutex<Vec<StageInstance>>>>,
        statuses: BTreeMap<&'static str, Arc<BranchStatus>>,
        stage_ids: BTreeMap<&'static str, StageId>,
        resets: Arc<AtomicUsize>,
        states: Arc<Mutex<Vec<StageState>>>,
        tracker: Arc<TransitionTracker>,
    }

    fn wait_for_resets(status: &BranchStatus, n: u64) {
        let deadline = Instant::now() + Duration::from_secs(5);
        while (status.resets() < n || status.is_recovering()) && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
    }

    fn fixture() -> Fixture {
        let context = Arc::new(GraphContext::new(0));
        let resets = Arc::new(AtomicUsize::new(0));
        let states = Arc::new(Mutex::new(Vec::new()));
        let roles = [
            ("rtsp", BranchRole::Source { source_id: 0, source_type: SourceType::Rtsp }),
            ("camera", BranchRole::Source { source_id: 1, source_type: SourceType::Camera }),
            ("analytics", BranchRole::Analytics),
        ];
        let mut targets = BTreeMap::new();
        let mut stages = Vec::new();
        let mut statuses = BTreeMap::new();
        let mut stage_ids = BTreeMap::new();
        for (index, (name, role)) in roles.into_iter().enumerate() {
            let branch = BranchId::new(index as u32);
            let id = context.directory().allocate(name, StageParent::Branch(branch));
            let handle = Arc::new(Mutex::new(vec![StageInstance::new(
                id,
                StageKind::Source,
                name.to_string(),
                Box::new(SlowReset {
                    resets: resets.clone(),
                    states: states.clone(),
                }),
            )]));
            let status = Arc::new(BranchStatus::default());
            targets.insert(
                branch,
                RecoveryTarget {
                    name: name.to_string(),
                    role,
                    status: status.clone(),
                    stages: Arc::downgrade(&handle),
                },
            );
            stages.push(handle);
            statuses.insert(name, status);
            stage_ids.insert(name, id);
        }
        let tracker = Arc::new(TransitionTracker::new(Vec::new(), context.events()));
        let monitor = EventMonitor::new(context.clone(), targets, tracker.clone());
        Fixture {
            context,
            monitor,
            stages,
            statuses,
            stage_ids,
            resets,
            states,
            tracker,
        }
    }

    #[test]
    fn test_classification() {
        let f = fixture();
        let rtsp = f.stage_ids["rtsp"];
        let child = f
            .context
            .directory()
            .allocate("depay", StageParent::Stage(rtsp));
        assert_eq!(
            f.monitor.classify(child, StageErrorCode::ResourceRead).0,
            FaultClass::RecoverableSource
        );
        assert_eq!(
            f.monitor
                .classify(f.stage_ids["camera"], StageErrorCode::NotNegotiated)
                .0,
            FaultClass::Advisory
        );
        assert_eq!(
            f.monitor
                .classify(f.stage_ids["camera"], StageErrorCode::ResourceRead)
                .0,
            FaultClass::Fatal
        );
        assert_eq!(
            f.monitor
                .classify(f.stage_ids["analytics"], StageErrorCode::Internal)
                .0,
            FaultClass::Fatal
        );
    }

    #[test]
    fn test_quick_errors_trigger_single_reset() {
        let f = fixture();
        let error = || GraphEvent::Error {
            source: f.stage_ids["rtsp"],
            code: StageErrorCode::ResourceRead,
            detail: "connection lost".into(),
        };
        f.monitor.handle(error());
        f.monitor.handle(error());

        let status = &f.statuses["rtsp"];
        let deadline = Instant::now() + Duration::from_secs(5);
        while status.resets() == 0 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(status.resets(), 1);
        assert_eq!(f.resets.load(Ordering::SeqCst), 1);
        assert!(!f.context.shutdown().is_fatal());
        assert_eq!(f.stages.len(), 3);
    }

    #[test]
    fn test_server_error_resets_again_during_reset() {
        let f = fixture();
        let error = |detail: &str| GraphEvent::Error {
            source: f.stage_ids["rtsp"],
            code: StageErrorCode::ResourceRead,
            detail: detail.into(),
        };
        f.monitor.handle(error("connection lost"));
        f.monitor.handle(error("Unhandled error: 500 (Internal Server Error)"));

        let status = &f.statuses["rtsp"];
        wait_for_resets(status, 2);
        assert_eq!(status.resets(), 2);
        assert_eq!(f.resets.load(Ordering::SeqCst), 2);
        assert!(!status.is_recovering());
        assert!(!f.context.shutdown().is_fatal());
    }

    #[test]
    fn test_reset_honors_pause_requested_while_waiting() {
        let f = fixture();
        f.tracker.begin(LifecycleState::Running);

        // Hold the branch as a worker would mid-transition.
        let guard = f.stages[0].lock();
        f.monitor.handle(GraphEvent::Error {
            source: f.stage_ids["rtsp"],
            code: StageErrorCode::ResourceRead,
            detail: "connection lost".into(),
        });
        std::thread::sleep(Duration::from_millis(50));
        f.tracker.begin(LifecycleState::Paused);
        drop(guard);

        wait_for_resets(&f.statuses["rtsp"], 1);
        assert_eq!(*f.states.lock(), vec![StageState::Paused]);
    }

    #[test]
    fn test_fatal_error_requests_quit() {
        let f = fixture();
        f.monitor.handle(GraphEvent::Error {
            source: f.stage_ids["analytics"],
            code: StageErrorCode::Internal,
            detail: "inference engine missing".into(),
        });
        assert!(f.context.shutdown().is_fatal());
        assert!(f.context.shutdown().quit_requested());
        assert_eq!(f.context.shutdown().exit_status(), FATAL_EXIT_STATUS);
    }

    #[test]
    fn test_graph_eos_and_stop() {
        let f = fixture();
        f.monitor.handle(GraphEvent::EndOfStream {
            origin: EventOrigin::Graph,
        });
        assert!(f.context.shutdown().quit_requested());
        assert!(!f.context.shutdown().is_fatal());

        f.context.post(GraphEvent::StateChanged {
            origin: EventOrigin::Graph,
            old: LifecycleState::Draining,
            new: LifecycleState::Stopped,
        });
        assert_eq!(f.monitor.drain(&f.context.event_receiver()), 1);
        assert!(f.context.shutdown().is_stopped());
    }
}
