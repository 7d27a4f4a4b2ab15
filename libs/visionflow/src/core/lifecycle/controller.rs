// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Lifecycle controller: owns a built graph and drives it through
//! Ready → Paused → Running → Draining → Stopped.
//!
//! Teardown runs in fixed phases: end-of-stream at every source, a short
//! grace period for terminal branches to drain, a synchronous drain of the
//! event queue, then a forced stop of every worker under a deadline.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;

use crate::core::error::LifecycleError;
use crate::core::execution::{ControlMessage, run_branch_loop};
use crate::core::graph::{BranchId, BranchRole, Graph};
use crate::core::monitor::{EventMonitor, MonitorHandle, RecoveryTarget, ShutdownSignal};
use crate::core::observability::PerfSampler;
use crate::core::stages::StageState;

use super::state::{BranchState, LifecycleAction, LifecycleState};

/// Bound on waiting for an in-flight transition before reporting Busy.
const STATE_QUERY_TIMEOUT: Duration = Duration::from_millis(5);

/// How long `start()` waits for every branch to reach Paused.
const START_TIMEOUT: Duration = Duration::from_secs(2);

/// Grace period for end-of-stream to reach terminal branches.
const EOS_GRACE: Duration = Duration::from_millis(100);

/// Deadline for workers to exit once told to stop.
const TEARDOWN_DEADLINE: Duration = Duration::from_secs(1);

const JOIN_POLL_INTERVAL: Duration = Duration::from_millis(5);

struct WorkerHandle {
    branch: BranchId,
    name: String,
    control: Sender<ControlMessage>,
    thread: Option<JoinHandle<()>>,
}

pub struct LifecycleController {
    graph: Graph,
    monitor: Arc<EventMonitor>,
    monitor_handle: Option<MonitorHandle>,
    workers: Vec<WorkerHandle>,
    sampler: Option<PerfSampler>,
}

impl LifecycleController {
    pub fn new(graph: Graph) -> Self {
        let targets: BTreeMap<_, _> = graph
            .branches()
            .iter()
            .map(|b| {
                (
                    b.id(),
                    RecoveryTarget {
                        name: b.name().to_string(),
                        role: b.role(),
                        status: b.status().clone(),
                        stages: Arc::downgrade(&b.stage_handle()),
                    },
                )
            })
            .collect();
        let monitor = Arc::new(EventMonitor::new(
            graph.context.clone(),
            targets,
            graph.tracker.clone(),
        ));
        Self {
            graph,
            monitor,
            monitor_handle: None,
            workers: Vec::new(),
            sampler: None,
        }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn state(&self) -> LifecycleState {
        self.graph.tracker.current()
    }

    /// Block until `state` is reached or `timeout` passes.
    pub fn wait_for_state(&self, state: LifecycleState, timeout: Duration) -> bool {
        self.graph.tracker.wait_for(state, timeout)
    }

    pub fn shutdown_signal(&self) -> &Arc<ShutdownSignal> {
        self.graph.context.shutdown()
    }

    /// 0 after a clean run, non-zero once any unrecoverable error occurred.
    pub fn exit_status(&self) -> i32 {
        self.shutdown_signal().exit_status()
    }

    /// Spawn the monitor and one worker per branch; the graph comes up Paused.
    ///
    /// Returns [`LifecycleError::StartTimeout`] if the branches have not all
    /// reached Paused within the start deadline. The workers stay up in that
    /// case: wait on [`wait_for_state`](Self::wait_for_state) before calling
    /// [`run`](Self::run), or [`stop`](Self::stop) the graph.
    pub fn start(&mut self) -> Result<(), LifecycleError> {
        let from = self.graph.tracker.query(STATE_QUERY_TIMEOUT)?;
        let next = from
            .transition(LifecycleAction::Start)
            .ok_or(LifecycleError::IllegalTransition {
                from,
                action: LifecycleAction::Start.as_str(),
            })?;

        let instance = self.graph.instance();
        tracing::info!("[graph-{}] starting {} branches", instance, self.graph.branches().len());

        self.monitor_handle = Some(self.monitor.clone().spawn().map_err(|e| LifecycleError::Spawn {
            branch: format!("monitor-{}", instance),
            reason: e.to_string(),
        })?);

        self.graph.tracker.begin(next);

        let mut failure = None;
        for branch in self.graph.branches() {
            let (control_tx, control_rx) = crossbeam_channel::unbounded();
            let worker = self.graph.worker(branch, control_rx);
            let spawned = std::thread::Builder::new()
                .name(format!("vf{}-{}", instance, branch.name()))
                .spawn(move || run_branch_loop(worker));
            match spawned {
                Ok(thread) => self.workers.push(WorkerHandle {
                    branch: branch.id(),
                    name: branch.name().to_string(),
                    control: control_tx,
                    thread: Some(thread),
                }),
                Err(e) => {
                    failure = Some(LifecycleError::Spawn {
                        branch: branch.name().to_string(),
                        reason: e.to_string(),
                    });
                    break;
                }
            }
        }
        if let Some(error) = failure {
            tracing::error!("[graph-{}] {}", instance, error);
            self.force_stop();
            if let Some(mut handle) = self.monitor_handle.take() {
                handle.stop();
            }
            self.graph.tracker.force(LifecycleState::Stopped);
            return Err(error);
        }

        if let Some(perf) = &self.graph.perf {
            if let Some(callback) = perf.callback.clone() {
                match PerfSampler::spawn(instance, perf.counters.clone(), perf.interval, callback) {
                    Ok(sampler) => self.sampler = Some(sampler),
                    Err(e) => tracing::warn!("[graph-{}] performance sampling disabled: {}", instance, e),
                }
            }
        }

        if !self.graph.tracker.wait_for(LifecycleState::Paused, START_TIMEOUT) {
            let error = LifecycleError::StartTimeout {
                state: self.graph.tracker.current(),
                waited: START_TIMEOUT,
            };
            tracing::warn!("[graph-{}] {}", instance, error);
            return Err(error);
        }
        Ok(())
    }

    /// Request Running. Does not wait; see [`wait_for_state`](Self::wait_for_state).
    pub fn run(&self) -> Result<(), LifecycleError> {
        self.request(LifecycleAction::Run)?;
        if let Some(sampler) = &self.sampler {
            sampler.resume();
        }
        Ok(())
    }

    /// Request Paused. Does not wait.
    pub fn pause(&self) -> Result<(), LifecycleError> {
        self.request(LifecycleAction::Pause)?;
        if let Some(sampler) = &self.sampler {
            sampler.pause();
        }
        Ok(())
    }

    fn request(&self, action: LifecycleAction) -> Result<LifecycleState, LifecycleError> {
        let from = self.graph.tracker.query(STATE_QUERY_TIMEOUT)?;
        let next = from.transition(action).ok_or(LifecycleError::IllegalTransition {
            from,
            action: action.as_str(),
        })?;
        tracing::debug!("[graph-{}] {} requested ({} -> {})", self.graph.instance(), action.as_str(), from, next);
        self.graph.tracker.begin(next);
        Ok(next)
    }

    /// Drain and stop the graph. Returns once every branch is Stopped or
    /// abandoned; never blocks past the teardown deadline.
    pub fn stop(&mut self) -> Result<(), LifecycleError> {
        // An in-flight pause/run does not block stopping.
        let from = match self.graph.tracker.current() {
            // Start timed out with workers already up.
            LifecycleState::Ready if !self.workers.is_empty() => LifecycleState::Paused,
            state => state,
        };
        let draining = from
            .transition(LifecycleAction::Stop)
            .ok_or(LifecycleError::IllegalTransition {
                from,
                action: LifecycleAction::Stop.as_str(),
            })?;
        let instance = self.graph.instance();
        tracing::info!("[graph-{}] stopping", instance);

        self.graph.tracker.force(draining);
        if let Some(sampler) = &self.sampler {
            sampler.pause();
        }

        // Phase 1: end-of-stream at every source entry.
        for worker in &self.workers {
            let is_source = self
                .graph
                .branch(worker.branch)
                .is_some_and(|b| matches!(b.role(), BranchRole::Source { .. }));
            if is_source {
                let _ = worker.control.send(ControlMessage::EndOfStream);
            }
        }
        if self.graph.eos.wait_all(EOS_GRACE) {
            tracing::debug!("[graph-{}] drained", instance);
        } else {
            tracing::debug!("[graph-{}] drain incomplete after {:?}", instance, EOS_GRACE);
        }

        // Phase 2: stop the monitor and classify what is still queued.
        if let Some(mut handle) = self.monitor_handle.take() {
            handle.stop();
        }
        let events = self.graph.context.event_receiver();
        self.monitor.drain(&events);

        // Phase 3: forced teardown under a deadline.
        self.force_stop();

        // Phase 4: publish Stopped and release waiters.
        self.graph.tracker.force(LifecycleState::Stopped);
        self.monitor.drain(&events);
        if let Some(sampler) = self.sampler.take() {
            sampler.stop();
        }
        tracing::info!("[graph-{}] stopped (exit status {})", instance, self.exit_status());
        Ok(())
    }

    fn force_stop(&mut self) {
        for worker in &self.workers {
            if let Some(branch) = self.graph.branch(worker.branch) {
                branch.status().request_shutdown();
            }
            let _ = worker.control.send(ControlMessage::Shutdown);
        }

        let deadline = Instant::now() + TEARDOWN_DEADLINE;
        loop {
            for worker in &mut self.workers {
                if !worker.thread.as_ref().is_some_and(|t| t.is_finished()) {
                    continue;
                }
                if let Some(thread) = worker.thread.take() {
                    if thread.join().is_err() {
                        tracing::error!("[{}] worker panicked", worker.name);
                        if let Some(branch) = self.graph.branch(worker.branch) {
                            branch.status().set_state(BranchState::Stopped);
                        }
                    }
                }
            }
            if self.workers.iter().all(|w| w.thread.is_none()) || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(JOIN_POLL_INTERVAL);
        }

        for worker in &mut self.workers {
            let Some(thread) = worker.thread.take() else {
                continue;
            };
            tracing::warn!("[{}] did not stop within {:?}; abandoned", worker.name, TEARDOWN_DEADLINE);
            drop(thread);
            let Some(branch) = self.graph.branch(worker.branch) else {
                continue;
            };
            let stages = branch.stage_handle();
            match stages.try_lock_for(JOIN_POLL_INTERVAL) {
                Some(mut stages) => {
                    for instance in stages.iter_mut() {
                        let _ = instance.stage.set_state(StageState::Stopped);
                    }
                }
                None => tracing::warn!("[{}] stages still busy, left to the worker", worker.name),
            }
            branch.status().set_state(BranchState::Stopped);
        }
        self.workers.clear();
    }
}

impl Drop for LifecycleController {
    fn drop(&mut self) {
        if self.state().has_workers() {
            if let Err(e) = self.stop() {
                tracing::warn!("[graph-{}] stop on drop failed: {}", self.graph.instance(), e);
            }
        }
    }
}

impl std::fmt::Debug for LifecycleController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LifecycleController")
            .field("state", &self.state())
            .field("workers", &self.workers.len())
            .finish()
    }
}
