// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Branch thread runner.
//!
//! Each branch runs on its own worker thread. The loop shape depends on the
//! branch role: sources poll their stage for frames, the mux batches frames
//! into data units, every other branch reacts to units arriving on its inbox.

use std::cell::Cell;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, SendTimeoutError, Sender};
use parking_lot::Mutex;

use crate::core::events::{EventSender, GraphEvent};
use crate::core::graph::{BranchId, BranchRole, BranchStatus, Outlet, StageInstance};
use crate::core::hooks::{HookRegistry, Port};
use crate::core::lifecycle::{BranchState, LifecycleState, TransitionTracker};
use crate::core::metadata::{DataUnit, FrameMeta, SourceId};
use crate::core::stages::{SourcePoll, StageState};

use super::batcher::{Batcher, MuxSettings};
use super::eos::EosTracker;
use super::messages::{BranchMessage, ControlMessage};

/// Duration to sleep when paused (avoids busy-waiting).
const PAUSE_CHECK_INTERVAL: Duration = Duration::from_millis(10);

/// Source poll returned no frame yet.
const SOURCE_IDLE_INTERVAL: Duration = Duration::from_millis(2);

/// Back-off after a source error, so a broken input does not flood the monitor.
const SOURCE_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Everything a worker thread needs, moved onto the thread at spawn.
pub(crate) struct BranchWorker {
    pub(crate) id: BranchId,
    pub(crate) name: String,
    pub(crate) role: BranchRole,
    pub(crate) instance: usize,
    pub(crate) stages: Arc<Mutex<Vec<StageInstance>>>,
    pub(crate) inbox: Receiver<BranchMessage>,
    pub(crate) outlet: Outlet,
    pub(crate) control: Receiver<ControlMessage>,
    pub(crate) status: Arc<BranchStatus>,
    pub(crate) tracker: Arc<TransitionTracker>,
    pub(crate) hooks: Arc<HookRegistry>,
    pub(crate) events: EventSender,
    pub(crate) eos: Arc<EosTracker>,
    pub(crate) batching: Option<MuxSettings>,
    pub(crate) acked: Cell<Option<BranchState>>,
}

/// What the loop should do after handling one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Flow {
    Continue,
    Exit,
}

/// Run the branch worker main loop until shutdown.
pub(crate) fn run_branch_loop(worker: BranchWorker) {
    tracing::info!("[{}] Thread started ({})", worker.name, worker.role.as_str());

    match (worker.role, worker.batching.clone()) {
        (BranchRole::Source { source_id, .. }, _) => worker.run_source(source_id),
        (_, Some(settings)) => worker.run_mux(settings),
        _ => worker.run_element(),
    }

    tracing::trace!("[{}] Exited worker loop, calling teardown", worker.name);

    // Teardown
    {
        let mut stages = worker.stages.lock();
        for instance in stages.iter_mut() {
            if let Err(e) = instance.stage.set_state(StageState::Stopped) {
                tracing::warn!("[{}] Teardown error in {}: {}", worker.name, instance.name, e);
            }
        }
    }

    worker.status.set_state(BranchState::Stopped);
    worker.tracker.acknowledge();
    tracing::debug!("[{}] Thread stopped", worker.name);
}

impl BranchWorker {
    fn is_terminal(&self) -> bool {
        self.outlet.consumers() == 0
    }

    /// Follow the graph target state, acknowledging changes.
    fn sync_state(&self) -> BranchState {
        let desired = match self.tracker.target() {
            LifecycleState::Paused => BranchState::Paused,
            LifecycleState::Running | LifecycleState::Draining => BranchState::Running,
            LifecycleState::Stopped => BranchState::Stopped,
            LifecycleState::Uninitialized | LifecycleState::Ready => BranchState::Idle,
        };
        if self.acked.get() == Some(desired) {
            return desired;
        }

        let stage_state = match desired {
            BranchState::Running => StageState::Running,
            BranchState::Stopped => StageState::Stopped,
            BranchState::Paused | BranchState::Idle => StageState::Paused,
        };
        {
            let mut stages = self.stages.lock();
            for instance in stages.iter_mut() {
                if let Err(e) = instance.stage.set_state(stage_state) {
                    tracing::warn!(
                        "[{}] {} rejected state {:?}: {}",
                        self.name,
                        instance.name,
                        stage_state,
                        e
                    );
                }
            }
        }

        self.status.set_state(desired);
        self.acked.set(Some(desired));
        self.tracker.acknowledge();
        tracing::debug!("[{}] now {:?}", self.name, desired);
        desired
    }

    /// Shared gate at the top of every loop iteration.
    fn gate(&self) -> Option<Flow> {
        if self.status.shutdown_requested() {
            return Some(Flow::Exit);
        }
        match self.sync_state() {
            BranchState::Stopped => Some(Flow::Exit),
            BranchState::Running => None,
            BranchState::Paused | BranchState::Idle => {
                tracing::trace!("[{}] Paused", self.name);
                std::thread::sleep(PAUSE_CHECK_INTERVAL);
                Some(Flow::Continue)
            }
        }
    }

    fn run_source(&self, source_id: SourceId) {
        let mut ended = false;
        loop {
            match self.gate() {
                Some(Flow::Exit) => break,
                Some(Flow::Continue) => continue,
                None => {}
            }

            match self.control.try_recv() {
                Ok(ControlMessage::EndOfStream) => {
                    if !ended {
                        tracing::info!("[{}] end of stream injected", self.name);
                        ended = true;
                        if self.forward_eos(Some(source_id)) == Flow::Exit {
                            break;
                        }
                    }
                }
                Ok(ControlMessage::Shutdown) | Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    break;
                }
                Err(crossbeam_channel::TryRecvError::Empty) => {}
            }

            if ended {
                crossbeam_channel::select! {
                    recv(self.control) -> msg => {
                        if !matches!(msg, Ok(ControlMessage::EndOfStream)) {
                            break;
                        }
                    }
                    default(PAUSE_CHECK_INTERVAL) => {}
                }
                continue;
            }

            let polled = self
                .stages
                .lock()
                .first_mut()
                .map(|instance| (instance.id, instance.stage.poll_frame()));

            match polled {
                Some((_, Ok(SourcePoll::Frame(mut frame)))) => {
                    frame.source_id = source_id;
                    if self.send_frame(frame) == Flow::Exit {
                        break;
                    }
                }
                Some((_, Ok(SourcePoll::Pending))) => std::thread::sleep(SOURCE_IDLE_INTERVAL),
                Some((_, Ok(SourcePoll::EndOfStream))) | None => {
                    tracing::info!("[{}] input exhausted", self.name);
                    ended = true;
                    if self.forward_eos(Some(source_id)) == Flow::Exit {
                        break;
                    }
                }
                Some((stage, Err(e))) => {
                    tracing::warn!("[{}] source error: {}", self.name, e);
                    let _ = self.events.send(GraphEvent::Error {
                        source: stage,
                        code: e.code,
                        detail: e.detail,
                    });
                    std::thread::sleep(SOURCE_ERROR_BACKOFF);
                }
            }
        }
    }

    fn run_mux(&self, settings: MuxSettings) {
        tracing::debug!(
            "[{}] batching up to {} frames, timeout {:?}",
            self.name,
            settings.batch_size,
            settings.batch_timeout
        );
        let mut batcher = Batcher::new(settings);
        loop {
            match self.gate() {
                Some(Flow::Exit) => break,
                Some(Flow::Continue) => continue,
                None => {}
            }

            let wait = batcher.wait_time(Instant::now(), PAUSE_CHECK_INTERVAL);
            let flow = crossbeam_channel::select! {
                recv(self.control) -> msg => match msg {
                    Ok(ControlMessage::EndOfStream) => Flow::Continue,
                    Ok(ControlMessage::Shutdown) | Err(_) => Flow::Exit,
                },
                recv(self.inbox) -> msg => match msg {
                    Ok(BranchMessage::Frame(frame)) => {
                        let ready = batcher.push(frame, Instant::now());
                        self.emit_all(ready)
                    }
                    Ok(BranchMessage::Unit(unit)) => {
                        tracing::warn!("[{}] unexpected unit {} upstream of batching", self.name, unit.sequence());
                        Flow::Continue
                    }
                    Ok(BranchMessage::EndOfStream { source }) => {
                        if batcher.end_source(source) {
                            let rest: Vec<_> = batcher.flush().into_iter().collect();
                            if self.emit_all(rest) == Flow::Exit {
                                Flow::Exit
                            } else {
                                tracing::info!("[{}] all sources ended", self.name);
                                self.forward_eos(None)
                            }
                        } else {
                            Flow::Continue
                        }
                    }
                    Err(_) => Flow::Exit,
                },
                default(wait) => {
                    let due: Vec<_> = batcher.poll_timeout(Instant::now()).into_iter().collect();
                    self.emit_all(due)
                }
            };
            if flow == Flow::Exit {
                break;
            }
        }
    }

    fn run_element(&self) {
        tracing::debug!("[{}] waiting for input data...", self.name);
        loop {
            match self.gate() {
                Some(Flow::Exit) => break,
                Some(Flow::Continue) => continue,
                None => {}
            }

            let flow = crossbeam_channel::select! {
                recv(self.control) -> msg => match msg {
                    Ok(ControlMessage::EndOfStream) => Flow::Continue,
                    Ok(ControlMessage::Shutdown) | Err(_) => Flow::Exit,
                },
                recv(self.inbox) -> msg => match msg {
                    Ok(BranchMessage::Unit(unit)) => match self.run_stages(unit) {
                        Some(unit) => self.deliver(unit),
                        None => Flow::Continue,
                    },
                    Ok(BranchMessage::EndOfStream { source }) => self.forward_eos(source),
                    Ok(BranchMessage::Frame(frame)) => {
                        tracing::warn!(
                            "[{}] unbatched frame {} from source {} dropped",
                            self.name,
                            frame.frame_number,
                            frame.source_id
                        );
                        Flow::Continue
                    }
                    Err(_) => Flow::Exit,
                },
                default(PAUSE_CHECK_INTERVAL) => Flow::Continue,
            };
            if flow == Flow::Exit {
                break;
            }
        }
    }

    fn emit_all(&self, units: Vec<DataUnit>) -> Flow {
        for unit in units {
            if let Some(unit) = self.run_stages(Arc::new(unit)) {
                if self.deliver(unit) == Flow::Exit {
                    return Flow::Exit;
                }
            }
        }
        Flow::Continue
    }

    /// Run the unit through every stage, firing hooks at each port. A stage
    /// error is posted to the monitor and the unit is dropped.
    fn run_stages(&self, mut unit: Arc<DataUnit>) -> Option<Arc<DataUnit>> {
        let mut stages = self.stages.lock();
        for (index, instance) in stages.iter_mut().enumerate() {
            self.hooks
                .fire(self.id, Port::input(index), self.instance, &mut unit);
            if let Err(e) = instance.stage.process(Arc::make_mut(&mut unit)) {
                tracing::warn!(
                    "[{}] {} failed on unit {}: {}",
                    self.name,
                    instance.name,
                    unit.sequence(),
                    e
                );
                let _ = self.events.send(GraphEvent::Error {
                    source: instance.id,
                    code: e.code,
                    detail: e.detail,
                });
                return None;
            }
            self.hooks
                .fire(self.id, Port::output(index), self.instance, &mut unit);
        }
        Some(unit)
    }

    fn deliver(&self, unit: Arc<DataUnit>) -> Flow {
        match &self.outlet {
            Outlet::Terminal => Flow::Continue,
            Outlet::Forward(tx) => self.send_to(tx, BranchMessage::Unit(unit)),
            Outlet::FanOut(txs) => {
                let Some((last, rest)) = txs.split_last() else {
                    return Flow::Continue;
                };
                for tx in rest {
                    if self.send_to(tx, BranchMessage::Unit(unit.clone())) == Flow::Exit {
                        return Flow::Exit;
                    }
                }
                self.send_to(last, BranchMessage::Unit(unit))
            }
            Outlet::Split(routes) => {
                for (source_id, part) in unit.split_by_source() {
                    match routes.get(&source_id) {
                        Some(tx) => {
                            if self.send_to(tx, BranchMessage::Unit(Arc::new(part))) == Flow::Exit {
                                return Flow::Exit;
                            }
                        }
                        None => tracing::trace!(
                            "[{}] no branch for source {}, frame dropped",
                            self.name,
                            source_id
                        ),
                    }
                }
                Flow::Continue
            }
        }
    }

    fn forward_eos(&self, source: Option<SourceId>) -> Flow {
        if self.is_terminal() {
            self.eos.reached(self.id);
            return Flow::Continue;
        }
        let message = BranchMessage::EndOfStream { source };
        match &self.outlet {
            Outlet::Terminal => Flow::Continue,
            Outlet::Forward(tx) => self.send_to(tx, message),
            Outlet::FanOut(txs) => self.broadcast(txs.iter(), message),
            Outlet::Split(routes) => self.broadcast(routes.values(), message),
        }
    }

    fn broadcast<'a>(
        &self,
        targets: impl Iterator<Item = &'a Sender<BranchMessage>>,
        message: BranchMessage,
    ) -> Flow {
        for tx in targets {
            if self.send_to(tx, message.clone()) == Flow::Exit {
                return Flow::Exit;
            }
        }
        Flow::Continue
    }

    fn send_frame(&self, frame: FrameMeta) -> Flow {
        match &self.outlet {
            Outlet::Forward(tx) => self.send_to(tx, BranchMessage::Frame(frame)),
            _ => {
                tracing::warn!(
                    "[{}] no mux link, frame {} dropped",
                    self.name,
                    frame.frame_number
                );
                Flow::Continue
            }
        }
    }

    /// Blocking send that stays responsive to shutdown and state changes
    /// while the downstream queue is full.
    fn send_to(&self, tx: &Sender<BranchMessage>, message: BranchMessage) -> Flow {
        let mut message = message;
        loop {
            match tx.send_timeout(message, PAUSE_CHECK_INTERVAL) {
                Ok(()) => return Flow::Continue,
                Err(SendTimeoutError::Timeout(m)) => {
                    if self.status.shutdown_requested() {
                        return Flow::Exit;
                    }
                    if self.sync_state() == BranchState::Stopped {
                        return Flow::Exit;
                    }
                    message = m;
                }
                Err(SendTimeoutError::Disconnected(_)) => {
                    tracing::debug!("[{}] downstream disconnected", self.name);
                    return Flow::Exit;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::context::{StageDirectory, StageParent};
    use crate::core::error::StageError;
    use crate::core::hooks::HookCallback;
    use crate::core::metadata::BatchMeta;
    use crate::core::stages::{Stage, StageKind};
    use std::collections::BTreeSet;

    struct Tag(&'static str);
    impl Stage for Tag {
        fn process(&mut self, unit: &mut DataUnit) -> Result<(), StageError> {
            for frame in unit.metadata_mut().frames_mut() {
                frame.objects.push(crate::core::metadata::ObjectMeta::new(
                    0,
                    self.0,
                    Default::default(),
                ));
            }
            Ok(())
        }
    }

    struct Harness {
        worker: BranchWorker,
        inbox_tx: Sender<BranchMessage>,
        _control_tx: Sender<ControlMessage>,
        out_rx: Receiver<BranchMessage>,
        events_rx: Receiver<GraphEvent>,
    }

    fn harness(stages: Vec<(&'static str, Box<dyn Stage>)>, batching: Option<MuxSettings>) -> Harness {
        let directory = StageDirectory::new();
        let id = BranchId::new(3);
        let instances = stages
            .into_iter()
            .map(|(name, stage)| {
                let sid = directory.allocate(name, StageParent::Branch(id));
                StageInstance::new(sid, StageKind::Converter, name.to_string(), stage)
            })
            .collect();
        let (inbox_tx, inbox) = crossbeam_channel::bounded(8);
        let (out_tx, out_rx) = crossbeam_channel::bounded(8);
        let (control_tx, control) = crossbeam_channel::unbounded();
        let (events, events_rx) = crossbeam_channel::unbounded();
        let status = Arc::new(BranchStatus::default());
        let tracker = Arc::new(TransitionTracker::new(vec![status.clone()], events.clone()));
        tracker.force(LifecycleState::Running);
        Harness {
            worker: BranchWorker {
                id,
                name: "test".into(),
                role: BranchRole::Analytics,
                instance: 0,
                stages: Arc::new(Mutex::new(instances)),
                inbox,
                outlet: Outlet::Forward(out_tx),
                control,
                status,
                tracker,
                hooks: Arc::new(HookRegistry::new()),
                events: events.clone(),
                eos: Arc::new(EosTracker::new(BTreeSet::new(), events)),
                batching,
                acked: Cell::new(None),
            },
            inbox_tx,
            _control_tx: control_tx,
            out_rx,
            events_rx,
        }
    }

    fn unit(sequence: u64) -> Arc<DataUnit> {
        let mut batch = BatchMeta::new();
        batch.insert(FrameMeta::new(0, sequence));
        Arc::new(DataUnit::new(sequence, batch))
    }

    #[test]
    fn test_stages_run_in_order_with_hooks_between() {
        let h = harness(
            vec![("a", Box::new(Tag("a"))), ("b", Box::new(Tag("b")))],
            None,
        );
        let seen = Arc::new(Mutex::new(Vec::new()));
        let s = seen.clone();
        h.worker.hooks.attach(
            h.worker.id,
            Port::output(0),
            HookCallback::observe(move |unit, _| {
                s.lock()
                    .extend(unit.metadata().objects().map(|o| o.label.clone()));
            }),
        );

        let out = h.worker.run_stages(unit(0)).expect("unit survives");
        let labels: Vec<_> = out.metadata().objects().map(|o| o.label.as_str()).collect();
        assert_eq!(labels, vec!["a", "b"]);
        assert_eq!(*seen.lock(), vec!["a".to_string()]);
    }

    #[test]
    fn test_stage_error_drops_unit_and_posts_event() {
        struct Broken;
        impl Stage for Broken {
            fn process(&mut self, _unit: &mut DataUnit) -> Result<(), StageError> {
                Err(StageError::internal("boom"))
            }
        }
        let h = harness(vec![("broken", Box::new(Broken))], None);
        assert!(h.worker.run_stages(unit(1)).is_none());
        assert!(matches!(h.events_rx.try_recv(), Ok(GraphEvent::Error { .. })));
    }

    #[test]
    fn test_mux_batches_and_forwards_eos() {
        let settings = MuxSettings {
            batch_size: 2,
            batch_timeout: Duration::from_secs(5),
            sources: [0, 1].into_iter().collect(),
        };
        let h = harness(vec![("mux", Box::new(Tag("m")))], Some(settings));
        h.inbox_tx.send(BranchMessage::Frame(FrameMeta::new(0, 0))).unwrap();
        h.inbox_tx.send(BranchMessage::Frame(FrameMeta::new(1, 0))).unwrap();
        h.inbox_tx.send(BranchMessage::Frame(FrameMeta::new(0, 1))).unwrap();
        h.inbox_tx.send(BranchMessage::EndOfStream { source: Some(0) }).unwrap();
        h.inbox_tx.send(BranchMessage::EndOfStream { source: Some(1) }).unwrap();

        let status = h.worker.status.clone();
        let thread = std::thread::spawn(move || run_branch_loop(h.worker));

        let first = h.out_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(first, BranchMessage::Unit(ref u) if u.metadata().len() == 2));
        let second = h.out_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(second, BranchMessage::Unit(ref u) if u.sequence() == 1));
        let third = h.out_rx.recv_timeout(Duration::from_secs(2)).unwrap();
        assert!(matches!(third, BranchMessage::EndOfStream { source: None }));

        status.request_shutdown();
        thread.join().unwrap();
        assert_eq!(status.state(), BranchState::Stopped);
    }
}
