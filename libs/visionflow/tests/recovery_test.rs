// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Fault handling: network sources reset in place, everything else is fatal.

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use common::{OverrideFactory, source, tiled_config};
use visionflow::core::{
    FATAL_EXIT_STATUS, FrameMeta, GraphBuilder, HookCallback, HookPoint, LifecycleController,
    LifecycleState, SourcePoll, SourceType, Stage, StageContext, StageError, StageErrorCode,
};

#[derive(Default)]
struct Probe {
    resetting: AtomicBool,
    resets: AtomicU64,
    frames_after_reset: AtomicU64,
}

/// Network source that drops its connection once, reporting the failure
/// twice from an internal receiver.
struct FlakyNetworkSource {
    ctx: StageContext,
    probe: Arc<Probe>,
    frame_number: u64,
    failed: bool,
}

impl Stage for FlakyNetworkSource {
    fn poll_frame(&mut self) -> Result<SourcePoll, StageError> {
        std::thread::sleep(Duration::from_millis(10));
        if self.frame_number == 10 && !self.failed {
            self.failed = true;
            let receiver = self.ctx.register_child("rtsp_receiver");
            self.ctx.post_error(receiver, StageErrorCode::ResourceRead, "connection reset");
            self.ctx.post_error(receiver, StageErrorCode::ResourceRead, "connection reset");
            return Ok(SourcePoll::Pending);
        }
        if self.failed {
            return Ok(SourcePoll::Pending);
        }
        if self.probe.resets.load(Ordering::SeqCst) > 0 {
            self.probe.frames_after_reset.fetch_add(1, Ordering::SeqCst);
        }
        let frame = FrameMeta::new(0, self.frame_number);
        self.frame_number += 1;
        Ok(SourcePoll::Frame(frame))
    }

    fn reset(&mut self) -> Result<(), StageError> {
        self.probe.resetting.store(true, Ordering::SeqCst);
        std::thread::sleep(Duration::from_millis(300));
        self.failed = false;
        self.frame_number = 11;
        self.probe.resets.fetch_add(1, Ordering::SeqCst);
        self.probe.resetting.store(false, Ordering::SeqCst);
        Ok(())
    }
}

/// Source whose reads fail every time.
struct BrokenSource;

impl Stage for BrokenSource {
    fn poll_frame(&mut self) -> Result<SourcePoll, StageError> {
        Err(StageError::new(StageErrorCode::Stream, "corrupt container"))
    }
}

/// Camera that cannot negotiate its capture format once.
struct PickyCamera {
    ctx: StageContext,
    complained: bool,
}

impl Stage for PickyCamera {
    fn poll_frame(&mut self) -> Result<SourcePoll, StageError> {
        if !self.complained {
            self.complained = true;
            self.ctx.post_error(self.ctx.id(), StageErrorCode::NotNegotiated, "no common caps");
        }
        std::thread::sleep(Duration::from_millis(10));
        Ok(SourcePoll::Pending)
    }
}

fn wait_until(timeout: Duration, cond: impl Fn() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}

#[test]
fn test_network_source_reset_keeps_other_inputs_flowing() {
    let probe = Arc::new(Probe::default());
    let stage_probe = probe.clone();
    let factory = OverrideFactory::new()
        .with("source_bin_0", move |_, ctx| {
            Box::new(FlakyNetworkSource {
                ctx: ctx.clone(),
                probe: stage_probe.clone(),
                frame_number: 0,
                failed: false,
            })
        })
        .shared();

    let mut cfg = tiled_config(2, 100, None);
    cfg.sources[0] = source(SourceType::Rtsp, 100, None);
    let graph = GraphBuilder::new(factory).build(&cfg).unwrap();

    let during_reset = Arc::new(AtomicU64::new(0));
    let (counter, flag) = (during_reset.clone(), probe.clone());
    graph.attach_at(
        HookPoint::PreSink,
        HookCallback::observe(move |unit, _| {
            if flag.resetting.load(Ordering::SeqCst) && unit.metadata().contains(1) {
                counter.fetch_add(1, Ordering::SeqCst);
            }
        }),
    );
    let status = graph.source_branch(0).unwrap().status().clone();

    let mut controller = LifecycleController::new(graph);
    controller.start().unwrap();
    controller.run().unwrap();

    assert!(wait_until(Duration::from_secs(3), || {
        status.resets() == 1 && !status.is_recovering()
    }));
    assert!(wait_until(Duration::from_secs(2), || {
        probe.frames_after_reset.load(Ordering::SeqCst) > 0
    }));

    assert_eq!(status.resets(), 1);
    assert_eq!(probe.resets.load(Ordering::SeqCst), 1);
    assert!(during_reset.load(Ordering::SeqCst) > 0);
    assert!(!controller.shutdown_signal().quit_requested());
    assert_eq!(controller.state(), LifecycleState::Running);

    controller.stop().unwrap();
    assert_eq!(controller.exit_status(), 0);
}

#[test]
fn test_file_source_error_is_fatal() {
    let factory = OverrideFactory::new()
        .with("source_bin_1", |_, _| Box::new(BrokenSource))
        .shared();
    let graph = GraphBuilder::new(factory)
        .build(&tiled_config(2, 30, None))
        .unwrap();
    let mut controller = LifecycleController::new(graph);
    controller.start().unwrap();
    controller.run().unwrap();

    assert!(controller.shutdown_signal().wait_for_quit(Duration::from_secs(2)));
    assert!(controller.shutdown_signal().is_fatal());
    controller.stop().unwrap();
    assert_eq!(controller.exit_status(), FATAL_EXIT_STATUS);
}

#[test]
fn test_camera_format_problem_is_advisory() {
    let factory = OverrideFactory::new()
        .with("source_bin_0", |_, ctx| {
            Box::new(PickyCamera {
                ctx: ctx.clone(),
                complained: false,
            })
        })
        .shared();
    let mut cfg = tiled_config(1, 30, None);
    cfg.sources[0] = source(SourceType::Camera, 30, None);
    let graph = GraphBuilder::new(factory).build(&cfg).unwrap();
    let status = graph.source_branch(0).unwrap().status().clone();

    let mut controller = LifecycleController::new(graph);
    controller.start().unwrap();
    controller.run().unwrap();

    assert!(!controller.shutdown_signal().wait_for_quit(Duration::from_millis(300)));
    assert_eq!(status.resets(), 0);
    controller.stop().unwrap();
    assert_eq!(controller.exit_status(), 0);
}
