// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Hook points, built-in annotation and KITTI dumps on a running graph.

mod common;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use common::{source, synthetic, tiled_config};
use parking_lot::Mutex;
use visionflow::core::{
    ClassColor, Color, GraphBuilder, GraphCallbacks, GraphConfig, HookCallback, HookPoint,
    InferenceConfig, LifecycleController, Port, SinkConfig, SinkType, SourceType, StreamError,
    TiledDisplayMode, TrackerConfig,
};

fn run_to_end(controller: &mut LifecycleController) {
    controller.start().unwrap();
    controller.run().unwrap();
    assert!(controller.shutdown_signal().wait_for_quit(Duration::from_secs(5)));
    controller.stop().unwrap();
    assert_eq!(controller.exit_status(), 0);
}

#[test]
fn test_hook_points_fire_in_flow_order() {
    let mut cfg = tiled_config(2, 0, Some(10));
    cfg.tiled_display.mode = TiledDisplayMode::EnabledWithParallelSplit;
    cfg.sinks.push(SinkConfig::new(SinkType::Fake).for_source(1).linked_to_split());
    cfg.primary_inference = Some(InferenceConfig::with_unique_id(1));
    cfg.tracker = Some(TrackerConfig::default());
    let graph = GraphBuilder::new(synthetic()).build(&cfg).unwrap();

    let log: Arc<Mutex<Vec<(HookPoint, u32, u64)>>> = Arc::new(Mutex::new(Vec::new()));
    for point in [
        HookPoint::PostPrimaryInference,
        HookPoint::PostSharedAnalytics,
        HookPoint::PreSink,
    ] {
        let log = log.clone();
        let handles = graph.attach_at(
            point,
            HookCallback::observe(move |unit, info| {
                log.lock().push((point, info.branch.as_u32(), unit.sequence()));
            }),
        );
        assert_eq!(handles.len(), graph.hook_ports(point).len());
    }

    let mut controller = LifecycleController::new(graph);
    run_to_end(&mut controller);

    let log = log.lock();
    let mut seen = BTreeMap::new();
    for (position, entry) in log.iter().enumerate() {
        assert!(seen.insert(*entry, position).is_none(), "visited twice: {:?}", entry);
    }

    let mut pre_sink = 0;
    for (position, (point, _, sequence)) in log.iter().enumerate() {
        if *point != HookPoint::PreSink {
            continue;
        }
        pre_sink += 1;
        let earlier = |p: HookPoint| {
            log[..position]
                .iter()
                .position(|(q, _, s)| *q == p && s == sequence)
        };
        let primary = earlier(HookPoint::PostPrimaryInference).expect("primary before pre-sink");
        let shared = earlier(HookPoint::PostSharedAnalytics).expect("shared before pre-sink");
        assert!(primary < shared);
    }
    // Every batch reaches the tiled output; batches holding source 1 also
    // reach its split output.
    assert!(pre_sink > 0);
    let branches: std::collections::BTreeSet<_> = log
        .iter()
        .filter(|(p, _, _)| *p == HookPoint::PreSink)
        .map(|(_, b, _)| *b)
        .collect();
    assert_eq!(branches.len(), 2);
}

#[test]
fn test_annotation_and_kitti_end_to_end() {
    let detections = tempfile::tempdir().unwrap();
    let tracks = tempfile::tempdir().unwrap();

    let mut cfg = GraphConfig {
        sources: vec![source(SourceType::File, 0, Some(5))],
        sinks: vec![SinkConfig::new(SinkType::Fake).for_source(0)],
        primary_inference: Some(InferenceConfig {
            class_border_colors: vec![ClassColor {
                class_id: 0,
                color: Color::RED,
            }],
            ..InferenceConfig::with_unique_id(1)
        }),
        secondary_inference: vec![InferenceConfig::with_unique_id(2)],
        tracker: Some(TrackerConfig::default()),
        ..Default::default()
    };
    cfg.kitti.detection_dir = Some(detections.path().to_path_buf());
    cfg.kitti.tracking_dir = Some(tracks.path().to_path_buf());

    let seen: Arc<Mutex<Vec<(Option<String>, Option<Color>)>>> = Arc::new(Mutex::new(Vec::new()));
    let order: Arc<Mutex<Vec<&'static str>>> = Arc::new(Mutex::new(Vec::new()));
    let (seen_cb, ready_order, overlay_order) = (seen.clone(), order.clone(), order.clone());
    let callbacks = GraphCallbacks::new()
        .with_per_output_ready(move |meta, _| {
            ready_order.lock().push("ready");
            for object in meta.objects() {
                seen_cb
                    .lock()
                    .push((object.display_text.clone(), object.border_color));
            }
        })
        .with_overlay(move |_, _| overlay_order.lock().push("overlay"));

    let graph = GraphBuilder::new(synthetic())
        .with_callbacks(callbacks)
        .build(&cfg)
        .unwrap();
    let mut controller = LifecycleController::new(graph);
    run_to_end(&mut controller);

    let seen = seen.lock();
    assert_eq!(seen.len(), 5);
    for (text, border) in seen.iter() {
        assert_eq!(text.as_deref(), Some("object 0 class"));
        assert_eq!(*border, Some(Color::RED));
    }
    let order = order.lock();
    assert!(order.chunks(2).all(|pair| pair == ["ready", "overlay"]));

    for frame in 0..5 {
        let name = format!("00_000_{:06}.txt", frame);
        let detection = std::fs::read_to_string(detections.path().join(&name)).unwrap();
        assert!(detection.starts_with("object 0.0 0 0.0 "), "{}", detection);
        let track = std::fs::read_to_string(tracks.path().join(&name)).unwrap();
        assert!(track.starts_with("object 0 0.0 0 0.0 "), "{}", track);
    }
}

#[test]
fn test_attach_validates_ports_and_detach_stops_firing() {
    let graph = GraphBuilder::new(synthetic())
        .build(&tiled_config(1, 0, Some(3)))
        .unwrap();
    let tiled = graph.display_head();
    let len = graph.branch(tiled).unwrap().len();

    let err = graph
        .attach_hook(tiled, Port::input(len), HookCallback::observe(|_, _| {}))
        .unwrap_err();
    assert!(matches!(err, StreamError::Hook(_)));

    let fired = Arc::new(Mutex::new(0usize));
    let counter = fired.clone();
    let handle = graph
        .attach_hook(
            tiled,
            Port::output(0),
            HookCallback::observe(move |_, _| *counter.lock() += 1),
        )
        .unwrap();
    assert!(graph.detach_hook(&handle));
    assert!(!graph.detach_hook(&handle));

    let mut controller = LifecycleController::new(graph);
    run_to_end(&mut controller);
    assert_eq!(*fired.lock(), 0);
}

#[test]
fn test_source_branch_ports_rejected() {
    let graph = GraphBuilder::new(synthetic())
        .build(&tiled_config(2, 0, Some(3)))
        .unwrap();
    let source_branch = graph.source_branch(1).unwrap().id();

    let err = graph
        .attach_hook(source_branch, Port::output(0), HookCallback::observe(|_, _| {}))
        .unwrap_err();
    assert!(matches!(err, StreamError::Hook(ref msg) if msg.contains("source")));
}
