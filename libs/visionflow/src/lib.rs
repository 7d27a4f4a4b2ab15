// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! visionflow: configurable multi-stage media analytics graphs.
//!
//! A [`GraphBuilder`] turns a declarative [`GraphConfig`] into a [`Graph`] of
//! branches (source ingestion, batching, analytics, display, export). The
//! [`LifecycleController`] starts, pauses, resumes and tears the graph down
//! while an event monitor classifies stage faults and resets recoverable
//! network sources in place. Application code observes or annotates metadata
//! through ordered hook points.

#![allow(clippy::type_complexity)] // Callback signatures are clear in context

pub mod core;

pub use core::{
    BatchMeta, BoundingBox, Branch, BranchId, BranchRole, BuildError, Color, DataUnit,
    DisplayTopology, FrameMeta, Graph, GraphBuilder, GraphCallbacks, GraphConfig, GraphEvent,
    HookCallback, HookHandle, HookPoint, LifecycleController, LifecycleError, LifecycleState,
    ObjectMeta, Port, Result, SinkConfig, SinkType, SourceConfig, SourceId, SourceType, Stage,
    StageConfig, StageContext, StageError, StageErrorCode, StageFactory, StageKind, StreamError,
    SyntheticStageFactory, TiledDisplayMode,
};
