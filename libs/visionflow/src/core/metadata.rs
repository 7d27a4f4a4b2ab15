// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-unit metadata model.
//!
//! A [`DataUnit`] is one batch produced by the multiplexer. Its identity is
//! the sequence number assigned at batching time; everything stages and hooks
//! may touch lives in [`BatchMeta`].

use std::collections::BTreeMap;
use std::time::Instant;

use serde::{Deserialize, Serialize};

/// Identifier of an input (source) within one graph.
pub type SourceId = u32;

/// RGBA color with components in `0.0..=1.0`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Color {
    pub red: f32,
    pub green: f32,
    pub blue: f32,
    pub alpha: f32,
}

impl Color {
    pub const fn rgba(red: f32, green: f32, blue: f32, alpha: f32) -> Self {
        Self {
            red,
            green,
            blue,
            alpha,
        }
    }

    pub const RED: Color = Color::rgba(1.0, 0.0, 0.0, 1.0);
    pub const WHITE: Color = Color::rgba(1.0, 1.0, 1.0, 1.0);
    pub const BLACK: Color = Color::rgba(0.0, 0.0, 0.0, 1.0);
}

impl Default for Color {
    fn default() -> Self {
        Color::RED
    }
}

/// Axis-aligned box in frame pixel coordinates.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub left: f32,
    pub top: f32,
    pub width: f32,
    pub height: f32,
}

impl BoundingBox {
    pub fn new(left: f32, top: f32, width: f32, height: f32) -> Self {
        Self {
            left,
            top,
            width,
            height,
        }
    }

    pub fn right(&self) -> f32 {
        self.left + self.width
    }

    pub fn bottom(&self) -> f32 {
        self.top + self.height
    }
}

/// Label attached to an object by a secondary classifier.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassifierLabel {
    /// Unique id of the inference stage that produced the label.
    pub component_id: u32,
    pub label: String,
    pub confidence: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub class_id: i32,
    pub label: String,
    pub confidence: f32,
    /// Unique id of the inference stage that detected the object.
    pub component_id: u32,
    pub bbox: BoundingBox,
    pub tracking_id: Option<u64>,
    pub classifier_labels: Vec<ClassifierLabel>,

    // Set by annotation; consumed by the renderer.
    pub display_text: Option<String>,
    pub border_color: Option<Color>,
    pub border_width: u32,
    pub background_color: Option<Color>,
}

impl ObjectMeta {
    pub fn new(class_id: i32, label: impl Into<String>, bbox: BoundingBox) -> Self {
        Self {
            class_id,
            label: label.into(),
            confidence: 0.0,
            component_id: 0,
            bbox,
            tracking_id: None,
            classifier_labels: Vec::new(),
            display_text: None,
            border_color: None,
            border_width: 0,
            background_color: None,
        }
    }

    pub fn with_component_id(mut self, component_id: u32) -> Self {
        self.component_id = component_id;
        self
    }

    pub fn with_confidence(mut self, confidence: f32) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_tracking_id(mut self, tracking_id: u64) -> Self {
        self.tracking_id = Some(tracking_id);
        self
    }

    pub fn is_tracked(&self) -> bool {
        self.tracking_id.is_some()
    }
}

/// Metadata for one frame of one source inside a batch.
#[derive(Debug, Clone, PartialEq)]
pub struct FrameMeta {
    pub source_id: SourceId,
    pub frame_number: u64,
    /// When the frame entered the graph; used for latency measurement.
    pub ingest_time: Instant,
    pub objects: Vec<ObjectMeta>,
}

impl FrameMeta {
    pub fn new(source_id: SourceId, frame_number: u64) -> Self {
        Self {
            source_id,
            frame_number,
            ingest_time: Instant::now(),
            objects: Vec::new(),
        }
    }
}

/// Mapping from input identifier to the frame that input contributed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BatchMeta {
    frames: BTreeMap<SourceId, FrameMeta>,
}

impl BatchMeta {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn contains(&self, source_id: SourceId) -> bool {
        self.frames.contains_key(&source_id)
    }

    /// Insert a frame, returning the frame it displaced for the same source.
    pub fn insert(&mut self, frame: FrameMeta) -> Option<FrameMeta> {
        self.frames.insert(frame.source_id, frame)
    }

    pub fn frame(&self, source_id: SourceId) -> Option<&FrameMeta> {
        self.frames.get(&source_id)
    }

    pub fn frame_mut(&mut self, source_id: SourceId) -> Option<&mut FrameMeta> {
        self.frames.get_mut(&source_id)
    }

    /// Frames in ascending source order.
    pub fn frames(&self) -> impl Iterator<Item = &FrameMeta> {
        self.frames.values()
    }

    pub fn frames_mut(&mut self) -> impl Iterator<Item = &mut FrameMeta> {
        self.frames.values_mut()
    }

    pub fn objects(&self) -> impl Iterator<Item = &ObjectMeta> {
        self.frames.values().flat_map(|f| f.objects.iter())
    }

    pub fn objects_mut(&mut self) -> impl Iterator<Item = &mut ObjectMeta> {
        self.frames.values_mut().flat_map(|f| f.objects.iter_mut())
    }

    pub fn object_count(&self) -> usize {
        self.frames.values().map(|f| f.objects.len()).sum()
    }
}

/// One batch flowing through the graph.
///
/// The sequence number is fixed at creation; stages and hooks can only reach
/// the metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct DataUnit {
    sequence: u64,
    meta: BatchMeta,
}

impl DataUnit {
    pub fn new(sequence: u64, meta: BatchMeta) -> Self {
        Self { sequence, meta }
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn metadata(&self) -> &BatchMeta {
        &self.meta
    }

    pub fn metadata_mut(&mut self) -> &mut BatchMeta {
        &mut self.meta
    }

    /// Split into one unit per source, each keeping this unit's sequence.
    pub(crate) fn split_by_source(&self) -> impl Iterator<Item = (SourceId, DataUnit)> + '_ {
        self.meta.frames().map(move |frame| {
            let mut meta = BatchMeta::new();
            meta.insert(frame.clone());
            (frame.source_id, DataUnit::new(self.sequence, meta))
        })
    }
}
