// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! In-process stages that need no media backend.
//!
//! Sources emit paced test-pattern frames, inference stages attach
//! deterministic detections and labels, and everything else passes units
//! through unchanged. Enough to run a full graph end to end.

use std::time::{Duration, Instant};

use crate::core::error::StageError;
use crate::core::metadata::{BoundingBox, ClassifierLabel, DataUnit, FrameMeta, ObjectMeta};

use super::factory::{StageContext, StageFactory};
use super::stage::{SourcePoll, Stage, StageConfig, StageKind, StageState};

const DEFAULT_FPS: f64 = 30.0;
const FRAME_WIDTH: f32 = 1920.0;
const FRAME_HEIGHT: f32 = 1080.0;

#[derive(Debug, Default, Clone, Copy)]
pub struct SyntheticStageFactory;

impl SyntheticStageFactory {
    pub fn new() -> Self {
        Self
    }
}

impl StageFactory for SyntheticStageFactory {
    fn create(
        &self,
        config: &StageConfig,
        ctx: &StageContext,
    ) -> Result<Box<dyn Stage>, StageError> {
        tracing::debug!("[{}] creating synthetic {}", ctx.name(), config.kind);
        let stage: Box<dyn Stage> = match config.kind {
            StageKind::Source => Box::new(TestPatternSource::from_config(config)),
            StageKind::PrimaryInference => Box::new(FixedDetector::from_config(config)),
            StageKind::Tracker => Box::new(SlotTracker),
            StageKind::SecondaryInference => Box::new(ConstantClassifier::from_config(config)),
            _ => Box::new(Passthrough),
        };
        Ok(stage)
    }
}

struct Passthrough;

impl Stage for Passthrough {}

/// Paced frame generator.
///
/// Params: `fps` (default 30, 0 disables pacing), `num_frames` (unbounded
/// when absent), `loop`.
struct TestPatternSource {
    source_id: u32,
    interval: Option<Duration>,
    num_frames: Option<u64>,
    looping: bool,
    frame_number: u64,
    next_due: Option<Instant>,
}

impl TestPatternSource {
    fn from_config(config: &StageConfig) -> Self {
        let fps = config.param_f64("fps").unwrap_or(DEFAULT_FPS);
        Self {
            source_id: config.target_id.unwrap_or(0),
            interval: (fps > 0.0).then(|| Duration::from_secs_f64(1.0 / fps)),
            num_frames: config.param_u64("num_frames"),
            looping: config.param_bool("loop").unwrap_or(false),
            frame_number: 0,
            next_due: None,
        }
    }
}

impl Stage for TestPatternSource {
    fn poll_frame(&mut self) -> Result<SourcePoll, StageError> {
        if let Some(limit) = self.num_frames {
            if self.frame_number >= limit {
                if !self.looping || limit == 0 {
                    return Ok(SourcePoll::EndOfStream);
                }
                self.frame_number = 0;
            }
        }

        if let Some(interval) = self.interval {
            let now = Instant::now();
            let due = *self.next_due.get_or_insert(now);
            if due > now {
                std::thread::sleep(due - now);
            }
            self.next_due = Some(due.max(now) + interval);
        }

        let frame = FrameMeta::new(self.source_id, self.frame_number);
        self.frame_number += 1;
        Ok(SourcePoll::Frame(frame))
    }

    fn set_state(&mut self, state: StageState) -> Result<(), StageError> {
        if state != StageState::Running {
            // Do not burst to catch up after a pause.
            self.next_due = None;
        }
        Ok(())
    }

    fn reset(&mut self) -> Result<(), StageError> {
        self.frame_number = 0;
        self.next_due = None;
        Ok(())
    }
}

/// Attaches `objects_per_frame` boxes per frame, laid out on a diagonal.
struct FixedDetector {
    component_id: u32,
    class_id: i32,
    label: String,
    objects_per_frame: u64,
}

impl FixedDetector {
    fn from_config(config: &StageConfig) -> Self {
        Self {
            component_id: config.param_u64("unique_id").unwrap_or(1) as u32,
            class_id: config.param_u64("class_id").unwrap_or(0) as i32,
            label: config.param_str("label").unwrap_or("object").to_string(),
            objects_per_frame: config.param_u64("objects_per_frame").unwrap_or(1),
        }
    }
}

impl Stage for FixedDetector {
    fn process(&mut self, unit: &mut DataUnit) -> Result<(), StageError> {
        for frame in unit.metadata_mut().frames_mut() {
            let step = FRAME_WIDTH / (self.objects_per_frame as f32 + 1.0);
            for i in 0..self.objects_per_frame {
                let offset = (frame.frame_number % 16) as f32;
                let bbox = BoundingBox::new(
                    step * i as f32 + offset,
                    (FRAME_HEIGHT / 4.0) + offset,
                    step / 2.0,
                    FRAME_HEIGHT / 4.0,
                );
                frame.objects.push(
                    ObjectMeta::new(self.class_id, self.label.clone(), bbox)
                        .with_component_id(self.component_id)
                        .with_confidence(0.9),
                );
            }
        }
        Ok(())
    }
}

/// Tracks objects by their slot within the frame.
struct SlotTracker;

impl Stage for SlotTracker {
    fn process(&mut self, unit: &mut DataUnit) -> Result<(), StageError> {
        for frame in unit.metadata_mut().frames_mut() {
            let base = (frame.source_id as u64) << 16;
            for (slot, object) in frame.objects.iter_mut().enumerate() {
                if object.tracking_id.is_none() {
                    object.tracking_id = Some(base | slot as u64);
                }
            }
        }
        Ok(())
    }
}

struct ConstantClassifier {
    component_id: u32,
    label: String,
}

impl ConstantClassifier {
    fn from_config(config: &StageConfig) -> Self {
        Self {
            component_id: config.param_u64("unique_id").unwrap_or(2) as u32,
            label: config.param_str("label").unwrap_or("class").to_string(),
        }
    }
}

impl Stage for ConstantClassifier {
    fn process(&mut self, unit: &mut DataUnit) -> Result<(), StageError> {
        for object in unit.metadata_mut().objects_mut() {
            object.classifier_labels.push(ClassifierLabel {
                component_id: self.component_id,
                label: self.label.clone(),
                confidence: 1.0,
            });
        }
        Ok(())
    }
}
