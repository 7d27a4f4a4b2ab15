// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Last-mile annotation applied on each output branch before rendering.
//!
//! Composes the display text of every object and picks its border and
//! background colors from the inference stage that produced it.

use crate::core::config::{GraphConfig, InferenceConfig, RendererConfig, TiledDisplayMode};
use crate::core::metadata::{BatchMeta, ObjectMeta};

/// Tracking ids are shown truncated to their low 32 bits.
const DISPLAY_TRACK_ID_MASK: u64 = 0xFFFF_FFFF;

#[derive(Debug, Clone, PartialEq)]
pub struct AnnotationSettings {
    pub show_text: bool,
    pub border_width: u32,
    inference: Vec<InferenceConfig>,
}

impl AnnotationSettings {
    pub fn from_config(config: &GraphConfig) -> Self {
        // Text is unreadable on a multi-source mosaic unless asked for.
        let show_text = config.show_bbox_text
            || config.tiled_display.mode == TiledDisplayMode::Disabled
            || config.enabled_sources().count() == 1;
        let border_width = config
            .renderer
            .as_ref()
            .map_or(RendererConfig::default().border_width, |r| r.border_width);
        let inference = config
            .primary_inference
            .iter()
            .filter(|c| c.enable)
            .chain(config.active_secondaries())
            .cloned()
            .collect();
        Self {
            show_text,
            border_width,
            inference,
        }
    }

    fn inference_for(&self, component_id: u32) -> Option<&InferenceConfig> {
        self.inference.iter().find(|c| c.unique_id == component_id)
    }
}

/// `label [track-id] [classifier labels...]`, classifier labels ordered by
/// the component that produced them.
pub fn display_text(object: &ObjectMeta) -> String {
    let mut text = object.label.clone();
    if let Some(id) = object.tracking_id {
        text.push_str(&format!(" {}", id & DISPLAY_TRACK_ID_MASK));
    }
    let mut labels: Vec<_> = object.classifier_labels.iter().collect();
    labels.sort_by_key(|l| l.component_id);
    for label in labels {
        text.push(' ');
        text.push_str(&label.label);
    }
    text
}

pub fn annotate(meta: &mut BatchMeta, settings: &AnnotationSettings) {
    for object in meta.objects_mut() {
        object.display_text = None;
        object.border_width = settings.border_width;

        if let Some(gie) = settings.inference_for(object.component_id) {
            if let Some(color) = gie.border_for_class(object.class_id) {
                object.border_color = Some(color);
            }
            object.background_color = gie.background_for_class(object.class_id);
        }

        if settings.show_text {
            object.display_text = Some(display_text(object));
        }
    }
}
