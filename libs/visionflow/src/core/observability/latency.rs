// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::core::metadata::{DataUnit, SourceId};

/// Latency of the most recent frame of one source at the sink input.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LatencyRecord {
    pub source_id: SourceId,
    pub frame_number: u64,
    pub latency: Duration,
}

impl LatencyRecord {
    pub fn latency_ms(&self) -> f64 {
        self.latency.as_secs_f64() * 1000.0
    }
}

/// Fixed-capacity table indexed by source id.
///
/// Capacity is decided at build time and never changes; frames from sources
/// outside it are not recorded.
#[derive(Debug)]
pub struct LatencyTable {
    slots: Mutex<Vec<Option<LatencyRecord>>>,
}

impl LatencyTable {
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: Mutex::new(vec![None; capacity]),
        }
    }

    pub fn capacity(&self) -> usize {
        self.slots.lock().len()
    }

    /// Record every frame of `unit`, returning how many were stored.
    pub fn record(&self, unit: &DataUnit, now: Instant) -> usize {
        let mut slots = self.slots.lock();
        let mut stored = 0;
        for frame in unit.metadata().frames() {
            let Some(slot) = slots.get_mut(frame.source_id as usize) else {
                tracing::trace!(
                    "latency: source {} outside table of {}",
                    frame.source_id,
                    slots.len()
                );
                continue;
            };
            let record = LatencyRecord {
                source_id: frame.source_id,
                frame_number: frame.frame_number,
                latency: now.saturating_duration_since(frame.ingest_time),
            };
            tracing::debug!(
                "Source id = {} Frame_num = {} Frame latency = {:.3} (ms)",
                record.source_id,
                record.frame_number,
                record.latency_ms()
            );
            *slot = Some(record);
            stored += 1;
        }
        stored
    }

    pub fn get(&self, source_id: SourceId) -> Option<LatencyRecord> {
        self.slots.lock().get(source_id as usize).copied().flatten()
    }

    pub fn snapshot(&self) -> Vec<LatencyRecord> {
        self.slots.lock().iter().flatten().copied().collect()
    }
}
