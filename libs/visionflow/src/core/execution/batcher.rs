// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frame batching for the mux branch.

use std::collections::BTreeSet;
use std::time::{Duration, Instant};

use crate::core::metadata::{BatchMeta, DataUnit, FrameMeta, SourceId};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MuxSettings {
    pub batch_size: usize,
    pub batch_timeout: Duration,
    pub sources: BTreeSet<SourceId>,
}

/// Collects frames into batches of at most one frame per source.
///
/// A batch is emitted when it is full, when a source contributes a second
/// frame before the batch went out, or when the oldest frame in it has
/// waited `batch_timeout`.
#[derive(Debug)]
pub(crate) struct Batcher {
    settings: MuxSettings,
    pending: BatchMeta,
    opened_at: Option<Instant>,
    next_sequence: u64,
    ended: BTreeSet<SourceId>,
    finished: bool,
}

impl Batcher {
    pub(crate) fn new(settings: MuxSettings) -> Self {
        Self {
            settings,
            pending: BatchMeta::new(),
            opened_at: None,
            next_sequence: 0,
            ended: BTreeSet::new(),
            finished: false,
        }
    }

    pub(crate) fn push(&mut self, frame: FrameMeta, now: Instant) -> Vec<DataUnit> {
        let mut ready = Vec::new();
        if self.pending.contains(frame.source_id) {
            ready.extend(self.flush());
        }
        self.pending.insert(frame);
        self.opened_at.get_or_insert(now);
        if self.pending.len() >= self.settings.batch_size.max(1) {
            ready.extend(self.flush());
        }
        ready
    }

    /// Emit the partial batch once it has waited long enough.
    pub(crate) fn poll_timeout(&mut self, now: Instant) -> Option<DataUnit> {
        let opened = self.opened_at?;
        if now.saturating_duration_since(opened) >= self.settings.batch_timeout {
            self.flush()
        } else {
            None
        }
    }

    /// How long the worker may block before the partial batch is due.
    pub(crate) fn wait_time(&self, now: Instant, idle: Duration) -> Duration {
        match self.opened_at {
            Some(opened) => self
                .settings
                .batch_timeout
                .saturating_sub(now.saturating_duration_since(opened)),
            None => idle,
        }
    }

    pub(crate) fn flush(&mut self) -> Option<DataUnit> {
        self.opened_at = None;
        if self.pending.is_empty() {
            return None;
        }
        let unit = DataUnit::new(self.next_sequence, std::mem::take(&mut self.pending));
        self.next_sequence += 1;
        Some(unit)
    }

    /// Note end-of-stream from `source` (`None` ends everything). True
    /// exactly once, when every source has ended.
    pub(crate) fn end_source(&mut self, source: Option<SourceId>) -> bool {
        if self.finished {
            return false;
        }
        match source {
            Some(id) => {
                self.ended.insert(id);
            }
            None => self.ended.extend(self.settings.sources.iter().copied()),
        }
        self.finished = self.settings.sources.is_subset(&self.ended);
        self.finished
    }
}
