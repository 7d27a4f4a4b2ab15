// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Frame rate reporting across instances.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use parking_lot::Mutex;
use visionflow::core::PerfStats;

/// Latest performance sample of every instance.
#[derive(Debug, Default)]
pub struct PerfTable {
    latest: Mutex<BTreeMap<usize, PerfStats>>,
}

impl PerfTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `stats` and print the instance's rates to stdout.
    pub fn record(&self, stats: &PerfStats) {
        self.latest.lock().insert(stats.instance, stats.clone());
        println!("**PERF: {}", format_sample(stats));
    }

    pub fn latest(&self, instance: usize) -> Option<PerfStats> {
        self.latest.lock().get(&instance).cloned()
    }
}

/// `instance-N  FPS 0: cur (avg)  FPS 1: cur (avg) ...`
pub fn format_sample(stats: &PerfStats) -> String {
    let mut line = format!("instance-{}", stats.instance);
    for source in &stats.sources {
        let _ = write!(
            line,
            "  FPS {}: {:.2} ({:.2})",
            source.source_id, source.fps, source.fps_avg
        );
    }
    line
}
