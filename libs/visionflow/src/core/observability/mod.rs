// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

mod latency;
mod perf;

pub use latency::{LatencyRecord, LatencyTable};
pub use perf::{PerfCounters, PerfSampler, PerfStats, SourcePerf};
