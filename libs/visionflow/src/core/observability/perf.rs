// Copyright (c) 2025 Jonathan Fontanez
// SPDX-License-Identifier: BUSL-1.1

//! Per-source frame rate measurement.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use crossbeam_channel::Sender;
use serde::Serialize;

use crate::core::callbacks::PerfCallback;
use crate::core::metadata::{DataUnit, SourceId};

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct SourcePerf {
    pub source_id: SourceId,
    /// Rate over the last interval.
    pub fps: f64,
    /// Rate since measurement started, excluding paused time.
    pub fps_avg: f64,
}

/// One periodic performance sample for a graph instance.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PerfStats {
    pub instance: usize,
    pub sources: Vec<SourcePerf>,
}

/// Frame counters bumped on the display head as units arrive.
#[derive(Debug)]
pub struct PerfCounters {
    source_ids: Vec<SourceId>,
    frames: Vec<AtomicU64>,
}

impl PerfCounters {
    pub fn new(mut source_ids: Vec<SourceId>) -> Self {
        source_ids.sort_unstable();
        source_ids.dedup();
        let frames = source_ids.iter().map(|_| AtomicU64::new(0)).collect();
        Self { source_ids, frames }
    }

    pub fn record(&self, unit: &DataUnit) {
        for frame in unit.metadata().frames() {
            if let Ok(slot) = self.source_ids.binary_search(&frame.source_id) {
                self.frames[slot].fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn totals(&self) -> Vec<u64> {
        self.frames
            .iter()
            .map(|c| c.load(Ordering::Relaxed))
            .collect()
    }

    pub fn source_ids(&self) -> &[SourceId] {
        &self.source_ids
    }
}

/// Turns successive counter totals into rates.
#[derive(Debug)]
pub(crate) struct PerfWindow {
    base: Vec<u64>,
    last: Vec<u64>,
    last_at: Instant,
    active: Duration,
}

impl PerfWindow {
    pub(crate) fn new(totals: Vec<u64>, now: Instant) -> Self {
        Self {
            base: totals.clone(),
            last: totals,
            last_at: now,
            active: Duration::ZERO,
        }
    }

    /// Advance without accruing time (the graph was paused).
    pub(crate) fn skip(&mut self, totals: Vec<u64>, now: Instant) {
        // Frames counted while paused drop out of the average too.
        for ((base, last), current) in self.base.iter_mut().zip(&self.last).zip(&totals) {
            *base += current.saturating_sub(*last);
        }
        self.last = totals;
        self.last_at = now;
    }

    pub(crate) fn sample(&mut self, totals: Vec<u64>, now: Instant) -> Vec<(f64, f64)> {
        let elapsed = now.saturating_duration_since(self.last_at);
        self.active += elapsed;
        let rate = |frames: u64, over: Duration| {
            if over.is_zero() {
                0.0
            } else {
                frames as f64 / over.as_secs_f64()
            }
        };
        let out = totals
            .iter()
            .zip(&self.last)
            .zip(&self.base)
            .map(|((current, last), base)| {
                (
                    rate(current.saturating_sub(*last), elapsed),
                    rate(current.saturating_sub(*base), self.active),
                )
            })
            .collect();
        self.last = totals;
        self.last_at = now;
        out
    }
}

/// Background thread delivering [`PerfStats`] every interval.
pub struct PerfSampler {
    stop_tx: Sender<()>,
    paused: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl PerfSampler {
    pub fn spawn(
        instance: usize,
        counters: Arc<PerfCounters>,
        interval: Duration,
        callback: PerfCallback,
    ) -> std::io::Result<Self> {
        let (stop_tx, stop_rx) = crossbeam_channel::bounded::<()>(1);
        let paused = Arc::new(AtomicBool::new(true));
        let paused_flag = paused.clone();

        let handle = std::thread::Builder::new()
            .name(format!("perf-{}", instance))
            .spawn(move || {
                let ticker = crossbeam_channel::tick(interval);
                let mut window = PerfWindow::new(counters.totals(), Instant::now());
                tracing::debug!("[perf-{}] sampling every {:?}", instance, interval);
                loop {
                    crossbeam_channel::select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> tick => {
                            let now = tick.unwrap_or_else(|_| Instant::now());
                            if paused_flag.load(Ordering::Acquire) {
                                window.skip(counters.totals(), now);
                                continue;
                            }
                            let rates = window.sample(counters.totals(), now);
                            let stats = PerfStats {
                                instance,
                                sources: counters
                                    .source_ids()
                                    .iter()
                                    .zip(rates)
                                    .map(|(source_id, (fps, fps_avg))| SourcePerf {
                                        source_id: *source_id,
                                        fps,
                                        fps_avg,
                                    })
                                    .collect(),
                            };
                            callback(&stats);
                        }
                    }
                }
                tracing::debug!("[perf-{}] sampler stopped", instance);
            })?;

        Ok(Self {
            stop_tx,
            paused,
            handle: Some(handle),
        })
    }

    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        let _ = self.stop_tx.try_send(());
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::warn!("perf sampler thread panicked");
            }
        }
    }
}

impl Drop for PerfSampler {
    fn drop(&mut self) {
        self.shutdown();
    }
}
