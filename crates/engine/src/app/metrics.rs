use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};

use tracing::warn;

static METRICS_POISON_REPORTED: AtomicBool = AtomicBool::new(false);

fn report_poison_once(access: &'static str) {
    if !METRICS_POISON_REPORTED.swap(true, Ordering::Relaxed) {
        warn!(access, "metrics_lock_poisoned");
    }
}

/// Loop rates averaged over one log interval.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LoopMetricsSnapshot {
    pub fps: f32,
    pub tps: f32,
    pub frame_time_ms: f32,
    pub peak_frame_time_ms: f32,
    /// Main-thread callbacks drained per second.
    pub drained_per_second: f32,
    /// Largest single late-update drain in the interval.
    pub peak_drain: u32,
}

/// Latest published snapshot, readable from any thread.
#[derive(Clone, Debug, Default)]
pub struct MetricsHandle {
    latest: Arc<RwLock<LoopMetricsSnapshot>>,
}

impl MetricsHandle {
    pub fn snapshot(&self) -> LoopMetricsSnapshot {
        *self.latest.read().unwrap_or_else(|poisoned| {
            report_poison_once("read");
            PoisonError::into_inner(poisoned)
        })
    }

    pub(crate) fn publish(&self, snapshot: LoopMetricsSnapshot) {
        let mut latest = self.latest.write().unwrap_or_else(|poisoned| {
            report_poison_once("write");
            PoisonError::into_inner(poisoned)
        });
        *latest = snapshot;
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct WindowCounts {
    frames: u32,
    ticks: u32,
    drained: u32,
    peak_drain: u32,
    frame_time: Duration,
    peak_frame_time: Duration,
}

impl WindowCounts {
    fn rates(&self, window: Duration) -> LoopMetricsSnapshot {
        let secs = window.as_secs_f32().max(f32::EPSILON);
        let mean_frame_ms = match self.frames {
            0 => 0.0,
            frames => self.frame_time.as_secs_f32() * 1000.0 / frames as f32,
        };
        LoopMetricsSnapshot {
            fps: self.frames as f32 / secs,
            tps: self.ticks as f32 / secs,
            frame_time_ms: mean_frame_ms,
            peak_frame_time_ms: self.peak_frame_time.as_secs_f32() * 1000.0,
            drained_per_second: self.drained as f32 / secs,
            peak_drain: self.peak_drain,
        }
    }
}

/// Counts loop activity and closes a window once `interval` has passed.
#[derive(Debug)]
pub(crate) struct MetricsAccumulator {
    window_start: Instant,
    interval: Duration,
    counts: WindowCounts,
}

impl MetricsAccumulator {
    pub(crate) fn new(interval: Duration) -> Self {
        Self {
            window_start: Instant::now(),
            interval,
            counts: WindowCounts::default(),
        }
    }

    pub(crate) fn record_frame(&mut self, frame_dt: Duration) {
        let counts = &mut self.counts;
        counts.frames = counts.frames.saturating_add(1);
        counts.frame_time = counts.frame_time.saturating_add(frame_dt);
        counts.peak_frame_time = counts.peak_frame_time.max(frame_dt);
    }

    pub(crate) fn record_tick(&mut self) {
        self.counts.ticks = self.counts.ticks.saturating_add(1);
    }

    pub(crate) fn record_drained(&mut self, count: usize) {
        let count = u32::try_from(count).unwrap_or(u32::MAX);
        self.counts.drained = self.counts.drained.saturating_add(count);
        self.counts.peak_drain = self.counts.peak_drain.max(count);
    }

    pub(crate) fn maybe_snapshot(&mut self, now: Instant) -> Option<LoopMetricsSnapshot> {
        let window = now.saturating_duration_since(self.window_start);
        if window < self.interval {
            return None;
        }
        let snapshot = std::mem::take(&mut self.counts).rates(window);
        self.window_start = now;
        Some(snapshot)
    }
}
