//! Rolling latency figures for completed turns

use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

/// p95 above this is logged as a warning
pub const TARGET_TURN_P95_MS: u64 = 8_000;

/// Samples kept for the rolling figures
const MAX_SAMPLES: usize = 100;

/// Counts and latencies reported on the health endpoint
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct TurnSnapshot {
    pub completed: u64,
    pub rate_limited: u64,
    pub failed: u64,
    pub samples: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub p95_ms: Option<u64>,
}

#[derive(Default)]
struct Inner {
    samples: VecDeque<u64>,
    completed: u64,
    rate_limited: u64,
    failed: u64,
}

/// What a turn ended in, for counting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOutcome {
    Completed,
    RateLimited,
    Failed,
}

#[derive(Default)]
pub struct TurnMetrics {
    inner: Mutex<Inner>,
}

impl TurnMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Counts a finished turn; only model-backed turns contribute latency samples
    pub fn record(&self, outcome: TurnOutcome, elapsed: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        match outcome {
            TurnOutcome::Completed => inner.completed += 1,
            TurnOutcome::RateLimited => {
                inner.rate_limited += 1;
                return;
            }
            TurnOutcome::Failed => inner.failed += 1,
        }

        inner.samples.push_back(elapsed.as_millis() as u64);
        if inner.samples.len() > MAX_SAMPLES {
            inner.samples.pop_front();
        }
    }

    pub fn snapshot(&self) -> TurnSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|p| p.into_inner());
        TurnSnapshot {
            completed: inner.completed,
            rate_limited: inner.rate_limited,
            failed: inner.failed,
            samples: inner.samples.len(),
            avg_ms: average(&inner.samples),
            p95_ms: percentile_95(&inner.samples),
        }
    }
}

fn average(samples: &VecDeque<u64>) -> Option<u64> {
    if samples.is_empty() {
        return None;
    }
    Some(samples.iter().sum::<u64>() / samples.len() as u64)
}

fn percentile_95(samples: &VecDeque<u64>) -> Option<u64> {
    let mut sorted: Vec<u64> = samples.iter().copied().collect();
    sorted.sort_unstable();
    let index = ((sorted.len() as f64 * 0.95).ceil() as usize).saturating_sub(1);
    sorted.get(index).copied()
}
