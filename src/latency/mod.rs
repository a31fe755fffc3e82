pub mod sampler;

use std::collections::VecDeque;

use serde::Serialize;

use crate::config::Target;

pub use sampler::LatencySampler;

/// Round-trip tier used for coloring. Rendering only; scheduling ignores it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LatencyTier {
    Good,
    Fair,
    Poor,
    Unknown,
}

pub const GOOD_BELOW_MS: u64 = 100;
pub const FAIR_BELOW_MS: u64 = 300;

impl LatencyTier {
    pub fn classify(round_trip_ms: Option<u64>) -> Self {
        match round_trip_ms {
            None => LatencyTier::Unknown,
            Some(ms) if ms < GOOD_BELOW_MS => LatencyTier::Good,
            Some(ms) if ms < FAIR_BELOW_MS => LatencyTier::Fair,
            Some(_) => LatencyTier::Poor,
        }
    }
}

/// One probe attempt. `round_trip_ms == None` is a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub timestamp_ms: u64,
    pub round_trip_ms: Option<u64>,
}

impl Sample {
    pub fn tier(&self) -> LatencyTier {
        LatencyTier::classify(self.round_trip_ms)
    }
}

/// Fixed-size FIFO of the latest round-trip values, oldest first.
///
/// Starts as `capacity` zero slots so trend bars always have a full row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct History {
    slots: VecDeque<Option<u64>>,
}

impl History {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: std::iter::repeat(Some(0)).take(capacity).collect(),
        }
    }

    pub fn push(&mut self, round_trip_ms: Option<u64>) {
        self.slots.pop_front();
        self.slots.push_back(round_trip_ms);
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = Option<u64>> + '_ {
        self.slots.iter().copied()
    }

    pub fn to_vec(&self) -> Vec<Option<u64>> {
        self.iter().collect()
    }

    /// The newest `n` slots, oldest first.
    pub fn tail(&self, n: usize) -> Vec<Option<u64>> {
        let skip = self.slots.len().saturating_sub(n);
        self.iter().skip(skip).collect()
    }
}

/// Per-target display state owned by the sampler.
#[derive(Debug, Clone, Serialize)]
pub struct TargetReading {
    pub target: Target,
    pub latest: Option<Sample>,
    pub history: History,
}

impl TargetReading {
    pub fn new(target: Target, history_capacity: usize) -> Self {
        Self {
            target,
            latest: None,
            history: History::new(history_capacity),
        }
    }

    pub fn record(&mut self, sample: Sample) {
        self.history.push(sample.round_trip_ms);
        self.latest = Some(sample);
    }

    pub fn latest_tier(&self) -> LatencyTier {
        self.latest
            .map(|s| s.tier())
            .unwrap_or(LatencyTier::Unknown)
    }
}
