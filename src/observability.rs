//! Process-wide diagnostic counters.
//!
//! Counts only. No addresses, hostnames, URLs, or timestamps are recorded
//! here; `build.rs` rejects tokens that would bring them in.

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObservabilityLevel {
    OBS_NONE,
    OBS_SAFE,
}

#[allow(non_camel_case_types)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    PROBE_FAILURE,
    MALFORMED_RISK_DATA,
    UNSUPPORTED_STACK,
    LEAK_PROBE_STALL,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthState {
    OK,
    DEGRADED,
    FAULTED,
}

#[cfg(feature = "obs_none")]
pub const OBS_LEVEL: ObservabilityLevel = ObservabilityLevel::OBS_NONE;

#[cfg(not(feature = "obs_none"))]
pub const OBS_LEVEL: ObservabilityLevel = ObservabilityLevel::OBS_SAFE;

pub const OBS_NONE: bool = matches!(OBS_LEVEL, ObservabilityLevel::OBS_NONE);

use std::sync::atomic::{AtomicU64, Ordering};

static ERROR_CLASS_COUNT: [AtomicU64; 4] = [const { AtomicU64::new(0) }; 4];
static HEALTH_STATE: AtomicU64 = AtomicU64::new(HealthState::OK as u64);

#[inline]
pub fn record_error(class: ErrorClass) {
    if OBS_NONE {
        return;
    }
    let idx = match class {
        ErrorClass::PROBE_FAILURE => 0,
        ErrorClass::MALFORMED_RISK_DATA => 1,
        ErrorClass::UNSUPPORTED_STACK => 2,
        ErrorClass::LEAK_PROBE_STALL => 3,
    };
    ERROR_CLASS_COUNT[idx].fetch_add(1, Ordering::Relaxed);
}

#[inline]
pub fn set_health(state: HealthState) {
    HEALTH_STATE.store(state as u64, Ordering::Relaxed);
}

/// Moves OK to DEGRADED; never improves a worse state.
#[inline]
pub fn mark_degraded() {
    let _ = HEALTH_STATE.compare_exchange(
        HealthState::OK as u64,
        HealthState::DEGRADED as u64,
        Ordering::Relaxed,
        Ordering::Relaxed,
    );
}

/// Terminal until the next `set_health`.
#[inline]
pub fn mark_faulted() {
    HEALTH_STATE.store(HealthState::FAULTED as u64, Ordering::Relaxed);
}

#[inline]
pub fn get_health() -> HealthState {
    health_from_code(HEALTH_STATE.load(Ordering::Relaxed))
}

const fn health_from_code(code: u64) -> HealthState {
    match code {
        x if x == HealthState::OK as u64 => HealthState::OK,
        x if x == HealthState::DEGRADED as u64 => HealthState::DEGRADED,
        _ => HealthState::FAULTED,
    }
}

static PROBES_ISSUED: AtomicU64 = AtomicU64::new(0);
static PROBES_FAILED: AtomicU64 = AtomicU64::new(0);
static LATE_COMPLETIONS_DROPPED: AtomicU64 = AtomicU64::new(0);
static RISK_LOOKUPS: AtomicU64 = AtomicU64::new(0);
static LEAK_VERDICTS: AtomicU64 = AtomicU64::new(0);
static LEAKS_FOUND: AtomicU64 = AtomicU64::new(0);

const RTT_BUCKETS: usize = 16;
static RTT_MS_COARSE: [AtomicU64; RTT_BUCKETS] = [const { AtomicU64::new(0) }; RTT_BUCKETS];

#[inline]
pub fn record_probe_issued() {
    if !OBS_NONE {
        PROBES_ISSUED.fetch_add(1, Ordering::Relaxed);
    }
}

#[inline]
pub fn record_probe_failed() {
    if !OBS_NONE {
        PROBES_FAILED.fetch_add(1, Ordering::Relaxed);
    }
}

#[inline]
pub fn record_late_completion() {
    if !OBS_NONE {
        LATE_COMPLETIONS_DROPPED.fetch_add(1, Ordering::Relaxed);
    }
}

#[inline]
pub fn record_risk_lookup() {
    if !OBS_NONE {
        RISK_LOOKUPS.fetch_add(1, Ordering::Relaxed);
    }
}

#[inline]
pub fn record_leak_verdict(leaked: bool) {
    if OBS_NONE {
        return;
    }
    LEAK_VERDICTS.fetch_add(1, Ordering::Relaxed);
    if leaked {
        LEAKS_FOUND.fetch_add(1, Ordering::Relaxed);
    }
}

#[inline]
pub fn record_round_trip_coarse(round_trip_ms: u64) {
    if OBS_NONE {
        return;
    }
    let idx = coarse_bucket_index(round_trip_ms);
    RTT_MS_COARSE[idx].fetch_add(1, Ordering::Relaxed);
}

/// log2 bucket, saturating at the last bucket.
#[inline]
const fn coarse_bucket_index(value: u64) -> usize {
    if value == 0 {
        return 0;
    }
    let mut v = value;
    let mut idx: usize = 0;
    while v > 1 && idx + 1 < RTT_BUCKETS {
        v >>= 1;
        idx += 1;
    }
    idx
}

#[derive(Debug, Clone)]
pub struct ObservabilitySnapshot {
    pub probes_issued: u64,
    pub probes_failed: u64,
    pub late_completions_dropped: u64,
    pub risk_lookups: u64,
    pub leak_verdicts: u64,
    pub leaks_found: u64,
    pub round_trip_ms_coarse: [u64; RTT_BUCKETS],
    pub error_class_counts: [u64; 4],
    pub health: HealthState,
}

pub fn snapshot() -> ObservabilitySnapshot {
    ObservabilitySnapshot {
        probes_issued: PROBES_ISSUED.load(Ordering::Relaxed),
        probes_failed: PROBES_FAILED.load(Ordering::Relaxed),
        late_completions_dropped: LATE_COMPLETIONS_DROPPED.load(Ordering::Relaxed),
        risk_lookups: RISK_LOOKUPS.load(Ordering::Relaxed),
        leak_verdicts: LEAK_VERDICTS.load(Ordering::Relaxed),
        leaks_found: LEAKS_FOUND.load(Ordering::Relaxed),
        round_trip_ms_coarse: RTT_MS_COARSE.each_ref().map(|c| c.load(Ordering::Relaxed)),
        error_class_counts: ERROR_CLASS_COUNT.each_ref().map(|c| c.load(Ordering::Relaxed)),
        health: get_health(),
    }
}
