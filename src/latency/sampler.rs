use std::sync::Arc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{RngCore, SeedableRng};
use tokio::time::Instant;
use tracing::{debug, info, trace};

use super::Sample;
use crate::config::{SamplerConfig, Target};
use crate::error::ScheduleError;
use crate::fetcher::{unix_millis, HttpFetcher};
use crate::observability::{self, ErrorClass};
use crate::scheduler::{CancelToken, JitterDistribution, Scheduler, UniformJitter};
use crate::state::StateHandle;

/// Periodic reachability probes, one independent timer group per target.
pub struct LatencySampler {
    fetcher: Arc<dyn HttpFetcher>,
    state: StateHandle,
    config: SamplerConfig,
    jitter: UniformJitter,
    rng: Box<dyn RngCore + Send>,
    running: Vec<(String, Scheduler)>,
}

impl LatencySampler {
    pub fn new(
        fetcher: Arc<dyn HttpFetcher>,
        state: StateHandle,
        config: SamplerConfig,
    ) -> Result<Self, ScheduleError> {
        if config.interval().is_zero() {
            return Err(ScheduleError::ZeroInterval);
        }
        let jitter = UniformJitter::new(config.max_jitter())?;
        Ok(Self {
            fetcher,
            state,
            config,
            jitter,
            rng: Box::new(StdRng::from_entropy()),
            running: Vec::new(),
        })
    }

    pub fn with_rng<R: RngCore + Send + 'static>(mut self, rng: R) -> Self {
        self.rng = Box::new(rng);
        self
    }

    /// Schedules every target. `targets[i]` writes reading slot `i`.
    pub fn start(&mut self, targets: &[Target]) -> Result<(), ScheduleError> {
        for (slot, target) in targets.iter().enumerate() {
            let mut scheduler = Scheduler::new();
            let task = ProbeTask {
                fetcher: Arc::clone(&self.fetcher),
                state: self.state.clone(),
                slot,
                name: Arc::from(target.name.as_str()),
                url: Arc::from(target.probe_url.as_str()),
                timeout: self.config.probe_timeout(),
                cancel: scheduler.token(),
            };
            let offset = self.jitter.sample_jitter(&mut *self.rng);
            trace!(name = %target.name, offset_ms = offset.as_millis() as u64, "first probe scheduled");

            let first = task.clone();
            scheduler.spawn_once(offset, move || first.run());
            scheduler.spawn_repeating(self.config.interval(), move || task.clone().run())?;
            self.running.push((target.name.clone(), scheduler));
        }
        info!(targets = targets.len(), interval_ms = self.config.interval_ms, "latency sampling started");
        Ok(())
    }

    /// Cancels one target's timers. Returns false if it was not running.
    pub fn stop_target(&mut self, name: &str) -> bool {
        match self.running.iter().position(|(n, _)| n == name) {
            Some(idx) => {
                let (_, mut scheduler) = self.running.remove(idx);
                scheduler.cancel_all();
                debug!(name, "target sampling stopped");
                true
            }
            None => false,
        }
    }

    pub fn active_targets(&self) -> usize {
        self.running.len()
    }

    pub fn teardown(&mut self) {
        for (_, mut scheduler) in self.running.drain(..) {
            scheduler.cancel_all();
        }
    }
}

impl Drop for LatencySampler {
    fn drop(&mut self) {
        self.teardown();
    }
}

#[derive(Clone)]
struct ProbeTask {
    fetcher: Arc<dyn HttpFetcher>,
    state: StateHandle,
    slot: usize,
    name: Arc<str>,
    url: Arc<str>,
    timeout: Duration,
    cancel: CancelToken,
}

impl ProbeTask {
    async fn run(self) {
        observability::record_probe_issued();
        let started = Instant::now();
        let outcome = self.fetcher.probe(&self.url, self.timeout).await;
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        let round_trip_ms = match outcome {
            Ok(()) => {
                observability::record_round_trip_coarse(elapsed_ms);
                Some(elapsed_ms)
            }
            Err(err) => {
                observability::record_probe_failed();
                observability::record_error(ErrorClass::PROBE_FAILURE);
                debug!(name = %self.name, error = %err, "probe failed");
                None
            }
        };

        let sample = Sample {
            timestamp_ms: unix_millis(),
            round_trip_ms,
        };
        let mut late = false;
        self.state.update(|s| {
            if self.cancel.is_cancelled() {
                late = true;
                return false;
            }
            match s.latency.get_mut(self.slot) {
                Some(reading) => {
                    reading.record(sample);
                    true
                }
                None => false,
            }
        });
        if late {
            observability::record_late_completion();
        }
    }
}
