use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::info;

use crate::config::SentinelConfig;
use crate::dual_stack::{DualStackDetector, StackFamily};
use crate::edge::EdgeContext;
use crate::error::ScheduleError;
use crate::fetcher::HttpFetcher;
use crate::latency::LatencySampler;
use crate::leak::{CandidateSource, LeakProbe};
use crate::observability::{self, HealthState};
use crate::presentation::DisplaySnapshot;
use crate::risk::{ExitAddress, ExitCard, ExitKind, ExitLocator, RiskNormalizer, RiskOutcome};
use crate::scheduler::{CancelToken, Scheduler};
use crate::state::{DiagnosticsState, StateHandle};

/// One diagnostics lifetime: every probe starts in [`DiagnosticsEngine::start`]
/// and nothing runs or lands after [`DiagnosticsEngine::teardown`].
pub struct DiagnosticsEngine {
    state: StateHandle,
    sampler: LatencySampler,
    oneshots: Scheduler,
}

impl DiagnosticsEngine {
    /// Must be called inside a tokio runtime.
    pub fn start(
        config: SentinelConfig,
        edge: EdgeContext,
        fetcher: Arc<dyn HttpFetcher>,
        candidates: Arc<dyn CandidateSource>,
    ) -> Result<Self, ScheduleError> {
        observability::set_health(HealthState::OK);
        let state = StateHandle::new(DiagnosticsState::new(&config, edge.clone()));

        let mut sampler = LatencySampler::new(Arc::clone(&fetcher), state.clone(), config.sampler.clone())?;
        sampler.start(&config.targets)?;

        let mut engine = Self {
            state,
            sampler,
            oneshots: Scheduler::new(),
        };

        let detector = Arc::new(DualStackDetector::new(Arc::clone(&fetcher), config.dual_stack.clone()));
        for family in [StackFamily::V4, StackFamily::V6] {
            engine.spawn_stack_probe(family, Arc::clone(&detector));
        }

        engine.spawn_leak_probe(LeakProbe::new(candidates, &config.leak_probe));

        let locator = Arc::new(ExitLocator::new(Arc::clone(&fetcher), config.exit.clone()));
        let normalizer = Arc::new(RiskNormalizer::new(fetcher, config.risk.clone()));
        for kind in ExitKind::ALL {
            let delay = config.exit.stagger() * kind.stagger_slot();
            engine.spawn_exit_card(kind, delay, &edge, Arc::clone(&locator), Arc::clone(&normalizer));
        }

        info!(targets = config.targets.len(), "diagnostics engine started");
        Ok(engine)
    }

    fn spawn_stack_probe(&mut self, family: StackFamily, detector: Arc<DualStackDetector>) {
        let state = self.state.clone();
        let token = self.oneshots.token();
        self.oneshots.spawn_once(Duration::ZERO, move || async move {
            let result = detector.probe_family(family).await;
            if !result.available {
                observability::mark_degraded();
            }
            state.update(|s| {
                if token.is_cancelled() || !s.stack_mut(family).settle(result) {
                    return false;
                }
                if s.no_stack_reachable() {
                    observability::mark_faulted();
                }
                true
            });
        });
    }

    fn spawn_leak_probe(&mut self, probe: LeakProbe) {
        let state = self.state.clone();
        let token = self.oneshots.token();
        self.oneshots.spawn_once(Duration::ZERO, move || async move {
            let result = probe.run(token.clone()).await;
            state.update(|s| !token.is_cancelled() && s.leak.settle_from(&result));
        });
    }

    fn spawn_exit_card(
        &mut self,
        kind: ExitKind,
        delay: Duration,
        edge: &EdgeContext,
        locator: Arc<ExitLocator>,
        normalizer: Arc<RiskNormalizer>,
    ) {
        let job = ExitCardJob {
            kind,
            edge: edge.clone(),
            locator,
            normalizer,
            state: self.state.clone(),
            cancel: self.oneshots.token(),
        };
        self.oneshots.spawn_once(delay, move || job.run());
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.state.subscribe()
    }

    pub fn snapshot(&self) -> DiagnosticsState {
        self.state.snapshot()
    }

    pub fn display(&self) -> DisplaySnapshot {
        DisplaySnapshot::project(&self.state.snapshot())
    }

    pub fn stop_target(&mut self, name: &str) -> bool {
        self.sampler.stop_target(name)
    }

    pub fn is_torn_down(&self) -> bool {
        self.oneshots.is_cancelled()
    }

    /// Cancels every timer and in-flight probe. Idempotent.
    pub fn teardown(&mut self) {
        if self.is_torn_down() {
            return;
        }
        self.state.freeze();
        self.sampler.teardown();
        self.oneshots.cancel_all();
        info!("diagnostics engine torn down");
    }
}

impl Drop for DiagnosticsEngine {
    fn drop(&mut self) {
        self.teardown();
    }
}

/// Resolve an exit address, then score it once.
struct ExitCardJob {
    kind: ExitKind,
    edge: EdgeContext,
    locator: Arc<ExitLocator>,
    normalizer: Arc<RiskNormalizer>,
    state: StateHandle,
    cancel: CancelToken,
}

impl ExitCardJob {
    async fn run(self) {
        let kind = self.kind;
        let ip = match self.locator.locate(kind, &self.edge).await {
            Ok(ip) => ip,
            Err(err) => {
                info!(card = kind.title(), error = %err, "exit address unavailable");
                self.apply(|card| card.address = ExitAddress::Failed);
                return;
            }
        };

        let resolved = self.apply(|card| {
            card.address = ExitAddress::Resolved(ip.clone());
            card.risk = RiskOutcome::Loading;
        });
        if !resolved {
            return;
        }

        let outcome = self.normalizer.assess(&ip).await;
        self.apply(|card| card.risk = outcome);
    }

    /// Writes this job's card unless the engine was torn down first.
    fn apply<F: FnOnce(&mut ExitCard)>(&self, f: F) -> bool {
        self.state.update(|s| {
            if self.cancel.is_cancelled() {
                return false;
            }
            match s.exit_mut(self.kind) {
                Some(card) => {
                    f(card);
                    true
                }
                None => false,
            }
        })
    }
}
