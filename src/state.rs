use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;
use tokio::sync::watch;

use crate::config::SentinelConfig;
use crate::dual_stack::{StackFamily, StackStatus};
use crate::edge::EdgeContext;
use crate::latency::TargetReading;
use crate::leak::LeakProbeResult;
use crate::risk::{ExitCard, ExitKind};

/// Everything the engine has measured so far in this lifetime.
#[derive(Debug, Clone, Serialize)]
pub struct DiagnosticsState {
    pub edge: EdgeContext,
    pub latency: Vec<TargetReading>,
    pub ipv4: StackStatus,
    pub ipv6: StackStatus,
    pub leak: LeakProbeResult,
    pub exits: Vec<ExitCard>,
    #[serde(skip)]
    torn_down: bool,
}

impl DiagnosticsState {
    pub fn new(config: &SentinelConfig, edge: EdgeContext) -> Self {
        Self {
            edge,
            latency: config
                .targets
                .iter()
                .map(|t| TargetReading::new(t.clone(), config.sampler.history_capacity))
                .collect(),
            ipv4: StackStatus::Pending,
            ipv6: StackStatus::Pending,
            leak: LeakProbeResult::pending(),
            exits: ExitKind::ALL.iter().map(|k| ExitCard::loading(*k)).collect(),
            torn_down: false,
        }
    }

    pub fn stack_mut(&mut self, family: StackFamily) -> &mut StackStatus {
        match family {
            StackFamily::V4 => &mut self.ipv4,
            StackFamily::V6 => &mut self.ipv6,
        }
    }

    /// Both families have answered and neither is reachable.
    pub fn no_stack_reachable(&self) -> bool {
        [&self.ipv4, &self.ipv6]
            .iter()
            .all(|status| status.result().map_or(false, |r| !r.available))
    }

    pub fn is_torn_down(&self) -> bool {
        self.torn_down
    }

    pub fn exit_mut(&mut self, kind: ExitKind) -> Option<&mut ExitCard> {
        self.exits.iter_mut().find(|card| card.kind == kind)
    }
}

/// Shared store. Writers mutate under the lock; readers are woken through
/// a version counter and take a snapshot.
#[derive(Clone)]
pub struct StateHandle {
    inner: Arc<Mutex<DiagnosticsState>>,
    version: Arc<watch::Sender<u64>>,
}

impl StateHandle {
    pub fn new(state: DiagnosticsState) -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            inner: Arc::new(Mutex::new(state)),
            version: Arc::new(tx),
        }
    }

    fn lock(&self) -> MutexGuard<'_, DiagnosticsState> {
        // a panicking writer cannot leave a field half-written; keep serving
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Applies `f`; subscribers are notified only if it reports a change.
    /// After [`StateHandle::freeze`] `f` is not called at all.
    pub fn update<F>(&self, f: F) -> bool
    where
        F: FnOnce(&mut DiagnosticsState) -> bool,
    {
        let changed = {
            let mut state = self.lock();
            !state.torn_down && f(&mut state)
        };
        if changed {
            self.version.send_modify(|v| *v += 1);
        }
        changed
    }

    /// Rejects every later update. Taken under the same lock as writers,
    /// so a completion racing teardown lands before it or not at all.
    pub fn freeze(&self) {
        self.lock().torn_down = true;
    }

    pub fn snapshot(&self) -> DiagnosticsState {
        self.lock().clone()
    }

    pub fn version(&self) -> u64 {
        *self.version.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dual_stack::ReachabilityResult;
    use crate::latency::Sample;

    #[tokio::test]
    async fn subscribers_wake_on_change_only() {
        let config = SentinelConfig::platinum_defaults();
        let handle = StateHandle::new(DiagnosticsState::new(&config, EdgeContext::default()));
        let mut rx = handle.subscribe();

        assert!(!handle.update(|_| false));
        assert_eq!(handle.version(), 0);

        handle.update(|s| {
            s.latency[0].record(Sample { timestamp_ms: 1, round_trip_ms: Some(42) });
            true
        });
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), 1);
        assert_eq!(handle.snapshot().latency[0].history.tail(1), vec![Some(42)]);
    }

    #[test]
    fn frozen_state_rejects_writers() {
        let config = SentinelConfig::platinum_defaults();
        let handle = StateHandle::new(DiagnosticsState::new(&config, EdgeContext::default()));
        handle.freeze();

        let mut called = false;
        assert!(!handle.update(|_| {
            called = true;
            true
        }));
        assert!(!called);
        assert_eq!(handle.version(), 0);
        assert!(handle.snapshot().is_torn_down());
    }

    #[test]
    fn no_stack_reachable_waits_for_both_families() {
        let config = SentinelConfig::platinum_defaults();
        let mut state = DiagnosticsState::new(&config, EdgeContext::default());
        assert!(!state.no_stack_reachable());

        state.ipv4.settle(ReachabilityResult::unavailable(StackFamily::V4));
        assert!(!state.no_stack_reachable());

        state.ipv6.settle(ReachabilityResult::unavailable(StackFamily::V6));
        assert!(state.no_stack_reachable());
    }

    #[test]
    fn fresh_state_has_one_reading_per_target_and_three_exit_cards() {
        let config = SentinelConfig::platinum_defaults();
        let state = DiagnosticsState::new(&config, EdgeContext::default());
        assert_eq!(state.latency.len(), config.targets.len());
        assert!(state.latency.iter().all(|r| r.history.len() == 12));
        assert_eq!(state.exits.len(), 3);
        assert_eq!(state.ipv6, StackStatus::Pending);
    }
}
