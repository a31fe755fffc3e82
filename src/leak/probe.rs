use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time;
use tracing::{debug, info, trace};

use super::{CandidateSource, LeakProbeResult, LeakStatus};
use crate::config::{LeakProbeConfig, PrivateRangePolicy};
use crate::observability::{self, ErrorClass};
use crate::scheduler::{CancelSource, CancelToken};

const CANDIDATE_BUFFER: usize = 32;

/// One-shot leak check over a candidate-gathering session.
pub struct LeakProbe {
    source: Arc<dyn CandidateSource>,
    deadline: Duration,
    policy: PrivateRangePolicy,
}

impl LeakProbe {
    pub fn new(source: Arc<dyn CandidateSource>, config: &LeakProbeConfig) -> Self {
        Self {
            source,
            deadline: config.deadline(),
            policy: config.private_ranges,
        }
    }

    /// Runs until the first non-private candidate or the deadline.
    ///
    /// The gathering session is cancelled and its task aborted on every exit
    /// path. If `cancel` fires first the result is still `Pending`.
    pub async fn run(&self, cancel: CancelToken) -> LeakProbeResult {
        let mut result = LeakProbeResult::pending();
        let (tx, mut rx) = mpsc::channel::<String>(CANDIDATE_BUFFER);

        let session = CancelSource::new();
        let source = Arc::clone(&self.source);
        let session_token = session.token();
        let gatherer = tokio::spawn(async move { source.gather(tx, session_token).await });
        let _session = scopeguard::guard((session, gatherer), |(session, gatherer)| {
            session.cancel();
            gatherer.abort();
        });

        let deadline = time::sleep(self.deadline);
        tokio::pin!(deadline);
        let mut gathering_done = false;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("leak probe cancelled before a verdict");
                    return result;
                }
                _ = &mut deadline => {
                    if !gathering_done {
                        observability::record_error(ErrorClass::LEAK_PROBE_STALL);
                        debug!("candidate gathering still running at deadline");
                    }
                    result.expire();
                    break;
                }
                candidate = rx.recv(), if !gathering_done => match candidate {
                    Some(line) => {
                        trace!(candidate = %line, "ice candidate");
                        if result.observe_candidate(&line, self.policy) {
                            break;
                        }
                    }
                    None => gathering_done = true,
                },
            }
        }

        let leaked = result.status() == LeakStatus::Leaked;
        observability::record_leak_verdict(leaked);
        if leaked {
            info!(address = ?result.exposed_address(), "public address exposed through ICE candidates");
        } else {
            info!("no public address in ICE candidates");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use tokio::time::Instant;

    const HOST: &str = "candidate:1261 1 udp 2130706431 192.168.1.23 56143 typ host";
    const SRFLX: &str =
        "candidate:1001 1 udp 1694498815 203.0.113.50 40211 typ srflx raddr 192.168.1.23 rport 56143";

    struct ScriptedSource {
        lines: Vec<(Duration, &'static str)>,
        hang: bool,
        released: Arc<AtomicBool>,
    }

    impl ScriptedSource {
        fn new(lines: Vec<(Duration, &'static str)>, hang: bool) -> (Arc<AtomicBool>, Arc<Self>) {
            let released = Arc::new(AtomicBool::new(false));
            let source = Arc::new(Self {
                lines,
                hang,
                released: Arc::clone(&released),
            });
            (released, source)
        }
    }

    #[async_trait]
    impl CandidateSource for ScriptedSource {
        async fn gather(&self, sink: mpsc::Sender<String>, cancel: CancelToken) {
            let flag = Arc::clone(&self.released);
            let _released = scopeguard::guard(flag, |f| f.store(true, Ordering::SeqCst));
            for (delay, line) in &self.lines {
                time::sleep(*delay).await;
                if sink.send(line.to_string()).await.is_err() {
                    return;
                }
            }
            if self.hang {
                cancel.cancelled().await;
            }
        }
    }

    fn probe(source: Arc<ScriptedSource>, policy: PrivateRangePolicy) -> LeakProbe {
        let config = LeakProbeConfig {
            stun_server: "unused:3478".to_string(),
            deadline_ms: 3_000,
            private_ranges: policy,
        };
        LeakProbe::new(source, &config)
    }

    #[tokio::test(start_paused = true)]
    async fn first_public_candidate_resolves_before_deadline() {
        let (released, source) = ScriptedSource::new(
            vec![(Duration::from_millis(100), HOST), (Duration::from_millis(400), SRFLX)],
            true,
        );
        let started = Instant::now();
        let outer = CancelSource::new();
        let result = probe(source, PrivateRangePolicy::Cidr).run(outer.token()).await;

        assert_eq!(result.status(), LeakStatus::Leaked);
        assert_eq!(result.exposed_address(), Some("203.0.113.50"));
        assert!(started.elapsed() < Duration::from_millis(3_000));

        time::sleep(Duration::from_millis(10)).await;
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn private_only_session_is_clean_at_deadline_and_released() {
        let (released, source) = ScriptedSource::new(vec![(Duration::from_millis(50), HOST)], true);
        let started = Instant::now();
        let outer = CancelSource::new();
        let result = probe(source, PrivateRangePolicy::Cidr).run(outer.token()).await;

        assert_eq!(result.status(), LeakStatus::Clean);
        assert_eq!(result.exposed_address(), None);
        assert!(started.elapsed() >= Duration::from_millis(3_000));

        time::sleep(Duration::from_millis(10)).await;
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn early_finish_still_waits_for_deadline() {
        let (_, source) = ScriptedSource::new(vec![(Duration::from_millis(10), HOST)], false);
        let started = Instant::now();
        let outer = CancelSource::new();
        let result = probe(source, PrivateRangePolicy::Cidr).run(outer.token()).await;
        assert_eq!(result.status(), LeakStatus::Clean);
        assert!(started.elapsed() >= Duration::from_millis(3_000));
    }

    #[tokio::test(start_paused = true)]
    async fn teardown_before_verdict_leaves_pending() {
        let (released, source) = ScriptedSource::new(vec![], true);
        let outer = CancelSource::new();
        let probe = probe(source, PrivateRangePolicy::Cidr);
        let token = outer.token();
        let run = tokio::spawn(async move { probe.run(token).await });

        time::sleep(Duration::from_millis(500)).await;
        outer.cancel();
        let result = run.await.unwrap();
        assert_eq!(result.status(), LeakStatus::Pending);

        time::sleep(Duration::from_millis(10)).await;
        assert!(released.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn policy_decides_172_32() {
        const EDGE: &str = "candidate:1 1 udp 1 172.32.0.5 5000 typ srflx";
        let (_, source) = ScriptedSource::new(vec![(Duration::ZERO, EDGE)], false);
        let outer = CancelSource::new();
        let prefix = probe(Arc::clone(&source), PrivateRangePolicy::Prefix)
            .run(outer.token())
            .await;
        assert_eq!(prefix.status(), LeakStatus::Clean);

        let cidr = probe(source, PrivateRangePolicy::Cidr).run(outer.token()).await;
        assert_eq!(cidr.status(), LeakStatus::Leaked);
        assert_eq!(cidr.exposed_address(), Some("172.32.0.5"));
    }
}
