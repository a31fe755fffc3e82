use std::future::Future;
use std::time::Duration;

use rand::RngCore;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};

use crate::error::ScheduleError;

pub trait JitterDistribution {
    fn sample_jitter(&self, rng: &mut dyn RngCore) -> Duration;
}

/// Uniform start offset in `[0, max]`.
#[derive(Debug, Clone)]
pub struct UniformJitter {
    max_ns: u64,
}

impl UniformJitter {
    pub fn new(max: Duration) -> Result<Self, ScheduleError> {
        let max_ns = u64::try_from(max.as_nanos()).map_err(|_| ScheduleError::JitterTooLarge(max))?;
        Ok(Self { max_ns })
    }
}

impl JitterDistribution for UniformJitter {
    fn sample_jitter(&self, rng: &mut dyn RngCore) -> Duration {
        if self.max_ns == 0 {
            return Duration::ZERO;
        }
        let offset = match self.max_ns.checked_add(1) {
            Some(span) => rng.next_u64() % span,
            None => rng.next_u64(),
        };
        Duration::from_nanos(offset)
    }
}

/// Fires once; every [`CancelToken`] derived from it observes the cancellation.
#[derive(Debug)]
pub struct CancelSource {
    tx: watch::Sender<bool>,
}

impl Default for CancelSource {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSource {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx }
    }

    pub fn token(&self) -> CancelToken {
        CancelToken {
            rx: self.tx.subscribe(),
        }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

#[derive(Debug, Clone)]
pub struct CancelToken {
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once cancelled, or once the source is gone.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        while !*rx.borrow_and_update() {
            if rx.changed().await.is_err() {
                return;
            }
        }
    }
}

/// Owns a group of timer tasks that are cancelled together.
///
/// Each fire spawns its job as a separate task raced against the group's
/// token, so a hung job never delays the next tick and is dropped at teardown.
pub struct Scheduler {
    cancel: CancelSource,
    timers: Vec<JoinHandle<()>>,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            cancel: CancelSource::new(),
            timers: Vec::new(),
        }
    }

    pub fn token(&self) -> CancelToken {
        self.cancel.token()
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn active_timers(&self) -> usize {
        self.timers.iter().filter(|h| !h.is_finished()).count()
    }

    /// Runs `job` once after `delay`.
    pub fn spawn_once<F, Fut>(&mut self, delay: Duration, job: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if self.is_cancelled() {
            return;
        }
        let token = self.token();
        let handle = tokio::spawn(async move {
            tokio::select! {
                _ = time::sleep(delay) => {}
                _ = token.cancelled() => return,
            }
            fire(token, job());
        });
        self.timers.push(handle);
    }

    /// Runs `job` every `period`, first at `period` from now.
    pub fn spawn_repeating<F, Fut>(&mut self, period: Duration, mut job: F) -> Result<(), ScheduleError>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        if period.is_zero() {
            return Err(ScheduleError::ZeroInterval);
        }
        if self.is_cancelled() {
            return Ok(());
        }
        let token = self.token();
        let handle = tokio::spawn(async move {
            let mut ticker = time::interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => fire(token.clone(), job()),
                    _ = token.cancelled() => break,
                }
            }
        });
        self.timers.push(handle);
        Ok(())
    }

    /// Cancels every timer and in-flight job owned by this group.
    pub fn cancel_all(&mut self) {
        self.cancel.cancel();
        for handle in self.timers.drain(..) {
            handle.abort();
        }
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

fn fire<Fut>(token: CancelToken, job: Fut)
where
    Fut: Future<Output = ()> + Send + 'static,
{
    tokio::spawn(async move {
        tokio::select! {
            _ = job => {}
            _ = token.cancelled() => {}
        }
    });
}
