//! Bounded polling for asynchronous backend actions
//!
//! Device attach/detach and backup initiation complete some time after the
//! backend accepts the request. The [`Poller`] re-checks on a fixed tick
//! until the action completes or the policy timeout elapses. Each check is
//! raced against the remaining budget (at least one tick), so a check that
//! never returns still ends in `TimedOut`. Time comes from an injected
//! [`Clock`] so the state machine can be driven without real delays.
//!
//! ```text
//! Requested ──▶ Polling{n} ──▶ Completed{n}
//!                   │  ▲
//!                   └──┘ tick
//!                   │
//!                   └────────▶ TimedOut{n}
//! ```

use std::future::Future;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tracing::debug;

/// Time source for the poller
#[async_trait]
pub trait Clock: Send + Sync {
    /// Current instant
    fn now(&self) -> Instant;

    /// Suspend for `duration`
    async fn sleep(&self, duration: Duration);
}

/// Await `action`, giving up with `None` once `budget` has elapsed on `clock`
pub async fn within<C, Fut>(clock: &C, budget: Duration, action: Fut) -> Option<Fut::Output>
where
    C: Clock + ?Sized,
    Fut: Future,
{
    tokio::select! {
        biased;
        output = action => Some(output),
        () = clock.sleep(budget) => None,
    }
}

/// Wall-clock time via the Tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioClock;

#[async_trait]
impl Clock for TokioClock {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Timeout and tick for one kind of asynchronous action
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollPolicy {
    /// Total time allowed for the action
    pub timeout: Duration,
    /// Interval between checks
    pub tick: Duration,
}

impl PollPolicy {
    /// Volume attach/detach: 90s leaves 20s of the sidecar's 2m budget for
    /// the rest of the call
    pub const ATTACH_DETACH: Self = Self {
        timeout: Duration::from_secs(90),
        tick: Duration::from_secs(2),
    };

    /// Backup initiation
    pub const BACKUP_INITIATION: Self = Self {
        timeout: Duration::from_secs(60),
        tick: Duration::from_secs(5),
    };

    /// Number of ticks slept before the poller gives up
    #[must_use]
    pub fn max_ticks(&self) -> u32 {
        let tick = self.tick.as_nanos().max(1);
        let ticks = self.timeout.as_nanos().div_ceil(tick);
        u32::try_from(ticks).unwrap_or(u32::MAX)
    }
}

/// Poller state; `attempts` counts completed checks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    /// Action requested, no check made yet
    Requested,
    /// Checks in progress
    Polling { attempts: u32 },
    /// The action completed
    Completed { attempts: u32 },
    /// The timeout elapsed before the action completed
    TimedOut { attempts: u32 },
}

impl PollState {
    /// Whether the poller has stopped
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::TimedOut { .. })
    }
}

/// Bounded-wait state machine over a completion check
#[derive(Debug)]
pub struct Poller {
    policy: PollPolicy,
    state: PollState,
}

impl Poller {
    /// Create a poller in the `Requested` state
    #[must_use]
    pub const fn new(policy: PollPolicy) -> Self {
        Self {
            policy,
            state: PollState::Requested,
        }
    }

    /// Current state
    #[must_use]
    pub const fn state(&self) -> PollState {
        self.state
    }

    /// Run `check` immediately and then once per tick until it returns
    /// `true` or the timeout elapses. Returns the terminal state; an error
    /// from `check` aborts polling and is passed through. A check still
    /// pending when the budget runs out times the poller out.
    ///
    /// Running an already-terminal poller returns its state unchanged.
    pub async fn run<C, F, Fut, E>(&mut self, clock: &C, mut check: F) -> Result<PollState, E>
    where
        C: Clock + ?Sized,
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<bool, E>>,
    {
        if self.state.is_terminal() {
            return Ok(self.state);
        }

        let started = clock.now();
        let mut attempts = 0;
        loop {
            self.state = PollState::Polling { attempts };
            let remaining = self
                .policy
                .timeout
                .saturating_sub(clock.now().duration_since(started))
                .max(self.policy.tick);
            let Some(done) = within(clock, remaining, check()).await else {
                debug!(attempts, "check outlived the poll budget");
                self.state = PollState::TimedOut { attempts };
                return Ok(self.state);
            };
            let done = done?;
            attempts += 1;

            if done {
                self.state = PollState::Completed { attempts };
                return Ok(self.state);
            }

            if clock.now().duration_since(started) >= self.policy.timeout {
                self.state = PollState::TimedOut { attempts };
                return Ok(self.state);
            }

            debug!(attempts, "action pending, polling again");
            clock.sleep(self.policy.tick).await;
        }
    }
}
