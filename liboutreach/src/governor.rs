//! Send pacing for dispatch workers
//!
//! Two mechanisms work together: a global semaphore caps how many accounts
//! can be mid-turn at the same instant, and a per-account eligibility clock
//! enforces a jittered minimum gap between consecutive sends from the same
//! account. Platform throttling escalates the gap multiplicatively up to a
//! configured ceiling; a clean send resets the escalation.

use rand::Rng;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use tracing::debug;

use crate::config::MIN_DELAY_FLOOR_SECS;
use crate::error::{ConfigError, Result};

/// Bounds of the jittered inter-send delay, in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DelayWindow {
    pub min_secs: u64,
    pub max_secs: u64,
}

impl DelayWindow {
    pub fn new(min_secs: u64, max_secs: u64) -> Result<Self> {
        if min_secs < MIN_DELAY_FLOOR_SECS {
            return Err(ConfigError::Invalid(format!(
                "delay window minimum must be at least {}s",
                MIN_DELAY_FLOOR_SECS
            ))
            .into());
        }
        if min_secs > max_secs {
            return Err(
                ConfigError::Invalid("delay window minimum exceeds maximum".to_string()).into(),
            );
        }
        Ok(DelayWindow { min_secs, max_secs })
    }

    /// Uniform sample from the window. A degenerate window (min == max)
    /// always yields exactly that value.
    fn sample(&self) -> Duration {
        if self.min_secs == self.max_secs {
            return Duration::from_secs(self.min_secs);
        }
        let secs = rand::thread_rng().gen_range(self.min_secs..=self.max_secs);
        Duration::from_secs(secs)
    }
}

struct AccountClock {
    next_eligible: Instant,
    /// Consecutive throttle hits since the last clean send
    penalty_level: u32,
}

/// Paces sends across accounts
#[derive(Clone)]
pub struct RateGovernor {
    window: DelayWindow,
    backoff_ceiling: Duration,
    slots: Arc<Semaphore>,
    clocks: Arc<Mutex<HashMap<String, AccountClock>>>,
}

impl RateGovernor {
    pub fn new(window: DelayWindow, max_concurrent: usize, backoff_ceiling: Duration) -> Self {
        RateGovernor {
            window,
            backoff_ceiling,
            slots: Arc::new(Semaphore::new(max_concurrent)),
            clocks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Sleep until the account's eligibility time has passed.
    ///
    /// An account with no recorded send is immediately eligible. Callers
    /// hold their concurrency slot across this wait; a cooling-down account
    /// counts against the cap until its delay has elapsed.
    pub async fn wait_until_eligible(&self, account: &str) {
        let deadline = {
            let clocks = self.clocks.lock().await;
            clocks.get(account).map(|c| c.next_eligible)
        };
        if let Some(deadline) = deadline {
            let now = Instant::now();
            if deadline > now {
                debug!(account, wait = ?(deadline - now), "Cooling down before next send");
                tokio::time::sleep_until(deadline).await;
            }
        }
    }

    /// Acquire a concurrency slot; held for an account's whole turn, from
    /// session resolution through the post-send cooldown
    pub async fn acquire_slot(&self) -> OwnedSemaphorePermit {
        // The semaphore is never closed while the governor is alive
        self.slots
            .clone()
            .acquire_owned()
            .await
            .expect("concurrency gate closed")
    }

    /// Record a clean send: schedule the next eligibility with fresh jitter
    /// and reset any throttle escalation.
    pub async fn observe_send(&self, account: &str) {
        let delay = self.window.sample();
        let mut clocks = self.clocks.lock().await;
        clocks.insert(
            account.to_string(),
            AccountClock {
                next_eligible: Instant::now() + delay,
                penalty_level: 0,
            },
        );
        debug!(account, ?delay, "Scheduled next send");
    }

    /// Record a platform throttle: push eligibility out by an escalating
    /// multiple of the window maximum, capped at the configured ceiling.
    pub async fn penalize(&self, account: &str) -> Duration {
        let mut clocks = self.clocks.lock().await;
        let level = clocks
            .get(account)
            .map(|c| c.penalty_level.saturating_add(1))
            .unwrap_or(1);

        let raw = Duration::from_secs(self.window.max_secs.saturating_mul(level as u64));
        let penalty = raw.min(self.backoff_ceiling);

        clocks.insert(
            account.to_string(),
            AccountClock {
                next_eligible: Instant::now() + penalty,
                penalty_level: level,
            },
        );
        debug!(account, level, ?penalty, "Applied throttle penalty");
        penalty
    }

    /// Slots currently free, for progress reporting
    pub fn available_slots(&self) -> usize {
        self.slots.available_permits()
    }
}
