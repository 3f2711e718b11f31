//! Client-side reconnection with exponential backoff.
//!
//! [`ReconnectState`] is driven by the client's own clock rather than by
//! sleeping: after a disconnect the client calls
//! [`schedule`](ReconnectState::schedule), then checks
//! [`is_due`](ReconnectState::is_due) once per frame.

use std::time::Duration;

use rand::Rng;

/// Configuration for client-side reconnection behaviour.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Delay before the first attempt. Default: 1 s.
    pub initial_delay: Duration,
    /// Multiplier applied to the delay after each failed attempt. Default: 2.0.
    pub backoff_multiplier: f64,
    /// Maximum delay between attempts. Default: 30 s.
    pub max_delay: Duration,
    /// Attempts before giving up. Default: 20.
    pub max_attempts: u32,
    /// Jitter factor (0.0–1.0), applied as ±jitter to each delay. Default: 0.25.
    pub jitter: f64,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            backoff_multiplier: 2.0,
            max_delay: Duration::from_secs(30),
            max_attempts: 20,
            jitter: 0.25,
        }
    }
}

/// Attempt counter plus the clock time of the next attempt.
#[derive(Debug)]
pub struct ReconnectState {
    config: ReconnectConfig,
    attempts: u32,
    current_delay: Duration,
    /// Clock time (seconds) at which the next attempt is due.
    next_attempt_at: Option<f64>,
}

impl ReconnectState {
    pub fn new(config: ReconnectConfig) -> Self {
        let initial = config.initial_delay;
        Self {
            config,
            attempts: 0,
            current_delay: initial,
            next_attempt_at: None,
        }
    }

    /// Arm the next attempt relative to `now`. Returns the chosen delay, or
    /// `None` once every attempt has been used.
    pub fn schedule(&mut self, now: f64) -> Option<Duration> {
        if self.attempts >= self.config.max_attempts {
            self.next_attempt_at = None;
            return None;
        }

        let base = self.current_delay;
        self.attempts += 1;

        let jittered = if self.config.jitter > 0.0 {
            let jitter = self.config.jitter.min(1.0);
            let factor = rand::rng().random_range((1.0 - jitter)..=(1.0 + jitter));
            base.mul_f64(factor)
        } else {
            base
        };
        let delay = jittered.min(self.config.max_delay);

        self.current_delay = self
            .current_delay
            .mul_f64(self.config.backoff_multiplier.max(1.0))
            .min(self.config.max_delay);
        self.next_attempt_at = Some(now + delay.as_secs_f64());

        Some(delay)
    }

    /// Whether an armed attempt has come due.
    pub fn is_due(&self, now: f64) -> bool {
        self.next_attempt_at.is_some_and(|at| now >= at)
    }

    /// Consume the armed attempt.
    pub fn begin_attempt(&mut self) {
        self.next_attempt_at = None;
    }

    /// Forget all attempts (called after a successful connect).
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = self.config.initial_delay;
        self.next_attempt_at = None;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Whether an attempt is armed.
    pub fn is_pending(&self) -> bool {
        self.next_attempt_at.is_some()
    }
}
