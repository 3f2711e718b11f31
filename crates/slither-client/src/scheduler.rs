//! Fixed-interval scheduling of movement sends and reconciliation passes.
//!
//! The client calls [`TickScheduler::tick`] once per frame with the current
//! clock reading. Two independent intervals decide whether a direction
//! message is due and whether the latest snapshot should be reconciled.

use glam::DVec2;
use tracing::{debug, warn};

/// Whether the scheduler produces actions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Idle,
    Running,
}

/// Actions that came due on one tick.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct DueActions {
    /// Direction to send, when the movement interval elapsed and the input
    /// is non-zero.
    pub direction: Option<DVec2>,
    /// Whether the latest snapshot should be reconciled.
    pub reconcile: bool,
}

impl DueActions {
    pub fn is_empty(&self) -> bool {
        self.direction.is_none() && !self.reconcile
    }
}

/// Two-interval tick scheduler driven by an external clock (seconds).
#[derive(Debug)]
pub struct TickScheduler {
    state: SchedulerState,
    movement_interval: f64,
    update_interval: f64,
    last_movement: Option<f64>,
    last_update: Option<f64>,
    /// Clock reading of the previous tick, for regression detection.
    last_now: Option<f64>,
}

impl TickScheduler {
    pub fn new() -> Self {
        Self {
            state: SchedulerState::Idle,
            movement_interval: 0.0,
            update_interval: 0.0,
            last_movement: None,
            last_update: None,
            last_now: None,
        }
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn is_running(&self) -> bool {
        self.state == SchedulerState::Running
    }

    /// Start (or restart) with the given intervals in seconds. The first
    /// tick afterwards fires both actions.
    pub fn start(&mut self, movement_interval: f64, update_interval: f64) {
        self.state = SchedulerState::Running;
        self.movement_interval = movement_interval;
        self.update_interval = update_interval;
        self.last_movement = None;
        self.last_update = None;
        self.last_now = None;
        debug!(movement_interval, update_interval, "Tick scheduler started");
    }

    /// Stop producing actions until the next [`start`](Self::start).
    pub fn stop(&mut self) {
        if self.state == SchedulerState::Running {
            debug!("Tick scheduler stopped");
        }
        self.state = SchedulerState::Idle;
    }

    /// Decide what is due at `now`. `movement` is the current input; a zero
    /// vector never produces a direction send and leaves the movement timer
    /// untouched.
    pub fn tick(&mut self, now: f64, movement: DVec2) -> DueActions {
        if self.state != SchedulerState::Running {
            return DueActions::default();
        }

        if let Some(previous) = self.last_now
            && now < previous
        {
            let regression = previous - now;
            warn!(regression, "Clock went backwards, treating as no elapsed time");
            self.last_movement = self.last_movement.map(|t| t - regression);
            self.last_update = self.last_update.map(|t| t - regression);
        }
        self.last_now = Some(now);

        let mut due = DueActions::default();

        if movement != DVec2::ZERO && Self::elapsed(self.last_movement, now, self.movement_interval) {
            self.last_movement = Some(now);
            due.direction = Some(movement);
        }

        if Self::elapsed(self.last_update, now, self.update_interval) {
            self.last_update = Some(now);
            due.reconcile = true;
        }

        due
    }

    fn elapsed(last: Option<f64>, now: f64, interval: f64) -> bool {
        last.is_none_or(|last| now - last >= interval)
    }
}

impl Default for TickScheduler {
    fn default() -> Self {
        Self::new()
    }
}
