//! Settle timer.
//!
//! Gates background analysis until the scene has been motion-free for longer
//! than the settle duration after a burst of activity. All times are stream
//! timestamps.

use std::time::Duration;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PhaseState {
    Idle,
    MotionActive,
    Settling,
}

impl PhaseState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PhaseState::Idle => "idle",
            PhaseState::MotionActive => "motion_active",
            PhaseState::Settling => "settling",
        }
    }
}

/// What the controller decided for one cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PhaseDecision {
    /// Run one background-difference pass this cycle.
    pub authorize_diff: bool,
    /// Motion was seen: confirmation progress must go back to zero.
    pub reset_confirmation: bool,
}

#[derive(Clone, Debug)]
pub struct PhaseController {
    settle_duration: Duration,
    state: PhaseState,
    last_motion_time: Option<Duration>,
    deposit_in_progress: bool,
}

impl PhaseController {
    pub fn new(settle_duration: Duration) -> Self {
        Self {
            settle_duration,
            state: PhaseState::Idle,
            last_motion_time: None,
            deposit_in_progress: false,
        }
    }

    pub fn state(&self) -> PhaseState {
        self.state
    }

    pub fn deposit_in_progress(&self) -> bool {
        self.deposit_in_progress
    }

    pub fn last_motion_time(&self) -> Option<Duration> {
        self.last_motion_time
    }

    pub fn observe(&mut self, motion_detected: bool, now: Duration) -> PhaseDecision {
        if motion_detected {
            self.last_motion_time = Some(now);
            self.deposit_in_progress = true;
            self.transition(PhaseState::MotionActive);
            return PhaseDecision {
                authorize_diff: false,
                reset_confirmation: true,
            };
        }

        if !self.deposit_in_progress {
            return PhaseDecision::default();
        }

        if self.state == PhaseState::MotionActive {
            self.transition(PhaseState::Settling);
        }

        let settled = match self.last_motion_time {
            Some(last) => now.saturating_sub(last) > self.settle_duration,
            None => true,
        };
        PhaseDecision {
            authorize_diff: settled,
            reset_confirmation: false,
        }
    }

    /// Deposit confirmed. `keep_open` leaves the cycle open for other
    /// candidates still building up confirmation.
    pub fn deposit_confirmed(&mut self, keep_open: bool) {
        if keep_open {
            return;
        }
        self.deposit_in_progress = false;
        self.transition(PhaseState::Idle);
    }

    pub fn reset(&mut self) {
        self.deposit_in_progress = false;
        self.last_motion_time = None;
        self.transition(PhaseState::Idle);
    }

    fn transition(&mut self, next: PhaseState) {
        if self.state != next {
            log::debug!("phase {} -> {}", self.state.as_str(), next.as_str());
            self.state = next;
        }
    }
}
