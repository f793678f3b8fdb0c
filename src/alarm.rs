//! Data timeout alarm.
//!
//! The monitor is a two-state machine driven by the reader loop. It reports a
//! transition only once; repeated checks while alarmed stay silent.

use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmState {
    Quiet,
    Alarmed,
}

#[derive(Debug, Clone)]
pub struct AlarmMonitor {
    threshold: Duration,
    last: Instant,
    state: AlarmState,
}

impl AlarmMonitor {
    pub fn new(threshold: Duration, now: Instant) -> Self {
        Self {
            threshold,
            last: now,
            state: AlarmState::Quiet,
        }
    }

    pub fn state(&self) -> AlarmState {
        self.state
    }

    pub fn is_alarmed(&self) -> bool {
        self.state == AlarmState::Alarmed
    }

    /// A frame decoded successfully. Returns `Some(false)` if this cleared the alarm.
    pub fn reset(&mut self, now: Instant) -> Option<bool> {
        self.last = now;
        self.quiet()
    }

    /// Returns `Some(true)` when the silence window has just been exceeded.
    pub fn check(&mut self, now: Instant) -> Option<bool> {
        if self.state == AlarmState::Quiet && now.saturating_duration_since(self.last) >= self.threshold {
            self.state = AlarmState::Alarmed;
            return Some(true);
        }
        None
    }

    /// Operator acknowledgement: quiet the alarm and restart the silence window.
    pub fn acknowledge(&mut self, now: Instant) -> Option<bool> {
        self.reset(now)
    }

    fn quiet(&mut self) -> Option<bool> {
        match self.state {
            AlarmState::Alarmed => {
                self.state = AlarmState::Quiet;
                Some(false)
            }
            AlarmState::Quiet => None,
        }
    }
}
