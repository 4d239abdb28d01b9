//! In-memory cooldown gate.
//!
//! Absorbs frame-rate repetition of the same plate: a vehicle crossing the
//! frame is read on many consecutive frames, but only the first reading (and
//! any reading after the cooldown window) is let through to the sink.

use crate::recognize::FormattedPlate;
use chrono::{DateTime, Duration, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateDecision {
    Accept,
    Reject,
}

impl GateDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateDecision::Accept => "accepted",
            GateDecision::Reject => "rejected",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CooldownState {
    last_plate: Option<FormattedPlate>,
    last_time: Option<DateTime<Utc>>,
}

impl CooldownState {
    pub fn last_plate(&self) -> Option<&FormattedPlate> {
        self.last_plate.as_ref()
    }

    pub fn last_time(&self) -> Option<DateTime<Utc>> {
        self.last_time
    }
}

#[derive(Debug, Clone)]
pub struct CooldownGate {
    window: Duration,
    state: CooldownState,
}

impl CooldownGate {
    pub fn new(window: std::time::Duration) -> Self {
        Self {
            window: Duration::from_std(window).unwrap_or(Duration::MAX),
            state: CooldownState::default(),
        }
    }

    pub fn window(&self) -> Duration {
        self.window
    }

    pub fn state(&self) -> &CooldownState {
        &self.state
    }

    /// Decide on a candidate seen at `at`. Accepting updates the state
    /// whether or not the sink goes on to store anything.
    pub fn observe(&mut self, plate: &FormattedPlate, at: DateTime<Utc>) -> GateDecision {
        let repeat = self.state.last_plate.as_ref() == Some(plate);
        let expired = match self.state.last_time {
            Some(last) => at - last > self.window,
            None => true,
        };

        if repeat && !expired {
            return GateDecision::Reject;
        }

        self.state.last_plate = Some(plate.clone());
        // never move backwards, even if the wall clock does
        self.state.last_time = Some(match self.state.last_time {
            Some(last) => last.max(at),
            None => at,
        });
        GateDecision::Accept
    }
}
