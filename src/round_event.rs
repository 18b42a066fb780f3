/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Timeout schedules and firings.

use std::fmt::{self, Display, Formatter};
use std::time::Duration;

use crate::round_state::RoundState;
use crate::round_step::RoundStep;
use crate::types::data_types::{Height, Round};

/// A request to be notified after `ttl` that `(height, round, step)` timed out, and the notification
/// itself when it fires.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RoundEvent {
    pub ttl: Duration,
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
}

impl RoundEvent {
    pub fn new(ttl: Duration, height: Height, round: Round, step: RoundStep) -> RoundEvent {
        RoundEvent {
            ttl,
            height,
            round,
            step,
        }
    }

    /// Whether this event is still actionable given the progress recorded in `round_state`.
    pub fn is_valid(&self, round_state: &RoundState) -> bool {
        self.is_valid_at(round_state.height, round_state.round, round_state.step)
    }

    /// An event is actionable iff it is for the current height and for the current or a later
    /// `(round, step)`.
    pub fn is_valid_at(&self, height: Height, round: Round, step: RoundStep) -> bool {
        self.height == height
            && (self.round > round || (self.round == round && self.step >= step))
    }

    /// Whether the timeout ticker should replace the schedule `cur` with this one.
    ///
    /// Height is the primary key, then round, then step. A schedule for the same height and round
    /// replaces `cur` only if it is for a strictly later step, except that anything replaces a
    /// `NewHeight` schedule.
    pub(crate) fn supersedes(&self, cur: &RoundEvent) -> bool {
        if self.height != cur.height {
            return self.height > cur.height;
        }
        if self.round != cur.round {
            return self.round > cur.round;
        }
        cur.step == RoundStep::NewHeight || self.step > cur.step
    }
}

impl Display for RoundEvent {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:?} ; {}/{} {}",
            self.ttl, self.height, self.round, self.step
        )
    }
}
