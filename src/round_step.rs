/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The steps of a round and the timeout each step arms on entry.
//!
//! A round moves through the steps in the order they are declared in [`RoundStep`]. Entering a step
//! arms exactly one timeout with the [timeout ticker](crate::timeout_ticker), whose duration is
//! given by [`RoundStep::entry_timeout`]. Leaving a step early (because a quorum arrived before the
//! timeout) needs no explicit cancellation: the next step's timeout supersedes the pending one in the
//! ticker.

use std::fmt::{self, Display, Formatter};
use std::time::{Duration, SystemTime};

use crate::config::Timeouts;
use crate::types::data_types::Round;

/// Phase within a round. Ordered: a later step compares greater than an earlier one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum RoundStep {
    NewHeight = 0,
    Propose = 1,
    Prevote = 2,
    Precommit = 3,
    Commit = 4,
}

impl RoundStep {
    pub const fn int(&self) -> u8 {
        *self as u8
    }

    /// Duration of the timeout armed when entering this step at `round`.
    ///
    /// `NewHeight` waits until the height's `start_time`, which already includes the commit timeout
    /// of the previous height. `Commit` arms nothing: a commit is finalized as soon as the committed
    /// block is held, and the wait before the next height is carried by that height's `NewHeight`.
    pub fn entry_timeout(
        &self,
        round: Round,
        start_time: SystemTime,
        now: SystemTime,
        timeouts: &Timeouts,
    ) -> Option<Duration> {
        let round = round.int().max(0) as u32;
        match self {
            RoundStep::NewHeight => Some(
                start_time
                    .duration_since(now)
                    .unwrap_or(Duration::ZERO),
            ),
            RoundStep::Propose => Some(timeouts.propose + timeouts.propose_delta * round),
            RoundStep::Prevote => Some(timeouts.prevote + timeouts.prevote_delta * round),
            RoundStep::Precommit => Some(timeouts.precommit + timeouts.precommit_delta * round),
            RoundStep::Commit => None,
        }
    }
}

impl Display for RoundStep {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let label = match self {
            RoundStep::NewHeight => "RoundStepNewHeight",
            RoundStep::Propose => "RoundStepPropose",
            RoundStep::Prevote => "RoundStepPrevote",
            RoundStep::Precommit => "RoundStepPrecommit",
            RoundStep::Commit => "RoundStepCommit",
        };
        write!(f, "{}", label)
    }
}
