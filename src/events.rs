/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions of events published by the consensus state machine, for event handling and logging.
//!
//! An event for a given action indicates that the action has been completed. Events are published
//! only if at least one handler is registered or [logging](crate::logging) is enabled.

use std::sync::mpsc::Sender;
use std::time::{Duration, SystemTime};

use crate::round_step::RoundStep;
use crate::types::{
    block::{Block, BlockID},
    crypto_primitives::VerifyingKeyBytes,
    data_types::{Height, Round},
    vote::Vote,
};

pub enum Event {
    // Round progress.
    NewRoundStep(NewRoundStepEvent),
    NewRound(NewRoundEvent),
    CompleteProposal(CompleteProposalEvent),
    TimeoutPropose(TimeoutProposeEvent),
    TimeoutWait(TimeoutWaitEvent),
    // Quorums and locking.
    Polka(PolkaEvent),
    Lock(LockEvent),
    ValidBlock(ValidBlockEvent),
    // Votes and blocks.
    Vote(VoteEvent),
    NewBlock(NewBlockEvent),
    Equivocation(EquivocationEvent),
}

impl Event {
    pub(crate) fn publish(event_publisher: &Option<Sender<Event>>, event: Event) {
        if let Some(event_publisher) = event_publisher {
            if event_publisher.send(event).is_err() {
                log::debug!("event bus is stopped, dropping event");
            }
        }
    }
}

/// The state machine moved to a new step.
pub struct NewRoundStepEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
}

pub struct NewRoundEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub proposer: Option<VerifyingKeyBytes>,
}

/// The proposal block of the round has been fully received.
pub struct CompleteProposalEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub block_id: BlockID,
}

pub struct TimeoutProposeEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub timeout: Duration,
}

/// A prevote or precommit step timed out without the votes needed to move on.
pub struct TimeoutWaitEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
    pub timeout: Duration,
}

/// +2/3 prevotes for a block (`Some`) or nil (`None`).
pub struct PolkaEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub block_id: Option<BlockID>,
}

/// The state machine locked on a block, or released its lock (`block_id` is `None`).
pub struct LockEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub block_id: Option<BlockID>,
}

pub struct ValidBlockEvent {
    pub timestamp: SystemTime,
    pub height: Height,
    pub round: Round,
    pub block_id: BlockID,
}

/// This replica signed and broadcast a vote.
pub struct VoteEvent {
    pub timestamp: SystemTime,
    pub vote: Vote,
}

/// A block was committed, applied, and saved.
pub struct NewBlockEvent {
    pub timestamp: SystemTime,
    pub block: Block,
    pub block_id: BlockID,
}

/// A validator signed two different votes for the same height, round, and vote type.
pub struct EquivocationEvent {
    pub timestamp: SystemTime,
    pub existing: Vote,
    pub conflicting: Vote,
}
