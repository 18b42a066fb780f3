/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Messages that peers (and this replica itself) feed into the consensus state machine.
//!
//! Every [`MessageEvent`] variant has a `validate_basic` check that looks only at the message
//! itself. [`MessageSender`] runs this check before admitting a message into the state machine's
//! bounded queue, so malformed messages never reach consensus state.

use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use crate::types::{
    bit_array::BitArray,
    data_types::{Height, PeerID, Round},
    part_set::Part,
    proposal::Proposal,
    validation::ValidationError,
    vote::{SignedMsgType, Vote, MAX_VOTES_COUNT},
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposalEvent {
    pub proposal: Proposal,
}

impl ProposalEvent {
    pub fn validate_basic(&self) -> Result<(), ValidationError> {
        self.proposal.validate_basic()
    }
}

/// Tells a peer which validators prevoted for the proposal's proof-of-lock round.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProposalPOLEvent {
    pub height: Height,
    pub proposal_pol_round: Round,
    pub proposal_pol: BitArray,
}

impl ProposalPOLEvent {
    pub fn validate_basic(&self) -> Result<(), ValidationError> {
        if self.height.int() < 0 {
            return Err(ValidationError::NegativeHeight);
        }
        if self.proposal_pol_round.int() < 0 {
            return Err(ValidationError::NegativeRound);
        }
        if self.proposal_pol.is_empty() {
            return Err(ValidationError::EmptyPOLBitArray);
        }
        if self.proposal_pol.size() > MAX_VOTES_COUNT {
            return Err(ValidationError::TooManyVotes {
                size: self.proposal_pol.size(),
                max: MAX_VOTES_COUNT,
            });
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlockPartEvent {
    pub height: Height,
    pub round: Round,
    pub part: Part,
}

impl BlockPartEvent {
    pub fn validate_basic(&self) -> Result<(), ValidationError> {
        if self.height.int() < 0 {
            return Err(ValidationError::NegativeHeight);
        }
        if self.round.int() < 0 {
            return Err(ValidationError::NegativeRound);
        }
        self.part.validate_basic()
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VoteEvent {
    pub vote: Vote,
}

impl VoteEvent {
    pub fn validate_basic(&self) -> Result<(), ValidationError> {
        self.vote.validate_basic()
    }
}

/// Tells a peer that the sender holds the vote of the validator at `index`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HasVoteEvent {
    pub height: Height,
    pub round: Round,
    pub vote_type: SignedMsgType,
    pub index: i32,
}

impl HasVoteEvent {
    pub fn validate_basic(&self) -> Result<(), ValidationError> {
        if self.height.int() < 0 {
            return Err(ValidationError::NegativeHeight);
        }
        if self.round.int() < 0 {
            return Err(ValidationError::NegativeRound);
        }
        if !self.vote_type.is_vote_type() {
            return Err(ValidationError::InvalidVoteType);
        }
        if self.index < 0 {
            return Err(ValidationError::NegativeValidatorIndex);
        }
        Ok(())
    }
}

/// Tells the state machine that transactions are available, so a proposer that is waiting for
/// transactions at `(height, round)` can propose now.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundTriggerEvent {
    pub height: Height,
    pub round: Round,
}

impl RoundTriggerEvent {
    pub fn validate_basic(&self) -> Result<(), ValidationError> {
        if self.height.int() < 0 {
            return Err(ValidationError::NegativeHeight);
        }
        if self.round.int() < 0 {
            return Err(ValidationError::NegativeRound);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MessageEvent {
    Proposal(ProposalEvent),
    ProposalPOL(ProposalPOLEvent),
    BlockPart(BlockPartEvent),
    Vote(VoteEvent),
    HasVote(HasVoteEvent),
    RoundTrigger(RoundTriggerEvent),
}

impl MessageEvent {
    pub fn validate_basic(&self) -> Result<(), ValidationError> {
        match self {
            MessageEvent::Proposal(event) => event.validate_basic(),
            MessageEvent::ProposalPOL(event) => event.validate_basic(),
            MessageEvent::BlockPart(event) => event.validate_basic(),
            MessageEvent::Vote(event) => event.validate_basic(),
            MessageEvent::HasVote(event) => event.validate_basic(),
            MessageEvent::RoundTrigger(event) => event.validate_basic(),
        }
    }

    /// The height the message is about.
    pub fn height(&self) -> Height {
        match self {
            MessageEvent::Proposal(event) => event.proposal.height,
            MessageEvent::ProposalPOL(event) => event.height,
            MessageEvent::BlockPart(event) => event.height,
            MessageEvent::Vote(event) => event.vote.height,
            MessageEvent::HasVote(event) => event.height,
            MessageEvent::RoundTrigger(event) => event.height,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            MessageEvent::Proposal(_) => "Proposal",
            MessageEvent::ProposalPOL(_) => "ProposalPOL",
            MessageEvent::BlockPart(_) => "BlockPart",
            MessageEvent::Vote(_) => "Vote",
            MessageEvent::HasVote(_) => "HasVote",
            MessageEvent::RoundTrigger(_) => "RoundTrigger",
        }
    }
}

impl From<Proposal> for MessageEvent {
    fn from(proposal: Proposal) -> Self {
        MessageEvent::Proposal(ProposalEvent { proposal })
    }
}

impl From<Vote> for MessageEvent {
    fn from(vote: Vote) -> Self {
        MessageEvent::Vote(VoteEvent { vote })
    }
}

/// A [`MessageEvent`] and the peer it came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Message {
    pub event: MessageEvent,
    pub peer_id: PeerID,
}

impl Message {
    pub fn new(event: MessageEvent, peer_id: PeerID) -> Message {
        Message { event, peer_id }
    }
}

#[derive(Debug)]
pub enum EnqueueError {
    /// The message failed its structural checks and was dropped.
    Invalid(ValidationError),
    /// The queue is at capacity. The message is handed back so that it can be retried.
    QueueFull(Box<Message>),
    /// The state machine has stopped.
    Stopped(Box<Message>),
}

impl Display for EnqueueError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            EnqueueError::Invalid(err) => write!(f, "invalid message: {}", err),
            EnqueueError::QueueFull(msg) => {
                write!(f, "message queue is full, {} not enqueued", msg.event.name())
            }
            EnqueueError::Stopped(msg) => {
                write!(f, "state machine stopped, {} not enqueued", msg.event.name())
            }
        }
    }
}

impl From<ValidationError> for EnqueueError {
    fn from(value: ValidationError) -> Self {
        EnqueueError::Invalid(value)
    }
}

/// The producer side of the state machine's bounded inbound message queue.
#[derive(Clone)]
pub struct MessageSender(SyncSender<Message>);

impl MessageSender {
    /// Validate and enqueue `message` without blocking.
    pub fn try_send(&self, message: Message) -> Result<(), EnqueueError> {
        message.event.validate_basic()?;
        self.0.try_send(message).map_err(|err| match err {
            TrySendError::Full(message) => EnqueueError::QueueFull(Box::new(message)),
            TrySendError::Disconnected(message) => EnqueueError::Stopped(Box::new(message)),
        })
    }

    /// Validate and enqueue `message`, blocking while the queue is full.
    pub fn send(&self, message: Message) -> Result<(), EnqueueError> {
        message.event.validate_basic()?;
        self.0
            .send(message)
            .map_err(|err| EnqueueError::Stopped(Box::new(err.0)))
    }
}

/// Create a bounded message queue holding at most `capacity` messages.
pub(crate) fn message_queue(capacity: usize) -> (MessageSender, Receiver<Message>) {
    let (sender, receiver) = mpsc::sync_channel(capacity);
    (MessageSender(sender), receiver)
}
