/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus state machine thread.
//!
//! The state machine thread is the only writer of the [`RoundState`]. It runs a loop that takes one
//! input at a time and processes it to completion before taking the next:
//! 1. Messages that the state machine sent to itself (its own proposal, block parts, and votes).
//! 2. Timeouts fired by the [`TimeoutTicker`].
//! 3. Messages from peers, taken from the bounded message queue.
//!
//! Own messages go first so that a transition that produced them is fully settled before anything
//! else is looked at. Between timeouts and peer messages there is no priority: each is handled as
//! soon as it is seen, and stale inputs are discarded using [`RoundEvent::is_valid`] and the guards at
//! the top of every transition.
//!
//! ## Transitions
//!
//! Every step change goes through one of the `enter_*` functions in [`transitions`], each of which
//! starts with a guard that makes it a no-op if the state machine has already moved past the
//! requested `(height, round, step)`. Entering a step arms that step's timeout (see
//! [`RoundStep::entry_timeout`]). Timeouts are handled in [`StateMachine::handle_timeout`].
//!
//! Peer proposals, block parts, and votes for a height above the current one are held in a
//! [`MessageBuffer`] and replayed after the state machine commits its way to that height.

use std::collections::VecDeque;
use std::fmt::{self, Display, Formatter};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, SystemTime};

use crate::app::App;
use crate::blockchain::{BlockStore, Blockchain};
use crate::config::StateMachineConfiguration;
use crate::events::{Event, NewRoundEvent, NewRoundStepEvent, TimeoutProposeEvent, TimeoutWaitEvent};
use crate::messages::{Message, MessageEvent, ProposalEvent, RoundTriggerEvent, VoteEvent};
use crate::networking::Network;
use crate::round_event::RoundEvent;
use crate::round_state::{RoundState, RoundStateCamera};
use crate::round_step::RoundStep;
use crate::signer::{PrivValidator, SignerError};
use crate::timeout_ticker::TimeoutTicker;
use crate::types::{
    block::BlockError,
    data_types::{Height, PeerID, Round},
    part_set::PartSetError,
    state::State,
    vote_set::{HeightVoteSet, VoteSet, VoteSetError},
};

mod message_buffer;
mod transitions;

use message_buffer::MessageBuffer;

#[cfg(test)]
mod tests;

/// Longest time the loop waits on the message queue before checking the ticker and shutdown again.
const MESSAGE_POLL_INTERVAL: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsensusError {
    InvalidProposalSignature,
    InvalidProposalPOLRound,
    AddingVote(VoteSetError),
    /// A validator signed two different votes for the same height, round, and vote type.
    SignatureFoundInPastBlocks { validator_index: i32 },
    Signer(SignerError),
    PartSet(PartSetError),
    Block(BlockError),
}

impl Display for ConsensusError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ConsensusError::InvalidProposalSignature => write!(f, "invalid proposal signature"),
            ConsensusError::InvalidProposalPOLRound => write!(f, "invalid proposal POL round"),
            ConsensusError::AddingVote(err) => write!(f, "error adding vote: {}", err),
            ConsensusError::SignatureFoundInPastBlocks { validator_index } => write!(
                f,
                "found conflicting votes from validator {}",
                validator_index
            ),
            ConsensusError::Signer(err) => write!(f, "{}", err),
            ConsensusError::PartSet(err) => write!(f, "error adding block part: {:?}", err),
            ConsensusError::Block(err) => write!(f, "invalid proposal block: {}", err),
        }
    }
}

impl From<VoteSetError> for ConsensusError {
    fn from(value: VoteSetError) -> Self {
        ConsensusError::AddingVote(value)
    }
}

impl From<SignerError> for ConsensusError {
    fn from(value: SignerError) -> Self {
        ConsensusError::Signer(value)
    }
}

impl From<PartSetError> for ConsensusError {
    fn from(value: PartSetError) -> Self {
        ConsensusError::PartSet(value)
    }
}

impl From<BlockError> for ConsensusError {
    fn from(value: BlockError) -> Self {
        ConsensusError::Block(value)
    }
}

pub(crate) struct StateMachine<B: BlockStore, A: App, N: Network, V: PrivValidator> {
    configuration: StateMachineConfiguration,
    state: State,
    round_state: RoundState,
    blockchain: Blockchain<B>,
    app: A,
    network: N,
    validator: V,
    ticker: TimeoutTicker,
    messages: Receiver<Message>,
    internal_queue: VecDeque<Message>,
    future_messages: MessageBuffer,
    event_publisher: Option<Sender<Event>>,
    round_state_camera: RoundStateCamera,
}

impl<B: BlockStore, A: App, N: Network, V: PrivValidator> StateMachine<B, A, N, V> {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        configuration: StateMachineConfiguration,
        state: State,
        blockchain: Blockchain<B>,
        app: A,
        network: N,
        validator: V,
        messages: Receiver<Message>,
        event_publisher: Option<Sender<Event>>,
    ) -> StateMachine<B, A, N, V> {
        let round_state = RoundState::new(&state, SystemTime::now(), None);
        let round_state_camera = RoundStateCamera::new(round_state.summary());
        let future_messages = MessageBuffer::new(configuration.future_msg_buffer_capacity);
        let mut state_machine = StateMachine {
            configuration,
            state: state.clone(),
            round_state,
            blockchain,
            app,
            network,
            validator,
            ticker: TimeoutTicker::new(),
            messages,
            internal_queue: VecDeque::new(),
            future_messages,
            event_publisher,
            round_state_camera,
        };
        state_machine.update_to_state(state);
        state_machine.publish_round_state();
        state_machine
    }

    pub(crate) fn round_state_camera(&self) -> RoundStateCamera {
        self.round_state_camera.clone()
    }

    /// Handle one message, whether from a peer or from this replica itself.
    pub(crate) fn handle_msg(&mut self, msg: Message) -> Result<(), ConsensusError> {
        if msg.event.height() > self.round_state.height && is_buffered_kind(&msg.event) {
            let height = msg.event.height();
            if !self.future_messages.insert(msg) {
                log::debug!(
                    "future message buffer is full ({} messages), dropping message for height {}",
                    self.future_messages.len(),
                    height
                );
            }
            return Ok(());
        }

        let Message { event, peer_id } = msg;
        match event {
            MessageEvent::Proposal(ProposalEvent { proposal }) => self.set_proposal(proposal),
            MessageEvent::BlockPart(block_part_event) => self
                .add_proposal_block_part(block_part_event)
                .map(|_| ()),
            MessageEvent::Vote(VoteEvent { vote }) => self.add_vote(vote, peer_id).map(|_| ()),
            MessageEvent::RoundTrigger(round_trigger_event) => {
                self.handle_round_trigger(round_trigger_event);
                Ok(())
            }
            // Peer-state hints for the gossip layer.
            MessageEvent::ProposalPOL(_) | MessageEvent::HasVote(_) => Ok(()),
        }
    }

    /// Queue the buffered messages for the current height behind any own messages.
    fn replay_future_messages(&mut self) {
        let msgs = self.future_messages.take(self.round_state.height);
        if !msgs.is_empty() {
            log::debug!(
                "replaying {} buffered messages for height {}",
                msgs.len(),
                self.round_state.height
            );
        }
        self.internal_queue.extend(msgs);
    }

    /// Handle a fired timeout. Timeouts for a `(height, round, step)` that the state machine has
    /// already moved past are ignored.
    pub(crate) fn handle_timeout(&mut self, event: RoundEvent) {
        if !event.is_valid(&self.round_state) {
            log::debug!(
                "ignoring timeout {} at {}/{}/{}",
                event,
                self.round_state.height,
                self.round_state.round,
                self.round_state.step
            );
            return;
        }

        match event.step {
            RoundStep::NewHeight => {
                if self.round_state.waiting_for_txs {
                    self.enter_propose(event.height, event.round)
                } else {
                    self.new_round(event.height, Round::new(0))
                }
            }
            RoundStep::Propose => {
                self.publish(Event::TimeoutPropose(TimeoutProposeEvent {
                    timestamp: SystemTime::now(),
                    height: event.height,
                    round: event.round,
                    timeout: event.ttl,
                }));
                self.enter_prevote(event.height, event.round)
            }
            RoundStep::Prevote => {
                self.publish(Event::TimeoutWait(TimeoutWaitEvent {
                    timestamp: SystemTime::now(),
                    height: event.height,
                    round: event.round,
                    step: event.step,
                    timeout: event.ttl,
                }));
                self.enter_precommit(event.height, event.round)
            }
            RoundStep::Precommit => {
                self.publish(Event::TimeoutWait(TimeoutWaitEvent {
                    timestamp: SystemTime::now(),
                    height: event.height,
                    round: event.round,
                    step: event.step,
                    timeout: event.ttl,
                }));
                self.new_round(event.height, event.round + 1)
            }
            RoundStep::Commit => panic!("invalid timeout step: {}", event.step),
        }
    }

    fn handle_round_trigger(&mut self, event: RoundTriggerEvent) {
        let as_round_event =
            RoundEvent::new(Duration::ZERO, event.height, event.round, RoundStep::NewHeight);
        if self.round_state.waiting_for_txs
            && self.round_state.step == RoundStep::NewHeight
            && event.round == self.round_state.round
            && as_round_event.is_valid(&self.round_state)
        {
            self.enter_propose(event.height, event.round)
        }
    }

    /// Start `round` of `height`.
    ///
    /// This is a no-op if `round` has already been started. Rounds after round 0 always clear the
    /// previous round's proposal. Round 0 keeps whatever proposal arrived since the height began.
    pub(crate) fn new_round(&mut self, height: Height, round: Round) {
        let rs = &self.round_state;
        if rs.height != height
            || round < rs.round
            || (rs.round == round && rs.step != RoundStep::NewHeight)
        {
            log::debug!(
                "new_round({}/{}) called at {}/{}/{}, ignoring",
                height,
                round,
                rs.height,
                rs.round,
                rs.step
            );
            return;
        }

        if rs.start_time > SystemTime::now() {
            log::warn!(
                "new_round({}/{}) called before the height's start time",
                height,
                round
            );
        }

        let mut validators = rs.validators.clone();
        if rs.round < round {
            validators.increment_proposer_priority((round - rs.round) as u32);
        }

        self.update_round_step(round, RoundStep::NewHeight);
        self.round_state.validators = validators;
        if round.int() != 0 {
            self.round_state.proposal = None;
            self.round_state.proposal_block = None;
            self.round_state.proposal_block_parts = None;
        }
        self.round_state.votes.set_round(round + 1);
        self.round_state.triggered_timeout_precommit = false;
        self.new_step();

        self.publish(Event::NewRound(NewRoundEvent {
            timestamp: SystemTime::now(),
            height,
            round,
            proposer: self.round_state.proposer().map(|proposer| proposer.key_bytes()),
        }));

        let wait_for_txs =
            self.configuration.wait_for_txs && round.int() == 0 && !self.need_proof_block(height);
        if wait_for_txs {
            self.round_state.waiting_for_txs = true;
            let interval = self.configuration.create_empty_blocks_interval;
            if interval > Duration::ZERO {
                self.ticker.schedule_timeout(RoundEvent::new(
                    interval,
                    height,
                    round,
                    RoundStep::NewHeight,
                ));
            }
        } else {
            self.enter_propose(height, round)
        }
    }

    /// Whether the block at `height` must be proposed without waiting for transactions, because it
    /// is the first block or because it carries a new app hash.
    pub(crate) fn need_proof_block(&self, height: Height) -> bool {
        if height == self.state.initial_height {
            return true;
        }
        match self.blockchain.load_block_meta(height - 1) {
            Some(last_block_meta) => self.state.app_hash != last_block_meta.header.app_hash,
            None => true,
        }
    }

    pub(crate) fn update_height(&mut self, height: Height) {
        self.round_state.height = height;
    }

    pub(crate) fn update_round_step(&mut self, round: Round, step: RoundStep) {
        self.round_state.round = round;
        self.round_state.step = step;
    }

    /// Reset the round state for the height after `state`.
    pub(crate) fn update_to_state(&mut self, state: State) {
        let rs = &self.round_state;
        let last_commit = if rs.commit_round.is_some() && rs.height == state.last_block_height {
            rs.votes
                .precommits(rs.commit_round)
                .and_then(VoteSet::make_commit)
        } else if state.last_block_height >= state.initial_height {
            let commit = self.blockchain.load_commit(state.last_block_height);
            if commit.is_none() {
                log::error!(
                    "no commit found for the last block at height {}",
                    state.last_block_height
                );
            }
            commit
        } else {
            None
        };
        let start_time = rs.commit_time.unwrap_or_else(SystemTime::now)
            + self.configuration.timeouts.commit;

        self.update_height(state.next_height());
        self.update_round_step(Round::new(0), RoundStep::NewHeight);

        let rs = &mut self.round_state;
        rs.start_time = start_time;
        rs.commit_time = None;
        rs.validators = state.validators.clone();
        rs.proposal = None;
        rs.proposal_block = None;
        rs.proposal_block_parts = None;
        rs.locked_round = Round::NONE;
        rs.locked_block = None;
        rs.locked_block_parts = None;
        rs.valid_round = Round::NONE;
        rs.valid_block = None;
        rs.valid_block_parts = None;
        rs.votes = HeightVoteSet::new(
            state.chain_id,
            rs.height,
            state.validators.clone(),
        );
        rs.commit_round = Round::NONE;
        rs.last_commit = last_commit;
        rs.last_validators = state.last_validators.clone();
        rs.triggered_timeout_precommit = false;
        rs.waiting_for_txs = false;

        self.state = state;
        self.new_step();
        self.replay_future_messages();
    }

    /// Arm the timeout of `step` at `(height, round)`.
    fn schedule_round_step(&self, height: Height, round: Round, step: RoundStep) {
        let ttl = step.entry_timeout(
            round,
            self.round_state.start_time,
            SystemTime::now(),
            &self.configuration.timeouts,
        );
        if let Some(ttl) = ttl {
            self.ticker
                .schedule_timeout(RoundEvent::new(ttl, height, round, step));
        }
    }

    /// Arm the `NewHeight` timeout that starts round 0 at the height's start time.
    fn schedule_round_0(&self) {
        self.schedule_round_step(self.round_state.height, Round::new(0), RoundStep::NewHeight)
    }

    fn new_step(&self) {
        self.publish(Event::NewRoundStep(NewRoundStepEvent {
            timestamp: SystemTime::now(),
            height: self.round_state.height,
            round: self.round_state.round,
            step: self.round_state.step,
        }));
    }

    fn publish(&self, event: Event) {
        Event::publish(&self.event_publisher, event)
    }

    fn publish_round_state(&self) {
        self.round_state_camera.update(self.round_state.summary());
    }

    fn send_internal(&mut self, event: MessageEvent) {
        self.internal_queue
            .push_back(Message::new(event, PeerID::LOCAL));
    }

    /// Handle every queued own or replayed message, including ones queued while handling earlier ones.
    pub(crate) fn process_internal_queue(&mut self) {
        while let Some(msg) = self.internal_queue.pop_front() {
            let (name, peer_id) = (msg.event.name(), msg.peer_id);
            if let Err(err) = self.handle_msg(msg) {
                if peer_id == PeerID::LOCAL {
                    log::error!("failed to process own {} message: {}", name, err);
                } else {
                    log::warn!("failed to process buffered {} from {:?}: {}", name, peer_id, err);
                }
            }
        }
    }

    fn run(&mut self, shutdown_signal: Receiver<()>) {
        if let Err(err) = self.ticker.start() {
            log::error!("failed to start the timeout ticker: {:?}", err);
        }
        self.schedule_round_0();

        loop {
            match shutdown_signal.try_recv() {
                Ok(()) | Err(TryRecvError::Disconnected) => break,
                Err(TryRecvError::Empty) => (),
            }

            if !self.internal_queue.is_empty() {
                self.process_internal_queue();
                self.publish_round_state();
                continue;
            }

            if let Ok(event) = self.ticker.tock_chan().try_recv() {
                self.handle_timeout(event);
                self.publish_round_state();
                continue;
            }

            match self.messages.recv_timeout(MESSAGE_POLL_INTERVAL) {
                Ok(msg) => {
                    let (name, peer_id) = (msg.event.name(), msg.peer_id);
                    if let Err(err) = self.handle_msg(msg) {
                        log::warn!("failed to process {} from {:?}: {}", name, peer_id, err);
                    }
                    self.publish_round_state();
                }
                Err(RecvTimeoutError::Timeout) => (),
                Err(RecvTimeoutError::Disconnected) => thread::sleep(MESSAGE_POLL_INTERVAL),
            }
        }

        if let Err(err) = self.ticker.stop() {
            log::debug!("timeout ticker was not running: {:?}", err);
        }
    }
}

fn is_buffered_kind(event: &MessageEvent) -> bool {
    matches!(
        event,
        MessageEvent::Proposal(_) | MessageEvent::BlockPart(_) | MessageEvent::Vote(_)
    )
}

impl<B, A, N, V> StateMachine<B, A, N, V>
where
    B: BlockStore + 'static,
    A: App + 'static,
    N: Network + 'static,
    V: PrivValidator + 'static,
{
    /// Spawn the state machine thread. The thread exits when `shutdown_signal` fires or its sender is
    /// dropped, and stops the ticker on its way out.
    pub(crate) fn start(mut self, shutdown_signal: Receiver<()>) -> JoinHandle<()> {
        thread::spawn(move || self.run(shutdown_signal))
    }
}
