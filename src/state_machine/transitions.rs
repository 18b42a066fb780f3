/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Step transitions, and the handling of proposals, block parts, and votes that drives them.
//!
//! The prevote, precommit, and locking rules are those of the Tendermint consensus algorithm
//! ("The latest gossip on BFT consensus", Buchman, Kwon, and Milosevic, 2018).

use std::time::SystemTime;

use super::{ConsensusError, StateMachine};
use crate::app::{
    App, ApplyBlockRequest, ProduceBlockRequest, ValidateBlockRequest, ValidateBlockResponse,
};
use crate::blockchain::BlockStore;
use crate::events::{
    self, CompleteProposalEvent, EquivocationEvent, Event, LockEvent, NewBlockEvent, PolkaEvent,
    ValidBlockEvent,
};
use crate::messages::{BlockPartEvent, MessageEvent};
use crate::networking::Network;
use crate::round_step::RoundStep;
use crate::signer::{PrivValidator, SignerError};
use crate::types::{
    block::{Block, BlockID},
    data_types::{Height, PeerID, Round},
    part_set::{PartSet, BLOCK_PART_SIZE_BYTES},
    proposal::Proposal,
    vote::{SignedMsgType, Vote},
    vote_set::{VoteSet, VoteSetError},
};

impl<B: BlockStore, A: App, N: Network, V: PrivValidator> StateMachine<B, A, N, V> {
    /* ↓↓↓ Propose ↓↓↓ */

    pub(super) fn enter_propose(&mut self, height: Height, round: Round) {
        let rs = &self.round_state;
        if rs.height != height
            || round < rs.round
            || (rs.round == round && rs.step >= RoundStep::Propose)
        {
            log::debug!(
                "enter_propose({}/{}) called at {}/{}/{}, ignoring",
                height,
                round,
                rs.height,
                rs.round,
                rs.step
            );
            return;
        }

        self.update_round_step(round, RoundStep::Propose);
        self.round_state.waiting_for_txs = false;
        self.new_step();
        self.schedule_round_step(height, round, RoundStep::Propose);

        match self.validator.pub_key() {
            None => log::error!(
                "not proposing at {}/{}: {}",
                height,
                round,
                ConsensusError::Signer(SignerError::PubKeyNotSet)
            ),
            Some(pub_key) => {
                let is_proposer = self
                    .round_state
                    .proposer()
                    .map_or(false, |proposer| proposer.verifying_key == pub_key);
                if is_proposer {
                    self.decide_proposal(height, round)
                }
            }
        }

        if self.is_proposal_complete() {
            self.enter_prevote(height, self.round_state.round)
        }
    }

    /// Propose the valid block if there is one, or a new block otherwise. The proposal and its parts
    /// are handled by this replica like any other through the internal queue.
    fn decide_proposal(&mut self, height: Height, round: Round) {
        let (block, parts) = match (
            &self.round_state.valid_block,
            &self.round_state.valid_block_parts,
        ) {
            (Some(block), Some(parts)) => (block.clone(), parts.clone()),
            _ => match self.create_proposal_block(height) {
                Some(block_and_parts) => block_and_parts,
                None => return,
            },
        };

        let block_id = block.block_id(parts.header());
        let proposal = match self.validator.create_proposal(
            self.state.chain_id,
            height,
            round,
            self.round_state.valid_round,
            block_id,
        ) {
            Ok(proposal) => proposal,
            Err(err) => {
                log::error!("failed to sign proposal for {}/{}: {}", height, round, err);
                return;
            }
        };

        log::debug!("proposing block {} at {}/{}", block_id, height, round);
        self.send_internal(MessageEvent::from(proposal.clone()));
        self.network.broadcast(MessageEvent::from(proposal));
        for index in 0..parts.total() {
            if let Some(part) = parts.get_part(index) {
                let event = MessageEvent::BlockPart(BlockPartEvent {
                    height,
                    round,
                    part: part.clone(),
                });
                self.send_internal(event.clone());
                self.network.broadcast(event);
            }
        }
    }

    fn create_proposal_block(&mut self, height: Height) -> Option<(Block, PartSet)> {
        let last_commit = if height == self.state.initial_height {
            None
        } else {
            match &self.round_state.last_commit {
                Some(last_commit) => Some(last_commit.clone()),
                None => {
                    log::error!(
                        "cannot propose at height {}, no commit for the previous block",
                        height
                    );
                    return None;
                }
            }
        };
        let proposer = self.validator.pub_key()?.to_bytes();

        let data = self
            .app
            .produce_block(ProduceBlockRequest::new(height, self.state.app_hash))
            .data;
        let block = self.state.make_block(height, data, last_commit, proposer);
        let parts = block.make_part_set(BLOCK_PART_SIZE_BYTES);
        Some((block, parts))
    }

    /// Whether the proposal and its block are held and, if the proposal carries a proof-of-lock
    /// round, the prevotes of that round hold a +2/3 majority.
    pub(super) fn is_proposal_complete(&self) -> bool {
        let rs = &self.round_state;
        let Some(proposal) = &rs.proposal else {
            return false;
        };
        if rs.proposal_block.is_none() {
            return false;
        }
        if !proposal.pol_round.is_some() {
            return true;
        }
        rs.votes
            .prevotes(proposal.pol_round)
            .map_or(false, VoteSet::has_two_thirds_majority)
    }

    pub(super) fn set_proposal(&mut self, proposal: Proposal) -> Result<(), ConsensusError> {
        let rs = &self.round_state;
        if rs.proposal.is_some() || proposal.height != rs.height || proposal.round != rs.round {
            return Ok(());
        }

        if proposal.pol_round < Round::NONE
            || (proposal.pol_round.is_some() && proposal.pol_round >= proposal.round)
        {
            return Err(ConsensusError::InvalidProposalPOLRound);
        }

        let proposer = rs
            .proposer()
            .ok_or(ConsensusError::InvalidProposalSignature)?;
        if !proposal.verify(self.state.chain_id, &proposer.verifying_key) {
            return Err(ConsensusError::InvalidProposalSignature);
        }

        log::debug!(
            "received proposal for block {} at {}/{}",
            proposal.block_id,
            proposal.height,
            proposal.round
        );
        // Already set if the block is being fetched for a commit, or a polka for it was seen.
        if self.round_state.proposal_block_parts.is_none() {
            self.round_state.proposal_block_parts =
                Some(PartSet::from_header(&proposal.block_id.part_set_header));
        }
        self.round_state.proposal = Some(proposal);
        Ok(())
    }

    /// Add a part of the proposal block. Returns whether the part was new.
    pub(super) fn add_proposal_block_part(
        &mut self,
        event: BlockPartEvent,
    ) -> Result<bool, ConsensusError> {
        let height = event.height;
        if height != self.round_state.height {
            log::debug!("block part for height {} at height {}", height, self.round_state.height);
            return Ok(false);
        }
        let Some(parts) = self.round_state.proposal_block_parts.as_mut() else {
            log::debug!("block part {} arrived before its proposal", event.part.index);
            return Ok(false);
        };

        let added = parts.add_part(event.part)?;
        if !added || !parts.is_complete() {
            return Ok(added);
        }

        let block = Block::from_part_set(parts)?;
        let block_id = block.block_id(parts.header());
        self.round_state.proposal_block = Some(block);
        self.publish(Event::CompleteProposal(CompleteProposalEvent {
            timestamp: SystemTime::now(),
            height,
            round: self.round_state.round,
            block_id,
        }));
        self.handle_complete_proposal(height);
        Ok(true)
    }

    pub(super) fn handle_complete_proposal(&mut self, height: Height) {
        let round = self.round_state.round;
        let polka = self
            .round_state
            .votes
            .prevotes(round)
            .and_then(VoteSet::two_thirds_majority);

        if let Some(Some(block_id)) = polka {
            if self.round_state.valid_round < round
                && self.round_state.proposal_block_matches(&block_id)
            {
                self.update_valid_block(round, block_id);
            }
        }

        if self.round_state.step <= RoundStep::Propose && self.is_proposal_complete() {
            self.enter_prevote(height, round);
            if polka.is_some() {
                self.enter_precommit(height, round);
            }
        } else if self.round_state.step == RoundStep::Commit {
            self.try_finalize_commit(height);
        }
    }

    fn update_valid_block(&mut self, round: Round, block_id: BlockID) {
        let rs = &mut self.round_state;
        rs.valid_round = round;
        rs.valid_block = rs.proposal_block.clone();
        rs.valid_block_parts = rs.proposal_block_parts.clone();
        self.publish(Event::ValidBlock(ValidBlockEvent {
            timestamp: SystemTime::now(),
            height: self.round_state.height,
            round,
            block_id,
        }));
    }

    // Forget the proposal block and start collecting the parts of `block_id` instead.
    fn retarget_proposal_block_parts(&mut self, block_id: &BlockID) {
        let rs = &mut self.round_state;
        let has_header = rs
            .proposal_block_parts
            .as_ref()
            .map_or(false, |parts| parts.has_header(&block_id.part_set_header));
        if !has_header {
            rs.proposal_block = None;
            rs.proposal_block_parts = Some(PartSet::from_header(&block_id.part_set_header));
        }
    }

    fn validate_proposal_block(&mut self, block: &Block) -> bool {
        if let Err(err) = self.state.validate_block(block) {
            log::warn!("block at height {} is invalid: {}", block.height(), err);
            return false;
        }
        match self.app.validate_block(ValidateBlockRequest::new(block)) {
            ValidateBlockResponse::Valid => true,
            ValidateBlockResponse::Invalid => {
                log::warn!("block at height {} rejected by the app", block.height());
                false
            }
        }
    }

    /* ↓↓↓ Prevote ↓↓↓ */

    pub(super) fn enter_prevote(&mut self, height: Height, round: Round) {
        let rs = &self.round_state;
        if rs.height != height
            || round < rs.round
            || (rs.round == round && rs.step >= RoundStep::Prevote)
        {
            log::debug!(
                "enter_prevote({}/{}) called at {}/{}/{}, ignoring",
                height,
                round,
                rs.height,
                rs.round,
                rs.step
            );
            return;
        }

        self.update_round_step(round, RoundStep::Prevote);
        self.new_step();
        self.schedule_round_step(height, round, RoundStep::Prevote);
        self.do_prevote(round);
    }

    fn do_prevote(&mut self, round: Round) {
        let block_id = self.prevote_decision(round);
        self.sign_add_vote(SignedMsgType::Prevote, block_id);
    }

    fn prevote_decision(&mut self, round: Round) -> Option<BlockID> {
        let (Some(proposal), Some(block)) = (
            self.round_state.proposal.clone(),
            self.round_state.proposal_block.clone(),
        ) else {
            log::debug!("no proposal block at round {}, prevoting nil", round);
            return None;
        };
        if !self.round_state.proposal_block_matches(&proposal.block_id)
            || !self.validate_proposal_block(&block)
        {
            return None;
        }

        let rs = &self.round_state;
        if !proposal.pol_round.is_some() {
            if !rs.locked_round.is_some() || rs.locked_block_matches(&proposal.block_id) {
                return Some(proposal.block_id);
            }
            return None;
        }

        let polka = rs
            .votes
            .prevotes(proposal.pol_round)
            .and_then(VoteSet::two_thirds_majority);
        if polka == Some(Some(proposal.block_id))
            && proposal.pol_round < round
            && (rs.locked_round <= proposal.pol_round
                || rs.locked_block_matches(&proposal.block_id))
        {
            return Some(proposal.block_id);
        }
        None
    }

    /* ↓↓↓ Precommit ↓↓↓ */

    pub(super) fn enter_precommit(&mut self, height: Height, round: Round) {
        let rs = &self.round_state;
        if rs.height != height
            || round < rs.round
            || (rs.round == round && rs.step >= RoundStep::Precommit)
        {
            log::debug!(
                "enter_precommit({}/{}) called at {}/{}/{}, ignoring",
                height,
                round,
                rs.height,
                rs.round,
                rs.step
            );
            return;
        }

        self.update_round_step(round, RoundStep::Precommit);
        self.round_state.triggered_timeout_precommit = true;
        self.new_step();
        self.schedule_round_step(height, round, RoundStep::Precommit);

        let polka = self
            .round_state
            .votes
            .prevotes(round)
            .and_then(VoteSet::two_thirds_majority);
        let Some(polka) = polka else {
            log::debug!("no +2/3 prevotes at {}/{}, precommitting nil", height, round);
            self.sign_add_vote(SignedMsgType::Precommit, None);
            return;
        };

        self.publish(Event::Polka(PolkaEvent {
            timestamp: SystemTime::now(),
            height,
            round,
            block_id: polka,
        }));

        let Some(block_id) = polka else {
            self.sign_add_vote(SignedMsgType::Precommit, None);
            return;
        };

        if self.round_state.locked_block_matches(&block_id) {
            self.round_state.locked_round = round;
            self.publish_lock(round, Some(block_id));
            self.sign_add_vote(SignedMsgType::Precommit, Some(block_id));
            return;
        }

        if self.round_state.proposal_block_matches(&block_id) {
            let Some(block) = self.round_state.proposal_block.clone() else {
                return;
            };
            if !self.validate_proposal_block(&block) {
                log::error!("+2/3 prevoted for invalid block {}", block_id);
                self.sign_add_vote(SignedMsgType::Precommit, None);
                return;
            }
            let rs = &mut self.round_state;
            rs.locked_round = round;
            rs.locked_block = rs.proposal_block.clone();
            rs.locked_block_parts = rs.proposal_block_parts.clone();
            self.publish_lock(round, Some(block_id));
            self.sign_add_vote(SignedMsgType::Precommit, Some(block_id));
            return;
        }

        // A polka for a block we do not hold.
        self.retarget_proposal_block_parts(&block_id);
        self.sign_add_vote(SignedMsgType::Precommit, None);
    }

    /// Arm the precommit timeout of `round` once +2/3 of the precommits of `round` are in.
    fn enter_precommit_wait(&mut self, height: Height, round: Round) {
        let rs = &self.round_state;
        if rs.height != height
            || round < rs.round
            || (rs.round == round && rs.triggered_timeout_precommit)
        {
            return;
        }
        self.round_state.triggered_timeout_precommit = true;
        self.schedule_round_step(height, round, RoundStep::Precommit);
    }

    fn publish_lock(&self, round: Round, block_id: Option<BlockID>) {
        self.publish(Event::Lock(LockEvent {
            timestamp: SystemTime::now(),
            height: self.round_state.height,
            round,
            block_id,
        }));
    }

    /* ↓↓↓ Votes ↓↓↓ */

    /// Sign a vote for `block_id` at the current round and handle it like a vote from a peer. Does
    /// nothing if this replica is not a validator of the height.
    fn sign_add_vote(&mut self, vote_type: SignedMsgType, block_id: Option<BlockID>) {
        let Some(pub_key) = self.validator.pub_key() else {
            return;
        };
        let Some(index) = self.round_state.validators.position(&pub_key) else {
            return;
        };

        let mut vote = Vote::new(
            vote_type,
            self.round_state.height,
            self.round_state.round,
            block_id,
            pub_key.to_bytes(),
            index as i32,
        );
        if let Err(err) = self.validator.sign_vote(self.state.chain_id, &mut vote) {
            log::error!("failed to sign {:?}: {}", vote_type, err);
            return;
        }

        self.publish(Event::Vote(events::VoteEvent {
            timestamp: SystemTime::now(),
            vote: vote.clone(),
        }));
        self.send_internal(MessageEvent::from(vote.clone()));
        self.network.broadcast(MessageEvent::from(vote));
    }

    /// Add a vote received from `peer_id`. Returns whether the vote was new.
    pub(super) fn add_vote(&mut self, vote: Vote, peer_id: PeerID) -> Result<bool, ConsensusError> {
        if vote.height != self.round_state.height {
            log::debug!(
                "vote for height {} at height {}, ignoring",
                vote.height,
                self.round_state.height
            );
            return Ok(false);
        }

        let (vote_type, round, validator_index) = (vote.vote_type, vote.round, vote.validator_index);
        match self.round_state.votes.add_vote(vote, peer_id) {
            Ok(true) => (),
            Ok(false) => return Ok(false),
            Err(VoteSetError::Conflicting {
                existing,
                conflicting,
            }) => {
                self.publish(Event::Equivocation(EquivocationEvent {
                    timestamp: SystemTime::now(),
                    existing: *existing,
                    conflicting: *conflicting,
                }));
                return Err(ConsensusError::SignatureFoundInPastBlocks { validator_index });
            }
            Err(err) => return Err(err.into()),
        }

        match vote_type {
            SignedMsgType::Prevote => self.on_prevote_added(round),
            SignedMsgType::Precommit => self.on_precommit_added(round),
            SignedMsgType::Unknown | SignedMsgType::Proposal => (),
        }
        Ok(true)
    }

    fn on_prevote_added(&mut self, vote_round: Round) {
        let height = self.round_state.height;
        let Some(prevotes) = self.round_state.votes.prevotes(vote_round) else {
            return;
        };
        let (polka, has_two_thirds_any) =
            (prevotes.two_thirds_majority(), prevotes.has_two_thirds_any());

        if let Some(Some(block_id)) = polka {
            if self.round_state.valid_round < vote_round && vote_round == self.round_state.round {
                if self.round_state.proposal_block_matches(&block_id) {
                    self.update_valid_block(vote_round, block_id);
                } else {
                    self.retarget_proposal_block_parts(&block_id);
                }
            }
        }

        let rs = &self.round_state;
        if rs.round < vote_round && has_two_thirds_any {
            self.new_round(height, vote_round);
        } else if rs.round == vote_round && rs.step >= RoundStep::Prevote {
            if let Some(polka) = polka {
                if polka.is_none() || self.is_proposal_complete() {
                    self.enter_precommit(height, vote_round);
                }
            }
        } else if rs
            .proposal
            .as_ref()
            .map_or(false, |proposal| proposal.pol_round == vote_round && vote_round.is_some())
            && self.is_proposal_complete()
        {
            self.enter_prevote(height, self.round_state.round);
        }
    }

    fn on_precommit_added(&mut self, vote_round: Round) {
        let height = self.round_state.height;
        let Some(precommits) = self.round_state.votes.precommits(vote_round) else {
            return;
        };
        let (majority, has_two_thirds_any) =
            (precommits.two_thirds_majority(), precommits.has_two_thirds_any());

        match majority {
            Some(majority) => {
                self.new_round(height, vote_round);
                self.enter_precommit(height, vote_round);
                if majority.is_some() {
                    self.enter_commit(height, vote_round);
                } else {
                    self.enter_precommit_wait(height, vote_round);
                }
            }
            None if self.round_state.round <= vote_round && has_two_thirds_any => {
                self.new_round(height, vote_round);
                self.enter_precommit_wait(height, vote_round);
            }
            None => (),
        }
    }

    /* ↓↓↓ Commit ↓↓↓ */

    pub(super) fn enter_commit(&mut self, height: Height, commit_round: Round) {
        let rs = &self.round_state;
        if rs.height != height || rs.step == RoundStep::Commit {
            log::debug!(
                "enter_commit({}/{}) called at {}/{}/{}, ignoring",
                height,
                commit_round,
                rs.height,
                rs.round,
                rs.step
            );
            return;
        }

        let round = rs.round;
        self.update_round_step(round, RoundStep::Commit);
        self.round_state.commit_round = commit_round;
        self.round_state.commit_time = Some(SystemTime::now());
        self.new_step();

        let Some(Some(block_id)) = self
            .round_state
            .votes
            .precommits(commit_round)
            .and_then(VoteSet::two_thirds_majority)
        else {
            log::error!(
                "entered commit at {}/{} without +2/3 precommits for a block",
                height,
                commit_round
            );
            return;
        };

        let rs = &mut self.round_state;
        if rs.locked_block_matches(&block_id) {
            rs.proposal_block = rs.locked_block.clone();
            rs.proposal_block_parts = rs.locked_block_parts.clone();
        }
        if !self.round_state.proposal_block_matches(&block_id) {
            log::debug!("committing block {} that is not held yet", block_id);
            self.retarget_proposal_block_parts(&block_id);
        }

        self.try_finalize_commit(height);
    }

    fn try_finalize_commit(&mut self, height: Height) {
        let rs = &self.round_state;
        if rs.height != height {
            return;
        }
        let Some(Some(block_id)) = rs
            .votes
            .precommits(rs.commit_round)
            .and_then(VoteSet::two_thirds_majority)
        else {
            return;
        };
        if !rs.proposal_block_matches(&block_id) {
            log::debug!("waiting for the parts of committed block {}", block_id);
            return;
        }
        self.finalize_commit(height, block_id);
    }

    /// Save, apply, and publish the committed block, then move on to the next height.
    ///
    /// # Panics
    ///
    /// Panics if the committed block is invalid. +2/3 of the voting power precommitted it, so this
    /// can only happen if more than 1/3 of the voting power is faulty.
    fn finalize_commit(&mut self, height: Height, block_id: BlockID) {
        let rs = &self.round_state;
        if rs.height != height || rs.step != RoundStep::Commit {
            return;
        }
        let (Some(block), Some(parts)) = (rs.proposal_block.clone(), rs.proposal_block_parts.clone())
        else {
            return;
        };
        let Some(seen_commit) = rs
            .votes
            .precommits(rs.commit_round)
            .and_then(VoteSet::make_commit)
        else {
            log::error!("no commit for block {} at height {}", block_id, height);
            return;
        };

        if let Err(err) = self.state.validate_block(&block) {
            panic!("committed block {} is invalid: {}", block_id, err);
        }

        if self.blockchain.height() < block.height() {
            self.blockchain.save_block(&block, &parts, &seen_commit);
        }
        let app_hash = self.app.apply_block(ApplyBlockRequest::new(&block)).app_hash;

        let next_state = self.state.next(&block, block_id, app_hash);
        self.publish(Event::NewBlock(NewBlockEvent {
            timestamp: SystemTime::now(),
            block,
            block_id,
        }));

        self.update_to_state(next_state);
        self.schedule_round_0();
    }
}
