/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The consensus progress of the current height.
//!
//! [`RoundState`] is owned by the state machine thread, which is its only writer. Other threads
//! observe it through a [`RoundStateCamera`], which holds a [`RoundStateSummary`] that the state
//! machine replaces after every input it processes. A summary is copied under a single read-lock
//! acquisition, so readers never see fields from two different moments.

use std::sync::{Arc, RwLock};
use std::time::SystemTime;

use crate::round_step::RoundStep;
use crate::types::{
    block::{Block, BlockID},
    commit::Commit,
    crypto_primitives::VerifyingKeyBytes,
    data_types::{CryptoHash, Height, Round},
    part_set::PartSet,
    proposal::Proposal,
    state::State,
    validator_set::{Validator, ValidatorSet},
    vote_set::HeightVoteSet,
};

#[derive(Clone, Debug)]
pub struct RoundState {
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
    /// When the height is scheduled to begin.
    pub start_time: SystemTime,
    /// When +2/3 precommits for a block were first seen at this height.
    pub commit_time: Option<SystemTime>,

    /// Validators of this height, with the proposer rotated to the current round.
    pub validators: ValidatorSet,
    pub proposal: Option<Proposal>,
    pub proposal_block: Option<Block>,
    pub proposal_block_parts: Option<PartSet>,

    pub locked_round: Round,
    pub locked_block: Option<Block>,
    pub locked_block_parts: Option<PartSet>,

    /// Last round with a polka for a block, and that block.
    pub valid_round: Round,
    pub valid_block: Option<Block>,
    pub valid_block_parts: Option<PartSet>,

    pub votes: HeightVoteSet,
    pub commit_round: Round,
    /// Precommits that finalized the previous height.
    pub last_commit: Option<Commit>,
    pub last_validators: ValidatorSet,

    pub triggered_timeout_precommit: bool,
    /// Round 0 is parked in `NewHeight` until transactions are available.
    pub waiting_for_txs: bool,
}

impl RoundState {
    /// Round state at the start of the height that follows `state`.
    pub fn new(state: &State, start_time: SystemTime, last_commit: Option<Commit>) -> RoundState {
        let height = state.next_height();
        RoundState {
            height,
            round: Round::new(0),
            step: RoundStep::NewHeight,
            start_time,
            commit_time: None,
            validators: state.validators.clone(),
            proposal: None,
            proposal_block: None,
            proposal_block_parts: None,
            locked_round: Round::NONE,
            locked_block: None,
            locked_block_parts: None,
            valid_round: Round::NONE,
            valid_block: None,
            valid_block_parts: None,
            votes: HeightVoteSet::new(state.chain_id, height, state.validators.clone()),
            commit_round: Round::NONE,
            last_commit,
            last_validators: state.last_validators.clone(),
            triggered_timeout_precommit: false,
            waiting_for_txs: false,
        }
    }

    /// Proposer of the current round.
    pub fn proposer(&self) -> Option<&Validator> {
        self.validators.proposer()
    }

    /// Whether `block_id` identifies the proposal block and the parts it is held in.
    pub fn proposal_block_matches(&self, block_id: &BlockID) -> bool {
        match (&self.proposal_block, &self.proposal_block_parts) {
            (Some(block), Some(parts)) => {
                block.hash() == block_id.hash && parts.has_header(&block_id.part_set_header)
            }
            _ => false,
        }
    }

    /// Whether `block_id` identifies the locked block.
    pub fn locked_block_matches(&self, block_id: &BlockID) -> bool {
        match (&self.locked_block, &self.locked_block_parts) {
            (Some(block), Some(parts)) => {
                block.hash() == block_id.hash && parts.has_header(&block_id.part_set_header)
            }
            _ => false,
        }
    }

    pub fn summary(&self) -> RoundStateSummary {
        RoundStateSummary {
            height: self.height,
            round: self.round,
            step: self.step,
            start_time: self.start_time,
            proposer: self.proposer().map(Validator::key_bytes),
            proposal_block_hash: self.proposal_block.as_ref().map(Block::hash),
            locked_round: self.locked_round,
            locked_block_hash: self.locked_block.as_ref().map(Block::hash),
            valid_round: self.valid_round,
            valid_block_hash: self.valid_block.as_ref().map(Block::hash),
            commit_round: self.commit_round,
        }
    }
}

/// A compact, copyable view of a [`RoundState`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RoundStateSummary {
    pub height: Height,
    pub round: Round,
    pub step: RoundStep,
    pub start_time: SystemTime,
    pub proposer: Option<VerifyingKeyBytes>,
    pub proposal_block_hash: Option<CryptoHash>,
    pub locked_round: Round,
    pub locked_block_hash: Option<CryptoHash>,
    pub valid_round: Round,
    pub valid_block_hash: Option<CryptoHash>,
    pub commit_round: Round,
}

/// A read-only, shareable handle on the latest [`RoundStateSummary`].
#[derive(Clone)]
pub struct RoundStateCamera(Arc<RwLock<RoundStateSummary>>);

impl RoundStateCamera {
    pub(crate) fn new(summary: RoundStateSummary) -> RoundStateCamera {
        RoundStateCamera(Arc::new(RwLock::new(summary)))
    }

    /// Copy the latest summary.
    pub fn snapshot(&self) -> RoundStateSummary {
        match self.0.read() {
            Ok(summary) => summary.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub(crate) fn update(&self, summary: RoundStateSummary) {
        match self.0.write() {
            Ok(mut current) => *current = summary,
            Err(poisoned) => *poisoned.into_inner() = summary,
        }
    }
}
