/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Accumulators of votes.
//!
//! A [`VoteSet`] tallies the prevotes or precommits of one round, and detects the first block (or
//! nil) that gathers a +2/3 quorum of voting power. A [`HeightVoteSet`] keeps a prevote and a
//! precommit `VoteSet` for every round of a height that the state machine has reached, plus a small
//! number of future rounds that peers may already be voting in.

use std::collections::{BTreeMap, HashMap};
use std::fmt::{self, Display, Formatter};

use super::{
    bit_array::BitArray,
    block::BlockID,
    commit::{Commit, CommitSig},
    data_types::{ChainID, Height, PeerID, Round, TotalPower},
    validator_set::ValidatorSet,
    vote::{SignedMsgType, Vote},
};

/// Maximum number of rounds ahead of the state machine that a single peer may cause to be tracked.
const MAX_PEER_CATCHUP_ROUNDS: usize = 2;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoteSetError {
    UnexpectedStep {
        height: Height,
        round: Round,
        vote_type: SignedMsgType,
    },
    InvalidValidatorIndex(i32),
    InvalidValidatorAddress(i32),
    InvalidSignature(i32),
    /// The validator signed the same vote twice with different signatures.
    NonDeterministicSignature(i32),
    /// The validator already voted for something else. Carries both votes as evidence.
    Conflicting {
        existing: Box<Vote>,
        conflicting: Box<Vote>,
    },
    UnwantedRound(Round),
}

impl Display for VoteSetError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            VoteSetError::UnexpectedStep {
                height,
                round,
                vote_type,
            } => write!(
                f,
                "vote for unexpected height/round/type {}/{}/{:?}",
                height, round, vote_type
            ),
            VoteSetError::InvalidValidatorIndex(index) => {
                write!(f, "invalid validator index {}", index)
            }
            VoteSetError::InvalidValidatorAddress(index) => {
                write!(f, "vote key does not match validator at index {}", index)
            }
            VoteSetError::InvalidSignature(index) => {
                write!(f, "invalid signature from validator {}", index)
            }
            VoteSetError::NonDeterministicSignature(index) => write!(
                f,
                "validator {} signed the same vote with two different signatures",
                index
            ),
            VoteSetError::Conflicting { existing, .. } => write!(
                f,
                "conflicting votes from validator {}",
                existing.validator_index
            ),
            VoteSetError::UnwantedRound(round) => {
                write!(f, "peer has already caught up too many rounds, round {}", round)
            }
        }
    }
}

/// The prevotes or precommits of one `(height, round)`.
#[derive(Clone, Debug)]
pub struct VoteSet {
    chain_id: ChainID,
    height: Height,
    round: Round,
    vote_type: SignedMsgType,
    validator_set: ValidatorSet,
    votes_bit_array: BitArray,
    votes: Vec<Option<Vote>>,
    sum: TotalPower,
    maj23: Option<Option<BlockID>>,
    votes_by_block: HashMap<Option<BlockID>, TotalPower>,
}

impl VoteSet {
    pub fn new(
        chain_id: ChainID,
        height: Height,
        round: Round,
        vote_type: SignedMsgType,
        validator_set: ValidatorSet,
    ) -> VoteSet {
        let size = validator_set.len();
        VoteSet {
            chain_id,
            height,
            round,
            vote_type,
            validator_set,
            votes_bit_array: BitArray::new(size as u32),
            votes: vec![None; size],
            sum: TotalPower::new(0),
            maj23: None,
            votes_by_block: HashMap::new(),
        }
    }

    /// Add `vote` to the set.
    ///
    /// Returns `Ok(false)` if the exact same vote was already added, and `Ok(true)` if the vote was
    /// newly added. A second, differently signed vote for the same block is an error.
    pub fn add_vote(&mut self, vote: Vote) -> Result<bool, VoteSetError> {
        if vote.height != self.height || vote.round != self.round || vote.vote_type != self.vote_type
        {
            return Err(VoteSetError::UnexpectedStep {
                height: vote.height,
                round: vote.round,
                vote_type: vote.vote_type,
            });
        }

        let index = vote.validator_index;
        let validator = usize::try_from(index)
            .ok()
            .and_then(|i| self.validator_set.get_by_index(i))
            .ok_or(VoteSetError::InvalidValidatorIndex(index))?;
        if validator.key_bytes() != vote.validator {
            return Err(VoteSetError::InvalidValidatorAddress(index));
        }
        let power = validator.power;

        if let Some(existing) = &self.votes[index as usize] {
            if existing.signature == vote.signature {
                return Ok(false);
            }
        }

        if !vote.verify(self.chain_id, &validator.verifying_key) {
            return Err(VoteSetError::InvalidSignature(index));
        }

        if let Some(existing) = &self.votes[index as usize] {
            if existing.block_id == vote.block_id {
                return Err(VoteSetError::NonDeterministicSignature(index));
            }
            return Err(VoteSetError::Conflicting {
                existing: Box::new(existing.clone()),
                conflicting: Box::new(vote),
            });
        }

        let block_id = vote.block_id;
        self.votes[index as usize] = Some(vote);
        self.votes_bit_array.set_index(index as u32, true);
        self.sum += power;

        let block_power = self.votes_by_block.entry(block_id).or_default();
        *block_power += power;
        if self.maj23.is_none() && *block_power >= self.validator_set.quorum() {
            self.maj23 = Some(block_id);
        }

        Ok(true)
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn round(&self) -> Round {
        self.round
    }

    pub fn vote_type(&self) -> SignedMsgType {
        self.vote_type
    }

    pub fn size(&self) -> usize {
        self.votes.len()
    }

    pub fn bit_array(&self) -> &BitArray {
        &self.votes_bit_array
    }

    pub fn get_by_index(&self, index: usize) -> Option<&Vote> {
        self.votes.get(index).and_then(Option::as_ref)
    }

    /// The first block (`Some(block_id)`) or nil (`None`) that gathered +2/3 of the voting power, if
    /// any.
    pub fn two_thirds_majority(&self) -> Option<Option<BlockID>> {
        self.maj23
    }

    pub fn has_two_thirds_majority(&self) -> bool {
        self.maj23.is_some()
    }

    /// Whether +2/3 of the voting power has voted, for anything.
    pub fn has_two_thirds_any(&self) -> bool {
        self.sum >= self.validator_set.quorum()
    }

    /// Build a [`Commit`] from these precommits.
    ///
    /// Returns `None` if this is not a precommit set or if no block has +2/3 of the precommits.
    pub fn make_commit(&self) -> Option<Commit> {
        if self.vote_type != SignedMsgType::Precommit {
            return None;
        }
        let block_id = self.maj23??;
        let signatures = self
            .votes
            .iter()
            .map(|vote| match vote {
                Some(Vote {
                    block_id: Some(voted),
                    validator,
                    timestamp,
                    signature: Some(signature),
                    ..
                }) if *voted == block_id => CommitSig::Commit {
                    validator: *validator,
                    timestamp: *timestamp,
                    signature: *signature,
                },
                Some(Vote {
                    block_id: None,
                    validator,
                    timestamp,
                    signature: Some(signature),
                    ..
                }) => CommitSig::Nil {
                    validator: *validator,
                    timestamp: *timestamp,
                    signature: *signature,
                },
                _ => CommitSig::Absent,
            })
            .collect();

        Some(Commit {
            height: self.height,
            round: self.round,
            block_id,
            signatures,
        })
    }
}

#[derive(Clone, Debug)]
struct RoundVoteSet {
    prevotes: VoteSet,
    precommits: VoteSet,
}

/// The prevotes and precommits of every tracked round of one height.
#[derive(Clone, Debug)]
pub struct HeightVoteSet {
    chain_id: ChainID,
    height: Height,
    validator_set: ValidatorSet,
    round: Round,
    round_vote_sets: BTreeMap<Round, RoundVoteSet>,
    peer_catchup_rounds: HashMap<PeerID, Vec<Round>>,
}

impl HeightVoteSet {
    pub fn new(chain_id: ChainID, height: Height, validator_set: ValidatorSet) -> HeightVoteSet {
        let mut height_vote_set = HeightVoteSet {
            chain_id,
            height,
            validator_set,
            round: Round::new(0),
            round_vote_sets: BTreeMap::new(),
            peer_catchup_rounds: HashMap::new(),
        };
        height_vote_set.add_round(Round::new(0));
        height_vote_set
    }

    pub fn height(&self) -> Height {
        self.height
    }

    pub fn round(&self) -> Round {
        self.round
    }

    /// Track every round up to and including `round`.
    pub fn set_round(&mut self, round: Round) {
        for r in 0..=round.int() {
            let r = Round::new(r);
            if !self.round_vote_sets.contains_key(&r) {
                self.add_round(r);
            }
        }
        if round > self.round {
            self.round = round;
        }
    }

    fn add_round(&mut self, round: Round) {
        let new_vote_set = |vote_type| {
            VoteSet::new(
                self.chain_id,
                self.height,
                round,
                vote_type,
                self.validator_set.clone(),
            )
        };
        let round_vote_set = RoundVoteSet {
            prevotes: new_vote_set(SignedMsgType::Prevote),
            precommits: new_vote_set(SignedMsgType::Precommit),
        };
        self.round_vote_sets.insert(round, round_vote_set);
    }

    /// Add `vote`, received from `peer_id`.
    ///
    /// Votes for untracked rounds start tracking that round, but at most
    /// two such rounds per peer.
    pub fn add_vote(&mut self, vote: Vote, peer_id: PeerID) -> Result<bool, VoteSetError> {
        if !vote.vote_type.is_vote_type() {
            return Err(VoteSetError::UnexpectedStep {
                height: vote.height,
                round: vote.round,
                vote_type: vote.vote_type,
            });
        }
        if !self.round_vote_sets.contains_key(&vote.round) {
            let catchup_rounds = self.peer_catchup_rounds.entry(peer_id).or_default();
            if catchup_rounds.len() >= MAX_PEER_CATCHUP_ROUNDS {
                return Err(VoteSetError::UnwantedRound(vote.round));
            }
            catchup_rounds.push(vote.round);
            self.add_round(vote.round);
        }

        let round_vote_set = self
            .round_vote_sets
            .get_mut(&vote.round)
            .ok_or(VoteSetError::UnwantedRound(vote.round))?;
        match vote.vote_type {
            SignedMsgType::Prevote => round_vote_set.prevotes.add_vote(vote),
            _ => round_vote_set.precommits.add_vote(vote),
        }
    }

    pub fn prevotes(&self, round: Round) -> Option<&VoteSet> {
        self.round_vote_sets.get(&round).map(|r| &r.prevotes)
    }

    pub fn precommits(&self, round: Round) -> Option<&VoteSet> {
        self.round_vote_sets.get(&round).map(|r| &r.precommits)
    }
}
