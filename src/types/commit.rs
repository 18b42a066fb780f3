/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The +2/3 precommits that finalized a block.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    block::BlockID,
    crypto_primitives::VerifyingKeyBytes,
    data_types::{ChainID, CryptoHash, Height, Round, SignatureBytes, Timestamp, TotalPower},
    validator_set::ValidatorSet,
    vote::{SignedMsgType, Vote},
};

/// One validator's entry in a [`Commit`], in validator-index order.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub enum CommitSig {
    /// The validator's precommit was not received.
    Absent,
    /// The validator precommitted the committed block.
    Commit {
        validator: VerifyingKeyBytes,
        timestamp: Timestamp,
        signature: SignatureBytes,
    },
    /// The validator precommitted nil.
    Nil {
        validator: VerifyingKeyBytes,
        timestamp: Timestamp,
        signature: SignatureBytes,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Commit {
    pub height: Height,
    pub round: Round,
    pub block_id: BlockID,
    pub signatures: Vec<CommitSig>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommitError {
    WrongHeight { expected: Height, actual: Height },
    WrongBlockID,
    WrongSignatureCount { expected: usize, actual: usize },
    WrongValidator { index: usize },
    InvalidSignature { index: usize },
    InsufficientPower { got: TotalPower, needed: TotalPower },
}

impl Commit {
    pub fn hash(&self) -> CryptoHash {
        CryptoHash::digest(&self.try_to_vec().unwrap())
    }

    /// Reconstruct the precommit of the validator at `index`, if it is present in the commit.
    pub fn get_vote(&self, index: usize) -> Option<Vote> {
        let (validator, timestamp, signature, block_id) = match self.signatures.get(index)? {
            CommitSig::Absent => return None,
            CommitSig::Commit {
                validator,
                timestamp,
                signature,
            } => (validator, timestamp, signature, Some(self.block_id)),
            CommitSig::Nil {
                validator,
                timestamp,
                signature,
            } => (validator, timestamp, signature, None),
        };
        Some(Vote {
            vote_type: SignedMsgType::Precommit,
            height: self.height,
            round: self.round,
            block_id,
            timestamp: *timestamp,
            validator: *validator,
            validator_index: index as i32,
            signature: Some(*signature),
        })
    }

    /// Check that the commit holds valid precommits for `block_id` at `height` from validators in
    /// `validator_set` with at least a quorum of power.
    pub fn verify(
        &self,
        chain_id: ChainID,
        validator_set: &ValidatorSet,
        block_id: &BlockID,
        height: Height,
    ) -> Result<(), CommitError> {
        if self.height != height {
            return Err(CommitError::WrongHeight {
                expected: height,
                actual: self.height,
            });
        }
        if self.block_id != *block_id {
            return Err(CommitError::WrongBlockID);
        }
        if self.signatures.len() != validator_set.len() {
            return Err(CommitError::WrongSignatureCount {
                expected: validator_set.len(),
                actual: self.signatures.len(),
            });
        }

        let mut tallied = TotalPower::new(0);
        for (index, validator) in validator_set.validators().enumerate() {
            let Some(vote) = self.get_vote(index) else {
                continue;
            };
            if vote.validator != validator.key_bytes() {
                return Err(CommitError::WrongValidator { index });
            }
            if !vote.verify(chain_id, &validator.verifying_key) {
                return Err(CommitError::InvalidSignature { index });
            }
            if vote.block_id.is_some() {
                tallied += validator.power;
            }
        }

        let needed = validator_set.quorum();
        if tallied < needed {
            return Err(CommitError::InsufficientPower {
                got: tallied,
                needed,
            });
        }
        Ok(())
    }
}
