/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Prevotes and precommits.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    block::BlockID,
    crypto_primitives::{verify_signature, VerifyingKey, VerifyingKeyBytes},
    data_types::{ChainID, Height, Round, SignatureBytes, Timestamp},
    validation::ValidationError,
};

/// Maximum number of votes (and so validators) a single bit array may describe.
pub const MAX_VOTES_COUNT: u32 = 10000;

/// Kind of a signed consensus message. Part of the bytes every signature is made over, so that a
/// signature for one kind of message cannot be passed off as another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub enum SignedMsgType {
    Unknown,
    Prevote,
    Precommit,
    Proposal,
}

impl SignedMsgType {
    pub fn is_vote_type(&self) -> bool {
        matches!(self, SignedMsgType::Prevote | SignedMsgType::Precommit)
    }
}

/// A validator's prevote or precommit for a block (or for nil, when `block_id` is `None`) at a
/// given height and round.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Vote {
    pub vote_type: SignedMsgType,
    pub height: Height,
    pub round: Round,
    pub block_id: Option<BlockID>,
    pub timestamp: Timestamp,
    pub validator: VerifyingKeyBytes,
    pub validator_index: i32,
    pub signature: Option<SignatureBytes>,
}

#[derive(BorshSerialize)]
struct CanonicalVote {
    chain_id: ChainID,
    vote_type: SignedMsgType,
    height: Height,
    round: Round,
    block_id: Option<BlockID>,
    timestamp: Timestamp,
}

impl Vote {
    /// Create an unsigned vote.
    pub fn new(
        vote_type: SignedMsgType,
        height: Height,
        round: Round,
        block_id: Option<BlockID>,
        validator: VerifyingKeyBytes,
        validator_index: i32,
    ) -> Vote {
        Vote {
            vote_type,
            height,
            round,
            block_id,
            timestamp: Timestamp::now(),
            validator,
            validator_index,
            signature: None,
        }
    }

    /// The bytes a validator signs to produce this vote's signature.
    pub fn sign_bytes(&self, chain_id: ChainID) -> Vec<u8> {
        CanonicalVote {
            chain_id,
            vote_type: self.vote_type,
            height: self.height,
            round: self.round,
            block_id: self.block_id,
            timestamp: self.timestamp,
        }
        .try_to_vec()
        .unwrap()
    }

    pub fn is_nil(&self) -> bool {
        self.block_id.is_none()
    }

    pub fn validate_basic(&self) -> Result<(), ValidationError> {
        if !self.vote_type.is_vote_type() {
            return Err(ValidationError::InvalidVoteType);
        }
        if self.height.int() < 0 {
            return Err(ValidationError::NegativeHeight);
        }
        if self.round.int() < 0 {
            return Err(ValidationError::NegativeRound);
        }
        if let Some(block_id) = &self.block_id {
            block_id.validate_basic()?;
        }
        if self.validator_index < 0 {
            return Err(ValidationError::NegativeValidatorIndex);
        }
        if self.signature.is_none() {
            return Err(ValidationError::MissingSignature);
        }
        Ok(())
    }

    /// Check that `verifying_key` is the vote's validator and that the vote's signature is valid.
    pub fn verify(&self, chain_id: ChainID, verifying_key: &VerifyingKey) -> bool {
        if verifying_key.to_bytes() != self.validator {
            return false;
        }
        match &self.signature {
            Some(signature) => {
                verify_signature(verifying_key, &self.sign_bytes(chain_id), signature)
            }
            None => false,
        }
    }
}
