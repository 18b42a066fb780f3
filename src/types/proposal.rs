/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A proposer's announcement of the block it proposes for a round.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    block::BlockID,
    crypto_primitives::{verify_signature, VerifyingKey},
    data_types::{ChainID, Height, Round, SignatureBytes, Timestamp},
    validation::ValidationError,
    vote::SignedMsgType,
};

/// Proposal of a block at `(height, round)`.
///
/// `pol_round` is the round of the proof-of-lock (a polka) that justifies re-proposing a block from
/// an earlier round, or [`Round::NONE`] if the block is new.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Proposal {
    pub height: Height,
    pub round: Round,
    pub pol_round: Round,
    pub block_id: BlockID,
    pub timestamp: Timestamp,
    pub signature: Option<SignatureBytes>,
}

#[derive(BorshSerialize)]
struct CanonicalProposal {
    chain_id: ChainID,
    msg_type: SignedMsgType,
    height: Height,
    round: Round,
    pol_round: Round,
    block_id: BlockID,
    timestamp: Timestamp,
}

impl Proposal {
    /// Create an unsigned proposal.
    pub fn new(height: Height, round: Round, pol_round: Round, block_id: BlockID) -> Proposal {
        Proposal {
            height,
            round,
            pol_round,
            block_id,
            timestamp: Timestamp::now(),
            signature: None,
        }
    }

    pub fn sign_bytes(&self, chain_id: ChainID) -> Vec<u8> {
        CanonicalProposal {
            chain_id,
            msg_type: SignedMsgType::Proposal,
            height: self.height,
            round: self.round,
            pol_round: self.pol_round,
            block_id: self.block_id,
            timestamp: self.timestamp,
        }
        .try_to_vec()
        .unwrap()
    }

    pub fn validate_basic(&self) -> Result<(), ValidationError> {
        if self.height.int() < 0 {
            return Err(ValidationError::NegativeHeight);
        }
        if self.round.int() < 0 {
            return Err(ValidationError::NegativeRound);
        }
        if self.pol_round.int() < -1 || self.pol_round >= self.round {
            return Err(ValidationError::InvalidPOLRound);
        }
        self.block_id.validate_basic()?;
        if self.signature.is_none() {
            return Err(ValidationError::MissingSignature);
        }
        Ok(())
    }

    /// Check that the proposal carries `proposer`'s valid signature.
    pub fn verify(&self, chain_id: ChainID, proposer: &VerifyingKey) -> bool {
        match &self.signature {
            Some(signature) => verify_signature(proposer, &self.sign_bytes(chain_id), signature),
            None => false,
        }
    }
}
