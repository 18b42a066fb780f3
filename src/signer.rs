/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Signing of proposals and votes.
//!
//! A [`Signer`] holds (or reaches) a private key and signs raw bytes. A [`PrivValidator`] turns
//! that into signed consensus messages. Both fail closed: if no key is available, signing returns
//! [`SignerError::PubKeyNotSet`] instead of producing an unsigned message.

use std::fmt::{self, Display, Formatter};

use crate::types::{
    block::BlockID,
    crypto_primitives::{Keypair, SigningKey, VerifyingKey},
    data_types::{ChainID, Height, Round, SignatureBytes},
    proposal::Proposal,
    vote::Vote,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignerError {
    PubKeyNotSet,
    SigningFailed(String),
}

impl Display for SignerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            SignerError::PubKeyNotSet => write!(f, "pubkey is not set"),
            SignerError::SigningFailed(reason) => write!(f, "signing failed: {}", reason),
        }
    }
}

pub trait Signer: Send {
    fn pub_key(&self) -> Option<VerifyingKey>;

    fn sign(&self, message: &[u8]) -> Result<SignatureBytes, SignerError>;
}

/// A [`Signer`] backed by an in-process Ed25519 key.
#[derive(Clone, Default)]
pub struct LocalSigner {
    keypair: Option<Keypair>,
}

impl LocalSigner {
    pub fn new(signing_key: SigningKey) -> LocalSigner {
        LocalSigner {
            keypair: Some(Keypair::new(signing_key)),
        }
    }

    /// A signer without a key, e.g., for a replica that only follows consensus.
    pub fn without_key() -> LocalSigner {
        LocalSigner { keypair: None }
    }
}

impl Signer for LocalSigner {
    fn pub_key(&self) -> Option<VerifyingKey> {
        self.keypair.as_ref().map(Keypair::public)
    }

    fn sign(&self, message: &[u8]) -> Result<SignatureBytes, SignerError> {
        let keypair = self.keypair.as_ref().ok_or(SignerError::PubKeyNotSet)?;
        Ok(keypair.sign(message))
    }
}

pub trait PrivValidator: Send {
    fn pub_key(&self) -> Option<VerifyingKey>;

    fn sign_vote(&self, chain_id: ChainID, vote: &mut Vote) -> Result<(), SignerError>;

    fn sign_proposal(&self, chain_id: ChainID, proposal: &mut Proposal) -> Result<(), SignerError>;

    /// Create and sign a proposal for `block_id` at `(height, round)`.
    fn create_proposal(
        &self,
        chain_id: ChainID,
        height: Height,
        round: Round,
        pol_round: Round,
        block_id: BlockID,
    ) -> Result<Proposal, SignerError> {
        let mut proposal = Proposal::new(height, round, pol_round, block_id);
        self.sign_proposal(chain_id, &mut proposal)?;
        Ok(proposal)
    }
}

/// A [`PrivValidator`] that signs with a [`Signer`].
pub struct LocalValidator<S: Signer> {
    signer: S,
}

impl<S: Signer> LocalValidator<S> {
    pub fn new(signer: S) -> LocalValidator<S> {
        LocalValidator { signer }
    }
}

impl<S: Signer> PrivValidator for LocalValidator<S> {
    fn pub_key(&self) -> Option<VerifyingKey> {
        self.signer.pub_key()
    }

    fn sign_vote(&self, chain_id: ChainID, vote: &mut Vote) -> Result<(), SignerError> {
        let pub_key = self.signer.pub_key().ok_or(SignerError::PubKeyNotSet)?;
        if pub_key.to_bytes() != vote.validator {
            return Err(SignerError::SigningFailed(
                "vote is for another validator".to_string(),
            ));
        }
        vote.signature = Some(self.signer.sign(&vote.sign_bytes(chain_id))?);
        Ok(())
    }

    fn sign_proposal(&self, chain_id: ChainID, proposal: &mut Proposal) -> Result<(), SignerError> {
        proposal.signature = Some(self.signer.sign(&proposal.sign_bytes(chain_id))?);
        Ok(())
    }
}
