/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The chain state that the consensus state machine starts each height from.

use super::{
    block::{Block, BlockError, BlockID, Header},
    commit::Commit,
    crypto_primitives::VerifyingKeyBytes,
    data_types::{ChainID, CryptoHash, Data, Height, Timestamp},
    validator_set::ValidatorSet,
};

/// Snapshot of the chain after the last committed block.
///
/// The state machine copies a `State` into its round state at startup and after every committed
/// height. A `State` is never shared mutably: advancing it produces a new value.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct State {
    pub chain_id: ChainID,
    pub initial_height: Height,
    /// Height of the last committed block, or `initial_height - 1` if no block has been committed.
    pub last_block_height: Height,
    pub last_block_id: Option<BlockID>,
    pub last_block_time: Timestamp,
    /// Application state hash after executing the last committed block.
    pub app_hash: CryptoHash,
    /// Validators of the next height.
    pub validators: ValidatorSet,
    /// Validators that committed the last block.
    pub last_validators: ValidatorSet,
}

impl State {
    /// Create the state of a chain at genesis.
    pub fn genesis(
        chain_id: ChainID,
        initial_height: Height,
        app_hash: CryptoHash,
        validators: ValidatorSet,
    ) -> State {
        State {
            chain_id,
            initial_height,
            last_block_height: initial_height - 1,
            last_block_id: None,
            last_block_time: Timestamp::new(0),
            app_hash,
            validators,
            last_validators: ValidatorSet::new(Vec::new()),
        }
    }

    /// Height of the next block to be decided.
    pub fn next_height(&self) -> Height {
        self.last_block_height + 1
    }

    /// Build the block the proposer of `height` should propose.
    pub fn make_block(
        &self,
        height: Height,
        data: Data,
        last_commit: Option<Commit>,
        proposer: VerifyingKeyBytes,
    ) -> Block {
        let last_commit_hash = last_commit
            .as_ref()
            .map(Commit::hash)
            .unwrap_or_default();
        Block {
            header: Header {
                chain_id: self.chain_id,
                height,
                time: Timestamp::now().max(self.last_block_time),
                last_block_id: self.last_block_id,
                last_commit_hash,
                data_hash: data.hash(),
                validators_hash: self.validators.hash(),
                app_hash: self.app_hash,
                proposer,
            },
            data,
            last_commit,
        }
    }

    /// Check that `block` can be the next block on top of this state.
    ///
    /// This does not consult the application; see [`App::validate_block`](crate::app::App::validate_block).
    pub fn validate_block(&self, block: &Block) -> Result<(), BlockError> {
        block.validate_basic()?;

        let header = &block.header;
        if header.chain_id != self.chain_id {
            return Err(BlockError::WrongChainID);
        }
        if header.height != self.next_height() {
            return Err(BlockError::WrongHeight {
                expected: self.next_height(),
                actual: header.height,
            });
        }
        if header.last_block_id != self.last_block_id {
            return Err(BlockError::WrongLastBlockID);
        }
        if header.app_hash != self.app_hash {
            return Err(BlockError::WrongAppHash);
        }
        if header.validators_hash != self.validators.hash() {
            return Err(BlockError::WrongValidatorsHash);
        }
        if !self
            .validators
            .validators()
            .any(|validator| validator.key_bytes() == header.proposer)
        {
            return Err(BlockError::UnknownProposer);
        }

        if header.height != self.initial_height {
            let last_commit = block
                .last_commit
                .as_ref()
                .ok_or(BlockError::MissingLastCommit)?;
            let last_block_id = self.last_block_id.ok_or(BlockError::WrongLastBlockID)?;
            last_commit
                .verify(
                    self.chain_id,
                    &self.last_validators,
                    &last_block_id,
                    self.last_block_height,
                )
                .map_err(|err| BlockError::InvalidLastCommit(format!("{:?}", err)))?;
        }

        Ok(())
    }

    /// The state after committing `block` (identified by `block_id`), whose execution resulted in
    /// `app_hash`.
    ///
    /// The validator set carries over with its proposer rotation advanced once, so that the
    /// proposer of round 0 changes from height to height.
    pub fn next(&self, block: &Block, block_id: BlockID, app_hash: CryptoHash) -> State {
        State {
            chain_id: self.chain_id,
            initial_height: self.initial_height,
            last_block_height: block.header.height,
            last_block_id: Some(block_id),
            last_block_time: block.header.time,
            app_hash,
            validators: self.validators.copy_increment_proposer_priority(1),
            last_validators: self.validators.clone(),
        }
    }
}
