/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Trait for pluggable application-specific state machine transition logic.
//!
//! The consensus engine decides *which* block comes next; the [`App`] decides what goes into a block,
//! whether a proposed block is acceptable, and what the application state becomes after a committed
//! block is executed.
//!
//! ## Determinism requirements
//!
//! `validate_block` and `apply_block` must be deterministic: every replica calling them with the same
//! block on the same application state must get the same result. Otherwise replicas disagree on the
//! app hash, which shows up as proposals failing validation at the next height.

use crate::types::{
    block::Block,
    data_types::{CryptoHash, Data, Height},
};

pub trait App: Send {
    /// Called when this replica is the proposer of a round and has no valid block to re-propose.
    fn produce_block(&mut self, request: ProduceBlockRequest) -> ProduceBlockResponse;

    /// Called before prevoting or precommitting a proposed block that passed the engine's own checks.
    fn validate_block(&mut self, request: ValidateBlockRequest) -> ValidateBlockResponse;

    /// Called once for every committed block, in height order.
    fn apply_block(&mut self, request: ApplyBlockRequest) -> ApplyBlockResponse;
}

pub struct ProduceBlockRequest {
    height: Height,
    app_hash: CryptoHash,
}

impl ProduceBlockRequest {
    pub(crate) fn new(height: Height, app_hash: CryptoHash) -> Self {
        Self { height, app_hash }
    }

    /// Height of the block being produced.
    pub fn height(&self) -> Height {
        self.height
    }

    /// Application state the block will be executed on.
    pub fn app_hash(&self) -> CryptoHash {
        self.app_hash
    }
}

pub struct ProduceBlockResponse {
    pub data: Data,
}

pub struct ValidateBlockRequest<'a> {
    block: &'a Block,
}

impl<'a> ValidateBlockRequest<'a> {
    pub(crate) fn new(block: &'a Block) -> Self {
        Self { block }
    }

    pub fn block(&self) -> &Block {
        self.block
    }
}

pub enum ValidateBlockResponse {
    Valid,
    Invalid,
}

pub struct ApplyBlockRequest<'a> {
    block: &'a Block,
}

impl<'a> ApplyBlockRequest<'a> {
    pub(crate) fn new(block: &'a Block) -> Self {
        Self { block }
    }

    pub fn block(&self) -> &Block {
        self.block
    }
}

pub struct ApplyBlockResponse {
    /// Application state hash after executing the block. Recorded in the header of the next block.
    pub app_hash: CryptoHash,
}
