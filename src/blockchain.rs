/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Storage of committed blocks.
//!
//! The library user provides an implementation of [`BlockStore`]. The state machine reaches it
//! through a [`Blockchain`], which guards it with a read-write lock so that the store can also be
//! read from other threads (e.g., by a block sync server or an RPC handler) while consensus runs.

use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::types::{
    block::{Block, BlockMeta},
    commit::Commit,
    data_types::Height,
    part_set::PartSet,
};

pub trait BlockStore: Send + Sync {
    /// Height of the last saved block, or 0 if the store is empty.
    fn height(&self) -> Height;

    fn load_block(&self, height: Height) -> Option<Block>;

    fn load_block_meta(&self, height: Height) -> Option<BlockMeta>;

    /// The commit for `height` as recorded in the `last_commit` of the block at `height + 1`.
    fn load_block_commit(&self, height: Height) -> Option<Commit>;

    /// The commit for `height` as seen locally when the block was saved.
    fn load_seen_commit(&self, height: Height) -> Option<Commit>;

    /// Persist `block`, the parts it was received in, and the precommits that committed it.
    fn save_block(&mut self, block: &Block, parts: &PartSet, seen_commit: &Commit);
}

/// Shared, lock-guarded handle on a [`BlockStore`].
pub struct Blockchain<B: BlockStore>(Arc<RwLock<B>>);

impl<B: BlockStore> Clone for Blockchain<B> {
    fn clone(&self) -> Self {
        Blockchain(self.0.clone())
    }
}

impl<B: BlockStore> Blockchain<B> {
    pub fn new(block_store: B) -> Blockchain<B> {
        Blockchain(Arc::new(RwLock::new(block_store)))
    }

    fn read(&self) -> RwLockReadGuard<B> {
        match self.0.read() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn write(&self) -> RwLockWriteGuard<B> {
        match self.0.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn height(&self) -> Height {
        self.read().height()
    }

    pub fn load_block(&self, height: Height) -> Option<Block> {
        self.read().load_block(height)
    }

    pub fn load_block_meta(&self, height: Height) -> Option<BlockMeta> {
        self.read().load_block_meta(height)
    }

    /// The commit for `height`.
    ///
    /// For the latest height no block carries the commit yet, so the locally seen commit is returned;
    /// for earlier heights the commit recorded in the next block is returned.
    pub fn load_commit(&self, height: Height) -> Option<Commit> {
        let block_store = self.read();
        if height == block_store.height() {
            block_store.load_seen_commit(height)
        } else {
            block_store.load_block_commit(height)
        }
    }

    pub(crate) fn save_block(&self, block: &Block, parts: &PartSet, seen_commit: &Commit) {
        self.write().save_block(block, parts, seen_commit)
    }
}
