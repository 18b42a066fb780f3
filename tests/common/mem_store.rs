//! A simple, volatile, in-memory implementation of [`BlockStore`].

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use simple_bft::{
    blockchain::BlockStore,
    types::{
        block::{Block, BlockMeta},
        commit::Commit,
        data_types::Height,
        part_set::PartSet,
    },
};

#[derive(Default)]
struct Contents {
    blocks: BTreeMap<Height, Block>,
    block_metas: BTreeMap<Height, BlockMeta>,
    seen_commits: BTreeMap<Height, Commit>,
}

/// An in-memory implementation of [`BlockStore`]. Clones share the same contents.
#[derive(Clone, Default)]
pub(crate) struct MemStore(Arc<Mutex<Contents>>);

impl MemStore {
    /// Create a new, empty `MemStore`.
    pub(crate) fn new() -> MemStore {
        MemStore::default()
    }
}

impl BlockStore for MemStore {
    fn height(&self) -> Height {
        self.0
            .lock()
            .unwrap()
            .blocks
            .keys()
            .next_back()
            .copied()
            .unwrap_or(Height::new(0))
    }

    fn load_block(&self, height: Height) -> Option<Block> {
        self.0.lock().unwrap().blocks.get(&height).cloned()
    }

    fn load_block_meta(&self, height: Height) -> Option<BlockMeta> {
        self.0.lock().unwrap().block_metas.get(&height).cloned()
    }

    fn load_block_commit(&self, height: Height) -> Option<Commit> {
        self.0
            .lock()
            .unwrap()
            .blocks
            .get(&(height + 1))
            .and_then(|block| block.last_commit.clone())
    }

    fn load_seen_commit(&self, height: Height) -> Option<Commit> {
        self.0.lock().unwrap().seen_commits.get(&height).cloned()
    }

    fn save_block(&mut self, block: &Block, parts: &PartSet, seen_commit: &Commit) {
        let mut contents = self.0.lock().unwrap();
        contents.blocks.insert(block.height(), block.clone());
        contents
            .block_metas
            .insert(block.height(), BlockMeta::new(block, parts.header()));
        contents
            .seen_commits
            .insert(block.height(), seen_commit.clone());
    }
}
