/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Definitions for the 'block' type, the identifiers that refer to blocks, and their associated methods.

use std::fmt::{self, Display, Formatter};

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    commit::Commit,
    crypto_primitives::VerifyingKeyBytes,
    data_types::{ChainID, CryptoHash, Data, Height, Timestamp},
    part_set::PartSet,
    validation::ValidationError,
};

/// Number of parts a block was split into and the hash that commits to all of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default, BorshSerialize, BorshDeserialize)]
pub struct PartSetHeader {
    pub total: u32,
    pub hash: CryptoHash,
}

impl PartSetHeader {
    pub fn is_zero(&self) -> bool {
        self.total == 0 && self.hash == CryptoHash::default()
    }
}

/// Identifies a block by the hash of its header and the header of the part set it is gossiped in.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, BorshSerialize, BorshDeserialize)]
pub struct BlockID {
    pub hash: CryptoHash,
    pub part_set_header: PartSetHeader,
}

impl BlockID {
    pub fn validate_basic(&self) -> Result<(), ValidationError> {
        if self.hash == CryptoHash::default() || self.part_set_header.total == 0 {
            return Err(ValidationError::InvalidBlockID);
        }
        Ok(())
    }
}

impl Display for BlockID {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}:{}:{}",
            self.hash, self.part_set_header.total, self.part_set_header.hash
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Header {
    pub chain_id: ChainID,
    pub height: Height,
    pub time: Timestamp,
    pub last_block_id: Option<BlockID>,
    pub last_commit_hash: CryptoHash,
    pub data_hash: CryptoHash,
    pub validators_hash: CryptoHash,
    /// Application state after executing the previous block.
    pub app_hash: CryptoHash,
    pub proposer: VerifyingKeyBytes,
}

impl Header {
    pub fn hash(&self) -> CryptoHash {
        CryptoHash::digest(&self.try_to_vec().unwrap())
    }
}

/// A block: a header, the data the application produced, and the commit that finalized the previous
/// block.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Block {
    pub header: Header,
    pub data: Data,
    pub last_commit: Option<Commit>,
}

impl Block {
    pub fn hash(&self) -> CryptoHash {
        self.header.hash()
    }

    pub fn height(&self) -> Height {
        self.header.height
    }

    /// Check that the hashes in the header match the contents of the block.
    pub fn validate_basic(&self) -> Result<(), BlockError> {
        if self.header.height.int() < 0 {
            return Err(BlockError::Validation(ValidationError::NegativeHeight));
        }
        if self.header.data_hash != self.data.hash() {
            return Err(BlockError::WrongDataHash);
        }
        let last_commit_hash = self
            .last_commit
            .as_ref()
            .map(Commit::hash)
            .unwrap_or_default();
        if self.header.last_commit_hash != last_commit_hash {
            return Err(BlockError::WrongLastCommitHash);
        }
        if let Some(last_commit) = &self.last_commit {
            if last_commit.height + 1 != self.header.height {
                return Err(BlockError::WrongLastCommitHeight);
            }
        }
        Ok(())
    }

    /// Split the serialized block into parts of at most `part_size` bytes.
    pub fn make_part_set(&self, part_size: usize) -> PartSet {
        PartSet::from_data(&self.try_to_vec().unwrap(), part_size)
    }

    /// Decode a block from the bytes of a complete part set.
    pub fn from_part_set(part_set: &PartSet) -> Result<Block, BlockError> {
        let bytes = part_set.bytes().ok_or(BlockError::IncompletePartSet)?;
        Block::try_from_slice(&bytes).map_err(|_| BlockError::Undecodable)
    }

    pub fn block_id(&self, part_set_header: PartSetHeader) -> BlockID {
        BlockID {
            hash: self.hash(),
            part_set_header,
        }
    }
}

/// Summary of a stored block, enough to check what chain state the block was built on.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct BlockMeta {
    pub block_id: BlockID,
    pub header: Header,
    pub num_data: u64,
}

impl BlockMeta {
    pub fn new(block: &Block, part_set_header: PartSetHeader) -> BlockMeta {
        BlockMeta {
            block_id: block.block_id(part_set_header),
            header: block.header.clone(),
            num_data: block.data.len() as u64,
        }
    }
}

/// Reasons why a block is rejected.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockError {
    Validation(ValidationError),
    WrongDataHash,
    WrongLastCommitHash,
    WrongLastCommitHeight,
    IncompletePartSet,
    Undecodable,
    WrongChainID,
    WrongHeight { expected: Height, actual: Height },
    WrongLastBlockID,
    WrongAppHash,
    WrongValidatorsHash,
    UnknownProposer,
    MissingLastCommit,
    InvalidLastCommit(String),
    RejectedByApp,
}

impl From<ValidationError> for BlockError {
    fn from(value: ValidationError) -> Self {
        BlockError::Validation(value)
    }
}

impl Display for BlockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            BlockError::WrongHeight { expected, actual } => {
                write!(f, "wrong block height: expected {}, got {}", expected, actual)
            }
            BlockError::InvalidLastCommit(reason) => write!(f, "invalid last commit: {}", reason),
            other => write!(f, "{:?}", other),
        }
    }
}
