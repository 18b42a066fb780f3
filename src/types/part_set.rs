/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Blocks are gossiped in fixed-size parts. This module defines a [`Part`] and the [`PartSet`] that
//! reassembles parts into the serialized block.
//!
//! ## Proofs
//!
//! The hash in a [`PartSetHeader`] is the SHA256 hash of the concatenated hashes of every part (the
//! "leaf hashes"). Every part carries the full list of leaf hashes as its proof, so a receiver can
//! check, part by part, that a part belongs to the part set named in a proposal.

use borsh::{BorshDeserialize, BorshSerialize};

use super::{
    bit_array::BitArray,
    block::PartSetHeader,
    crypto_primitives::{CryptoHasher, Digest},
    data_types::CryptoHash,
    validation::ValidationError,
};

/// Maximum size of a single block part.
pub const BLOCK_PART_SIZE_BYTES: usize = 65536;

#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct Part {
    pub index: u32,
    pub bytes: Vec<u8>,
    pub leaf_hashes: Vec<CryptoHash>,
}

impl Part {
    pub fn validate_basic(&self) -> Result<(), ValidationError> {
        if self.bytes.len() > BLOCK_PART_SIZE_BYTES {
            return Err(ValidationError::PartTooLarge {
                size: self.bytes.len(),
                max: BLOCK_PART_SIZE_BYTES,
            });
        }
        if self.leaf_hashes.is_empty() {
            return Err(ValidationError::EmptyPartProof);
        }
        if self.index as usize >= self.leaf_hashes.len() {
            return Err(ValidationError::PartIndexOutOfRange {
                index: self.index,
                total: self.leaf_hashes.len() as u32,
            });
        }
        Ok(())
    }
}

fn root_hash(leaf_hashes: &[CryptoHash]) -> CryptoHash {
    let mut hasher = CryptoHasher::new();
    for leaf_hash in leaf_hashes {
        hasher.update(leaf_hash.bytes());
    }
    CryptoHash::new(hasher.finalize().into())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PartSetError {
    UnexpectedIndex { index: u32, total: u32 },
    InvalidProof,
}

/// Accumulates the parts of one block.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PartSet {
    total: u32,
    hash: CryptoHash,
    parts: Vec<Option<Part>>,
    parts_bit_array: BitArray,
    count: u32,
    byte_size: usize,
}

impl PartSet {
    /// Split `data` into a complete part set with parts of at most `part_size` bytes.
    pub fn from_data(data: &[u8], part_size: usize) -> PartSet {
        let chunks: Vec<&[u8]> = if data.is_empty() {
            vec![data]
        } else {
            data.chunks(part_size).collect()
        };
        let leaf_hashes: Vec<CryptoHash> = chunks
            .iter()
            .map(|chunk| CryptoHash::digest(chunk))
            .collect();
        let total = chunks.len() as u32;

        let mut parts_bit_array = BitArray::new(total);
        let parts = chunks
            .iter()
            .enumerate()
            .map(|(index, chunk)| {
                parts_bit_array.set_index(index as u32, true);
                Some(Part {
                    index: index as u32,
                    bytes: chunk.to_vec(),
                    leaf_hashes: leaf_hashes.clone(),
                })
            })
            .collect();

        PartSet {
            total,
            hash: root_hash(&leaf_hashes),
            parts,
            parts_bit_array,
            count: total,
            byte_size: data.len(),
        }
    }

    /// Create an empty part set that will accept the parts described by `header`.
    pub fn from_header(header: &PartSetHeader) -> PartSet {
        PartSet {
            total: header.total,
            hash: header.hash,
            parts: vec![None; header.total as usize],
            parts_bit_array: BitArray::new(header.total),
            count: 0,
            byte_size: 0,
        }
    }

    pub fn header(&self) -> PartSetHeader {
        PartSetHeader {
            total: self.total,
            hash: self.hash,
        }
    }

    pub fn has_header(&self, header: &PartSetHeader) -> bool {
        self.header() == *header
    }

    /// Add `part` to the part set.
    ///
    /// Returns `Ok(false)` if the part was already held, and `Ok(true)` if it was newly added.
    pub fn add_part(&mut self, part: Part) -> Result<bool, PartSetError> {
        if part.index >= self.total {
            return Err(PartSetError::UnexpectedIndex {
                index: part.index,
                total: self.total,
            });
        }
        if self.parts[part.index as usize].is_some() {
            return Ok(false);
        }
        if part.leaf_hashes.len() != self.total as usize
            || root_hash(&part.leaf_hashes) != self.hash
            || CryptoHash::digest(&part.bytes) != part.leaf_hashes[part.index as usize]
        {
            return Err(PartSetError::InvalidProof);
        }

        let index = part.index;
        self.byte_size += part.bytes.len();
        self.parts[index as usize] = Some(part);
        self.parts_bit_array.set_index(index, true);
        self.count += 1;
        Ok(true)
    }

    pub fn get_part(&self, index: u32) -> Option<&Part> {
        self.parts.get(index as usize).and_then(Option::as_ref)
    }

    pub fn parts_bit_array(&self) -> &BitArray {
        &self.parts_bit_array
    }

    pub fn total(&self) -> u32 {
        self.total
    }

    pub fn count(&self) -> u32 {
        self.count
    }

    pub fn byte_size(&self) -> usize {
        self.byte_size
    }

    pub fn is_complete(&self) -> bool {
        self.count == self.total
    }

    /// The reassembled bytes, if every part is held.
    pub fn bytes(&self) -> Option<Vec<u8>> {
        if !self.is_complete() {
            return None;
        }
        let mut bytes = Vec::with_capacity(self.byte_size);
        for part in self.parts.iter().flatten() {
            bytes.extend_from_slice(&part.bytes);
        }
        Some(bytes)
    }
}
