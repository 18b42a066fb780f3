/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The error returned when a message or one of its parts is structurally malformed.

use std::fmt::{self, Display, Formatter};

/// Reason why a value failed its structural (`validate_basic`) checks.
///
/// Structural checks look only at the value itself, never at consensus state, so a value that fails
/// them can be rejected before it is admitted into the state machine's queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    NegativeHeight,
    NegativeRound,
    InvalidPOLRound,
    InvalidVoteType,
    NegativeValidatorIndex,
    EmptyPOLBitArray,
    TooManyVotes { size: u32, max: u32 },
    MissingSignature,
    InvalidBlockID,
    PartTooLarge { size: usize, max: usize },
    EmptyPartProof,
    PartIndexOutOfRange { index: u32, total: u32 },
}

impl Display for ValidationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::NegativeHeight => write!(f, "negative height"),
            ValidationError::NegativeRound => write!(f, "negative round"),
            ValidationError::InvalidPOLRound => write!(f, "invalid proof-of-lock round"),
            ValidationError::InvalidVoteType => write!(f, "invalid vote type"),
            ValidationError::NegativeValidatorIndex => write!(f, "negative validator index"),
            ValidationError::EmptyPOLBitArray => write!(f, "empty proof-of-lock bit array"),
            ValidationError::TooManyVotes { size, max } => {
                write!(f, "bit array of size {} exceeds maximum of {} votes", size, max)
            }
            ValidationError::MissingSignature => write!(f, "missing signature"),
            ValidationError::InvalidBlockID => write!(f, "invalid block id"),
            ValidationError::PartTooLarge { size, max } => {
                write!(f, "block part of {} bytes exceeds maximum of {} bytes", size, max)
            }
            ValidationError::EmptyPartProof => write!(f, "block part has an empty proof"),
            ValidationError::PartIndexOutOfRange { index, total } => {
                write!(f, "block part index {} is out of range for {} parts", index, total)
            }
        }
    }
}
