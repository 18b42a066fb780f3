/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Types that are used across multiple components of the consensus engine: blocks and their parts,
//! proposals, votes and vote sets, validator sets, and the chain state.
//!
//! Types specific to the round state machine itself live in [`crate::round_state`],
//! [`crate::round_step`], and [`crate::round_event`].

pub mod bit_array;

pub mod block;

pub mod commit;

pub mod crypto_primitives;

pub mod data_types;

pub mod part_set;

pub mod proposal;

pub mod state;

pub mod validation;

pub mod validator_set;

pub mod vote;

pub mod vote_set;
