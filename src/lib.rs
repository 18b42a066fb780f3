/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A Tendermint-style Byzantine Fault Tolerant consensus engine.
//!
//! Each height of the chain is decided in one or more rounds. A round moves through the steps
//! `Propose`, `Prevote`, and `Precommit`: the round's proposer proposes a block, validators prevote
//! for it (or for nil), and once +2/3 of the voting power prevotes for the same block, validators
//! lock on it and precommit. +2/3 precommits for a block commit it. Every step is bounded by a
//! timeout, so a round that fails to decide gives way to the next round with the next proposer.
//!
//! The engine is a library. The user provides the [application](app::App), the
//! [block store](blockchain::BlockStore), the [network](networking::Network), and the
//! [signer](signer::PrivValidator), then [starts a replica](replica::ReplicaSpec).

pub mod app;

pub mod blockchain;

pub mod config;

pub(crate) mod event_bus;

pub mod events;

pub mod logging;

pub mod messages;

pub mod networking;

pub mod replica;

pub mod round_event;

pub mod round_state;

pub mod round_step;

pub mod signer;

pub(crate) mod state_machine;

pub mod timeout_ticker;

pub mod types;
