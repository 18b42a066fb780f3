/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Functions that log out events.
//!
//! The logs defined in this module are printed if the user enabled them via the replica's
//! [configuration](crate::config::Configuration).
//!
//! The crate logs using the [log](https://docs.rs/log/latest/log/) crate. To get these messages
//! printed onto a terminal or to a file, set up a
//! [logging implementation](https://docs.rs/log/latest/log/#available-logging-implementations).
//!
//! ## Log message format
//!
//! Log messages are CSVs (Comma Separated Values) with at least two values. The first two values are
//! always:
//! 1. The name of the [event](crate::events) in PascalCase (defined in this module as constants).
//! 2. The time the event was emitted (as number of seconds since the Unix Epoch).
//!
//! The rest of the values differ depending on the kind of event. For example, the following snippet
//! is how a [NewBlock](crate::events::NewBlockEvent) is printed:
//!
//! ```text
//! NewBlock, 1701329264, fNGCJyk, 12, 3
//! ```
//!
//! In the snippet:
//! - The third value is the first seven characters of the Base64 encoding of the block hash.
//! - The fourth value is the height of the block.
//! - The fifth value is the number of data items in the block.

use base64::{engine::general_purpose::STANDARD_NO_PAD, Engine as _};
use std::time::SystemTime;

use crate::events::*;
use crate::types::block::BlockID;

// Names of each event in PascalCase for printing:
pub const NEW_ROUND_STEP: &str = "NewRoundStep";
pub const NEW_ROUND: &str = "NewRound";
pub const COMPLETE_PROPOSAL: &str = "CompleteProposal";
pub const TIMEOUT_PROPOSE: &str = "TimeoutPropose";
pub const TIMEOUT_WAIT: &str = "TimeoutWait";

pub const POLKA: &str = "Polka";
pub const LOCK: &str = "Lock";
pub const VALID_BLOCK: &str = "ValidBlock";

pub const VOTE: &str = "Vote";
pub const NEW_BLOCK: &str = "NewBlock";
pub const EQUIVOCATION: &str = "Equivocation";

/// Implemented by event types. Used to get a closure that logs the event.
pub(crate) trait Logger {
    /// Returns a pointer to the default logging handler for a given event type.
    fn get_logger() -> Box<dyn Fn(&Self) + Send>;
}

impl Logger for NewRoundStepEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |new_round_step_event: &NewRoundStepEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                NEW_ROUND_STEP,
                secs_since_unix_epoch(new_round_step_event.timestamp),
                new_round_step_event.height,
                new_round_step_event.round,
                new_round_step_event.step
            )
        };
        Box::new(logger)
    }
}

impl Logger for NewRoundEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |new_round_event: &NewRoundEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                NEW_ROUND,
                secs_since_unix_epoch(new_round_event.timestamp),
                new_round_event.height,
                new_round_event.round,
                new_round_event
                    .proposer
                    .map(|proposer| first_seven_base64_chars(&proposer))
                    .unwrap_or_else(|| String::from("None"))
            )
        };
        Box::new(logger)
    }
}

impl Logger for CompleteProposalEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |complete_proposal_event: &CompleteProposalEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                COMPLETE_PROPOSAL,
                secs_since_unix_epoch(complete_proposal_event.timestamp),
                complete_proposal_event.height,
                complete_proposal_event.round,
                first_seven_base64_chars(&complete_proposal_event.block_id.hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for TimeoutProposeEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |timeout_propose_event: &TimeoutProposeEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                TIMEOUT_PROPOSE,
                secs_since_unix_epoch(timeout_propose_event.timestamp),
                timeout_propose_event.height,
                timeout_propose_event.round,
                timeout_propose_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for TimeoutWaitEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |timeout_wait_event: &TimeoutWaitEvent| {
            log::info!(
                "{}, {}, {}, {}, {}, {}",
                TIMEOUT_WAIT,
                secs_since_unix_epoch(timeout_wait_event.timestamp),
                timeout_wait_event.height,
                timeout_wait_event.round,
                timeout_wait_event.step,
                timeout_wait_event.timeout.as_millis()
            )
        };
        Box::new(logger)
    }
}

impl Logger for PolkaEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |polka_event: &PolkaEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                POLKA,
                secs_since_unix_epoch(polka_event.timestamp),
                polka_event.height,
                polka_event.round,
                block_id_or_nil(&polka_event.block_id)
            )
        };
        Box::new(logger)
    }
}

impl Logger for LockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |lock_event: &LockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                LOCK,
                secs_since_unix_epoch(lock_event.timestamp),
                lock_event.height,
                lock_event.round,
                block_id_or_nil(&lock_event.block_id)
            )
        };
        Box::new(logger)
    }
}

impl Logger for ValidBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |valid_block_event: &ValidBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                VALID_BLOCK,
                secs_since_unix_epoch(valid_block_event.timestamp),
                valid_block_event.height,
                valid_block_event.round,
                first_seven_base64_chars(&valid_block_event.block_id.hash.bytes())
            )
        };
        Box::new(logger)
    }
}

impl Logger for VoteEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |vote_event: &VoteEvent| {
            log::info!(
                "{}, {}, {:?}, {}, {}, {}",
                VOTE,
                secs_since_unix_epoch(vote_event.timestamp),
                vote_event.vote.vote_type,
                vote_event.vote.height,
                vote_event.vote.round,
                block_id_or_nil(&vote_event.vote.block_id)
            )
        };
        Box::new(logger)
    }
}

impl Logger for NewBlockEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |new_block_event: &NewBlockEvent| {
            log::info!(
                "{}, {}, {}, {}, {}",
                NEW_BLOCK,
                secs_since_unix_epoch(new_block_event.timestamp),
                first_seven_base64_chars(&new_block_event.block_id.hash.bytes()),
                new_block_event.block.header.height,
                new_block_event.block.data.len()
            )
        };
        Box::new(logger)
    }
}

impl Logger for EquivocationEvent {
    fn get_logger() -> Box<dyn Fn(&Self) + Send> {
        let logger = |equivocation_event: &EquivocationEvent| {
            log::warn!(
                "{}, {}, {}, {}, {}, {:?}",
                EQUIVOCATION,
                secs_since_unix_epoch(equivocation_event.timestamp),
                first_seven_base64_chars(&equivocation_event.existing.validator),
                equivocation_event.existing.height,
                equivocation_event.existing.round,
                equivocation_event.existing.vote_type
            )
        };
        Box::new(logger)
    }
}

fn secs_since_unix_epoch(timestamp: SystemTime) -> u64 {
    timestamp
        .duration_since(SystemTime::UNIX_EPOCH)
        .map(|duration| duration.as_secs())
        .unwrap_or(0)
}

fn first_seven_base64_chars(bytes: &[u8]) -> String {
    let encoded = STANDARD_NO_PAD.encode(bytes);
    if encoded.len() > 7 {
        encoded[0..7].to_string()
    } else {
        encoded
    }
}

fn block_id_or_nil(block_id: &Option<BlockID>) -> String {
    match block_id {
        Some(block_id) => first_seven_base64_chars(&block_id.hash.bytes()),
        None => String::from("nil"),
    }
}
