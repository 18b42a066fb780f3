/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! User-defined parameters of the consensus state machine.
//!
//! The replica's configuration is defined using the builder pattern, for example:
//!
//! ```ignore
//! let configuration =
//!     Configuration::builder()
//!     .timeout_propose(Duration::from_millis(3000))
//!     .timeout_prevote(Duration::from_millis(1000))
//!     .timeout_precommit(Duration::from_millis(1000))
//!     .timeout_commit(Duration::from_millis(1000))
//!     .log_events(true)
//!     .build()
//! ```

use std::time::Duration;

use typed_builder::TypedBuilder;

/// Default capacity of the state machine's inbound message queue.
pub const DEFAULT_MSG_QUEUE_CAPACITY: usize = 1000;

/// Default number of messages for future heights held until the replica reaches them.
pub const DEFAULT_FUTURE_MSG_BUFFER_CAPACITY: usize = 1000;

/// Stores the user-defined parameters required to run the consensus state machine.
///
/// ## Timeouts
///
/// Every step of a round except `Commit` is bounded by a timeout. The timeouts of the `Propose`,
/// `Prevote`, and `Precommit` steps grow by their `_delta` for every round after round 0, so that
/// rounds eventually become long enough for messages to arrive under partial synchrony.
///
/// `timeout_commit` is the time waited after committing a block before starting the next height, to
/// gather straggling precommits.
///
/// ## Empty blocks
///
/// If `create_empty_blocks` is `false`, or `create_empty_blocks_interval` is non-zero, the proposer
/// waits at round 0 for transactions before proposing. In the second case it proposes an empty block
/// anyway once `create_empty_blocks_interval` has passed. Heights that must prove a new app hash
/// are never delayed.
#[derive(TypedBuilder, Clone, Debug)]
#[builder(builder_method(doc = "
    Create a builder for building a [Configuration]. On the builder call the following methods to construct a valid [Configuration].

    Required:
    - `.timeout_propose(...)`
    - `.timeout_prevote(...)`
    - `.timeout_precommit(...)`
    - `.timeout_commit(...)`
    - `.log_events(...)`

    Optional:
    - `.timeout_propose_delta(...)`
    - `.timeout_prevote_delta(...)`
    - `.timeout_precommit_delta(...)`
    - `.create_empty_blocks(...)`
    - `.create_empty_blocks_interval(...)`
    - `.msg_queue_capacity(...)`
    - `.future_msg_buffer_capacity(...)`
"))]
pub struct Configuration {
    #[builder(setter(doc = "Set how long to wait for a proposal in round 0. Required."))]
    pub timeout_propose: Duration,
    #[builder(default = Duration::from_millis(500), setter(doc = "Set how much the propose timeout grows per round. Optional."))]
    pub timeout_propose_delta: Duration,
    #[builder(setter(doc = "Set how long to wait for more prevotes after +2/3 prevotes for anything. Required."))]
    pub timeout_prevote: Duration,
    #[builder(default = Duration::from_millis(500), setter(doc = "Set how much the prevote timeout grows per round. Optional."))]
    pub timeout_prevote_delta: Duration,
    #[builder(setter(doc = "Set how long to wait for more precommits after +2/3 precommits for anything. Required."))]
    pub timeout_precommit: Duration,
    #[builder(default = Duration::from_millis(500), setter(doc = "Set how much the precommit timeout grows per round. Optional."))]
    pub timeout_precommit_delta: Duration,
    #[builder(setter(doc = "Set how long to wait after committing a block before starting the next height. Required."))]
    pub timeout_commit: Duration,
    #[builder(default = true, setter(doc = "Set whether blocks may be proposed without transactions. Optional, defaults to true."))]
    pub create_empty_blocks: bool,
    #[builder(default = Duration::ZERO, setter(doc = "Set the longest wait for transactions before proposing an empty block. Optional."))]
    pub create_empty_blocks_interval: Duration,
    #[builder(default = DEFAULT_MSG_QUEUE_CAPACITY, setter(doc = "Set the capacity of the inbound message queue. Optional, defaults to 1000."))]
    pub msg_queue_capacity: usize,
    #[builder(default = DEFAULT_FUTURE_MSG_BUFFER_CAPACITY, setter(doc = "Set how many messages for future heights are kept. Optional, defaults to 1000."))]
    pub future_msg_buffer_capacity: usize,
    #[builder(setter(doc = "Enable logging of events? Required."))]
    pub log_events: bool,
}

impl Configuration {
    /// Whether round 0 waits for transactions before proposing.
    pub fn wait_for_txs(&self) -> bool {
        !self.create_empty_blocks || self.create_empty_blocks_interval > Duration::ZERO
    }
}

/// Durations of the timeouts armed on entering each step.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Timeouts {
    pub propose: Duration,
    pub propose_delta: Duration,
    pub prevote: Duration,
    pub prevote_delta: Duration,
    pub precommit: Duration,
    pub precommit_delta: Duration,
    pub commit: Duration,
}

/// The parts of [`Configuration`] that the state machine thread reads.
#[derive(Clone, Debug)]
pub(crate) struct StateMachineConfiguration {
    pub(crate) timeouts: Timeouts,
    pub(crate) wait_for_txs: bool,
    pub(crate) create_empty_blocks_interval: Duration,
    pub(crate) future_msg_buffer_capacity: usize,
}

impl From<&Configuration> for StateMachineConfiguration {
    fn from(configuration: &Configuration) -> Self {
        StateMachineConfiguration {
            timeouts: Timeouts {
                propose: configuration.timeout_propose,
                propose_delta: configuration.timeout_propose_delta,
                prevote: configuration.timeout_prevote,
                prevote_delta: configuration.timeout_prevote_delta,
                precommit: configuration.timeout_precommit,
                precommit_delta: configuration.timeout_precommit_delta,
                commit: configuration.timeout_commit,
            },
            wait_for_txs: configuration.wait_for_txs(),
            create_empty_blocks_interval: configuration.create_empty_blocks_interval,
            future_msg_buffer_capacity: configuration.future_msg_buffer_capacity,
        }
    }
}

#[test]
fn wait_for_txs_test() {
    let configuration = |create_empty_blocks, interval| {
        Configuration::builder()
            .timeout_propose(Duration::from_millis(100))
            .timeout_prevote(Duration::from_millis(100))
            .timeout_precommit(Duration::from_millis(100))
            .timeout_commit(Duration::from_millis(100))
            .create_empty_blocks(create_empty_blocks)
            .create_empty_blocks_interval(interval)
            .log_events(false)
            .build()
    };

    assert!(!configuration(true, Duration::ZERO).wait_for_txs());
    assert!(configuration(false, Duration::ZERO).wait_for_txs());
    assert!(configuration(true, Duration::from_secs(1)).wait_for_txs());
}
