/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Methods to build and run a replica.
//!
//! A replica runs four threads:
//! 1. The state machine thread, the only writer of the replica's [round state](crate::round_state).
//! 2. The timeout ticker thread, owned by the state machine.
//! 3. The poller thread, which moves messages from the [network](crate::networking) into the state
//!    machine's bounded message queue.
//! 4. The event bus thread, which runs event handlers. It is only started if at least one handler is
//!    registered or `log_events` is set.
//!
//! The key components of this module are:
//! - The builder-pattern interface to construct a [specification of the replica](ReplicaSpec) with:
//!   1. `ReplicaSpec::builder` to construct a `ReplicaSpecBuilder`,
//!   2. The setters of the `ReplicaSpecBuilder`, and
//!   3. The `ReplicaSpecBuilder::build` method to construct a [ReplicaSpec],
//! - The function to [start](ReplicaSpec::start) a [Replica] given its specification,
//! - [The type](Replica) which keeps the replica alive.
//!
//! ## Validators and non-validators
//!
//! A replica whose [`PrivValidator`] has no key, or whose key is not in the validator set of the
//! current height, follows consensus without proposing or voting.
//!
//! ## Starting a replica
//!
//! ```ignore
//! let replica =
//!     ReplicaSpec::builder()
//!     .block_store(block_store)
//!     .app(app)
//!     .network(network)
//!     .validator(LocalValidator::new(LocalSigner::new(signing_key)))
//!     .state(State::genesis(chain_id, Height::new(1), app_hash, validators))
//!     .configuration(configuration)
//!     .on_new_block(new_block_handler)
//!     .build()
//!     .start()
//! ```
//!
//! ### Required setters
//!
//! - `.block_store(...)`
//! - `.app(...)`
//! - `.network(...)`
//! - `.validator(...)`
//! - `.state(...)`
//! - `.configuration(...)`
//!
//! ### Optional setters
//!
//! The optional setters are for registering user-defined event handlers for events from
//! [crate::events]:
//! - `.on_new_round_step(...)`
//! - `.on_new_round(...)`
//! - `.on_complete_proposal(...)`
//! - `.on_timeout_propose(...)`
//! - `.on_timeout_wait(...)`
//! - `.on_polka(...)`
//! - `.on_lock(...)`
//! - `.on_valid_block(...)`
//! - `.on_vote(...)`
//! - `.on_new_block(...)`
//! - `.on_equivocation(...)`

use std::sync::mpsc::{self, Sender};
use std::thread::JoinHandle;

use typed_builder::TypedBuilder;

use crate::app::App;
use crate::blockchain::{BlockStore, Blockchain};
use crate::config::Configuration;
use crate::event_bus::*;
use crate::events::*;
use crate::messages::{message_queue, MessageSender};
use crate::networking::{start_polling, Network};
use crate::round_state::RoundStateCamera;
use crate::signer::PrivValidator;
use crate::state_machine::StateMachine;
use crate::types::state::State;

/// Stores all necessary parameters and trait implementations required to run the [Replica].
#[derive(TypedBuilder)]
#[builder(builder_method(doc = "
    Create a builder for building a [ReplicaSpec]. On the builder call the following methods to construct a valid [ReplicaSpec].

    Required:
    - `.block_store(...)`
    - `.app(...)`
    - `.network(...)`
    - `.validator(...)`
    - `.state(...)`
    - `.configuration(...)`

    Optional:
    - `.on_new_round_step(...)`
    - `.on_new_round(...)`
    - `.on_complete_proposal(...)`
    - `.on_timeout_propose(...)`
    - `.on_timeout_wait(...)`
    - `.on_polka(...)`
    - `.on_lock(...)`
    - `.on_valid_block(...)`
    - `.on_vote(...)`
    - `.on_new_block(...)`
    - `.on_equivocation(...)`
"))]
pub struct ReplicaSpec<B, A, N, V>
where
    B: BlockStore + 'static,
    A: App + 'static,
    N: Network + 'static,
    V: PrivValidator + 'static,
{
    // Required parameters
    #[builder(setter(doc = "Set the store that committed blocks are saved to. The argument must implement the [BlockStore](crate::blockchain::BlockStore) trait. Required."))]
    block_store: B,
    #[builder(setter(doc = "Set the application code to be run on the blockchain. The argument must implement the [App](crate::app::App) trait. Required."))]
    app: A,
    #[builder(setter(doc = "Set the implementation of peer-to-peer networking. The argument must implement the [Network](crate::networking::Network) trait. Required."))]
    network: N,
    #[builder(setter(doc = "Set the signer of the replica's proposals and votes. The argument must implement the [PrivValidator](crate::signer::PrivValidator) trait. Required."))]
    validator: V,
    #[builder(setter(doc = "Set the [chain state](crate::types::state::State) to start from, e.g., the genesis state. Required."))]
    state: State,
    #[builder(setter(doc = "Set the [configuration](Configuration), which contains the necessary parameters to run a replica. Required."))]
    configuration: Configuration,
    // Optional parameters
    #[builder(default, setter(transform = |handler: impl Fn(&NewRoundStepEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<NewRoundStepEvent>),
    doc = "Register a handler closure to be invoked after the replica enters a new step. Optional."))]
    on_new_round_step: Option<HandlerPtr<NewRoundStepEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&NewRoundEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<NewRoundEvent>),
    doc = "Register a handler closure to be invoked after the replica starts a new round. Optional."))]
    on_new_round: Option<HandlerPtr<NewRoundEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&CompleteProposalEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<CompleteProposalEvent>),
    doc = "Register a handler closure to be invoked after the replica receives every part of the proposal block. Optional."))]
    on_complete_proposal: Option<HandlerPtr<CompleteProposalEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TimeoutProposeEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TimeoutProposeEvent>),
    doc = "Register a handler closure to be invoked after the propose step times out. Optional."))]
    on_timeout_propose: Option<HandlerPtr<TimeoutProposeEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&TimeoutWaitEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<TimeoutWaitEvent>),
    doc = "Register a handler closure to be invoked after the prevote or precommit step times out. Optional."))]
    on_timeout_wait: Option<HandlerPtr<TimeoutWaitEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&PolkaEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<PolkaEvent>),
    doc = "Register a handler closure to be invoked after the replica sees +2/3 prevotes for the same value. Optional."))]
    on_polka: Option<HandlerPtr<PolkaEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&LockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<LockEvent>),
    doc = "Register a handler closure to be invoked after the replica locks or relocks on a block. Optional."))]
    on_lock: Option<HandlerPtr<LockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&ValidBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<ValidBlockEvent>),
    doc = "Register a handler closure to be invoked after the replica updates its valid block. Optional."))]
    on_valid_block: Option<HandlerPtr<ValidBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&VoteEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<VoteEvent>),
    doc = "Register a handler closure to be invoked after the replica signs a vote. Optional."))]
    on_vote: Option<HandlerPtr<VoteEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&NewBlockEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<NewBlockEvent>),
    doc = "Register a handler closure to be invoked after a block is committed. Optional."))]
    on_new_block: Option<HandlerPtr<NewBlockEvent>>,
    #[builder(default, setter(transform = |handler: impl Fn(&EquivocationEvent) + Send + 'static| Some(Box::new(handler) as HandlerPtr<EquivocationEvent>),
    doc = "Register a handler closure to be invoked after the replica receives conflicting votes from a validator. Optional."))]
    on_equivocation: Option<HandlerPtr<EquivocationEvent>>,
}

impl<B, A, N, V> ReplicaSpec<B, A, N, V>
where
    B: BlockStore + 'static,
    A: App + 'static,
    N: Network + 'static,
    V: PrivValidator + 'static,
{
    /// Starts all threads and channels associated with running a replica, and returns the handles to
    /// them in a [Replica] struct.
    pub fn start(self) -> Replica<B> {
        let blockchain = Blockchain::new(self.block_store);
        let (message_sender, messages) = message_queue(self.configuration.msg_queue_capacity);

        let event_handlers = EventHandlers::new(
            self.configuration.log_events,
            UserHandlers {
                on_new_round_step: self.on_new_round_step,
                on_new_round: self.on_new_round,
                on_complete_proposal: self.on_complete_proposal,
                on_timeout_propose: self.on_timeout_propose,
                on_timeout_wait: self.on_timeout_wait,
                on_polka: self.on_polka,
                on_lock: self.on_lock,
                on_valid_block: self.on_valid_block,
                on_vote: self.on_vote,
                on_new_block: self.on_new_block,
                on_equivocation: self.on_equivocation,
            },
        );

        let (event_publisher, event_subscriber) = if !event_handlers.is_empty() {
            let (publisher, subscriber) = mpsc::channel();
            (Some(publisher), Some(subscriber))
        } else {
            (None, None)
        };

        let state_machine = StateMachine::new(
            (&self.configuration).into(),
            self.state,
            blockchain.clone(),
            self.app,
            self.network.clone(),
            self.validator,
            messages,
            event_publisher,
        );
        let round_state_camera = state_machine.round_state_camera();
        let (state_machine_shutdown, state_machine_shutdown_receiver) = mpsc::channel();
        let state_machine = state_machine.start(state_machine_shutdown_receiver);

        let (poller_shutdown, poller_shutdown_receiver) = mpsc::channel();
        let poller = start_polling(
            self.network,
            message_sender.clone(),
            poller_shutdown_receiver,
        );

        let (event_bus, event_bus_shutdown) = match event_subscriber {
            Some(event_subscriber) => {
                let (shutdown, shutdown_receiver) = mpsc::channel();
                let event_bus = start_event_bus(event_handlers, event_subscriber, shutdown_receiver);
                (Some(event_bus), Some(shutdown))
            }
            None => (None, None),
        };

        Replica {
            blockchain,
            round_state_camera,
            message_sender,
            poller: Some(poller),
            poller_shutdown,
            state_machine: Some(state_machine),
            state_machine_shutdown,
            event_bus,
            event_bus_shutdown,
        }
    }
}

/// A handle to the background threads of a replica. When this value is dropped, all background
/// threads are gracefully shut down.
pub struct Replica<B: BlockStore> {
    blockchain: Blockchain<B>,
    round_state_camera: RoundStateCamera,
    message_sender: MessageSender,
    poller: Option<JoinHandle<()>>,
    poller_shutdown: Sender<()>,
    state_machine: Option<JoinHandle<()>>,
    state_machine_shutdown: Sender<()>,
    event_bus: Option<JoinHandle<()>>,
    event_bus_shutdown: Option<Sender<()>>,
}

impl<B: BlockStore> Replica<B> {
    /// Returns a [Blockchain] handle, which can be used to read the blocks this replica has
    /// committed.
    pub fn blockchain(&self) -> &Blockchain<B> {
        &self.blockchain
    }

    /// Returns a camera that shows the state machine's position as of its last processed input.
    pub fn round_state_camera(&self) -> &RoundStateCamera {
        &self.round_state_camera
    }

    /// Returns a sender for feeding messages into the state machine directly, bypassing the
    /// network. Useful for [round triggers](crate::messages::RoundTriggerEvent).
    pub fn message_sender(&self) -> &MessageSender {
        &self.message_sender
    }
}

impl<B: BlockStore> Drop for Replica<B> {
    fn drop(&mut self) {
        // The poller feeds the state machine, which feeds the event bus. Each is stopped before the
        // thread it feeds.
        let _ = self.poller_shutdown.send(());
        join(self.poller.take(), "poller");

        let _ = self.state_machine_shutdown.send(());
        join(self.state_machine.take(), "state machine");

        if let Some(event_bus_shutdown) = &self.event_bus_shutdown {
            let _ = event_bus_shutdown.send(());
        }
        join(self.event_bus.take(), "event bus");
    }
}

fn join(handle: Option<JoinHandle<()>>, thread_name: &str) {
    if let Some(handle) = handle {
        if handle.join().is_err() {
            log::error!("{} thread panicked", thread_name);
        }
    }
}
