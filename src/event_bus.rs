/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! The thread that delivers published [events](crate::events) to user handlers and loggers.

use std::sync::mpsc::{Receiver, RecvTimeoutError, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::events::*;
use crate::logging::Logger;

pub(crate) type HandlerPtr<T> = Box<dyn Fn(&T) + Send>;

const EVENT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Default)]
pub(crate) struct EventHandlers {
    pub(crate) new_round_step_handlers: Vec<HandlerPtr<NewRoundStepEvent>>,
    pub(crate) new_round_handlers: Vec<HandlerPtr<NewRoundEvent>>,
    pub(crate) complete_proposal_handlers: Vec<HandlerPtr<CompleteProposalEvent>>,
    pub(crate) timeout_propose_handlers: Vec<HandlerPtr<TimeoutProposeEvent>>,
    pub(crate) timeout_wait_handlers: Vec<HandlerPtr<TimeoutWaitEvent>>,
    pub(crate) polka_handlers: Vec<HandlerPtr<PolkaEvent>>,
    pub(crate) lock_handlers: Vec<HandlerPtr<LockEvent>>,
    pub(crate) valid_block_handlers: Vec<HandlerPtr<ValidBlockEvent>>,
    pub(crate) vote_handlers: Vec<HandlerPtr<VoteEvent>>,
    pub(crate) new_block_handlers: Vec<HandlerPtr<NewBlockEvent>>,
    pub(crate) equivocation_handlers: Vec<HandlerPtr<EquivocationEvent>>,
}

/// The optional user handler for every event type.
#[derive(Default)]
pub(crate) struct UserHandlers {
    pub(crate) on_new_round_step: Option<HandlerPtr<NewRoundStepEvent>>,
    pub(crate) on_new_round: Option<HandlerPtr<NewRoundEvent>>,
    pub(crate) on_complete_proposal: Option<HandlerPtr<CompleteProposalEvent>>,
    pub(crate) on_timeout_propose: Option<HandlerPtr<TimeoutProposeEvent>>,
    pub(crate) on_timeout_wait: Option<HandlerPtr<TimeoutWaitEvent>>,
    pub(crate) on_polka: Option<HandlerPtr<PolkaEvent>>,
    pub(crate) on_lock: Option<HandlerPtr<LockEvent>>,
    pub(crate) on_valid_block: Option<HandlerPtr<ValidBlockEvent>>,
    pub(crate) on_vote: Option<HandlerPtr<VoteEvent>>,
    pub(crate) on_new_block: Option<HandlerPtr<NewBlockEvent>>,
    pub(crate) on_equivocation: Option<HandlerPtr<EquivocationEvent>>,
}

// Logger first, then the user's handler.
fn handlers<T: Logger>(log_events: bool, user_handler: Option<HandlerPtr<T>>) -> Vec<HandlerPtr<T>> {
    let mut handlers = Vec::new();
    if log_events {
        handlers.push(T::get_logger());
    }
    handlers.extend(user_handler);
    handlers
}

impl EventHandlers {
    pub(crate) fn new(log_events: bool, user_handlers: UserHandlers) -> EventHandlers {
        EventHandlers {
            new_round_step_handlers: handlers(log_events, user_handlers.on_new_round_step),
            new_round_handlers: handlers(log_events, user_handlers.on_new_round),
            complete_proposal_handlers: handlers(log_events, user_handlers.on_complete_proposal),
            timeout_propose_handlers: handlers(log_events, user_handlers.on_timeout_propose),
            timeout_wait_handlers: handlers(log_events, user_handlers.on_timeout_wait),
            polka_handlers: handlers(log_events, user_handlers.on_polka),
            lock_handlers: handlers(log_events, user_handlers.on_lock),
            valid_block_handlers: handlers(log_events, user_handlers.on_valid_block),
            vote_handlers: handlers(log_events, user_handlers.on_vote),
            new_block_handlers: handlers(log_events, user_handlers.on_new_block),
            equivocation_handlers: handlers(log_events, user_handlers.on_equivocation),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.new_round_step_handlers.is_empty()
            && self.new_round_handlers.is_empty()
            && self.complete_proposal_handlers.is_empty()
            && self.timeout_propose_handlers.is_empty()
            && self.timeout_wait_handlers.is_empty()
            && self.polka_handlers.is_empty()
            && self.lock_handlers.is_empty()
            && self.valid_block_handlers.is_empty()
            && self.vote_handlers.is_empty()
            && self.new_block_handlers.is_empty()
            && self.equivocation_handlers.is_empty()
    }

    pub(crate) fn fire_handlers(&self, event: Event) {
        match event {
            Event::NewRoundStep(new_round_step_event) => self
                .new_round_step_handlers
                .iter()
                .for_each(|handler| handler(&new_round_step_event)),

            Event::NewRound(new_round_event) => self
                .new_round_handlers
                .iter()
                .for_each(|handler| handler(&new_round_event)),

            Event::CompleteProposal(complete_proposal_event) => self
                .complete_proposal_handlers
                .iter()
                .for_each(|handler| handler(&complete_proposal_event)),

            Event::TimeoutPropose(timeout_propose_event) => self
                .timeout_propose_handlers
                .iter()
                .for_each(|handler| handler(&timeout_propose_event)),

            Event::TimeoutWait(timeout_wait_event) => self
                .timeout_wait_handlers
                .iter()
                .for_each(|handler| handler(&timeout_wait_event)),

            Event::Polka(polka_event) => self
                .polka_handlers
                .iter()
                .for_each(|handler| handler(&polka_event)),

            Event::Lock(lock_event) => self
                .lock_handlers
                .iter()
                .for_each(|handler| handler(&lock_event)),

            Event::ValidBlock(valid_block_event) => self
                .valid_block_handlers
                .iter()
                .for_each(|handler| handler(&valid_block_event)),

            Event::Vote(vote_event) => self
                .vote_handlers
                .iter()
                .for_each(|handler| handler(&vote_event)),

            Event::NewBlock(new_block_event) => self
                .new_block_handlers
                .iter()
                .for_each(|handler| handler(&new_block_event)),

            Event::Equivocation(equivocation_event) => self
                .equivocation_handlers
                .iter()
                .for_each(|handler| handler(&equivocation_event)),
        }
    }
}

pub(crate) fn start_event_bus(
    event_handlers: EventHandlers,
    event_subscriber: Receiver<Event>,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        match event_subscriber.recv_timeout(EVENT_POLL_INTERVAL) {
            Ok(event) => event_handlers.fire_handlers(event),
            Err(RecvTimeoutError::Timeout) => (),
            // The state machine has stopped and every event it published has been handled.
            Err(RecvTimeoutError::Disconnected) => return,
        }
    })
}
