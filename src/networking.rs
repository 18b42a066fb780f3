/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! [Trait definition](Network) for pluggable peer-to-peer networking, and the poller thread that feeds
//! received messages into the state machine.
//!
//! Peers are identified by [`PeerID`]s, whose meaning is up to the networking provider (e.g., the
//! peer's verifying key bytes). The state machine only ever broadcasts; gossip strategies such as
//! targeted resends based on [`HasVoteEvent`](crate::messages::HasVoteEvent)s belong in the
//! provider.

use std::sync::mpsc::{Receiver, TryRecvError};
use std::thread::{self, JoinHandle};

use crate::messages::{EnqueueError, Message, MessageEvent, MessageSender};
use crate::types::data_types::PeerID;

pub trait Network: Clone + Send {
    /// Send a message to all peers without blocking.
    fn broadcast(&mut self, message: MessageEvent);

    /// Receive a message from any peer. Returns immediately with a None if no message is available now.
    fn recv(&mut self) -> Option<(PeerID, MessageEvent)>;
}

/// Spawn the poller thread, which polls the Network for messages and enqueues them into the state
/// machine's message queue.
///
/// The poller blocks while the queue is full, so a slow state machine applies backpressure to the
/// network rather than losing messages.
pub(crate) fn start_polling<N: Network + 'static>(
    mut network: N,
    message_sender: MessageSender,
    shutdown_signal: Receiver<()>,
) -> JoinHandle<()> {
    thread::spawn(move || loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        if let Some((origin, event)) = network.recv() {
            match message_sender.send(Message::new(event, origin)) {
                Ok(()) => (),
                Err(EnqueueError::Invalid(err)) => {
                    log::debug!("dropping invalid message from {:?}: {}", origin, err)
                }
                Err(err @ EnqueueError::QueueFull(_)) | Err(err @ EnqueueError::Stopped(_)) => {
                    log::debug!("{}", err);
                    return;
                }
            }
        } else {
            thread::yield_now()
        }
    })
}
