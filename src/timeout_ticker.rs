/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! A timer that holds at most one pending timeout at a time.
//!
//! The ticker runs on its own thread and talks to the state machine only through two channels:
//! schedules go in through [`TimeoutTicker::schedule_timeout`], and firings come out of
//! [`TimeoutTicker::tock_chan`]. Both channels are unbounded, so neither side ever blocks on the
//! other.
//!
//! A new schedule is accepted only if it is for a later `(height, round, step)` than the last
//! accepted one (see [`RoundEvent::supersedes`]). Accepting a schedule cancels the pending timer, so
//! every accepted schedule fires at most once, and a superseded schedule never fires.

use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crate::round_event::RoundEvent;

/// Longest time the ticker thread sleeps before checking for shutdown.
const POLL_INTERVAL: Duration = Duration::from_millis(50);

#[derive(Debug, PartialEq, Eq)]
pub enum TickerError {
    AlreadyStarted,
    NotStarted,
}

pub struct TimeoutTicker {
    tick_sender: Sender<RoundEvent>,
    tick_receiver: Option<Receiver<RoundEvent>>,
    tock_sender: Option<Sender<RoundEvent>>,
    tock_receiver: Receiver<RoundEvent>,
    shutdown: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl TimeoutTicker {
    pub fn new() -> TimeoutTicker {
        let (tick_sender, tick_receiver) = mpsc::channel();
        let (tock_sender, tock_receiver) = mpsc::channel();
        TimeoutTicker {
            tick_sender,
            tick_receiver: Some(tick_receiver),
            tock_sender: Some(tock_sender),
            tock_receiver,
            shutdown: None,
            handle: None,
        }
    }

    /// Start the ticker thread. A ticker can be started only once.
    pub fn start(&mut self) -> Result<(), TickerError> {
        let (Some(ticks), Some(tocks)) = (self.tick_receiver.take(), self.tock_sender.take())
        else {
            return Err(TickerError::AlreadyStarted);
        };
        let (shutdown, shutdown_signal) = mpsc::channel();
        self.shutdown = Some(shutdown);
        self.handle = Some(thread::spawn(move || {
            timeout_routine(ticks, tocks, shutdown_signal)
        }));
        Ok(())
    }

    /// Stop the ticker thread, dropping any pending timeout without firing it.
    pub fn stop(&mut self) -> Result<(), TickerError> {
        let (Some(shutdown), Some(handle)) = (self.shutdown.take(), self.handle.take()) else {
            return Err(TickerError::NotStarted);
        };
        // The thread may already have exited if the tock receiver was dropped.
        let _ = shutdown.send(());
        if handle.join().is_err() {
            log::error!("timeout ticker thread panicked");
        }
        Ok(())
    }

    /// Ask the ticker to fire `event` after `event.ttl`. Never blocks.
    pub fn schedule_timeout(&self, event: RoundEvent) {
        if self.tick_sender.send(event).is_err() {
            log::debug!("timeout ticker is stopped, dropping schedule {}", event);
        }
    }

    /// The channel on which timeouts fire.
    pub fn tock_chan(&self) -> &Receiver<RoundEvent> {
        &self.tock_receiver
    }
}

impl Default for TimeoutTicker {
    fn default() -> Self {
        TimeoutTicker::new()
    }
}

impl Drop for TimeoutTicker {
    fn drop(&mut self) {
        let _ = self.stop();
    }
}

fn timeout_routine(
    ticks: Receiver<RoundEvent>,
    tocks: Sender<RoundEvent>,
    shutdown_signal: Receiver<()>,
) {
    let mut cur: Option<RoundEvent> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        match shutdown_signal.try_recv() {
            Ok(()) | Err(TryRecvError::Disconnected) => return,
            Err(TryRecvError::Empty) => (),
        }

        let wait = match deadline {
            Some(deadline) => deadline
                .saturating_duration_since(Instant::now())
                .min(POLL_INTERVAL),
            None => POLL_INTERVAL,
        };

        match ticks.recv_timeout(wait) {
            Ok(next) => {
                let accepted = match &cur {
                    Some(cur) => next.supersedes(cur),
                    None => true,
                };
                if accepted {
                    log::debug!("scheduled timeout {}", next);
                    deadline = Some(Instant::now() + next.ttl);
                    cur = Some(next);
                } else {
                    log::trace!("ignoring stale schedule {}", next);
                }
            }
            Err(RecvTimeoutError::Timeout) => (),
            Err(RecvTimeoutError::Disconnected) => return,
        }

        if let (Some(at), Some(event)) = (deadline, cur) {
            if Instant::now() >= at {
                deadline = None;
                log::info!("timed out {}", event);
                if tocks.send(event).is_err() {
                    return;
                }
            }
        }
    }
}
