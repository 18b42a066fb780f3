/*
    Copyright © 2023, ParallelChain Lab
    Licensed under the Apache License, Version 2.0: http://www.apache.org/licenses/LICENSE-2.0
*/

//! Buffer for messages that arrive for a height the state machine has not reached yet.
//!
//! Peers that commit a height before this replica does move on and broadcast the next height's
//! proposal, block parts, and votes. Without the buffer, a lagging replica would drop these and could
//! then never assemble the next block. Buffered messages are replayed once the replica enters their
//! height.
//!
//! ## Buffer management
//!
//! The buffer holds at most `capacity` messages. When it is full, messages for the highest heights
//! are evicted first, and a new message for a height at or above every buffered height is dropped.

use std::collections::{BTreeMap, VecDeque};

use crate::messages::Message;
use crate::types::data_types::Height;

pub(super) struct MessageBuffer {
    capacity: usize,
    len: usize,
    buffer: BTreeMap<Height, VecDeque<Message>>,
}

impl MessageBuffer {
    pub(super) fn new(capacity: usize) -> MessageBuffer {
        MessageBuffer {
            capacity,
            len: 0,
            buffer: BTreeMap::new(),
        }
    }

    /// Try inserting `msg`, which is for a future height. Returns whether it was inserted.
    pub(super) fn insert(&mut self, msg: Message) -> bool {
        let height = msg.event.height();
        if self.len >= self.capacity {
            match self.buffer.keys().next_back() {
                Some(highest) if height < *highest => self.remove_one_highest(),
                _ => return false,
            }
        }

        self.buffer.entry(height).or_default().push_back(msg);
        self.len += 1;
        true
    }

    /// Remove and return every buffered message for `height`, and forget messages for lower heights.
    pub(super) fn take(&mut self, height: Height) -> VecDeque<Message> {
        let mut still_future = self.buffer.split_off(&height);
        let msgs = still_future.remove(&height).unwrap_or_default();
        self.buffer = still_future;
        self.len = self.buffer.values().map(VecDeque::len).sum();
        msgs
    }

    pub(super) fn len(&self) -> usize {
        self.len
    }

    fn remove_one_highest(&mut self) {
        if let Some(mut highest) = self.buffer.last_entry() {
            highest.get_mut().pop_back();
            self.len -= 1;
            if highest.get().is_empty() {
                highest.remove();
            }
        }
    }
}
