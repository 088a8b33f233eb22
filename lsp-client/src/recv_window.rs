//! Inbound in-order acceptance and the recent-Ack window.
//!
//! [`RecvWindow`] implements the client's receive side:
//!
//! - Only the Data message with `seq == expected_seq` is accepted.
//! - Out-of-order and duplicate Data messages are **dropped**, not buffered.
//!   The server retransmits them every epoch until they are acknowledged,
//!   so a dropped message comes back once its predecessors are in.
//! - Each accepted message produces an Ack that is remembered, together
//!   with at most `capacity - 1` earlier ones, so the engine can resend
//!   them every epoch in case the originals were lost.

use std::collections::BTreeMap;

use crate::message::Message;
use crate::send_window::FIRST_SEQ;

#[derive(Debug)]
pub struct RecvWindow {
    expected_seq: u32,
    recent_acks: BTreeMap<u32, Message>,
    capacity: usize,
}

impl RecvWindow {
    /// `capacity` bounds the number of remembered Acks (the window size).
    pub fn new(capacity: usize) -> Self {
        Self {
            expected_seq: FIRST_SEQ,
            recent_acks: BTreeMap::new(),
            capacity,
        }
    }

    /// Process an inbound Data sequence number.
    ///
    /// Returns the Ack to transmit when `seq` is the expected one, `None`
    /// when the message must be dropped.
    pub fn on_data(&mut self, conn_id: u32, seq: u32) -> Option<Message> {
        if seq != self.expected_seq {
            return None;
        }
        self.expected_seq = self.expected_seq.wrapping_add(1);

        let ack = Message::ack(conn_id, seq);
        self.recent_acks.insert(seq, ack.clone());
        while self.recent_acks.len() > self.capacity {
            self.recent_acks.pop_first();
        }
        Some(ack)
    }

    /// Sequence number of the next Data message that will be accepted.
    pub fn expected_seq(&self) -> u32 {
        self.expected_seq
    }

    /// `true` once at least one Data message was accepted.
    pub fn has_received(&self) -> bool {
        self.expected_seq != FIRST_SEQ
    }

    /// The remembered Acks, oldest first.
    pub fn recent_acks(&self) -> impl Iterator<Item = &Message> {
        self.recent_acks.values()
    }
}
