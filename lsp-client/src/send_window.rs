//! Outbound sliding window.
//!
//! [`SendWindow`] assigns sequence numbers to application writes, parks the
//! ones the window cannot admit yet, and tracks every Data message that has
//! been transmitted but not acknowledged.
//!
//! # Protocol contract
//!
//! - Data sequence numbers start at [`FIRST_SEQ`] and increase by one per
//!   write, in the order the writes reached the engine.
//! - A write with sequence number `s` may go out only when
//!   `lowest ≤ s ≤ lowest + window_size` **and** fewer than `window_size`
//!   messages are unacknowledged. `lowest` is the smallest unacked sequence
//!   number, or `s` itself when nothing is outstanding.
//! - Writes are admitted strictly in sequence order; a parked write blocks
//!   every later one.
//! - Acks are **selective**: an Ack for `s` retires exactly `s`. Unknown and
//!   repeated Acks change nothing.
//!
//! This module only manages state; all socket I/O is the caller's
//! responsibility.

use std::collections::{BTreeMap, VecDeque};

use crate::message::Message;

/// Sequence number of the first Data message in either direction.
pub const FIRST_SEQ: u32 = 1;

/// A write that has its sequence number but is waiting for window space.
#[derive(Debug)]
struct Parked {
    seq: u32,
    payload: Vec<u8>,
}

/// Send-side state for one connection.
///
/// ```text
///   lowest_unacked              next_seq
///        │                          │
///  ──────┼────────────┬─────────────┼──────────▶ seq space
///        │<─ unacked ─▶│<── parked ─▶│
/// ```
#[derive(Debug)]
pub struct SendWindow {
    next_seq: u32,
    lowest_unacked: Option<u32>,
    window_size: usize,
    parked: VecDeque<Parked>,
    unacked: BTreeMap<u32, Message>,
}

impl SendWindow {
    /// `window_size` must be at least 1.
    pub fn new(window_size: usize) -> Self {
        debug_assert!(window_size >= 1, "window_size must be at least 1");
        Self {
            next_seq: FIRST_SEQ,
            lowest_unacked: None,
            window_size,
            parked: VecDeque::new(),
            unacked: BTreeMap::new(),
        }
    }

    /// Assign the next sequence number to `payload` and park it.
    ///
    /// Call [`admit`](Self::admit) afterwards to transmit whatever fits.
    pub fn enqueue(&mut self, payload: Vec<u8>) -> u32 {
        let seq = self.next_seq;
        self.next_seq = self.next_seq.wrapping_add(1);
        self.parked.push_back(Parked { seq, payload });
        seq
    }

    /// Move every parked write that satisfies the admission rule into the
    /// unacked map and return the Data messages to put on the wire, oldest
    /// first.
    pub fn admit(&mut self, conn_id: u32) -> Vec<Message> {
        let mut out = Vec::new();
        while let Some(front) = self.parked.front() {
            if !self.admissible(front.seq) {
                break;
            }
            let Some(Parked { seq, payload }) = self.parked.pop_front() else {
                break;
            };
            let msg = Message::data(conn_id, seq, payload);
            self.unacked.insert(seq, msg.clone());
            if self.lowest_unacked.is_none() {
                self.lowest_unacked = Some(seq);
            }
            out.push(msg);
        }
        out
    }

    fn admissible(&self, seq: u32) -> bool {
        let base = self.lowest_unacked.unwrap_or(seq);
        let upper = u64::from(base) + self.window_size as u64;
        self.unacked.len() < self.window_size && base <= seq && u64::from(seq) <= upper
    }

    /// Retire the Data message with sequence number `seq`.
    ///
    /// Returns `false` for an Ack that matches nothing outstanding
    /// (duplicate, stale, or bogus); state is left untouched in that case.
    pub fn on_ack(&mut self, seq: u32) -> bool {
        if self.unacked.remove(&seq).is_none() {
            return false;
        }
        if self.lowest_unacked == Some(seq) {
            self.lowest_unacked = self.unacked.keys().next().copied();
        }
        true
    }

    /// Sequence number the next write will receive.
    pub fn next_seq(&self) -> u32 {
        self.next_seq
    }

    /// Smallest unacknowledged sequence number, `None` when nothing is in flight.
    pub fn lowest_unacked(&self) -> Option<u32> {
        self.lowest_unacked
    }

    pub fn in_flight(&self) -> usize {
        self.unacked.len()
    }

    pub fn parked_len(&self) -> usize {
        self.parked.len()
    }

    /// `true` when nothing is parked and nothing awaits an Ack.
    pub fn is_drained(&self) -> bool {
        self.parked.is_empty() && self.unacked.is_empty()
    }

    /// Every unacknowledged Data message, in sequence order.
    pub fn unacked(&self) -> impl Iterator<Item = &Message> {
        self.unacked.values()
    }
}
