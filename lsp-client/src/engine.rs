//! The client protocol engine.
//!
//! [`Engine`] is the single owner of all connection state. It performs no
//! I/O: every event handler returns the [`Output`]s the caller must carry
//! out, in order. [`crate::driver`] feeds it events from the receiver task,
//! the application, and the epoch timer, and executes the outputs against
//! the socket and the application queues.
//!
//! # Event handling
//!
//! | Event              | Effect                                                 |
//! |--------------------|--------------------------------------------------------|
//! | Ack, seq 0         | completes the handshake (ignored afterwards)            |
//! | Ack, seq `s`       | retires `s`, admits parked writes, may finish a close   |
//! | Data, seq `s`      | accepted only if `s` is the expected seq; delivered+acked |
//! | write              | assigned the next seq, transmitted if the window allows |
//! | epoch              | handshake retry, or keep-alive + retransmissions        |
//! | close              | stop taking writes, finish once everything is acked     |

use log::{debug, info, warn};

use crate::error::LspError;
use crate::message::{Message, MsgKind};
use crate::params::Params;
use crate::recv_window::RecvWindow;
use crate::send_window::SendWindow;
use crate::state::ConnectionStatus;

/// Something the caller of an [`Engine`] handler has to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Output {
    /// Put this message on the wire.
    Transmit(Message),
    /// Hand this payload to the application's read queue.
    Deliver(Vec<u8>),
    /// The handshake completed with this connection id.
    Connected(u32),
    /// The connection is dead; stop all tasks.
    Failed(Failure),
    /// Close finished draining; stop all tasks.
    Closed,
}

/// Why the engine gave up on a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// The Connect was retransmitted `attempts` times without an Ack.
    HandshakeExhausted { attempts: u32 },
    /// Nothing arrived from the server for `epochs` epochs in a row.
    PeerSilent { epochs: u32 },
}

impl From<Failure> for LspError {
    fn from(f: Failure) -> Self {
        match f {
            Failure::HandshakeExhausted { attempts } => LspError::HandshakeFailed { attempts },
            Failure::PeerSilent { epochs } => LspError::ConnectionLost { epochs },
        }
    }
}

/// Client-side protocol state machine for one connection.
#[derive(Debug)]
pub struct Engine {
    params: Params,
    status: ConnectionStatus,
    /// 0 until the handshake completes.
    conn_id: u32,
    send: SendWindow,
    recv: RecvWindow,
    /// Handshake retries while connecting; epochs without new Data afterwards.
    epochs_since_progress: u32,
    /// Consecutive epochs with no message at all from the server.
    silent_epochs: u32,
    close_requested: bool,
    /// `false` once the application's write queue is closed and empty.
    writes_open: bool,
}

impl Engine {
    pub fn new(params: Params) -> Self {
        Self {
            params,
            status: ConnectionStatus::Connecting,
            conn_id: 0,
            send: SendWindow::new(params.window_size),
            recv: RecvWindow::new(params.window_size),
            epochs_since_progress: 0,
            silent_epochs: 0,
            close_requested: false,
            writes_open: true,
        }
    }

    /// Emit the initial connection request.
    pub fn start(&mut self) -> Vec<Output> {
        debug!("[lsp:engine] → {}", Message::connect());
        vec![Output::Transmit(Message::connect())]
    }

    /// Handle one message read from the socket.
    pub fn on_message(&mut self, msg: Message) -> Vec<Output> {
        let mut out = Vec::new();
        match self.status {
            ConnectionStatus::Closed | ConnectionStatus::Failed => {}
            ConnectionStatus::Connecting => {
                if msg.kind == MsgKind::Ack && msg.seq == 0 {
                    self.on_handshake_ack(msg.conn_id, &mut out);
                } else {
                    debug!("[lsp:engine] ← {msg} before handshake; dropped");
                }
            }
            ConnectionStatus::Connected | ConnectionStatus::Closing => {
                if msg.conn_id != self.conn_id {
                    warn!(
                        "[lsp:engine] ← {msg} for conn {} (ours is {}); dropped",
                        msg.conn_id, self.conn_id
                    );
                    return out;
                }
                self.silent_epochs = 0;
                match msg.kind {
                    MsgKind::Ack => self.on_ack(msg.seq, &mut out),
                    MsgKind::Data => self.on_data(msg, &mut out),
                    MsgKind::Connect => debug!("[lsp:engine] ← {msg} from server; ignored"),
                }
            }
        }
        out
    }

    fn on_handshake_ack(&mut self, conn_id: u32, out: &mut Vec<Output>) {
        self.conn_id = conn_id;
        self.epochs_since_progress = 0;
        self.silent_epochs = 0;
        self.status = if self.close_requested {
            ConnectionStatus::Closing
        } else {
            ConnectionStatus::Connected
        };
        info!("[lsp:engine] connected, conn_id={conn_id}");
        out.push(Output::Connected(conn_id));
        // Writes may have reached us while the handshake was in flight.
        self.admit(out);
        self.maybe_finish_close(out);
    }

    fn on_ack(&mut self, seq: u32, out: &mut Vec<Output>) {
        if seq == 0 {
            // Server keep-alive.
            return;
        }
        if self.send.on_ack(seq) {
            debug!(
                "[lsp:engine] ← Ack {seq}; in_flight={} lowest={:?}",
                self.send.in_flight(),
                self.send.lowest_unacked()
            );
            self.admit(out);
            self.maybe_finish_close(out);
        }
    }

    fn on_data(&mut self, msg: Message, out: &mut Vec<Output>) {
        match self.recv.on_data(self.conn_id, msg.seq) {
            Some(ack) => {
                debug!("[lsp:engine] ← {msg} accepted; → {ack}");
                self.epochs_since_progress = 0;
                out.push(Output::Deliver(msg.payload));
                out.push(Output::Transmit(ack));
            }
            None => debug!(
                "[lsp:engine] ← {msg} dropped, expecting seq {}",
                self.recv.expected_seq()
            ),
        }
    }

    /// Handle one payload taken from the application's write queue.
    pub fn on_write(&mut self, payload: Vec<u8>) -> Vec<Output> {
        let mut out = Vec::new();
        if self.status.is_terminal() {
            return out;
        }
        let seq = self.send.enqueue(payload);
        debug!("[lsp:engine] write assigned seq {seq}");
        if self.status != ConnectionStatus::Connecting {
            self.admit(&mut out);
        }
        out
    }

    fn admit(&mut self, out: &mut Vec<Output>) {
        for msg in self.send.admit(self.conn_id) {
            debug!("[lsp:engine] → {msg} in_flight={}", self.send.in_flight());
            out.push(Output::Transmit(msg));
        }
    }

    /// Handle one epoch timer tick.
    pub fn on_epoch(&mut self) -> Vec<Output> {
        let mut out = Vec::new();
        match self.status {
            ConnectionStatus::Closed | ConnectionStatus::Failed => {}
            ConnectionStatus::Connecting => {
                if self.epochs_since_progress < self.params.epoch_limit {
                    self.epochs_since_progress += 1;
                    debug!(
                        "[lsp:engine] epoch: resending Connect ({}/{})",
                        self.epochs_since_progress, self.params.epoch_limit
                    );
                    out.push(Output::Transmit(Message::connect()));
                } else {
                    let failure = Failure::HandshakeExhausted {
                        attempts: self.epochs_since_progress,
                    };
                    warn!("[lsp:engine] handshake failed: {failure:?}");
                    self.status = ConnectionStatus::Failed;
                    out.push(Output::Failed(failure));
                }
            }
            ConnectionStatus::Connected | ConnectionStatus::Closing => {
                self.silent_epochs += 1;
                if self.silent_epochs >= self.params.epoch_limit {
                    let failure = Failure::PeerSilent {
                        epochs: self.silent_epochs,
                    };
                    warn!("[lsp:engine] connection lost: {failure:?}");
                    self.status = ConnectionStatus::Failed;
                    out.push(Output::Failed(failure));
                    return out;
                }

                if !self.recv.has_received() {
                    out.push(Output::Transmit(Message::ack(self.conn_id, 0)));
                }
                out.extend(self.send.unacked().cloned().map(Output::Transmit));
                out.extend(self.recv.recent_acks().cloned().map(Output::Transmit));
                self.epochs_since_progress = self.epochs_since_progress.saturating_add(1);
                debug!(
                    "[lsp:engine] epoch: {} message(s) resent, {} epoch(s) without new data",
                    out.len(),
                    self.epochs_since_progress
                );
            }
        }
        out
    }

    /// The application asked to close. Already-queued writes still drain.
    pub fn on_close(&mut self) -> Vec<Output> {
        let mut out = Vec::new();
        if self.status.is_terminal() || self.close_requested {
            return out;
        }
        self.close_requested = true;
        if self.status == ConnectionStatus::Connected {
            self.status = ConnectionStatus::Closing;
        }
        info!(
            "[lsp:engine] close requested; parked={} in_flight={}",
            self.send.parked_len(),
            self.send.in_flight()
        );
        self.maybe_finish_close(&mut out);
        out
    }

    /// The application's write queue is closed and has been fully consumed.
    pub fn on_writes_exhausted(&mut self) -> Vec<Output> {
        let mut out = Vec::new();
        self.writes_open = false;
        self.maybe_finish_close(&mut out);
        out
    }

    fn maybe_finish_close(&mut self, out: &mut Vec<Output>) {
        if self.status == ConnectionStatus::Closing && !self.writes_open && self.send.is_drained() {
            info!("[lsp:engine] drained, connection closed");
            self.status = ConnectionStatus::Closed;
            out.push(Output::Closed);
        }
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn conn_id(&self) -> u32 {
        self.conn_id
    }

    pub fn window_size(&self) -> usize {
        self.params.window_size
    }

    pub fn in_flight(&self) -> usize {
        self.send.in_flight()
    }

    pub fn parked_len(&self) -> usize {
        self.send.parked_len()
    }

    pub fn lowest_unacked(&self) -> Option<u32> {
        self.send.lowest_unacked()
    }

    pub fn expected_seq(&self) -> u32 {
        self.recv.expected_seq()
    }

    pub fn epochs_since_progress(&self) -> u32 {
        self.epochs_since_progress
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CONN: u32 = 7;

    fn params(window_size: usize, epoch_limit: u32) -> Params {
        Params {
            window_size,
            epoch_millis: 10,
            epoch_limit,
        }
    }

    fn connected(window_size: usize) -> Engine {
        let mut e = Engine::new(params(window_size, 5));
        e.start();
        let out = e.on_message(Message::ack(CONN, 0));
        assert_eq!(out, vec![Output::Connected(CONN)]);
        e
    }

    fn transmitted(out: &[Output]) -> Vec<Message> {
        out.iter()
            .filter_map(|o| match o {
                Output::Transmit(m) => Some(m.clone()),
                _ => None,
            })
            .collect()
    }

    fn data_sent(out: &[Output]) -> Vec<u32> {
        transmitted(out)
            .into_iter()
            .filter(|m| m.kind == MsgKind::Data)
            .map(|m| m.seq)
            .collect()
    }

    fn delivered(out: &[Output]) -> Vec<Vec<u8>> {
        out.iter()
            .filter_map(|o| match o {
                Output::Deliver(p) => Some(p.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn start_sends_connect() {
        let mut e = Engine::new(Params::default());
        assert_eq!(e.start(), vec![Output::Transmit(Message::connect())]);
        assert_eq!(e.status(), ConnectionStatus::Connecting);
        assert_eq!(e.conn_id(), 0);
    }

    #[test]
    fn handshake_fails_after_exactly_epoch_limit_retransmissions() {
        for limit in 1..=4u32 {
            let mut e = Engine::new(params(1, limit));
            let mut connects = transmitted(&e.start()).len() as u32;
            let mut result = None;
            for _ in 0..limit + 5 {
                let out = e.on_epoch();
                connects += transmitted(&out)
                    .iter()
                    .filter(|m| m.kind == MsgKind::Connect)
                    .count() as u32;
                if let Some(Output::Failed(f)) = out.last() {
                    result = Some(*f);
                    break;
                }
            }
            assert_eq!(
                result,
                Some(Failure::HandshakeExhausted { attempts: limit })
            );
            assert_eq!(connects, 1 + limit, "limit {limit}");
            assert_eq!(e.status(), ConnectionStatus::Failed);
            assert!(e.on_epoch().is_empty());
        }
    }

    #[test]
    fn handshake_ack_after_retries_connects() {
        let mut e = Engine::new(params(1, 3));
        e.start();
        e.on_epoch();
        e.on_epoch();
        assert_eq!(e.on_message(Message::ack(42, 0)), vec![Output::Connected(42)]);
        assert_eq!(e.status(), ConnectionStatus::Connected);
        assert_eq!(e.conn_id(), 42);
        assert_eq!(e.epochs_since_progress(), 0);
    }

    #[test]
    fn data_before_handshake_is_ignored() {
        let mut e = Engine::new(Params::default());
        e.start();
        assert!(e.on_message(Message::data(CONN, 1, b"x".to_vec())).is_empty());
        assert_eq!(e.expected_seq(), 1);
    }

    #[test]
    fn out_of_order_data_dropped_until_retransmitted() {
        let mut e = connected(4);
        let mut payloads = Vec::new();
        for seq in [3u32, 1, 2, 3] {
            let out = e.on_message(Message::data(CONN, seq, vec![b'0' + seq as u8]));
            payloads.extend(delivered(&out));
        }
        assert_eq!(payloads, vec![b"1".to_vec(), b"2".to_vec(), b"3".to_vec()]);
        assert_eq!(e.expected_seq(), 4);
    }

    #[test]
    fn accepted_data_is_delivered_then_acked() {
        let mut e = connected(2);
        let out = e.on_message(Message::data(CONN, 1, b"hi".to_vec()));
        assert_eq!(
            out,
            vec![
                Output::Deliver(b"hi".to_vec()),
                Output::Transmit(Message::ack(CONN, 1)),
            ]
        );
    }

    #[test]
    fn duplicate_data_not_delivered_twice() {
        let mut e = connected(2);
        e.on_message(Message::data(CONN, 1, b"a".to_vec()));
        assert!(e.on_message(Message::data(CONN, 1, b"a".to_vec())).is_empty());
    }

    #[test]
    fn window_bound_holds_under_interleaved_acks() {
        let mut e = connected(3);
        let mut sent = Vec::new();
        for i in 0..10u8 {
            sent.extend(data_sent(&e.on_write(vec![i])));
            assert!(e.in_flight() <= 3);
        }
        assert_eq!(sent, vec![1, 2, 3]);

        // Ack out of order; every freed slot is refilled in sequence order.
        let mut next_ack = [2u32, 1, 3].to_vec();
        while let Some(seq) = next_ack.pop() {
            let out = e.on_message(Message::ack(CONN, seq));
            let newly = data_sent(&out);
            assert!(e.in_flight() <= 3);
            next_ack.extend(newly.iter().rev());
            sent.extend(newly);
        }
        assert_eq!(sent, (1..=10).collect::<Vec<u32>>());
        assert_eq!(e.in_flight(), 0);
    }

    #[test]
    fn duplicate_ack_does_not_move_lowest() {
        let mut e = connected(3);
        for p in [b"a", b"b", b"c"] {
            e.on_write(p.to_vec());
        }
        e.on_message(Message::ack(CONN, 1));
        assert_eq!(e.lowest_unacked(), Some(2));
        assert_eq!(e.in_flight(), 2);

        assert!(e.on_message(Message::ack(CONN, 1)).is_empty());
        assert_eq!(e.lowest_unacked(), Some(2));
        assert_eq!(e.in_flight(), 2);
    }

    #[test]
    fn unacked_data_retransmitted_once_per_epoch() {
        let mut e = connected(2);
        e.on_write(b"x".to_vec());
        e.on_write(b"y".to_vec());
        e.on_message(Message::ack(CONN, 1));

        for _ in 0..3 {
            // Keep the liveness counter from tripping.
            e.on_message(Message::ack(CONN, 0));
            assert_eq!(data_sent(&e.on_epoch()), vec![2]);
        }
        e.on_message(Message::ack(CONN, 2));
        assert!(data_sent(&e.on_epoch()).is_empty());
    }

    #[test]
    fn epoch_sends_keep_alive_until_first_data() {
        let mut e = connected(1);
        let out = e.on_epoch();
        assert_eq!(transmitted(&out), vec![Message::ack(CONN, 0)]);

        e.on_message(Message::data(CONN, 1, b"d".to_vec()));
        let out = e.on_epoch();
        assert_eq!(transmitted(&out), vec![Message::ack(CONN, 1)]);
    }

    #[test]
    fn epoch_resends_recent_acks_only_within_window() {
        let mut e = connected(2);
        for seq in 1..=3 {
            e.on_message(Message::data(CONN, seq, vec![]));
        }
        let acks: Vec<u32> = transmitted(&e.on_epoch()).iter().map(|m| m.seq).collect();
        assert_eq!(acks, vec![2, 3]);
        assert_eq!(e.epochs_since_progress(), 1);
    }

    #[test]
    fn single_slot_window_end_to_end() {
        let mut e = connected(1);
        let mut a_on_wire = data_sent(&e.on_write(b"A".to_vec())).len();
        assert!(data_sent(&e.on_write(b"B".to_vec())).is_empty());

        for _ in 0..2 {
            let resent = data_sent(&e.on_epoch());
            assert_eq!(resent, vec![1], "B must stay parked");
            a_on_wire += resent.len();
        }
        assert_eq!(a_on_wire, 3);

        let out = e.on_message(Message::ack(CONN, 1));
        assert_eq!(
            transmitted(&out),
            vec![Message::data(CONN, 2, b"B".to_vec())]
        );
    }

    #[test]
    fn close_drains_pending_writes_before_closing() {
        let mut e = connected(1);
        for p in [b"1", b"2", b"3"] {
            e.on_write(p.to_vec());
        }
        assert!(e.on_close().is_empty());
        assert!(e.on_writes_exhausted().is_empty());
        assert_eq!(e.status(), ConnectionStatus::Closing);

        assert_eq!(data_sent(&e.on_message(Message::ack(CONN, 1))), vec![2]);
        assert_eq!(data_sent(&e.on_message(Message::ack(CONN, 2))), vec![3]);
        let out = e.on_message(Message::ack(CONN, 3));
        assert_eq!(out, vec![Output::Closed]);
        assert_eq!(e.status(), ConnectionStatus::Closed);
    }

    #[test]
    fn close_waits_for_write_queue_to_empty() {
        let mut e = connected(2);
        assert!(e.on_close().is_empty());
        // A write that was already queued when close was requested.
        assert_eq!(data_sent(&e.on_write(b"late".to_vec())), vec![1]);
        assert!(e.on_writes_exhausted().is_empty());
        assert_eq!(e.on_message(Message::ack(CONN, 1)), vec![Output::Closed]);
    }

    #[test]
    fn idle_close_finishes_immediately() {
        let mut e = connected(1);
        e.on_close();
        assert_eq!(e.on_writes_exhausted(), vec![Output::Closed]);
        assert!(e.on_epoch().is_empty());
        assert!(e.on_message(Message::data(CONN, 1, vec![])).is_empty());
    }

    #[test]
    fn close_during_handshake_completes_after_connect() {
        let mut e = Engine::new(Params::default());
        e.start();
        e.on_close();
        e.on_writes_exhausted();
        assert_eq!(e.status(), ConnectionStatus::Connecting);
        let out = e.on_message(Message::ack(CONN, 0));
        assert_eq!(out, vec![Output::Connected(CONN), Output::Closed]);
    }

    #[test]
    fn writes_before_handshake_go_out_on_connect() {
        let mut e = Engine::new(params(2, 5));
        e.start();
        assert!(e.on_write(b"early".to_vec()).is_empty());
        let out = e.on_message(Message::ack(CONN, 0));
        assert_eq!(
            out,
            vec![
                Output::Connected(CONN),
                Output::Transmit(Message::data(CONN, 1, b"early".to_vec())),
            ]
        );
    }

    #[test]
    fn silent_server_declares_connection_lost() {
        let mut e = Engine::new(params(1, 3));
        e.start();
        e.on_message(Message::ack(CONN, 0));
        assert!(!e.on_epoch().is_empty());
        assert!(!e.on_epoch().is_empty());
        assert_eq!(
            e.on_epoch(),
            vec![Output::Failed(Failure::PeerSilent { epochs: 3 })]
        );
        assert_eq!(e.status(), ConnectionStatus::Failed);
    }

    #[test]
    fn any_server_message_resets_silence() {
        let mut e = Engine::new(params(1, 2));
        e.start();
        e.on_message(Message::ack(CONN, 0));
        for _ in 0..5 {
            e.on_epoch();
            e.on_message(Message::ack(CONN, 0));
        }
        assert_eq!(e.status(), ConnectionStatus::Connected);
    }

    #[test]
    fn foreign_conn_id_is_dropped() {
        let mut e = connected(1);
        assert!(e.on_message(Message::data(CONN + 1, 1, b"x".to_vec())).is_empty());
        assert_eq!(e.expected_seq(), 1);
    }

    #[test]
    fn failure_maps_to_user_error() {
        let err: LspError = Failure::HandshakeExhausted { attempts: 5 }.into();
        assert!(matches!(err, LspError::HandshakeFailed { attempts: 5 }));
    }
}
