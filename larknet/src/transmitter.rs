//! Transmit side of the sliding-window transport.
//!
//! Packets leave through the arbiter as reliable sends, at most
//! `SEND_WINDOW_SIZE` sequences in flight. The window advances on
//! contiguous fully-acknowledged sequences. Receivers that exhaust the
//! retry budget are struck from the session and their outstanding
//! sequence force-acknowledged, so one dead peer degrades coverage
//! instead of wedging the message.

use core::marker::PhantomData;

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::arbiter::{ChannelArbiter, SendPurpose};
use crate::config::NodeConfig;
use crate::time::Timestamp;
use crate::traits::Random;
use crate::types::{Data, IdSet, NodeId, Packet};

/// Where the transmitter stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransmitterStatus {
    /// Packets remain to send or acks to collect.
    Active,
    /// Every packet went out and every awaited ack arrived or timed
    /// out.
    Complete,
    /// The send window stalled past its cap; the message is lost.
    Aborted,
}

/// Sender of one session's DATA packets.
pub struct DataTransmitter<Cfg: NodeConfig> {
    pending: VecDeque<Data>,
    /// Per in-flight sequence, the receivers still owing an ack.
    awaited_acks: HashMap<u8, IdSet>,
    /// Receivers still participating in the session.
    left_receivers: IdSet,
    last_ack_received: u8,
    last_sequence_sent: u8,
    sent_all: bool,
    status: TransmitterStatus,
    /// Abort deadline, armed while the window is full.
    stall_at: Option<Timestamp>,
    /// Completion deadline for the trailing acks.
    drain_at: Option<Timestamp>,
    _config: PhantomData<Cfg>,
}

impl<Cfg: NodeConfig> DataTransmitter<Cfg> {
    /// A transmitter for `packets` aimed at `receivers`.
    pub fn new(packets: Vec<Data>, receivers: IdSet) -> Self {
        Self {
            pending: packets.into(),
            awaited_acks: HashMap::new(),
            left_receivers: receivers,
            last_ack_received: Cfg::SEQ_COUNT - 1,
            last_sequence_sent: Cfg::SEQ_COUNT - 1,
            sent_all: false,
            status: TransmitterStatus::Active,
            stall_at: None,
            drain_at: None,
            _config: PhantomData,
        }
    }

    /// Current status.
    pub fn status(&self) -> TransmitterStatus {
        self.status
    }

    /// Receivers that are still part of the session.
    pub fn left_receivers(&self) -> &IdSet {
        &self.left_receivers
    }

    /// Sequences currently in flight.
    fn in_flight(&self) -> u8 {
        (self.last_sequence_sent + Cfg::SEQ_COUNT - self.last_ack_received) % Cfg::SEQ_COUNT
    }

    /// Push packets into the window and manage the stall/drain
    /// deadlines. Call after every ack and timer tick.
    pub fn poll(
        &mut self,
        arbiter: &mut ChannelArbiter,
        rng: &mut impl Random,
        now: Timestamp,
    ) -> TransmitterStatus {
        if self.status != TransmitterStatus::Active {
            return self.status;
        }

        while !self.sent_all && self.in_flight() < Cfg::SEND_WINDOW_SIZE {
            let Some(packet) = self.pending.pop_front() else {
                self.sent_all = true;
                if self.awaited_acks.is_empty() {
                    self.status = TransmitterStatus::Complete;
                } else {
                    self.drain_at = Some(now + Cfg::FINAL_ACK_TIMEOUT);
                }
                break;
            };

            let sequence = packet.sequence;
            self.awaited_acks.insert(sequence, self.left_receivers.clone());
            self.last_sequence_sent = sequence;
            arbiter.send_reliable(
                Packet::Data(packet),
                Cfg::DATA_DELAY_MS,
                Cfg::DATA_ATTEMPTS,
                Cfg::DATA_TIMEOUT_PER_RECEIVER * self.left_receivers.len() as u64,
                self.left_receivers.clone(),
                SendPurpose::Data { sequence },
                rng,
                now,
            );
        }

        if !self.sent_all && self.in_flight() >= Cfg::SEND_WINDOW_SIZE {
            let stall_at = *self
                .stall_at
                .get_or_insert(now + Cfg::WINDOW_STALL_TIMEOUT);
            if now >= stall_at {
                self.status = TransmitterStatus::Aborted;
            }
        }

        if let Some(drain_at) = self.drain_at {
            if now >= drain_at && self.status == TransmitterStatus::Active {
                // Trailing acks never came; close the session anyway.
                self.status = TransmitterStatus::Complete;
            }
        }

        self.status
    }

    /// Record one receiver's ack for a sequence.
    pub fn on_data_ack(&mut self, sender: NodeId, sequence: u8) {
        let emptied = match self.awaited_acks.get_mut(&sequence) {
            Some(owing) => {
                owing.remove(&sender);
                owing.is_empty()
            }
            None => false,
        };
        if emptied {
            self.handle_ack(sequence);
        }
    }

    /// The reliable send for `sequence` gave up on `missing`: strike
    /// them from the session and force the sequence acknowledged.
    pub fn on_receivers_lost(&mut self, sequence: u8, missing: &IdSet) {
        if missing.is_empty() {
            return;
        }
        self.handle_ack(sequence);
        for id in missing {
            self.left_receivers.remove(id);
        }
    }

    /// A sequence is fully acknowledged; advance the window over every
    /// contiguous acknowledged sequence.
    fn handle_ack(&mut self, sequence: u8) {
        self.awaited_acks.remove(&sequence);
        if self.sent_all && self.awaited_acks.is_empty() {
            self.status = TransmitterStatus::Complete;
        } else if sequence == (self.last_ack_received + 1) % Cfg::SEQ_COUNT {
            while self.last_ack_received != self.last_sequence_sent {
                let next = (self.last_ack_received + 1) % Cfg::SEQ_COUNT;
                if self.awaited_acks.contains_key(&next) {
                    break;
                }
                self.last_ack_received = next;
            }
            // Window moved; a stalled deadline no longer applies.
            self.stall_at = None;
        }
    }

    /// The earliest moment [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        [self.stall_at, self.drain_at].into_iter().flatten().min()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultConfig;
    use crate::fragment::split_text;
    use crate::log::PacketLog;
    use crate::time::Duration;
    use crate::traits::test_impls::MockRandom;
    use crate::types::DATA_PAYLOAD_SIZE;

    type Cfg = DefaultConfig;

    struct Fixture {
        transmitter: DataTransmitter<Cfg>,
        arbiter: ChannelArbiter,
        log: PacketLog,
        rng: MockRandom,
    }

    fn fixture(packet_count: usize, receivers: &[NodeId]) -> Fixture {
        let text = "y".repeat(DATA_PAYLOAD_SIZE * packet_count);
        let packets = split_text::<Cfg>(&text, 0, 2, 2);
        assert_eq!(packets.len(), packet_count);
        Fixture {
            transmitter: DataTransmitter::new(packets, receivers.iter().copied().collect()),
            arbiter: ChannelArbiter::new(Duration::from_millis(10_000)),
            log: PacketLog::new(),
            rng: MockRandom::with_seed(21),
        }
    }

    /// Emit armed frames and collect the DATA sequences among them,
    /// sorted (the random send delays scramble the air order).
    fn flush_data(f: &mut Fixture, now: Timestamp) -> Vec<u8> {
        f.arbiter.poll(&f.log, &mut f.rng, now);
        let mut sequences = Vec::new();
        while let Some(frame) = f.arbiter.pop_frame() {
            if let Ok(Packet::Data(data)) = Packet::decode_from_slice(frame.payload().unwrap()) {
                sequences.push(data.sequence);
            }
        }
        sequences.sort_unstable();
        sequences
    }

    #[test]
    fn sends_all_packets_within_window() {
        let mut f = fixture(3, &[1]);
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::ZERO);
        assert_eq!(
            flush_data(&mut f, Timestamp::from_millis(1100)),
            vec![0, 1, 2]
        );
        assert_eq!(f.transmitter.status(), TransmitterStatus::Active);
    }

    #[test]
    fn window_gates_the_fifth_packet() {
        let mut f = fixture(6, &[1]);
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::ZERO);
        assert_eq!(
            flush_data(&mut f, Timestamp::from_millis(1100)),
            vec![0, 1, 2, 3]
        );

        // Acknowledging seq 0 opens one slot.
        f.transmitter.on_data_ack(1, 0);
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::from_millis(1200));
        assert_eq!(flush_data(&mut f, Timestamp::from_millis(2300)), vec![4]);
    }

    #[test]
    fn out_of_order_acks_advance_contiguously() {
        let mut f = fixture(6, &[1]);
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::ZERO);
        flush_data(&mut f, Timestamp::from_millis(1100));

        // Ack seq 1 first: window cannot move yet.
        f.transmitter.on_data_ack(1, 1);
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::from_millis(1200));
        assert!(flush_data(&mut f, Timestamp::from_millis(2300)).is_empty());

        // Ack seq 0: the window jumps over both.
        f.transmitter.on_data_ack(1, 0);
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::from_millis(2400));
        assert_eq!(
            flush_data(&mut f, Timestamp::from_millis(3500)),
            vec![4, 5]
        );
    }

    #[test]
    fn acks_from_all_receivers_required() {
        let mut f = fixture(5, &[1, 3]);
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::ZERO);
        flush_data(&mut f, Timestamp::from_millis(1100));

        f.transmitter.on_data_ack(1, 0);
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::from_millis(1200));
        assert!(
            flush_data(&mut f, Timestamp::from_millis(2300)).is_empty(),
            "receiver 3 still owes seq 0"
        );

        f.transmitter.on_data_ack(3, 0);
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::from_millis(2400));
        assert_eq!(flush_data(&mut f, Timestamp::from_millis(3500)), vec![4]);
    }

    #[test]
    fn completes_after_final_acks() {
        let mut f = fixture(2, &[1]);
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::ZERO);
        flush_data(&mut f, Timestamp::from_millis(1100));

        f.transmitter.on_data_ack(1, 0);
        f.transmitter.on_data_ack(1, 1);
        let status =
            f.transmitter
                .poll(&mut f.arbiter, &mut f.rng, Timestamp::from_millis(1200));
        assert_eq!(status, TransmitterStatus::Complete);
    }

    #[test]
    fn lost_receiver_is_struck_and_sequence_forced() {
        let mut f = fixture(5, &[1, 3]);
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::ZERO);
        flush_data(&mut f, Timestamp::from_millis(1100));

        f.transmitter.on_data_ack(1, 0);
        f.transmitter
            .on_receivers_lost(0, &[3].into_iter().collect());
        assert!(!f.transmitter.left_receivers().contains(&3));

        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::from_millis(1200));
        assert_eq!(flush_data(&mut f, Timestamp::from_millis(2300)), vec![4]);
    }

    #[test]
    fn stalled_window_aborts_after_cap() {
        let mut f = fixture(6, &[1]);
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::ZERO);
        flush_data(&mut f, Timestamp::from_millis(1100));

        // No acks ever arrive; the stall deadline runs from the first
        // blocked poll.
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::from_millis(1200));
        let status = f.transmitter.poll(
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::from_millis(1200) + Cfg::WINDOW_STALL_TIMEOUT,
        );
        assert_eq!(status, TransmitterStatus::Aborted);
    }

    #[test]
    fn drain_timeout_completes_without_trailing_acks() {
        let mut f = fixture(2, &[1]);
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::ZERO);
        flush_data(&mut f, Timestamp::from_millis(1100));

        // Both packets out, nothing acknowledged, drain starts on the
        // poll that exhausts the queue.
        f.transmitter
            .poll(&mut f.arbiter, &mut f.rng, Timestamp::from_millis(1200));
        let status = f.transmitter.poll(
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::from_millis(1200) + Cfg::FINAL_ACK_TIMEOUT,
        );
        assert_eq!(status, TransmitterStatus::Complete);
    }
}
