//! Receive side of the sliding-window transport.
//!
//! A session's DATA packets arrive in any order within a window of the
//! modular sequence space. The receiver stores each accepted packet at
//! the slot its sequence distance dictates and slides the window over
//! every contiguous run, so the backing array ends up in sequence order.

use core::marker::PhantomData;

use std::collections::BTreeSet;

use crate::config::NodeConfig;
use crate::types::Data;

/// Reorder buffer for one incoming session.
pub struct DataReceiver<Cfg: NodeConfig> {
    packets: Vec<Option<Data>>,
    /// The next `RECEIVE_WINDOW_SIZE` sequences we accept.
    awaited_seqs: BTreeSet<u8>,
    /// Slot where the first awaited sequence would be stored.
    first_acceptable_index: usize,
    largest_acceptable_seq: u8,
    /// Highest sequence delivered in order; `None` before the first.
    last_seq_received: Option<u8>,
    _config: PhantomData<Cfg>,
}

impl<Cfg: NodeConfig> DataReceiver<Cfg> {
    /// A receiver expecting `packet_count` DATA packets.
    pub fn new(packet_count: u8) -> Self {
        Self {
            packets: (0..packet_count).map(|_| None).collect(),
            awaited_seqs: (0..Cfg::RECEIVE_WINDOW_SIZE).collect(),
            first_acceptable_index: 0,
            largest_acceptable_seq: Cfg::RECEIVE_WINDOW_SIZE - 1,
            last_seq_received: None,
            _config: PhantomData,
        }
    }

    /// Accept a packet if its sequence falls inside the window and the
    /// session has room for it. Returns false otherwise; rejected
    /// packets are not acknowledged.
    pub fn receive_packet(&mut self, packet: Data) -> bool {
        let seq = packet.sequence % Cfg::SEQ_COUNT;
        let next = self.next_expected();
        let gap = (seq + Cfg::SEQ_COUNT - next) % Cfg::SEQ_COUNT;
        if gap >= Cfg::RECEIVE_WINDOW_SIZE {
            return false;
        }
        let index = self.first_acceptable_index + gap as usize;
        if index >= self.packets.len() {
            // The session announced fewer packets than are arriving.
            return false;
        }

        self.packets[index] = Some(packet);
        self.awaited_seqs.remove(&seq);
        if seq == next {
            self.slide();
        }
        true
    }

    /// Whether every announced packet has arrived.
    pub fn has_all_packets(&self) -> bool {
        self.packets.iter().all(Option::is_some)
    }

    /// Consume the receiver, yielding the packets in sequence order.
    /// Slots never filled are silently dropped; callers check
    /// [`has_all_packets`](Self::has_all_packets) first.
    pub fn into_packets(self) -> Vec<Data> {
        self.packets.into_iter().flatten().collect()
    }

    fn next_expected(&self) -> u8 {
        match self.last_seq_received {
            Some(last) => (last + 1) % Cfg::SEQ_COUNT,
            None => 0,
        }
    }

    /// Advance over every contiguously received sequence, re-awaiting
    /// the sequences that rotate into the window.
    fn slide(&mut self) {
        while self.last_seq_received != Some(self.largest_acceptable_seq) {
            let next = self.next_expected();
            if self.awaited_seqs.contains(&next) {
                break;
            }
            self.last_seq_received = Some(next);
            self.awaited_seqs
                .insert((next + Cfg::RECEIVE_WINDOW_SIZE) % Cfg::SEQ_COUNT);
            self.first_acceptable_index += 1;
        }
        if let Some(last) = self.last_seq_received {
            self.largest_acceptable_seq = (last + Cfg::RECEIVE_WINDOW_SIZE) % Cfg::SEQ_COUNT;
        }
    }
}
