//! Time-stamped record of received packets.
//!
//! The log backs two queries: which expected receivers have not
//! acknowledged a packet within a window, and whether this node emitted
//! anything recently. It grows for the lifetime of the node session;
//! consumers always filter by a window, so no eviction is needed at the
//! 15-node scale.

use crate::time::{Duration, Timestamp};
use crate::types::{IdSet, Packet};

/// Append-only record of received packets plus the last transmit time.
#[derive(Default)]
pub struct PacketLog {
    records: Vec<(Packet, Timestamp)>,
    last_sending: Option<Timestamp>,
}

impl PacketLog {
    /// An empty log.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a received packet at its arrival time.
    pub fn add_record(&mut self, packet: Packet, now: Timestamp) {
        self.records.push((packet, now));
    }

    /// The subset of `expected` that has not acknowledged `original`
    /// within the trailing `window`.
    pub fn missing_acks(
        &self,
        original: &Packet,
        expected: &IdSet,
        window: Duration,
        now: Timestamp,
    ) -> IdSet {
        let mut missing = expected.clone();
        for (record, received_at) in self.records.iter().rev() {
            if now.saturating_since(*received_at) > window {
                break;
            }
            let sender = record.sender_id();
            if sender > 0 && original.is_acked_by(record) {
                missing.remove(&sender);
            }
        }
        missing
    }

    /// Note that this node just finished transmitting.
    pub fn record_sending(&mut self, now: Timestamp) {
        self.last_sending = Some(now);
    }

    /// Whether this node transmitted anything within the trailing
    /// `window`.
    pub fn has_traffic_within(&self, window: Duration, now: Timestamp) -> bool {
        self.last_sending
            .is_some_and(|at| now.saturating_since(at) < window)
    }

    /// Number of recorded packets.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Whether nothing has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Data, DataAck, PingPong, DATA_PAYLOAD_SIZE};

    fn data(source_id: u8, sequence: u8) -> Packet {
        Packet::Data(Data {
            destination_id: 0,
            sender_id: source_id,
            source_id,
            sequence,
            payload: [0; DATA_PAYLOAD_SIZE],
        })
    }

    fn ack(sender_id: u8, source_id: u8, sequence: u8) -> Packet {
        Packet::DataAck(DataAck {
            sender_id,
            source_id,
            sequence,
        })
    }

    #[test]
    fn acks_within_window_clear_expectations() {
        let mut log = PacketLog::new();
        let original = data(2, 0);
        log.add_record(ack(1, 2, 0), Timestamp::from_millis(100));
        log.add_record(ack(3, 2, 0), Timestamp::from_millis(900));

        let expected: IdSet = [1, 3, 4].into_iter().collect();
        let missing = log.missing_acks(
            &original,
            &expected,
            Duration::from_millis(1000),
            Timestamp::from_millis(1000),
        );
        assert_eq!(missing, [4].into_iter().collect());
    }

    #[test]
    fn stale_acks_do_not_count() {
        let mut log = PacketLog::new();
        let original = data(2, 0);
        log.add_record(ack(1, 2, 0), Timestamp::from_millis(100));

        let expected: IdSet = [1].into_iter().collect();
        let missing = log.missing_acks(
            &original,
            &expected,
            Duration::from_millis(500),
            Timestamp::from_millis(5000),
        );
        assert_eq!(missing, expected);
    }

    #[test]
    fn wrong_sequence_does_not_count() {
        let mut log = PacketLog::new();
        let original = data(2, 0);
        log.add_record(ack(1, 2, 1), Timestamp::from_millis(100));

        let expected: IdSet = [1].into_iter().collect();
        let missing = log.missing_acks(
            &original,
            &expected,
            Duration::from_millis(1000),
            Timestamp::from_millis(200),
        );
        assert_eq!(missing, expected);
    }

    #[test]
    fn ping_counts_any_recent_traffic() {
        let mut log = PacketLog::new();
        let ping = Packet::PingPong(PingPong {
            sender_id: 4,
            pong: false,
        });
        log.add_record(data(3, 7), Timestamp::from_millis(14_000));

        let expected: IdSet = [3, 5].into_iter().collect();
        let missing = log.missing_acks(
            &ping,
            &expected,
            Duration::from_millis(15_000),
            Timestamp::from_millis(15_000),
        );
        assert_eq!(missing, [5].into_iter().collect());
    }

    #[test]
    fn traffic_window() {
        let mut log = PacketLog::new();
        assert!(!log.has_traffic_within(Duration::from_millis(4000), Timestamp::from_millis(0)));
        log.record_sending(Timestamp::from_millis(1000));
        assert!(log.has_traffic_within(Duration::from_millis(4000), Timestamp::from_millis(4900)));
        assert!(!log.has_traffic_within(Duration::from_millis(4000), Timestamp::from_millis(5100)));
    }
}
