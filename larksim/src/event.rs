//! Event types and ordering for the discrete event simulation.

use std::cmp::Ordering;

use larknet::Timestamp;

/// Sequence number giving same-time events a deterministic order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SequenceNumber(u64);

impl SequenceNumber {
    pub fn new(value: u64) -> Self {
        Self(value)
    }
}

/// Scenario actions that can be scheduled during simulation.
#[derive(Debug, Clone)]
pub enum ScenarioAction {
    /// Disable one direction-less link.
    DisableLink { a: usize, b: usize },
    /// Enable one link.
    EnableLink { a: usize, b: usize },
    /// Split the network into isolated groups.
    Partition { groups: Vec<Vec<usize>> },
    /// Restore every link.
    HealPartition,
    /// Set the loss rate of one link.
    SetLossRate { a: usize, b: usize, rate: f64 },
}

/// Events in the discrete event simulation. Nodes are addressed by
/// their spawn index; protocol ids only exist after addressing.
#[derive(Debug, Clone)]
pub enum Event {
    /// The medium greets a node; it starts joining.
    Join { node: usize },
    /// The user of `node` sends a chat message.
    ChatSend { node: usize, text: String },
    /// A node's next protocol deadline fires.
    TimerFire { node: usize },
    /// A queued transmission starts occupying the air.
    TxBegin { id: u64 },
    /// A transmission leaves the air and may deliver its frame.
    TxEnd { id: u64 },
    /// Execute a scenario action.
    Action(ScenarioAction),
}

/// An event with its fire time and tie-breaking sequence number.
#[derive(Debug, Clone)]
pub struct ScheduledEvent {
    pub time: Timestamp,
    pub seq: SequenceNumber,
    pub event: Event,
}

impl ScheduledEvent {
    pub fn new(time: Timestamp, seq: SequenceNumber, event: Event) -> Self {
        Self { time, seq, event }
    }
}

impl PartialEq for ScheduledEvent {
    fn eq(&self, other: &Self) -> bool {
        self.time == other.time && self.seq == other.seq
    }
}

impl Eq for ScheduledEvent {}

impl PartialOrd for ScheduledEvent {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEvent {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed so the std max-heap pops the earliest event first.
        match other.time.cmp(&self.time) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn earlier_event_pops_first() {
        let late = ScheduledEvent::new(
            Timestamp::from_secs(10),
            SequenceNumber::new(1),
            Event::TimerFire { node: 0 },
        );
        let early = ScheduledEvent::new(
            Timestamp::from_secs(5),
            SequenceNumber::new(2),
            Event::TimerFire { node: 0 },
        );
        assert!(early > late);
    }

    #[test]
    fn same_time_orders_by_sequence() {
        let first = ScheduledEvent::new(
            Timestamp::from_secs(10),
            SequenceNumber::new(1),
            Event::TimerFire { node: 0 },
        );
        let second = ScheduledEvent::new(
            Timestamp::from_secs(10),
            SequenceNumber::new(2),
            Event::TimerFire { node: 1 },
        );
        assert!(first > second);
    }
}
