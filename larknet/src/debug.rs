//! Trace events for protocol observation.
//!
//! The node reports notable protocol moments through a [`TraceSink`] the
//! harness installs. The simulator prints or collects them; a deployment
//! can forward them to its logger of choice.

use crate::types::{IdSet, NodeId, NodeState};

/// Receiver of trace events, implemented by the harness.
pub trait TraceSink: Send {
    /// Called for every emitted event.
    fn emit(&mut self, event: TraceEvent);
}

/// Notable protocol moments.
#[derive(Debug, Clone)]
pub enum TraceEvent {
    /// The node moved to a new join/operation phase.
    StateChanged { state: NodeState },
    /// A received frame failed to decode and was dropped.
    FrameDropped { len: usize },
    /// A new one-hop neighbor was observed.
    NeighborAdded { id: NodeId },
    /// Neighbors fell silent past the inactivity window.
    NeighborsLost { ids: IdSet },
    /// The node accepted an id from its provider.
    IdAssigned { id: NodeId, provider: NodeId },
    /// The node fell back to the default id (no provider answered, or
    /// there were no neighbors at all).
    IdSelfAssigned { id: NodeId },
    /// The node granted an id to a requester.
    IdIssued { id: NodeId, timestamp: u32 },
    /// An overheard issue clashed with the provisional table. No
    /// recovery at this scale; an operator warning only.
    AddressCollision { id: NodeId, issuer: NodeId },
    /// A link state was adopted into the store.
    LinkStateAdopted { source: NodeId, sequence: u8 },
    /// An outgoing session opened.
    SessionStarted { packet_count: u8, receivers: IdSet },
    /// A foreign session was accepted for receiving.
    SessionJoined { source: NodeId, packet_count: u8 },
    /// The current outgoing session finished and was closed.
    SessionClosed,
    /// The session was abandoned; the message is lost.
    SessionAborted { reason: &'static str },
    /// Receivers that never acknowledged were struck from the session.
    ReceiversLost { sequence: u8, ids: IdSet },
    /// A complete chat message was reassembled.
    MessageDelivered { source: NodeId, bytes: usize },
    /// The transport never confirmed a transmission within the cap.
    FinishSendingTimedOut,
}
