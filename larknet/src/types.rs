//! Core types for the larknet protocol.

use std::collections::BTreeSet;

use crate::time::Timestamp;

/// Network identifier of a node: a 4-bit value in `1..=15`.
///
/// 0 is reserved for "unknown / broadcast destination" and is never a
/// valid sender.
pub type NodeId = u8;

/// The reserved broadcast / unassigned id.
pub const BROADCAST_ID: NodeId = 0;

/// Highest assignable node id (the id space is 4 bits wide).
pub const MAX_NODE_ID: NodeId = 15;

/// Ordered set of node ids. Ordered iteration keeps wire encodings and
/// planner tie-breaks deterministic.
pub type IdSet = BTreeSet<NodeId>;

/// Size of every long packet on the wire.
pub const LONG_PACKET_SIZE: usize = 32;

/// Size of every short packet on the wire.
pub const SHORT_PACKET_SIZE: usize = 2;

/// Header bytes of a DATA packet (tag/flags, sender/source, dest/seq).
pub const DATA_HEADER_SIZE: usize = 3;

/// Payload bytes carried by one DATA packet.
pub const DATA_PAYLOAD_SIZE: usize = LONG_PACKET_SIZE - DATA_HEADER_SIZE;

/// Join/operation phases of a node.
///
/// A node walks these strictly forward; `ReadyToSend` is the steady state
/// in which chat traffic and flood forwarding are allowed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeState {
    /// Pinging repeatedly to discover one-hop neighbors; no replies yet.
    FindingNeighbors,
    /// Requesting a short id from the highest-id neighbor found.
    AssigningId,
    /// Awaiting the network topology from the id provider.
    PullingTopology,
    /// Fully joined: chatting, forwarding, and keeping neighbors alive.
    ReadyToSend,
    /// The transport ended the session; the node is inert.
    Stopped,
}

/// A node's own view of its one-hop neighbors, stamped with a sequence
/// number that increases on every self-originated update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkState {
    /// Owner of this link state.
    pub node_id: NodeId,
    /// Version counter, wrapping mod 256. Stale versions are discarded.
    pub sequence: u8,
    /// One-hop neighbors the owner reported.
    pub neighbor_ids: IdSet,
}

impl LinkState {
    /// A fresh link state at sequence 0.
    pub fn new(node_id: NodeId, neighbor_ids: IdSet) -> Self {
        Self {
            node_id,
            sequence: 0,
            neighbor_ids,
        }
    }
}

/// Flooded advertisement of one node's link state (tag 1, 32 B).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkStateUpdate {
    /// The hop that transmitted this copy (rewritten on forward).
    pub sender_id: NodeId,
    /// The advertised link state of the originating node.
    pub link_state: LinkState,
    /// Remaining hop budget; 1 means "do not forward".
    pub ttl: u8,
}

/// Directed request for a single node's link state (tag 2, 2 B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LinkStateRequest {
    /// The node expected to answer.
    pub destination_id: NodeId,
    /// The node whose link state is wanted.
    pub source_id: NodeId,
}

/// Session-open announcement carrying the packet count (tag 3, 2 B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionUpdate {
    /// The hop that transmitted this copy (rewritten on relay).
    pub sender_id: NodeId,
    /// The node whose message the session carries.
    pub source_id: NodeId,
    /// Number of DATA packets in the session (4 bits on the wire).
    pub packet_count: u8,
}

/// Request for a network id, stamped with the joiner's timestamp
/// (tag 4, 32 B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RequestId {
    /// The neighbor asked to issue the id.
    pub destination_id: NodeId,
    /// Low 24 bits of the joiner's clock, scoping provisional issues.
    pub timestamp: u32,
}

/// Neighbor discovery ping, or its pong reply (tag 5, 2 B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PingPong {
    /// Transmitting node, 0 while still unaddressed.
    pub sender_id: NodeId,
    /// True for replies and keepalives that must not be answered.
    pub pong: bool,
}

/// Acknowledgement of one DATA packet (tag 6, 2 B).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataAck {
    /// The acknowledging node.
    pub sender_id: NodeId,
    /// Source of the acknowledged session.
    pub source_id: NodeId,
    /// Sequence number being acknowledged (4 bits).
    pub sequence: u8,
}

/// One fragment of a chat message (tag 7, 32 B).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Data {
    /// Intended receiver, 0 for every node in range.
    pub destination_id: NodeId,
    /// The hop that transmitted this copy (rewritten on relay).
    pub sender_id: NodeId,
    /// The node whose message this fragment belongs to.
    pub source_id: NodeId,
    /// Position in the modular sequence space (4 bits).
    pub sequence: u8,
    /// Fragment bytes, zero padded on the right.
    pub payload: [u8; DATA_PAYLOAD_SIZE],
}

/// Grant of a network id in answer to [`RequestId`] (tag 8, 32 B).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssueId {
    /// The issuing node.
    pub sender_id: NodeId,
    /// The id granted to the requester.
    pub suggested_id: NodeId,
    /// Echo of the request timestamp.
    pub timestamp: u32,
    /// Every id the issuer knows to be occupied.
    pub taken_ids: IdSet,
}

/// A decoded packet of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Packet {
    LinkStateUpdate(LinkStateUpdate),
    LinkStateRequest(LinkStateRequest),
    SessionUpdate(SessionUpdate),
    RequestId(RequestId),
    PingPong(PingPong),
    DataAck(DataAck),
    Data(Data),
    IssueId(IssueId),
}

impl Packet {
    /// The id of the hop that transmitted this packet, or 0 for packets
    /// sent before the transmitter had an id.
    pub fn sender_id(&self) -> NodeId {
        match self {
            Packet::LinkStateUpdate(p) => p.sender_id,
            Packet::LinkStateRequest(_) => BROADCAST_ID,
            Packet::SessionUpdate(p) => p.sender_id,
            Packet::RequestId(_) => BROADCAST_ID,
            Packet::PingPong(p) => p.sender_id,
            Packet::DataAck(p) => p.sender_id,
            Packet::Data(p) => p.sender_id,
            Packet::IssueId(p) => p.sender_id,
        }
    }

    /// Whether `record` counts as an acknowledgement of `self`.
    ///
    /// The relation is asymmetric and defined by the original packet: a
    /// flooded link state is confirmed by hearing the same (source,
    /// sequence) again, a request by the matching reply, a DATA by its
    /// DATA_ACK. Pings treat any traffic as proof of life.
    pub fn is_acked_by(&self, record: &Packet) -> bool {
        match (self, record) {
            (Packet::LinkStateUpdate(orig), Packet::LinkStateUpdate(ack)) => {
                ack.link_state.node_id == orig.link_state.node_id
                    && ack.link_state.sequence == orig.link_state.sequence
            }
            (Packet::LinkStateRequest(orig), Packet::LinkStateUpdate(ack)) => {
                ack.link_state.node_id == orig.source_id && ack.sender_id == orig.destination_id
            }
            (Packet::SessionUpdate(orig), Packet::SessionUpdate(ack)) => {
                ack.source_id == orig.source_id
            }
            (Packet::Data(orig), Packet::DataAck(ack)) => {
                ack.source_id == orig.source_id && ack.sequence == orig.sequence
            }
            (Packet::RequestId(orig), Packet::IssueId(ack)) => {
                ack.sender_id == orig.destination_id
            }
            (Packet::PingPong(_), _) => true,
            _ => false,
        }
    }
}

/// A chat message delivered to (or echoed for) the local user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    /// Message body.
    pub text: String,
    /// Network id of the author.
    pub sender_id: NodeId,
    /// When the message was delivered locally.
    pub timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ls(node_id: NodeId, sequence: u8, neighbors: &[NodeId]) -> LinkState {
        LinkState {
            node_id,
            sequence,
            neighbor_ids: neighbors.iter().copied().collect(),
        }
    }

    #[test]
    fn link_state_update_acked_by_same_source_and_sequence() {
        let orig = Packet::LinkStateUpdate(LinkStateUpdate {
            sender_id: 1,
            link_state: ls(1, 7, &[2, 3]),
            ttl: 3,
        });
        let echo = Packet::LinkStateUpdate(LinkStateUpdate {
            sender_id: 2,
            link_state: ls(1, 7, &[2, 3]),
            ttl: 2,
        });
        let stale = Packet::LinkStateUpdate(LinkStateUpdate {
            sender_id: 2,
            link_state: ls(1, 6, &[2, 3]),
            ttl: 2,
        });
        assert!(orig.is_acked_by(&echo));
        assert!(!orig.is_acked_by(&stale));
    }

    #[test]
    fn request_acked_by_issue_from_destination() {
        let req = Packet::RequestId(RequestId {
            destination_id: 3,
            timestamp: 42,
        });
        let issue = Packet::IssueId(IssueId {
            sender_id: 3,
            suggested_id: 4,
            timestamp: 42,
            taken_ids: IdSet::new(),
        });
        let foreign = Packet::IssueId(IssueId {
            sender_id: 2,
            suggested_id: 4,
            timestamp: 42,
            taken_ids: IdSet::new(),
        });
        assert!(req.is_acked_by(&issue));
        assert!(!req.is_acked_by(&foreign));
    }

    #[test]
    fn data_acked_by_matching_source_and_sequence() {
        let data = Packet::Data(Data {
            destination_id: 0,
            sender_id: 2,
            source_id: 2,
            sequence: 5,
            payload: [0; DATA_PAYLOAD_SIZE],
        });
        let ack = Packet::DataAck(DataAck {
            sender_id: 1,
            source_id: 2,
            sequence: 5,
        });
        let wrong_seq = Packet::DataAck(DataAck {
            sender_id: 1,
            source_id: 2,
            sequence: 6,
        });
        assert!(data.is_acked_by(&ack));
        assert!(!data.is_acked_by(&wrong_seq));
    }

    #[test]
    fn ping_acked_by_anything() {
        let ping = Packet::PingPong(PingPong {
            sender_id: 1,
            pong: false,
        });
        let other = Packet::LinkStateRequest(LinkStateRequest {
            destination_id: 1,
            source_id: 2,
        });
        assert!(ping.is_acked_by(&other));
    }
}
