//! Addressing protocol: collision-free short-id allocation.
//!
//! A joining node asks its highest-id neighbor for an id, stamping the
//! request with the low 24 bits of its clock. The issuer answers from a
//! provisional table keyed by that timestamp, which makes retransmitted
//! requests idempotent and lets nearby confirmed nodes track grants they
//! overhear. Two joiners sharing a millisecond would conflate in the
//! table; at the 4-bit scale the hazard is accepted.

use hashbrown::HashMap;

use crate::arbiter::{ChannelArbiter, SendPurpose};
use crate::config::NodeConfig;
use crate::time::{Duration, Timestamp};
use crate::topology::Topology;
use crate::traits::{Frame, Random};
use crate::types::{IssueId, NodeId, Packet, RequestId, BROADCAST_ID};

/// The id a node takes when nobody can issue one.
const FALLBACK_ID: NodeId = 1;

/// What an incoming ISSUE_ID meant to this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IssueOutcome {
    /// The grant was ours; the node now has its id.
    Assigned,
    /// Someone else's grant, noted in the provisional table.
    Observed,
    /// Someone else's grant clashing with what we already issued or
    /// observed.
    Collision { id: NodeId, issuer: NodeId },
    /// Not addressed to us and carrying nothing new.
    Ignored,
}

/// Per-node addressing state.
pub struct AddressProtocol {
    id: NodeId,
    id_provider: NodeId,
    confirmed: bool,
    /// Low 24 bits of the clock at creation; scopes our own request.
    timestamp: u32,
    /// timestamp → issued id, for grants we made or overheard.
    provisional: HashMap<u32, NodeId>,
}

impl AddressProtocol {
    /// Fresh state for a node created at `now`.
    pub fn new(now: Timestamp) -> Self {
        Self {
            id: BROADCAST_ID,
            id_provider: BROADCAST_ID,
            confirmed: false,
            timestamp: now.low_24_bits(),
            provisional: HashMap::new(),
        }
    }

    /// The id this node currently holds, 0 while unassigned.
    pub fn address(&self) -> NodeId {
        self.id
    }

    /// Whether the id has been confirmed (issued or self-assigned).
    pub fn is_confirmed(&self) -> bool {
        self.confirmed
    }

    /// The neighbor that issued our id.
    pub fn id_provider(&self) -> NodeId {
        self.id_provider
    }

    /// Begin acquiring an id. With no neighbors the node self-assigns
    /// immediately and false is returned; otherwise the request goes to
    /// the highest-id neighbor and the outcome arrives later.
    pub fn start_addressing<Cfg: NodeConfig>(
        &mut self,
        topology: &mut Topology,
        arbiter: &mut ChannelArbiter,
        rng: &mut impl Random,
        now: Timestamp,
    ) -> bool {
        let provider = topology.neighbor_ids().iter().max().copied().unwrap_or(0);
        if provider == BROADCAST_ID {
            self.self_assign(topology);
            return false;
        }

        self.id_provider = provider;
        arbiter.send_reliable(
            Packet::RequestId(RequestId {
                destination_id: provider,
                timestamp: self.timestamp,
            }),
            Cfg::REPLY_DELAY_MS,
            Cfg::ADDRESS_ATTEMPTS,
            Cfg::ADDRESS_TIMEOUT,
            [provider].into_iter().collect(),
            SendPurpose::AddressRequest,
            rng,
            now,
        );
        true
    }

    /// The provider never answered within the retry budget; fall back to
    /// the default id. Returns false if an id arrived in the meantime.
    pub fn handle_request_failed(&mut self, topology: &mut Topology) -> bool {
        if self.confirmed {
            return false;
        }
        self.self_assign(topology);
        true
    }

    fn self_assign(&mut self, topology: &mut Topology) {
        self.id = FALLBACK_ID;
        self.confirmed = true;
        topology.assign_node_id(self.id);
    }

    /// Answer an id request addressed to us. The reply reuses any grant
    /// already recorded for the request's timestamp. Returns the issued
    /// id so the caller can follow up with a topology push.
    pub fn handle_request(
        &mut self,
        packet: &RequestId,
        topology: &Topology,
        arbiter: &mut ChannelArbiter,
        now: Timestamp,
    ) -> Option<NodeId> {
        if !self.confirmed || packet.destination_id != self.id {
            return None;
        }

        let suggested = match self.provisional.get(&packet.timestamp) {
            Some(&id) => id,
            None => {
                let id = self.highest_known_id(topology) + 1;
                self.provisional.insert(packet.timestamp, id);
                id
            }
        };

        arbiter.send_safe(
            Frame::from_packet(&Packet::IssueId(IssueId {
                sender_id: self.id,
                suggested_id: suggested,
                timestamp: packet.timestamp,
                taken_ids: topology.taken_ids().clone(),
            })),
            Duration::ZERO,
            now,
        );
        Some(suggested)
    }

    /// Process an ISSUE_ID: our own grant, or one to eavesdrop on.
    pub fn handle_issue(&mut self, packet: &IssueId, topology: &mut Topology) -> IssueOutcome {
        if !self.confirmed {
            if packet.sender_id != self.id_provider || packet.timestamp != self.timestamp {
                return IssueOutcome::Ignored;
            }
            self.id = packet.suggested_id;
            self.confirmed = true;
            topology.assign_node_id(self.id);
            for &taken in &packet.taken_ids {
                topology.mark_taken(taken);
            }
            return IssueOutcome::Assigned;
        }

        // A grant between other nodes: record it so we never hand the
        // same id out ourselves before the flood catches up.
        let fresh_timestamp = !self.provisional.contains_key(&packet.timestamp);
        let fresh_id = !self
            .provisional
            .values()
            .any(|&id| id == packet.suggested_id);
        if fresh_timestamp && fresh_id {
            self.provisional.insert(packet.timestamp, packet.suggested_id);
            IssueOutcome::Observed
        } else {
            IssueOutcome::Collision {
                id: packet.suggested_id,
                issuer: packet.sender_id,
            }
        }
    }

    /// The highest id occupied or provisionally promised.
    fn highest_known_id(&self, topology: &Topology) -> NodeId {
        let taken = topology.taken_ids().iter().max().copied().unwrap_or(0);
        let promised = self.provisional.values().max().copied().unwrap_or(0);
        taken.max(promised)
    }
}
