//! Link-state routing: flooding with TTL and sequence suppression,
//! direct gap-fill requests, and neighbor liveness.
//!
//! Every node floods its own link state with a hop budget of three.
//! Incoming updates are adopted only when they are new or strictly
//! fresher with a changed neighbor set, which also suppresses duplicate
//! forwards. Adopted states are symmetrized: the union of reports keeps
//! every stored neighbor relation bidirectional. Liveness runs on two
//! timers, a keepalive pong when we have been silent and a sweep that
//! drops neighbors that produced no traffic for a whole window.

use crate::arbiter::{ChannelArbiter, SendPurpose};
use crate::config::NodeConfig;
use crate::log::PacketLog;
use crate::time::{Duration, Timestamp};
use crate::topology::Topology;
use crate::traits::{Frame, Random};
use crate::types::{
    IdSet, LinkState, LinkStateRequest, LinkStateUpdate, NodeId, NodeState, Packet, PingPong,
    BROADCAST_ID,
};

/// Carrier-sense delay for each pushed link state.
const PUSH_DELAY: Duration = Duration::from_millis(250);

/// Delay bounds (ms) for gap-fill requests.
const GAP_FILL_DELAY_MS: (u64, u64) = (200, 400);

/// What the periodic work of [`LinkStateProtocol::poll`] did, for
/// tracing.
#[derive(Debug, Default)]
pub struct RoutingTick {
    /// Neighbors dropped by the inactivity sweep.
    pub lost_neighbors: IdSet,
    /// Link states requested by the gap-fill task.
    pub requested: IdSet,
}

/// Link-state protocol state: the flood itself lives in the topology
/// store; this holds the phase and the timer state.
pub struct LinkStateProtocol {
    state: NodeState,
    /// One-shot gap-fill task: fire time and the provider to ask.
    gap_fill: Option<(Timestamp, NodeId)>,
    next_keepalive: Option<Timestamp>,
    /// Inactivity sweep: evaluation time and the neighbor snapshot taken
    /// at the start of the window.
    sweep: Option<(Timestamp, IdSet)>,
}

impl LinkStateProtocol {
    /// Protocol state for a node that has not joined yet.
    pub fn new() -> Self {
        Self {
            state: NodeState::FindingNeighbors,
            gap_fill: None,
            next_keepalive: None,
            sweep: None,
        }
    }

    /// Follow the node's phase; entering ready-to-send starts the
    /// liveness timers.
    pub fn set_node_state<Cfg: NodeConfig>(
        &mut self,
        state: NodeState,
        topology: &Topology,
        now: Timestamp,
    ) {
        self.state = state;
        if state == NodeState::ReadyToSend && self.next_keepalive.is_none() {
            self.next_keepalive = Some(now + Cfg::KEEPALIVE_PERIOD);
            self.sweep = Some((
                now + Cfg::INACTIVITY_PERIOD,
                topology.neighbor_ids().clone(),
            ));
        }
    }

    /// Flood our own link state with a bumped sequence number.
    pub fn send_update<Cfg: NodeConfig>(
        &mut self,
        topology: &mut Topology,
        arbiter: &mut ChannelArbiter,
        rng: &mut impl Random,
        now: Timestamp,
    ) {
        let node_id = topology.node_id();
        let Some(own) = topology.own_link_state_mut() else {
            return;
        };
        own.sequence = own.sequence.wrapping_add(1);
        let link_state = own.clone();

        let ttl = if topology.neighbor_ids().is_empty() {
            1
        } else {
            Cfg::LINK_STATE_TTL
        };
        arbiter.schedule(
            Frame::from_packet(&Packet::LinkStateUpdate(LinkStateUpdate {
                sender_id: node_id,
                link_state,
                ttl,
            })),
            Cfg::UPDATE_DELAY_MS,
            rng,
            now,
        );
    }

    /// A packet from `sender` proves it is within range. New neighbors
    /// are recorded; a re-appearing known id means the topology changed
    /// and triggers a fresh flood. Returns true when the neighbor is
    /// new.
    pub fn handle_neighbor_activity<Cfg: NodeConfig>(
        &mut self,
        sender: NodeId,
        topology: &mut Topology,
        arbiter: &mut ChannelArbiter,
        rng: &mut impl Random,
        now: Timestamp,
    ) -> bool {
        if sender == BROADCAST_ID || topology.neighbor_ids().contains(&sender) {
            return false;
        }
        let known = topology.taken_ids().contains(&sender);
        topology.add_neighbor(sender);
        if known && self.state == NodeState::ReadyToSend {
            self.send_update::<Cfg>(topology, arbiter, rng, now);
        } else {
            topology.mark_taken(sender);
        }
        true
    }

    /// Push every stored link state to a newcomer as non-forwarding
    /// updates.
    pub fn push_topology(
        &self,
        topology: &Topology,
        arbiter: &mut ChannelArbiter,
        now: Timestamp,
    ) {
        let node_id = topology.node_id();
        for link_state in topology.link_states().values() {
            arbiter.send_safe(
                Frame::from_packet(&Packet::LinkStateUpdate(LinkStateUpdate {
                    sender_id: node_id,
                    link_state: link_state.clone(),
                    ttl: 1,
                })),
                PUSH_DELAY,
                now,
            );
        }
    }

    /// Await the pushed topology; after a grace period of 3 s per known
    /// id, whatever is still missing is requested directly.
    pub fn pull_topology<Cfg: NodeConfig>(
        &mut self,
        provider: NodeId,
        topology: &Topology,
        now: Timestamp,
    ) {
        let wait = Cfg::GAP_FILL_DELAY_PER_ID * topology.taken_ids().len() as u64;
        self.gap_fill = Some((now + wait, provider));
    }

    /// Serve a directed link-state request from our store.
    pub fn handle_request<Cfg: NodeConfig>(
        &self,
        request: &LinkStateRequest,
        topology: &Topology,
        arbiter: &mut ChannelArbiter,
        rng: &mut impl Random,
        now: Timestamp,
    ) {
        if request.destination_id != topology.node_id() {
            return;
        }
        if let Some(link_state) = topology.link_states().get(&request.source_id) {
            arbiter.schedule(
                Frame::from_packet(&Packet::LinkStateUpdate(LinkStateUpdate {
                    sender_id: topology.node_id(),
                    link_state: link_state.clone(),
                    ttl: 1,
                })),
                Cfg::REPLY_DELAY_MS,
                rng,
                now,
            );
        }
    }

    /// Process a flooded update: adopt it if it is news, and when it
    /// was, forward it to the neighbors the source cannot reach itself.
    /// Returns true on adoption.
    pub fn handle_update<Cfg: NodeConfig>(
        &mut self,
        update: &LinkStateUpdate,
        topology: &mut Topology,
        arbiter: &mut ChannelArbiter,
        rng: &mut impl Random,
        now: Timestamp,
    ) -> bool {
        let source = update.link_state.node_id;
        if source == BROADCAST_ID || source == topology.node_id() {
            return false;
        }

        let Some(adopted) = self.adopt(&update.link_state, topology) else {
            return false;
        };

        if self.state == NodeState::ReadyToSend && update.ttl > 1 {
            let mut receivers: IdSet = topology
                .neighbor_ids()
                .difference(&adopted.neighbor_ids)
                .copied()
                .collect();
            receivers.remove(&source);
            receivers.remove(&update.sender_id);

            let ttl = if receivers.is_empty() { 1 } else { update.ttl - 1 };
            arbiter.schedule(
                Frame::from_packet(&Packet::LinkStateUpdate(LinkStateUpdate {
                    sender_id: topology.node_id(),
                    link_state: adopted,
                    ttl,
                })),
                Cfg::UPDATE_DELAY_MS,
                rng,
                now,
            );
        }
        true
    }

    /// Store an incoming link state if it is new or strictly fresher
    /// with a changed neighbor set, then re-symmetrize the stored graph.
    /// Returns the stored form (with ourselves added when the source is
    /// our neighbor).
    fn adopt(&self, incoming: &LinkState, topology: &mut Topology) -> Option<LinkState> {
        let source = incoming.node_id;
        if let Some(old) = topology.link_states().get(&source) {
            let fresher = old.sequence < incoming.sequence;
            let changed = old.neighbor_ids != incoming.neighbor_ids;
            if !(fresher && changed) {
                return None;
            }
        }

        let node_id = topology.node_id();
        let mut neighbor_ids = incoming.neighbor_ids.clone();
        if node_id != BROADCAST_ID && topology.neighbor_ids().contains(&source) {
            neighbor_ids.insert(node_id);
        }

        // Every id the source reports is an occupied id.
        topology.mark_taken(source);
        for &id in &neighbor_ids {
            topology.mark_taken(id);
        }

        self.symmetrize(source, &neighbor_ids, topology);
        let stored = LinkState {
            node_id: source,
            sequence: incoming.sequence,
            neighbor_ids,
        };
        topology.link_states_mut().insert(source, stored.clone());
        Some(stored)
    }

    /// Make every stored link state agree with `neighbors` about who is
    /// adjacent to `node`. Touching our own link state also updates the
    /// live neighbor set.
    fn symmetrize(&self, node: NodeId, neighbors: &IdSet, topology: &mut Topology) {
        let own_id = topology.node_id();
        for link_state in topology.link_states_mut().values_mut() {
            if link_state.node_id == own_id {
                continue;
            }
            if neighbors.contains(&link_state.node_id) {
                link_state.neighbor_ids.insert(node);
            } else {
                link_state.neighbor_ids.remove(&node);
            }
        }
        if own_id != BROADCAST_ID && topology.own_link_state().is_some() {
            if neighbors.contains(&own_id) {
                topology.add_neighbor(node);
            } else {
                let gone: IdSet = [node].into_iter().collect();
                topology.remove_neighbors(&gone);
            }
        }
    }

    /// Drive the gap-fill task and the two liveness timers.
    pub fn poll<Cfg: NodeConfig>(
        &mut self,
        topology: &mut Topology,
        log: &PacketLog,
        arbiter: &mut ChannelArbiter,
        rng: &mut impl Random,
        now: Timestamp,
    ) -> RoutingTick {
        let mut tick = RoutingTick::default();

        if let Some((fire_at, provider)) = self.gap_fill {
            if now >= fire_at {
                self.gap_fill = None;
                let timeout =
                    Cfg::GAP_FILL_TIMEOUT_PER_NEIGHBOR * topology.neighbor_ids().len() as u64;
                let missing: IdSet = topology
                    .taken_ids()
                    .iter()
                    .filter(|id| !topology.link_states().contains_key(*id))
                    .copied()
                    .collect();
                for &source in &missing {
                    arbiter.send_reliable(
                        Packet::LinkStateRequest(LinkStateRequest {
                            destination_id: provider,
                            source_id: source,
                        }),
                        GAP_FILL_DELAY_MS,
                        Cfg::GAP_FILL_ATTEMPTS,
                        timeout,
                        [provider].into_iter().collect(),
                        SendPurpose::TopologyPull { source },
                        rng,
                        now,
                    );
                }
                tick.requested = missing;
            }
        }

        if let Some(next) = self.next_keepalive {
            if now >= next && self.state == NodeState::ReadyToSend {
                if !log.has_traffic_within(Cfg::KEEPALIVE_PERIOD, now) {
                    arbiter.schedule(
                        Frame::from_packet(&Packet::PingPong(PingPong {
                            sender_id: topology.node_id(),
                            pong: true,
                        })),
                        Cfg::REPLY_DELAY_MS,
                        rng,
                        now,
                    );
                }
                self.next_keepalive = Some(now + Cfg::KEEPALIVE_PERIOD);
            }
        }

        if let Some((eval_at, snapshot)) = &self.sweep {
            if now >= *eval_at {
                let probe = Packet::PingPong(PingPong {
                    sender_id: topology.node_id(),
                    pong: false,
                });
                let lost = log.missing_acks(&probe, snapshot, Cfg::INACTIVITY_PERIOD, now);
                if !lost.is_empty() {
                    topology.remove_neighbors(&lost);
                    let own_neighbors = topology.neighbor_ids().clone();
                    self.symmetrize(topology.node_id(), &own_neighbors, topology);
                    self.send_update::<Cfg>(topology, arbiter, rng, now);
                    tick.lost_neighbors = lost;
                }
                self.sweep = Some((
                    now + Cfg::INACTIVITY_PERIOD,
                    topology.neighbor_ids().clone(),
                ));
            }
        }

        tick
    }

    /// The earliest moment [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        let gap_fill = self.gap_fill.map(|(at, _)| at);
        let sweep = self.sweep.as_ref().map(|(at, _)| *at);
        [gap_fill, self.next_keepalive, sweep]
            .into_iter()
            .flatten()
            .min()
    }
}

impl Default for LinkStateProtocol {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DefaultConfig;
    use crate::traits::test_impls::MockRandom;

    type Cfg = DefaultConfig;

    struct Fixture {
        routing: LinkStateProtocol,
        topology: Topology,
        arbiter: ChannelArbiter,
        log: PacketLog,
        rng: MockRandom,
    }

    fn ready_node(id: NodeId, neighbors: &[NodeId]) -> Fixture {
        let mut topology = Topology::new();
        for &n in neighbors {
            topology.add_neighbor(n);
        }
        topology.assign_node_id(id);
        let mut routing = LinkStateProtocol::new();
        routing.set_node_state::<Cfg>(NodeState::ReadyToSend, &topology, Timestamp::ZERO);
        Fixture {
            routing,
            topology,
            arbiter: ChannelArbiter::new(Duration::from_millis(10_000)),
            log: PacketLog::new(),
            rng: MockRandom::with_seed(11),
        }
    }

    /// Emit everything the arbiter has armed and decode the payloads.
    fn flush(fixture: &mut Fixture, now: Timestamp) -> Vec<Packet> {
        fixture
            .arbiter
            .poll(&fixture.log, &mut fixture.rng, now);
        let mut packets = Vec::new();
        while let Some(frame) = fixture.arbiter.pop_frame() {
            packets.push(Packet::decode_from_slice(frame.payload().unwrap()).unwrap());
        }
        packets
    }

    fn update(sender: NodeId, source: NodeId, sequence: u8, neighbors: &[NodeId], ttl: u8) -> LinkStateUpdate {
        LinkStateUpdate {
            sender_id: sender,
            link_state: LinkState {
                node_id: source,
                sequence,
                neighbor_ids: neighbors.iter().copied().collect(),
            },
            ttl,
        }
    }

    #[test]
    fn adopts_unknown_source() {
        let mut f = ready_node(1, &[2]);
        let adopted = f.routing.handle_update::<Cfg>(
            &update(2, 2, 0, &[3], 3),
            &mut f.topology,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::ZERO,
        );
        assert!(adopted);
        let stored = &f.topology.link_states()[&2];
        // We are 2's neighbor, so we appear in the stored set.
        assert!(stored.neighbor_ids.contains(&1));
        assert!(stored.neighbor_ids.contains(&3));
        // Everything the source reported is an occupied id now.
        assert!(f.topology.taken_ids().contains(&3));
    }

    #[test]
    fn stale_or_unchanged_updates_rejected() {
        let mut f = ready_node(1, &[2]);
        f.routing.handle_update::<Cfg>(
            &update(2, 2, 5, &[3], 1),
            &mut f.topology,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::ZERO,
        );

        // Older sequence.
        assert!(!f.routing.handle_update::<Cfg>(
            &update(2, 2, 4, &[4], 1),
            &mut f.topology,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::ZERO,
        ));
        // Fresher sequence but identical neighbors.
        let stored = f.topology.link_states()[&2].neighbor_ids.clone();
        let same: Vec<NodeId> = stored.iter().copied().collect();
        assert!(!f.routing.handle_update::<Cfg>(
            &update(2, 2, 6, &same, 1),
            &mut f.topology,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::ZERO,
        ));
    }

    #[test]
    fn own_update_ignored() {
        let mut f = ready_node(1, &[2]);
        assert!(!f.routing.handle_update::<Cfg>(
            &update(2, 1, 9, &[2], 3),
            &mut f.topology,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::ZERO,
        ));
    }

    #[test]
    fn forwards_with_rewritten_sender_and_decremented_ttl() {
        let mut f = ready_node(1, &[2, 4]);
        f.routing.handle_update::<Cfg>(
            &update(2, 3, 1, &[2], 3),
            &mut f.topology,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::ZERO,
        );

        let packets = flush(&mut f, Timestamp::from_millis(1100));
        assert_eq!(packets.len(), 1);
        match &packets[0] {
            Packet::LinkStateUpdate(fwd) => {
                assert_eq!(fwd.sender_id, 1);
                assert_eq!(fwd.ttl, 2);
                assert_eq!(fwd.link_state.node_id, 3);
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn no_receivers_left_forces_ttl_one() {
        // Our only neighbor is the source's relay; nobody new to reach.
        let mut f = ready_node(1, &[2]);
        f.routing.handle_update::<Cfg>(
            &update(2, 3, 1, &[2], 3),
            &mut f.topology,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::ZERO,
        );
        let packets = flush(&mut f, Timestamp::from_millis(1100));
        assert_eq!(packets.len(), 1);
        match &packets[0] {
            Packet::LinkStateUpdate(fwd) => assert_eq!(fwd.ttl, 1),
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn ttl_one_updates_not_forwarded() {
        let mut f = ready_node(1, &[2, 4]);
        f.routing.handle_update::<Cfg>(
            &update(2, 3, 1, &[2], 1),
            &mut f.topology,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::ZERO,
        );
        assert!(flush(&mut f, Timestamp::from_millis(1100)).is_empty());
    }

    #[test]
    fn serves_stored_link_state_on_request() {
        let mut f = ready_node(1, &[2]);
        f.topology
            .link_states_mut()
            .insert(3, LinkState::new(3, [2].into_iter().collect()));

        f.routing.handle_request::<Cfg>(
            &LinkStateRequest {
                destination_id: 1,
                source_id: 3,
            },
            &f.topology,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::ZERO,
        );
        let packets = flush(&mut f, Timestamp::from_millis(600));
        assert_eq!(packets.len(), 1);
        match &packets[0] {
            Packet::LinkStateUpdate(reply) => {
                assert_eq!(reply.link_state.node_id, 3);
                assert_eq!(reply.ttl, 1);
                assert_eq!(reply.sender_id, 1);
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn request_for_other_destination_ignored() {
        let mut f = ready_node(1, &[2]);
        f.routing.handle_request::<Cfg>(
            &LinkStateRequest {
                destination_id: 2,
                source_id: 1,
            },
            &f.topology,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::ZERO,
        );
        assert!(flush(&mut f, Timestamp::from_millis(600)).is_empty());
    }

    #[test]
    fn gap_fill_requests_missing_link_states() {
        let mut f = ready_node(2, &[1]);
        f.topology.mark_taken(1);
        f.topology.mark_taken(3);
        f.routing
            .pull_topology::<Cfg>(1, &f.topology, Timestamp::ZERO);

        // Three taken ids -> fires at 9 s.
        let tick = f.routing.poll::<Cfg>(
            &mut f.topology,
            &f.log,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::from_millis(8999),
        );
        assert!(tick.requested.is_empty());

        let tick = f.routing.poll::<Cfg>(
            &mut f.topology,
            &f.log,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::from_millis(9000),
        );
        // Own link state exists; 1 and 3 are missing.
        assert_eq!(tick.requested, [1, 3].into_iter().collect());
        let packets = flush(&mut f, Timestamp::from_millis(9500));
        assert_eq!(packets.len(), 2);
        assert!(packets
            .iter()
            .all(|p| matches!(p, Packet::LinkStateRequest(r) if r.destination_id == 1)));
    }

    #[test]
    fn keepalive_pong_when_silent() {
        let mut f = ready_node(1, &[2]);
        let tick_time = Timestamp::from_millis(4000);
        f.routing.poll::<Cfg>(
            &mut f.topology,
            &f.log,
            &mut f.arbiter,
            &mut f.rng,
            tick_time,
        );
        let packets = flush(&mut f, Timestamp::from_millis(4600));
        assert_eq!(packets.len(), 1);
        match &packets[0] {
            Packet::PingPong(p) => {
                assert!(p.pong);
                assert_eq!(p.sender_id, 1);
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }

    #[test]
    fn keepalive_suppressed_by_recent_traffic() {
        let mut f = ready_node(1, &[2]);
        f.log.record_sending(Timestamp::from_millis(3500));
        f.routing.poll::<Cfg>(
            &mut f.topology,
            &f.log,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::from_millis(4000),
        );
        assert!(flush(&mut f, Timestamp::from_millis(4600)).is_empty());
    }

    #[test]
    fn sweep_drops_silent_neighbors_and_refloods() {
        let mut f = ready_node(1, &[2, 3]);
        // Only neighbor 2 produced traffic during the window.
        f.log.add_record(
            Packet::PingPong(PingPong {
                sender_id: 2,
                pong: true,
            }),
            Timestamp::from_millis(10_000),
        );

        let tick = f.routing.poll::<Cfg>(
            &mut f.topology,
            &f.log,
            &mut f.arbiter,
            &mut f.rng,
            Timestamp::from_millis(15_000),
        );
        assert_eq!(tick.lost_neighbors, [3].into_iter().collect());
        assert!(!f.topology.neighbor_ids().contains(&3));
        assert!(!f
            .topology
            .own_link_state()
            .unwrap()
            .neighbor_ids
            .contains(&3));

        // The reflood carries the bumped sequence.
        let packets = flush(&mut f, Timestamp::from_millis(16_100));
        assert_eq!(packets.len(), 1);
        match &packets[0] {
            Packet::LinkStateUpdate(u) => {
                assert_eq!(u.link_state.sequence, 1);
                assert!(!u.link_state.neighbor_ids.contains(&3));
            }
            other => panic!("unexpected packet {other:?}"),
        }
    }
}
