//! Session protocol: per-message handshake, demux, and multi-hop relay.
//!
//! A node runs at most one outgoing session; further messages queue.
//! The session opens with a SESSION_UPDATE announcing the packet count,
//! waits for every neighbor to echo it (or a timeout), then drives the
//! sliding-window transmitter. Incoming announcements create a receive
//! session and are relayed along the planner's forwarder assignment;
//! a completed incoming stream is re-sent to the hops this node is
//! responsible for.

use core::mem;

use std::collections::VecDeque;

use hashbrown::HashMap;

use crate::arbiter::{ChannelArbiter, SendOutcome, SendPurpose};
use crate::config::NodeConfig;
use crate::planner;
use crate::receiver::DataReceiver;
use crate::time::Timestamp;
use crate::topology::Topology;
use crate::traits::{Frame, Random};
use crate::transmitter::{DataTransmitter, TransmitterStatus};
use crate::types::{Data, DataAck, IdSet, NodeId, Packet, SessionUpdate};

/// Notable outcomes of a session poll, for tracing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The outgoing session finished.
    Closed,
    /// The outgoing session was abandoned; the message is lost.
    Aborted { reason: &'static str },
}

enum Phase<Cfg: NodeConfig> {
    Idle,
    /// Announcement out; collecting neighbor echoes.
    Opening {
        packets: Vec<Data>,
        receivers: IdSet,
        acks: IdSet,
        deadline: Timestamp,
    },
    /// Handshake done (or skipped for relays); transmitter starts after
    /// the wake-up delay.
    PendingTransmit {
        packets: Vec<Data>,
        receivers: IdSet,
        start_at: Timestamp,
    },
    Transmitting {
        transmitter: DataTransmitter<Cfg>,
    },
}

impl<Cfg: NodeConfig> Default for Phase<Cfg> {
    fn default() -> Self {
        Phase::Idle
    }
}

/// Per-node session state.
pub struct SessionProtocol<Cfg: NodeConfig> {
    phase: Phase<Cfg>,
    /// Messages waiting for the current session to close.
    queue: VecDeque<(Vec<Data>, IdSet)>,
    /// Receive sessions keyed by their source.
    receivers: HashMap<NodeId, DataReceiver<Cfg>>,
}

impl<Cfg: NodeConfig> SessionProtocol<Cfg> {
    /// Fresh session state.
    pub fn new() -> Self {
        Self {
            phase: Phase::Idle,
            queue: VecDeque::new(),
            receivers: HashMap::new(),
        }
    }

    /// Whether an outgoing session is active.
    pub fn in_session(&self) -> bool {
        !matches!(self.phase, Phase::Idle)
    }

    /// Start (or queue) an outgoing session. User sends handshake with
    /// the neighbors first; relayed streams skip straight to the
    /// transmit delay. Returns false when there is nothing to do.
    pub fn send_packets(
        &mut self,
        packets: Vec<Data>,
        receivers: IdSet,
        from_user: bool,
        topology: &Topology,
        arbiter: &mut ChannelArbiter,
        rng: &mut impl Random,
        now: Timestamp,
    ) -> bool {
        if packets.is_empty() || receivers.is_empty() {
            return false;
        }
        if self.in_session() {
            self.queue.push_back((packets, receivers));
            return true;
        }

        if from_user {
            let node_id = topology.node_id();
            arbiter.send_reliable(
                Packet::SessionUpdate(SessionUpdate {
                    sender_id: node_id,
                    source_id: node_id,
                    packet_count: packets.len() as u8,
                }),
                Cfg::REPLY_DELAY_MS,
                Cfg::SESSION_ATTEMPTS,
                Cfg::SESSION_TIMEOUT_PER_NEIGHBOR * topology.neighbor_ids().len() as u64,
                receivers.clone(),
                SendPurpose::SessionOpen,
                rng,
                now,
            );
            self.phase = Phase::Opening {
                packets,
                receivers,
                acks: IdSet::new(),
                deadline: now + Cfg::SESSION_ACK_TIMEOUT,
            };
        } else {
            self.phase = Phase::PendingTransmit {
                packets,
                receivers,
                start_at: now + Cfg::TRANSMIT_START_DELAY,
            };
        }
        true
    }

    /// Process a SESSION_UPDATE: an echo of our own handshake, or an
    /// invitation into a foreign session (which we may have to relay).
    /// Returns the foreign source on joining, for tracing.
    pub fn handle_update(
        &mut self,
        packet: &SessionUpdate,
        topology: &Topology,
        arbiter: &mut ChannelArbiter,
        rng: &mut impl Random,
        now: Timestamp,
    ) -> Option<NodeId> {
        if packet.source_id != topology.node_id() {
            self.receivers
                .insert(packet.source_id, DataReceiver::new(packet.packet_count));
            self.relay_update(packet, topology, arbiter, rng, now);
            return Some(packet.source_id);
        }

        if let Phase::Opening { acks, .. } = &mut self.phase {
            acks.insert(packet.sender_id);
            if acks.is_superset(topology.neighbor_ids()) {
                self.advance_to_transmit(now);
            }
        }
        None
    }

    /// Forward a foreign session announcement if the planner makes us
    /// responsible for peers of the hop we heard it from.
    fn relay_update(
        &mut self,
        packet: &SessionUpdate,
        topology: &Topology,
        arbiter: &mut ChannelArbiter,
        rng: &mut impl Random,
        now: Timestamp,
    ) {
        let node_id = topology.node_id();
        let transmitters = planner::transmitters(topology.link_states(), packet.source_id);
        let responsible = transmitters
            .get(&packet.sender_id)
            .is_some_and(|peers| peers.contains(&node_id));
        if !responsible {
            return;
        }

        let forwarded = Packet::SessionUpdate(SessionUpdate {
            sender_id: node_id,
            ..*packet
        });
        match transmitters.get(&node_id) {
            Some(receivers) if !receivers.is_empty() => {
                arbiter.send_reliable(
                    forwarded,
                    Cfg::REPLY_DELAY_MS,
                    Cfg::SESSION_ATTEMPTS,
                    Cfg::SESSION_TIMEOUT_PER_NEIGHBOR,
                    receivers.clone(),
                    SendPurpose::SessionRelay,
                    rng,
                    now,
                );
            }
            _ => arbiter.schedule(
                Frame::from_packet(&forwarded),
                Cfg::REPLY_DELAY_MS,
                rng,
                now,
            ),
        }
    }

    /// Process a DATA packet: feed the matching receive session, answer
    /// with a staggered ack, and on completion relay the stream and
    /// hand the packets up for reassembly.
    pub fn handle_data(
        &mut self,
        packet: &Data,
        topology: &Topology,
        arbiter: &mut ChannelArbiter,
        rng: &mut impl Random,
        now: Timestamp,
    ) -> Option<Vec<Data>> {
        let source = packet.source_id;
        let receiver = self.receivers.get_mut(&source)?;
        if !receiver.receive_packet(packet.clone()) {
            return None;
        }

        let node_id = topology.node_id();
        let transmitters = planner::transmitters(topology.link_states(), source);

        // Peers fed by the same upstream hop ack in id order, each a
        // stagger step apart, so the replies do not collide.
        let order = transmitters
            .get(&packet.sender_id)
            .map(|peers| peers.iter().filter(|id| **id < node_id).count() as u64)
            .unwrap_or(0);
        let step = Cfg::ACK_STAGGER_STEP.as_millis();
        arbiter.schedule(
            Frame::from_packet(&Packet::DataAck(DataAck {
                sender_id: node_id,
                source_id: source,
                sequence: packet.sequence,
            })),
            (order * step, order * step + step),
            rng,
            now,
        );

        if !self.receivers.get(&source).is_some_and(DataReceiver::has_all_packets) {
            return None;
        }
        let receiver = self.receivers.remove(&source)?;
        let packets = receiver.into_packets();

        if let Some(receivers) = transmitters.get(&node_id) {
            if !receivers.is_empty() {
                // Relay the stream onward under our own hop id.
                let rebuilt: Vec<Data> = packets
                    .iter()
                    .cloned()
                    .map(|mut data| {
                        data.sender_id = node_id;
                        data
                    })
                    .collect();
                self.send_packets(
                    rebuilt,
                    receivers.clone(),
                    false,
                    topology,
                    arbiter,
                    rng,
                    now,
                );
            }
        }
        Some(packets)
    }

    /// Route an ack of our own session to the transmitter.
    pub fn handle_data_ack(&mut self, packet: &DataAck, topology: &Topology) {
        if packet.source_id != topology.node_id() {
            return;
        }
        if let Phase::Transmitting { transmitter } = &mut self.phase {
            transmitter.on_data_ack(packet.sender_id, packet.sequence);
        }
    }

    /// Route a completed reliable send back into the session.
    pub fn handle_send_outcome(&mut self, outcome: &SendOutcome) -> Option<(u8, IdSet)> {
        if let SendPurpose::Data { sequence } = outcome.purpose {
            if let Phase::Transmitting { transmitter } = &mut self.phase {
                if !outcome.missing.is_empty() {
                    transmitter.on_receivers_lost(sequence, &outcome.missing);
                    return Some((sequence, outcome.missing.clone()));
                }
            }
        }
        None
    }

    /// Drive the handshake deadline, the transmit delay, and the
    /// transmitter itself.
    pub fn poll(
        &mut self,
        topology: &Topology,
        arbiter: &mut ChannelArbiter,
        rng: &mut impl Random,
        now: Timestamp,
    ) -> Vec<SessionEvent> {
        let mut events = Vec::new();

        match &mut self.phase {
            Phase::Idle => {}
            Phase::Opening { deadline, .. } => {
                // Missing echoes do not block the message; transmit
                // best-effort once the wait runs out.
                if now >= *deadline {
                    self.advance_to_transmit(now);
                }
            }
            Phase::PendingTransmit { start_at, .. } => {
                if now >= *start_at {
                    let Phase::PendingTransmit {
                        packets, receivers, ..
                    } = mem::take(&mut self.phase)
                    else {
                        unreachable!()
                    };
                    let mut transmitter = DataTransmitter::new(packets, receivers);
                    transmitter.poll(arbiter, rng, now);
                    self.phase = Phase::Transmitting { transmitter };
                }
            }
            Phase::Transmitting { transmitter } => match transmitter.poll(arbiter, rng, now) {
                TransmitterStatus::Active => {}
                TransmitterStatus::Complete => {
                    events.push(SessionEvent::Closed);
                    self.close(topology, arbiter, rng, now);
                }
                TransmitterStatus::Aborted => {
                    events.push(SessionEvent::Aborted {
                        reason: "send window stalled",
                    });
                    self.close(topology, arbiter, rng, now);
                }
            },
        }

        events
    }

    fn advance_to_transmit(&mut self, now: Timestamp) {
        if let Phase::Opening {
            packets, receivers, ..
        } = mem::take(&mut self.phase)
        {
            self.phase = Phase::PendingTransmit {
                packets,
                receivers,
                start_at: now + Cfg::TRANSMIT_START_DELAY,
            };
        }
    }

    /// Close the current session and replay the next queued message as
    /// a fresh user send.
    fn close(
        &mut self,
        topology: &Topology,
        arbiter: &mut ChannelArbiter,
        rng: &mut impl Random,
        now: Timestamp,
    ) {
        self.phase = Phase::Idle;
        if let Some((packets, receivers)) = self.queue.pop_front() {
            self.send_packets(packets, receivers, true, topology, arbiter, rng, now);
        }
    }

    /// The earliest moment [`poll`](Self::poll) has work to do.
    pub fn next_deadline(&self) -> Option<Timestamp> {
        match &self.phase {
            Phase::Idle => None,
            Phase::Opening { deadline, .. } => Some(*deadline),
            Phase::PendingTransmit { start_at, .. } => Some(*start_at),
            Phase::Transmitting { transmitter } => transmitter.next_deadline(),
        }
    }
}

impl<Cfg: NodeConfig> Default for SessionProtocol<Cfg> {
    fn default() -> Self {
        Self::new()
    }
}
