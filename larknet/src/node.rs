//! The node controller: frame dispatch, the join state machine, and the
//! user surface.
//!
//! Every inbound frame and every timer tick funnels through one
//! dispatch path, so all protocol state is touched from a single
//! logical thread. Timed work lives as deadlines inside the arbiter,
//! the routing protocol, and the session protocol; [`Node::next_wake`]
//! exposes the earliest one and [`Node::handle_timer`] drains whatever
//! is due. The async [`Node::run`] loop adapts this to a live
//! transport; a simulator calls the handlers directly.

use core::marker::PhantomData;

use embassy_futures::select::{select3, Either3};

use crate::addressing::{AddressProtocol, IssueOutcome};
use crate::arbiter::{ChannelArbiter, SendOutcome, SendPurpose};
use crate::config::{DefaultConfig, NodeConfig};
use crate::debug::{TraceEvent, TraceSink};
use crate::fragment::{assemble_text, split_text};
use crate::log::PacketLog;
use crate::routing::LinkStateProtocol;
use crate::session::{SessionEvent, SessionProtocol};
use crate::time::{Duration, Timestamp};
use crate::topology::Topology;
use crate::traits::{
    ChatInChannel, ChatOutChannel, Clock, Frame, Random, ReadySignal, Transport,
};
use crate::types::{
    ChatMessage, IdSet, LinkState, NodeId, NodeState, Packet, PingPong, BROADCAST_ID,
};

use hashbrown::HashMap;

/// A chat node on the shared medium.
///
/// Generic over the transport, the randomness source, the clock, and
/// the protocol configuration.
pub struct Node<T, R, Clk, Cfg: NodeConfig = DefaultConfig> {
    transport: T,
    random: R,
    clock: Clk,
    _config: PhantomData<Cfg>,

    state: NodeState,
    topology: Topology,
    log: PacketLog,
    arbiter: ChannelArbiter,
    addressing: AddressProtocol,
    routing: LinkStateProtocol,
    session: SessionProtocol<Cfg>,

    chat_incoming: ChatInChannel,
    chat_outgoing: ChatOutChannel,
    ready: ReadySignal,

    /// Discovery pings completed on the air so far.
    ping_sequence: u8,
    /// Deferred transition into the addressing phase.
    assign_id_at: Option<Timestamp>,

    trace: Option<Box<dyn TraceSink>>,
}

impl<T, R, Clk, Cfg> Node<T, R, Clk, Cfg>
where
    T: Transport,
    R: Random,
    Clk: Clock,
    Cfg: NodeConfig,
{
    /// Create a node. It stays inert until the transport says HELLO.
    pub fn new(transport: T, random: R, clock: Clk) -> Self {
        let created_at = clock.now();
        Self {
            transport,
            random,
            clock,
            _config: PhantomData,
            state: NodeState::FindingNeighbors,
            topology: Topology::new(),
            log: PacketLog::new(),
            arbiter: ChannelArbiter::new(Cfg::FINISHED_SENDING_CAP),
            addressing: AddressProtocol::new(created_at),
            routing: LinkStateProtocol::new(),
            session: SessionProtocol::new(),
            chat_incoming: ChatInChannel::new(),
            chat_outgoing: ChatOutChannel::new(),
            ready: ReadySignal::new(),
            ping_sequence: 0,
            assign_id_at: None,
            trace: None,
        }
    }

    /// Install a trace sink for protocol observation.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.trace = Some(sink);
    }

    /// The transport this node drives.
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// This node's network id, 0 until assigned.
    pub fn node_id(&self) -> NodeId {
        self.topology.node_id()
    }

    /// Current join/operation phase.
    pub fn state(&self) -> NodeState {
        self.state
    }

    /// One-hop neighbors.
    pub fn neighbor_ids(&self) -> &IdSet {
        self.topology.neighbor_ids()
    }

    /// Every id known to be occupied.
    pub fn taken_ids(&self) -> &IdSet {
        self.topology.taken_ids()
    }

    /// The link states gathered from flooding.
    pub fn link_states(&self) -> &HashMap<NodeId, LinkState> {
        self.topology.link_states()
    }

    /// Queue of chat messages delivered to the local user.
    pub fn chat_messages(&self) -> &ChatInChannel {
        &self.chat_incoming
    }

    /// Queue the user pushes outgoing texts into; consumed by
    /// [`run`](Self::run).
    pub fn chat_outgoing(&self) -> &ChatOutChannel {
        &self.chat_outgoing
    }

    /// Wait until the node is ready to send chat messages. Resolves to
    /// the assigned id.
    pub async fn wait_ready(&self) -> NodeId {
        self.ready.wait().await
    }

    /// The current time according to the node's clock.
    pub fn now(&self) -> Timestamp {
        self.clock.now()
    }

    /// The clock driving this node. A simulator sets its time before
    /// every handler call.
    pub fn clock(&self) -> &Clk {
        &self.clock
    }

    /// Fragment `text` and open a session toward the neighbors. False
    /// when the text is empty or needs more packets than a session can
    /// announce.
    pub fn send_chat_message(&mut self, text: &str, now: Timestamp) -> bool {
        if text.is_empty() {
            return false;
        }
        let node_id = self.topology.node_id();
        let packets = split_text::<Cfg>(text, BROADCAST_ID, node_id, node_id);
        if packets.len() > Cfg::MAX_SESSION_PACKETS {
            return false;
        }

        // The user sees their own message too.
        let _ = self.chat_incoming.try_send(ChatMessage {
            text: text.to_string(),
            sender_id: node_id,
            timestamp: now,
        });
        let receivers = self.topology.neighbor_ids().clone();
        let packet_count = packets.len() as u8;
        if self.session.send_packets(
            packets,
            receivers.clone(),
            true,
            &self.topology,
            &mut self.arbiter,
            &mut self.random,
            now,
        ) {
            self.trace(TraceEvent::SessionStarted {
                packet_count,
                receivers,
            });
        }
        self.pump(now);
        true
    }

    /// Apply one frame from the transport.
    pub fn handle_frame(&mut self, frame: Frame, now: Timestamp) {
        if self.state == NodeState::Stopped {
            return;
        }
        match frame {
            Frame::Data(buf) => self.handle_payload(&buf, now),
            Frame::DataShort(buf) => self.handle_payload(&buf, now),
            Frame::Free => self.arbiter.set_network_state(false, now),
            Frame::Busy => self.arbiter.set_network_state(true, now),
            Frame::Sending => {}
            Frame::DoneSending => self.finish_sending(now),
            Frame::Hello => self.join(now),
            Frame::End => {
                self.set_state(NodeState::Stopped, now);
                return;
            }
        }
        self.pump(now);
    }

    /// Drive every pending deadline.
    pub fn handle_timer(&mut self, now: Timestamp) {
        if self.state == NodeState::Stopped {
            return;
        }
        if let Some(at) = self.assign_id_at {
            if now >= at {
                self.assign_id_at = None;
                self.assign_node_id(now);
            }
        }
        self.pump(now);
    }

    /// The earliest moment [`handle_timer`](Self::handle_timer) has
    /// work to do.
    pub fn next_wake(&self) -> Option<Timestamp> {
        [
            self.assign_id_at,
            self.arbiter.next_deadline(),
            self.routing.next_deadline(),
            self.session.next_deadline(),
        ]
        .into_iter()
        .flatten()
        .min()
    }

    /// Run the node against its transport forever: frames in, user
    /// texts in, deadlines out.
    pub async fn run(&mut self) -> ! {
        loop {
            let wake = self
                .next_wake()
                .unwrap_or_else(|| self.clock.now() + Duration::from_secs(1));
            let result = select3(
                self.transport.incoming().receive(),
                self.chat_outgoing.receive(),
                self.clock.sleep_until(wake),
            )
            .await;
            let now = self.clock.now();
            match result {
                Either3::First(frame) => self.handle_frame(frame, now),
                Either3::Second(text) => {
                    self.send_chat_message(&text, now);
                }
                Either3::Third(()) => self.handle_timer(now),
            }
        }
    }

    /// The transport accepted us; start discovering neighbors.
    fn join(&mut self, now: Timestamp) {
        self.set_state(NodeState::FindingNeighbors, now);
        self.ping_sequence = 0;
        self.arbiter.repeat_send(
            Frame::from_packet(&Packet::PingPong(PingPong {
                sender_id: self.addressing.address(),
                pong: false,
            })),
            Cfg::PING_REPEAT_SPACING,
            Cfg::PING_REPEAT_COUNT,
            now,
        );
    }

    /// A transmission of ours completed on the air. During discovery
    /// this counts the pings; after the last one a grace period for
    /// straggler pongs precedes the addressing phase.
    fn finish_sending(&mut self, now: Timestamp) {
        self.log.record_sending(now);
        self.arbiter.finish_sending(now);
        if self.state == NodeState::FindingNeighbors {
            self.ping_sequence += 1;
            if self.ping_sequence == Cfg::PING_REPEAT_COUNT {
                self.ping_sequence = 0;
                self.assign_id_at = Some(now + Cfg::ASSIGN_ID_DELAY);
            }
        }
    }

    /// Decode and dispatch a payload frame.
    fn handle_payload(&mut self, buf: &[u8], now: Timestamp) {
        let packet = match Packet::decode_from_slice(buf) {
            Ok(packet) => packet,
            Err(_) => {
                self.trace(TraceEvent::FrameDropped { len: buf.len() });
                return;
            }
        };

        self.log.add_record(packet.clone(), now);

        // Any positive sender in range is a neighbor.
        let sender = packet.sender_id();
        if self.routing.handle_neighbor_activity::<Cfg>(
            sender,
            &mut self.topology,
            &mut self.arbiter,
            &mut self.random,
            now,
        ) {
            self.trace(TraceEvent::NeighborAdded { id: sender });
        }

        match &packet {
            Packet::LinkStateUpdate(update) => {
                let adopted = self.routing.handle_update::<Cfg>(
                    update,
                    &mut self.topology,
                    &mut self.arbiter,
                    &mut self.random,
                    now,
                );
                if adopted {
                    self.trace(TraceEvent::LinkStateAdopted {
                        source: update.link_state.node_id,
                        sequence: update.link_state.sequence,
                    });
                }
                if self.state == NodeState::PullingTopology && self.topology.has_full_topology() {
                    self.set_state(NodeState::ReadyToSend, now);
                    self.routing.send_update::<Cfg>(
                        &mut self.topology,
                        &mut self.arbiter,
                        &mut self.random,
                        now,
                    );
                }
            }
            Packet::LinkStateRequest(request) => {
                self.routing.handle_request::<Cfg>(
                    request,
                    &self.topology,
                    &mut self.arbiter,
                    &mut self.random,
                    now,
                );
            }
            Packet::SessionUpdate(update) => {
                if let Some(source) = self.session.handle_update(
                    update,
                    &self.topology,
                    &mut self.arbiter,
                    &mut self.random,
                    now,
                ) {
                    self.trace(TraceEvent::SessionJoined {
                        source,
                        packet_count: update.packet_count,
                    });
                }
            }
            Packet::RequestId(request) => {
                if let Some(id) =
                    self.addressing
                        .handle_request(request, &self.topology, &mut self.arbiter, now)
                {
                    self.trace(TraceEvent::IdIssued {
                        id,
                        timestamp: request.timestamp,
                    });
                    // The newcomer needs the whole picture to take
                    // part; push every link state we have.
                    self.routing
                        .push_topology(&self.topology, &mut self.arbiter, now);
                }
            }
            Packet::PingPong(ping) => {
                if !ping.pong
                    && self.addressing.address() != BROADCAST_ID
                    && self.state == NodeState::ReadyToSend
                {
                    self.arbiter.schedule(
                        Frame::from_packet(&Packet::PingPong(PingPong {
                            sender_id: self.addressing.address(),
                            pong: true,
                        })),
                        Cfg::REPLY_DELAY_MS,
                        &mut self.random,
                        now,
                    );
                }
            }
            Packet::DataAck(ack) => {
                self.session.handle_data_ack(ack, &self.topology);
            }
            Packet::Data(data) => {
                if let Some(packets) = self.session.handle_data(
                    data,
                    &self.topology,
                    &mut self.arbiter,
                    &mut self.random,
                    now,
                ) {
                    let text = assemble_text(&packets);
                    self.trace(TraceEvent::MessageDelivered {
                        source: data.source_id,
                        bytes: text.len(),
                    });
                    let _ = self.chat_incoming.try_send(ChatMessage {
                        text,
                        sender_id: data.source_id,
                        timestamp: now,
                    });
                }
            }
            Packet::IssueId(issue) => match self.addressing.handle_issue(issue, &mut self.topology)
            {
                IssueOutcome::Assigned => {
                    self.trace(TraceEvent::IdAssigned {
                        id: self.addressing.address(),
                        provider: self.addressing.id_provider(),
                    });
                    self.set_state(NodeState::PullingTopology, now);
                    self.routing.pull_topology::<Cfg>(
                        self.addressing.id_provider(),
                        &self.topology,
                        now,
                    );
                }
                IssueOutcome::Collision { id, issuer } => {
                    self.trace(TraceEvent::AddressCollision { id, issuer });
                }
                IssueOutcome::Observed | IssueOutcome::Ignored => {}
            },
        }
    }

    /// Leave discovery and acquire an id.
    fn assign_node_id(&mut self, now: Timestamp) {
        self.set_state(NodeState::AssigningId, now);
        let has_neighbors = self.addressing.start_addressing::<Cfg>(
            &mut self.topology,
            &mut self.arbiter,
            &mut self.random,
            now,
        );
        if !has_neighbors {
            // Alone on the channel: nothing to pull, nobody to ask.
            self.trace(TraceEvent::IdSelfAssigned {
                id: self.addressing.address(),
            });
            self.set_state(NodeState::ReadyToSend, now);
        }
    }

    fn set_state(&mut self, state: NodeState, now: Timestamp) {
        self.state = state;
        self.routing
            .set_node_state::<Cfg>(state, &self.topology, now);
        self.trace(TraceEvent::StateChanged { state });
        if state == NodeState::ReadyToSend {
            self.ready.signal(self.topology.node_id());
        }
    }

    /// Drain every due deadline and push finished frames to the
    /// transport.
    fn pump(&mut self, now: Timestamp) {
        let outcomes = self.arbiter.poll(&self.log, &mut self.random, now);
        for outcome in outcomes {
            self.route_outcome(outcome, now);
        }

        let tick = self.routing.poll::<Cfg>(
            &mut self.topology,
            &self.log,
            &mut self.arbiter,
            &mut self.random,
            now,
        );
        if !tick.lost_neighbors.is_empty() {
            self.trace(TraceEvent::NeighborsLost {
                ids: tick.lost_neighbors,
            });
        }

        for event in self
            .session
            .poll(&self.topology, &mut self.arbiter, &mut self.random, now)
        {
            match event {
                SessionEvent::Closed => self.trace(TraceEvent::SessionClosed),
                SessionEvent::Aborted { reason } => {
                    self.trace(TraceEvent::SessionAborted { reason })
                }
            }
        }

        while let Some(frame) = self.arbiter.pop_frame() {
            if let Err(embassy_sync::channel::TrySendError::Full(frame)) =
                self.transport.outgoing().try_send(frame)
            {
                self.arbiter.requeue_front(frame);
                break;
            }
        }
    }

    /// Route a finished reliable send to the protocol that asked for
    /// it.
    fn route_outcome(&mut self, outcome: SendOutcome, now: Timestamp) {
        if !outcome.confirmed {
            self.trace(TraceEvent::FinishSendingTimedOut);
        }
        match outcome.purpose {
            SendPurpose::AddressRequest => {
                let failed = !outcome.confirmed || !outcome.missing.is_empty();
                if failed && self.addressing.handle_request_failed(&mut self.topology) {
                    self.trace(TraceEvent::IdSelfAssigned {
                        id: self.addressing.address(),
                    });
                    self.set_state(NodeState::ReadyToSend, now);
                }
            }
            SendPurpose::TopologyPull { .. } => {
                // The hole stays; future flooding will fill it.
            }
            SendPurpose::SessionOpen | SendPurpose::SessionRelay => {
                // Best-effort; the ack wait has its own deadline.
            }
            SendPurpose::Data { .. } => {
                if let Some((sequence, ids)) = self.session.handle_send_outcome(&outcome) {
                    self.trace(TraceEvent::ReceiversLost { sequence, ids });
                }
            }
        }
    }

    fn trace(&mut self, event: TraceEvent) {
        if let Some(sink) = &mut self.trace {
            sink.emit(event);
        }
    }
}
