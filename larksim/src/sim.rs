//! Discrete event simulator for larknet networks.
//!
//! Models one shared half-duplex channel. A transmission occupies the
//! air for a duration proportional to its frame size; while it lasts,
//! every link-connected peer hears BUSY and the sender SENDING. Two
//! transmissions overlapping at a receiver destroy each other there, a
//! collision the protocol's randomized deferral is designed to make
//! rare. Everything is deterministic given the seed.

use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex};

use hashbrown::HashMap;

use larknet::{ChatMessage, Duration, Frame, Timestamp};

use crate::event::{Event, ScenarioAction, ScheduledEvent, SequenceNumber};
use crate::metrics::{NetSnapshot, SimMetrics, SimulationResult};
use crate::node::{NodeTrace, PrintSink, SimNode, VecSink};
use crate::topology::Topology;

/// Air time of a 2-byte frame.
pub const SHORT_FRAME_AIR_TIME: Duration = Duration::from_millis(20);

/// Air time of a 32-byte frame.
pub const LONG_FRAME_AIR_TIME: Duration = Duration::from_millis(320);

/// One frame in flight on the shared channel.
struct Transmission {
    sender: usize,
    frame: Frame,
    end: Timestamp,
    /// Peers that heard the carrier when it started.
    peers: Vec<usize>,
    /// Senders of transmissions that overlapped this one.
    overlapping: Vec<usize>,
}

/// Discrete event simulator over a set of [`SimNode`]s.
pub struct Simulator {
    nodes: Vec<SimNode>,
    topology: Topology,
    current_time: Timestamp,
    event_queue: BinaryHeap<ScheduledEvent>,
    metrics: SimMetrics,
    next_seq: u64,
    /// RNG state for link loss.
    rng_state: u64,

    transmissions: HashMap<u64, Transmission>,
    /// Ids of transmissions currently on the air.
    active: Vec<u64>,
    next_tx_id: u64,
    /// Per node: when its transmitter finishes its queued frames.
    tx_free_at: Vec<Timestamp>,
    /// Per node: how many audible carriers it currently hears.
    busy_count: Vec<usize>,
    /// Per node: the soonest scheduled timer, to avoid duplicates.
    timer_at: Vec<Option<Timestamp>>,
    /// Per node: every chat message its user saw.
    chat_logs: Vec<Vec<ChatMessage>>,

    snapshot_interval: Option<Duration>,
    next_snapshot: Option<Timestamp>,

    collected_traces: Option<Arc<Mutex<Vec<NodeTrace>>>>,
    debug_print: bool,
}

impl Simulator {
    /// A simulator with the given loss-RNG seed and no nodes.
    pub fn new(seed: u64) -> Self {
        Self {
            nodes: Vec::new(),
            topology: Topology::new(),
            current_time: Timestamp::ZERO,
            event_queue: BinaryHeap::new(),
            metrics: SimMetrics::new(),
            next_seq: 0,
            rng_state: seed,
            transmissions: HashMap::new(),
            active: Vec::new(),
            next_tx_id: 0,
            tx_free_at: Vec::new(),
            busy_count: Vec::new(),
            timer_at: Vec::new(),
            chat_logs: Vec::new(),
            snapshot_interval: None,
            next_snapshot: None,
            collected_traces: None,
            debug_print: false,
        }
    }

    /// Print every node's trace events to stderr. Set before adding
    /// nodes.
    pub fn with_debug_print(mut self) -> Self {
        self.debug_print = true;
        self
    }

    /// Collect every node's trace events into a shared vector. Set
    /// before adding nodes; retrieve with
    /// [`take_traces`](Self::take_traces).
    pub fn with_trace_collection(mut self) -> Self {
        self.collected_traces = Some(Arc::new(Mutex::new(Vec::new())));
        self
    }

    /// Take the collected trace events so far.
    pub fn take_traces(&self) -> Vec<NodeTrace> {
        self.collected_traces
            .as_ref()
            .map(|events| std::mem::take(&mut *events.lock().unwrap()))
            .unwrap_or_default()
    }

    /// Set the link graph.
    pub fn with_topology(mut self, topology: Topology) -> Self {
        self.topology = topology;
        self
    }

    /// Record a progress snapshot every `interval`.
    pub fn with_snapshot_interval(mut self, interval: Duration) -> Self {
        self.snapshot_interval = Some(interval);
        self.next_snapshot = Some(self.current_time + interval);
        self
    }

    /// Add a node; returns its spawn index. The node stays silent
    /// until a [`join`](Self::join) is scheduled for it.
    pub fn add_node(&mut self, seed: u64) -> usize {
        let index = self.nodes.len();
        let mut node = SimNode::new(seed, self.current_time);
        if self.debug_print {
            node.set_trace_sink(Box::new(PrintSink::new(index)));
        } else if let Some(events) = &self.collected_traces {
            node.set_trace_sink(Box::new(VecSink::new(index, events.clone())));
        }
        self.nodes.push(node);
        self.tx_free_at.push(Timestamp::ZERO);
        self.busy_count.push(0);
        self.timer_at.push(None);
        self.chat_logs.push(Vec::new());
        index
    }

    /// Schedule the medium's HELLO toward a node.
    pub fn join(&mut self, node: usize, at: Timestamp) {
        self.schedule(at, Event::Join { node });
    }

    /// Schedule a chat message from a node's user.
    pub fn chat(&mut self, node: usize, at: Timestamp, text: &str) {
        self.schedule(
            at,
            Event::ChatSend {
                node,
                text: text.to_string(),
            },
        );
    }

    /// Schedule a scenario action.
    pub fn schedule_action(&mut self, at: Timestamp, action: ScenarioAction) {
        self.schedule(at, Event::Action(action));
    }

    /// A node by spawn index.
    pub fn node(&self, index: usize) -> &SimNode {
        &self.nodes[index]
    }

    /// Number of nodes in the simulation.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// The chat transcript a node's user saw.
    pub fn chat_log(&self, index: usize) -> &[ChatMessage] {
        &self.chat_logs[index]
    }

    /// The link graph.
    pub fn topology(&self) -> &Topology {
        &self.topology
    }

    /// Collected metrics so far.
    pub fn metrics(&self) -> &SimMetrics {
        &self.metrics
    }

    /// Current simulation time.
    pub fn current_time(&self) -> Timestamp {
        self.current_time
    }

    /// Run until `end_time`, processing every event due before it.
    pub fn run_until(&mut self, end_time: Timestamp) -> SimulationResult {
        while let Some(next) = self.event_queue.peek() {
            if next.time > end_time {
                break;
            }
            let next = self.event_queue.pop().expect("peeked event");
            if next.time > self.current_time {
                self.current_time = next.time;
            }
            self.process_event(next.event);
            self.maybe_take_snapshot();
        }

        if end_time > self.current_time {
            self.current_time = end_time;
        }
        self.take_snapshot();

        SimulationResult {
            end_time: self.current_time,
            metrics: self.metrics.clone(),
            queue_exhausted: self.event_queue.is_empty(),
        }
    }

    /// Run for `duration` from the current time.
    pub fn run_for(&mut self, duration: Duration) -> SimulationResult {
        self.run_until(self.current_time + duration)
    }

    fn schedule(&mut self, time: Timestamp, event: Event) {
        let seq = SequenceNumber::new(self.next_seq);
        self.next_seq += 1;
        self.event_queue.push(ScheduledEvent::new(time, seq, event));
    }

    fn process_event(&mut self, event: Event) {
        match event {
            Event::Join { node } => self.deliver(node, Frame::Hello),
            Event::ChatSend { node, text } => {
                let now = self.current_time;
                self.nodes[node].send_chat(&text, now);
                self.after_interaction(node);
            }
            Event::TimerFire { node } => {
                self.timer_at[node] = None;
                let now = self.current_time;
                self.nodes[node].handle_timer(now);
                self.after_interaction(node);
            }
            Event::TxBegin { id } => self.begin_transmission(id),
            Event::TxEnd { id } => self.end_transmission(id),
            Event::Action(action) => self.apply_action(action),
        }
    }

    /// Hand one frame to a node and absorb the fallout.
    fn deliver(&mut self, node: usize, frame: Frame) {
        let now = self.current_time;
        self.nodes[node].handle_frame(frame, now);
        self.after_interaction(node);
    }

    /// After any handler: collect chat, put queued frames on the air,
    /// and re-arm the node's timer.
    fn after_interaction(&mut self, node: usize) {
        let messages = self.nodes[node].take_chat();
        self.chat_logs[node].extend(messages);

        for frame in self.nodes[node].take_outgoing() {
            self.start_transmission(node, frame);
        }

        if let Some(wake) = self.nodes[node].next_wake() {
            let wake = wake.max(self.current_time);
            if self.timer_at[node].map_or(true, |at| wake < at) {
                self.timer_at[node] = Some(wake);
                self.schedule(wake, Event::TimerFire { node });
            }
        }
    }

    /// Queue a frame on the sender's transmitter; it starts once the
    /// transmitter is free of earlier frames.
    fn start_transmission(&mut self, sender: usize, frame: Frame) {
        let air_time = match frame {
            Frame::Data(_) => LONG_FRAME_AIR_TIME,
            Frame::DataShort(_) => SHORT_FRAME_AIR_TIME,
            _ => return,
        };
        let start = self.tx_free_at[sender].max(self.current_time);
        let end = start + air_time;
        self.tx_free_at[sender] = end;

        let id = self.next_tx_id;
        self.next_tx_id += 1;
        self.transmissions.insert(
            id,
            Transmission {
                sender,
                frame,
                end,
                peers: Vec::new(),
                overlapping: Vec::new(),
            },
        );
        self.metrics.frames_sent += 1;
        self.schedule(start, Event::TxBegin { id });
        self.schedule(end, Event::TxEnd { id });
    }

    /// The carrier comes up: note overlaps, raise BUSY at the peers,
    /// tell the sender it is on the air.
    fn begin_transmission(&mut self, id: u64) {
        let Some(tx) = self.transmissions.get(&id) else {
            return;
        };
        let sender = tx.sender;
        let peers = self.topology.neighbors(sender);

        let others: Vec<(u64, usize)> = self
            .active
            .iter()
            .map(|&other| (other, self.transmissions[&other].sender))
            .collect();
        {
            let tx = self.transmissions.get_mut(&id).expect("transmission");
            tx.peers = peers.clone();
            for &(_, other_sender) in &others {
                tx.overlapping.push(other_sender);
            }
        }
        for (other, _) in others {
            if let Some(other_tx) = self.transmissions.get_mut(&other) {
                other_tx.overlapping.push(sender);
            }
        }
        self.active.push(id);

        self.deliver(sender, Frame::Sending);
        for peer in peers {
            self.busy_count[peer] += 1;
            if self.busy_count[peer] == 1 {
                self.deliver(peer, Frame::Busy);
            }
        }
    }

    /// The carrier drops: lower BUSY, confirm the sender, and deliver
    /// the frame wherever no overlap destroyed it.
    fn end_transmission(&mut self, id: u64) {
        self.active.retain(|&active| active != id);
        let Some(tx) = self.transmissions.remove(&id) else {
            return;
        };

        self.deliver(tx.sender, Frame::DoneSending);

        for &peer in &tx.peers {
            self.busy_count[peer] = self.busy_count[peer].saturating_sub(1);
            if self.busy_count[peer] == 0 {
                self.deliver(peer, Frame::Free);
            }

            // A peer transmitting itself, or hearing any overlapping
            // transmission, loses the frame.
            let garbled = tx
                .overlapping
                .iter()
                .any(|&other| other == peer || self.topology.is_connected(other, peer));
            if garbled {
                self.metrics.frames_collided += 1;
                continue;
            }
            if self.link_lossy(tx.sender, peer) {
                self.metrics.frames_lost += 1;
                continue;
            }
            self.metrics.frames_delivered += 1;
            self.deliver(peer, tx.frame.clone());
        }
    }

    fn link_lossy(&mut self, a: usize, b: usize) -> bool {
        let rate = self
            .topology
            .get_link(a, b)
            .map(|link| link.loss_rate)
            .unwrap_or(1.0);
        rate > 0.0 && self.random_f64() < rate
    }

    fn apply_action(&mut self, action: ScenarioAction) {
        match action {
            ScenarioAction::DisableLink { a, b } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.active = false;
                }
            }
            ScenarioAction::EnableLink { a, b } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.active = true;
                }
            }
            ScenarioAction::Partition { groups } => self.topology.partition(&groups),
            ScenarioAction::HealPartition => self.topology.heal(),
            ScenarioAction::SetLossRate { a, b, rate } => {
                if let Some(link) = self.topology.get_link_mut(a, b) {
                    link.loss_rate = rate.clamp(0.0, 1.0);
                }
            }
        }
    }

    fn maybe_take_snapshot(&mut self) {
        if let Some(next) = self.next_snapshot {
            if self.current_time >= next {
                self.take_snapshot();
                if let Some(interval) = self.snapshot_interval {
                    self.next_snapshot = Some(next + interval);
                }
            }
        }
    }

    /// Record every node's joining progress.
    pub fn take_snapshot(&mut self) {
        let mut snapshot = NetSnapshot::new(self.current_time);
        for node in &self.nodes {
            snapshot.record(node.state(), node.node_id(), node.link_states().len());
        }
        self.metrics.add_snapshot(snapshot);
    }

    /// A uniform value in [0, 1).
    fn random_f64(&mut self) -> f64 {
        self.rng_state = self
            .rng_state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1);
        (self.rng_state >> 11) as f64 / (1u64 << 53) as f64
    }
}
