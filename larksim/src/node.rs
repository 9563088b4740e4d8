//! SimNode wrapper for simulated larknet nodes.

use std::cell::Cell;
use std::future::{ready, Ready};
use std::sync::{Arc, Mutex};

use larknet::config::DefaultConfig;
use larknet::debug::{TraceEvent, TraceSink};
use larknet::traits::{FrameInChannel, FrameOutChannel};
use larknet::types::IdSet;
use larknet::{
    ChatMessage, Clock, Frame, LinkState, Node, NodeId, NodeState, Random, Timestamp, Transport,
};

use hashbrown::HashMap;

/// Trace sink printing events to stderr with node identification.
pub struct PrintSink {
    node_idx: usize,
}

impl PrintSink {
    pub fn new(node_idx: usize) -> Self {
        Self { node_idx }
    }
}

impl TraceSink for PrintSink {
    fn emit(&mut self, event: TraceEvent) {
        eprintln!("node {:2}: {:?}", self.node_idx, event);
    }
}

/// A trace event stamped with the node that emitted it.
#[derive(Debug, Clone)]
pub struct NodeTrace {
    pub node_idx: usize,
    pub event: TraceEvent,
}

/// Trace sink collecting events into a shared vector, so one collector
/// can gather a chronological record across every node.
pub struct VecSink {
    node_idx: usize,
    events: Arc<Mutex<Vec<NodeTrace>>>,
}

impl VecSink {
    pub fn new(node_idx: usize, events: Arc<Mutex<Vec<NodeTrace>>>) -> Self {
        Self { node_idx, events }
    }
}

impl TraceSink for VecSink {
    fn emit(&mut self, event: TraceEvent) {
        self.events.lock().unwrap().push(NodeTrace {
            node_idx: self.node_idx,
            event,
        });
    }
}

/// Transport backed by plain frame queues; the simulator injects
/// received frames and drains what the node queued for the air.
pub struct SimTransport {
    incoming: FrameInChannel,
    outgoing: FrameOutChannel,
}

impl Default for SimTransport {
    fn default() -> Self {
        Self::new()
    }
}

impl SimTransport {
    pub fn new() -> Self {
        Self {
            incoming: FrameInChannel::new(),
            outgoing: FrameOutChannel::new(),
        }
    }
}

impl Transport for SimTransport {
    fn incoming(&self) -> &FrameInChannel {
        &self.incoming
    }

    fn outgoing(&self) -> &FrameOutChannel {
        &self.outgoing
    }
}

/// Clock whose time the simulator sets before every handler call.
pub struct SimClock {
    current: Cell<Timestamp>,
}

impl SimClock {
    pub fn at(time: Timestamp) -> Self {
        Self {
            current: Cell::new(time),
        }
    }

    pub fn set(&self, time: Timestamp) {
        self.current.set(time);
    }
}

impl Clock for SimClock {
    type SleepFuture<'a> = Ready<()>;

    fn now(&self) -> Timestamp {
        self.current.get()
    }

    fn sleep_until(&self, _deadline: Timestamp) -> Self::SleepFuture<'_> {
        ready(())
    }
}

/// Deterministic LCG random source.
pub struct SimRandom {
    state: u64,
}

impl SimRandom {
    pub fn with_seed(seed: u64) -> Self {
        Self { state: seed }
    }
}

impl Random for SimRandom {
    fn gen_range(&mut self, min: u64, max: u64) -> u64 {
        self.state = self.state.wrapping_mul(6364136223846793005).wrapping_add(1);
        if max <= min {
            return min;
        }
        min + self.state % (max - min)
    }
}

/// Type alias for simulated nodes.
pub type SimNodeInner = Node<SimTransport, SimRandom, SimClock, DefaultConfig>;

/// One simulated chat node.
pub struct SimNode {
    inner: SimNodeInner,
}

impl SimNode {
    /// Create a node with a deterministic random seed. Its clock is
    /// updated by the simulator before every handler call.
    pub fn new(seed: u64, created_at: Timestamp) -> Self {
        let inner = Node::new(
            SimTransport::new(),
            SimRandom::with_seed(seed),
            SimClock::at(created_at),
        );
        Self { inner }
    }

    /// Install a trace sink on the wrapped node.
    pub fn set_trace_sink(&mut self, sink: Box<dyn TraceSink>) {
        self.inner.set_trace_sink(sink);
    }

    /// A reference to the wrapped node.
    pub fn inner(&self) -> &SimNodeInner {
        &self.inner
    }

    /// The node's network id, 0 until assigned.
    pub fn node_id(&self) -> NodeId {
        self.inner.node_id()
    }

    /// The node's join/operation phase.
    pub fn state(&self) -> NodeState {
        self.inner.state()
    }

    /// One-hop neighbors the node believes in.
    pub fn neighbor_ids(&self) -> &IdSet {
        self.inner.neighbor_ids()
    }

    /// Link states the node gathered.
    pub fn link_states(&self) -> &HashMap<NodeId, LinkState> {
        self.inner.link_states()
    }

    /// Apply one frame from the medium.
    pub fn handle_frame(&mut self, frame: Frame, now: Timestamp) {
        self.set_time(now);
        self.inner.handle_frame(frame, now);
    }

    /// Fire the node's protocol deadlines.
    pub fn handle_timer(&mut self, now: Timestamp) {
        self.set_time(now);
        self.inner.handle_timer(now);
    }

    /// The user of this node sends a chat message.
    pub fn send_chat(&mut self, text: &str, now: Timestamp) -> bool {
        self.set_time(now);
        self.inner.send_chat_message(text, now)
    }

    /// The node's earliest pending deadline.
    pub fn next_wake(&self) -> Option<Timestamp> {
        self.inner.next_wake()
    }

    /// Drain every frame the node queued for the air.
    pub fn take_outgoing(&self) -> Vec<Frame> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.inner.transport().outgoing().try_receive() {
            frames.push(frame);
        }
        frames
    }

    /// Drain the chat messages delivered to this node's user.
    pub fn take_chat(&self) -> Vec<ChatMessage> {
        let mut messages = Vec::new();
        while let Ok(message) = self.inner.chat_messages().try_receive() {
            messages.push(message);
        }
        messages
    }

    fn set_time(&self, now: Timestamp) {
        self.inner.clock().set(now);
    }
}
