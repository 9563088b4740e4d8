//! larknet - multi-hop ad-hoc chat over a shared half-duplex channel.
//!
//! Every node on the medium independently discovers its one-hop
//! neighbors, negotiates a unique 4-bit id, assembles a network-wide
//! link-state topology, plans broadcast forwarding with a greedy cover,
//! and ships user text through a sliding-window session protocol with
//! collision-avoidance pacing.
//!
//! # Design
//!
//! The crate is sans-io: handlers take the current time explicitly and
//! all timed behavior is deadline state behind [`Node::next_wake`] and
//! [`Node::handle_timer`]. That keeps the protocol deterministic under
//! the `larksim` discrete-event simulator while the async
//! [`Node::run`] loop drives it against a live transport.
//!
//! # Module Structure
//!
//! - [`types`] - Core types (ids, link states, the packet kinds)
//! - [`wire`] - Wire format encoding/decoding
//! - [`fragment`] - Chat text fragmentation and reassembly
//! - [`traits`] - Transport, Clock, Random traits
//! - [`log`] - Received-packet log and ack-miss queries
//! - [`arbiter`] - Carrier-sense channel arbiter and reliable sends
//! - [`topology`] - Topology store
//! - [`planner`] - Greedy broadcast-forwarder cover
//! - [`addressing`] - Short-id allocation
//! - [`routing`] - Link-state flooding and liveness
//! - [`receiver`] / [`transmitter`] - Sliding-window transport
//! - [`session`] - Per-message sessions and multi-hop relay
//! - [`node`] - The controller and public API

pub mod addressing;
pub mod arbiter;
pub mod config;
pub mod debug;
pub mod fragment;
pub mod log;
pub mod node;
pub mod planner;
pub mod receiver;
pub mod routing;
pub mod session;
pub mod time;
pub mod topology;
pub mod traits;
pub mod transmitter;
pub mod types;
pub mod wire;

pub use config::{DefaultConfig, NodeConfig};
pub use node::Node;
pub use time::{Duration, Timestamp};
pub use traits::{Clock, Frame, Random, Transport};
pub use types::{ChatMessage, IdSet, LinkState, NodeId, NodeState, Packet};
pub use wire::DecodeError;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::test_impls::{MockClock, MockRandom, MockTransport};

    #[test]
    fn node_starts_unaddressed() {
        let node: Node<_, _, _> = Node::new(
            MockTransport::new(),
            MockRandom::with_seed(1),
            MockClock::new(),
        );
        assert_eq!(node.node_id(), 0);
        assert_eq!(node.state(), NodeState::FindingNeighbors);
        assert!(node.link_states().is_empty());
        assert!(node.next_wake().is_none());
    }
}
