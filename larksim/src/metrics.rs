//! Metrics collection for simulation analysis.

use larknet::{NodeId, NodeState, Timestamp};

/// A snapshot of every node's joining progress at a point in time.
#[derive(Debug, Clone)]
pub struct NetSnapshot {
    /// When this snapshot was taken.
    pub time: Timestamp,
    /// Per node (by spawn index): phase, assigned id, and how many
    /// link states it holds.
    pub nodes: Vec<NodeProgress>,
}

/// One node's progress entry.
#[derive(Debug, Clone, Copy)]
pub struct NodeProgress {
    pub state: NodeState,
    pub node_id: NodeId,
    pub link_state_count: usize,
}

impl NetSnapshot {
    pub fn new(time: Timestamp) -> Self {
        Self {
            time,
            nodes: Vec::new(),
        }
    }

    /// Record one node's progress.
    pub fn record(&mut self, state: NodeState, node_id: NodeId, link_state_count: usize) {
        self.nodes.push(NodeProgress {
            state,
            node_id,
            link_state_count,
        });
    }

    /// Whether every node reached the ready phase.
    pub fn all_ready(&self) -> bool {
        self.nodes
            .iter()
            .all(|n| n.state == NodeState::ReadyToSend)
    }

    /// Whether every assigned id is distinct and nonzero.
    pub fn ids_unique(&self) -> bool {
        let mut ids: Vec<NodeId> = self.nodes.iter().map(|n| n.node_id).collect();
        if ids.iter().any(|&id| id == 0) {
            return false;
        }
        ids.sort_unstable();
        ids.dedup();
        ids.len() == self.nodes.len()
    }
}

/// Counters and snapshots collected over one simulation run.
#[derive(Debug, Clone, Default)]
pub struct SimMetrics {
    /// Transmissions started on the air.
    pub frames_sent: u64,
    /// Frames delivered to a hearing node.
    pub frames_delivered: u64,
    /// Frames destroyed by overlapping transmissions.
    pub frames_collided: u64,
    /// Frames dropped by link loss.
    pub frames_lost: u64,
    /// Progress snapshots, oldest first.
    pub snapshots: Vec<NetSnapshot>,
}

impl SimMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_snapshot(&mut self, snapshot: NetSnapshot) {
        self.snapshots.push(snapshot);
    }

    /// The most recent snapshot.
    pub fn latest_snapshot(&self) -> Option<&NetSnapshot> {
        self.snapshots.last()
    }

    /// First time every node was ready with unique ids.
    pub fn convergence_time(&self) -> Option<Timestamp> {
        self.snapshots
            .iter()
            .find(|s| s.all_ready() && s.ids_unique())
            .map(|s| s.time)
    }
}

/// Result of running a simulation interval.
#[derive(Debug, Clone)]
pub struct SimulationResult {
    /// Final simulation time.
    pub end_time: Timestamp,
    /// Collected metrics.
    pub metrics: SimMetrics,
    /// Whether the event queue drained before the time limit.
    pub queue_exhausted: bool,
}

impl SimulationResult {
    /// Whether the final snapshot shows a fully joined network.
    pub fn converged(&self) -> bool {
        self.metrics
            .latest_snapshot()
            .is_some_and(|s| s.all_ready() && s.ids_unique())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unique_ids_require_nonzero_and_distinct() {
        let mut snapshot = NetSnapshot::new(Timestamp::ZERO);
        snapshot.record(NodeState::ReadyToSend, 1, 2);
        snapshot.record(NodeState::ReadyToSend, 2, 2);
        assert!(snapshot.all_ready());
        assert!(snapshot.ids_unique());

        let mut clash = NetSnapshot::new(Timestamp::ZERO);
        clash.record(NodeState::ReadyToSend, 1, 1);
        clash.record(NodeState::ReadyToSend, 1, 1);
        assert!(!clash.ids_unique());

        let mut unassigned = NetSnapshot::new(Timestamp::ZERO);
        unassigned.record(NodeState::AssigningId, 0, 0);
        assert!(!unassigned.ids_unique());
        assert!(!unassigned.all_ready());
    }

    #[test]
    fn convergence_time_finds_first_good_snapshot() {
        let mut metrics = SimMetrics::new();

        let mut early = NetSnapshot::new(Timestamp::from_secs(5));
        early.record(NodeState::AssigningId, 0, 0);
        metrics.add_snapshot(early);

        let mut late = NetSnapshot::new(Timestamp::from_secs(15));
        late.record(NodeState::ReadyToSend, 1, 1);
        metrics.add_snapshot(late);

        assert_eq!(metrics.convergence_time(), Some(Timestamp::from_secs(15)));
    }
}
