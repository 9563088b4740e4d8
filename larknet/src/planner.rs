//! Broadcast forwarding planner.
//!
//! Given the known link states and a broadcast source, a greedy cover
//! picks which nodes relay and which peers each relay is responsible
//! for. The result is deterministic: candidates tie-break toward the
//! higher id, and every non-source node appears under exactly one
//! forwarder. Minimality is not guaranteed, only smallness in practice.

use hashbrown::HashMap;

use crate::types::{IdSet, LinkState, NodeId};

/// Forwarder assignment: each chosen transmitter with the receivers it
/// must cover.
pub type TransmitterMap = HashMap<NodeId, IdSet>;

/// Compute the forwarder assignment for a broadcast from `source`.
pub fn transmitters(link_states: &HashMap<NodeId, LinkState>, source: NodeId) -> TransmitterMap {
    let mut chosen = TransmitterMap::new();
    let mut left: IdSet = link_states.keys().copied().collect();
    left.remove(&source);
    let mut candidates = IdSet::new();
    candidates.insert(source);

    while !left.is_empty() {
        let Some((winner, receivers)) = best_transmitter(link_states, &candidates, &left) else {
            // No candidate has a link state covering anything; the rest
            // of the graph is unreachable from here.
            break;
        };

        if receivers.is_empty() && link_states[&winner]
            .neighbor_ids
            .iter()
            .all(|n| candidates.contains(n) || chosen.contains_key(n))
        {
            break;
        }

        for neighbor in &link_states[&winner].neighbor_ids {
            if !chosen.contains_key(neighbor) {
                candidates.insert(*neighbor);
            }
        }
        for receiver in &receivers {
            left.remove(receiver);
        }
        chosen.insert(winner, receivers);
    }
    chosen
}

/// The candidate covering the most of `left`, higher id winning ties.
/// Candidates without a stored link state are skipped.
fn best_transmitter(
    link_states: &HashMap<NodeId, LinkState>,
    candidates: &IdSet,
    left: &IdSet,
) -> Option<(NodeId, IdSet)> {
    let mut best: Option<(NodeId, IdSet)> = None;
    for &candidate in candidates {
        let Some(state) = link_states.get(&candidate) else {
            continue;
        };
        let covered: IdSet = state.neighbor_ids.intersection(left).copied().collect();
        let better = match &best {
            None => true,
            Some((best_id, best_covered)) => {
                covered.len() > best_covered.len()
                    || (covered.len() == best_covered.len() && candidate > *best_id)
            }
        };
        if better {
            best = Some((candidate, covered));
        }
    }
    best
}
