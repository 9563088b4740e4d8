//! Process-wide view of the network: own id, one-hop neighbors, occupied
//! ids, and the link states gathered from flooding.
//!
//! All mutation happens from the controller's dispatch path, so the store
//! itself is plain data. The node's own link state mirrors the neighbor
//! set; the mutators here keep the two in step.

use hashbrown::HashMap;

use crate::types::{IdSet, LinkState, NodeId, BROADCAST_ID};

/// Topology store owned by the node controller.
#[derive(Default)]
pub struct Topology {
    node_id: NodeId,
    neighbor_ids: IdSet,
    taken_ids: IdSet,
    link_states: HashMap<NodeId, LinkState>,
}

impl Topology {
    /// An empty store for a node that has not joined yet.
    pub fn new() -> Self {
        Self::default()
    }

    /// This node's id, 0 until assigned.
    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    /// Assign this node's id and seed its own link state from the
    /// neighbors found so far.
    pub fn assign_node_id(&mut self, id: NodeId) {
        self.node_id = id;
        self.taken_ids.insert(id);
        self.link_states
            .insert(id, LinkState::new(id, self.neighbor_ids.clone()));
    }

    /// One-hop neighbors.
    pub fn neighbor_ids(&self) -> &IdSet {
        &self.neighbor_ids
    }

    /// Every id known to be occupied.
    pub fn taken_ids(&self) -> &IdSet {
        &self.taken_ids
    }

    /// Mark an id as occupied.
    pub fn mark_taken(&mut self, id: NodeId) {
        if id != BROADCAST_ID {
            self.taken_ids.insert(id);
        }
    }

    /// Record a one-hop neighbor, mirroring it into our own link state.
    /// Returns false when the neighbor was already known.
    pub fn add_neighbor(&mut self, id: NodeId) -> bool {
        if id == BROADCAST_ID || !self.neighbor_ids.insert(id) {
            return false;
        }
        if let Some(own) = self.link_states.get_mut(&self.node_id) {
            own.neighbor_ids.insert(id);
        }
        true
    }

    /// Drop neighbors that went silent, mirroring into our own link
    /// state.
    pub fn remove_neighbors(&mut self, ids: &IdSet) {
        for id in ids {
            self.neighbor_ids.remove(id);
        }
        if let Some(own) = self.link_states.get_mut(&self.node_id) {
            for id in ids {
                own.neighbor_ids.remove(id);
            }
        }
    }

    /// The stored link states, keyed by owner.
    pub fn link_states(&self) -> &HashMap<NodeId, LinkState> {
        &self.link_states
    }

    /// Mutable access for the routing protocol.
    pub fn link_states_mut(&mut self) -> &mut HashMap<NodeId, LinkState> {
        &mut self.link_states
    }

    /// This node's own link state, once an id is assigned.
    pub fn own_link_state(&self) -> Option<&LinkState> {
        self.link_states.get(&self.node_id)
    }

    /// Mutable access to the node's own link state.
    pub fn own_link_state_mut(&mut self) -> Option<&mut LinkState> {
        self.link_states.get_mut(&self.node_id)
    }

    /// Whether every occupied id has a stored link state.
    pub fn has_full_topology(&self) -> bool {
        self.taken_ids
            .iter()
            .all(|id| self.link_states.contains_key(id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assigning_id_seeds_own_link_state() {
        let mut topo = Topology::new();
        topo.add_neighbor(3);
        topo.assign_node_id(5);

        assert_eq!(topo.node_id(), 5);
        assert!(topo.taken_ids().contains(&5));
        let own = topo.own_link_state().unwrap();
        assert_eq!(own.node_id, 5);
        assert!(own.neighbor_ids.contains(&3));
    }

    #[test]
    fn neighbor_changes_mirror_into_own_link_state() {
        let mut topo = Topology::new();
        topo.assign_node_id(1);
        assert!(topo.add_neighbor(2));
        assert!(!topo.add_neighbor(2));
        assert!(!topo.add_neighbor(BROADCAST_ID));
        assert!(topo.own_link_state().unwrap().neighbor_ids.contains(&2));

        topo.remove_neighbors(&[2].into_iter().collect());
        assert!(!topo.neighbor_ids().contains(&2));
        assert!(!topo.own_link_state().unwrap().neighbor_ids.contains(&2));
    }

    #[test]
    fn full_topology_requires_every_taken_id() {
        let mut topo = Topology::new();
        topo.assign_node_id(1);
        topo.mark_taken(2);
        assert!(!topo.has_full_topology());

        topo.link_states_mut()
            .insert(2, LinkState::new(2, IdSet::new()));
        assert!(topo.has_full_topology());
    }
}
