//! Physical connectivity between simulated nodes.
//!
//! Links describe who can hear whom on the shared channel; every node
//! still contends for the same air. Nodes are addressed by spawn index.

use hashbrown::HashMap;

/// Properties of one bidirectional link.
#[derive(Debug, Clone)]
pub struct Link {
    /// Probability that a frame on this link is lost.
    pub loss_rate: f64,
    /// Whether the link currently carries anything.
    pub active: bool,
}

impl Default for Link {
    fn default() -> Self {
        Self {
            loss_rate: 0.0,
            active: true,
        }
    }
}

impl Link {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_loss_rate(mut self, rate: f64) -> Self {
        self.loss_rate = rate.clamp(0.0, 1.0);
        self
    }
}

/// The link graph of the simulated network.
#[derive(Debug, Clone, Default)]
pub struct Topology {
    links: HashMap<(usize, usize), Link>,
}

impl Topology {
    /// No links at all.
    pub fn new() -> Self {
        Self::default()
    }

    /// Every pair of the first `count` nodes in range of each other.
    pub fn fully_connected(count: usize) -> Self {
        let mut topo = Self::new();
        for a in 0..count {
            for b in a + 1..count {
                topo.add_link(a, b, Link::default());
            }
        }
        topo
    }

    /// Nodes in a line, each hearing only its immediate neighbors.
    pub fn chain(count: usize) -> Self {
        let mut topo = Self::new();
        for a in 1..count {
            topo.add_link(a - 1, a, Link::default());
        }
        topo
    }

    /// Node 0 in range of everyone, spokes deaf to each other.
    pub fn star(count: usize) -> Self {
        let mut topo = Self::new();
        for spoke in 1..count {
            topo.add_link(0, spoke, Link::default());
        }
        topo
    }

    /// Add one bidirectional link.
    pub fn add_link(&mut self, a: usize, b: usize, link: Link) {
        self.links.insert(Self::key(a, b), link);
    }

    /// The link between two nodes, if one exists.
    pub fn get_link(&self, a: usize, b: usize) -> Option<&Link> {
        self.links.get(&Self::key(a, b))
    }

    /// Mutable access to one link.
    pub fn get_link_mut(&mut self, a: usize, b: usize) -> Option<&mut Link> {
        self.links.get_mut(&Self::key(a, b))
    }

    /// Whether `a` currently hears `b`.
    pub fn is_connected(&self, a: usize, b: usize) -> bool {
        a != b && self.get_link(a, b).is_some_and(|link| link.active)
    }

    /// Everyone `node` currently hears, in index order.
    pub fn neighbors(&self, node: usize) -> Vec<usize> {
        let mut peers: Vec<usize> = self
            .links
            .iter()
            .filter(|(_, link)| link.active)
            .filter_map(|(&(a, b), _)| {
                if a == node {
                    Some(b)
                } else if b == node {
                    Some(a)
                } else {
                    None
                }
            })
            .collect();
        peers.sort_unstable();
        peers
    }

    /// Disable every link crossing between groups.
    pub fn partition(&mut self, groups: &[Vec<usize>]) {
        for (&(a, b), link) in self.links.iter_mut() {
            let group_of_a = groups.iter().position(|g| g.contains(&a));
            let group_of_b = groups.iter().position(|g| g.contains(&b));
            if group_of_a != group_of_b {
                link.active = false;
            }
        }
    }

    /// Re-enable every link.
    pub fn heal(&mut self) {
        for link in self.links.values_mut() {
            link.active = true;
        }
    }

    fn key(a: usize, b: usize) -> (usize, usize) {
        if a < b {
            (a, b)
        } else {
            (b, a)
        }
    }
}
