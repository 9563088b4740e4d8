//! larksim - discrete event network simulator for larknet protocol
//! testing.
//!
//! Simulates the shared half-duplex audio channel deterministically: a
//! priority queue of `(time, sequence)` events drives every node's
//! sans-io handlers directly, with no real-time delays. Transmissions
//! occupy the air for a size-proportional duration, raise BUSY at
//! every hearing peer, and are destroyed by overlap — so the
//! protocol's carrier-sense pacing, retry budgets, and liveness timers
//! run against the medium they were designed for.
//!
//! # Example
//!
//! ```
//! use larksim::ScenarioBuilder;
//! use larknet::Duration;
//!
//! let result = ScenarioBuilder::new(2)
//!     .with_seed(42)
//!     .run_for(Duration::from_secs(30));
//! assert!(result.converged());
//! ```

pub mod event;
pub mod metrics;
pub mod node;
pub mod scenario;
pub mod sim;
pub mod topology;

pub use event::{Event, ScenarioAction, ScheduledEvent};
pub use metrics::{NetSnapshot, SimMetrics, SimulationResult};
pub use node::{NodeTrace, SimNode};
pub use scenario::ScenarioBuilder;
pub use sim::Simulator;
pub use topology::{Link, Topology};
