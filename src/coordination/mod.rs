//! Coordination of running nodes into a peer mesh
//!
//! Once processes are up, coordination:
//! 1. Polls every node until it reports its enode address
//! 2. Asks every pair of nodes to peer, falling back to the reverse direction
//!
//! Peering only starts after polling has returned, so enode addresses are
//! never read before they are written.

pub mod mesh;
pub mod readiness;

pub use mesh::{PairOutcome, PeerDirection, PeerMeshBuilder};
pub use readiness::{Readiness, ReadinessPoller};
