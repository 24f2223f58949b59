//! Majority-proof reconciliation with peer replicas.

pub mod peer;
pub mod sync;

pub use peer::{HeightResponse, HttpPeer, PeerTransport};
pub use sync::{ConsensusSync, Majority, SyncReport, tally};
