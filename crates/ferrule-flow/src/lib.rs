//! ICMP/UDP Flow Table (`spec.md` §4.G): correlates warp-routing datagrams
//! with the flow they belong to, and evicts idle flows.

pub mod key;
pub mod table;

pub use key::FlowKey;
pub use table::{FlowId, FlowTable};
