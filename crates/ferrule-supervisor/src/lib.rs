//! Connection Worker (`spec.md` §4.H), Supervisor (`spec.md` §4.I) and the
//! public-edge bootstrap RPC (`spec.md` §4.L): the crate that wires every
//! other `ferrule-*` crate together into one running connector.

pub mod bootstrap;
pub mod config;
pub mod datagram;
pub mod dispatch;
pub mod supervisor;
pub mod worker;

pub use config::{SupervisorConfig, WorkerConfig};
pub use supervisor::{SharedResources, Supervisor};
pub use worker::{ConnectionWorker, WorkerCommand};
