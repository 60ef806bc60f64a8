//! Ingress Router and Orchestrator (`spec.md` §4.E, §4.F): matches requests
//! to ingress rules and holds the currently active `RuleSet` behind an
//! `ArcSwap` for lock-free reads and whole-table hot-swap.

pub mod ingress_router;
pub mod orchestrator;
pub mod rules;

pub use ingress_router::{IngressRouter, RequestIdentity};
pub use orchestrator::{Orchestrator, RejectionSink, DEFAULT_MAX_INGRESS_RULES};
pub use rules::{
    BastionTarget, HostnamePattern, IngressRule, OriginRequestDefaults, RuleSet, ServiceDescriptor,
    WarpRoutingConfig,
};
