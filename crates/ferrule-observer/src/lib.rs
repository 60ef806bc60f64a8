//! Observer, Readiness exporter and Diagnostic Collector (`spec.md` §4.J,
//! §4.K): the non-blocking event sink connection lifecycle fans out
//! through, and the two things that read it.

pub mod diagnostics;
pub mod event;
pub mod observer;
pub mod readiness;

pub use diagnostics::{ConnectionSnapshot, DiagnosticCollector, DiagnosticSnapshot, DISCLOSABLE_FLAGS};
pub use event::Event;
pub use observer::Observer;
pub use readiness::ReadinessExporter;
