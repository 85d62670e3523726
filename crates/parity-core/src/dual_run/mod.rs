//! Dual-run cutover between the native engine and the portable reference.
//!
//! Every request is served by one engine. A sample of requests also runs on
//! the other engine with the same canonical input, and the two determinism
//! fingerprints are compared. The sample rate starts at 100% for any new
//! tenant, engine version or algorithm, tapers linearly with consecutive
//! matches down to a base rate, and snaps back to 100% on a mismatch.

pub mod config;
pub mod events;
pub mod report;
pub mod runner;
pub mod selection;
pub mod state;
pub mod store;

pub use config::{DualRunConfig, DualRunMode};
pub use events::{
    hash_identifier, read_events, BufferedEventSink, ControlPlaneEvent, EventError, EventSink, MemoryEventSink,
    NdjsonEventLog, NullEventSink,
};
pub use report::{json_diff, DiffReport, DiffReportStore, FsDiffReportStore, MemoryDiffReportStore, ReportError};
pub use runner::{ComparisonSummary, CutoverController, ExecutionError, ExecutionOutcome, ExecutionRequest};
pub use selection::{select_engine, Selection, SelectionError, SelectionReason};
pub use state::{sample_draw, SamplingPhase, SamplingState, WorkloadKey};
pub use store::SamplingStore;
