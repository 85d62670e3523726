//! Parity Remote
//!
//! Submits proof bundles to an external validator for independent replay.
//! The request envelope is a canonical projection of the bundle, and
//! submission retries with capped exponential backoff.

pub mod client;
pub mod config;
pub mod envelope;
pub mod error;
pub mod fakes;
pub mod transport;

pub use client::RemoteReplayClient;
pub use config::RemoteReplayConfig;
pub use envelope::{ReplayRequestEnvelope, ReplayValidationResponse, ValidationResult};
pub use error::{RemoteError, Result, TransportError};
pub use transport::{HttpTransport, ReplayTransport};
