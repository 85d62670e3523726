//! Scripted transport and fixtures for exercising the retry loop without a
//! network.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use parity_core::cas::Cid;
use parity_core::proof::{BundleInputs, BundleMetadata, BundleOutputs, BundleRequest, EngineInfo};
use parity_core::{create_proof_bundle, ProofBundle};
use tokio::time::Instant;

use crate::envelope::ReplayValidationResponse;
use crate::error::TransportError;
use crate::transport::ReplayTransport;

enum Step {
    Reply(Result<ReplayValidationResponse, TransportError>),
    Hang,
}

/// Replays a fixed script of responses, one per call. Once the script runs
/// out every call fails with a connection error.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    calls: Mutex<Vec<(Instant, Vec<u8>)>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn then_ok(self, valid: bool, bundle_id: &str) -> Self {
        self.push(Step::Reply(Ok(ReplayValidationResponse {
            valid,
            bundle_id: bundle_id.to_string(),
            replay_fingerprint: None,
            merkle_root: None,
            message: (!valid).then(|| "replay diverged".to_string()),
            validator: Some("scripted".to_string()),
        })))
    }

    pub fn then_err(self, err: TransportError) -> Self {
        self.push(Step::Reply(Err(err)))
    }

    /// Next call never answers; the caller's timeout has to fire.
    pub fn then_hang(self) -> Self {
        self.push(Step::Hang)
    }

    fn push(self, step: Step) -> Self {
        if let Ok(mut script) = self.script.lock() {
            script.push_back(step);
        }
        self
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().map(|c| c.len()).unwrap_or(0)
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.calls
            .lock()
            .map(|c| c.iter().map(|(t, _)| *t).collect())
            .unwrap_or_default()
    }

    pub fn bodies(&self) -> Vec<Vec<u8>> {
        self.calls
            .lock()
            .map(|c| c.iter().map(|(_, b)| b.clone()).collect())
            .unwrap_or_default()
    }
}

#[async_trait]
impl ReplayTransport for ScriptedTransport {
    async fn submit(&self, _endpoint: &str, body: Vec<u8>) -> Result<ReplayValidationResponse, TransportError> {
        if let Ok(mut calls) = self.calls.lock() {
            calls.push((Instant::now(), body));
        }
        let step = self.script.lock().ok().and_then(|mut s| s.pop_front());
        match step {
            Some(Step::Reply(reply)) => reply,
            Some(Step::Hang) => {
                tokio::time::sleep(Duration::from_secs(24 * 60 * 60)).await;
                Err(TransportError::Connection("hung".into()))
            }
            None => Err(TransportError::Connection("script exhausted".into())),
        }
    }
}

/// Sealed bundle over fixed artifact CIDs.
pub fn sample_bundle(request_id: &str) -> parity_core::proof::Result<ProofBundle> {
    let cid = |s: &str| Cid::compute(s.as_bytes()).to_string();
    let req = BundleRequest {
        request_id: request_id.to_string(),
        timestamp: Utc
            .with_ymd_and_hms(2026, 10, 16, 12, 0, 0)
            .single()
            .unwrap_or_else(Utc::now),
        inputs: BundleInputs {
            params: cid("params"),
            policy: cid("policy"),
            context: None,
            extras: None,
        },
        outputs: BundleOutputs {
            result: cid("result"),
            transcript: cid("transcript"),
            trace: Some(cid("trace")),
            extras: None,
        },
        engine: EngineInfo::current("native", parity_core::VERSION),
        metadata: BundleMetadata {
            duration_ms: 3,
            algorithm: "robust".to_string(),
            tenant_hash: None,
        },
    };
    create_proof_bundle(req)
}
