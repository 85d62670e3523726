//! Remote replay client with bounded exponential backoff.

use std::sync::Arc;

use parity_core::config::ConfigError;
use parity_core::metrics::METRICS;
use parity_core::obs;
use parity_core::ProofBundle;
use tracing::{debug, info, warn, Instrument};

use crate::config::{RemoteReplayConfig, ENV_REMOTE_ENDPOINT};
use crate::envelope::{ReplayRequestEnvelope, ValidationResult};
use crate::error::{RemoteError, Result, TransportError};
use crate::transport::{HttpTransport, ReplayTransport};

/// Submits proof bundles to an independent validator.
///
/// Failures are recorded and returned as an unsuccessful [`ValidationResult`]
/// unless `fail_on_error` is set. Dropping the `validate` future abandons any
/// remaining attempts.
pub struct RemoteReplayClient {
    config: RemoteReplayConfig,
    transport: Arc<dyn ReplayTransport>,
}

impl RemoteReplayClient {
    pub fn new(config: RemoteReplayConfig, transport: Arc<dyn ReplayTransport>) -> Result<Self> {
        config.validate()?;
        Ok(Self { config, transport })
    }

    /// Client over the HTTP transport.
    pub fn http(config: RemoteReplayConfig) -> Result<Self> {
        Self::new(config, Arc::new(HttpTransport::new()?))
    }

    /// Create a new client from environment variables
    pub fn from_env() -> Result<Self> {
        Self::http(RemoteReplayConfig::from_env()?)
    }

    pub fn config(&self) -> &RemoteReplayConfig {
        &self.config
    }

    pub async fn validate(&self, bundle: &ProofBundle) -> Result<ValidationResult> {
        if !self.config.enabled {
            return Ok(ValidationResult::skipped());
        }
        let span = obs::request_span(&bundle.request_id);
        self.validate_inner(bundle).instrument(span).await
    }

    async fn validate_inner(&self, bundle: &ProofBundle) -> Result<ValidationResult> {
        let endpoint = self
            .config
            .endpoint
            .as_deref()
            .ok_or_else(|| ConfigError::invalid(ENV_REMOTE_ENDPOINT, "", "required when remote validation is enabled"))?;
        let body = ReplayRequestEnvelope::from_bundle(bundle)?.to_bytes()?;

        let mut attempts = 0u32;
        let mut last_error = TransportError::Connection("no attempt made".into());

        for attempt in 0..=self.config.max_retries {
            if attempt > 0 {
                tokio::time::sleep(self.config.retry_delay(attempt - 1)).await;
            }
            attempts += 1;

            let submitted = tokio::time::timeout(self.config.timeout(), self.transport.submit(endpoint, body.clone()))
                .await
                .unwrap_or(Err(TransportError::Timeout(self.config.timeout_ms)));

            match submitted {
                Ok(resp) if resp.valid => {
                    info!(bundle_id = %bundle.bundle_id, attempts, "Remote replay validated");
                    return Ok(ValidationResult {
                        attempted: true,
                        success: true,
                        retries: attempt,
                        response: Some(resp),
                        error: None,
                    });
                }
                Ok(resp) => {
                    // A definitive answer; replaying the same bytes cannot change it.
                    let reason = resp
                        .message
                        .clone()
                        .unwrap_or_else(|| "validator reported invalid".to_string());
                    let err = RemoteError::Rejected {
                        bundle_id: bundle.bundle_id.clone(),
                        reason,
                    };
                    METRICS.inc_remote_validation_failures();
                    obs::emit_remote_validation_failed(&bundle.request_id, attempts, &err);
                    if self.config.fail_on_error {
                        return Err(err);
                    }
                    return Ok(ValidationResult {
                        attempted: true,
                        success: false,
                        retries: attempt,
                        response: Some(resp),
                        error: Some(err.to_string()),
                    });
                }
                Err(e) if e.is_retryable() => {
                    debug!(attempt = attempts, error = %e, "Remote replay attempt failed");
                    last_error = e;
                }
                Err(e) => {
                    warn!(attempt = attempts, error = %e, "Remote replay failed permanently");
                    last_error = e;
                    break;
                }
            }
        }

        let err = RemoteError::Exhausted {
            attempts,
            source: last_error,
        };
        METRICS.inc_remote_validation_failures();
        obs::emit_remote_validation_failed(&bundle.request_id, attempts, &err);
        if self.config.fail_on_error {
            return Err(err);
        }
        Ok(ValidationResult {
            attempted: true,
            success: false,
            retries: attempts.saturating_sub(1),
            response: None,
            error: Some(err.to_string()),
        })
    }
}
