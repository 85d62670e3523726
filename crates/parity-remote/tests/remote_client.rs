//! Retry and timeout behaviour of the remote replay client against a
//! scripted transport on a paused clock.

use std::sync::Arc;
use std::time::Duration;

use parity_core::metrics::METRICS;
use parity_remote::fakes::{sample_bundle, ScriptedTransport};
use parity_remote::{RemoteError, RemoteReplayClient, RemoteReplayConfig, ReplayRequestEnvelope, TransportError};
use tokio::time::Instant;
use tracing_test::traced_test;

const ENDPOINT: &str = "https://validator.test/replay";

fn unavailable() -> TransportError {
    TransportError::Status {
        status: 503,
        body: "busy".into(),
    }
}

fn client(config: RemoteReplayConfig, transport: &Arc<ScriptedTransport>) -> RemoteReplayClient {
    RemoteReplayClient::new(config, transport.clone()).unwrap()
}

#[tokio::test(start_paused = true)]
async fn succeeds_after_transient_failures() {
    let bundle = sample_bundle("req-retry-ok").unwrap();
    let transport = Arc::new(
        ScriptedTransport::new()
            .then_err(unavailable())
            .then_err(TransportError::Connection("reset".into()))
            .then_ok(true, &bundle.bundle_id),
    );
    let client = client(RemoteReplayConfig::new(ENDPOINT), &transport);

    let start = Instant::now();
    let result = client.validate(&bundle).await.unwrap();

    assert!(result.attempted);
    assert!(result.success);
    assert_eq!(result.retries, 2);
    assert_eq!(result.response.unwrap().bundle_id, bundle.bundle_id);
    assert_eq!(transport.call_count(), 3);
    // 100ms then 200ms of backoff.
    assert_eq!(start.elapsed(), Duration::from_millis(300));
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn exhaustion_is_bounded_and_recovered_locally() {
    let bundle = sample_bundle("req-retry-exhausted").unwrap();
    let transport = Arc::new(ScriptedTransport::new());
    let config = RemoteReplayConfig::new(ENDPOINT);
    let max_retries = config.max_retries;
    let max_delay = config.max_retry_delay_ms;
    let client = client(config, &transport);
    let failures_before = METRICS.remote_validation_failures();

    let start = Instant::now();
    let result = client.validate(&bundle).await.unwrap();
    let elapsed = start.elapsed();

    assert!(result.attempted);
    assert!(!result.success);
    assert_eq!(result.retries, max_retries);
    assert!(result.error.unwrap().contains("4 attempt(s)"));
    assert_eq!(transport.call_count() as u32, max_retries + 1);
    assert_eq!(elapsed, Duration::from_millis(100 + 200 + 400));
    assert!(elapsed <= Duration::from_millis(max_delay * u64::from(max_retries)));
    assert!(METRICS.remote_validation_failures() > failures_before);
    assert!(logs_contain("remote.validation_failed"));
}

#[tokio::test(start_paused = true)]
async fn backoff_is_capped() {
    let transport = Arc::new(ScriptedTransport::new());
    let config = RemoteReplayConfig::new(ENDPOINT)
        .with_max_retries(5)
        .with_retry_delays(100, 250);
    let client = client(config, &transport);

    client.validate(&sample_bundle("req-cap").unwrap()).await.unwrap();

    let times = transport.call_times();
    let gaps: Vec<u128> = times.windows(2).map(|w| (w[1] - w[0]).as_millis()).collect();
    assert_eq!(gaps, [100, 200, 250, 250, 250]);
}

#[tokio::test(start_paused = true)]
async fn hung_attempt_times_out_and_retries() {
    let bundle = sample_bundle("req-hang").unwrap();
    let transport = Arc::new(ScriptedTransport::new().then_hang().then_ok(true, &bundle.bundle_id));
    let client = client(RemoteReplayConfig::new(ENDPOINT).with_timeout_ms(1_000), &transport);

    let start = Instant::now();
    let result = client.validate(&bundle).await.unwrap();

    assert!(result.success);
    assert_eq!(result.retries, 1);
    assert_eq!(start.elapsed(), Duration::from_millis(1_100));
}

#[tokio::test(start_paused = true)]
async fn fail_on_error_propagates_a_remote_error() {
    let transport = Arc::new(ScriptedTransport::new());
    let config = RemoteReplayConfig::new(ENDPOINT)
        .with_max_retries(1)
        .with_fail_on_error(true);
    let client = client(config, &transport);

    let err = client.validate(&sample_bundle("req-closed").unwrap()).await.unwrap_err();
    match &err {
        RemoteError::Exhausted { attempts, .. } => assert_eq!(*attempts, 2),
        other => panic!("unexpected error: {other}"),
    }
    assert_eq!(err.kind(), parity_core::ErrorKind::RemoteValidation);
}

#[tokio::test(start_paused = true)]
async fn invalid_verdict_is_not_retried() {
    let bundle = sample_bundle("req-invalid").unwrap();
    let transport = Arc::new(ScriptedTransport::new().then_ok(false, &bundle.bundle_id));
    let lenient = client(RemoteReplayConfig::new(ENDPOINT), &transport);

    let result = lenient.validate(&bundle).await.unwrap();
    assert!(result.attempted);
    assert!(!result.success);
    assert_eq!(result.retries, 0);
    assert!(result.error.unwrap().contains("replay diverged"));
    assert_eq!(transport.call_count(), 1);

    let transport = Arc::new(ScriptedTransport::new().then_ok(false, &bundle.bundle_id));
    let strict = RemoteReplayConfig::new(ENDPOINT).with_fail_on_error(true);
    let err = client(strict, &transport).validate(&bundle).await.unwrap_err();
    assert!(matches!(err, RemoteError::Rejected { .. }));
}

#[tokio::test(start_paused = true)]
async fn client_errors_stop_early() {
    let transport = Arc::new(ScriptedTransport::new().then_err(TransportError::Status {
        status: 400,
        body: "bad envelope".into(),
    }));
    let client = client(RemoteReplayConfig::new(ENDPOINT), &transport);

    let start = Instant::now();
    let result = client.validate(&sample_bundle("req-400").unwrap()).await.unwrap();
    assert!(!result.success);
    assert_eq!(result.retries, 0);
    assert_eq!(transport.call_count(), 1);
    assert_eq!(start.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn every_attempt_sends_the_same_envelope() {
    let bundle = sample_bundle("req-bytes").unwrap();
    let transport = Arc::new(
        ScriptedTransport::new()
            .then_err(TransportError::Timeout(5))
            .then_ok(true, &bundle.bundle_id),
    );
    client(RemoteReplayConfig::new(ENDPOINT), &transport)
        .validate(&bundle)
        .await
        .unwrap();

    let expected = ReplayRequestEnvelope::from_bundle(&bundle).unwrap().to_bytes().unwrap();
    let bodies = transport.bodies();
    assert_eq!(bodies.len(), 2);
    assert!(bodies.iter().all(|b| *b == expected));
}
