//! Parity CLI
//!
//! The `parity` command drives the decision core from the shell.
//!
//! ## Commands
//!
//! - `evaluate`: Rank the actions of a decision input
//! - `canon`: Print canonical bytes or the fingerprint of a JSON document
//! - `bundle`: Create, verify and sign proof bundles
//! - `route`: Show which engine the cutover policy would serve from
//! - `dual-run`: Serve requests through the cutover controller
//! - `validate-remote`: Submit a bundle to the remote replay validator

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use futures::future::join_all;
use parity_core::canon::{canonicalize_bytes, sha256_hex};
use parity_core::decision::DecisionEngine;
use parity_core::dual_run::{
    hash_identifier, BufferedEventSink, CutoverController, DualRunConfig, ExecutionRequest, FsDiffReportStore,
    MemoryDiffReportStore, NdjsonEventLog, NullEventSink, SamplingStore,
};
use parity_core::proof::{read_bundle, verify_bundle_value, write_bundle, EngineInfo, ProofBundle, ProofError};
use parity_core::signing::{sign_bundle, verify_bundle_signature, FileKeySigner, SignOptions, SignerRegistry};
use parity_core::telemetry::{init_tracing, verbosity};
use parity_core::{
    prove_decision, DecisionInput, DecisionRun, ErrorEnvelope, FsCasStore, NativeEngine, ParityError,
    PortableEngine,
};
use parity_remote::{RemoteError, RemoteReplayClient, RemoteReplayConfig};
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

#[derive(Parser)]
#[command(name = "parity")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Deterministic decision engine with proof bundles and dual-run cutover", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true, env = "PARITY_LOG_JSON")]
    json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Rank the actions of a decision input
    Evaluate {
        /// Decision input JSON file (`-` for stdin)
        input: PathBuf,

        /// Engine implementation to run
        #[arg(short, long, value_enum, default_value = "portable")]
        engine: EngineChoice,
    },

    /// Print the canonical form of a JSON document
    Canon {
        /// JSON file (`-` for stdin)
        input: PathBuf,

        /// Print the SHA-256 fingerprint instead of the bytes
        #[arg(short, long)]
        fingerprint: bool,
    },

    /// Create, verify and sign proof bundles
    Bundle {
        #[command(subcommand)]
        action: BundleAction,
    },

    /// Show which engine the cutover policy would serve from
    Route,

    /// Serve decision requests through the cutover controller
    DualRun {
        /// Decision input JSON file (`-` for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Tenant the requests belong to; only its hash is recorded
        #[arg(long, env = "PARITY_TENANT", default_value = "default")]
        tenant: String,

        /// Algorithm label of the workload
        #[arg(long, default_value = "robust")]
        algorithm: String,

        /// Number of concurrent requests to serve
        #[arg(short = 'n', long, default_value = "1")]
        requests: usize,

        /// Enable sampling even if PARITY_DUAL_RUN is unset
        #[arg(long)]
        enable: bool,

        /// Seal every served result into a proof bundle under this CAS directory
        #[arg(long)]
        cas_dir: Option<PathBuf>,
    },

    /// Submit a proof bundle to the remote replay validator
    ValidateRemote {
        /// Bundle file
        bundle: PathBuf,

        /// Validator URL (overrides PARITY_REMOTE_ENDPOINT and enables validation)
        #[arg(long)]
        endpoint: Option<String>,

        /// Exit non-zero if the validator cannot be reached or rejects the bundle
        #[arg(long)]
        fail_on_error: bool,
    },
}

#[derive(Subcommand)]
enum BundleAction {
    /// Evaluate an input and seal the run into a proof bundle
    Create {
        /// Decision input JSON file (`-` for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Where to write the bundle
        #[arg(short, long)]
        output: PathBuf,

        /// CAS storage directory
        #[arg(long, default_value = ".parity/cas")]
        cas_dir: PathBuf,

        /// Request id (generated if omitted)
        #[arg(long)]
        request_id: Option<String>,

        #[arg(short, long, value_enum, default_value = "portable")]
        engine: EngineChoice,

        #[arg(long, default_value = "robust")]
        algorithm: String,

        /// Tenant to record as a hash in the bundle metadata
        #[arg(long)]
        tenant: Option<String>,
    },

    /// Check a bundle's Merkle root, bundle id and CID formats
    Verify {
        /// Bundle file
        bundle: PathBuf,

        /// Also check the detached signature
        #[arg(long)]
        signature: bool,

        /// Key file for `file-key` signatures
        #[arg(long, env = "PARITY_SIGNING_KEY_FILE")]
        key_file: Option<PathBuf>,
    },

    /// Attach detached signature metadata to a bundle
    Sign {
        /// Bundle file
        bundle: PathBuf,

        /// Where to write the signed bundle
        #[arg(short, long)]
        output: PathBuf,

        /// Signer plugin name
        #[arg(long, default_value = "dev")]
        signer: String,

        /// Key file; registers and selects the `file-key` signer
        #[arg(long, env = "PARITY_SIGNING_KEY_FILE")]
        key_file: Option<PathBuf>,

        /// Override the signer's key id
        #[arg(long)]
        key_id: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum EngineChoice {
    Native,
    Portable,
}

impl EngineChoice {
    fn engine(self) -> Arc<dyn DecisionEngine> {
        match self {
            EngineChoice::Native => Arc::new(NativeEngine::new()),
            EngineChoice::Portable => Arc::new(PortableEngine::new()),
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing(cli.json, verbosity(cli.verbose));

    if let Err(err) = run(cli.command).await {
        report_error(&err);
        std::process::exit(1);
    }
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Evaluate { input, engine } => cmd_evaluate(&input, engine),
        Commands::Canon { input, fingerprint } => cmd_canon(&input, fingerprint),
        Commands::Bundle { action } => match action {
            BundleAction::Create {
                input,
                output,
                cas_dir,
                request_id,
                engine,
                algorithm,
                tenant,
            } => cmd_bundle_create(
                &input,
                &output,
                &cas_dir,
                request_id,
                engine,
                &algorithm,
                tenant.as_deref(),
            ),
            BundleAction::Verify {
                bundle,
                signature,
                key_file,
            } => cmd_bundle_verify(&bundle, signature, key_file.as_deref()),
            BundleAction::Sign {
                bundle,
                output,
                signer,
                key_file,
                key_id,
            } => cmd_bundle_sign(&bundle, &output, &signer, key_file.as_deref(), key_id),
        },
        Commands::Route => cmd_route(),
        Commands::DualRun {
            input,
            tenant,
            algorithm,
            requests,
            enable,
            cas_dir,
        } => cmd_dual_run(&input, &tenant, &algorithm, requests, enable, cas_dir.as_deref()).await,
        Commands::ValidateRemote {
            bundle,
            endpoint,
            fail_on_error,
        } => cmd_validate_remote(&bundle, endpoint, fail_on_error).await,
    }
}

/// Wrap a core error so `report_error` can recover its envelope.
fn parity<E: Into<ParityError>>(err: E) -> anyhow::Error {
    anyhow::Error::new(err.into())
}

fn report_error(err: &anyhow::Error) {
    let envelope = if let Some(e) = err.downcast_ref::<ParityError>() {
        Some(e.to_envelope())
    } else {
        err.downcast_ref::<RemoteError>().map(|e| {
            let kind = e.kind();
            ErrorEnvelope {
                code: kind.code().to_string(),
                message: e.to_string(),
                details: serde_json::json!({
                    "kind": kind,
                    "retryable": kind.is_retryable(),
                    "severity": kind.severity(),
                }),
            }
        })
    };

    match envelope.and_then(|env| serde_json::to_string(&env).ok()) {
        Some(line) => eprintln!("{line}"),
        None => eprintln!("error: {err:#}"),
    }
}

fn read_source(path: &Path) -> Result<Vec<u8>> {
    if path == Path::new("-") {
        let mut buf = Vec::new();
        std::io::Read::read_to_end(&mut std::io::stdin(), &mut buf).context("Failed to read stdin")?;
        return Ok(buf);
    }
    std::fs::read(path).context(format!("Failed to read {:?}", path))
}

fn read_input(path: &Path) -> Result<DecisionInput> {
    let raw = read_source(path)?;
    serde_json::from_slice(&raw).map_err(parity)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Rank the actions of a decision input
fn cmd_evaluate(path: &Path, choice: EngineChoice) -> Result<()> {
    let input = read_input(path)?;
    let engine = choice.engine();
    let output = engine.evaluate(&input).map_err(parity)?;
    info!(
        engine = engine.id(),
        fingerprint = %output.determinism_fingerprint,
        "evaluation complete"
    );
    print_json(&output)
}

fn cmd_canon(path: &Path, fingerprint: bool) -> Result<()> {
    let raw = read_source(path)?;
    let bytes = canonicalize_bytes(&raw).map_err(parity)?;
    if fingerprint {
        println!("{}", sha256_hex(&bytes));
    } else {
        println!("{}", String::from_utf8(bytes)?);
    }
    Ok(())
}

/// Evaluate an input and seal the run into a proof bundle
fn cmd_bundle_create(
    input_path: &Path,
    output: &Path,
    cas_dir: &Path,
    request_id: Option<String>,
    choice: EngineChoice,
    algorithm: &str,
    tenant: Option<&str>,
) -> Result<()> {
    let input = read_input(input_path)?;
    let engine = choice.engine();
    let cas = FsCasStore::new(cas_dir).map_err(parity)?;
    let request_id = request_id.unwrap_or_else(|| Uuid::new_v4().to_string());

    let started = Instant::now();
    let result = engine.evaluate(&input).map_err(parity)?;
    let duration_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let bundle = prove_decision(
        &cas,
        DecisionRun {
            request_id: &request_id,
            engine: EngineInfo::current(engine.id(), engine.version()),
            algorithm,
            input: &input,
            output: &result,
            duration_ms,
            tenant_hash: tenant.map(hash_identifier),
        },
    )
    .map_err(parity)?;
    write_bundle(output, &bundle).map_err(parity)?;

    println!("Bundle:      {}", bundle.bundle_id);
    println!("Merkle root: {}", bundle.merkle_root);
    println!("Request:     {}", bundle.request_id);
    println!("Written to:  {:?}", output);
    Ok(())
}

fn registry_with_key(key_file: Option<&Path>) -> Result<(SignerRegistry, Option<Arc<FileKeySigner>>)> {
    let mut registry = SignerRegistry::with_defaults();
    let file_signer = match key_file {
        Some(path) => {
            let signer = Arc::new(FileKeySigner::from_file(path).map_err(parity)?);
            registry.register(signer.clone());
            Some(signer)
        }
        None => None,
    };
    Ok((registry, file_signer))
}

/// Check a bundle's Merkle root, bundle id and CID formats
fn cmd_bundle_verify(path: &Path, check_signature: bool, key_file: Option<&Path>) -> Result<()> {
    let raw = read_source(path)?;
    let value: serde_json::Value = serde_json::from_slice(&raw).map_err(parity)?;
    let report = verify_bundle_value(&value);

    let signature_valid = if check_signature && report.valid {
        let bundle: ProofBundle = serde_json::from_value(value).map_err(parity)?;
        let (registry, _) = registry_with_key(key_file)?;
        Some(verify_bundle_signature(&bundle, &registry).map_err(parity)?)
    } else {
        None
    };

    print_json(&serde_json::json!({
        "valid": report.valid,
        "errors": report.errors,
        "warnings": report.warnings,
        "signatureValid": signature_valid,
    }))?;

    if !report.valid {
        return Err(parity(ProofError::Inconsistent(report.errors)));
    }
    if signature_valid == Some(false) {
        bail!("bundle signature does not verify");
    }
    Ok(())
}

/// Attach detached signature metadata to a bundle
fn cmd_bundle_sign(
    path: &Path,
    output: &Path,
    signer_name: &str,
    key_file: Option<&Path>,
    key_id: Option<String>,
) -> Result<()> {
    let bundle = read_bundle(path).map_err(parity)?;
    let (registry, file_signer) = registry_with_key(key_file)?;
    let signer = match file_signer {
        Some(signer) => signer as Arc<dyn parity_core::Signer>,
        None => registry.get(signer_name).map_err(parity)?,
    };

    let opts = SignOptions {
        key_id,
        ..SignOptions::default()
    };
    let signed = sign_bundle(&bundle, signer.as_ref(), &opts).map_err(parity)?;
    write_bundle(output, &signed).map_err(parity)?;

    if let Some(sig) = &signed.signature {
        println!("Signed by {} (key {})", sig.signer_plugin, sig.key_id);
    }
    println!("Written to: {:?}", output);
    Ok(())
}

fn cmd_route() -> Result<()> {
    let config = DualRunConfig::from_env().map_err(parity)?;
    let controller = CutoverController::new(
        config,
        Arc::new(NativeEngine::new()),
        Arc::new(PortableEngine::new()),
        Arc::new(SamplingStore::new()),
        Arc::new(MemoryDiffReportStore::new()),
        Arc::new(NullEventSink),
    )
    .map_err(parity)?;

    let selection = controller
        .route()
        .map_err(|e| parity(parity_core::ExecutionError::from(e)))?;
    let engine = if selection.index == 0 { "native" } else { "portable" };
    print_json(&serde_json::json!({
        "engine": engine,
        "selection": selection,
        "dualRun": controller.config().enabled,
    }))
}

#[derive(Serialize, Default)]
#[serde(rename_all = "camelCase")]
struct DualRunSummary {
    requests: usize,
    succeeded: usize,
    failed: usize,
    sampled: usize,
    mismatches: usize,
    shadow_failures: usize,
    served_by: BTreeMap<String, usize>,
    rolled_back: bool,
    bundles: Vec<String>,
}

/// Serve decision requests through the cutover controller
async fn cmd_dual_run(
    input_path: &Path,
    tenant: &str,
    algorithm: &str,
    requests: usize,
    enable: bool,
    cas_dir: Option<&Path>,
) -> Result<()> {
    let input = read_input(input_path)?;
    let mut config = DualRunConfig::from_env().map_err(parity)?;
    if enable {
        config = config.with_enabled(true);
    }

    let log = Arc::new(NdjsonEventLog::open(&config.event_log).map_err(parity)?);
    let (sink, writer) = BufferedEventSink::new(log, 1024);
    let reports = Arc::new(FsDiffReportStore::new(&config.diff_report_dir).map_err(parity)?);
    info!(
        diff_reports = ?config.diff_report_dir,
        event_log = ?config.event_log,
        sampling = config.enabled,
        "dual-run controller ready"
    );

    let mut controller = CutoverController::new(
        config,
        Arc::new(NativeEngine::new()),
        Arc::new(PortableEngine::new()),
        Arc::new(SamplingStore::new()),
        reports,
        Arc::new(sink),
    )
    .map_err(parity)?;
    if let Some(dir) = cas_dir {
        controller = controller.with_cas(Arc::new(FsCasStore::new(dir).map_err(parity)?));
    }

    let outcomes = join_all((0..requests).map(|_| {
        controller.execute(ExecutionRequest {
            request_id: Uuid::new_v4().to_string(),
            tenant_id: tenant.to_string(),
            algorithm: algorithm.to_string(),
            input: input.clone(),
        })
    }))
    .await;

    let mut summary = DualRunSummary {
        requests,
        rolled_back: controller.is_rolled_back(),
        ..DualRunSummary::default()
    };
    let mut first_error = None;
    for outcome in outcomes {
        match outcome {
            Ok(out) => {
                summary.succeeded += 1;
                *summary.served_by.entry(out.engine).or_default() += 1;
                if out.sampled {
                    summary.sampled += 1;
                }
                match &out.comparison {
                    Some(c) if c.secondary_error.is_some() => summary.shadow_failures += 1,
                    Some(c) if !c.matched => summary.mismatches += 1,
                    _ => {}
                }
                if let Some(bundle) = out.bundle {
                    summary.bundles.push(bundle.bundle_id);
                }
            }
            Err(err) => {
                summary.failed += 1;
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
    }

    // Dropping the controller closes the event queue so the writer can drain.
    drop(controller);
    writer.await.context("event writer task failed")?;

    print_json(&summary)?;
    match first_error {
        Some(err) if summary.succeeded == 0 => Err(parity(err)),
        _ => Ok(()),
    }
}

/// Submit a proof bundle to the remote replay validator
async fn cmd_validate_remote(path: &Path, endpoint: Option<String>, fail_on_error: bool) -> Result<()> {
    let bundle = read_bundle(path).map_err(parity)?;

    let mut config = RemoteReplayConfig::from_env().map_err(parity)?;
    if let Some(endpoint) = endpoint {
        config.enabled = true;
        config.endpoint = Some(endpoint);
    }
    if fail_on_error {
        config = config.with_fail_on_error(true);
    }
    if !config.enabled {
        bail!("remote validation is disabled; set PARITY_REMOTE_VALIDATION=true or pass --endpoint");
    }

    let client = RemoteReplayClient::http(config)?;
    let result = client.validate(&bundle).await?;
    print_json(&result)
}
