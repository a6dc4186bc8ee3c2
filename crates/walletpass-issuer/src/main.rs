//! walletpass command-line tool
//!
//! Generates passes with the configuration in the `WALLETPASS_*`
//! environment and verifies signed bundles offline.

use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use openssl::x509::X509;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn, Level};
use tracing_subscriber::FmtSubscriber;

use walletpass_core::{verify_bundle, DigestAlgorithm, PassDefinition, Platform, SerialNumber};
use walletpass_issuer::{GenerateError, IssuerConfig, PassOrchestrator};

#[derive(Parser, Debug)]
#[command(name = "walletpass", version, about = "Generate and verify wallet passes")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Generate a pass and print its artifact and QR URLs as JSON
    Generate {
        /// Pass definition JSON file
        #[arg(long, value_name = "PATH")]
        definition: PathBuf,
        /// Serial number of the pass
        #[arg(long)]
        serial: String,
        /// Target platform (apple or google)
        #[arg(long, env = "WALLETPASS_PLATFORM", default_value = "apple")]
        platform: Platform,
    },
    /// Re-render and publish the QR image for an existing artifact
    RegenerateQr {
        /// Bundle URL or save link to encode
        #[arg(long)]
        artifact_url: String,
        #[arg(long)]
        serial: String,
        #[arg(long, default_value = "apple")]
        platform: Platform,
    },
    /// Verify a signed bundle against trust anchors
    Verify {
        /// Bundle file
        #[arg(long, value_name = "PATH")]
        bundle: PathBuf,
        /// PEM certificate trusted as a root; repeatable
        #[arg(long = "anchor", value_name = "PATH", required = true)]
        anchors: Vec<PathBuf>,
        /// Manifest digest algorithm
        #[arg(long, default_value = "sha1")]
        digest: DigestAlgorithm,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let log_level = env::var("WALLETPASS_LOG_LEVEL")
        .unwrap_or_else(|_| "info".into())
        .parse()
        .unwrap_or(Level::INFO);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(true)
        .with_thread_ids(true)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .context("failed to set tracing subscriber")?;

    match Cli::parse().command {
        Command::Generate {
            definition,
            serial,
            platform,
        } => generate(definition, serial, platform).await,
        Command::RegenerateQr {
            artifact_url,
            serial,
            platform,
        } => regenerate_qr(artifact_url, serial, platform).await,
        Command::Verify {
            bundle,
            anchors,
            digest,
        } => verify(bundle, anchors, digest).await,
    }
}

async fn orchestrator() -> anyhow::Result<PassOrchestrator> {
    let config = IssuerConfig::from_env().context("invalid configuration")?;
    Ok(PassOrchestrator::from_config(&config).await?)
}

fn report(err: GenerateError) -> anyhow::Error {
    if let Some(published) = err.published_artifact() {
        warn!(published_artifact = %published, "Artifact exists; retry with regenerate-qr");
    }
    match err.pass_error() {
        Some(source) => anyhow!(err.clone()).context(format!("disposition: {:?}", source.disposition())),
        None => anyhow!(err),
    }
}

async fn generate(definition: PathBuf, serial: String, platform: Platform) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&definition)
        .await
        .with_context(|| format!("failed to read {}", definition.display()))?;
    let definition = PassDefinition::from_json(&bytes)?;
    let serial = SerialNumber::new(serial)?;
    let orchestrator = orchestrator().await?;

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Interrupt received; stopping after the current step");
            on_signal.cancel();
        }
    });

    let artifact = orchestrator
        .generate_with_cancel(&definition, &serial, platform, &cancel)
        .await
        .map_err(report)?;
    println!("{}", serde_json::to_string_pretty(&artifact)?);
    Ok(())
}

async fn regenerate_qr(artifact_url: String, serial: String, platform: Platform) -> anyhow::Result<()> {
    let serial = SerialNumber::new(serial)?;
    let artifact = orchestrator()
        .await?
        .regenerate_qr(&artifact_url, &serial, platform)
        .await
        .map_err(report)?;
    println!("{}", serde_json::to_string_pretty(&artifact)?);
    Ok(())
}

async fn verify(bundle: PathBuf, anchors: Vec<PathBuf>, digest: DigestAlgorithm) -> anyhow::Result<()> {
    let bytes = tokio::fs::read(&bundle)
        .await
        .with_context(|| format!("failed to read {}", bundle.display()))?;

    let mut trusted = Vec::with_capacity(anchors.len());
    for path in &anchors {
        let pem = tokio::fs::read(path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;
        trusted.push(X509::from_pem(&pem).with_context(|| format!("{} is not a PEM certificate", path.display()))?);
    }

    let verified = verify_bundle(&bytes, digest, &trusted)?;
    let Some(serial) = verified.descriptor.get("serialNumber").and_then(|v| v.as_str()) else {
        bail!("bundle descriptor has no serial number");
    };
    info!(members = verified.members.len(), "Bundle verified");
    println!(
        "{}",
        serde_json::to_string_pretty(&serde_json::json!({
            "serialNumber": serial,
            "members": verified.manifest.entries().map(|(name, _)| name).collect::<Vec<_>>(),
        }))?
    );
    Ok(())
}
