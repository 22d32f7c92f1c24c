//! `key-rotator`: keeps the key store's encryption keys fresh.
//!
//! Startup sequence:
//! 1. Load and validate [`Config`] from environment variables.
//! 2. Initialise the telemetry pipeline.
//! 3. Initialise AWS SDK clients.
//! 4. Resolve the hashing pepper, from Secrets Manager if not set directly.
//! 5. Build the S3 key store and the [`DataProtection`] service, bootstrapping
//!    missing encryption keys.
//! 6. Run background rotation until SIGINT, then flush and exit.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio_util::sync::CancellationToken;
use tracing::info;

use pii_guard::aws::AwsClients;
use pii_guard::keys::{SecretBytes, SystemClock};
use pii_guard::store::S3KeyStore;
use pii_guard::{telemetry, Config, DataProtection};

#[tokio::main]
async fn main() -> Result<()> {
    // -----------------------------------------------------------------------
    // 1. Configuration
    // -----------------------------------------------------------------------
    let mut cfg = Config::from_env().map_err(|e| {
        // Telemetry is not yet up; write to stderr directly.
        eprintln!("ERROR: configuration invalid: {e:#}");
        e
    })?;

    // -----------------------------------------------------------------------
    // 2. Telemetry
    // -----------------------------------------------------------------------
    telemetry::init_telemetry(cfg.otel_exporter_otlp_endpoint.as_deref(), &cfg.log_level)?;
    info!(
        version = env!("CARGO_PKG_VERSION"),
        rotation_period_days = cfg.key_rotation_period_days,
        check_interval_secs = cfg.key_rotation_check_interval_secs,
        "key-rotator starting"
    );

    // -----------------------------------------------------------------------
    // 3. AWS clients
    // -----------------------------------------------------------------------
    let aws = AwsClients::init(cfg.aws_endpoint_url.as_deref()).await?;

    // -----------------------------------------------------------------------
    // 4. Pepper
    // -----------------------------------------------------------------------
    if cfg.hash_pepper.is_none() {
        let arn = cfg
            .pepper_secret_arn
            .as_deref()
            .context("PEPPER_SECRET_ARN is required when HASH_PEPPER is not set")?;
        let pepper = aws.fetch_secret_string(arn).await?;
        anyhow::ensure!(!pepper.is_empty(), "pepper secret is empty");
        cfg.hash_pepper = Some(SecretBytes::from(pepper));
        info!("pepper loaded from Secrets Manager");
    }

    // -----------------------------------------------------------------------
    // 5. Key store and service
    // -----------------------------------------------------------------------
    let bucket = cfg
        .key_store_bucket
        .clone()
        .context("KEY_STORE_BUCKET is required")?;
    let store = S3KeyStore::new(
        &aws,
        bucket,
        cfg.key_store_prefix.clone(),
        cfg.key_wrap_kms_key_id.clone(),
    );
    let protection = DataProtection::new(&cfg, Arc::new(store), Arc::new(SystemClock))
        .context("failed to build data protection service")?;
    protection
        .initialize()
        .await
        .context("failed to initialise key index")?;

    // -----------------------------------------------------------------------
    // 6. Background rotation
    // -----------------------------------------------------------------------
    let shutdown = CancellationToken::new();
    let rotation = protection.spawn_rotation(shutdown.clone());

    tokio::signal::ctrl_c()
        .await
        .context("failed to listen for shutdown signal")?;
    info!("shutdown requested");
    shutdown.cancel();
    rotation.await.context("rotation task panicked")?;

    telemetry::shutdown_telemetry();
    Ok(())
}
