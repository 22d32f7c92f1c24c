//! AWS SDK client bundle for the key store, key wrapping, and pepper lookup.

use anyhow::{Context, Result};
use aws_config::BehaviorVersion;

/// Bundle of AWS SDK clients sharing one resolved configuration.
///
/// All three clients share the same underlying [`aws_config::SdkConfig`] so
/// that credentials are resolved once and reused.
#[derive(Clone, Debug)]
pub struct AwsClients {
    /// KMS client used to wrap and unwrap stored key material.
    pub kms: aws_sdk_kms::Client,
    /// Secrets Manager client used to fetch the pepper.
    pub secretsmanager: aws_sdk_secretsmanager::Client,
    /// S3 client backing the key store.
    pub s3: aws_sdk_s3::Client,
}

impl AwsClients {
    /// Initialise all AWS SDK clients.
    ///
    /// Credentials and region come from the standard AWS provider chain. When
    /// `endpoint_url` is set, every client targets it instead of the public
    /// service endpoints (local emulators, VPC endpoints).
    pub async fn init(endpoint_url: Option<&str>) -> Result<Self> {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(url) = endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let config = loader.load().await;

        let s3 = aws_sdk_s3::Client::from_conf(
            aws_sdk_s3::config::Builder::from(&config)
                // Emulators rarely support virtual-hosted bucket addressing.
                .force_path_style(endpoint_url.is_some())
                .build(),
        );

        Ok(Self {
            kms: aws_sdk_kms::Client::new(&config),
            secretsmanager: aws_sdk_secretsmanager::Client::new(&config),
            s3,
        })
    }

    /// Fetch a string secret (the pepper) from Secrets Manager.
    ///
    /// # Errors
    ///
    /// Returns an error if the call fails or the secret has no string value.
    pub async fn fetch_secret_string(&self, secret_id: &str) -> Result<String> {
        let secret = self
            .secretsmanager
            .get_secret_value()
            .secret_id(secret_id)
            .send()
            .await
            .context("failed to fetch secret from Secrets Manager")?;

        secret
            .secret_string()
            .map(str::to_owned)
            .context("secret must be stored as a string in Secrets Manager")
    }
}
