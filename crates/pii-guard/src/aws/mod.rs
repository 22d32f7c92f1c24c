//! AWS SDK client initialisation for S3, KMS, and Secrets Manager.
//!
//! S3 holds the key records, KMS optionally wraps their key material, and
//! Secrets Manager optionally supplies the hashing pepper.

pub mod clients;

pub use clients::AwsClients;
