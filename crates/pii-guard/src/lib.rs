//! `pii-guard`: field-level encryption, hashing, and tokenization of personal
//! data, with versioned key management.
//!
//! Most callers only need [`DataProtection`], built from a [`Config`], a
//! [`store::KeyStore`], and a [`keys::Clock`].

pub mod aws;
pub mod config;
pub mod crypto;
pub mod hashing;
pub mod keys;
pub mod pii;
pub mod service;
pub mod store;
pub mod telemetry;
pub mod tokenize;

pub use config::Config;
pub use service::DataProtection;
