//! Tracing setup: structured JSON logs, with spans exported over OTLP when a
//! collector endpoint is configured.
//!
//! # Telemetry invariants
//!
//! - **No PII or secret material** may appear in any span attribute or log
//!   field: no plaintext, key material, pepper, salts, hashes, or tokens.
//!   Key ids, key types, algorithms, and data types are fine.
//! - Log level is configurable via `LOG_LEVEL` (default: `info`); `RUST_LOG`
//!   overrides it.

pub mod init;

pub use init::{init_telemetry, shutdown_telemetry};
