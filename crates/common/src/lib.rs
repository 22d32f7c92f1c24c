//! Shared key records, envelopes, PII descriptors, and errors for `pii-guard` crates.
//!
//! Nothing in this crate touches cryptographic primitives or I/O; it defines
//! the shapes that cross the boundary to the key store and to callers.

pub mod encoding;
pub mod envelope;
pub mod error;
pub mod key;
pub mod pii;

pub use envelope::{EncryptedData, EnvelopeMetadata, PayloadFormat, ENVELOPE_VERSION};
pub use error::{CryptoError, CryptoResult};
pub use key::{
    Algorithm, EncryptionKey, KeyId, KeyInfo, KeyMetadata, KeyOperation, KeyPurpose,
    KeyRestrictions, KeyStatus, KeyType,
};
pub use pii::{Classification, DataType, PiiField, Sensitivity};
