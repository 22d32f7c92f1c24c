//! Key lifecycle: generation, caching, rotation, and revocation.
//!
//! # Lifecycle
//!
//! 1. [`KeyManager::generate_key`] creates a key, makes it the active key
//!    for its `(type, purpose)` pair, and deprecates the key it replaces.
//! 2. Encryptions without a pinned key id use the active key of the
//!    classification's key type.
//! 3. [`KeyManager::rotate_key`] (or the background [`rotation_task`]) creates
//!    a successor and deprecates the old key. Deprecated keys decrypt forever
//!    but never encrypt again.
//! 4. [`KeyManager::revoke_key`] disables a key for both directions.
//!
//! Records are never deleted.
//!
//! # Security invariants
//!
//! - Key material is zeroed on drop and never logged.
//! - [`common::KeyInfo`] is the only view handed to administrators.

pub mod cache;
pub mod clock;
pub mod generate;
pub mod manager;
pub mod material;
pub mod rotation;

pub use cache::KeyCache;
pub use clock::{Clock, ManualClock, SystemClock};
pub use generate::KeyOptions;
pub use manager::{KeyManager, KeyManagerSettings, RotationReport};
pub use material::{KeyMaterial, LoadedKey, SecretBytes};
pub use rotation::rotation_task;
