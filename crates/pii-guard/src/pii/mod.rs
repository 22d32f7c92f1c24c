//! Field-level protection of JSON records.
//!
//! - [`lens`]: parsed field paths and concrete locations inside a record.
//! - [`transform`]: [`PiiTransformer`], which encrypts, hashes, and tokenizes
//!   the fields a set of [`PiiField`](common::PiiField) descriptors names.
//! - [`schema`]: derives those descriptors from `x-pii` annotations in
//!   OpenAPI documents.

pub mod lens;
pub mod schema;
pub mod transform;

pub use lens::{FieldPath, Location};
pub use schema::{parse_openapi, pii_fields_for, resolve_pii_fields};
pub use transform::{PiiTransformer, HASH_SUFFIX, TOKEN_SUFFIX};
