//! Core domain types and shared logic for HyperFS.
//!
//! This crate defines the canonical data model used across all other crates:
//! - Content digests and incremental hashing
//! - Node name rules and conflict-rename variants
//! - Configuration types

pub mod config;
pub mod digest;
pub mod error;
pub mod name;

pub use config::{AppConfig, MetadataConfig, ServerConfig, StorageConfig};
pub use digest::{ContentDigest, DigestHasher};
pub use error::{Error, Result};
pub use name::{ConflictStrategy, numbered_variant, validate_name};

/// Maximum aggregated body size for JSON control requests: 6.5 MiB.
pub const MAX_CONTROL_BODY_SIZE: usize = 6 * 1024 * 1024 + 512 * 1024;

/// Maximum node name length in bytes.
pub const MAX_NAME_LEN: usize = 255;

/// The implicit root directory id. Never stored in the catalog.
pub const ROOT_ID: i64 = 0;
