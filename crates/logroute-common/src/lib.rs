//! Common types for logroute: CRDs, errors, resource keys and telemetry

#![deny(missing_docs)]

pub mod crd;
pub mod error;
pub mod resource;
pub mod telemetry;

pub use error::Error;
pub use resource::{ResourceKey, ResourceKind};

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// API group shared by every logroute CRD
pub const API_GROUP: &str = "logroute.dev";

/// Field manager used for server-side apply and status patches
pub const FIELD_MANAGER: &str = "logroute-controller";
