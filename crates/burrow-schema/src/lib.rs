//! Shared vocabulary types for burrow.
//!
//! Everything that crosses a component boundary lives here: normalized
//! package names, totally-ordered versions, version constraints, requirement
//! specs, and checksum newtypes. The engine crates depend on these types,
//! never on raw strings.

pub mod constraint;
pub mod hash;
pub mod types;

// Re-exports
pub use constraint::{Constraint, ConstraintError, PackageSpec};
pub use hash::{InvalidChecksum, Sha256Hash};
pub use types::{PackageName, Version, VersionError};
