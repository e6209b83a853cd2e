//! Core types and utilities for the mortar package manager.
//!
//! This crate holds the vocabulary shared by every other mortar crate:
//!
//! - [`version`]: version and constraint algebra
//! - [`package`]: package names, configuration ids, and package keys
//! - [`cfgvar`]: configuration variables and value sets
//! - [`error`]: stable diagnostic error codes

pub mod cfgvar;
pub mod error;
pub mod package;
pub mod version;

pub use cfgvar::{Value, VariableSet};
pub use error::ErrorCode;
pub use package::{ConfigurationId, InvalidPackageName, PackageKey, PackageName, PackageVersionKey};
pub use version::{InvalidVersion, Version, VersionConstraint};
