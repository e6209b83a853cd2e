//! Repository metadata for the mortar package manager.
//!
//! - [`location`]: repository locations and state identifiers
//! - [`manifest`]: package and repository manifests, the `depends` grammar
//! - [`fragment`]: versioned repository snapshots
//! - [`index`]: the available-package index the resolver queries
//! - [`fetch`]: the source-acquisition collaborator interface

pub mod cache;
pub mod error;
pub mod fetch;
pub mod fragment;
pub mod index;
pub mod location;
pub mod manifest;

pub use cache::{FetchedMetadata, MetadataCache};
pub use error::{FetchErrorKind, RepositoryError, Result};
pub use fetch::{DirFetcher, RepositoryFetcher, fetch_repositories};
pub use fragment::RepositoryFragment;
pub use index::{AvailableIndex, AvailablePackage};
pub use location::{RepositoryLocation, RepositoryType};
pub use manifest::{
    Dependency, DependencyAlternative, DependencyAlternatives, PackageManifest, PackageType,
    RepositoryManifest, RepositoryRole, parse_depends,
};
