//! Resolution errors and internal backtracking signals.
//!
//! User-facing failures are [`ResolveError`]. The collector additionally
//! backtracks through [`Backtrack`] signals carried inside
//! [`CollectError`]; each signal names the driver frame (by depth) that
//! must handle it, frames with a different depth re-return it unchanged.
//! A signal escaping to depth zero that no frame claims is an invariant
//! violation.

use mortar_core::error::REPORT_URL;
use mortar_core::{ErrorCode, PackageKey, PackageVersionKey, Version, VersionConstraint};
use thiserror::Error;

/// User-facing resolution errors.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// A package named in a request or manifest is not known to any
    /// fetched repository.
    #[error("unknown package {name}{}", while_satisfying(.required_by))]
    UnknownPackage {
        /// The missing package.
        name: String,
        /// The "while satisfying" dependency chain.
        required_by: Vec<String>,
    },

    /// No available version satisfies the combined constraint.
    #[error(
        "unable to satisfy constraint ({name} {constraint}){}",
        while_satisfying(.required_by)
    )]
    NoSatisfiableVersion {
        /// Dependency name.
        name: String,
        /// The combined constraint.
        constraint: VersionConstraint,
        /// The "while satisfying" dependency chain.
        required_by: Vec<String>,
    },

    /// A dependency cycle among packages being configured.
    #[error("dependency cycle detected: {chain}")]
    DependencyCycle {
        /// Human-readable cycle, `a depends on b, b depends on a`.
        chain: String,
    },

    /// None of a clause's alternatives could be selected.
    #[error(
        "unable to select a dependency alternative for {dependent}{}{}",
        tried_alternatives(.tried),
        while_satisfying(.required_by)
    )]
    NoSelectableAlternative {
        /// The dependent whose clause failed.
        dependent: String,
        /// The alternatives that were tried.
        tried: Vec<String>,
        /// The "while satisfying" dependency chain.
        required_by: Vec<String>,
    },

    /// No configuration acceptable to every dependent exists.
    #[error("unable to negotiate sensible configuration for dependency {dependency}")]
    NegotiationFailed {
        /// The dependency being negotiated.
        dependency: String,
    },

    /// An existing dependent's constraint is still violated after all
    /// refinement.
    #[error(
        "unable to satisfy {dependent}: it depends on ({dependency} {constraint}) but {version} is planned"
    )]
    UnsatisfiedDependent {
        /// The dependent.
        dependent: String,
        /// The dependency it constrains.
        dependency: String,
        /// The violated constraint.
        constraint: VersionConstraint,
        /// The version the plan would configure.
        version: Version,
    },

    /// The same negotiated configuration set recurred; some configuration
    /// variables are bogus.
    #[error(
        "recurring negotiated configuration (checksum {checksum}); \
         specify the configuration variables explicitly to break the cycle"
    )]
    RecurringConfiguration {
        /// The recurring checksum.
        checksum: String,
    },

    /// A manifest expression could not be evaluated.
    #[error("invalid manifest expression in {package}: {reason}")]
    InvalidExpression {
        /// Package whose manifest is at fault.
        package: String,
        /// What is wrong.
        reason: String,
    },

    /// A dependent-supplied configuration contradicts the accept
    /// predicate.
    #[error("configuration of {package} proposed by {dependent} is not sensible: {reason}")]
    UnsensibleConfig {
        /// The configured package.
        package: String,
        /// The proposing dependent.
        dependent: String,
        /// Why it is rejected.
        reason: String,
    },

    /// A build-time dependency needs a host configuration that would have
    /// to be auto-created.
    #[error(
        "build-time dependency {dependency} requires a private host configuration at {proposed}"
    )]
    PrivateConfigRequired {
        /// The dependency needing the configuration.
        dependency: String,
        /// The path that would be created.
        proposed: String,
    },

    /// Repository-layer failure.
    #[error(transparent)]
    Repository(#[from] mortar_repository::RepositoryError),

    /// System package manager failure.
    #[error(transparent)]
    System(#[from] mortar_system::SystemError),

    /// An internal invariant does not hold.
    #[error("internal invariant violation: {message}; please report at {REPORT_URL}")]
    InvariantViolation {
        /// What went wrong.
        message: String,
    },
}

impl ResolveError {
    /// The stable diagnostic code for this error.
    #[must_use]
    pub fn code(&self) -> ErrorCode {
        match self {
            Self::UnknownPackage { .. } => ErrorCode::E0101,
            Self::NoSatisfiableVersion { .. } => ErrorCode::E0102,
            Self::DependencyCycle { .. } => ErrorCode::E0103,
            Self::NoSelectableAlternative { .. } => ErrorCode::E0104,
            Self::NegotiationFailed { .. } | Self::UnsensibleConfig { .. } => ErrorCode::E0105,
            Self::UnsatisfiedDependent { .. } => ErrorCode::E0106,
            Self::RecurringConfiguration { .. } => ErrorCode::E0107,
            Self::InvalidExpression { .. } => ErrorCode::E0003,
            Self::PrivateConfigRequired { .. } => ErrorCode::E0401,
            Self::Repository(_) => ErrorCode::E0201,
            Self::System(_) => ErrorCode::E0301,
            Self::InvariantViolation { .. } => ErrorCode::E0901,
        }
    }

    /// Create an invariant violation.
    #[must_use]
    pub fn invariant(message: impl Into<String>) -> Self {
        Self::InvariantViolation {
            message: message.into(),
        }
    }
}

fn while_satisfying(chain: &[String]) -> String {
    let mut out = String::new();
    for dependent in chain {
        out.push_str("\n  while satisfying ");
        out.push_str(dependent);
    }
    out
}

fn tried_alternatives(tried: &[String]) -> String {
    let mut out = String::new();
    for alt in tried {
        out.push_str("\n  tried ");
        out.push_str(alt);
    }
    out
}

/// Internal backtracking signals. Each carries the
/// depth of the driver frame that must handle it where relevant.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Backtrack {
    /// A dependency's version or system flag changed; restart collection
    /// from scratch with the replacement recorded.
    ReplaceVersion,

    /// Bogus replacement entries were cancelled; restart from scratch.
    CancelReplacement,

    /// The dependency must be moved to the postponed table; restart.
    PostponeDependency(PackageKey),

    /// The configuration of the cluster at `depth` changed; replay its
    /// negotiation.
    RetryConfiguration {
        /// Frame that must handle the signal.
        depth: usize,
        /// Dependent whose configuration changed.
        dependent: PackageVersionKey,
    },

    /// A merged cluster is still non-negotiated; restore the snapshot and
    /// retry with the new cluster as shadow.
    MergeConfiguration {
        /// Frame that must handle the signal.
        depth: usize,
    },

    /// The shadow cluster equals the current cluster: a negotiation
    /// yo-yo. The handling frame collapses by re-collecting from scratch.
    MergeConfigurationCycle {
        /// Frame that must handle the signal.
        depth: usize,
    },

    /// New dependencies with existing dependents appeared in the cluster;
    /// restart to re-evaluate those dependents.
    RecollectExistingDependents {
        /// Frame that must handle the signal.
        depth: usize,
        /// The dependents to re-evaluate.
        dependents: Vec<PackageKey>,
    },

    /// The chosen alternative's configuration cannot be negotiated;
    /// restart with it recorded as unacceptable.
    UnacceptAlternative,
}

impl CollectError {
    /// Append a "while satisfying" chain entry to a resolution failure.
    /// Backtracking signals pass through untouched: a scratch restart
    /// clears the chain by construction.
    pub(crate) fn with_chain(mut self, entry: impl Into<String>) -> Self {
        if let Self::Fatal(e) = &mut self {
            match e.as_mut() {
                ResolveError::UnknownPackage { required_by, .. }
                | ResolveError::NoSatisfiableVersion { required_by, .. }
                | ResolveError::NoSelectableAlternative { required_by, .. } => {
                    required_by.push(entry.into());
                }
                _ => {}
            }
        }
        self
    }
}

/// Collector-internal error type: a backtracking signal or a fatal error.
#[derive(Debug)]
pub(crate) enum CollectError {
    /// Backtrack to the frame identified by the signal.
    Backtrack(Backtrack),
    /// Surface to the user.
    Fatal(Box<ResolveError>),
}

impl From<Backtrack> for CollectError {
    fn from(signal: Backtrack) -> Self {
        Self::Backtrack(signal)
    }
}

impl From<ResolveError> for CollectError {
    fn from(error: ResolveError) -> Self {
        Self::Fatal(Box::new(error))
    }
}

impl From<mortar_repository::RepositoryError> for CollectError {
    fn from(error: mortar_repository::RepositoryError) -> Self {
        Self::Fatal(Box::new(error.into()))
    }
}

/// Collector-internal result type.
pub(crate) type CResult<T> = std::result::Result<T, CollectError>;

/// Result type for resolution operations.
pub type Result<T> = std::result::Result<T, ResolveError>;
