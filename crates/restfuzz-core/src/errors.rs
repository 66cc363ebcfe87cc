//! Error taxonomy of the engine.
//!
//! Every variant is recovered locally by the iteration that hit it; none of
//! them stops a run.

use std::fmt;

use restfuzz_transport::TransportError;
use restfuzz_types::{EndpointId, SchemaViolation};

/// A placeholder key with no value in the identifier table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDependency {
    pub key: String,
}

impl UnresolvedDependency {
    pub fn new(key: &str) -> Self {
        Self {
            key: key.to_string(),
        }
    }
}

impl fmt::Display for UnresolvedDependency {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "UNRESOLVED_DEPENDENCY: no value for '{}'", self.key)
    }
}

impl std::error::Error for UnresolvedDependency {}

/// Why an iteration ended without a commit.
#[derive(Debug, Clone, PartialEq)]
pub enum FuzzError {
    Unresolved(UnresolvedDependency),
    Transport(TransportError),
    /// Synthesizer or mutator produced an out-of-schema value.
    Schema {
        endpoint: EndpointId,
        violation: SchemaViolation,
    },
    /// No compatible endpoint for the chosen base sequence.
    StalledSelection {
        /// `None` for the empty seed base.
        base: Option<u64>,
    },
}

impl fmt::Display for FuzzError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FuzzError::Unresolved(e) => write!(f, "{}", e),
            FuzzError::Transport(e) => write!(f, "TRANSPORT_ERROR: {}", e),
            FuzzError::Schema {
                endpoint,
                violation,
            } => write!(f, "{} (endpoint {})", violation, endpoint),
            FuzzError::StalledSelection { base: Some(id) } => {
                write!(f, "STALLED_SELECTION: no compatible endpoint for base {}", id)
            }
            FuzzError::StalledSelection { base: None } => {
                write!(f, "STALLED_SELECTION: no seed endpoint available")
            }
        }
    }
}

impl std::error::Error for FuzzError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            FuzzError::Unresolved(e) => Some(e),
            FuzzError::Transport(e) => Some(e),
            FuzzError::Schema { violation, .. } => Some(violation),
            FuzzError::StalledSelection { .. } => None,
        }
    }
}

impl From<UnresolvedDependency> for FuzzError {
    fn from(e: UnresolvedDependency) -> Self {
        FuzzError::Unresolved(e)
    }
}

impl From<TransportError> for FuzzError {
    fn from(e: TransportError) -> Self {
        FuzzError::Transport(e)
    }
}

impl FuzzError {
    /// Short category used in logs and iteration records.
    pub fn category(&self) -> &'static str {
        match self {
            FuzzError::Unresolved(_) => "unresolved_dependency",
            FuzzError::Transport(_) => "transport_error",
            FuzzError::Schema { .. } => "schema_violation",
            FuzzError::StalledSelection { .. } => "stalled_selection",
        }
    }
}
