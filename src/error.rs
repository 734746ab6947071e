use thiserror::Error;

/// Why an identification attempt failed.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum SolveError {
    #[error("Invalid input image: {0}")]
    InputError(String),

    #[error("Need at least {needed} stars for identification (found {found})")]
    InsufficientDetections { found: usize, needed: usize },

    #[error("No consistent star pattern found (best candidate had {best_inliers} matches)")]
    NoConsistentPattern { best_inliers: usize },

    #[error("Star pattern is ambiguous: {candidates} equally good orientations")]
    AmbiguousSolution { candidates: usize },

    #[error("No stars identified in image")]
    NoStarsIdentified,

    #[error("Star catalog is empty or unavailable")]
    CatalogUnavailable,

    #[error("Invalid parameter {name}: {reason}")]
    InvalidParameter { name: &'static str, reason: String },

    #[error("Identification cancelled")]
    Cancelled,

    #[error("Identification timed out")]
    TimedOut,
}

/// Coarse failure category for presentation layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Too few usable stars in the image.
    NoStarsFound,
    /// Stars were found but the sky orientation could not be established.
    OrientationUnknown,
    /// Configuration, catalog, or control-flow problem.
    Internal,
}

impl SolveError {
    pub fn kind(&self) -> FailureKind {
        match self {
            SolveError::InputError(_)
            | SolveError::InsufficientDetections { .. }
            | SolveError::NoStarsIdentified => FailureKind::NoStarsFound,
            SolveError::NoConsistentPattern { .. } | SolveError::AmbiguousSolution { .. } => {
                FailureKind::OrientationUnknown
            }
            SolveError::CatalogUnavailable
            | SolveError::InvalidParameter { .. }
            | SolveError::Cancelled
            | SolveError::TimedOut => FailureKind::Internal,
        }
    }
}
