//! Central error handling for the light transport pipeline
//!
//! Every store and builder returns [`LightResult`]; the render passes only fail
//! at setup time (see [`LightError::PassSetup`]).

use std::fmt;

/// The input fault behind an [`LightError::InvalidInput`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    ZeroLengthLine,
    DuplicateLine,
    NonFiniteCoordinate,
    NonPositiveRadius,
    LightIndexOutOfRange,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::ZeroLengthLine => "zero-length line",
            Self::DuplicateLine => "duplicate line",
            Self::NonFiniteCoordinate => "non-finite coordinate",
            Self::NonPositiveRadius => "non-positive light radius",
            Self::LightIndexOutOfRange => "light index out of range",
        };
        f.write_str(name)
    }
}

/// Resources with a fixed capacity
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Resource {
    BvhNodes,
    PolarRows,
}

impl fmt::Display for Resource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::BvhNodes => f.write_str("BVH nodes"),
            Self::PolarRows => f.write_str("polar atlas rows"),
        }
    }
}

#[derive(thiserror::Error, Debug)]
pub enum LightError {
    /// Caller supplied data that can never be valid; nothing was applied
    #[error("invalid input: {kind} at index {index}")]
    InvalidInput { kind: ErrorKind, index: usize },

    /// Input is valid but larger than the configured capacity
    #[error("resource exhausted: {requested} {resource} requested, limit is {limit}")]
    ResourceExhausted {
        resource: Resource,
        requested: usize,
        limit: usize,
    },

    /// A pass could not be created from the current configuration
    #[error("pass setup failed for {pass}: {reason}")]
    PassSetup { pass: &'static str, reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LightError {
    pub fn invalid(kind: ErrorKind, index: usize) -> Self {
        Self::InvalidInput { kind, index }
    }

    pub fn exhausted(resource: Resource, requested: usize, limit: usize) -> Self {
        Self::ResourceExhausted {
            resource,
            requested,
            limit,
        }
    }

    pub fn pass_setup<T: ToString>(pass: &'static str, reason: T) -> Self {
        Self::PassSetup {
            pass,
            reason: reason.to_string(),
        }
    }

    /// The input fault kind, if this is an input error
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::InvalidInput { kind, .. } => Some(*kind),
            _ => None,
        }
    }
}

pub type LightResult<T> = Result<T, LightError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_message_names_index() {
        let err = LightError::invalid(ErrorKind::DuplicateLine, 7);
        assert_eq!(err.kind(), Some(ErrorKind::DuplicateLine));
        assert_eq!(err.to_string(), "invalid input: duplicate line at index 7");
    }

    #[test]
    fn test_exhausted_has_no_kind() {
        let err = LightError::exhausted(Resource::PolarRows, 300, 256);
        assert!(err.kind().is_none());
        assert!(err.to_string().contains("polar atlas rows"));
    }
}
