// error.rs
use crate::model::ThreadStatus;
use std::{error::Error, fmt};

const ERR_KIND_DUPLICATE: &str = "duplicate_name";
const ERR_KIND_NOT_FOUND: &str = "not_found";
const ERR_KIND_INVALID_STATE: &str = "invalid_state";
const ERR_KIND_UNKNOWN_KIND: &str = "unknown_kind";
const ERR_KIND_AFFINITY: &str = "affinity_unsupported";
const ERR_KIND_SPAWN: &str = "spawn_failed";
const ERR_KIND_CONSTRUCTION: &str = "construction_failed";

/// Errors surfaced synchronously by registry, factory and affinity operations.
///
/// Per-tick failures never show up here: they are routed to
/// [`ThreadBase::on_failure`](crate::model::ThreadBase::on_failure) on the lane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ThreadError {
    /// A descriptor is already registered under this name.
    DuplicateName(String),
    /// No descriptor is registered under this name.
    NotFound(String),
    /// The operation is illegal for the descriptor's current status.
    InvalidState {
        name: String,
        status: ThreadStatus,
        op: &'static str,
    },
    /// The factory has no constructor for this kind.
    UnknownKind(String),
    /// Core pinning is not available; advisory only.
    AffinityUnsupported(String),
    /// The OS refused to create the lane thread.
    SpawnFailed { name: String, reason: String },
    /// A catalog constructor returned an error.
    ConstructionFailed { kind: String, reason: String },
}

impl ThreadError {
    #[inline]
    pub(crate) fn invalid_state(name: &str, status: ThreadStatus, op: &'static str) -> Self {
        ThreadError::InvalidState {
            name: name.to_string(),
            status,
            op,
        }
    }

    /// Stable short identifier used in log records.
    pub fn kind(&self) -> &'static str {
        match self {
            ThreadError::DuplicateName(_) => ERR_KIND_DUPLICATE,
            ThreadError::NotFound(_) => ERR_KIND_NOT_FOUND,
            ThreadError::InvalidState { .. } => ERR_KIND_INVALID_STATE,
            ThreadError::UnknownKind(_) => ERR_KIND_UNKNOWN_KIND,
            ThreadError::AffinityUnsupported(_) => ERR_KIND_AFFINITY,
            ThreadError::SpawnFailed { .. } => ERR_KIND_SPAWN,
            ThreadError::ConstructionFailed { .. } => ERR_KIND_CONSTRUCTION,
        }
    }

    /// Whether the caller may carry on without treating this as a failure.
    pub fn is_advisory(&self) -> bool {
        matches!(self, ThreadError::AffinityUnsupported(_))
    }
}

impl fmt::Display for ThreadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ThreadError::DuplicateName(name) => {
                write!(f, "thread <{name}> is already registered")
            }
            ThreadError::NotFound(name) => write!(f, "thread <{name}> is not registered"),
            ThreadError::InvalidState { name, status, op } => {
                write!(f, "cannot {op} thread <{name}> while it is {status}")
            }
            ThreadError::UnknownKind(kind) => write!(f, "unknown thread kind <{kind}>"),
            ThreadError::AffinityUnsupported(reason) => {
                write!(f, "cpu affinity unsupported: {reason}")
            }
            ThreadError::SpawnFailed { name, reason } => {
                write!(f, "failed to spawn lane for thread <{name}>: {reason}")
            }
            ThreadError::ConstructionFailed { kind, reason } => {
                write!(f, "failed to construct thread kind <{kind}>: {reason}")
            }
        }
    }
}

impl Error for ThreadError {}

pub type ThreadResult<T> = Result<T, ThreadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_names_the_thread_and_status() {
        let err = ThreadError::invalid_state("motion", ThreadStatus::Running, "unregister");
        assert_eq!(
            err.to_string(),
            "cannot unregister thread <motion> while it is Running"
        );
        assert_eq!(err.kind(), "invalid_state");
    }

    #[test]
    fn only_affinity_is_advisory() {
        assert!(ThreadError::AffinityUnsupported("no cores".into()).is_advisory());
        assert!(!ThreadError::NotFound("x".into()).is_advisory());
        assert!(!ThreadError::DuplicateName("x".into()).is_advisory());
    }
}
