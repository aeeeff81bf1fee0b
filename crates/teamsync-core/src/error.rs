use crate::subscription::SubscriptionId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TeamSyncError {
    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("invalid path '{path}': {reason}")]
    InvalidPath { path: String, reason: String },

    #[error("write rejected: {0}")]
    WriteRejected(String),

    #[error("store is closed")]
    StoreClosed,

    #[error("callback subscriptions need a running tokio runtime")]
    NoRuntime,

    #[error("team not found: {0}")]
    TeamNotFound(String),

    #[error("member '{member}' not found in team '{team}'")]
    MemberNotFound { team: String, member: String },

    #[error("member '{member}' already belongs to team '{team}'")]
    MemberExists { team: String, member: String },

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("malformed data at '{path}': {reason}")]
    Malformed { path: String, reason: String },

    #[error("event from released subscription {0}")]
    StaleSubscription(SubscriptionId),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// Coarse classification callers use to decide how to react to a failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The addressed entity is absent; projections degrade to "unavailable".
    NotFound,
    /// The backend refused or failed the write; the caller may retry.
    WriteRejected,
    /// The request was rejected before anything was written.
    ValidationFailed,
    /// An update arrived for a subscription that was already released.
    StaleSubscription,
}

impl TeamSyncError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            TeamSyncError::TeamNotFound(_)
            | TeamSyncError::MemberNotFound { .. }
            | TeamSyncError::Malformed { .. } => ErrorKind::NotFound,
            TeamSyncError::WriteRejected(_)
            | TeamSyncError::StoreClosed
            | TeamSyncError::NoRuntime
            | TeamSyncError::Io(_)
            | TeamSyncError::Yaml(_) => ErrorKind::WriteRejected,
            TeamSyncError::ValidationFailed(_)
            | TeamSyncError::InvalidPath { .. }
            | TeamSyncError::MemberExists { .. }
            | TeamSyncError::Forbidden(_)
            | TeamSyncError::Json(_) => ErrorKind::ValidationFailed,
            TeamSyncError::StaleSubscription(_) => ErrorKind::StaleSubscription,
        }
    }

    pub(crate) fn invalid_path(path: impl Into<String>, reason: impl Into<String>) -> Self {
        TeamSyncError::InvalidPath {
            path: path.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, TeamSyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(
            TeamSyncError::TeamNotFound("t".into()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(TeamSyncError::StoreClosed.kind(), ErrorKind::WriteRejected);
        assert_eq!(
            TeamSyncError::Forbidden("not yours".into()).kind(),
            ErrorKind::ValidationFailed
        );
        assert_eq!(
            TeamSyncError::StaleSubscription(SubscriptionId::new()).kind(),
            ErrorKind::StaleSubscription
        );
    }

    #[test]
    fn io_errors_count_as_rejected_writes() {
        let err: TeamSyncError = std::io::Error::other("disk full").into();
        assert_eq!(err.kind(), ErrorKind::WriteRejected);
    }
}
