//! Error types for sign-in, fetching and deleting contacts.

use crate::session::DeleteReport;

/// Failure to obtain a credential for the contact store.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("sign-in cancelled")]
    Cancelled,
    #[error("sign-in denied: {0}")]
    Denied(String),
    #[error("interactive sign-in required but disabled")]
    InteractionRequired,
    #[error("sign-in response did not match the request (state mismatch)")]
    StateMismatch,
    #[error("token endpoint rejected the request: {code}: {description}")]
    TokenEndpoint { code: String, description: String },
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl AuthError {
    /// Whether the failure means the cached credential is unusable and the
    /// user has to sign in again.
    pub fn needs_interaction(&self) -> bool {
        match self {
            AuthError::InteractionRequired => true,
            AuthError::TokenEndpoint { code, .. } => {
                matches!(code.as_str(), "invalid_grant" | "interaction_required" | "consent_required")
            }
            _ => false,
        }
    }
}

/// Failure while enumerating folders or contacts.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("fetch cancelled")]
    Cancelled,
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
}

impl FetchError {
    /// Whether Graph rejected the bearer token.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, FetchError::Api { status: 401, .. })
    }
}

/// Failure while deleting a single contact.
#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error("delete cancelled")]
    Cancelled,
    #[error("HTTP: {0}")]
    Http(#[from] reqwest::Error),
    #[error("API error {status} ({code}): {message}")]
    Api {
        status: u16,
        code: String,
        message: String,
    },
    #[error("could not resolve contact folders: {0}")]
    Folders(#[from] FetchError),
}

/// Errors surfaced by the refresh and confirm-removal actions.
#[derive(Debug, thiserror::Error)]
pub enum DedupeError {
    #[error("another refresh or removal is already running")]
    Busy,
    #[error("no contacts selected for removal")]
    NothingSelected,
    #[error("cancelled")]
    Cancelled,
    #[error(transparent)]
    Auth(#[from] AuthError),
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("removed {} of {} contact(s): {source}", .report.deleted.len(), .report.requested())]
    Delete {
        #[source]
        source: DeleteError,
        report: DeleteReport,
    },
}

impl DedupeError {
    /// Whether the error only reports a cancellation requested by the user.
    pub fn is_cancelled(&self) -> bool {
        match self {
            DedupeError::Cancelled
            | DedupeError::Auth(AuthError::Cancelled)
            | DedupeError::Fetch(FetchError::Cancelled) => true,
            DedupeError::Delete {
                source: DeleteError::Cancelled,
                report,
            } => report.deleted.is_empty(),
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_needs_interaction() {
        assert!(AuthError::InteractionRequired.needs_interaction());
        assert!(AuthError::TokenEndpoint {
            code: "invalid_grant".into(),
            description: "expired".into(),
        }
        .needs_interaction());
        assert!(!AuthError::TokenEndpoint {
            code: "invalid_client".into(),
            description: "bad".into(),
        }
        .needs_interaction());
        assert!(!AuthError::Cancelled.needs_interaction());
    }

    #[test]
    fn test_is_cancelled() {
        assert!(DedupeError::Cancelled.is_cancelled());
        assert!(DedupeError::Fetch(FetchError::Cancelled).is_cancelled());
        assert!(DedupeError::Auth(AuthError::Cancelled).is_cancelled());
        assert!(!DedupeError::Busy.is_cancelled());
    }

    #[test]
    fn test_cancel_after_deletions_is_not_a_plain_cancel() {
        let report = DeleteReport {
            deleted: vec!["1".into()],
            failed: None,
            pending: vec!["2".into(), "3".into()],
        };
        let err = DedupeError::Delete {
            source: DeleteError::Cancelled,
            report,
        };
        assert!(!err.is_cancelled());
        assert_eq!(err.to_string(), "removed 1 of 3 contact(s): delete cancelled");

        let untouched = DedupeError::Delete {
            source: DeleteError::Cancelled,
            report: DeleteReport {
                pending: vec!["1".into()],
                ..DeleteReport::default()
            },
        };
        assert!(untouched.is_cancelled());
    }
}
