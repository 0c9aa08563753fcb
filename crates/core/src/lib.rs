//! Shared primitives for the open-banking consent crates.

#![forbid(unsafe_code)]

/// Log-safe rendering of untrusted text.
pub mod log_safe;

use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use log_safe::{LogSafe, log_safe};

/// Result type used across the consent crates.
pub type AppResult<T> = Result<T, AppError>;

/// Organization name applied when a caller does not supply one.
pub const DEFAULT_ORG: &str = "DEFAULT_ORG";

/// A validated non-empty UTF-8 string.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct NonEmptyString(String);

impl NonEmptyString {
    /// Creates a validated non-empty string.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        if value.trim().is_empty() {
            return Err(AppError::BadRequest(
                "value must not be empty or whitespace".to_owned(),
            ));
        }

        Ok(Self(value))
    }

    /// Returns the underlying string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl From<NonEmptyString> for String {
    fn from(value: NonEmptyString) -> Self {
        value.0
    }
}

/// Organization identifier used as the partition key for every persisted row.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrgId(String);

impl OrgId {
    /// Creates an organization identifier, rejecting blank values.
    pub fn new(value: impl Into<String>) -> AppResult<Self> {
        let value = value.into();
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(AppError::BadRequest(
                "organization id must not be empty".to_owned(),
            ));
        }

        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the deployment-wide default organization.
    #[must_use]
    pub fn default_org() -> Self {
        Self(DEFAULT_ORG.to_owned())
    }

    /// Returns the underlying identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl Default for OrgId {
    fn default() -> Self {
        Self::default_org()
    }
}

impl Display for OrgId {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        write!(formatter, "{}", LogSafe(self.0.as_str()))
    }
}

/// Write conflicts that a caller can act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    /// The consent is in the terminal revoked state.
    AlreadyRevoked {
        /// Consent that rejected the transition.
        consent_id: String,
    },
}

impl Display for ConflictKind {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyRevoked { consent_id } => write!(
                formatter,
                "consent '{}' is already revoked",
                LogSafe(consent_id)
            ),
        }
    }
}

/// Persistence step that failed after a transaction was opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceFailure {
    /// A row could not be inserted.
    Insertion,
    /// A row could not be read.
    Retrieval,
    /// A row could not be updated.
    Update,
    /// A row could not be deleted.
    Deletion,
    /// Begin, commit or rollback failed.
    Transaction,
}

impl PersistenceFailure {
    /// Returns a stable label for logs and messages.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Insertion => "insertion",
            Self::Retrieval => "retrieval",
            Self::Update => "update",
            Self::Deletion => "deletion",
            Self::Transaction => "transaction",
        }
    }
}

/// Common application error categories.
#[derive(Debug, Error)]
pub enum AppError {
    /// Malformed or missing input, or a payload mismatch.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// A required argument was blank or absent.
    #[error("missing argument: {0}")]
    MissingArgument(String),

    /// Identity or permission mismatch.
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Resource path is not valid for the granted consent.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// Requested consent, authorization or attribute does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Write operation conflicts with existing state.
    #[error("conflict: {0}")]
    Conflict(ConflictKind),

    /// The store failed while a transaction was open.
    #[error("persistence {} error: {message}", kind.as_str())]
    Persistence {
        /// Step that failed.
        kind: PersistenceFailure,
        /// Store-provided detail.
        message: String,
    },

    /// Internal unexpected error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// Returns the HTTP status code a transport layer should answer with.
    #[must_use]
    pub fn http_status(&self) -> u16 {
        match self {
            Self::BadRequest(_) | Self::MissingArgument(_) => 400,
            Self::Unauthorized(_) => 401,
            Self::Forbidden(_) => 403,
            Self::NotFound(_) => 404,
            Self::Conflict(_) => 409,
            Self::Persistence { .. } | Self::Internal(_) => 500,
        }
    }

    /// Returns the message rendered with control characters removed.
    #[must_use]
    pub fn log_safe_message(&self) -> String {
        log_safe(self.to_string().as_str())
    }
}
