//! # Engine Error Types
//!
//! The error surface the register UI works against.
//!
//! ## Layering
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                     EngineError                                         │
//! │                                                                         │
//! │  Domain(CoreError)      ← cart math, tender math, state machine         │
//! │  Storage(DbError)       ← transactions, conflicts, not-found            │
//! │  SessionState           ← operation called in the wrong phase           │
//! │  FolioRejected          ← the folio collaborator refused a charge       │
//! │  CommitPartialFailure   ← posted charge could not be reversed           │
//! │  Sink / Config variants ← collaborator and configuration plumbing       │
//! │                                                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `Domain` and `Storage` are transparent: the cashier-facing message is
//! whatever the inner error renders, so the wording lives in one place per
//! layer. The engine's own variants cover what only the orchestration layer
//! can know about (session phase, folio boundary, sink plumbing).

use thiserror::Error;

use bazaar_core::CoreError;
use bazaar_db::DbError;

use crate::session::SessionPhase;

/// Errors surfaced by the checkout engine.
#[derive(Debug, Error)]
pub enum EngineError {
    // =========================================================================
    // Passthrough Layers
    // =========================================================================
    /// Business rule violation from bazaar-core.
    #[error(transparent)]
    Domain(#[from] CoreError),

    /// Storage failure or transactional conflict from bazaar-db.
    #[error(transparent)]
    Storage(#[from] DbError),

    // =========================================================================
    // Session Lifecycle
    // =========================================================================
    /// An operation was called while the session was in the wrong phase.
    #[error("Operation needs a {expected} session, but the session is {actual}")]
    SessionState {
        expected: SessionPhase,
        actual: SessionPhase,
    },

    // =========================================================================
    // Folio Boundary
    // =========================================================================
    /// The folio collaborator refused to accept a charge.
    ///
    /// Nothing was persisted: the tender stays open and the cashier picks
    /// another payment method or a different folio.
    #[error("Folio charge rejected: {reason}")]
    FolioRejected { reason: String },

    /// A sale failed after its folio charge was posted, and the
    /// compensating reversal failed too.
    ///
    /// ## What This Means
    /// The local database rolled back cleanly, but the remote folio now
    /// carries a charge with no matching invoice. Both references are
    /// included so the front desk can reverse the posting by hand. This is
    /// the one error in the engine that demands manual reconciliation.
    #[error(
        "Sale failed after charge {posting_id} was posted to folio {folio_ref}; manual reversal required ({reason})"
    )]
    CommitPartialFailure {
        folio_ref: String,
        posting_id: String,
        reason: String,
    },

    // =========================================================================
    // Collaborator Plumbing
    // =========================================================================
    /// A ticket/receipt sink implementation failed.
    ///
    /// Post-commit dispatch logs this at WARN instead of propagating it;
    /// it only reaches callers from explicit actions such as a reprint.
    #[error("{sink} sink failed: {message}")]
    SinkFailed {
        sink: &'static str,
        message: String,
    },

    // =========================================================================
    // Configuration
    // =========================================================================
    /// Configuration failed validation.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Configuration could not be read or parsed.
    #[error("Failed to load configuration: {0}")]
    ConfigLoadFailed(String),

    /// Configuration could not be written.
    #[error("Failed to save configuration: {0}")]
    ConfigSaveFailed(String),
}

impl EngineError {
    /// Checks whether retrying the operation as-is can succeed.
    ///
    /// True only for storage conflicts where a concurrent writer won the
    /// race this attempt. Domain errors and session misuse need the operator
    /// to change something first.
    pub fn is_retryable(&self) -> bool {
        match self {
            EngineError::Storage(err) => err.is_retryable(),
            _ => false,
        }
    }

    /// Checks if this is a configuration-related error.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            EngineError::InvalidConfig(_)
                | EngineError::ConfigLoadFailed(_)
                | EngineError::ConfigSaveFailed(_)
        )
    }

    /// Checks whether this error leaves external state needing manual
    /// cleanup. The register shows these with a different severity.
    pub fn needs_reconciliation(&self) -> bool {
        matches!(self, EngineError::CommitPartialFailure { .. })
    }
}

// =============================================================================
// From Implementations
// =============================================================================

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for EngineError {
    fn from(err: toml::de::Error) -> Self {
        EngineError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for EngineError {
    fn from(err: toml::ser::Error) -> Self {
        EngineError::ConfigSaveFailed(err.to_string())
    }
}

/// Result type for engine operations.
pub type EngineResult<T> = Result<T, EngineError>;

// =============================================================================
// Unit Tests
// =============================================================================
