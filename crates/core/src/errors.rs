use thiserror::Error;

use crate::domain::instance::{DocumentRef, InstanceId};
use crate::domain::UserId;

/// Conflicts are surfaced as their own kind so callers can render
/// "someone already acted on this" messaging instead of a generic
/// failure. Every variant carries enough detail for an actionable
/// message.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum ConflictError {
    #[error("duplicate approval: a live instance already exists for {0}/{1}", .document.doc_type, .document.doc_id)]
    DuplicateInstance { document: DocumentRef },
    #[error("wrong approver for step {position} of {0}: expected {1}, got {2}", .instance.0, .expected.0, .actual.0)]
    WrongApprover { instance: InstanceId, position: u32, expected: UserId, actual: UserId },
    #[error("invalid state on {0} (step {1:?}): expected {expected}, actual {actual}", .instance.0, .position)]
    InvalidState {
        instance: InstanceId,
        position: Option<u32>,
        expected: &'static str,
        actual: String,
    },
    #[error("overlapping delegation already active for {0}", .delegator.0)]
    OverlappingDelegation { delegator: UserId },
    #[error("concurrent update on {0}: version {expected} no longer current", .instance.0)]
    VersionConflict { instance: InstanceId, expected: u32 },
    #[error("a default template for document type `{doc_type}` already exists")]
    DefaultTemplateExists { doc_type: String },
}

#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum NotFoundError {
    #[error("approval instance `{0}` not found", .id.0)]
    Instance { id: InstanceId },
    #[error("step {position} of instance `{0}` not found", .instance.0)]
    Step { instance: InstanceId, position: u32 },
    #[error("template not found or inactive: `{id}`")]
    Template { id: String },
    #[error("delegation `{id}` not found")]
    Delegation { id: String },
}

/// Engine error taxonomy. Validation and conflict errors reject bad
/// or stale input before any state change; configuration errors point
/// at administrative setup problems and deserve different surfacing
/// than end-user mistakes.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum EngineError {
    #[error("validation failed: {reason}")]
    Validation { reason: String },
    #[error(transparent)]
    Conflict(#[from] ConflictError),
    #[error(transparent)]
    NotFound(#[from] NotFoundError),
    #[error("configuration error: {reason}")]
    Configuration { reason: String },
    #[error("persistence failure: {0}")]
    Persistence(String),
}

impl EngineError {
    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation { reason: reason.into() }
    }

    pub fn configuration(reason: impl Into<String>) -> Self {
        Self::Configuration { reason: reason.into() }
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}
