use async_trait::async_trait;
use thiserror::Error;

use signoff_core::domain::delegation::{ApprovalDelegation, DelegationId};
use signoff_core::domain::instance::{ApprovalInstance, InstanceId};
use signoff_core::domain::template::{ApprovalLineTemplate, TemplateId};
use signoff_core::domain::{TenantId, UserId};

pub mod delegation;
pub mod instance;
pub mod memory;
pub mod template;

pub use delegation::SqlDelegationRepository;
pub use instance::SqlInstanceRepository;
pub use memory::{
    InMemoryDelegationRepository, InMemoryInstanceRepository, InMemoryTemplateRepository,
};
pub use template::SqlTemplateRepository;

/// Constraint violations the schema enforces as the authority of last
/// resort surface as typed variants so the engine can map them onto
/// its conflict taxonomy instead of a generic persistence failure.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("duplicate live instance for document {doc_type}/{doc_id}")]
    DuplicateDocument { doc_type: String, doc_id: String },
    #[error("stale version {expected} for instance {instance_id}")]
    VersionConflict { instance_id: String, expected: u32 },
    #[error("overlapping active delegation for {delegator_id}")]
    OverlappingDelegation { delegator_id: String },
    #[error("default template already exists for document type {doc_type}")]
    DuplicateDefaultTemplate { doc_type: String },
}

pub(crate) fn is_unique_violation(error: &sqlx::Error) -> bool {
    match error {
        sqlx::Error::Database(db) => db.is_unique_violation(),
        _ => false,
    }
}

#[async_trait]
pub trait TemplateRepository: Send + Sync {
    async fn find_by_id(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<Option<ApprovalLineTemplate>, RepositoryError>;

    async fn find_default(
        &self,
        tenant: &TenantId,
        doc_type: &str,
    ) -> Result<Option<ApprovalLineTemplate>, RepositoryError>;

    /// Upsert; replaces the step definitions wholesale. Surfaces
    /// `DuplicateDefaultTemplate` when marking a second active
    /// default for the same (tenant, doc_type).
    async fn save(&self, template: ApprovalLineTemplate) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait DelegationRepository: Send + Sync {
    async fn find_by_id(
        &self,
        tenant: &TenantId,
        id: &DelegationId,
    ) -> Result<Option<ApprovalDelegation>, RepositoryError>;

    async fn find_active_for_delegator(
        &self,
        tenant: &TenantId,
        delegator: &UserId,
    ) -> Result<Vec<ApprovalDelegation>, RepositoryError>;

    /// Insert with the overlap re-check inside the same transaction;
    /// the in-engine check is only an optimization.
    async fn insert(&self, delegation: ApprovalDelegation) -> Result<(), RepositoryError>;

    async fn save(&self, delegation: ApprovalDelegation) -> Result<(), RepositoryError>;
}

#[async_trait]
pub trait InstanceRepository: Send + Sync {
    async fn find_by_id(
        &self,
        tenant: &TenantId,
        id: &InstanceId,
    ) -> Result<Option<ApprovalInstance>, RepositoryError>;

    /// The at-most-one non-terminal instance for a document.
    async fn find_active_by_document(
        &self,
        tenant: &TenantId,
        doc_type: &str,
        doc_id: &str,
    ) -> Result<Option<ApprovalInstance>, RepositoryError>;

    /// Most recent instance for a document regardless of status.
    async fn find_latest_by_document(
        &self,
        tenant: &TenantId,
        doc_type: &str,
        doc_id: &str,
    ) -> Result<Option<ApprovalInstance>, RepositoryError>;

    /// Surfaces `DuplicateDocument` when a live instance already
    /// exists for the same document.
    async fn insert(&self, instance: ApprovalInstance) -> Result<(), RepositoryError>;

    /// Compare-and-swap on `expected_version`; surfaces
    /// `VersionConflict` when another writer got there first.
    async fn update(
        &self,
        instance: ApprovalInstance,
        expected_version: u32,
    ) -> Result<(), RepositoryError>;

    async fn list_non_terminal(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<ApprovalInstance>, RepositoryError>;

    /// Running instances whose currently actionable step belongs to
    /// the given approver.
    async fn list_awaiting_approver(
        &self,
        tenant: &TenantId,
        approver: &UserId,
    ) -> Result<Vec<ApprovalInstance>, RepositoryError>;
}
