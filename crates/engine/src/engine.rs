use std::sync::Arc;

use signoff_core::domain::instance::InstanceId;
use signoff_core::domain::{TenantId, UserId};
use signoff_core::errors::{ConflictError, EngineError};
use signoff_core::events::EventSink;
use signoff_core::DocumentRef;
use signoff_db::repositories::{
    DelegationRepository, InstanceRepository, RepositoryError, TemplateRepository,
};

use crate::directory::RoleDirectory;

/// Facade over the approval workflow. All operations take the tenant
/// explicitly; nothing crosses tenant boundaries.
pub struct ApprovalEngine {
    pub(crate) templates: Arc<dyn TemplateRepository>,
    pub(crate) delegations: Arc<dyn DelegationRepository>,
    pub(crate) instances: Arc<dyn InstanceRepository>,
    pub(crate) directory: Arc<dyn RoleDirectory>,
    pub(crate) events: Arc<dyn EventSink>,
}

impl ApprovalEngine {
    pub fn new(
        templates: Arc<dyn TemplateRepository>,
        delegations: Arc<dyn DelegationRepository>,
        instances: Arc<dyn InstanceRepository>,
        directory: Arc<dyn RoleDirectory>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self { templates, delegations, instances, directory, events }
    }
}

/// Typed repository conflicts map onto the engine's conflict
/// taxonomy; everything else is a persistence failure.
pub(crate) fn map_repo_error(error: RepositoryError) -> EngineError {
    match error {
        RepositoryError::DuplicateDocument { doc_type, doc_id } => {
            ConflictError::DuplicateInstance { document: DocumentRef::new(doc_type, doc_id) }
                .into()
        }
        RepositoryError::VersionConflict { instance_id, expected } => {
            ConflictError::VersionConflict { instance: InstanceId(instance_id), expected }.into()
        }
        RepositoryError::OverlappingDelegation { delegator_id } => {
            ConflictError::OverlappingDelegation { delegator: UserId(delegator_id) }.into()
        }
        RepositoryError::DuplicateDefaultTemplate { doc_type } => {
            ConflictError::DefaultTemplateExists { doc_type }.into()
        }
        other => EngineError::Persistence(other.to_string()),
    }
}

/// Load an instance or fail with a typed not-found error. Shared by
/// the transition and query paths.
pub(crate) async fn load_instance(
    engine: &ApprovalEngine,
    tenant: &TenantId,
    id: &InstanceId,
) -> Result<signoff_core::ApprovalInstance, EngineError> {
    engine
        .instances
        .find_by_id(tenant, id)
        .await
        .map_err(map_repo_error)?
        .ok_or_else(|| signoff_core::NotFoundError::Instance { id: id.clone() }.into())
}
