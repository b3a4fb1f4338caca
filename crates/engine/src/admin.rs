use chrono::{NaiveDate, Utc};
use tracing::info;
use uuid::Uuid;

use signoff_core::domain::delegation::{ApprovalDelegation, DelegationId};
use signoff_core::domain::template::{
    ApprovalLineTemplate, ApprovalStepDefinition, StepApprover, TemplateId,
};
use signoff_core::domain::{TenantId, UserId};
use signoff_core::errors::{ConflictError, EngineError, NotFoundError};
use signoff_core::has_overlap;

use crate::engine::{map_repo_error, ApprovalEngine};

pub struct NewTemplateStep {
    pub position: u32,
    pub approver: StepApprover,
    pub mandatory: bool,
    pub due_in_hours: Option<u32>,
}

pub struct NewTemplate {
    pub tenant: TenantId,
    pub code: String,
    pub doc_type: String,
    pub name: String,
    pub steps: Vec<NewTemplateStep>,
    pub is_default: bool,
}

pub struct NewDelegation {
    pub tenant: TenantId,
    pub delegator: UserId,
    pub delegate: UserId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
}

impl ApprovalEngine {
    /// Register an approval line template. Step positions must be
    /// contiguous from 1; at most one active default may exist per
    /// (tenant, document type).
    pub async fn create_template(
        &self,
        request: NewTemplate,
    ) -> Result<ApprovalLineTemplate, EngineError> {
        let now = Utc::now();
        let template = ApprovalLineTemplate {
            id: TemplateId(Uuid::new_v4().to_string()),
            tenant: request.tenant,
            code: request.code,
            doc_type: request.doc_type,
            name: request.name,
            steps: request
                .steps
                .into_iter()
                .map(|step| ApprovalStepDefinition {
                    position: step.position,
                    approver: step.approver,
                    mandatory: step.mandatory,
                    due_in_hours: step.due_in_hours,
                })
                .collect(),
            is_default: request.is_default,
            active: true,
            created_at: now,
            updated_at: now,
        };

        if let Err(issues) = template.validate() {
            let detail: Vec<String> = issues.iter().map(|issue| issue.describe()).collect();
            return Err(EngineError::validation(detail.join("; ")));
        }

        self.templates.save(template.clone()).await.map_err(map_repo_error)?;
        info!(
            tenant = %template.tenant.0,
            code = %template.code,
            doc_type = %template.doc_type,
            steps = template.steps.len(),
            "approval template created"
        );
        Ok(template)
    }

    /// Retire a template without deleting it; running instances
    /// created from it are unaffected.
    pub async fn deactivate_template(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<(), EngineError> {
        let mut template = self
            .templates
            .find_by_id(tenant, id)
            .await
            .map_err(map_repo_error)?
            .ok_or_else(|| NotFoundError::Template { id: id.0.clone() })?;

        template.active = false;
        template.updated_at = Utc::now();
        self.templates.save(template).await.map_err(map_repo_error)?;
        Ok(())
    }

    /// Register a time-bounded delegation of approval authority. The
    /// range is inclusive on both ends; a delegator may hold at most
    /// one active delegation per date.
    pub async fn create_delegation(
        &self,
        request: NewDelegation,
    ) -> Result<ApprovalDelegation, EngineError> {
        if request.end_date < request.start_date {
            return Err(EngineError::validation("delegation end date precedes start date"));
        }
        if request.delegator == request.delegate {
            return Err(EngineError::validation("cannot delegate approval to oneself"));
        }

        // Friendly precheck; the repository re-checks in its own
        // transaction.
        let existing = self
            .delegations
            .find_active_for_delegator(&request.tenant, &request.delegator)
            .await
            .map_err(map_repo_error)?;
        if has_overlap(&existing, request.start_date, request.end_date) {
            return Err(ConflictError::OverlappingDelegation {
                delegator: request.delegator,
            }
            .into());
        }

        let delegation = ApprovalDelegation {
            id: DelegationId(Uuid::new_v4().to_string()),
            tenant: request.tenant,
            delegator: request.delegator,
            delegate: request.delegate,
            start_date: request.start_date,
            end_date: request.end_date,
            active: true,
            created_at: Utc::now(),
        };
        self.delegations.insert(delegation.clone()).await.map_err(map_repo_error)?;
        info!(
            tenant = %delegation.tenant.0,
            delegator = %delegation.delegator.0,
            delegate = %delegation.delegate.0,
            "delegation created"
        );
        Ok(delegation)
    }

    /// Revoke a delegation. Steps already redirected to the delegate
    /// keep their frozen approver.
    pub async fn revoke_delegation(
        &self,
        tenant: &TenantId,
        id: &DelegationId,
    ) -> Result<(), EngineError> {
        let mut delegation = self
            .delegations
            .find_by_id(tenant, id)
            .await
            .map_err(map_repo_error)?
            .ok_or_else(|| NotFoundError::Delegation { id: id.0.clone() })?;

        delegation.active = false;
        self.delegations.save(delegation).await.map_err(map_repo_error)?;
        Ok(())
    }
}
