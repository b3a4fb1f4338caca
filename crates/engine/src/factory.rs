use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};
use uuid::Uuid;

use signoff_core::domain::instance::{
    ApprovalInstance, ApprovalStepInstance, InstanceId, InstanceStatus, StepStatus,
};
use signoff_core::domain::template::{
    ApprovalLineTemplate, StepApprover, TemplateId, TemplateIssue,
};
use signoff_core::domain::{TenantId, UserId};
use signoff_core::errors::{ConflictError, EngineError, NotFoundError};
use signoff_core::events::EngineEvent;
use signoff_core::{resolve_effective, start_first_step, DocumentRef};

use crate::engine::{map_repo_error, ApprovalEngine};

pub struct CreateInstanceRequest {
    pub tenant: TenantId,
    pub document: DocumentRef,
    pub requester: UserId,
    /// Explicit template choice; falls back to the active default for
    /// the document type when absent.
    pub template: Option<TemplateId>,
    /// When the document entered approval. Delegation resolution and
    /// due dates are anchored here, so a backdated request resolves
    /// against the delegations that covered that day.
    pub requested_at: DateTime<Utc>,
}

impl ApprovalEngine {
    /// Instantiate an approval line for a document. Approvers are
    /// resolved and frozen here: role lookups and delegation
    /// redirection happen once, against the request date, and later
    /// role or delegation changes do not move already-created steps.
    pub async fn create_instance(
        &self,
        request: CreateInstanceRequest,
    ) -> Result<ApprovalInstance, EngineError> {
        let now = Utc::now();
        let CreateInstanceRequest { tenant, document, requester, template, requested_at } =
            request;

        // Early duplicate check for a friendly error; the unique
        // index remains the authority under concurrency.
        let existing = self
            .instances
            .find_active_by_document(&tenant, &document.doc_type, &document.doc_id)
            .await
            .map_err(map_repo_error)?;
        if existing.is_some() {
            return Err(ConflictError::DuplicateInstance { document }.into());
        }

        let template = self.resolve_template(&tenant, &document.doc_type, template).await?;

        let mut steps = Vec::with_capacity(template.steps.len());
        for definition in template.ordered_steps() {
            let nominal = match &definition.approver {
                StepApprover::User { user_id } => Some(user_id.clone()),
                StepApprover::Role { role } => {
                    let resolved = self.directory.resolve_role(&tenant, role);
                    if resolved.is_none() && definition.mandatory {
                        return Err(EngineError::configuration(format!(
                            "role `{role}` has no assignee for mandatory step {}",
                            definition.position
                        )));
                    }
                    resolved
                }
            };

            let approver = match &nominal {
                Some(nominal_user) => Some(
                    self.effective_approver(&tenant, nominal_user, requested_at.date_naive())
                        .await,
                ),
                None => None,
            };

            steps.push(ApprovalStepInstance {
                position: definition.position,
                approver,
                nominal_approver: nominal,
                mandatory: definition.mandatory,
                status: StepStatus::Pending,
                due_at: definition
                    .due_in_hours
                    .map(|hours| requested_at + Duration::hours(i64::from(hours))),
                decided_at: None,
                decision_comment: None,
            });
        }

        let mut instance = ApprovalInstance {
            id: InstanceId(Uuid::new_v4().to_string()),
            tenant: tenant.clone(),
            document,
            requester,
            requested_at,
            status: InstanceStatus::Pending,
            steps,
            version: 1,
            cancelled_by: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };
        let skipped = start_first_step(&mut instance, now)?;

        self.instances.insert(instance.clone()).await.map_err(map_repo_error)?;

        info!(
            tenant = %tenant.0,
            instance = %instance.id.0,
            doc_type = %instance.document.doc_type,
            doc_id = %instance.document.doc_id,
            steps = instance.steps.len(),
            "approval instance created"
        );
        self.events.emit(
            EngineEvent::new(
                tenant,
                Some(instance.id.clone()),
                "instance.created",
                instance.requester.0.clone(),
            )
            .with_metadata("doc_type", instance.document.doc_type.clone())
            .with_metadata("doc_id", instance.document.doc_id.clone())
            .with_metadata("template", template.code.clone()),
        );
        for position in skipped {
            self.events.emit(
                EngineEvent::new(
                    instance.tenant.clone(),
                    Some(instance.id.clone()),
                    "step.skipped",
                    "system",
                )
                .with_metadata("position", position.to_string()),
            );
        }

        Ok(instance)
    }

    async fn resolve_template(
        &self,
        tenant: &TenantId,
        doc_type: &str,
        explicit: Option<TemplateId>,
    ) -> Result<ApprovalLineTemplate, EngineError> {
        match explicit {
            Some(id) => {
                let template = self
                    .templates
                    .find_by_id(tenant, &id)
                    .await
                    .map_err(map_repo_error)?
                    .filter(|template| template.active)
                    .ok_or_else(|| NotFoundError::Template { id: id.0.clone() })?;
                if template.doc_type != doc_type {
                    return Err(EngineError::validation(format!(
                        "template `{}` targets document type `{}`, not `{doc_type}`",
                        template.code, template.doc_type
                    )));
                }
                // An explicitly named template that fails its own
                // consistency check is unusable, which reads the same
                // as absent from the caller's side.
                if let Err(issues) = template.validate() {
                    warn!(
                        tenant = %tenant.0,
                        template = %template.code,
                        issues = %describe_issues(&issues),
                        "explicitly selected template is inconsistent"
                    );
                    return Err(NotFoundError::Template { id: id.0 }.into());
                }
                Ok(template)
            }
            None => {
                let template = self
                    .templates
                    .find_default(tenant, doc_type)
                    .await
                    .map_err(map_repo_error)?
                    .ok_or_else(|| {
                        EngineError::configuration(format!(
                            "no default approval template for document type `{doc_type}`"
                        ))
                    })?;
                if let Err(issues) = template.validate() {
                    return Err(EngineError::configuration(format!(
                        "default template `{}` is inconsistent: {}",
                        template.code,
                        describe_issues(&issues)
                    )));
                }
                Ok(template)
            }
        }
    }

    /// Delegation redirection for one nominal approver. A failed
    /// delegation lookup falls back to the nominal approver instead of
    /// blocking creation; an ambiguous match is resolved
    /// deterministically and logged.
    async fn effective_approver(
        &self,
        tenant: &TenantId,
        nominal: &UserId,
        on: chrono::NaiveDate,
    ) -> UserId {
        let delegations = match self.delegations.find_active_for_delegator(tenant, nominal).await {
            Ok(delegations) => delegations,
            Err(error) => {
                warn!(
                    tenant = %tenant.0,
                    approver = %nominal.0,
                    %error,
                    "delegation lookup failed, using nominal approver"
                );
                return nominal.clone();
            }
        };

        let resolved = resolve_effective(&delegations, nominal, on);
        if resolved.ambiguous {
            warn!(
                tenant = %tenant.0,
                approver = %nominal.0,
                effective = %resolved.user.0,
                "multiple delegations cover the request date, picked most recent"
            );
        }
        resolved.user
    }
}

fn describe_issues(issues: &[TemplateIssue]) -> String {
    let detail: Vec<String> = issues.iter().map(|issue| issue.describe()).collect();
    detail.join("; ")
}
