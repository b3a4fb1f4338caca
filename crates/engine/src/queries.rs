use chrono::{DateTime, Utc};

use signoff_core::domain::instance::{ApprovalInstance, InstanceId, StepStatus};
use signoff_core::domain::{TenantId, UserId};
use signoff_core::errors::EngineError;
use signoff_core::{overdue_steps, DocumentRef};

use crate::engine::{load_instance, map_repo_error, ApprovalEngine};

/// One inbox entry: a step currently waiting on a specific approver.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingApproval {
    pub instance_id: InstanceId,
    pub document: DocumentRef,
    pub requester: UserId,
    pub requested_at: DateTime<Utc>,
    pub position: u32,
    pub due_at: Option<DateTime<Utc>>,
}

/// One overdue finding from an `find_overdue` sweep. Derived on read;
/// nothing about being overdue is ever written back.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OverdueStep {
    pub instance_id: InstanceId,
    pub document: DocumentRef,
    pub position: u32,
    pub approver: Option<UserId>,
    pub due_at: DateTime<Utc>,
}

impl ApprovalEngine {
    pub async fn find_instance(
        &self,
        tenant: &TenantId,
        id: &InstanceId,
    ) -> Result<ApprovalInstance, EngineError> {
        load_instance(self, tenant, id).await
    }

    /// The approval history entry point for a document: the live
    /// instance when one exists, otherwise the most recent closed one.
    pub async fn find_by_document(
        &self,
        tenant: &TenantId,
        doc_type: &str,
        doc_id: &str,
    ) -> Result<Option<ApprovalInstance>, EngineError> {
        if let Some(active) = self
            .instances
            .find_active_by_document(tenant, doc_type, doc_id)
            .await
            .map_err(map_repo_error)?
        {
            return Ok(Some(active));
        }
        self.instances
            .find_latest_by_document(tenant, doc_type, doc_id)
            .await
            .map_err(map_repo_error)
    }

    /// Inbox: every step currently waiting on this approver, oldest
    /// request first.
    pub async fn pending_for_approver(
        &self,
        tenant: &TenantId,
        approver: &UserId,
    ) -> Result<Vec<PendingApproval>, EngineError> {
        let instances = self
            .instances
            .list_awaiting_approver(tenant, approver)
            .await
            .map_err(map_repo_error)?;

        let mut pending = Vec::new();
        for instance in instances {
            for step in &instance.steps {
                if step.status != StepStatus::InProgress
                    || step.approver.as_ref() != Some(approver)
                {
                    continue;
                }
                pending.push(PendingApproval {
                    instance_id: instance.id.clone(),
                    document: instance.document.clone(),
                    requester: instance.requester.clone(),
                    requested_at: instance.requested_at,
                    position: step.position,
                    due_at: step.due_at,
                });
            }
        }
        Ok(pending)
    }

    pub async fn count_pending_for_approver(
        &self,
        tenant: &TenantId,
        approver: &UserId,
    ) -> Result<usize, EngineError> {
        Ok(self.pending_for_approver(tenant, approver).await?.len())
    }

    /// Sweep all open instances for steps past their due date at the
    /// given observation time.
    pub async fn find_overdue(
        &self,
        tenant: &TenantId,
        now: DateTime<Utc>,
    ) -> Result<Vec<OverdueStep>, EngineError> {
        let instances =
            self.instances.list_non_terminal(tenant).await.map_err(map_repo_error)?;

        let mut findings = Vec::new();
        for instance in &instances {
            for step in overdue_steps(instance, now) {
                let Some(due_at) = step.due_at else { continue };
                findings.push(OverdueStep {
                    instance_id: instance.id.clone(),
                    document: instance.document.clone(),
                    position: step.position,
                    approver: step.approver.clone(),
                    due_at,
                });
            }
        }
        Ok(findings)
    }
}
