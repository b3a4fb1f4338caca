use chrono::Utc;
use tracing::info;

use signoff_core::domain::instance::{ApprovalInstance, InstanceId};
use signoff_core::domain::{TenantId, UserId};
use signoff_core::errors::EngineError;
use signoff_core::events::EngineEvent;
use signoff_core::{apply_approval, apply_cancellation, apply_rejection};

use crate::engine::{load_instance, map_repo_error, ApprovalEngine};

impl ApprovalEngine {
    /// Approve one step as the given approver. On success the next
    /// step is activated (skipping unresolvable optional steps) or
    /// the instance closes as APPROVED.
    pub async fn approve_step(
        &self,
        tenant: &TenantId,
        instance_id: &InstanceId,
        position: u32,
        approver: &UserId,
        comment: Option<String>,
    ) -> Result<ApprovalInstance, EngineError> {
        let now = Utc::now();
        let mut instance = load_instance(self, tenant, instance_id).await?;
        let loaded_version = instance.version;

        let outcome = apply_approval(&mut instance, position, approver, comment, now)?;
        self.instances
            .update(instance.clone(), loaded_version)
            .await
            .map_err(map_repo_error)?;

        info!(
            tenant = %tenant.0,
            instance = %instance_id.0,
            position,
            approver = %approver.0,
            status = instance.status.as_str(),
            "step approved"
        );
        self.events.emit(
            EngineEvent::new(
                tenant.clone(),
                Some(instance_id.clone()),
                "step.approved",
                approver.0.clone(),
            )
            .with_metadata("position", position.to_string())
            .with_metadata("instance_status", outcome.instance_status.as_str()),
        );
        for skipped in outcome.auto_skipped {
            self.events.emit(
                EngineEvent::new(
                    tenant.clone(),
                    Some(instance_id.clone()),
                    "step.skipped",
                    "system",
                )
                .with_metadata("position", skipped.to_string()),
            );
        }

        Ok(instance)
    }

    /// Reject one step, closing the whole instance. A non-empty
    /// comment is required; steps never reached stay PENDING.
    pub async fn reject_step(
        &self,
        tenant: &TenantId,
        instance_id: &InstanceId,
        position: u32,
        approver: &UserId,
        comment: &str,
    ) -> Result<ApprovalInstance, EngineError> {
        let now = Utc::now();
        let mut instance = load_instance(self, tenant, instance_id).await?;
        let loaded_version = instance.version;

        apply_rejection(&mut instance, position, approver, comment, now)?;
        self.instances
            .update(instance.clone(), loaded_version)
            .await
            .map_err(map_repo_error)?;

        info!(
            tenant = %tenant.0,
            instance = %instance_id.0,
            position,
            approver = %approver.0,
            "step rejected, instance closed"
        );
        self.events.emit(
            EngineEvent::new(
                tenant.clone(),
                Some(instance_id.clone()),
                "step.rejected",
                approver.0.clone(),
            )
            .with_metadata("position", position.to_string())
            .with_metadata("instance_status", instance.status.as_str()),
        );

        Ok(instance)
    }

    /// Cancel a running instance, typically because the underlying
    /// document was withdrawn. The current step is left untouched for
    /// the record.
    pub async fn cancel_instance(
        &self,
        tenant: &TenantId,
        instance_id: &InstanceId,
        actor: &UserId,
        reason: Option<String>,
    ) -> Result<ApprovalInstance, EngineError> {
        let now = Utc::now();
        let mut instance = load_instance(self, tenant, instance_id).await?;
        let loaded_version = instance.version;

        apply_cancellation(&mut instance, actor, reason.clone(), now)?;
        self.instances
            .update(instance.clone(), loaded_version)
            .await
            .map_err(map_repo_error)?;

        info!(
            tenant = %tenant.0,
            instance = %instance_id.0,
            actor = %actor.0,
            "instance cancelled"
        );
        let mut event = EngineEvent::new(
            tenant.clone(),
            Some(instance_id.clone()),
            "instance.cancelled",
            actor.0.clone(),
        );
        if let Some(reason) = reason {
            event = event.with_metadata("reason", reason);
        }
        self.events.emit(event);

        Ok(instance)
    }
}
