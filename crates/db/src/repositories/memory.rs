use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::RwLock;

use signoff_core::domain::delegation::{ApprovalDelegation, DelegationId};
use signoff_core::domain::instance::{ApprovalInstance, InstanceId, StepStatus};
use signoff_core::domain::template::{ApprovalLineTemplate, TemplateId};
use signoff_core::domain::{TenantId, UserId};
use signoff_core::ranges_overlap;

use super::{
    DelegationRepository, InstanceRepository, RepositoryError, TemplateRepository,
};

/// In-memory counterparts of the Sql repositories. They honor the
/// same conflict semantics (duplicate document, version CAS, overlap)
/// so engine tests exercise real behavior without a database.
#[derive(Default)]
pub struct InMemoryTemplateRepository {
    templates: RwLock<HashMap<String, ApprovalLineTemplate>>,
}

#[async_trait]
impl TemplateRepository for InMemoryTemplateRepository {
    async fn find_by_id(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<Option<ApprovalLineTemplate>, RepositoryError> {
        let templates = self.templates.read().await;
        Ok(templates.get(&id.0).filter(|template| &template.tenant == tenant).cloned())
    }

    async fn find_default(
        &self,
        tenant: &TenantId,
        doc_type: &str,
    ) -> Result<Option<ApprovalLineTemplate>, RepositoryError> {
        let templates = self.templates.read().await;
        Ok(templates
            .values()
            .find(|template| {
                &template.tenant == tenant
                    && template.doc_type == doc_type
                    && template.is_default
                    && template.active
            })
            .cloned())
    }

    async fn save(&self, template: ApprovalLineTemplate) -> Result<(), RepositoryError> {
        let mut templates = self.templates.write().await;
        if template.is_default && template.active {
            let other_default = templates.values().any(|existing| {
                existing.id != template.id
                    && existing.tenant == template.tenant
                    && existing.doc_type == template.doc_type
                    && existing.is_default
                    && existing.active
            });
            if other_default {
                return Err(RepositoryError::DuplicateDefaultTemplate {
                    doc_type: template.doc_type,
                });
            }
        }
        templates.insert(template.id.0.clone(), template);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryDelegationRepository {
    delegations: RwLock<HashMap<String, ApprovalDelegation>>,
}

#[async_trait]
impl DelegationRepository for InMemoryDelegationRepository {
    async fn find_by_id(
        &self,
        tenant: &TenantId,
        id: &DelegationId,
    ) -> Result<Option<ApprovalDelegation>, RepositoryError> {
        let delegations = self.delegations.read().await;
        Ok(delegations.get(&id.0).filter(|delegation| &delegation.tenant == tenant).cloned())
    }

    async fn find_active_for_delegator(
        &self,
        tenant: &TenantId,
        delegator: &UserId,
    ) -> Result<Vec<ApprovalDelegation>, RepositoryError> {
        let delegations = self.delegations.read().await;
        let mut matching: Vec<ApprovalDelegation> = delegations
            .values()
            .filter(|delegation| {
                &delegation.tenant == tenant
                    && &delegation.delegator == delegator
                    && delegation.active
            })
            .cloned()
            .collect();
        matching.sort_by(|left, right| left.start_date.cmp(&right.start_date));
        Ok(matching)
    }

    async fn insert(&self, delegation: ApprovalDelegation) -> Result<(), RepositoryError> {
        let mut delegations = self.delegations.write().await;
        let overlapping = delegations.values().any(|existing| {
            existing.tenant == delegation.tenant
                && existing.delegator == delegation.delegator
                && existing.active
                && ranges_overlap(
                    existing.start_date,
                    existing.end_date,
                    delegation.start_date,
                    delegation.end_date,
                )
        });
        if overlapping {
            return Err(RepositoryError::OverlappingDelegation {
                delegator_id: delegation.delegator.0,
            });
        }
        delegations.insert(delegation.id.0.clone(), delegation);
        Ok(())
    }

    async fn save(&self, delegation: ApprovalDelegation) -> Result<(), RepositoryError> {
        let mut delegations = self.delegations.write().await;
        delegations.insert(delegation.id.0.clone(), delegation);
        Ok(())
    }
}

#[derive(Default)]
pub struct InMemoryInstanceRepository {
    instances: RwLock<HashMap<String, ApprovalInstance>>,
}

#[async_trait]
impl InstanceRepository for InMemoryInstanceRepository {
    async fn find_by_id(
        &self,
        tenant: &TenantId,
        id: &InstanceId,
    ) -> Result<Option<ApprovalInstance>, RepositoryError> {
        let instances = self.instances.read().await;
        Ok(instances.get(&id.0).filter(|instance| &instance.tenant == tenant).cloned())
    }

    async fn find_active_by_document(
        &self,
        tenant: &TenantId,
        doc_type: &str,
        doc_id: &str,
    ) -> Result<Option<ApprovalInstance>, RepositoryError> {
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .find(|instance| {
                &instance.tenant == tenant
                    && instance.document.doc_type == doc_type
                    && instance.document.doc_id == doc_id
                    && !instance.is_terminal()
            })
            .cloned())
    }

    async fn find_latest_by_document(
        &self,
        tenant: &TenantId,
        doc_type: &str,
        doc_id: &str,
    ) -> Result<Option<ApprovalInstance>, RepositoryError> {
        let instances = self.instances.read().await;
        Ok(instances
            .values()
            .filter(|instance| {
                &instance.tenant == tenant
                    && instance.document.doc_type == doc_type
                    && instance.document.doc_id == doc_id
            })
            .max_by_key(|instance| instance.requested_at)
            .cloned())
    }

    async fn insert(&self, instance: ApprovalInstance) -> Result<(), RepositoryError> {
        let mut instances = self.instances.write().await;
        let duplicate = instances.values().any(|existing| {
            existing.tenant == instance.tenant
                && existing.document == instance.document
                && !existing.is_terminal()
        });
        if duplicate {
            return Err(RepositoryError::DuplicateDocument {
                doc_type: instance.document.doc_type,
                doc_id: instance.document.doc_id,
            });
        }
        instances.insert(instance.id.0.clone(), instance);
        Ok(())
    }

    async fn update(
        &self,
        instance: ApprovalInstance,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let mut instances = self.instances.write().await;
        match instances.get(&instance.id.0) {
            Some(stored)
                if stored.tenant == instance.tenant && stored.version == expected_version =>
            {
                instances.insert(instance.id.0.clone(), instance);
                Ok(())
            }
            _ => Err(RepositoryError::VersionConflict {
                instance_id: instance.id.0,
                expected: expected_version,
            }),
        }
    }

    async fn list_non_terminal(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<ApprovalInstance>, RepositoryError> {
        let instances = self.instances.read().await;
        let mut open: Vec<ApprovalInstance> = instances
            .values()
            .filter(|instance| &instance.tenant == tenant && !instance.is_terminal())
            .cloned()
            .collect();
        open.sort_by_key(|instance| instance.requested_at);
        Ok(open)
    }

    async fn list_awaiting_approver(
        &self,
        tenant: &TenantId,
        approver: &UserId,
    ) -> Result<Vec<ApprovalInstance>, RepositoryError> {
        let instances = self.instances.read().await;
        let mut awaiting: Vec<ApprovalInstance> = instances
            .values()
            .filter(|instance| &instance.tenant == tenant && !instance.is_terminal())
            .filter(|instance| {
                instance.steps.iter().any(|step| {
                    step.status == StepStatus::InProgress
                        && step.approver.as_ref() == Some(approver)
                })
            })
            .cloned()
            .collect();
        awaiting.sort_by_key(|instance| instance.requested_at);
        Ok(awaiting)
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use signoff_core::domain::delegation::{ApprovalDelegation, DelegationId};
    use signoff_core::domain::instance::{
        ApprovalInstance, ApprovalStepInstance, DocumentRef, InstanceId, InstanceStatus,
        StepStatus,
    };
    use signoff_core::domain::{TenantId, UserId};

    use crate::repositories::{
        DelegationRepository, InMemoryDelegationRepository, InMemoryInstanceRepository,
        InstanceRepository, RepositoryError,
    };

    fn tenant() -> TenantId {
        TenantId("acme".to_owned())
    }

    fn instance(id: &str, doc_id: &str, status: InstanceStatus) -> ApprovalInstance {
        let now = Utc::now();
        ApprovalInstance {
            id: InstanceId(id.to_owned()),
            tenant: tenant(),
            document: DocumentRef::new("purchase_order", doc_id),
            requester: UserId("u-0".to_owned()),
            requested_at: now,
            status,
            steps: vec![ApprovalStepInstance {
                position: 1,
                approver: Some(UserId("u-1".to_owned())),
                nominal_approver: Some(UserId("u-1".to_owned())),
                mandatory: true,
                status: StepStatus::InProgress,
                due_at: None,
                decided_at: None,
                decision_comment: None,
            }],
            version: 1,
            cancelled_by: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn duplicate_live_instance_is_rejected() {
        let repo = InMemoryInstanceRepository::default();
        repo.insert(instance("inst-1", "PO-1", InstanceStatus::InProgress))
            .await
            .expect("first");
        let error = repo
            .insert(instance("inst-2", "PO-1", InstanceStatus::InProgress))
            .await
            .expect_err("duplicate");
        assert!(matches!(error, RepositoryError::DuplicateDocument { .. }));
    }

    #[tokio::test]
    async fn update_enforces_version_cas() {
        let repo = InMemoryInstanceRepository::default();
        repo.insert(instance("inst-1", "PO-1", InstanceStatus::InProgress))
            .await
            .expect("insert");

        let mut winner = instance("inst-1", "PO-1", InstanceStatus::InProgress);
        winner.version = 2;
        repo.update(winner, 1).await.expect("first writer");

        let mut loser = instance("inst-1", "PO-1", InstanceStatus::Cancelled);
        loser.version = 2;
        let error = repo.update(loser, 1).await.expect_err("stale writer");
        assert!(matches!(error, RepositoryError::VersionConflict { .. }));
    }

    #[tokio::test]
    async fn concurrent_inserts_for_same_document_yield_one_winner() {
        // Scenario D at the repository boundary.
        let repo = std::sync::Arc::new(InMemoryInstanceRepository::default());
        let left = {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.insert(instance("inst-1", "PO-1", InstanceStatus::InProgress)).await
            })
        };
        let right = {
            let repo = repo.clone();
            tokio::spawn(async move {
                repo.insert(instance("inst-2", "PO-1", InstanceStatus::InProgress)).await
            })
        };

        let (left, right) = (left.await.expect("join"), right.await.expect("join"));
        assert_eq!(
            left.is_ok() as u8 + right.is_ok() as u8,
            1,
            "exactly one concurrent creator may win"
        );
    }

    #[tokio::test]
    async fn delegation_overlap_is_rejected() {
        let repo = InMemoryDelegationRepository::default();
        let base = ApprovalDelegation {
            id: DelegationId("dlg-1".to_owned()),
            tenant: tenant(),
            delegator: UserId("u-1".to_owned()),
            delegate: UserId("u-3".to_owned()),
            start_date: NaiveDate::from_ymd_opt(2026, 8, 1).expect("date"),
            end_date: NaiveDate::from_ymd_opt(2026, 8, 10).expect("date"),
            active: true,
            created_at: Utc::now(),
        };
        repo.insert(base.clone()).await.expect("first");

        let mut overlapping = base.clone();
        overlapping.id = DelegationId("dlg-2".to_owned());
        overlapping.start_date = NaiveDate::from_ymd_opt(2026, 8, 10).expect("date");
        overlapping.end_date = NaiveDate::from_ymd_opt(2026, 8, 20).expect("date");
        let error = repo.insert(overlapping).await.expect_err("overlap");
        assert!(matches!(error, RepositoryError::OverlappingDelegation { .. }));
    }
}
