use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use signoff_core::domain::instance::{
    ApprovalInstance, ApprovalStepInstance, DocumentRef, InstanceId, InstanceStatus, StepStatus,
};
use signoff_core::domain::{TenantId, UserId};

use super::{is_unique_violation, InstanceRepository, RepositoryError};
use crate::DbPool;

pub struct SqlInstanceRepository {
    pool: DbPool,
}

impl SqlInstanceRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("bad timestamp `{raw}`: {e}")))
}

fn parse_opt_timestamp(raw: Option<String>) -> Result<Option<DateTime<Utc>>, RepositoryError> {
    raw.as_deref().map(parse_timestamp).transpose()
}

fn row_to_step(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalStepInstance, RepositoryError> {
    let position: i64 =
        row.try_get("position").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let approver_id: Option<String> =
        row.try_get("approver_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let nominal_approver_id: Option<String> =
        row.try_get("nominal_approver_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let mandatory: i64 =
        row.try_get("mandatory").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let due_at: Option<String> =
        row.try_get("due_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decided_at: Option<String> =
        row.try_get("decided_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let decision_comment: Option<String> =
        row.try_get("decision_comment").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ApprovalStepInstance {
        position: position as u32,
        approver: approver_id.map(UserId),
        nominal_approver: nominal_approver_id.map(UserId),
        mandatory: mandatory != 0,
        status: StepStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown step status `{status}`")))?,
        due_at: parse_opt_timestamp(due_at)?,
        decided_at: parse_opt_timestamp(decided_at)?,
        decision_comment,
    })
}

async fn load_steps(
    pool: &DbPool,
    instance_id: &str,
) -> Result<Vec<ApprovalStepInstance>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT position, approver_id, nominal_approver_id, mandatory, status,
                due_at, decided_at, decision_comment
         FROM approval_step_instance WHERE instance_id = ? ORDER BY position ASC",
    )
    .bind(instance_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(row_to_step).collect()
}

async fn row_to_instance(
    pool: &DbPool,
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ApprovalInstance, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tenant_id: String =
        row.try_get("tenant_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let doc_type: String =
        row.try_get("doc_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let doc_id: String =
        row.try_get("doc_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let requester_id: String =
        row.try_get("requester_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let requested_at: String =
        row.try_get("requested_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let status: String =
        row.try_get("status").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let version: i64 =
        row.try_get("version").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let cancelled_by: Option<String> =
        row.try_get("cancelled_by").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let cancel_reason: Option<String> =
        row.try_get("cancel_reason").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let steps = load_steps(pool, &id).await?;

    Ok(ApprovalInstance {
        id: InstanceId(id),
        tenant: TenantId(tenant_id),
        document: DocumentRef { doc_type, doc_id },
        requester: UserId(requester_id),
        requested_at: parse_timestamp(&requested_at)?,
        status: InstanceStatus::parse(&status)
            .ok_or_else(|| RepositoryError::Decode(format!("unknown instance status `{status}`")))?,
        steps,
        version: version as u32,
        cancelled_by: cancelled_by.map(UserId),
        cancel_reason,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

async fn insert_steps(
    tx: &mut sqlx::SqliteConnection,
    instance_id: &str,
    steps: &[ApprovalStepInstance],
) -> Result<(), RepositoryError> {
    for step in steps {
        sqlx::query(
            "INSERT INTO approval_step_instance
                 (instance_id, position, approver_id, nominal_approver_id, mandatory,
                  status, due_at, decided_at, decision_comment)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(instance_id)
        .bind(i64::from(step.position))
        .bind(step.approver.as_ref().map(|user| user.0.clone()))
        .bind(step.nominal_approver.as_ref().map(|user| user.0.clone()))
        .bind(i64::from(step.mandatory))
        .bind(step.status.as_str())
        .bind(step.due_at.map(|dt| dt.to_rfc3339()))
        .bind(step.decided_at.map(|dt| dt.to_rfc3339()))
        .bind(step.decision_comment.as_deref())
        .execute(&mut *tx)
        .await?;
    }
    Ok(())
}

const INSTANCE_COLUMNS: &str = "id, tenant_id, doc_type, doc_id, requester_id, requested_at, \
                                status, version, cancelled_by, cancel_reason, created_at, updated_at";

const NON_TERMINAL: &str = "('pending', 'in_progress')";

#[async_trait]
impl InstanceRepository for SqlInstanceRepository {
    async fn find_by_id(
        &self,
        tenant: &TenantId,
        id: &InstanceId,
    ) -> Result<Option<ApprovalInstance>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_instance WHERE id = ? AND tenant_id = ?"
        ))
        .bind(&id.0)
        .bind(&tenant.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_instance(&self.pool, r).await?)),
            None => Ok(None),
        }
    }

    async fn find_active_by_document(
        &self,
        tenant: &TenantId,
        doc_type: &str,
        doc_id: &str,
    ) -> Result<Option<ApprovalInstance>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_instance
             WHERE tenant_id = ? AND doc_type = ? AND doc_id = ?
               AND status IN {NON_TERMINAL}"
        ))
        .bind(&tenant.0)
        .bind(doc_type)
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_instance(&self.pool, r).await?)),
            None => Ok(None),
        }
    }

    async fn find_latest_by_document(
        &self,
        tenant: &TenantId,
        doc_type: &str,
        doc_id: &str,
    ) -> Result<Option<ApprovalInstance>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_instance
             WHERE tenant_id = ? AND doc_type = ? AND doc_id = ?
             ORDER BY requested_at DESC, created_at DESC LIMIT 1"
        ))
        .bind(&tenant.0)
        .bind(doc_type)
        .bind(doc_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_instance(&self.pool, r).await?)),
            None => Ok(None),
        }
    }

    async fn insert(&self, instance: ApprovalInstance) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO approval_instance
                 (id, tenant_id, doc_type, doc_id, requester_id, requested_at,
                  status, version, cancelled_by, cancel_reason, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&instance.id.0)
        .bind(&instance.tenant.0)
        .bind(&instance.document.doc_type)
        .bind(&instance.document.doc_id)
        .bind(&instance.requester.0)
        .bind(instance.requested_at.to_rfc3339())
        .bind(instance.status.as_str())
        .bind(i64::from(instance.version))
        .bind(instance.cancelled_by.as_ref().map(|user| user.0.clone()))
        .bind(instance.cancel_reason.as_deref())
        .bind(instance.created_at.to_rfc3339())
        .bind(instance.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        if let Err(error) = result {
            if is_unique_violation(&error) {
                return Err(RepositoryError::DuplicateDocument {
                    doc_type: instance.document.doc_type,
                    doc_id: instance.document.doc_id,
                });
            }
            return Err(error.into());
        }

        insert_steps(&mut *tx, &instance.id.0, &instance.steps).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn update(
        &self,
        instance: ApprovalInstance,
        expected_version: u32,
    ) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let updated = sqlx::query(
            "UPDATE approval_instance SET
                 status = ?, version = ?, cancelled_by = ?, cancel_reason = ?, updated_at = ?
             WHERE id = ? AND tenant_id = ? AND version = ?",
        )
        .bind(instance.status.as_str())
        .bind(i64::from(instance.version))
        .bind(instance.cancelled_by.as_ref().map(|user| user.0.clone()))
        .bind(instance.cancel_reason.as_deref())
        .bind(instance.updated_at.to_rfc3339())
        .bind(&instance.id.0)
        .bind(&instance.tenant.0)
        .bind(i64::from(expected_version))
        .execute(&mut *tx)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(RepositoryError::VersionConflict {
                instance_id: instance.id.0,
                expected: expected_version,
            });
        }

        sqlx::query("DELETE FROM approval_step_instance WHERE instance_id = ?")
            .bind(&instance.id.0)
            .execute(&mut *tx)
            .await?;
        insert_steps(&mut *tx, &instance.id.0, &instance.steps).await?;

        tx.commit().await?;
        Ok(())
    }

    async fn list_non_terminal(
        &self,
        tenant: &TenantId,
    ) -> Result<Vec<ApprovalInstance>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_instance
             WHERE tenant_id = ? AND status IN {NON_TERMINAL}
             ORDER BY requested_at ASC"
        ))
        .bind(&tenant.0)
        .fetch_all(&self.pool)
        .await?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in &rows {
            instances.push(row_to_instance(&self.pool, row).await?);
        }
        Ok(instances)
    }

    async fn list_awaiting_approver(
        &self,
        tenant: &TenantId,
        approver: &UserId,
    ) -> Result<Vec<ApprovalInstance>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {INSTANCE_COLUMNS} FROM approval_instance
             WHERE tenant_id = ? AND status = 'in_progress' AND id IN (
                 SELECT instance_id FROM approval_step_instance
                 WHERE status = 'in_progress' AND approver_id = ?
             )
             ORDER BY requested_at ASC"
        ))
        .bind(&tenant.0)
        .bind(&approver.0)
        .fetch_all(&self.pool)
        .await?;

        let mut instances = Vec::with_capacity(rows.len());
        for row in &rows {
            instances.push(row_to_instance(&self.pool, row).await?);
        }
        Ok(instances)
    }
}
