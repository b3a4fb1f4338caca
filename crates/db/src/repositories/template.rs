use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::Row;

use signoff_core::domain::template::{
    ApprovalLineTemplate, ApprovalStepDefinition, StepApprover, TemplateId,
};
use signoff_core::domain::{TenantId, UserId};

use super::{is_unique_violation, RepositoryError, TemplateRepository};
use crate::DbPool;

pub struct SqlTemplateRepository {
    pool: DbPool,
}

impl SqlTemplateRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("bad timestamp `{raw}`: {e}")))
}

fn step_to_columns(step: &ApprovalStepDefinition) -> (&'static str, String) {
    match &step.approver {
        StepApprover::User { user_id } => ("user", user_id.0.clone()),
        StepApprover::Role { role } => ("role", role.clone()),
    }
}

fn step_from_columns(
    position: i64,
    kind: &str,
    key: String,
    mandatory: i64,
    due_in_hours: Option<i64>,
) -> Result<ApprovalStepDefinition, RepositoryError> {
    let approver = match kind {
        "user" => StepApprover::User { user_id: UserId(key) },
        "role" => StepApprover::Role { role: key },
        other => {
            return Err(RepositoryError::Decode(format!("unknown approver kind `{other}`")));
        }
    };
    Ok(ApprovalStepDefinition {
        position: position as u32,
        approver,
        mandatory: mandatory != 0,
        due_in_hours: due_in_hours.map(|hours| hours as u32),
    })
}

async fn load_steps(
    pool: &DbPool,
    template_id: &str,
) -> Result<Vec<ApprovalStepDefinition>, RepositoryError> {
    let rows = sqlx::query(
        "SELECT position, approver_kind, approver_key, mandatory, due_in_hours
         FROM approval_step_definition WHERE template_id = ? ORDER BY position ASC",
    )
    .bind(template_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|row| {
            step_from_columns(
                row.try_get("position").map_err(|e| RepositoryError::Decode(e.to_string()))?,
                &row.try_get::<String, _>("approver_kind")
                    .map_err(|e| RepositoryError::Decode(e.to_string()))?,
                row.try_get("approver_key").map_err(|e| RepositoryError::Decode(e.to_string()))?,
                row.try_get("mandatory").map_err(|e| RepositoryError::Decode(e.to_string()))?,
                row.try_get("due_in_hours").map_err(|e| RepositoryError::Decode(e.to_string()))?,
            )
        })
        .collect()
}

async fn row_to_template(
    pool: &DbPool,
    row: &sqlx::sqlite::SqliteRow,
) -> Result<ApprovalLineTemplate, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tenant_id: String =
        row.try_get("tenant_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let code: String = row.try_get("code").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let doc_type: String =
        row.try_get("doc_type").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let name: String = row.try_get("name").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let is_default: i64 =
        row.try_get("is_default").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let active: i64 =
        row.try_get("active").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let updated_at: String =
        row.try_get("updated_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    let steps = load_steps(pool, &id).await?;

    Ok(ApprovalLineTemplate {
        id: TemplateId(id),
        tenant: TenantId(tenant_id),
        code,
        doc_type,
        name,
        steps,
        is_default: is_default != 0,
        active: active != 0,
        created_at: parse_timestamp(&created_at)?,
        updated_at: parse_timestamp(&updated_at)?,
    })
}

const TEMPLATE_COLUMNS: &str =
    "id, tenant_id, code, doc_type, name, is_default, active, created_at, updated_at";

#[async_trait]
impl TemplateRepository for SqlTemplateRepository {
    async fn find_by_id(
        &self,
        tenant: &TenantId,
        id: &TemplateId,
    ) -> Result<Option<ApprovalLineTemplate>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM approval_line_template
             WHERE id = ? AND tenant_id = ?"
        ))
        .bind(&id.0)
        .bind(&tenant.0)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_template(&self.pool, r).await?)),
            None => Ok(None),
        }
    }

    async fn find_default(
        &self,
        tenant: &TenantId,
        doc_type: &str,
    ) -> Result<Option<ApprovalLineTemplate>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {TEMPLATE_COLUMNS} FROM approval_line_template
             WHERE tenant_id = ? AND doc_type = ? AND is_default = 1 AND active = 1"
        ))
        .bind(&tenant.0)
        .bind(doc_type)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(ref r) => Ok(Some(row_to_template(&self.pool, r).await?)),
            None => Ok(None),
        }
    }

    async fn save(&self, template: ApprovalLineTemplate) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO approval_line_template
                 (id, tenant_id, code, doc_type, name, is_default, active, created_at, updated_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 code = excluded.code,
                 name = excluded.name,
                 is_default = excluded.is_default,
                 active = excluded.active,
                 updated_at = excluded.updated_at",
        )
        .bind(&template.id.0)
        .bind(&template.tenant.0)
        .bind(&template.code)
        .bind(&template.doc_type)
        .bind(&template.name)
        .bind(i64::from(template.is_default))
        .bind(i64::from(template.active))
        .bind(template.created_at.to_rfc3339())
        .bind(template.updated_at.to_rfc3339())
        .execute(&mut *tx)
        .await;

        if let Err(error) = result {
            // SQLite names the violated columns in full; only the
            // single-default index covers approval_line_template.doc_type,
            // so a tenant+code collision stays a plain database error.
            if is_unique_violation(&error)
                && error.to_string().contains("approval_line_template.doc_type")
            {
                return Err(RepositoryError::DuplicateDefaultTemplate {
                    doc_type: template.doc_type,
                });
            }
            return Err(error.into());
        }

        sqlx::query("DELETE FROM approval_step_definition WHERE template_id = ?")
            .bind(&template.id.0)
            .execute(&mut *tx)
            .await?;

        for step in &template.steps {
            let (kind, key) = step_to_columns(step);
            sqlx::query(
                "INSERT INTO approval_step_definition
                     (template_id, position, approver_kind, approver_key, mandatory, due_in_hours)
                 VALUES (?, ?, ?, ?, ?, ?)",
            )
            .bind(&template.id.0)
            .bind(i64::from(step.position))
            .bind(kind)
            .bind(key)
            .bind(i64::from(step.mandatory))
            .bind(step.due_in_hours.map(i64::from))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use signoff_core::domain::template::{
        ApprovalLineTemplate, ApprovalStepDefinition, StepApprover, TemplateId,
    };
    use signoff_core::domain::{TenantId, UserId};

    use super::SqlTemplateRepository;
    use crate::repositories::{RepositoryError, TemplateRepository};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn sample_template(id: &str, code: &str, is_default: bool) -> ApprovalLineTemplate {
        let now = Utc::now();
        ApprovalLineTemplate {
            id: TemplateId(id.to_owned()),
            tenant: TenantId("acme".to_owned()),
            code: code.to_owned(),
            doc_type: "purchase_order".to_owned(),
            name: "Purchase approval".to_owned(),
            steps: vec![
                ApprovalStepDefinition {
                    position: 1,
                    approver: StepApprover::User { user_id: UserId("u-1".to_owned()) },
                    mandatory: true,
                    due_in_hours: Some(24),
                },
                ApprovalStepDefinition {
                    position: 2,
                    approver: StepApprover::Role { role: "plant_manager".to_owned() },
                    mandatory: true,
                    due_in_hours: None,
                },
            ],
            is_default,
            active: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn save_and_find_round_trip_with_steps() {
        let pool = setup().await;
        let repo = SqlTemplateRepository::new(pool);
        let template = sample_template("tpl-1", "PO-STD", true);

        repo.save(template.clone()).await.expect("save");
        let found = repo
            .find_by_id(&TenantId("acme".to_owned()), &TemplateId("tpl-1".to_owned()))
            .await
            .expect("find")
            .expect("exists");

        assert_eq!(found.code, "PO-STD");
        assert_eq!(found.steps.len(), 2);
        assert_eq!(
            found.steps[1].approver,
            StepApprover::Role { role: "plant_manager".to_owned() }
        );
        assert_eq!(found.steps[0].due_in_hours, Some(24));
    }

    #[tokio::test]
    async fn find_default_returns_the_active_default_only() {
        let pool = setup().await;
        let repo = SqlTemplateRepository::new(pool);

        let mut inactive = sample_template("tpl-0", "PO-OLD", true);
        inactive.active = false;
        inactive.is_default = false;
        repo.save(inactive).await.expect("save inactive");
        repo.save(sample_template("tpl-1", "PO-STD", true)).await.expect("save default");

        let found = repo
            .find_default(&TenantId("acme".to_owned()), "purchase_order")
            .await
            .expect("query")
            .expect("default exists");
        assert_eq!(found.id, TemplateId("tpl-1".to_owned()));

        let none = repo
            .find_default(&TenantId("acme".to_owned()), "work_order")
            .await
            .expect("query");
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn second_active_default_is_rejected() {
        let pool = setup().await;
        let repo = SqlTemplateRepository::new(pool);

        repo.save(sample_template("tpl-1", "PO-STD", true)).await.expect("first default");
        let error = repo
            .save(sample_template("tpl-2", "PO-ALT", true))
            .await
            .expect_err("second default must fail");

        assert!(matches!(error, RepositoryError::DuplicateDefaultTemplate { .. }));
    }

    #[tokio::test]
    async fn save_replaces_step_definitions() {
        let pool = setup().await;
        let repo = SqlTemplateRepository::new(pool);

        repo.save(sample_template("tpl-1", "PO-STD", false)).await.expect("save");

        let mut updated = sample_template("tpl-1", "PO-STD", false);
        updated.steps.truncate(1);
        repo.save(updated).await.expect("update");

        let found = repo
            .find_by_id(&TenantId("acme".to_owned()), &TemplateId("tpl-1".to_owned()))
            .await
            .expect("find")
            .expect("exists");
        assert_eq!(found.steps.len(), 1);
    }

    #[tokio::test]
    async fn templates_are_tenant_scoped() {
        let pool = setup().await;
        let repo = SqlTemplateRepository::new(pool);
        repo.save(sample_template("tpl-1", "PO-STD", true)).await.expect("save");

        let other = repo
            .find_by_id(&TenantId("globex".to_owned()), &TemplateId("tpl-1".to_owned()))
            .await
            .expect("query");
        assert!(other.is_none());
    }
}
