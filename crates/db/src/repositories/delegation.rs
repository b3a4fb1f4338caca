use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use sqlx::Row;

use signoff_core::domain::delegation::{ApprovalDelegation, DelegationId};
use signoff_core::domain::{TenantId, UserId};

use super::{DelegationRepository, RepositoryError};
use crate::DbPool;

pub struct SqlDelegationRepository {
    pool: DbPool,
}

impl SqlDelegationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

const DATE_FORMAT: &str = "%Y-%m-%d";

fn parse_date(raw: &str) -> Result<NaiveDate, RepositoryError> {
    NaiveDate::parse_from_str(raw, DATE_FORMAT)
        .map_err(|e| RepositoryError::Decode(format!("bad date `{raw}`: {e}")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Decode(format!("bad timestamp `{raw}`: {e}")))
}

fn row_to_delegation(row: &sqlx::sqlite::SqliteRow) -> Result<ApprovalDelegation, RepositoryError> {
    let id: String = row.try_get("id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let tenant_id: String =
        row.try_get("tenant_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let delegator_id: String =
        row.try_get("delegator_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let delegate_id: String =
        row.try_get("delegate_id").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let start_date: String =
        row.try_get("start_date").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let end_date: String =
        row.try_get("end_date").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let active: i64 =
        row.try_get("active").map_err(|e| RepositoryError::Decode(e.to_string()))?;
    let created_at: String =
        row.try_get("created_at").map_err(|e| RepositoryError::Decode(e.to_string()))?;

    Ok(ApprovalDelegation {
        id: DelegationId(id),
        tenant: TenantId(tenant_id),
        delegator: UserId(delegator_id),
        delegate: UserId(delegate_id),
        start_date: parse_date(&start_date)?,
        end_date: parse_date(&end_date)?,
        active: active != 0,
        created_at: parse_timestamp(&created_at)?,
    })
}

const DELEGATION_COLUMNS: &str =
    "id, tenant_id, delegator_id, delegate_id, start_date, end_date, active, created_at";

#[async_trait]
impl DelegationRepository for SqlDelegationRepository {
    async fn find_by_id(
        &self,
        tenant: &TenantId,
        id: &DelegationId,
    ) -> Result<Option<ApprovalDelegation>, RepositoryError> {
        let row = sqlx::query(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM approval_delegation
             WHERE id = ? AND tenant_id = ?"
        ))
        .bind(&id.0)
        .bind(&tenant.0)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_delegation).transpose()
    }

    async fn find_active_for_delegator(
        &self,
        tenant: &TenantId,
        delegator: &UserId,
    ) -> Result<Vec<ApprovalDelegation>, RepositoryError> {
        let rows = sqlx::query(&format!(
            "SELECT {DELEGATION_COLUMNS} FROM approval_delegation
             WHERE tenant_id = ? AND delegator_id = ? AND active = 1
             ORDER BY start_date ASC"
        ))
        .bind(&tenant.0)
        .bind(&delegator.0)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(row_to_delegation).collect()
    }

    async fn insert(&self, delegation: ApprovalDelegation) -> Result<(), RepositoryError> {
        let mut tx = self.pool.begin().await?;

        // Re-check overlap inside the transaction; ISO dates compare
        // correctly as text.
        let overlap: i64 = sqlx::query(
            "SELECT COUNT(*) AS count FROM approval_delegation
             WHERE tenant_id = ? AND delegator_id = ? AND active = 1
               AND start_date <= ? AND ? <= end_date",
        )
        .bind(&delegation.tenant.0)
        .bind(&delegation.delegator.0)
        .bind(delegation.end_date.format(DATE_FORMAT).to_string())
        .bind(delegation.start_date.format(DATE_FORMAT).to_string())
        .fetch_one(&mut *tx)
        .await?
        .try_get("count")
        .map_err(|e| RepositoryError::Decode(e.to_string()))?;

        if overlap > 0 {
            return Err(RepositoryError::OverlappingDelegation {
                delegator_id: delegation.delegator.0,
            });
        }

        sqlx::query(
            "INSERT INTO approval_delegation
                 (id, tenant_id, delegator_id, delegate_id, start_date, end_date, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(&delegation.id.0)
        .bind(&delegation.tenant.0)
        .bind(&delegation.delegator.0)
        .bind(&delegation.delegate.0)
        .bind(delegation.start_date.format(DATE_FORMAT).to_string())
        .bind(delegation.end_date.format(DATE_FORMAT).to_string())
        .bind(i64::from(delegation.active))
        .bind(delegation.created_at.to_rfc3339())
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(())
    }

    async fn save(&self, delegation: ApprovalDelegation) -> Result<(), RepositoryError> {
        sqlx::query(
            "INSERT INTO approval_delegation
                 (id, tenant_id, delegator_id, delegate_id, start_date, end_date, active, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                 delegate_id = excluded.delegate_id,
                 start_date = excluded.start_date,
                 end_date = excluded.end_date,
                 active = excluded.active",
        )
        .bind(&delegation.id.0)
        .bind(&delegation.tenant.0)
        .bind(&delegation.delegator.0)
        .bind(&delegation.delegate.0)
        .bind(delegation.start_date.format(DATE_FORMAT).to_string())
        .bind(delegation.end_date.format(DATE_FORMAT).to_string())
        .bind(i64::from(delegation.active))
        .bind(delegation.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::{NaiveDate, Utc};

    use signoff_core::domain::delegation::{ApprovalDelegation, DelegationId};
    use signoff_core::domain::{TenantId, UserId};

    use super::SqlDelegationRepository;
    use crate::repositories::{DelegationRepository, RepositoryError};
    use crate::{connect_with_settings, migrations};

    async fn setup() -> sqlx::SqlitePool {
        let pool = connect_with_settings("sqlite::memory:", 1, 30).await.expect("connect");
        migrations::run_pending(&pool).await.expect("migrations");
        pool
    }

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).expect("valid date")
    }

    fn delegation(id: &str, delegator: &str, start: NaiveDate, end: NaiveDate) -> ApprovalDelegation {
        ApprovalDelegation {
            id: DelegationId(id.to_owned()),
            tenant: TenantId("acme".to_owned()),
            delegator: UserId(delegator.to_owned()),
            delegate: UserId("u-3".to_owned()),
            start_date: start,
            end_date: end,
            active: true,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn insert_and_list_round_trip() {
        let pool = setup().await;
        let repo = SqlDelegationRepository::new(pool);

        repo.insert(delegation("dlg-1", "u-1", date(2026, 8, 1), date(2026, 8, 10)))
            .await
            .expect("insert");

        let active = repo
            .find_active_for_delegator(&TenantId("acme".to_owned()), &UserId("u-1".to_owned()))
            .await
            .expect("list");
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].start_date, date(2026, 8, 1));
        assert_eq!(active[0].end_date, date(2026, 8, 10));
    }

    #[tokio::test]
    async fn overlapping_insert_is_rejected_in_transaction() {
        let pool = setup().await;
        let repo = SqlDelegationRepository::new(pool);

        repo.insert(delegation("dlg-1", "u-1", date(2026, 8, 1), date(2026, 8, 10)))
            .await
            .expect("first insert");

        let error = repo
            .insert(delegation("dlg-2", "u-1", date(2026, 8, 10), date(2026, 8, 20)))
            .await
            .expect_err("overlap must be rejected");
        assert!(matches!(error, RepositoryError::OverlappingDelegation { .. }));

        // Adjacent but non-overlapping ranges are fine.
        repo.insert(delegation("dlg-3", "u-1", date(2026, 8, 11), date(2026, 8, 20)))
            .await
            .expect("non-overlapping insert");
    }

    #[tokio::test]
    async fn overlap_check_ignores_other_delegators_and_inactive_rows() {
        let pool = setup().await;
        let repo = SqlDelegationRepository::new(pool);

        repo.insert(delegation("dlg-1", "u-2", date(2026, 8, 1), date(2026, 8, 31)))
            .await
            .expect("other delegator");

        let mut revoked = delegation("dlg-2", "u-1", date(2026, 8, 1), date(2026, 8, 31));
        repo.insert(revoked.clone()).await.expect("insert");
        revoked.active = false;
        repo.save(revoked).await.expect("revoke");

        repo.insert(delegation("dlg-3", "u-1", date(2026, 8, 5), date(2026, 8, 15)))
            .await
            .expect("overlap with inactive row is allowed");
    }

    #[tokio::test]
    async fn delegations_are_tenant_scoped() {
        let pool = setup().await;
        let repo = SqlDelegationRepository::new(pool);
        repo.insert(delegation("dlg-1", "u-1", date(2026, 8, 1), date(2026, 8, 10)))
            .await
            .expect("insert");

        let other = repo
            .find_active_for_delegator(&TenantId("globex".to_owned()), &UserId("u-1".to_owned()))
            .await
            .expect("list");
        assert!(other.is_empty());

        let missing = repo
            .find_by_id(&TenantId("globex".to_owned()), &DelegationId("dlg-1".to_owned()))
            .await
            .expect("query");
        assert!(missing.is_none());
    }
}
