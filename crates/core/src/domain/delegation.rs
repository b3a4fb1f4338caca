use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{TenantId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DelegationId(pub String);

/// Time-bounded authority transfer. Both dates are inclusive; an
/// expired delegation needs no cleanup, readers just stop matching it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDelegation {
    pub id: DelegationId,
    pub tenant: TenantId,
    pub delegator: UserId,
    pub delegate: UserId,
    pub start_date: NaiveDate,
    pub end_date: NaiveDate,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl ApprovalDelegation {
    pub fn covers(&self, on: NaiveDate) -> bool {
        self.start_date <= on && on <= self.end_date
    }

    pub fn is_effective_on(&self, on: NaiveDate) -> bool {
        self.active && self.covers(on)
    }
}
