use chrono::NaiveDate;

use crate::domain::delegation::ApprovalDelegation;
use crate::domain::UserId;

/// Two inclusive date ranges [s1,e1] and [s2,e2] overlap iff
/// s1 <= e2 && s2 <= e1.
pub fn ranges_overlap(s1: NaiveDate, e1: NaiveDate, s2: NaiveDate, e2: NaiveDate) -> bool {
    s1 <= e2 && s2 <= e1
}

/// Creation-time check: does any active delegation of the same
/// delegator overlap the proposed [start, end] range?
pub fn has_overlap(existing: &[ApprovalDelegation], start: NaiveDate, end: NaiveDate) -> bool {
    existing
        .iter()
        .filter(|delegation| delegation.active)
        .any(|delegation| ranges_overlap(delegation.start_date, delegation.end_date, start, end))
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EffectiveApprover {
    pub user: UserId,
    /// Set when a delegation redirected authority away from the
    /// nominal approver.
    pub delegated_from: Option<UserId>,
    /// More than one active delegation covered the date. The creation
    /// check should make this impossible; resolution stays
    /// deterministic and the caller logs it instead of failing, since
    /// approval must not be blocked by a configuration bug.
    pub ambiguous: bool,
}

/// Resolve who actually holds approval authority for `nominal` on the
/// given date. Pure over already-fetched delegation rows.
pub fn resolve_effective(
    delegations_for_nominal: &[ApprovalDelegation],
    nominal: &UserId,
    on: NaiveDate,
) -> EffectiveApprover {
    let mut matching: Vec<&ApprovalDelegation> = delegations_for_nominal
        .iter()
        .filter(|delegation| &delegation.delegator == nominal)
        .filter(|delegation| delegation.is_effective_on(on))
        .collect();

    match matching.len() {
        0 => EffectiveApprover { user: nominal.clone(), delegated_from: None, ambiguous: false },
        1 => EffectiveApprover {
            user: matching[0].delegate.clone(),
            delegated_from: Some(nominal.clone()),
            ambiguous: false,
        },
        _ => {
            // Most recent start date wins; id breaks exact ties so
            // repeated calls pick the same row.
            matching.sort_by(|left, right| {
                right
                    .start_date
                    .cmp(&left.start_date)
                    .then_with(|| right.id.cmp(&left.id))
            });
            EffectiveApprover {
                user: matching[0].delegate.clone(),
                delegated_from: Some(nominal.clone()),
                ambiguous: true,
            }
        }
    }
}
