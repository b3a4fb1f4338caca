use chrono::{DateTime, Utc};

use crate::domain::instance::{
    ApprovalInstance, ApprovalStepInstance, InstanceStatus, StepStatus,
};
use crate::domain::UserId;
use crate::errors::{ConflictError, EngineError, NotFoundError};

/// Result of one applied transition. `auto_skipped` lists positions
/// that were skipped while advancing (non-mandatory steps whose
/// approver was unresolvable at creation time).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransitionOutcome {
    pub instance_status: InstanceStatus,
    pub auto_skipped: Vec<u32>,
}

struct Activation {
    skipped: Vec<u32>,
    /// True when no actionable step remained past the starting point.
    exhausted: bool,
}

/// Walk forward from `after`, skipping auto-skip candidates, and put
/// the first actionable step into IN_PROGRESS.
fn activate_after(instance: &mut ApprovalInstance, after: u32, _now: DateTime<Utc>) -> Activation {
    let max = instance.max_position();
    let mut skipped = Vec::new();

    let mut position = after + 1;
    while position <= max {
        let Some(step) = instance.step_mut(position) else {
            position += 1;
            continue;
        };
        if step.status != StepStatus::Pending {
            position += 1;
            continue;
        }
        if !step.mandatory && step.approver.is_none() {
            step.status = StepStatus::Skipped;
            skipped.push(position);
            position += 1;
            continue;
        }
        step.status = StepStatus::InProgress;
        return Activation { skipped, exhausted: false };
    }

    Activation { skipped, exhausted: true }
}

/// Activate the first actionable step of a freshly built instance and
/// mark it IN_PROGRESS. Fails when every step skips away: an instance
/// with nothing to approve is a template bug surfaced to the caller.
pub fn start_first_step(
    instance: &mut ApprovalInstance,
    now: DateTime<Utc>,
) -> Result<Vec<u32>, EngineError> {
    let activation = activate_after(instance, 0, now);
    if activation.exhausted {
        return Err(EngineError::validation(
            "approval line resolves to no actionable step",
        ));
    }
    instance.status = InstanceStatus::InProgress;
    Ok(activation.skipped)
}

fn check_actionable(
    instance: &ApprovalInstance,
    position: u32,
    approver: &UserId,
) -> Result<(), EngineError> {
    let Some(step) = instance.step(position) else {
        return Err(NotFoundError::Step { instance: instance.id.clone(), position }.into());
    };

    if let Some(expected) = &step.approver {
        if expected != approver {
            return Err(ConflictError::WrongApprover {
                instance: instance.id.clone(),
                position,
                expected: expected.clone(),
                actual: approver.clone(),
            }
            .into());
        }
    }

    if instance.is_terminal() {
        return Err(ConflictError::InvalidState {
            instance: instance.id.clone(),
            position: None,
            expected: "in_progress",
            actual: instance.status.as_str().to_owned(),
        }
        .into());
    }

    if step.status != StepStatus::InProgress {
        return Err(ConflictError::InvalidState {
            instance: instance.id.clone(),
            position: Some(position),
            expected: "in_progress",
            actual: step.status.as_str().to_owned(),
        }
        .into());
    }

    Ok(())
}

/// Approve the step at `position`. Advances the chain; the last
/// cleared step closes the instance as APPROVED.
pub fn apply_approval(
    instance: &mut ApprovalInstance,
    position: u32,
    approver: &UserId,
    comment: Option<String>,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, EngineError> {
    check_actionable(instance, position, approver)?;

    {
        let step = instance.step_mut(position).expect("step checked above");
        step.status = StepStatus::Approved;
        step.decided_at = Some(now);
        step.decision_comment = comment;
    }

    let mut auto_skipped = Vec::new();
    if position == instance.max_position() {
        instance.status = InstanceStatus::Approved;
    } else {
        let activation = activate_after(instance, position, now);
        auto_skipped = activation.skipped;
        if activation.exhausted {
            instance.status = InstanceStatus::Approved;
        }
    }

    instance.version += 1;
    instance.updated_at = now;
    Ok(TransitionOutcome { instance_status: instance.status, auto_skipped })
}

/// Reject the step at `position`. Rejection halts the whole chain
/// immediately; unreached steps stay PENDING to preserve the history
/// of what was never acted on. A reason is mandatory.
pub fn apply_rejection(
    instance: &mut ApprovalInstance,
    position: u32,
    approver: &UserId,
    comment: &str,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, EngineError> {
    if comment.trim().is_empty() {
        return Err(EngineError::validation("rejection requires a non-empty comment"));
    }

    check_actionable(instance, position, approver)?;

    let step = instance.step_mut(position).expect("step checked above");
    step.status = StepStatus::Rejected;
    step.decided_at = Some(now);
    step.decision_comment = Some(comment.to_owned());

    instance.status = InstanceStatus::Rejected;
    instance.version += 1;
    instance.updated_at = now;
    Ok(TransitionOutcome {
        instance_status: InstanceStatus::Rejected,
        auto_skipped: Vec::new(),
    })
}

/// Cancel a running instance. The currently IN_PROGRESS step is left
/// as-is for audit purposes.
pub fn apply_cancellation(
    instance: &mut ApprovalInstance,
    actor: &UserId,
    reason: Option<String>,
    now: DateTime<Utc>,
) -> Result<TransitionOutcome, EngineError> {
    if instance.status != InstanceStatus::InProgress {
        return Err(ConflictError::InvalidState {
            instance: instance.id.clone(),
            position: None,
            expected: "in_progress",
            actual: instance.status.as_str().to_owned(),
        }
        .into());
    }

    instance.status = InstanceStatus::Cancelled;
    instance.cancelled_by = Some(actor.clone());
    instance.cancel_reason = reason;
    instance.version += 1;
    instance.updated_at = now;
    Ok(TransitionOutcome {
        instance_status: InstanceStatus::Cancelled,
        auto_skipped: Vec::new(),
    })
}

/// Overdue is a derived fact, never a stored status: an IN_PROGRESS
/// step whose due date has passed. Terminal instances report nothing
/// even if a step was left IN_PROGRESS by cancellation.
pub fn overdue_steps(
    instance: &ApprovalInstance,
    now: DateTime<Utc>,
) -> Vec<&ApprovalStepInstance> {
    if instance.is_terminal() {
        return Vec::new();
    }
    instance
        .steps
        .iter()
        .filter(|step| step.status == StepStatus::InProgress)
        .filter(|step| step.due_at.is_some_and(|due| due < now))
        .collect()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};

    use super::{
        apply_approval, apply_cancellation, apply_rejection, overdue_steps, start_first_step,
    };
    use crate::domain::instance::{
        ApprovalInstance, ApprovalStepInstance, DocumentRef, InstanceId, InstanceStatus,
        StepStatus,
    };
    use crate::domain::{TenantId, UserId};
    use crate::errors::{ConflictError, EngineError};

    fn user(id: &str) -> UserId {
        UserId(id.to_owned())
    }

    fn step(position: u32, approver: Option<&str>, mandatory: bool) -> ApprovalStepInstance {
        ApprovalStepInstance {
            position,
            approver: approver.map(user),
            nominal_approver: approver.map(user),
            mandatory,
            status: StepStatus::Pending,
            due_at: None,
            decided_at: None,
            decision_comment: None,
        }
    }

    fn instance(steps: Vec<ApprovalStepInstance>) -> ApprovalInstance {
        let now = Utc::now();
        let mut instance = ApprovalInstance {
            id: InstanceId("inst-1".to_owned()),
            tenant: TenantId("acme".to_owned()),
            document: DocumentRef::new("purchase_order", "PO-42"),
            requester: user("u-0"),
            requested_at: now,
            status: InstanceStatus::Pending,
            steps,
            version: 1,
            cancelled_by: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };
        start_first_step(&mut instance, now).expect("instance must start");
        instance
    }

    fn two_step_instance() -> ApprovalInstance {
        instance(vec![step(1, Some("u-1"), true), step(2, Some("u-2"), true)])
    }

    fn sequence_invariant_holds(instance: &ApprovalInstance) -> bool {
        // Cleared steps must form the prefix 1..k below the first
        // non-cleared position.
        let mut seen_blocker = false;
        for position in 1..=instance.max_position() {
            let step = instance.step(position).expect("contiguous steps");
            if step.status.is_cleared() {
                if seen_blocker {
                    return false;
                }
            } else {
                seen_blocker = true;
            }
        }
        true
    }

    #[test]
    fn approval_advances_to_next_step_then_closes() {
        // Scenario A: two mandatory steps, U1 then U2.
        let mut inst = two_step_instance();
        assert_eq!(inst.status, InstanceStatus::InProgress);
        assert_eq!(inst.current_position(), Some(1));

        let now = Utc::now();
        let outcome = apply_approval(&mut inst, 1, &user("u-1"), None, now).expect("approve 1");
        assert_eq!(outcome.instance_status, InstanceStatus::InProgress);
        assert_eq!(inst.step(1).unwrap().status, StepStatus::Approved);
        assert_eq!(inst.step(2).unwrap().status, StepStatus::InProgress);
        assert!(sequence_invariant_holds(&inst));

        let outcome = apply_approval(&mut inst, 2, &user("u-2"), Some("ok".to_owned()), now)
            .expect("approve 2");
        assert_eq!(outcome.instance_status, InstanceStatus::Approved);
        assert!(inst.is_terminal());
        assert_eq!(inst.version, 3);
    }

    #[test]
    fn rejection_closes_instance_and_leaves_later_steps_pending() {
        // Scenario B.
        let mut inst = two_step_instance();
        let outcome =
            apply_rejection(&mut inst, 1, &user("u-1"), "insufficient budget", Utc::now())
                .expect("reject 1");

        assert_eq!(outcome.instance_status, InstanceStatus::Rejected);
        assert_eq!(inst.step(1).unwrap().status, StepStatus::Rejected);
        assert_eq!(
            inst.step(1).unwrap().decision_comment.as_deref(),
            Some("insufficient budget")
        );
        assert_eq!(inst.step(2).unwrap().status, StepStatus::Pending);
    }

    #[test]
    fn rejection_without_comment_is_a_validation_error() {
        let mut inst = two_step_instance();
        let error = apply_rejection(&mut inst, 1, &user("u-1"), "  ", Utc::now())
            .expect_err("blank comment must fail");
        assert!(matches!(error, EngineError::Validation { .. }));
        // No state change before validation.
        assert_eq!(inst.step(1).unwrap().status, StepStatus::InProgress);
        assert_eq!(inst.version, 1);
    }

    #[test]
    fn wrong_approver_is_rejected_with_expected_identity() {
        let mut inst = two_step_instance();
        let error = apply_approval(&mut inst, 1, &user("u-2"), None, Utc::now())
            .expect_err("u-2 cannot act on step 1");

        assert_eq!(
            error,
            EngineError::Conflict(ConflictError::WrongApprover {
                instance: inst.id.clone(),
                position: 1,
                expected: user("u-1"),
                actual: user("u-2"),
            })
        );
    }

    #[test]
    fn acting_on_a_pending_step_is_an_invalid_state_conflict() {
        let mut inst = two_step_instance();
        let error = apply_approval(&mut inst, 2, &user("u-2"), None, Utc::now())
            .expect_err("step 2 is still blocked");
        assert!(matches!(
            error,
            EngineError::Conflict(ConflictError::InvalidState { position: Some(2), .. })
        ));
    }

    #[test]
    fn missing_step_is_not_found() {
        let mut inst = two_step_instance();
        let error = apply_approval(&mut inst, 9, &user("u-1"), None, Utc::now())
            .expect_err("no step 9");
        assert!(error.is_not_found());
    }

    #[test]
    fn terminal_instance_rejects_every_further_action() {
        let mut inst = two_step_instance();
        let now = Utc::now();
        apply_approval(&mut inst, 1, &user("u-1"), None, now).expect("approve 1");
        apply_approval(&mut inst, 2, &user("u-2"), None, now).expect("approve 2");
        let version = inst.version;

        let approve_again = apply_approval(&mut inst, 2, &user("u-2"), None, now);
        assert!(matches!(approve_again, Err(EngineError::Conflict(_))));

        let reject = apply_rejection(&mut inst, 2, &user("u-2"), "late", now);
        assert!(matches!(reject, Err(EngineError::Conflict(_))));

        let cancel = apply_cancellation(&mut inst, &user("u-0"), None, now);
        assert!(matches!(cancel, Err(EngineError::Conflict(_))));

        assert_eq!(inst.version, version);
        assert_eq!(inst.status, InstanceStatus::Approved);
    }

    #[test]
    fn single_step_instance_closes_on_first_approval() {
        let mut inst = instance(vec![step(1, Some("u-1"), true)]);
        let outcome =
            apply_approval(&mut inst, 1, &user("u-1"), None, Utc::now()).expect("approve");
        assert_eq!(outcome.instance_status, InstanceStatus::Approved);
    }

    #[test]
    fn unresolvable_optional_step_is_skipped_in_cascade() {
        let mut inst = instance(vec![
            step(1, Some("u-1"), true),
            step(2, None, false),
            step(3, None, false),
            step(4, Some("u-4"), true),
        ]);

        let outcome =
            apply_approval(&mut inst, 1, &user("u-1"), None, Utc::now()).expect("approve 1");
        assert_eq!(outcome.auto_skipped, vec![2, 3]);
        assert_eq!(inst.step(2).unwrap().status, StepStatus::Skipped);
        assert_eq!(inst.step(3).unwrap().status, StepStatus::Skipped);
        assert_eq!(inst.step(4).unwrap().status, StepStatus::InProgress);
        assert!(sequence_invariant_holds(&inst));
    }

    #[test]
    fn cascade_consuming_the_tail_closes_the_instance_approved() {
        let mut inst = instance(vec![step(1, Some("u-1"), true), step(2, None, false)]);
        let outcome =
            apply_approval(&mut inst, 1, &user("u-1"), None, Utc::now()).expect("approve 1");

        assert_eq!(outcome.instance_status, InstanceStatus::Approved);
        assert_eq!(outcome.auto_skipped, vec![2]);
        assert_eq!(inst.step(2).unwrap().status, StepStatus::Skipped);
    }

    #[test]
    fn leading_optional_unresolvable_step_is_skipped_at_start() {
        let inst = instance(vec![step(1, None, false), step(2, Some("u-2"), true)]);
        assert_eq!(inst.step(1).unwrap().status, StepStatus::Skipped);
        assert_eq!(inst.step(2).unwrap().status, StepStatus::InProgress);
    }

    #[test]
    fn instance_with_only_skippable_steps_fails_to_start() {
        let now = Utc::now();
        let mut inst = ApprovalInstance {
            id: InstanceId("inst-2".to_owned()),
            tenant: TenantId("acme".to_owned()),
            document: DocumentRef::new("purchase_order", "PO-43"),
            requester: user("u-0"),
            requested_at: now,
            status: InstanceStatus::Pending,
            steps: vec![step(1, None, false)],
            version: 1,
            cancelled_by: None,
            cancel_reason: None,
            created_at: now,
            updated_at: now,
        };
        let error = start_first_step(&mut inst, now).expect_err("nothing to approve");
        assert!(matches!(error, EngineError::Validation { .. }));
    }

    #[test]
    fn cancellation_leaves_current_step_untouched() {
        let mut inst = two_step_instance();
        let outcome =
            apply_cancellation(&mut inst, &user("u-0"), Some("superseded".to_owned()), Utc::now())
                .expect("cancel");

        assert_eq!(outcome.instance_status, InstanceStatus::Cancelled);
        assert_eq!(inst.step(1).unwrap().status, StepStatus::InProgress);
        assert_eq!(inst.cancelled_by, Some(user("u-0")));
        assert_eq!(inst.cancel_reason.as_deref(), Some("superseded"));
    }

    #[test]
    fn self_approval_is_not_blocked() {
        // Requester u-0 is also the effective approver of step 1.
        let mut inst = instance(vec![step(1, Some("u-0"), true)]);
        let outcome =
            apply_approval(&mut inst, 1, &user("u-0"), None, Utc::now()).expect("self approval");
        assert_eq!(outcome.instance_status, InstanceStatus::Approved);
    }

    #[test]
    fn overdue_reports_only_in_progress_steps_past_due() {
        // Scenario E shape: due in 24h, observed at +25h and +1h.
        let created = Utc::now();
        let mut inst = two_step_instance();
        inst.step_mut(1).unwrap().due_at = Some(created + Duration::hours(24));

        assert!(overdue_steps(&inst, created + Duration::hours(1)).is_empty());

        let overdue = overdue_steps(&inst, created + Duration::hours(25));
        assert_eq!(overdue.len(), 1);
        assert_eq!(overdue[0].position, 1);
    }

    #[test]
    fn cancelled_instance_reports_nothing_overdue() {
        let created = Utc::now();
        let mut inst = two_step_instance();
        inst.step_mut(1).unwrap().due_at = Some(created + Duration::hours(24));
        apply_cancellation(&mut inst, &user("u-0"), None, created).expect("cancel");

        assert!(overdue_steps(&inst, created + Duration::hours(48)).is_empty());
    }
}
