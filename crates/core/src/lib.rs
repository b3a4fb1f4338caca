pub mod delegation;
pub mod domain;
pub mod errors;
pub mod events;
pub mod machine;

pub use delegation::{has_overlap, ranges_overlap, resolve_effective, EffectiveApprover};
pub use domain::delegation::{ApprovalDelegation, DelegationId};
pub use domain::instance::{
    ApprovalInstance, ApprovalStepInstance, DocumentRef, InstanceId, InstanceStatus, StepStatus,
};
pub use domain::template::{
    ApprovalLineTemplate, ApprovalStepDefinition, StepApprover, TemplateId, TemplateIssue,
};
pub use domain::{TenantId, UserId};
pub use errors::{ConflictError, EngineError, NotFoundError};
pub use events::{EngineEvent, EventSink, InMemoryEventSink, NoopEventSink};
pub use machine::{
    apply_approval, apply_cancellation, apply_rejection, overdue_steps, start_first_step,
    TransitionOutcome,
};
