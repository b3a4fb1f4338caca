use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{TenantId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceId(pub String);

/// Opaque reference to the document under approval. The engine never
/// inspects document content.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DocumentRef {
    pub doc_type: String,
    pub doc_id: String,
}

impl DocumentRef {
    pub fn new(doc_type: impl Into<String>, doc_id: impl Into<String>) -> Self {
        Self { doc_type: doc_type.into(), doc_id: doc_id.into() }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Cancelled,
}

impl InstanceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "cancelled" => Some(Self::Cancelled),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Approved | Self::Rejected | Self::Cancelled)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    InProgress,
    Approved,
    Rejected,
    Skipped,
}

impl StepStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Skipped => "skipped",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "in_progress" => Some(Self::InProgress),
            "approved" => Some(Self::Approved),
            "rejected" => Some(Self::Rejected),
            "skipped" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// A step counts as cleared once it can no longer block its
    /// successors.
    pub fn is_cleared(&self) -> bool {
        matches!(self, Self::Approved | Self::Skipped)
    }
}

/// Runtime counterpart of one step definition. The effective approver
/// is frozen at instance creation; `approver` is `None` only for
/// non-mandatory steps whose approver could not be resolved, which
/// makes them auto-skip candidates when reached.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStepInstance {
    pub position: u32,
    pub approver: Option<UserId>,
    pub nominal_approver: Option<UserId>,
    pub mandatory: bool,
    pub status: StepStatus,
    pub due_at: Option<DateTime<Utc>>,
    pub decided_at: Option<DateTime<Utc>>,
    pub decision_comment: Option<String>,
}

/// One running approval process bound to exactly one document.
/// `version` is the optimistic-concurrency counter: every successful
/// transition bumps it, and stores compare-and-swap on the value they
/// loaded.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalInstance {
    pub id: InstanceId,
    pub tenant: TenantId,
    pub document: DocumentRef,
    pub requester: UserId,
    pub requested_at: DateTime<Utc>,
    pub status: InstanceStatus,
    pub steps: Vec<ApprovalStepInstance>,
    pub version: u32,
    pub cancelled_by: Option<UserId>,
    pub cancel_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ApprovalInstance {
    pub fn step(&self, position: u32) -> Option<&ApprovalStepInstance> {
        self.steps.iter().find(|step| step.position == position)
    }

    pub fn step_mut(&mut self, position: u32) -> Option<&mut ApprovalStepInstance> {
        self.steps.iter_mut().find(|step| step.position == position)
    }

    pub fn max_position(&self) -> u32 {
        self.steps.iter().map(|step| step.position).max().unwrap_or(0)
    }

    pub fn current_position(&self) -> Option<u32> {
        self.steps
            .iter()
            .find(|step| step.status == StepStatus::InProgress)
            .map(|step| step.position)
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }
}
