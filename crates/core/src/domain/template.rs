use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{TenantId, UserId};

#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TemplateId(pub String);

/// Who a step definition names as its approver: either a fixed user
/// or a role that the directory resolves to a user at instance
/// creation time.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StepApprover {
    User { user_id: UserId },
    Role { role: String },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStepDefinition {
    /// 1-based, contiguous within the template.
    pub position: u32,
    pub approver: StepApprover,
    pub mandatory: bool,
    pub due_in_hours: Option<u32>,
}

/// Reusable approval chain for a (tenant, document type) pair.
/// Never deleted while referenced; deactivated instead.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalLineTemplate {
    pub id: TemplateId,
    pub tenant: TenantId,
    pub code: String,
    pub doc_type: String,
    pub name: String,
    pub steps: Vec<ApprovalStepDefinition>,
    pub is_default: bool,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TemplateIssue {
    NoSteps,
    DuplicatePosition { position: u32 },
    NonContiguousPositions { expected: u32, found: u32 },
}

impl TemplateIssue {
    pub fn describe(&self) -> String {
        match self {
            Self::NoSteps => "template has no steps".to_owned(),
            Self::DuplicatePosition { position } => {
                format!("duplicate step position {position}")
            }
            Self::NonContiguousPositions { expected, found } => {
                format!("expected step position {expected}, found {found}")
            }
        }
    }
}

impl ApprovalLineTemplate {
    /// Step positions must run 1..=N with no gaps or duplicates, and
    /// there must be at least one step. Callers treat an inconsistent
    /// template as unresolvable.
    pub fn validate(&self) -> Result<(), Vec<TemplateIssue>> {
        let mut issues = Vec::new();

        if self.steps.is_empty() {
            issues.push(TemplateIssue::NoSteps);
            return Err(issues);
        }

        let mut positions: Vec<u32> = self.steps.iter().map(|step| step.position).collect();
        positions.sort_unstable();
        for (index, position) in positions.iter().enumerate() {
            let expected = index as u32 + 1;
            if *position == expected {
                continue;
            }
            if index > 0 && positions[index - 1] == *position {
                issues.push(TemplateIssue::DuplicatePosition { position: *position });
            } else {
                issues.push(TemplateIssue::NonContiguousPositions {
                    expected,
                    found: *position,
                });
            }
        }

        if issues.is_empty() {
            Ok(())
        } else {
            Err(issues)
        }
    }

    pub fn is_consistent(&self) -> bool {
        self.validate().is_ok()
    }

    /// Steps in ascending position order regardless of storage order.
    pub fn ordered_steps(&self) -> Vec<&ApprovalStepDefinition> {
        let mut steps: Vec<&ApprovalStepDefinition> = self.steps.iter().collect();
        steps.sort_by_key(|step| step.position);
        steps
    }
}
