use serde::{Deserialize, Serialize};

pub mod delegation;
pub mod instance;
pub mod template;

/// Tenant identity is threaded through every operation explicitly;
/// the engine holds no ambient tenant state.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TenantId(pub String);

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UserId(pub String);
