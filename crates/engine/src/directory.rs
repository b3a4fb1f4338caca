use std::collections::HashMap;
use std::sync::RwLock;

use signoff_core::domain::{TenantId, UserId};

/// Resolves a role name to the user currently holding it. The engine
/// never stores role membership itself; the embedding application
/// supplies this from its HR or identity system. Resolution happens
/// once, at instance creation, so later role changes do not move
/// already-assigned steps.
pub trait RoleDirectory: Send + Sync {
    fn resolve_role(&self, tenant: &TenantId, role: &str) -> Option<UserId>;
}

/// Directory backed by an explicit assignment table. Used in tests
/// and by embedders without an external identity system.
#[derive(Default)]
pub struct InMemoryRoleDirectory {
    assignments: RwLock<HashMap<(String, String), UserId>>,
}

impl InMemoryRoleDirectory {
    pub fn assign(&self, tenant: &TenantId, role: &str, user: UserId) {
        let key = (tenant.0.clone(), role.to_owned());
        match self.assignments.write() {
            Ok(mut assignments) => {
                assignments.insert(key, user);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(key, user);
            }
        }
    }
}

impl RoleDirectory for InMemoryRoleDirectory {
    fn resolve_role(&self, tenant: &TenantId, role: &str) -> Option<UserId> {
        let key = (tenant.0.clone(), role.to_owned());
        match self.assignments.read() {
            Ok(assignments) => assignments.get(&key).cloned(),
            Err(poisoned) => poisoned.into_inner().get(&key).cloned(),
        }
    }
}
