//! Capability checks against the session's current identity. Deny by default.

use std::sync::Arc;

use super::principal::Identity;
use super::role::{role_satisfies, Capability, Role};
use super::session::SessionManager;

/// Outcome of a single capability check, with a short reason code for logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Decision {
    pub allow: bool,
    pub reason: &'static str,
}

/// Pure decision over an identity snapshot. No identity means deny.
pub fn decide(identity: Option<&Identity>, cap: Capability) -> Decision {
    let Some(id) = identity else { return Decision { allow: false, reason: "no_session" } };
    if id.role == Role::Admin { return Decision { allow: true, reason: "role_admin" }; }
    if role_satisfies(id.role, cap) {
        Decision { allow: true, reason: "role_grant" }
    } else {
        Decision { allow: false, reason: "role_deny" }
    }
}

pub fn identity_has_capability(identity: Option<&Identity>, cap: Capability) -> bool {
    decide(identity, cap).allow
}

/// Capability checks against whoever the session manager currently holds.
/// Each call takes a fresh identity snapshot.
#[derive(Clone)]
pub struct Authorizer {
    sessions: Arc<SessionManager>,
}

impl Authorizer {
    pub fn new(sessions: Arc<SessionManager>) -> Self { Self { sessions } }

    pub fn sessions(&self) -> &Arc<SessionManager> { &self.sessions }

    pub fn check(&self, cap: Capability) -> Decision {
        decide(self.sessions.current_identity().as_ref(), cap)
    }

    pub fn has_capability(&self, cap: Capability) -> bool { self.check(cap).allow }

    pub fn has_all_permissions(&self, caps: &[Capability]) -> bool {
        let id = self.sessions.current_identity();
        caps.iter().all(|c| identity_has_capability(id.as_ref(), *c))
    }

    pub fn has_any_permission(&self, caps: &[Capability]) -> bool {
        let id = self.sessions.current_identity();
        caps.iter().any(|c| identity_has_capability(id.as_ref(), *c))
    }

    /// String-keyed variant for callers holding capability names; unknown names deny.
    pub fn has_capability_named(&self, name: &str) -> bool {
        name.parse::<Capability>().map(|c| self.has_capability(c)).unwrap_or(false)
    }

    pub fn has_all_named(&self, names: &[&str]) -> bool {
        let id = self.sessions.current_identity();
        names.iter().all(|n| n.parse::<Capability>().map(|c| identity_has_capability(id.as_ref(), c)).unwrap_or(false))
    }

    pub fn has_any_named(&self, names: &[&str]) -> bool {
        let id = self.sessions.current_identity();
        names.iter().any(|n| n.parse::<Capability>().map(|c| identity_has_capability(id.as_ref(), c)).unwrap_or(false))
    }
}
