//! Role hierarchy: the fixed, ordered table of roles and the capabilities they imply.

use std::collections::BTreeSet;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

/// Roles in ascending order. Derived `Ord` follows declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Client,
    Content,
    Marketing,
    Admin,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Capability {
    User,
    Client,
    Content,
    Marketing,
    Admin,
}

pub type CapabilitySet = BTreeSet<Capability>;

/// Each role and the capability it contributes. Non-admin roles accumulate every
/// row at or below their own position.
const HIERARCHY: &[(Role, Capability)] = &[
    (Role::User, Capability::User),
    (Role::Client, Capability::Client),
    (Role::Content, Capability::Content),
    (Role::Marketing, Capability::Marketing),
    (Role::Admin, Capability::Admin),
];

static ALL_CAPABILITIES: Lazy<CapabilitySet> = Lazy::new(|| Capability::ALL.iter().copied().collect());

impl Role {
    pub const ALL: [Role; 5] = [Role::User, Role::Client, Role::Content, Role::Marketing, Role::Admin];

    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Client => "client",
            Role::Content => "content",
            Role::Marketing => "marketing",
            Role::Admin => "admin",
        }
    }
}

impl Capability {
    pub const ALL: [Capability; 5] = [
        Capability::User,
        Capability::Client,
        Capability::Content,
        Capability::Marketing,
        Capability::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Capability::User => "user",
            Capability::Client => "client",
            Capability::Content => "content",
            Capability::Marketing => "marketing",
            Capability::Admin => "admin",
        }
    }
}

/// Capability set implied by `role`. Admin is all capabilities by definition.
pub fn capabilities_of(role: Role) -> CapabilitySet {
    match role {
        Role::Admin => ALL_CAPABILITIES.clone(),
        _ => HIERARCHY
            .iter()
            .filter(|(r, _)| *r <= role)
            .map(|(_, c)| *c)
            .collect(),
    }
}

/// Membership test without materializing the set.
pub fn role_satisfies(role: Role, cap: Capability) -> bool {
    if role == Role::Admin { return true; }
    HIERARCHY.iter().any(|(r, c)| *r <= role && *c == cap)
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown {kind} '{value}'")]
pub struct UnknownName {
    pub kind: &'static str,
    pub value: String,
}

impl FromStr for Role {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .iter()
            .copied()
            .find(|r| r.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownName { kind: "role", value: s.to_string() })
    }
}

impl FromStr for Capability {
    type Err = UnknownName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::ALL
            .iter()
            .copied()
            .find(|c| c.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| UnknownName { kind: "capability", value: s.to_string() })
    }
}

impl Display for Role {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}

impl Display for Capability {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result { f.write_str(self.as_str()) }
}
