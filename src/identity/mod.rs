//! Session and authorization core: role hierarchy, credential storage, session
//! state machine, capability evaluation and identity-scoped cache invalidation.
//! Keep the public surface thin and split implementation across sub-modules.

mod role;
mod principal;
mod credential;
mod provider;
mod session;
mod authorizer;
mod epochs;

pub use role::{capabilities_of, role_satisfies, Capability, CapabilitySet, Role, UnknownName};
pub use principal::{Identity, Profile};
pub use credential::{Credential, CredentialStore, FileCredentialStore, MemoryCredentialStore, Token};
pub use provider::{HttpVerifier, LocalVerifier, Verified, Verifier};
pub use session::{ConcurrentLoginPolicy, SessionManager, SessionState};
pub use authorizer::{decide, identity_has_capability, Authorizer, Decision};
pub use epochs::{CacheTicket, InvalidationCoordinator, ScopedCache, IDENTITY_NAMESPACE};
