//! Session manager: owns the authentication state machine, the current identity
//! and the current credential.
//!
//! Every operation that starts a validation bumps a generation counter and
//! remembers the value it started with. A validation result is applied only if
//! the counter is unchanged when it resolves; anything else was superseded by a
//! later login/logout and is dropped without side effects.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::credential::{Credential, CredentialStore};
use super::epochs::InvalidationCoordinator;
use super::principal::Identity;
use super::provider::{Verified, Verifier};
use crate::error::{AuthError, AuthResult, VerifyError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Unauthenticated,
    Validating,
    Authenticated,
    Invalid,
}

/// What a `login` does when another login/restore is still validating.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrentLoginPolicy {
    /// The newer call wins; the older one resolves with `AuthError::Superseded`.
    #[default]
    Supersede,
    /// The newer call fails fast with `AuthError::AlreadyValidating`.
    Reject,
}

#[derive(Debug)]
struct Inner {
    state: SessionState,
    identity: Option<Identity>,
    credential: Option<Credential>,
    generation: u64,
    // generation of an in-flight background re-check, if any
    recheck: Option<u64>,
}

pub struct SessionManager {
    verifier: Arc<dyn Verifier>,
    store: Arc<dyn CredentialStore>,
    coordinator: Arc<InvalidationCoordinator>,
    policy: ConcurrentLoginPolicy,
    verify_timeout: Duration,
    inner: RwLock<Inner>,
}

impl SessionManager {
    pub fn new(
        verifier: Arc<dyn Verifier>,
        store: Arc<dyn CredentialStore>,
        coordinator: Arc<InvalidationCoordinator>,
    ) -> Self {
        Self {
            verifier,
            store,
            coordinator,
            policy: ConcurrentLoginPolicy::default(),
            verify_timeout: Duration::from_secs(10),
            inner: RwLock::new(Inner {
                state: SessionState::Unauthenticated,
                identity: None,
                credential: None,
                generation: 0,
                recheck: None,
            }),
        }
    }

    pub fn with_policy(mut self, policy: ConcurrentLoginPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_verify_timeout(mut self, timeout: Duration) -> Self {
        self.verify_timeout = timeout;
        self
    }

    pub fn coordinator(&self) -> &Arc<InvalidationCoordinator> { &self.coordinator }

    pub fn state(&self) -> SessionState { self.inner.read().state }

    pub fn generation(&self) -> u64 { self.inner.read().generation }

    /// Snapshot of the identity; present only while Authenticated.
    pub fn current_identity(&self) -> Option<Identity> {
        let g = self.inner.read();
        match g.state {
            SessionState::Authenticated => g.identity.clone(),
            _ => None,
        }
    }

    /// Snapshot of the current credential; present only while Authenticated.
    pub fn credential(&self) -> Option<Credential> {
        let g = self.inner.read();
        match g.state {
            SessionState::Authenticated => g.credential.clone(),
            _ => None,
        }
    }

    pub async fn login(&self, email: &str, secret: &str) -> AuthResult<Identity> {
        let gen = {
            let mut g = self.inner.write();
            if g.state == SessionState::Validating && self.policy == ConcurrentLoginPolicy::Reject {
                debug!(target: "sessiongate", "session.login rejected: validation in flight gen={}", g.generation);
                return Err(AuthError::AlreadyValidating);
            }
            g.generation += 1;
            g.state = SessionState::Validating;
            g.generation
        };
        info!(target: "sessiongate", "session.login start gen={}", gen);

        let outcome = match tokio::time::timeout(self.verify_timeout, self.verifier.verify_login(email, secret)).await {
            Ok(Ok(v)) => Ok(v),
            Ok(Err(e)) => Err(e.into_login_error()),
            Err(_) => Err(AuthError::TransportError("verification timed out".into())),
        };

        let mut g = self.inner.write();
        if g.generation != gen {
            debug!(target: "sessiongate", "session.login result discarded gen={} current={}", gen, g.generation);
            return Err(AuthError::Superseded);
        }
        match outcome {
            Ok(Verified { identity, token }) => {
                let cred = Credential::new(token);
                if let Err(e) = self.store.save(&cred) {
                    warn!(target: "sessiongate", "credential store save failed: {:#}", e);
                }
                g.state = SessionState::Authenticated;
                g.identity = Some(identity.clone());
                g.credential = Some(cred);
                self.coordinator.on_identity_changed(Some(&identity));
                info!(target: "sessiongate", "session.login ok user={} role={} gen={}", identity.id, identity.role, gen);
                Ok(identity)
            }
            Err(err) => {
                self.fail_closed(&mut g);
                info!(target: "sessiongate", "session.login failed code={} gen={}", err.code_str(), gen);
                Err(err)
            }
        }
    }

    /// Clears identity and credential unconditionally. Never fails.
    pub fn logout(&self) {
        let mut g = self.inner.write();
        g.generation += 1;
        g.state = SessionState::Unauthenticated;
        g.identity = None;
        g.credential = None;
        g.recheck = None;
        if let Err(e) = self.store.clear() {
            warn!(target: "sessiongate", "credential store clear failed: {:#}", e);
        }
        self.coordinator.on_identity_changed(None);
        info!(target: "sessiongate", "session.logout gen={}", g.generation);
    }

    /// One-shot revalidation of a persisted token at process start.
    /// Any failure, transport included, clears the stored token and ends Invalid.
    pub async fn restore_from_stored_credential(&self) {
        if self.state() == SessionState::Authenticated {
            self.revalidate().await;
            return;
        }
        let stored = match self.store.load() {
            Ok(Some(c)) => c,
            Ok(None) => return,
            Err(e) => {
                warn!(target: "sessiongate", "stored credential unreadable, discarding: {:#}", e);
                let mut g = self.inner.write();
                if g.state != SessionState::Validating { self.fail_closed(&mut g); }
                return;
            }
        };

        let gen = {
            let mut g = self.inner.write();
            if g.state == SessionState::Validating {
                debug!(target: "sessiongate", "session.restore coalesced into gen={}", g.generation);
                return;
            }
            g.generation += 1;
            g.state = SessionState::Validating;
            g.generation
        };
        info!(target: "sessiongate", "session.restore start gen={}", gen);

        let outcome = self.verify_token_bounded(&stored.token).await;

        let mut g = self.inner.write();
        if g.generation != gen {
            debug!(target: "sessiongate", "session.restore result discarded gen={} current={}", gen, g.generation);
            return;
        }
        match outcome {
            Ok(identity) => {
                g.state = SessionState::Authenticated;
                g.identity = Some(identity.clone());
                g.credential = Some(stored);
                self.coordinator.on_identity_changed(Some(&identity));
                info!(target: "sessiongate", "session.restore ok user={} role={}", identity.id, identity.role);
            }
            Err(err) => {
                self.fail_closed(&mut g);
                warn!(target: "sessiongate", "session.restore failed code={}: {}", err.code_str(), err);
            }
        }
    }

    /// Background re-check of the current token. Failures move the session to
    /// Invalid; nothing is surfaced to the caller. Coalesced while one is in flight.
    pub async fn revalidate(&self) {
        let (gen, token) = {
            let mut g = self.inner.write();
            if g.state != SessionState::Authenticated { return; }
            let token = match (g.identity.is_some(), g.credential.as_ref()) {
                (true, Some(c)) => Some(c.token.clone()),
                _ => None,
            };
            let Some(token) = token else {
                // Authenticated without both halves is a contradiction: force logout
                warn!(target: "sessiongate", "session inconsistent: forcing logout");
                drop(g);
                self.logout();
                return;
            };
            if g.recheck == Some(g.generation) {
                debug!(target: "sessiongate", "session.revalidate coalesced gen={}", g.generation);
                return;
            }
            g.generation += 1;
            g.recheck = Some(g.generation);
            (g.generation, token)
        };

        let outcome = self.verify_token_bounded(&token).await;

        let mut g = self.inner.write();
        if g.generation != gen {
            debug!(target: "sessiongate", "session.revalidate result discarded gen={} current={}", gen, g.generation);
            return;
        }
        g.recheck = None;
        match outcome {
            Ok(identity) => {
                if g.identity.as_ref() != Some(&identity) {
                    info!(target: "sessiongate", "session.revalidate identity changed user={} role={}", identity.id, identity.role);
                    g.identity = Some(identity.clone());
                    self.coordinator.on_identity_changed(Some(&identity));
                }
            }
            Err(err) => {
                self.fail_closed(&mut g);
                warn!(target: "sessiongate", "session.revalidate failed code={}: {}", err.code_str(), err);
            }
        }
    }

    async fn verify_token_bounded(&self, token: &str) -> AuthResult<Identity> {
        match tokio::time::timeout(self.verify_timeout, self.verifier.verify_token(token)).await {
            Ok(r) => r.map_err(VerifyError::into_token_error),
            Err(_) => Err(AuthError::TransportError("verification timed out".into())),
        }
    }

    // Invalid: drop identity and credential, clear the persisted token, and
    // invalidate identity-scoped caches if an identity was held.
    fn fail_closed(&self, g: &mut Inner) {
        let had_identity = g.identity.is_some();
        g.state = SessionState::Invalid;
        g.identity = None;
        g.credential = None;
        g.recheck = None;
        if let Err(e) = self.store.clear() {
            warn!(target: "sessiongate", "credential store clear failed: {:#}", e);
        }
        if had_identity {
            self.coordinator.on_identity_changed(None);
        }
    }
}
