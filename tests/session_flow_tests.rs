//! Session lifecycle integration tests: login/logout/restore, generation-counter
//! supersession, and identity-scoped cache invalidation.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use parking_lot::Mutex;
use tempfile::tempdir;
use tokio::sync::{mpsc, oneshot};

use sessiongate::identity::{
    Authorizer, Capability, ConcurrentLoginPolicy, Credential, CredentialStore, FileCredentialStore, Identity,
    InvalidationCoordinator, MemoryCredentialStore, Role, ScopedCache, SessionManager, SessionState, Verified, Verifier,
};
use sessiongate::{AuthError, VerifyError};

type Reply = Result<Verified, VerifyError>;
type TokenReply = Result<Identity, VerifyError>;

/// Verifier whose answers are released by the test: login gates per email,
/// token gates per token. Ungated tokens resolve from the accepted set.
struct GatedVerifier {
    pending: Mutex<HashMap<String, oneshot::Receiver<Reply>>>,
    pending_tokens: Mutex<HashMap<String, oneshot::Receiver<TokenReply>>>,
    started: mpsc::UnboundedSender<String>,
    tokens: Mutex<HashMap<String, Identity>>,
    token_calls: AtomicUsize,
}

impl GatedVerifier {
    fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let v = Self {
            pending: Mutex::new(HashMap::new()),
            pending_tokens: Mutex::new(HashMap::new()),
            started: tx,
            tokens: Mutex::new(HashMap::new()),
            token_calls: AtomicUsize::new(0),
        };
        (Arc::new(v), rx)
    }

    fn gate(&self, email: &str) -> oneshot::Sender<Reply> {
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(email.to_string(), rx);
        tx
    }

    fn gate_token(&self, token: &str) -> oneshot::Sender<TokenReply> {
        let (tx, rx) = oneshot::channel();
        self.pending_tokens.lock().insert(token.to_string(), rx);
        tx
    }

    fn accept_token(&self, token: &str, identity: Identity) {
        self.tokens.lock().insert(token.to_string(), identity);
    }

    fn token_calls(&self) -> usize { self.token_calls.load(Ordering::SeqCst) }
}

#[async_trait]
impl Verifier for GatedVerifier {
    async fn verify_login(&self, email: &str, _secret: &str) -> Reply {
        let rx = self.pending.lock().remove(email);
        let _ = self.started.send(email.to_string());
        match rx {
            Some(rx) => rx.await.unwrap_or_else(|_| Err(VerifyError::Transport("gate dropped".into()))),
            None => Err(VerifyError::Rejected("invalid_credentials".into())),
        }
    }

    async fn verify_token(&self, token: &str) -> TokenReply {
        self.token_calls.fetch_add(1, Ordering::SeqCst);
        let rx = self.pending_tokens.lock().remove(token);
        let _ = self.started.send(format!("token:{}", token));
        match rx {
            Some(rx) => rx.await.unwrap_or_else(|_| Err(VerifyError::Transport("gate dropped".into()))),
            None => self.tokens.lock().get(token).cloned().ok_or_else(|| VerifyError::Rejected("expired".into())),
        }
    }
}

fn verified(id: &str, role: Role, token: &str) -> Reply {
    Ok(Verified { identity: Identity::new(id, role), token: token.to_string() })
}

fn manager_with(
    verifier: Arc<GatedVerifier>,
    store: Arc<dyn CredentialStore>,
    coordinator: Arc<InvalidationCoordinator>,
) -> Arc<SessionManager> {
    Arc::new(SessionManager::new(verifier, store, coordinator))
}

#[tokio::test]
async fn login_sets_role_and_grants_implied_capability() -> Result<()> {
    let (v, _started) = GatedVerifier::new();
    let gate = v.gate("m@x");
    gate.send(verified("m@x", Role::Marketing, "tok-m")).ok();
    let sm = manager_with(v, Arc::new(MemoryCredentialStore::new()), Arc::new(InvalidationCoordinator::new()));
    let authz = Authorizer::new(sm.clone());

    let id = sm.login("m@x", "pw").await?;
    assert_eq!(sm.current_identity().map(|i| i.role), Some(Role::Marketing));
    assert_eq!(id.role, Role::Marketing);
    assert!(authz.has_capability(Capability::Content));
    assert!(authz.has_capability(Capability::Marketing));
    assert!(!authz.has_capability(Capability::Admin));
    Ok(())
}

#[tokio::test]
async fn logout_denies_every_capability() -> Result<()> {
    let (v, _started) = GatedVerifier::new();
    v.gate("a@x").send(verified("a@x", Role::Admin, "tok-a")).ok();
    let sm = manager_with(v, Arc::new(MemoryCredentialStore::new()), Arc::new(InvalidationCoordinator::new()));
    let authz = Authorizer::new(sm.clone());

    sm.login("a@x", "pw").await?;
    assert!(authz.has_all_permissions(&Capability::ALL));
    sm.logout();
    assert!(sm.current_identity().is_none());
    for c in Capability::ALL {
        assert!(!authz.has_capability(c), "{} must be denied after logout", c);
    }
    Ok(())
}

#[tokio::test]
async fn later_login_wins_when_earlier_resolves_last() -> Result<()> {
    let (v, mut started) = GatedVerifier::new();
    let gate_a = v.gate("a@x");
    let gate_b = v.gate("b@x");
    let store = Arc::new(MemoryCredentialStore::new());
    let sm = manager_with(v, store.clone(), Arc::new(InvalidationCoordinator::new()));

    let sm_a = sm.clone();
    let task_a = tokio::spawn(async move { sm_a.login("a@x", "pw").await });
    assert_eq!(started.recv().await.as_deref(), Some("a@x"));

    let sm_b = sm.clone();
    let task_b = tokio::spawn(async move { sm_b.login("b@x", "pw").await });
    assert_eq!(started.recv().await.as_deref(), Some("b@x"));

    gate_b.send(verified("b@x", Role::Client, "tok-b")).ok();
    let b = task_b.await??;
    assert_eq!(b.id, "b@x");

    gate_a.send(verified("a@x", Role::Admin, "tok-a")).ok();
    assert_eq!(task_a.await?, Err(AuthError::Superseded));

    assert_eq!(sm.state(), SessionState::Authenticated);
    assert_eq!(sm.current_identity().map(|i| i.id), Some("b@x".to_string()));
    assert_eq!(store.load()?.map(|c| c.token).as_deref(), Some("tok-b"));
    Ok(())
}

#[tokio::test]
async fn reject_policy_refuses_second_login() -> Result<()> {
    let (v, mut started) = GatedVerifier::new();
    let gate_a = v.gate("a@x");
    let sm = Arc::new(
        SessionManager::new(v, Arc::new(MemoryCredentialStore::new()), Arc::new(InvalidationCoordinator::new()))
            .with_policy(ConcurrentLoginPolicy::Reject),
    );

    let sm_a = sm.clone();
    let task_a = tokio::spawn(async move { sm_a.login("a@x", "pw").await });
    started.recv().await;

    assert_eq!(sm.login("b@x", "pw").await, Err(AuthError::AlreadyValidating));
    assert_eq!(sm.state(), SessionState::Validating);

    gate_a.send(verified("a@x", Role::User, "tok-a")).ok();
    assert_eq!(task_a.await??.id, "a@x");
    assert_eq!(sm.state(), SessionState::Authenticated);
    Ok(())
}

#[tokio::test]
async fn logout_during_validation_discards_result() -> Result<()> {
    let (v, mut started) = GatedVerifier::new();
    let gate = v.gate("a@x");
    let store = Arc::new(MemoryCredentialStore::new());
    let sm = manager_with(v, store.clone(), Arc::new(InvalidationCoordinator::new()));

    let sm_a = sm.clone();
    let task = tokio::spawn(async move { sm_a.login("a@x", "pw").await });
    started.recv().await;
    assert_eq!(sm.state(), SessionState::Validating);
    assert!(sm.current_identity().is_none());

    sm.logout();
    gate.send(verified("a@x", Role::Admin, "tok-a")).ok();
    assert_eq!(task.await?, Err(AuthError::Superseded));

    assert_eq!(sm.state(), SessionState::Unauthenticated);
    assert!(sm.current_identity().is_none());
    assert!(store.load()?.is_none());
    Ok(())
}

#[tokio::test]
async fn restore_with_rejected_token_clears_store() -> Result<()> {
    let tmp = tempdir()?;
    let store = Arc::new(FileCredentialStore::new(tmp.path(), "default"));
    store.save(&Credential::new("stale-token"))?;

    let (v, _started) = GatedVerifier::new();
    let sm = manager_with(v, store.clone(), Arc::new(InvalidationCoordinator::new()));
    sm.restore_from_stored_credential().await;

    assert_eq!(sm.state(), SessionState::Invalid);
    assert!(sm.current_identity().is_none());
    assert!(store.load()?.is_none());
    assert!(!store.path().exists());
    Ok(())
}

#[tokio::test]
async fn restore_with_accepted_token_survives_restart() -> Result<()> {
    let tmp = tempdir()?;
    let (v, _started) = GatedVerifier::new();
    v.gate("c@x").send(verified("c@x", Role::Content, "tok-c")).ok();
    v.accept_token("tok-c", Identity::new("c@x", Role::Content));

    let first = manager_with(
        v.clone(),
        Arc::new(FileCredentialStore::new(tmp.path(), "default")),
        Arc::new(InvalidationCoordinator::new()),
    );
    first.login("c@x", "pw").await?;
    drop(first);

    let second = manager_with(
        v,
        Arc::new(FileCredentialStore::new(tmp.path(), "default")),
        Arc::new(InvalidationCoordinator::new()),
    );
    assert!(second.current_identity().is_none());
    second.restore_from_stored_credential().await;
    assert_eq!(second.current_identity().map(|i| i.role), Some(Role::Content));
    assert_eq!(second.credential().map(|c| c.token).as_deref(), Some("tok-c"));
    Ok(())
}

#[tokio::test]
async fn identity_scoped_cache_is_stale_after_user_switch() -> Result<()> {
    let (v, _started) = GatedVerifier::new();
    v.gate("a@x").send(verified("a@x", Role::Admin, "tok-a")).ok();
    v.gate("b@x").send(verified("b@x", Role::User, "tok-b")).ok();
    let coordinator = Arc::new(InvalidationCoordinator::with_identity_namespaces(["admin-scoped"]));
    let sm = manager_with(v, Arc::new(MemoryCredentialStore::new()), coordinator.clone());
    let authz = Authorizer::new(sm.clone());

    let gated: ScopedCache<&str, String> = ScopedCache::new("admin-scoped", coordinator.clone(), 64);
    let shared: ScopedCache<&str, String> = ScopedCache::new("public-assets", coordinator.clone(), 64);

    sm.login("a@x", "pw").await?;
    if authz.has_capability(Capability::Admin) {
        gated.put("revenue", "42k".to_string());
    }
    shared.put("logo", "png".to_string());

    sm.login("b@x", "pw").await?;
    assert!(gated.is_stale(&"revenue"));
    assert_eq!(gated.get(&"revenue"), None);
    assert!(!authz.has_capability(Capability::Admin));
    assert_eq!(shared.get(&"logo").as_deref(), Some("png"));
    Ok(())
}

#[tokio::test]
async fn failed_relogin_invalidates_previous_identity_caches() -> Result<()> {
    let (v, _started) = GatedVerifier::new();
    v.gate("a@x").send(verified("a@x", Role::Admin, "tok-a")).ok();
    let coordinator = Arc::new(InvalidationCoordinator::with_identity_namespaces(["identity"]));
    let sm = manager_with(v, Arc::new(MemoryCredentialStore::new()), coordinator.clone());
    let cache: ScopedCache<u32, u32> = ScopedCache::new("identity", coordinator.clone(), 8);

    sm.login("a@x", "pw").await?;
    cache.put(1, 1);
    assert_eq!(sm.login("nobody@x", "pw").await, Err(AuthError::InvalidCredentials));
    assert_eq!(sm.state(), SessionState::Invalid);
    assert!(cache.is_stale(&1));
    Ok(())
}

#[tokio::test]
async fn restore_during_login_is_coalesced() -> Result<()> {
    let (v, mut started) = GatedVerifier::new();
    let gate_a = v.gate("a@x");
    let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new("old-token")));
    let sm = manager_with(v.clone(), store.clone(), Arc::new(InvalidationCoordinator::new()));

    let sm_a = sm.clone();
    let login = tokio::spawn(async move { sm_a.login("a@x", "pw").await });
    assert_eq!(started.recv().await.as_deref(), Some("a@x"));
    let gen = sm.generation();

    sm.restore_from_stored_credential().await;
    assert_eq!(sm.generation(), gen);
    assert_eq!(sm.state(), SessionState::Validating);
    assert_eq!(v.token_calls(), 0);

    gate_a.send(verified("a@x", Role::Content, "tok-a")).ok();
    let id = login.await??;
    assert_eq!(id.id, "a@x");
    assert_eq!(sm.state(), SessionState::Authenticated);
    assert_eq!(sm.current_identity().map(|i| i.id).as_deref(), Some("a@x"));
    assert_eq!(store.load()?.map(|c| c.token).as_deref(), Some("tok-a"));
    Ok(())
}

#[tokio::test]
async fn overlapping_revalidations_share_one_check() -> Result<()> {
    let (v, mut started) = GatedVerifier::new();
    v.gate("a@x").send(verified("a@x", Role::Content, "tok-a")).ok();
    let sm = manager_with(v.clone(), Arc::new(MemoryCredentialStore::new()), Arc::new(InvalidationCoordinator::new()));
    sm.login("a@x", "pw").await?;
    assert_eq!(started.recv().await.as_deref(), Some("a@x"));

    let gate_tok = v.gate_token("tok-a");
    let sm_1 = sm.clone();
    let first = tokio::spawn(async move { sm_1.revalidate().await });
    assert_eq!(started.recv().await.as_deref(), Some("token:tok-a"));
    let gen = sm.generation();

    sm.revalidate().await;
    assert_eq!(v.token_calls(), 1);
    assert_eq!(sm.generation(), gen);
    assert_eq!(sm.state(), SessionState::Authenticated);

    gate_tok.send(Ok(Identity::new("a@x", Role::Marketing))).ok();
    first.await?;
    assert_eq!(v.token_calls(), 1);
    assert_eq!(sm.current_identity().map(|i| i.role), Some(Role::Marketing));
    Ok(())
}

#[tokio::test]
async fn login_during_restore_keeps_new_token() -> Result<()> {
    let (v, mut started) = GatedVerifier::new();
    let gate_old = v.gate_token("old-token");
    v.gate("b@x").send(verified("b@x", Role::User, "tok-b")).ok();
    let store = Arc::new(MemoryCredentialStore::with_credential(Credential::new("old-token")));
    let sm = manager_with(v, store.clone(), Arc::new(InvalidationCoordinator::new()));

    let sm_r = sm.clone();
    let restore = tokio::spawn(async move { sm_r.restore_from_stored_credential().await });
    assert_eq!(started.recv().await.as_deref(), Some("token:old-token"));
    assert_eq!(sm.state(), SessionState::Validating);

    let id = sm.login("b@x", "pw").await?;
    assert_eq!(id.id, "b@x");

    gate_old.send(Err(VerifyError::Rejected("revoked".into()))).ok();
    restore.await?;

    assert_eq!(sm.state(), SessionState::Authenticated);
    assert_eq!(sm.current_identity().map(|i| i.id).as_deref(), Some("b@x"));
    assert_eq!(store.load()?.map(|c| c.token).as_deref(), Some("tok-b"));
    assert_eq!(sm.credential().map(|c| c.token).as_deref(), Some("tok-b"));
    Ok(())
}
