//! Credential-verification collaborators.
//! The session manager only sees the `Verifier` trait; two implementations ship
//! with the crate: an in-process user table and a remote JSON API.

use std::collections::{HashMap, HashSet};
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use argon2::{Argon2, PasswordHasher, PasswordVerifier};
use async_trait::async_trait;
use base64::Engine;
use parking_lot::RwLock;
use password_hash::{PasswordHash, SaltString};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::credential::Token;
use super::principal::{Identity, Profile};
use super::role::Role;
use crate::error::VerifyError;
use crate::tprintln;

/// Successful email/secret verification: the actor plus a freshly issued token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Verified {
    pub identity: Identity,
    pub token: Token,
}

#[async_trait]
pub trait Verifier: Send + Sync {
    async fn verify_login(&self, email: &str, secret: &str) -> Result<Verified, VerifyError>;
    async fn verify_token(&self, token: &str) -> Result<Identity, VerifyError>;
}

// --- In-process verifier ---------------------------------------------------

fn gen_token() -> Result<Token> {
    // 256-bit random token, base64url without padding
    let mut buf = [0u8; 32];
    getrandom::getrandom(&mut buf).map_err(|e| anyhow!(e.to_string()))?;
    Ok(base64::engine::general_purpose::URL_SAFE_NO_PAD.encode(buf))
}

fn hash_password(password: &str) -> Result<String> {
    let mut salt_bytes = [0u8; 16];
    getrandom::getrandom(&mut salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let salt = SaltString::encode_b64(&salt_bytes).map_err(|e| anyhow!(e.to_string()))?;
    let phc = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow!(e.to_string()))?
        .to_string();
    Ok(phc)
}

fn verify_password(phc: &str, password: &str) -> bool {
    match PasswordHash::new(phc) {
        Ok(parsed) => Argon2::default().verify_password(password.as_bytes(), &parsed).is_ok(),
        Err(_) => false,
    }
}

struct UserRecord {
    password_hash: String,
    identity: Identity,
}

struct IssuedToken {
    user_key: String,
    expires_at: Instant,
}

/// Verifier backed by an in-memory user table with Argon2 password hashes.
/// Tokens are random, expire after `ttl`, and can be revoked per token or per user.
///
/// Lock order when more than one map is held: `user_index`, then `tokens`, then `revoked`.
pub struct LocalVerifier {
    ttl: Duration,
    users: RwLock<HashMap<String, UserRecord>>,
    tokens: RwLock<HashMap<Token, IssuedToken>>,
    user_index: RwLock<HashMap<String, HashSet<Token>>>,
    // revoked token -> instant after which the entry can be forgotten
    revoked: RwLock<HashMap<Token, Instant>>,
}

impl Default for LocalVerifier {
    fn default() -> Self { Self::new(Duration::from_secs(60 * 60)) }
}

fn user_key(email: &str) -> String { email.trim().to_lowercase() }

impl LocalVerifier {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            users: RwLock::new(HashMap::new()),
            tokens: RwLock::new(HashMap::new()),
            user_index: RwLock::new(HashMap::new()),
            revoked: RwLock::new(HashMap::new()),
        }
    }

    /// Add or replace a user. The identity id is the normalized email.
    pub fn add_user(&self, email: &str, password: &str, role: Role, profile: Profile) -> Result<Identity> {
        let key = user_key(email);
        if key.is_empty() { return Err(anyhow!("email must not be empty")); }
        let password_hash = hash_password(password).context("hash password")?;
        let identity = Identity { id: key.clone(), profile, role };
        self.users.write().insert(key, UserRecord { password_hash, identity: identity.clone() });
        Ok(identity)
    }

    /// Change a user's role. Outstanding tokens resolve to the new role on next check.
    pub fn set_role(&self, email: &str, role: Role) -> bool {
        match self.users.write().get_mut(&user_key(email)) {
            Some(rec) => { rec.identity.role = role; true }
            None => false,
        }
    }

    pub fn remove_user(&self, email: &str) -> bool {
        let key = user_key(email);
        let removed = self.users.write().remove(&key).is_some();
        self.revoke_user(&key);
        removed
    }

    fn issue(&self, key: &str) -> Result<Token, VerifyError> {
        let token = gen_token().map_err(|e| VerifyError::Transport(e.to_string()))?;
        let now = Instant::now();
        self.prune_expired(now);
        let expires_at = now + self.ttl;
        let mut idx = self.user_index.write();
        let mut t = self.tokens.write();
        t.insert(token.clone(), IssuedToken { user_key: key.to_string(), expires_at });
        idx.entry(key.to_string()).or_default().insert(token.clone());
        tprintln!("verifier.issue user={} ttl_secs={}", key, self.ttl.as_secs());
        Ok(token)
    }

    /// Forget tokens and revocations whose expiry has passed. Returns how many entries were dropped.
    pub fn prune_expired(&self, now: Instant) -> usize {
        let mut dropped = 0usize;
        {
            let mut idx = self.user_index.write();
            let mut t = self.tokens.write();
            let expired: Vec<(Token, String)> = t
                .iter()
                .filter(|(_, ent)| ent.expires_at <= now)
                .map(|(tok, ent)| (tok.clone(), ent.user_key.clone()))
                .collect();
            for (tok, key) in expired {
                t.remove(&tok);
                if let Some(set) = idx.get_mut(&key) {
                    set.remove(&tok);
                    if set.is_empty() { idx.remove(&key); }
                }
                dropped += 1;
            }
        }
        let mut r = self.revoked.write();
        let before = r.len();
        r.retain(|_, until| *until > now);
        dropped + (before - r.len())
    }

    /// Live (issued, not yet pruned) tokens plus remembered revocations.
    pub fn tracked_tokens(&self) -> (usize, usize) {
        let live = self.tokens.read().len();
        let revoked = self.revoked.read().len();
        (live, revoked)
    }

    pub fn revoke(&self, token: &str) -> bool {
        let mut idx = self.user_index.write();
        let mut t = self.tokens.write();
        let mut r = self.revoked.write();
        let (removed, until) = match t.remove(token) {
            Some(ent) => {
                if let Some(set) = idx.get_mut(&ent.user_key) {
                    set.remove(token);
                    if set.is_empty() { idx.remove(&ent.user_key); }
                }
                (true, ent.expires_at)
            }
            None => (false, Instant::now() + self.ttl),
        };
        r.insert(token.to_string(), until);
        removed
    }

    pub fn revoke_user(&self, email: &str) -> usize {
        let key = user_key(email);
        let mut count = 0usize;
        let mut idx = self.user_index.write();
        let mut t = self.tokens.write();
        let mut r = self.revoked.write();
        if let Some(tokens) = idx.remove(&key) {
            for tok in tokens.into_iter() {
                let until = match t.remove(&tok) {
                    Some(ent) => { count += 1; ent.expires_at }
                    None => Instant::now() + self.ttl,
                };
                r.insert(tok, until);
            }
        }
        drop((r, t, idx));
        tprintln!("verifier.revoke user={} count={}", key, count);
        count
    }
}

#[async_trait]
impl Verifier for LocalVerifier {
    async fn verify_login(&self, email: &str, secret: &str) -> Result<Verified, VerifyError> {
        let key = user_key(email);
        let identity = {
            let users = self.users.read();
            let Some(rec) = users.get(&key) else { return Err(VerifyError::Rejected("invalid_credentials".into())); };
            if !verify_password(&rec.password_hash, secret) {
                return Err(VerifyError::Rejected("invalid_credentials".into()));
            }
            rec.identity.clone()
        };
        let token = self.issue(&key)?;
        Ok(Verified { identity, token })
    }

    async fn verify_token(&self, token: &str) -> Result<Identity, VerifyError> {
        if self.revoked.read().contains_key(token) { return Err(VerifyError::Rejected("revoked".into())); }
        let now = Instant::now();
        let key = {
            let map = self.tokens.read();
            match map.get(token) {
                Some(ent) if ent.expires_at > now => Some(ent.user_key.clone()),
                Some(_) => None,
                None => return Err(VerifyError::Rejected("unknown_token".into())),
            }
        };
        let Some(key) = key else {
            self.revoke(token);
            return Err(VerifyError::Rejected("expired".into()));
        };
        self.users
            .read()
            .get(&key)
            .map(|rec| rec.identity.clone())
            .ok_or_else(|| VerifyError::Rejected("unknown_user".into()))
    }
}

// --- Remote verifier -------------------------------------------------------

#[derive(Deserialize)]
struct SessionReply {
    identity: Identity,
}

/// Verifier that delegates to a remote JSON API:
/// `POST /login {email, password}` and `GET /session` with a bearer token.
#[derive(Clone)]
pub struct HttpVerifier {
    base: Url,
    client: reqwest::Client,
}

impl HttpVerifier {
    pub fn new(base: &str, timeout: Duration) -> Result<Self> {
        let base = Url::parse(base).context("invalid verifier base URL")?;
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { base, client })
    }

    pub fn base(&self) -> &Url { &self.base }

    fn url(&self, path: &str) -> Result<Url, VerifyError> {
        self.base.join(path).map_err(|e| VerifyError::Transport(e.to_string()))
    }
}

fn classify_status(status: StatusCode) -> Option<VerifyError> {
    if status.is_success() { return None; }
    if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        return Some(VerifyError::Rejected(format!("HTTP {}", status)));
    }
    Some(VerifyError::Transport(format!("HTTP {}", status)))
}

#[async_trait]
impl Verifier for HttpVerifier {
    async fn verify_login(&self, email: &str, secret: &str) -> Result<Verified, VerifyError> {
        let resp = self
            .client
            .post(self.url("/login")?)
            .json(&serde_json::json!({"email": email, "password": secret}))
            .send()
            .await
            .map_err(|e| VerifyError::Transport(e.to_string()))?;
        if let Some(err) = classify_status(resp.status()) { return Err(err); }
        let v: Verified = resp.json().await.map_err(|e| VerifyError::Malformed(e.to_string()))?;
        if v.token.is_empty() { return Err(VerifyError::Malformed("token missing".into())); }
        Ok(v)
    }

    async fn verify_token(&self, token: &str) -> Result<Identity, VerifyError> {
        let resp = self
            .client
            .get(self.url("/session")?)
            .bearer_auth(token)
            .send()
            .await
            .map_err(|e| VerifyError::Transport(e.to_string()))?;
        if let Some(err) = classify_status(resp.status()) { return Err(err); }
        let v: SessionReply = resp.json().await.map_err(|e| VerifyError::Malformed(e.to_string()))?;
        Ok(v.identity)
    }
}
