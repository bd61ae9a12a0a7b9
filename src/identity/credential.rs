//! Credential store: the single "current" bearer token slot for a logical session.
//! Reads hand out snapshots; the session manager is the only writer.

use std::fmt::{Debug, Formatter};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::tprintln;

pub type Token = String;

#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Credential {
    pub token: Token,
    pub issued_at: DateTime<Utc>,
}

impl Credential {
    pub fn new(token: impl Into<Token>) -> Self {
        Self { token: token.into(), issued_at: Utc::now() }
    }
}

// Never print the bearer token itself.
impl Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credential")
            .field("token", &"<redacted>")
            .field("issued_at", &self.issued_at)
            .finish()
    }
}

pub trait CredentialStore: Send + Sync {
    fn load(&self) -> Result<Option<Credential>>;
    fn save(&self, cred: &Credential) -> Result<()>;
    fn clear(&self) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: RwLock<Option<Credential>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self { Self::default() }

    pub fn with_credential(cred: Credential) -> Self {
        Self { slot: RwLock::new(Some(cred)) }
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn load(&self) -> Result<Option<Credential>> { Ok(self.slot.read().clone()) }

    fn save(&self, cred: &Credential) -> Result<()> {
        *self.slot.write() = Some(cred.clone());
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        *self.slot.write() = None;
        Ok(())
    }
}

fn sanitize_filename(s: &str) -> String {
    s.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect()
}

/// One JSON file per session key under `dir`. Writes go through a temp file and rename.
pub struct FileCredentialStore {
    dir: PathBuf,
    key: String,
}

impl FileCredentialStore {
    pub fn new(dir: impl Into<PathBuf>, key: &str) -> Self {
        Self { dir: dir.into(), key: key.to_string() }
    }

    pub fn path(&self) -> PathBuf { self.dir.join(format!("{}.json", sanitize_filename(&self.key))) }

    fn tmp_path(&self) -> PathBuf { self.dir.join(format!("{}.json.tmp", sanitize_filename(&self.key))) }

    pub fn dir(&self) -> &Path { &self.dir }
}

impl CredentialStore for FileCredentialStore {
    fn load(&self) -> Result<Option<Credential>> {
        let p = self.path();
        if !p.exists() { return Ok(None); }
        let bytes = std::fs::read(&p).with_context(|| format!("read credential file {}", p.display()))?;
        let cred: Credential = serde_json::from_slice(&bytes)
            .with_context(|| format!("decode credential file {}", p.display()))?;
        Ok(Some(cred))
    }

    fn save(&self, cred: &Credential) -> Result<()> {
        std::fs::create_dir_all(&self.dir)
            .with_context(|| format!("create credential dir {}", self.dir.display()))?;
        let tmp = self.tmp_path();
        let bytes = serde_json::to_vec(cred)?;
        std::fs::write(&tmp, bytes).with_context(|| format!("write {}", tmp.display()))?;
        std::fs::rename(&tmp, self.path()).context("replace credential file")?;
        tprintln!("credential.save key={}", self.key);
        Ok(())
    }

    fn clear(&self) -> Result<()> {
        let p = self.path();
        match std::fs::remove_file(&p) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("remove credential file {}", p.display())),
        }
    }
}
