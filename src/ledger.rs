use std::collections::HashSet;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs::{self, OpenOptions};
use tokio::io::AsyncWriteExt;
use tracing::debug;

use crate::utils::{AppError, Result};

/// Append-only, newline-delimited record of processed identities.
///
/// The file is never rewritten; an identity is appended only after its
/// record was persisted.
#[derive(Debug)]
pub struct Ledger {
    path: PathBuf,
    seen: HashSet<String>,
}

impl Ledger {
    /// Loads the ledger at `path`. A missing file is an empty ledger.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let seen = match std::fs::read_to_string(&path) {
            Ok(text) => text
                .lines()
                .map(str::trim)
                .filter(|line| !line.is_empty())
                .map(str::to_string)
                .collect(),
            Err(e) if e.kind() == ErrorKind::NotFound => HashSet::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), entries = seen.len(), "ledger opened");
        Ok(Self { path, seen })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn contains(&self, identity: &str) -> bool {
        self.seen.contains(identity.trim())
    }

    pub fn len(&self) -> usize {
        self.seen.len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    /// Appends `identity` and syncs. Appending a known identity is a no-op.
    pub async fn append(&mut self, identity: &str) -> Result<()> {
        let identity = identity.trim();
        if identity.is_empty() || identity.contains('\n') || identity.contains('\r') {
            return Err(AppError::Validation(format!("identity cannot be stored in ledger: {:?}", identity)));
        }
        if self.seen.contains(identity) {
            return Ok(());
        }

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|e| AppError::persist(&self.path, e))?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AppError::persist(&self.path, e))?;
        file.write_all(format!("{}\n", identity).as_bytes())
            .await
            .map_err(|e| AppError::persist(&self.path, e))?;
        file.sync_data().await.map_err(|e| AppError::persist(&self.path, e))?;

        self.seen.insert(identity.to_string());
        Ok(())
    }
}
