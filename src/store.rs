use std::path::{Path, PathBuf};
use tracing::debug;
use sha2::{Digest, Sha256};

use crate::models::ProductRecord;
use crate::utils::fs::write_atomic;
use crate::utils::{AppError, Result};

const PRODUCT_MARKER: &str = "/product/";

/// Hex digits of the identity digest appended to every key.
const DIGEST_LEN: usize = 12;

/// File-name-safe key for an identity, unique per trimmed identity.
///
/// The readable part is the product slug for product URLs
/// (`.../product/<slug>/?q` → `<slug>`) or the whole identity otherwise,
/// with characters outside `[A-Za-z0-9._-]` collapsed to `_`. A digest of
/// the full identity follows, so query variants and identities that
/// sanitise alike still get distinct keys.
pub fn record_key(identity: &str) -> String {
    let identity = identity.trim();
    let slug = match identity.find(PRODUCT_MARKER) {
        Some(pos) => {
            let rest = &identity[pos + PRODUCT_MARKER.len()..];
            let end = rest.find(['?', '#']).unwrap_or(rest.len());
            rest[..end].trim_matches('/')
        }
        None => identity,
    };

    let mut out = String::with_capacity(slug.len() + DIGEST_LEN + 1);
    let mut last_us = false;
    for ch in slug.chars() {
        if ch.is_ascii_alphanumeric() || ch == '-' || ch == '.' {
            out.push(ch);
            last_us = false;
        } else if !last_us {
            out.push('_');
            last_us = true;
        }
    }

    let readable = out.trim_matches(|c| c == '_' || c == '.');
    let readable = if readable.is_empty() { "record" } else { readable };

    let digest = hex::encode(Sha256::digest(identity.as_bytes()));
    format!("{}-{}", readable, &digest[..DIGEST_LEN])
}

/// One JSON file per identity under a single directory.
#[derive(Debug, Clone)]
pub struct RecordStore {
    dir: PathBuf,
}

impl RecordStore {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{}.json", record_key(identity)))
    }

    /// Serializes fully, then writes once, atomically.
    pub fn persist(&self, identity: &str, record: &ProductRecord) -> Result<PathBuf> {
        let path = self.path_for(identity);
        let mut data = serde_json::to_vec_pretty(record)?;
        data.push(b'\n');
        write_atomic(&path, &data).map_err(|e| AppError::persist(&path, e))?;
        debug!(identity, path = %path.display(), "record persisted");
        Ok(path)
    }

    pub fn load(&self, identity: &str) -> Result<Option<ProductRecord>> {
        let path = self.path_for(identity);
        match std::fs::read(&path) {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
