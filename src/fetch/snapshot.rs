use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{Fetcher, RawDocument};
use crate::store::record_key;
use crate::utils::FetchError;

/// Serves previously saved pages from `<dir>/<record key>.html`, keyed the
/// same way as [`crate::store::RecordStore`] output.
#[derive(Debug, Clone)]
pub struct SnapshotFetcher {
    dir: PathBuf,
}

impl SnapshotFetcher {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{}.html", record_key(identity)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

#[async_trait]
impl Fetcher for SnapshotFetcher {
    async fn fetch(&self, identity: &str) -> Result<RawDocument, FetchError> {
        let path = self.path_for(identity);
        debug!(identity, path = %path.display(), "reading snapshot");

        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(RawDocument::new(String::from_utf8_lossy(&bytes).into_owned())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(FetchError::NotFound {
                identity: identity.to_string(),
            }),
            Err(e) => Err(FetchError::Request(format!("{}: {}", path.display(), e))),
        }
    }
}
