//! Class-drift detection and selector self-repair.
//!
//! A repair cycle indexes the archived reference page and a freshly observed
//! candidate of the same template, pairs nodes by structural path, and for
//! every path whose class list changed rewrites each rule still pointing at
//! the old class string. The patched config is persisted and the candidate
//! becomes the new reference, so the next cycle diffs against it.

use chrono::Utc;
use serde::Serialize;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tracing::{debug, error, info, warn};

use crate::dom_index::{ClassSet, DomIndex, StructuralPath};
use crate::fetch::Fetcher;
use crate::selectors::{SelectorConfig, SelectorStore};
use crate::utils::fs::{StagedFile, write_atomic};
use crate::utils::{AppError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DriftEntry {
    pub path: StructuralPath,
    pub old: ClassSet,
    pub new: ClassSet,
}

/// One rule whose class string was rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RulePatch {
    pub field: String,
    pub old: String,
    pub new: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepairState {
    Idle,
    IndexingReference,
    IndexingCandidate,
    Diffing,
    NoChange,
    ChangesFound,
    Patching,
    Persisting,
    ArchivingReference,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RepairOutcome {
    /// Nothing to repair. `drift` lists changed paths no rule referenced.
    NoChange { drift: Vec<DriftEntry> },
    Patched {
        version: u64,
        drift: Vec<DriftEntry>,
        patches: Vec<RulePatch>,
    },
}

impl RepairOutcome {
    pub fn is_patched(&self) -> bool {
        matches!(self, RepairOutcome::Patched { .. })
    }
}

/// Paths present in both indices whose joined class strings differ, in
/// reference document order. Added or removed nodes are not drift.
pub fn find_drift(reference: &DomIndex, candidate: &DomIndex) -> Vec<DriftEntry> {
    reference
        .iter()
        .filter_map(|(path, old)| {
            let new = candidate.get(path)?;
            (old.joined() != new.joined()).then(|| DriftEntry {
                path: path.clone(),
                old: old.clone(),
                new: new.clone(),
            })
        })
        .collect()
}

/// Returns a patched copy of `config`, or `None` when no rule references
/// any drifted class string. Every rule holding a drifted string moves,
/// nested rules included. Patches never chain.
pub fn patch_config(config: &SelectorConfig, drift: &[DriftEntry]) -> Option<(SelectorConfig, Vec<RulePatch>)> {
    let mut replacements: HashMap<String, String> = HashMap::new();
    for entry in drift {
        let old = entry.old.joined();
        let new = entry.new.joined();
        match replacements.get(&old) {
            Some(existing) if *existing != new => {
                warn!(
                    path = %entry.path,
                    old = %old,
                    kept = %existing,
                    ignored = %new,
                    "conflicting drift for the same class string, keeping first"
                );
            }
            Some(_) => {}
            None => {
                replacements.insert(old, new);
            }
        }
    }

    let mut next = config.clone();
    let mut patches = Vec::new();
    next.for_each_rule_mut(|field, rule| {
        let Some(class) = rule.class.as_deref() else {
            return;
        };
        let normalized = class.split_whitespace().collect::<Vec<_>>().join(" ");
        if let Some(new) = replacements.get(&normalized) {
            patches.push(RulePatch {
                field: field.to_string(),
                old: normalized,
                new: new.clone(),
            });
            rule.class = Some(new.clone());
        }
    });

    if patches.is_empty() {
        None
    } else {
        Some((next, patches))
    }
}

/// Runs repair cycles against one reference document and selector store.
pub struct ConfigRepair {
    store: Arc<SelectorStore>,
    reference_path: PathBuf,
    audit_log: Option<PathBuf>,
}

impl ConfigRepair {
    pub fn new(store: Arc<SelectorStore>, reference_path: impl Into<PathBuf>) -> Self {
        Self {
            store,
            reference_path: reference_path.into(),
            audit_log: None,
        }
    }

    pub fn with_audit_log(mut self, path: impl Into<PathBuf>) -> Self {
        self.audit_log = Some(path.into());
        self
    }

    pub fn reference_path(&self) -> &Path {
        &self.reference_path
    }

    /// Archives `html` as the reference without diffing. Used to seed the
    /// first baseline.
    pub async fn set_baseline(&self, html: &str) -> Result<()> {
        if html.trim().is_empty() {
            return Err(AppError::Validation("baseline document is empty".to_string()));
        }
        let path = self.reference_path.clone();
        let data = html.to_string();
        tokio::task::spawn_blocking(move || write_atomic(&path, data.as_bytes()))
            .await
            .map_err(std::io::Error::other)
            .and_then(|written| written)
            .map_err(|e| AppError::persist(&self.reference_path, e))?;
        info!(path = %self.reference_path.display(), "reference document archived");
        Ok(())
    }

    /// Fetches a fresh candidate for `identity` and runs a repair cycle on it.
    pub async fn repair_from(&self, fetcher: &dyn Fetcher, identity: &str) -> Result<RepairOutcome> {
        let document = fetcher.fetch(identity).await?;
        info!(identity, bytes = document.html.len(), "candidate fetched");
        self.run(&document.html).await
    }

    pub async fn run(&self, candidate_html: &str) -> Result<RepairOutcome> {
        enter(RepairState::IndexingReference);
        let reference_html = tokio::fs::read_to_string(&self.reference_path)
            .await
            .map_err(|e| AppError::DriftBaselineMissing {
                path: self.reference_path.clone(),
                reason: e.to_string(),
            })?;
        if reference_html.trim().is_empty() {
            return Err(AppError::DriftBaselineMissing {
                path: self.reference_path.clone(),
                reason: "reference document is empty".to_string(),
            });
        }
        let reference = DomIndex::from_html(&reference_html);

        enter(RepairState::IndexingCandidate);
        if candidate_html.trim().is_empty() {
            warn!("candidate document is empty, leaving selectors untouched");
            enter(RepairState::NoChange);
            return Ok(RepairOutcome::NoChange { drift: Vec::new() });
        }
        let candidate = DomIndex::from_html(candidate_html);

        enter(RepairState::Diffing);
        let drift = find_drift(&reference, &candidate);
        debug!(
            reference_nodes = reference.len(),
            candidate_nodes = candidate.len(),
            drifted = drift.len(),
            "structural diff complete"
        );

        // Exclusive from here until the new config is visible.
        let mut guard = self.store.write().await;
        let Some((mut next, patches)) = patch_config(&guard, &drift) else {
            enter(RepairState::NoChange);
            if !drift.is_empty() {
                info!(drifted = drift.len(), "class drift found but no rule references it");
            }
            return Ok(RepairOutcome::NoChange { drift });
        };
        enter(RepairState::ChangesFound);
        enter(RepairState::Patching);

        next.version = guard.version + 1;
        next.updated_at = Some(Utc::now());

        enter(RepairState::Persisting);
        self.commit(&next, candidate_html, reference_html).await?;
        let version = next.version;
        *guard = Arc::new(next);
        drop(guard);

        for patch in &patches {
            info!(field = %patch.field, old = %patch.old, new = %patch.new, "selector rule repaired");
        }

        if let Err(e) = self.write_audit(version, &drift, &patches).await {
            warn!(error = %e, "failed to append repair audit log");
        }

        enter(RepairState::Idle);
        info!(version, patched = patches.len(), "selector config updated");
        Ok(RepairOutcome::Patched { version, drift, patches })
    }

    /// Moves the patched config and the new reference into place together,
    /// off the async executor.
    async fn commit(&self, next: &SelectorConfig, candidate_html: &str, previous_reference: String) -> Result<()> {
        let commit = PairCommit {
            config_path: self.store.path().to_path_buf(),
            config: next.to_json_bytes()?,
            reference_path: self.reference_path.clone(),
            candidate: candidate_html.to_string(),
            previous_reference,
        };
        let config_path = commit.config_path.clone();
        tokio::task::spawn_blocking(move || commit.run())
            .await
            .map_err(|e| AppError::persist(&config_path, std::io::Error::other(e)))??;
        debug!(path = %config_path.display(), version = next.version, "selector config saved");
        Ok(())
    }

    async fn write_audit(&self, version: u64, drift: &[DriftEntry], patches: &[RulePatch]) -> std::io::Result<()> {
        let Some(path) = &self.audit_log else {
            return Ok(());
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await?;
        }

        let timestamp = Utc::now().to_rfc3339();
        let mut lines = String::new();
        for entry in drift {
            let line = json!({
                "timestamp": timestamp,
                "version": version,
                "kind": "drift",
                "path": entry.path,
                "old": entry.old.joined(),
                "new": entry.new.joined(),
            });
            lines.push_str(&format!("{}\n", line));
        }
        for patch in patches {
            let line = json!({
                "timestamp": timestamp,
                "version": version,
                "kind": "patch",
                "field": patch.field,
                "old": patch.old,
                "new": patch.new,
            });
            lines.push_str(&format!("{}\n", line));
        }

        let mut file = OpenOptions::new().create(true).append(true).open(path).await?;
        file.write_all(lines.as_bytes()).await?;
        file.sync_data().await
    }
}

/// A patched config and its new reference, written as a pair.
///
/// Both files are staged before either rename. The reference moves first;
/// if the config rename then fails the previous reference is written back,
/// so the baseline always matches the rules on disk.
struct PairCommit {
    config_path: PathBuf,
    config: Vec<u8>,
    reference_path: PathBuf,
    candidate: String,
    previous_reference: String,
}

impl PairCommit {
    fn run(self) -> Result<()> {
        let staged_config = StagedFile::stage(&self.config_path, &self.config)
            .map_err(|e| AppError::persist(&self.config_path, e))?;
        let staged_reference = StagedFile::stage(&self.reference_path, self.candidate.as_bytes())
            .map_err(|e| AppError::persist(&self.reference_path, e))?;

        enter(RepairState::ArchivingReference);
        staged_reference
            .commit()
            .map_err(|e| AppError::persist(&self.reference_path, e))?;

        if let Err(e) = staged_config.commit() {
            if let Err(restore) = write_atomic(&self.reference_path, self.previous_reference.as_bytes()) {
                error!(
                    path = %self.reference_path.display(),
                    error = %restore,
                    "failed to restore reference after config write failed"
                );
            }
            return Err(AppError::persist(&self.config_path, e));
        }
        Ok(())
    }
}

fn enter(state: RepairState) {
    debug!(state = ?state, "repair state");
}
