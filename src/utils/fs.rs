use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// Writes `data` to a hidden sibling temp file, syncs it, then renames it
/// over `path`. Readers see either the old file or the new one.
pub fn write_atomic(path: &Path, data: &[u8]) -> io::Result<()> {
    StagedFile::stage(path, data)?.commit()
}

/// A fully written and synced temp file waiting to replace its target.
///
/// Staging several files first and committing them afterwards keeps the
/// window in which only some targets have moved down to the renames. An
/// uncommitted stage removes its temp file on drop.
#[derive(Debug)]
pub struct StagedFile {
    tmp: PathBuf,
    target: PathBuf,
    committed: bool,
}

impl StagedFile {
    pub fn stage(path: &Path, data: &[u8]) -> io::Result<Self> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)?;

        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());
        let tmp = parent.join(format!(".{}.{}.tmp", file_name, uuid::Uuid::new_v4().simple()));

        let staged = Self {
            tmp,
            target: path.to_path_buf(),
            committed: false,
        };

        let mut file = OpenOptions::new().create_new(true).write(true).open(&staged.tmp)?;
        file.write_all(data)?;
        file.sync_all()?;

        Ok(staged)
    }

    pub fn target(&self) -> &Path {
        &self.target
    }

    /// Renames the temp file over the target.
    pub fn commit(mut self) -> io::Result<()> {
        fs::rename(&self.tmp, &self.target)?;
        self.committed = true;
        Ok(())
    }
}

impl Drop for StagedFile {
    fn drop(&mut self) {
        if !self.committed {
            let _ = fs::remove_file(&self.tmp);
        }
    }
}
