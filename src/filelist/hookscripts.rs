//! Provider for hook scripts installed verbatim into the archive.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::FileList;

/// Copies every script in a directory to a fixed destination directory
/// inside the archive, keeping the file name.
pub struct HookScripts {
    scripts_dir: PathBuf,
    dest_dir: PathBuf,
}

impl HookScripts {
    pub fn new(scripts_dir: impl Into<PathBuf>, dest_dir: impl Into<PathBuf>) -> Self {
        Self {
            scripts_dir: scripts_dir.into(),
            dest_dir: dest_dir.into(),
        }
    }

    pub fn list(&self) -> Result<FileList> {
        info!("- Including hook scripts from {}", self.scripts_dir.display());

        let files = FileList::new();
        let entries = match fs::read_dir(&self.scripts_dir) {
            Ok(entries) => entries,
            Err(_) => {
                warn!("-- Unable to find dir, skipping...");
                return Ok(files);
            }
        };

        for entry in entries {
            let entry = entry
                .with_context(|| format!("unable to read hook script dir {:?}", self.scripts_dir))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let dest = self.dest_dir.join(entry.file_name());
            files.add(path, dest);
        }
        Ok(files)
    }
}
