//! Provider for explicit directory entries inside the archive.

use std::fs;
use std::path::PathBuf;

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::FileList;

/// Reads every file in a hook directory; each line names an absolute
/// directory to create inside the archive.
pub struct HookDirs {
    path: PathBuf,
}

impl HookDirs {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn list(&self) -> Result<FileList> {
        info!("- Creating directories specified in {}", self.path.display());

        let files = FileList::new();
        let entries = match fs::read_dir(&self.path) {
            Ok(entries) => entries,
            Err(_) => {
                warn!("-- Unable to find dir, skipping...");
                return Ok(files);
            }
        };

        for entry in entries {
            let entry = entry
                .with_context(|| format!("unable to read hook dir {:?}", self.path))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("unable to open hook file {:?}", path))?;
            info!("-- Creating directories from: {}", path.display());

            for line in contents.lines() {
                let dir = line.trim();
                if dir.is_empty() {
                    continue;
                }
                files.add(dir, dir);
            }
        }
        Ok(files)
    }
}
