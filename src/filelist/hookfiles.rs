//! Provider for file lists contributed by hooks, including any binary
//! dependencies the listed files have.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::{info, warn};

use super::{getfiles, FileList};

/// Reads every file in a hook directory; each line is `src[:dest]`, where
/// `src` may be a glob and a missing or empty dest means the file keeps
/// its own path.
pub struct HookFiles {
    file_path: PathBuf,
}

impl HookFiles {
    pub fn new(file_path: impl Into<PathBuf>) -> Self {
        Self {
            file_path: file_path.into(),
        }
    }

    pub fn list(&self) -> Result<FileList> {
        info!("- Searching for file lists from {}", self.file_path.display());

        let files = FileList::new();
        let entries = match fs::read_dir(&self.file_path) {
            Ok(entries) => entries,
            Err(_) => {
                warn!("-- Unable to find dir, skipping...");
                return Ok(files);
            }
        };

        for entry in entries {
            let entry = entry
                .with_context(|| format!("unable to read hook file dir {:?}", self.file_path))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("unable to open hook file {:?}", path))?;
            info!("-- Including files from: {}", path.display());

            let list = slurp_files(&contents)
                .with_context(|| format!("unable to process hook file {:?}", path))?;
            files.import(&list);
        }
        Ok(files)
    }
}

/// Parse `src[:dest]` lines and expand each source. The custom dest binds
/// to the path named on the line; glob matches, directory descendants and
/// ELF dependencies map to themselves.
fn slurp_files(contents: &str) -> Result<FileList> {
    let files = FileList::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let (src, dest) = match line.split_once(':') {
            Some((src, dest)) if !dest.is_empty() => (src, dest),
            Some((src, _)) => (src, src),
            None => (line, line),
        };

        for path in getfiles::get_file(src, true)? {
            if path == Path::new(src) {
                files.add(&path, dest);
            } else {
                files.add(&path, &path);
            }
        }
    }

    Ok(files)
}
