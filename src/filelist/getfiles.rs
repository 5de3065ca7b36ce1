//! Expansion of source selectors into concrete host paths: glob patterns,
//! directory trees, fallback lookups, and ELF dependency closures.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use tracing::info;
use walkdir::WalkDir;

use crate::elfdeps;

/// Expand every selector in `list`, deduplicated across the whole call.
pub fn get_files(list: &[String], required: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for file in list {
        files.extend(get_file(file, required)?);
    }
    Ok(dedup(files))
}

/// Expand a single selector. A glob pattern that matches recurses into
/// each match; anything else goes through the normalized lookup.
pub fn get_file(file: &str, required: bool) -> Result<Vec<PathBuf>> {
    let expanded: Vec<PathBuf> = match glob::glob(file) {
        Ok(paths) => paths.flatten().collect(),
        Err(_) => Vec::new(),
    };
    if !expanded.is_empty() && expanded[0] != Path::new(file) {
        let mut files = Vec::new();
        for path in expanded {
            files.extend(get_file(&path.to_string_lossy(), required)?);
        }
        return Ok(dedup(files));
    }

    get_file_normalized(Path::new(file), required)
}

/// Lookup for a selector with globs already out of the way. Absent paths
/// fall back to the merged-/usr location and then to a `.zst` sibling
/// (the compression convention of linux-firmware) before giving up.
fn get_file_normalized(file: &Path, required: bool) -> Result<Vec<PathBuf>> {
    let meta = match fs::metadata(file) {
        Ok(meta) => meta,
        Err(err) => {
            if let Some(s) = file.to_str() {
                if s.starts_with("/bin/") || s.starts_with("/sbin/") {
                    let usr = Path::new("/usr").join(&s[1..]);
                    if usr.exists() {
                        info!(
                            "failed to find {:?}, but found it at {:?}. Please adjust the path.",
                            file, usr
                        );
                        return get_file_normalized(&usr, required);
                    }
                }
            }

            let zst = PathBuf::from(format!("{}.zst", file.display()));
            if zst.exists() {
                return get_file_normalized(&zst, required);
            }

            if required {
                return Err(err).with_context(|| format!("failed to stat file {:?}", file));
            }
            return Ok(Vec::new());
        }
    };

    let mut files = Vec::new();
    if meta.is_dir() {
        for entry in WalkDir::new(file) {
            let entry =
                entry.with_context(|| format!("failed to walk directory {:?}", file))?;
            if entry.file_type().is_dir() {
                continue;
            }
            files.extend(get_file(&entry.path().to_string_lossy(), required)?);
        }
    } else {
        files.push(file.to_path_buf());

        // pick up shared libraries for binaries
        if elfdeps::is_elf(file) {
            files.extend(elfdeps::binary_deps(file)?);
        }
    }

    Ok(dedup(files))
}

fn dedup(files: Vec<PathBuf>) -> Vec<PathBuf> {
    let mut seen = HashSet::new();
    files.into_iter().filter(|f| seen.insert(f.clone())).collect()
}
