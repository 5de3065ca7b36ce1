//! Host filesystem helpers shared by the file collectors and the archive
//! builder: symlink target resolution, merged-/usr handling, and kernel
//! version discovery.

use std::fs;
use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{bail, Context, Result};

/// Resolve a relative symlink target (e.g. `../../lib/foo.so`) against the
/// directory containing the link, returning an absolute path.
///
/// This is a pure path computation: `dir` and `target` are joined and `.`
/// and `..` segments are folded away textually, without consulting the
/// filesystem or the process working directory.
pub fn resolve_rel_symlink(target: &Path, dir: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for comp in dir.join(target).components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

static MERGED_USR: OnceLock<bool> = OnceLock::new();

/// Whether the running system has the merged-/usr layout. `/bin` and `/lib`
/// decide: the first one present that is a symlink means merged, a real
/// directory means split. Neither existing counts as merged, the safer
/// assumption for the archive. Cached for the whole invocation.
pub fn has_merged_usr() -> bool {
    *MERGED_USR.get_or_init(|| {
        for probe in ["/bin", "/lib"] {
            if let Ok(meta) = fs::symlink_metadata(probe) {
                return meta.is_symlink();
            }
        }
        true
    })
}

/// Rewrite a top-level `/bin`, `/sbin`, `/lib` or `/lib64` path to its
/// merged-/usr location. Anything else passes through unchanged.
pub fn merge_usr(path: &Path) -> PathBuf {
    if let Some(s) = path.to_str() {
        for prefix in ["/bin/", "/sbin/", "/lib/", "/lib64/"] {
            if s.starts_with(prefix) {
                return PathBuf::from("/usr").join(&s[1..]);
            }
        }
    }
    path.to_path_buf()
}

fn kernel_release_file() -> Result<PathBuf> {
    let mut files: Vec<PathBuf> = glob::glob("/usr/share/kernel/*/kernel.release")
        .context("invalid kernel.release glob pattern")?
        .flatten()
        .collect();

    // only one kernel flavor supported
    if files.len() != 1 {
        bail!(
            "only one kernel release/flavor is supported, found: {:?}",
            files
        );
    }

    Ok(files.remove(0))
}

/// The kernel version this build targets, read from the single installed
/// flavor's `kernel.release` file.
pub fn kernel_version() -> Result<String> {
    let release_file = kernel_release_file()?;
    let contents = fs::read_to_string(&release_file)
        .with_context(|| format!("unable to read {:?}", release_file))?;
    Ok(contents.trim().to_string())
}
