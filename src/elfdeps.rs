//! Shared-library dependency resolution for ELF binaries.
//!
//! Dependencies are read straight out of the dynamic section (`DT_NEEDED`),
//! so this works on binaries for any architecture without executing them or
//! involving the host dynamic linker.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use elf::endian::AnyEndian;
use elf::{abi, ElfBytes};

use crate::osutil;

/// Directories probed when resolving a DT_NEEDED name, in order. These are
/// not searched recursively.
const LIB_DIR_GLOBS: [&str; 3] = ["/usr/lib", "/lib", "/usr/lib/expect*"];

/// Returns true when `path` parses as an ELF file.
pub fn is_elf(path: &Path) -> bool {
    match fs::read(path) {
        Ok(data) => ElfBytes::<AnyEndian>::minimal_parse(&data).is_ok(),
        Err(_) => false,
    }
}

/// The DT_NEEDED entries of a single ELF file. A file without a dynamic
/// section or dynamic string table simply has no dependencies.
fn needed_libraries(path: &Path) -> Result<Vec<String>> {
    let data =
        fs::read(path).with_context(|| format!("unable to read elf binary {:?}", path))?;
    let file = ElfBytes::<AnyEndian>::minimal_parse(&data)
        .map_err(|e| anyhow!("unable to parse elf binary {:?}: {}", path, e))?;

    let common = file
        .find_common_data()
        .map_err(|e| anyhow!("unable to read elf sections of {:?}: {}", path, e))?;
    let strings = match common.dynsyms_strs {
        Some(strings) => strings,
        None => return Ok(Vec::new()),
    };
    let dynamic = match file
        .dynamic()
        .map_err(|e| anyhow!("unable to read dynamic section of {:?}: {}", path, e))?
    {
        Some(dynamic) => dynamic,
        None => return Ok(Vec::new()),
    };

    let mut libs = Vec::new();
    for entry in dynamic.iter() {
        if entry.d_tag != abi::DT_NEEDED {
            continue;
        }
        let name = strings
            .get(entry.d_val() as usize)
            .map_err(|e| anyhow!("bad string offset in {:?}: {}", path, e))?;
        libs.push(name.to_string());
    }
    Ok(libs)
}

/// Probe the fixed library search path for a DT_NEEDED name and return the
/// first hit.
fn find_library(name: &str) -> Option<PathBuf> {
    for dir_glob in LIB_DIR_GLOBS {
        let dirs = match glob::glob(dir_glob) {
            Ok(dirs) => dirs,
            Err(_) => continue,
        };
        for dir in dirs.flatten() {
            let candidate = dir.join(name);
            if candidate.exists() {
                return Some(candidate);
            }
        }
    }
    None
}

fn collect_deps(
    file: &Path,
    visited: &mut HashSet<PathBuf>,
    out: &mut Vec<PathBuf>,
) -> Result<()> {
    if !visited.insert(file.to_path_buf()) {
        return Ok(());
    }

    let libs = needed_libraries(file)?;
    out.push(file.to_path_buf());

    for lib in libs {
        match find_library(&lib) {
            Some(path) => collect_deps(&path, visited, out)?,
            None => bail!("unable to locate dependency {:?} for {:?}", lib, file),
        }
    }

    Ok(())
}

/// Transitive DT_NEEDED closure for `file`, including `file` itself. A
/// symlink input resolves its target (relative targets against the link's
/// directory) before recursing. Failure to locate any needed library at any
/// level is an error.
pub fn binary_deps(file: &Path) -> Result<Vec<PathBuf>> {
    let meta = fs::symlink_metadata(file)
        .with_context(|| format!("failed to stat file {:?}", file))?;

    let mut root = file.to_path_buf();
    if meta.file_type().is_symlink() {
        let target = fs::read_link(file)
            .with_context(|| format!("unable to read symlink {:?}", file))?;
        root = if target.is_absolute() {
            target
        } else {
            let dir = file.parent().unwrap_or_else(|| Path::new("/"));
            osutil::resolve_rel_symlink(&target, dir)
        };
    }

    let mut visited = HashSet::new();
    let mut files = Vec::new();
    collect_deps(&root, &mut visited, &mut files)?;
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // ELF64 little-endian header with no program or section headers: a
    // valid file as far as the parser cares, with no dependencies.
    fn minimal_elf() -> Vec<u8> {
        let mut data = vec![0u8; 64];
        data[0..4].copy_from_slice(&[0x7f, b'E', b'L', b'F']);
        data[4] = 2; // ELFCLASS64
        data[5] = 1; // ELFDATA2LSB
        data[6] = 1; // EV_CURRENT
        data[16] = 2; // e_type = ET_EXEC
        data[18] = 0x3e; // e_machine = EM_X86_64
        data[20] = 1; // e_version
        data[52] = 64; // e_ehsize
        data
    }

    #[test]
    fn test_is_elf_rejects_scripts() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"#!/bin/sh\necho hello\n").unwrap();
        assert!(!is_elf(file.path()));
    }

    #[test]
    fn test_is_elf_rejects_missing_file() {
        assert!(!is_elf(Path::new("/nonexistent/elf/binary")));
    }

    #[test]
    fn test_is_elf_accepts_minimal_header() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&minimal_elf()).unwrap();
        assert!(is_elf(file.path()));
    }

    #[test]
    fn test_binary_deps_non_elf_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"not an elf").unwrap();
        let err = binary_deps(file.path()).unwrap_err();
        assert!(err.to_string().contains("unable to parse elf binary"));
    }

    #[test]
    fn test_binary_deps_no_needed_entries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(&minimal_elf()).unwrap();
        let deps = binary_deps(file.path()).unwrap();
        assert_eq!(deps, vec![file.path().to_path_buf()]);
    }

    #[test]
    fn test_binary_deps_resolves_symlink_input() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("real");
        fs::write(&target, minimal_elf()).unwrap();
        let link = dir.path().join("link");
        std::os::unix::fs::symlink("real", &link).unwrap();

        let deps = binary_deps(&link).unwrap();
        assert_eq!(deps, vec![target]);
    }
}
