//! Kernel module collection driven by modules.dep.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use regex::Regex;
use tracing::{info, warn};
use walkdir::WalkDir;

use super::FileList;
use crate::osutil;

/// Collects kernel modules by name (resolving dependencies through
/// `modules.dep`) and by subtree, plus the `modules.*` index files
/// modprobe needs at runtime.
pub struct Modules {
    modules_list: Vec<String>,
    modules_list_path: PathBuf,
}

impl Modules {
    /// `modules_list` holds module names to resolve directly (e.g. from
    /// deviceinfo); `modules_list_path` is a directory of list files with
    /// one module name or subtree per line.
    pub fn new(modules_list: Vec<String>, modules_list_path: impl Into<PathBuf>) -> Self {
        Self {
            modules_list,
            modules_list_path: modules_list_path.into(),
        }
    }

    pub fn list(&self) -> Result<FileList> {
        let kern_ver = osutil::kernel_version()?;

        let files = FileList::new();
        let mod_dir = Path::new("/lib/modules").join(&kern_ver);
        if !mod_dir.exists() {
            // kernel may be built without module support
            warn!(
                "-- kernel module directory not found: {:?}, not including modules",
                mod_dir
            );
            return Ok(files);
        }

        // modules.* required by modprobe
        if let Ok(paths) = glob::glob(&format!("{}/modules.*", mod_dir.display())) {
            for file in paths.flatten() {
                files.add(&file, &file);
            }
        }

        for module in &self.modules_list {
            let mod_files = get_module(module, &mod_dir)
                .with_context(|| format!("unable to get module {:?}", module))?;
            for file in mod_files {
                files.add(&file, &file);
            }
        }

        info!(
            "- Searching for kernel modules from {}",
            self.modules_list_path.display()
        );
        let entries = match fs::read_dir(&self.modules_list_path) {
            Ok(entries) => entries,
            Err(_) => {
                warn!("-- Unable to find dir, skipping...");
                return Ok(files);
            }
        };
        for entry in entries {
            let entry = entry.with_context(|| {
                format!("unable to read module list dir {:?}", self.modules_list_path)
            })?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            let contents = fs::read_to_string(&path)
                .with_context(|| format!("unable to open module list file {:?}", path))?;
            info!("-- Including modules from: {}", path.display());

            let list = slurp_modules(&contents, &mod_dir)
                .with_context(|| format!("unable to process module list file {:?}", path))?;
            files.import(&list);
        }
        Ok(files)
    }
}

/// Parse a module list: a line ending in `/` is a subtree under the
/// modules directory (globs allowed), a bare name is resolved through
/// modules.dep, anything else is ignored with a warning.
fn slurp_modules(contents: &str, mod_dir: &Path) -> Result<FileList> {
    let files = FileList::new();

    for line in contents.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let (dir, file) = match line.rfind('/') {
            Some(idx) => (&line[..idx + 1], &line[idx + 1..]),
            None => ("", line),
        };

        if file.is_empty() {
            let pattern = mod_dir.join(dir.trim_end_matches('/'));
            let dirs = match glob::glob(&pattern.to_string_lossy()) {
                Ok(dirs) => dirs,
                Err(_) => continue,
            };
            for d in dirs.flatten() {
                let mod_files = modules_in_dir(&d)
                    .with_context(|| format!("unable to get modules dir {:?}", d))?;
                for file in mod_files {
                    files.add(&file, &file);
                }
            }
        } else if dir.is_empty() {
            let mod_files = get_module(line, mod_dir)
                .with_context(|| format!("unable to get module file {:?}", line))?;
            for file in mod_files {
                files.add(&file, &file);
            }
        } else {
            warn!("Unknown module entry: {:?}", line);
        }
    }

    Ok(files)
}

/// Every module file under `mod_path`, recursively.
fn modules_in_dir(mod_path: &Path) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in WalkDir::new(mod_path) {
        let entry = entry?;
        let path = entry.path();
        match path.extension().and_then(|e| e.to_str()) {
            Some("ko") | Some("xz") => files.push(path.to_path_buf()),
            _ => {}
        }
    }
    Ok(files)
}

/// Given a module name, e.g. `dw_wdt`, resolve the full path to the module
/// file and all of its dependencies. An unmatched name resolves to nothing:
/// the module may be built into the kernel. A matched line whose files are
/// missing from the modules directory is an error.
fn get_module(mod_name: &str, mod_dir: &Path) -> Result<Vec<PathBuf>> {
    let mod_dep = mod_dir.join("modules.dep");
    let contents = fs::read_to_string(&mod_dep)
        .with_context(|| format!("kernel modules.dep not found in {:?}", mod_dir))?;

    let mut files = Vec::new();
    for dep in module_deps(mod_name, &contents)? {
        let path = mod_dir.join(dep);
        if !path.exists() {
            bail!(
                "tried to include a module that doesn't exist in the modules directory ({:?}): {:?}",
                mod_dir,
                path
            );
        }
        files.push(path);
    }
    Ok(files)
}

/// Find the modules.dep line matching `mod_name` and return its module
/// path plus dependency paths, all relative to the modules directory.
///
/// The match key is the base file name with everything after the first `.`
/// stripped, and any run of `-`/`_` in the requested name matches any run
/// of `-`/`_` in the key.
fn module_deps(mod_name: &str, modules_dep: &str) -> Result<Vec<String>> {
    let re = module_matcher(mod_name)?;

    for line in modules_dep.lines() {
        let mut fields: Vec<&str> = line.split_whitespace().collect();
        if fields.is_empty() {
            continue;
        }
        fields[0] = fields[0].trim_end_matches(':');

        let base = Path::new(fields[0])
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let canonical = base.split('.').next().unwrap_or_default();

        if re.is_match(canonical) {
            return Ok(fields.iter().map(|s| s.to_string()).collect());
        }
    }

    Ok(Vec::new())
}

fn module_matcher(mod_name: &str) -> Result<Regex> {
    let mut pattern = String::from("^");
    let mut chars = mod_name.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '-' || c == '_' {
            while matches!(chars.peek(), Some('-') | Some('_')) {
                chars.next();
            }
            pattern.push_str("[-_]+");
        } else {
            pattern.push_str(&regex::escape(&c.to_string()));
        }
    }
    pattern.push('$');
    Regex::new(&pattern).with_context(|| format!("bad module name {:?}", mod_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODULES_DEP: &str = "\
kernel/drivers/watchdog/dw_wdt.ko.xz: kernel/drivers/watchdog/watchdog.ko.xz
kernel/fs/nls/nls_iso8859-1.ko.xz:
kernel/drivers/block/loop.ko.xz:
kernel/fs/overlayfs/overlay.ko.xz: kernel/fs/foo.ko.xz kernel/fs/bar.ko.xz
";

    #[test]
    fn test_module_deps_with_dependencies() {
        let deps = module_deps("dw_wdt", MODULES_DEP).unwrap();
        assert_eq!(
            deps,
            vec![
                "kernel/drivers/watchdog/dw_wdt.ko.xz",
                "kernel/drivers/watchdog/watchdog.ko.xz"
            ]
        );
    }

    #[test]
    fn test_module_deps_no_dependencies() {
        let deps = module_deps("loop", MODULES_DEP).unwrap();
        assert_eq!(deps, vec!["kernel/drivers/block/loop.ko.xz"]);
    }

    #[test]
    fn test_module_deps_separator_canonicalisation() {
        // '-' and '_' runs are interchangeable in both directions
        let deps = module_deps("nls-iso8859-1", MODULES_DEP).unwrap();
        assert_eq!(deps, vec!["kernel/fs/nls/nls_iso8859-1.ko.xz"]);

        let deps = module_deps("dw-wdt", MODULES_DEP).unwrap();
        assert_eq!(deps[0], "kernel/drivers/watchdog/dw_wdt.ko.xz");
    }

    #[test]
    fn test_module_deps_anchored_match() {
        // "wdt" must not match "dw_wdt"
        let deps = module_deps("wdt", MODULES_DEP).unwrap();
        assert!(deps.is_empty());
    }

    #[test]
    fn test_module_deps_unmatched_is_empty() {
        let deps = module_deps("ext4", MODULES_DEP).unwrap();
        assert!(deps.is_empty());
    }

    #[test]
    fn test_get_module_requires_listed_files_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let mod_dir = dir.path();
        fs::write(mod_dir.join("modules.dep"), MODULES_DEP).unwrap();

        // declared but absent dependency is fatal
        let err = get_module("dw_wdt", mod_dir).unwrap_err();
        assert!(err.to_string().contains("doesn't exist"));

        // create the files and resolution succeeds
        fs::create_dir_all(mod_dir.join("kernel/drivers/watchdog")).unwrap();
        fs::write(mod_dir.join("kernel/drivers/watchdog/dw_wdt.ko.xz"), "m").unwrap();
        fs::write(mod_dir.join("kernel/drivers/watchdog/watchdog.ko.xz"), "m").unwrap();
        let files = get_module("dw_wdt", mod_dir).unwrap();
        assert_eq!(files.len(), 2);
    }

    #[test]
    fn test_get_module_missing_modules_dep() {
        let dir = tempfile::tempdir().unwrap();
        let err = get_module("loop", dir.path()).unwrap_err();
        assert!(format!("{:#}", err).contains("modules.dep not found"));
    }

    #[test]
    fn test_slurp_modules_subtree_and_unknown_entry() {
        let dir = tempfile::tempdir().unwrap();
        let mod_dir = dir.path();
        fs::write(mod_dir.join("modules.dep"), "").unwrap();
        fs::create_dir_all(mod_dir.join("kernel/fs/overlayfs")).unwrap();
        fs::write(mod_dir.join("kernel/fs/overlayfs/overlay.ko"), "m").unwrap();
        fs::write(mod_dir.join("kernel/fs/overlayfs/notes.txt"), "x").unwrap();

        let list = slurp_modules("kernel/fs/overlayfs/\n", mod_dir).unwrap();
        let overlay = mod_dir.join("kernel/fs/overlayfs/overlay.ko");
        assert_eq!(list.get(&overlay), Some(overlay.clone()));
        // only *.ko / *.xz files are picked up
        assert_eq!(list.len(), 1);
    }
}
