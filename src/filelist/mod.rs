//! File collection: the source→destination mapping fed to the archive
//! builder, and the feature providers that produce it.

pub mod getfiles;
pub mod hookdirs;
pub mod hookfiles;
pub mod hookscripts;
pub mod modules;
pub mod osksdl;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;

use anyhow::Result;

/// One source file on the host mapped to its destination inside the
/// archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEntry {
    pub source: PathBuf,
    pub dest: PathBuf,
}

/// Mapping from host source path to archive destination path, with set
/// semantics over the source: adding a source again replaces its
/// destination. Safe to share across concurrent producers; iteration works
/// on a snapshot taken under the read lock.
#[derive(Debug, Default)]
pub struct FileList {
    m: RwLock<HashMap<PathBuf, PathBuf>>,
}

impl FileList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, src: impl Into<PathBuf>, dest: impl Into<PathBuf>) {
        self.m
            .write()
            .expect("file list lock poisoned")
            .insert(src.into(), dest.into());
    }

    pub fn get(&self, src: impl AsRef<Path>) -> Option<PathBuf> {
        self.m
            .read()
            .expect("file list lock poisoned")
            .get(src.as_ref())
            .cloned()
    }

    /// Copy every entry of `other` into this list. Sources present in both
    /// take the destination from `other`.
    pub fn import(&self, other: &FileList) {
        let other = other.m.read().expect("file list lock poisoned");
        let mut m = self.m.write().expect("file list lock poisoned");
        for (src, dest) in other.iter() {
            m.insert(src.clone(), dest.clone());
        }
    }

    /// Snapshot of the current entries.
    pub fn entries(&self) -> Vec<FileEntry> {
        self.m
            .read()
            .expect("file list lock poisoned")
            .iter()
            .map(|(source, dest)| FileEntry {
                source: source.clone(),
                dest: dest.clone(),
            })
            .collect()
    }

    pub fn len(&self) -> usize {
        self.m.read().expect("file list lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A source of archive contents. Every variant produces a [`FileList`];
/// composing an archive is just a matter of listing its features in order.
pub enum Provider {
    HookDirs(hookdirs::HookDirs),
    HookFiles(hookfiles::HookFiles),
    HookScripts(hookscripts::HookScripts),
    Modules(modules::Modules),
    OskSdl(osksdl::OskSdl),
}

impl Provider {
    pub fn list(&self) -> Result<FileList> {
        match self {
            Provider::HookDirs(p) => p.list(),
            Provider::HookFiles(p) => p.list(),
            Provider::HookScripts(p) => p.list(),
            Provider::Modules(p) => p.list(),
            Provider::OskSdl(p) => p.list(),
        }
    }
}

/// Unions the lists of an ordered set of providers into one archive's
/// worth of files.
pub struct Initramfs {
    features: Vec<Provider>,
}

impl Initramfs {
    pub fn new(features: Vec<Provider>) -> Self {
        Self { features }
    }

    pub fn list(&self) -> Result<FileList> {
        let files = FileList::new();
        for feature in &self.features {
            files.import(&feature.list()?);
        }
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_add_and_get() {
        let list = FileList::new();
        list.add("/bin/sh", "/bin/sh");
        assert_eq!(list.get("/bin/sh"), Some(PathBuf::from("/bin/sh")));
        assert_eq!(list.get("/bin/ash"), None);
    }

    #[test]
    fn test_add_same_source_last_dest_wins() {
        let list = FileList::new();
        list.add("/etc/foo", "/etc/foo");
        list.add("/etc/foo", "/somewhere/else");
        assert_eq!(list.get("/etc/foo"), Some(PathBuf::from("/somewhere/else")));
        assert_eq!(list.len(), 1);
    }

    #[test]
    fn test_import_overwrites_on_collision() {
        let a = FileList::new();
        a.add("/x", "/x");
        a.add("/y", "/y");

        let b = FileList::new();
        b.add("/x", "/renamed");
        b.add("/z", "/z");

        a.import(&b);
        assert_eq!(a.len(), 3);
        assert_eq!(a.get("/x"), Some(PathBuf::from("/renamed")));
        assert_eq!(a.get("/y"), Some(PathBuf::from("/y")));
        assert_eq!(a.get("/z"), Some(PathBuf::from("/z")));
    }
}
