//! Shared test utilities for mkinitfs tests.

use std::fs;
use std::path::{Path, PathBuf};

use tempfile::TempDir;

/// Test environment rooted in a temporary directory.
pub struct TestEnv {
    /// Temporary directory (kept alive for the lifetime of TestEnv)
    pub _temp_dir: TempDir,
    pub root: PathBuf,
}

impl TestEnv {
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let root = temp_dir.path().to_path_buf();
        Self {
            _temp_dir: temp_dir,
            root,
        }
    }

    pub fn path(&self, rel: &str) -> PathBuf {
        self.root.join(rel)
    }
}

/// Write a file, creating parent directories as needed.
pub fn write_file(path: &Path, content: &str) {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("Failed to create parent dir");
    }
    fs::write(path, content).expect("Failed to write file");
}

/// Walk a cpio newc byte stream and return `(name, mode, content)` for
/// every entry before the trailer.
pub fn read_cpio_entries(data: Vec<u8>) -> Vec<(String, u32, Vec<u8>)> {
    use std::io::Read;

    let mut cursor = std::io::Cursor::new(data);
    let mut entries = Vec::new();
    loop {
        let mut reader = cpio::NewcReader::new(cursor).expect("failed to read cpio entry");
        if reader.entry().is_trailer() {
            break;
        }
        let name = reader.entry().name().to_string();
        let mode = reader.entry().mode();
        let size = reader.entry().file_size() as usize;

        let mut content = vec![0u8; size];
        reader
            .read_exact(&mut content)
            .expect("failed to read entry content");

        entries.push((name, mode, content));
        cursor = reader.finish().expect("failed to finish entry");
    }
    entries
}

/// Assert that entry names are strictly ascending (sorted, no duplicates).
pub fn assert_sorted_unique(entries: &[(String, u32, Vec<u8>)]) {
    for pair in entries.windows(2) {
        assert!(
            pair[0].0 < pair[1].0,
            "entries out of order or duplicated: {:?} then {:?}",
            pair[0].0,
            pair[1].0
        );
    }
}

/// File type bits of a cpio mode.
pub fn file_type(mode: u32) -> u32 {
    mode & 0o170000
}
