//! Integration tests for the file collection providers and the selector
//! expansion engine.

mod helpers;

use std::path::PathBuf;

use helpers::{write_file, TestEnv};
use mkinitfs::filelist::getfiles;
use mkinitfs::filelist::hookdirs::HookDirs;
use mkinitfs::filelist::hookfiles::HookFiles;
use mkinitfs::filelist::hookscripts::HookScripts;

#[test]
fn test_hookdirs_lists_directories() {
    let env = TestEnv::new();
    let hooks = env.path("dirs");
    write_file(&hooks.join("00-base"), "/run\n/var/lock\n");
    write_file(&hooks.join("10-extra"), "/mnt\n");

    let list = HookDirs::new(&hooks).list().unwrap();
    assert_eq!(list.len(), 3);
    for dir in ["/run", "/var/lock", "/mnt"] {
        assert_eq!(list.get(dir), Some(PathBuf::from(dir)));
    }
}

#[test]
fn test_hookdirs_missing_dir_is_empty() {
    let env = TestEnv::new();
    let list = HookDirs::new(env.path("no-such-dir")).list().unwrap();
    assert!(list.is_empty());
}

#[test]
fn test_hookscripts_maps_into_dest_dir() {
    let env = TestEnv::new();
    let scripts = env.path("hooks");
    write_file(&scripts.join("10-resize.sh"), "#!/bin/sh\n");
    write_file(&scripts.join("20-debug.sh"), "#!/bin/sh\n");

    let list = HookScripts::new(&scripts, "/hooks").list().unwrap();
    assert_eq!(list.len(), 2);
    assert_eq!(
        list.get(scripts.join("10-resize.sh")),
        Some(PathBuf::from("/hooks/10-resize.sh"))
    );
    assert_eq!(
        list.get(scripts.join("20-debug.sh")),
        Some(PathBuf::from("/hooks/20-debug.sh"))
    );
}

#[test]
fn test_hookscripts_missing_dir_is_empty() {
    let env = TestEnv::new();
    let list = HookScripts::new(env.path("absent"), "/hooks").list().unwrap();
    assert!(list.is_empty());
}

#[test]
fn test_hookfiles_expands_lines() {
    let env = TestEnv::new();
    let data = env.path("data");
    write_file(&data.join("one.conf"), "1");
    write_file(&data.join("two.conf"), "2");
    write_file(&data.join("renamed.bin"), "3");

    let hookdir = env.path("files");
    write_file(
        &hookdir.join("glob-hook"),
        &format!("{}/*.conf\n", data.display()),
    );
    write_file(
        &hookdir.join("rename-hook"),
        &format!("{}:/target/renamed.bin\n", data.join("renamed.bin").display()),
    );

    let list = HookFiles::new(&hookdir).list().unwrap();
    assert_eq!(list.len(), 3);
    let one = data.join("one.conf");
    assert_eq!(list.get(&one), Some(one.clone()));
    assert_eq!(
        list.get(data.join("renamed.bin")),
        Some(PathBuf::from("/target/renamed.bin"))
    );
}

#[test]
fn test_hookfiles_missing_listed_file_is_fatal() {
    let env = TestEnv::new();
    let hookdir = env.path("files");
    write_file(&hookdir.join("bad-hook"), "/absolutely/not/here\n");

    let err = HookFiles::new(&hookdir).list().unwrap_err();
    let msg = format!("{:#}", err);
    assert!(msg.contains("bad-hook"), "message was: {}", msg);
    assert!(msg.contains("failed to stat file"), "message was: {}", msg);
}

#[test]
fn test_hookfiles_missing_dir_is_empty() {
    let env = TestEnv::new();
    let list = HookFiles::new(env.path("files")).list().unwrap();
    assert!(list.is_empty());
}

#[test]
fn test_get_file_directory_yields_descendants() {
    let env = TestEnv::new();
    let tree = env.path("tree");
    write_file(&tree.join("a.txt"), "a");
    write_file(&tree.join("sub/b.txt"), "b");

    let files = getfiles::get_file(&tree.to_string_lossy(), true).unwrap();
    assert_eq!(files.len(), 2);
    assert!(files.contains(&tree.join("a.txt")));
    assert!(files.contains(&tree.join("sub/b.txt")));
}

#[test]
fn test_get_file_glob_deduplicates() {
    let env = TestEnv::new();
    let dir = env.path("d");
    write_file(&dir.join("x.conf"), "x");

    // both selectors resolve to the same file
    let files = getfiles::get_files(
        &[
            format!("{}/*.conf", dir.display()),
            dir.join("x.conf").display().to_string(),
        ],
        true,
    )
    .unwrap();
    assert_eq!(files, vec![dir.join("x.conf")]);
}

#[test]
fn test_get_file_optional_missing_is_empty() {
    let files = getfiles::get_file("/missing/optional/file", false).unwrap();
    assert!(files.is_empty());
}

#[test]
fn test_get_file_required_missing_is_error() {
    let err = getfiles::get_file("/missing/required/file", true).unwrap_err();
    assert!(format!("{:#}", err).contains("failed to stat file"));
}

#[test]
fn test_get_file_zst_fallback() {
    let env = TestEnv::new();
    let fw = env.path("firmware/chip.bin.zst");
    write_file(&fw, "compressed");

    // the plain path is absent, the .zst sibling stands in for it
    let plain = env.path("firmware/chip.bin");
    let files = getfiles::get_file(&plain.to_string_lossy(), true).unwrap();
    assert_eq!(files, vec![fw]);
}
