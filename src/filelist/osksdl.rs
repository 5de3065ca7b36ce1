//! Files needed to unlock full-disk encryption at boot: osk-sdl and its
//! configuration, touch/input plugins, and optional mesa acceleration.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use tracing::info;
use walkdir::WalkDir;

use super::{getfiles, FileList};

pub struct OskSdl {
    mesa_driver: String,
}

impl OskSdl {
    pub fn new(mesa_driver: impl Into<String>) -> Self {
        Self {
            mesa_driver: mesa_driver.into(),
        }
    }

    /// The whole rootfs-FDE bundle. Returns empty when osk-sdl isn't
    /// installed.
    pub fn list(&self) -> Result<FileList> {
        let files = FileList::new();

        if !Path::new("/usr/bin/osk-sdl").exists() {
            return Ok(files);
        }
        info!("- Including osk-sdl support");

        let conf_files = to_strings(&[
            "/etc/osk.conf",
            "/etc/ts.conf",
            "/etc/pointercal",
            "/etc/fb.modes",
            "/etc/directfbrc",
        ]);
        // not all of these exist on every device (e.g. pointercal)
        for file in getfiles::get_files(&conf_files, false)
            .context("failed to add osk-sdl config files")?
        {
            files.add(&file, &file);
        }

        let osk_files = to_strings(&[
            "/usr/bin/osk-sdl",
            "/sbin/cryptsetup",
            "/usr/lib/libGL.so.1",
        ]);
        for file in getfiles::get_files(&osk_files, true)
            .context("failed to add osk-sdl binaries")?
        {
            files.add(&file, &file);
        }

        let font = osk_conf_font_path(Path::new("/etc/osk.conf"))
            .context("failed to add osk-sdl keyboard font")?;
        files.add(&font, &font);

        // directfb video/input plugins
        let mut dfb_files = Vec::new();
        if let Ok(dirs) = glob::glob("/usr/lib/directfb-*") {
            for dir in dirs.flatten() {
                collect_plugins(&dir, &mut dfb_files);
            }
        }
        for file in getfiles::get_files(&dfb_files, true)
            .context("failed to add directfb plugins")?
        {
            files.add(&file, &file);
        }

        // tslib plugins
        let mut tslib_files = Vec::new();
        collect_plugins(Path::new("/usr/lib/ts"), &mut tslib_files);
        if let Ok(paths) = glob::glob("/usr/lib/libts*") {
            for path in paths.flatten() {
                tslib_files.push(path.to_string_lossy().into_owned());
            }
        }
        for file in getfiles::get_files(&tslib_files, true)
            .context("failed to add tslib files")?
        {
            files.add(&file, &file);
        }

        // mesa hw acceleration
        if !self.mesa_driver.is_empty() {
            let mesa_files = vec![
                "/usr/lib/libEGL.so.1".to_string(),
                "/usr/lib/libGLESv2.so.2".to_string(),
                "/usr/lib/libgbm.so.1".to_string(),
                "/usr/lib/libudev.so.1".to_string(),
                format!("/usr/lib/xorg/modules/dri/{}_dri.so", self.mesa_driver),
            ];
            for file in getfiles::get_files(&mesa_files, true)
                .context("failed to add mesa driver files")?
            {
                files.add(&file, &file);
            }
        }

        Ok(files)
    }
}

/// Collect every `*.so` under `dir`, tolerating a missing directory.
fn collect_plugins(dir: &Path, out: &mut Vec<String>) {
    for entry in WalkDir::new(dir).into_iter().filter_map(Result::ok) {
        let path = entry.path();
        if path.extension().and_then(|e| e.to_str()) == Some("so") {
            out.push(path.to_string_lossy().into_owned());
        }
    }
}

/// The `keyboard-font = <path>` setting from osk.conf. The font must
/// exist, it's drawn before the rootfs is unlocked.
fn osk_conf_font_path(osk_conf: &Path) -> Result<PathBuf> {
    let contents = fs::read_to_string(osk_conf)
        .with_context(|| format!("unable to open {:?}", osk_conf))?;

    let mut path = PathBuf::new();
    for line in contents.lines() {
        let fields: Vec<&str> = line.split_whitespace().collect();
        // "keyboard-font = <path>" is 3 fields
        if fields.len() > 2 && fields[0] == "keyboard-font" {
            path = PathBuf::from(fields[2]);
        }
    }
    if !path.exists() {
        bail!("unable to find font: {:?}", path);
    }
    Ok(path)
}

fn to_strings(list: &[&str]) -> Vec<String> {
    list.iter().map(|s| s.to_string()).collect()
}
