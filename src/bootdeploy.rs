//! Finalisation of boot files via the external boot-deploy program.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Command;

use anyhow::{bail, Context, Result};
use tracing::{info, warn};

use crate::deviceinfo::DeviceInfo;

/// Runs `boot-deploy` against the generated archives and a copy of the
/// kernel image:
///
/// ```text
/// boot-deploy -i initramfs-<kernver> -k <kernel> -v <kernver>
///             -d <workdir> -o <outdir> [initramfs-extra]
/// ```
pub struct BootDeploy<'a> {
    in_dir: &'a Path,
    out_dir: &'a Path,
    devinfo: &'a DeviceInfo,
    kern_ver: &'a str,
}

impl<'a> BootDeploy<'a> {
    pub fn new(
        in_dir: &'a Path,
        out_dir: &'a Path,
        devinfo: &'a DeviceInfo,
        kern_ver: &'a str,
    ) -> Self {
        Self {
            in_dir,
            out_dir,
            devinfo,
            kern_ver,
        }
    }

    pub fn run(&self) -> Result<()> {
        self.copy_uboot_files()?;

        let kernels = kernel_path(
            self.out_dir,
            self.kern_ver,
            self.devinfo.generate_systemd_boot,
        )?;

        // skip artifacts boot-deploy itself may have produced
        let kern_file = kernels
            .iter()
            .find(|f| {
                let s = f.to_string_lossy();
                !s.ends_with("-dtb") && !s.ends_with("-mtk")
            })
            .context("no usable kernel image found")?;

        let kern_filename = kern_file
            .file_name()
            .with_context(|| format!("kernel path has no file name: {:?}", kern_file))?;
        fs::copy(kern_file, self.in_dir.join(kern_filename))
            .with_context(|| format!("unable to copy kernel {:?}", kern_file))?;

        info!("== Using boot-deploy to finalize/install files ==");
        let mut cmd = Command::new("boot-deploy");
        cmd.arg("-i")
            .arg(format!("initramfs-{}", self.kern_ver))
            .arg("-k")
            .arg(kern_filename)
            .arg("-v")
            .arg(self.kern_ver)
            .arg("-d")
            .arg(self.in_dir)
            .arg("-o")
            .arg(self.out_dir);
        if self.devinfo.create_initfs_extra {
            cmd.arg("initramfs-extra");
        }

        let status = cmd.status().context("unable to run boot-deploy")?;
        if !status.success() {
            bail!("boot-deploy failed with {}", status);
        }
        Ok(())
    }

    /// Copy the board's u-boot files next to the archives; boot-deploy
    /// expects them in its input directory.
    fn copy_uboot_files(&self) -> Result<()> {
        if self.devinfo.uboot_boardname.is_empty() {
            return Ok(());
        }

        let src_dir = Path::new("/usr/share/u-boot").join(&self.devinfo.uboot_boardname);
        let entries = match fs::read_dir(&src_dir) {
            Ok(entries) => entries,
            Err(err) if err.kind() == io::ErrorKind::NotFound => {
                warn!("u-boot files copying skipped: {:?} not found", src_dir);
                return Ok(());
            }
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("unable to read u-boot dir {:?}", src_dir))
            }
        };

        for entry in entries {
            let entry =
                entry.with_context(|| format!("unable to read u-boot dir {:?}", src_dir))?;
            let source = entry.path();
            fs::copy(&source, self.in_dir.join(entry.file_name()))
                .with_context(|| format!("unable to copy u-boot file {:?}", source))?;
        }
        Ok(())
    }
}

/// Kernel image candidates in the output directory. With systemd-boot
/// zboot the `linux-<ver>.efi` image is preferred, falling back to
/// `vmlinuz-<ver>`.
fn kernel_path(out_dir: &Path, kern_ver: &str, zboot: bool) -> Result<Vec<PathBuf>> {
    if zboot {
        let efi = out_dir.join(format!("linux-{}.efi", kern_ver));
        let kernels = glob_paths(&efi);
        if !kernels.is_empty() {
            return Ok(kernels);
        }
        // else fall back to vmlinuz below
    }

    let vmlinuz = out_dir.join(format!("vmlinuz-{}", kern_ver));
    let kernels = glob_paths(&vmlinuz);
    if kernels.is_empty() {
        bail!(
            "unable to find any kernels at {:?} or {:?}",
            vmlinuz,
            out_dir.join(format!("linux-{}.efi", kern_ver))
        );
    }
    Ok(kernels)
}

fn glob_paths(pattern: &Path) -> Vec<PathBuf> {
    match glob::glob(&pattern.to_string_lossy()) {
        Ok(paths) => paths.flatten().collect(),
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_path_vmlinuz() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("vmlinuz-6.1.0"), "k").unwrap();

        let kernels = kernel_path(dir.path(), "6.1.0", false).unwrap();
        assert_eq!(kernels, vec![dir.path().join("vmlinuz-6.1.0")]);
    }

    #[test]
    fn test_kernel_path_zboot_prefers_efi() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("vmlinuz-6.1.0"), "k").unwrap();
        fs::write(dir.path().join("linux-6.1.0.efi"), "k").unwrap();

        let kernels = kernel_path(dir.path(), "6.1.0", true).unwrap();
        assert_eq!(kernels, vec![dir.path().join("linux-6.1.0.efi")]);
    }

    #[test]
    fn test_kernel_path_zboot_falls_back_to_vmlinuz() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("vmlinuz-6.1.0"), "k").unwrap();

        let kernels = kernel_path(dir.path(), "6.1.0", true).unwrap();
        assert_eq!(kernels, vec![dir.path().join("vmlinuz-6.1.0")]);
    }

    #[test]
    fn test_kernel_path_missing_names_both_candidates() {
        let dir = tempfile::tempdir().unwrap();
        let err = kernel_path(dir.path(), "6.1.0", false).unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("vmlinuz-6.1.0"));
        assert!(msg.contains("linux-6.1.0.efi"));
    }
}
