use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{info, warn};

use mkinitfs::archive::{self, Archive};
use mkinitfs::bootdeploy::BootDeploy;
use mkinitfs::deviceinfo::DeviceInfo;
use mkinitfs::filelist::hookdirs::HookDirs;
use mkinitfs::filelist::hookfiles::HookFiles;
use mkinitfs::filelist::hookscripts::HookScripts;
use mkinitfs::filelist::modules::Modules;
use mkinitfs::filelist::osksdl::OskSdl;
use mkinitfs::filelist::{FileList, Initramfs, Provider};
use mkinitfs::osutil;

#[derive(Parser)]
#[command(name = "mkinitfs", version, about = "Generate initramfs archives for boot")]
struct Cli {
    /// Directory to output initfs(-extra) and other boot files
    #[arg(short = 'd', value_name = "DIR", default_value = "/boot")]
    out_dir: PathBuf,

    /// Skip running boot-deploy after generating the archives
    #[arg(long)]
    no_bootdeploy: bool,
}

/// Directories every initramfs carries regardless of what the providers
/// contribute.
const REQUIRED_DIRS: &[&str] = &[
    "/bin", "/sbin", "/usr/bin", "/usr/sbin", "/proc", "/sys", "/dev", "/tmp", "/lib",
    "/boot", "/sysroot", "/etc",
];

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();
    let start = Instant::now();

    let devinfo = DeviceInfo::load()?;
    let kern_ver = osutil::kernel_version()?;

    let work_dir = tempfile::Builder::new()
        .prefix("mkinitfs")
        .tempdir()
        .context("unable to create temporary work directory")?;

    info!("Generating for kernel version: {}", kern_ver);
    info!("Output directory: {}", cli.out_dir.display());

    let initfs_list = initfs_features(&devinfo)
        .list()
        .context("unable to collect initramfs files")?;
    generate_initfs(
        &format!("initramfs-{}", kern_ver),
        work_dir.path(),
        &devinfo,
        &initfs_list,
    )?;

    if devinfo.create_initfs_extra {
        let extra_list = initfs_extra_features(&devinfo)
            .list()
            .context("unable to collect initramfs-extra files")?;
        generate_initfs_extra(
            "initramfs-extra",
            work_dir.path(),
            &devinfo,
            &extra_list,
            &initfs_list,
        )?;
    }

    if cli.no_bootdeploy {
        info!("Skipping boot-deploy");
    } else {
        BootDeploy::new(work_dir.path(), &cli.out_dir, &devinfo, &kern_ver).run()?;
    }

    info!("mkinitfs completed in: {:.2?}", start.elapsed());
    Ok(())
}

/// Feature providers for the main initramfs archive, in import order.
fn initfs_features(devinfo: &DeviceInfo) -> Initramfs {
    let modules_initfs: Vec<String> = devinfo
        .modules_initfs
        .split_whitespace()
        .map(str::to_string)
        .collect();

    Initramfs::new(vec![
        Provider::HookDirs(HookDirs::new("/usr/share/mkinitfs/dirs")),
        Provider::HookDirs(HookDirs::new("/etc/mkinitfs/dirs")),
        Provider::HookFiles(HookFiles::new("/usr/share/mkinitfs/files")),
        Provider::HookFiles(HookFiles::new("/etc/mkinitfs/files")),
        Provider::HookScripts(HookScripts::new("/usr/share/mkinitfs/hooks", "/hooks")),
        Provider::HookScripts(HookScripts::new("/etc/mkinitfs/hooks", "/hooks")),
        Provider::HookScripts(HookScripts::new(
            "/usr/share/mkinitfs/hooks-cleanup",
            "/hooks-cleanup",
        )),
        Provider::HookScripts(HookScripts::new(
            "/etc/mkinitfs/hooks-cleanup",
            "/hooks-cleanup",
        )),
        Provider::Modules(Modules::new(modules_initfs, "/usr/share/mkinitfs/modules")),
        Provider::Modules(Modules::new(Vec::new(), "/etc/mkinitfs/modules")),
    ])
}

/// Feature providers for the initramfs-extra archive.
fn initfs_extra_features(devinfo: &DeviceInfo) -> Initramfs {
    Initramfs::new(vec![
        Provider::HookFiles(HookFiles::new("/usr/share/mkinitfs/files-extra")),
        Provider::HookFiles(HookFiles::new("/etc/mkinitfs/files-extra")),
        Provider::HookScripts(HookScripts::new(
            "/usr/share/mkinitfs/hooks-extra",
            "/hooks-extra",
        )),
        Provider::HookScripts(HookScripts::new("/etc/mkinitfs/hooks-extra", "/hooks-extra")),
        Provider::Modules(Modules::new(Vec::new(), "/usr/share/mkinitfs/modules-extra")),
        Provider::Modules(Modules::new(Vec::new(), "/etc/mkinitfs/modules-extra")),
        Provider::OskSdl(OskSdl::new(devinfo.mesa_driver.clone())),
    ])
}

fn generate_initfs(
    name: &str,
    path: &Path,
    devinfo: &DeviceInfo,
    files: &FileList,
) -> Result<()> {
    info!("== Generating {} ==", name);
    let (format, level) = archive::extract_format_level(&devinfo.initfs_compression);
    let mut archive = Archive::new(format, level);

    for dir in REQUIRED_DIRS {
        archive.add_item(Path::new(dir), Path::new(dir))?;
    }

    archive.add_items(files)?;

    // /init is the kernel's entry point into the archive
    let init_script = Path::new("/usr/share/mkinitfs/init.sh");
    if init_script.exists() {
        archive.add_item(init_script, Path::new("/init"))?;
    } else {
        warn!("init script not found: {}", init_script.display());
    }

    // splash images are expected at /<file>
    info!("- Including splash images");
    if let Ok(paths) = glob::glob("/usr/share/splashes/*.ppm.gz") {
        for file in paths.flatten() {
            if let Some(name) = file.file_name() {
                archive.add_item(&file, &Path::new("/").join(name))?;
            }
        }
    }

    archive.add_item(
        Path::new("/usr/share/mkinitfs/init_functions.sh"),
        Path::new("/init_functions.sh"),
    )?;

    info!("- Writing and verifying initramfs archive");
    archive.write(&path.join(name), 0o644)?;
    Ok(())
}

fn generate_initfs_extra(
    name: &str,
    path: &Path,
    devinfo: &DeviceInfo,
    files: &FileList,
    exclude: &FileList,
) -> Result<()> {
    info!("== Generating {} ==", name);
    let (format, level) = archive::extract_format_level(&devinfo.initfs_extra_compression);
    let mut archive = Archive::new(format, level);

    // anything the main archive already carries stays out of the extra one
    archive.add_items_exclude(files, exclude)?;

    info!("- Writing and verifying initramfs-extra archive");
    archive.write(&path.join(name), 0o644)?;
    Ok(())
}
