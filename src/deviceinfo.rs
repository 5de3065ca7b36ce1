//! Typed view of the deviceinfo configuration file.
//!
//! deviceinfo is a shell-style `KEY="value"` file. Only the handful of
//! keys listed in the field table matter here; everything else a device
//! package ships is tolerated and ignored.

use std::fs;
use std::path::Path;

use anyhow::{bail, Context, Result};

/// Paths consulted for deviceinfo, in load order. Later files overlay
/// earlier ones.
pub const DEVICEINFO_PATHS: [&str; 2] = ["/usr/share/deviceinfo/deviceinfo", "/etc/deviceinfo"];

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub format_version: String,
    pub initfs_compression: String,
    pub initfs_extra_compression: String,
    pub modules_initfs: String,
    pub mesa_driver: String,
    pub uboot_boardname: String,
    pub generate_systemd_boot: bool,
    pub create_initfs_extra: bool,
}

type Setter = fn(&mut DeviceInfo, &str);

/// Field table keyed by canonical key name; coercion is explicit per
/// field.
const FIELDS: &[(&str, Setter)] = &[
    ("format_version", |d, v| d.format_version = v.to_string()),
    ("initfs_compression", |d, v| {
        d.initfs_compression = v.to_string()
    }),
    ("initfs_extra_compression", |d, v| {
        d.initfs_extra_compression = v.to_string()
    }),
    ("modules_initfs", |d, v| d.modules_initfs = v.to_string()),
    ("mesa_driver", |d, v| d.mesa_driver = v.to_string()),
    ("uboot_boardname", |d, v| d.uboot_boardname = v.to_string()),
    ("generate_systemd_boot", |d, v| {
        d.generate_systemd_boot = v == "true"
    }),
    ("create_initfs_extra", |d, v| {
        d.create_initfs_extra = v == "true"
    }),
];

impl DeviceInfo {
    /// Load deviceinfo from the standard locations. At least one of the
    /// files must exist; settings from later files overwrite earlier ones.
    pub fn load() -> Result<Self> {
        let mut devinfo = DeviceInfo::default();
        let mut found = false;
        for path in DEVICEINFO_PATHS {
            if Path::new(path).exists() {
                devinfo.read_deviceinfo(Path::new(path))?;
                found = true;
            }
        }
        if !found {
            bail!(
                "no deviceinfo file found, required by mkinitfs (tried: {})",
                DEVICEINFO_PATHS.join(", ")
            );
        }
        Ok(devinfo)
    }

    /// Merge the settings from `file` into self. Fields already set keep
    /// their value unless the file assigns them again.
    pub fn read_deviceinfo(&mut self, file: &Path) -> Result<()> {
        let contents = fs::read_to_string(file)
            .with_context(|| format!("unable to read deviceinfo {:?}", file))?;
        self.unmarshal(&contents)
            .with_context(|| format!("unable to parse deviceinfo {:?}", file))
    }

    fn unmarshal(&mut self, contents: &str) -> Result<()> {
        for line in contents.lines() {
            let line = line.trim();
            if line.starts_with('#') || !line.contains('=') {
                // comments, and lines that don't set anything
                continue;
            }

            // a comment may trail the assignment
            let line = line.split('#').next().unwrap_or_default().trim();

            // values may contain '=' (e.g. kernel cmdline)
            let Some((name, val)) = line.split_once('=') else {
                bail!("error parsing deviceinfo line, invalid format: {}", line);
            };
            let val = val.replace('"', "");

            if name == "deviceinfo_format_version" && val != "0" {
                bail!("deviceinfo format version {:?} is not supported", val);
            }

            let key = canonicalize_key(name);
            if key.is_empty() {
                bail!("error parsing deviceinfo line, invalid format: {}", line);
            }

            // keys that meet the deviceinfo spec but aren't ours fall through
            if let Some((_, set)) = FIELDS.iter().find(|(k, _)| *k == key) {
                set(self, &val);
            }
        }
        Ok(())
    }
}

/// Canonical field key for a deviceinfo name: the `deviceinfo` prefix and
/// empty segments drop out, so `deviceinfo_mesa_driver`, `mesa_driver` and
/// `mesa_driver___` all address the same field.
pub fn canonicalize_key(name: &str) -> String {
    name.split('_')
        .filter(|p| !p.is_empty() && *p != "deviceinfo")
        .collect::<Vec<_>>()
        .join("_")
}
