//! Linux mount utility
//!
//! Uses host tools and sysfs:
//! - `mount`/`umount` and `/proc/self/mounts`
//! - `blkid`, `mkfs.<fs>` and `fsck` for format-if-needed
//! - `resize2fs`, `xfs_growfs` and `btrfs` for online growth
//! - `blockdev`, `dumpe2fs` and `xfs_io` for sizes
//! - `/sys/class/scsi_host` and `/sys/bus/scsi` for rescans and slot lookup

use crate::domain::ports::{FsGeometry, FsStats, MountPoint, MountUtil};
use crate::error::{Error, Result};
use async_trait::async_trait;
use std::io;
use std::os::unix::fs::{FileTypeExt, MetadataExt};
use std::path::{Path, PathBuf};
use tokio::process::Command;
use tracing::{debug, error, info, warn};

const PROC_MOUNTS: &str = "/proc/self/mounts";
const DEFAULT_SYS_ROOT: &str = "/sys";
const DEFAULT_DEV_ROOT: &str = "/dev";
/// Stable per-slot links created by the cloud image's udev rules, under the dev root
const AZURE_LUN_LINK_DIR: &str = "disk/azure/scsi1";
/// Links to the OS and resource disks, which also report the cloud vendor
const AZURE_SYSTEM_DISK_LINKS: [&str; 2] = ["disk/azure/root", "disk/azure/resource"];

/// `blkid` exit status when no filesystem signature was found
const BLKID_NOTHING_FOUND: i32 = 2;

// =============================================================================
// Mount Table Parsing
// =============================================================================

/// Undo the octal escapes the kernel applies to mount table fields
fn unescape_octal(field: &str) -> String {
    let bytes = field.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'\\' && i + 4 <= bytes.len() {
            let digits = &bytes[i + 1..i + 4];
            let parsed = std::str::from_utf8(digits)
                .ok()
                .and_then(|d| u8::from_str_radix(d, 8).ok());
            if let Some(value) = parsed {
                out.push(value);
                i += 4;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Parse `/proc/self/mounts` content
///
/// Format: `<device> <mountpoint> <fstype> <options> <dump> <pass>`
pub fn parse_mounts(contents: &str) -> Vec<MountPoint> {
    contents
        .lines()
        .filter_map(|line| {
            let mut fields = line.split_whitespace();
            let device = fields.next()?;
            let path = fields.next()?;
            let fs_type = fields.next()?;
            let options = fields.next().unwrap_or_default();
            Some(MountPoint {
                device: unescape_octal(device),
                path: unescape_octal(path),
                fs_type: fs_type.to_string(),
                options: options.split(',').map(str::to_string).collect(),
            })
        })
        .collect()
}

fn parse_blkid_export(output: &str) -> Option<String> {
    output
        .lines()
        .find_map(|line| line.strip_prefix("TYPE="))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

fn parse_dumpe2fs(output: &str) -> Option<FsGeometry> {
    let field = |name: &str| {
        output.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            (key.trim() == name).then(|| value.trim().parse::<u64>().ok())?
        })
    };
    Some(FsGeometry {
        block_size: field("Block size")?,
        block_count: field("Block count")?,
    })
}

fn parse_xfs_statfs(output: &str) -> Option<FsGeometry> {
    let field = |name: &str| {
        output.lines().find_map(|line| {
            let (key, value) = line.split_once('=')?;
            (key.trim() == name).then(|| value.trim().parse::<u64>().ok())?
        })
    };
    Some(FsGeometry {
        block_size: field("geom.bsize")?,
        block_count: field("geom.datablocks")?,
    })
}

fn mkfs_args(fs_type: &str, device: &str) -> Vec<String> {
    let mut args: Vec<String> = match fs_type {
        "ext2" | "ext3" | "ext4" => vec!["-F".into(), "-m0".into()],
        "xfs" | "btrfs" => vec!["-f".into()],
        _ => Vec::new(),
    };
    args.push(device.to_string());
    args
}

// =============================================================================
// System Mounter
// =============================================================================

/// Mount utility backed by the host's tools
#[derive(Debug, Clone)]
pub struct SystemMounter {
    sys_root: PathBuf,
    dev_root: PathBuf,
}

impl Default for SystemMounter {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemMounter {
    pub fn new() -> Self {
        Self::with_roots(DEFAULT_SYS_ROOT, DEFAULT_DEV_ROOT)
    }

    /// Mounter reading sysfs and device links below the given roots
    pub fn with_roots(sys_root: impl Into<PathBuf>, dev_root: impl Into<PathBuf>) -> Self {
        Self {
            sys_root: sys_root.into(),
            dev_root: dev_root.into(),
        }
    }

    /// Whole-disk name for a block name; partitions resolve to their parent
    async fn parent_disk(&self, name: &str) -> String {
        let class = self.sys_root.join("class/block").join(name);
        if tokio::fs::metadata(class.join("partition")).await.is_err() {
            return name.to_string();
        }
        // /sys/class/block/sdc1 -> .../block/sdc/sdc1
        tokio::fs::canonicalize(&class)
            .await
            .ok()
            .and_then(|resolved| {
                resolved
                    .parent()
                    .and_then(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
            })
            .unwrap_or_else(|| name.to_string())
    }

    /// Disk names behind the OS and resource disk links
    async fn system_disks(&self) -> Vec<String> {
        let mut disks = Vec::new();
        for link in AZURE_SYSTEM_DISK_LINKS {
            let Ok(resolved) = tokio::fs::canonicalize(self.dev_root.join(link)).await else {
                continue;
            };
            if let Some(name) = resolved.file_name() {
                disks.push(self.parent_disk(&name.to_string_lossy()).await);
            }
        }
        disks
    }

    /// Run `program` and return its stdout; non-zero exit is an error
    async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        debug!("Running {} {:?}", program, args);
        let output = Command::new(program)
            .args(args)
            .output()
            .await
            .map_err(|e| Error::Command {
                command: program.to_string(),
                reason: e.to_string(),
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(Error::Command {
                command: format!("{} {}", program, args.join(" ")),
                reason: format!("{} ({})", stderr.trim(), output.status),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Filesystem signature on `device`, `None` if it is blank
    async fn existing_format(&self, device: &str) -> Result<Option<String>> {
        let output = Command::new("blkid")
            .args(["-p", "-s", "TYPE", "-s", "PTTYPE", "-o", "export", device])
            .output()
            .await
            .map_err(|e| Error::Command {
                command: "blkid".into(),
                reason: e.to_string(),
            })?;

        if output.status.code() == Some(BLKID_NOTHING_FOUND) {
            return Ok(None);
        }
        if !output.status.success() {
            return Err(Error::Command {
                command: format!("blkid {}", device),
                reason: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        if stdout.lines().any(|l| l.starts_with("PTTYPE=")) && parse_blkid_export(&stdout).is_none() {
            return Err(Error::Command {
                command: format!("blkid {}", device),
                reason: "device carries a partition table but no filesystem".into(),
            });
        }
        Ok(parse_blkid_export(&stdout))
    }

    async fn fsck(&self, device: &str) {
        // Exit codes below 4 mean clean or corrected
        match Command::new("fsck").args(["-a", device]).output().await {
            Ok(out) if out.status.code().is_some_and(|c| c >= 4) => warn!(
                "fsck on {} reported uncorrected errors: {}",
                device,
                String::from_utf8_lossy(&out.stderr).trim()
            ),
            Ok(_) => {}
            Err(e) => warn!("fsck on {} could not run: {}", device, e),
        }
    }
}

async fn write_sysfs(path: &Path, value: &str) -> io::Result<()> {
    tokio::fs::write(path, value).await
}

/// Expand a sysfs glob off the runtime threads
async fn glob_paths(pattern: String) -> Result<Vec<PathBuf>> {
    tokio::task::spawn_blocking(move || -> Result<Vec<PathBuf>> {
        let entries = glob::glob(&pattern)
            .map_err(|e| Error::Internal(format!("invalid glob {}: {}", pattern, e)))?;
        Ok(entries.filter_map(|entry| entry.ok()).collect())
    })
    .await
    .map_err(|e| Error::Internal(format!("glob task failed: {}", e)))?
}

/// Block device name under a SCSI device directory, e.g. `sdc`
async fn block_name(scsi_dev: &Path) -> Option<String> {
    let mut entries = tokio::fs::read_dir(scsi_dev.join("block")).await.ok()?;
    let entry = entries.next_entry().await.ok()??;
    Some(entry.file_name().to_string_lossy().into_owned())
}

async fn is_cloud_disk(scsi_dev: &Path) -> bool {
    let vendor = tokio::fs::read_to_string(scsi_dev.join("vendor"))
        .await
        .unwrap_or_default();
    vendor.trim().eq_ignore_ascii_case("msft")
}

#[async_trait]
impl MountUtil for SystemMounter {
    async fn is_mount_point(&self, path: &str) -> io::Result<bool> {
        let meta = tokio::fs::symlink_metadata(path).await?;
        let parent = Path::new(path).parent().unwrap_or_else(|| Path::new("/"));
        let parent_meta = tokio::fs::metadata(parent).await?;
        // A mount boundary changes the device; `/` is its own parent
        Ok(meta.dev() != parent_meta.dev() || meta.ino() == parent_meta.ino())
    }

    async fn list_mounts(&self) -> Result<Vec<MountPoint>> {
        let contents = tokio::fs::read_to_string(PROC_MOUNTS).await?;
        Ok(parse_mounts(&contents))
    }

    async fn mount(&self, device: &str, target: &str, fs_type: &str, options: &[String]) -> Result<()> {
        let joined = options.join(",");
        let mut args: Vec<&str> = Vec::new();
        if !fs_type.is_empty() {
            args.extend(["-t", fs_type]);
        }
        if !joined.is_empty() {
            args.extend(["-o", joined.as_str()]);
        }
        args.extend([device, target]);

        self.run("mount", &args).await.map_err(|e| Error::MountFailed {
            target: target.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn unmount(&self, target: &str) -> Result<()> {
        self.run("umount", &[target]).await.map_err(|e| Error::UnmountFailed {
            target: target.to_string(),
            reason: e.to_string(),
        })?;
        Ok(())
    }

    async fn format_and_mount(
        &self,
        device: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> Result<()> {
        let mut options = options.to_vec();
        options.push("defaults".to_string());

        let mount_fs = match self.existing_format(device).await? {
            None => {
                info!("Disk {} appears unformatted, formatting as {}", device, fs_type);
                let mkfs = format!("mkfs.{}", fs_type);
                let args = mkfs_args(fs_type, device);
                let args: Vec<&str> = args.iter().map(String::as_str).collect();
                self.run(&mkfs, &args).await.map_err(|e| {
                    error!("Format of {} failed: {}", device, e);
                    e
                })?;
                info!("Disk {} formatted as {}", device, fs_type);
                fs_type.to_string()
            }
            Some(existing) => {
                if existing.starts_with("ext") {
                    self.fsck(device).await;
                }
                if existing != fs_type {
                    warn!("Disk {} has {} filesystem, requested {}", device, existing, fs_type);
                }
                existing
            }
        };

        self.mount(device, target, &mount_fs, &options).await
    }

    async fn resize_filesystem(&self, device: &str, mount_path: &str) -> Result<()> {
        let fs_type = self.existing_format(device).await?.ok_or_else(|| Error::Command {
            command: "blkid".into(),
            reason: format!("no filesystem found on {}", device),
        })?;

        info!("Resizing {} filesystem on {}", fs_type, device);
        match fs_type.as_str() {
            "ext2" | "ext3" | "ext4" => self.run("resize2fs", &[device]).await?,
            "xfs" => self.run("xfs_growfs", &["-d", mount_path]).await?,
            "btrfs" => self.run("btrfs", &["filesystem", "resize", "max", mount_path]).await?,
            other => {
                return Err(Error::Command {
                    command: "resize".into(),
                    reason: format!("resize of {} filesystems is not supported", other),
                })
            }
        };
        Ok(())
    }

    async fn block_size_bytes(&self, path: &str) -> Result<u64> {
        let out = self.run("blockdev", &["--getsize64", path]).await?;
        out.trim().parse().map_err(|_| Error::Command {
            command: "blockdev --getsize64".into(),
            reason: format!("unexpected output {:?}", out.trim()),
        })
    }

    async fn filesystem_geometry(&self, device: &str, mount_path: &str) -> Result<FsGeometry> {
        let fs_type = self.existing_format(device).await?.unwrap_or_default();
        let (command, parsed) = match fs_type.as_str() {
            "ext2" | "ext3" | "ext4" => {
                let out = self.run("dumpe2fs", &["-h", device]).await?;
                ("dumpe2fs", parse_dumpe2fs(&out))
            }
            "xfs" => {
                let out = self.run("xfs_io", &["-c", "statfs", mount_path]).await?;
                ("xfs_io", parse_xfs_statfs(&out))
            }
            other => {
                return Err(Error::Command {
                    command: "geometry".into(),
                    reason: format!("cannot read geometry of {:?} filesystem", other),
                })
            }
        };
        parsed.ok_or_else(|| Error::Command {
            command: command.into(),
            reason: format!("could not parse geometry of {}", device),
        })
    }

    async fn fs_stats(&self, path: &str) -> Result<FsStats> {
        let stat = nix::sys::statvfs::statvfs(path)
            .map_err(|e| Error::Internal(format!("statvfs {}: {}", path, e)))?;
        let fragment = stat.fragment_size() as u64;
        let blocks = stat.blocks() as u64;
        let blocks_free = stat.blocks_free() as u64;
        let files = stat.files() as u64;
        let files_free = stat.files_free() as u64;
        Ok(FsStats {
            bytes_available: stat.blocks_available() as u64 * fragment,
            bytes_total: blocks * fragment,
            bytes_used: blocks.saturating_sub(blocks_free) * fragment,
            inodes_free: files_free,
            inodes_total: files,
            inodes_used: files.saturating_sub(files_free),
        })
    }

    async fn path_is_device(&self, path: &str) -> io::Result<bool> {
        let meta = tokio::fs::metadata(path).await?;
        Ok(meta.file_type().is_block_device())
    }

    async fn rescan_bus(&self) -> Result<()> {
        let pattern = self.sys_root.join("class/scsi_host/host*/scan");
        for scan in glob_paths(pattern.to_string_lossy().into_owned()).await? {
            if let Err(e) = write_sysfs(&scan, "- - -").await {
                warn!("Rescan via {} failed: {}", scan.display(), e);
            }
        }
        Ok(())
    }

    async fn rescan_all_devices(&self) -> Result<()> {
        let pattern = self.sys_root.join("bus/scsi/drivers/sd/*/rescan");
        for rescan in glob_paths(pattern.to_string_lossy().into_owned()).await? {
            write_sysfs(&rescan, "1").await?;
        }
        Ok(())
    }

    async fn rescan_device(&self, device: &str) -> Result<()> {
        let resolved = tokio::fs::canonicalize(device).await?;
        let name = resolved
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::Internal(format!("cannot derive block name from {}", device)))?;
        let disk = self.parent_disk(&name).await;
        let rescan = self.sys_root.join("block").join(disk).join("device/rescan");
        write_sysfs(&rescan, "1").await?;
        Ok(())
    }

    async fn find_disk_by_slot(&self, slot: u32) -> Result<Option<String>> {
        let link = self.dev_root.join(AZURE_LUN_LINK_DIR).join(format!("lun{}", slot));
        if let Ok(resolved) = tokio::fs::canonicalize(&link).await {
            return Ok(Some(resolved.to_string_lossy().into_owned()));
        }

        let system_disks = self.system_disks().await;
        let pattern = self.sys_root.join(format!("bus/scsi/devices/*:*:*:{}", slot));
        for scsi_dev in glob_paths(pattern.to_string_lossy().into_owned()).await? {
            if !is_cloud_disk(&scsi_dev).await {
                continue;
            }
            let Some(name) = block_name(&scsi_dev).await else {
                continue;
            };
            if system_disks.contains(&name) {
                debug!("Skipping system disk {} at {}", name, scsi_dev.display());
                continue;
            }
            return Ok(Some(self.dev_root.join(name).to_string_lossy().into_owned()));
        }
        Ok(None)
    }
}
