//! In-memory mount utility and device tuner for tests
//!
//! The mount table and device inventory live in memory; path existence is
//! taken from the real filesystem so tests can use temporary directories.

use crate::domain::ports::{DeviceTuner, FsGeometry, FsStats, MountPoint, MountUtil};
use crate::error::{Error, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::path::Path;
use std::time::Duration;
use tokio::time::Instant;

struct MountEntry {
    point: MountPoint,
    /// Visible to the mount probe, not only to the mount list
    probed: bool,
}

#[derive(Default)]
struct State {
    mounts: Vec<MountEntry>,
    devices: HashMap<u32, (String, Instant)>,
    formatted: HashMap<String, String>,
    block_devices: HashSet<String>,
    probe_failures: HashSet<String>,
    block_sizes: HashMap<String, u64>,
    geometry: HashMap<String, FsGeometry>,
    fs_stats: HashMap<String, FsStats>,
    last_mount_options: Vec<String>,
    format_error: Option<String>,
    resize_error: Option<String>,
    bus_rescan_fails: bool,
    format_calls: usize,
    mount_calls: usize,
    unmount_calls: usize,
    resize_calls: usize,
    bus_rescans: usize,
    all_device_rescans: usize,
    device_rescans: Vec<String>,
}

/// Recording mount utility
#[derive(Default)]
pub struct FakeMounter {
    state: Mutex<State>,
}

impl FakeMounter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Device `device` is present on `slot` from now on
    pub fn attach(&self, slot: u32, device: &str) {
        self.attach_after(slot, device, Duration::ZERO);
    }

    /// Device `device` shows up on `slot` after `delay`
    pub fn attach_after(&self, slot: u32, device: &str, delay: Duration) {
        self.state
            .lock()
            .devices
            .insert(slot, (device.to_string(), Instant::now() + delay));
    }

    pub fn insert_mount(&self, device: &str, target: &str) {
        self.push_mount(device, target, "", &[], true);
    }

    /// Entry only the mount list reports, like a bind mount the probe misses
    pub fn insert_listed_only(&self, target: &str) {
        self.push_mount("tmpfs", target, "", &[], false);
    }

    fn push_mount(&self, device: &str, target: &str, fs_type: &str, options: &[String], probed: bool) {
        self.state.lock().mounts.push(MountEntry {
            point: MountPoint {
                device: device.to_string(),
                path: target.to_string(),
                fs_type: fs_type.to_string(),
                options: options.to_vec(),
            },
            probed,
        });
    }

    pub fn mounts(&self) -> Vec<MountPoint> {
        self.state.lock().mounts.iter().map(|m| m.point.clone()).collect()
    }

    pub fn mark_device(&self, path: &str) {
        self.state.lock().block_devices.insert(path.to_string());
    }

    pub fn fail_mount_probe(&self, path: &str) {
        self.state.lock().probe_failures.insert(path.to_string());
    }

    pub fn fail_bus_rescan(&self) {
        self.state.lock().bus_rescan_fails = true;
    }

    pub fn fail_format_and_mount(&self, reason: &str) {
        self.state.lock().format_error = Some(reason.to_string());
    }

    pub fn fail_resize(&self, reason: &str) {
        self.state.lock().resize_error = Some(reason.to_string());
    }

    pub fn set_block_size(&self, path: &str, bytes: u64) {
        self.state.lock().block_sizes.insert(path.to_string(), bytes);
    }

    pub fn set_geometry(&self, device: &str, geometry: FsGeometry) {
        self.state.lock().geometry.insert(device.to_string(), geometry);
    }

    pub fn set_fs_stats(&self, path: &str, stats: FsStats) {
        self.state.lock().fs_stats.insert(path.to_string(), stats);
    }

    pub fn formatted_fs(&self, device: &str) -> Option<String> {
        self.state.lock().formatted.get(device).cloned()
    }

    pub fn last_mount_options(&self) -> Vec<String> {
        self.state.lock().last_mount_options.clone()
    }

    pub fn format_calls(&self) -> usize {
        self.state.lock().format_calls
    }

    pub fn mount_calls(&self) -> usize {
        self.state.lock().mount_calls
    }

    pub fn unmount_calls(&self) -> usize {
        self.state.lock().unmount_calls
    }

    pub fn resize_calls(&self) -> usize {
        self.state.lock().resize_calls
    }

    pub fn bus_rescans(&self) -> usize {
        self.state.lock().bus_rescans
    }

    pub fn all_device_rescans(&self) -> usize {
        self.state.lock().all_device_rescans
    }

    pub fn device_rescans(&self) -> Vec<String> {
        self.state.lock().device_rescans.clone()
    }
}

fn missing(what: &str, key: &str) -> Error {
    Error::Command {
        command: what.to_string(),
        reason: format!("{}: no such device", key),
    }
}

#[async_trait]
impl MountUtil for FakeMounter {
    async fn is_mount_point(&self, path: &str) -> io::Result<bool> {
        let state = self.state.lock();
        if state.probe_failures.contains(path) {
            return Err(io::Error::new(
                io::ErrorKind::Other,
                "transport endpoint is not connected",
            ));
        }
        if !Path::new(path).exists() {
            return Err(io::Error::new(io::ErrorKind::NotFound, path.to_string()));
        }
        Ok(state.mounts.iter().any(|m| m.probed && m.point.path == path))
    }

    async fn list_mounts(&self) -> Result<Vec<MountPoint>> {
        Ok(self.mounts())
    }

    async fn mount(&self, device: &str, target: &str, fs_type: &str, options: &[String]) -> Result<()> {
        {
            let mut state = self.state.lock();
            state.mount_calls += 1;
            state.last_mount_options = options.to_vec();
        }
        self.push_mount(device, target, fs_type, options, true);
        Ok(())
    }

    async fn unmount(&self, target: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.unmount_calls += 1;
        if let Some(pos) = state.mounts.iter().rposition(|m| m.point.path == target) {
            state.mounts.remove(pos);
        }
        Ok(())
    }

    async fn format_and_mount(
        &self,
        device: &str,
        target: &str,
        fs_type: &str,
        options: &[String],
    ) -> Result<()> {
        {
            let mut state = self.state.lock();
            if let Some(reason) = state.format_error.clone() {
                return Err(Error::Command {
                    command: format!("mkfs.{}", fs_type),
                    reason,
                });
            }
            if !state.formatted.contains_key(device) {
                state.format_calls += 1;
                state.formatted.insert(device.to_string(), fs_type.to_string());
            }
            state.last_mount_options = options.to_vec();
        }
        self.push_mount(device, target, fs_type, options, true);
        Ok(())
    }

    async fn resize_filesystem(&self, _device: &str, _mount_path: &str) -> Result<()> {
        let mut state = self.state.lock();
        state.resize_calls += 1;
        match state.resize_error.clone() {
            Some(reason) => Err(Error::Command {
                command: "resize2fs".into(),
                reason,
            }),
            None => Ok(()),
        }
    }

    async fn block_size_bytes(&self, path: &str) -> Result<u64> {
        self.state
            .lock()
            .block_sizes
            .get(path)
            .copied()
            .ok_or_else(|| missing("blockdev --getsize64", path))
    }

    async fn filesystem_geometry(&self, device: &str, _mount_path: &str) -> Result<FsGeometry> {
        self.state
            .lock()
            .geometry
            .get(device)
            .copied()
            .ok_or_else(|| missing("dumpe2fs", device))
    }

    async fn fs_stats(&self, path: &str) -> Result<FsStats> {
        self.state
            .lock()
            .fs_stats
            .get(path)
            .cloned()
            .ok_or_else(|| missing("statvfs", path))
    }

    async fn path_is_device(&self, path: &str) -> io::Result<bool> {
        if self.state.lock().block_devices.contains(path) {
            return Ok(true);
        }
        if Path::new(path).exists() {
            Ok(false)
        } else {
            Err(io::Error::new(io::ErrorKind::NotFound, path.to_string()))
        }
    }

    async fn rescan_bus(&self) -> Result<()> {
        let mut state = self.state.lock();
        state.bus_rescans += 1;
        if state.bus_rescan_fails {
            return Err(missing("scsi scan", "host0"));
        }
        Ok(())
    }

    async fn rescan_all_devices(&self) -> Result<()> {
        self.state.lock().all_device_rescans += 1;
        Ok(())
    }

    async fn rescan_device(&self, device: &str) -> Result<()> {
        self.state.lock().device_rescans.push(device.to_string());
        Ok(())
    }

    async fn find_disk_by_slot(&self, slot: u32) -> Result<Option<String>> {
        let state = self.state.lock();
        Ok(state
            .devices
            .get(&slot)
            .filter(|(_, appear_at)| *appear_at <= Instant::now())
            .map(|(device, _)| device.clone()))
    }
}

/// Recording device tuner
#[derive(Default)]
pub struct FakeTuner {
    applied: Mutex<Vec<(String, BTreeMap<String, String>)>>,
    error: Mutex<Option<String>>,
}

impl FakeTuner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, reason: &str) {
        *self.error.lock() = Some(reason.to_string());
    }

    pub fn applied_devices(&self) -> Vec<String> {
        self.applied.lock().iter().map(|(d, _)| d.clone()).collect()
    }
}

#[async_trait]
impl DeviceTuner for FakeTuner {
    async fn apply(&self, device: &str, settings: &BTreeMap<String, String>) -> Result<()> {
        if let Some(reason) = self.error.lock().clone() {
            return Err(Error::Io(io::Error::new(io::ErrorKind::PermissionDenied, reason)));
        }
        self.applied
            .lock()
            .push((device.to_string(), settings.clone()));
        Ok(())
    }
}
