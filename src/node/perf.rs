//! Disk performance profiles
//!
//! A volume may ask for block-queue tuning through its context. `basic`
//! derives queue settings from the provisioned IOPS and bandwidth;
//! `advanced` passes explicit `device-setting/` entries through.

use crate::domain::ports::DeviceTuner;
use crate::error::{Error, Result};
use crate::node::params::get_ci;
use std::collections::BTreeMap;
use std::str::FromStr;
use tracing::{debug, info};

pub const PERF_PROFILE: &str = "perfProfile";
pub const SKU_NAME: &str = "skuName";
pub const REQUESTED_SIZE_GIB: &str = "requestedSizeGib";
pub const DISK_IOPS_READ_WRITE: &str = "diskIopsReadWrite";
pub const DISK_MBPS_READ_WRITE: &str = "diskMbpsReadWrite";
pub const DEVICE_SETTING_PREFIX: &str = "device-setting/";

/// Account types whose disks honour queue tuning
const SUPPORTED_SKUS: &[&str] = &[
    "Premium_LRS",
    "Premium_ZRS",
    "StandardSSD_LRS",
    "StandardSSD_ZRS",
    "PremiumV2_LRS",
];

/// Baseline used when the context carries no IOPS figure
const BASELINE_IOPS: u64 = 3000;
/// Baseline used when the context carries no bandwidth figure
const BASELINE_MBPS: u64 = 125;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PerfProfile {
    #[default]
    None,
    Basic,
    Advanced,
}

impl FromStr for PerfProfile {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "none" => Ok(PerfProfile::None),
            "basic" => Ok(PerfProfile::Basic),
            "advanced" => Ok(PerfProfile::Advanced),
            other => Err(Error::Internal(format!("perf profile {} is invalid", other))),
        }
    }
}

/// Performance attributes extracted from a volume context
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiskPerfAttributes {
    pub profile: PerfProfile,
    pub account_type: String,
    pub disk_size_gib: Option<u64>,
    pub disk_iops: Option<u64>,
    pub disk_mbps: Option<u64>,
    /// `device-setting/` entries with the prefix stripped
    pub device_settings: BTreeMap<String, String>,
}

fn parse_number(ctx: &BTreeMap<String, String>, key: &str) -> Result<Option<u64>> {
    match get_ci(ctx, key).map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| Error::Internal(format!("{} value {:?} is not a number", key, raw))),
    }
}

/// Extract performance attributes from `ctx`
pub fn disk_perf_attributes(ctx: &BTreeMap<String, String>) -> Result<DiskPerfAttributes> {
    let profile = get_ci(ctx, PERF_PROFILE).unwrap_or_default().parse()?;

    let device_settings = ctx
        .iter()
        .filter_map(|(k, v)| {
            let prefix = k.get(..DEVICE_SETTING_PREFIX.len())?;
            if prefix.eq_ignore_ascii_case(DEVICE_SETTING_PREFIX) {
                Some((k[DEVICE_SETTING_PREFIX.len()..].to_string(), v.clone()))
            } else {
                None
            }
        })
        .collect();

    Ok(DiskPerfAttributes {
        profile,
        account_type: get_ci(ctx, SKU_NAME).unwrap_or_default().to_string(),
        disk_size_gib: parse_number(ctx, REQUESTED_SIZE_GIB)?,
        disk_iops: parse_number(ctx, DISK_IOPS_READ_WRITE)?,
        disk_mbps: parse_number(ctx, DISK_MBPS_READ_WRITE)?,
        device_settings,
    })
}

/// Whether the profile and account type allow tuning
pub fn supports_perf_optimization(attrs: &DiskPerfAttributes) -> bool {
    attrs.profile != PerfProfile::None
        && SUPPORTED_SKUS
            .iter()
            .any(|sku| sku.eq_ignore_ascii_case(&attrs.account_type))
}

fn validate_setting_key(key: &str) -> Result<()> {
    let allowed = key.starts_with("queue/") || key.starts_with("device/");
    if !allowed || key.contains("..") {
        return Err(Error::Internal(format!("device setting {} is not allowed", key)));
    }
    Ok(())
}

/// Sysfs settings, relative to `/sys/block/<dev>/`, for `attrs`
pub fn device_settings_for(attrs: &DiskPerfAttributes) -> Result<BTreeMap<String, String>> {
    match attrs.profile {
        PerfProfile::None => Ok(BTreeMap::new()),
        PerfProfile::Advanced => {
            if attrs.device_settings.is_empty() {
                return Err(Error::Internal(
                    "advanced perf profile requires device settings".into(),
                ));
            }
            for key in attrs.device_settings.keys() {
                validate_setting_key(key)?;
            }
            Ok(attrs.device_settings.clone())
        }
        PerfProfile::Basic => {
            let iops = attrs.disk_iops.unwrap_or(BASELINE_IOPS);
            let mbps = attrs.disk_mbps.unwrap_or(BASELINE_MBPS);

            // Queue depth tracks IOPS, request size tracks bandwidth
            let nr_requests = (iops / 16).next_power_of_two().clamp(64, 1024);
            let max_sectors_kb = if mbps >= 500 { 1024 } else if mbps >= 200 { 512 } else { 256 };
            let read_ahead_kb = (mbps * 2).next_power_of_two().clamp(128, 2048);

            Ok(BTreeMap::from([
                ("queue/scheduler".to_string(), "none".to_string()),
                ("queue/nr_requests".to_string(), nr_requests.to_string()),
                ("queue/max_sectors_kb".to_string(), max_sectors_kb.to_string()),
                ("queue/read_ahead_kb".to_string(), read_ahead_kb.to_string()),
            ]))
        }
    }
}

/// Apply the tuning `attrs` call for to `device`
pub async fn optimize_disk(tuner: &dyn DeviceTuner, device: &str, attrs: &DiskPerfAttributes) -> Result<()> {
    if !supports_perf_optimization(attrs) {
        debug!(
            "Perf optimization skipped for {}: profile {:?}, account type {}",
            device, attrs.profile, attrs.account_type
        );
        return Ok(());
    }

    let settings = device_settings_for(attrs)?;
    info!("Applying {} device settings to {}", settings.len(), device);
    tuner
        .apply(device, &settings)
        .await
        .map_err(|e| Error::PerfOptimization {
            device: device.to_string(),
            reason: e.to_string(),
        })
}
