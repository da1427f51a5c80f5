//! Device Locator
//!
//! Resolves an attachment slot to an OS device path. Attachment completes on
//! the cloud side before the guest enumerates the disk, so the locator
//! rescans the bus and then polls until the device node shows up.

use crate::domain::ports::MountUtilRef;
use crate::error::{Error, Result};
use crate::node::poll::poll_immediate;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// Interval between device lookups
pub const DEVICE_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Deadline for a device to appear after attachment
pub const DEVICE_POLL_TIMEOUT: Duration = Duration::from_secs(120);

/// Highest attachment slot a disk can occupy
pub const MAX_SLOT: u32 = 64;

/// Parse an attachment slot string
pub fn parse_slot(slot: &str) -> Result<u32> {
    let value: i64 = slot
        .trim()
        .parse()
        .map_err(|_| Error::invalid(format!("invalid lun {:?}", slot)))?;
    if !(0..=i64::from(MAX_SLOT)).contains(&value) {
        return Err(Error::invalid(format!(
            "lun {} out of range, maximum cloud disk lun is {}",
            value, MAX_SLOT
        )));
    }
    Ok(value as u32)
}

/// Slot-to-device resolution with bounded retry
pub struct DeviceLocator {
    mounter: MountUtilRef,
    interval: Duration,
    timeout: Duration,
}

impl DeviceLocator {
    pub fn new(mounter: MountUtilRef) -> Self {
        Self {
            mounter,
            interval: DEVICE_POLL_INTERVAL,
            timeout: DEVICE_POLL_TIMEOUT,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Resolve `slot` to a device path
    ///
    /// Blocks the caller for up to the poll deadline.
    #[instrument(skip(self))]
    pub async fn resolve(&self, slot: &str) -> Result<String> {
        let slot = parse_slot(slot)?;

        // Advisory; the poll below is what decides
        if let Err(e) = self.mounter.rescan_bus().await {
            warn!("Bus rescan before lookup of slot {} failed: {}", slot, e);
        }

        let mounter = &self.mounter;
        let found = poll_immediate(self.interval, self.timeout, || async move {
            mounter
                .find_disk_by_slot(slot)
                .await
                .map_err(|e| Error::DeviceLookup {
                    slot,
                    reason: e.to_string(),
                })
        })
        .await?;

        match found {
            Some(device) => {
                info!("Found device {} on slot {}", device, slot);
                Ok(device)
            }
            None => {
                debug!("No device appeared on slot {} within {:?}", slot, self.timeout);
                Err(Error::DeviceNotFound {
                    slot,
                    timeout: self.timeout,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mounter::fake::FakeMounter;
    use assert_matches::assert_matches;
    use std::sync::Arc;
    use tokio::time::Instant;

    #[test]
    fn test_parse_slot() {
        assert_eq!(parse_slot("0").unwrap(), 0);
        assert_eq!(parse_slot("3").unwrap(), 3);
        assert_eq!(parse_slot(" 12 ").unwrap(), 12);
        assert_eq!(parse_slot("64").unwrap(), 64);
        assert_matches!(parse_slot("-1"), Err(Error::InvalidArgument(_)));
        assert_matches!(parse_slot("65"), Err(Error::InvalidArgument(_)));
        assert_matches!(parse_slot("abc"), Err(Error::InvalidArgument(_)));
        assert_matches!(parse_slot(""), Err(Error::InvalidArgument(_)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_appearing_after_five_seconds() {
        let mounter = Arc::new(FakeMounter::new());
        mounter.attach_after(3, "/dev/sdd", Duration::from_secs(5));
        let locator = DeviceLocator::new(mounter.clone());

        let start = Instant::now();
        let device = locator.resolve("3").await.unwrap();
        assert_eq!(device, "/dev/sdd");
        assert_eq!(start.elapsed(), Duration::from_secs(5));
        assert_eq!(mounter.bus_rescans(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_never_appears() {
        let mounter = Arc::new(FakeMounter::new());
        let locator = DeviceLocator::new(mounter);

        let start = Instant::now();
        let err = locator.resolve("3").await.unwrap_err();
        assert_matches!(err, Error::DeviceNotFound { slot: 3, .. });
        assert!(start.elapsed() >= DEVICE_POLL_TIMEOUT);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rescan_failure_is_ignored() {
        let mounter = Arc::new(FakeMounter::new());
        mounter.fail_bus_rescan();
        mounter.attach(0, "/dev/sdc");
        let locator = DeviceLocator::new(mounter);
        assert_eq!(locator.resolve("0").await.unwrap(), "/dev/sdc");
    }

    #[tokio::test]
    async fn test_invalid_slot_rejected_before_rescan() {
        let mounter = Arc::new(FakeMounter::new());
        let locator = DeviceLocator::new(mounter.clone());
        assert_matches!(locator.resolve("x").await, Err(Error::InvalidArgument(_)));
        assert_eq!(mounter.bus_rescans(), 0);
    }
}
