//! Volume context attributes and capability validation

use crate::domain::ports::{AccessType, VolumeCapability};
use crate::error::{Error, Result};
use std::collections::BTreeMap;

/// Publish context key carrying the attachment slot
pub const LUN: &str = "LUN";
pub const FS_TYPE: &str = "fstype";
pub const PARTITION: &str = "partition";
pub const RESIZE_REQUIRED: &str = "resizeRequired";
pub const MAX_SHARES: &str = "maxShares";
pub const TRUE_VALUE: &str = "true";

/// Case-insensitive lookup of a context attribute
pub fn get_ci<'a>(ctx: &'a BTreeMap<String, String>, key: &str) -> Option<&'a str> {
    ctx.iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(key))
        .map(|(_, v)| v.as_str())
}

/// `fstype` attribute, lower-cased; empty when unset
pub fn fs_type(ctx: &BTreeMap<String, String>) -> String {
    get_ci(ctx, FS_TYPE)
        .map(|v| v.trim().to_lowercase())
        .unwrap_or_default()
}

pub fn partition(ctx: &BTreeMap<String, String>) -> Option<&str> {
    get_ci(ctx, PARTITION).filter(|p| !p.is_empty())
}

pub fn resize_required(ctx: &BTreeMap<String, String>) -> bool {
    get_ci(ctx, RESIZE_REQUIRED).is_some_and(|v| v.eq_ignore_ascii_case(TRUE_VALUE))
}

/// `maxShares` attribute; defaults to 1
pub fn max_shares(ctx: &BTreeMap<String, String>) -> Result<u32> {
    match get_ci(ctx, MAX_SHARES) {
        None => Ok(1),
        Some(raw) => {
            let shares: i64 = raw
                .trim()
                .parse()
                .map_err(|_| Error::invalid("MaxShares value not supported"))?;
            if shares < 1 {
                return Err(Error::invalid("MaxShares value not supported"));
            }
            u32::try_from(shares).map_err(|_| Error::invalid("MaxShares value not supported"))
        }
    }
}

/// Check that `cap` is usable with a disk shared `max_shares` ways
pub fn validate_capability(cap: &VolumeCapability, max_shares: u32) -> Result<()> {
    use crate::domain::ports::AccessMode;

    if cap.access_mode == AccessMode::Unknown {
        return Err(Error::invalid("invalid access mode: access mode not provided"));
    }
    let access_type = cap
        .access_type
        .as_ref()
        .ok_or_else(|| Error::invalid("invalid access type: neither block nor mount"))?;

    if cap.access_mode.is_multi_node() && max_shares < 2 {
        return Err(Error::invalid(format!(
            "access mode {:?} requires maxShares > 1",
            cap.access_mode
        )));
    }
    if matches!(access_type, AccessType::Mount(_))
        && cap.access_mode == AccessMode::MultiNodeMultiWriter
    {
        return Err(Error::invalid(
            "mounted volumes do not support MULTI_NODE_MULTI_WRITER",
        ));
    }
    Ok(())
}

/// Mount options for `fs_type`, adding `nouuid` for xfs so a volume can be
/// mounted next to a clone or snapshot that shares its UUID
pub fn collect_mount_options(fs_type: &str, mount_flags: &[String]) -> Vec<String> {
    let mut options = mount_flags.to_vec();
    if fs_type == "xfs" && !options.iter().any(|o| o == "nouuid") {
        options.push("nouuid".to_string());
    }
    options
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ports::AccessMode;
    use assert_matches::assert_matches;

    fn ctx(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_keys_are_case_insensitive() {
        let c = ctx(&[("FSType", "XFS"), ("ResizeRequired", "TRUE"), ("Partition", "1")]);
        assert_eq!(fs_type(&c), "xfs");
        assert!(resize_required(&c));
        assert_eq!(partition(&c), Some("1"));
        assert!(!resize_required(&ctx(&[("resizeRequired", "yes")])));
    }

    #[test]
    fn test_max_shares() {
        assert_eq!(max_shares(&ctx(&[])).unwrap(), 1);
        assert_eq!(max_shares(&ctx(&[("maxshares", "3")])).unwrap(), 3);
        assert_matches!(max_shares(&ctx(&[("maxShares", "0")])), Err(Error::InvalidArgument(_)));
        assert_matches!(max_shares(&ctx(&[("maxShares", "two")])), Err(Error::InvalidArgument(_)));
    }

    #[test]
    fn test_validate_capability() {
        let rwo = VolumeCapability::mount("ext4", vec![], AccessMode::SingleNodeWriter);
        assert!(validate_capability(&rwo, 1).is_ok());

        let rox = VolumeCapability::mount("ext4", vec![], AccessMode::MultiNodeReaderOnly);
        assert!(validate_capability(&rox, 1).is_err());
        assert!(validate_capability(&rox, 2).is_ok());

        let rwx_mount = VolumeCapability::mount("ext4", vec![], AccessMode::MultiNodeMultiWriter);
        assert!(validate_capability(&rwx_mount, 3).is_err());

        let rwx_block = VolumeCapability::block(AccessMode::MultiNodeMultiWriter);
        assert!(validate_capability(&rwx_block, 3).is_ok());

        let untyped = VolumeCapability {
            access_type: None,
            access_mode: AccessMode::SingleNodeWriter,
        };
        assert!(validate_capability(&untyped, 1).is_err());

        let no_mode = VolumeCapability::block(AccessMode::Unknown);
        assert!(validate_capability(&no_mode, 1).is_err());
    }

    #[test]
    fn test_xfs_always_gets_nouuid() {
        assert_eq!(collect_mount_options("xfs", &[]), vec!["nouuid"]);
        assert_eq!(
            collect_mount_options("xfs", &["noatime".to_string()]),
            vec!["noatime", "nouuid"]
        );
        assert_eq!(
            collect_mount_options("xfs", &["nouuid".to_string()]),
            vec!["nouuid"]
        );
        assert!(collect_mount_options("ext4", &["noatime".to_string()])
            .iter()
            .all(|o| o != "nouuid"));
    }
}
