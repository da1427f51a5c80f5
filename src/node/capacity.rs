//! Capacity Table
//!
//! Static mapping from instance type to the maximum number of data disks
//! that can be attached. Built once on first use and read-only afterwards.

use std::collections::HashMap;
use std::sync::OnceLock;
use tracing::debug;

/// Volume limit used when the instance type is unknown
pub const DEFAULT_VOLUME_LIMIT: i64 = 16;

/// (instance type, max data disks); keys are upper case
const MAX_DATA_DISK_COUNTS: &[(&str, i64)] = &[
    ("STANDARD_A0", 1),
    ("STANDARD_A1", 2),
    ("STANDARD_A2", 4),
    ("STANDARD_A3", 8),
    ("STANDARD_A4", 16),
    ("STANDARD_A5", 4),
    ("STANDARD_A6", 8),
    ("STANDARD_A7", 16),
    ("STANDARD_A1_V2", 2),
    ("STANDARD_A2_V2", 4),
    ("STANDARD_A4_V2", 8),
    ("STANDARD_A8_V2", 16),
    ("STANDARD_A2M_V2", 4),
    ("STANDARD_A4M_V2", 8),
    ("STANDARD_A8M_V2", 16),
    ("STANDARD_B1LS", 2),
    ("STANDARD_B1MS", 2),
    ("STANDARD_B1S", 2),
    ("STANDARD_B2MS", 4),
    ("STANDARD_B2S", 4),
    ("STANDARD_B4MS", 8),
    ("STANDARD_B8MS", 16),
    ("STANDARD_B12MS", 16),
    ("STANDARD_B16MS", 32),
    ("STANDARD_B20MS", 32),
    ("STANDARD_D1", 4),
    ("STANDARD_D2", 8),
    ("STANDARD_D3", 16),
    ("STANDARD_D4", 32),
    ("STANDARD_D11", 8),
    ("STANDARD_D12", 16),
    ("STANDARD_D13", 32),
    ("STANDARD_D14", 64),
    ("STANDARD_D1_V2", 4),
    ("STANDARD_D2_V2", 8),
    ("STANDARD_D3_V2", 16),
    ("STANDARD_D4_V2", 32),
    ("STANDARD_D5_V2", 64),
    ("STANDARD_DS1_V2", 4),
    ("STANDARD_DS2_V2", 8),
    ("STANDARD_DS3_V2", 16),
    ("STANDARD_DS4_V2", 32),
    ("STANDARD_DS5_V2", 64),
    ("STANDARD_D2_V3", 4),
    ("STANDARD_D4_V3", 8),
    ("STANDARD_D8_V3", 16),
    ("STANDARD_D16_V3", 32),
    ("STANDARD_D32_V3", 32),
    ("STANDARD_D64_V3", 32),
    ("STANDARD_D2S_V3", 4),
    ("STANDARD_D4S_V3", 8),
    ("STANDARD_D8S_V3", 16),
    ("STANDARD_D16S_V3", 32),
    ("STANDARD_D32S_V3", 32),
    ("STANDARD_D48S_V3", 32),
    ("STANDARD_D64S_V3", 32),
    ("STANDARD_D2S_V4", 4),
    ("STANDARD_D4S_V4", 8),
    ("STANDARD_D8S_V4", 16),
    ("STANDARD_D16S_V4", 32),
    ("STANDARD_D32S_V4", 32),
    ("STANDARD_D48S_V4", 32),
    ("STANDARD_D64S_V4", 32),
    ("STANDARD_D2DS_V4", 4),
    ("STANDARD_D4DS_V4", 8),
    ("STANDARD_D8DS_V4", 16),
    ("STANDARD_D16DS_V4", 32),
    ("STANDARD_D2S_V5", 4),
    ("STANDARD_D4S_V5", 8),
    ("STANDARD_D8S_V5", 16),
    ("STANDARD_D16S_V5", 32),
    ("STANDARD_D32S_V5", 32),
    ("STANDARD_D48S_V5", 32),
    ("STANDARD_D64S_V5", 32),
    ("STANDARD_D96S_V5", 32),
    ("STANDARD_D2ADS_V5", 4),
    ("STANDARD_D4ADS_V5", 8),
    ("STANDARD_E2S_V3", 4),
    ("STANDARD_E4S_V3", 8),
    ("STANDARD_E8S_V3", 16),
    ("STANDARD_E16S_V3", 32),
    ("STANDARD_E32S_V3", 32),
    ("STANDARD_E64S_V3", 32),
    ("STANDARD_E2S_V5", 4),
    ("STANDARD_E4S_V5", 8),
    ("STANDARD_E8S_V5", 16),
    ("STANDARD_E16S_V5", 32),
    ("STANDARD_F2S_V2", 4),
    ("STANDARD_F4S_V2", 8),
    ("STANDARD_F8S_V2", 16),
    ("STANDARD_F16S_V2", 32),
    ("STANDARD_F32S_V2", 32),
    ("STANDARD_F64S_V2", 32),
    ("STANDARD_F72S_V2", 32),
    ("STANDARD_L8S_V2", 16),
    ("STANDARD_L16S_V2", 32),
    ("STANDARD_L32S_V2", 32),
    ("STANDARD_M64S", 64),
    ("STANDARD_M128S", 64),
    ("STANDARD_M416S_V2", 64),
    ("STANDARD_NC6", 24),
    ("STANDARD_NC12", 48),
    ("STANDARD_NC24", 64),
];

fn table() -> &'static HashMap<&'static str, i64> {
    static TABLE: OnceLock<HashMap<&'static str, i64>> = OnceLock::new();
    TABLE.get_or_init(|| MAX_DATA_DISK_COUNTS.iter().copied().collect())
}

/// Look up the max data disk count for `instance_type` (case-insensitive)
///
/// Returns `(count, found)`; an unknown type yields [`DEFAULT_VOLUME_LIMIT`].
pub fn max_data_disk_count(instance_type: &str) -> (i64, bool) {
    let key = instance_type.to_uppercase();
    match table().get(key.as_str()) {
        Some(&count) => {
            debug!("Matched instance type {} with max data disk count {}", key, count);
            (count, true)
        }
        None => {
            debug!(
                "No matching instance type for {:?}, using default volume limit {}",
                key, DEFAULT_VOLUME_LIMIT
            );
            (DEFAULT_VOLUME_LIMIT, false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lookup_is_case_insensitive() {
        assert_eq!(max_data_disk_count("Standard_D2s_v3"), (4, true));
        assert_eq!(max_data_disk_count("standard_d2s_v3"), (4, true));
        assert_eq!(max_data_disk_count("STANDARD_D2S_V3"), (4, true));
        assert_eq!(max_data_disk_count("Standard_DS5_v2"), (64, true));
    }

    #[test]
    fn test_unknown_type_uses_default() {
        assert_eq!(max_data_disk_count("Standard_Imaginary_v9"), (DEFAULT_VOLUME_LIMIT, false));
        assert_eq!(max_data_disk_count(""), (DEFAULT_VOLUME_LIMIT, false));
    }

    #[test]
    fn test_table_has_no_duplicate_keys() {
        assert_eq!(table().len(), MAX_DATA_DISK_COUNTS.len());
        assert!(table().keys().all(|k| *k == k.to_uppercase()));
    }
}
