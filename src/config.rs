// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Rangepart configuration

use std::collections::HashMap;
use std::result;
use std::sync::LazyLock;

use crate::error::{RangePartError, Result};

/// Replication factor requested when creating partition files on the store.
pub const RANGEPART_STORAGE_REPLICATION: &str = "rangepart.storage.replication";
/// Maximum number of bytes returned per chunked partition read.
pub const RANGEPART_READ_MAX_CHUNK_SIZE: &str = "rangepart.read.max_chunk_size";
/// Maximum number of buffered bytes per partition before an automatic flush.
pub const RANGEPART_WRITE_MAX_BUFFER_SIZE: &str = "rangepart.write.max_buffer_size";
/// Default record sampling rate used when building an index tree.
pub const RANGEPART_SAMPLING_RATE: &str = "rangepart.sampling.rate";
/// Target number of output partitions for an index build.
pub const RANGEPART_TARGET_PARTITIONS: &str = "rangepart.partitions.target";
/// Storage block size in megabytes used by block sampling.
pub const RANGEPART_SAMPLING_BLOCK_SIZE_MB: &str = "rangepart.sampling.block_size_mb";
/// Fraction of storage blocks scanned by block sampling.
pub const RANGEPART_SAMPLING_BLOCK_FRACTION: &str =
    "rangepart.sampling.block_fraction";

/// Default replication factor for newly created partition files.
pub const DEFAULT_REPLICATION: u16 = 3;
/// Default maximum bytes returned per chunked partition read.
pub const DEFAULT_STORAGE_READ_MAX_CHUNK_SIZE: usize = 50 * 1024 * 1024;
/// Default maximum buffered bytes per partition before automatic flush.
pub const DEFAULT_WRITE_MAX_BUFFER_SIZE: usize = 5 * 1024 * 1024;

/// Result of parsing a single configuration value.
pub type ParseResult<T> = result::Result<T, String>;

/// Value types a configuration entry can hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigDataType {
    /// Unsigned integer value.
    UInt64,
    /// Floating point value.
    Float64,
    /// String value.
    Utf8,
}

static CONFIG_ENTRIES: LazyLock<HashMap<String, ConfigEntry>> = LazyLock::new(|| {
    let entries = vec![
        ConfigEntry::new(
            RANGEPART_STORAGE_REPLICATION.to_string(),
            "Replication factor for newly created partition files".to_string(),
            ConfigDataType::UInt64,
            Some(DEFAULT_REPLICATION.to_string()),
        ),
        ConfigEntry::new(
            RANGEPART_READ_MAX_CHUNK_SIZE.to_string(),
            "Maximum bytes returned per chunked partition read".to_string(),
            ConfigDataType::UInt64,
            Some(DEFAULT_STORAGE_READ_MAX_CHUNK_SIZE.to_string()),
        ),
        ConfigEntry::new(
            RANGEPART_WRITE_MAX_BUFFER_SIZE.to_string(),
            "Maximum buffered bytes per partition before automatic flush".to_string(),
            ConfigDataType::UInt64,
            Some(DEFAULT_WRITE_MAX_BUFFER_SIZE.to_string()),
        ),
        ConfigEntry::new(
            RANGEPART_SAMPLING_RATE.to_string(),
            "Record sampling rate for index tree construction".to_string(),
            ConfigDataType::Float64,
            Some("0.01".to_string()),
        ),
        ConfigEntry::new(
            RANGEPART_TARGET_PARTITIONS.to_string(),
            "Target number of output partitions".to_string(),
            ConfigDataType::UInt64,
            Some("16".to_string()),
        ),
        ConfigEntry::new(
            RANGEPART_SAMPLING_BLOCK_SIZE_MB.to_string(),
            "Storage block size in megabytes for block sampling".to_string(),
            ConfigDataType::UInt64,
            Some("64".to_string()),
        ),
        ConfigEntry::new(
            RANGEPART_SAMPLING_BLOCK_FRACTION.to_string(),
            "Fraction of storage blocks scanned by block sampling".to_string(),
            ConfigDataType::Float64,
            Some("0.2".to_string()),
        ),
    ];
    entries
        .into_iter()
        .map(|e| (e.name.clone(), e))
        .collect::<HashMap<_, _>>()
});

/// Configuration option meta-data
#[derive(Debug, Clone)]
pub struct ConfigEntry {
    name: String,
    #[allow(dead_code)]
    description: String,
    data_type: ConfigDataType,
    default_value: Option<String>,
}

impl ConfigEntry {
    fn new(
        name: String,
        description: String,
        data_type: ConfigDataType,
        default_value: Option<String>,
    ) -> Self {
        Self {
            name,
            description,
            data_type,
            default_value,
        }
    }
}

/// Rangepart configuration, consumed as opaque key/value settings.
///
/// Loading settings from files or the environment is the caller's concern;
/// this type only validates and exposes them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangePartConfig {
    /// Settings stored in map for easy serde
    settings: HashMap<String, String>,
}

impl Default for RangePartConfig {
    fn default() -> Self {
        Self::with_settings(HashMap::new()).unwrap()
    }
}

impl RangePartConfig {
    /// Create a new configuration based on key-value pairs
    pub fn with_settings(settings: HashMap<String, String>) -> Result<Self> {
        let supported_entries = RangePartConfig::valid_entries();
        for (name, entry) in supported_entries {
            if let Some(v) = settings.get(name) {
                // validate that we can parse the user-supplied value
                Self::parse_value(v.as_str(), entry.data_type).map_err(|e| {
                    RangePartError::Configuration(format!(
                        "Failed to parse user-supplied value '{v}' for configuration setting '{name}': {e}"
                    ))
                })?;
            } else if let Some(v) = entry.default_value.clone() {
                Self::parse_value(v.as_str(), entry.data_type).map_err(|e| {
                    RangePartError::Configuration(format!(
                        "Failed to parse default value '{v}' for configuration setting '{name}': {e}"
                    ))
                })?;
            }
        }

        Ok(Self { settings })
    }

    /// Validates that a value parses as the given data type.
    pub fn parse_value(val: &str, data_type: ConfigDataType) -> ParseResult<()> {
        match data_type {
            ConfigDataType::UInt64 => {
                val.parse::<u64>().map_err(|e| format!("{e:?}"))?;
            }
            ConfigDataType::Float64 => {
                val.parse::<f64>().map_err(|e| format!("{e:?}"))?;
            }
            ConfigDataType::Utf8 => {}
        }

        Ok(())
    }

    /// All available configuration options
    pub fn valid_entries() -> &'static HashMap<String, ConfigEntry> {
        &CONFIG_ENTRIES
    }

    /// Raw key-value settings held by this configuration.
    pub fn settings(&self) -> &HashMap<String, String> {
        &self.settings
    }

    /// Replication factor for newly created partition files.
    pub fn storage_replication(&self) -> u16 {
        self.get_u64_setting(RANGEPART_STORAGE_REPLICATION) as u16
    }

    /// Maximum bytes returned per chunked partition read.
    pub fn read_max_chunk_size(&self) -> usize {
        self.get_u64_setting(RANGEPART_READ_MAX_CHUNK_SIZE) as usize
    }

    /// Maximum buffered bytes per partition before automatic flush.
    pub fn write_max_buffer_size(&self) -> usize {
        self.get_u64_setting(RANGEPART_WRITE_MAX_BUFFER_SIZE) as usize
    }

    /// Default record sampling rate.
    pub fn sampling_rate(&self) -> f64 {
        self.get_f64_setting(RANGEPART_SAMPLING_RATE)
    }

    /// Target number of output partitions.
    pub fn target_partitions(&self) -> usize {
        self.get_u64_setting(RANGEPART_TARGET_PARTITIONS) as usize
    }

    /// Storage block size in megabytes for block sampling.
    pub fn sampling_block_size_mb(&self) -> u64 {
        self.get_u64_setting(RANGEPART_SAMPLING_BLOCK_SIZE_MB)
    }

    /// Fraction of storage blocks scanned by block sampling.
    pub fn sampling_block_fraction(&self) -> f64 {
        self.get_f64_setting(RANGEPART_SAMPLING_BLOCK_FRACTION)
    }

    fn get_u64_setting(&self, key: &str) -> u64 {
        if let Some(v) = self.settings.get(key) {
            // infallible because we validate all configs in the constructor
            v.parse().unwrap()
        } else {
            let entries = Self::valid_entries();
            // infallible because we validate all configs in the constructor
            let v = entries.get(key).unwrap().default_value.as_ref().unwrap();
            v.parse().unwrap()
        }
    }

    fn get_f64_setting(&self, key: &str) -> f64 {
        if let Some(v) = self.settings.get(key) {
            // infallible because we validate all configs in the constructor
            v.parse().unwrap()
        } else {
            let entries = Self::valid_entries();
            // infallible because we validate all configs in the constructor
            let v = entries.get(key).unwrap().default_value.as_ref().unwrap();
            v.parse().unwrap()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config() -> Result<()> {
        let config = RangePartConfig::default();
        assert_eq!(3, config.storage_replication());
        assert_eq!(50 * 1024 * 1024, config.read_max_chunk_size());
        assert_eq!(5 * 1024 * 1024, config.write_max_buffer_size());
        assert_eq!(16, config.target_partitions());
        assert_eq!(64, config.sampling_block_size_mb());
        assert!((config.sampling_rate() - 0.01).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn custom_settings() -> Result<()> {
        let mut settings = HashMap::new();
        settings.insert(RANGEPART_TARGET_PARTITIONS.to_string(), "4".to_string());
        settings.insert(RANGEPART_SAMPLING_RATE.to_string(), "1.0".to_string());
        let config = RangePartConfig::with_settings(settings)?;
        assert_eq!(4, config.target_partitions());
        assert!((config.sampling_rate() - 1.0).abs() < f64::EPSILON);
        Ok(())
    }

    #[test]
    fn invalid_setting_rejected() {
        let mut settings = HashMap::new();
        settings.insert(
            RANGEPART_TARGET_PARTITIONS.to_string(),
            "not-a-number".to_string(),
        );
        let result = RangePartConfig::with_settings(settings);
        assert!(matches!(
            result,
            Err(RangePartError::Configuration(_))
        ));
    }
}
