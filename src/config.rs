use std::{fs::File, io::BufReader, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{encoding::Encoding, error::Error, InternalResult};

/// Device tuning knobs. Durations are encoded as milliseconds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Delay between the first buffered write and the self-scheduled flush;
    /// writes landing within this window coalesce into one output event.
    #[serde(default = "default_flush_delay", with = "duration_ms")]
    pub flush_delay: Duration,

    /// Capacity of the dispatcher mailbox.
    #[serde(default = "default_mailbox_capacity")]
    pub mailbox_capacity: usize,

    /// Working encoding at creation; mutable later via a set-options request.
    #[serde(default)]
    pub encoding: Encoding,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            flush_delay: default_flush_delay(),
            mailbox_capacity: default_mailbox_capacity(),
            encoding: Encoding::default(),
        }
    }
}

impl DeviceConfig {
    /// Loads the configuration from a JSON file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> InternalResult<Self> {
        let file = File::open(path)
            .map_err(|e| Error::internal(format!("Failed to open config file: {}", e)))?;
        let reader = BufReader::new(file);
        let config = serde_json::from_reader(reader)
            .map_err(|e| Error::internal(format!("Failed to parse config file: {}", e)))?;
        Ok(config)
    }
}

fn default_flush_delay() -> Duration {
    Duration::from_millis(50)
}

fn default_mailbox_capacity() -> usize {
    64
}

pub mod duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_device_config_serde() {
        let config = DeviceConfig::default();
        let json = serde_json::to_string(&config).unwrap();
        tracing::debug!("{}", json);
        let deserialized: DeviceConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(format!("{:?}", config), format!("{:?}", deserialized));
    }

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config: DeviceConfig = serde_json::from_str("{}").unwrap();
        assert_eq!(config.flush_delay, Duration::from_millis(50));
        assert_eq!(config.encoding, Encoding::Utf8);
    }

    #[test]
    fn test_flush_delay_encodes_as_millis() {
        let config: DeviceConfig = serde_json::from_str(r#"{"flush_delay": 10}"#).unwrap();
        assert_eq!(config.flush_delay, Duration::from_millis(10));
    }
}
