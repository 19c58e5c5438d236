use serde::{Deserialize, Serialize};
use std::{fs::File, io::BufReader, path::Path, time::Duration};

use crate::{Error, InternalResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlatformConfig {
    /// Capacity of each dispatcher's broadcast tap.
    #[serde(default = "default_event_buffer_size")]
    pub event_buffer_size: usize,

    /// Native calls started through a bridge fail with a timeout event after
    /// this long. `None` waits indefinitely.
    #[serde(default = "default_operation_timeout", with = "option_duration_ms")]
    pub operation_timeout: Option<Duration>,

    /// Capability ids reported as unsupported regardless of their own check.
    #[serde(default)]
    pub disabled_capabilities: Vec<String>,
}

impl Default for PlatformConfig {
    fn default() -> Self {
        Self {
            event_buffer_size: default_event_buffer_size(),
            operation_timeout: default_operation_timeout(),
            disabled_capabilities: Vec::new(),
        }
    }
}

impl PlatformConfig {
    // JSONファイルから設定を読み込む
    pub fn from_file<P: AsRef<Path>>(path: P) -> InternalResult<Self> {
        from_file(path)
    }

    pub fn is_disabled(&self, capability_id: &str) -> bool {
        self.disabled_capabilities
            .iter()
            .any(|disabled| disabled == capability_id)
    }
}

pub fn from_file<T: for<'de> Deserialize<'de>, P: AsRef<Path>>(path: P) -> InternalResult<T> {
    let file = File::open(path)
        .map_err(|e| Error::Config(format!("Failed to open config file: {}", e)))?;
    let reader = BufReader::new(file);
    let config = serde_json::from_reader(reader)
        .map_err(|e| Error::Config(format!("Failed to parse config file: {}", e)))?;
    Ok(config)
}

pub fn from_str<T: for<'de> Deserialize<'de>>(s: &str) -> InternalResult<T> {
    let config = serde_json::from_str(s)
        .map_err(|e| Error::Config(format!("Failed to parse config: {}", e)))?;
    Ok(config)
}

fn default_event_buffer_size() -> usize {
    64
}

fn default_operation_timeout() -> Option<Duration> {
    Some(Duration::from_secs(30))
}

// Option<Duration> をミリ秒の数値 (または null) として扱う
mod option_duration_ms {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        match duration {
            Some(duration) => serializer.serialize_some(&(duration.as_millis() as u64)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_from_empty_json() {
        let config: PlatformConfig = from_str("{}").unwrap();
        assert_eq!(config, PlatformConfig::default());
        assert_eq!(config.operation_timeout, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_parse_full_config() {
        let config: PlatformConfig = from_str(
            r#"{
                "event_buffer_size": 8,
                "operation_timeout": 250,
                "disabled_capabilities": ["camera"]
            }"#,
        )
        .unwrap();
        assert_eq!(config.event_buffer_size, 8);
        assert_eq!(config.operation_timeout, Some(Duration::from_millis(250)));
        assert!(config.is_disabled("camera"));
        assert!(!config.is_disabled("account"));
    }

    #[test]
    fn test_null_timeout_disables_it() {
        let config: PlatformConfig = from_str(r#"{"operation_timeout": null}"#).unwrap();
        assert_eq!(config.operation_timeout, None);
    }

    #[test]
    fn test_serialize_timeout_as_millis() {
        let config = PlatformConfig {
            operation_timeout: Some(Duration::from_millis(1500)),
            ..Default::default()
        };
        let json = serde_json::to_string(&config).unwrap();
        assert!(json.contains("\"operation_timeout\":1500"));
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"event_buffer_size": 4}}"#).unwrap();
        let config = PlatformConfig::from_file(file.path()).unwrap();
        assert_eq!(config.event_buffer_size, 4);
    }

    #[test]
    fn test_from_missing_file() {
        let result = PlatformConfig::from_file("/nonexistent/capkit.json");
        assert!(matches!(result, Err(Error::Config(_))));
    }

    #[test]
    fn test_invalid_json() {
        let result: InternalResult<PlatformConfig> = from_str("{ not json");
        assert!(matches!(result, Err(Error::Config(_))));
    }
}
