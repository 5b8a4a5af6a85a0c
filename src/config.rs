use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use logtap_capture::CaptureConfig;
use logtap_http::ServerConfig;
use logtap_logs::FilterConfig;

/// Complete runtime configuration; every table is optional
#[derive(Clone, Debug, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub filter: FilterConfig,
    pub capture: CaptureConfig,
}

impl Config {
    /// Read a TOML config file, or fall back to defaults when no path is given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let Some(path) = path else {
            return Ok(Self::default());
        };
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use logtap_logs::DEFAULT_STRUCTURED_TAG;

    #[test]
    fn test_empty_config_uses_defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.capacity, 100);
        assert_eq!(config.filter.structured_tag, DEFAULT_STRUCTURED_TAG);
        assert_eq!(config.capture.chunk_size, 4096);
    }

    #[test]
    fn test_partial_tables() {
        let config = Config::parse(
            r#"
            [server]
            port = 9090

            [filter]
            noise_patterns = ["heartbeat"]
            "#,
        )
        .unwrap();
        assert_eq!(config.server.port, 9090);
        assert_eq!(config.server.capacity, 100);
        assert_eq!(config.filter.noise_patterns, vec!["heartbeat"]);
        assert!(!config.filter.level_blacklist.is_empty());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = Config::load(Some(Path::new("/nonexistent/logtap.toml"))).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }

    #[test]
    fn test_no_path_is_default() {
        let config = Config::load(None).unwrap();
        assert_eq!(config.capture.max_pending_bytes, 16 * 1024);
    }
}
