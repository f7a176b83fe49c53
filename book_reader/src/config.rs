//! Reader configuration: compiled-in defaults plus an optional TOML file.

use std::path::Path;

use book_archive::tool::ToolSettings;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Bytes of decoded pixels the page cache may hold, pinned pages excepted.
pub const CACHE_BUDGET_BYTES: u64 = 512 * 1024 * 1024;
/// Pages kept pinned and prefetched on each side of the current page.
pub const PREFETCH_RADIUS: usize = 2;
/// Extraction workers.
pub const WORKERS: usize = 4;
/// Buffered session events per subscriber before the slowest one lags.
pub const EVENT_CAPACITY: usize = 64;
/// Largest accepted image side, in pixels.
pub const MAX_IMAGE_DIMENSION: u32 = 20_000;
/// Largest allocation a single decode may make.
pub const MAX_DECODE_ALLOC: u64 = 1024 * 1024 * 1024;

/// Input-size limits applied before decoding.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct DecodeLimits {
    pub max_width: u32,
    pub max_height: u32,
    pub max_alloc_bytes: u64,
}

impl Default for DecodeLimits {
    fn default() -> Self {
        Self {
            max_width: MAX_IMAGE_DIMENSION,
            max_height: MAX_IMAGE_DIMENSION,
            max_alloc_bytes: MAX_DECODE_ALLOC,
        }
    }
}

impl DecodeLimits {
    pub fn to_image_limits(&self) -> image::Limits {
        let mut limits = image::Limits::default();
        limits.max_image_width = Some(self.max_width);
        limits.max_image_height = Some(self.max_height);
        limits.max_alloc = Some(self.max_alloc_bytes);
        limits
    }
}

/// Everything a `BookSession` can be tuned with.
///
/// ```toml
/// cache_budget_bytes = 268435456
/// prefetch_radius = 3
///
/// [tools.rar]
/// path = "/opt/bin/unrar"
/// timeout_ms = 10000
///
/// [tools.pdftoppm]
/// timeout_ms = 60000
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    pub cache_budget_bytes: u64,
    pub prefetch_radius: usize,
    pub workers: usize,
    pub event_capacity: usize,
    pub decode: DecodeLimits,
    pub tools: ToolSettings,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_budget_bytes: CACHE_BUDGET_BYTES,
            prefetch_radius: PREFETCH_RADIUS,
            workers: WORKERS,
            event_capacity: EVENT_CAPACITY,
            decode: DecodeLimits::default(),
            tools: ToolSettings::default(),
        }
    }
}

impl Config {
    /// Read and validate a TOML config file. Missing keys keep their defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        log::info!("Loading config from {:?}", path);
        let text = std::fs::read_to_string(path).map_err(|e| ConfigError::read(path, e))?;
        Self::from_toml_str(&text)
    }

    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Config =
            toml::from_str(text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workers == 0 {
            return Err(ConfigError::Invalid("workers must be at least 1".into()));
        }
        if self.event_capacity == 0 {
            return Err(ConfigError::Invalid("event_capacity must be at least 1".into()));
        }
        if let Some((name, _)) = self.tools.iter().find(|(_, tool)| tool.timeout_ms == 0) {
            return Err(ConfigError::Invalid(format!("{} timeout must be non-zero", name)));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = Config::from_toml_str(
            r#"
            prefetch_radius = 5

            [tools.seven_zip]
            path = "/usr/local/bin/7zz"
            "#,
        )
        .unwrap();
        assert_eq!(config.prefetch_radius, 5);
        assert_eq!(config.workers, WORKERS);
        assert_eq!(config.cache_budget_bytes, CACHE_BUDGET_BYTES);
        assert_eq!(
            config.tools.seven_zip.path.as_deref(),
            Some(Path::new("/usr/local/bin/7zz"))
        );
        assert_eq!(
            config.tools.seven_zip.timeout_ms,
            book_archive::tool::DEFAULT_TOOL_TIMEOUT_MS
        );
    }

    #[test]
    fn test_rejects_zero_workers() {
        let err = Config::from_toml_str("workers = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn test_rejects_zero_tool_timeout() {
        let err = Config::from_toml_str("[tools.pdftoppm]\ntimeout_ms = 0").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(ref msg) if msg.contains("pdftoppm")), "{err:?}");
    }

    #[test]
    fn test_parse_error() {
        let err = Config::from_toml_str("workers = \"many\"").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_load_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("reader.toml");
        std::fs::write(&path, "[decode]\nmax_width = 640\n").unwrap();
        let config = Config::load(&path).unwrap();
        assert_eq!(config.decode.max_width, 640);
        assert_eq!(config.decode.max_height, MAX_IMAGE_DIMENSION);

        let missing = Config::load(&dir.path().join("nope.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Read { .. }));
    }
}
