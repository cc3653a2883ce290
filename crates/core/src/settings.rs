//! Process-wide settings.
//!
//! Settings are layered: built-in defaults, then a TOML file, then
//! `SITEWEAVE_*` environment variables. The CLI applies its flags last.
//!
//! ```toml
//! cache_dir = "/home/me/.cache/siteweave"
//! cache_ttl_hours = 24
//! max_depth = 3
//! concurrency = 4
//! fetch_timeout_secs = 30
//! crawl_deadline_secs = 600
//! request_delay_ms = 500
//! min_confidence = 0.2
//! detector = "heuristic"
//! order = "navigation"
//! ```

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crawl::{CrawlConfig, MAX_DEPTH_LIMIT};
use crate::detect::{DEFAULT_MIN_CONFIDENCE, DetectConfig, DetectStrategy};
use crate::order::OrderStrategy;
use crate::transport::{FetchConfig, default_user_agent};
use crate::{Result, SiteweaveError};

/// Prefix of every environment override
pub const ENV_PREFIX: &str = "SITEWEAVE_";

/// Settings shared by every command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Base directory holding one cache per root url
    pub cache_dir: PathBuf,
    /// Age in hours after which a stored page is re-requested
    pub cache_ttl_hours: u64,
    /// Default link-following depth
    pub max_depth: usize,
    /// Fetches in flight
    pub concurrency: usize,
    /// Per-fetch timeout
    pub fetch_timeout_secs: u64,
    /// Whole-crawl deadline; 0 disables it
    pub crawl_deadline_secs: u64,
    /// Gap between dispatches
    pub request_delay_ms: u64,
    /// Download quota per crawl; 0 disables it
    pub max_total_bytes: u64,
    pub user_agent: String,
    /// Detection confidence floor
    pub min_confidence: f64,
    pub detector: DetectStrategy,
    pub order: OrderStrategy,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            cache_ttl_hours: 24,
            max_depth: 3,
            concurrency: 4,
            fetch_timeout_secs: 30,
            crawl_deadline_secs: 600,
            request_delay_ms: 0,
            max_total_bytes: 100 * 1024 * 1024,
            user_agent: default_user_agent(),
            min_confidence: DEFAULT_MIN_CONFIDENCE,
            detector: DetectStrategy::default(),
            order: OrderStrategy::default(),
        }
    }
}

/// `<platform cache dir>/siteweave`, or `.siteweave` when the platform has none.
pub fn default_cache_dir() -> PathBuf {
    dirs::cache_dir().map(|d| d.join("siteweave")).unwrap_or_else(|| PathBuf::from(".siteweave"))
}

/// `<platform config dir>/siteweave/config.toml`, if the platform has one.
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("siteweave").join("config.toml"))
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| SiteweaveError::Config(format!("{}{}={}: {}", ENV_PREFIX, name, value, e)))
}

impl Settings {
    /// Creates a new builder starting from defaults.
    pub fn builder() -> SettingsBuilder {
        SettingsBuilder::new()
    }

    /// Loads defaults, then `path` (or the default config file), then the
    /// process environment, and validates the result.
    ///
    /// A missing default config file is not an error; a missing explicit
    /// `path` is.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(path) => Self::from_file(path)?,
            None => match default_config_path().filter(|p| p.is_file()) {
                Some(path) => Self::from_file(&path)?,
                None => Self::default(),
            },
        };
        settings.apply_env(|name| std::env::var(format!("{}{}", ENV_PREFIX, name)).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    /// Reads a TOML settings file; absent keys keep their defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .map_err(|e| SiteweaveError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        let settings: Self =
            toml::from_str(&content).map_err(|e| SiteweaveError::Config(format!("{}: {}", path.display(), e)))?;
        debug!("Loaded settings from {}", path.display());
        Ok(settings)
    }

    /// Applies overrides; `lookup` receives names without the `SITEWEAVE_` prefix.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(v) = lookup("CACHE_DIR") {
            self.cache_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("CACHE_TTL_HOURS") {
            self.cache_ttl_hours = parse_env("CACHE_TTL_HOURS", &v)?;
        }
        if let Some(v) = lookup("MAX_DEPTH") {
            self.max_depth = parse_env("MAX_DEPTH", &v)?;
        }
        if let Some(v) = lookup("CONCURRENCY") {
            self.concurrency = parse_env("CONCURRENCY", &v)?;
        }
        if let Some(v) = lookup("FETCH_TIMEOUT_SECS") {
            self.fetch_timeout_secs = parse_env("FETCH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = lookup("CRAWL_DEADLINE_SECS") {
            self.crawl_deadline_secs = parse_env("CRAWL_DEADLINE_SECS", &v)?;
        }
        if let Some(v) = lookup("REQUEST_DELAY_MS") {
            self.request_delay_ms = parse_env("REQUEST_DELAY_MS", &v)?;
        }
        if let Some(v) = lookup("MAX_TOTAL_BYTES") {
            self.max_total_bytes = parse_env("MAX_TOTAL_BYTES", &v)?;
        }
        if let Some(v) = lookup("USER_AGENT") {
            self.user_agent = v;
        }
        if let Some(v) = lookup("MIN_CONFIDENCE") {
            self.min_confidence = parse_env("MIN_CONFIDENCE", &v)?;
        }
        if let Some(v) = lookup("DETECTOR") {
            self.detector = v.parse()?;
        }
        if let Some(v) = lookup("ORDER") {
            self.order = v.parse()?;
        }
        Ok(())
    }

    /// Rejects values no crawl could run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_depth > MAX_DEPTH_LIMIT {
            return Err(SiteweaveError::Config(format!(
                "max_depth {} exceeds the limit of {}",
                self.max_depth, MAX_DEPTH_LIMIT
            )));
        }
        if self.concurrency == 0 {
            return Err(SiteweaveError::Config("concurrency must be at least 1".to_string()));
        }
        if self.fetch_timeout_secs == 0 {
            return Err(SiteweaveError::Config("fetch_timeout_secs must be at least 1".to_string()));
        }
        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(SiteweaveError::Config(format!("min_confidence {} is outside [0, 1]", self.min_confidence)));
        }
        Ok(())
    }

    /// Cache lifetime; absurd hour counts saturate instead of overflowing.
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours.saturating_mul(60 * 60))
    }

    pub fn crawl_config(&self) -> CrawlConfig {
        CrawlConfig {
            concurrency: self.concurrency,
            fetch_timeout: Duration::from_secs(self.fetch_timeout_secs),
            deadline: (self.crawl_deadline_secs > 0).then(|| Duration::from_secs(self.crawl_deadline_secs)),
            ttl: self.ttl(),
            request_delay: Duration::from_millis(self.request_delay_ms),
            max_total_bytes: (self.max_total_bytes > 0).then_some(self.max_total_bytes),
            max_depth_limit: MAX_DEPTH_LIMIT,
        }
    }

    pub fn detect_config(&self) -> DetectConfig {
        DetectConfig::builder().min_confidence(self.min_confidence).strategy(self.detector).build()
    }

    pub fn fetch_config(&self) -> FetchConfig {
        FetchConfig { timeout: self.fetch_timeout_secs, user_agent: self.user_agent.clone() }
    }
}

/// Builder for Settings.
///
/// ```rust
/// use siteweave_core::settings::Settings;
///
/// let settings = Settings::builder().concurrency(8).max_depth(2).build();
/// assert_eq!(settings.concurrency, 8);
/// ```
pub struct SettingsBuilder {
    settings: Settings,
}

impl SettingsBuilder {
    pub fn new() -> Self {
        Self { settings: Settings::default() }
    }

    pub fn cache_dir(mut self, value: impl Into<PathBuf>) -> Self {
        self.settings.cache_dir = value.into();
        self
    }

    pub fn cache_ttl_hours(mut self, value: u64) -> Self {
        self.settings.cache_ttl_hours = value;
        self
    }

    pub fn max_depth(mut self, value: usize) -> Self {
        self.settings.max_depth = value;
        self
    }

    pub fn concurrency(mut self, value: usize) -> Self {
        self.settings.concurrency = value;
        self
    }

    pub fn fetch_timeout_secs(mut self, value: u64) -> Self {
        self.settings.fetch_timeout_secs = value;
        self
    }

    pub fn crawl_deadline_secs(mut self, value: u64) -> Self {
        self.settings.crawl_deadline_secs = value;
        self
    }

    pub fn request_delay_ms(mut self, value: u64) -> Self {
        self.settings.request_delay_ms = value;
        self
    }

    pub fn min_confidence(mut self, value: f64) -> Self {
        self.settings.min_confidence = value;
        self
    }

    pub fn detector(mut self, value: DetectStrategy) -> Self {
        self.settings.detector = value;
        self
    }

    pub fn order(mut self, value: OrderStrategy) -> Self {
        self.settings.order = value;
        self
    }

    pub fn build(self) -> Settings {
        self.settings
    }
}

impl Default for SettingsBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.cache_ttl_hours, 24);
        assert_eq!(settings.min_confidence, 0.2);
        assert_eq!(settings.detector, DetectStrategy::Heuristic);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "concurrency = 2\ndetector = \"landmark\"\n").unwrap();

        let settings = Settings::from_file(&path).unwrap();
        assert_eq!(settings.concurrency, 2);
        assert_eq!(settings.detector, DetectStrategy::Landmark);
        assert_eq!(settings.fetch_timeout_secs, 30);
    }

    #[test]
    fn test_serialized_settings_reload() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        let settings = Settings::builder().cache_dir(dir.path()).max_depth(5).order(OrderStrategy::Url).build();

        fs::write(&path, toml::to_string_pretty(&settings).unwrap()).unwrap();
        assert_eq!(Settings::from_file(&path).unwrap(), settings);
    }

    #[test]
    fn test_invalid_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        fs::write(&path, "concurrency = \"many\"").unwrap();
        assert!(matches!(Settings::from_file(&path), Err(SiteweaveError::Config(_))));
        assert!(matches!(Settings::load(Some(&dir.path().join("missing.toml"))), Err(SiteweaveError::Config(_))));
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> =
            [("CONCURRENCY", "9"), ("MIN_CONFIDENCE", "0.5"), ("ORDER", "url"), ("CACHE_DIR", "/tmp/sw")].into();
        let mut settings = Settings::default();
        settings.apply_env(|name| env.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(settings.concurrency, 9);
        assert_eq!(settings.min_confidence, 0.5);
        assert_eq!(settings.order, OrderStrategy::Url);
        assert_eq!(settings.cache_dir, PathBuf::from("/tmp/sw"));
    }

    #[test]
    fn test_bad_env_value() {
        let mut settings = Settings::default();
        let result = settings.apply_env(|name| (name == "MAX_DEPTH").then(|| "deep".to_string()));
        assert!(matches!(result, Err(SiteweaveError::Config(msg)) if msg.contains("SITEWEAVE_MAX_DEPTH")));
    }

    #[test]
    fn test_validate_rejects() {
        assert!(Settings::builder().max_depth(11).build().validate().is_err());
        assert!(Settings::builder().concurrency(0).build().validate().is_err());
        assert!(Settings::builder().min_confidence(1.5).build().validate().is_err());
    }

    #[test]
    fn test_crawl_config_zero_disables_limits() {
        let mut settings = Settings::builder().crawl_deadline_secs(0).build();
        settings.max_total_bytes = 0;
        let config = settings.crawl_config();
        assert!(config.deadline.is_none());
        assert!(config.max_total_bytes.is_none());
        assert_eq!(config.ttl, Duration::from_secs(24 * 3600));
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let env: HashMap<&str, &str> = [("CACHE_TTL_HOURS", "18446744073709551615")].into();
        let mut settings = Settings::default();
        settings.apply_env(|name| env.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(settings.ttl(), Duration::from_secs(u64::MAX));
        assert_eq!(settings.crawl_config().ttl, Duration::from_secs(u64::MAX));
    }
}
