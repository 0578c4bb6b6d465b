//! Configuration file parser for distill.toml.
//!
//! The config file is optional; a missing file yields `Config::default()`.
//! Unknown keys are accepted by serde, though we log a warning when the file
//! contains potential typos.
use secrecy::SecretString;
use serde::Deserialize;
use std::path::Path;
use thiserror::Error;

use crate::storage::BriefStatus;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),

    #[error("Invalid config value: {0}")]
    Invalid(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Word-count band applied to brief bodies. Two canonical profiles exist;
/// explicit `min_words`/`max_words` override the profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BriefProfile {
    /// 180–260 words
    Standard,
    /// 400–500 words
    Extended,
}

impl BriefProfile {
    pub fn word_band(&self) -> (usize, usize) {
        match self {
            BriefProfile::Standard => (180, 260),
            BriefProfile::Extended => (400, 500),
        }
    }
}

/// Brief generation policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct BriefConfig {
    pub profile: BriefProfile,
    /// Overrides the profile's lower bound when set.
    pub min_words: Option<usize>,
    /// Overrides the profile's upper bound when set.
    pub max_words: Option<usize>,
    /// Status assigned to briefs at creation. Transitions are external.
    pub initial_status: BriefStatus,
}

impl Default for BriefConfig {
    fn default() -> Self {
        Self {
            profile: BriefProfile::Standard,
            min_words: None,
            max_words: None,
            initial_status: BriefStatus::Pending,
        }
    }
}

impl BriefConfig {
    pub fn word_band(&self) -> (usize, usize) {
        let (profile_min, profile_max) = self.profile.word_band();
        (
            self.min_words.unwrap_or(profile_min),
            self.max_words.unwrap_or(profile_max),
        )
    }
}

/// LLM provider settings. Chat-completions shaped; the base URL is
/// overridable so tests can point at a local mock.
#[derive(Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    /// API key; the DISTILL_LLM_API_KEY env var takes precedence.
    pub api_key: Option<String>,
    pub temperature: f32,
    pub max_tokens: u32,
    /// USD per million input tokens.
    pub input_rate_per_mtok: f64,
    /// USD per million output tokens.
    pub output_rate_per_mtok: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key: None,
            temperature: 0.2,
            max_tokens: 1200,
            input_rate_per_mtok: 0.15,
            output_rate_per_mtok: 0.60,
        }
    }
}

impl LlmConfig {
    /// Resolve the API key: env var first, then config file.
    pub fn resolve_api_key(&self) -> Option<SecretString> {
        std::env::var("DISTILL_LLM_API_KEY")
            .ok()
            .or_else(|| self.api_key.clone())
            .map(SecretString::from)
    }
}

/// Mask the API key in Debug output to prevent secret leakage.
impl std::fmt::Debug for LlmConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmConfig")
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .field("api_key", &self.api_key.as_ref().map(|_| "[REDACTED]"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("input_rate_per_mtok", &self.input_rate_per_mtok)
            .field("output_rate_per_mtok", &self.output_rate_per_mtok)
            .finish()
    }
}

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be specified.
/// Missing keys fall back to `Default::default()`.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Path to the SQLite database file.
    pub db_path: String,

    /// Seconds between fetch sweeps across all active sources.
    pub sweep_interval_secs: u64,

    /// Seconds between scheduled batch runs.
    pub batch_interval_secs: u64,

    /// Delay before the first sweep after startup.
    pub startup_delay_secs: u64,

    /// Upper bound on concurrent source fetches within a sweep.
    pub fetch_concurrency: usize,

    pub brief: BriefConfig,

    pub llm: LlmConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            db_path: "distill.db".to_string(),
            sweep_interval_secs: 30,
            batch_interval_secs: 1800,
            startup_delay_secs: 5,
            fetch_concurrency: 8,
            brief: BriefConfig::default(),
            llm: LlmConfig::default(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Load configuration from a TOML file.
    ///
    /// - Missing file → `Ok(Config::default())`
    /// - Empty file → `Ok(Config::default())`
    /// - Invalid TOML → `Err(ConfigError::Parse)` with line number info
    /// - Unknown keys → silently accepted (serde default behavior), logged as warning
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::metadata(path) {
            Ok(meta) if meta.len() > Self::MAX_FILE_SIZE => {
                return Err(ConfigError::TooLarge(format!(
                    "Config file is {} bytes (max {} bytes)",
                    meta.len(),
                    Self::MAX_FILE_SIZE
                )));
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "No config file found, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
            Ok(_) => {}
        }

        let content = match std::fs::read_to_string(path) {
            Ok(c) => c,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "Config file disappeared, using defaults");
                return Ok(Self::default());
            }
            Err(e) => return Err(ConfigError::Io(e)),
        };

        if content.trim().is_empty() {
            tracing::debug!(path = %path.display(), "Config file is empty, using defaults");
            return Ok(Self::default());
        }

        // Parse as a raw table first to warn on unknown top-level keys
        if let Ok(raw) = content.parse::<toml::Table>() {
            let known_keys = [
                "db_path",
                "sweep_interval_secs",
                "batch_interval_secs",
                "startup_delay_secs",
                "fetch_concurrency",
                "brief",
                "llm",
            ];
            for key in raw.keys() {
                if !known_keys.contains(&key.as_str()) {
                    tracing::warn!(key = %key, "Unknown key in config file, ignoring");
                }
            }
        }

        let config: Config = toml::from_str(&content)?;
        config.validate()?;
        tracing::info!(path = %path.display(), model = %config.llm.model, "Loaded configuration");
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        let (min_words, max_words) = self.brief.word_band();
        if min_words == 0 || min_words >= max_words {
            return Err(ConfigError::Invalid(format!(
                "brief word band [{}, {}] is empty",
                min_words, max_words
            )));
        }
        if !(900..=1400).contains(&self.llm.max_tokens) {
            return Err(ConfigError::Invalid(format!(
                "llm.max_tokens {} outside the supported 900-1400 band",
                self.llm.max_tokens
            )));
        }
        if self.fetch_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "fetch_concurrency must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

// ============================================================================
// Sources File
// ============================================================================

fn default_active() -> bool {
    true
}

#[derive(Debug, Deserialize)]
struct SourceEntry {
    id: String,
    name: String,
    url: String,
    category: crate::storage::Category,
    #[serde(default = "default_active")]
    active: bool,
}

#[derive(Debug, Deserialize)]
struct SourcesFile {
    #[serde(default)]
    sources: Vec<SourceEntry>,
}

/// Load the operator's source list (`[[sources]]` entries) from a TOML file.
///
/// Unlike the main config, a missing sources file is an error: the system has
/// nothing to do without sources.
pub fn load_sources(path: &Path) -> Result<Vec<crate::storage::SourceSeed>, ConfigError> {
    let content = std::fs::read_to_string(path)?;
    let file: SourcesFile = toml::from_str(&content)?;

    let mut seen = std::collections::HashSet::new();
    for entry in &file.sources {
        if !seen.insert(entry.url.as_str()) {
            return Err(ConfigError::Invalid(format!(
                "duplicate source url: {}",
                entry.url
            )));
        }
    }

    Ok(file
        .sources
        .into_iter()
        .map(|e| crate::storage::SourceSeed {
            id: e.id,
            name: e.name,
            url: e.url,
            category: e.category,
            active: e.active,
        })
        .collect())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.sweep_interval_secs, 30);
        assert_eq!(config.batch_interval_secs, 1800);
        assert_eq!(config.startup_delay_secs, 5);
        assert_eq!(config.fetch_concurrency, 8);
        assert_eq!(config.brief.word_band(), (180, 260));
        assert_eq!(config.brief.initial_status, BriefStatus::Pending);
        assert_eq!(config.llm.temperature, 0.2);
        assert_eq!(config.llm.max_tokens, 1200);
    }

    #[test]
    fn test_missing_file_returns_default() {
        let path = Path::new("/tmp/distill_test_nonexistent_config.toml");
        let config = Config::load(path).unwrap();
        assert_eq!(config.sweep_interval_secs, 30);
    }

    #[test]
    fn test_extended_profile_band() {
        let dir = std::env::temp_dir().join("distill_config_test_profile");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[brief]\nprofile = \"extended\"\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.brief.word_band(), (400, 500));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_word_band_overrides_profile() {
        let dir = std::env::temp_dir().join("distill_config_test_band");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(
            &path,
            "[brief]\nprofile = \"standard\"\nmin_words = 200\nmax_words = 300\n",
        )
        .unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.brief.word_band(), (200, 300));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_empty_band_rejected() {
        let dir = std::env::temp_dir().join("distill_config_test_empty_band");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[brief]\nmin_words = 300\nmax_words = 200\n").unwrap();

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_max_tokens_band_enforced() {
        let dir = std::env::temp_dir().join("distill_config_test_tokens");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "[llm]\nmax_tokens = 4000\n").unwrap();

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::Invalid(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_partial_config_uses_defaults_for_missing() {
        let dir = std::env::temp_dir().join("distill_config_test_partial");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "sweep_interval_secs = 10\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.sweep_interval_secs, 10);
        assert_eq!(config.batch_interval_secs, 1800); // default

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_invalid_toml_returns_error() {
        let dir = std::env::temp_dir().join("distill_config_test_invalid");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        std::fs::write(&path, "this is not [valid toml").unwrap();

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::Parse(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_debug_masks_api_key() {
        let mut config = Config::default();
        config.llm.api_key = Some("super-secret-key-12345".to_string());

        let debug_output = format!("{:?}", config);
        assert!(
            !debug_output.contains("super-secret-key-12345"),
            "Debug output should not contain the API key"
        );
        assert!(debug_output.contains("[REDACTED]"));
    }

    #[test]
    fn test_load_sources_round_trip() {
        let dir = std::env::temp_dir().join("distill_config_test_sources");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sources.toml");
        std::fs::write(
            &path,
            r#"
[[sources]]
id = "federal-reserve"
name = "Federal Reserve Press"
url = "https://www.federalreserve.gov/feeds/press_all.xml"
category = "FINANCE_MACRO"

[[sources]]
id = "bbc-world"
name = "BBC World"
url = "https://feeds.bbci.co.uk/news/world/rss.xml"
category = "INTERNATIONAL"
active = false
"#,
        )
        .unwrap();

        let seeds = load_sources(&path).unwrap();
        assert_eq!(seeds.len(), 2);
        assert_eq!(seeds[0].id, "federal-reserve");
        assert!(seeds[0].active); // defaults to true
        assert!(!seeds[1].active);

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_sources_rejects_duplicate_urls() {
        let dir = std::env::temp_dir().join("distill_config_test_sources_dup");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("sources.toml");
        std::fs::write(
            &path,
            r#"
[[sources]]
id = "a"
name = "A"
url = "https://example.com/feed.xml"
category = "US_NATIONAL"

[[sources]]
id = "b"
name = "B"
url = "https://example.com/feed.xml"
category = "US_NATIONAL"
"#,
        )
        .unwrap();

        assert!(matches!(load_sources(&path), Err(ConfigError::Invalid(_))));

        std::fs::remove_dir_all(&dir).ok();
    }

    #[test]
    fn test_load_sources_missing_file_is_error() {
        let path = Path::new("/tmp/distill_test_nonexistent_sources.toml");
        assert!(matches!(load_sources(path), Err(ConfigError::Io(_))));
    }

    #[test]
    fn test_too_large_file_rejected() {
        let dir = std::env::temp_dir().join("distill_config_test_too_large");
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("config.toml");
        let content = "a".repeat(1_048_577);
        std::fs::write(&path, content).unwrap();

        let result = Config::load(&path);
        assert!(matches!(result, Err(ConfigError::TooLarge(_))));

        std::fs::remove_dir_all(&dir).ok();
    }
}
