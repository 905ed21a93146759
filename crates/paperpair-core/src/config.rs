use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Root application configuration, loaded from `~/.config/paperpair/config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub library: LibraryConfig,
    pub llm: LlmConfig,
    pub matching: MatchingConfig,
    pub extraction: ExtractionConfig,
    pub retry: RetryConfig,
    pub limits: LimitsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LibraryConfig {
    /// Folder holding Chinese-language papers (`c##.pdf`).
    pub chinese_dir: String,
    /// Folder holding English-language papers (`e##.pdf`).
    pub english_dir: String,
    /// Path of the records ledger file.
    pub ledger: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub base_url: String,
    pub model: String,
    pub api_key_env: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
    pub cache_ttl_hours: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MatchingConfig {
    /// Minimum feature score for a pair to reach the semantic verifier.
    pub admission_threshold: f64,
    /// Minimum score for a pair to be kept when the verifier is skipped.
    pub final_threshold: f64,
    pub use_semantic: bool,
    pub enhanced: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    pub use_llm: bool,
    /// Pages of text pulled from the front of each PDF.
    pub max_pages: usize,
    /// Characters of text handed to the extractor.
    pub max_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub exponential: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Soft daily call ceiling; exceeding it only logs a warning.
    pub daily_api_calls: u64,
    /// Soft monthly spend ceiling in account currency.
    pub monthly_budget: f64,
    /// Price used for the spend estimate.
    pub cost_per_1k_tokens: f64,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            library: LibraryConfig::default(),
            llm: LlmConfig::default(),
            matching: MatchingConfig::default(),
            extraction: ExtractionConfig::default(),
            retry: RetryConfig::default(),
            limits: LimitsConfig::default(),
        }
    }
}

impl Default for LibraryConfig {
    fn default() -> Self {
        let papers = dirs::home_dir()
            .unwrap_or_else(|| PathBuf::from("~"))
            .join("Papers");
        Self {
            chinese_dir: papers.join("chinese").to_string_lossy().to_string(),
            english_dir: papers.join("english").to_string_lossy().to_string(),
            ledger: papers.join("records.json").to_string_lossy().to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.deepseek.com".to_string(),
            model: "deepseek-chat".to_string(),
            api_key_env: "DEEPSEEK_API_KEY".to_string(),
            temperature: 0.1,
            max_tokens: 1024,
            timeout_secs: 60,
            cache_ttl_hours: 168,
        }
    }
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            admission_threshold: 0.3,
            final_threshold: 0.6,
            use_semantic: true,
            enhanced: false,
        }
    }
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            use_llm: true,
            max_pages: 3,
            max_chars: 8000,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_delay_ms: 1000,
            exponential: true,
        }
    }
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            daily_api_calls: 500,
            monthly_budget: 10.0,
            cost_per_1k_tokens: 0.002,
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/paperpair/config.toml`
    pub fn config_path() -> PathBuf {
        // Allow override via env var
        if let Ok(path) = std::env::var("PAPERPAIR_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("paperpair")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        Self::load_from(&path)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        Ok(config)
    }

    /// Save config to the standard path.
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path();
        self.save_to(&path)
    }

    /// Save config to a specific path.
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let toml_str = toml::to_string_pretty(self)?;
        std::fs::write(path, toml_str)?;
        Ok(())
    }

    // ─── Derived paths ─────────────────────────────────────

    /// Folder for one language partition.
    pub fn dir_for(&self, language: crate::models::Language) -> PathBuf {
        match language {
            crate::models::Language::Chinese => PathBuf::from(&self.library.chinese_dir),
            crate::models::Language::English => PathBuf::from(&self.library.english_dir),
        }
    }

    /// Path to the records ledger file.
    pub fn ledger_path(&self) -> PathBuf {
        PathBuf::from(&self.library.ledger)
    }

    /// Resolve the API key from the configured environment variable.
    pub fn api_key(&self) -> Option<String> {
        std::env::var(&self.llm.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}
