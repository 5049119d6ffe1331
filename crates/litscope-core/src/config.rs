use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

/// Directory under the data directory holding one PDF per citation key.
pub const PDF_SUBDIR: &str = "pdfs";

/// LLM backends `llm.provider` may name.
pub const SUPPORTED_LLM_PROVIDERS: &[&str] = &["ollama"];

/// Root application configuration, loaded from `~/.config/litscope/config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub core: CoreConfig,
    pub search: SearchConfig,
    pub download: DownloadConfig,
    pub summarize: SummarizeConfig,
    pub validation: ValidationConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub data_dir: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Enabled sources, by name: "arxiv", "semantic_scholar", "unpaywall".
    pub sources: Vec<String>,
    pub limit_per_keyword: usize,
    pub title_similarity_threshold: f64,
    pub semantic_scholar_api_key_env: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub polite_email: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    pub min_interval_ms: u64,
    pub max_retries: u32,
    pub workers: usize,
    pub user_agent: String,
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SummarizeConfig {
    pub max_workers: usize,
    pub max_retries: u32,
    /// Summaries shorter than this are regenerated.
    pub min_words: usize,
    /// Hard cap on source characters sent to the model.
    pub max_input_chars: usize,
    /// Extracted text shorter than this fails the paper without retry.
    pub min_text_chars: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationConfig {
    pub min_words: usize,
    /// Ratio of near-duplicate sentences above which a summary is flagged.
    pub repetition_threshold: f64,
    /// Number of leading characters compared when detecting duplicate sentences.
    pub sentence_prefix_len: usize,
    /// Terms that, when frequent in the source, must appear in the summary.
    pub domain_terms: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub provider: String,
    pub base_url: String,
    pub model: String,
    pub temperature: f64,
    pub max_tokens: u32,
    pub timeout_secs: u64,
}

// ─── Defaults ──────────────────────────────────────────────

impl Default for CoreConfig {
    fn default() -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("~/.local/share"))
            .join("litscope");
        Self {
            data_dir: data_dir.to_string_lossy().to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                "arxiv".to_string(),
                "semantic_scholar".to_string(),
                "unpaywall".to_string(),
            ],
            limit_per_keyword: 10,
            title_similarity_threshold: 0.91,
            semantic_scholar_api_key_env: "SEMANTIC_SCHOLAR_API_KEY".to_string(),
            polite_email: None,
        }
    }
}

impl Default for DownloadConfig {
    fn default() -> Self {
        Self {
            min_interval_ms: 1000,
            max_retries: 3,
            workers: 2,
            user_agent: "litscope/0.1 (literature pipeline)".to_string(),
            request_timeout_secs: 60,
        }
    }
}

impl Default for SummarizeConfig {
    fn default() -> Self {
        Self {
            max_workers: 2,
            max_retries: 2,
            min_words: 250,
            max_input_chars: 60_000,
            min_text_chars: 100,
        }
    }
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            min_words: 200,
            repetition_threshold: 0.3,
            sentence_prefix_len: 50,
            domain_terms: Vec::new(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "ollama".to_string(),
            base_url: "http://localhost:11434".to_string(),
            model: "llama3.1".to_string(),
            temperature: 0.3,
            max_tokens: 2048,
            timeout_secs: 600,
        }
    }
}

// ─── Load / Save ───────────────────────────────────────────

impl AppConfig {
    /// Standard config file path: `~/.config/litscope/config.toml`
    pub fn config_path() -> PathBuf {
        if let Ok(path) = std::env::var("LITSCOPE_CONFIG") {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("~/.config"))
            .join("litscope")
            .join("config.toml")
    }

    /// Load config from disk, falling back to defaults if file doesn't exist,
    /// then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        let mut config = Self::load_from(&path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load config from a specific path.
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(path)?;
        let config: Self = toml::from_str(&contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject settings no component can honour.
    pub fn validate(&self) -> Result<()> {
        let provider = self.llm.provider.trim().to_lowercase();
        if !SUPPORTED_LLM_PROVIDERS.contains(&provider.as_str()) {
            return Err(CoreError::ConfigError(format!(
                "unsupported llm.provider '{}' (supported: {})",
                self.llm.provider,
                SUPPORTED_LLM_PROVIDERS.join(", ")
            )));
        }
        Ok(())
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

    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("LITSCOPE_DATA_DIR") {
            self.core.data_dir = dir;
        }
        if let Ok(url) = std::env::var("LITSCOPE_LLM_URL") {
            self.llm.base_url = url;
        }
        if let Ok(model) = std::env::var("LITSCOPE_LLM_MODEL") {
            self.llm.model = model;
        }
    }

    pub fn set_data_dir(&mut self, path: PathBuf) {
        self.core.data_dir = path.to_string_lossy().to_string();
    }

    // ─── Derived paths ─────────────────────────────────────

    pub fn data_dir(&self) -> PathBuf {
        PathBuf::from(&self.core.data_dir)
    }

    /// Path to the keyed library index.
    pub fn library_path(&self) -> PathBuf {
        self.data_dir().join("library.json")
    }

    /// Path to the BibTeX export written next to the index.
    pub fn bibliography_path(&self) -> PathBuf {
        self.data_dir().join("library.bib")
    }

    pub fn progress_path(&self) -> PathBuf {
        self.data_dir().join("progress.json")
    }

    pub fn pdfs_dir(&self) -> PathBuf {
        self.data_dir().join(PDF_SUBDIR)
    }

    pub fn summaries_dir(&self) -> PathBuf {
        self.data_dir().join("summaries")
    }

    pub fn archive_dir(&self) -> PathBuf {
        self.data_dir().join("archive")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.llm.provider, "ollama");
        assert_eq!(cfg.summarize.min_text_chars, 100);
        assert!(!cfg.core.data_dir.is_empty());
        assert!(cfg.search.sources.contains(&"arxiv".to_string()));
    }

    #[test]
    fn test_config_toml_roundtrip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");

        let mut cfg = AppConfig::default();
        cfg.summarize.max_workers = 4;
        cfg.save_to(&path).unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.summarize.max_workers, 4);
        assert_eq!(loaded.llm.model, cfg.llm.model);
    }

    #[test]
    fn test_partial_toml_uses_section_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm]\nmodel = \"mistral\"\n").unwrap();

        let loaded = AppConfig::load_from(&path).unwrap();
        assert_eq!(loaded.llm.model, "mistral");
        assert_eq!(loaded.llm.base_url, "http://localhost:11434");
        assert_eq!(loaded.summarize.max_retries, 2);
    }

    #[test]
    fn test_unknown_llm_provider_is_rejected() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[llm]\nprovider = \"openai\"\n").unwrap();

        let err = AppConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, CoreError::ConfigError(ref msg) if msg.contains("openai")));

        std::fs::write(&path, "[llm]\nprovider = \"Ollama\"\n").unwrap();
        assert!(AppConfig::load_from(&path).is_ok());
    }

    #[test]
    fn test_load_nonexistent_returns_default() {
        let cfg = AppConfig::load_from(Path::new("/tmp/nonexistent_litscope_config.toml")).unwrap();
        assert_eq!(cfg.download.max_retries, 3);
    }

    #[test]
    fn test_derived_paths() {
        let mut cfg = AppConfig::default();
        cfg.set_data_dir(PathBuf::from("/data/lit"));
        assert_eq!(cfg.library_path(), PathBuf::from("/data/lit/library.json"));
        assert_eq!(cfg.summaries_dir(), PathBuf::from("/data/lit/summaries"));
        assert_eq!(cfg.pdfs_dir(), PathBuf::from("/data/lit/pdfs"));
    }
}
