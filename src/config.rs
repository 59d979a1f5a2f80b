//! Layered configuration: built-in defaults < global YAML < local YAML < environment.
//!
//! Loaded once per working directory and cached behind a `OnceCell` in
//! [`crate::runtime::Runtime`] — nothing here reaches for a process-wide
//! global on its own.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmbeddingProvider {
    Openai,
    Local,
}

impl Default for EmbeddingProvider {
    fn default() -> Self {
        EmbeddingProvider::Openai
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    pub max_file_size: u64,
    pub max_file_count: usize,
    pub embedding_provider: EmbeddingProvider,
    pub embedding_model: String,
    pub openai_api_key: Option<String>,
    pub base_url: Option<String>,
    pub local_embedding_url: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_file_size: 10 * 1024 * 1024,
            max_file_count: 10_000,
            embedding_provider: EmbeddingProvider::default(),
            embedding_model: "text-embedding-3-small".to_string(),
            openai_api_key: None,
            base_url: None,
            local_embedding_url: "http://127.0.0.1:11434".to_string(),
        }
    }
}

fn global_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("searchgrep").join("config.yaml"))
}

fn local_config_path(cwd: &Path) -> PathBuf {
    cwd.join(".searchgreprc.yaml")
}

/// Merge one layer's partial fields over `base`, low precedence losing to
/// whatever `overlay` actually set. Each YAML layer is parsed leniently: a
/// missing or unreadable file is simply skipped, never an error.
fn merge_yaml_layer(base: Config, path: &Path) -> Config {
    let Ok(text) = std::fs::read_to_string(path) else {
        return base;
    };
    match serde_yaml::from_str::<PartialConfig>(&text) {
        Ok(partial) => partial.apply(base),
        Err(e) => {
            crate::debug_log!("[config] failed to parse {}: {e}", path.display());
            base
        }
    }
}

/// Mirrors [`Config`] but every field is optional, so a layer only overrides
/// what it actually specifies.
#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
struct PartialConfig {
    max_file_size: Option<u64>,
    max_file_count: Option<usize>,
    embedding_provider: Option<EmbeddingProvider>,
    embedding_model: Option<String>,
    openai_api_key: Option<String>,
    base_url: Option<String>,
    local_embedding_url: Option<String>,
}

impl PartialConfig {
    fn apply(self, mut base: Config) -> Config {
        if let Some(v) = self.max_file_size {
            base.max_file_size = v;
        }
        if let Some(v) = self.max_file_count {
            base.max_file_count = v;
        }
        if let Some(v) = self.embedding_provider {
            base.embedding_provider = v;
        }
        if let Some(v) = self.embedding_model {
            base.embedding_model = v;
        }
        if self.openai_api_key.is_some() {
            base.openai_api_key = self.openai_api_key;
        }
        if self.base_url.is_some() {
            base.base_url = self.base_url;
        }
        if let Some(v) = self.local_embedding_url {
            base.local_embedding_url = v;
        }
        base
    }
}

fn apply_env(mut cfg: Config) -> Config {
    if let Ok(v) = std::env::var("OPENAI_API_KEY") {
        cfg.openai_api_key = Some(v);
    }
    if let Ok(v) = std::env::var("OPENAI_BASE_URL") {
        cfg.base_url = Some(v);
    }
    if let Ok(v) = std::env::var("SEARCHGREP_MAX_FILE_SIZE") {
        if let Ok(n) = v.parse() {
            cfg.max_file_size = n;
        }
    }
    if let Ok(v) = std::env::var("SEARCHGREP_MAX_FILE_COUNT") {
        if let Ok(n) = v.parse() {
            cfg.max_file_count = n;
        }
    }
    if let Ok(v) = std::env::var("SEARCHGREP_EMBEDDING_MODEL") {
        cfg.embedding_model = v;
    }
    if let Ok(v) = std::env::var("SEARCHGREP_EMBEDDING_PROVIDER") {
        match v.to_lowercase().as_str() {
            "openai" => cfg.embedding_provider = EmbeddingProvider::Openai,
            "local" => cfg.embedding_provider = EmbeddingProvider::Local,
            other => crate::debug_log!("[config] unknown SEARCHGREP_EMBEDDING_PROVIDER={other}"),
        }
    }
    if let Ok(v) = std::env::var("SEARCHGREP_LOCAL_EMBEDDING_URL") {
        cfg.local_embedding_url = v;
    }
    cfg
}

/// Load and merge defaults < global < local < environment for the given
/// working directory. Never fails: any missing or malformed layer falls back
/// to whatever the lower layers already established.
pub fn load_config(cwd: &Path) -> Config {
    let mut cfg = Config::default();
    if let Some(global) = global_config_path() {
        cfg = merge_yaml_layer(cfg, &global);
    }
    cfg = merge_yaml_layer(cfg, &local_config_path(cwd));
    apply_env(cfg)
}

/// `~/.searchgrep`, the default vector store data directory.
pub fn default_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".searchgrep")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_schema_table() {
        let cfg = Config::default();
        assert_eq!(cfg.max_file_size, 10 * 1024 * 1024);
        assert_eq!(cfg.max_file_count, 10_000);
        assert_eq!(cfg.embedding_provider, EmbeddingProvider::Openai);
        assert_eq!(cfg.embedding_model, "text-embedding-3-small");
        assert_eq!(cfg.local_embedding_url, "http://127.0.0.1:11434");
    }

    #[test]
    fn local_layer_overrides_defaults() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".searchgreprc.yaml"),
            "maxFileCount: 42\nembeddingProvider: local\n",
        )
        .unwrap();
        let cfg = merge_yaml_layer(Config::default(), &dir.path().join(".searchgreprc.yaml"));
        assert_eq!(cfg.max_file_count, 42);
        assert_eq!(cfg.embedding_provider, EmbeddingProvider::Local);
    }

    #[test]
    fn camel_case_keys_match_the_published_schema_table() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(".searchgreprc.yaml"),
            "maxFileSize: 123\nopenaiApiKey: sk-test\nlocalEmbeddingUrl: http://example.test\n",
        )
        .unwrap();
        let cfg = merge_yaml_layer(Config::default(), &dir.path().join(".searchgreprc.yaml"));
        assert_eq!(cfg.max_file_size, 123);
        assert_eq!(cfg.openai_api_key.as_deref(), Some("sk-test"));
        assert_eq!(cfg.local_embedding_url, "http://example.test");
    }

    #[test]
    fn env_overrides_everything() {
        std::env::set_var("SEARCHGREP_MAX_FILE_COUNT", "7");
        let cfg = apply_env(Config::default());
        std::env::remove_var("SEARCHGREP_MAX_FILE_COUNT");
        assert_eq!(cfg.max_file_count, 7);
    }

    #[test]
    fn missing_layers_fall_back_to_defaults() {
        let cfg = load_config(Path::new("/nonexistent/does/not/exist"));
        assert_eq!(cfg.embedding_model, "text-embedding-3-small");
    }
}
