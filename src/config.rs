use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Deserialize, Default)]
struct ConfigFile {
    #[serde(default)]
    llm: LlmConfig,
    #[serde(default)]
    upstream: UpstreamConfig,
    #[serde(default)]
    retry: RetryConfig,
    #[serde(default)]
    storage: StorageConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct LlmConfig {
    base_url: String,
    model: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:11434".to_string(),
            model: "llama3:latest".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct UpstreamConfig {
    text_to_image: String,
    image_to_3d: String,
    user_id: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            text_to_image: "c25dcd829d134ea98f5ae4dd311d13bc.node3.openfabric.network"
                .to_string(),
            image_to_3d: "f0b5f319156c4819b9827000b17e511a.node3.openfabric.network"
                .to_string(),
            user_id: "super-user".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RetryConfig {
    max_attempts: u32,
    delay_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay_secs: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct StorageConfig {
    data_dir: String,
    output_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            output_dir: "outputs".to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub llm_base_url: String,
    pub llm_model: String,
    pub text_to_image_app: String,
    pub image_to_3d_app: String,
    pub user_id: String,
    pub retry_max_attempts: u32,
    pub retry_delay_secs: u64,
    pub data_dir: PathBuf,
    pub output_dir: PathBuf,
}

impl Config {
    pub fn from_file(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path))?;

        let config_file: ConfigFile =
            toml::from_str(&content).context("Failed to parse config file")?;

        Ok(Self::from_config_file(config_file))
    }

    /// Reads `config.toml` when present, built-in defaults otherwise.
    pub fn load() -> Result<Self> {
        if Path::new("config.toml").exists() {
            Self::from_file("config.toml")
        } else {
            Ok(Self::from_config_file(ConfigFile::default()))
        }
    }

    fn from_config_file(config_file: ConfigFile) -> Self {
        Self {
            llm_base_url: config_file.llm.base_url,
            llm_model: config_file.llm.model,
            text_to_image_app: config_file.upstream.text_to_image,
            image_to_3d_app: config_file.upstream.image_to_3d,
            user_id: config_file.upstream.user_id,
            retry_max_attempts: config_file.retry.max_attempts,
            retry_delay_secs: config_file.retry.delay_secs,
            data_dir: config_file.storage.data_dir.into(),
            output_dir: config_file.storage.output_dir.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_cover_every_section() {
        let config = Config::from_config_file(ConfigFile::default());
        assert_eq!(config.retry_max_attempts, 3);
        assert_eq!(config.retry_delay_secs, 2);
        assert_eq!(config.user_id, "super-user");
        assert_eq!(config.output_dir, PathBuf::from("outputs"));
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_sections() {
        let parsed: ConfigFile = toml::from_str(
            r#"
            [retry]
            max_attempts = 5
            "#,
        )
        .unwrap();
        let config = Config::from_config_file(parsed);
        assert_eq!(config.retry_max_attempts, 5);
        assert_eq!(config.retry_delay_secs, 2);
        assert_eq!(config.llm_model, "llama3:latest");
    }
}
