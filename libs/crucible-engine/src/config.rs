// Sandbox configuration management for the execution engine
use anyhow::{bail, Context, Result};
use crucible_common::Language;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LanguageSandbox {
    pub name: String,
    pub image: String,
    pub dockerfile_path: String,
    pub memory_limit_mb: u32,
    pub cpu_limit: f32,
    #[serde(default = "default_wall_clock_ms")]
    pub wall_clock_ms: u64,
}

fn default_wall_clock_ms() -> u64 {
    10_000
}

/// How workspaces are reclaimed after a run.
///
/// `Container` covers the cross-principal case: files written by the
/// sandbox belong to the container's user, so the removal itself runs in a
/// helper container that mounts the scratch root. `Direct` is a plain
/// recursive delete for same-principal deployments (e.g. rootless Docker).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CleanupKind {
    Direct,
    #[default]
    Container,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupConfig {
    #[serde(default)]
    pub strategy: CleanupKind,
    #[serde(default = "default_cleanup_image")]
    pub image: String,
    #[serde(default = "default_cleanup_timeout_ms")]
    pub timeout_ms: u64,
}

fn default_cleanup_image() -> String {
    "alpine:3".to_string()
}

fn default_cleanup_timeout_ms() -> u64 {
    10_000
}

impl Default for CleanupConfig {
    fn default() -> Self {
        CleanupConfig {
            strategy: CleanupKind::default(),
            image: default_cleanup_image(),
            timeout_ms: default_cleanup_timeout_ms(),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct LanguagesJson {
    #[serde(default)]
    cleanup: Option<CleanupConfig>,
    languages: Vec<LanguageSandbox>,
}

/// Sandbox configuration manager
#[derive(Clone)]
pub struct SandboxConfigManager {
    configs: HashMap<String, LanguageSandbox>,
    cleanup: CleanupConfig,
}

impl SandboxConfigManager {
    /// Load sandbox configurations from languages.json
    pub fn load(config_path: &Path) -> Result<Self> {
        if !config_path.exists() {
            bail!("Sandbox config file not found: {}", config_path.display());
        }

        let content = fs::read_to_string(config_path)
            .context("Failed to read languages.json")?;

        let languages_json: LanguagesJson = serde_json::from_str(&content)
            .context("Failed to parse languages.json")?;

        let mut configs = HashMap::new();
        for lang in languages_json.languages {
            configs.insert(lang.name.clone(), lang);
        }

        Ok(Self {
            configs,
            cleanup: languages_json.cleanup.unwrap_or_default(),
        })
    }

    /// Load with default path (config/languages.json)
    pub fn load_default() -> Result<Self> {
        let default_path = Path::new("config/languages.json");
        Self::load(default_path)
    }

    /// Built-in defaults matching config/languages.json, for deployments
    /// that run without a config file and for tests.
    pub fn builtin() -> Self {
        let languages = vec![
            LanguageSandbox {
                name: "python".to_string(),
                image: "crucible-python:latest".to_string(),
                dockerfile_path: "docker/python.Dockerfile".to_string(),
                memory_limit_mb: 128,
                cpu_limit: 0.5,
                wall_clock_ms: default_wall_clock_ms(),
            },
            LanguageSandbox {
                name: "javascript".to_string(),
                image: "crucible-node:latest".to_string(),
                dockerfile_path: "docker/node.Dockerfile".to_string(),
                memory_limit_mb: 128,
                cpu_limit: 0.5,
                wall_clock_ms: default_wall_clock_ms(),
            },
            LanguageSandbox {
                name: "typescript".to_string(),
                image: "crucible-node:latest".to_string(),
                dockerfile_path: "docker/node.Dockerfile".to_string(),
                memory_limit_mb: 128,
                cpu_limit: 0.5,
                wall_clock_ms: default_wall_clock_ms(),
            },
        ];

        let mut configs = HashMap::new();
        for lang in languages {
            configs.insert(lang.name.clone(), lang);
        }

        Self {
            configs,
            cleanup: CleanupConfig::default(),
        }
    }

    /// Get configuration for a specific language
    pub fn get_config(&self, language: &Language) -> Result<&LanguageSandbox> {
        let lang_name = language.to_string();
        self.configs
            .get(&lang_name)
            .ok_or_else(|| anyhow::anyhow!("No configuration found for language: {}", lang_name))
    }

    /// Get Docker image for a language
    pub fn get_image(&self, language: &Language) -> Result<String> {
        Ok(self.get_config(language)?.image.clone())
    }

    /// Get memory limit for a language
    pub fn get_memory_limit_mb(&self, language: &Language) -> Result<u32> {
        Ok(self.get_config(language)?.memory_limit_mb)
    }

    /// Get CPU limit for a language
    pub fn get_cpu_limit(&self, language: &Language) -> Result<f32> {
        Ok(self.get_config(language)?.cpu_limit)
    }

    pub fn cleanup(&self) -> &CleanupConfig {
        &self.cleanup
    }

    /// List all configured languages
    pub fn list_languages(&self) -> Vec<String> {
        self.configs.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_covers_every_language() {
        let manager = SandboxConfigManager::builtin();
        for lang in [Language::Python, Language::JavaScript, Language::TypeScript] {
            let config = manager.get_config(&lang).unwrap();
            assert!(config.memory_limit_mb > 0);
            assert!(config.cpu_limit > 0.0);
            assert!(config.wall_clock_ms > 0);
        }
    }

    #[test]
    fn test_load_parses_cleanup_section() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("languages.json");
        fs::write(
            &path,
            r#"{
                "cleanup": { "strategy": "direct", "timeout_ms": 5000 },
                "languages": [
                    {
                        "name": "python",
                        "image": "crucible-python:latest",
                        "dockerfile_path": "docker/python.Dockerfile",
                        "memory_limit_mb": 256,
                        "cpu_limit": 1.0
                    }
                ]
            }"#,
        )
        .unwrap();

        let manager = SandboxConfigManager::load(&path).unwrap();
        assert_eq!(manager.cleanup().strategy, CleanupKind::Direct);
        assert_eq!(manager.cleanup().timeout_ms, 5000);
        assert_eq!(manager.cleanup().image, "alpine:3");

        let python = manager.get_config(&Language::Python).unwrap();
        assert_eq!(python.memory_limit_mb, 256);
        // wall_clock_ms falls back to the default when omitted
        assert_eq!(python.wall_clock_ms, 10_000);

        assert!(manager.get_config(&Language::JavaScript).is_err());
    }

    #[test]
    fn test_load_missing_file_fails() {
        let result = SandboxConfigManager::load(Path::new("/nonexistent/languages.json"));
        assert!(result.is_err());
    }
}
