//! Configuration management for lazarus
//!
//! Stores settings in ~/.config/lazarus/config.json

use crate::language::Interpreters;
use anyhow::{anyhow, Result};
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::PathBuf;
use std::time::Duration;

pub const API_KEY_ENV: &str = "GEMINI_API_KEY";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Generation model id passed to the oracle.
    pub model: String,
    /// Hard wall-clock limit per program execution.
    pub timeout_ms: u64,
    /// Generation attempts before a session is exhausted.
    pub max_attempts: u32,
    /// Concurrent candidate processes during one verification pass.
    pub verify_concurrency: usize,
    /// Directory reference programs are resolved against.
    pub legacy_dir: PathBuf,
    /// Directory accepted candidates are published to.
    pub modern_dir: PathBuf,
    pub python_bin: String,
    pub node_bin: String,
    /// Legacy plaintext key; prefer the environment or the keychain.
    pub gemini_api_key: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "gemini-flash-latest".to_string(),
            timeout_ms: 5_000,
            max_attempts: 3,
            verify_concurrency: 4,
            legacy_dir: PathBuf::from("legacy_sandbox"),
            modern_dir: PathBuf::from("modern_sandbox"),
            python_bin: "python3".to_string(),
            node_bin: "node".to_string(),
            gemini_api_key: None,
        }
    }
}

const KEYRING_SERVICE: &str = "lazarus";
const KEYRING_USERNAME: &str = "gemini_api_key";

fn keyring_entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

fn read_keyring_key() -> Result<Option<String>, keyring::Error> {
    let entry = keyring_entry()?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err),
    }
}

fn write_keyring_key(key: &str) -> Result<(), keyring::Error> {
    let entry = keyring_entry()?;
    entry.set_password(key)
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("lazarus"))
    }

    /// Get the config file path
    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        if let Some(path) = Self::config_path() {
            if let Ok(content) = fs::read_to_string(&path) {
                match serde_json::from_str(&content) {
                    Ok(config) => return config,
                    Err(err) => {
                        preserve_corrupt_config(&path, &content);
                        tracing::warn!(
                            error = %err,
                            path = %path.display(),
                            "config file was corrupted; a backup was saved and defaults were loaded"
                        );
                    }
                }
            }
        }
        Self::default()
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let dir = Self::config_dir().ok_or_else(|| anyhow!("Could not determine config directory"))?;

        fs::create_dir_all(&dir)
            .map_err(|e| anyhow!("Failed to create config directory: {}", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(&dir, fs::Permissions::from_mode(0o700)) {
                tracing::warn!(error = %e, "failed to set config directory permissions");
            }
        }

        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| anyhow!("Failed to serialize config: {}", e))?;

        #[cfg(unix)]
        {
            write_config_atomic(&path, &content)
                .map_err(|e| anyhow!("Failed to write config: {}", e))?;
        }

        #[cfg(not(unix))]
        {
            fs::write(&path, content).map_err(|e| anyhow!("Failed to write config: {}", e))?;
        }

        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn interpreters(&self) -> Interpreters {
        Interpreters {
            python: self.python_bin.clone(),
            node: self.node_bin.clone(),
            ..Interpreters::default()
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(anyhow!("max_attempts must be at least 1"));
        }
        if self.timeout_ms == 0 {
            return Err(anyhow!("timeout_ms must be greater than 0"));
        }
        if self.verify_concurrency == 0 {
            return Err(anyhow!("verify_concurrency must be at least 1"));
        }
        if self.model.trim().is_empty() {
            return Err(anyhow!("model must not be empty"));
        }
        Ok(())
    }

    /// Get the Gemini API key (environment, then keychain, then config file)
    pub fn get_api_key(&self) -> Option<String> {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                return Some(key);
            }
        }

        match read_keyring_key() {
            Ok(Some(key)) => return Some(key),
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(
                    error = %err,
                    "failed to read API key from system keychain; set {} as a workaround",
                    API_KEY_ENV
                );
            }
        }

        self.gemini_api_key.clone()
    }

    /// Store the API key in the keychain and drop any plaintext copy.
    pub fn set_api_key(&mut self, key: &str) -> Result<()> {
        write_keyring_key(key).map_err(|e| {
            anyhow!(
                "Failed to store API key in system keychain: {}. \
                 You can set the {} environment variable instead.",
                e,
                API_KEY_ENV
            )
        })?;

        match read_keyring_key() {
            Ok(Some(stored)) if stored == key => {
                self.gemini_api_key = None;
                self.save()
            }
            Ok(_) => Err(anyhow!(
                "API key verification failed: key was not persisted to keychain. \
                 You can set the {} environment variable instead.",
                API_KEY_ENV
            )),
            Err(e) => Err(anyhow!(
                "API key verification failed: couldn't read back from keychain ({}).",
                e
            )),
        }
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/lazarus/config.json".to_string())
    }
}

fn preserve_corrupt_config(path: &std::path::Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

#[cfg(unix)]
fn write_config_atomic(path: &std::path::Path, content: &str) -> Result<(), String> {
    use std::fs::OpenOptions;
    use std::os::unix::fs::PermissionsExt;

    let tmp_path = path.with_extension("tmp");
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&tmp_path)
        .map_err(|e| e.to_string())?;

    if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
        tracing::warn!(error = %e, "failed to set temp config file permissions");
    }

    file.write_all(content.as_bytes())
        .map_err(|e| e.to_string())?;

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.to_string());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default_matches_reference_constants() {
        let config = Config::default();
        assert_eq!(config.timeout(), Duration::from_secs(5));
        assert_eq!(config.max_attempts, 3);
        assert!(config.gemini_api_key.is_none());
        config.validate().unwrap();
    }

    #[test]
    fn test_partial_config_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"max_attempts": 5}"#).unwrap();
        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.timeout_ms, 5_000);
        assert_eq!(config.legacy_dir, PathBuf::from("legacy_sandbox"));
    }

    #[test]
    fn test_validate_rejects_zero_budgets() {
        let config = Config {
            max_attempts: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let config = Config {
            timeout_ms: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_interpreters_follow_config() {
        let config = Config {
            python_bin: "/opt/py/bin/python3.12".to_string(),
            ..Config::default()
        };
        assert_eq!(config.interpreters().python, "/opt/py/bin/python3.12");
        assert_eq!(config.interpreters().shell, "sh");
    }
}
