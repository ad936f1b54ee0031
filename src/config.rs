//! Settings for fixsweep
//!
//! Stored in `<config_dir>/fixsweep/config.toml`. Environment variables take
//! precedence over the file. A run clones the settings and never mutates them.

use crate::grouping::RepresentativePolicy;
use crate::patterns::fuzzy::DEFAULT_FUZZY_THRESHOLD;
use crate::suggest::llm::Model;
use anyhow::{bail, Context};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::warn;

const CONFIG_DIR_NAME: &str = "fixsweep";
const CONFIG_FILE_NAME: &str = "config.toml";

pub const ENV_LLM_TIMEOUT: &str = "FIXSWEEP_LLM_TIMEOUT";
pub const ENV_BATCH_SIZE: &str = "FIXSWEEP_BATCH_SIZE";
pub const ENV_MAX_CONCURRENCY: &str = "FIXSWEEP_MAX_CONCURRENCY";
pub const ENV_MAX_SUGGESTIONS: &str = "FIXSWEEP_MAX_SUGGESTIONS";

/// Grouping signature used by the pipeline
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FingerprintKind {
    #[default]
    Message,
    Pattern,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Upper bound for one whole batch call, in seconds
    pub llm_timeout_secs: u64,
    /// Representatives per model request
    pub batch_size: usize,
    /// Model requests in flight at once
    pub max_concurrency: usize,
    /// Per-failure cap on final suggestions; 0 means unlimited
    pub max_suggestions_per_failure: usize,
    pub fuzzy_threshold: f64,
    pub min_bulk_count: usize,
    pub representative_policy: RepresentativePolicy,
    pub fingerprint: FingerprintKind,
    pub model: Model,
    /// Extra known patterns merged into the built-in catalogue
    pub pattern_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            llm_timeout_secs: 120,
            batch_size: 10,
            max_concurrency: 4,
            max_suggestions_per_failure: 3,
            fuzzy_threshold: DEFAULT_FUZZY_THRESHOLD,
            min_bulk_count: 2,
            representative_policy: RepresentativePolicy::First,
            fingerprint: FingerprintKind::Message,
            model: Model::Balanced,
            pattern_file: None,
        }
    }
}

impl Settings {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join(CONFIG_DIR_NAME))
    }

    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join(CONFIG_FILE_NAME))
    }

    /// Load from the default location, then apply environment overrides
    pub fn load() -> Self {
        let mut settings = Self::config_path()
            .map(|path| Self::load_from(&path))
            .unwrap_or_default();
        settings.apply_env_overrides(|key| std::env::var(key).ok());
        settings
    }

    /// Missing file gives defaults; a corrupt one is set aside and defaults are used
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match toml::from_str(&content) {
            Ok(settings) => settings,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                warn!(
                    path = %path.display(),
                    "Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                    err
                );
                Self::default()
            }
        }
    }

    /// Override numeric settings from variables returned by `lookup`.
    ///
    /// Unparseable values are ignored with a warning.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = parse_env::<u64>(&lookup, ENV_LLM_TIMEOUT) {
            self.llm_timeout_secs = v;
        }
        if let Some(v) = parse_env::<usize>(&lookup, ENV_BATCH_SIZE) {
            self.batch_size = v;
        }
        if let Some(v) = parse_env::<usize>(&lookup, ENV_MAX_CONCURRENCY) {
            self.max_concurrency = v;
        }
        if let Some(v) = parse_env::<usize>(&lookup, ENV_MAX_SUGGESTIONS) {
            self.max_suggestions_per_failure = v;
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.batch_size == 0 {
            bail!("batch_size must be at least 1");
        }
        if self.max_concurrency == 0 {
            bail!("max_concurrency must be at least 1");
        }
        if self.llm_timeout_secs == 0 {
            bail!("llm_timeout_secs must be at least 1");
        }
        if !(0.0..=1.0).contains(&self.fuzzy_threshold) {
            bail!(
                "fuzzy_threshold must be between 0 and 1 (got {})",
                self.fuzzy_threshold
            );
        }
        Ok(())
    }

    pub fn llm_timeout(&self) -> Duration {
        Duration::from_secs(self.llm_timeout_secs)
    }

    /// Write to `path` (temp file + rename)
    pub fn save_to(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create config directory {}", dir.display()))?;
        }
        let content = toml::to_string_pretty(self).context("Failed to serialize settings")?;
        write_config_atomic(path, &content)
            .with_context(|| format!("Failed to write config {}", path.display()))
    }

    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| format!("~/.config/{}/{}", CONFIG_DIR_NAME, CONFIG_FILE_NAME))
    }
}

fn parse_env<T: std::str::FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &str,
) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("Ignoring {}={:?}: not a valid number", key, raw);
            None
        }
    }
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("toml.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}
