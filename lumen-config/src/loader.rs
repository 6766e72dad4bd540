use std::{
    env, fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, anyhow};
use lumen_model::ByteSize;

use crate::models::LumenConfig;

pub const CONFIG_PATH_ENV: &str = "LUMEN_CONFIG_PATH";
pub const CONFIG_JSON_ENV: &str = "LUMEN_CONFIG_JSON";
pub const CACHE_BUDGET_MIB_ENV: &str = "LUMEN_CACHE_BUDGET_MIB";
pub const BATCH_SIZE_ENV: &str = "LUMEN_BATCH_SIZE";
pub const SNAPSHOT_PATH_ENV: &str = "LUMEN_SNAPSHOT_PATH";

const DEFAULT_FILES: &[&str] = &[
    "lumen.toml",
    "lumen.json",
    "config/lumen.toml",
    "config/lumen.json",
];

/// Where the loaded configuration came from.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ConfigSource {
    #[default]
    Default,
    EnvPath(PathBuf),
    EnvInline,
    File(PathBuf),
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => f.write_str("built-in defaults"),
            ConfigSource::EnvPath(path) => {
                write!(f, "{} (from ${CONFIG_PATH_ENV})", path.display())
            }
            ConfigSource::EnvInline => write!(f, "${CONFIG_JSON_ENV}"),
            ConfigSource::File(path) => write!(f, "{}", path.display()),
        }
    }
}

impl LumenConfig {
    /// Load configuration using the process environment and working
    /// directory.
    ///
    /// Evaluation order:
    /// 1) `$LUMEN_CONFIG_PATH` (TOML or JSON file),
    /// 2) `$LUMEN_CONFIG_JSON` (inline JSON),
    /// 3) `lumen.toml` / `lumen.json`, also under `config/`,
    /// 4) defaults.
    ///
    /// Single-value overrides (`$LUMEN_CACHE_BUDGET_MIB`, `$LUMEN_BATCH_SIZE`,
    /// `$LUMEN_SNAPSHOT_PATH`) are applied on top of whichever source won.
    pub fn load_from_env() -> anyhow::Result<(Self, ConfigSource)> {
        Self::load_with(|key| env::var(key).ok(), Path::new("."))
    }

    /// [`Self::load_from_env`] with an explicit variable lookup and base
    /// directory for the default file search.
    pub fn load_with(
        lookup: impl Fn(&str) -> Option<String>,
        base_dir: &Path,
    ) -> anyhow::Result<(Self, ConfigSource)> {
        let var = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let (mut config, source) = if let Some(path) = var(CONFIG_PATH_ENV) {
            let path = PathBuf::from(path);
            (Self::load_from_file(&path)?, ConfigSource::EnvPath(path))
        } else if let Some(raw) = var(CONFIG_JSON_ENV) {
            let parsed = Self::parse_json(&raw)
                .with_context(|| format!("failed to parse {CONFIG_JSON_ENV}"))?;
            (parsed, ConfigSource::EnvInline)
        } else if let Some(path) = Self::find_default_file(base_dir) {
            (Self::load_from_file(&path)?, ConfigSource::File(path))
        } else {
            (Self::default(), ConfigSource::Default)
        };

        config.apply_overrides(var)?;
        tracing::debug!(source = %source, "loaded configuration");
        Ok((config, source))
    }

    fn apply_overrides(
        &mut self,
        var: impl Fn(&str) -> Option<String>,
    ) -> anyhow::Result<()> {
        if let Some(raw) = var(CACHE_BUDGET_MIB_ENV) {
            let mib: u64 = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid {CACHE_BUDGET_MIB_ENV}: {raw}"))?;
            self.cache.budget = ByteSize::from_mib(mib);
        }
        if let Some(raw) = var(BATCH_SIZE_ENV) {
            self.scheduler.batch_size = raw
                .trim()
                .parse()
                .with_context(|| format!("invalid {BATCH_SIZE_ENV}: {raw}"))?;
        }
        if let Some(raw) = var(SNAPSHOT_PATH_ENV) {
            self.snapshot.path = Some(PathBuf::from(raw));
        }
        Ok(())
    }

    pub fn load_from_file(path: &Path) -> anyhow::Result<Self> {
        let contents = fs::read_to_string(path).with_context(|| {
            format!("failed to read lumen config from {}", path.display())
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => Self::parse_json(&contents)
                .with_context(|| format!("invalid lumen config {}", path.display())),
            Some("toml") => toml::from_str(&contents).map_err(|err| {
                anyhow!("invalid lumen config {}: {}", path.display(), err)
            }),
            _ => Self::parse_from_str(&contents, &path.display().to_string()),
        }
    }

    pub fn parse_from_str(contents: &str, origin: &str) -> anyhow::Result<Self> {
        // TOML first, then JSON.
        toml::from_str(contents).or_else(|toml_err| {
            serde_json::from_str(contents).map_err(|json_err| {
                anyhow!(
                    "failed to parse lumen config {}: toml error: {}; json error: {}",
                    origin,
                    toml_err,
                    json_err
                )
            })
        })
    }

    pub fn parse_json(raw: &str) -> anyhow::Result<Self> {
        serde_json::from_str(raw).map_err(|err| anyhow!("invalid lumen config json: {err}"))
    }

    fn find_default_file(base_dir: &Path) -> Option<PathBuf> {
        DEFAULT_FILES
            .iter()
            .map(|candidate| base_dir.join(candidate))
            .find(|path| path.exists())
    }
}
