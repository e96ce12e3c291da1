use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use toml::Value;

use crate::fuzzy::{DEFAULT_MAX_RESULTS, DEFAULT_MIN_SCORE, MatchConfig};

pub const DEFAULT_BASE_URL: &str = "https://api.plane.so";

pub const ENV_BASE_URL: &str = "PLANE_BASE_URL";
pub const ENV_WORKSPACE: &str = "PLANE_WORKSPACE";
pub const ENV_MIN_SCORE: &str = "PLANETOOL_FUZZY_MIN_SCORE";
pub const ENV_MAX_RESULTS: &str = "PLANETOOL_FUZZY_MAX_RESULTS";

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PlaneToolConfig {
    #[serde(default)]
    pub plane: PlaneSection,
    #[serde(default)]
    pub fuzzy: FuzzySection,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct PlaneSection {
    pub base_url: Option<String>,
    pub workspace: Option<String>,
    pub default_project: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct FuzzySection {
    pub min_score: Option<i64>,
    pub max_results: Option<usize>,
}

impl PlaneToolConfig {
    /// Resolve the API base URL: env PLANE_BASE_URL > config > DEFAULT_BASE_URL.
    pub fn base_url(&self) -> String {
        self.base_url_with_lookup(process_env)
    }

    /// Resolve the workspace slug: env PLANE_WORKSPACE > config > None.
    pub fn workspace(&self) -> Option<String> {
        self.workspace_with_lookup(process_env)
    }

    pub fn default_project(&self) -> Option<&str> {
        self.plane.default_project.as_deref()
    }

    /// Matcher settings: env > `[fuzzy]` > defaults. Command-line flags are
    /// layered on top by the caller.
    pub fn match_config(&self) -> Result<MatchConfig> {
        self.match_config_with_lookup(process_env)
    }

    fn base_url_with_lookup<F>(&self, lookup_env: F) -> String
    where
        F: Fn(&str) -> Option<String>,
    {
        env_value(&lookup_env, ENV_BASE_URL)
            .or_else(|| self.plane.base_url.clone())
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string())
    }

    fn workspace_with_lookup<F>(&self, lookup_env: F) -> Option<String>
    where
        F: Fn(&str) -> Option<String>,
    {
        env_value(&lookup_env, ENV_WORKSPACE).or_else(|| self.plane.workspace.clone())
    }

    fn match_config_with_lookup<F>(&self, lookup_env: F) -> Result<MatchConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let min_score = match env_value(&lookup_env, ENV_MIN_SCORE) {
            Some(value) => value
                .parse::<i64>()
                .with_context(|| format!("{ENV_MIN_SCORE} must be an integer, got '{value}'"))?,
            None => self
                .fuzzy
                .min_score
                .unwrap_or(i64::from(DEFAULT_MIN_SCORE)),
        };
        let max_results = match env_value(&lookup_env, ENV_MAX_RESULTS) {
            Some(value) => value.parse::<usize>().with_context(|| {
                format!("{ENV_MAX_RESULTS} must be a non-negative integer, got '{value}'")
            })?,
            None => self.fuzzy.max_results.unwrap_or(DEFAULT_MAX_RESULTS),
        };
        Ok(MatchConfig::new(min_score, max_results))
    }
}

fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn env_value<F>(lookup_env: &F, key: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup_env(key)
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

/// Load and parse a PlaneToolConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<PlaneToolConfig> {
    if !config_path.exists() {
        return Ok(PlaneToolConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: PlaneToolConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

#[derive(Debug, Clone, Default)]
pub struct ConfigPatch {
    pub set_base_url: Option<String>,
    pub set_workspace: Option<String>,
    pub set_default_project: Option<String>,
    pub set_min_score: Option<i64>,
    pub set_max_results: Option<usize>,
}

impl ConfigPatch {
    pub fn is_empty(&self) -> bool {
        self.set_base_url.is_none()
            && self.set_workspace.is_none()
            && self.set_default_project.is_none()
            && self.set_min_score.is_none()
            && self.set_max_results.is_none()
    }
}

/// Update selected keys under `[plane]` and `[fuzzy]` while preserving all
/// other config sections. Returns `true` when a write occurred.
pub fn patch_config(config_path: &Path, patch: &ConfigPatch) -> Result<bool> {
    if patch.is_empty() {
        return Ok(false);
    }
    if let Some(min_score) = patch.set_min_score
        && !(0..=100).contains(&min_score)
    {
        bail!("min_score must be between 0 and 100, got {min_score}");
    }

    let mut root = if config_path.exists() {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("failed to read {}", config_path.display()))?;
        toml::from_str::<Value>(&content)
            .with_context(|| format!("failed to parse {}", config_path.display()))?
    } else {
        Value::Table(Default::default())
    };
    let original = root.clone();

    let root_table = root.as_table_mut().ok_or_else(|| {
        anyhow::anyhow!(
            "top-level TOML must be a table in {}",
            config_path.display()
        )
    })?;

    let plane_table = section_table(root_table, "plane", config_path)?;
    for (key, value) in [
        ("base_url", &patch.set_base_url),
        ("workspace", &patch.set_workspace),
        ("default_project", &patch.set_default_project),
    ] {
        if let Some(value) = value {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                plane_table.remove(key);
            } else {
                plane_table.insert(key.to_string(), Value::String(trimmed.to_string()));
            }
        }
    }

    let fuzzy_table = section_table(root_table, "fuzzy", config_path)?;
    if let Some(min_score) = patch.set_min_score {
        fuzzy_table.insert("min_score".to_string(), Value::Integer(min_score));
    }
    if let Some(max_results) = patch.set_max_results {
        let max_results = i64::try_from(max_results).context("max_results is too large")?;
        fuzzy_table.insert("max_results".to_string(), Value::Integer(max_results));
    }

    if root == original {
        return Ok(false);
    }

    let parent = config_path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("config path has no parent: {}", config_path.display()))?;
    fs::create_dir_all(parent).with_context(|| format!("failed to create {}", parent.display()))?;
    let rendered = toml::to_string_pretty(&root).context("failed to serialize config TOML")?;
    fs::write(config_path, rendered)
        .with_context(|| format!("failed to write {}", config_path.display()))?;
    Ok(true)
}

fn section_table<'a>(
    root_table: &'a mut toml::map::Map<String, Value>,
    name: &str,
    config_path: &Path,
) -> Result<&'a mut toml::map::Map<String, Value>> {
    root_table
        .entry(name.to_string())
        .or_insert_with(|| Value::Table(Default::default()))
        .as_table_mut()
        .ok_or_else(|| anyhow::anyhow!("[{name}] must be a table in {}", config_path.display()))
}
