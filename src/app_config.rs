//! File configuration for CLI defaults.
//!
//! The file holds flat `key = value` lines; strings are double-quoted and
//! `#` starts a comment outside of strings.

use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use bibresolve_core::KeyPattern;

/// Defaults read from `config.toml`. Command-line flags win over these.
#[derive(Debug, Clone, Default)]
pub struct FileConfig {
    pub concurrency: Option<u8>,
    pub max_retries: Option<u8>,
    /// Requests per second per source.
    pub rate: Option<u32>,
    pub fetch_timeout_secs: Option<u64>,
    pub batch_timeout_secs: Option<u64>,
    pub cache_db: Option<PathBuf>,
    pub l1_capacity: Option<u64>,
    pub l1_ttl_secs: Option<u64>,
    pub l2_ttl_secs: Option<u64>,
    pub key_pattern: Option<KeyPattern>,
    pub mailto: Option<String>,
    /// Source names in the order they are tried.
    pub sources: Option<Vec<String>>,
    pub verbosity: Option<VerbositySetting>,
}

impl FileConfig {
    /// Validates values against the same ranges the CLI accepts.
    pub fn validate(&self) -> Result<()> {
        if let Some(concurrency) = self.concurrency
            && !(1..=100).contains(&concurrency)
        {
            bail!("Invalid config value for `concurrency`: {concurrency}. Expected range: 1..=100");
        }
        if let Some(retries) = self.max_retries
            && retries > 10
        {
            bail!("Invalid config value for `max_retries`: {retries}. Expected range: 0..=10");
        }
        if let Some(rate) = self.rate
            && rate > 1000
        {
            bail!("Invalid config value for `rate`: {rate}. Expected range: 0..=1000");
        }
        if let Some(secs) = self.fetch_timeout_secs
            && !(1..=300).contains(&secs)
        {
            bail!("Invalid config value for `fetch_timeout_secs`: {secs}. Expected range: 1..=300");
        }
        validate_positive("batch_timeout_secs", self.batch_timeout_secs)?;
        validate_positive("l1_capacity", self.l1_capacity)?;
        validate_positive("l1_ttl_secs", self.l1_ttl_secs)?;
        validate_positive("l2_ttl_secs", self.l2_ttl_secs)?;
        if let Some(mailto) = &self.mailto
            && !mailto.contains('@')
        {
            bail!("Invalid config value for `mailto`: '{mailto}' is not an email address");
        }
        if let Some(sources) = &self.sources
            && sources.is_empty()
        {
            bail!("Invalid config value for `sources`: list at least one source");
        }
        Ok(())
    }
}

fn validate_positive(field: &str, value: Option<u64>) -> Result<()> {
    if value == Some(0) {
        bail!("Invalid config value for `{field}`: 0. Expected a positive integer");
    }
    Ok(())
}

/// Supported config verbosity labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerbositySetting {
    Default,
    Verbose,
    Quiet,
    Debug,
}

impl VerbositySetting {
    /// Log filter used when neither `RUST_LOG` nor `-v`/`-q` is given.
    #[must_use]
    pub fn log_level(self) -> &'static str {
        match self {
            Self::Default => "info",
            Self::Verbose => "debug",
            Self::Quiet => "error",
            Self::Debug => "trace",
        }
    }
}

/// Loaded config metadata.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    /// Resolved config path if a base directory is known.
    pub path: Option<PathBuf>,
    /// Parsed config, or defaults when no file exists.
    pub config: FileConfig,
    pub loaded_from_file: bool,
}

/// Resolves default config path.
///
/// Priority:
/// 1. `$XDG_CONFIG_HOME/bibresolve/config.toml`
/// 2. `$HOME/.config/bibresolve/config.toml`
#[must_use]
pub fn resolve_default_config_path() -> Option<PathBuf> {
    if let Some(xdg_config_home) = env_var_non_empty_os("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg_config_home).join("bibresolve").join("config.toml"));
    }

    let home = env_var_non_empty_os("HOME")?;
    Some(
        PathBuf::from(home)
            .join(".config")
            .join("bibresolve")
            .join("config.toml"),
    )
}

fn env_var_non_empty_os(name: &str) -> Option<std::ffi::OsString> {
    let value = env::var_os(name)?;
    if value.is_empty() { None } else { Some(value) }
}

/// Loads config from the default path if present.
pub fn load_default_file_config() -> Result<LoadedConfig> {
    let path = resolve_default_config_path();
    match path.as_deref() {
        Some(path_ref) if path_ref.exists() => {
            let config = load_file_config(path_ref)?;
            Ok(LoadedConfig {
                path,
                config,
                loaded_from_file: true,
            })
        }
        _ => Ok(LoadedConfig {
            path,
            config: FileConfig::default(),
            loaded_from_file: false,
        }),
    }
}

/// Loads config from an explicit path, which must exist.
pub fn load_file_config(path: &Path) -> Result<FileConfig> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file '{}'", path.display()))?;
    parse_config_str(&raw)
        .with_context(|| format!("Failed to parse config file '{}'", path.display()))
}

fn parse_config_str(raw: &str) -> Result<FileConfig> {
    let mut cfg = FileConfig::default();
    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = strip_inline_comment(raw_line).trim();
        if line.is_empty() {
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            bail!(
                "Invalid config syntax on line {}: expected key = value",
                line_index + 1
            );
        };

        let key = raw_key.trim();
        let value = raw_value.trim();
        let context = || format!("Invalid `{key}` value on line {}", line_index + 1);

        match key {
            "concurrency" => cfg.concurrency = Some(parse_integer_u8(value).with_context(context)?),
            "max_retries" => cfg.max_retries = Some(parse_integer_u8(value).with_context(context)?),
            "rate" => {
                let parsed = parse_integer_u64(value).with_context(context)?;
                cfg.rate = Some(u32::try_from(parsed).with_context(context)?);
            }
            "fetch_timeout_secs" => {
                cfg.fetch_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "batch_timeout_secs" => {
                cfg.batch_timeout_secs = Some(parse_integer_u64(value).with_context(context)?);
            }
            "cache_db" => {
                cfg.cache_db = Some(PathBuf::from(parse_string_literal(value).with_context(context)?));
            }
            "l1_capacity" => cfg.l1_capacity = Some(parse_integer_u64(value).with_context(context)?),
            "l1_ttl_secs" => cfg.l1_ttl_secs = Some(parse_integer_u64(value).with_context(context)?),
            "l2_ttl_secs" => cfg.l2_ttl_secs = Some(parse_integer_u64(value).with_context(context)?),
            "key_pattern" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.key_pattern = Some(
                    parsed
                        .parse::<KeyPattern>()
                        .map_err(anyhow::Error::msg)
                        .with_context(context)?,
                );
            }
            "mailto" => cfg.mailto = Some(parse_string_literal(value).with_context(context)?),
            "sources" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.sources = Some(
                    parsed
                        .split(',')
                        .map(str::trim)
                        .filter(|name| !name.is_empty())
                        .map(ToString::to_string)
                        .collect(),
                );
            }
            "verbosity" => {
                let parsed = parse_string_literal(value).with_context(context)?;
                cfg.verbosity = Some(parse_verbosity(&parsed).with_context(|| {
                    format!(
                        "Invalid `verbosity` value '{}' on line {}",
                        parsed,
                        line_index + 1
                    )
                })?);
            }
            unknown => {
                bail!(
                    "Unknown configuration key: '{}' on line {}",
                    unknown,
                    line_index + 1
                );
            }
        }
    }
    cfg.validate()?;
    Ok(cfg)
}

fn strip_inline_comment(line: &str) -> &str {
    let mut in_string = false;
    for (index, ch) in line.char_indices() {
        match ch {
            '"' => in_string = !in_string,
            '#' if !in_string => return &line[..index],
            _ => {}
        }
    }
    line
}

fn parse_string_literal(raw_value: &str) -> Result<String> {
    if raw_value.len() < 2 || !raw_value.starts_with('"') || !raw_value.ends_with('"') {
        bail!("Expected double-quoted string");
    }
    Ok(raw_value[1..raw_value.len() - 1].to_string())
}

fn parse_integer_u8(raw_value: &str) -> Result<u8> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<u16>()?;
    u8::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u8"))
}

fn parse_integer_u64(raw_value: &str) -> Result<u64> {
    let token = raw_value.trim();
    if token.is_empty() {
        bail!("Expected integer value");
    }
    let value = token.parse::<i128>()?;
    if value < 0 {
        bail!("Expected non-negative integer");
    }
    u64::try_from(value).map_err(|_| anyhow::anyhow!("Integer value out of range for u64"))
}

fn parse_verbosity(value: &str) -> Result<VerbositySetting> {
    match value {
        "default" => Ok(VerbositySetting::Default),
        "verbose" => Ok(VerbositySetting::Verbose),
        "quiet" => Ok(VerbositySetting::Quiet),
        "debug" => Ok(VerbositySetting::Debug),
        _ => bail!("Expected one of: default, verbose, quiet, debug"),
    }
}
