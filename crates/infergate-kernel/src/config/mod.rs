//! Configuration loading.
//!
//! Files are parsed with the `config` crate in any of YAML, TOML, JSON, INI,
//! RON or JSON5 (detected from the extension). `${VAR}` and `$VAR`
//! references are replaced from the process environment before parsing, and
//! `PREFIX__SECTION__KEY` variables override file values.

use config::{Config as Cfg, ConfigBuilder, Environment, File, builder::DefaultState};
use regex::Regex;
use serde::de::DeserializeOwned;
use std::path::Path;
use std::sync::LazyLock;

#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Config parsing error: {0}")]
    Parse(String),

    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The configuration parsed but holds values that cannot work together.
    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

pub use config::FileFormat;

static BRACED_VAR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").ok());
static BARE_VAR: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").ok());

/// Detect the file format from its extension.
pub fn detect_format(path: &str) -> ConfigResult<FileFormat> {
    let ext = Path::new(path)
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| ConfigError::UnsupportedFormat("No file extension found".to_string()))?;

    match ext.to_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        "ini" => Ok(FileFormat::Ini),
        "ron" => Ok(FileFormat::Ron),
        "json5" => Ok(FileFormat::Json5),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Replace `${VAR}` then `$VAR` references with environment values.
///
/// Unknown variables are left untouched.
pub fn substitute_env_vars(content: &str) -> String {
    let mut result = content.to_string();
    for re in [&*BRACED_VAR, &*BARE_VAR].into_iter().flatten() {
        result = re
            .replace_all(&result, |caps: &regex::Captures| {
                std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string())
            })
            .into_owned();
    }
    result
}

fn read_source(path: &str) -> ConfigResult<File<config::FileSourceString, FileFormat>> {
    let format = detect_format(path)?;
    let content = std::fs::read_to_string(path)?;
    Ok(File::from_str(&substitute_env_vars(&content), format))
}

fn finish<T: DeserializeOwned>(builder: ConfigBuilder<DefaultState>) -> ConfigResult<T> {
    builder
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

/// Load a single file.
pub fn load_config<T: DeserializeOwned>(path: &str) -> ConfigResult<T> {
    finish(Cfg::builder().add_source(read_source(path)?))
}

/// Parse a string in an explicit format.
pub fn from_str<T: DeserializeOwned>(content: &str, format: FileFormat) -> ConfigResult<T> {
    finish(Cfg::builder().add_source(File::from_str(&substitute_env_vars(content), format)))
}

/// Layer several in-memory sources; later ones win.
pub fn merge_configs<T: DeserializeOwned>(sources: &[(&str, FileFormat)]) -> ConfigResult<T> {
    let builder = sources
        .iter()
        .fold(Cfg::builder(), |builder, (content, format)| {
            builder.add_source(File::from_str(&substitute_env_vars(content), *format))
        });
    finish(builder)
}

/// Layer several files; later ones win.
pub fn load_merged<T: DeserializeOwned>(paths: &[&str]) -> ConfigResult<T> {
    let mut builder = Cfg::builder();
    for path in paths {
        builder = builder.add_source(read_source(path)?);
    }
    finish(builder)
}

/// Load a file, then apply `PREFIX__SECTION__KEY` environment overrides.
///
/// For a field `telemetry.queue_capacity` and prefix `INFERGATE` the
/// variable is `INFERGATE__TELEMETRY__QUEUE_CAPACITY`.
pub fn load_with_env<T: DeserializeOwned>(path: &str, env_prefix: &str) -> ConfigResult<T> {
    finish(
        Cfg::builder()
            .add_source(read_source(path)?)
            .add_source(
                Environment::with_prefix(env_prefix)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            ),
    )
}

/// Environment overrides only, on top of the type's serde defaults.
pub fn from_env<T: DeserializeOwned>(env_prefix: &str) -> ConfigResult<T> {
    finish(
        Cfg::builder().add_source(
            Environment::with_prefix(env_prefix)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        ),
    )
}
