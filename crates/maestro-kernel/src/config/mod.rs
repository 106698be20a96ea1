//! Configuration file loading.
//!
//! Format is detected from the file extension (YAML, TOML or JSON), `${VAR}`
//! and `$VAR` references are substituted from the environment before
//! parsing, and the result is deserialized into any `serde` type. Used for
//! orchestration settings and for model manifests alike.

use std::path::Path;
use std::sync::LazyLock;

use config::{Config as Cfg, Environment, File};
use regex::{Captures, Regex};
use serde::de::DeserializeOwned;

pub use config::FileFormat;

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
}

pub type ConfigResult<T> = Result<T, ConfigError>;

static BRACED_VAR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}").expect("static regex")
});

static BARE_VAR: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)\b").expect("static regex"));

/// Detect configuration format from a file extension.
///
/// `.yaml`/`.yml`, `.toml` and `.json` are supported.
pub fn detect_format(path: impl AsRef<Path>) -> ConfigResult<FileFormat> {
    let path = path.as_ref();
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .ok_or_else(|| {
            ConfigError::UnsupportedFormat(format!("no file extension: {}", path.display()))
        })?;

    match ext.to_ascii_lowercase().as_str() {
        "yaml" | "yml" => Ok(FileFormat::Yaml),
        "toml" => Ok(FileFormat::Toml),
        "json" => Ok(FileFormat::Json),
        _ => Err(ConfigError::UnsupportedFormat(ext.to_string())),
    }
}

/// Whether a path has an extension [`detect_format`] accepts.
pub fn is_supported(path: impl AsRef<Path>) -> bool {
    detect_format(path).is_ok()
}

/// Replace `${VAR}` and `$VAR` with environment values.
///
/// Unset variables are left untouched.
pub fn substitute_env_vars(content: &str) -> String {
    let lookup = |caps: &Captures| std::env::var(&caps[1]).unwrap_or_else(|_| caps[0].to_string());

    let braced = BRACED_VAR.replace_all(content, lookup);
    BARE_VAR.replace_all(&braced, lookup).into_owned()
}

/// Load and deserialize a configuration file.
pub fn load_config<T>(path: impl AsRef<Path>) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let (content, format) = read_source(path.as_ref())?;
    build(&content, format, None)
}

/// Deserialize configuration text in an explicit format.
pub fn from_str<T>(content: &str, format: FileFormat) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    build(content, format, None)
}

/// Load a file, then let `PREFIX_SECTION__KEY` variables override it.
///
/// `MAESTRO_API__MAX_RETRIES=5` sets `api.max_retries` for prefix `MAESTRO`.
pub fn load_with_env<T>(path: impl AsRef<Path>, env_prefix: &str) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let (content, format) = read_source(path.as_ref())?;
    build(&content, format, Some(env_prefix))
}

fn read_source(path: &Path) -> ConfigResult<(String, FileFormat)> {
    let format = detect_format(path)?;
    Ok((std::fs::read_to_string(path)?, format))
}

fn build<T>(content: &str, format: FileFormat, env_prefix: Option<&str>) -> ConfigResult<T>
where
    T: DeserializeOwned,
{
    let mut builder = Cfg::builder().add_source(File::from_str(&substitute_env_vars(content), format));
    if let Some(prefix) = env_prefix {
        builder = builder.add_source(
            Environment::with_prefix(prefix)
                .prefix_separator("_")
                .separator("__")
                .try_parsing(true),
        );
    }

    builder
        .build()
        .map_err(|e| ConfigError::Parse(e.to_string()))?
        .try_deserialize()
        .map_err(|e| ConfigError::Serialization(e.to_string()))
}

#[cfg(test)]
mod tests;
