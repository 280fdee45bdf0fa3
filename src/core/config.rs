//! Layered configuration for the search backend
//!
//! Sources, lowest to highest precedence:
//! 1. `config.json`
//! 2. `config.local.json` next to it (optional, usually holds the API key)
//! 3. `GROK_*` environment variables, captured once at startup
//! 4. explicit command-line overrides
//!
//! Each source only overrides the keys it actually sets.

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const DEFAULT_MODEL: &str = "grok-2-latest";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 60;
pub const LOCAL_CONFIG_FILE: &str = "config.local.json";

pub const ENV_BASE_URL: &str = "GROK_BASE_URL";
pub const ENV_API_KEY: &str = "GROK_API_KEY";
pub const ENV_MODEL: &str = "GROK_MODEL";
pub const ENV_TIMEOUT_SECONDS: &str = "GROK_TIMEOUT_SECONDS";
pub const ENV_SYSTEM_PROMPT: &str = "GROK_SYSTEM_PROMPT";
pub const ENV_EXTRA_BODY_JSON: &str = "GROK_EXTRA_BODY_JSON";
pub const ENV_EXTRA_HEADERS_JSON: &str = "GROK_EXTRA_HEADERS_JSON";

const ENV_KEYS: [&str; 7] = [
    ENV_BASE_URL,
    ENV_API_KEY,
    ENV_MODEL,
    ENV_TIMEOUT_SECONDS,
    ENV_SYSTEM_PROMPT,
    ENV_EXTRA_BODY_JSON,
    ENV_EXTRA_HEADERS_JSON,
];

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required setting `{field}` (set it in config.json, config.local.json, {env} or {flag})")]
    Missing {
        field: &'static str,
        env: &'static str,
        flag: &'static str,
    },

    #[error("failed to read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{} is not valid config JSON: {source}", .path.display())]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{} must contain a JSON object", .path.display())]
    NotAnObject { path: PathBuf },

    #[error("{origin}: timeoutSeconds must be a positive integer, got `{value}`")]
    InvalidTimeout { origin: String, value: String },

    #[error("{origin} must be a JSON object: {detail}")]
    InvalidMapping { origin: String, detail: String },
}

/// One configuration source, every key optional.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConfigLayer {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub system_prompt: Option<String>,
    pub extra_body: Option<Map<String, Value>>,
    pub extra_headers: Option<Map<String, Value>>,
}

/// On-disk shape of `config.json` / `config.local.json`.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileConfig {
    #[serde(default, alias = "base_url")]
    base_url: Option<String>,
    #[serde(default, alias = "api_key")]
    api_key: Option<String>,
    #[serde(default)]
    model: Option<String>,
    #[serde(default, alias = "timeout_seconds")]
    timeout_seconds: Option<Value>,
    #[serde(default, alias = "system_prompt")]
    system_prompt: Option<String>,
    #[serde(default, alias = "extra_body")]
    extra_body: Option<Map<String, Value>>,
    #[serde(default, alias = "extra_headers")]
    extra_headers: Option<Map<String, Value>>,
}

impl ConfigLayer {
    /// Load a config file. A missing file is an empty layer.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let value: Value =
            serde_json::from_str(&content).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;
        if !value.is_object() {
            return Err(ConfigError::NotAnObject {
                path: path.to_path_buf(),
            });
        }
        let file: FileConfig =
            serde_json::from_value(value).map_err(|source| ConfigError::Malformed {
                path: path.to_path_buf(),
                source,
            })?;

        let origin = path.display().to_string();
        let timeout_seconds = match file.timeout_seconds {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(parse_timeout(&origin, &s)?),
            Some(Value::Number(n)) => Some(parse_timeout(&origin, &n.to_string())?),
            Some(other) => {
                return Err(ConfigError::InvalidTimeout {
                    origin,
                    value: other.to_string(),
                })
            }
        };

        Ok(Self {
            base_url: file.base_url,
            api_key: file.api_key,
            model: file.model,
            timeout_seconds,
            system_prompt: file.system_prompt,
            extra_body: file.extra_body,
            extra_headers: file.extra_headers,
        })
    }

    /// Apply `other` on top of `self`, key by key.
    pub fn merge(&mut self, other: ConfigLayer) {
        if other.base_url.is_some() {
            self.base_url = other.base_url;
        }
        if other.api_key.is_some() {
            self.api_key = other.api_key;
        }
        if other.model.is_some() {
            self.model = other.model;
        }
        if other.timeout_seconds.is_some() {
            self.timeout_seconds = other.timeout_seconds;
        }
        if other.system_prompt.is_some() {
            self.system_prompt = other.system_prompt;
        }
        merge_mapping(&mut self.extra_body, other.extra_body);
        merge_mapping(&mut self.extra_headers, other.extra_headers);
    }

    /// Validate the merged layers into the final configuration.
    pub fn finish(self) -> Result<EffectiveConfig, ConfigError> {
        let base_url = required(self.base_url).ok_or(ConfigError::Missing {
            field: "baseUrl",
            env: ENV_BASE_URL,
            flag: "--base-url",
        })?;
        let api_key = required(self.api_key).ok_or(ConfigError::Missing {
            field: "apiKey",
            env: ENV_API_KEY,
            flag: "--api-key",
        })?;

        Ok(EffectiveConfig {
            base_url,
            api_key,
            model: required(self.model).unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            timeout_seconds: self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            system_prompt: self.system_prompt.filter(|p| !p.trim().is_empty()),
            extra_body: self.extra_body.unwrap_or_default(),
            extra_headers: self.extra_headers.unwrap_or_default(),
        })
    }
}

fn required(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn merge_mapping(base: &mut Option<Map<String, Value>>, other: Option<Map<String, Value>>) {
    if let Some(other) = other {
        base.get_or_insert_with(Map::new).extend(other);
    }
}

fn parse_timeout(origin: &str, raw: &str) -> Result<u64, ConfigError> {
    match raw.trim().parse::<u64>() {
        Ok(secs) if secs > 0 => Ok(secs),
        _ => Err(ConfigError::InvalidTimeout {
            origin: origin.to_string(),
            value: raw.to_string(),
        }),
    }
}

fn parse_mapping(origin: &str, raw: &str) -> Result<Map<String, Value>, ConfigError> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(ConfigError::InvalidMapping {
            origin: origin.to_string(),
            detail: format!("got {}", json_type_name(&other)),
        }),
        Err(e) => Err(ConfigError::InvalidMapping {
            origin: origin.to_string(),
            detail: e.to_string(),
        }),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

/// Raw `GROK_*` variables captured at startup. Parsed on every resolve so a
/// bad value surfaces as a tool error instead of aborting the server.
#[derive(Debug, Clone, Default)]
pub struct EnvSnapshot {
    vars: BTreeMap<String, String>,
}

impl EnvSnapshot {
    pub fn capture() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let vars = ENV_KEYS
            .iter()
            .filter_map(|key| lookup(key).map(|value| (key.to_string(), value)))
            .collect();
        Self { vars }
    }

    #[cfg(test)]
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Self {
        let pairs: BTreeMap<String, String> = pairs
            .into_iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self::from_lookup(|key| pairs.get(key).cloned())
    }

    /// Names of the recognised variables that are set and non-empty.
    pub fn set_keys(&self) -> Vec<&'static str> {
        ENV_KEYS
            .iter()
            .copied()
            .filter(|key| self.get(key).is_some())
            .collect()
    }

    /// Empty values count as unset.
    fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|v| !v.trim().is_empty())
    }

    pub fn to_layer(&self) -> Result<ConfigLayer, ConfigError> {
        Ok(ConfigLayer {
            base_url: self.get(ENV_BASE_URL).map(str::to_string),
            api_key: self.get(ENV_API_KEY).map(str::to_string),
            model: self.get(ENV_MODEL).map(str::to_string),
            timeout_seconds: self
                .get(ENV_TIMEOUT_SECONDS)
                .map(|raw| parse_timeout(ENV_TIMEOUT_SECONDS, raw))
                .transpose()?,
            system_prompt: self.get(ENV_SYSTEM_PROMPT).map(str::to_string),
            extra_body: self
                .get(ENV_EXTRA_BODY_JSON)
                .map(|raw| parse_mapping(ENV_EXTRA_BODY_JSON, raw))
                .transpose()?,
            extra_headers: self
                .get(ENV_EXTRA_HEADERS_JSON)
                .map(|raw| parse_mapping(ENV_EXTRA_HEADERS_JSON, raw))
                .transpose()?,
        })
    }
}

/// Explicit overrides given on the command line at process start.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub timeout_seconds: Option<String>,
    pub system_prompt: Option<String>,
    pub extra_body_json: Option<String>,
    pub extra_headers_json: Option<String>,
}

impl ConfigOverrides {
    pub fn to_layer(&self) -> Result<ConfigLayer, ConfigError> {
        Ok(ConfigLayer {
            base_url: self.base_url.clone(),
            api_key: self.api_key.clone(),
            model: self.model.clone(),
            timeout_seconds: self
                .timeout_seconds
                .as_deref()
                .map(|raw| parse_timeout("--timeout-seconds", raw))
                .transpose()?,
            system_prompt: self.system_prompt.clone(),
            extra_body: self
                .extra_body_json
                .as_deref()
                .map(|raw| parse_mapping("--extra-body-json", raw))
                .transpose()?,
            extra_headers: self
                .extra_headers_json
                .as_deref()
                .map(|raw| parse_mapping("--extra-headers-json", raw))
                .transpose()?,
        })
    }
}

/// Merges the four sources into an [`EffectiveConfig`].
///
/// The environment snapshot and overrides are fixed at construction. Files are
/// re-read on each call so a fixed config takes effect without a restart.
#[derive(Debug, Clone)]
pub struct ConfigResolver {
    config_path: PathBuf,
    env: EnvSnapshot,
    overrides: ConfigOverrides,
}

impl ConfigResolver {
    pub fn new(config_path: impl Into<PathBuf>, env: EnvSnapshot, overrides: ConfigOverrides) -> Self {
        Self {
            config_path: config_path.into(),
            env,
            overrides,
        }
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn local_config_path(&self) -> PathBuf {
        self.config_path.with_file_name(LOCAL_CONFIG_FILE)
    }

    pub fn env(&self) -> &EnvSnapshot {
        &self.env
    }

    pub fn resolve(&self) -> Result<EffectiveConfig, ConfigError> {
        let mut merged = ConfigLayer::from_file(&self.config_path)?;
        merged.merge(ConfigLayer::from_file(&self.local_config_path())?);
        merged.merge(self.env.to_layer()?);
        merged.merge(self.overrides.to_layer()?);
        merged.finish()
    }
}

/// Final settings for one search invocation. Never mutated once built.
#[derive(Clone, PartialEq)]
pub struct EffectiveConfig {
    pub base_url: String,
    pub api_key: String,
    pub model: String,
    pub timeout_seconds: u64,
    pub system_prompt: Option<String>,
    pub extra_body: Map<String, Value>,
    pub extra_headers: Map<String, Value>,
}

impl EffectiveConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }

    pub fn masked_api_key(&self) -> String {
        mask_secret(&self.api_key)
    }

    /// Replace every occurrence of the API key in `text`.
    pub fn redact(&self, text: &str) -> String {
        redact_secret(text, &self.api_key)
    }

    /// The `GROK_*` variables handed to the search subprocess.
    pub fn env_vars(&self) -> Vec<(&'static str, String)> {
        let mut vars = vec![
            (ENV_BASE_URL, self.base_url.clone()),
            (ENV_API_KEY, self.api_key.clone()),
            (ENV_MODEL, self.model.clone()),
            (ENV_TIMEOUT_SECONDS, self.timeout_seconds.to_string()),
        ];
        if let Some(prompt) = &self.system_prompt {
            vars.push((ENV_SYSTEM_PROMPT, prompt.clone()));
        }
        if !self.extra_body.is_empty() {
            vars.push((ENV_EXTRA_BODY_JSON, Value::Object(self.extra_body.clone()).to_string()));
        }
        if !self.extra_headers.is_empty() {
            vars.push((
                ENV_EXTRA_HEADERS_JSON,
                Value::Object(self.extra_headers.clone()).to_string(),
            ));
        }
        vars
    }
}

impl fmt::Debug for EffectiveConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EffectiveConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.masked_api_key())
            .field("model", &self.model)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("system_prompt", &self.system_prompt)
            .field("extra_body", &self.extra_body)
            .field("extra_headers", &self.extra_headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

pub fn mask_secret(secret: &str) -> String {
    let chars: Vec<char> = secret.chars().collect();
    if chars.len() > 8 {
        let head: String = chars[..4].iter().collect();
        let tail: String = chars[chars.len() - 4..].iter().collect();
        format!("{}...{}", head, tail)
    } else {
        "****".to_string()
    }
}

/// Keys at least this long are masked wherever they appear.
const REDACT_ANYWHERE_MIN_CHARS: usize = 8;

/// Replace the secret with `***`. Short secrets are only replaced where they
/// stand as a whole token, so ordinary words that contain them survive.
pub fn redact_secret(text: &str, secret: &str) -> String {
    if secret.is_empty() {
        return text.to_string();
    }
    if secret.chars().count() >= REDACT_ANYWHERE_MIN_CHARS {
        return text.replace(secret, "***");
    }

    let is_token_char = |c: char| c.is_alphanumeric() || c == '-' || c == '_';
    let mut output = String::with_capacity(text.len());
    let mut last = 0;
    for (start, _) in text.match_indices(secret) {
        if start < last {
            continue;
        }
        let end = start + secret.len();
        let before = text[..start].chars().next_back();
        let after = text[end..].chars().next();
        if before.map_or(true, |c| !is_token_char(c)) && after.map_or(true, |c| !is_token_char(c)) {
            output.push_str(&text[last..start]);
            output.push_str("***");
            last = end;
        }
    }
    output.push_str(&text[last..]);
    output
}

/// Expand a leading `~` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    } else if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}
