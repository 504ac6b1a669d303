//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`SlideSyncSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge it over the defaults
//! 3. Apply `SLIDESYNC_*` environment variable overrides
//!
//! Validation is left to the caller, so later layers such as CLI flags can
//! still fix a value before [`SlideSyncSettings::validate`] runs.
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::debug;

use crate::errors::Result;
use crate::types::SlideSyncSettings;

/// Environment variable naming the settings file.
pub const CONFIG_ENV: &str = "SLIDESYNC_CONFIG";

/// Resolve the settings file path from `SLIDESYNC_CONFIG`, if set.
pub fn settings_path_from_env() -> Option<PathBuf> {
    read_env_string(CONFIG_ENV).map(PathBuf::from)
}

/// Load settings from an optional file with env var overrides.
///
/// A missing file yields defaults. A file with invalid JSON is an error.
/// The result is not validated.
pub fn load_settings(path: Option<&Path>) -> Result<SlideSyncSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    Ok(settings)
}

/// Defaults merged with the settings file, without env overrides.
pub fn load_file_layer(path: Option<&Path>) -> Result<SlideSyncSettings> {
    let defaults = serde_json::to_value(SlideSyncSettings::default())?;

    let merged = match path {
        Some(path) if path.exists() => {
            debug!(?path, "loading settings from file");
            let content = std::fs::read_to_string(path)?;
            let user: Value = serde_json::from_str(&content)?;
            deep_merge(defaults, user)
        }
        Some(path) => {
            debug!(?path, "settings file not found, using defaults");
            defaults
        }
        None => defaults,
    };

    Ok(serde_json::from_value(merged)?)
}

/// Recursive deep merge of two JSON values.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = if let Some(target_val) = target_map.remove(&key) {
                    deep_merge(target_val, source_val)
                } else {
                    source_val
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Apply environment variable overrides to loaded settings.
///
/// Invalid values are ignored with a warning and the file/default value kept.
pub fn apply_env_overrides(settings: &mut SlideSyncSettings) {
    apply_overrides(settings, |name: &str| std::env::var(name).ok());
}

/// Apply overrides read through `lookup`. Split out so tests do not have to
/// mutate the process environment.
pub fn apply_overrides(settings: &mut SlideSyncSettings, lookup: impl Fn(&str) -> Option<String>) {
    let string = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) = string("SLIDESYNC_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed(&lookup, "SLIDESYNC_PORT", |s: &str| parse_range::<u16>(s, 1, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = parsed(&lookup, "SLIDESYNC_MAX_CONNECTIONS", |s: &str| {
        parse_range::<usize>(s, 1, 100_000)
    }) {
        settings.server.max_connections = v;
    }
    if let Some(v) = string("SLIDESYNC_CONTROLLER_SECRET") {
        settings.auth.controller_secret = Some(v);
    }
    if let Some(v) = string("SLIDESYNC_UPLOAD_DIR") {
        settings.documents.upload_dir = v;
    }
    if let Some(v) = parsed(&lookup, "SLIDESYNC_MAX_UPLOAD_BYTES", |s: &str| {
        parse_range::<usize>(s, 1024, 1 << 30)
    }) {
        settings.documents.max_upload_bytes = v;
    }
    if let Some(v) = string("SLIDESYNC_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = parsed(&lookup, "SLIDESYNC_LOG_JSON", parse_bool) {
        settings.logging.json = v;
    }
}

fn parsed<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    name: &str,
    parse: impl Fn(&str) -> Option<T>,
) -> Option<T> {
    let val = lookup(name)?;
    let result = parse(&val);
    if result.is_none() {
        tracing::warn!(key = name, value = %val, "invalid env var, ignoring");
    }
    result
}

/// Parse a string as a boolean.
///
/// Accepts (case-insensitive): `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
