//! Three-layer settings resolution.
//!
//! Compiled defaults, then the JSON settings file deep-merged on top (objects
//! merge per key, arrays and scalars replace, `null` keeps the lower layer),
//! then `EMPORIUM_*` environment overrides. The result is validated before
//! it is returned.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::EmporiumSettings;

/// Resolve the path to the settings file (`~/.emporium/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".emporium").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<EmporiumSettings> {
    load_settings_from_path(&settings_path())
}

/// Like [`load_settings_from_path`], but a missing file is an error. Used
/// when the caller named the file explicitly.
pub fn load_settings_required(path: &Path) -> Result<EmporiumSettings> {
    if !path.is_file() {
        return Err(SettingsError::NotFound(path.to_path_buf()));
    }
    load_settings_from_path(path)
}

/// Resolve settings using the file at `path`. A missing file means defaults.
pub fn load_settings_from_path(path: &Path) -> Result<EmporiumSettings> {
    let mut layered = serde_json::to_value(EmporiumSettings::default())?;
    match std::fs::read_to_string(path) {
        Ok(content) => {
            debug!(?path, "merging settings file");
            layered = deep_merge(layered, serde_json::from_str(&content)?);
        }
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(?path, "no settings file, using defaults");
        }
        Err(e) => return Err(e.into()),
    }

    let mut settings: EmporiumSettings = serde_json::from_value(layered)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Merge `source` over `target`.
pub fn deep_merge(target: Value, source: Value) -> Value {
    match (target, source) {
        (Value::Object(mut target_map), Value::Object(source_map)) => {
            for (key, source_val) in source_map {
                if source_val.is_null() {
                    continue;
                }
                let merged = match target_map.remove(&key) {
                    Some(target_val) => deep_merge(target_val, source_val),
                    None => source_val,
                };
                let _ = target_map.insert(key, merged);
            }
            Value::Object(target_map)
        }
        (_, source) => source,
    }
}

/// Overlay `EMPORIUM_*` variables. Out-of-range or unparseable values keep
/// the lower layer.
pub fn apply_env_overrides(settings: &mut EmporiumSettings) {
    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read_env_string("EMPORIUM_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read_env_num::<u16>("EMPORIUM_PORT", 0..=65535) {
        settings.server.port = v;
    }
    if let Some(v) = read_env_num::<usize>("EMPORIUM_MAX_CONNECTIONS", 1..=1_000_000) {
        settings.server.max_connections = v;
    }

    // ── Hub ─────────────────────────────────────────────────────────
    if let Some(v) = read_env_num::<usize>("EMPORIUM_MAILBOX_CAPACITY", 1..=1_048_576) {
        settings.hub.mailbox_capacity = v;
    }
    if let Some(v) = read_env_num::<u32>("EMPORIUM_RATE_LIMIT", 0..=100_000) {
        settings.hub.rate_limit_per_second = v;
    }
    if let Some(v) = read_env_num::<u64>("EMPORIUM_PONG_WAIT_MS", 1_000..=3_600_000) {
        settings.hub.pong_wait_ms = v;
    }
    if let Some(v) = read_env_num::<u64>("EMPORIUM_WRITE_WAIT_MS", 100..=600_000) {
        settings.hub.write_wait_ms = v;
    }
    if let Some(v) = read_env_num::<usize>("EMPORIUM_MAX_MESSAGE_SIZE", 1..=64 * 1024 * 1024) {
        settings.hub.max_message_size = v;
    }
    if let Some(v) = read_env_bool("EMPORIUM_ECHO_TO_SENDER") {
        settings.hub.echo_to_sender = v;
    }

    // ── Auth / origins / logging ────────────────────────────────────
    if let Some(v) = read_env_string("EMPORIUM_JWT_SECRET") {
        settings.auth.jwt_secret = v;
    }
    if let Some(v) = read_env_string("EMPORIUM_ALLOWED_ORIGINS") {
        settings.origins.allowed = parse_list(&v);
    }
    if let Some(v) = read_env_string("EMPORIUM_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = read_env_bool("EMPORIUM_LOG_JSON") {
        settings.logging.json = v;
    }
}

// ── Parsing (pure, testable without touching the environment) ───────────────

/// Parse a boolean: `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_bool(val: &str) -> Option<bool> {
    match val.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse a number and keep it only if it lies within `range`.
pub fn parse_in_range<T>(val: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    val.trim().parse().ok().filter(|n| range.contains(n))
}

/// Split a comma-separated list, trimming entries and dropping empties.
pub fn parse_list(val: &str) -> Vec<String> {
    val.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect()
}

// ── Environment readers ─────────────────────────────────────────────────────

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Read `name` through `parse`; unparseable values are logged and skipped.
fn read_env_with<T>(name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
    let raw = read_env_string(name)?;
    let parsed = parse(&raw);
    if parsed.is_none() {
        warn!(key = name, value = %raw, "ignoring invalid environment override");
    }
    parsed
}

fn read_env_bool(name: &str) -> Option<bool> {
    read_env_with(name, parse_bool)
}

fn read_env_num<T>(name: &str, range: RangeInclusive<T>) -> Option<T>
where
    T: FromStr + PartialOrd,
{
    read_env_with(name, |raw| parse_in_range(raw, range))
}
