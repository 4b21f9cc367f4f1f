//! Resolving [`RelaySettings`] from layers.
//!
//! Compiled defaults, then the JSON settings file overlaid with
//! [`deep_merge`], then environment variables, then [`RelaySettings::validate`].
//! A missing file is not an error; an unreadable or malformed one is.

use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{PresetSession, RelaySettings};

/// Resolve the settings file: `$RELAY_CONFIG`, else `~/.relay/settings.json`.
pub fn settings_path() -> PathBuf {
    if let Some(path) = read_env_string("RELAY_CONFIG") {
        return PathBuf::from(path);
    }
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".relay").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<RelaySettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or an invalid combination of
/// values is an error.
pub fn load_settings_from_path(path: &Path) -> Result<RelaySettings> {
    let mut settings = read_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

fn read_file_layer(path: &Path) -> Result<RelaySettings> {
    let defaults = serde_json::to_value(RelaySettings::default())?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|source| SettingsError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let user: Value = serde_json::from_str(&content).map_err(|source| SettingsError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    Ok(serde_json::from_value(merged)?)
}

/// Overlay `layer` onto `base`.
///
/// Objects merge key by key, `null` in `layer` keeps the base value, and
/// anything else (arrays included) replaces it.
pub fn deep_merge(base: Value, layer: Value) -> Value {
    match (base, layer) {
        (Value::Object(mut merged), Value::Object(layer)) => {
            for (key, value) in layer.into_iter().filter(|(_, v)| !v.is_null()) {
                let next = match merged.remove(&key) {
                    Some(existing) => deep_merge(existing, value),
                    None => value,
                };
                let _ = merged.insert(key, next);
            }
            Value::Object(merged)
        }
        (_, layer) => layer,
    }
}

/// Apply overrides from the process environment.
pub fn apply_env_overrides(settings: &mut RelaySettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable source.
///
/// Empty values count as unset. Values that fail to parse or fall outside
/// their range are logged and ignored.
pub fn apply_overrides(settings: &mut RelaySettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvSource { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.read_string("RELAY_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.read_number("RELAY_PORT", 0..=u16::MAX).or_else(|| env.read_number("PORT", 0..=u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = env.read_string("RELAY_WS_URL").or_else(|| env.read_string("PUBLIC_WS_URL")) {
        settings.server.public_ws_url = Some(v);
    }
    if let Some(v) = env.read_number("RELAY_MAX_CONNECTIONS", 1..=1_000_000) {
        settings.server.max_connections = v;
    }

    // ── Session ─────────────────────────────────────────────────────
    if let Some(v) = env.read_number("SESSION_IDLE_SECS", 1..=30 * 24 * 3600) {
        settings.session.ttl_secs = v;
    }
    if let Some(v) = env.read_string("RELAY_ROLE_CONFLICT") {
        match serde_json::from_value(Value::String(v.clone())) {
            Ok(policy) => settings.session.role_conflict = policy,
            Err(_) => warn!(key = "RELAY_ROLE_CONFLICT", value = %v, "invalid policy, ignoring"),
        }
    }
    if let (Some(id), Some(token)) = (env.read_string("RELAY_SESSION_ID"), env.read_string("RELAY_TOKEN")) {
        settings.session.preset = Some(PresetSession { id, token });
    }

    // ── Heartbeat ───────────────────────────────────────────────────
    if let Some(v) = env.read_number("HEARTBEAT_INTERVAL_SECS", 1..=3600) {
        settings.heartbeat.ping_interval_secs = v;
        // keep the timeout at three missed pings unless the file set more
        settings.heartbeat.pong_timeout_secs = settings.heartbeat.pong_timeout_secs.max(v * 3);
    }

    // ── Store ───────────────────────────────────────────────────────
    if let Some(v) = env.read_string("RELAY_STORE") {
        match serde_json::from_value(Value::String(v.to_lowercase())) {
            Ok(backend) => settings.store.backend = backend,
            Err(_) => warn!(key = "RELAY_STORE", value = %v, "invalid store backend, ignoring"),
        }
    }
    if let Some(v) = env.read_string("REDIS_URL") {
        settings.store.redis_url = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.read_string("RELAY_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = env.read_flag("RELAY_LOG_JSON") {
        settings.logging.json = v;
    }
}

/// `true`/`1`/`yes`/`on` or `false`/`0`/`no`/`off`, any case.
pub fn parse_flag(val: &str) -> Option<bool> {
    match val.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// A number that parses and lies within `range`.
pub fn parse_in<T: FromStr + PartialOrd>(val: &str, range: &RangeInclusive<T>) -> Option<T> {
    val.trim().parse().ok().filter(|n| range.contains(n))
}

fn read_env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

/// Variable lookup where empty means unset and bad values are logged.
struct EnvSource<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvSource<F> {
    fn read_string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn read_with<T>(&self, name: &str, parse: impl FnOnce(&str) -> Option<T>) -> Option<T> {
        let raw = self.read_string(name)?;
        let parsed = parse(&raw);
        if parsed.is_none() {
            warn!(key = name, value = %raw, "invalid env var, ignoring");
        }
        parsed
    }

    fn read_flag(&self, name: &str) -> Option<bool> {
        self.read_with(name, parse_flag)
    }

    fn read_number<T: FromStr + PartialOrd>(&self, name: &str, range: RangeInclusive<T>) -> Option<T> {
        self.read_with(name, |raw| parse_in(raw, &range))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────────────────
