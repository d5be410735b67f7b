//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PulseSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply `PULSE_*` environment overrides (highest priority)
//! 4. [`PulseSettings::validate`]
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{BackendKind, LogLevel, PulseSettings};

/// Resolve the default settings file (`~/.pulse/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".pulse").join("settings.json")
}

/// Load settings from the default path with env var overrides.
pub fn load_settings() -> Result<PulseSettings> {
    load_settings_from_path(&settings_path())
}

/// Load settings from `path` with env var overrides.
///
/// A missing file yields defaults; invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PulseSettings> {
    let mut settings = read_merged(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Like [`load_settings_from_path`], but the file must exist.
pub fn load_required_settings(path: &Path) -> Result<PulseSettings> {
    if !path.exists() {
        return Err(SettingsError::NotFound(path.to_path_buf()));
    }
    load_settings_from_path(path)
}

fn read_merged(path: &Path) -> Result<PulseSettings> {
    let defaults = serde_json::to_value(PulseSettings::default())?;
    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path)?;
        let user: Value = serde_json::from_str(&content)?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
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

/// Apply `PULSE_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut PulseSettings) {
    apply_overrides(settings, |name| std::env::var(name).ok());
}

/// Apply `PULSE_*` overrides read through `lookup`.
///
/// Empty values are ignored. Unparseable or out-of-range values are logged
/// and ignored, leaving the file/default value in place.
pub fn apply_overrides(settings: &mut PulseSettings, lookup: impl Fn(&str) -> Option<String>) {
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    if let Some(v) =
        read("PULSE_PORT").and_then(|v| checked("PULSE_PORT", &v, parse_u16_range(&v, 0, 65535)))
    {
        settings.server.port = v;
    }
    if let Some(v) = read("PULSE_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = read("PULSE_BACKEND") {
        match v.parse::<BackendKind>() {
            Ok(kind) => settings.server.backend = kind,
            Err(e) => warn!(key = "PULSE_BACKEND", value = %v, error = %e, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("PULSE_LIVENESS_TIMEOUT_MS")
        .and_then(|v| checked("PULSE_LIVENESS_TIMEOUT_MS", &v, parse_u64_range(&v, 100, 3_600_000)))
    {
        settings.heartbeat.liveness_timeout_ms = v;
    }
    if let Some(v) = read("PULSE_HEARTBEAT_PERIOD_MS")
        .and_then(|v| checked("PULSE_HEARTBEAT_PERIOD_MS", &v, parse_u64_range(&v, 50, 3_600_000)))
    {
        settings.heartbeat.period_ms = v;
    }
    if let Some(v) = read("PULSE_QUEUE_CAPACITY")
        .and_then(|v| checked("PULSE_QUEUE_CAPACITY", &v, parse_usize_range(&v, 1, 1_048_576)))
    {
        settings.server.queue_capacity = v;
    }
    if let Some(v) = read("PULSE_ENCRYPTION") {
        match serde_json::from_value(Value::String(v.to_ascii_lowercase())) {
            Ok(enc) => settings.codec.encryption = enc,
            Err(_) => warn!(key = "PULSE_ENCRYPTION", value = %v, "invalid env var, ignoring"),
        }
    }
    if let Some(v) = read("PULSE_SECRET_KEY") {
        settings.codec.secret_key = v;
    }
    if let Some(v) = read("PULSE_COMPRESS_THRESHOLD") {
        if let Ok(n) = v.parse::<usize>() {
            settings.codec.compress_threshold = Some(n);
        } else if parse_bool(&v) == Some(false) {
            settings.codec.compress_threshold = None;
        } else {
            warn!(key = "PULSE_COMPRESS_THRESHOLD", value = %v, "invalid env var, ignoring");
        }
    }
    if let Some(v) = read("PULSE_LOG_LEVEL") {
        match serde_json::from_value::<LogLevel>(Value::String(v.to_ascii_lowercase())) {
            Ok(level) => settings.logging.level = level,
            Err(_) => warn!(key = "PULSE_LOG_LEVEL", value = %v, "invalid env var, ignoring"),
        }
    }
}

fn checked<T>(name: &str, raw: &str, parsed: Option<T>) -> Option<T> {
    if parsed.is_none() {
        warn!(key = name, value = %raw, "invalid env var, ignoring");
    }
    parsed
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

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

/// Parse a string as a `u16` within a range.
pub fn parse_u16_range(val: &str, min: u16, max: u16) -> Option<u16> {
    let n: u16 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `u64` within a range.
pub fn parse_u64_range(val: &str, min: u64, max: u64) -> Option<u64> {
    let n: u64 = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Parse a string as a `usize` within a range.
pub fn parse_usize_range(val: &str, min: usize, max: usize) -> Option<usize> {
    let n: usize = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use assert_matches::assert_matches;
    use pulse_codec::Encryption;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    // ── deep_merge ──────────────────────────────────────────────────

    #[test]
    fn merge_nested_override() {
        let target = serde_json::json!({"server": {"port": 8080, "host": "localhost"}});
        let source = serde_json::json!({"server": {"port": 9090}});
        let merged = deep_merge(target, source);
        assert_eq!(merged["server"]["port"], 9090);
        assert_eq!(merged["server"]["host"], "localhost");
    }

    #[test]
    fn merge_null_preserves_target() {
        let merged = deep_merge(serde_json::json!({"a": 1}), serde_json::json!({"a": null}));
        assert_eq!(merged["a"], 1);
    }

    #[test]
    fn merge_array_replace() {
        let merged = deep_merge(
            serde_json::json!({"items": [1, 2, 3]}),
            serde_json::json!({"items": [4]}),
        );
        assert_eq!(merged["items"], serde_json::json!([4]));
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let merged = deep_merge(
            serde_json::json!({"a": {"nested": true}}),
            serde_json::json!({"a": 42}),
        );
        assert_eq!(merged["a"], 42);
    }

    // ── loading ─────────────────────────────────────────────────────

    #[test]
    fn load_missing_file_returns_defaults() {
        let mut s = read_merged(Path::new("/nonexistent/pulse/settings.json")).unwrap();
        apply_overrides(&mut s, env(&[]));
        assert_eq!(s.server.port, 8080);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn load_partial_json_overrides() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9090, "backend": "poller"}, "heartbeat": {"livenessTimeoutMs": 20000}}"#,
        )
        .unwrap();

        let s = read_merged(&path).unwrap();
        assert_eq!(s.server.port, 9090);
        assert_eq!(s.server.backend, BackendKind::Poller);
        assert_eq!(s.heartbeat.liveness_timeout_ms, 20_000);
        assert_eq!(s.heartbeat.period_ms, 15_000);
        assert_eq!(s.server.queue_capacity, 2048);
    }

    #[test]
    fn load_invalid_json_returns_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, "not valid json").unwrap();
        assert_matches!(read_merged(&path), Err(SettingsError::Json(_)));
    }

    #[test]
    fn required_file_must_exist() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("missing.json");
        assert_matches!(load_required_settings(&path), Err(SettingsError::NotFound(p)) if p == path);
    }

    #[test]
    fn invalid_file_values_fail_validation() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("settings.json");
        std::fs::write(&path, r#"{"server": {"queueCapacity": 0}}"#).unwrap();
        assert_matches!(
            load_required_settings(&path),
            Err(SettingsError::InvalidValue(_))
        );
    }

    // ── overrides ───────────────────────────────────────────────────

    #[test]
    fn env_overrides_apply() {
        let mut s = PulseSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("PULSE_PORT", "9100"),
                ("PULSE_HOST", "127.0.0.1"),
                ("PULSE_BACKEND", "poller"),
                ("PULSE_LIVENESS_TIMEOUT_MS", "4000"),
                ("PULSE_HEARTBEAT_PERIOD_MS", "2000"),
                ("PULSE_QUEUE_CAPACITY", "100"),
                ("PULSE_ENCRYPTION", "XOR"),
                ("PULSE_SECRET_KEY", "s3cret"),
                ("PULSE_COMPRESS_THRESHOLD", "256"),
                ("PULSE_LOG_LEVEL", "debug"),
            ]),
        );
        assert_eq!(s.server.port, 9100);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.server.backend, BackendKind::Poller);
        assert_eq!(s.heartbeat.liveness_timeout_ms, 4000);
        assert_eq!(s.heartbeat.period_ms, 2000);
        assert_eq!(s.server.queue_capacity, 100);
        assert_eq!(s.codec.encryption, Encryption::Xor);
        assert_eq!(s.codec.secret_key, "s3cret");
        assert_eq!(s.codec.compress_threshold, Some(256));
        assert_eq!(s.logging.level, LogLevel::Debug);
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut s = PulseSettings::default();
        apply_overrides(
            &mut s,
            env(&[
                ("PULSE_PORT", "99999"),
                ("PULSE_BACKEND", "fibers"),
                ("PULSE_QUEUE_CAPACITY", "0"),
                ("PULSE_ENCRYPTION", "aes"),
                ("PULSE_HOST", ""),
            ]),
        );
        assert_eq!(s.server.port, 8080);
        assert_eq!(s.server.backend, BackendKind::Tasks);
        assert_eq!(s.server.queue_capacity, 2048);
        assert_eq!(s.codec.encryption, Encryption::None);
        assert_eq!(s.server.host, "0.0.0.0");
    }

    #[test]
    fn compress_threshold_off_disables() {
        let mut s = PulseSettings::default();
        s.codec.compress_threshold = Some(10);
        apply_overrides(&mut s, env(&[("PULSE_COMPRESS_THRESHOLD", "off")]));
        assert!(s.codec.compress_threshold.is_none());
    }

    // ── parsers ─────────────────────────────────────────────────────

    #[test]
    fn parse_bool_variants() {
        for val in ["true", "1", "YES", "on"] {
            assert_eq!(parse_bool(val), Some(true), "failed for {val}");
        }
        for val in ["false", "0", "No", "OFF"] {
            assert_eq!(parse_bool(val), Some(false), "failed for {val}");
        }
        assert_eq!(parse_bool("maybe"), None);
    }

    #[test]
    fn parse_ranges() {
        assert_eq!(parse_u16_range("9090", 1, 65535), Some(9090));
        assert_eq!(parse_u16_range("0", 1, 65535), None);
        assert_eq!(parse_u64_range("500", 1000, 600_000), None);
        assert_eq!(parse_usize_range("50", 1, 10_000), Some(50));
        assert_eq!(parse_usize_range("abc", 1, 10_000), None);
    }
}
