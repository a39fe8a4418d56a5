//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`PlexusSettings::default()`]
//! 2. If the settings file exists, deep-merge its values over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::{Result, SettingsError};
use crate::types::{LogFormat, PlexusSettings};

/// Resolve the default settings file (`~/.plexus/settings.json`).
pub fn settings_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| "/tmp".to_string());
    PathBuf::from(home).join(".plexus").join("settings.json")
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults. Invalid JSON or a merged result that
/// fails [`PlexusSettings::validate`] is an error.
pub fn load_settings_from_path(path: &Path) -> Result<PlexusSettings> {
    let mut settings = load_file_layer(path)?;
    apply_env_overrides(&mut settings);
    settings.validate()?;
    Ok(settings)
}

/// Defaults with the file deep-merged over them, without env overrides.
pub fn load_file_layer(path: &Path) -> Result<PlexusSettings> {
    let defaults =
        serde_json::to_value(PlexusSettings::default()).map_err(|e| SettingsError::json(path, e))?;

    let merged = if path.exists() {
        debug!(?path, "loading settings from file");
        let content = std::fs::read_to_string(path).map_err(|e| SettingsError::io(path, e))?;
        let user: Value = serde_json::from_str(&content).map_err(|e| SettingsError::json(path, e))?;
        deep_merge(defaults, user)
    } else {
        debug!(?path, "settings file not found, using defaults");
        defaults
    };

    serde_json::from_value(merged).map_err(|e| SettingsError::json(path, e))
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

/// Apply `PLEXUS_*` overrides from the process environment.
pub fn apply_env_overrides(settings: &mut PlexusSettings) {
    apply_overrides_from(settings, |name| std::env::var(name).ok());
}

/// Apply overrides from an arbitrary variable lookup.
///
/// Invalid values are logged and ignored, so a typo in one variable never
/// prevents startup with the file/default value.
pub fn apply_overrides_from(settings: &mut PlexusSettings, lookup: impl Fn(&str) -> Option<String>) {
    let env = EnvReader { lookup };

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = env.string("PLEXUS_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = env.parsed("PLEXUS_PORT", |s| parse_range::<u16>(s, 1, u16::MAX)) {
        settings.server.port = v;
    }
    if let Some(v) = env.parsed("PLEXUS_MAX_CONNECTIONS", |s| parse_range::<usize>(s, 1, 1_000_000)) {
        settings.server.max_connections = v;
    }
    if let Some(v) = env.parsed("PLEXUS_HEARTBEAT_INTERVAL_MS", |s| {
        parse_range::<u64>(s, 1_000, 600_000)
    }) {
        settings.server.heartbeat_interval_ms = v;
        if settings.server.heartbeat_timeout_ms < v {
            settings.server.heartbeat_timeout_ms = v.saturating_mul(3);
        }
    }

    // ── Auth ────────────────────────────────────────────────────────
    if let Some(v) = env
        .string("PLEXUS_AUTH_TOKEN")
        .or_else(|| env.string("AUTHENTICATION_TOKEN"))
    {
        settings.auth.token = Some(v);
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = env.parsed("PLEXUS_LOG_LEVEL", parse_level) {
        settings.logging.level = v;
    }
    if let Some(v) = env.parsed("PLEXUS_LOG_FORMAT", |s| s.parse::<LogFormat>().ok()) {
        settings.logging.format = v;
    }
}

// ── Pure parsing functions (testable without env vars) ──────────────────────

/// Parse an integer within an inclusive range.
pub fn parse_range<T>(val: &str, min: T, max: T) -> Option<T>
where
    T: std::str::FromStr + PartialOrd,
{
    let n: T = val.trim().parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

/// Normalise a `tracing` level name.
pub fn parse_level(val: &str) -> Option<String> {
    let lower = val.trim().to_ascii_lowercase();
    matches!(lower.as_str(), "trace" | "debug" | "info" | "warn" | "error").then_some(lower)
}

struct EnvReader<F> {
    lookup: F,
}

impl<F: Fn(&str) -> Option<String>> EnvReader<F> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).filter(|v| !v.is_empty())
    }

    fn parsed<T>(&self, name: &str, parse: impl Fn(&str) -> Option<T>) -> Option<T> {
        let val = self.string(name)?;
        let result = parse(&val);
        if result.is_none() {
            warn!(key = name, value = %val, "invalid env var, ignoring");
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
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
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4, 5]});
        let merged = deep_merge(target, source);
        assert_eq!(merged["items"], serde_json::json!([4, 5]));
    }

    #[test]
    fn merge_null_preserves_target() {
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_primitive_replaces_object() {
        let target = serde_json::json!({"a": {"nested": true}});
        let source = serde_json::json!({"a": 42});
        assert_eq!(deep_merge(target, source)["a"], 42);
    }

    // ── file layer ──────────────────────────────────────────────────

    #[test]
    fn missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let settings = load_file_layer(&dir.path().join("nope.json")).unwrap();
        assert_eq!(settings.server.port, 6121);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"server": {{"port": 7000, "maxSendQueue": 8}}, "logging": {{"format": "json"}}}}"#
        )
        .unwrap();
        let settings = load_file_layer(file.path()).unwrap();
        assert_eq!(settings.server.port, 7000);
        assert_eq!(settings.server.max_send_queue, 8);
        assert_eq!(settings.server.max_connections, 256);
        assert_eq!(settings.logging.format, LogFormat::Json);
    }

    #[test]
    fn invalid_json_is_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "{{not json").unwrap();
        let err = load_file_layer(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Json { ref path, .. } if path == file.path()));
    }

    #[test]
    fn wrong_value_type_is_reported_against_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server": {{"port": "six-one-two-one"}}}}"#).unwrap();
        let err = load_file_layer(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Json { .. }));
        assert!(err.to_string().contains(&file.path().display().to_string()));
    }

    #[test]
    fn unreadable_path_is_io_error() {
        // A directory exists but cannot be read as a file.
        let dir = tempfile::tempdir().unwrap();
        let err = load_file_layer(dir.path()).unwrap_err();
        assert!(matches!(err, SettingsError::Io { .. }));
    }

    #[test]
    fn invalid_merged_settings_rejected() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"server": {{"maxConnections": 0}}}}"#).unwrap();
        let err = load_settings_from_path(file.path()).unwrap_err();
        assert!(matches!(err, SettingsError::InvalidValue(_)));
    }

    // ── env overrides ───────────────────────────────────────────────

    #[test]
    fn overrides_apply() {
        let mut s = PlexusSettings::default();
        apply_overrides_from(
            &mut s,
            vars(&[
                ("PLEXUS_HOST", "0.0.0.0"),
                ("PLEXUS_PORT", "9999"),
                ("PLEXUS_MAX_CONNECTIONS", "3"),
                ("PLEXUS_AUTH_TOKEN", "s3cr3t"),
                ("PLEXUS_LOG_LEVEL", "DEBUG"),
                ("PLEXUS_LOG_FORMAT", "json"),
            ]),
        );
        assert_eq!(s.server.host, "0.0.0.0");
        assert_eq!(s.server.port, 9999);
        assert_eq!(s.server.max_connections, 3);
        assert_eq!(s.auth.shared_secret(), Some("s3cr3t"));
        assert_eq!(s.logging.level, "debug");
        assert_eq!(s.logging.format, LogFormat::Json);
    }

    #[test]
    fn legacy_token_variable_is_fallback() {
        let mut s = PlexusSettings::default();
        apply_overrides_from(&mut s, vars(&[("AUTHENTICATION_TOKEN", "legacy")]));
        assert_eq!(s.auth.shared_secret(), Some("legacy"));

        let mut s = PlexusSettings::default();
        apply_overrides_from(
            &mut s,
            vars(&[("AUTHENTICATION_TOKEN", "legacy"), ("PLEXUS_AUTH_TOKEN", "new")]),
        );
        assert_eq!(s.auth.shared_secret(), Some("new"));
    }

    #[test]
    fn invalid_values_ignored() {
        let mut s = PlexusSettings::default();
        apply_overrides_from(
            &mut s,
            vars(&[
                ("PLEXUS_PORT", "99999"),
                ("PLEXUS_MAX_CONNECTIONS", "0"),
                ("PLEXUS_LOG_LEVEL", "loud"),
                ("PLEXUS_LOG_FORMAT", "xml"),
            ]),
        );
        assert_eq!(s.server.port, 6121);
        assert_eq!(s.server.max_connections, 256);
        assert_eq!(s.logging.level, "info");
        assert_eq!(s.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn empty_values_ignored() {
        let mut s = PlexusSettings::default();
        apply_overrides_from(&mut s, vars(&[("PLEXUS_HOST", ""), ("PLEXUS_AUTH_TOKEN", "")]));
        assert_eq!(s.server.host, "127.0.0.1");
        assert!(s.auth.token.is_none());
    }

    #[test]
    fn heartbeat_interval_keeps_timeout_consistent() {
        let mut s = PlexusSettings::default();
        apply_overrides_from(&mut s, vars(&[("PLEXUS_HEARTBEAT_INTERVAL_MS", "120000")]));
        assert_eq!(s.server.heartbeat_interval_ms, 120_000);
        assert_eq!(s.server.heartbeat_timeout_ms, 360_000);
        assert!(s.validate().is_ok());
    }

    #[test]
    fn parse_range_bounds() {
        assert_eq!(parse_range::<u16>("80", 1, 65535), Some(80));
        assert_eq!(parse_range::<u16>("0", 1, 65535), None);
        assert_eq!(parse_range::<u64>(" 5 ", 1, 10), Some(5));
        assert_eq!(parse_range::<u64>("abc", 1, 10), None);
    }
}
