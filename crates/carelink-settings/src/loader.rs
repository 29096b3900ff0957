//! Settings loading with deep merge and environment variable overrides.
//!
//! Loading flow:
//! 1. Start with compiled [`CarelinkSettings::default()`]
//! 2. If a settings file is given and exists, deep-merge it over defaults
//! 3. Apply environment variable overrides (highest priority)
//!
//! Deep merge rules:
//! - Objects are merged recursively (source overrides target per-key)
//! - Arrays and primitives are replaced entirely by source
//! - Null values in source are skipped (preserving target)

use std::path::Path;

use carelink_core::security::ApiKey;
use serde_json::Value;
use tracing::{debug, warn};

use crate::errors::Result;
use crate::types::CarelinkSettings;

/// Load settings from an optional file, then the process environment.
pub fn load_settings(path: Option<&Path>) -> Result<CarelinkSettings> {
    match path {
        Some(path) => load_settings_from_path(path),
        None => {
            let mut settings = CarelinkSettings::default();
            apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
            Ok(settings)
        }
    }
}

/// Load settings from a specific path with env var overrides.
///
/// A missing file yields defaults; a file with invalid JSON is an error.
pub fn load_settings_from_path(path: &Path) -> Result<CarelinkSettings> {
    let mut settings = merge_file(path)?;
    apply_env_overrides(&mut settings, |name| std::env::var(name).ok());
    Ok(settings)
}

fn merge_file(path: &Path) -> Result<CarelinkSettings> {
    let defaults = serde_json::to_value(CarelinkSettings::default())?;

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

/// Apply environment overrides read through `lookup`.
///
/// Invalid values are logged and ignored, falling back to file/default.
pub fn apply_env_overrides<F>(settings: &mut CarelinkSettings, lookup: F)
where
    F: Fn(&str) -> Option<String>,
{
    let read = |name: &str| lookup(name).filter(|v| !v.is_empty());

    // ── Server ──────────────────────────────────────────────────────
    if let Some(v) = read("CARELINK_HOST") {
        settings.server.host = v;
    }
    if let Some(v) = parsed(&read, "CARELINK_PORT", |s| parse_range::<u16>(s, 1, 65535)) {
        settings.server.port = v;
    }
    if let Some(v) = parsed(&read, "CARELINK_MAILBOX_CAPACITY", |s| {
        parse_range::<usize>(s, 1, 65_536)
    }) {
        settings.server.mailbox_capacity = v;
    }
    if let Some(v) = read("CARELINK_DB") {
        settings.server.database_path = v;
    }

    // ── Logging ─────────────────────────────────────────────────────
    if let Some(v) = read("CARELINK_LOG_LEVEL") {
        settings.logging.level = v;
    }
    if let Some(v) = parsed(&read, "CARELINK_LOG_FORMAT", |s| s.parse().ok()) {
        settings.logging.format = v;
    }

    // ── Assistant ───────────────────────────────────────────────────
    if let Some(v) = parsed(&read, "AI_PROVIDER", |s| s.parse().ok()) {
        settings.assistant.provider = v;
    }
    if let Some(v) = read("AI_MODEL") {
        settings.assistant.model = Some(v);
    }
    if let Some(v) = read("AI_BASE_URL") {
        settings.assistant.base_url = Some(v);
    }
    if let Some(v) = parsed(&read, "AI_TIMEOUT_MS", |s| {
        parse_range::<u64>(s, 1_000, 120_000)
    }) {
        settings.assistant.timeout_ms = v;
    }
    if let Some(v) = parsed(&read, "CARELINK_EXTRACT_READINGS", parse_bool) {
        settings.assistant.extract_readings = v;
    }
    if let Some(v) = read("OPENAI_API_KEY") {
        settings.assistant.openai_api_key = Some(ApiKey::new(v));
    }
    if let Some(v) = read("DEEPSEEK_API_KEY") {
        settings.assistant.deepseek_api_key = Some(ApiKey::new(v));
    }
}

fn parsed<T, R, P>(read: &R, name: &str, parse: P) -> Option<T>
where
    R: Fn(&str) -> Option<String>,
    P: Fn(&str) -> Option<T>,
{
    let val = read(name)?;
    let result = parse(&val);
    if result.is_none() {
        warn!(key = name, value = %val, "invalid env var, ignoring");
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
    let n: T = val.parse().ok()?;
    (n >= min && n <= max).then_some(n)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SettingsError;
    use crate::types::ProviderKind;
    use carelink_telemetry::LogFormat;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

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
        let target = serde_json::json!({"a": 1, "b": 2});
        let source = serde_json::json!({"a": null});
        let merged = deep_merge(target, source);
        assert_eq!(merged["a"], 1);
        assert_eq!(merged["b"], 2);
    }

    #[test]
    fn merge_array_replace() {
        let target = serde_json::json!({"items": [1, 2, 3]});
        let source = serde_json::json!({"items": [4]});
        assert_eq!(deep_merge(target, source)["items"], serde_json::json!([4]));
    }

    #[test]
    fn missing_file_returns_defaults() {
        let settings = merge_file(Path::new("/nonexistent/carelink.json")).unwrap();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.assistant.timeout_ms, 30_000);
    }

    #[test]
    fn file_values_merge_over_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carelink.json");
        std::fs::write(
            &path,
            r#"{"server": {"port": 9100, "pongWaitMs": 30000, "pingIntervalMs": 27000},
                "assistant": {"provider": "deepseek", "extractReadings": false}}"#,
        )
        .unwrap();

        let settings = merge_file(&path).unwrap();
        assert_eq!(settings.server.port, 9100);
        assert_eq!(settings.server.pong_wait_ms, 30_000);
        assert_eq!(settings.server.ping_interval_ms, 27_000);
        assert_eq!(settings.server.mailbox_capacity, 256);
        assert_eq!(settings.assistant.provider, ProviderKind::DeepSeek);
        assert!(!settings.assistant.extract_readings);
        assert_eq!(settings.assistant.history_window, 5);
    }

    #[test]
    fn invalid_json_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("carelink.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(merge_file(&path), Err(SettingsError::Json(_))));
    }

    #[test]
    fn env_overrides_apply() {
        let mut settings = CarelinkSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("CARELINK_PORT", "9200"),
                ("CARELINK_LOG_FORMAT", "pretty"),
                ("AI_PROVIDER", "deepseek"),
                ("AI_MODEL", "deepseek-chat"),
                ("DEEPSEEK_API_KEY", "ds-key"),
                ("CARELINK_EXTRACT_READINGS", "off"),
            ]),
        );
        assert_eq!(settings.server.port, 9200);
        assert_eq!(settings.logging.format, LogFormat::Pretty);
        assert_eq!(settings.assistant.provider, ProviderKind::DeepSeek);
        assert_eq!(settings.assistant.resolved_model(), "deepseek-chat");
        assert_eq!(settings.assistant.api_key().unwrap().expose(), "ds-key");
        assert!(!settings.assistant.extract_readings);
        assert!(settings.validate().is_ok());
    }

    #[test]
    fn invalid_env_values_are_ignored() {
        let mut settings = CarelinkSettings::default();
        apply_env_overrides(
            &mut settings,
            env(&[
                ("CARELINK_PORT", "99999"),
                ("AI_PROVIDER", "anthropic"),
                ("AI_TIMEOUT_MS", "5"),
                ("CARELINK_HOST", ""),
            ]),
        );
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.server.host, "0.0.0.0");
        assert_eq!(settings.assistant.provider, ProviderKind::OpenAi);
        assert_eq!(settings.assistant.timeout_ms, 30_000);
    }

    #[test]
    fn parse_helpers() {
        assert_eq!(parse_bool("YES"), Some(true));
        assert_eq!(parse_bool("0"), Some(false));
        assert_eq!(parse_bool("maybe"), None);
        assert_eq!(parse_range::<u16>("80", 1, 65535), Some(80));
        assert_eq!(parse_range::<u16>("0", 1, 65535), None);
        assert_eq!(parse_range::<u64>("abc", 1, 10), None);
    }
}
