//! Reading configs, filters and rows from disk.

use std::fs;
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use pipewright_core::{AggregationConfig, FilterParameters, ResultRow};
use serde_json::Value;

/// Load an aggregation config.
///
/// A config without a `name` is named after its file.
pub fn load_config(path: &Path) -> Result<AggregationConfig> {
    let text = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    let mut config = AggregationConfig::from_json_str(&text)
        .with_context(|| format!("invalid config {}", path.display()))?;
    if config.name.is_empty() {
        if let Some(stem) = path.file_stem() {
            config.name = stem.to_string_lossy().into_owned();
        }
    }
    Ok(config)
}

/// Load filters from an optional JSON file, then apply `KEY=VALUE` overrides.
pub fn load_filters(path: Option<&Path>, overrides: &[(String, Value)]) -> Result<FilterParameters> {
    let mut filters = match path {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read filters {}", path.display()))?;
            match serde_json::from_str::<Value>(&text)
                .with_context(|| format!("invalid filters {}", path.display()))?
            {
                Value::Object(map) => map,
                _ => bail!("filters {} must be a JSON object", path.display()),
            }
        }
        None => FilterParameters::new(),
    };
    for (key, value) in overrides {
        filters.insert(key.clone(), value.clone());
    }
    Ok(filters)
}

/// Load result rows from a file, or stdin when `path` is `None` or `-`.
///
/// Accepts a bare array of objects or a response envelope with `data`.
pub fn load_rows(path: Option<&Path>) -> Result<Vec<ResultRow>> {
    let text = match path {
        Some(path) if path != Path::new("-") => fs::read_to_string(path)
            .with_context(|| format!("failed to read rows {}", path.display()))?,
        _ => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .context("failed to read rows from stdin")?;
            buf
        }
    };

    let value: Value = serde_json::from_str(&text).context("rows are not valid JSON")?;
    let rows = match value {
        Value::Object(mut envelope) if envelope.contains_key("data") => {
            envelope.remove("data").unwrap_or(Value::Null)
        }
        other => other,
    };
    serde_json::from_value(rows).context("rows must be an array of objects")
}

/// Parse a `KEY=VALUE` filter override.
///
/// The value is read as JSON when it parses (`10`, `true`, `["a","b"]`) and
/// as a plain string otherwise.
pub fn parse_assignment(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("expected KEY=VALUE, got `{s}`"))?;
    if key.is_empty() {
        return Err(format!("empty filter key in `{s}`"));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

/// Parse an RFC 3339 instant.
pub fn parse_instant(s: &str) -> Result<DateTime<Utc>, String> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| format!("invalid RFC 3339 instant `{s}`: {e}"))
}

/// Write `value` to stdout followed by a newline.
pub fn write_json(value: &impl serde::Serialize, pretty: bool) -> Result<()> {
    let mut stdout = io::stdout().lock();
    if pretty {
        serde_json::to_writer_pretty(&mut stdout, value)?;
    } else {
        serde_json::to_writer(&mut stdout, value)?;
    }
    writeln!(stdout)?;
    Ok(())
}
