//! Reading older session formats
//!
//! Format 1 used `version` for the marker, `kind`/`data` for object entries,
//! and kept the view settings and script at the top level. It is rewritten
//! into the current layout before decoding.

use crate::envelope::CURRENT_FORMAT_VERSION;
use crate::error::{SessionError, SessionResult};
use crate::requirement::Requirement;
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Header fields readable from any format, current or not
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct RawHeader {
    pub(crate) format_version: u32,
    pub(crate) requirements: Vec<Requirement>,
    pub(crate) saved_at: Option<DateTime<Utc>>,
    pub(crate) producer: Option<String>,
    pub(crate) object_count: usize,
}

impl RawHeader {
    /// Read the header without assuming a layout beyond the marker
    pub(crate) fn read(value: &Value) -> SessionResult<Self> {
        let root = value
            .as_object()
            .ok_or_else(|| SessionError::Malformed("session is not a JSON object".into()))?;
        let marker = root
            .get("format_version")
            .or_else(|| root.get("version"))
            .ok_or_else(|| SessionError::Malformed("missing format version".into()))?;
        let format_version = marker
            .as_u64()
            .and_then(|v| u32::try_from(v).ok())
            .filter(|v| *v > 0)
            .ok_or_else(|| SessionError::Malformed(format!("invalid format version {marker}")))?;

        let requirements = match root.get("requirements") {
            None | Some(Value::Null) => Vec::new(),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| {
                    item.as_str()
                        .map(Requirement::parse)
                        .ok_or_else(|| SessionError::Malformed(format!("requirement {item} is not a string")))
                })
                .collect::<SessionResult<Vec<Requirement>>>()?,
            Some(other) => return Err(SessionError::Malformed(format!("requirements must be a list, got {other}"))),
        };

        Ok(Self {
            format_version,
            requirements,
            saved_at: root
                .get("saved_at")
                .and_then(|v| serde_json::from_value(v.clone()).ok()),
            producer: root.get("producer").and_then(Value::as_str).map(str::to_string),
            object_count: root.get("objects").and_then(Value::as_array).map_or(0, Vec::len),
        })
    }
}

/// Rewrite an envelope of `from` format into the current layout
pub(crate) fn upgrade(value: Value, from: u32) -> SessionResult<Value> {
    match from {
        CURRENT_FORMAT_VERSION => Ok(value),
        1 => {
            tracing::info!("migrating session from format 1 to {CURRENT_FORMAT_VERSION}");
            v1_to_v2(value)
        }
        other => Err(SessionError::Malformed(format!("no migration from format {other}"))),
    }
}

fn v1_to_v2(value: Value) -> SessionResult<Value> {
    let Value::Object(mut root) = value else {
        return Err(SessionError::Malformed("session is not a JSON object".into()));
    };
    root.remove("version");

    let objects = match root.remove("objects") {
        Some(Value::Array(items)) => items
            .into_iter()
            .map(v1_object)
            .collect::<SessionResult<Vec<Value>>>()?,
        None => Vec::new(),
        Some(_) => return Err(SessionError::Malformed("objects must be a list".into())),
    };

    let mut auxiliary = Map::new();
    auxiliary.insert(
        "view_settings".into(),
        root.remove("view_settings").unwrap_or_else(|| Value::Object(Map::new())),
    );
    auxiliary.insert(
        "script_text".into(),
        root.remove("script").unwrap_or_else(|| Value::String(String::new())),
    );

    let requirements: Vec<Value> = match root.remove("requirements") {
        Some(Value::Array(items)) => items
            .into_iter()
            .filter(|r| !matches!(r.as_str(), Some(s) if s.starts_with("format-version:")))
            .collect(),
        _ => Vec::new(),
    };

    let mut upgraded = Map::new();
    upgraded.insert("format_version".into(), Value::from(CURRENT_FORMAT_VERSION));
    upgraded.insert(
        "requirements".into(),
        Value::Array(
            std::iter::once(Value::String(Requirement::FormatVersion(CURRENT_FORMAT_VERSION).to_string()))
                .chain(requirements)
                .collect(),
        ),
    );
    upgraded.insert("objects".into(), Value::Array(objects));
    upgraded.insert("auxiliary".into(), Value::Object(auxiliary));
    Ok(Value::Object(upgraded))
}

fn v1_object(entry: Value) -> SessionResult<Value> {
    let Value::Object(mut entry) = entry else {
        return Err(SessionError::Malformed("object entry is not a JSON object".into()));
    };
    let kind = entry
        .remove("kind")
        .ok_or_else(|| SessionError::Malformed("format 1 object without kind".into()))?;
    let data = entry.remove("data").unwrap_or(Value::Null);
    entry.insert("type".into(), kind);
    entry.insert("payload".into(), data);
    Ok(Value::Object(entry))
}
