// ── Status/Log Normalizer ──
//
// Coerces whatever either transport returns into the canonical records in
// `model`. Every function here is total: partial or wrong-typed input
// yields defaulted fields, never an error.

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{Map, Value};

use crate::model::{
    CaptureMode, DEFAULT_LOG_SOURCE, ErrorEvent, ErrorKind, EventPayload, LogEntry, LogLevel,
    ModeKind, PLACEHOLDER_LOG_MESSAGE, TerminalConfig, TerminalEvent, TerminalStatus,
};

// ── Helpers ──────────────────────────────────────────────────────────

/// Numbers and numeric strings; anything else is `None`.
fn as_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn as_bool(value: Option<&Value>) -> Option<bool> {
    value?.as_bool()
}

fn first<'a>(obj: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter().find_map(|k| obj.get(*k))
}

/// Unwrap a record that may be nested under `key` or `data`.
fn unwrap_record<'a>(raw: &'a Value, key: &str) -> Option<&'a Map<String, Value>> {
    let obj = raw.as_object()?;
    for nested in [key, "data"] {
        if let Some(inner) = obj.get(nested).and_then(Value::as_object) {
            return Some(inner);
        }
    }
    Some(obj)
}

/// Camera/node collections arrive either as a map or as a list of records.
fn camera_map(value: Option<&Value>) -> Map<String, Value> {
    match value {
        Some(Value::Object(map)) => map.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .enumerate()
            .map(|(index, item)| {
                let key = item
                    .get("id")
                    .or_else(|| item.get("camera_id"))
                    .map_or_else(
                        || index.to_string(),
                        |id| match id {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        },
                    );
                (key, item.clone())
            })
            .collect(),
        _ => Map::new(),
    }
}

fn passthrough(obj: &Map<String, Value>, consumed: &[&str]) -> Map<String, Value> {
    obj.iter()
        .filter(|(k, _)| !consumed.contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect()
}

pub(crate) fn now_rfc3339() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

fn timestamp_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) if !s.trim().is_empty() => Some(s.clone()),
        Value::Number(n) => {
            let secs = n.as_f64()?;
            #[allow(clippy::cast_possible_truncation, clippy::as_conversions)]
            let millis = (secs * 1000.0) as i64;
            DateTime::from_timestamp_millis(millis)
                .map(|dt| dt.to_rfc3339_opts(SecondsFormat::Millis, true))
        }
        _ => None,
    }
}

// ── Status ───────────────────────────────────────────────────────────

const STATUS_KEYS: &[&str] = &[
    "cameras",
    "nodes",
    "cpu_usage",
    "cpu",
    "memory_usage",
    "memory",
    "push_running",
    "pull_running",
    "model_loaded",
    "started_at",
    "mode",
];

/// Canonical status from any status-shaped payload.
pub fn normalize_status(raw: &Value) -> TerminalStatus {
    let Some(obj) = unwrap_record(raw, "status") else {
        return TerminalStatus::default();
    };

    TerminalStatus {
        cameras: camera_map(first(obj, &["cameras", "nodes"])),
        cpu_usage: as_number(first(obj, &["cpu_usage", "cpu"])).unwrap_or(0.0),
        memory_usage: as_number(first(obj, &["memory_usage", "memory"])).unwrap_or(0.0),
        push_running: as_bool(obj.get("push_running")).unwrap_or(false),
        pull_running: as_bool(obj.get("pull_running")).unwrap_or(false),
        model_loaded: as_bool(obj.get("model_loaded")).unwrap_or(false),
        started_at: timestamp_string(obj.get("started_at")),
        mode: obj.get("mode").and_then(Value::as_str).map(str::to_owned),
        extra: passthrough(obj, STATUS_KEYS),
    }
}

// ── Config ───────────────────────────────────────────────────────────

const CONFIG_KEYS: &[&str] = &[
    "mode",
    "interval",
    "cameras",
    "nodes",
    "save_image",
    "preload_model",
];

/// Canonical config, with the terminal's own defaults for missing keys.
pub fn normalize_config(raw: &Value) -> TerminalConfig {
    let defaults = TerminalConfig::default();
    let Some(obj) = unwrap_record(raw, "config") else {
        return defaults;
    };

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss, clippy::as_conversions)]
    let interval = as_number(obj.get("interval"))
        .filter(|n| n.is_finite() && *n >= 0.0)
        .map_or(defaults.interval, |n| n as u64);

    TerminalConfig {
        mode: obj
            .get("mode")
            .and_then(Value::as_str)
            .and_then(CaptureMode::parse)
            .unwrap_or(defaults.mode),
        interval,
        cameras: camera_map(first(obj, &["cameras", "nodes"])),
        save_image: as_bool(obj.get("save_image")).unwrap_or(defaults.save_image),
        preload_model: as_bool(obj.get("preload_model")).unwrap_or(defaults.preload_model),
        extra: passthrough(obj, CONFIG_KEYS),
    }
}

// ── Logs ─────────────────────────────────────────────────────────────

/// One log record. Bare strings become the message.
pub fn normalize_log_entry(raw: &Value) -> LogEntry {
    if let Value::String(message) = raw {
        return LogEntry {
            timestamp: now_rfc3339(),
            level: LogLevel::Info,
            message: message.clone(),
            source: DEFAULT_LOG_SOURCE.into(),
        };
    }

    let empty = Map::new();
    let obj = raw.as_object().unwrap_or(&empty);
    let text = |keys: &[&str]| {
        first(obj, keys)
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
    };

    LogEntry {
        timestamp: timestamp_string(first(obj, &["timestamp", "time"]))
            .unwrap_or_else(now_rfc3339),
        level: first(obj, &["level", "type"])
            .and_then(Value::as_str)
            .and_then(LogLevel::parse)
            .unwrap_or_default(),
        message: text(&["message", "msg"]).unwrap_or_else(|| PLACEHOLDER_LOG_MESSAGE.into()),
        source: text(&["source"]).unwrap_or_else(|| DEFAULT_LOG_SOURCE.into()),
    }
}

/// Log list. Anything but an array is an empty list.
pub fn normalize_logs(raw: &Value) -> Vec<LogEntry> {
    raw.as_array()
        .map(|items| items.iter().map(normalize_log_entry).collect())
        .unwrap_or_default()
}

// ── Events ───────────────────────────────────────────────────────────

const ENVELOPE_KEYS: &[&str] = &["type", "event", "timestamp", "request_id"];

/// The part of a frame that carries the payload.
fn frame_body(frame: &Map<String, Value>) -> Value {
    match frame.get("data") {
        Some(data) if !data.is_null() => data.clone(),
        _ => Value::Object(passthrough(frame, ENVELOPE_KEYS)),
    }
}

fn frame_timestamp(frame: &Map<String, Value>) -> DateTime<Utc> {
    timestamp_string(frame.get("timestamp"))
        .and_then(|s| DateTime::parse_from_rfc3339(&s).ok())
        .map_or_else(Utc::now, |dt| dt.with_timezone(&Utc))
}

fn message_text(body: &Value) -> String {
    match body {
        Value::String(s) => s.clone(),
        Value::Object(obj) => first(obj, &["message", "msg", "error"])
            .and_then(Value::as_str)
            .map_or_else(|| body.to_string(), str::to_owned),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Canonical event from a canonical `{type, ...}` frame.
pub fn normalize_event(frame: &Value, mode: ModeKind) -> TerminalEvent {
    let Some(obj) = frame.as_object() else {
        return TerminalEvent::now(EventPayload::Other {
            kind: "unknown".into(),
            data: frame.clone(),
        });
    };

    let kind = obj
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or("unknown")
        .to_owned();
    let body = frame_body(obj);

    let payload = match kind.as_str() {
        "status" | "status_update" | "system_status" => {
            EventPayload::Status(normalize_status(&body))
        }
        "update" | "config_update" => {
            EventPayload::Update(body.as_object().cloned().unwrap_or_default())
        }
        "log" | "new_log" => EventPayload::Log(normalize_log_entry(&body)),
        "detection" | "detection_result" => EventPayload::Detection(body),
        "message" => EventPayload::Message(message_text(&body)),
        "error" => EventPayload::Error(ErrorEvent {
            kind: ErrorKind::Terminal,
            message: message_text(&body),
            mode,
            fatal: false,
        }),
        "heartbeat" | "ping" | "pong" => EventPayload::Heartbeat,
        _ => EventPayload::Other { kind, data: body },
    };

    TerminalEvent {
        timestamp: frame_timestamp(obj),
        payload,
    }
}
