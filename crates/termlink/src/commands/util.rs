//! Shared helpers for command handlers.

use serde_json::{Map, Value};

use crate::error::CliError;

/// Parse `key=value` arguments. Values that read as JSON (`5`, `true`,
/// `{"1":"gate"}`) keep their type; anything else is a string.
pub fn parse_pairs(pairs: &[String]) -> Result<Map<String, Value>, CliError> {
    let mut params = Map::new();
    for pair in pairs {
        let (key, raw) = pair
            .split_once('=')
            .ok_or_else(|| CliError::usage("parameter", format!("expected key=value, got '{pair}'")))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(CliError::usage("parameter", format!("empty key in '{pair}'")));
        }
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_owned()));
        params.insert(key.to_owned(), value);
    }
    Ok(params)
}
