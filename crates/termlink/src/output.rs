//! Output formatting: JSON (default), compact JSON, or tables.

use std::io::{self, IsTerminal, Write};

use serde::Serialize;
use tabled::{Table, Tabled, settings::Style};

use crate::cli::{ColorMode, OutputFormat};
use crate::error::CliError;

pub fn should_color(mode: ColorMode) -> bool {
    match mode {
        ColorMode::Always => true,
        ColorMode::Never => false,
        ColorMode::Auto => io::stdout().is_terminal() && std::env::var("NO_COLOR").is_err(),
    }
}

/// Render one value. `table` falls back to `to_rows` for a field/value view.
pub fn render_single<T, R>(
    format: OutputFormat,
    data: &T,
    to_rows: impl Fn(&T) -> Vec<R>,
) -> Result<String, CliError>
where
    T: Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(data)?),
        OutputFormat::JsonCompact => Ok(serde_json::to_string(data)?),
        OutputFormat::Table => Ok(render_table(&to_rows(data))),
    }
}

pub fn render_list<T, R>(
    format: OutputFormat,
    data: &[T],
    to_row: impl Fn(&T) -> R,
) -> Result<String, CliError>
where
    T: Serialize,
    R: Tabled,
{
    match format {
        OutputFormat::Json => Ok(serde_json::to_string_pretty(data)?),
        OutputFormat::JsonCompact => Ok(serde_json::to_string(data)?),
        OutputFormat::Table => Ok(render_table(
            &data.iter().map(to_row).collect::<Vec<_>>(),
        )),
    }
}

pub fn print_output(output: &str) {
    if output.is_empty() {
        return;
    }
    let mut stdout = io::stdout().lock();
    let _ = writeln!(stdout, "{output}");
}

fn render_table<R: Tabled>(rows: &[R]) -> String {
    Table::new(rows).with(Style::rounded()).to_string()
}

// ── Field/value rows ─────────────────────────────────────────────────

#[derive(Tabled)]
pub struct Field {
    #[tabled(rename = "Field")]
    pub name: String,
    #[tabled(rename = "Value")]
    pub value: String,
}

/// Top-level keys of any serializable value as field/value rows.
pub fn fields_of<T: Serialize>(data: &T) -> Vec<Field> {
    match serde_json::to_value(data) {
        Ok(serde_json::Value::Object(map)) => map
            .into_iter()
            .map(|(name, value)| Field {
                name,
                value: match value {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                },
            })
            .collect(),
        Ok(other) => vec![Field {
            name: "value".into(),
            value: other.to_string(),
        }],
        Err(_) => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn fields_flatten_top_level_keys() {
        let rows = fields_of(&json!({"cpu_usage": 12.5, "mode": "push"}));
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].name, "cpu_usage");
        assert_eq!(rows[1].value, "push");
    }
}
