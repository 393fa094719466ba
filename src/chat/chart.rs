use crate::chat::models::TabularResult;
use regex::Regex;
use serde::Serialize;
use serde_json::Value;
use std::sync::OnceLock;

/// Which columns of a result feed a label/value chart.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ChartColumns {
    pub label: usize,
    pub value: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartPoint {
    pub label: String,
    pub value: f64,
}

/// Picks label and value columns from the first row.
///
/// Label: first cell, left to right, that is neither a number nor a numeric
/// string (defaults to 0). Value: first numeric or numeric-looking cell at a
/// different index (defaults to 1). Ties go to the leftmost match.
pub fn select_columns(first_row: &[Value]) -> ChartColumns {
    let label = first_row
        .iter()
        .position(|cell| !is_numeric_like(cell))
        .unwrap_or(0);

    let value = first_row
        .iter()
        .enumerate()
        .find(|(i, cell)| *i != label && is_numeric_like(cell))
        .map(|(i, _)| i)
        .unwrap_or(1);

    ChartColumns { label, value }
}

pub fn is_numeric_like(cell: &Value) -> bool {
    match cell {
        Value::Number(_) => true,
        Value::String(s) => {
            let trimmed = s.trim();
            !trimmed.is_empty() && trimmed.parse::<f64>().map(|n| n.is_finite()).unwrap_or(false)
        }
        _ => false,
    }
}

fn non_numeric_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^0-9.\-]").expect("static regex"))
}

/// Strips everything but digits, '.' and '-' and parses the rest; 0 when that fails.
pub fn coerce_value(cell: &Value) -> f64 {
    let text = match cell {
        Value::Number(n) => return n.as_f64().unwrap_or(0.0),
        Value::String(s) => s.as_str(),
        _ => return 0.0,
    };

    non_numeric_chars()
        .replace_all(text, "")
        .parse::<f64>()
        .unwrap_or(0.0)
}

fn label_text(cell: Option<&Value>) -> String {
    match cell {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// Builds chart points for every row using the columns chosen from the first row.
pub fn chart_points(table: &TabularResult) -> Vec<ChartPoint> {
    let Some(first_row) = table.rows.first() else {
        return Vec::new();
    };
    let columns = select_columns(first_row);

    table
        .rows
        .iter()
        .map(|row| ChartPoint {
            label: label_text(row.get(columns.label)),
            value: row.get(columns.value).map(coerce_value).unwrap_or(0.0),
        })
        .collect()
}
