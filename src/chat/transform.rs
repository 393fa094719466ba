use crate::chat::models::TabularResult;
use crate::genie::models::StatementResponse;
use tracing::warn;

/// Converts a raw statement result into a `TabularResult`.
///
/// Returns `None` when there is nothing to show: neither a result section nor a
/// manifest, or rows whose width does not match the manifest columns.
/// Values are passed through untouched.
pub fn to_tabular_result(raw: &StatementResponse) -> Option<TabularResult> {
    if raw.result.is_none() && raw.manifest.is_none() {
        return None;
    }

    let column_names: Vec<String> = raw
        .manifest
        .as_ref()
        .and_then(|m| m.schema.as_ref())
        .map(|s| s.columns.iter().map(|c| c.name.clone()).collect())
        .unwrap_or_default();

    let rows = raw
        .result
        .as_ref()
        .and_then(|r| r.data_array.clone())
        .unwrap_or_default();

    if let Some(bad) = rows.iter().position(|row| row.len() != column_names.len()) {
        warn!(
            "Row {} has {} cells but the manifest lists {} columns",
            bad,
            rows[bad].len(),
            column_names.len()
        );
        return None;
    }

    let row_count = rows.len();
    let total_row_count = raw
        .manifest
        .as_ref()
        .and_then(|m| m.total_row_count)
        .map(|total| (total as usize).max(row_count))
        .unwrap_or(row_count);

    Some(TabularResult {
        column_names,
        rows,
        row_count,
        total_row_count,
    })
}
