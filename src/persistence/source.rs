use crate::dataset::types::IndexSource;
use crate::error::CommandError;

use std::path::Path;

/// Reads the records an `Index` command points at.
///
/// Files ending in `.json` must hold an array of strings. Anything else is
/// read as plain text, one record per non-empty line.
pub async fn load_records(source: &IndexSource) -> Result<Vec<String>, CommandError> {
    match source {
        IndexSource::Records(records) => Ok(clean(records.iter().map(String::as_str))),
        IndexSource::Path(path) => load_file(path).await,
    }
}

async fn load_file(path: &Path) -> Result<Vec<String>, CommandError> {
    let text = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| CommandError::Source(format!("{}: {}", path.display(), e)))?;

    let is_json = path
        .extension()
        .and_then(|ext| ext.to_str())
        .is_some_and(|ext| ext.eq_ignore_ascii_case("json"));

    if is_json {
        let records: Vec<String> = serde_json::from_str(&text)
            .map_err(|e| CommandError::Source(format!("{}: {}", path.display(), e)))?;
        Ok(clean(records.iter().map(String::as_str)))
    } else {
        Ok(clean(text.lines()))
    }
}

fn clean<'a>(records: impl Iterator<Item = &'a str>) -> Vec<String> {
    records
        .map(str::trim)
        .filter(|record| !record.is_empty())
        .map(str::to_string)
        .collect()
}
