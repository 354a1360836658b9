//! Result persistence helpers.
//!
//! Plain blocking writes: results are saved from callbacks at the tail
//! of an action's life, where a short synchronous write is acceptable
//! and keeps the callbacks trivially testable.

use std::fs;
use std::path::Path;

use serde_json::Value;
use tracing::debug;

use crate::error::QueueError;

/// Write `value` as pretty-printed JSON, creating parent directories.
pub fn save_json(value: &Value, path: &Path) -> Result<(), QueueError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let rendered = serde_json::to_string_pretty(value)?;
    fs::write(path, rendered)?;
    debug!(path = %path.display(), "saved json result");
    Ok(())
}

/// Write text verbatim, creating parent directories.
pub fn save_text(text: &str, path: &Path) -> Result<(), QueueError> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, text)?;
    debug!(path = %path.display(), "saved text result");
    Ok(())
}

/// Write a JSON array of rows as CSV, creating parent directories.
///
/// Accepts two row shapes: arrays of scalars written as-is, or objects
/// whose first row's keys become the header and order the columns.
/// Fields containing a comma, quote or newline are quoted.
pub fn save_csv(value: &Value, path: &Path) -> Result<(), QueueError> {
    let rows = value
        .as_array()
        .ok_or_else(|| QueueError::Csv("expected a JSON array of rows".to_string()))?;

    let mut lines: Vec<String> = Vec::with_capacity(rows.len() + 1);
    match rows.first() {
        None => {}
        Some(Value::Array(_)) => {
            for row in rows {
                let cells = row.as_array().ok_or_else(|| {
                    QueueError::Csv("mixed row shapes: expected every row to be an array".to_string())
                })?;
                lines.push(cells.iter().map(csv_field).collect::<Vec<_>>().join(","));
            }
        }
        Some(Value::Object(first)) => {
            let header: Vec<&String> = first.keys().collect();
            lines.push(
                header
                    .iter()
                    .map(|key| csv_field(&Value::String((*key).clone())))
                    .collect::<Vec<_>>()
                    .join(","),
            );
            for row in rows {
                let object = row.as_object().ok_or_else(|| {
                    QueueError::Csv("mixed row shapes: expected every row to be an object".to_string())
                })?;
                lines.push(
                    header
                        .iter()
                        .map(|key| csv_field(object.get(*key).unwrap_or(&Value::Null)))
                        .collect::<Vec<_>>()
                        .join(","),
                );
            }
        }
        Some(_) => {
            return Err(QueueError::Csv(
                "rows must be arrays or objects".to_string(),
            ))
        }
    }

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut rendered = lines.join("\n");
    rendered.push('\n');
    fs::write(path, rendered)?;
    debug!(path = %path.display(), rows = rows.len(), "saved csv result");
    Ok(())
}

fn csv_field(value: &Value) -> String {
    let raw = match value {
        Value::String(text) => text.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    };
    if raw.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", raw.replace('"', "\"\""))
    } else {
        raw
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn save_json_creates_parent_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/deeper/result.json");

        save_json(&json!({"ok": true}), &path).unwrap();

        let raw = std::fs::read_to_string(&path).unwrap();
        let parsed: Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed, json!({"ok": true}));
    }

    #[test]
    fn save_csv_writes_object_rows_with_header() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");

        save_csv(
            &json!([
                {"id": 1, "name": "alpha"},
                {"id": 2, "name": "has,comma"},
            ]),
            &path,
        )
        .unwrap();

        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "id,name\n1,alpha\n2,\"has,comma\"\n"
        );
    }

    #[test]
    fn save_csv_writes_array_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");

        save_csv(&json!([["a", 1], ["b", 2]]), &path).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "a,1\nb,2\n");
    }

    #[test]
    fn save_csv_quotes_embedded_quotes() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rows.csv");

        save_csv(&json!([["say \"hi\""]]), &path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "\"say \"\"hi\"\"\"\n"
        );
    }

    #[test]
    fn save_csv_rejects_non_array_data() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_csv(&json!({"not": "rows"}), &dir.path().join("x.csv")).unwrap_err();
        assert!(err.to_string().contains("array of rows"));
    }

    #[test]
    fn save_csv_rejects_mixed_row_shapes() {
        let dir = tempfile::tempdir().unwrap();
        let err = save_csv(
            &json!([{"id": 1}, ["not", "an", "object"]]),
            &dir.path().join("x.csv"),
        )
        .unwrap_err();
        assert!(err.to_string().contains("mixed row shapes"));
    }

    #[test]
    fn save_text_writes_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("result.txt");

        save_text("line one\nline two\n", &path).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "line one\nline two\n"
        );
    }
}
