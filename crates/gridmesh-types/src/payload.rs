//! Tabular export parsing.
//!
//! The document service exports sheet content as JSON row objects. Three
//! shapes are accepted:
//!
//! ```text
//! [ {"name": "a", "qty": 1}, ... ]                   single sheet → "sheet1"
//! { "inventory": [ {...} ], "orders": [ {...} ] }    one sheet per key
//! { "orders": [...], "private": { "notes": [...] } } private section → "notes (private)"
//! ```
//!
//! Each sheet's header row is the ordered union of its rows' keys, in
//! first-seen order. Cells are rendered as strings.

use indexmap::IndexSet;
use serde_json::Value;
use thiserror::Error;

use crate::sheet::{DEFAULT_SHEET_NAME, SheetData};

/// Key of the private-sheets section in a multi-sheet export.
pub const PRIVATE_SECTION: &str = "private";

/// Errors from parsing a tabular export.
#[derive(Error, Debug)]
pub enum PayloadError {
    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("unsupported export shape: expected an array or object, got {0}")]
    UnsupportedShape(&'static str),

    #[error("sheet {sheet:?}: expected an array of rows")]
    NotASheet { sheet: String },

    #[error("sheet {sheet:?}: row {index} is not an object")]
    NotARowObject { sheet: String, index: usize },
}

/// Parse an export from its JSON text.
pub fn parse_export(text: &str) -> Result<Vec<SheetData>, PayloadError> {
    let value: Value = serde_json::from_str(text)?;
    sheets_from_export(&value)
}

/// Convert a parsed export into sheets. An export with no sheets yields the
/// default empty sheet.
pub fn sheets_from_export(value: &Value) -> Result<Vec<SheetData>, PayloadError> {
    let mut sheets = match value {
        Value::Array(rows) => vec![sheet_from_rows(DEFAULT_SHEET_NAME, rows)?],
        Value::Object(sections) => {
            let mut sheets = Vec::with_capacity(sections.len());
            for (name, section) in sections {
                if name == PRIVATE_SECTION {
                    if let Value::Object(private) = section {
                        for (private_name, rows) in private {
                            let label = format!("{private_name} (private)");
                            sheets.push(sheet_from_section(&label, rows)?);
                        }
                        continue;
                    }
                }
                sheets.push(sheet_from_section(name, section)?);
            }
            sheets
        }
        other => return Err(PayloadError::UnsupportedShape(json_kind(other))),
    };

    if sheets.is_empty() {
        sheets.push(SheetData::default_sheet());
    }
    Ok(sheets)
}

fn sheet_from_section(name: &str, section: &Value) -> Result<SheetData, PayloadError> {
    match section {
        Value::Array(rows) => sheet_from_rows(name, rows),
        _ => Err(PayloadError::NotASheet { sheet: name.to_string() }),
    }
}

fn sheet_from_rows(name: &str, rows: &[Value]) -> Result<SheetData, PayloadError> {
    let mut header: IndexSet<&str> = IndexSet::new();
    for (index, row) in rows.iter().enumerate() {
        let Value::Object(fields) = row else {
            return Err(PayloadError::NotARowObject { sheet: name.to_string(), index });
        };
        header.extend(fields.keys().map(String::as_str));
    }

    if header.is_empty() {
        return Ok(SheetData::new(name, Vec::new()));
    }

    let mut data = Vec::with_capacity(rows.len() + 1);
    data.push(header.iter().map(|key| key.to_string()).collect());
    for row in rows {
        data.push(
            header
                .iter()
                .map(|key| row.get(*key).map(cell_text).unwrap_or_default())
                .collect(),
        );
    }
    Ok(SheetData::new(name, data))
}

/// Render a JSON scalar as cell text.
fn cell_text(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_sheet_export() {
        let sheets = parse_export(r#"[{"item":"bolt","qty":4},{"item":"nut","qty":null}]"#).unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].sheet_name, DEFAULT_SHEET_NAME);
        assert_eq!(
            sheets[0].data,
            vec![
                vec!["item".to_string(), "qty".to_string()],
                vec!["bolt".to_string(), "4".to_string()],
                vec!["nut".to_string(), String::new()],
            ]
        );
    }

    #[test]
    fn test_header_is_union_in_first_seen_order() {
        let sheets = parse_export(r#"[{"b":"1"},{"a":"2","b":"3"},{"c":true}]"#).unwrap();
        let data = &sheets[0].data;
        assert_eq!(data[0], vec!["b", "a", "c"]);
        assert_eq!(data[1], vec!["1", "", ""]);
        assert_eq!(data[2], vec!["3", "2", ""]);
        assert_eq!(data[3], vec!["", "", "true"]);
    }

    #[test]
    fn test_multi_sheet_with_private_section() {
        let text = r#"{
            "orders": [{"id": 1}],
            "private": { "notes": [{"text": "hi"}] },
            "stock": []
        }"#;
        let sheets = parse_export(text).unwrap();
        let names: Vec<&str> = sheets.iter().map(|s| s.sheet_name.as_str()).collect();
        assert_eq!(names, vec!["orders", "notes (private)", "stock"]);
        assert_eq!(sheets[1].cell(1, 0), Some("hi"));
        assert!(sheets[2].data.is_empty());
    }

    #[test]
    fn test_empty_export_yields_default_sheet() {
        let sheets = parse_export("{}").unwrap();
        assert_eq!(sheets.len(), 1);
        assert_eq!(sheets[0].sheet_name, DEFAULT_SHEET_NAME);
    }

    #[test]
    fn test_rejects_bad_shapes() {
        assert!(matches!(parse_export("42"), Err(PayloadError::UnsupportedShape("number"))));
        assert!(matches!(
            parse_export(r#"{"orders": 3}"#),
            Err(PayloadError::NotASheet { .. })
        ));
        assert!(matches!(
            parse_export(r#"[{"a":1}, "oops"]"#),
            Err(PayloadError::NotARowObject { index: 1, .. })
        ));
        assert!(matches!(parse_export("not json"), Err(PayloadError::Json(_))));
    }
}
