//! Plain (non-replicated) sheet payloads.
//!
//! `SheetData` is the grid as the widget and the fetch API see it: a name, a
//! row-major 2-D array of strings, and free-form column metadata objects.
//! The replicated form lives in `gridmesh-crdt`.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Name given to the sheet created when there is nothing else to show.
pub const DEFAULT_SHEET_NAME: &str = "sheet1";

/// Column metadata: an arbitrary JSON object (`{"width": 120, ...}`).
pub type ColumnMeta = Map<String, Value>;

/// One sheet in plain form.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetData {
    pub sheet_name: String,
    #[serde(default)]
    pub data: Vec<Vec<String>>,
    #[serde(default)]
    pub columns: Vec<ColumnMeta>,
    /// Informational `[cols, rows]` recorded at creation. Not enforced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_dimensions: Option<[u32; 2]>,
}

impl SheetData {
    pub fn new(sheet_name: impl Into<String>, data: Vec<Vec<String>>) -> Self {
        Self {
            sheet_name: sheet_name.into(),
            data,
            columns: Vec::new(),
            min_dimensions: None,
        }
    }

    /// Build from string slices, for tests and literals.
    pub fn from_rows<R, C>(sheet_name: impl Into<String>, rows: R) -> Self
    where
        R: IntoIterator<Item = C>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        let data = rows
            .into_iter()
            .map(|row| row.into_iter().map(Into::into).collect())
            .collect();
        Self::new(sheet_name, data)
    }

    pub fn with_columns(mut self, columns: Vec<ColumnMeta>) -> Self {
        self.columns = columns;
        self
    }

    /// An empty sheet named [`DEFAULT_SHEET_NAME`].
    pub fn default_sheet() -> Self {
        Self::new(DEFAULT_SHEET_NAME, Vec::new())
    }

    pub fn row_count(&self) -> usize {
        self.data.len()
    }

    /// Width of the widest row.
    pub fn column_count(&self) -> usize {
        self.data.iter().map(Vec::len).max().unwrap_or(0)
    }

    /// Cell at (`row`, `col`), if present.
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        self.data.get(row)?.get(col).map(String::as_str)
    }
}

// ============================================================================
// Tests
// ============================================================================
