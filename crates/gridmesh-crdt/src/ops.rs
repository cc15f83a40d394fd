//! Mutation operators.
//!
//! Every content change after initial population goes through these
//! functions. Each takes the open write transaction of the user action it
//! belongs to, so one action produces one changeset and one undo step.
//!
//! Bad indices are expected: a peer's structural edit can land between the
//! moment the UI computed an index and the moment the operator runs. Operators
//! therefore validate bounds against the live document and return
//! [`OpResult::Skipped`] instead of mutating or failing.

use gridmesh_types::ColumnMeta;
use tracing::{debug, warn};
use yrs::{Array, ArrayRef, Map, Out, ReadTxn, TransactionMut};

use crate::document::{
    KEY_VALUE, KEY_WIDTH, MIN_COLS, insert_cell_record, insert_column_meta, insert_row_record,
    read_cell_value, read_row_values,
};
use crate::value::out_to_json;

/// Width given to newly inserted columns.
pub const DEFAULT_COLUMN_WIDTH: u32 = 100;

/// Result of a mutation operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpResult {
    /// The document was changed.
    Applied,
    /// Nothing was changed (see reason).
    Skipped { reason: SkipReason },
}

impl OpResult {
    pub fn is_applied(&self) -> bool {
        matches!(self, OpResult::Applied)
    }

    fn skipped(reason: SkipReason) -> Self {
        OpResult::Skipped { reason }
    }
}

/// Why an operator left the document untouched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// No sheet at this index (a peer may have replaced the sheet set).
    SheetOutOfBounds { sheet: usize, sheets: usize },
    /// Row index outside `0..rows` (or `0..=rows` for insertion).
    RowOutOfBounds { row: usize, rows: usize },
    /// Column index outside the addressed row or sheet.
    ColumnOutOfBounds { col: usize, cols: usize },
    /// The record at the index is not the expected shape.
    MalformedRecord(String),
    /// The operation would not change anything (zero count, move onto self).
    NoChange,
}

// ============================================================================
// Cells
// ============================================================================

/// Set the `value` of the CellRecord at (`row`, `col`).
///
/// Bounds are per row: a short row rejects a column that a wider row would
/// accept.
pub fn set_cell(
    txn: &mut TransactionMut,
    data: &ArrayRef,
    row: usize,
    col: usize,
    value: &str,
) -> OpResult {
    let Some(row_ref) = row_at(&*txn, data, row) else {
        let rows = data.len(&*txn) as usize;
        warn!("set_cell: row {} out of bounds (rows={})", row, rows);
        return OpResult::skipped(SkipReason::RowOutOfBounds { row, rows });
    };

    let cols = row_ref.len(&*txn) as usize;
    match row_ref.get(&*txn, col as u32) {
        Some(Out::YMap(cell)) => {
            cell.insert(txn, KEY_VALUE, value.to_string());
            OpResult::Applied
        }
        Some(_) => {
            warn!("set_cell: cell ({}, {}) is not a map", row, col);
            OpResult::skipped(SkipReason::MalformedRecord(format!("cell ({row}, {col})")))
        }
        None => {
            warn!("set_cell: column {} out of bounds in row {} (cols={})", col, row, cols);
            OpResult::skipped(SkipReason::ColumnOutOfBounds { col, cols })
        }
    }
}

/// Read the cell text at (`row`, `col`), if the cell exists.
pub fn cell_value<T: ReadTxn>(txn: &T, data: &ArrayRef, row: usize, col: usize) -> Option<String> {
    let row_ref = row_at(txn, data, row)?;
    let cell = row_ref.get(txn, col as u32)?;
    Some(read_cell_value(txn, cell))
}

// ============================================================================
// Rows
// ============================================================================

/// Insert a RowRecord at `index`.
///
/// With `values`, one CellRecord per value. Otherwise `column_count` empty
/// cells, defaulting to the width of row 0, or the column floor for an empty
/// sheet.
pub fn insert_row(
    txn: &mut TransactionMut,
    data: &ArrayRef,
    index: usize,
    values: Option<Vec<String>>,
    column_count: Option<usize>,
) -> OpResult {
    let rows = data.len(&*txn) as usize;
    if index > rows {
        warn!("insert_row: index {} out of bounds (rows={})", index, rows);
        return OpResult::skipped(SkipReason::RowOutOfBounds { row: index, rows });
    }

    let values = match values {
        Some(values) => values,
        None => {
            let width = column_count
                .or_else(|| row_at(&*txn, data, 0).map(|r| r.len(&*txn) as usize))
                .unwrap_or(MIN_COLS);
            vec![String::new(); width]
        }
    };

    insert_row_record(txn, data, index as u32, values);
    OpResult::Applied
}

/// Remove `count` RowRecords starting at `index`. A count running past the
/// end is clamped.
pub fn delete_row(txn: &mut TransactionMut, data: &ArrayRef, index: usize, count: usize) -> OpResult {
    let rows = data.len(&*txn) as usize;
    if index >= rows {
        warn!("delete_row: index {} out of bounds (rows={})", index, rows);
        return OpResult::skipped(SkipReason::RowOutOfBounds { row: index, rows });
    }
    if count == 0 {
        return OpResult::skipped(SkipReason::NoChange);
    }

    let count = count.min(rows - index);
    data.remove_range(txn, index as u32, count as u32);
    OpResult::Applied
}

/// Move the row at `from` so that it lands before the row currently at `to`.
///
/// Delete-then-insert: when `from < to` the removal shifts every later row up
/// by one, so the insertion index is `to - 1`. The inverse of
/// `move_row(i, j)` is therefore `move_row(j - 1, i)` for `i < j` and
/// `move_row(j, i + 1)` for `i > j`.
pub fn move_row(txn: &mut TransactionMut, data: &ArrayRef, from: usize, to: usize) -> OpResult {
    let rows = data.len(&*txn) as usize;
    if from >= rows {
        warn!("move_row: from {} out of bounds (rows={})", from, rows);
        return OpResult::skipped(SkipReason::RowOutOfBounds { row: from, rows });
    }
    if to > rows {
        warn!("move_row: to {} out of bounds (rows={})", to, rows);
        return OpResult::skipped(SkipReason::RowOutOfBounds { row: to, rows });
    }

    let target = if from < to { to - 1 } else { to };
    if target == from {
        debug!("move_row: {} -> {} is a no-op", from, to);
        return OpResult::skipped(SkipReason::NoChange);
    }

    let Some(row) = row_at(&*txn, data, from) else {
        return OpResult::skipped(SkipReason::MalformedRecord(format!("row {from}")));
    };
    let values = read_row_values(&*txn, &row);
    data.remove(txn, from as u32);
    insert_row_record(txn, data, target as u32, values);
    OpResult::Applied
}

// ============================================================================
// Columns
// ============================================================================

/// Insert one cell at `index` into every row, taking `values[row]` or an empty
/// string, plus one ColumnMeta with the default width.
///
/// Valid indices are `0..=width` of row 0. Rows shorter than `index` get the
/// cell appended. The metadata entry goes at `index`, or at the end of
/// `columns` when that collection is shorter.
pub fn insert_column(
    txn: &mut TransactionMut,
    data: &ArrayRef,
    columns: &ArrayRef,
    index: usize,
    values: Option<&[String]>,
) -> OpResult {
    let width = row_at(&*txn, data, 0)
        .map(|r| r.len(&*txn) as usize)
        .unwrap_or(0);
    if index > width {
        warn!("insert_column: index {} out of bounds (cols={})", index, width);
        return OpResult::skipped(SkipReason::ColumnOutOfBounds { col: index, cols: width });
    }

    for (r, row) in rows(&*txn, data).into_iter().enumerate() {
        let at = index.min(row.len(&*txn) as usize);
        let value = values
            .and_then(|values| values.get(r))
            .cloned()
            .unwrap_or_default();
        insert_cell_record(txn, &row, at as u32, value);
    }

    let meta_at = index.min(columns.len(&*txn) as usize);
    let mut meta = ColumnMeta::new();
    meta.insert(KEY_WIDTH.to_string(), DEFAULT_COLUMN_WIDTH.into());
    insert_column_meta(txn, columns, meta_at as u32, &meta);
    OpResult::Applied
}

/// Remove `count` cells starting at `index` from every row, and the matching
/// ColumnMeta entries. Each row and the metadata are clamped independently.
pub fn delete_column(
    txn: &mut TransactionMut,
    data: &ArrayRef,
    columns: &ArrayRef,
    index: usize,
    count: usize,
) -> OpResult {
    let all_rows = rows(&*txn, data);
    let widest = all_rows
        .iter()
        .map(|row| row.len(&*txn) as usize)
        .max()
        .unwrap_or(0);
    let meta_len = columns.len(&*txn) as usize;
    let cols = widest.max(meta_len);
    if index >= cols {
        warn!("delete_column: index {} out of bounds (cols={})", index, cols);
        return OpResult::skipped(SkipReason::ColumnOutOfBounds { col: index, cols });
    }
    if count == 0 {
        return OpResult::skipped(SkipReason::NoChange);
    }

    for row in &all_rows {
        let len = row.len(&*txn) as usize;
        if index < len {
            row.remove_range(txn, index as u32, count.min(len - index) as u32);
        }
    }
    if index < meta_len {
        columns.remove_range(txn, index as u32, count.min(meta_len - index) as u32);
    }
    OpResult::Applied
}

/// Move column `from` before column `to` in every row and in the metadata,
/// with the same `to - 1` adjustment as [`move_row`]. Bounds are taken from
/// row 0.
pub fn move_column(
    txn: &mut TransactionMut,
    data: &ArrayRef,
    columns: &ArrayRef,
    from: usize,
    to: usize,
) -> OpResult {
    let width = row_at(&*txn, data, 0)
        .map(|r| r.len(&*txn) as usize)
        .unwrap_or(0);
    if from >= width {
        warn!("move_column: from {} out of bounds (cols={})", from, width);
        return OpResult::skipped(SkipReason::ColumnOutOfBounds { col: from, cols: width });
    }
    if to > width {
        warn!("move_column: to {} out of bounds (cols={})", to, width);
        return OpResult::skipped(SkipReason::ColumnOutOfBounds { col: to, cols: width });
    }

    let target = if from < to { to - 1 } else { to };
    if target == from {
        debug!("move_column: {} -> {} is a no-op", from, to);
        return OpResult::skipped(SkipReason::NoChange);
    }

    for row in rows(&*txn, data) {
        let len = row.len(&*txn) as usize;
        let Some(cell) = row.get(&*txn, from as u32) else {
            continue;
        };
        let value = read_cell_value(&*txn, cell);
        row.remove(txn, from as u32);
        insert_cell_record(txn, &row, target.min(len - 1) as u32, value);
    }

    let meta_len = columns.len(&*txn) as usize;
    if let Some(meta) = columns.get(&*txn, from as u32) {
        let meta = match out_to_json(&*txn, meta) {
            serde_json::Value::Object(fields) => fields,
            _ => ColumnMeta::new(),
        };
        columns.remove(txn, from as u32);
        insert_column_meta(txn, columns, target.min(meta_len - 1) as u32, &meta);
    }
    OpResult::Applied
}

// ============================================================================
// Helpers
// ============================================================================

/// The RowRecord at `index`, if present and well-formed.
pub fn row_at<T: ReadTxn>(txn: &T, data: &ArrayRef, index: usize) -> Option<ArrayRef> {
    match data.get(txn, index as u32) {
        Some(Out::YArray(row)) => Some(row),
        Some(_) => {
            warn!("row {} is not an array", index);
            None
        }
        None => None,
    }
}

fn rows<T: ReadTxn>(txn: &T, data: &ArrayRef) -> Vec<ArrayRef> {
    data.iter(txn)
        .filter_map(|row| match row {
            Out::YArray(row) => Some(row),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{SheetsDocument, TxnOrigin};
    use gridmesh_types::{ClientId, SheetData};
    use yrs::Transact;

    fn origin() -> TxnOrigin {
        TxnOrigin::local(ClientId::from_raw(1))
    }

    fn doc_with(rows: &[&[&str]]) -> SheetsDocument {
        let data = rows
            .iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect();
        SheetsDocument::from_sheets(&[SheetData::new("sheet1", data)], &origin())
    }

    /// Run one operator against sheet 0 in its own transaction.
    fn apply(
        doc: &SheetsDocument,
        f: impl FnOnce(&mut TransactionMut, &ArrayRef, &ArrayRef) -> OpResult,
    ) -> OpResult {
        let (result, _) = doc.transact_with(&origin(), |txn, doc| {
            let sheet = doc.require_sheet_in(&*txn, 0).unwrap();
            f(txn, &sheet.data, &sheet.columns)
        });
        result
    }

    fn column(doc: &SheetsDocument, col: usize, rows: usize) -> Vec<String> {
        let data = &doc.to_sheets()[0].data;
        data.iter().take(rows).map(|row| row[col].clone()).collect()
    }

    #[test]
    fn test_set_cell_then_read_back() {
        let doc = doc_with(&[]);
        let result = apply(&doc, |txn, data, _| set_cell(txn, data, 0, 0, "Test"));
        assert_eq!(result, OpResult::Applied);
        assert_eq!(doc.to_sheets()[0].data[0][0], "Test");

        let sheet = doc.sheet(0).unwrap();
        let txn = doc.doc().transact();
        assert_eq!(cell_value(&txn, &sheet.data, 0, 0).as_deref(), Some("Test"));
        assert_eq!(cell_value(&txn, &sheet.data, 99, 0), None);
    }

    #[test]
    fn test_set_cell_out_of_bounds_leaves_document_unchanged() {
        let doc = doc_with(&[&["a"]]);
        let before = doc.encode_state_as_update();
        let snapshot = doc.to_sheets();

        let result = apply(&doc, |txn, data, _| set_cell(txn, data, 20, 0, "x"));
        assert_eq!(
            result,
            OpResult::Skipped { reason: SkipReason::RowOutOfBounds { row: 20, rows: 20 } }
        );
        let result = apply(&doc, |txn, data, _| set_cell(txn, data, 0, 20, "x"));
        assert_eq!(
            result,
            OpResult::Skipped { reason: SkipReason::ColumnOutOfBounds { col: 20, cols: 20 } }
        );

        assert_eq!(doc.to_sheets(), snapshot);
        assert_eq!(doc.encode_state_as_update(), before);
    }

    #[test]
    fn test_insert_row_with_values_and_default_width() {
        let doc = doc_with(&[&["a"], &["b"]]);
        apply(&doc, |txn, data, _| {
            insert_row(txn, data, 1, Some(vec!["x".into(), "y".into()]), None)
        });
        apply(&doc, |txn, data, _| insert_row(txn, data, 0, None, None));
        apply(&doc, |txn, data, _| insert_row(txn, data, 0, None, Some(3)));

        let out = &doc.to_sheets()[0];
        assert_eq!(out.data.len(), 23);
        assert_eq!(out.data[0], vec!["", "", ""]);
        assert_eq!(out.data[1].len(), 20);
        assert_eq!(out.data[2][0], "a");
        assert_eq!(out.data[3], vec!["x", "y"]);
        assert_eq!(out.data[4][0], "b");

        let result = apply(&doc, |txn, data, _| insert_row(txn, data, 24, None, None));
        assert!(!result.is_applied());
    }

    #[test]
    fn test_delete_row_clamps_count() {
        let doc = doc_with(&[&["a"], &["b"], &["c"]]);
        apply(&doc, |txn, data, _| delete_row(txn, data, 1, 1));
        assert_eq!(column(&doc, 0, 2), vec!["a", "c"]);
        assert_eq!(doc.to_sheets()[0].data.len(), 19);

        apply(&doc, |txn, data, _| delete_row(txn, data, 10, 100));
        assert_eq!(doc.to_sheets()[0].data.len(), 10);

        let result = apply(&doc, |txn, data, _| delete_row(txn, data, 10, 1));
        assert!(matches!(result, OpResult::Skipped { reason: SkipReason::RowOutOfBounds { .. } }));
        let result = apply(&doc, |txn, data, _| delete_row(txn, data, 0, 0));
        assert_eq!(result, OpResult::Skipped { reason: SkipReason::NoChange });
    }

    #[test]
    fn test_move_row_down_adjusts_target() {
        let doc = doc_with(&[&["r0"], &["r1"], &["r2"], &["r3"]]);
        apply(&doc, |txn, data, _| move_row(txn, data, 0, 3));
        assert_eq!(column(&doc, 0, 4), vec!["r1", "r2", "r0", "r3"]);
    }

    #[test]
    fn test_move_row_up() {
        let doc = doc_with(&[&["r0"], &["r1"], &["r2"], &["r3"]]);
        apply(&doc, |txn, data, _| move_row(txn, data, 3, 1));
        assert_eq!(column(&doc, 0, 4), vec!["r0", "r3", "r1", "r2"]);
    }

    #[test]
    fn test_move_row_inverse_restores_order() {
        let labels: Vec<String> = (0..6).map(|i| format!("r{i}")).collect();
        for (i, j) in [(0, 4), (1, 6), (5, 0), (3, 1), (2, 2), (2, 3)] {
            let data: Vec<Vec<String>> = labels.iter().map(|l| vec![l.clone()]).collect();
            let doc = SheetsDocument::from_sheets(&[SheetData::new("s", data)], &origin());
            let original = column(&doc, 0, 20);

            apply(&doc, |txn, data, _| move_row(txn, data, i, j));
            let (inv_from, inv_to) = if i < j { (j - 1, i) } else { (j, i + 1) };
            apply(&doc, |txn, data, _| move_row(txn, data, inv_from, inv_to));

            assert_eq!(column(&doc, 0, 20), original, "move_row({i}, {j}) inverse");
        }
    }

    #[test]
    fn test_move_row_rejects_bad_indices() {
        let doc = doc_with(&[&["a"]]);
        assert!(!apply(&doc, |txn, data, _| move_row(txn, data, 20, 0)).is_applied());
        assert!(!apply(&doc, |txn, data, _| move_row(txn, data, 0, 21)).is_applied());
        assert!(apply(&doc, |txn, data, _| move_row(txn, data, 0, 20)).is_applied());
        assert_eq!(doc.to_sheets()[0].data[19][0], "a");
    }

    #[test]
    fn test_insert_column_shifts_cells_and_adds_meta() {
        let doc = doc_with(&[&["a", "b"], &["c", "d"]]);
        let values = vec!["x".to_string(), "y".to_string()];
        apply(&doc, |txn, data, columns| insert_column(txn, data, columns, 1, Some(&values)));

        let out = &doc.to_sheets()[0];
        assert_eq!(&out.data[0][..3], &["a", "x", "b"]);
        assert_eq!(&out.data[1][..3], &["c", "y", "d"]);
        assert_eq!(out.data[2][1], "");
        assert_eq!(out.data[0].len(), 21);
        assert_eq!(out.columns.len(), 1);
        assert_eq!(out.columns[0]["width"], serde_json::json!(100));
    }

    #[test]
    fn test_insert_column_beyond_width_is_skipped() {
        let doc = doc_with(&[&["a"]]);
        let result = apply(&doc, |txn, data, columns| insert_column(txn, data, columns, 21, None));
        assert_eq!(
            result,
            OpResult::Skipped { reason: SkipReason::ColumnOutOfBounds { col: 21, cols: 20 } }
        );
        assert!(doc.to_sheets()[0].columns.is_empty());
    }

    #[test]
    fn test_delete_column_removes_cells_and_meta() {
        let doc = doc_with(&[&["a", "b", "c"]]);
        apply(&doc, |txn, data, columns| insert_column(txn, data, columns, 0, None));
        apply(&doc, |txn, data, columns| delete_column(txn, data, columns, 0, 2));

        let out = &doc.to_sheets()[0];
        assert_eq!(&out.data[0][..2], &["b", "c"]);
        assert_eq!(out.data[0].len(), 19);
        assert!(out.columns.is_empty());

        let result = apply(&doc, |txn, data, columns| delete_column(txn, data, columns, 19, 1));
        assert!(!result.is_applied());
    }

    #[test]
    fn test_move_column_moves_meta_in_lockstep() {
        let columns: Vec<ColumnMeta> = (1..=3)
            .map(|w| serde_json::from_value(serde_json::json!({ "width": w })).unwrap())
            .collect();
        let data = vec![
            vec!["a".to_string(), "b".to_string(), "c".to_string()],
            vec!["d".to_string(), "e".to_string(), "f".to_string()],
        ];
        let sheet = SheetData::new("s", data).with_columns(columns);
        let doc = SheetsDocument::from_sheets(&[sheet], &origin());

        apply(&doc, |txn, data, columns| move_column(txn, data, columns, 0, 3));

        let out = &doc.to_sheets()[0];
        assert_eq!(&out.data[0][..3], &["b", "c", "a"]);
        assert_eq!(&out.data[1][..3], &["e", "f", "d"]);
        assert_eq!(out.data[0].len(), 20);
        let widths: Vec<_> = out.columns.iter().map(|m| m["width"].clone()).collect();
        assert_eq!(widths, vec![serde_json::json!(2), serde_json::json!(3), serde_json::json!(1)]);
    }

    #[test]
    fn test_move_column_left() {
        let columns: Vec<ColumnMeta> = (1..=3)
            .map(|w| serde_json::from_value(serde_json::json!({ "width": w })).unwrap())
            .collect();
        let sheet = SheetData::from_rows("s", [vec!["a", "b", "c"], vec!["d", "e", "f"]]).with_columns(columns);
        let doc = SheetsDocument::from_sheets(&[sheet], &origin());

        let result = apply(&doc, |txn, data, columns| move_column(txn, data, columns, 2, 0));
        assert_eq!(result, OpResult::Applied);

        let out = &doc.to_sheets()[0];
        assert_eq!(&out.data[0][..3], &["c", "a", "b"]);
        assert_eq!(&out.data[1][..3], &["f", "d", "e"]);
        assert_eq!(out.data[0].len(), 20);
        let widths: Vec<_> = out.columns.iter().map(|m| m["width"].clone()).collect();
        assert_eq!(widths, vec![serde_json::json!(3), serde_json::json!(1), serde_json::json!(2)]);
    }

    #[test]
    fn test_move_column_inverse_restores_order() {
        let labels: Vec<String> = (0..6).map(|i| format!("c{i}")).collect();
        for (i, j) in [(0, 4), (1, 6), (5, 0), (3, 1), (2, 2), (2, 3), (0, 20), (19, 0)] {
            let sheet = SheetData::new("s", vec![labels.clone()]);
            let doc = SheetsDocument::from_sheets(&[sheet], &origin());
            let original = doc.to_sheets()[0].data[0].clone();

            apply(&doc, |txn, data, columns| move_column(txn, data, columns, i, j));
            let (inv_from, inv_to) = if i < j { (j - 1, i) } else { (j, i + 1) };
            apply(&doc, |txn, data, columns| move_column(txn, data, columns, inv_from, inv_to));

            assert_eq!(doc.to_sheets()[0].data[0], original, "move_column({i}, {j}) inverse");
        }
    }

    #[test]
    fn test_move_column_self_is_no_change() {
        let doc = doc_with(&[&["a", "b"]]);
        let result = apply(&doc, |txn, data, columns| move_column(txn, data, columns, 1, 2));
        assert_eq!(result, OpResult::Skipped { reason: SkipReason::NoChange });
        let result = apply(&doc, |txn, data, columns| move_column(txn, data, columns, 0, 21));
        assert!(!result.is_applied());
    }
}
