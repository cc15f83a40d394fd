//! Replicated sheets document and the grid ↔ document converter.
//!
//! # Document Structure
//!
//! ```text
//! ROOT
//! └── sheets (Array)                    # ordered SheetRecords
//!     └── (Map)                         # SheetRecord
//!         ├── sheetName (Str)
//!         ├── minDimensions ([cols, rows])  # informational, set at creation
//!         ├── data (Array)              # RowRecords, in order
//!         │   └── (Array)               # RowRecord: CellRecords, in order
//!         │       └── (Map)             # CellRecord
//!         │           └── value (Str)   # LWW per cell
//!         └── columns (Array)           # ColumnMeta, independent of data width
//!             └── (Map) { width, ... }
//! ```
//!
//! # Write discipline
//!
//! [`SheetsDocument::load_sheets`] is the only bulk writer: it populates the
//! document on first open and, with `replace_existing`, swaps in fresh content
//! when the user discards their sheets. Everything else goes through the
//! operators in [`crate::ops`], one transaction per user action.

use std::sync::Arc;

use gridmesh_types::{ClientId, ColumnMeta, SheetData};
use tracing::{debug, warn};
use yrs::updates::decoder::Decode;
use yrs::updates::encoder::Encode;
use yrs::{
    Any, Array, ArrayPrelim, ArrayRef, Doc, Map, MapPrelim, MapRef, Out, ReadTxn, StateVector,
    Transact, TransactionMut, Update,
};

use crate::value::{any_to_cell_text, json_to_any, out_to_json};
use crate::{CrdtError, Result, TxnOrigin};

/// Root collection name.
pub const SHEETS_KEY: &str = "sheets";
pub(crate) const KEY_SHEET_NAME: &str = "sheetName";
pub(crate) const KEY_MIN_DIMENSIONS: &str = "minDimensions";
pub(crate) const KEY_DATA: &str = "data";
pub(crate) const KEY_COLUMNS: &str = "columns";
pub(crate) const KEY_VALUE: &str = "value";
pub(crate) const KEY_WIDTH: &str = "width";

/// Row floor applied when populating a sheet.
pub const MIN_ROWS: usize = 20;
/// Column floor applied when populating a sheet.
pub const MIN_COLS: usize = 20;

/// Options for [`SheetsDocument::load_sheets`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadOptions {
    /// Delete every existing SheetRecord before inserting the new set.
    pub replace_existing: bool,
    /// Row floor for each sheet.
    pub min_rows: usize,
    /// Cell floor for each row.
    pub min_cols: usize,
}

impl LoadOptions {
    /// Default floors, replacing whatever the document holds.
    pub fn replacing() -> Self {
        Self {
            replace_existing: true,
            ..Self::default()
        }
    }
}

impl Default for LoadOptions {
    fn default() -> Self {
        Self {
            replace_existing: false,
            min_rows: MIN_ROWS,
            min_cols: MIN_COLS,
        }
    }
}

/// Handles to one SheetRecord's containers, for passing to the operators.
#[derive(Clone)]
pub struct SheetRef {
    pub record: MapRef,
    pub data: ArrayRef,
    pub columns: ArrayRef,
}

/// A replicated document holding a `sheets` collection.
///
/// Cheap to clone: clones share the same underlying document.
#[derive(Clone)]
pub struct SheetsDocument {
    doc: Doc,
    sheets: ArrayRef,
}

impl SheetsDocument {
    /// Create an empty document with a random replica id.
    pub fn new() -> Self {
        Self::from_doc(Doc::new())
    }

    /// Create an empty document with a fixed replica id.
    pub fn with_client_id(client: ClientId) -> Self {
        Self::from_doc(Doc::with_client_id(client.get()))
    }

    /// Wrap an existing document. The `sheets` root is created if missing.
    pub fn from_doc(doc: Doc) -> Self {
        let sheets = doc.get_or_insert_array(SHEETS_KEY);
        Self { doc, sheets }
    }

    /// Grid → document: a new document populated with `sheets`.
    pub fn from_sheets(sheets: &[SheetData], origin: &TxnOrigin) -> Self {
        let document = Self::new();
        document.load_sheets(sheets, LoadOptions::default(), origin);
        document
    }

    // =========================================================================
    // Accessors
    // =========================================================================

    pub fn doc(&self) -> &Doc {
        &self.doc
    }

    /// The root `sheets` collection.
    pub fn sheets(&self) -> &ArrayRef {
        &self.sheets
    }

    pub fn client_id(&self) -> u64 {
        self.doc.client_id()
    }

    pub fn sheet_count(&self) -> usize {
        let txn = self.doc.transact();
        self.sheets.len(&txn) as usize
    }

    pub fn is_empty(&self) -> bool {
        self.sheet_count() == 0
    }

    pub fn sheet_names(&self) -> Vec<String> {
        let txn = self.doc.transact();
        self.sheets
            .iter(&txn)
            .map(|out| match out {
                Out::YMap(record) => read_sheet_name(&txn, &record),
                _ => String::new(),
            })
            .collect()
    }

    /// Handles for sheet `idx`. Opens its own read transaction: inside a
    /// write transaction use [`SheetsDocument::sheet_in`] instead.
    pub fn sheet(&self, idx: usize) -> Option<SheetRef> {
        let txn = self.doc.transact();
        self.sheet_in(&txn, idx)
    }

    /// Handles for sheet `idx`, read through an open transaction.
    pub fn sheet_in<T: ReadTxn>(&self, txn: &T, idx: usize) -> Option<SheetRef> {
        let Some(Out::YMap(record)) = self.sheets.get(txn, idx as u32) else {
            return None;
        };
        let data = match record.get(txn, KEY_DATA) {
            Some(Out::YArray(data)) => data,
            _ => return None,
        };
        let columns = match record.get(txn, KEY_COLUMNS) {
            Some(Out::YArray(columns)) => columns,
            _ => return None,
        };
        Some(SheetRef { record, data, columns })
    }

    /// Like [`SheetsDocument::sheet_in`] but as an error for call sites that
    /// require the sheet to exist.
    pub fn require_sheet_in<T: ReadTxn>(&self, txn: &T, idx: usize) -> Result<SheetRef> {
        self.sheet_in(txn, idx).ok_or(CrdtError::SheetNotFound(idx))
    }

    // =========================================================================
    // Grid → document
    // =========================================================================

    /// Populate the document from plain sheets in a single transaction.
    ///
    /// Each sheet is padded to at least `min_rows` rows and every row to at
    /// least `min_cols` cells (or the widest row, if wider). Column metadata
    /// is copied as-is and never padded.
    pub fn load_sheets(&self, sheets: &[SheetData], options: LoadOptions, origin: &TxnOrigin) {
        let mut txn = self.doc.transact_mut_with(origin.to_origin());

        if options.replace_existing {
            let existing = self.sheets.len(&txn);
            if existing > 0 {
                debug!("replacing {} existing sheets", existing);
                self.sheets.remove_range(&mut txn, 0, existing);
            }
        }

        for sheet in sheets {
            insert_sheet_record(&mut txn, &self.sheets, sheet, &options);
        }
    }

    // =========================================================================
    // Document → grid
    // =========================================================================

    /// Rebuild plain sheets from the replicated state.
    ///
    /// Tolerates malformed records: a record that is not a map is skipped,
    /// a cell that is not a map reads as empty.
    pub fn to_sheets(&self) -> Vec<SheetData> {
        let txn = self.doc.transact();
        self.sheets
            .iter(&txn)
            .enumerate()
            .filter_map(|(idx, out)| match out {
                Out::YMap(record) => Some(read_sheet(&txn, &record)),
                _ => {
                    warn!("sheet record {} is not a map, skipping", idx);
                    None
                }
            })
            .collect()
    }

    /// One sheet in plain form.
    pub fn sheet_data(&self, idx: usize) -> Option<SheetData> {
        let txn = self.doc.transact();
        match self.sheets.get(&txn, idx as u32) {
            Some(Out::YMap(record)) => Some(read_sheet(&txn, &record)),
            _ => None,
        }
    }

    // =========================================================================
    // Transactions
    // =========================================================================

    /// Run `f` inside one write transaction labelled `origin` and return its
    /// result together with the update bytes the transaction produced. The
    /// update holds only this transaction's inserts and deletions, so a
    /// transaction that changed nothing yields an [empty](is_empty_update)
    /// update.
    ///
    /// `f` must read through the transaction it is given
    /// ([`SheetsDocument::sheet_in`]), not open another one.
    pub fn transact_with<R>(
        &self,
        origin: &TxnOrigin,
        f: impl FnOnce(&mut TransactionMut, &Self) -> R,
    ) -> (R, Vec<u8>) {
        let mut txn = self.doc.transact_mut_with(origin.to_origin());
        let result = f(&mut txn, self);
        txn.commit();
        let update = txn.encode_update_v1();
        (result, update)
    }

    /// Run `f` (which may open its own transactions) and return the update
    /// describing everything it changed.
    pub fn capture<R>(&self, f: impl FnOnce() -> R) -> (R, Vec<u8>) {
        let before = self.doc.transact().state_vector();
        let result = f();
        let update = self.doc.transact().encode_state_as_update_v1(&before);
        (result, update)
    }

    // =========================================================================
    // Sync
    // =========================================================================

    /// Encoded state vector (v1).
    pub fn state_vector(&self) -> Vec<u8> {
        self.doc.transact().state_vector().encode_v1()
    }

    /// The full document as one update (v1).
    pub fn encode_state_as_update(&self) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(&StateVector::default())
    }

    /// The current state vector, as carried by a sync step 1.
    pub fn version(&self) -> StateVector {
        self.doc.transact().state_vector()
    }

    /// Everything a peer at `remote` is missing.
    pub fn diff_since(&self, remote: &StateVector) -> Vec<u8> {
        self.doc.transact().encode_state_as_update_v1(remote)
    }

    /// [`SheetsDocument::diff_since`] for an encoded state vector.
    pub fn encode_diff(&self, remote_sv: &[u8]) -> Result<Vec<u8>> {
        let sv = StateVector::decode_v1(remote_sv).map_err(|e| CrdtError::Decode {
            what: "state vector",
            message: e.to_string(),
        })?;
        Ok(self.diff_since(&sv))
    }

    /// Merge an update received from a peer.
    pub fn apply_update(&self, update: &[u8], origin: &TxnOrigin) -> Result<()> {
        let update = Update::decode_v1(update).map_err(|e| CrdtError::Decode {
            what: "update",
            message: e.to_string(),
        })?;
        let mut txn = self.doc.transact_mut_with(origin.to_origin());
        txn.apply_update(update)
            .map_err(|e| CrdtError::Apply(e.to_string()))
    }

    /// Merge a peer update under the remote origin, outside the undo scope.
    pub fn apply_remote_update(&self, update: &[u8]) -> Result<()> {
        self.apply_update(update, &TxnOrigin::remote())
    }
}

/// Whether `update` (v1) carries no inserts and no deletions, as captured
/// around a transaction that changed nothing.
pub fn is_empty_update(update: &[u8]) -> bool {
    update == EMPTY_UPDATE
}

/// Zero client blocks followed by an empty delete set.
const EMPTY_UPDATE: [u8; 2] = [0, 0];

impl Default for SheetsDocument {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// Record construction
// ============================================================================

fn insert_sheet_record(
    txn: &mut TransactionMut,
    sheets: &ArrayRef,
    sheet: &SheetData,
    options: &LoadOptions,
) {
    let record = sheets.push_back(txn, MapPrelim::default());
    record.insert(txn, KEY_SHEET_NAME, sheet.sheet_name.clone());

    let rows = sheet.data.len().max(options.min_rows);
    let cols = sheet.column_count().max(options.min_cols);
    let min_dimensions = Any::Array(Arc::from(vec![
        Any::Number(cols as f64),
        Any::Number(rows as f64),
    ]));
    record.insert(txn, KEY_MIN_DIMENSIONS, min_dimensions);

    let data = record.insert(txn, KEY_DATA, ArrayPrelim::default());
    for r in 0..rows {
        let source = sheet.data.get(r);
        let values = (0..cols).map(|c| {
            source
                .and_then(|row| row.get(c))
                .cloned()
                .unwrap_or_default()
        });
        insert_row_record(txn, &data, r as u32, values);
    }

    let columns = record.insert(txn, KEY_COLUMNS, ArrayPrelim::default());
    for (i, meta) in sheet.columns.iter().enumerate() {
        insert_column_meta(txn, &columns, i as u32, meta);
    }
}

/// Insert a RowRecord at `index` with one CellRecord per value.
pub(crate) fn insert_row_record(
    txn: &mut TransactionMut,
    data: &ArrayRef,
    index: u32,
    values: impl IntoIterator<Item = String>,
) -> ArrayRef {
    let row = data.insert(txn, index, ArrayPrelim::default());
    for value in values {
        let cell = row.push_back(txn, MapPrelim::default());
        cell.insert(txn, KEY_VALUE, value);
    }
    row
}

/// Insert a CellRecord at `index` of a RowRecord.
pub(crate) fn insert_cell_record(txn: &mut TransactionMut, row: &ArrayRef, index: u32, value: String) {
    let cell = row.insert(txn, index, MapPrelim::default());
    cell.insert(txn, KEY_VALUE, value);
}

/// Insert a ColumnMeta map at `index` of the `columns` collection.
pub(crate) fn insert_column_meta(
    txn: &mut TransactionMut,
    columns: &ArrayRef,
    index: u32,
    meta: &ColumnMeta,
) {
    let map = columns.insert(txn, index, MapPrelim::default());
    for (key, value) in meta {
        map.insert(txn, key.as_str(), json_to_any(value));
    }
}

// ============================================================================
// Record reading
// ============================================================================

fn read_sheet_name<T: ReadTxn>(txn: &T, record: &MapRef) -> String {
    match record.get(txn, KEY_SHEET_NAME) {
        Some(Out::Any(any)) => any_to_cell_text(&any),
        _ => String::new(),
    }
}

fn read_sheet<T: ReadTxn>(txn: &T, record: &MapRef) -> SheetData {
    let sheet_name = read_sheet_name(txn, record);

    let data = match record.get(txn, KEY_DATA) {
        Some(Out::YArray(rows)) => rows
            .iter(txn)
            .map(|row| match row {
                Out::YArray(row) => read_row_values(txn, &row),
                _ => {
                    warn!("sheet {:?} has a row that is not an array", sheet_name);
                    Vec::new()
                }
            })
            .collect(),
        _ => {
            warn!("sheet {:?} has no data collection", sheet_name);
            Vec::new()
        }
    };

    let columns = match record.get(txn, KEY_COLUMNS) {
        Some(Out::YArray(columns)) => columns
            .iter(txn)
            .filter_map(|meta| match out_to_json(txn, meta) {
                serde_json::Value::Object(fields) => Some(fields),
                _ => None,
            })
            .collect(),
        _ => Vec::new(),
    };

    let min_dimensions = match record.get(txn, KEY_MIN_DIMENSIONS) {
        Some(Out::Any(Any::Array(dims))) if dims.len() == 2 => match (&dims[0], &dims[1]) {
            (Any::Number(c), Any::Number(r)) => Some([*c as u32, *r as u32]),
            _ => None,
        },
        _ => None,
    };

    SheetData {
        sheet_name,
        data,
        columns,
        min_dimensions,
    }
}

/// The `value` of every CellRecord in a RowRecord.
pub(crate) fn read_row_values<T: ReadTxn>(txn: &T, row: &ArrayRef) -> Vec<String> {
    row.iter(txn).map(|cell| read_cell_value(txn, cell)).collect()
}

pub(crate) fn read_cell_value<T: ReadTxn>(txn: &T, cell: Out) -> String {
    match cell {
        Out::YMap(cell) => match cell.get(txn, KEY_VALUE) {
            Some(Out::Any(any)) => any_to_cell_text(&any),
            _ => String::new(),
        },
        Out::Any(any) => any_to_cell_text(&any),
        _ => String::new(),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn grid(rows: &[&[&str]]) -> Vec<Vec<String>> {
        rows.iter()
            .map(|row| row.iter().map(|v| v.to_string()).collect())
            .collect()
    }

    fn local() -> TxnOrigin {
        TxnOrigin::local(ClientId::from_raw(1))
    }

    #[test]
    fn test_three_by_three_is_padded_to_floor() {
        let sheet = SheetData::new("sheet1", grid(&[&["A", "B", "C"], &["D", "E", "F"], &["G", "H", "I"]]));
        let doc = SheetsDocument::from_sheets(&[sheet], &local());
        let out = doc.to_sheets();

        assert_eq!(out.len(), 1);
        assert_eq!(out[0].data.len(), 20);
        assert_eq!(out[0].data[0].len(), 20);
        assert_eq!(&out[0].data[0][..4], &["A", "B", "C", ""]);
        assert!(out[0].data[0][3..].iter().all(String::is_empty));
        assert_eq!(out[0].data[2][2], "I");
        assert!(out[0].data[19].iter().all(String::is_empty));
    }

    #[test]
    fn test_small_grids_keep_coordinates() {
        for (rows, cols) in [(1, 1), (5, 20), (20, 3), (20, 20), (7, 13)] {
            let data: Vec<Vec<String>> = (0..rows)
                .map(|r| (0..cols).map(|c| format!("{r}:{c}")).collect())
                .collect();
            let doc = SheetsDocument::from_sheets(&[SheetData::new("s", data)], &local());
            let out = &doc.to_sheets()[0];

            assert_eq!(out.data.len(), MIN_ROWS);
            for r in 0..MIN_ROWS {
                assert_eq!(out.data[r].len(), MIN_COLS);
                for c in 0..MIN_COLS {
                    let expected = if r < rows && c < cols { format!("{r}:{c}") } else { String::new() };
                    assert_eq!(out.data[r][c], expected, "cell ({r}, {c}) of {rows}x{cols}");
                }
            }
        }
    }

    #[test]
    fn test_wide_rows_are_not_truncated() {
        let wide: Vec<String> = (0..25).map(|c| c.to_string()).collect();
        let doc = SheetsDocument::from_sheets(&[SheetData::new("wide", vec![wide])], &local());
        let out = &doc.to_sheets()[0];
        assert_eq!(out.data[0].len(), 25);
        assert_eq!(out.data[0][24], "24");
        assert_eq!(out.data[19].len(), 25);
        assert_eq!(out.min_dimensions, Some([25, 20]));
    }

    #[test]
    fn test_two_sheets_keep_insertion_order() {
        let doc = SheetsDocument::from_sheets(
            &[SheetData::new("sheet1", vec![]), SheetData::new("sheet2", vec![])],
            &local(),
        );
        assert_eq!(doc.sheet_count(), 2);
        assert_eq!(doc.sheet_names(), vec!["sheet1", "sheet2"]);
    }

    #[test]
    fn test_replace_existing_leaves_only_new_sheets() {
        let doc = SheetsDocument::from_sheets(
            &[SheetData::new("a1", vec![]), SheetData::new("a2", vec![])],
            &local(),
        );
        doc.load_sheets(
            &[SheetData::from_rows("b1", [vec!["fresh"]])],
            LoadOptions::replacing(),
            &local(),
        );

        let out = doc.to_sheets();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].sheet_name, "b1");
        assert_eq!(out[0].data[0][0], "fresh");
    }

    #[test]
    fn test_custom_floor() {
        let doc = SheetsDocument::new();
        let options = LoadOptions { min_rows: 3, min_cols: 2, ..LoadOptions::default() };
        doc.load_sheets(&[SheetData::from_rows("s", [vec!["a"]])], options, &local());
        let out = &doc.to_sheets()[0];
        assert_eq!(out.data, vec![vec!["a", ""], vec!["", ""], vec!["", ""]]);
    }

    #[test]
    fn test_load_without_replace_appends() {
        let doc = SheetsDocument::from_sheets(&[SheetData::new("a", vec![])], &local());
        doc.load_sheets(&[SheetData::new("b", vec![])], LoadOptions::default(), &local());
        assert_eq!(doc.sheet_names(), vec!["a", "b"]);
    }

    #[test]
    fn test_empty_data_pads_and_leaves_columns_untouched() {
        let doc = SheetsDocument::from_sheets(&[SheetData::new("blank", vec![])], &local());
        let out = &doc.to_sheets()[0];
        assert_eq!(out.data.len(), 20);
        assert!(out.data.iter().all(|row| row.len() == 20 && row.iter().all(String::is_empty)));
        assert!(out.columns.is_empty());
    }

    #[test]
    fn test_columns_are_copied_verbatim() {
        let columns: Vec<ColumnMeta> = vec![
            serde_json::from_str(r#"{"width": 120, "title": "Name"}"#).unwrap(),
            serde_json::from_str(r#"{"width": 80}"#).unwrap(),
        ];
        let sheet = SheetData::new("cols", vec![]).with_columns(columns.clone());
        let doc = SheetsDocument::from_sheets(&[sheet], &local());
        assert_eq!(doc.to_sheets()[0].columns, columns);
    }

    #[test]
    fn test_sheet_handles() {
        let doc = SheetsDocument::from_sheets(&[SheetData::new("s", vec![])], &local());
        assert!(doc.sheet(0).is_some());
        assert!(doc.sheet(1).is_none());

        let txn = doc.doc().transact();
        assert!(matches!(doc.require_sheet_in(&txn, 3), Err(CrdtError::SheetNotFound(3))));
    }

    #[test]
    fn test_sync_between_replicas() {
        let a = SheetsDocument::with_client_id(ClientId::from_raw(1));
        a.load_sheets(&[SheetData::from_rows("s", [vec!["x"]])], LoadOptions::default(), &local());

        let b = SheetsDocument::with_client_id(ClientId::from_raw(2));
        let diff = a.encode_diff(&b.state_vector()).unwrap();
        b.apply_update(&diff, &TxnOrigin::remote()).unwrap();

        assert_eq!(b.to_sheets(), a.to_sheets());
    }

    #[test]
    fn test_capture_reports_changes() {
        let doc = SheetsDocument::with_client_id(ClientId::from_raw(1));
        let ((), update) = doc.transact_with(&local(), |txn, doc| {
            let options = LoadOptions::default();
            insert_sheet_record(txn, doc.sheets(), &SheetData::new("s", vec![]), &options);
        });

        let replica = SheetsDocument::with_client_id(ClientId::from_raw(2));
        replica.apply_update(&update, &TxnOrigin::remote()).unwrap();
        assert_eq!(replica.sheet_names(), vec!["s"]);
    }

    #[test]
    fn test_unchanged_capture_is_empty() {
        let doc = SheetsDocument::from_sheets(&[SheetData::from_rows("s", [vec!["x"]])], &local());
        let ((), update) = doc.transact_with(&local(), |_, _| {});
        assert!(is_empty_update(&update));

        let ((), update) = doc.transact_with(&local(), |txn, doc| {
            let sheet = doc.require_sheet_in(&*txn, 0).unwrap();
            crate::ops::set_cell(txn, &sheet.data, 0, 0, "y");
        });
        assert!(!is_empty_update(&update));

        // Earlier deletions stay out of later updates.
        doc.transact_with(&local(), |txn, doc| {
            let sheet = doc.require_sheet_in(&*txn, 0).unwrap();
            crate::ops::delete_row(txn, &sheet.data, 0, 1);
        });
        let ((), update) = doc.transact_with(&local(), |_, _| {});
        assert!(is_empty_update(&update));
    }

    #[test]
    fn test_garbage_update_is_an_error() {
        let doc = SheetsDocument::new();
        assert!(matches!(
            doc.apply_update(&[0xff, 0xff, 0xff], &TxnOrigin::remote()),
            Err(CrdtError::Decode { .. })
        ));
        assert!(doc.encode_diff(&[0xff, 0xff]).is_err());
    }
}
