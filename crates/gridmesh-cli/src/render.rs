//! Plain-text rendering of a sheet and of peer cursors.

use std::collections::BTreeMap;
use std::fmt::Write;

use gridmesh_overlay::{GridGeometry, Label, LabelPlacement, OverlayPainter, Rect};
use gridmesh_types::{ClientId, SheetData};

/// `0 -> A`, `25 -> Z`, `26 -> AA`.
pub fn column_name(mut col: usize) -> String {
    let mut name = Vec::new();
    loop {
        name.push(b'A' + (col % 26) as u8);
        if col < 26 {
            break;
        }
        col = col / 26 - 1;
    }
    name.reverse();
    String::from_utf8_lossy(&name).into_owned()
}

/// Render the top-left `max_rows` x `max_cols` of a sheet as a table.
pub fn render_sheet(sheet: &SheetData, max_rows: usize, max_cols: usize, cell_width: usize) -> String {
    let rows = sheet.row_count().min(max_rows);
    let cols = sheet.column_count().min(max_cols);
    let mut out = String::new();

    let _ = writeln!(out, "[{}] {}x{}", sheet.sheet_name, sheet.row_count(), sheet.column_count());
    let _ = write!(out, "{:>4} ", "");
    for col in 0..cols {
        let _ = write!(out, "|{:<cell_width$}", column_name(col));
    }
    out.push('\n');

    for row in 0..rows {
        let _ = write!(out, "{:>4} ", row);
        for col in 0..cols {
            let value = sheet.cell(row, col).unwrap_or("");
            let shown: String = value.chars().take(cell_width).collect();
            let _ = write!(out, "|{:<cell_width$}", shown);
        }
        out.push('\n');
    }
    out
}

/// Character-cell geometry of the rendered table, scrolled to
/// (`first_row`, `first_col`).
#[derive(Clone, Copy, Debug)]
pub struct TextGeometry {
    pub sheet_idx: usize,
    pub cell_width: usize,
    pub first_row: u32,
    pub first_col: u32,
}

impl GridGeometry for TextGeometry {
    fn cell_rect(&self, sheet_idx: usize, col: u32, row: u32) -> Option<Rect> {
        if sheet_idx != self.sheet_idx {
            return None;
        }
        let width = (self.cell_width + 1) as f64;
        Some(Rect::new(
            (f64::from(col) - f64::from(self.first_col)) * width,
            f64::from(row) - f64::from(self.first_row),
            width,
            1.0,
        ))
    }
}

impl TextGeometry {
    /// Inverse of [`GridGeometry::cell_rect`] for rects it produced.
    fn cell_at(&self, rect: &Rect) -> (usize, usize) {
        let width = (self.cell_width + 1) as f64;
        let col = (rect.left / width).round() as i64 + i64::from(self.first_col);
        let row = rect.top.round() as i64 + i64::from(self.first_row);
        (row.max(0) as usize, col.max(0) as usize)
    }
}

/// Collects one line per visible peer cursor.
#[derive(Debug)]
pub struct TextPainter {
    geometry: TextGeometry,
    cursors: BTreeMap<ClientId, String>,
}

impl TextPainter {
    pub fn new(geometry: TextGeometry) -> Self {
        Self { geometry, cursors: BTreeMap::new() }
    }

    pub fn set_geometry(&mut self, geometry: TextGeometry) {
        self.geometry = geometry;
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.cursors.values().map(String::as_str)
    }
}

impl OverlayPainter for TextPainter {
    fn show(&mut self, peer: ClientId, rect: Rect, color: &str, label: Option<&Label>) {
        let (row, col) = self.geometry.cell_at(&rect);
        let mut line = format!("{}{} {}", column_name(col), row, color);
        if let Some(label) = label {
            let side = match label.placement {
                LabelPlacement::Above => "above",
                LabelPlacement::Below => "below",
            };
            let _ = write!(line, " \"{}\" ({side})", label.text);
        }
        self.cursors.insert(peer, line);
    }

    fn hide(&mut self, peer: ClientId) {
        self.cursors.insert(peer, "(scrolled out of view)".to_string());
    }

    fn remove(&mut self, peer: ClientId) {
        self.cursors.remove(&peer);
    }
}
