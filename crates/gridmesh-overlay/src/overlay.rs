//! The presence overlay decision function.
//!
//! [`compute_overlays`] maps `(peer states, local selection, grid geometry)`
//! to one [`OverlayInstruction`] per peer. It touches no UI: geometry comes in
//! through [`GridGeometry`] and instructions go out to whatever paints them
//! (see [`crate::OverlayLayer`]).

use gridmesh_types::{ClientId, Position, PresenceRecord};
use tracing::trace;

/// A box in container coordinates (pixels, origin at the container's top-left
/// visible corner).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Rect {
    pub left: f64,
    pub top: f64,
    pub width: f64,
    pub height: f64,
}

impl Rect {
    pub fn new(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { left, top, width, height }
    }

    /// Scrolled above or left of the visible origin.
    pub fn is_scrolled_out(&self) -> bool {
        self.top < 0.0 || self.left < 0.0
    }
}

/// Where the rendered grid puts cells.
pub trait GridGeometry {
    /// Bounding box of cell (`col`, `row`) of sheet `sheet_idx`, relative to
    /// the overlay container. `None` when that cell is not rendered right now
    /// (another sheet is showing, the row is virtualized away, the container
    /// is detached).
    fn cell_rect(&self, sheet_idx: usize, col: u32, row: u32) -> Option<Rect>;
}

/// Where a peer's name label sits relative to its box.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LabelPlacement {
    Above,
    Below,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Label {
    pub text: String,
    pub placement: LabelPlacement,
}

/// What to do with one peer's overlay this frame.
#[derive(Clone, Debug, PartialEq)]
pub enum OverlayInstruction {
    /// The peer has no position: drop its overlay entirely.
    Remove { peer: ClientId },
    /// The peer's cell is scrolled out of view.
    Hide { peer: ClientId },
    /// Outline `rect` in `color`, with an optional name label.
    Show {
        peer: ClientId,
        rect: Rect,
        color: String,
        label: Option<Label>,
    },
}

impl OverlayInstruction {
    pub fn peer(&self) -> ClientId {
        match self {
            OverlayInstruction::Remove { peer }
            | OverlayInstruction::Hide { peer }
            | OverlayInstruction::Show { peer, .. } => *peer,
        }
    }
}

/// Decide every peer's overlay for this frame.
///
/// `local` is this client's own position, if it has one. Entries for
/// `local_client` are ignored. A peer whose cell cannot be resolved produces
/// no instruction: its previous overlay stays as is until the next presence
/// or scroll event retries.
pub fn compute_overlays<'a, G>(
    peers: impl IntoIterator<Item = (ClientId, &'a PresenceRecord)>,
    local_client: ClientId,
    local: Option<&Position>,
    geometry: &G,
) -> Vec<OverlayInstruction>
where
    G: GridGeometry + ?Sized,
{
    peers
        .into_iter()
        .filter(|(peer, _)| *peer != local_client)
        .filter_map(|(peer, record)| overlay_for(peer, record, local, geometry))
        .collect()
}

fn overlay_for<G: GridGeometry + ?Sized>(
    peer: ClientId,
    record: &PresenceRecord,
    local: Option<&Position>,
    geometry: &G,
) -> Option<OverlayInstruction> {
    let Some(position) = record.position.as_ref() else {
        return Some(OverlayInstruction::Remove { peer });
    };

    let (col, row) = position.selection.active_cell();
    let Some(rect) = geometry.cell_rect(position.sheet_idx, col, row) else {
        trace!("peer {} cell ({}, {}) not rendered, skipping", peer, col, row);
        return None;
    };

    if rect.is_scrolled_out() {
        return Some(OverlayInstruction::Hide { peer });
    }

    Some(OverlayInstruction::Show {
        peer,
        rect,
        color: record.user.color.clone(),
        label: label_for(record, position, local),
    })
}

fn label_for(record: &PresenceRecord, peer: &Position, local: Option<&Position>) -> Option<Label> {
    let local = local.filter(|local| local.sheet_idx == peer.sheet_idx);

    if local.is_some_and(|local| local.selection.contains(&peer.selection)) {
        return None;
    }

    let (_, peer_row) = peer.selection.active_cell();
    let below = local
        .and_then(|local| local.selection.single_row())
        .is_some_and(|local_row| local_row.checked_add(1) == Some(peer_row));

    Some(Label {
        text: record.user.name.clone(),
        placement: if below { LabelPlacement::Below } else { LabelPlacement::Above },
    })
}

// ============================================================================
// Tests
// ============================================================================
