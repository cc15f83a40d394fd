//! Thin adapter between overlay instructions and a UI that draws them.

use std::collections::HashSet;

use gridmesh_types::{ClientId, Position, PresenceRecord};
use tracing::debug;

use crate::overlay::{GridGeometry, Label, OverlayInstruction, Rect, compute_overlays};

/// Draws peer overlays. Implemented by the UI layer.
pub trait OverlayPainter {
    /// Create or move the peer's outlined box and label.
    fn show(&mut self, peer: ClientId, rect: Rect, color: &str, label: Option<&Label>);
    /// Keep the peer's overlay but make it invisible.
    fn hide(&mut self, peer: ClientId);
    /// Destroy the peer's overlay.
    fn remove(&mut self, peer: ClientId);
}

/// Applies instructions to a painter and remembers which peers currently
/// have an overlay, so departed peers can be cleaned up.
pub struct OverlayLayer<P> {
    painter: P,
    live: HashSet<ClientId>,
}

impl<P: OverlayPainter> OverlayLayer<P> {
    pub fn new(painter: P) -> Self {
        Self {
            painter,
            live: HashSet::new(),
        }
    }

    pub fn painter(&self) -> &P {
        &self.painter
    }

    pub fn painter_mut(&mut self) -> &mut P {
        &mut self.painter
    }

    /// Peers that currently have an overlay (shown or hidden).
    pub fn live_peers(&self) -> impl Iterator<Item = ClientId> + '_ {
        self.live.iter().copied()
    }

    /// Apply one frame of instructions. Removing a peer that has no overlay
    /// is a no-op.
    pub fn apply(&mut self, instructions: impl IntoIterator<Item = OverlayInstruction>) {
        for instruction in instructions {
            match instruction {
                OverlayInstruction::Show { peer, rect, color, label } => {
                    self.painter.show(peer, rect, &color, label.as_ref());
                    self.live.insert(peer);
                }
                OverlayInstruction::Hide { peer } => {
                    self.painter.hide(peer);
                    self.live.insert(peer);
                }
                OverlayInstruction::Remove { peer } => {
                    if self.live.remove(&peer) {
                        self.painter.remove(peer);
                    }
                }
            }
        }
    }

    /// Recompute and repaint from the full current peer set. Call on every
    /// presence change and every scroll.
    ///
    /// Peers that had an overlay but are absent from `peers` are removed.
    pub fn redraw<'a, G>(
        &mut self,
        peers: &[(ClientId, &'a PresenceRecord)],
        local_client: ClientId,
        local: Option<&Position>,
        geometry: &G,
    ) where
        G: GridGeometry + ?Sized,
    {
        let present: HashSet<ClientId> = peers.iter().map(|(id, _)| *id).collect();
        let departed: Vec<ClientId> = self
            .live
            .iter()
            .filter(|id| !present.contains(id))
            .copied()
            .collect();
        if !departed.is_empty() {
            debug!("removing overlays for {} departed peers", departed.len());
        }

        let instructions = departed
            .into_iter()
            .map(|peer| OverlayInstruction::Remove { peer })
            .chain(compute_overlays(peers.iter().copied(), local_client, local, geometry));
        self.apply(instructions);
    }
}
