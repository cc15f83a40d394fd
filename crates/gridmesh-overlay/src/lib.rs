//! Presence overlays for gridmesh.
//!
//! Split in two so the decision logic runs without a UI:
//!
//! - [`compute_overlays`]: pure, `(peers, local selection, geometry) →
//!   instructions`
//! - [`OverlayLayer`]: applies instructions through an [`OverlayPainter`]
//!   supplied by the UI
//!
//! Peer colors come from [`generate_color`], a pure hash of the identity
//! string.

mod color;
mod layer;
mod overlay;

pub use color::generate_color;
pub use layer::{OverlayLayer, OverlayPainter};
pub use overlay::{
    GridGeometry, Label, LabelPlacement, OverlayInstruction, Rect, compute_overlays,
};
