//! On-screen overlay regions composited over the outgoing picture
//!
//! Regions are drawn into directly by the application and published to the
//! composition path without touching the encoder.

pub mod backend;
pub mod compositor;
pub mod region;

pub use backend::{AttachedRegion, OverlayBackend, SoftwareOverlayBackend};
pub use compositor::RegionCompositor;
pub use region::{Color, Orientation, Rect, Region, RegionId, RegionPurpose, MAX_REGIONS};
