//! Overlay composition backends

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::trace;

use super::region::{Rect, RegionId, BGRA_BPP};
use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};

/// Hardware composition path the compositor publishes into
pub trait OverlayBackend: Send {
    /// Reserve `slot` at `placement` on the overlay plane
    fn attach(&mut self, slot: RegionId, placement: Rect, format: PixelFormat) -> Result<()>;

    /// Publish a full canvas for `slot`
    fn commit(&mut self, slot: RegionId, pixels: &[u8]) -> Result<()>;

    /// Release `slot`; releasing an unknown slot is not an error
    fn detach(&mut self, slot: RegionId) -> Result<()>;
}

/// A slot as seen by the software backend
#[derive(Debug, Clone)]
pub struct AttachedRegion {
    pub placement: Rect,
    pub format: PixelFormat,
    /// Last committed canvas, empty until the first commit
    pub pixels: Vec<u8>,
    pub commits: u64,
}

/// In-memory backend used when no composition hardware is present
///
/// Clones share state, so a caller can keep a handle for inspecting what the
/// compositor published.
#[derive(Debug, Clone, Default)]
pub struct SoftwareOverlayBackend {
    slots: Arc<Mutex<HashMap<RegionId, AttachedRegion>>>,
}

impl SoftwareOverlayBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn attached(&self, slot: RegionId) -> Option<AttachedRegion> {
        self.slots.lock().get(&slot).cloned()
    }

    pub fn attached_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Copy every committed slot onto a transparent BGRA plane of `size`
    pub fn render(&self, size: Resolution) -> Vec<u8> {
        let width = size.width as usize;
        let mut plane = vec![0u8; width * size.height as usize * BGRA_BPP];

        let slots = self.slots.lock();
        let mut ids: Vec<_> = slots.keys().copied().collect();
        ids.sort_unstable();

        for id in ids {
            let region = &slots[&id];
            let p = region.placement;
            if region.pixels.is_empty() || !p.fits_in(size) {
                continue;
            }
            let row_len = p.w as usize * BGRA_BPP;
            for row in 0..p.h as usize {
                let src = &region.pixels[row * row_len..(row + 1) * row_len];
                let dst_start = ((p.y as usize + row) * width + p.x as usize) * BGRA_BPP;
                plane[dst_start..dst_start + row_len].copy_from_slice(src);
            }
        }
        plane
    }
}

impl OverlayBackend for SoftwareOverlayBackend {
    fn attach(&mut self, slot: RegionId, placement: Rect, format: PixelFormat) -> Result<()> {
        let mut slots = self.slots.lock();
        if slots.contains_key(&slot) {
            return Err(AppError::RuntimeError(format!(
                "Overlay slot {} already attached",
                slot
            )));
        }
        slots.insert(
            slot,
            AttachedRegion {
                placement,
                format,
                pixels: Vec::new(),
                commits: 0,
            },
        );
        Ok(())
    }

    fn commit(&mut self, slot: RegionId, pixels: &[u8]) -> Result<()> {
        let mut slots = self.slots.lock();
        let region = slots.get_mut(&slot).ok_or_else(|| {
            AppError::RuntimeError(format!("Overlay slot {} is not attached", slot))
        })?;

        let expected = region.placement.area() as usize * BGRA_BPP;
        if pixels.len() != expected {
            return Err(AppError::RuntimeError(format!(
                "Overlay slot {} canvas is {} bytes, expected {}",
                slot,
                pixels.len(),
                expected
            )));
        }

        region.pixels.clear();
        region.pixels.extend_from_slice(pixels);
        region.commits += 1;
        trace!("Committed overlay slot {} ({} bytes)", slot, pixels.len());
        Ok(())
    }

    fn detach(&mut self, slot: RegionId) -> Result<()> {
        self.slots.lock().remove(&slot);
        Ok(())
    }
}
