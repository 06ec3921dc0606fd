//! Fixed-capacity overlay region table

use tracing::{debug, info};

use super::backend::OverlayBackend;
use super::region::{Color, Orientation, Rect, Region, RegionId, RegionPurpose, MAX_REGIONS};
use crate::error::{AppError, Result};
use crate::video::format::{PixelFormat, Resolution};

/// Slots one `draw_rect` rectangle occupies: top, bottom, left, right
const RECT_STRIPS: usize = 4;

/// Owns the overlay slots and publishes canvases through an [`OverlayBackend`]
///
/// Callers draw in natural picture coordinates; placement on the overlay plane
/// and the canvas orientation are corrected here.
pub struct RegionCompositor {
    slots: Vec<Option<Region>>,
    camera: Option<Resolution>,
    orientation: Orientation,
    backend: Box<dyn OverlayBackend>,
}

impl RegionCompositor {
    pub fn new(orientation: Orientation, backend: Box<dyn OverlayBackend>) -> Self {
        Self {
            slots: (0..MAX_REGIONS).map(|_| None).collect(),
            camera: None,
            orientation,
            backend,
        }
    }

    /// Regions are positioned relative to this picture size
    pub fn bind_camera(&mut self, resolution: Resolution) {
        self.camera = Some(resolution);
    }

    pub fn camera(&self) -> Option<Resolution> {
        self.camera
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn len(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn available(&self) -> usize {
        MAX_REGIONS - self.len()
    }

    pub fn region(&self, id: RegionId) -> Option<&Region> {
        self.slots.get(id).and_then(|s| s.as_ref())
    }

    /// Allocate the lowest free slot for an application canvas
    pub fn add_region(
        &mut self,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
        format: PixelFormat,
    ) -> Result<RegionId> {
        let rect = Rect::new(x, y, width, height);
        self.validate(rect, format)?;

        let slot = self
            .slots
            .iter()
            .position(|s| s.is_none())
            .ok_or_else(|| AppError::RuntimeError("no region available".to_string()))?;

        self.allocate_at(slot, rect, format, RegionPurpose::Plain)?;
        debug!("Added overlay region {} at {:?}", slot, rect);
        Ok(slot)
    }

    /// Zeroed canvas for the region, BGRA8888 rows in natural orientation
    pub fn get_canvas(&mut self, id: RegionId) -> Result<&mut [u8]> {
        let region = self.region_mut(id)?;
        let canvas = region.canvas_mut();
        canvas.fill(0);
        Ok(canvas)
    }

    /// Apply the orientation correction to a copy of the canvas and publish it
    pub fn update_region(&mut self, id: RegionId) -> Result<()> {
        let pixels = self.region_mut(id)?.oriented_canvas();
        self.backend.commit(id, &pixels)
    }

    /// Free a slot; freeing an empty slot is a no-op
    pub fn del_region(&mut self, id: RegionId) -> Result<()> {
        if id >= MAX_REGIONS {
            return Err(AppError::ArgsError(format!(
                "Region id {} out of range [0, {})",
                id, MAX_REGIONS
            )));
        }
        if self.slots[id].is_none() {
            return Ok(());
        }
        self.backend.detach(id)?;
        self.slots[id] = None;
        debug!("Deleted overlay region {}", id);
        Ok(())
    }

    /// Free every slot
    pub fn clear(&mut self) -> Result<()> {
        for id in 0..MAX_REGIONS {
            self.del_region(id)?;
        }
        Ok(())
    }

    /// Draw a rectangle into slots `[id, id + 3]`
    ///
    /// The rectangle is clipped to the picture. `thickness <= 0`, or a border
    /// at least half the short side, paints one filled region; otherwise four
    /// non-overlapping strips form the border. Earlier rectangles in the same
    /// slots are replaced; application regions there are left alone and the
    /// call fails.
    #[allow(clippy::too_many_arguments)]
    pub fn draw_rect(
        &mut self,
        id: RegionId,
        x: i32,
        y: i32,
        width: i32,
        height: i32,
        color: Color,
        thickness: i32,
    ) -> Result<()> {
        let camera = self.require_camera()?;
        if id + RECT_STRIPS > MAX_REGIONS {
            return Err(AppError::ArgsError(format!(
                "Rectangle id {} out of range [0, {}]",
                id,
                MAX_REGIONS - RECT_STRIPS
            )));
        }

        let rect = Rect::clamp_signed(x, y, width, height, camera);
        if rect.is_empty() {
            return Err(AppError::ArgsError(format!(
                "Rectangle ({}, {}, {}, {}) is outside the {} picture",
                x, y, width, height, camera
            )));
        }

        let range = id..id + RECT_STRIPS;
        if let Some(busy) = range
            .clone()
            .find(|&i| matches!(&self.slots[i], Some(r) if r.purpose() != RegionPurpose::Rect))
        {
            return Err(AppError::RuntimeError(format!(
                "Region {} in [{}, {}] is used for another purpose",
                busy,
                id,
                id + RECT_STRIPS - 1
            )));
        }

        for i in range {
            self.del_region(i)?;
        }

        for (offset, strip) in border_strips(rect, thickness).into_iter().enumerate() {
            let slot = id + offset;
            self.allocate_at(slot, strip, PixelFormat::Bgra8888, RegionPurpose::Rect)?;
            self.region_mut(slot)?.fill(color);
            self.update_region(slot)?;
        }

        debug!(
            "Drew rectangle {} at {:?}, thickness {}",
            id, rect, thickness
        );
        Ok(())
    }

    /// Text needs a rasterizer the overlay path does not have
    #[allow(clippy::too_many_arguments)]
    pub fn draw_string(
        &mut self,
        _id: RegionId,
        _x: i32,
        _y: i32,
        _text: &str,
        _color: Color,
        _size: u32,
        _thickness: i32,
    ) -> Result<()> {
        Err(AppError::NotImplemented("draw_string".to_string()))
    }

    fn require_camera(&self) -> Result<Resolution> {
        self.camera
            .ok_or_else(|| AppError::NotReady("Bind a camera before adding regions".to_string()))
    }

    fn validate(&self, rect: Rect, format: PixelFormat) -> Result<Resolution> {
        let camera = self.require_camera()?;
        if format != PixelFormat::Bgra8888 {
            return Err(AppError::ArgsError(format!(
                "Regions support BGRA8888 only, got {}",
                format
            )));
        }
        if rect.is_empty() || !rect.fits_in(camera) {
            return Err(AppError::ArgsError(format!(
                "Region {:?} does not fit the {} picture",
                rect, camera
            )));
        }
        Ok(camera)
    }

    fn allocate_at(
        &mut self,
        slot: RegionId,
        rect: Rect,
        format: PixelFormat,
        purpose: RegionPurpose,
    ) -> Result<()> {
        let camera = self.validate(rect, format)?;
        let placement = self.orientation.place(rect, camera);
        self.backend.attach(slot, placement, format)?;
        self.slots[slot] = Some(Region::new(
            slot,
            rect,
            placement,
            format,
            purpose,
            self.orientation,
        ));
        Ok(())
    }

    fn region_mut(&mut self, id: RegionId) -> Result<&mut Region> {
        self.slots
            .get_mut(id)
            .and_then(|s| s.as_mut())
            .ok_or_else(|| AppError::ArgsError(format!("Region {} is not allocated", id)))
    }
}

impl Drop for RegionCompositor {
    fn drop(&mut self) {
        let used = self.len();
        if used > 0 {
            info!("Releasing {} overlay regions", used);
            let _ = self.clear();
        }
    }
}

/// Split a rectangle into the regions that paint it
fn border_strips(rect: Rect, thickness: i32) -> Vec<Rect> {
    let short_side = rect.w.min(rect.h);
    if thickness <= 0 || thickness as u32 >= short_side / 2 {
        return vec![rect];
    }

    let t = thickness as u32;
    let band_h = t.min(rect.h / 2);
    let band_w = t.min(rect.w / 2);
    let middle = rect.h - 2 * band_h;

    vec![
        Rect::new(rect.x, rect.y, rect.w, band_h),
        Rect::new(rect.x, rect.bottom() - band_h, rect.w, band_h),
        Rect::new(rect.x, rect.y + band_h, band_w, middle),
        Rect::new(rect.right() - band_w, rect.y + band_h, band_w, middle),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::overlay::backend::SoftwareOverlayBackend;

    const CAMERA: Resolution = Resolution {
        width: 64,
        height: 48,
    };

    fn compositor(orientation: Orientation) -> (RegionCompositor, SoftwareOverlayBackend) {
        let backend = SoftwareOverlayBackend::new();
        let mut c = RegionCompositor::new(orientation, Box::new(backend.clone()));
        c.bind_camera(CAMERA);
        (c, backend)
    }

    fn pixel(plane: &[u8], x: u32, y: u32) -> [u8; 4] {
        let i = ((y * CAMERA.width + x) * 4) as usize;
        [plane[i], plane[i + 1], plane[i + 2], plane[i + 3]]
    }

    #[test]
    fn test_sixteen_regions_then_full() {
        let (mut c, backend) = compositor(Orientation::NATURAL);
        for i in 0..MAX_REGIONS {
            assert_eq!(c.add_region(0, 0, 4, 4, PixelFormat::Bgra8888).unwrap(), i);
        }
        assert_eq!(c.available(), 0);

        match c.add_region(0, 0, 4, 4, PixelFormat::Bgra8888) {
            Err(AppError::RuntimeError(msg)) => assert_eq!(msg, "no region available"),
            other => panic!("unexpected {:?}", other),
        }

        c.del_region(5).unwrap();
        assert_eq!(backend.attached_count(), MAX_REGIONS - 1);
        assert_eq!(c.add_region(8, 8, 2, 2, PixelFormat::Bgra8888).unwrap(), 5);
    }

    #[test]
    fn test_add_region_requirements() {
        let mut c = RegionCompositor::new(
            Orientation::NATURAL,
            Box::new(SoftwareOverlayBackend::new()),
        );
        assert!(matches!(
            c.add_region(0, 0, 4, 4, PixelFormat::Bgra8888),
            Err(AppError::NotReady(_))
        ));

        c.bind_camera(CAMERA);
        assert!(matches!(
            c.add_region(0, 0, 4, 4, PixelFormat::Nv21),
            Err(AppError::ArgsError(_))
        ));
        assert!(matches!(
            c.add_region(60, 0, 8, 4, PixelFormat::Bgra8888),
            Err(AppError::ArgsError(_))
        ));
        assert!(matches!(
            c.add_region(0, 0, 0, 4, PixelFormat::Bgra8888),
            Err(AppError::ArgsError(_))
        ));
        assert!(c.is_empty());
    }

    #[test]
    fn test_overflowing_geometry_is_rejected() {
        let (mut c, backend) = compositor(Orientation::NATURAL);
        for (x, y, w, h) in [
            (u32::MAX - 1, 0, 4, 4),
            (0, u32::MAX - 1, 4, 4),
            (1, 1, u32::MAX, 4),
            (1, 1, 4, u32::MAX),
        ] {
            assert!(matches!(
                c.add_region(x, y, w, h, PixelFormat::Bgra8888),
                Err(AppError::ArgsError(_))
            ));
        }
        assert!(c.is_empty());
        assert_eq!(backend.attached_count(), 0);
    }

    #[test]
    fn test_del_region_idempotent() {
        let (mut c, _) = compositor(Orientation::NATURAL);
        let id = c.add_region(0, 0, 4, 4, PixelFormat::Bgra8888).unwrap();
        c.del_region(id).unwrap();
        c.del_region(id).unwrap();
        assert!(c.region(id).is_none());
        assert!(c.del_region(MAX_REGIONS).is_err());
    }

    #[test]
    fn test_update_applies_orientation() {
        let both = Orientation {
            horizontal: true,
            vertical: true,
        };
        let (mut c, backend) = compositor(both);
        let id = c.add_region(0, 0, 2, 2, PixelFormat::Bgra8888).unwrap();
        assert_eq!(c.region(id).unwrap().placement(), Rect::new(62, 46, 2, 2));

        let canvas = c.get_canvas(id).unwrap();
        assert!(canvas.iter().all(|&b| b == 0));
        // Mark the top-left pixel in natural coordinates
        canvas[..4].copy_from_slice(&[1, 2, 3, 4]);
        c.update_region(id).unwrap();

        let committed = backend.attached(id).unwrap().pixels;
        // Both corrections move it to the bottom-right corner of the canvas
        assert_eq!(&committed[12..16], &[1, 2, 3, 4]);
        assert!(committed[..12].iter().all(|&b| b == 0));
        // Local canvas keeps natural orientation
        assert_eq!(&c.region(id).unwrap().canvas()[..4], &[1, 2, 3, 4]);
    }

    #[test]
    fn test_thick_rect_is_fully_filled() {
        let (mut c, backend) = compositor(Orientation::NATURAL);
        let color = Color::rgb(10, 20, 30);
        // Short side 9, half is 4
        c.draw_rect(0, 5, 5, 15, 9, color, 4).unwrap();
        assert_eq!(c.len(), 1);

        let plane = backend.render(CAMERA);
        for y in 0..CAMERA.height {
            for x in 0..CAMERA.width {
                let inside = (5..20).contains(&x) && (5..14).contains(&y);
                let expected = if inside { color.to_bgra() } else { [0; 4] };
                assert_eq!(pixel(&plane, x, y), expected, "pixel ({}, {})", x, y);
            }
        }
    }

    #[test]
    fn test_bordered_rect_strips() {
        let (mut c, backend) = compositor(Orientation::NATURAL);
        c.draw_rect(4, 10, 10, 20, 10, Color::GREEN, 2).unwrap();
        assert_eq!(c.len(), 4);
        for id in 4..8 {
            assert_eq!(c.region(id).unwrap().purpose(), RegionPurpose::Rect);
        }

        // Strips tile the border exactly, no overlap
        let area: u64 = (4..8).map(|id| c.region(id).unwrap().rect().area()).sum();
        assert_eq!(area, 20 * 10 - 16 * 6);

        let plane = backend.render(CAMERA);
        assert_eq!(pixel(&plane, 10, 10), Color::GREEN.to_bgra());
        assert_eq!(pixel(&plane, 29, 19), Color::GREEN.to_bgra());
        assert_eq!(pixel(&plane, 11, 15), Color::GREEN.to_bgra());
        assert_eq!(pixel(&plane, 15, 15), [0; 4]);

        // Redrawing replaces the previous rectangle in place
        c.draw_rect(4, 0, 0, 8, 8, Color::RED, 0).unwrap();
        assert_eq!(c.len(), 1);
        assert_eq!(backend.attached_count(), 1);
    }

    #[test]
    fn test_rect_clipped_to_picture() {
        let (mut c, _) = compositor(Orientation::NATURAL);
        c.draw_rect(0, -10, 40, 30, 30, Color::WHITE, 0).unwrap();
        assert_eq!(c.region(0).unwrap().rect(), Rect::new(0, 40, 20, 8));

        assert!(matches!(
            c.draw_rect(0, 100, 100, 10, 10, Color::WHITE, 0),
            Err(AppError::ArgsError(_))
        ));
    }

    #[test]
    fn test_rect_conflicts() {
        let (mut c, _) = compositor(Orientation::NATURAL);
        c.add_region(0, 0, 4, 4, PixelFormat::Bgra8888).unwrap();
        c.add_region(0, 0, 4, 4, PixelFormat::Bgra8888).unwrap();

        assert!(matches!(
            c.draw_rect(0, 0, 0, 10, 10, Color::RED, 1),
            Err(AppError::RuntimeError(_))
        ));
        // Application regions survive the failed call
        assert_eq!(c.len(), 2);

        assert!(matches!(
            c.draw_rect(MAX_REGIONS - 3, 0, 0, 10, 10, Color::RED, 1),
            Err(AppError::ArgsError(_))
        ));
        c.draw_rect(MAX_REGIONS - 4, 0, 0, 10, 10, Color::RED, 1).unwrap();
    }

    #[test]
    fn test_draw_string_not_implemented() {
        let (mut c, _) = compositor(Orientation::NATURAL);
        assert!(matches!(
            c.draw_string(0, 0, 0, "hi", Color::WHITE, 16, 1),
            Err(AppError::NotImplemented(_))
        ));
    }
}
