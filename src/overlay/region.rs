//! Overlay region types

use serde::{Deserialize, Serialize};

use crate::config::DeviceConfig;
use crate::video::format::{PixelFormat, Resolution};

/// Hardware overlay slots available on the composition path
pub const MAX_REGIONS: usize = 16;

/// Slot index in `0..MAX_REGIONS`
pub type RegionId = usize;

/// Regions are BGRA8888 only
pub(crate) const BGRA_BPP: usize = 4;

/// Axis-aligned rectangle in picture coordinates
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub w: u32,
    pub h: u32,
}

impl Rect {
    pub fn new(x: u32, y: u32, w: u32, h: u32) -> Self {
        Self { x, y, w, h }
    }

    pub fn right(&self) -> u32 {
        self.x.saturating_add(self.w)
    }

    pub fn bottom(&self) -> u32 {
        self.y.saturating_add(self.h)
    }

    pub fn area(&self) -> u64 {
        self.w as u64 * self.h as u64
    }

    pub fn is_empty(&self) -> bool {
        self.w == 0 || self.h == 0
    }

    pub fn fits_in(&self, bounds: Resolution) -> bool {
        let fits = |pos: u32, len: u32, limit: u32| {
            pos.checked_add(len).is_some_and(|end| end <= limit)
        };
        fits(self.x, self.w, bounds.width) && fits(self.y, self.h, bounds.height)
    }

    pub fn contains(&self, px: u32, py: u32) -> bool {
        px >= self.x && px < self.right() && py >= self.y && py < self.bottom()
    }

    /// Clamp a signed rectangle to `bounds`; parts outside the picture are cut off
    pub fn clamp_signed(x: i32, y: i32, w: i32, h: i32, bounds: Resolution) -> Self {
        let clamp_axis = |pos: i32, len: i32, limit: u32| -> (u32, u32) {
            let limit = limit as i64;
            let start = (pos as i64).clamp(0, limit);
            let end = (pos as i64 + len.max(0) as i64).clamp(0, limit);
            (start as u32, (end - start).max(0) as u32)
        };
        let (x, w) = clamp_axis(x, w, bounds.width);
        let (y, h) = clamp_axis(y, h, bounds.height);
        Self { x, y, w, h }
    }
}

/// Overlay colour, stored as BGRA8888 bytes on the canvas
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Color {
    pub const RED: Color = Color::rgb(255, 0, 0);
    pub const GREEN: Color = Color::rgb(0, 255, 0);
    pub const BLUE: Color = Color::rgb(0, 0, 255);
    pub const WHITE: Color = Color::rgb(255, 255, 255);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    /// From `0xAARRGGBB`
    pub const fn from_argb(hex: u32) -> Self {
        Self {
            a: (hex >> 24) as u8,
            r: (hex >> 16) as u8,
            g: (hex >> 8) as u8,
            b: hex as u8,
        }
    }

    pub fn to_bgra(self) -> [u8; 4] {
        [self.b, self.g, self.r, self.a]
    }
}

/// Corrections applied when a canvas is published
///
/// `horizontal` reverses pixels within each row, `vertical` reverses row order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Orientation {
    pub horizontal: bool,
    pub vertical: bool,
}

impl Orientation {
    pub const NATURAL: Orientation = Orientation {
        horizontal: false,
        vertical: false,
    };

    /// The overlay plane is mounted rotated relative to the sensor; the
    /// device flags describe the sensor correction, so the overlay needs the
    /// opposite on each axis.
    pub fn from_device(device: &DeviceConfig) -> Self {
        Self {
            horizontal: !device.cam_mirror,
            vertical: !device.cam_flip,
        }
    }

    /// Where a natural-coordinate rectangle lands on the overlay plane
    pub fn place(&self, rect: Rect, bounds: Resolution) -> Rect {
        let x = if self.horizontal {
            bounds.width - rect.w - rect.x
        } else {
            rect.x
        };
        let y = if self.vertical {
            bounds.height - rect.h - rect.y
        } else {
            rect.y
        };
        Rect::new(x, y, rect.w, rect.h)
    }

    /// Copy of `pixels` (row-major, `bpp` bytes each) with the corrections applied
    pub fn apply(&self, pixels: &[u8], width: usize, height: usize, bpp: usize) -> Vec<u8> {
        let stride = width * bpp;
        let mut out = pixels.to_vec();
        if stride == 0 || out.len() < stride * height {
            return out;
        }

        if self.horizontal {
            for row in out.chunks_exact_mut(stride).take(height) {
                for w in 0..width / 2 {
                    let (left, right) = (w * bpp, (width - 1 - w) * bpp);
                    for b in 0..bpp {
                        row.swap(left + b, right + b);
                    }
                }
            }
        }

        if self.vertical {
            for h in 0..height / 2 {
                let (top, bottom) = (h * stride, (height - 1 - h) * stride);
                let (head, tail) = out.split_at_mut(bottom);
                head[top..top + stride].swap_with_slice(&mut tail[..stride]);
            }
        }

        out
    }
}

/// What a slot was allocated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionPurpose {
    /// Allocated by the application through `add_region`
    Plain,
    /// One strip of a `draw_rect` rectangle
    Rect,
}

/// One allocated overlay canvas
#[derive(Debug, Clone)]
pub struct Region {
    id: RegionId,
    rect: Rect,
    /// Position on the overlay plane after orientation
    placement: Rect,
    format: PixelFormat,
    purpose: RegionPurpose,
    orientation: Orientation,
    canvas: Vec<u8>,
}

impl Region {
    pub(crate) fn new(
        id: RegionId,
        rect: Rect,
        placement: Rect,
        format: PixelFormat,
        purpose: RegionPurpose,
        orientation: Orientation,
    ) -> Self {
        let size = rect.w as usize * rect.h as usize * BGRA_BPP;
        Self {
            id,
            rect,
            placement,
            format,
            purpose,
            orientation,
            canvas: vec![0; size],
        }
    }

    pub fn id(&self) -> RegionId {
        self.id
    }

    pub fn rect(&self) -> Rect {
        self.rect
    }

    pub fn placement(&self) -> Rect {
        self.placement
    }

    pub fn format(&self) -> PixelFormat {
        self.format
    }

    pub fn purpose(&self) -> RegionPurpose {
        self.purpose
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn canvas(&self) -> &[u8] {
        &self.canvas
    }

    pub(crate) fn canvas_mut(&mut self) -> &mut [u8] {
        &mut self.canvas
    }

    pub fn fill(&mut self, color: Color) {
        let px = color.to_bgra();
        for chunk in self.canvas.chunks_exact_mut(4) {
            chunk.copy_from_slice(&px);
        }
    }

    /// Canvas with the orientation corrections applied, ready to commit
    pub fn oriented_canvas(&self) -> Vec<u8> {
        self.orientation.apply(
            &self.canvas,
            self.rect.w as usize,
            self.rect.h as usize,
            BGRA_BPP,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn px(v: u8) -> [u8; 4] {
        [v, v, v, 255]
    }

    #[test]
    fn test_clamp_signed() {
        let bounds = Resolution::new(640, 480);
        assert_eq!(Rect::clamp_signed(-10, -5, 50, 20, bounds), Rect::new(0, 0, 40, 15));
        assert_eq!(Rect::clamp_signed(600, 470, 100, 100, bounds), Rect::new(600, 470, 40, 10));
        assert!(Rect::clamp_signed(700, 0, 10, 10, bounds).is_empty());
        assert!(Rect::clamp_signed(0, 0, -3, 10, bounds).is_empty());
    }

    #[test]
    fn test_fits_in_does_not_wrap() {
        let bounds = Resolution::new(64, 48);
        assert!(Rect::new(60, 44, 4, 4).fits_in(bounds));
        assert!(!Rect::new(u32::MAX - 1, 0, 4, 4).fits_in(bounds));
        assert!(!Rect::new(0, 1, 4, u32::MAX).fits_in(bounds));
        assert_eq!(Rect::new(u32::MAX - 1, 0, 4, 4).right(), u32::MAX);
    }

    #[test]
    fn test_placement() {
        let bounds = Resolution::new(640, 480);
        let rect = Rect::new(10, 20, 100, 50);
        assert_eq!(Orientation::NATURAL.place(rect, bounds), rect);

        let both = Orientation {
            horizontal: true,
            vertical: true,
        };
        assert_eq!(both.place(rect, bounds), Rect::new(530, 410, 100, 50));
    }

    #[test]
    fn test_horizontal_reverses_rows() {
        // 3x2 canvas: [1 2 3] [4 5 6]
        let pixels: Vec<u8> = (1..=6).flat_map(px).collect();
        let o = Orientation {
            horizontal: true,
            vertical: false,
        };
        let out = o.apply(&pixels, 3, 2, 4);
        let expected: Vec<u8> = [3, 2, 1, 6, 5, 4].into_iter().flat_map(px).collect();
        assert_eq!(out, expected);
    }

    #[test]
    fn test_vertical_swaps_row_pairs() {
        // 2x3 canvas: [1 2] [3 4] [5 6]
        let pixels: Vec<u8> = (1..=6).flat_map(px).collect();
        let o = Orientation {
            horizontal: false,
            vertical: true,
        };
        let out = o.apply(&pixels, 2, 3, 4);
        let expected: Vec<u8> = [5, 6, 3, 4, 1, 2].into_iter().flat_map(px).collect();
        assert_eq!(out, expected);
        // Source is untouched
        assert_eq!(pixels[0], 1);
    }

    #[test]
    fn test_orientation_from_device() {
        let device = DeviceConfig {
            cam_flip: true,
            cam_mirror: false,
        };
        let o = Orientation::from_device(&device);
        assert!(o.horizontal);
        assert!(!o.vertical);
    }

    #[test]
    fn test_color_bgra() {
        assert_eq!(Color::from_argb(0x80FF2010).to_bgra(), [0x10, 0x20, 0xFF, 0x80]);
        assert_eq!(Color::RED.to_bgra(), [0, 0, 255, 255]);
    }
}
