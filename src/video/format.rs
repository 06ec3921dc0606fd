//! Pixel format definitions

use serde::{Deserialize, Serialize};
use std::fmt;

/// Pixel formats seen on the capture and overlay paths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PixelFormat {
    /// YVU420 semi-planar (NV21): Y plane + interleaved VU, the encoder's input format
    Nv21,
    /// YUV420 semi-planar (NV12)
    Nv12,
    /// 32-bit BGRA, the hardware overlay format
    Bgra8888,
    /// 24-bit RGB
    Rgb888,
    /// 8-bit grayscale
    Grey,
}

impl PixelFormat {
    /// Bytes per pixel for packed formats; `None` for semi-planar ones
    pub fn bytes_per_pixel(&self) -> Option<usize> {
        match self {
            PixelFormat::Nv21 | PixelFormat::Nv12 => None,
            PixelFormat::Bgra8888 => Some(4),
            PixelFormat::Rgb888 => Some(3),
            PixelFormat::Grey => Some(1),
        }
    }

    /// Buffer size of one `width`x`height` image
    pub fn frame_size(&self, resolution: Resolution) -> usize {
        let pixels = resolution.width as usize * resolution.height as usize;
        match self {
            PixelFormat::Nv21 | PixelFormat::Nv12 => pixels * 3 / 2,
            PixelFormat::Bgra8888 => pixels * 4,
            PixelFormat::Rgb888 => pixels * 3,
            PixelFormat::Grey => pixels,
        }
    }

    pub fn is_semi_planar(&self) -> bool {
        matches!(self, PixelFormat::Nv21 | PixelFormat::Nv12)
    }
}

impl fmt::Display for PixelFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PixelFormat::Nv21 => "NV21",
            PixelFormat::Nv12 => "NV12",
            PixelFormat::Bgra8888 => "BGRA8888",
            PixelFormat::Rgb888 => "RGB888",
            PixelFormat::Grey => "GREY",
        };
        write!(f, "{}", name)
    }
}

impl std::str::FromStr for PixelFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "NV21" | "YVU420SP" => Ok(PixelFormat::Nv21),
            "NV12" | "YUV420SP" => Ok(PixelFormat::Nv12),
            "BGRA8888" | "BGRA" => Ok(PixelFormat::Bgra8888),
            "RGB888" | "RGB24" => Ok(PixelFormat::Rgb888),
            "GREY" | "GRAY" => Ok(PixelFormat::Grey),
            _ => Err(format!("Unknown pixel format: {}", s)),
        }
    }
}

/// Resolution (width x height)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn pixels(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub const VGA: Resolution = Resolution {
        width: 640,
        height: 480,
    };
    pub const HD720: Resolution = Resolution {
        width: 1280,
        height: 720,
    };
    pub const HD1080: Resolution = Resolution {
        width: 1920,
        height: 1080,
    };
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

impl From<(u32, u32)> for Resolution {
    fn from((width, height): (u32, u32)) -> Self {
        Self { width, height }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frame_sizes() {
        let res = Resolution::new(640, 480);
        assert_eq!(PixelFormat::Nv21.frame_size(res), 640 * 480 * 3 / 2);
        assert_eq!(PixelFormat::Bgra8888.frame_size(res), 640 * 480 * 4);
        assert_eq!(PixelFormat::Bgra8888.bytes_per_pixel(), Some(4));
        assert!(PixelFormat::Nv21.is_semi_planar());
    }

    #[test]
    fn test_parse_aliases() {
        assert_eq!("yvu420sp".parse::<PixelFormat>().unwrap(), PixelFormat::Nv21);
        assert_eq!("BGRA".parse::<PixelFormat>().unwrap(), PixelFormat::Bgra8888);
        assert!("mjpeg".parse::<PixelFormat>().is_err());
    }
}
