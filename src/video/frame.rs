//! Captured and encoded frame containers

use bytes::{Bytes, BytesMut};
use std::time::Instant;

use super::format::{PixelFormat, Resolution};

/// One captured raw picture
#[derive(Debug, Clone)]
pub struct VideoFrame {
    data: Bytes,
    pub resolution: Resolution,
    pub format: PixelFormat,
    /// Capture sequence number
    pub sequence: u64,
    pub capture_ts: Instant,
}

impl VideoFrame {
    pub fn new(data: Bytes, resolution: Resolution, format: PixelFormat, sequence: u64) -> Self {
        Self {
            data,
            resolution,
            format,
            sequence,
            capture_ts: Instant::now(),
        }
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Cheap clone of the underlying buffer
    pub fn data_bytes(&self) -> Bytes {
        self.data.clone()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    pub fn width(&self) -> u32 {
        self.resolution.width
    }

    pub fn height(&self) -> u32 {
        self.resolution.height
    }
}

/// Output of one encoder pop: the NAL units completed since the last pop
///
/// The encoder emits parameter sets and the keyframe they describe in the same
/// batch, so a batch with more than one unit marks a decodable starting point.
#[derive(Debug, Clone, Default)]
pub struct EncodedBatch {
    units: Vec<Bytes>,
}

impl EncodedBatch {
    pub fn new(units: Vec<Bytes>) -> Self {
        Self { units }
    }

    pub fn push(&mut self, unit: Bytes) {
        self.units.push(unit);
    }

    pub fn units(&self) -> &[Bytes] {
        &self.units
    }

    /// Number of units in the batch
    pub fn len(&self) -> usize {
        self.units.len()
    }

    pub fn is_empty(&self) -> bool {
        self.units.is_empty()
    }

    pub fn total_size(&self) -> usize {
        self.units.iter().map(|u| u.len()).sum()
    }

    /// Join the units into one contiguous access unit
    pub fn concat(&self) -> Bytes {
        if self.units.len() == 1 {
            return self.units[0].clone();
        }
        let mut out = BytesMut::with_capacity(self.total_size());
        for unit in &self.units {
            out.extend_from_slice(unit);
        }
        out.freeze()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_concat_preserves_order() {
        let batch = EncodedBatch::new(vec![
            Bytes::from_static(&[0, 0, 0, 1, 0x67]),
            Bytes::from_static(&[0, 0, 0, 1, 0x68]),
            Bytes::from_static(&[0, 0, 0, 1, 0x65, 0xAA]),
        ]);
        assert_eq!(batch.len(), 3);
        assert_eq!(batch.total_size(), 16);
        assert_eq!(
            batch.concat().as_ref(),
            &[0, 0, 0, 1, 0x67, 0, 0, 0, 1, 0x68, 0, 0, 0, 1, 0x65, 0xAA]
        );
    }

    #[test]
    fn test_empty_batch() {
        let batch = EncodedBatch::default();
        assert!(batch.is_empty());
        assert!(batch.concat().is_empty());
    }
}
