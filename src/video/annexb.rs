//! Annex-B byte stream helpers

use crate::config::VideoCodec;

/// One NAL unit located inside an Annex-B buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct NalUnit<'a> {
    /// Start code + NAL bytes
    pub with_start_code: &'a [u8],
    /// NAL bytes only (header first)
    pub payload: &'a [u8],
}

/// Split an Annex-B buffer on 3- and 4-byte start codes
///
/// Bytes before the first start code are ignored. A buffer without any start
/// code is returned as a single unit.
pub fn split_nal_units(data: &[u8]) -> Vec<NalUnit<'_>> {
    // (start code offset, payload offset)
    let mut marks: Vec<(usize, usize)> = Vec::new();
    let mut i = 0;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 && data[i + 2] == 1 {
            let sc_start = if i > 0 && data[i - 1] == 0 { i - 1 } else { i };
            marks.push((sc_start, i + 3));
            i += 3;
        } else {
            i += 1;
        }
    }

    if marks.is_empty() {
        if data.is_empty() {
            return Vec::new();
        }
        return vec![NalUnit {
            with_start_code: data,
            payload: data,
        }];
    }

    marks
        .iter()
        .enumerate()
        .map(|(n, &(sc_start, payload_start))| {
            let end = marks.get(n + 1).map(|m| m.0).unwrap_or(data.len());
            NalUnit {
                with_start_code: &data[sc_start..end],
                payload: &data[payload_start..end],
            }
        })
        .filter(|nal| !nal.payload.is_empty())
        .collect()
}

/// NAL unit type from the first header byte(s)
pub fn nal_type(codec: VideoCodec, payload: &[u8]) -> Option<u8> {
    let first = *payload.first()?;
    Some(match codec {
        VideoCodec::H264 => first & 0x1F,
        VideoCodec::H265 => (first >> 1) & 0x3F,
    })
}

/// Whether the unit carries picture data (ends an access unit)
pub fn is_vcl(codec: VideoCodec, payload: &[u8]) -> bool {
    match (codec, nal_type(codec, payload)) {
        (VideoCodec::H264, Some(t)) => (1..=5).contains(&t),
        (VideoCodec::H265, Some(t)) => t <= 31,
        (_, None) => false,
    }
}

/// Whether the unit is an IDR/IRAP picture
pub fn is_keyframe(codec: VideoCodec, payload: &[u8]) -> bool {
    match (codec, nal_type(codec, payload)) {
        (VideoCodec::H264, Some(t)) => t == 5,
        (VideoCodec::H265, Some(t)) => (16..=21).contains(&t),
        (_, None) => false,
    }
}
