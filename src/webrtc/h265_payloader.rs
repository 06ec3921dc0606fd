//! RFC 7798 payloader for H.265 access units
//!
//! ```text
//! PayloadHdr (2 bytes)              FU header (1 byte)
//! +---------------+---------------+ +---------------+
//! |F|   Type    |  LayerId  | TID | |S|E|  FuType   |
//! +---------------+---------------+ +---------------+
//! ```
//!
//! Parameter sets (VPS/SPS/PPS) are held back and sent in one aggregation
//! packet (type 48) in front of the next picture when they fit in the MTU.
//! Pictures that fit go out as single NAL unit packets, larger ones as
//! fragmentation units (type 49).

use bytes::{BufMut, Bytes, BytesMut};

use crate::config::VideoCodec;
use crate::video::annexb::{nal_type, split_nal_units};

const NAL_VPS: u8 = 32;
const NAL_SPS: u8 = 33;
const NAL_PPS: u8 = 34;
const NAL_AUD: u8 = 35;
const NAL_FILLER: u8 = 38;
const NAL_AP: u8 = 48;
const NAL_FU: u8 = 49;

const PAYLOAD_HDR_LEN: usize = 2;
const FU_HDR_LEN: usize = 1;
const AP_LEN_FIELD: usize = 2;

const FU_START: u8 = 0x80;
const FU_END: u8 = 0x40;

/// Splits Annex-B H.265 access units into RTP payloads
#[derive(Debug, Default, Clone)]
pub struct H265Payloader {
    /// Parameter sets waiting for the next picture, in stream order
    parameter_sets: Vec<Bytes>,
}

impl H265Payloader {
    pub fn new() -> Self {
        Self::default()
    }

    /// RTP payloads for one access unit
    pub fn payload(&mut self, mtu: usize, au: &Bytes) -> Vec<Bytes> {
        let mut out = Vec::new();
        if au.is_empty() || mtu <= PAYLOAD_HDR_LEN + FU_HDR_LEN {
            return out;
        }

        for nal in split_nal_units(au) {
            self.push_nal(au.slice_ref(nal.payload), mtu, &mut out);
        }
        out
    }

    fn push_nal(&mut self, nal: Bytes, mtu: usize, out: &mut Vec<Bytes>) {
        if nal.len() < PAYLOAD_HDR_LEN {
            return;
        }
        let Some(kind) = nal_type(VideoCodec::H265, &nal) else {
            return;
        };

        match kind {
            NAL_AUD | NAL_FILLER => {}
            NAL_VPS | NAL_SPS | NAL_PPS => self.parameter_sets.push(nal),
            _ => {
                self.flush_parameter_sets(mtu, out);
                if nal.len() <= mtu {
                    out.push(nal);
                } else {
                    fragment(&nal, mtu, out);
                }
            }
        }
    }

    fn flush_parameter_sets(&mut self, mtu: usize, out: &mut Vec<Bytes>) {
        if self.parameter_sets.is_empty() {
            return;
        }
        let sets = std::mem::take(&mut self.parameter_sets);

        let ap_len = PAYLOAD_HDR_LEN
            + sets
                .iter()
                .map(|s| AP_LEN_FIELD + s.len())
                .sum::<usize>();

        if sets.len() < 2 || ap_len > mtu {
            for set in sets {
                if set.len() <= mtu {
                    out.push(set);
                } else {
                    fragment(&set, mtu, out);
                }
            }
            return;
        }

        // F bit is the OR of the aggregated units, LayerId/TID the lowest
        let forbidden = sets.iter().fold(0u8, |f, s| f | (s[0] & 0x80));
        let layer_tid = sets
            .iter()
            .map(|s| u16::from_be_bytes([s[0], s[1]]) & 0x01FF)
            .min()
            .unwrap_or(1);

        let mut ap = BytesMut::with_capacity(ap_len);
        let hdr = ((forbidden as u16) << 8) | ((NAL_AP as u16) << 9) | layer_tid;
        ap.put_u16(hdr);
        for set in &sets {
            ap.put_u16(set.len() as u16);
            ap.put_slice(set);
        }
        out.push(ap.freeze());
    }
}

/// Fragmentation units for one NAL unit; the original header fields other
/// than the type are carried over into each PayloadHdr
fn fragment(nal: &Bytes, mtu: usize, out: &mut Vec<Bytes>) {
    let kind = (nal[0] >> 1) & 0x3F;
    let hdr0 = (nal[0] & 0b1000_0001) | (NAL_FU << 1);
    let hdr1 = nal[1];

    let body = &nal[PAYLOAD_HDR_LEN..];
    let chunk = mtu - PAYLOAD_HDR_LEN - FU_HDR_LEN;
    let count = body.len().div_ceil(chunk);

    for (i, piece) in body.chunks(chunk).enumerate() {
        let mut fu = kind;
        if i == 0 {
            fu |= FU_START;
        }
        if i + 1 == count {
            fu |= FU_END;
        }

        let mut pkt = BytesMut::with_capacity(PAYLOAD_HDR_LEN + FU_HDR_LEN + piece.len());
        pkt.put_u8(hdr0);
        pkt.put_u8(hdr1);
        pkt.put_u8(fu);
        pkt.put_slice(piece);
        out.push(pkt.freeze());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rtp::codecs::h265::{H265Packet, H265Payload};
    use rtp::packetizer::Depacketizer;

    fn annexb(nals: &[&[u8]]) -> Bytes {
        let mut buf = BytesMut::new();
        for nal in nals {
            buf.put_slice(&[0, 0, 0, 1]);
            buf.put_slice(nal);
        }
        buf.freeze()
    }

    fn idr(len: usize) -> Vec<u8> {
        // IDR_W_RADL, TID 1
        let mut nal = vec![19 << 1, 0x01];
        nal.resize(len, 0xAB);
        nal
    }

    #[test]
    fn test_small_picture_single_packet() {
        let mut p = H265Payloader::new();
        let nal = idr(100);
        let out = p.payload(1200, &annexb(&[&nal]));
        assert_eq!(out.len(), 1);
        assert_eq!(&out[0][..], &nal[..]);
    }

    #[test]
    fn test_parameter_sets_aggregated_before_picture() {
        let mut p = H265Payloader::new();
        let vps = [NAL_VPS << 1, 0x01, 0x0C];
        let sps = [NAL_SPS << 1, 0x01, 0x01, 0x60];
        let pps = [NAL_PPS << 1, 0x01, 0xC1];
        let aud = [NAL_AUD << 1, 0x01, 0x50];
        let pic = idr(64);

        let out = p.payload(1200, &annexb(&[&aud, &vps, &sps, &pps, &pic]));
        assert_eq!(out.len(), 2);

        let mut pkt = H265Packet::default();
        pkt.depacketize(&out[0]).unwrap();
        match pkt.payload() {
            H265Payload::H265AggregationPacket(ap) => {
                assert_eq!(ap.first_unit().unwrap().nal_unit(), Bytes::copy_from_slice(&vps));
                assert_eq!(ap.other_units().len(), 2);
            }
            other => panic!("expected aggregation packet, got {:?}", other),
        }
        assert_eq!(&out[1][..], &pic[..]);
    }

    #[test]
    fn test_large_picture_fragmented() {
        let mut p = H265Payloader::new();
        let nal = idr(3000);
        let out = p.payload(1200, &annexb(&[&nal]));
        assert_eq!(out.len(), 3);

        let mut body = Vec::new();
        for (i, payload) in out.iter().enumerate() {
            assert!(payload.len() <= 1200);
            assert_eq!((payload[0] >> 1) & 0x3F, NAL_FU);
            assert_eq!(payload[1], 0x01);

            let mut pkt = H265Packet::default();
            pkt.depacketize(payload).unwrap();
            match pkt.payload() {
                H265Payload::H265FragmentationUnitPacket(fu) => {
                    assert_eq!(fu.fu_header().fu_type(), 19);
                    assert_eq!(fu.fu_header().s(), i == 0);
                    assert_eq!(fu.fu_header().e(), i == out.len() - 1);
                }
                other => panic!("expected fragmentation unit, got {:?}", other),
            }
            body.extend_from_slice(&payload[3..]);
        }
        assert_eq!(body, &nal[2..]);
    }

    #[test]
    fn test_empty_input() {
        let mut p = H265Payloader::new();
        assert!(p.payload(1200, &Bytes::new()).is_empty());
        assert!(p.payload(2, &annexb(&[&idr(10)])).is_empty());
    }
}
