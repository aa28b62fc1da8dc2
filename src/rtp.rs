// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handles RTP data as described in
//! [RFC 3550 section 5.1](https://datatracker.ietf.org/doc/html/rfc3550#section-5.1).

use std::ops::Range;

use bytes::{Buf, Bytes};

use crate::PacketContext;

/// The minimum length of an RTP header (no CSRCs or extensions).
const MIN_HEADER_LEN: u16 = 12;

/// Raw packet without state-specific interpretation or metadata.
///
/// Primarily validates a raw buffer then provides accessors for it. The
/// payload range is determined once during validation and kept as a
/// `Range<u16>` rather than being reconstructed on later accesses.
#[derive(Debug)]
pub(crate) struct RawPacket(
    /// Full packet data, including headers.
    ///
    /// ```text
    ///  0                   1                   2                   3
    ///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |V=2|P|X|  CC   |M|     PT      |       sequence number         |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |                           timestamp                           |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// |           synchronization source (SSRC) identifier            |
    /// +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
    /// |            contributing source (CSRC) identifiers             |
    /// |                             ....                              |
    /// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
    /// ```
    pub Bytes,
);

impl RawPacket {
    /// Validates an RTP packet, returning a wrapper and the payload range.
    ///
    /// Rejects packets with a bad version, truncated CSRC list, an extension
    /// or padding extending beyond the packet, per the checks in RFC 3550
    /// appendix A.1. If X=1 the extension (2-byte id, 2-byte length in
    /// 32-bit words, data) is skipped; if P=1 the final byte's value is
    /// trimmed from the payload end.
    pub fn new(data: Bytes) -> Result<(Self, Range<u16>), RawPacketError> {
        // RTP doesn't have a defined maximum size but it's implied by the transport:
        // * UDP packets (even with fragmentation) are at most 65,536 (minus IP/UDP headers).
        // * interleaved RTSP data messages have at most 65,536 bytes of data.
        let len = match u16::try_from(data.len()) {
            Ok(l) => l,
            Err(_) => {
                return Err(RawPacketError {
                    reason: "too long",
                    data,
                })
            }
        };
        if len < MIN_HEADER_LEN {
            return Err(RawPacketError {
                reason: "too short",
                data,
            });
        }
        if (data[0] & 0b1100_0000) != 2 << 6 {
            return Err(RawPacketError {
                reason: "must be version 2",
                data,
            });
        }
        let has_padding = (data[0] & 0b0010_0000) != 0;
        let has_extension = (data[0] & 0b0001_0000) != 0;
        let csrc_count = data[0] & 0b0000_1111;
        let csrc_end = MIN_HEADER_LEN + (4 * u16::from(csrc_count));
        if len < csrc_end {
            return Err(RawPacketError {
                reason: "CSRC list is after end of packet",
                data,
            });
        }
        let payload_start = if has_extension {
            if len < csrc_end + 4 {
                return Err(RawPacketError {
                    reason: "extension header is after end of packet",
                    data,
                });
            }
            // 2-byte profile-defined id, then length in 32-bit words
            // excluding this 4-byte prefix.
            let extension_words = u16::from_be_bytes([
                data[usize::from(csrc_end) + 2],
                data[usize::from(csrc_end) + 3],
            ]);
            match extension_words
                .checked_mul(4)
                .and_then(|b| b.checked_add(csrc_end + 4))
            {
                Some(s) => s,
                None => {
                    return Err(RawPacketError {
                        reason: "extension extends beyond maximum packet size",
                        data,
                    })
                }
            }
        } else {
            csrc_end
        };
        if len < payload_start {
            return Err(RawPacketError {
                reason: "payload start is after end of packet",
                data,
            });
        }
        let payload_end = if has_padding {
            if len == payload_start {
                return Err(RawPacketError {
                    reason: "missing padding",
                    data,
                });
            }
            let padding_len = u16::from(data[data.len() - 1]);
            if padding_len == 0 {
                return Err(RawPacketError {
                    reason: "invalid padding length 0",
                    data,
                });
            }
            let payload_end = match len.checked_sub(padding_len) {
                Some(e) => e,
                None => {
                    return Err(RawPacketError {
                        reason: "padding larger than packet",
                        data,
                    })
                }
            };
            if payload_end < payload_start {
                return Err(RawPacketError {
                    reason: "bad padding",
                    data,
                });
            }
            payload_end
        } else {
            len
        };
        Ok((Self(data), payload_start..payload_end))
    }

    #[inline]
    pub fn mark(&self) -> bool {
        (self.0[1] & 0b1000_0000) != 0
    }

    #[inline]
    pub fn sequence_number(&self) -> u16 {
        u16::from_be_bytes([self.0[2], self.0[3]])
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes([self.0[8], self.0[9], self.0[10], self.0[11]])
    }

    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.0[1] & 0b0111_1111
    }

    #[inline]
    pub fn timestamp(&self) -> u32 {
        u32::from_be_bytes([self.0[4], self.0[5], self.0[6], self.0[7]])
    }

    #[inline]
    pub fn csrc_count(&self) -> u8 {
        self.0[0] & 0b0000_1111
    }

    /// The CSRC at index `i`; panics if `i >= csrc_count()`.
    pub fn csrc(&self, i: u8) -> u32 {
        assert!(i < self.csrc_count());
        let off = usize::from(MIN_HEADER_LEN) + 4 * usize::from(i);
        u32::from_be_bytes([
            self.0[off],
            self.0[off + 1],
            self.0[off + 2],
            self.0[off + 3],
        ])
    }
}

#[derive(Debug)]
#[doc(hidden)]
pub struct RawPacketError {
    pub reason: &'static str,
    pub data: Bytes,
}

pub(crate) struct RawPacketBuilder {
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload_type: u8,
    pub ssrc: u32,
    pub mark: bool,
}

impl RawPacketBuilder {
    pub(crate) fn build<P: IntoIterator<Item = u8>>(
        self,
        payload: P,
    ) -> Result<(RawPacket, Range<u16>), &'static str> {
        if self.payload_type >= 0x80 {
            return Err("payload type too large");
        }
        let data: Bytes = [
            2 << 6, // version=2, no padding, no extensions, no CSRCs.
            if self.mark { 0b1000_0000 } else { 0 } | self.payload_type,
        ]
        .into_iter()
        .chain(self.sequence_number.to_be_bytes())
        .chain(self.timestamp.to_be_bytes())
        .chain(self.ssrc.to_be_bytes())
        .chain(payload)
        .collect();
        let len = u16::try_from(data.len()).map_err(|_| "payload too long")?;
        Ok((RawPacket(data), MIN_HEADER_LEN..len))
    }
}

/// A received RTP packet, as yielded to the application.
///
/// The payload is a view into the received buffer; no media bytes are
/// copied after the header parse.
pub struct ReceivedPacket {
    pub(crate) ctx: PacketContext,
    pub(crate) track_id: usize,
    pub(crate) raw: RawPacket,
    pub(crate) payload_range: Range<u16>,

    /// Number of sequence numbers skipped since the previous delivered
    /// packet on this SSRC, after reordering is accounted for.
    pub(crate) loss: u16,
}

impl std::fmt::Debug for ReceivedPacket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReceivedPacket")
            .field("ctx", &self.ctx)
            .field("track_id", &self.track_id)
            .field("ssrc", &self.raw.ssrc())
            .field("sequence_number", &self.raw.sequence_number())
            .field("timestamp", &self.raw.timestamp())
            .field("mark", &self.raw.mark())
            .field("payload", &crate::hex::LimitedHex::new(self.payload(), 64))
            .finish()
    }
}

impl ReceivedPacket {
    /// When and over which carrier the packet arrived.
    #[inline]
    pub fn ctx(&self) -> &PacketContext {
        &self.ctx
    }

    /// Index of the track within the session, in `DESCRIBE` order.
    #[inline]
    pub fn track_id(&self) -> usize {
        self.track_id
    }

    #[inline]
    pub fn mark(&self) -> bool {
        self.raw.mark()
    }

    #[inline]
    pub fn ssrc(&self) -> u32 {
        self.raw.ssrc()
    }

    #[inline]
    pub fn sequence_number(&self) -> u16 {
        self.raw.sequence_number()
    }

    /// The raw 32-bit RTP timestamp, in the track's clock rate.
    #[inline]
    pub fn timestamp(&self) -> u32 {
        self.raw.timestamp()
    }

    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.raw.payload_type()
    }

    /// Contributing sources, usually empty.
    pub fn csrcs(&self) -> impl Iterator<Item = u32> + '_ {
        (0..self.raw.csrc_count()).map(|i| self.raw.csrc(i))
    }

    #[inline]
    pub fn loss(&self) -> u16 {
        self.loss
    }

    /// Returns the raw bytes, including the RTP headers.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        &self.raw.0[..]
    }

    /// Returns only the payload bytes.
    #[inline]
    pub fn payload(&self) -> &[u8] {
        &self.raw.0[usize::from(self.payload_range.start)..usize::from(self.payload_range.end)]
    }

    /// Consumes the `ReceivedPacket` and returns the payload as a [`Bytes`],
    /// without copying.
    #[inline]
    pub fn into_payload_bytes(self) -> Bytes {
        let mut data = self.raw.0;
        data.truncate(usize::from(self.payload_range.end));
        data.advance(usize::from(self.payload_range.start));
        data
    }
}

/// Testing API; exposed so scripted-server tests can synthesize packets.
#[doc(hidden)]
pub struct ReceivedPacketBuilder {
    pub ctx: PacketContext,
    pub track_id: usize,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub payload_type: u8,
    pub ssrc: u32,
    pub mark: bool,
    pub loss: u16,
}

impl ReceivedPacketBuilder {
    pub fn build<P: IntoIterator<Item = u8>>(
        self,
        payload: P,
    ) -> Result<ReceivedPacket, &'static str> {
        let (raw, payload_range) = RawPacketBuilder {
            sequence_number: self.sequence_number,
            timestamp: self.timestamp,
            payload_type: self.payload_type,
            ssrc: self.ssrc,
            mark: self.mark,
        }
        .build(payload)?;
        Ok(ReceivedPacket {
            ctx: self.ctx,
            track_id: self.track_id,
            raw,
            payload_range,
            loss: self.loss,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(data: &'static [u8]) -> Result<(RawPacket, Range<u16>), &'static str> {
        RawPacket::new(Bytes::from_static(data)).map_err(|e| e.reason)
    }

    #[test]
    fn minimal() {
        let (pkt, payload) = parse(
            b"\x80\x60\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\
              payload",
        )
        .unwrap();
        assert_eq!(pkt.sequence_number(), 0x0102);
        assert_eq!(pkt.timestamp(), 0x03040506);
        assert_eq!(pkt.ssrc(), 0x0708090a);
        assert_eq!(pkt.payload_type(), 0x60);
        assert!(!pkt.mark());
        assert_eq!(pkt.csrc_count(), 0);
        assert_eq!(&pkt.0[usize::from(payload.start)..usize::from(payload.end)], b"payload");
    }

    #[test]
    fn csrcs_and_mark() {
        let (pkt, payload) = parse(
            b"\x82\xe0\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\
              \xaa\xbb\xcc\xdd\x11\x22\x33\x44\
              pay",
        )
        .unwrap();
        assert!(pkt.mark());
        assert_eq!(pkt.payload_type(), 0x60);
        assert_eq!(pkt.csrc_count(), 2);
        assert_eq!(pkt.csrc(0), 0xaabbccdd);
        assert_eq!(pkt.csrc(1), 0x11223344);
        assert_eq!(&pkt.0[usize::from(payload.start)..usize::from(payload.end)], b"pay");
    }

    #[test]
    fn extension_skipped() {
        // X=1: extension id 0xbede, length 1 word, then the payload.
        let (pkt, payload) = parse(
            b"\x90\x60\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\
              \xbe\xde\x00\x01\xde\xad\xbe\xef\
              pay",
        )
        .unwrap();
        assert_eq!(pkt.csrc_count(), 0);
        assert_eq!(&pkt.0[usize::from(payload.start)..usize::from(payload.end)], b"pay");
    }

    #[test]
    fn padding_trimmed() {
        // P=1: final byte says 4 bytes of padding (including itself).
        let (pkt, payload) = parse(
            b"\xa0\x60\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\
              pay\x00\x00\x00\x04",
        )
        .unwrap();
        assert_eq!(&pkt.0[usize::from(payload.start)..usize::from(payload.end)], b"pay");
    }

    #[test]
    fn rejects() {
        assert_eq!(parse(b"\x80\x60\x01").unwrap_err(), "too short");
        assert_eq!(
            parse(b"\x40\x60\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a").unwrap_err(),
            "must be version 2"
        );
        // CC=2 but no CSRC bytes present.
        assert_eq!(
            parse(b"\x82\x60\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a").unwrap_err(),
            "CSRC list is after end of packet"
        );
        // X=1 but no extension header present.
        assert_eq!(
            parse(b"\x90\x60\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a").unwrap_err(),
            "extension header is after end of packet"
        );
        // Extension length words point past the end.
        assert_eq!(
            parse(b"\x90\x60\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\xbe\xde\x00\x02xxxx")
                .unwrap_err(),
            "payload start is after end of packet"
        );
        // Padding length exceeds the packet.
        assert_eq!(
            parse(b"\xa0\x60\x01\x02\x03\x04\x05\x06\x07\x08\x09\x0a\xff").unwrap_err(),
            "padding larger than packet"
        );
    }

    #[test]
    fn roundtrip_builder() {
        let pkt = ReceivedPacketBuilder {
            ctx: crate::PacketContext::dummy(),
            track_id: 0,
            sequence_number: 0xabcd,
            timestamp: 0xdeadbeef,
            payload_type: 96,
            ssrc: 0x12345678,
            mark: true,
            loss: 0,
        }
        .build(*b"hello")
        .unwrap();
        assert_eq!(pkt.sequence_number(), 0xabcd);
        assert_eq!(pkt.timestamp(), 0xdeadbeef);
        assert_eq!(pkt.payload_type(), 96);
        assert_eq!(pkt.ssrc(), 0x12345678);
        assert!(pkt.mark());
        assert_eq!(pkt.payload(), b"hello");
        assert_eq!(pkt.into_payload_bytes(), Bytes::from_static(b"hello"));
    }
}
