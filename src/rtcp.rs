// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Handles RTCP data as described in
//! [RFC 3550 section 6](https://datatracker.ietf.org/doc/html/rfc3550#section-6).
//!
//! The parse side walks compound packets into typed per-packet views;
//! unknown payload types are skipped, not errors. The build side emits the
//! receiver's periodic RR+SDES compound and the closing BYE.

use bytes::{BufMut, Bytes, BytesMut};

pub(crate) const PT_SENDER_REPORT: u8 = 200;
pub(crate) const PT_RECEIVER_REPORT: u8 = 201;
pub(crate) const PT_SOURCE_DESCRIPTION: u8 = 202;
pub(crate) const PT_GOODBYE: u8 = 203;

/// SDES item type for the canonical name.
const SDES_CNAME: u8 = 1;

const COMMON_HEADER_LEN: usize = 4;

/// A payload type-specific accessor for a packet.
#[non_exhaustive]
pub enum TypedPacketRef<'a> {
    SenderReport(SenderReportRef<'a>),
    ReceiverReport(ReceiverReportRef<'a>),
    SourceDescription(SourceDescriptionRef<'a>),
    Goodbye(GoodbyeRef<'a>),
}

/// A generic packet, not parsed as any particular payload type.
///
/// This only interprets the leading four bytes:
///
/// ```text
///  0                   1                   2                   3
///  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// |V=2|P|         |   PT          |             length            |
/// +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
/// ```
#[derive(Copy, Clone, Debug)]
pub struct PacketRef<'a> {
    buf: &'a [u8],
    payload_end: usize,
}

impl<'a> PacketRef<'a> {
    /// Parses a buffer into this packet and rest, doing only basic validation
    /// of the version, padding, and length.
    pub fn parse(buf: &'a [u8]) -> Result<(Self, &'a [u8]), String> {
        if buf.len() < COMMON_HEADER_LEN {
            return Err(format!(
                "RTCP packets must be at least {} bytes; have only {}",
                COMMON_HEADER_LEN,
                buf.len()
            ));
        }
        let ver = buf[0] >> 6;
        if ver != 2 {
            return Err(format!("RTCP packets must be version 2; got {ver}"));
        }

        // raw_len is "The length of this RTCP packet in 32-bit words minus one,
        // including the header and any padding."
        let raw_len = (u16::from(buf[2]) << 8) | u16::from(buf[3]);
        let len = (usize::from(raw_len) + 1) * 4;
        if buf.len() < len {
            return Err(format!(
                "RTCP packet header has length {} bytes; have only {}",
                len,
                buf.len()
            ));
        }
        let (this, rest) = buf.split_at(len);
        let padding_bit = this[0] & 0b0010_0000;
        if padding_bit != 0 {
            if raw_len == 0 {
                return Err("RTCP packet has invalid combination of padding and len=0".to_owned());
            }
            let padding_bytes = usize::from(this[len - 1]);
            if padding_bytes == 0 || padding_bytes > len - COMMON_HEADER_LEN {
                return Err(format!(
                    "RTCP packet of len {len} states invalid {padding_bytes} padding bytes"
                ));
            }
            Ok((
                PacketRef {
                    buf: this,
                    payload_end: len - padding_bytes,
                },
                rest,
            ))
        } else {
            Ok((
                PacketRef {
                    buf: this,
                    payload_end: len,
                },
                rest,
            ))
        }
    }

    /// Validates a full compound packet, per [RFC 3550 appendix
    /// A.2](https://datatracker.ietf.org/doc/html/rfc3550#appendix-A.2) as
    /// updated by RFC 5506: all packets version 2, no padding on non-final
    /// packets, lengths adding up to the compound length.
    pub fn validate_compound(raw: &'a [u8]) -> Result<(), String> {
        let (first_pkt, mut rest) = PacketRef::parse(raw)?;
        let mut pkt = first_pkt;
        loop {
            if rest.is_empty() {
                break;
            } else if pkt.has_padding() {
                return Err("padding on non-final packet within RTCP compound packet".to_owned());
            }
            (pkt, rest) = PacketRef::parse(rest)?;
        }
        Ok(())
    }

    /// Returns the uninterpreted payload type of this RTCP packet.
    #[inline]
    pub fn payload_type(&self) -> u8 {
        self.buf[1]
    }

    /// Parses to a `TypedPacketRef` if the payload type is supported.
    /// Unknown payload types yield `None` so compound walks can skip them.
    pub fn as_typed(self) -> Result<Option<TypedPacketRef<'a>>, String> {
        match self.payload_type() {
            PT_SENDER_REPORT => Ok(Some(TypedPacketRef::SenderReport(
                SenderReportRef::validate(self)?,
            ))),
            PT_RECEIVER_REPORT => Ok(Some(TypedPacketRef::ReceiverReport(
                ReceiverReportRef::validate(self)?,
            ))),
            PT_SOURCE_DESCRIPTION => Ok(Some(TypedPacketRef::SourceDescription(
                SourceDescriptionRef(self),
            ))),
            PT_GOODBYE => Ok(Some(TypedPacketRef::Goodbye(GoodbyeRef::validate(self)?))),
            _ => Ok(None),
        }
    }

    /// Parses as a sender report, if the type matches.
    pub fn as_sender_report(self) -> Result<Option<SenderReportRef<'a>>, String> {
        if self.payload_type() == PT_SENDER_REPORT {
            return Ok(Some(SenderReportRef::validate(self)?));
        }
        Ok(None)
    }

    /// Returns true iff this packet has padding.
    #[inline]
    pub fn has_padding(&self) -> bool {
        (self.buf[0] & 0b0010_0000) != 0
    }

    /// Returns the low 5 bits of the first octet, which is typically a count
    /// or subtype.
    #[inline]
    pub fn count(&self) -> u8 {
        self.buf[0] & 0b0001_1111
    }

    /// Returns the full raw data, including headers.
    #[inline]
    pub fn raw(&self) -> &[u8] {
        self.buf
    }
}

/// A sender report, as defined in
/// [RFC 3550 section 6.4.1](https://datatracker.ietf.org/doc/html/rfc3550#section-6.4.1).
pub struct SenderReportRef<'a>(PacketRef<'a>);

impl<'a> SenderReportRef<'a> {
    fn validate(pkt: PacketRef<'a>) -> Result<Self, String> {
        let count = usize::from(pkt.count());
        const HEADER_LEN: usize = 8;
        const SENDER_INFO_LEN: usize = 20;
        const REPORT_BLOCK_LEN: usize = 24;
        let expected_len = HEADER_LEN + SENDER_INFO_LEN + (count * REPORT_BLOCK_LEN);
        if pkt.payload_end < expected_len {
            return Err(format!(
                "RTCP SR has invalid count={} with unpadded_byte_len={}",
                count, pkt.payload_end
            ));
        }
        Ok(Self(pkt))
    }

    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes(self.0.buf[4..8].try_into().unwrap())
    }

    pub fn ntp_timestamp(&self) -> crate::NtpTimestamp {
        crate::NtpTimestamp(u64::from_be_bytes(self.0.buf[8..16].try_into().unwrap()))
    }

    pub fn rtp_timestamp(&self) -> u32 {
        u32::from_be_bytes(self.0.buf[16..20].try_into().unwrap())
    }

    pub fn packet_count(&self) -> u32 {
        u32::from_be_bytes(self.0.buf[20..24].try_into().unwrap())
    }

    pub fn octet_count(&self) -> u32 {
        u32::from_be_bytes(self.0.buf[24..28].try_into().unwrap())
    }
}

impl<'a> std::ops::Deref for SenderReportRef<'a> {
    type Target = PacketRef<'a>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A receiver report, as defined in
/// [RFC 3550 section 6.4.2](https://datatracker.ietf.org/doc/html/rfc3550#section-6.4.2).
pub struct ReceiverReportRef<'a>(PacketRef<'a>);

const REPORT_BLOCK_LEN: usize = 24;

impl<'a> ReceiverReportRef<'a> {
    fn validate(pkt: PacketRef<'a>) -> Result<Self, String> {
        let count = usize::from(pkt.count());
        const HEADER_LEN: usize = 8;
        let expected_len = HEADER_LEN + (count * REPORT_BLOCK_LEN);
        if pkt.payload_end < expected_len {
            return Err(format!(
                "RTCP RR has invalid count={} with unpadded_byte_len={}",
                count, pkt.payload_end
            ));
        }
        Ok(Self(pkt))
    }

    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes(self.0.buf[4..8].try_into().unwrap())
    }

    pub fn report_count(&self) -> u8 {
        self.0.count()
    }

    /// The `i`th report block; panics if `i >= report_count()`.
    pub fn report_block(&self, i: usize) -> ReportBlockView<'a> {
        assert!(i < usize::from(self.report_count()));
        let off = 8 + i * REPORT_BLOCK_LEN;
        ReportBlockView(&self.0.buf[off..off + REPORT_BLOCK_LEN])
    }
}

impl<'a> std::ops::Deref for ReceiverReportRef<'a> {
    type Target = PacketRef<'a>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// One 24-byte report block within an SR or RR.
#[derive(Copy, Clone)]
pub struct ReportBlockView<'a>(&'a [u8]);

impl<'a> ReportBlockView<'a> {
    pub fn ssrc(&self) -> u32 {
        u32::from_be_bytes(self.0[0..4].try_into().unwrap())
    }

    pub fn fraction_lost(&self) -> u8 {
        self.0[4]
    }

    /// Cumulative packets lost, sign-extended from the 24-bit wire field.
    pub fn cumulative_lost(&self) -> i32 {
        let raw = (u32::from(self.0[5]) << 16) | (u32::from(self.0[6]) << 8) | u32::from(self.0[7]);
        // Sign-extend from bit 23.
        ((raw << 8) as i32) >> 8
    }

    pub fn extended_highest_sequence(&self) -> u32 {
        u32::from_be_bytes(self.0[8..12].try_into().unwrap())
    }

    pub fn jitter(&self) -> u32 {
        u32::from_be_bytes(self.0[12..16].try_into().unwrap())
    }

    pub fn last_sender_report(&self) -> u32 {
        u32::from_be_bytes(self.0[16..20].try_into().unwrap())
    }

    pub fn delay_since_last_sender_report(&self) -> u32 {
        u32::from_be_bytes(self.0[20..24].try_into().unwrap())
    }
}

/// A source description, as defined in
/// [RFC 3550 section 6.5](https://datatracker.ietf.org/doc/html/rfc3550#section-6.5).
/// Only `CNAME` items are interpreted.
pub struct SourceDescriptionRef<'a>(PacketRef<'a>);

impl<'a> SourceDescriptionRef<'a> {
    /// Returns the first chunk's `(ssrc, CNAME)`, if present and valid UTF-8.
    pub fn cname(&self) -> Option<(u32, &'a str)> {
        let mut buf = &self.0.buf[COMMON_HEADER_LEN..self.0.payload_end];
        for _ in 0..self.0.count() {
            if buf.len() < 4 {
                return None;
            }
            let ssrc = u32::from_be_bytes(buf[0..4].try_into().unwrap());
            buf = &buf[4..];
            let mut consumed = 0;
            while let Some(&item_type) = buf.get(consumed) {
                if item_type == 0 {
                    break;
                }
                let len = usize::from(*buf.get(consumed + 1)?);
                let data = buf.get(consumed + 2..consumed + 2 + len)?;
                if item_type == SDES_CNAME {
                    return Some((ssrc, std::str::from_utf8(data).ok()?));
                }
                consumed += 2 + len;
            }
            // Skip to the next chunk: items plus the END octet, padded to a
            // 32-bit boundary.
            let chunk_len = (consumed + 1 + 3) & !3;
            if chunk_len > buf.len() {
                return None;
            }
            buf = &buf[chunk_len..];
        }
        None
    }
}

impl<'a> std::ops::Deref for SourceDescriptionRef<'a> {
    type Target = PacketRef<'a>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// A goodbye packet, as defined in
/// [RFC 3550 section 6.6](https://datatracker.ietf.org/doc/html/rfc3550#section-6.6).
pub struct GoodbyeRef<'a>(PacketRef<'a>);

impl<'a> GoodbyeRef<'a> {
    fn validate(pkt: PacketRef<'a>) -> Result<Self, String> {
        let count = usize::from(pkt.count());
        let expected_len = COMMON_HEADER_LEN + count * 4;
        if pkt.payload_end < expected_len {
            return Err(format!(
                "RTCP BYE has invalid count={} with unpadded_byte_len={}",
                count, pkt.payload_end
            ));
        }
        Ok(Self(pkt))
    }

    pub fn ssrcs(&self) -> impl Iterator<Item = u32> + 'a {
        let buf = self.0.buf;
        (0..usize::from(self.0.count()))
            .map(move |i| u32::from_be_bytes(buf[4 + i * 4..8 + i * 4].try_into().unwrap()))
    }
}

impl<'a> std::ops::Deref for GoodbyeRef<'a> {
    type Target = PacketRef<'a>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

/// One receiver report block, as computed from a source's statistics.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) struct ReportBlock {
    pub ssrc: u32,
    pub fraction_lost: u8,

    /// Clamped (not wrapped) to the signed 24-bit wire range on serialization.
    pub cumulative_lost: i64,

    pub extended_highest_sequence: u32,
    pub jitter: u32,
    pub last_sender_report: u32,
    pub delay_since_last_sender_report: u32,
}

/// Maximum report blocks in one RR; the count field is 5 bits.
pub(crate) const MAX_REPORT_BLOCKS: usize = 31;

fn put_cumulative_lost(dst: &mut BytesMut, lost: i64) {
    let clamped = lost.clamp(-(1 << 23), (1 << 23) - 1) as i32;
    let raw = (clamped as u32) & 0x00FF_FFFF;
    dst.put_u8((raw >> 16) as u8);
    dst.put_u8((raw >> 8) as u8);
    dst.put_u8(raw as u8);
}

/// Builds the receiver's periodic compound packet: an RR with one block per
/// remote source followed by an SDES carrying our CNAME, per RFC 3550
/// section 6.1's compound rules.
pub(crate) fn build_rr_sdes(sender_ssrc: u32, blocks: &[ReportBlock], cname: &str) -> Bytes {
    assert!(blocks.len() <= MAX_REPORT_BLOCKS);
    assert!(cname.len() <= 255);
    let mut dst = BytesMut::with_capacity(8 + 24 * blocks.len() + 16 + cname.len());

    // RR.
    dst.put_u8(0x80 | blocks.len() as u8);
    dst.put_u8(PT_RECEIVER_REPORT);
    dst.put_u16(1 + 6 * blocks.len() as u16);
    dst.put_u32(sender_ssrc);
    for b in blocks {
        dst.put_u32(b.ssrc);
        dst.put_u8(b.fraction_lost);
        put_cumulative_lost(&mut dst, b.cumulative_lost);
        dst.put_u32(b.extended_highest_sequence);
        dst.put_u32(b.jitter);
        dst.put_u32(b.last_sender_report);
        dst.put_u32(b.delay_since_last_sender_report);
    }

    // SDES with a single chunk: our ssrc, CNAME, END, zero-padded to a
    // 32-bit boundary.
    let items_len = 2 + cname.len() + 1; // type, len, text, END
    let chunk_padded = (items_len + 3) & !3;
    let sdes_len_bytes = 4 + 4 + chunk_padded;
    dst.put_u8(0x81);
    dst.put_u8(PT_SOURCE_DESCRIPTION);
    dst.put_u16((sdes_len_bytes / 4 - 1) as u16);
    dst.put_u32(sender_ssrc);
    dst.put_u8(SDES_CNAME);
    dst.put_u8(cname.len() as u8);
    dst.put_slice(cname.as_bytes());
    for _ in 0..(chunk_padded - items_len + 1) {
        dst.put_u8(0); // END plus padding.
    }
    dst.freeze()
}

/// Builds a BYE for our ssrc, sent on graceful session teardown.
pub(crate) fn build_bye(sender_ssrc: u32, reason: Option<&str>) -> Bytes {
    let reason_padded = match reason {
        Some(r) => {
            assert!(r.len() <= 255);
            (1 + r.len() + 3) & !3
        }
        None => 0,
    };
    let len_bytes = 8 + reason_padded;
    let mut dst = BytesMut::with_capacity(len_bytes);
    dst.put_u8(0x81);
    dst.put_u8(PT_GOODBYE);
    dst.put_u16((len_bytes / 4 - 1) as u16);
    dst.put_u32(sender_ssrc);
    if let Some(r) = reason {
        dst.put_u8(r.len() as u8);
        dst.put_slice(r.as_bytes());
        for _ in 0..(reason_padded - 1 - r.len()) {
            dst.put_u8(0);
        }
    }
    dst.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unhex(s: &str) -> Vec<u8> {
        assert!(s.len() % 2 == 0);
        (0..s.len())
            .step_by(2)
            .map(|i| u8::from_str_radix(&s[i..i + 2], 16).unwrap())
            .collect()
    }

    #[test]
    fn dahua_sr_sdes() {
        // Sender report and source description from a Dahua camera.
        let buf = b"\x80\xc8\x00\x06\x66\x42\x6a\xe1\
                    \xe4\x36\x2f\x99\xcc\xcc\xcc\xcc\
                    \x85\x2e\xf8\x07\x00\x2a\x43\x33\
                    \x2f\x4c\x34\x1d\
                    \x81\xca\x00\x04\x66\x42\x6a\xe1\
                    \x01\x06\x28\x6e\x6f\x6e\x65\x29\
                    \x00\x00\x00\x00";
        PacketRef::validate_compound(buf).unwrap();
        let (pkt, buf) = PacketRef::parse(buf).unwrap();
        let sr = pkt.as_sender_report().unwrap().unwrap();
        assert_eq!(sr.ssrc(), 0x66426ae1);
        assert_eq!(sr.ntp_timestamp(), crate::NtpTimestamp(0xe4362f99cccccccc));
        assert_eq!(sr.rtp_timestamp(), 0x852ef807);
        let (pkt, buf) = PacketRef::parse(buf).unwrap();
        assert_eq!(pkt.payload_type(), PT_SOURCE_DESCRIPTION);
        match pkt.as_typed().unwrap().unwrap() {
            TypedPacketRef::SourceDescription(sdes) => {
                assert_eq!(sdes.cname(), Some((0x66426ae1, "(none)")));
            }
            _ => panic!("expected SDES"),
        }
        assert_eq!(buf.len(), 0);
    }

    #[test]
    fn rr_sdes_compound() {
        let buf = unhex(
            "81c9000730f5fb2730f5fb27000000000000726600000c0abc3ffbdb00030e42\
             81ca000477ae8d650106756e6b6e6f7700000000",
        );
        PacketRef::validate_compound(&buf).unwrap();
        let (pkt, rest) = PacketRef::parse(&buf).unwrap();
        match pkt.as_typed().unwrap().unwrap() {
            TypedPacketRef::ReceiverReport(rr) => {
                assert_eq!(rr.ssrc(), 0x30f5fb27);
                assert_eq!(rr.report_count(), 1);
                let block = rr.report_block(0);
                assert_eq!(block.ssrc(), 0x30f5fb27);
                assert_eq!(block.fraction_lost(), 0);
                assert_eq!(block.cumulative_lost(), 0);
                assert_eq!(block.extended_highest_sequence(), 0x7266);
                assert_eq!(block.jitter(), 0xc0a);
                assert_eq!(block.last_sender_report(), 0xbc3ffbdb);
                assert_eq!(block.delay_since_last_sender_report(), 0x30e42);
            }
            _ => panic!("expected RR"),
        }
        let (pkt, rest) = PacketRef::parse(rest).unwrap();
        assert_eq!(pkt.payload_type(), PT_SOURCE_DESCRIPTION);
        assert!(rest.is_empty());
    }

    #[test]
    fn bye() {
        let buf = unhex("81cb0001166ae287");
        let (pkt, rest) = PacketRef::parse(&buf).unwrap();
        assert!(rest.is_empty());
        match pkt.as_typed().unwrap().unwrap() {
            TypedPacketRef::Goodbye(bye) => {
                assert_eq!(bye.ssrcs().collect::<Vec<_>>(), vec![0x166ae287]);
            }
            _ => panic!("expected BYE"),
        }
    }

    #[test]
    fn padded_sdes() {
        let buf = unhex("a1ca000577ae8d650106756e6b6e6f770000000000000004");
        let (pkt, rest) = PacketRef::parse(&buf).unwrap();
        assert!(rest.is_empty());
        assert!(pkt.has_padding());
        match pkt.as_typed().unwrap().unwrap() {
            TypedPacketRef::SourceDescription(sdes) => {
                assert_eq!(sdes.cname(), Some((0x77ae8d65, "unknow")));
            }
            _ => panic!("expected SDES"),
        }
    }

    #[test]
    fn padding_on_nonfinal_packet_rejected() {
        let mut buf = unhex("a1ca000577ae8d650106756e6b6e6f770000000000000004");
        buf.extend_from_slice(&unhex("81cb0001166ae287"));
        PacketRef::validate_compound(&buf).unwrap_err();
    }

    #[test]
    fn unknown_pt_skipped() {
        // An APP packet (PT 204) is valid but uninterpreted.
        let buf = unhex("80cc0002deadbeef6170657200000000");
        let (pkt, _) = PacketRef::parse(&buf).unwrap();
        assert!(pkt.as_typed().unwrap().is_none());
    }

    #[test]
    fn truncated_rejected() {
        // Length field says 8 bytes, buffer has 4.
        PacketRef::parse(&unhex("81c90001")).unwrap_err();
        // Version 1.
        PacketRef::parse(&unhex("41c9000730f5fb27")).unwrap_err();
    }

    #[test]
    fn build_rr_matches_wire_vector() {
        let block = ReportBlock {
            ssrc: 0x30f5fb27,
            fraction_lost: 0,
            cumulative_lost: 0,
            extended_highest_sequence: 0x7266,
            jitter: 0xc0a,
            last_sender_report: 0xbc3ffbdb,
            delay_since_last_sender_report: 0x30e42,
        };
        let built = build_rr_sdes(0x30f5fb27, &[block], "unknow");
        let expected = unhex(
            "81c9000730f5fb2730f5fb27000000000000726600000c0abc3ffbdb00030e42\
             81ca000430f5fb270106756e6b6e6f7700000000",
        );
        assert_eq!(&built[..], &expected[..]);
        PacketRef::validate_compound(&built).unwrap();
    }

    #[test]
    fn build_rr_clamps_cumulative_lost() {
        let mut block = ReportBlock {
            ssrc: 1,
            fraction_lost: 255,
            cumulative_lost: 40_000_000, // far beyond 24 bits
            extended_highest_sequence: 0,
            jitter: 0,
            last_sender_report: 0,
            delay_since_last_sender_report: 0,
        };
        let built = build_rr_sdes(2, &[block], "x");
        let (pkt, _) = PacketRef::parse(&built).unwrap();
        match pkt.as_typed().unwrap().unwrap() {
            TypedPacketRef::ReceiverReport(rr) => {
                assert_eq!(rr.report_block(0).cumulative_lost(), (1 << 23) - 1);
            }
            _ => panic!(),
        }

        block.cumulative_lost = -40_000_000;
        let built = build_rr_sdes(2, &[block], "x");
        let (pkt, _) = PacketRef::parse(&built).unwrap();
        match pkt.as_typed().unwrap().unwrap() {
            TypedPacketRef::ReceiverReport(rr) => {
                assert_eq!(rr.report_block(0).cumulative_lost(), -(1 << 23));
            }
            _ => panic!(),
        }
    }

    #[test]
    fn build_bye_roundtrip() {
        let built = build_bye(0xdeadbeef, Some("teardown"));
        let (pkt, rest) = PacketRef::parse(&built).unwrap();
        assert!(rest.is_empty());
        match pkt.as_typed().unwrap().unwrap() {
            TypedPacketRef::Goodbye(bye) => {
                assert_eq!(bye.ssrcs().collect::<Vec<_>>(), vec![0xdeadbeef]);
            }
            _ => panic!("expected BYE"),
        }

        let built = build_bye(1, None);
        assert_eq!(built.len(), 8);
        PacketRef::validate_compound(&built).unwrap();
    }
}
