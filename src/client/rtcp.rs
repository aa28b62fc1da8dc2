// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Outbound RTCP scheduling per [RFC 3550 section
//! 6.2](https://datatracker.ietf.org/doc/html/rfc3550#section-6.2).
//!
//! Each track emits an RR+SDES compound on a randomized interval; inbound
//! SR/SDES/BYE handling lives with the per-source state in
//! [`super::rtp`].

use std::time::{Duration, Instant};

use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::rtp::SourceTable;
use crate::rtcp::{ReportBlock, MAX_REPORT_BLOCKS};

/// The fixed minimum reporting interval. RFC 3550 scales the interval with
/// the session's bandwidth share; for a two-party camera session the 5 s
/// minimum always dominates.
const TMIN_SECS: f64 = 5.0;

/// `e - 3/2`, the compensation factor of RFC 3550 section 6.3.1 that keeps
/// the randomized timer's expected value at the target interval.
const COMPENSATION: f64 = std::f64::consts::E - 1.5;

pub(crate) struct RtcpExchange {
    ssrc: u32,
    cname: String,
    rng: StdRng,
}

impl RtcpExchange {
    /// Creates the exchange state for one track. The receiver SSRC and RNG
    /// are fresh per track; nothing is process-global.
    pub(crate) fn new(cname: String) -> Self {
        let mut rng = StdRng::from_entropy();
        let ssrc = rng.gen();
        Self { ssrc, cname, rng }
    }

    pub(crate) fn ssrc(&self) -> u32 {
        self.ssrc
    }

    /// Time until the next RR+SDES emission: the interval randomized to
    /// [0.5T, 1.5T], divided by the compensation factor, and halved for the
    /// very first report.
    pub(crate) fn next_interval(&mut self, initial: bool) -> Duration {
        let t = TMIN_SECS * (self.rng.gen::<f64>() + 0.5);
        let t = if initial { t / 2.0 } else { t };
        Duration::from_secs_f64(t / COMPENSATION)
    }

    /// Builds the periodic compound packet, or `None` when nothing has been
    /// received yet (there is nobody to report on).
    pub(crate) fn build_report(&mut self, table: &mut SourceTable, now: Instant) -> Option<Bytes> {
        let mut ssrcs: Vec<u32> = table.sources.keys().copied().collect();
        ssrcs.sort_unstable();
        let mut blocks: Vec<ReportBlock> = Vec::with_capacity(ssrcs.len().min(MAX_REPORT_BLOCKS));
        for ssrc in ssrcs {
            if blocks.len() == MAX_REPORT_BLOCKS {
                break;
            }
            let source = table.sources.get_mut(&ssrc).expect("key from same table");
            if let Some(block) = source.report_block(now) {
                blocks.push(block);
            }
        }
        if blocks.is_empty() {
            return None;
        }
        Some(crate::rtcp::build_rr_sdes(self.ssrc, &blocks, &self.cname))
    }

    pub(crate) fn build_bye(&self) -> Bytes {
        crate::rtcp::build_bye(self.ssrc, Some("teardown"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rtcp::{PacketRef, TypedPacketRef};

    #[test]
    fn interval_bounds() {
        let mut exchange = RtcpExchange::new("test@host".to_owned());
        let min = Duration::from_secs_f64(0.5 * TMIN_SECS / COMPENSATION);
        let max = Duration::from_secs_f64(1.5 * TMIN_SECS / COMPENSATION);
        for _ in 0..100 {
            let t = exchange.next_interval(false);
            assert!(t >= min && t <= max, "{t:?} outside [{min:?}, {max:?}]");
            let initial = exchange.next_interval(true);
            assert!(
                initial >= min / 2 && initial <= max / 2,
                "initial {initial:?} outside [{:?}, {:?}]",
                min / 2,
                max / 2
            );
        }
    }

    #[test]
    fn report_contents() {
        let mut exchange = RtcpExchange::new("me@host".to_owned());
        let mut table = SourceTable::default();
        let now = Instant::now();
        assert!(exchange.build_report(&mut table, now).is_none());

        // One source with a couple of packets.
        let mut s = super::super::rtp::SourceState::new(0xabcd_0001, 90_000);
        s.on_rtp(10, 0, now);
        s.on_rtp(11, 3_000, now);
        table.sources.insert(0xabcd_0001, s);
        let report = exchange.build_report(&mut table, now).unwrap();
        let (pkt, rest) = PacketRef::parse(&report).unwrap();
        match pkt.as_typed().unwrap().unwrap() {
            TypedPacketRef::ReceiverReport(rr) => {
                assert_eq!(rr.ssrc(), exchange.ssrc());
                assert_eq!(rr.report_count(), 1);
                let block = rr.report_block(0);
                assert_eq!(block.ssrc(), 0xabcd_0001);
                assert_eq!(block.cumulative_lost(), 0);
                assert_eq!(block.extended_highest_sequence(), 11);
                // No SR seen: LSR and DLSR must be zero.
                assert_eq!(block.last_sender_report(), 0);
                assert_eq!(block.delay_since_last_sender_report(), 0);
            }
            _ => panic!("expected RR first"),
        }
        let (pkt, rest) = PacketRef::parse(rest).unwrap();
        assert_eq!(pkt.payload_type(), crate::rtcp::PT_SOURCE_DESCRIPTION);
        match pkt.as_typed().unwrap().unwrap() {
            TypedPacketRef::SourceDescription(sdes) => {
                assert_eq!(sdes.cname(), Some((exchange.ssrc(), "me@host")));
            }
            _ => panic!("expected SDES"),
        }
        assert!(rest.is_empty());
    }
}
