// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Per-track RTP reception: UDP sockets or interleaved queues, packet
//! validation, and the per-SSRC sequence/jitter bookkeeping of [RFC 3550
//! appendix A](https://datatracker.ietf.org/doc/html/rfc3550#appendix-A).

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use bytes::Bytes;
use log::{debug, trace, warn};
use tokio::net::UdpSocket;
use tokio::sync::{mpsc, watch};

use super::conn::{ChannelFrame, RtspConnection};
use super::rtcp::RtcpExchange;
use super::PacketRing;
use crate::rtp::{RawPacket, ReceivedPacket};
use crate::rtcp::TypedPacketRef;
use crate::{PacketContext, WallTime};

/// Sequence jumps larger than this restart tracking rather than counting as
/// loss, per RFC 3550 appendix A.1.
const MAX_DROPOUT: u16 = 3000;

/// Negative deltas within this window count as reordering, not restart.
const MAX_MISORDER: u16 = 100;

/// What [`SequenceState::update`] concluded about one packet.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum SeqOutcome {
    /// Forward progress; `lost` sequence numbers were skipped.
    InOrder { lost: u16 },

    /// A late packet within the misorder window.
    Reordered,

    /// Same sequence number as the current maximum.
    Duplicate,

    /// A wild jump; not counted in statistics unless the next packet is
    /// consecutive with it, which restarts tracking.
    Probe,
}

/// RFC 3550 appendix A.1 sequence bookkeeping for one SSRC.
#[derive(Debug)]
pub(crate) struct SequenceState {
    /// Extended first sequence number (cycles always 0 at init).
    base_seq: u32,
    max_seq: u16,

    /// Count of `u16` wraps observed at the maximum.
    cycles: u32,

    /// After a wild jump, the sequence number that would confirm a restart.
    bad_seq: Option<u16>,

    received: u64,
    expected_prior: u64,
    received_prior: u64,
    reordered: u64,
    duplicates: u64,
}

impl SequenceState {
    fn new(seq: u16) -> Self {
        Self {
            base_seq: u32::from(seq),
            max_seq: seq,
            cycles: 0,
            bad_seq: None,
            received: 1,
            expected_prior: 0,
            received_prior: 0,
            reordered: 0,
            duplicates: 0,
        }
    }

    /// Extended highest sequence: wrap cycles in the high 16 bits.
    pub(crate) fn extended_highest(&self) -> u32 {
        (self.cycles << 16) | u32::from(self.max_seq)
    }

    /// Total packets expected: `extended_highest - base + 1`.
    pub(crate) fn expected(&self) -> u64 {
        u64::from(self.extended_highest().wrapping_sub(self.base_seq)) + 1
    }

    pub(crate) fn received(&self) -> u64 {
        self.received
    }

    fn update(&mut self, seq: u16) -> SeqOutcome {
        let udelta = seq.wrapping_sub(self.max_seq);
        if udelta == 0 {
            self.received += 1;
            self.duplicates += 1;
            return SeqOutcome::Duplicate;
        }
        if udelta < MAX_DROPOUT {
            if seq < self.max_seq {
                // Sequence number wrapped; count another 64K cycle.
                self.cycles += 1;
            }
            self.max_seq = seq;
            self.received += 1;
            self.bad_seq = None;
            return SeqOutcome::InOrder { lost: udelta - 1 };
        }
        if udelta <= u16::MAX - MAX_MISORDER {
            // A very large jump. Count statistics only if two sequential
            // packets arrive, treating it as a stream restart.
            if self.bad_seq == Some(seq) {
                *self = Self::new(seq);
                return SeqOutcome::InOrder { lost: 0 };
            }
            self.bad_seq = Some(seq.wrapping_add(1));
            return SeqOutcome::Probe;
        }
        // Small negative delta: late packet. Received, not lost.
        self.received += 1;
        self.reordered += 1;
        SeqOutcome::Reordered
    }
}

/// Statistics for one remote SSRC, surviving until BYE or session end.
#[derive(Debug)]
pub(crate) struct SourceState {
    ssrc: u32,
    clock_rate: u32,

    /// `None` until the first RTP packet; an SR can create the entry first.
    seq: Option<SequenceState>,

    /// Interarrival jitter in timestamp units, per RFC 3550 appendix A.8.
    jitter: f64,
    last_arrival: Option<(Instant, u32)>,

    /// Middle 32 bits of the last SR's NTP timestamp, and when it arrived.
    last_sr_ntp_middle: u32,
    last_sr_instant: Option<Instant>,

    cname: Option<Box<str>>,
}

impl SourceState {
    pub(crate) fn new(ssrc: u32, clock_rate: u32) -> Self {
        Self {
            ssrc,
            clock_rate,
            seq: None,
            jitter: 0.0,
            last_arrival: None,
            last_sr_ntp_middle: 0,
            last_sr_instant: None,
            cname: None,
        }
    }

    pub(crate) fn on_rtp(&mut self, seq: u16, timestamp: u32, arrival: Instant) -> SeqOutcome {
        let outcome = match &mut self.seq {
            None => {
                self.seq = Some(SequenceState::new(seq));
                SeqOutcome::InOrder { lost: 0 }
            }
            Some(s) => s.update(seq),
        };

        // Jitter, computed for every arriving packet:
        // D = (arrival_rtp - prev_arrival_rtp) - (ts - prev_ts);
        // J += (|D| - J) / 16.
        if let Some((prev_arrival, prev_ts)) = self.last_arrival {
            let arrival_delta =
                arrival.duration_since(prev_arrival).as_secs_f64() * f64::from(self.clock_rate);
            let ts_delta = f64::from(timestamp.wrapping_sub(prev_ts) as i32);
            let d = arrival_delta - ts_delta;
            self.jitter += (d.abs() - self.jitter) / 16.0;
        }
        self.last_arrival = Some((arrival, timestamp));
        outcome
    }

    pub(crate) fn on_sender_report(&mut self, ntp: crate::NtpTimestamp, now: Instant) {
        self.last_sr_ntp_middle = ntp.middle_32();
        self.last_sr_instant = Some(now);
    }

    pub(crate) fn jitter(&self) -> f64 {
        self.jitter
    }

    /// Produces this source's receiver report block and starts a new
    /// reporting interval. `None` until RTP has been seen (there is no
    /// meaningful highest-sequence to report).
    pub(crate) fn report_block(&mut self, now: Instant) -> Option<crate::rtcp::ReportBlock> {
        let seq = self.seq.as_mut()?;
        let extended = seq.extended_highest();
        let expected = seq.expected();
        let cumulative_lost = expected as i64 - seq.received as i64;

        // Interval fraction, with extended-sequence arithmetic saturated at
        // zero: a late packet must not yield a negative expected count.
        let expected_interval = expected.saturating_sub(seq.expected_prior);
        let received_interval = seq.received.saturating_sub(seq.received_prior);
        let lost_interval = expected_interval as i64 - received_interval as i64;
        let fraction_lost = if expected_interval == 0 || lost_interval <= 0 {
            0
        } else {
            (((lost_interval as u64) << 8) / expected_interval).min(255) as u8
        };
        seq.expected_prior = expected;
        seq.received_prior = seq.received;

        let (last_sender_report, delay_since_last_sender_report) = match self.last_sr_instant {
            Some(at) => (
                self.last_sr_ntp_middle,
                (now.saturating_duration_since(at).as_secs_f64() * 65536.0) as u32,
            ),
            None => (0, 0),
        };
        Some(crate::rtcp::ReportBlock {
            ssrc: self.ssrc,
            fraction_lost,
            cumulative_lost,
            extended_highest_sequence: extended,
            jitter: self.jitter as u32,
            last_sender_report,
            delay_since_last_sender_report,
        })
    }
}

/// All SSRCs seen on one track, plus track-wide counters. Shared between
/// the track's receiver task (sole writer) and statistics snapshots.
#[derive(Default)]
pub(crate) struct SourceTable {
    pub(crate) sources: HashMap<u32, SourceState>,
    pub(crate) malformed: u64,
    pub(crate) wrong_ssrc: u64,
}

impl SourceTable {
    pub(crate) fn snapshot(&self) -> super::TrackStats {
        let mut stats = super::TrackStats {
            malformed: self.malformed,
            wrong_ssrc: self.wrong_ssrc,
            ..Default::default()
        };
        let mut best: Option<(u64, u32)> = None;
        for (ssrc, s) in &self.sources {
            if let Some(seq) = &s.seq {
                stats.received += seq.received;
                stats.cumulative_lost += seq.expected() as i64 - seq.received as i64;
                stats.reordered += seq.reordered;
                stats.duplicates += seq.duplicates;
                if best.map(|(n, _)| seq.received > n).unwrap_or(true) {
                    best = Some((seq.received, *ssrc));
                }
            }
        }
        if let Some((_, ssrc)) = best {
            stats.ssrc = Some(ssrc);
            stats.jitter = self.sources[&ssrc].jitter;
        }
        stats
    }
}

/// How a track's packets reach us.
pub(crate) enum Carrier {
    Udp {
        rtp_socket: UdpSocket,
        rtcp_socket: UdpSocket,
        peer_ip: IpAddr,
        rtcp_peer: Option<SocketAddr>,
    },
    Tcp {
        rtp_rx: mpsc::Receiver<ChannelFrame>,
        rtcp_rx: mpsc::Receiver<ChannelFrame>,
        rtcp_channel: u8,
    },
}

/// One track's receive state, owned by its task.
pub(crate) struct TrackReceiver {
    pub(crate) track_id: usize,
    pub(crate) clock_rate: u32,
    pub(crate) expected_ssrc: Option<u32>,
    pub(crate) conn: RtspConnection,
    pub(crate) carrier: Carrier,
    pub(crate) sources: Arc<Mutex<SourceTable>>,
    pub(crate) ring: Arc<PacketRing>,
    pub(crate) exchange: RtcpExchange,
    pub(crate) shutdown: watch::Receiver<bool>,
}

impl TrackReceiver {
    pub(crate) async fn run(self) {
        let TrackReceiver {
            track_id,
            clock_rate,
            expected_ssrc,
            conn,
            carrier,
            sources,
            ring,
            exchange,
            shutdown,
        } = self;
        let mut state = TrackState {
            track_id,
            clock_rate,
            expected_ssrc,
            sources,
            ring,
            exchange,
        };
        match carrier {
            Carrier::Udp {
                rtp_socket,
                rtcp_socket,
                peer_ip,
                rtcp_peer,
            } => run_udp(&mut state, rtp_socket, rtcp_socket, peer_ip, rtcp_peer, shutdown).await,
            Carrier::Tcp {
                rtp_rx,
                rtcp_rx,
                rtcp_channel,
            } => run_tcp(&mut state, conn, rtp_rx, rtcp_rx, rtcp_channel, shutdown).await,
        }
    }
}

struct TrackState {
    track_id: usize,
    clock_rate: u32,
    expected_ssrc: Option<u32>,
    sources: Arc<Mutex<SourceTable>>,
    ring: Arc<PacketRing>,
    exchange: RtcpExchange,
}

impl TrackState {
    fn handle_rtp(&mut self, pkt_ctx: PacketContext, data: Bytes) {
        let (raw, payload_range) = match RawPacket::new(data) {
            Ok(p) => p,
            Err(e) => {
                self.sources.lock().unwrap().malformed += 1;
                debug!(
                    "track {}: dropping RTP packet ({}): {:#?}",
                    self.track_id,
                    e.reason,
                    crate::hex::LimitedHex::new(&e.data, 64)
                );
                return;
            }
        };
        let ssrc = raw.ssrc();
        if let Some(expected) = self.expected_ssrc {
            if ssrc != expected {
                self.sources.lock().unwrap().wrong_ssrc += 1;
                trace!(
                    "track {}: ignoring RTP with ssrc {:08x}; expecting {:08x}",
                    self.track_id,
                    ssrc,
                    expected
                );
                return;
            }
        }
        let now = Instant::now();
        let loss = {
            let mut table = self.sources.lock().unwrap();
            let source = table
                .sources
                .entry(ssrc)
                .or_insert_with(|| SourceState::new(ssrc, self.clock_rate));
            match source.on_rtp(raw.sequence_number(), raw.timestamp(), now) {
                SeqOutcome::InOrder { lost } => lost,
                SeqOutcome::Reordered | SeqOutcome::Duplicate | SeqOutcome::Probe => 0,
            }
        };
        self.ring.push(ReceivedPacket {
            ctx: pkt_ctx,
            track_id: self.track_id,
            raw,
            payload_range,
            loss,
        });
    }

    fn handle_rtcp(&mut self, data: &[u8], now: Instant) {
        if let Err(e) = self.process_rtcp(data, now) {
            self.sources.lock().unwrap().malformed += 1;
            debug!(
                "track {}: dropping RTCP compound ({e}): {:#?}",
                self.track_id,
                crate::hex::LimitedHex::new(data, 64)
            );
        }
    }

    fn process_rtcp(&mut self, data: &[u8], now: Instant) -> Result<(), String> {
        crate::rtcp::PacketRef::validate_compound(data)?;
        let mut rest = data;
        let mut table = self.sources.lock().unwrap();
        while !rest.is_empty() {
            let (pkt, r) = crate::rtcp::PacketRef::parse(rest)?;
            rest = r;
            match pkt.as_typed()? {
                Some(TypedPacketRef::SenderReport(sr)) => {
                    let ssrc = sr.ssrc();
                    let source = table
                        .sources
                        .entry(ssrc)
                        .or_insert_with(|| SourceState::new(ssrc, self.clock_rate));
                    source.on_sender_report(sr.ntp_timestamp(), now);
                    trace!(
                        "track {}: SR from {:08x}: ntp={} rtp={}",
                        self.track_id,
                        ssrc,
                        sr.ntp_timestamp(),
                        sr.rtp_timestamp()
                    );
                }
                Some(TypedPacketRef::SourceDescription(sdes)) => {
                    if let Some((ssrc, cname)) = sdes.cname() {
                        if let Some(source) = table.sources.get_mut(&ssrc) {
                            if source.cname.is_none() {
                                debug!(
                                    "track {}: SSRC {:08x} has CNAME {cname:?}",
                                    self.track_id, ssrc
                                );
                            }
                            source.cname = Some(cname.into());
                        }
                    }
                }
                Some(TypedPacketRef::Goodbye(bye)) => {
                    for ssrc in bye.ssrcs() {
                        if table.sources.remove(&ssrc).is_some() {
                            debug!("track {}: SSRC {:08x} said BYE", self.track_id, ssrc);
                        }
                    }
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn report(&mut self, now: Instant) -> Option<Bytes> {
        let mut table = self.sources.lock().unwrap();
        self.exchange.build_report(&mut table, now)
    }
}

async fn run_udp(
    state: &mut TrackState,
    rtp_socket: UdpSocket,
    rtcp_socket: UdpSocket,
    peer_ip: IpAddr,
    rtcp_peer: Option<SocketAddr>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut rtp_buf = vec![0u8; 65_536];
    let mut rtcp_buf = vec![0u8; 65_536];
    let mut next_report = tokio::time::Instant::now() + state.exchange.next_interval(true);
    let graceful = loop {
        tokio::select! {
            biased;
            r = shutdown.changed() => break r.is_ok() && *shutdown.borrow(),
            r = rtp_socket.recv_from(&mut rtp_buf) => match r {
                Ok((n, from)) => {
                    if from.ip() != peer_ip {
                        trace!("ignoring RTP from unexpected source {from}");
                        continue;
                    }
                    let data = Bytes::copy_from_slice(&rtp_buf[..n]);
                    state.handle_rtp(PacketContext::udp(WallTime::now()), data);
                }
                Err(e) => warn!("track {}: UDP RTP recv error: {e}", state.track_id),
            },
            r = rtcp_socket.recv_from(&mut rtcp_buf) => match r {
                Ok((n, from)) => {
                    if from.ip() != peer_ip {
                        trace!("ignoring RTCP from unexpected source {from}");
                        continue;
                    }
                    state.handle_rtcp(&rtcp_buf[..n], Instant::now());
                }
                Err(e) => warn!("track {}: UDP RTCP recv error: {e}", state.track_id),
            },
            _ = tokio::time::sleep_until(next_report) => {
                if let (Some(report), Some(peer)) = (state.report(Instant::now()), rtcp_peer) {
                    if let Err(e) = rtcp_socket.send_to(&report, peer).await {
                        debug!("track {}: unable to send RR: {e}", state.track_id);
                    }
                }
                next_report = tokio::time::Instant::now() + state.exchange.next_interval(false);
            }
        }
    };
    if graceful {
        if let Some(peer) = rtcp_peer {
            let _ = rtcp_socket.send_to(&state.exchange.build_bye(), peer).await;
        }
    }
}

async fn run_tcp(
    state: &mut TrackState,
    conn: RtspConnection,
    mut rtp_rx: mpsc::Receiver<ChannelFrame>,
    mut rtcp_rx: mpsc::Receiver<ChannelFrame>,
    rtcp_channel: u8,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut next_report = tokio::time::Instant::now() + state.exchange.next_interval(true);
    let graceful = loop {
        tokio::select! {
            biased;
            r = shutdown.changed() => break r.is_ok() && *shutdown.borrow(),
            f = rtp_rx.recv() => match f {
                Some(frame) => state.handle_rtp(frame.pkt_ctx, frame.data),
                None => {
                    debug!("track {}: interleaved RTP queue closed", state.track_id);
                    if let Some(e) = conn.dead_error() {
                        state.ring.push_err(e);
                    }
                    break false;
                }
            },
            f = rtcp_rx.recv() => match f {
                Some(frame) => state.handle_rtcp(&frame.data, Instant::now()),
                None => {
                    if let Some(e) = conn.dead_error() {
                        state.ring.push_err(e);
                    }
                    break false;
                }
            },
            _ = tokio::time::sleep_until(next_report) => {
                if let Some(report) = state.report(Instant::now()) {
                    if let Err(e) = conn.send_data(rtcp_channel, report).await {
                        debug!("track {}: unable to send RR: {e}", state.track_id);
                    }
                }
                next_report = tokio::time::Instant::now() + state.exchange.next_interval(false);
            }
        }
    };
    if graceful {
        let _ = conn.send_data(rtcp_channel, state.exchange.build_bye()).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn source(clock_rate: u32) -> SourceState {
        SourceState::new(0x1234_5678, clock_rate)
    }

    /// Feeds `seqs` in order; returns the final state.
    fn feed(seqs: impl IntoIterator<Item = u16>) -> SourceState {
        let mut s = source(90_000);
        let base = Instant::now();
        for (i, seq) in seqs.into_iter().enumerate() {
            s.on_rtp(seq, (i as u32) * 3_000, base + Duration::from_millis(i as u64 * 33));
        }
        s
    }

    #[test]
    fn in_order() {
        let s = feed(100..200);
        let seq = s.seq.as_ref().unwrap();
        assert_eq!(seq.extended_highest(), 199);
        assert_eq!(seq.expected(), 100);
        assert_eq!(seq.received, 100);
        assert_eq!(seq.reordered, 0);
        assert_eq!(seq.duplicates, 0);
    }

    #[test]
    fn wraparound_extends() {
        let s = feed((65530u16..=65535).chain(0..6));
        let seq = s.seq.as_ref().unwrap();
        assert_eq!(seq.cycles, 1);
        assert_eq!(seq.extended_highest(), 65536 + 5);
        assert_eq!(seq.expected(), 12);
        assert_eq!(seq.received, 12);
    }

    #[test]
    fn loss_counted() {
        let mut s = source(90_000);
        let now = Instant::now();
        s.on_rtp(10, 0, now);
        assert_eq!(s.on_rtp(11, 0, now), SeqOutcome::InOrder { lost: 0 });
        assert_eq!(s.on_rtp(15, 0, now), SeqOutcome::InOrder { lost: 3 });
        let seq = s.seq.as_ref().unwrap();
        assert_eq!(seq.expected() - seq.received, 3);
    }

    #[test]
    fn reorder_not_lost() {
        let mut s = source(90_000);
        let now = Instant::now();
        for seq in [1u16, 2, 4, 3, 5] {
            s.on_rtp(seq, 0, now);
        }
        let seq = s.seq.as_ref().unwrap();
        assert_eq!(seq.reordered, 1);
        assert_eq!(seq.expected(), 5);
        assert_eq!(seq.received, 5);
        // The late 3 filled the gap: no cumulative loss.
        assert_eq!(seq.expected() - seq.received, 0);
    }

    #[test]
    fn duplicate_counted() {
        let mut s = source(90_000);
        let now = Instant::now();
        s.on_rtp(7, 0, now);
        assert_eq!(s.on_rtp(7, 0, now), SeqOutcome::Duplicate);
        let seq = s.seq.as_ref().unwrap();
        assert_eq!(seq.duplicates, 1);
        // exp - rcv goes negative by the duplicate; the RR clamp handles it.
        assert_eq!(seq.expected() as i64 - seq.received as i64, -1);
    }

    #[test]
    fn wild_jump_restarts_on_consecutive() {
        let mut s = source(90_000);
        let now = Instant::now();
        s.on_rtp(100, 0, now);
        assert_eq!(s.on_rtp(50_000, 0, now), SeqOutcome::Probe);
        // Not consecutive with the probe: stays in probe state.
        assert_eq!(s.on_rtp(60_000, 0, now), SeqOutcome::Probe);
        // Two consecutive packets: tracking restarts at the new position.
        assert_eq!(s.on_rtp(60_001, 0, now), SeqOutcome::InOrder { lost: 0 });
        let seq = s.seq.as_ref().unwrap();
        assert_eq!(seq.base_seq, 60_001);
        assert_eq!(seq.expected(), 1);
        assert_eq!(seq.received, 1);
    }

    #[test]
    fn jitter_zero_for_perfect_clock() {
        // 8 kHz audio, one packet every 20 ms, timestamps advancing 160.
        let mut s = source(8_000);
        let base = Instant::now();
        for i in 0..50u32 {
            s.on_rtp(i as u16, i * 160, base + Duration::from_millis(u64::from(i) * 20));
        }
        assert!(s.jitter() < 1e-6, "jitter {}", s.jitter());
    }

    #[test]
    fn jitter_tracks_reference_computation() {
        // Arrival times with deterministic wobble; compare against a direct
        // implementation of RFC 3550 section A.8 on the same trace.
        let clock = 90_000u32;
        let mut s = source(clock);
        let base = Instant::now();
        let mut reference = 0f64;
        let mut prev: Option<(f64, u32)> = None;
        for i in 0..500u32 {
            let wobble_ms = (i * 7 % 13) as u64;
            let arrival_ms = u64::from(i) * 33 + wobble_ms;
            let ts = i * 3_000;
            s.on_rtp(i as u16, ts, base + Duration::from_millis(arrival_ms));
            let arrival_rtp = (arrival_ms as f64 / 1_000.0) * f64::from(clock);
            if let Some((prev_arrival_rtp, prev_ts)) = prev {
                let d = (arrival_rtp - prev_arrival_rtp) - f64::from(ts.wrapping_sub(prev_ts) as i32);
                reference += (d.abs() - reference) / 16.0;
            }
            prev = Some((arrival_rtp, ts));
        }
        let got = s.jitter();
        assert!(
            (got - reference).abs() <= reference * 0.10 + 1.0,
            "jitter {got} vs reference {reference}"
        );
    }

    #[test]
    fn report_block_fraction_and_lsr() {
        let mut s = source(90_000);
        let now = Instant::now();

        // No RTP yet: no block, even after an SR.
        s.on_sender_report(crate::NtpTimestamp(0x0102_0304_0506_0708), now);
        assert!(s.report_block(now).is_none());

        // 20 expected, 15 received in the first interval.
        for seq in (0..20u16).filter(|seq| seq % 4 != 3) {
            s.on_rtp(seq, 0, now);
        }
        let block = s.report_block(now + Duration::from_secs(2)).unwrap();
        assert_eq!(block.ssrc, 0x1234_5678);
        assert_eq!(block.cumulative_lost, 4); // seq 19 counts only when 20 arrives
        assert_eq!(block.extended_highest_sequence, 18);
        assert_eq!(block.last_sender_report, 0x0304_0506);
        // DLSR is in 1/65536 s units; 2 s -> 131072.
        assert!((i64::from(block.delay_since_last_sender_report) - 131_072).abs() < 1_000);
        // 4 lost of 19 expected in the interval (seq 18 highest => 19 expected).
        assert_eq!(block.fraction_lost, ((4u64 << 8) / 19) as u8);

        // Second interval with no further packets: nothing new expected.
        let block = s.report_block(now + Duration::from_secs(4)).unwrap();
        assert_eq!(block.fraction_lost, 0);
        assert_eq!(block.cumulative_lost, 4);
    }

    #[test]
    fn loss_storm_bookkeeping() {
        // A deterministic storm: heavy loss, occasional reordering and
        // duplicates, across several sequence wraps. The cumulative counter
        // must track ground truth (up to duplicates, which subtract).
        let mut s = source(90_000);
        let base = Instant::now();
        let mut rng_state = 0x2545_f491_4f6c_dd1du64;
        let mut rng = move || {
            // xorshift64*
            rng_state ^= rng_state >> 12;
            rng_state ^= rng_state << 25;
            rng_state ^= rng_state >> 27;
            rng_state = rng_state.wrapping_mul(0x2545_f491_4f6c_dd1d);
            rng_state
        };
        let total = 200_000u32;
        let mut delivered = 0u64;
        let mut first_i: Option<u32> = None;
        let mut max_i = 0u32;
        let mut held: Option<u32> = None; // for swaps
        let mut t = 0u64;
        let mut deliver = |s: &mut SourceState, i: u32, t: &mut u64| {
            *t += 1;
            s.on_rtp((i & 0xFFFF) as u16, i.wrapping_mul(100), base + Duration::from_millis(*t));
        };
        for i in 0..total {
            let roll = rng() % 100;
            if roll < 40 {
                continue; // lost
            }
            if roll < 45 && held.is_none() && first_i.is_some() {
                // Deliver late, after the next surviving packet.
                delivered += 1;
                held = Some(i);
                continue;
            }
            delivered += 1;
            first_i.get_or_insert(i);
            max_i = i;
            deliver(&mut s, i, &mut t);
            if let Some(h) = held.take() {
                deliver(&mut s, h, &mut t);
            }
            if roll >= 99 {
                delivered += 1;
                deliver(&mut s, i, &mut t); // duplicate
            }
        }
        if held.take().is_some() {
            // A packet held for swapping at the very end was never delivered.
            // It's older than `max_i`, so only the received count changes.
            delivered -= 1;
        }
        let first_i = first_i.unwrap();
        let seq = s.seq.as_ref().unwrap();
        assert_eq!(seq.received, delivered);
        // The extension must place the highest delivered sequence in the
        // right 64K cycle: ground truth is the generator's index itself.
        assert_eq!(seq.extended_highest(), max_i);
        let expected = seq.expected();
        assert_eq!(expected, u64::from(max_i - first_i) + 1);
        // And therefore cumulative loss tracks ground truth exactly
        // (duplicates count as received, driving it down).
        let ground_truth_lost =
            i64::from(max_i - first_i) + 1 - delivered as i64;
        assert_eq!(expected as i64 - seq.received as i64, ground_truth_lost);
    }
}
