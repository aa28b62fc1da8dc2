// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Async RTSP 1.0 client library with RTP/RTCP handling.
//!
//! This crate speaks the client side of RTSP ([RFC
//! 2326](https://datatracker.ietf.org/doc/html/rfc2326)) to IP cameras and
//! streaming servers: it negotiates a media session, receives RTP packets
//! over UDP or interleaved within the RTSP TCP connection, and exchanges
//! RTCP reports as described in [RFC
//! 3550](https://datatracker.ietf.org/doc/html/rfc3550). It does not decode
//! media; packets are handed to the application as-is.
//!
//! See [`client::Session`] for the entry point.

#![forbid(clippy::print_stderr, clippy::print_stdout)]
// I prefer to use from_str_radix(..., 10) to explicitly note the base.
#![allow(clippy::from_str_radix_10)]

use std::fmt::Display;
use std::net::{IpAddr, SocketAddr, UdpSocket};
use std::ops::Range;

use log::trace;
use rand::Rng;

mod error;
mod hex;

pub use error::Error;

/// Wraps the supplied `ErrorInt` and returns it as an `Err`.
macro_rules! bail {
    ($e:expr) => {
        return Err(crate::error::Error(std::sync::Arc::new($e)))
    };
}

macro_rules! wrap {
    ($e:expr) => {
        crate::error::Error(std::sync::Arc::new($e))
    };
}

mod auth;
pub mod client;
mod message;
pub mod rtcp;
pub mod rtp;
mod sdp;

#[cfg(test)]
mod testutil;

mod tokio;

use error::ErrorInt;

pub use crate::tokio::{IoStream, TlsConnector};

pub(crate) fn to_u64(n: usize) -> u64 {
    u64::try_from(n).expect("usize fits in u64")
}

/// The Unix epoch as an [`NtpTimestamp`].
pub const UNIX_EPOCH: NtpTimestamp = NtpTimestamp((2_208_988_800) << 32);

/// A wallclock time represented using the format of the Network Time Protocol.
///
/// NTP timestamps are a fixed-point representation of seconds since 0h UTC on
/// 1 January 1900: the top 32 bits are the integer part (wrapping every 68
/// years), the bottom 32 bits the fraction. RTCP sender reports carry one,
/// and receiver reports echo its middle 32 bits back as the `LSR` field.
///
/// An `NtpTimestamp` isn't necessarily gathered from a real NTP server.
/// Reported timestamps are allowed to jump backward and/or be complete
/// nonsense.
#[derive(Copy, Clone, PartialEq, PartialOrd, Eq, Ord)]
pub struct NtpTimestamp(pub u64);

impl NtpTimestamp {
    /// The middle 32 bits, as echoed in receiver report `LSR` fields.
    #[inline]
    pub fn middle_32(self) -> u32 {
        ((self.0 >> 16) & 0xFFFF_FFFF) as u32
    }
}

impl std::fmt::Display for NtpTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let date_time: chrono::DateTime<chrono::Utc> = (*self).into();
        write!(f, "{}", date_time.format("%FT%T%.3f%:z"))
    }
}

impl std::fmt::Debug for NtpTimestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Write both the raw and display forms.
        write!(f, "{} /* {} */", self.0, self)
    }
}

impl<TZ> TryFrom<chrono::DateTime<TZ>> for NtpTimestamp
where
    TZ: chrono::TimeZone,
{
    type Error = std::num::TryFromIntError;
    fn try_from(orig: chrono::DateTime<TZ>) -> Result<Self, Self::Error> {
        let epoch_naive = chrono::NaiveDate::from_ymd_opt(1900, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let epoch = chrono::TimeZone::from_local_datetime(&chrono::Utc, &epoch_naive).unwrap();
        let elapsed: chrono::Duration = orig.with_timezone(&chrono::Utc) - epoch;
        let sec_since_epoch: u32 = elapsed.num_seconds().try_into()?;
        let nanos = elapsed.to_std().unwrap().subsec_nanos();
        let frac = f64::from(nanos) / 1e9;
        let frac_int = (frac * f64::from(u32::MAX)).round() as u32;
        let val = (u64::from(sec_since_epoch) << 32) + u64::from(frac_int);
        Ok(NtpTimestamp(val))
    }
}

impl<TZ> From<NtpTimestamp> for chrono::DateTime<TZ>
where
    TZ: chrono::TimeZone,
    chrono::DateTime<TZ>: From<chrono::DateTime<chrono::Utc>>,
{
    fn from(orig: NtpTimestamp) -> Self {
        let since_epoch = orig.0.wrapping_sub(UNIX_EPOCH.0);
        let sec_since_epoch = (since_epoch >> 32) as u32;
        let frac_int = (since_epoch & 0xFFFF_FFFF) as u32;
        let frac = frac_int as f64 / f64::from(u32::MAX);
        let nanos = (frac * 1e9).round() as u32;
        let timedelta = chrono::Duration::seconds(i64::from(sec_since_epoch))
            + chrono::Duration::nanoseconds(i64::from(nanos));
        let date_time = chrono::DateTime::UNIX_EPOCH + timedelta;
        date_time.into()
    }
}

/// A wall time taken from the local machine's realtime clock, used in error reporting.
#[derive(Copy, Clone, Debug)]
pub struct WallTime(chrono::DateTime<chrono::Utc>);

impl WallTime {
    pub(crate) fn now() -> Self {
        Self(chrono::Utc::now())
    }
}

impl Display for WallTime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%FT%T"))
    }
}

/// RTSP connection context.
///
/// This gives enough information to pick out the flow in a packet capture.
/// Credentials never appear here.
#[derive(Copy, Clone, Debug)]
pub struct ConnectionContext {
    pub(crate) local_addr: SocketAddr,
    pub(crate) peer_addr: SocketAddr,
    pub(crate) established_wall: WallTime,
}

impl ConnectionContext {
    #[doc(hidden)]
    pub fn dummy() -> Self {
        let addr = SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), 0);
        Self {
            local_addr: addr,
            peer_addr: addr,
            established_wall: WallTime::now(),
        }
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }
}

impl Display for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}(me)->{}@{}",
            &self.local_addr, &self.peer_addr, &self.established_wall,
        )
    }
}

/// Context of a received message (or read error) within an RTSP connection.
///
/// When paired with a [`ConnectionContext`], this should allow picking the
/// message out of a packet capture.
#[derive(Copy, Clone, Debug)]
pub struct MessageContext {
    /// The starting byte position within the input stream. The bottom 32 bits
    /// can be compared to the relative TCP sequence number.
    pub(crate) pos: u64,

    /// Time when the message was parsed. Caveat: this may not closely match
    /// the time on a packet capture if the process is overloaded (or if
    /// `CLOCK_REALTIME` jumps).
    pub(crate) received_wall: WallTime,
    pub(crate) received: std::time::Instant,
}

impl MessageContext {
    #[doc(hidden)]
    pub fn dummy() -> Self {
        Self {
            pos: 0,
            received_wall: WallTime::now(),
            received: std::time::Instant::now(),
        }
    }

    pub fn received(&self) -> std::time::Instant {
        self.received
    }

    pub fn pos(&self) -> u64 {
        self.pos
    }
}

impl Display for MessageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.pos, &self.received_wall)
    }
}

/// Context for an RTP or RTCP packet, received either via RTSP interleaved data or UDP.
///
/// Should be paired with the [`ConnectionContext`] of the RTSP connection
/// that started the session. In the interleaved case, the packet was
/// received over that same connection.
#[derive(Copy, Clone, Debug)]
pub struct PacketContext(pub(crate) PacketContextInner);

impl PacketContext {
    #[doc(hidden)]
    pub fn dummy() -> PacketContext {
        Self(PacketContextInner::Dummy)
    }

    pub(crate) fn tcp(msg_ctx: MessageContext) -> Self {
        Self(PacketContextInner::Tcp { msg_ctx })
    }

    pub(crate) fn udp(received_wall: WallTime) -> Self {
        Self(PacketContextInner::Udp { received_wall })
    }

    /// Wall-clock arrival time of the packet.
    pub fn received_wall(&self) -> Option<WallTime> {
        match self.0 {
            PacketContextInner::Tcp { msg_ctx } => Some(msg_ctx.received_wall),
            PacketContextInner::Udp { received_wall } => Some(received_wall),
            PacketContextInner::Dummy => None,
        }
    }
}

#[derive(Copy, Clone, Debug)]
pub(crate) enum PacketContextInner {
    Tcp { msg_ctx: MessageContext },
    Udp { received_wall: WallTime },
    Dummy,
}

impl Display for PacketContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.0 {
            PacketContextInner::Udp { received_wall } => Display::fmt(&received_wall, f),
            PacketContextInner::Tcp { msg_ctx } => Display::fmt(&msg_ctx, f),
            PacketContextInner::Dummy => write!(f, "dummy"),
        }
    }
}

/// A pair of local UDP sockets used for RTP and RTCP reception.
///
/// The RTP port is always even, and the RTCP port is always the following
/// (odd) integer. Both are bound before `SETUP` is sent so the offered
/// `client_port` range is guaranteed available.
struct UdpPair {
    rtp_port: u16,
    rtp_socket: UdpSocket,
    rtcp_socket: UdpSocket,
}

impl UdpPair {
    fn for_ip(ip_addr: IpAddr) -> Result<Self, std::io::Error> {
        const MAX_TRIES: usize = 10;
        const ALLOWED_RTP_RANGE: Range<u16> = 5000..65000; // stolen from ffmpeg's defaults.
        let mut rng = rand::thread_rng();
        for i in 0..MAX_TRIES {
            let rtp_port = rng.gen_range(ALLOWED_RTP_RANGE) & !0b1;
            debug_assert!(ALLOWED_RTP_RANGE.contains(&rtp_port));
            let rtp_addr = SocketAddr::new(ip_addr, rtp_port);
            let rtp_socket = match UdpSocket::bind(rtp_addr) {
                Ok(s) => s,
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    trace!(
                        "Try {}/{}: unable to bind RTP addr {:?}",
                        i,
                        MAX_TRIES,
                        rtp_addr
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            let rtcp_addr = SocketAddr::new(ip_addr, rtp_port + 1);
            let rtcp_socket = match UdpSocket::bind(rtcp_addr) {
                Ok(s) => s,
                Err(e) if e.kind() == std::io::ErrorKind::AddrInUse => {
                    trace!(
                        "Try {}/{}: unable to bind RTCP addr {:?}",
                        i,
                        MAX_TRIES,
                        rtcp_addr
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            return Ok(Self {
                rtp_port,
                rtp_socket,
                rtcp_socket,
            });
        }
        Err(std::io::Error::new(
            std::io::ErrorKind::AddrInUse,
            format!(
                "Unable to find even/odd pair in {}:{}..{} after {} tries",
                ip_addr, ALLOWED_RTP_RANGE.start, ALLOWED_RTP_RANGE.end, MAX_TRIES
            ),
        ))
    }
}
