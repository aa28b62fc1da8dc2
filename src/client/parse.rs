// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Parses the RTSP headers that drive session negotiation: `Public`,
//! `Session`, `Transport`, `RTP-Info`, and the `DESCRIBE` base-URL rules.

use std::net::IpAddr;

use url::Url;

use crate::message::Response;
use crate::sdp;

/// The `Session` header of a `SETUP` response:
/// [RFC 2326 section 12.37](https://datatracker.ietf.org/doc/html/rfc2326#section-12.37).
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct SessionHeader {
    pub(crate) id: Box<str>,
    pub(crate) timeout_sec: u32,
}

pub(crate) fn parse_session_header(value: &str) -> Result<SessionHeader, String> {
    let mut parts = value.split(';');
    let id = parts.next().expect("split returns at least one part").trim();
    if id.is_empty() {
        return Err("empty Session id".to_owned());
    }
    let mut timeout_sec = 60; // default per RFC 2326.
    for part in parts {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("timeout=") {
            timeout_sec =
                u32::from_str_radix(v.trim(), 10).map_err(|_| format!("unparseable timeout {v}"))?;
        }
        // Other parameters are ignored.
    }
    Ok(SessionHeader {
        id: id.into(),
        timeout_sec,
    })
}

/// A `SETUP` response's `Transport` header, decomposed:
/// [RFC 2326 section 12.39](https://datatracker.ietf.org/doc/html/rfc2326#section-12.39).
/// A response carries exactly one transport specification.
#[derive(Debug, Default, PartialEq, Eq)]
pub(crate) struct TransportHeader {
    /// Stream identifier, given in hex by convention.
    pub(crate) ssrc: Option<u32>,

    /// The RTP channel from `interleaved=n(-m)`; RTCP is `n+1`.
    pub(crate) channel_id: Option<u8>,

    /// `source=` address, which takes precedence over the connection's peer
    /// address as the RTP/RTCP peer.
    pub(crate) source: Option<IpAddr>,

    /// `server_port=n-m`: the server's RTP and RTCP ports for UDP.
    pub(crate) server_port: Option<(u16, u16)>,

    /// `client_port=n-m` echoed back by the server.
    pub(crate) client_port: Option<(u16, u16)>,
}

pub(crate) fn parse_transport_header(value: &str) -> Result<TransportHeader, String> {
    let mut out = TransportHeader::default();
    for part in value.split(';') {
        let part = part.trim();
        if let Some(v) = part.strip_prefix("ssrc=") {
            let v = u32::from_str_radix(v, 16).map_err(|_| format!("unparseable ssrc {v}"))?;
            out.ssrc = Some(v);
        } else if let Some(interleaved) = part.strip_prefix("interleaved=") {
            let mut channels = interleaved.splitn(2, '-');
            let n = channels.next().expect("splitn returns at least one part");
            let n = u8::from_str_radix(n, 10).map_err(|_| format!("bad channel number {n}"))?;
            if let Some(m) = channels.next() {
                let m = u8::from_str_radix(m, 10)
                    .map_err(|_| format!("bad second channel number {m}"))?;
                if n.checked_add(1) != Some(m) {
                    return Err(format!("expected adjacent channels; got {n}-{m}"));
                }
            }
            out.channel_id = Some(n);
        } else if let Some(s) = part.strip_prefix("source=") {
            // Some servers supply a hostname here; ignore those and fall
            // back to the connection's peer address.
            out.source = s.parse().ok();
        } else if let Some(s) = part.strip_prefix("server_port=") {
            out.server_port = Some(parse_port_pair(s)?);
        } else if let Some(s) = part.strip_prefix("client_port=") {
            out.client_port = Some(parse_port_pair(s)?);
        }
    }
    Ok(out)
}

fn parse_port_pair(s: &str) -> Result<(u16, u16), String> {
    let mut ports = s.splitn(2, '-');
    let n = ports.next().expect("splitn returns at least one part");
    let n = u16::from_str_radix(n, 10).map_err(|_| format!("bad port {n}"))?;
    match ports.next() {
        Some(m) => {
            let m = u16::from_str_radix(m, 10).map_err(|_| format!("bad second port {m}"))?;
            Ok((n, m))
        }
        // RFC 2326's grammar allows a single port, but it's unclear whether
        // that means a shared port or an implied pair. Reject and let the
        // caller fall back to the connection's peer address handling.
        None => Err(format!("{s:?} specifies a single port")),
    }
}

/// Methods advertised in an `OPTIONS` response's `Public` header.
pub(crate) fn parse_public(value: &str) -> Vec<Box<str>> {
    value
        .split(',')
        .map(|m| m.trim().to_ascii_uppercase().into_boxed_str())
        .filter(|m| !m.is_empty())
        .collect()
}

/// The base URL for resolving control attributes, per
/// [RFC 2326 appendix C.1.1](https://tools.ietf.org/html/rfc2326#appendix-C.1.1):
/// `Content-Base`, else `Content-Location`, else the request URL.
pub(crate) fn base_url(response: &Response, request_url: &Url) -> Result<Url, String> {
    for name in ["Content-Base", "Content-Location"] {
        if let Some(v) = response.header(name) {
            return Url::parse(v).map_err(|e| format!("bad {name} {v:?}: {e}"));
        }
    }
    Ok(request_url.clone())
}

/// Per-track parameters from a `PLAY` response's `RTP-Info` header:
/// [RFC 2326 section 12.33](https://datatracker.ietf.org/doc/html/rfc2326#section-12.33).
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub(crate) struct RtpInfoParams {
    pub(crate) seq: Option<u16>,
    pub(crate) rtptime: Option<u32>,
    pub(crate) ssrc: Option<u32>,
}

pub(crate) fn parse_rtp_info(
    base: &Url,
    value: &str,
) -> Result<Vec<(Url, RtpInfoParams)>, String> {
    let mut out = Vec::new();
    for s in value.split(',') {
        let s = s.trim();
        let mut parts = s.split(';');
        let url = parts
            .next()
            .expect("split always returns at least one part")
            .trim()
            .strip_prefix("url=")
            .ok_or_else(|| "RTP-Info entry missing url=".to_string())?;
        let url = sdp::join_control(base, url.trim())?;
        let mut params = RtpInfoParams::default();
        for part in parts {
            let (key, param_value) = part
                .trim()
                .split_once('=')
                .ok_or_else(|| "RTP-Info param has no =".to_string())?;
            match key {
                "seq" => {
                    params.seq = Some(
                        u16::from_str_radix(param_value, 10)
                            .map_err(|_| format!("bad seq {param_value:?}"))?,
                    );
                }
                "rtptime" => {
                    params.rtptime = Some(
                        u32::from_str_radix(param_value, 10)
                            .map_err(|_| format!("bad rtptime {param_value:?}"))?,
                    );
                }
                "ssrc" => {
                    params.ssrc = Some(
                        u32::from_str_radix(param_value, 16)
                            .map_err(|_| format!("unparseable ssrc {param_value}"))?,
                    );
                }
                _ => {}
            }
        }
        out.push((url, params));
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_header() {
        assert_eq!(
            parse_session_header("12345678").unwrap(),
            SessionHeader {
                id: "12345678".into(),
                timeout_sec: 60
            }
        );
        assert_eq!(
            parse_session_header("2sY7Pd2EPx8JY50-;timeout=90").unwrap(),
            SessionHeader {
                id: "2sY7Pd2EPx8JY50-".into(),
                timeout_sec: 90
            }
        );
        parse_session_header(";timeout=90").unwrap_err();
        parse_session_header("abc;timeout=x").unwrap_err();
    }

    #[test]
    fn transport_interleaved() {
        let t =
            parse_transport_header("RTP/AVP/TCP;unicast;interleaved=0-1;ssrc=E6EC9FEF;mode=\"PLAY\"")
                .unwrap();
        assert_eq!(t.channel_id, Some(0));
        assert_eq!(t.ssrc, Some(0xe6ec9fef));
        assert_eq!(t.server_port, None);
    }

    #[test]
    fn transport_udp() {
        let t = parse_transport_header(
            "RTP/AVP;unicast;client_port=5000-5001;server_port=50000-50001;source=192.168.5.111",
        )
        .unwrap();
        assert_eq!(t.channel_id, None);
        assert_eq!(t.client_port, Some((5000, 5001)));
        assert_eq!(t.server_port, Some((50000, 50001)));
        assert_eq!(t.source, Some("192.168.5.111".parse().unwrap()));
    }

    #[test]
    fn transport_rejects() {
        parse_transport_header("RTP/AVP/TCP;unicast;interleaved=0-2").unwrap_err();
        parse_transport_header("RTP/AVP;unicast;server_port=50000").unwrap_err();
        parse_transport_header("RTP/AVP;unicast;ssrc=xyz").unwrap_err();
    }

    #[test]
    fn public() {
        let methods = parse_public("OPTIONS, DESCRIBE, SETUP, TEARDOWN, PLAY, Get_Parameter");
        assert!(methods.iter().any(|m| &**m == "GET_PARAMETER"));
        assert!(methods.iter().any(|m| &**m == "PLAY"));
        assert!(!methods.iter().any(|m| &**m == "RECORD"));
    }

    #[test]
    fn rtp_info() {
        let base = Url::parse("rtsp://cam/media.sdp/").unwrap();
        let entries = parse_rtp_info(
            &base,
            "url=rtsp://cam/media.sdp/trackID=0;seq=47121;rtptime=3475222385, \
             url=trackID=1;seq=1;ssrc=9fc9fff8",
        )
        .unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0.as_str(), "rtsp://cam/media.sdp/trackID=0");
        assert_eq!(
            entries[0].1,
            RtpInfoParams {
                seq: Some(47121),
                rtptime: Some(3475222385),
                ssrc: None
            }
        );
        assert_eq!(entries[1].0.as_str(), "rtsp://cam/media.sdp/trackID=1");
        assert_eq!(
            entries[1].1,
            RtpInfoParams {
                seq: Some(1),
                rtptime: None,
                ssrc: Some(0x9fc9fff8)
            }
        );
    }
}
