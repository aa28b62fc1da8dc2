// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Narrow SDP parsing: just enough of a `DESCRIBE` body to drive `SETUP`.
//!
//! Extracts each `m=` section's media type, RTP payload type, clock rate,
//! and `a=control` URL. Codec parameters (`a=fmtp` and friends) are opaque
//! to this crate; applications that need them can read the raw body.

use log::debug;
use url::Url;

/// One `m=` section of a presentation description.
#[derive(Clone, Debug)]
pub(crate) struct MediaDescription {
    /// Media type as written: `video`, `audio`, `application`, ...
    pub(crate) media: String,

    /// The first RTP payload type listed; RFC 8866 says the first is the
    /// default format for the session.
    pub(crate) payload_type: u8,

    /// RTP clock rate in Hz, from `a=rtpmap`, the static payload type
    /// registry, or a 90 kHz fallback.
    pub(crate) clock_rate: u32,

    /// Resolved `a=control` URL for this media, if any.
    pub(crate) control: Option<Url>,
}

/// The parts of a `DESCRIBE` result that `SETUP`/`PLAY` need.
#[derive(Debug)]
pub(crate) struct Presentation {
    /// Aggregate control URL: the session-level `a=control` resolved against
    /// the base URL, else the `DESCRIBE` request URL.
    pub(crate) control: Url,

    pub(crate) medias: Vec<MediaDescription>,
}

/// Joins a control attribute to a base URL in a non-RFC-compliant but common
/// way, matching what live555 and ffmpeg do: `*` means the base itself,
/// absolute URLs are kept, and relative ones are appended after a `/`.
pub(crate) fn join_control(base_url: &Url, control: &str) -> Result<Url, String> {
    if control == "*" {
        return Ok(base_url.clone());
    }
    if let Ok(absolute_url) = Url::parse(control) {
        return Ok(absolute_url);
    }
    Url::parse(&format!(
        "{}{}{}",
        base_url.as_str(),
        if base_url.as_str().ends_with('/') {
            ""
        } else {
            "/"
        },
        control
    ))
    .map_err(|e| {
        format!(
            "unable to join base url {} with control url {:?}: {}",
            base_url, control, e
        )
    })
}

/// Clock rate for an assigned static payload type, per the closed [RTP
/// parameters registry](https://www.iana.org/assignments/rtp-parameters/rtp-parameters.xhtml#rtp-parameters-1).
fn static_clock_rate(payload_type: u8) -> Option<u32> {
    match payload_type {
        0 | 3 | 4 | 5 | 7 | 8 | 9 | 12 | 13 | 15 | 18 => Some(8_000), // pcmu, gsm, g723, ...
        6 => Some(16_000),  // dvi4/16000
        16 => Some(11_025), // dvi4/11025
        17 => Some(22_050), // dvi4/22050
        10 | 11 => Some(44_100), // l16
        14 | 25 | 26 | 28 | 31 | 32 | 33 | 34 => Some(90_000), // mpa and video types
        _ => None,
    }
}

/// Parses a `DESCRIBE` body.
///
/// `base_url` is the `Content-Base` (preferred), `Content-Location`, or
/// request URL, in that order; `request_url` is the fallback aggregate
/// control when the SDP has no session-level `a=control`.
pub(crate) fn parse_describe(
    base_url: &Url,
    request_url: &Url,
    body: &[u8],
) -> Result<Presentation, String> {
    let text = String::from_utf8_lossy(body);
    let mut session_control: Option<Url> = None;
    let mut medias: Vec<MediaDescription> = Vec::new();
    let mut current: Option<MediaLines> = None;

    for raw_line in text.lines() {
        let line = raw_line.trim_end_matches('\r');
        let Some((kind, value)) = line.split_once('=') else {
            continue; // blank or malformed line; be forgiving.
        };
        match kind {
            "m" => {
                if let Some(m) = current.take() {
                    medias.push(m.finish(base_url)?);
                }
                current = Some(MediaLines::parse(value)?);
            }
            "a" => {
                let (attribute, attr_value) = match value.split_once(':') {
                    Some((a, v)) => (a, Some(v)),
                    None => (value, None),
                };
                match &mut current {
                    Some(m) => m.attribute(attribute, attr_value),
                    None => {
                        if attribute == "control" {
                            if let Some(c) = attr_value {
                                session_control = Some(join_control(base_url, c)?);
                            }
                        }
                    }
                }
            }
            _ => {}
        }
    }
    if let Some(m) = current.take() {
        medias.push(m.finish(base_url)?);
    }
    if medias.is_empty() {
        return Err("SDP has no media sections".to_owned());
    }
    Ok(Presentation {
        control: session_control.unwrap_or_else(|| request_url.clone()),
        medias,
    })
}

/// Accumulates one `m=` section's lines before resolution.
struct MediaLines {
    media: String,
    payload_type: u8,
    payload_type_str: String,
    rtpmap: Option<String>,
    control: Option<String>,
}

impl MediaLines {
    /// Parses `<media> <port> <proto> <fmt> ...` from an `m=` line.
    fn parse(value: &str) -> Result<Self, String> {
        let mut parts = value.split_ascii_whitespace();
        let media = parts
            .next()
            .ok_or_else(|| format!("empty m= line {value:?}"))?;
        let _port = parts.next().ok_or_else(|| format!("m= line {value:?} has no port"))?;
        let proto = parts
            .next()
            .ok_or_else(|| format!("m= line {value:?} has no proto"))?;

        // RFC 8866 §5.14: with an "RTP/AVP"-family proto the formats are RTP
        // payload type numbers. "TCP/RTP/AVP" and similar also qualify.
        if !proto.starts_with("RTP/") && !proto.contains("/RTP/") {
            return Err(format!("m= line {value:?} has non-RTP proto {proto:?}"));
        }
        let payload_type_str = parts
            .next()
            .ok_or_else(|| format!("m= line {value:?} has no format list"))?;
        let payload_type = u8::from_str_radix(payload_type_str, 10)
            .ok()
            .filter(|pt| *pt < 0x80)
            .ok_or_else(|| format!("invalid RTP payload type {payload_type_str:?}"))?;
        Ok(Self {
            media: media.to_owned(),
            payload_type,
            payload_type_str: payload_type_str.to_owned(),
            rtpmap: None,
            control: None,
        })
    }

    fn attribute(&mut self, attribute: &str, value: Option<&str>) {
        match (attribute, value) {
            ("rtpmap", Some(v)) => {
                // rtpmap-value = payload-type SP encoding-name "/" clock-rate
                //   ["/" encoding-params]; only the matching payload type counts.
                if let Some((pt, mapping)) = v.split_once(' ') {
                    if pt == self.payload_type_str {
                        self.rtpmap = Some(mapping.to_owned());
                    }
                }
            }
            ("control", Some(v)) => self.control = Some(v.to_owned()),
            _ => {}
        }
    }

    fn finish(self, base_url: &Url) -> Result<MediaDescription, String> {
        let clock_rate = match &self.rtpmap {
            Some(mapping) => {
                let mut parts = mapping.split('/');
                let _encoding = parts.next();
                let clock = parts
                    .next()
                    .ok_or_else(|| format!("rtpmap {mapping:?} has no clock rate"))?;
                u32::from_str_radix(clock, 10)
                    .map_err(|_| format!("bad clock rate in rtpmap {mapping:?}"))?
            }
            None => match static_clock_rate(self.payload_type) {
                Some(rate) => rate,
                None => {
                    debug!(
                        "no rtpmap for payload type {} on {} media; assuming 90 kHz",
                        self.payload_type, self.media
                    );
                    90_000
                }
            },
        };
        let control = self
            .control
            .as_deref()
            .map(|c| join_control(base_url, c))
            .transpose()?;
        Ok(MediaDescription {
            media: self.media,
            payload_type: self.payload_type,
            clock_rate,
            control,
        })
    }
}
