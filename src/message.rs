// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! RTSP/1.0 message grammar: start lines, headers, and serialization.
//!
//! Byte-stream framing (including `$`-prefixed interleaved data) lives in
//! [`crate::tokio`]; this module only understands a contiguous
//! start-line + header block + body.

use bytes::{Bytes, BytesMut};

/// The RTSP methods this client sends.
///
/// Inbound server requests (`ANNOUNCE` and friends) keep their method as a
/// string in [`ReceivedRequest`]; we never act on them.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum Method {
    Options,
    Describe,
    Setup,
    Play,
    Pause,
    Teardown,
    GetParameter,
    SetParameter,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Options => "OPTIONS",
            Method::Describe => "DESCRIBE",
            Method::Setup => "SETUP",
            Method::Play => "PLAY",
            Method::Pause => "PAUSE",
            Method::Teardown => "TEARDOWN",
            Method::GetParameter => "GET_PARAMETER",
            Method::SetParameter => "SET_PARAMETER",
        }
    }
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.pad(self.as_str())
    }
}

/// Header map with case-insensitive lookup and wire-case preservation.
///
/// RTSP requests and responses carry few headers, so this is a plain vector
/// in insertion order rather than a hash map. Duplicate headers received
/// from the wire are concatenated comma-separated, as RFC 2326 §12 allows.
#[derive(Clone, Debug, Default)]
pub struct Headers(Vec<(Box<str>, String)>);

impl Headers {
    /// Case-insensitive lookup, returning the first (possibly concatenated) value.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.0
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// Sets a header, replacing any existing value under a case-insensitive match.
    pub fn set(&mut self, name: impl Into<Box<str>>, value: impl Into<String>) {
        let name = name.into();
        let value = value.into();
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(&name)) {
            Some((_, v)) => *v = value,
            None => self.0.push((name, value)),
        }
    }

    /// Adds a header from the wire; a duplicate extends the existing value.
    fn add_from_wire(&mut self, name: &str, value: &str) {
        match self.0.iter_mut().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            Some((_, v)) => {
                v.push_str(", ");
                v.push_str(value);
            }
            None => self.0.push((name.into(), value.to_owned())),
        }
    }

    /// Extends the most recently added header with a folded continuation line.
    fn extend_last(&mut self, continuation: &str) -> Result<(), String> {
        match self.0.last_mut() {
            Some((_, v)) => {
                v.push(' ');
                v.push_str(continuation);
                Ok(())
            }
            None => Err("continuation line before any header".to_owned()),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(n, v)| (&**n, v.as_str()))
    }
}

/// Returns the `CSeq` of a header block as a `u32`, or `None` if missing/unparseable.
pub(crate) fn get_cseq(headers: &Headers) -> Option<u32> {
    headers
        .get("CSeq")
        .and_then(|v| u32::from_str_radix(v.trim(), 10).ok())
}

/// An outbound RTSP request. The `CSeq` is assigned by the connection at
/// send time and is always the first header on the wire; some servers
/// reject anything else.
#[derive(Clone, Debug)]
pub struct Request {
    pub method: Method,
    pub uri: String,
    pub headers: Headers,
    pub body: Bytes,
}

impl Request {
    pub fn new(method: Method, uri: impl Into<String>) -> Self {
        Self {
            method,
            uri: uri.into(),
            headers: Headers::default(),
            body: Bytes::new(),
        }
    }

    pub fn header(mut self, name: impl Into<Box<str>>, value: impl Into<String>) -> Self {
        self.headers.set(name, value);
        self
    }

    /// Serializes with the given `CSeq` first, then the remaining headers in
    /// insertion order. `Content-Length` is derived from the body.
    pub(crate) fn write(&self, cseq: u32, dst: &mut BytesMut) {
        use bytes::BufMut;
        dst.put_slice(self.method.as_str().as_bytes());
        dst.put_u8(b' ');
        dst.put_slice(self.uri.as_bytes());
        dst.put_slice(b" RTSP/1.0\r\n");
        dst.put_slice(format!("CSeq: {cseq}\r\n").as_bytes());
        for (name, value) in self.headers.iter() {
            if name.eq_ignore_ascii_case("CSeq") || name.eq_ignore_ascii_case("Content-Length") {
                continue;
            }
            dst.put_slice(name.as_bytes());
            dst.put_slice(b": ");
            dst.put_slice(value.as_bytes());
            dst.put_slice(b"\r\n");
        }
        if !self.body.is_empty() {
            dst.put_slice(format!("Content-Length: {}\r\n", self.body.len()).as_bytes());
        }
        dst.put_slice(b"\r\n");
        dst.put_slice(&self.body);
    }
}

/// Serializes a minimal response, used to answer server-initiated requests.
pub(crate) fn write_response(status: u16, reason: &str, cseq: Option<u32>, dst: &mut BytesMut) {
    use bytes::BufMut;
    dst.put_slice(format!("RTSP/1.0 {status} {reason}\r\n").as_bytes());
    if let Some(cseq) = cseq {
        dst.put_slice(format!("CSeq: {cseq}\r\n").as_bytes());
    }
    dst.put_slice(b"\r\n");
}

/// An RTSP response as received from the server.
#[derive(Clone, Debug)]
pub struct Response {
    pub status: u16,
    pub reason: Box<str>,
    pub headers: Headers,
    pub body: Bytes,
}

impl Response {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn cseq(&self) -> Option<u32> {
        get_cseq(&self.headers)
    }

    /// 1xx responses are informational; only a final response completes a request.
    pub fn is_final(&self) -> bool {
        self.status >= 200
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// A server-initiated request (e.g. `ANNOUNCE`). Parsed for framing
/// correctness and answered `551 Option not supported`; never acted on.
#[derive(Clone, Debug)]
pub struct ReceivedRequest {
    pub method: Box<str>,
    pub uri: Box<str>,
    pub headers: Headers,
    pub body: Bytes,
}

#[derive(Debug)]
pub(crate) enum StartLine {
    Response { status: u16, reason: Box<str> },
    Request { method: Box<str>, uri: Box<str> },
}

/// A parsed start line + header block, with byte lengths so the caller can
/// split the body out of its buffer without copying.
#[derive(Debug)]
pub(crate) struct MessageHead {
    pub(crate) start: StartLine,
    pub(crate) headers: Headers,
    /// Bytes up to and including the CRLFCRLF terminator.
    pub(crate) header_len: usize,
    /// `Content-Length`, or 0 when absent.
    pub(crate) body_len: usize,
}

/// Limit on a message's start-line + headers before we declare the stream garbage.
pub(crate) const MAX_HEADER_BYTES: usize = 65_536;

/// Upper bound on `Content-Length`; RTSP bodies are SDP and parameter
/// blobs, not media.
const MAX_BODY_BYTES: usize = 4 << 20;

/// Parses a message head from the start of `buf`.
///
/// Returns `Ok(None)` if the terminating CRLFCRLF has not arrived yet; the
/// caller buffers more input and retries, so delivery split at arbitrary
/// byte boundaries (including one byte at a time) parses identically to a
/// single read.
pub(crate) fn parse_message_head(buf: &[u8]) -> Result<Option<MessageHead>, String> {
    let Some(head_end) = find_crlf_crlf(buf) else {
        if buf.len() > MAX_HEADER_BYTES {
            return Err(format!(
                "no CRLFCRLF in first {} bytes of message",
                buf.len()
            ));
        }
        return Ok(None);
    };
    let head = std::str::from_utf8(&buf[..head_end])
        .map_err(|_| "non-UTF-8 bytes in message head".to_owned())?;
    let mut lines = head.split("\r\n");
    let start_line = lines.next().expect("split returns at least one item");
    let start = parse_start_line(start_line)?;

    let mut headers = Headers::default();
    for line in lines {
        if line.is_empty() {
            return Err("empty header line within message head".to_owned());
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            headers.extend_last(line.trim())?;
            continue;
        }
        let (name, value) = line
            .split_once(':')
            .ok_or_else(|| format!("header line {line:?} has no colon"))?;
        let name = name.trim();
        if name.is_empty() {
            return Err(format!("header line {line:?} has an empty name"));
        }
        headers.add_from_wire(name, value.trim());
    }

    let body_len = match headers.get("Content-Length") {
        None => 0,
        Some(v) => usize::from_str_radix(v.trim(), 10)
            .map_err(|_| format!("unparseable Content-Length {v:?}"))?,
    };
    if body_len > MAX_BODY_BYTES {
        return Err(format!("implausible Content-Length {body_len}"));
    }
    Ok(Some(MessageHead {
        start,
        headers,
        header_len: head_end + 4,
        body_len,
    }))
}

fn find_crlf_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(4).position(|w| w == b"\r\n\r\n")
}

fn parse_start_line(line: &str) -> Result<StartLine, String> {
    if let Some(rest) = line.strip_prefix("RTSP/1.0 ") {
        // status-line: RTSP-Version SP Status-Code SP Reason-Phrase
        let (status, reason) = match rest.split_once(' ') {
            Some((s, r)) => (s, r),
            None => (rest, ""),
        };
        let status =
            u16::from_str_radix(status, 10).map_err(|_| format!("bad status code {status:?}"))?;
        if !(100..600).contains(&status) {
            return Err(format!("status code {status} out of range"));
        }
        return Ok(StartLine::Response {
            status,
            reason: reason.into(),
        });
    }

    // request-line: Method SP Request-URI SP RTSP-Version
    let mut parts = line.split(' ');
    let method = parts.next().unwrap_or("");
    let uri = parts.next().ok_or_else(|| format!("bad request line {line:?}"))?;
    let version = parts.next().ok_or_else(|| format!("bad request line {line:?}"))?;
    if parts.next().is_some() || !version.starts_with("RTSP/") {
        return Err(format!("bad request line {line:?}"));
    }
    if method.is_empty() || !method.bytes().all(|b| b.is_ascii_uppercase() || b == b'_') {
        return Err(format!("bad method in request line {line:?}"));
    }
    Ok(StartLine::Request {
        method: method.into(),
        uri: uri.into(),
    })
}
