// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! In-process scripted RTSP servers for tests.
//!
//! Each test spawns a task that speaks just enough of the server side of
//! the protocol, exercising the client over a real localhost socket.

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use url::Url;

use crate::message::{self, Headers, StartLine};

/// A request as seen by the scripted server.
pub(crate) struct ServerSeenRequest {
    pub(crate) method: String,
    pub(crate) uri: String,
    pub(crate) cseq: u32,
    pub(crate) headers: Headers,
}

/// An interleaved frame as seen by the scripted server (client's RTCP).
#[derive(Debug)]
pub(crate) struct ServerSeenFrame {
    pub(crate) channel_id: u8,
    pub(crate) data: Vec<u8>,
}

pub(crate) struct ServerConn {
    pub(crate) stream: TcpStream,
    buf: BytesMut,

    /// Interleaved frames skipped over while waiting for a request.
    pub(crate) frames: Vec<ServerSeenFrame>,
}

impl ServerConn {
    /// Reads the next request, collecting any interleaved frames that
    /// arrive first (the client's RTCP reports and BYEs) into `frames`.
    pub(crate) async fn read_request(&mut self) -> ServerSeenRequest {
        loop {
            while !self.buf.is_empty() && self.buf[0] == b'$' {
                if self.buf.len() < 4 {
                    break;
                }
                let len = 4 + usize::from(u16::from_be_bytes([self.buf[2], self.buf[3]]));
                if self.buf.len() < len {
                    break;
                }
                let frame = self.buf.split_to(len);
                self.frames.push(ServerSeenFrame {
                    channel_id: frame[1],
                    data: frame[4..].to_vec(),
                });
            }
            if !self.buf.is_empty() && self.buf[0] != b'$' {
                if let Some(head) = message::parse_message_head(&self.buf).unwrap() {
                    let total = head.header_len + head.body_len;
                    if self.buf.len() >= total {
                        let _ = self.buf.split_to(total);
                        match head.start {
                            StartLine::Request { method, uri } => {
                                return ServerSeenRequest {
                                    method: method.into(),
                                    uri: uri.into(),
                                    cseq: message::get_cseq(&head.headers)
                                        .expect("client requests always have CSeq"),
                                    headers: head.headers,
                                };
                            }
                            StartLine::Response { .. } => panic!("client sent a response?"),
                        }
                    }
                }
            }
            let mut chunk = [0u8; 4096];
            let n = self.stream.read(&mut chunk).await.unwrap();
            assert!(n > 0, "client closed mid-request");
            self.buf.extend_from_slice(&chunk[..n]);
        }
    }

    pub(crate) async fn respond(
        &mut self,
        status: u16,
        reason: &str,
        cseq: u32,
        extra_headers: &[(&str, &str)],
        body: &[u8],
    ) {
        let mut resp = format!("RTSP/1.0 {status} {reason}\r\nCSeq: {cseq}\r\n");
        for (name, value) in extra_headers {
            resp.push_str(&format!("{name}: {value}\r\n"));
        }
        if !body.is_empty() {
            resp.push_str(&format!("Content-Length: {}\r\n", body.len()));
        }
        resp.push_str("\r\n");
        self.stream.write_all(resp.as_bytes()).await.unwrap();
        if !body.is_empty() {
            self.stream.write_all(body).await.unwrap();
        }
    }

    /// Sends an interleaved binary frame to the client.
    pub(crate) async fn send_frame(&mut self, channel_id: u8, data: &[u8]) {
        let mut msg = Vec::with_capacity(4 + data.len());
        msg.push(b'$');
        msg.push(channel_id);
        msg.extend_from_slice(&u16::try_from(data.len()).unwrap().to_be_bytes());
        msg.extend_from_slice(data);
        self.stream.write_all(&msg).await.unwrap();
    }
}

/// Binds an ephemeral port, spawns `handler` for the first connection, and
/// returns the `rtsp://` URL to reach it.
pub(crate) async fn server<F, Fut>(handler: F) -> Url
where
    F: FnOnce(ServerConn) -> Fut + Send + 'static,
    Fut: std::future::Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        stream.set_nodelay(true).unwrap();
        handler(ServerConn {
            stream,
            buf: BytesMut::new(),
            frames: Vec::new(),
        })
        .await;
    });
    Url::parse(&format!("rtsp://{addr}/media.sdp")).unwrap()
}

/// A single-track H.264 description, abridged from a GStreamer-based camera.
pub(crate) const ONE_TRACK_SDP: &[u8] = b"v=0\r\n\
    o=- 17428449743163035608 1 IN IP4 10.10.0.77\r\n\
    s=Session streamed with GStreamer\r\n\
    t=0 0\r\n\
    a=control:*\r\n\
    m=video 0 RTP/AVP 96\r\n\
    a=rtpmap:96 H264/90000\r\n\
    a=control:trackID=0\r\n";

/// Hand-assembles an RTP packet with the given header fields.
pub(crate) fn rtp_packet(seq: u16, timestamp: u32, ssrc: u32, payload: &[u8]) -> Vec<u8> {
    let mut pkt = Vec::with_capacity(12 + payload.len());
    pkt.push(0x80);
    pkt.push(96); // dynamic payload type, no marker
    pkt.extend_from_slice(&seq.to_be_bytes());
    pkt.extend_from_slice(&timestamp.to_be_bytes());
    pkt.extend_from_slice(&ssrc.to_be_bytes());
    pkt.extend_from_slice(payload);
    pkt
}

/// A sender report with fixed timestamps, as captured from a live camera.
pub(crate) fn sender_report(ssrc: u32) -> Vec<u8> {
    let mut pkt = Vec::new();
    pkt.extend_from_slice(&[0x80, 0xc8, 0x00, 0x06]);
    pkt.extend_from_slice(&ssrc.to_be_bytes());
    pkt.extend_from_slice(&0xe436_2f99_cccc_ccccu64.to_be_bytes()); // NTP
    pkt.extend_from_slice(&0x852e_f807u32.to_be_bytes()); // RTP timestamp
    pkt.extend_from_slice(&[0, 0, 0, 0x2a, 0, 0, 0x43, 0x33]); // counts
    pkt
}
