// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! tokio-based [`Connection`]: a `Framed` RTSP byte stream.
//!
//! The codec handles the [RFC 2326 section
//! 10.12](https://datatracker.ietf.org/doc/html/rfc2326#section-10.12)
//! interleaving: a read may produce an RTSP response, a server-initiated
//! request, or a `$`-framed binary chunk of RTP/RTCP, and any of them may
//! arrive fragmented across TCP segments.

use std::net::SocketAddr;
use std::time::Instant;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, UdpSocket};
use tokio_util::codec::Framed;

use crate::message::{self, ReceivedRequest, Request, Response, StartLine};
use crate::{ConnectionContext, Error, ErrorInt, MessageContext, WallTime};

/// A connected byte stream suitable for carrying RTSP.
///
/// Implemented by [`tokio::net::TcpStream`] and by whatever a
/// [`TlsConnector`] returns; the crate never looks below this surface.
pub trait IoStream: AsyncRead + AsyncWrite + Unpin + Send {}

impl<T: AsyncRead + AsyncWrite + Unpin + Send> IoStream for T {}

/// Capability interface for `rtsps://` support.
///
/// The caller supplies the TLS policy (roots, pinning, SNI details); the
/// session only asks for a connected, byte-oriented stream back.
pub trait TlsConnector: Send + Sync {
    fn connect<'a>(
        &'a self,
        domain: &'a str,
        stream: TcpStream,
    ) -> futures::future::BoxFuture<'a, std::io::Result<Box<dyn IoStream>>>;
}

/// A message off the wire.
#[derive(Debug)]
pub(crate) enum Incoming {
    Response(Response),
    Request(ReceivedRequest),
    Data { channel_id: u8, data: Bytes },
}

#[derive(Debug)]
pub(crate) struct ReceivedMessage {
    pub(crate) ctx: MessageContext,
    pub(crate) msg: Incoming,
}

/// A message onto the wire.
pub(crate) enum Message {
    /// An outbound request; the codec serializes `CSeq` first.
    Request { cseq: u32, req: Request },

    /// A minimal reply to a server-initiated request.
    Reply {
        status: u16,
        reason: &'static str,
        cseq: Option<u32>,
    },

    /// An interleaved binary frame (outbound RTCP).
    Data { channel_id: u8, data: Bytes },
}

/// An RTSP connection which implements `Stream`, `Sink`, and `Unpin`.
pub(crate) struct Connection(Framed<Box<dyn IoStream>, Codec>);

impl Connection {
    pub(crate) fn from_stream(stream: TcpStream) -> Result<Self, std::io::Error> {
        let local_addr = stream.local_addr()?;
        let peer_addr = stream.peer_addr()?;
        Ok(Self::from_io(Box::new(stream), local_addr, peer_addr))
    }

    pub(crate) fn from_io(
        io: Box<dyn IoStream>,
        local_addr: SocketAddr,
        peer_addr: SocketAddr,
    ) -> Self {
        Self(Framed::new(
            io,
            Codec {
                ctx: ConnectionContext {
                    local_addr,
                    peer_addr,
                    established_wall: WallTime::now(),
                },
                read_pos: 0,
            },
        ))
    }

    pub(crate) fn ctx(&self) -> &ConnectionContext {
        &self.0.codec().ctx
    }

    pub(crate) fn eof_ctx(&self) -> MessageContext {
        MessageContext {
            pos: self.0.codec().read_pos + crate::to_u64(self.0.read_buffer().remaining()),
            received_wall: WallTime::now(),
            received: Instant::now(),
        }
    }

    fn wrap_write_err(&self, e: CodecError) -> ErrorInt {
        match e {
            CodecError::IoError(source) => ErrorInt::WriteError {
                conn_ctx: *self.ctx(),
                source,
            },
            CodecError::ParseError { .. } => unreachable!(),
        }
    }
}

impl Stream for Connection {
    type Item = Result<ReceivedMessage, Error>;

    fn poll_next(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Option<Self::Item>> {
        self.0.poll_next_unpin(cx).map_err(|e| {
            wrap!(match e {
                CodecError::IoError(error) => ErrorInt::ReadError {
                    conn_ctx: *self.ctx(),
                    msg_ctx: self.eof_ctx(),
                    source: error,
                },
                CodecError::ParseError { description, pos } => ErrorInt::FramingError {
                    conn_ctx: *self.ctx(),
                    msg_ctx: MessageContext {
                        pos,
                        received_wall: WallTime::now(),
                        received: Instant::now(),
                    },
                    description,
                },
            })
        })
    }
}

impl Sink<Message> for Connection {
    type Error = ErrorInt;

    fn poll_ready(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.0
            .poll_ready_unpin(cx)
            .map_err(|e| self.wrap_write_err(e))
    }

    fn start_send(mut self: std::pin::Pin<&mut Self>, item: Message) -> Result<(), Self::Error> {
        self.0
            .start_send_unpin(item)
            .map_err(|e| self.wrap_write_err(e))
    }

    fn poll_flush(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.0
            .poll_flush_unpin(cx)
            .map_err(|e| self.wrap_write_err(e))
    }

    fn poll_close(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
    ) -> std::task::Poll<Result<(), Self::Error>> {
        self.0
            .poll_close_unpin(cx)
            .map_err(|e| self.wrap_write_err(e))
    }
}

/// Encodes and decodes RTSP messages and interleaved data.
struct Codec {
    ctx: ConnectionContext,

    /// Number of bytes read and processed (drained from the input buffer).
    read_pos: u64,
}

/// An intermediate error type that exists because [`Framed`] expects the
/// codec's error type to implement `From<std::io::Error>`, and [`Error`]
/// takes additional context.
#[derive(Debug)]
enum CodecError {
    IoError(std::io::Error),
    ParseError { description: String, pos: u64 },
}

impl std::convert::From<std::io::Error> for CodecError {
    fn from(e: std::io::Error) -> Self {
        CodecError::IoError(e)
    }
}

impl Codec {
    fn msg_ctx(&self) -> MessageContext {
        MessageContext {
            pos: self.read_pos,
            received_wall: WallTime::now(),
            received: Instant::now(),
        }
    }
}

impl tokio_util::codec::Decoder for Codec {
    type Item = ReceivedMessage;
    type Error = CodecError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        // Skip the stray CRLFs some servers insert between messages.
        while src.starts_with(b"\r\n") {
            src.advance(2);
            self.read_pos += 2;
        }

        if src.is_empty() {
            return Ok(None);
        }

        if src[0] == b'$' {
            // Interleaved data: `$`, channel id, 2-byte big-endian length,
            // then that many bytes of RTP/RTCP. A frame may arrive in
            // arbitrarily many TCP segments; buffer until whole.
            if src.len() < 4 {
                return Ok(None);
            }
            let channel_id = src[1];
            let len = 4 + usize::from(u16::from_be_bytes([src[2], src[3]]));
            if src.len() < len {
                src.reserve(len - src.len());
                return Ok(None);
            }
            let mut msg = src.split_to(len);
            msg.advance(4);
            let ctx = self.msg_ctx();
            self.read_pos += crate::to_u64(len);
            return Ok(Some(ReceivedMessage {
                ctx,
                msg: Incoming::Data {
                    channel_id,
                    data: msg.freeze(),
                },
            }));
        }

        let head = match message::parse_message_head(&src[..]) {
            Err(description) => {
                return Err(CodecError::ParseError {
                    description: format!(
                        "{}; buffered:\n{:#?}",
                        description,
                        crate::hex::LimitedHex::new(&src[..], 128),
                    ),
                    pos: self.read_pos,
                })
            }
            Ok(None) => return Ok(None),
            Ok(Some(h)) => h,
        };
        let total = head.header_len + head.body_len;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let mut raw = src.split_to(total);
        raw.advance(head.header_len);
        let body = raw.freeze();
        let ctx = self.msg_ctx();
        self.read_pos += crate::to_u64(total);
        let msg = match head.start {
            StartLine::Response { status, reason } => Incoming::Response(Response {
                status,
                reason,
                headers: head.headers,
                body,
            }),
            StartLine::Request { method, uri } => Incoming::Request(ReceivedRequest {
                method,
                uri,
                headers: head.headers,
                body,
            }),
        };
        Ok(Some(ReceivedMessage { ctx, msg }))
    }
}

impl tokio_util::codec::Encoder<Message> for Codec {
    type Error = CodecError;

    fn encode(&mut self, item: Message, dst: &mut BytesMut) -> Result<(), Self::Error> {
        match item {
            Message::Request { cseq, req } => req.write(cseq, dst),
            Message::Reply {
                status,
                reason,
                cseq,
            } => message::write_response(status, reason, cseq, dst),
            Message::Data { channel_id, data } => {
                debug_assert!(data.len() <= usize::from(u16::MAX));
                dst.put_u8(b'$');
                dst.put_u8(channel_id);
                dst.put_u16(data.len() as u16);
                dst.put_slice(&data);
            }
        }
        Ok(())
    }
}

/// tokio-registered version of [`crate::UdpPair`].
pub(crate) struct UdpPair {
    pub(crate) rtp_port: u16,
    pub(crate) rtp_socket: UdpSocket,
    pub(crate) rtcp_socket: UdpSocket,
}

impl UdpPair {
    pub(crate) fn for_ip(ip_addr: std::net::IpAddr) -> Result<Self, std::io::Error> {
        let inner = crate::UdpPair::for_ip(ip_addr)?;
        inner.rtp_socket.set_nonblocking(true)?;
        inner.rtcp_socket.set_nonblocking(true)?;
        Ok(Self {
            rtp_port: inner.rtp_port,
            rtp_socket: UdpSocket::from_std(inner.rtp_socket)?,
            rtcp_socket: UdpSocket::from_std(inner.rtcp_socket)?,
        })
    }
}
