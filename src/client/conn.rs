// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! The RTSP request/response pipeline over one connection.
//!
//! A single read task owns the decode side and dispatches: interleaved
//! frames to registered per-channel sinks, final responses to the pending
//! request keyed by `CSeq`. Any number of tasks may issue requests
//! concurrently; writes are serialized by an async mutex so framing is
//! preserved.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use log::{debug, trace, warn};
use tokio::sync::{mpsc, oneshot};
use url::Url;

use super::SessionOptions;
use crate::auth::Authenticator;
use crate::message::{self, Request, Response};
use crate::tokio::{Connection, Incoming, Message};
use crate::{ConnectionContext, Error, ErrorInt, MessageContext, PacketContext};

pub(crate) const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Depth of each interleaved channel's queue between the read task and a
/// track's receiver. Overflow drops frames (counted) rather than stalling
/// the RTSP pipeline.
const CHANNEL_QUEUE_DEPTH: usize = 256;

/// An interleaved frame as handed to a track's receiver.
pub(crate) struct ChannelFrame {
    pub(crate) pkt_ctx: PacketContext,
    pub(crate) data: Bytes,
}

/// How strictly to interpret a request's response status.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub(crate) enum ResponseMode {
    /// Require 2xx, after at most one authentication retry.
    Normal,

    /// Any final response proves the server is alive; don't fail on status.
    /// Used for keep-alives: a server may well return 501 to an `OPTIONS`
    /// or `GET_PARAMETER` it doesn't implement, and that's still liveness.
    Keepalive,

    /// Like `Normal`, except 454 Session Not Found counts as success: the
    /// session we're trying to destroy is already gone.
    Teardown,
}

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
enum ConnState {
    Connecting,
    Open,
    Closing,
    Closed,
}

/// A final response paired with its position in the stream.
#[derive(Debug)]
pub(crate) struct ReceivedResponse {
    pub(crate) msg_ctx: MessageContext,
    pub(crate) resp: Response,
}

struct StateAndError {
    state: ConnState,
    /// Why the connection died, for reporting against requests that were
    /// outstanding or arrive later.
    error: Option<Error>,
}

struct Inner {
    ctx: ConnectionContext,
    user_agent: Option<String>,
    request_timeout: Duration,
    write: tokio::sync::Mutex<SplitSink<Connection, Message>>,

    /// Next `CSeq`, starting at 1; zero is rejected by some servers.
    next_cseq: AtomicU32,

    state: Mutex<StateAndError>,
    pending: Mutex<HashMap<u32, oneshot::Sender<ReceivedResponse>>>,
    sinks: Mutex<HashMap<u8, mpsc::Sender<ChannelFrame>>>,
    dropped_frames: AtomicU64,
    auth: Mutex<Option<Authenticator>>,
    last_success: Mutex<Instant>,
}

/// Aborts the read task when the last connection handle goes away; the task
/// holds an `Arc<Inner>`, so without this a dropped connection would linger
/// until the server closed its end.
struct ReadTaskGuard(tokio::task::JoinHandle<()>);

impl Drop for ReadTaskGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Shared handle to one RTSP connection; clones refer to the same pipeline.
#[derive(Clone)]
pub(crate) struct RtspConnection {
    inner: Arc<Inner>,
    read_task: Arc<ReadTaskGuard>,
}

impl RtspConnection {
    /// Connects (with a 10 s deadline covering TCP and any TLS handshake)
    /// and starts the read task.
    pub(crate) async fn connect(url: &Url, options: &SessionOptions) -> Result<Self, Error> {
        let port = url
            .port()
            .unwrap_or(if url.scheme() == "rtsps" { 322 } else { 554 });
        let host = url
            .host_str()
            .ok_or_else(|| wrap!(ErrorInt::InvalidArgument(format!("no host in URL {url}"))))?;
        let conn = tokio::time::timeout(CONNECT_TIMEOUT, async {
            let stream = tokio::net::TcpStream::connect((host, port))
                .await
                .map_err(|e| wrap!(ErrorInt::ConnectError(e)))?;
            stream
                .set_nodelay(true)
                .map_err(|e| wrap!(ErrorInt::ConnectError(e)))?;
            match url.scheme() {
                "rtsp" => {
                    Connection::from_stream(stream).map_err(|e| wrap!(ErrorInt::ConnectError(e)))
                }
                "rtsps" => {
                    let connector = options.tls.as_ref().ok_or_else(|| {
                        wrap!(ErrorInt::InvalidArgument(
                            "rtsps URL requires SessionOptions::tls".to_owned()
                        ))
                    })?;
                    let local_addr = stream
                        .local_addr()
                        .map_err(|e| wrap!(ErrorInt::ConnectError(e)))?;
                    let peer_addr = stream
                        .peer_addr()
                        .map_err(|e| wrap!(ErrorInt::ConnectError(e)))?;
                    let io = connector
                        .connect(host, stream)
                        .await
                        .map_err(|e| wrap!(ErrorInt::ConnectError(e)))?;
                    Ok(Connection::from_io(io, local_addr, peer_addr))
                }
                s => Err(wrap!(ErrorInt::InvalidArgument(format!(
                    "unsupported scheme {s}"
                )))),
            }
        })
        .await
        .map_err(|_| {
            wrap!(ErrorInt::ConnectError(std::io::Error::new(
                std::io::ErrorKind::TimedOut,
                format!("no connection to {host}:{port} within {CONNECT_TIMEOUT:?}"),
            )))
        })??;

        let ctx = *conn.ctx();
        let (write, read) = conn.split();
        let inner = Arc::new(Inner {
            ctx,
            user_agent: options.user_agent.clone(),
            request_timeout: options.request_timeout.unwrap_or(DEFAULT_REQUEST_TIMEOUT),
            write: tokio::sync::Mutex::new(write),
            next_cseq: AtomicU32::new(1),
            state: Mutex::new(StateAndError {
                state: ConnState::Connecting,
                error: None,
            }),
            pending: Mutex::new(HashMap::new()),
            sinks: Mutex::new(HashMap::new()),
            dropped_frames: AtomicU64::new(0),
            auth: Mutex::new(options.creds.clone().map(Authenticator::new)),
            last_success: Mutex::new(Instant::now()),
        });
        let task = tokio::spawn(read_loop(Arc::clone(&inner), read));
        {
            // The read task may already have observed EOF; don't resurrect.
            let mut state = inner.state.lock().unwrap();
            if state.state == ConnState::Connecting {
                state.state = ConnState::Open;
            }
        }
        Ok(Self {
            inner,
            read_task: Arc::new(ReadTaskGuard(task)),
        })
    }

    pub(crate) fn ctx(&self) -> ConnectionContext {
        self.inner.ctx
    }

    pub(crate) fn is_open(&self) -> bool {
        self.inner.state.lock().unwrap().state == ConnState::Open
    }

    /// Instant of the last request that completed successfully; keep-alive
    /// scheduling is relative to this.
    pub(crate) fn last_success(&self) -> Instant {
        *self.inner.last_success.lock().unwrap()
    }

    /// Frames dropped for lack of a registered sink or a full queue.
    pub(crate) fn dropped_frames(&self) -> u64 {
        self.inner.dropped_frames.load(Ordering::Relaxed)
    }

    /// If the connection has died, the error that killed it.
    pub(crate) fn dead_error(&self) -> Option<Error> {
        let state = self.inner.state.lock().unwrap();
        match state.state {
            ConnState::Closed => Some(self.closed_error(&state)),
            _ => None,
        }
    }

    pub(crate) fn channel_queue(&self) -> (mpsc::Sender<ChannelFrame>, mpsc::Receiver<ChannelFrame>) {
        mpsc::channel(CHANNEL_QUEUE_DEPTH)
    }

    /// Registers a sink for one interleaved channel. Must happen before the
    /// `SETUP` offering that channel is sent, or early frames would race the
    /// registration and be dropped.
    pub(crate) fn register_channel(
        &self,
        channel_id: u8,
        tx: mpsc::Sender<ChannelFrame>,
    ) -> Result<(), Error> {
        let mut sinks = self.inner.sinks.lock().unwrap();
        if sinks.contains_key(&channel_id) {
            bail!(ErrorInt::FailedPrecondition(format!(
                "interleaved channel {channel_id} already has a sink"
            )));
        }
        sinks.insert(channel_id, tx);
        Ok(())
    }

    pub(crate) fn unregister_channel(&self, channel_id: u8) {
        self.inner.sinks.lock().unwrap().remove(&channel_id);
    }

    /// Sends an interleaved binary frame (outbound RTCP).
    pub(crate) async fn send_data(&self, channel_id: u8, data: Bytes) -> Result<(), Error> {
        let mut write = self.inner.write.lock().await;
        write
            .send(Message::Data { channel_id, data })
            .await
            .map_err(|e| wrap!(e))
    }

    /// Sends `req` and waits for its final response.
    ///
    /// Handles `CSeq` assignment, authorization (with a single automatic
    /// retry on 401), the per-request deadline, and status checking per
    /// `mode`. Timeout or cancellation removes the pending entry without
    /// disturbing other requests or the connection.
    pub(crate) async fn send_request(
        &self,
        mode: ResponseMode,
        req: &Request,
    ) -> Result<ReceivedResponse, Error> {
        let mut wire_attempts = 0;
        loop {
            wire_attempts += 1;
            let cseq = self.inner.next_cseq.fetch_add(1, Ordering::Relaxed);
            let mut req = req.clone();
            if let Some(ua) = &self.inner.user_agent {
                req.headers.set("User-Agent", ua.clone());
            }
            {
                let mut auth = self.inner.auth.lock().unwrap();
                if let Some(a) = auth.as_mut() {
                    match a.authorization(req.method, &req.uri) {
                        Ok(Some(v)) => req.headers.set("Authorization", v),
                        Ok(None) => {}
                        Err(description) => bail!(ErrorInt::AuthFailed {
                            conn_ctx: self.inner.ctx,
                            description,
                        }),
                    }
                }
            }

            {
                let state = self.inner.state.lock().unwrap();
                if state.state != ConnState::Open {
                    return Err(self.closed_error(&state));
                }
            }
            let (tx, rx) = oneshot::channel();
            self.inner.pending.lock().unwrap().insert(cseq, tx);
            let mut guard = PendingGuard {
                inner: &*self.inner,
                cseq,
                armed: true,
            };

            {
                let mut write = self.inner.write.lock().await;
                write
                    .send(Message::Request {
                        cseq,
                        req: req.clone(),
                    })
                    .await
                    .map_err(|e| wrap!(e))?;
            }
            trace!("sent {} CSeq={}", req.method, cseq);

            let received = match tokio::time::timeout(self.inner.request_timeout, rx).await {
                Err(_elapsed) => bail!(ErrorInt::Timeout),
                Ok(Err(_recv_error)) => {
                    // The read task dropped the sender: connection is gone.
                    let state = self.inner.state.lock().unwrap();
                    return Err(self.closed_error(&state));
                }
                Ok(Ok(r)) => r,
            };
            guard.armed = false;

            let status = received.resp.status;
            if mode == ResponseMode::Keepalive {
                *self.inner.last_success.lock().unwrap() = Instant::now();
                return Ok(received);
            }
            if status == 401 {
                if wire_attempts >= 3 {
                    bail!(ErrorInt::AuthFailed {
                        conn_ctx: self.inner.ctx,
                        description: "server kept responding 401 Unauthorized".to_owned(),
                    });
                }
                let mut auth = self.inner.auth.lock().unwrap();
                let a = match auth.as_mut() {
                    Some(a) => a,
                    None => bail!(ErrorInt::AuthFailed {
                        conn_ctx: self.inner.ctx,
                        description: "server requires authentication; no credentials supplied"
                            .to_owned(),
                    }),
                };
                if let Err(description) =
                    a.handle_unauthorized(received.resp.header("WWW-Authenticate"))
                {
                    bail!(ErrorInt::AuthFailed {
                        conn_ctx: self.inner.ctx,
                        description,
                    });
                }
                debug!("retrying {} after 401 challenge", req.method);
                continue;
            }
            if mode == ResponseMode::Teardown && status == 454 {
                *self.inner.last_success.lock().unwrap() = Instant::now();
                return Ok(received);
            }
            if !received.resp.is_success() {
                let description = format!("{} {}", status, received.resp.reason);
                bail!(ErrorInt::ResponseError {
                    conn_ctx: self.inner.ctx,
                    msg_ctx: received.msg_ctx,
                    method: req.method.as_str(),
                    cseq,
                    status,
                    description,
                });
            }
            *self.inner.last_success.lock().unwrap() = Instant::now();
            return Ok(received);
        }
    }

    /// Closes the connection, aborting the read task and failing any
    /// outstanding requests with a connection-closed error.
    pub(crate) fn close(&self) {
        self.read_task.0.abort();
        {
            let mut state = self.inner.state.lock().unwrap();
            if state.state == ConnState::Closed {
                return;
            }
            state.state = ConnState::Closed;
            state.error.get_or_insert_with(|| {
                wrap!(ErrorInt::ConnectionClosed {
                    conn_ctx: self.inner.ctx,
                    description: "closed by client".to_owned(),
                })
            });
        }
        self.inner.pending.lock().unwrap().clear();
        self.inner.sinks.lock().unwrap().clear();
    }

    fn closed_error(&self, state: &StateAndError) -> Error {
        state.error.clone().unwrap_or_else(|| {
            wrap!(ErrorInt::ConnectionClosed {
                conn_ctx: self.inner.ctx,
                description: format!("connection in state {:?}", state.state),
            })
        })
    }
}

/// Removes the pending-request entry if its waiter gives up (deadline
/// expiry or future cancellation) before the response arrives.
struct PendingGuard<'a> {
    inner: &'a Inner,
    cseq: u32,
    armed: bool,
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.inner.pending.lock().unwrap().remove(&self.cseq);
        }
    }
}

/// The single reader: dispatches until error or EOF, then fails everything.
async fn read_loop(inner: Arc<Inner>, mut read: SplitStream<Connection>) {
    let close_error = loop {
        match read.next().await {
            Some(Ok(msg)) => match msg.msg {
                Incoming::Data { channel_id, data } => {
                    let sink = inner.sinks.lock().unwrap().get(&channel_id).cloned();
                    match sink {
                        Some(tx) => {
                            let frame = ChannelFrame {
                                pkt_ctx: PacketContext::tcp(msg.ctx),
                                data,
                            };
                            match tx.try_send(frame) {
                                Ok(()) => {}
                                Err(mpsc::error::TrySendError::Full(_)) => {
                                    // Slow consumer; drop media rather than
                                    // stall RTSP responses behind it.
                                    inner.dropped_frames.fetch_add(1, Ordering::Relaxed);
                                    trace!("channel {channel_id} queue full; dropping frame");
                                }
                                Err(mpsc::error::TrySendError::Closed(_)) => {
                                    inner.dropped_frames.fetch_add(1, Ordering::Relaxed);
                                }
                            }
                        }
                        None => {
                            // Not fatal: servers have been observed sending
                            // stray frames after a track is torn down.
                            inner.dropped_frames.fetch_add(1, Ordering::Relaxed);
                            debug!("dropping frame on unassigned channel {channel_id}");
                        }
                    }
                }
                Incoming::Response(resp) => {
                    if !resp.is_final() {
                        debug!("ignoring informational response {}", resp.status);
                        continue;
                    }
                    match resp.cseq() {
                        Some(cseq) => {
                            let tx = inner.pending.lock().unwrap().remove(&cseq);
                            match tx {
                                Some(tx) => {
                                    let _ = tx.send(ReceivedResponse {
                                        msg_ctx: msg.ctx,
                                        resp,
                                    });
                                }
                                None => debug!(
                                    "response CSeq={} has no waiter (timed out or cancelled?)",
                                    cseq
                                ),
                            }
                        }
                        None => warn!(
                            "ignoring response without CSeq at {}: {} {}",
                            msg.ctx, resp.status, resp.reason
                        ),
                    }
                }
                Incoming::Request(req) => {
                    debug!("answering server-initiated {} with 551", &*req.method);
                    let cseq = message::get_cseq(&req.headers);
                    let inner = Arc::clone(&inner);
                    tokio::spawn(async move {
                        let mut write = inner.write.lock().await;
                        let _ = write
                            .send(Message::Reply {
                                status: 551,
                                reason: "Option not supported",
                                cseq,
                            })
                            .await;
                    });
                }
            },
            Some(Err(e)) => break e,
            None => {
                break wrap!(ErrorInt::ConnectionClosed {
                    conn_ctx: inner.ctx,
                    description: "EOF from server".to_owned(),
                })
            }
        }
    };

    {
        let mut state = inner.state.lock().unwrap();
        if state.state == ConnState::Open {
            state.state = ConnState::Closing;
        }
        state.error.get_or_insert(close_error);
        state.state = ConnState::Closed;
    }
    // Dropping the senders wakes every waiter with a closed-channel error,
    // which they translate via the state above; dropping the sinks lets
    // track receivers observe the end of their queues.
    inner.pending.lock().unwrap().clear();
    inner.sinks.lock().unwrap().clear();
}
