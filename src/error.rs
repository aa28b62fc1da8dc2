// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

use std::{fmt::Display, sync::Arc};

use thiserror::Error;

use crate::{ConnectionContext, MessageContext};

/// An opaque `std::error::Error + Send + Sync + 'static` implementation.
///
/// The focus is on detailed human-readable messages; in most cases they have
/// enough information to find the offending message or packet in Wireshark.
/// URLs referenced in error text have had any credentials stripped.
#[derive(Clone)]
pub struct Error(pub(crate) Arc<ErrorInt>);

impl Error {
    /// Returns the status code, if the error was generated from an RTSP response.
    pub fn status_code(&self) -> Option<u16> {
        match self.0.as_ref() {
            ErrorInt::ResponseError { status, .. } => Some(*status),
            _ => None,
        }
    }

    /// Returns true if this error is a local request deadline expiration.
    pub fn is_timeout(&self) -> bool {
        matches!(self.0.as_ref(), ErrorInt::Timeout)
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

impl std::fmt::Debug for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(&self.0, f)
    }
}

impl std::error::Error for Error {}

#[derive(Debug, Error)]
pub(crate) enum ErrorInt {
    /// The method's caller provided an invalid argument.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// Unparseable or unexpected RTSP message.
    #[error("RTSP framing error: {description}\n\nconn: {conn_ctx}\nmsg: {msg_ctx}")]
    FramingError {
        conn_ctx: ConnectionContext,
        msg_ctx: MessageContext,
        description: String,
    },

    #[error(
        "{status} response to {method} CSeq={cseq}: {description}\n\n\
         conn: {conn_ctx}\nmsg: {msg_ctx}"
    )]
    ResponseError {
        conn_ctx: ConnectionContext,
        msg_ctx: MessageContext,
        method: &'static str,
        cseq: u32,
        status: u16,
        description: String,
    },

    /// The server rejected our credentials (or none were supplied when needed).
    #[error("Authentication failed: {description}\n\nconn: {conn_ctx}")]
    AuthFailed {
        conn_ctx: ConnectionContext,
        description: String,
    },

    #[error("Unable to connect to RTSP server: {0}")]
    ConnectError(#[source] std::io::Error),

    #[error("Unable to bind an even/odd UDP port pair: {0}")]
    UdpBindError(#[source] std::io::Error),

    #[error("Error reading from RTSP peer: {source}\n\nconn: {conn_ctx}\nmsg: {msg_ctx}")]
    ReadError {
        conn_ctx: ConnectionContext,
        msg_ctx: MessageContext,
        source: std::io::Error,
    },

    #[error("Error writing to RTSP peer: {source}\n\nconn: {conn_ctx}")]
    WriteError {
        conn_ctx: ConnectionContext,
        source: std::io::Error,
    },

    /// The connection was torn down while requests were outstanding.
    #[error("RTSP connection closed: {description}\n\nconn: {conn_ctx}")]
    ConnectionClosed {
        conn_ctx: ConnectionContext,
        description: String,
    },

    /// A keep-alive request failed, ending the session.
    #[error("Session keepalive failed: {source}")]
    KeepaliveFailed { source: Error },

    #[error("Failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("Timeout")]
    Timeout,
}
