// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! `TEARDOWN` handling: one foreground attempt, plus the background loop
//! used when a session is dropped without an explicit teardown.
//!
//! Old live555 servers keep stale TCP sessions around; attempting teardown
//! on the existing connection first, before closing it, keeps them from
//! messing up other sockets. After that, fresh connections are tried with
//! growing timeouts until the server's own session timer would have
//! expired anyway.

use std::time::Duration;

use log::debug;
use url::Url;

use super::conn::{ResponseMode, RtspConnection};
use super::SessionOptions;
use crate::message::{Method, Request};
use crate::{Error, ErrorInt};

pub(super) const TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);
const FRESH_CONN_INITIAL_TIMEOUT: Duration = Duration::from_secs(1);
const FRESH_CONN_MAX_TIMEOUT: Duration = Duration::from_secs(16);

/// Makes a single `TEARDOWN` attempt on the supplied connection.
pub(super) async fn teardown_once(
    conn: &RtspConnection,
    url: &Url,
    session_id: &str,
) -> Result<(), Error> {
    let req =
        Request::new(Method::Teardown, url.as_str()).header("Session", session_id.to_owned());
    match tokio::time::timeout(
        TEARDOWN_TIMEOUT,
        conn.send_request(ResponseMode::Teardown, &req),
    )
    .await
    {
        Err(_elapsed) => bail!(ErrorInt::Timeout),
        Ok(Err(e)) => Err(e),
        Ok(Ok(_)) => Ok(()),
    }
}

/// Spawns the background teardown loop, if a runtime is available to spawn
/// on (a plain `drop` outside any runtime can't run it).
pub(super) fn spawn(
    conn: RtspConnection,
    options: SessionOptions,
    url: Url,
    session_id: Box<str>,
    expires_in: Duration,
) {
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(background_teardown(conn, options, url, session_id, expires_in));
        }
        Err(_) => log::warn!(
            "no async runtime at drop; session {} will expire on its own",
            &*session_id
        ),
    }
}

/// Attempts `TEARDOWN` until success or session expiry: first on the
/// existing connection, then on fresh connections with doubling timeouts.
async fn background_teardown(
    conn: RtspConnection,
    options: SessionOptions,
    url: Url,
    session_id: Box<str>,
    expires_in: Duration,
) {
    debug!("TEARDOWN {} starting", &*session_id);
    let expires = tokio::time::Instant::now() + expires_in;
    let attempts = async {
        match teardown_once(&conn, &url, &session_id).await {
            Ok(()) => {
                debug!("TEARDOWN {} on existing conn succeeded", &*session_id);
                conn.close();
                return;
            }
            Err(e) => {
                debug!("TEARDOWN {} on existing conn failed: {e}", &*session_id);
                conn.close();
            }
        }
        let mut timeout = FRESH_CONN_INITIAL_TIMEOUT;
        for attempt_num in 1.. {
            let attempt = async {
                let fresh = RtspConnection::connect(&url, &options).await?;
                let r = teardown_once(&fresh, &url, &session_id).await;
                fresh.close();
                r
            };
            match tokio::time::timeout(timeout, attempt).await {
                Ok(Ok(())) => {
                    debug!(
                        "TEARDOWN {} fresh connection attempt {attempt_num} succeeded",
                        &*session_id
                    );
                    return;
                }
                Ok(Err(e)) => debug!(
                    "TEARDOWN {} fresh connection attempt {attempt_num} failed: {e}",
                    &*session_id
                ),
                Err(_elapsed) => debug!(
                    "TEARDOWN {} fresh connection attempt {attempt_num} timed out",
                    &*session_id
                ),
            }
            tokio::time::sleep(timeout).await;
            timeout = std::cmp::min(timeout * 2, FRESH_CONN_MAX_TIMEOUT);
        }
    };
    if tokio::time::timeout_at(expires, attempts).await.is_err() {
        debug!("TEARDOWN {} abandoned on session expiration", &*session_id);
    }
}
