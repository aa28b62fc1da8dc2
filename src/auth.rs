// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Builds `Authorization` headers from `WWW-Authenticate` challenges.
//!
//! Supports Basic and Digest with algorithm MD5 (`qop=auth` when offered,
//! `nc` monotonic per nonce, fresh cnonce per challenge). The connection
//! retries a 401 exactly once per request; a second 401 without a stale
//! nonce surfaces as a fatal authentication error.

use std::borrow::Cow;

use base64::Engine as _;

use crate::client::Credentials;
use crate::message::Method;

pub(crate) struct Authenticator {
    creds: Credentials,
    state: Option<State>,
}

enum State {
    /// The serialized `Authorization` value; Basic doesn't vary per request.
    Basic(String),

    /// Parsed challenge with nonce-count bookkeeping.
    Digest(Box<digest_auth::WwwAuthenticateHeader>),
}

impl Authenticator {
    pub(crate) fn new(creds: Credentials) -> Self {
        Self { creds, state: None }
    }

    /// Absorbs a 401 challenge. `Ok(())` means the request should be resent
    /// with fresh authorization; `Err` describes a fatal credential failure.
    pub(crate) fn handle_unauthorized(&mut self, www_authenticate: Option<&str>) -> Result<(), String> {
        let challenge = match www_authenticate {
            Some(c) => c,
            None => return Err("401 Unauthorized without WWW-Authenticate header".to_owned()),
        };
        if let Some(digest) = scheme_params(challenge, "Digest") {
            let www = digest_auth::WwwAuthenticateHeader::parse(digest)
                .map_err(|e| format!("unparseable Digest challenge {challenge:?}: {e}"))?;
            if matches!(&self.state, Some(State::Digest(_))) && !www.stale {
                return Err("server rejected Digest credentials".to_owned());
            }
            self.state = Some(State::Digest(Box::new(www)));
            Ok(())
        } else if scheme_params(challenge, "Basic").is_some() {
            if matches!(&self.state, Some(State::Basic(_))) {
                return Err("server rejected Basic credentials".to_owned());
            }
            let encoded = base64::engine::general_purpose::STANDARD
                .encode(format!("{}:{}", self.creds.username, self.creds.password));
            self.state = Some(State::Basic(format!("Basic {encoded}")));
            Ok(())
        } else {
            Err(format!("unsupported authentication scheme in {challenge:?}"))
        }
    }

    /// Returns the `Authorization` value for this request, or `None` before
    /// any challenge has been seen.
    pub(crate) fn authorization(
        &mut self,
        method: Method,
        uri: &str,
    ) -> Result<Option<String>, String> {
        match &mut self.state {
            None => Ok(None),
            Some(State::Basic(value)) => Ok(Some(value.clone())),
            Some(State::Digest(www)) => {
                let ctx = digest_auth::AuthContext::new_with_method(
                    &self.creds.username,
                    &self.creds.password,
                    uri,
                    Option::<&'static [u8]>::None,
                    digest_auth::HttpMethod(Cow::Borrowed(method.as_str())),
                );
                let authorization = www
                    .respond(&ctx)
                    .map_err(|e| format!("unable to answer Digest challenge: {e}"))?;
                Ok(Some(authorization.to_string()))
            }
        }
    }
}

/// Finds `scheme` within a (possibly concatenated) challenge header and
/// returns it with its parameters. Digest is matched before Basic by the
/// caller, so a server offering both gets the stronger scheme.
fn scheme_params<'a>(challenge: &'a str, scheme: &str) -> Option<&'a str> {
    let lower = challenge.to_ascii_lowercase();
    let needle = scheme.to_ascii_lowercase();
    let mut search_from = 0;
    while let Some(rel) = lower[search_from..].find(&needle) {
        let i = search_from + rel;
        let at_boundary = i == 0
            || matches!(lower.as_bytes()[i - 1], b' ' | b',' | b'\t');
        let followed_by_space = lower.as_bytes().get(i + needle.len()) == Some(&b' ');
        if at_boundary && followed_by_space {
            return Some(&challenge[i..]);
        }
        search_from = i + needle.len();
    }
    None
}
