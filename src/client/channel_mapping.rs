// Copyright (C) 2023 Scott Lamb <slamb@slamb.org>
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Allocation of RTSP interleaved channel pairs.

use smallvec::SmallVec;

/// Allocator for the 256 possible RTSP interleaved channels, handed out as
/// even/odd pairs: the even channel carries RTP, its odd successor RTCP.
///
/// [RFC 2326 section 10.12](https://tools.ietf.org/html/rfc2326#section-10.12)
/// says `interleaved=n` also assigns channel `n+1`, and there is no clear
/// way to assign a single channel, so pairs are the only granularity here.
/// Inbound dispatch is the connection's per-channel sink registry; this
/// type only decides which pair to offer in each `SETUP` and guards
/// against a server handing the same pair to two tracks. Element `i`
/// records whether the pair `2i`/`2i+1` is taken.
#[derive(Default)]
pub(crate) struct ChannelAllocator(SmallVec<[bool; 16]>);

impl ChannelAllocator {
    /// Returns the lowest unassigned even channel id, or `None` if all 128
    /// pairs are taken.
    pub(crate) fn next_unassigned(&self) -> Option<u8> {
        if let Some(i) = self.0.iter().position(|taken| !taken) {
            return Some((i as u8) << 1);
        }
        if self.0.len() < 128 {
            return Some((self.0.len() as u8) << 1);
        }
        None
    }

    /// Marks an even channel id (and implicitly its odd successor) as taken.
    pub(crate) fn assign(&mut self, channel_id: u8) -> Result<(), String> {
        if (channel_id & 1) != 0 {
            return Err(format!("Can't assign odd channel id {channel_id}"));
        }
        let i = usize::from(channel_id >> 1);
        if i >= self.0.len() {
            self.0.resize(i + 1, false);
        }
        if self.0[i] {
            return Err(format!(
                "Channel pair {}-{} is already assigned",
                channel_id,
                channel_id + 1
            ));
        }
        self.0[i] = true;
        Ok(())
    }
}

impl std::fmt::Debug for ChannelAllocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list()
            .entries(self.0.iter().enumerate().filter_map(|(i, taken)| {
                taken.then(|| format!("{}-{}", i << 1, (i << 1) + 1))
            }))
            .finish()
    }
}
