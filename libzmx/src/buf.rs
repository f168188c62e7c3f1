// Copyright 2024 The zmx Authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! A growable byte buffer used on both sides of every connection: one
//! non-blocking read at a time into the tail, and a pull-style frame
//! iterator over the front. Used for both the incoming (decode) and
//! outgoing (encode, then drain) direction of a socket.

use std::os::unix::io::RawFd;

use zmx_protocol::{CodecError, Frame, Pull};

use crate::error::ZmxError;

/// Compact once the consumed prefix is at least this fraction of the
/// buffer's current length, so we don't memmove on every tiny frame.
const COMPACT_THRESHOLD_NUM: usize = 1;
const COMPACT_THRESHOLD_DEN: usize = 2;

#[derive(Debug, Default)]
pub struct SockBuf {
    data: Vec<u8>,
    consumed: usize,
}

impl SockBuf {
    pub fn new() -> Self {
        SockBuf { data: Vec::with_capacity(crate::consts::BUF_SIZE), consumed: 0 }
    }

    /// True if there is nothing buffered for the caller to act on.
    pub fn is_empty(&self) -> bool {
        self.consumed >= self.data.len()
    }

    /// Unconsumed bytes remaining at the front of the buffer, for the
    /// write side (the "outgoing buffer" of spec.md §4.5/§4.6).
    pub fn pending(&self) -> &[u8] {
        &self.data[self.consumed..]
    }

    /// Append raw bytes to the tail, used to build up an outgoing buffer
    /// from encoded frames.
    pub fn push(&mut self, bytes: &[u8]) {
        self.data.extend_from_slice(bytes);
    }

    /// Mark `n` bytes as written out (or otherwise consumed) from the
    /// front, compacting if the consumed prefix has grown large relative
    /// to the live remainder.
    pub fn advance(&mut self, n: usize) {
        self.consumed += n;
        self.maybe_compact();
    }

    /// A single non-blocking `read` into the tail of the buffer. Returns
    /// the number of bytes read (0 means the peer closed its write side).
    pub fn fill(&mut self, fd: RawFd) -> Result<usize, ZmxError> {
        let mut tmp = [0u8; crate::consts::BUF_SIZE];
        match nix::unistd::read(fd, &mut tmp) {
            Ok(n) => {
                self.data.extend_from_slice(&tmp[..n]);
                Ok(n)
            }
            Err(e) => Err(ZmxError::from_io(e.into())),
        }
    }

    /// Write a single non-blocking chunk of `bytes` to `fd`, returning the
    /// number of bytes accepted.
    pub fn write_once(fd: RawFd, bytes: &[u8]) -> Result<usize, ZmxError> {
        use std::os::fd::BorrowedFd;

        // Safety: `fd` is a valid, open descriptor for the lifetime of this
        // call; we never let the resulting `BorrowedFd` escape it.
        let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
        match nix::unistd::write(borrowed, bytes) {
            Ok(n) => Ok(n),
            Err(e) => Err(ZmxError::from_io(e.into())),
        }
    }

    /// Pull the next complete frame out of the unconsumed remainder, if
    /// one is fully buffered. Advances the consumed cursor past it.
    pub fn next_frame(&mut self) -> Result<Option<Frame<'_>>, CodecError> {
        match zmx_protocol::next(&self.data[self.consumed..])? {
            Pull::NeedMore => Ok(None),
            Pull::Frame { consumed, .. } => {
                let start = self.consumed;
                self.consumed += consumed;
                self.maybe_compact();
                // Re-decode against the now-stable slice: the borrow above
                // was tied to a `&self.data` taken before `maybe_compact`
                // could move bytes around, so hand back a fresh borrow.
                match zmx_protocol::next(&self.data[start..start + consumed]) {
                    Ok(Pull::Frame { frame, .. }) => Ok(Some(frame)),
                    _ => unreachable!("re-decoding a slice we just proved complete"),
                }
            }
        }
    }

    fn maybe_compact(&mut self) {
        if self.consumed == 0 {
            return;
        }
        if self.consumed >= self.data.len() {
            self.data.clear();
            self.consumed = 0;
            return;
        }
        if self.consumed * COMPACT_THRESHOLD_DEN >= self.data.len() * COMPACT_THRESHOLD_NUM {
            self.data.drain(0..self.consumed);
            self.consumed = 0;
        }
    }
}
