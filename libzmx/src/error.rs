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

//! The closed set of error kinds the daemon and client loops need to match
//! on to decide how to react, as opposed to the `anyhow::Error` used
//! everywhere else for plain "log it and bail" glue. See each variant for
//! its propagation policy.

use std::io;

use zmx_protocol::CodecError;

#[derive(Debug, thiserror::Error)]
pub enum ZmxError {
    /// EAGAIN/EWOULDBLOCK. Retried on the next poll wakeup; never escapes
    /// the event loop.
    #[error("would block")]
    IoTransient,

    /// Any other read/write error. Fatal if it happened on the pty or the
    /// listener; the daemon shuts down cleanly.
    #[error("io error: {0}")]
    IoFatal(#[source] io::Error),

    /// EPIPE/ECONNRESET on a client socket. Closes only the affected
    /// client.
    #[error("peer gone")]
    PeerGone,

    /// Frame tag out of range, length over the max, or payload size wrong
    /// for its tag. Closes only the affected client, never crashes the
    /// daemon.
    #[error("malformed frame: {0}")]
    Malformed(#[from] CodecError),

    /// A session probe failed (connection refused, timeout, or a malformed
    /// reply). The socket is unlinked and the caller continues.
    #[error("stale socket")]
    StaleSocket,

    /// No such session for a command that requires one.
    #[error("no such session: {0}")]
    NotFound(String),

    /// A `fork` target collides with an existing session name.
    #[error("session already exists: {0}")]
    AlreadyExists(String),

    /// The probe or history deadline elapsed.
    #[error("timed out waiting for {0}")]
    Timeout(&'static str),

    /// Exec or fork failed inside the grandchild that was about to become
    /// the shell. Whoever sees this must `_exit(1)` immediately rather
    /// than returning up through the parent's call stack.
    #[error("unrecoverable: {0}")]
    Unrecoverable(String),
}

impl ZmxError {
    /// Classify a raw `io::Error` as transient (retry), a dead peer
    /// (close this client), or fatal (shut the whole daemon down).
    pub fn from_io(err: io::Error) -> ZmxError {
        match err.kind() {
            io::ErrorKind::WouldBlock => ZmxError::IoTransient,
            io::ErrorKind::BrokenPipe | io::ErrorKind::ConnectionReset => ZmxError::PeerGone,
            _ => ZmxError::IoFatal(err),
        }
    }

    /// True if this is the "try again later" case that should never
    /// propagate out of the event loop.
    pub fn is_transient(&self) -> bool {
        matches!(self, ZmxError::IoTransient)
    }
}
