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

//! `zmx history NAME [--vt|--html]`: request the session's serialized
//! scrollback and write it to stdout verbatim. Bounded by the same
//! history deadline the daemon's own probe/history timeouts use.

use std::{
    io::Write,
    os::fd::AsRawFd,
    time::{Duration, Instant},
};

use anyhow::{anyhow, Context};
use zmx_protocol::{Frame, HistoryFormat, Tag};

use crate::{
    buf::SockBuf,
    consts,
    error::ZmxError,
    namespace::{self, Namespace},
};

pub fn run(ns: &Namespace, name: &str, format: HistoryFormat) -> anyhow::Result<()> {
    let path = ns.socket_path(name);
    let conn = match namespace::probe(&path) {
        Ok(p) => p.conn,
        Err(ZmxError::StaleSocket) | Err(ZmxError::Timeout(_)) => {
            return Err(anyhow!("no such session: {name}"))
        }
        Err(e) => return Err(e.into()),
    };
    conn.set_nonblocking(true).context("making session socket nonblocking")?;
    let fd = conn.as_raw_fd();

    let mut encoded = Vec::new();
    zmx_protocol::encode(Tag::History, &format.encode(), &mut encoded)?;
    let mut sent = 0;
    while sent < encoded.len() {
        match SockBuf::write_once(fd, &encoded[sent..]) {
            Ok(n) => sent += n,
            Err(ZmxError::IoTransient) => continue,
            Err(e) => return Err(anyhow!("sending history request: {e:?}")),
        }
    }

    let mut read_buf = SockBuf::new();
    let deadline = Instant::now() + consts::HISTORY_TIMEOUT;
    loop {
        match read_buf.next_frame() {
            Ok(Some(Frame { tag: Tag::History, payload })) => {
                std::io::stdout().write_all(payload).context("writing history to stdout")?;
                return Ok(());
            }
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => return Err(anyhow!("malformed reply from daemon: {e}")),
        }
        if Instant::now() >= deadline {
            return Err(anyhow!("timed out waiting for history"));
        }
        match read_buf.fill(fd) {
            Ok(0) => return Err(anyhow!("daemon closed the connection before replying")),
            Ok(_) => {}
            Err(ZmxError::IoTransient) => std::thread::sleep(Duration::from_millis(10)),
            Err(e) => return Err(anyhow!("reading history reply: {e:?}")),
        }
    }
}
