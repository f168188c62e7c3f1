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

//! `zmx run NAME [cmd...]`: create the session if it doesn't exist yet,
//! type `cmd` into its pty without attaching a terminal to it, and exit
//! once the daemon acks the write. Reads the command from stdin when no
//! argument is given and stdin isn't a tty, so `echo foo | zmx run s` and
//! `zmx run s -- echo foo` behave the same.

use std::{
    io::Read,
    os::{fd::AsRawFd, unix::net::UnixStream},
    path::PathBuf,
    time::{Duration, Instant},
};

use anyhow::{anyhow, bail, Context};
use zmx_protocol::{Frame, Tag};

use crate::{
    buf::SockBuf,
    config::Config,
    consts,
    daemon::shell::SpawnSpec,
    error::ZmxError,
    lifecycle::{self, Ensured},
    namespace::Namespace,
    tty,
};

const ACK_TIMEOUT: Duration = Duration::from_secs(5);

pub fn run(ns: &Namespace, config: &Config, name: &str, cmd: Vec<String>) -> anyhow::Result<()> {
    let cmd_line = resolve_cmd_line(cmd)?;

    let spawn =
        SpawnSpec { cmd: None, cwd: std::env::current_dir().unwrap_or_else(|_| PathBuf::from("/")) };
    // `run` never attaches a terminal, so there's no real size to read;
    // a later `attach` corrects it via its own `Init` frame.
    let size = tty::Size { rows: consts::DEFAULT_ROWS, cols: consts::DEFAULT_COLS };
    let stream = match lifecycle::ensure_session(ns, name, &spawn, config, size)? {
        Ensured::Existing(conn) => conn,
        Ensured::JustCreated => {
            UnixStream::connect(ns.socket_path(name)).context("connecting to newly created session")?
        }
    };

    send_run_and_await_ack(stream, cmd_line.as_bytes())
}

fn resolve_cmd_line(cmd: Vec<String>) -> anyhow::Result<String> {
    if !cmd.is_empty() {
        return Ok(shell_words::join(&cmd) + "\n");
    }
    if unsafe { libc::isatty(0) } == 1 {
        bail!("no command given and stdin is a tty");
    }
    let mut s = String::new();
    std::io::stdin().read_to_string(&mut s).context("reading command from stdin")?;
    let trimmed = s.trim_end_matches('\n');
    if trimmed.is_empty() {
        bail!("no command given on stdin");
    }
    Ok(trimmed.to_string() + "\n")
}

fn send_run_and_await_ack(stream: UnixStream, cmd: &[u8]) -> anyhow::Result<()> {
    stream.set_nonblocking(true).context("making session socket nonblocking")?;
    let fd = stream.as_raw_fd();

    let mut encoded = Vec::new();
    zmx_protocol::encode(Tag::Run, cmd, &mut encoded)?;
    let mut sent = 0;
    while sent < encoded.len() {
        match SockBuf::write_once(fd, &encoded[sent..]) {
            Ok(n) => sent += n,
            Err(ZmxError::IoTransient) => continue,
            Err(e) => return Err(anyhow!("sending run request: {e:?}")),
        }
    }

    let mut read_buf = SockBuf::new();
    let deadline = Instant::now() + ACK_TIMEOUT;
    loop {
        match read_buf.next_frame() {
            Ok(Some(Frame { tag: Tag::Ack, .. })) => return Ok(()),
            Ok(Some(_)) => continue,
            Ok(None) => {}
            Err(e) => return Err(anyhow!("malformed reply from daemon: {e}")),
        }
        if Instant::now() >= deadline {
            return Err(anyhow!("timed out waiting for the daemon to ack"));
        }
        match read_buf.fill(fd) {
            Ok(0) => return Err(anyhow!("daemon closed the connection before acking")),
            Ok(_) => {}
            Err(ZmxError::IoTransient) => std::thread::sleep(Duration::from_millis(10)),
            Err(e) => return Err(anyhow!("reading ack: {e:?}")),
        }
    }
}
