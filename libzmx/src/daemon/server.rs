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

//! The daemon's single-threaded, single-`poll`-call event loop. One
//! `Server` owns exactly one pty and serves exactly one session; there is
//! no cross-session state anywhere in this struct.

use std::{
    io,
    os::{
        fd::{AsRawFd, BorrowedFd, OwnedFd, RawFd},
        unix::net::{UnixListener, UnixStream},
    },
    path::PathBuf,
};

use nix::{
    poll::{poll, PollFd, PollFlags, PollTimeout},
    unistd::Pid,
};
use tracing::{debug, error, info, instrument, warn};
use zmx_protocol::{Frame, HistoryFormat, InfoResponse, Tag, WindowSize};

use crate::{
    buf::SockBuf, consts, daemon::shell, daemon::signals::TermFlag, error::ZmxError, term::Terminal,
    tty,
};

struct Client {
    stream: UnixStream,
    read_buf: SockBuf,
    write_buf: SockBuf,
    has_pending_output: bool,
}

impl Client {
    fn fd(&self) -> RawFd {
        self.stream.as_raw_fd()
    }

    fn queue(&mut self, tag: Tag, payload: &[u8]) {
        let mut encoded = Vec::new();
        if let Err(e) = zmx_protocol::encode(tag, payload, &mut encoded) {
            warn!("failed to encode outgoing {:?} frame: {e}", tag);
            return;
        }
        self.write_buf.push(&encoded);
        self.has_pending_output = true;
    }
}

enum ClientSignal {
    Continue,
    Close,
    DetachAll,
    Kill,
}

enum PtyOutcome {
    Continue,
    ShellExited,
}

pub struct Server {
    listener: UnixListener,
    socket_path: PathBuf,
    pty_master: OwnedFd,
    shell_pgid: Pid,
    terminal: Box<dyn Terminal>,
    clients: Vec<Client>,
    has_pty_output: bool,
    has_had_client: bool,
    term_flag: TermFlag,
    cmd_display: Vec<u8>,
    cwd_display: Vec<u8>,
}

impl Server {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        listener: UnixListener,
        socket_path: PathBuf,
        pty_master: OwnedFd,
        shell_pgid: Pid,
        terminal: Box<dyn Terminal>,
        term_flag: TermFlag,
        cmd_display: Vec<u8>,
        cwd_display: Vec<u8>,
    ) -> anyhow::Result<Server> {
        listener.set_nonblocking(true)?;
        Ok(Server {
            listener,
            socket_path,
            pty_master,
            shell_pgid,
            terminal,
            clients: Vec::new(),
            has_pty_output: false,
            has_had_client: false,
            term_flag,
            cmd_display,
            cwd_display,
        })
    }

    #[instrument(skip(self), fields(socket = %self.socket_path.display()))]
    pub fn run(&mut self) {
        loop {
            if self.term_flag.take() {
                info!("sigterm observed, shutting down");
                break;
            }

            let client_count = self.clients.len();
            let listener_fd = self.listener.as_raw_fd();
            let pty_fd = self.pty_master.as_raw_fd();
            let client_fds: Vec<RawFd> = self.clients.iter().map(Client::fd).collect();
            let client_wants_write: Vec<bool> =
                self.clients.iter().map(|c| c.has_pending_output).collect();

            let mut fds: Vec<PollFd> = Vec::with_capacity(2 + client_fds.len());
            // Safety: these raw fds were copied out of `self` above (plain
            // `i32`s, not borrows), so constructing `BorrowedFd`s from them
            // here does not tie `fds`'s lifetime to `self`. We don't close
            // any of them before `fds` is dropped at the end of this
            // iteration.
            unsafe {
                fds.push(PollFd::new(BorrowedFd::borrow_raw(listener_fd), PollFlags::POLLIN));
                fds.push(PollFd::new(BorrowedFd::borrow_raw(pty_fd), PollFlags::POLLIN));
                for (fd, wants_write) in client_fds.iter().zip(client_wants_write.iter()) {
                    let mut flags = PollFlags::POLLIN;
                    if *wants_write {
                        flags |= PollFlags::POLLOUT;
                    }
                    fds.push(PollFd::new(BorrowedFd::borrow_raw(*fd), flags));
                }
            }

            match poll(&mut fds, PollTimeout::NONE) {
                Ok(_) => {}
                Err(nix::errno::Errno::EINTR) => continue,
                Err(e) => {
                    error!("poll failed: {e}");
                    break;
                }
            }

            if revents_contain(&fds[0], PollFlags::POLLIN) {
                self.accept_clients();
            }

            let pty_revents = fds[1].revents().unwrap_or(PollFlags::empty());
            if pty_revents.intersects(PollFlags::POLLIN | PollFlags::POLLHUP | PollFlags::POLLERR) {
                match self.handle_pty_readable() {
                    PtyOutcome::Continue => {}
                    PtyOutcome::ShellExited => {
                        info!("shell exited, shutting down session");
                        break;
                    }
                }
            }

            let limit = client_count.min(self.clients.len());
            let mut to_close: Vec<usize> = Vec::new();
            let mut kill_requested = false;

            for i in 0..limit {
                let revents = fds[2 + i].revents().unwrap_or(PollFlags::empty());
                if revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR)
                    && !revents.contains(PollFlags::POLLIN)
                {
                    to_close.push(i);
                    continue;
                }
                if revents.contains(PollFlags::POLLIN) {
                    match self.handle_client_readable(i) {
                        ClientSignal::Continue => {}
                        ClientSignal::Close => to_close.push(i),
                        ClientSignal::DetachAll => to_close.extend(0..self.clients.len()),
                        ClientSignal::Kill => kill_requested = true,
                    }
                }
            }

            for i in 0..limit {
                if to_close.contains(&i) {
                    continue;
                }
                let revents = fds[2 + i].revents().unwrap_or(PollFlags::empty());
                if revents.contains(PollFlags::POLLOUT) {
                    if let ClientSignal::Close = self.handle_client_writable(i) {
                        to_close.push(i);
                    }
                }
            }

            to_close.sort_unstable();
            to_close.dedup();
            for &i in to_close.iter().rev() {
                self.clients.remove(i);
            }

            if kill_requested {
                info!("kill requested, shutting down session");
                break;
            }
        }

        self.shutdown();
    }

    fn accept_clients(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    if let Err(e) = stream.set_nonblocking(true) {
                        warn!("failed to set accepted client nonblocking: {e}");
                        continue;
                    }
                    debug!("client connected");
                    self.clients.push(Client {
                        stream,
                        read_buf: SockBuf::new(),
                        write_buf: SockBuf::new(),
                        has_pending_output: false,
                    });
                }
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) => {
                    warn!("accept failed: {e}");
                    break;
                }
            }
        }
    }

    fn handle_pty_readable(&mut self) -> PtyOutcome {
        let mut tmp = [0u8; consts::BUF_SIZE];
        match nix::unistd::read(self.pty_master.as_raw_fd(), &mut tmp) {
            Ok(0) => PtyOutcome::ShellExited,
            Ok(n) => {
                let bytes = tmp[..n].to_vec();
                self.terminal.feed(&bytes);
                self.has_pty_output = true;
                for c in self.clients.iter_mut() {
                    c.queue(Tag::Output, &bytes);
                }
                PtyOutcome::Continue
            }
            // EIO from a pty master almost always means the slave side is
            // gone, which is how Linux reports "the shell exited" here.
            Err(nix::errno::Errno::EIO) => PtyOutcome::ShellExited,
            Err(nix::errno::Errno::EAGAIN) => PtyOutcome::Continue,
            Err(e) => {
                error!("fatal pty read error: {e}");
                PtyOutcome::ShellExited
            }
        }
    }

    fn handle_client_readable(&mut self, i: usize) -> ClientSignal {
        let fd = self.clients[i].fd();
        match self.clients[i].read_buf.fill(fd) {
            Ok(0) => return ClientSignal::Close,
            Ok(_) => {}
            Err(ZmxError::IoTransient) => {}
            Err(_) => return ClientSignal::Close,
        }

        loop {
            let (tag, payload) = match self.clients[i].read_buf.next_frame() {
                Ok(Some(Frame { tag, payload })) => (tag, payload.to_vec()),
                Ok(None) => break,
                Err(e) => {
                    debug!("closing client after malformed frame: {e}");
                    return ClientSignal::Close;
                }
            };
            match self.dispatch(i, tag, &payload) {
                ClientSignal::Continue => {}
                other => return other,
            }
        }
        ClientSignal::Continue
    }

    fn dispatch(&mut self, i: usize, tag: Tag, payload: &[u8]) -> ClientSignal {
        match tag {
            Tag::Input => {
                self.write_pty(payload);
                ClientSignal::Continue
            }
            Tag::Init => {
                if !self.apply_resize(payload) {
                    return ClientSignal::Close;
                }
                if self.has_pty_output && self.has_had_client {
                    if let Some(snapshot) = self.terminal.serialize_state() {
                        self.clients[i].queue(Tag::Output, &snapshot);
                    }
                }
                self.has_had_client = true;
                ClientSignal::Continue
            }
            Tag::Resize => {
                if !self.apply_resize(payload) {
                    return ClientSignal::Close;
                }
                ClientSignal::Continue
            }
            Tag::Detach => ClientSignal::Close,
            Tag::DetachAll => ClientSignal::DetachAll,
            Tag::Kill => ClientSignal::Kill,
            Tag::Info => {
                self.queue_info(i);
                ClientSignal::Continue
            }
            Tag::History => {
                self.queue_history(i, payload);
                ClientSignal::Continue
            }
            Tag::Run => {
                self.write_pty(payload);
                self.clients[i].queue(Tag::Ack, &[]);
                self.has_had_client = true;
                ClientSignal::Continue
            }
            Tag::Output | Tag::Ack => ClientSignal::Continue,
        }
    }

    fn apply_resize(&mut self, payload: &[u8]) -> bool {
        let ws = match WindowSize::decode(payload) {
            Ok(ws) => ws,
            Err(e) => {
                debug!("malformed resize payload: {e}");
                return false;
            }
        };
        let size = tty::Size { rows: ws.rows, cols: ws.cols };
        if let Err(e) = size.set_fd(self.pty_master.as_raw_fd()) {
            warn!("TIOCSWINSZ on pty master failed: {e:?}");
        }
        self.terminal.resize(ws.cols, ws.rows);
        true
    }

    fn write_pty(&mut self, payload: &[u8]) {
        match SockBuf::write_once(self.pty_master.as_raw_fd(), payload) {
            Ok(n) if n < payload.len() => {
                warn!("short write to pty master ({n} of {} bytes), dropping remainder", payload.len());
            }
            Ok(_) => {}
            Err(ZmxError::IoTransient) => {
                debug!("pty master write would block, dropping {} input bytes", payload.len());
            }
            Err(e) => warn!("write to pty master failed: {e}"),
        }
    }

    fn queue_info(&mut self, i: usize) {
        let clients_len = (self.clients.len() - 1) as u64;
        let resp = InfoResponse {
            clients_len,
            pid: self.shell_pgid.as_raw(),
            cmd: self.cmd_display.clone(),
            cwd: self.cwd_display.clone(),
        };
        match resp.encode() {
            Ok(payload) => self.clients[i].queue(Tag::Info, &payload),
            Err(e) => warn!("failed to encode info response: {e}"),
        }
    }

    fn queue_history(&mut self, i: usize, payload: &[u8]) {
        let format = match HistoryFormat::decode(payload) {
            Ok(f) => f,
            Err(e) => {
                debug!("malformed history request: {e}");
                return;
            }
        };
        let bytes = self.terminal.serialize(format).unwrap_or_default();
        self.clients[i].queue(Tag::History, &bytes);
    }

    fn handle_client_writable(&mut self, i: usize) -> ClientSignal {
        let fd = self.clients[i].fd();
        let result = {
            let pending = self.clients[i].write_buf.pending();
            SockBuf::write_once(fd, pending)
        };
        match result {
            Ok(n) => {
                self.clients[i].write_buf.advance(n);
                if self.clients[i].write_buf.is_empty() {
                    self.clients[i].has_pending_output = false;
                }
                ClientSignal::Continue
            }
            Err(ZmxError::IoTransient) => ClientSignal::Continue,
            Err(_) => ClientSignal::Close,
        }
    }

    fn shutdown(&mut self) {
        info!("session shutting down");
        self.clients.clear();
        shell::kill_and_reap(self.shell_pgid);
        if let Err(e) = std::fs::remove_file(&self.socket_path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!("failed to remove socket {:?}: {e}", self.socket_path);
            }
        }
    }
}

fn revents_contain(fd: &PollFd, flags: PollFlags) -> bool {
    fd.revents().is_some_and(|r| r.contains(flags))
}
