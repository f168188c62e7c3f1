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

//! The client's steady-state loop: raw-mode stdin/stdout, the session
//! socket, and a SIGWINCH flag, all multiplexed behind a single `poll`
//! call, mirroring the daemon's own loop in
//! [`crate::daemon::server::Server::run`]. `zmx attach` hands this an
//! already-connected, not-yet-`Init`'d socket and gets back the exit code
//! the binary should use.

use std::{
    os::{
        fd::{AsRawFd, BorrowedFd, RawFd},
        unix::net::UnixStream,
    },
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use anyhow::Context;
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use tracing::debug;
use zmx_protocol::{Frame, Tag, WindowSize};

use crate::{buf::SockBuf, consts, error::ZmxError, tty};

const STDIN_FD: RawFd = 0;
const STDOUT_FD: RawFd = 1;
const STDIN_CHUNK: usize = 4 * 1024;

/// Kitty keyboard-protocol encodings of Ctrl+\\, in either its default
/// "press" form or an explicit `:1` event-type suffix. Either one means
/// "detach", exactly like the plain `0x1C` byte ISIG-off delivers.
const KITTY_DETACH_SEQS: [&[u8]; 2] = [b"\x1b[92;5u", b"\x1b[92;5:1u"];

#[derive(Clone)]
struct WinchFlag(Arc<AtomicBool>);

impl WinchFlag {
    fn install() -> anyhow::Result<WinchFlag> {
        let flag = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGWINCH, Arc::clone(&flag))
            .context("registering SIGWINCH handler")?;
        Ok(WinchFlag(flag))
    }

    fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}

/// True if `bytes` should be interpreted as the detach key rather than
/// literal input: either it starts with `0x1C` (Ctrl+\\, deliverable as a
/// literal byte because the client disables `ISIG`) or it contains one of
/// the Kitty keyboard-protocol spellings of the same chord.
fn is_detach(bytes: &[u8]) -> bool {
    if bytes.first() == Some(&0x1C) {
        return true;
    }
    KITTY_DETACH_SEQS.iter().any(|seq| contains_subslice(bytes, seq))
}

fn contains_subslice(haystack: &[u8], needle: &[u8]) -> bool {
    if needle.is_empty() || haystack.len() < needle.len() {
        return false;
    }
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn revents(fd: &PollFd) -> PollFlags {
    fd.revents().unwrap_or(PollFlags::empty())
}

/// Write every byte of `bytes` to `fd`, blocking (by retrying on
/// `IoTransient`) until it's all gone. Used for the one-shot writes
/// around the steady-state loop (the initial screen clear, the final
/// mode-restore sequence) where there's no poll loop to hang the write
/// off of.
fn write_all_now(fd: RawFd, mut bytes: &[u8]) -> anyhow::Result<()> {
    while !bytes.is_empty() {
        match SockBuf::write_once(fd, bytes) {
            Ok(n) => bytes = &bytes[n..],
            Err(ZmxError::IoTransient) => continue,
            Err(e) => return Err(anyhow::anyhow!("write failed: {e:?}")),
        }
    }
    Ok(())
}

fn queue_frame(buf: &mut SockBuf, tag: Tag, payload: &[u8]) {
    let mut encoded = Vec::new();
    if let Err(e) = zmx_protocol::encode(tag, payload, &mut encoded) {
        debug!("failed to encode outgoing {:?} frame: {e}", tag);
        return;
    }
    buf.push(&encoded);
}

/// Run the client steady-state loop against an already-connected session
/// socket: raw-ify the controlling tty (skipped gracefully if stdin
/// isn't one, so this also works under test harnesses that pipe stdin),
/// send the initial `Init`, then shuttle bytes until the socket hangs up,
/// stdin hits EOF, or the detach key is seen. Restores the terminal and
/// writes the fixed mode-restore sequence on every exit path.
pub fn run_loop(stream: UnixStream) -> anyhow::Result<i32> {
    stream.set_nonblocking(true).context("making session socket nonblocking")?;
    set_nonblocking(STDIN_FD)?;
    set_nonblocking(STDOUT_FD)?;

    let winch = WinchFlag::install()?;

    // Safety net for test harnesses and non-interactive invocations: a
    // plain pipe can't be put in raw mode, so only attempt it when stdin
    // is actually a tty.
    let is_tty = unsafe { libc::isatty(STDIN_FD) == 1 };
    let raw_guard = if is_tty { Some(tty::set_raw_mode(STDIN_FD).context("entering raw mode")?) } else { None };

    write_all_now(STDOUT_FD, b"\x1b[2J\x1b[H")?;

    let size = tty::Size::from_fd(STDIN_FD)
        .unwrap_or(tty::Size { rows: consts::DEFAULT_ROWS, cols: consts::DEFAULT_COLS });
    let mut sock_write = SockBuf::new();
    queue_frame(&mut sock_write, Tag::Init, &WindowSize { rows: size.rows, cols: size.cols }.encode());

    let result = steady_state(&stream, &winch, &mut sock_write);

    drop(raw_guard);
    write_all_now(STDOUT_FD, tty::RESTORE_MODES_SEQ.as_bytes())?;
    result
}

fn steady_state(stream: &UnixStream, winch: &WinchFlag, sock_write: &mut SockBuf) -> anyhow::Result<i32> {
    let sock_fd = stream.as_raw_fd();
    let mut sock_read = SockBuf::new();
    let mut stdout_buf: Vec<u8> = Vec::new();
    let mut stdin_tmp = [0u8; STDIN_CHUNK];

    loop {
        if winch.take() {
            if let Ok(size) = tty::Size::from_fd(STDIN_FD) {
                queue_frame(sock_write, Tag::Resize, &WindowSize { rows: size.rows, cols: size.cols }.encode());
            }
        }

        let mut fds = [
            PollFd::new(
                // Safety: `STDIN_FD`/`sock_fd`/`STDOUT_FD` are valid open
                // descriptors for the whole iteration; none of them are
                // closed before `fds` goes out of scope below.
                unsafe { BorrowedFd::borrow_raw(STDIN_FD) },
                PollFlags::POLLIN,
            ),
            PollFd::new(unsafe { BorrowedFd::borrow_raw(sock_fd) }, {
                let mut flags = PollFlags::POLLIN;
                if !sock_write.is_empty() {
                    flags |= PollFlags::POLLOUT;
                }
                flags
            }),
            PollFd::new(unsafe { BorrowedFd::borrow_raw(STDOUT_FD) }, {
                if stdout_buf.is_empty() {
                    PollFlags::empty()
                } else {
                    PollFlags::POLLOUT
                }
            }),
        ];

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => return Err(anyhow::anyhow!("poll failed: {e}")),
        }

        if revents(&fds[0]).contains(PollFlags::POLLIN) {
            match nix::unistd::read(STDIN_FD, &mut stdin_tmp) {
                Ok(0) => return Ok(0),
                Ok(n) => {
                    let bytes = &stdin_tmp[..n];
                    if is_detach(bytes) {
                        queue_frame(sock_write, Tag::Detach, &[]);
                    } else {
                        queue_frame(sock_write, Tag::Input, bytes);
                    }
                }
                Err(nix::errno::Errno::EAGAIN) => {}
                Err(e) => return Err(anyhow::anyhow!("reading stdin: {e}")),
            }
        }

        let sock_revents = revents(&fds[1]);
        if sock_revents.contains(PollFlags::POLLIN) {
            match sock_read.fill(sock_fd) {
                Ok(0) => return Ok(0),
                Ok(_) => {}
                Err(ZmxError::IoTransient) => {}
                Err(_) => return Ok(0),
            }
            loop {
                match sock_read.next_frame() {
                    Ok(Some(Frame { tag: Tag::Output, payload })) => stdout_buf.extend_from_slice(payload),
                    Ok(Some(_)) => {}
                    Ok(None) => break,
                    Err(e) => {
                        debug!("malformed frame from daemon, ignoring: {e}");
                        break;
                    }
                }
            }
        } else if sock_revents.intersects(PollFlags::POLLHUP | PollFlags::POLLERR) {
            return Ok(0);
        }

        if sock_revents.contains(PollFlags::POLLOUT) && !sock_write.is_empty() {
            match SockBuf::write_once(sock_fd, sock_write.pending()) {
                Ok(n) => sock_write.advance(n),
                Err(ZmxError::IoTransient) => {}
                Err(_) => return Ok(0),
            }
        }

        if revents(&fds[2]).contains(PollFlags::POLLOUT) && !stdout_buf.is_empty() {
            match SockBuf::write_once(STDOUT_FD, &stdout_buf) {
                Ok(n) => {
                    stdout_buf.drain(0..n);
                }
                Err(ZmxError::IoTransient) => {}
                Err(e) => return Err(anyhow::anyhow!("writing stdout failed: {e:?}")),
            }
        }
    }
}

fn set_nonblocking(fd: RawFd) -> anyhow::Result<()> {
    use nix::fcntl::{fcntl, FcntlArg, OFlag};
    // Safety: `fd` is one of the three well-known standard descriptors,
    // open for the life of the process.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let flags = fcntl(borrowed, FcntlArg::F_GETFL).context("F_GETFL")?;
    let mut oflags = OFlag::from_bits_truncate(flags);
    oflags.insert(OFlag::O_NONBLOCK);
    fcntl(borrowed, FcntlArg::F_SETFL(oflags)).context("F_SETFL")?;
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn ctrl_backslash_byte_is_detach() {
        assert!(is_detach(&[0x1C]));
        assert!(is_detach(&[0x1C, b'a', b'b']));
    }

    #[test]
    fn kitty_detach_sequences_are_detected_anywhere_in_the_chunk() {
        assert!(is_detach(b"\x1b[92;5u"));
        assert!(is_detach(b"\x1b[92;5:1u"));
        assert!(is_detach(b"leading bytes\x1b[92;5utrailing"));
    }

    #[test]
    fn ordinary_input_is_not_detach() {
        assert!(!is_detach(b"hello world\n"));
        assert!(!is_detach(&[]));
    }
}
