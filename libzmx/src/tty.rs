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

//! Raw-mode TTY setup for the client loop, plus the window-size ioctls
//! shared by the client (reading its own controlling terminal) and the
//! daemon (applying `Init`/`Resize` to the pty master).

use std::os::unix::io::RawFd;

use anyhow::Context;
use nix::sys::termios::{self, ControlFlags, InputFlags, LocalFlags, OutputFlags, SetArg};

// see `man ioctl_tty` for info on these ioctl commands
nix::ioctl_read_bad!(tiocgwinsz, libc::TIOCGWINSZ, libc::winsize);
nix::ioctl_write_ptr_bad!(tiocswinsz, libc::TIOCSWINSZ, libc::winsize);

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub rows: u16,
    pub cols: u16,
}

impl Size {
    pub fn from_fd(fd: RawFd) -> anyhow::Result<Size> {
        let mut term_size = libc::winsize { ws_row: 0, ws_col: 0, ws_xpixel: 0, ws_ypixel: 0 };
        // Safety: `term_size` is stack allocated and lives for the whole call.
        unsafe {
            tiocgwinsz(fd, &mut term_size).context("fetching term size")?;
        }
        Ok(Size { rows: term_size.ws_row, cols: term_size.ws_col })
    }

    pub fn set_fd(&self, fd: RawFd) -> anyhow::Result<()> {
        let term_size =
            libc::winsize { ws_row: self.rows, ws_col: self.cols, ws_xpixel: 0, ws_ypixel: 0 };
        unsafe {
            tiocswinsz(fd, &term_size).context("setting term size")?;
        }
        Ok(())
    }
}

/// Put `fd` (the client's controlling terminal) into the raw mode the
/// client loop needs: no canonical mode, no echo, no signal generation,
/// no flow control, literal-next (`LNEXT`, normally Ctrl-V) disabled —
/// but `ISIG` off means Ctrl+\\ arrives as the literal byte `0x1C` instead
/// of raising `SIGQUIT`, which is exactly what the detach-key scan in
/// `client` needs to see. `VMIN=1`/`VTIME=0` so reads block for at least
/// one byte and return immediately once it arrives.
pub fn set_raw_mode(fd: RawFd) -> anyhow::Result<RawModeGuard> {
    let old = termios::tcgetattr(fd).context("grabbing term flags")?;

    let mut new = old.clone();
    new.input_flags &= !(InputFlags::IGNBRK
        | InputFlags::BRKINT
        | InputFlags::PARMRK
        | InputFlags::ISTRIP
        | InputFlags::INLCR
        | InputFlags::IGNCR
        | InputFlags::ICRNL
        | InputFlags::IXON);
    new.output_flags &= !OutputFlags::OPOST;
    new.local_flags &= !(LocalFlags::ECHO
        | LocalFlags::ECHONL
        | LocalFlags::ICANON
        | LocalFlags::ISIG
        | LocalFlags::IEXTEN);
    new.control_flags &= !(ControlFlags::CSIZE | ControlFlags::PARENB);
    new.control_flags |= ControlFlags::CS8;
    new.control_chars[libc::VMIN] = 1;
    new.control_chars[libc::VTIME] = 0;

    termios::tcsetattr(fd, SetArg::TCSANOW, &new).context("entering raw mode")?;

    Ok(RawModeGuard { fd, old })
}

/// Restores the terminal's original settings on drop, with `TCSAFLUSH` so
/// any input the shell hasn't consumed yet is discarded rather than
/// replayed into whatever comes next on the real terminal.
pub struct RawModeGuard {
    fd: RawFd,
    old: termios::Termios,
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        if let Err(e) = termios::tcsetattr(self.fd, SetArg::TCSAFLUSH, &self.old) {
            tracing::error!("error restoring terminal settings: {:?}", e);
        }
    }
}

/// The fixed escape sequence written on detach/exit so a terminal left in
/// mouse tracking, bracketed paste, focus-event, or alternate-screen mode
/// by the shell doesn't leak that state back to the user's real prompt.
/// Deliberately does NOT clear the screen — spec requires the screen
/// content to survive detach so a snapshot on the next attach doesn't look
/// like it corrupted anything.
pub const RESTORE_MODES_SEQ: &str = concat!(
    "\x1b[?1000l", "\x1b[?1002l", "\x1b[?1003l", "\x1b[?1006l", // mouse tracking
    "\x1b[?2004l", // bracketed paste
    "\x1b[?1004l", // focus events
    "\x1b[?1049l", // alternate screen
    "\x1b[?25h",   // cursor visible
);
