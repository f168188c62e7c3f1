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

//! Spawning the shell under a pty, and the SIGHUP/SIGKILL escalation used
//! to tear it down again. The grandchild side of [`spawn_pty`] never
//! returns to the caller's stack: it either `execvp`s into the shell or
//! `_exit`s, since unwinding back through a forked-but-not-exec'd process
//! would re-run destructors and flush buffers that belong to the parent.

use std::{
    env,
    ffi::CString,
    os::fd::OwnedFd,
    path::PathBuf,
    time::{Duration, Instant},
};

use nix::{
    pty::{forkpty, Winsize},
    sys::{
        signal::{self, Signal},
        termios,
        wait::{waitpid, WaitPidFlag, WaitStatus},
    },
    unistd::{execvp, ForkResult, Pid, User},
};
use tracing::debug;

use crate::{config::Config, consts, error::ZmxError};

/// What to run in the new pty, and where.
#[derive(Debug, Clone, Default)]
pub struct SpawnSpec {
    /// `None` (or empty) means the user's login shell.
    pub cmd: Option<Vec<String>>,
    pub cwd: PathBuf,
}

impl SpawnSpec {
    /// The bytes `Info` reports as the running command: either the
    /// explicit command line, or the resolved shell path.
    pub fn display_cmd(&self, config: &Config) -> Vec<u8> {
        match &self.cmd {
            Some(argv) if !argv.is_empty() => shell_words::join(argv).into_bytes(),
            _ => resolve_shell(config).into_bytes(),
        }
    }

    pub fn display_cwd(&self) -> Vec<u8> {
        self.cwd.to_string_lossy().into_owned().into_bytes()
    }
}

pub struct SpawnedShell {
    pub master: OwnedFd,
    /// Also the shell's own process group id, since it calls `setsid()`
    /// as the first thing it does after the fork.
    pub pid: Pid,
}

/// Fork a pty, spawn `spawn.cmd` (or the login shell) as its slave-side
/// process, and return the master fd plus the child's pid/pgid.
pub fn spawn_pty(
    cols: u16,
    rows: u16,
    spawn: &SpawnSpec,
    name: &str,
    group: &str,
    config: &Config,
) -> Result<SpawnedShell, ZmxError> {
    let winsize = Winsize { ws_row: rows, ws_col: cols, ws_xpixel: 0, ws_ypixel: 0 };

    // Safety: the child branch below either execs or calls `libc::_exit`
    // directly; it never returns into this function's caller.
    let result = unsafe { forkpty(Some(&winsize), None) }
        .map_err(|e| ZmxError::Unrecoverable(format!("forkpty: {e}")))?;

    match result.fork_result {
        ForkResult::Parent { child } => Ok(SpawnedShell { master: result.master, pid: child }),
        ForkResult::Child => {
            env::set_var(consts::SESSION_ENV_VAR, name);
            env::set_var(consts::GROUP_ENV_VAR, group);
            if !spawn.cwd.as_os_str().is_empty() {
                let _ = env::set_current_dir(&spawn.cwd);
            }
            if config.noecho == Some(true) {
                disable_echo();
            }
            exec_shell_or_die(spawn, config);
        }
    }
}

fn disable_echo() {
    if let Ok(mut t) = termios::tcgetattr(0) {
        t.local_flags &= !termios::LocalFlags::ECHO;
        let _ = termios::tcsetattr(0, termios::SetArg::TCSANOW, &t);
    }
}

/// Exec into the requested command or login shell. Never returns: on
/// success this process image is replaced; on failure it exits with
/// status 1 after printing a message to the pty's stderr.
fn exec_shell_or_die(spawn: &SpawnSpec, config: &Config) -> ! {
    let outcome = match &spawn.cmd {
        Some(argv) if !argv.is_empty() => exec_argv(argv),
        _ => exec_login_shell(config),
    };
    if let Err(e) = outcome {
        eprintln!("zmx: exec failed: {e}");
    }
    // Safety: this process was about to become the shell and never ran any
    // other Rust code; it must not unwind or flush buffers it doesn't own.
    unsafe { libc::_exit(1) }
}

fn exec_argv(argv: &[String]) -> Result<(), ZmxError> {
    let cstrs: Vec<CString> = argv
        .iter()
        .map(|s| CString::new(s.as_bytes()))
        .collect::<Result<_, _>>()
        .map_err(|e| ZmxError::Unrecoverable(format!("command contains a NUL byte: {e}")))?;
    execvp(&cstrs[0], &cstrs).map_err(|e| ZmxError::Unrecoverable(format!("execvp: {e}")))?;
    unreachable!("execvp only returns on error")
}

fn exec_login_shell(config: &Config) -> Result<(), ZmxError> {
    let path = resolve_shell(config);
    let basename = path.rsplit('/').next().unwrap_or(&path);
    let argv0 = format!("-{basename}");

    let path_c = CString::new(path.as_bytes())
        .map_err(|e| ZmxError::Unrecoverable(format!("shell path contains a NUL byte: {e}")))?;
    let argv0_c = CString::new(argv0.as_bytes())
        .map_err(|e| ZmxError::Unrecoverable(format!("shell argv0 contains a NUL byte: {e}")))?;

    execvp(&path_c, &[argv0_c]).map_err(|e| ZmxError::Unrecoverable(format!("execvp: {e}")))?;
    unreachable!("execvp only returns on error")
}

/// `config.shell`, else `$SHELL`, else the passwd entry for the caller's
/// uid, else `/bin/sh`.
fn resolve_shell(config: &Config) -> String {
    if let Some(shell) = &config.shell {
        return shell.clone();
    }
    if let Ok(shell) = env::var("SHELL") {
        if !shell.is_empty() {
            return shell;
        }
    }
    if let Ok(Some(user)) = User::from_uid(nix::unistd::getuid()) {
        return user.shell.to_string_lossy().into_owned();
    }
    "/bin/sh".to_string()
}

/// SIGHUP the shell's process group, give it [`consts::SHUTDOWN_SIGHUP_GRACE`]
/// to exit on its own, then SIGKILL and reap it. `pgid` is the shell's own
/// pid, which is also its process group id since it called `setsid()`.
pub fn kill_and_reap(pgid: Pid) {
    signal_group(pgid, Signal::SIGHUP);

    let deadline = Instant::now() + consts::SHUTDOWN_SIGHUP_GRACE;
    loop {
        match waitpid(pgid, Some(WaitPidFlag::WNOHANG)) {
            Ok(WaitStatus::StillAlive) => {
                if Instant::now() >= deadline {
                    break;
                }
                std::thread::sleep(Duration::from_millis(20));
            }
            _ => return,
        }
    }

    signal_group(pgid, Signal::SIGKILL);
    let _ = waitpid(pgid, None);
}

fn signal_group(pgid: Pid, sig: Signal) {
    // A negative pid targets the whole process group.
    if let Err(e) = signal::kill(Pid::from_raw(-pgid.as_raw()), sig) {
        debug!("signal {:?} to shell process group {} failed: {}", sig, pgid, e);
    } else {
        debug!("sent {:?} to shell process group {}", sig, pgid);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn display_cmd_uses_explicit_command_when_present() {
        let config = Config::default();
        let spawn =
            SpawnSpec { cmd: Some(vec!["echo".into(), "hi there".into()]), cwd: PathBuf::new() };
        assert_eq!(spawn.display_cmd(&config), b"echo 'hi there'".to_vec());
    }

    #[test]
    fn display_cmd_falls_back_to_resolved_shell() {
        let config = Config { shell: Some("/bin/zsh".into()), ..Config::default() };
        let spawn = SpawnSpec { cmd: None, cwd: PathBuf::new() };
        assert_eq!(spawn.display_cmd(&config), b"/bin/zsh".to_vec());
    }
}
