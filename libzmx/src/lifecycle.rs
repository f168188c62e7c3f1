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

//! Deciding whether a session name refers to something already alive, and
//! creating it if not. This is the one piece of the daemon that runs in a
//! short-lived CLI process rather than the forked daemon itself.

use std::{fs, os::unix::net::{UnixListener, UnixStream}, thread, time::Duration};

use nix::unistd::{fork, setsid, ForkResult};
use tracing::{info, instrument, warn};

use crate::{
    config::Config,
    daemon::{server::Server, shell, shell::SpawnSpec, signals::TermFlag},
    error::ZmxError,
    namespace::{self, Namespace, ProbeResult},
    term, tty,
};

/// What [`ensure_session`] learned: either an already-open connection to a
/// daemon that was alive before the call, or confirmation that this call
/// just created one (the caller dials it fresh).
pub enum Ensured {
    Existing(UnixStream),
    JustCreated,
}

/// Probe `name`'s socket; if nothing answers, unlink the stale path and
/// fork a fresh daemon for it. Never attaches anything itself. `size` is
/// the pty size to create the session with — the caller's real window
/// size when one is available (`attach`), or the [`consts::DEFAULT_ROWS`]/
/// [`consts::DEFAULT_COLS`] fallback when there's no terminal to read it
/// from yet (`run`, `fork`).
#[instrument(skip(ns, spawn, config))]
pub fn ensure_session(
    ns: &Namespace,
    name: &str,
    spawn: &SpawnSpec,
    config: &Config,
    size: tty::Size,
) -> Result<Ensured, ZmxError> {
    let path = ns.socket_path(name);
    match namespace::probe(&path) {
        Ok(ProbeResult { conn, .. }) => return Ok(Ensured::Existing(conn)),
        Err(ZmxError::StaleSocket) | Err(ZmxError::Timeout(_)) => {
            let _ = fs::remove_file(&path);
        }
        Err(e) => return Err(e),
    }

    create_session(ns, name, spawn, config, size)?;
    Ok(Ensured::JustCreated)
}

/// Bind the session's listener, fork, and let the child become the daemon
/// for this session while the parent returns once the child has had a
/// moment to start serving.
fn create_session(
    ns: &Namespace,
    name: &str,
    spawn: &SpawnSpec,
    config: &Config,
    size: tty::Size,
) -> Result<(), ZmxError> {
    ns.ensure_dirs().map_err(ZmxError::IoFatal)?;
    let path = ns.socket_path(name);
    let listener = UnixListener::bind(&path).map_err(ZmxError::IoFatal)?;

    // Safety: no other threads exist in this process at this point, so the
    // fork is safe; the only shared state is the listener fd above, which
    // is simply inherited by the child.
    let fork_result =
        unsafe { fork() }.map_err(|e| ZmxError::Unrecoverable(format!("fork: {e}")))?;

    match fork_result {
        ForkResult::Parent { .. } => {
            drop(listener);
            // Give the child time to bind/accept before we report success;
            // a following `probe` or `connect` would otherwise race it.
            thread::sleep(Duration::from_millis(100));
            Ok(())
        }
        ForkResult::Child => {
            run_daemon_child(ns, name, listener, spawn, config, size);
            // Safety: this process has served its purpose and must not
            // unwind back into anything belonging to the parent.
            unsafe { libc::_exit(0) };
        }
    }
}

fn run_daemon_child(
    ns: &Namespace,
    name: &str,
    listener: UnixListener,
    spawn: &SpawnSpec,
    config: &Config,
    size: tty::Size,
) {
    if let Err(e) = setsid() {
        warn!("setsid failed (already a session leader?): {e}");
    }

    let log_path = ns.log_path(name);
    if let Err(e) = crate::logging::init_daemon(&log_path) {
        eprintln!("zmx: failed to open daemon log {log_path:?}: {e:?}");
    }
    info!(
        session = name,
        started_at = %chrono::Utc::now().to_rfc3339(),
        "daemon child starting"
    );

    let term_flag = match TermFlag::install() {
        Ok(f) => f,
        Err(e) => {
            eprintln!("zmx: failed to install SIGTERM handler: {e:?}");
            return;
        }
    };

    let spawned = match shell::spawn_pty(size.cols, size.rows, spawn, name, &ns.group, config) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("zmx: failed to spawn shell: {e}");
            let _ = fs::remove_file(ns.socket_path(name));
            return;
        }
    };

    let terminal = term::new(size.cols, size.rows, config.max_scrollback());
    let cmd_display = spawn.display_cmd(config);
    let cwd_display = spawn.display_cwd();

    let mut server = match Server::new(
        listener,
        ns.socket_path(name),
        spawned.master,
        spawned.pid,
        terminal,
        term_flag,
        cmd_display,
        cwd_display,
    ) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("zmx: failed to start server: {e:?}");
            return;
        }
    };

    server.run();
    info!(session = name, "daemon child exiting");
}

/// Pick the smallest free `{source}-N` (`N` from 0) for `fork`'s implicit
/// naming, up to 1000 candidates.
pub fn first_free_fork_name(ns: &Namespace, source: &str) -> Result<String, ZmxError> {
    for n in 0..1000 {
        let candidate = format!("{source}-{n}");
        match namespace::probe(&ns.socket_path(&candidate)) {
            Ok(_) => continue,
            Err(ZmxError::StaleSocket) | Err(ZmxError::Timeout(_)) | Err(ZmxError::NotFound(_)) => {
                return Ok(candidate)
            }
            Err(e) => return Err(e),
        }
    }
    Err(ZmxError::Unrecoverable(format!("no free fork name under {source}-*")))
}
