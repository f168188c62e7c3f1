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

//! `zmx fork [SOURCE] [--name NAME]`: read an existing session's
//! advertised command and working directory over the `Info` protocol,
//! then create a brand new session seeded with them. Never attaches to
//! either session.

use std::path::PathBuf;

use anyhow::Context;

use crate::{
    config::Config,
    consts,
    daemon::shell::SpawnSpec,
    error::ZmxError,
    lifecycle::{self, Ensured},
    namespace::{self, Namespace},
    tty,
};

/// Returns the name the new session was created under, so the caller can
/// print it.
pub fn run(ns: &Namespace, config: &Config, source: &str, name: Option<String>) -> anyhow::Result<String> {
    let source_path = ns.socket_path(source);
    let probe = match namespace::probe(&source_path) {
        Ok(p) => p,
        Err(ZmxError::StaleSocket) | Err(ZmxError::Timeout(_)) => {
            return Err(ZmxError::NotFound(source.to_string()).into())
        }
        Err(e) => return Err(e.into()),
    };

    let target = match name {
        Some(n) => {
            if namespace::probe(&ns.socket_path(&n)).is_ok() {
                return Err(ZmxError::AlreadyExists(n).into());
            }
            n
        }
        None => lifecycle::first_free_fork_name(ns, source)?,
    };

    let cmd_line = String::from_utf8_lossy(&probe.info.cmd).into_owned();
    let cwd = PathBuf::from(String::from_utf8_lossy(&probe.info.cwd).into_owned());
    let cmd = shell_words::split(&cmd_line).ok().filter(|v: &Vec<String>| !v.is_empty());
    let spawn = SpawnSpec { cmd, cwd };

    // Neither end of a fork has a terminal attached; the size is
    // corrected once something actually attaches.
    let size = tty::Size { rows: consts::DEFAULT_ROWS, cols: consts::DEFAULT_COLS };
    match lifecycle::ensure_session(ns, &target, &spawn, config, size).context("creating forked session")? {
        Ensured::JustCreated => Ok(target),
        Ensured::Existing(_) => Err(ZmxError::AlreadyExists(target).into()),
    }
}
