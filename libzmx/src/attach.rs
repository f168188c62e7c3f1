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

//! `zmx attach NAME [cmd...]`: connect to a session, creating it first if
//! none by that name exists yet. `cmd` only matters for a fresh session;
//! attaching to one that's already running ignores it, same as the
//! daemon's own first-client-attach-gets-no-snapshot rule treats a
//! re-attach as "join what's already there."

use std::{env, os::unix::net::UnixStream, path::PathBuf};

use anyhow::{bail, Context};

use crate::{
    client,
    config::Config,
    consts,
    daemon::shell::SpawnSpec,
    lifecycle::{self, Ensured},
    namespace::Namespace,
    tty,
};

pub fn run(ns: &Namespace, config: &Config, name: &str, cmd: Option<Vec<String>>) -> anyhow::Result<i32> {
    if env::var_os(consts::SESSION_ENV_VAR).is_some() {
        bail!("already inside a zmx session (${} is set)", consts::SESSION_ENV_VAR);
    }

    let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("/"));
    let spawn = SpawnSpec { cmd, cwd };

    // The daemon is created with whatever window size we can read off
    // stdin right now; the client's first `Init` frame corrects it a
    // moment later if stdin isn't actually a terminal (or lied).
    let size = tty::Size::from_fd(0).unwrap_or(tty::Size { rows: consts::DEFAULT_ROWS, cols: consts::DEFAULT_COLS });

    let stream = match lifecycle::ensure_session(ns, name, &spawn, config, size)? {
        Ensured::Existing(conn) => conn,
        Ensured::JustCreated => {
            UnixStream::connect(ns.socket_path(name)).context("connecting to newly created session")?
        }
    };

    client::run_loop(stream)
}
