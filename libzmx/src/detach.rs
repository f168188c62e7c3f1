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

//! `zmx detach [NAME]` and `zmx detach-all`: ask one (or every) session's
//! daemon to drop its attached clients. The session itself, and its
//! shell, keep running either way — only `kill` tears a session down.

use std::io::Write;

use anyhow::{anyhow, Context};
use zmx_protocol::Tag;

use crate::{
    error::ZmxError,
    namespace::{self, Namespace},
};

pub fn run(ns: &Namespace, name: &str) -> anyhow::Result<()> {
    send_detach_all(ns, name)
}

pub fn run_all(ns: &Namespace) -> anyhow::Result<()> {
    let discovered = namespace::discover(ns).context("listing sessions")?;
    let mut any_live = false;
    for d in discovered {
        if d.probe.is_err() {
            continue;
        }
        any_live = true;
        if let Err(e) = send_detach_all(ns, &d.name) {
            eprintln!("zmx: detaching {:?}: {e:#}", d.name);
        }
    }
    if !any_live {
        eprintln!("zmx: no live sessions in this group");
    }
    Ok(())
}

fn send_detach_all(ns: &Namespace, name: &str) -> anyhow::Result<()> {
    let path = ns.socket_path(name);
    let conn = match namespace::probe(&path) {
        Ok(p) => p.conn,
        Err(ZmxError::StaleSocket) | Err(ZmxError::Timeout(_)) => {
            return Err(anyhow!("no such session: {name}"))
        }
        Err(e) => return Err(e.into()),
    };

    let mut encoded = Vec::new();
    zmx_protocol::encode(Tag::DetachAll, &[], &mut encoded)?;
    let mut w = &conn;
    w.write_all(&encoded).context("sending detach-all")?;
    Ok(())
}
