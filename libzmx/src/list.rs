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

//! `zmx list [--short]`: discover every session in the group, probe each
//! one, and print a line for the ones that are actually live. Stale
//! sockets are unlinked opportunistically by `namespace::discover`
//! itself, so a dead session simply doesn't show up here afterward.

use anyhow::Context;

use crate::namespace::{self, Namespace, ProbeResult};

pub fn run(ns: &Namespace, short: bool) -> anyhow::Result<()> {
    let discovered = namespace::discover(ns).context("listing sessions")?;

    let mut rows: Vec<(String, ProbeResult)> =
        discovered.into_iter().filter_map(|d| d.probe.ok().map(|p| (d.name, p))).collect();
    rows.sort_by(|a, b| a.0.cmp(&b.0));

    for (name, probe) in rows {
        if short {
            println!("{name}");
            continue;
        }
        let cmd = String::from_utf8_lossy(&probe.info.cmd);
        println!("{name}\tpid={}\tclients={}\tcmd={cmd}", probe.info.pid, probe.info.clients_len);
    }
    Ok(())
}
