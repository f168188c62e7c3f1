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

//! SIGTERM handling for the daemon. Unlike most of the rest of the stack
//! this carries no background thread: the handler just flips an atomic
//! flag, and [`Server::run`](crate::daemon::server::Server::run) samples
//! it at the top of every poll iteration, consistent with the "no thread
//! does anything but the single event loop" rule the rest of the daemon
//! follows.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

use anyhow::Context;

#[derive(Clone)]
pub struct TermFlag(Arc<AtomicBool>);

impl TermFlag {
    /// Register the SIGTERM handler. Must be called once per process,
    /// before the event loop starts.
    pub fn install() -> anyhow::Result<TermFlag> {
        let flag = Arc::new(AtomicBool::new(false));
        signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(&flag))
            .context("registering SIGTERM handler")?;
        Ok(TermFlag(flag))
    }

    /// Sample and clear the flag. Acquire-release ordering is enough here:
    /// there is exactly one reader (the event loop) and the handler only
    /// ever sets the flag to `true`, never reads it back.
    pub fn take(&self) -> bool {
        self.0.swap(false, Ordering::AcqRel)
    }
}
