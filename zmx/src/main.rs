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

//! zmx is a session persistence tool that keeps a shell running behind a
//! pty so transient terminal clients can attach and detach from it at
//! will. See [the README](https://github.com/zmx-rs/zmx) for more info.
//! All of the actual logic lives in `libzmx`; this binary is just
//! argument parsing and dispatch.

use clap::Parser;
use libzmx::Cli;

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();
    libzmx::run(args)
}
