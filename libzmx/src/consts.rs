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

use std::time;

/// Size of the chunks read off the pty master and client sockets per wakeup.
pub const BUF_SIZE: usize = 1024 * 4;

/// How long `probe` waits for a session's daemon to answer an `Info` request
/// before declaring the socket stale.
pub const PROBE_TIMEOUT: time::Duration = time::Duration::from_millis(1000);

/// Deadline for the first response frame of a `History` request.
pub const HISTORY_TIMEOUT: time::Duration = time::Duration::from_millis(5000);

/// Time the daemon gives the shell to exit cleanly after SIGHUP before it
/// escalates to SIGKILL.
pub const SHUTDOWN_SIGHUP_GRACE: time::Duration = time::Duration::from_millis(500);

/// Default terminal scrollback, in cells, when nothing in config overrides it.
pub const DEFAULT_MAX_SCROLLBACK: usize = 10_000_000;

/// Default session group when `$ZMX_GROUP` is unset.
pub const DEFAULT_GROUP: &str = "default";

/// Fallback pty size used only when no real terminal size is available
/// (stdin isn't a tty, or the caller never attaches one at all, as with
/// `run`/`fork`). A freshly `Init`'d attach corrects this immediately.
pub const DEFAULT_ROWS: u16 = 24;
pub const DEFAULT_COLS: u16 = 80;

/// Environment variable naming the session a shell was spawned for.
pub const SESSION_ENV_VAR: &str = "ZMX_SESSION";
/// Environment variable naming the group a shell was spawned under.
pub const GROUP_ENV_VAR: &str = "ZMX_GROUP";
