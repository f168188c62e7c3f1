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

//! Filesystem-bound session namespace: one directory per group, one
//! Unix domain socket per live session inside it. A socket file existing
//! is necessary but not sufficient for liveness, so every caller that
//! cares has to go through [`probe`] rather than just `stat`-ing the path.

use std::{
    env, fs, io,
    os::unix::{fs::FileTypeExt, net::UnixStream},
    path::{Path, PathBuf},
    time::Instant,
};

use tracing::debug;
use zmx_protocol::{Pull, Tag};

use crate::{consts, error::ZmxError};

/// Percent-encode a session name for use as a filesystem component.
/// Only `/`, `\`, `%`, and NUL are escaped; everything else, including
/// other non-ASCII UTF-8 bytes, passes through unchanged so names stay
/// readable in `ls` output.
pub fn encode_name(name: &str) -> String {
    let mut out = Vec::with_capacity(name.len());
    for b in name.bytes() {
        match b {
            b'/' | b'\\' | b'%' | 0u8 => out.extend_from_slice(format!("%{:02X}", b).as_bytes()),
            _ => out.push(b),
        }
    }
    // Every byte we didn't escape is copied verbatim from `name`, which is
    // valid UTF-8, and every byte we did escape is itself plain ASCII, so
    // the concatenation can't produce an invalid UTF-8 sequence.
    String::from_utf8(out).expect("encode_name preserves utf8 validity")
}

/// Reverse of [`encode_name`].
pub fn decode_name(encoded: &str) -> Result<String, ZmxError> {
    let bytes = encoded.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = bytes
                .get(i + 1..i + 3)
                .and_then(|h| std::str::from_utf8(h).ok())
                .and_then(|h| u8::from_str_radix(h, 16).ok());
            match hex {
                Some(b) => {
                    out.push(b);
                    i += 3;
                }
                None => {
                    return Err(ZmxError::Unrecoverable(format!(
                        "malformed percent-escape in session name {encoded:?}"
                    )))
                }
            }
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out)
        .map_err(|e| ZmxError::Unrecoverable(format!("non-utf8 session name: {e}")))
}

/// The two filesystem roots every session is anchored under, plus the
/// group subdividing them.
#[derive(Debug, Clone)]
pub struct Namespace {
    pub socket_root: PathBuf,
    pub log_root: PathBuf,
    pub group: String,
}

impl Namespace {
    pub fn new(socket_root: PathBuf, log_root: PathBuf, group: impl Into<String>) -> Namespace {
        Namespace { socket_root, log_root, group: group.into() }
    }

    /// Create `{socket_root}/{group}` and `{log_root}/{group}` if absent.
    pub fn ensure_dirs(&self) -> io::Result<()> {
        fs::create_dir_all(self.socket_root.join(&self.group))?;
        fs::create_dir_all(self.log_root.join(&self.group))?;
        Ok(())
    }

    pub fn socket_path(&self, name: &str) -> PathBuf {
        self.socket_root.join(&self.group).join(encode_name(name))
    }

    pub fn log_path(&self, name: &str) -> PathBuf {
        let mut p = self.log_root.join(&self.group).join(encode_name(name));
        p.set_extension("log");
        p
    }

    /// The daemon-wide log for messages logged before a session name is
    /// known (directory creation failures, listener bind failures).
    pub fn daemon_log_path(&self) -> PathBuf {
        self.log_root.join("zmx.log")
    }

    /// Resolve the namespace every CLI entry point runs under:
    /// `$ZMX_DIR`/`$XDG_STATE_HOME`/`~/.local/state/zmx` for sockets,
    /// the log equivalent under `$ZMX_LOG_DIR`/`$XDG_STATE_HOME`/
    /// `~/.local/state/zmx/log`, and `$ZMX_GROUP` (default `"default"`)
    /// for the group.
    pub fn from_env() -> Result<Namespace, ZmxError> {
        let state_home = env::var_os("XDG_STATE_HOME")
            .map(PathBuf::from)
            .or_else(|| home_dir().map(|h| h.join(".local").join("state")));

        let socket_root = match env::var_os("ZMX_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => state_home
                .clone()
                .map(|h| h.join("zmx"))
                .ok_or_else(|| ZmxError::Unrecoverable("no home directory to anchor zmx's socket root; set $ZMX_DIR".into()))?,
        };

        let log_root = match env::var_os("ZMX_LOG_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => state_home
                .map(|h| h.join("zmx").join("log"))
                .ok_or_else(|| ZmxError::Unrecoverable("no home directory to anchor zmx's log root; set $ZMX_LOG_DIR".into()))?,
        };

        let group = match env::var(consts::GROUP_ENV_VAR) {
            Ok(g) => validate_group(&g)?,
            Err(_) => consts::DEFAULT_GROUP.to_string(),
        };

        Ok(Namespace::new(socket_root, log_root, group))
    }
}

fn home_dir() -> Option<PathBuf> {
    env::var_os("HOME").map(PathBuf::from)
}

fn validate_group(group: &str) -> Result<String, ZmxError> {
    if group.is_empty() || group.contains('/') || group.contains("..") {
        return Err(ZmxError::Unrecoverable(format!(
            "invalid {}: {group:?}",
            consts::GROUP_ENV_VAR
        )));
    }
    Ok(group.to_string())
}

/// What a successful [`probe`] learns about a live session, plus the
/// still-open connection so the caller can reuse it instead of
/// reconnecting.
pub struct ProbeResult {
    pub info: zmx_protocol::InfoResponse,
    pub conn: UnixStream,
}

/// Connect to `path` with a short timeout, send an empty `Info` request,
/// and wait for the response. Any refusal, timeout, or malformed reply
/// is reported as [`ZmxError::StaleSocket`] and the caller should unlink
/// the path; this function never unlinks on its own since some callers
/// (list) want to report a transient failure without deleting state.
pub fn probe(path: &Path) -> Result<ProbeResult, ZmxError> {
    let deadline = Instant::now() + consts::PROBE_TIMEOUT;

    let conn = UnixStream::connect(path).map_err(|e| {
        debug!(path = %path.display(), err = %e, "probe connect failed");
        ZmxError::StaleSocket
    })?;
    conn.set_read_timeout(Some(consts::PROBE_TIMEOUT)).map_err(ZmxError::IoFatal)?;
    conn.set_write_timeout(Some(consts::PROBE_TIMEOUT)).map_err(ZmxError::IoFatal)?;

    let mut encoded = Vec::new();
    zmx_protocol::encode(Tag::Info, &[], &mut encoded).map_err(ZmxError::Malformed)?;
    {
        use std::io::Write;
        let mut w = &conn;
        w.write_all(&encoded).map_err(|_| ZmxError::StaleSocket)?;
    }

    let mut buf = Vec::new();
    let mut tmp = [0u8; 512];
    loop {
        if Instant::now() >= deadline {
            return Err(ZmxError::Timeout("probe"));
        }
        match zmx_protocol::next(&buf) {
            Ok(Pull::Frame { frame, consumed }) => {
                if frame.tag != Tag::Info {
                    return Err(ZmxError::StaleSocket);
                }
                let info = zmx_protocol::InfoResponse::decode(frame.payload)
                    .map_err(|_| ZmxError::StaleSocket)?;
                buf.drain(0..consumed);
                return Ok(ProbeResult { info, conn });
            }
            Ok(Pull::NeedMore) => {}
            Err(_) => return Err(ZmxError::StaleSocket),
        }

        use std::io::Read;
        let mut r = &conn;
        match r.read(&mut tmp) {
            Ok(0) => return Err(ZmxError::StaleSocket),
            Ok(n) => buf.extend_from_slice(&tmp[..n]),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => continue,
            Err(_) => return Err(ZmxError::StaleSocket),
        }
    }
}

/// One entry discovered while walking a group directory: the decoded
/// session name and, if the probe succeeded, its attributes.
pub struct Discovered {
    pub name: String,
    pub probe: Result<ProbeResult, ZmxError>,
}

/// Iterate every socket-typed entry under `{socket_root}/{group}`,
/// probing each. Entries that fail the probe are unlinked opportunistically
/// (the probe itself never unlinks) and still reported back to the caller
/// so commands like `list` can note the cleanup.
pub fn discover(ns: &Namespace) -> io::Result<Vec<Discovered>> {
    let dir = ns.socket_root.join(&ns.group);
    let entries = match fs::read_dir(&dir) {
        Ok(e) => e,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut out = Vec::new();
    for entry in entries {
        let entry = entry?;
        let path = entry.path();
        let file_type = entry.file_type()?;
        if !file_type.is_socket() {
            continue;
        }
        let Some(encoded) = path.file_name().and_then(|f| f.to_str()) else { continue };
        let name = match decode_name(encoded) {
            Ok(n) => n,
            Err(_) => continue,
        };

        let probe_result = probe(&path);
        if probe_result.is_err() {
            let _ = fs::remove_file(&path);
        }
        out.push(Discovered { name, probe: probe_result });
    }
    Ok(out)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn round_trips_plain_names() {
        for name in ["plain", "with spaces", "unicode-\u{1F600}"] {
            assert_eq!(decode_name(&encode_name(name)).unwrap(), name);
        }
    }

    #[test]
    fn escapes_only_reserved_bytes() {
        let encoded = encode_name("a/b\\c%d\0e");
        assert_eq!(encoded, "a%2Fb%5Cc%25d%00e");
        assert_eq!(decode_name(&encoded).unwrap(), "a/b\\c%d\0e");
    }

    #[test]
    fn rejects_malformed_escape() {
        assert!(decode_name("a%zz").is_err());
    }

    #[test]
    fn socket_and_log_paths_are_scoped_by_group() {
        let ns = Namespace::new("/tmp/sock".into(), "/tmp/log".into(), "mygroup");
        assert_eq!(ns.socket_path("foo"), PathBuf::from("/tmp/sock/mygroup/foo"));
        assert_eq!(ns.log_path("foo"), PathBuf::from("/tmp/log/mygroup/foo.log"));
    }

    #[test]
    fn discover_on_missing_group_dir_is_empty_not_error() {
        let tmp = tempfile::tempdir().unwrap();
        let ns = Namespace::new(tmp.path().join("sock"), tmp.path().join("log"), "nogroup");
        let found = discover(&ns).unwrap();
        assert!(found.is_empty());
    }

    #[test]
    fn discover_unlinks_a_stale_socket_with_nothing_listening() {
        let tmp = tempfile::tempdir().unwrap();
        let ns = Namespace::new(tmp.path().join("sock"), tmp.path().join("log"), "g");
        ns.ensure_dirs().unwrap();
        let path = ns.socket_path("dead");
        // Bind and immediately drop: the socket file stays behind but
        // nothing is listening on it anymore.
        {
            let _listener = std::os::unix::net::UnixListener::bind(&path).unwrap();
        }
        assert!(path.exists());
        let found = discover(&ns).unwrap();
        assert_eq!(found.len(), 1);
        assert!(found[0].probe.is_err());
        assert!(!path.exists());
    }
}
