use std::os::unix::net::UnixListener;

use anyhow::Context;
use ntest::timeout;

mod support;

use crate::support::session::Namespace;

/// A session should carry on serving even if the first client never
/// attaches interactively at all — `run` drives one command to
/// completion and exits without leaving anything dangling.
#[test]
#[timeout(30000)]
fn run_without_attach_completes() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let status = ns.run("sh1", &["true"]).context("running detached command")?;
    assert!(status.success());

    Ok(())
}

/// A socket file left behind with nothing listening on it (e.g. the
/// daemon was `kill -9`'d) should be treated as dead rather than in use:
/// both `list` and a fresh `attach` under the same name should recover.
#[test]
#[timeout(30000)]
fn stale_socket_is_cleaned_up() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let path = ns.socket_path("sh1");
    std::fs::create_dir_all(path.parent().unwrap())?;
    {
        let _listener = UnixListener::bind(&path).context("binding stale socket")?;
        // dropped immediately: the path stays on disk, nothing answers it
    }
    assert!(path.exists());

    let out = ns.list_output()?;
    assert!(out.status.success());
    assert!(
        String::from_utf8_lossy(&out.stdout).lines().all(|l| !l.starts_with("sh1")),
        "stale socket should not be reported as a live session"
    );

    let mut attach_proc = ns.attach("sh1", None).context("attaching over stale socket")?;
    let mut line_matcher = attach_proc.line_matcher()?;
    attach_proc.run_cmd("echo revived")?;
    line_matcher.scan_until_re("revived$")?;

    Ok(())
}
