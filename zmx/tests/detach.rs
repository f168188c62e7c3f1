use anyhow::Context;
use ntest::timeout;

mod support;

use crate::support::session::Namespace;

#[test]
#[timeout(30000)]
fn detach_key_leaves_session_alive() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let mut attach_proc = ns.attach("sh1", None).context("starting attach proc")?;
    let mut line_matcher = attach_proc.line_matcher()?;

    attach_proc.run_cmd("echo hi")?;
    line_matcher.scan_until_re("hi$")?;

    attach_proc.detach_key()?;

    support::wait_until(|| Ok(attach_proc.proc.try_wait()?.is_some()))?;
    assert!(ns.lists("sh1")?, "session should still be listed after detach");

    Ok(())
}

#[test]
#[timeout(30000)]
fn explicit_detach_command() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let mut attach_proc = ns.attach("sh1", None).context("starting attach proc")?;
    let mut line_matcher = attach_proc.line_matcher()?;
    attach_proc.run_cmd("echo hi")?;
    line_matcher.scan_until_re("hi$")?;

    support::wait_until(|| Ok(ns.lists("sh1")?))?;

    let out = ns.detach("sh1")?;
    assert!(out.status.success(), "detach should succeed: {out:?}");

    support::wait_until(|| Ok(attach_proc.proc.try_wait()?.is_some()))?;
    assert!(ns.lists("sh1")?, "session should still be listed after remote detach");

    Ok(())
}

#[test]
#[timeout(30000)]
fn detach_nonexistent_session_fails() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let out = ns.detach("does-not-exist")?;
    assert!(!out.status.success());

    Ok(())
}

#[test]
#[timeout(30000)]
fn kill_removes_session() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let mut attach_proc = ns.attach("sh1", None).context("starting attach proc")?;
    let mut line_matcher = attach_proc.line_matcher()?;
    attach_proc.run_cmd("echo hi")?;
    line_matcher.scan_until_re("hi$")?;

    support::wait_until(|| Ok(ns.lists("sh1")?))?;

    let out = ns.kill("sh1")?;
    assert!(out.status.success(), "kill should succeed: {out:?}");

    support::wait_until(|| Ok(!ns.lists("sh1")?))?;

    Ok(())
}
