use anyhow::Context;
use ntest::timeout;

mod support;

use crate::support::session::Namespace;

/// Reattaching should replay a snapshot of the terminal's current screen
/// state rather than the raw scrollback transcript: a `clear` run before
/// detaching should not leave earlier lines duplicated in the replay.
#[test]
#[timeout(30000)]
fn reattach_replays_cleared_screen() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    {
        let mut attach_proc = ns.attach("sh1", None).context("starting first attach")?;
        let mut line_matcher = attach_proc.line_matcher()?;

        attach_proc.run_cmd("echo will-be-cleared")?;
        line_matcher.scan_until_re("will-be-cleared$")?;

        attach_proc.run_cmd("clear")?;
        attach_proc.run_cmd("echo after-clear")?;
        line_matcher.scan_until_re("after-clear$")?;

        attach_proc.detach_key()?;
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    support::wait_until(|| Ok(ns.lists("sh1")?))?;

    let mut attach_proc = ns.attach("sh1", None).context("reattaching")?;
    let mut line_matcher = attach_proc.line_matcher()?;

    line_matcher.never_matches("will-be-cleared")?;
    line_matcher.scan_until_re("after-clear$")?;

    attach_proc.run_cmd("echo still-going")?;
    line_matcher.scan_until_re("still-going$")?;

    // exit the shell so stdout hits EOF promptly; `line_matcher` drains
    // on drop once a never-match assertion has been registered, and
    // that drain would otherwise block until the attach proc exits.
    attach_proc.run_cmd("exit")?;
    line_matcher.drain()?;

    Ok(())
}
