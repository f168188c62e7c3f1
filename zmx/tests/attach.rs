use anyhow::Context;
use ntest::timeout;

mod support;

use crate::support::session::Namespace;

#[test]
#[timeout(30000)]
fn happy_path() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let mut attach_proc = ns.attach("sh1", None).context("starting attach proc")?;

    let mut line_matcher = attach_proc.line_matcher()?;

    attach_proc.run_cmd("echo hi")?;
    line_matcher.scan_until_re("hi$")?;

    attach_proc.run_cmd("echo ping")?;
    line_matcher.match_re("ping$")?;

    Ok(())
}

#[test]
#[timeout(30000)]
fn custom_cmd() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let mut attach_proc = ns
        .attach("sh1", Some(vec!["echo".to_string(), "custom-cmd-ran".to_string()]))
        .context("starting attach proc")?;

    let mut line_matcher = attach_proc.line_matcher()?;
    line_matcher.scan_until_re("custom-cmd-ran$")?;

    Ok(())
}

#[test]
#[timeout(30000)]
fn reattach_sees_scrollback() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    {
        let mut attach_proc = ns.attach("sh1", None).context("starting first attach")?;
        let mut line_matcher = attach_proc.line_matcher()?;
        attach_proc.run_cmd("echo distinctive-marker-output")?;
        line_matcher.scan_until_re("distinctive-marker-output$")?;

        attach_proc.detach_key()?;
        // give the daemon a moment to process the detach before we drop
        // the process and kill it out from under itself
        std::thread::sleep(std::time::Duration::from_millis(200));
    }

    support::wait_until(|| Ok(ns.lists("sh1")?))?;

    let mut attach_proc = ns.attach("sh1", None).context("reattaching")?;
    let mut line_matcher = attach_proc.line_matcher()?;
    // the snapshot replayed on reattach should include prior output
    line_matcher.scan_until_re("distinctive-marker-output$")?;

    attach_proc.run_cmd("echo still-alive")?;
    line_matcher.scan_until_re("still-alive$")?;

    Ok(())
}

#[test]
#[timeout(30000)]
fn shell_exit_closes_session() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let mut attach_proc = ns.attach("sh1", None).context("starting attach proc")?;
    let mut line_matcher = attach_proc.line_matcher()?;

    attach_proc.run_cmd("echo about-to-exit")?;
    line_matcher.scan_until_re("about-to-exit$")?;

    attach_proc.run_cmd("exit")?;

    support::wait_until(|| Ok(!ns.lists("sh1")?))?;

    Ok(())
}

#[test]
#[timeout(30000)]
fn two_sessions_are_independent() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let mut sh1 = ns.attach("sh1", None).context("starting sh1")?;
    let mut sh2 = ns.attach("sh2", None).context("starting sh2")?;

    let mut lm1 = sh1.line_matcher()?;
    let mut lm2 = sh2.line_matcher()?;

    sh1.run_cmd("echo from-sh1")?;
    lm1.scan_until_re("from-sh1$")?;

    sh2.run_cmd("echo from-sh2")?;
    lm2.scan_until_re("from-sh2$")?;

    Ok(())
}
