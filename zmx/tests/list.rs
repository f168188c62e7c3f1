use anyhow::Context;
use ntest::timeout;

mod support;

use crate::support::session::Namespace;

#[test]
#[timeout(30000)]
fn empty_namespace_lists_nothing() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let out = ns.list_output()?;
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).trim().is_empty());
    Ok(())
}

#[test]
#[timeout(30000)]
fn lists_attached_session() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let _attach_proc = ns.attach("sh1", None).context("starting attach proc")?;

    support::wait_until(|| Ok(ns.lists("sh1")?))?;

    Ok(())
}

#[test]
#[timeout(30000)]
fn lists_multiple_sessions_sorted() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let _b = ns.attach("bbb", None).context("starting bbb")?;
    let _a = ns.attach("aaa", None).context("starting aaa")?;

    support::wait_until(|| Ok(ns.lists("aaa")? && ns.lists("bbb")?))?;

    let out = ns.list_output()?;
    let stdout = String::from_utf8_lossy(&out.stdout);
    let names: Vec<&str> = stdout.lines().filter_map(|l| l.split_whitespace().next()).collect();
    let pos_a = names.iter().position(|n| *n == "aaa").context("aaa missing from list")?;
    let pos_b = names.iter().position(|n| *n == "bbb").context("bbb missing from list")?;
    assert!(pos_a < pos_b, "expected aaa to sort before bbb in list output");

    Ok(())
}

#[test]
#[timeout(30000)]
fn session_drops_off_list_after_exit() -> anyhow::Result<()> {
    let ns = Namespace::new()?;
    let mut attach_proc = ns.attach("sh1", None).context("starting attach proc")?;
    let mut line_matcher = attach_proc.line_matcher()?;

    support::wait_until(|| Ok(ns.lists("sh1")?))?;

    attach_proc.run_cmd("exit")?;
    line_matcher.drain().ok();

    support::wait_until(|| Ok(!ns.lists("sh1")?))?;

    Ok(())
}
