// This module is used from multiple different test files, each of which
// gets compiled into its own binary. Not all the binaries use all the
// stuff here.
#![allow(dead_code)]

use std::{path::PathBuf, time};

use anyhow::anyhow;

pub mod attach;
pub mod line_matcher;
pub mod session;
pub mod tmpdir;

/// Path to the `zmx` binary built for this test run. Cargo sets this
/// env var for every integration test in a package that also builds a
/// `[[bin]]`, so there's no need to shell out to `cargo build` ourselves
/// the way a workspace-external test harness would have to.
pub fn zmx_bin() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_zmx"))
}

/// Poll `pred` with exponential backoff (5ms, 10ms, ... capped at a
/// handful of seconds total) until it returns true or we give up.
pub fn wait_until<P>(mut pred: P) -> anyhow::Result<()>
where
    P: FnMut() -> anyhow::Result<bool>,
{
    let mut sleep_dur = time::Duration::from_millis(5);
    for _ in 0..14 {
        if pred()? {
            return Ok(());
        }
        std::thread::sleep(sleep_dur);
        sleep_dur *= 2;
    }
    Err(anyhow!("predicate never became true"))
}
