//! A hermetic zmx "namespace" for a single test: its own socket root and
//! log root under a throwaway directory, so concurrently running tests
//! never see each other's sessions. There's no separate long-lived
//! `zmx daemon` process to manage the way there would be for a tool with
//! an explicit supervisor binary — `attach`/`run` fork and detach their
//! own daemon the first time a session name is used, and every other
//! subcommand is a short-lived client dial against that same namespace.

use std::{
    path::PathBuf,
    process::{Command, Stdio},
};

use anyhow::Context;

use super::{attach, tmpdir, zmx_bin};

pub struct Namespace {
    _tmp_dir: tmpdir::Dir,
    socket_root: PathBuf,
    log_root: PathBuf,
}

impl Namespace {
    pub fn new() -> anyhow::Result<Namespace> {
        let tmp_dir = tmpdir::Dir::new("zmx-test").context("creating tmp dir")?;
        let socket_root = tmp_dir.path().join("sock");
        let log_root = tmp_dir.path().join("log");
        Ok(Namespace { _tmp_dir: tmp_dir, socket_root, log_root })
    }

    fn cmd(&self, subcommand: &str) -> Command {
        let mut cmd = Command::new(zmx_bin());
        cmd.env_clear()
            .env("HOME", self.socket_root.parent().unwrap())
            .env("ZMX_DIR", &self.socket_root)
            .env("ZMX_LOG_DIR", &self.log_root)
            .env("PATH", std::env::var("PATH").unwrap_or_default())
            .env("TERM", "xterm")
            .arg(subcommand);
        cmd
    }

    /// Spawn `zmx attach NAME [cmd...]` with piped stdio, returning a
    /// handle the test can type into and read output from.
    pub fn attach(&self, name: &str, cmd: Option<Vec<String>>) -> anyhow::Result<attach::Proc> {
        let mut c = self.cmd("attach");
        c.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped()).arg(name);
        if let Some(argv) = cmd {
            c.arg("--");
            c.args(argv);
        }
        let proc = c.spawn().context(format!("spawning attach proc for {name}"))?;
        Ok(attach::Proc { proc, _name: name.to_string() })
    }

    /// `zmx run NAME -- cmd...`, waiting for it to exit and returning
    /// its exit status.
    pub fn run(&self, name: &str, cmd: &[&str]) -> anyhow::Result<std::process::ExitStatus> {
        let mut c = self.cmd("run");
        c.arg(name).arg("--").args(cmd);
        c.status().context("spawning run proc")
    }

    pub fn list_output(&self) -> anyhow::Result<std::process::Output> {
        self.cmd("list").output().context("spawning list proc")
    }

    pub fn detach(&self, name: &str) -> anyhow::Result<std::process::Output> {
        self.cmd("detach").arg(name).output().context("spawning detach proc")
    }

    pub fn kill(&self, name: &str) -> anyhow::Result<std::process::Output> {
        self.cmd("kill").arg(name).output().context("spawning kill proc")
    }

    pub fn history(&self, name: &str) -> anyhow::Result<std::process::Output> {
        self.cmd("history").arg(name).output().context("spawning history proc")
    }

    pub fn socket_path(&self, name: &str) -> PathBuf {
        self.socket_root.join("default").join(name)
    }

    /// True once `zmx list` mentions `name` as one of its rows.
    pub fn lists(&self, name: &str) -> anyhow::Result<bool> {
        let out = self.list_output()?;
        let stdout = String::from_utf8_lossy(&out.stdout);
        Ok(stdout.lines().any(|l| l.starts_with(name)))
    }
}
