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

use std::env;

use anyhow::anyhow;
use clap::{Parser, Subcommand};
use tracing::error;

pub mod attach;
pub mod buf;
pub mod client;
pub mod config;
pub mod consts;
pub mod daemon;
pub mod detach;
pub mod error;
pub mod fork;
pub mod history;
pub mod kill;
pub mod lifecycle;
pub mod list;
pub mod logging;
pub mod namespace;
pub mod run;
pub mod term;
pub mod tty;

/// Command line arguments for the `zmx` binary. Kept here rather than in
/// the thin binary crate so alternate front ends can reuse the same
/// parsing and dispatch.
#[derive(Parser, Debug)]
#[clap(author, about)]
pub struct Cli {
    #[clap(short, long, action, help = "Print more logs to stderr, may be given multiple times")]
    pub verbose: u8,

    #[clap(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    #[clap(about = "Create or attach to a named session")]
    Attach {
        #[clap(help = "The name of the session to create or attach to")]
        name: String,
        #[clap(help = "A command to run instead of the user's login shell, only used if the session is newly created")]
        cmd: Vec<String>,
    },

    #[clap(about = "Inject a command into a session without attaching, creating it first if needed")]
    Run {
        #[clap(help = "The name of the session to create or inject into")]
        name: String,
        #[clap(help = "The command line to type into the session; read from stdin if omitted and stdin isn't a tty")]
        cmd: Vec<String>,
    },

    #[clap(about = "Detach every client attached to one session")]
    Detach {
        #[clap(help = "Session to detach; defaults to $ZMX_SESSION")]
        name: Option<String>,
    },

    #[clap(about = "Detach every client attached to every session in the group")]
    DetachAll,

    #[clap(about = "List the live sessions in the group")]
    List {
        #[clap(short, long, help = "Print only session names, one per line")]
        short: bool,
    },

    #[clap(about = "Tear down a session and kill its shell")]
    Kill {
        #[clap(help = "Session to kill")]
        name: String,
    },

    #[clap(about = "Print a session's scrollback")]
    History {
        #[clap(help = "Session to read")]
        name: String,
        #[clap(long, help = "Emit the vt-formatted byte stream instead of plain text")]
        vt: bool,
        #[clap(long, help = "Emit an html rendering instead of plain text", conflicts_with = "vt")]
        html: bool,
    },

    #[clap(about = "Create a new session that starts out running the same command and cwd as an existing one")]
    Fork {
        #[clap(help = "Session to copy; defaults to $ZMX_SESSION")]
        source: Option<String>,
        #[clap(long, help = "Name for the new session; defaults to \"{source}-N\" for the smallest free N")]
        name: Option<String>,
    },
}

/// Parse and run `args` to completion, printing any error to stderr and
/// exiting non-zero rather than propagating it — this is the entry point
/// the `zmx` binary's `main` calls directly.
pub fn run(args: Cli) -> anyhow::Result<()> {
    logging::init_cli(args.verbose);

    let ns = namespace::Namespace::from_env()?;
    ns.ensure_dirs().map_err(|e| anyhow!("preparing {:?}: {e}", ns.socket_root))?;
    let config = config::read_config(&ns.socket_root)?;

    let res: anyhow::Result<()> = match args.command {
        Commands::Attach { name, cmd } => {
            let cmd = if cmd.is_empty() { None } else { Some(cmd) };
            attach::run(&ns, &config, &name, cmd).map(|_| ())
        }
        Commands::Run { name, cmd } => run::run(&ns, &config, &name, cmd),
        Commands::Detach { name } => {
            let name = resolve_session(name)?;
            detach::run(&ns, &name)
        }
        Commands::DetachAll => detach::run_all(&ns),
        Commands::List { short } => list::run(&ns, short),
        Commands::Kill { name } => kill::run(&ns, &name),
        Commands::History { name, vt, html } => {
            let format = if vt {
                zmx_protocol::HistoryFormat::Vt
            } else if html {
                zmx_protocol::HistoryFormat::Html
            } else {
                zmx_protocol::HistoryFormat::Plain
            };
            history::run(&ns, &name, format)
        }
        Commands::Fork { source, name } => {
            let source = resolve_session(source)?;
            fork::run(&ns, &config, &source, name).map(|_| ())
        }
    };

    if let Err(err) = res {
        error!("{:?}", err);
        std::process::exit(1);
    }
    Ok(())
}

/// Resolve an optional session-name argument against `$ZMX_SESSION`,
/// the way every command that "defaults to the current session" does.
fn resolve_session(name: Option<String>) -> anyhow::Result<String> {
    match name {
        Some(n) => Ok(n),
        None => env::var(consts::SESSION_ENV_VAR)
            .map_err(|_| anyhow!("no session given and ${} is not set", consts::SESSION_ENV_VAR)),
    }
}
