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

use std::{env, fs, path::PathBuf};

use anyhow::Context;
use serde_derive::Deserialize;
use tracing::{info, instrument};

use crate::consts;

#[derive(Deserialize, Default, Debug, Clone)]
pub struct Config {
    /// Overrides the user's login shell.
    pub shell: Option<String>,

    /// Disables the pty's echo flag for spawned shells. You likely don't
    /// want this unless you plan to interact with the session
    /// programmatically and want to avoid parsing echoed input back out.
    pub noecho: Option<bool>,

    /// Overrides the default scrollback cap (in cells) the terminal model
    /// is fed up to before it starts discarding the oldest rows.
    pub max_scrollback: Option<usize>,
}

impl Config {
    pub fn max_scrollback(&self) -> usize {
        self.max_scrollback.unwrap_or(consts::DEFAULT_MAX_SCROLLBACK)
    }
}

/// Reads config from `$ZMX_CONFIG` if set, else
/// `{socket_root}/../config.toml`, falling back to defaults if neither
/// path exists.
#[instrument(skip_all)]
pub fn read_config(socket_root: &std::path::Path) -> anyhow::Result<Config> {
    let path = match env::var("ZMX_CONFIG") {
        Ok(p) => PathBuf::from(p),
        Err(_) => socket_root.join("..").join("config.toml"),
    };

    if !path.exists() {
        info!(path = %path.display(), "no config file present, using defaults");
        return Ok(Config::default());
    }

    info!(path = %path.display(), "reading config");
    let text = fs::read_to_string(&path).context("reading config toml")?;
    let config: Config = toml::from_str(&text).context("parsing config toml")?;
    Ok(config)
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn missing_config_file_yields_defaults() {
        let tmp = tempfile::tempdir().unwrap();
        let config = read_config(tmp.path()).unwrap();
        assert_eq!(config.max_scrollback(), consts::DEFAULT_MAX_SCROLLBACK);
        assert_eq!(config.shell, None);
    }

    #[test]
    fn explicit_max_scrollback_overrides_default() {
        let tmp = tempfile::tempdir().unwrap();
        fs::write(tmp.path().join("config.toml"), "max_scrollback = 500\nnoecho = true\n").unwrap();
        std::env::set_var("ZMX_CONFIG", tmp.path().join("config.toml"));
        let config = read_config(tmp.path()).unwrap();
        std::env::remove_var("ZMX_CONFIG");
        assert_eq!(config.max_scrollback(), 500);
        assert_eq!(config.noecho, Some(true));
    }
}
