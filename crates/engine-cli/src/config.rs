// Dotlanth
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

use anyhow::{Context, Result};
use engine_pool::PoolConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "ENGINEPOOL_CONFIG";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    pub engine: EngineConfig,
    pub pool: PoolConfig,
}

/// Worker executable. Without a program the CLI needs `--simulate`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
}

impl CliConfig {
    pub fn load_from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).with_context(|| format!("reading {}", path.display()))?;
        let config: Self = toml::from_str(&content).with_context(|| format!("parsing {}", path.display()))?;
        Ok(config)
    }

    pub fn to_toml(&self) -> Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// `--config` wins over the environment, which wins over the per-user
    /// file. Without any of them the defaults apply.
    pub fn resolve(cli_config: Option<PathBuf>, env: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let config = if let Some(path) = cli_config {
            Self::load_from_file(path)?
        } else if let Some(path) = env(CONFIG_ENV) {
            Self::load_from_file(path)?
        } else {
            match default_path().filter(|path| path.exists()) {
                Some(path) => Self::load_from_file(path)?,
                None => Self::default(),
            }
        };

        config.pool.validate()?;
        Ok(config)
    }
}

/// `<config dir>/enginepool/config.toml`
pub fn default_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("enginepool").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use engine_pool::BalancingStrategy;

    fn write_temp(name: &str, content: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("enginepool-{}-{name}.toml", std::process::id()));
        std::fs::write(&path, content).unwrap();
        path
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = write_temp(
            "partial",
            r#"
[engine]
program = "/usr/bin/stockfish"

[pool]
max_pool_size = 8
strategy = "round_robin"

[pool.session]
cache_capacity = 16
"#,
        );
        let config = CliConfig::load_from_file(&path).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(config.engine.program, Some(PathBuf::from("/usr/bin/stockfish")));
        assert_eq!(config.pool.max_pool_size, 8);
        assert_eq!(config.pool.strategy, BalancingStrategy::RoundRobin);
        assert_eq!(config.pool.session.cache_capacity, 16);
        assert_eq!(config.pool.min_pool_size, PoolConfig::default().min_pool_size);
    }

    #[test]
    fn test_cli_path_beats_environment() {
        let cli = write_temp("cli", "[pool]\nmax_queue_length = 7\n");
        let env = write_temp("env", "[pool]\nmax_queue_length = 9\n");
        let env_value = env.to_string_lossy().into_owned();

        let from_cli = CliConfig::resolve(Some(cli.clone()), |_| Some(env_value.clone())).unwrap();
        let from_env = CliConfig::resolve(None, |key| (key == CONFIG_ENV).then(|| env_value.clone())).unwrap();
        std::fs::remove_file(&cli).ok();
        std::fs::remove_file(&env).ok();

        assert_eq!(from_cli.pool.max_queue_length, 7);
        assert_eq!(from_env.pool.max_queue_length, 9);
    }

    #[test]
    fn test_invalid_pool_is_rejected() {
        let path = write_temp("invalid", "[pool]\nmin_pool_size = 5\nmax_pool_size = 2\n");
        let result = CliConfig::resolve(Some(path.clone()), |_| None);
        std::fs::remove_file(&path).ok();
        assert!(result.is_err());
    }

    #[test]
    fn test_round_trips_through_toml() {
        let config = CliConfig::default();
        let text = config.to_toml().unwrap();
        let parsed: CliConfig = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(CliConfig::load_from_file("/nonexistent/enginepool.toml").is_err());
    }
}
