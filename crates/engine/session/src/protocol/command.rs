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

use engine_common::{AnalysisOptions, PositionDescriptor};
use std::fmt;
use std::time::Duration;

/// How a search is bounded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchLimit {
    Depth(u32),
    MoveTime(Duration),
}

impl SearchLimit {
    pub fn from_options(options: &AnalysisOptions) -> Self {
        if options.is_time_bounded() { SearchLimit::MoveTime(options.max_time()) } else { SearchLimit::Depth(options.depth) }
    }
}

/// Commands sent to a worker, one per line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineCommand {
    Uci,
    SetOption { name: String, value: String },
    IsReady,
    UciNewGame,
    Position(PositionDescriptor),
    Go(SearchLimit),
    Stop,
    Quit,
}

impl EngineCommand {
    pub fn set_option(name: &str, value: impl fmt::Display) -> Self {
        EngineCommand::SetOption {
            name: name.to_string(),
            value: value.to_string(),
        }
    }
}

impl fmt::Display for EngineCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EngineCommand::Uci => write!(f, "uci"),
            EngineCommand::SetOption { name, value } => write!(f, "setoption name {name} value {value}"),
            EngineCommand::IsReady => write!(f, "isready"),
            EngineCommand::UciNewGame => write!(f, "ucinewgame"),
            EngineCommand::Position(position) => write!(f, "position {}", position.position_args()),
            EngineCommand::Go(SearchLimit::Depth(depth)) => write!(f, "go depth {depth}"),
            EngineCommand::Go(SearchLimit::MoveTime(budget)) => write!(f, "go movetime {}", budget.as_millis()),
            EngineCommand::Stop => write!(f, "stop"),
            EngineCommand::Quit => write!(f, "quit"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_rendering() {
        assert_eq!(EngineCommand::Uci.to_string(), "uci");
        assert_eq!(EngineCommand::UciNewGame.to_string(), "ucinewgame");
        assert_eq!(EngineCommand::set_option("Hash", 128).to_string(), "setoption name Hash value 128");
        assert_eq!(EngineCommand::Position(PositionDescriptor::startpos()).to_string(), "position startpos");
        assert_eq!(
            EngineCommand::Position(PositionDescriptor::new("8/8/8/8/8/8/8/K6k w - - 0 1")).to_string(),
            "position fen 8/8/8/8/8/8/8/K6k w - - 0 1"
        );
        assert_eq!(EngineCommand::Go(SearchLimit::Depth(12)).to_string(), "go depth 12");
        assert_eq!(EngineCommand::Go(SearchLimit::MoveTime(Duration::from_millis(1500))).to_string(), "go movetime 1500");
    }

    #[test]
    fn test_limit_from_options() {
        let depth = AnalysisOptions::default().with_depth(10);
        assert_eq!(SearchLimit::from_options(&depth), SearchLimit::Depth(10));

        let timed = AnalysisOptions::time_only(250);
        assert_eq!(SearchLimit::from_options(&timed), SearchLimit::MoveTime(Duration::from_millis(250)));
    }
}
