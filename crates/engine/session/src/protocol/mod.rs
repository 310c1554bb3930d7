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

//! Line protocol spoken with engine workers (UCI dialect).
//!
//! - `command`: typed outbound commands rendered to wire lines
//! - `message`: strict tokenizer for inbound lines

pub mod command;
pub mod message;

pub use command::{EngineCommand, SearchLimit};
pub use message::{DeclaredOption, EngineMessage, IdField, InfoLine, InfoScore, ProtocolError, ScoreBound, parse_line};
