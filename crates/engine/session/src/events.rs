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

use engine_common::{EvaluationUpdate, HealthStatus, SessionId};
use serde::Serialize;
use std::fmt;

/// Protocol state of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No worker, or the last handshake failed
    Uninitialized,
    /// `uci` sent, waiting for `uciok` and `readyok`
    HandshakeSent,
    Ready,
    Analyzing,
    Disposed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Uninitialized => "uninitialized",
            SessionState::HandshakeSent => "handshake_sent",
            SessionState::Ready => "ready",
            SessionState::Analyzing => "analyzing",
            SessionState::Disposed => "disposed",
        };
        f.write_str(name)
    }
}

/// Something observable happened in a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub session: SessionId,
    pub kind: SessionEventKind,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEventKind {
    StateChanged { from: SessionState, to: SessionState },
    HealthChanged { from: HealthStatus, to: HealthStatus },
    Progress { update: EvaluationUpdate },
    /// A worker line was rejected by the tokenizer
    ProtocolViolation { line: String, reason: String },
    Error { message: String },
}
