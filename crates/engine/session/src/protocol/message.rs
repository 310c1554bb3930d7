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

//! Strict tokenizer for worker output.
//!
//! Every line is either recognised in full or rejected with a
//! [`ProtocolError`]. Unknown keywords and tokens are errors, not noise.

use engine_common::{AnalysisError, Score};
use serde::Serialize;
use std::str::FromStr;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Empty line")]
    Empty,

    #[error("Unknown message '{0}'")]
    UnknownMessage(String),

    #[error("Unknown info token '{0}'")]
    UnknownToken(String),

    #[error("Missing value for '{0}'")]
    MissingValue(&'static str),

    #[error("Invalid value '{value}' for '{field}'")]
    InvalidValue { field: &'static str, value: String },

    #[error("Malformed '{keyword}' line: {reason}")]
    Malformed { keyword: &'static str, reason: String },
}

impl ProtocolError {
    fn malformed(keyword: &'static str, reason: impl Into<String>) -> Self {
        ProtocolError::Malformed { keyword, reason: reason.into() }
    }
}

impl From<ProtocolError> for AnalysisError {
    fn from(error: ProtocolError) -> Self {
        AnalysisError::InvalidEngineOutput(error.to_string())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IdField {
    Name(String),
    Author(String),
}

/// An option the worker declared during the handshake.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeclaredOption {
    pub name: String,
    pub kind: String,
    pub default: Option<String>,
    pub min: Option<i64>,
    pub max: Option<i64>,
    pub vars: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScoreBound {
    #[default]
    Exact,
    Lower,
    Upper,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfoScore {
    pub score: Score,
    pub bound: ScoreBound,
}

/// One `info` line. Fields the worker did not send stay `None`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InfoLine {
    pub depth: Option<u32>,
    pub seldepth: Option<u32>,
    pub multipv: Option<u32>,
    pub score: Option<InfoScore>,
    pub wdl: Option<(u32, u32, u32)>,
    pub nodes: Option<u64>,
    pub nps: Option<u64>,
    pub time_ms: Option<u64>,
    pub hashfull: Option<u32>,
    pub tbhits: Option<u64>,
    pub sbhits: Option<u64>,
    pub cpuload: Option<u32>,
    pub currmove: Option<String>,
    pub currmovenumber: Option<u32>,
    pub pv: Option<Vec<String>>,
    pub refutation: Option<Vec<String>>,
    pub currline: Option<Vec<String>>,
    pub string: Option<String>,
}

impl InfoLine {
    /// Rank of the line this info belongs to; 1 is the principal variation.
    pub fn rank(&self) -> u32 {
        self.multipv.unwrap_or(1)
    }
}

/// A recognised line of worker output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineMessage {
    Id(IdField),
    UciOk,
    ReadyOk,
    Option(DeclaredOption),
    Info(InfoLine),
    InfoString(String),
    /// `best_move` is `None` when the worker reports `(none)` or `0000`.
    BestMove { best_move: Option<String>, ponder: Option<String> },
    CopyProtection(String),
    Registration(String),
}

impl FromStr for EngineMessage {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse_line(s)
    }
}

/// Parses one line of worker output.
pub fn parse_line(line: &str) -> Result<EngineMessage, ProtocolError> {
    let mut tokens = Tokens::new(line);
    let keyword = tokens.next().ok_or(ProtocolError::Empty)?;

    match keyword {
        "id" => parse_id(&mut tokens),
        "uciok" => tokens.finish("uciok", EngineMessage::UciOk),
        "readyok" => tokens.finish("readyok", EngineMessage::ReadyOk),
        "option" => parse_option(&mut tokens),
        "info" => parse_info(&mut tokens),
        "bestmove" => parse_bestmove(&mut tokens),
        "copyprotection" => Ok(EngineMessage::CopyProtection(tokens.required_text("copyprotection")?)),
        "registration" => Ok(EngineMessage::Registration(tokens.required_text("registration")?)),
        other => Err(ProtocolError::UnknownMessage(other.to_string())),
    }
}

struct Tokens<'a> {
    items: Vec<&'a str>,
    pos: usize,
}

impl<'a> Tokens<'a> {
    fn new(line: &'a str) -> Self {
        Self {
            items: line.split_whitespace().collect(),
            pos: 0,
        }
    }

    fn next(&mut self) -> Option<&'a str> {
        let token = self.items.get(self.pos).copied();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn peek(&self) -> Option<&'a str> {
        self.items.get(self.pos).copied()
    }

    fn value(&mut self, field: &'static str) -> Result<&'a str, ProtocolError> {
        self.next().ok_or(ProtocolError::MissingValue(field))
    }

    fn number<T: FromStr>(&mut self, field: &'static str) -> Result<T, ProtocolError> {
        let raw = self.value(field)?;
        raw.parse().map_err(|_| ProtocolError::InvalidValue {
            field,
            value: raw.to_string(),
        })
    }

    fn mv(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let raw = self.value(field)?;
        if is_move_token(raw) {
            Ok(raw.to_string())
        } else {
            Err(ProtocolError::InvalidValue {
                field,
                value: raw.to_string(),
            })
        }
    }

    /// Consumes every remaining token as a move list.
    fn moves(&mut self, field: &'static str) -> Result<Vec<String>, ProtocolError> {
        let mut moves = Vec::new();
        while self.peek().is_some() {
            moves.push(self.mv(field)?);
        }
        if moves.is_empty() {
            return Err(ProtocolError::MissingValue(field));
        }
        Ok(moves)
    }

    /// Consumes tokens up to (not including) the first one in `stops`.
    fn until(&mut self, stops: &[&str]) -> Vec<&'a str> {
        let mut taken = Vec::new();
        while let Some(token) = self.peek() {
            if stops.contains(&token) {
                break;
            }
            taken.push(token);
            self.pos += 1;
        }
        taken
    }

    fn rest_text(&mut self) -> String {
        let text = self.items[self.pos..].join(" ");
        self.pos = self.items.len();
        text
    }

    fn required_text(&mut self, field: &'static str) -> Result<String, ProtocolError> {
        let text = self.rest_text();
        if text.is_empty() { Err(ProtocolError::MissingValue(field)) } else { Ok(text) }
    }

    fn finish(&self, keyword: &'static str, message: EngineMessage) -> Result<EngineMessage, ProtocolError> {
        match self.peek() {
            None => Ok(message),
            Some(extra) => Err(ProtocolError::malformed(keyword, format!("unexpected trailing token '{extra}'"))),
        }
    }
}

/// Coordinate notation: `e2e4`, `e7e8q`, or the null move `0000`.
fn is_move_token(token: &str) -> bool {
    if token == "0000" {
        return true;
    }
    let bytes = token.as_bytes();
    if bytes.len() != 4 && bytes.len() != 5 {
        return false;
    }
    let square = |file: u8, rank: u8| (b'a'..=b'h').contains(&file) && (b'1'..=b'8').contains(&rank);
    let promotion_ok = bytes.len() == 4 || matches!(bytes[4], b'q' | b'r' | b'b' | b'n');
    square(bytes[0], bytes[1]) && square(bytes[2], bytes[3]) && promotion_ok
}

fn parse_id(tokens: &mut Tokens<'_>) -> Result<EngineMessage, ProtocolError> {
    match tokens.value("id")? {
        "name" => Ok(EngineMessage::Id(IdField::Name(tokens.required_text("id name")?))),
        "author" => Ok(EngineMessage::Id(IdField::Author(tokens.required_text("id author")?))),
        other => Err(ProtocolError::malformed("id", format!("unknown field '{other}'"))),
    }
}

const OPTION_KEYWORDS: [&str; 4] = ["default", "min", "max", "var"];

fn parse_option(tokens: &mut Tokens<'_>) -> Result<EngineMessage, ProtocolError> {
    if tokens.next() != Some("name") {
        return Err(ProtocolError::malformed("option", "expected 'name'"));
    }

    let name = tokens.until(&["type"]);
    if name.is_empty() {
        return Err(ProtocolError::malformed("option", "missing option name"));
    }
    if tokens.next() != Some("type") {
        return Err(ProtocolError::malformed("option", "missing 'type'"));
    }

    let kind = tokens.value("type")?;
    if !matches!(kind, "check" | "spin" | "combo" | "button" | "string") {
        return Err(ProtocolError::InvalidValue {
            field: "type",
            value: kind.to_string(),
        });
    }

    let mut declared = DeclaredOption {
        name: name.join(" "),
        kind: kind.to_string(),
        default: None,
        min: None,
        max: None,
        vars: Vec::new(),
    };

    while let Some(keyword) = tokens.next() {
        match keyword {
            "default" => declared.default = Some(tokens.until(&OPTION_KEYWORDS).join(" ")),
            "min" => declared.min = Some(tokens.number("min")?),
            "max" => declared.max = Some(tokens.number("max")?),
            "var" => declared.vars.push(tokens.until(&OPTION_KEYWORDS).join(" ")),
            other => return Err(ProtocolError::UnknownToken(other.to_string())),
        }
    }

    Ok(EngineMessage::Option(declared))
}

fn parse_score(tokens: &mut Tokens<'_>) -> Result<InfoScore, ProtocolError> {
    let score = match tokens.value("score")? {
        "cp" => Score::Centipawns(tokens.number("score cp")?),
        "mate" => Score::Mate(tokens.number("score mate")?),
        other => {
            return Err(ProtocolError::InvalidValue {
                field: "score",
                value: other.to_string(),
            });
        }
    };

    let bound = match tokens.peek() {
        Some("lowerbound") => {
            tokens.next();
            ScoreBound::Lower
        }
        Some("upperbound") => {
            tokens.next();
            ScoreBound::Upper
        }
        _ => ScoreBound::Exact,
    };

    Ok(InfoScore { score, bound })
}

fn parse_info(tokens: &mut Tokens<'_>) -> Result<EngineMessage, ProtocolError> {
    let mut info = InfoLine::default();
    let mut fields = 0usize;

    while let Some(token) = tokens.next() {
        match token {
            "depth" => info.depth = Some(tokens.number("depth")?),
            "seldepth" => info.seldepth = Some(tokens.number("seldepth")?),
            "multipv" => info.multipv = Some(tokens.number("multipv")?),
            "score" => info.score = Some(parse_score(tokens)?),
            "wdl" => info.wdl = Some((tokens.number("wdl")?, tokens.number("wdl")?, tokens.number("wdl")?)),
            "nodes" => info.nodes = Some(tokens.number("nodes")?),
            "nps" => info.nps = Some(tokens.number("nps")?),
            "time" => info.time_ms = Some(tokens.number("time")?),
            "hashfull" => info.hashfull = Some(tokens.number("hashfull")?),
            "tbhits" => info.tbhits = Some(tokens.number("tbhits")?),
            "sbhits" => info.sbhits = Some(tokens.number("sbhits")?),
            "cpuload" => info.cpuload = Some(tokens.number("cpuload")?),
            "currmove" => info.currmove = Some(tokens.mv("currmove")?),
            "currmovenumber" => info.currmovenumber = Some(tokens.number("currmovenumber")?),
            "pv" => info.pv = Some(tokens.moves("pv")?),
            "refutation" => info.refutation = Some(tokens.moves("refutation")?),
            "currline" => info.currline = Some(tokens.moves("currline")?),
            "string" => info.string = Some(tokens.rest_text()),
            other => return Err(ProtocolError::UnknownToken(other.to_string())),
        }
        fields += 1;
    }

    match (fields, info.string.take()) {
        (0, _) => Err(ProtocolError::malformed("info", "no fields")),
        (1, Some(text)) => Ok(EngineMessage::InfoString(text)),
        (_, text) => {
            info.string = text;
            Ok(EngineMessage::Info(info))
        }
    }
}

fn parse_bestmove(tokens: &mut Tokens<'_>) -> Result<EngineMessage, ProtocolError> {
    let best_move = match tokens.value("bestmove")? {
        "(none)" | "0000" => None,
        raw if is_move_token(raw) => Some(raw.to_string()),
        raw => {
            return Err(ProtocolError::InvalidValue {
                field: "bestmove",
                value: raw.to_string(),
            });
        }
    };

    let ponder = match tokens.next() {
        None => None,
        Some("ponder") => Some(tokens.mv("ponder")?),
        Some(other) => return Err(ProtocolError::malformed("bestmove", format!("unexpected token '{other}'"))),
    };

    tokens.finish("bestmove", EngineMessage::BestMove { best_move, ponder })
}
