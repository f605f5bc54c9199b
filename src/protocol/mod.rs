//  Copyright 2020 Two Sigma Investments, LP.
//
//  Licensed under the Apache License, Version 2.0 (the "License");
//  you may not use this file except in compliance with the License.
//  You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
//  Unless required by applicable law or agreed to in writing, software
//  distributed under the License is distributed on an "AS IS" BASIS,
//  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//  See the License for the specific language governing permissions and
//  limitations under the License.

// The privileged request protocol.
//
// A request is a list of lines, each line a list of tokens. On the wire, a
// request is one JSON array of arrays of strings (or null) followed by a
// newline, for example:
//   [["MOUNT","/data","/mnt/data"],["","4096",""]]
// A null, empty or missing token is the null sentinel of its position.
// The reply is one JSON object followed by a newline.
//
// There is no authentication. Whoever can connect to the socket can mount
// anything, so the socket must only be reachable by the supervisor.

mod handlers;
mod dispatch;
pub mod client;

pub use handlers::{Command, ChrootRequest, MountRequest};
pub use dispatch::{dispatch, Host, System};
#[cfg(test)]
pub use dispatch::test::FakeHost;

use std::fmt;
use serde::{Serialize, Deserialize};

/// Identifies a connection in the logs.
pub type ConnId = u64;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Default)]
#[serde(transparent)]
pub struct Request {
    lines: Vec<Vec<Option<String>>>,
}

impl Request {
    pub fn new(lines: Vec<Vec<Option<String>>>) -> Self {
        Self { lines }
    }

    /// Builds a request where empty strings stand for the null sentinel.
    pub fn from_tokens(lines: &[&[&str]]) -> Self {
        Self::new(lines.iter()
            .map(|line| line.iter()
                .map(|token| Some(token.to_string()).filter(|t| !t.is_empty()))
                .collect())
            .collect())
    }

    pub fn decode(raw: &[u8]) -> Result<Self, ProtocolError> {
        serde_json::from_slice(raw)
            .map_err(|e| ProtocolError::Malformed(e.to_string()))
    }

    pub fn encode(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn line_count(&self) -> usize {
        self.lines.len()
    }

    /// Returns the token at `pos` of `line`, or None for the null sentinel.
    pub fn token(&self, line: usize, pos: usize) -> Option<&str> {
        self.lines.get(line)
            .and_then(|l| l.get(pos))
            .and_then(|t| t.as_deref())
            .filter(|t| !t.is_empty())
    }

    pub fn verb(&self) -> Option<&str> {
        self.token(0, 0)
    }

    /// Checks the request against the exact grammar of a command.
    pub fn check_shape(&self, shape: Shape) -> Result<(), ProtocolError> {
        if self.lines.len() != shape.len() {
            return Err(ProtocolError::LineCount { expected: shape.len(), actual: self.lines.len() });
        }

        for (line_idx, (line, slots)) in self.lines.iter().zip(shape.iter()).enumerate() {
            for (pos, slot) in slots.iter().enumerate() {
                if *slot == Slot::Required && self.token(line_idx, pos).is_none() {
                    return Err(ProtocolError::MissingToken { line: line_idx, pos });
                }
            }

            // Everything past the last slot must be the null sentinel.
            if let Some(pos) = (slots.len()..line.len()).find(|&pos| self.token(line_idx, pos).is_some()) {
                return Err(ProtocolError::ExtraToken { line: line_idx, pos });
            }
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Slot {
    Required,
    Nullable,
}

/// Expected slots of each line of a request.
pub type Shape = &'static [&'static [Slot]];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    Malformed(String),
    MissingVerb,
    UnknownVerb(String),
    LineCount { expected: usize, actual: usize },
    MissingToken { line: usize, pos: usize },
    ExtraToken { line: usize, pos: usize },
    BadFlags(String),
}

impl fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Malformed(e) => write!(f, "Malformed request: {}", e),
            Self::MissingVerb => write!(f, "Missing command verb"),
            Self::UnknownVerb(verb) => write!(f, "Unknown command `{}`", verb),
            Self::LineCount { expected, actual } =>
                write!(f, "Expected {} lines, got {}", expected, actual),
            Self::MissingToken { line, pos } =>
                write!(f, "Missing token at line {} position {}", line, pos),
            Self::ExtraToken { line, pos } =>
                write!(f, "Unexpected token at line {} position {}", line, pos),
            Self::BadFlags(flags) => write!(f, "Invalid mount flags `{}`", flags),
        }
    }
}

impl std::error::Error for ProtocolError {}

/// Exactly one is sent back per request.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum Response {
    Ok,
    ProtocolError,
    InternalError { errno: i32, message: String },
}

impl Response {
    pub fn internal_error(err: nix::Error) -> Self {
        match err {
            nix::Error::Sys(errno) => Self::InternalError {
                errno: errno as i32,
                message: errno.desc().to_string(),
            },
            other => Self::InternalError {
                errno: libc::EINVAL,
                message: other.to_string(),
            },
        }
    }
}

impl fmt::Display for Response {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Ok => write!(f, "OK"),
            Self::ProtocolError => write!(f, "PROTOCOL_ERROR"),
            Self::InternalError { errno, message } =>
                write!(f, "INTERNAL_ERROR({}, {})", errno, message),
        }
    }
}
