// Copyright (C) 2026 Michael Wilson <mike@mdwn.dev>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, version 3.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.
//

/// Typed error for sequencer operations so callers can tell validation failures
/// apart from port and file failures without string matching.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("port unavailable: {0}")]
    PortUnavailable(String),

    #[error("port closed: {0}")]
    PortClosed(String),

    #[error("MIDI transport error: {0}")]
    Transport(String),

    #[error("input stream closed: {0}")]
    InputClosed(String),

    #[error("sequencer is busy: {0}")]
    Busy(String),

    #[error("MIDI file error: {0}")]
    Codec(String),

    #[error("unable to parse MIDI file: {0}")]
    Smf(#[from] midly::Error),

    #[error("project error: {0}")]
    Project(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("malformed project document: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Shorthand for an invalid argument error.
    pub(crate) fn invalid(message: impl Into<String>) -> Error {
        Error::InvalidArgument(message.into())
    }
}
