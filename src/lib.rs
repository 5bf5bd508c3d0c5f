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
//! A timeline based multitrack MIDI sequencer with live recording.
pub mod codec;
pub mod config;
pub mod error;
pub mod midi;
pub mod pairing;
pub mod player;
pub mod playsync;
pub mod ports;
pub mod project;
pub mod recorder;
pub mod schedule;
pub mod sequencer;
pub mod shell;
pub mod songs;
#[cfg(test)]
mod testutil;
pub mod util;
