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
use std::{collections::BTreeSet, time::Duration};

use crate::{
    midi::{Message, BANK_SELECT_LSB, BANK_SELECT_MSB},
    ports::DestinationId,
    songs::{Song, Track},
};

/// The contents of a scheduled message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Payload {
    BankSelectMsb { bank: u8 },
    BankSelectLsb { bank: u8 },
    ProgramChange { program: u8 },
    NoteOn { key: u8, velocity: u8 },
    NoteOff { key: u8, velocity: u8 },
}

/// A message placed at an absolute tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ScheduledMessage {
    pub tick: u64,
    pub track: usize,
    pub channel: u8,
    pub payload: Payload,
}

impl ScheduledMessage {
    /// Converts the scheduled message into a transport message.
    pub fn to_message(&self) -> Message {
        let channel = self.channel;
        match self.payload {
            Payload::BankSelectMsb { bank } => Message::ControlChange {
                channel,
                controller: BANK_SELECT_MSB,
                value: bank,
            },
            Payload::BankSelectLsb { bank } => Message::ControlChange {
                channel,
                controller: BANK_SELECT_LSB,
                value: bank,
            },
            Payload::ProgramChange { program } => Message::ProgramChange { channel, program },
            Payload::NoteOn { key, velocity } => Message::NoteOn {
                channel,
                key,
                velocity,
            },
            Payload::NoteOff { key, velocity } => Message::NoteOff {
                channel,
                key,
                velocity,
            },
        }
    }
}

/// Converts beats to ticks, rounding toward zero.
pub fn beats_to_ticks(beats: f64, ticks_per_beat: u16) -> u64 {
    (beats * ticks_per_beat as f64) as u64
}

/// Generates a track's messages in the order they should be delivered when they share a
/// tick: bank select MSB, bank select LSB and program change at tick 0, then a note on and a
/// note off for every note. The result isn't sorted by tick.
pub fn track_messages(index: usize, track: &Track, ticks_per_beat: u16) -> Vec<ScheduledMessage> {
    let channel = track.channel();
    let at_start = |payload| ScheduledMessage {
        tick: 0,
        track: index,
        channel,
        payload,
    };

    let mut messages = Vec::new();
    if let Some(bank) = track.bank_msb() {
        messages.push(at_start(Payload::BankSelectMsb { bank }));
    }
    if let Some(bank) = track.bank_lsb() {
        messages.push(at_start(Payload::BankSelectLsb { bank }));
    }
    messages.push(at_start(Payload::ProgramChange {
        program: track.instrument(),
    }));

    for event in track.events() {
        for note in event.notes() {
            messages.push(ScheduledMessage {
                tick: beats_to_ticks(event.start_time(), ticks_per_beat),
                track: index,
                channel,
                payload: Payload::NoteOn {
                    key: note.pitch(),
                    velocity: note.velocity(),
                },
            });
            messages.push(ScheduledMessage {
                tick: beats_to_ticks(event.start_time() + note.duration(), ticks_per_beat),
                track: index,
                channel,
                payload: Payload::NoteOff {
                    key: note.pitch(),
                    velocity: note.velocity(),
                },
            });
        }
    }

    messages
}

/// Every message of a song's playable tracks merged into a single delivery order, along with
/// everything needed to pace and route it. Built once per playback run.
#[derive(Debug, Clone)]
pub struct Schedule {
    messages: Vec<ScheduledMessage>,
    /// Track index to destination, captured when the schedule was built.
    routes: Vec<Option<DestinationId>>,
    tempo: u32,
    ticks_per_beat: u16,
}

impl Schedule {
    /// Builds the schedule for every track that has a destination. Messages are ordered by
    /// tick; messages sharing a tick keep the order they were generated in, so lower track
    /// indices go first and a track's program change precedes its notes.
    pub fn build(song: &Song, ticks_per_beat: u16) -> Schedule {
        let mut messages: Vec<ScheduledMessage> = song
            .tracks()
            .iter()
            .enumerate()
            .filter(|(_, track)| track.output().is_some())
            .flat_map(|(index, track)| track_messages(index, track, ticks_per_beat))
            .collect();
        // sort_by_key is stable.
        messages.sort_by_key(|message| message.tick);

        Schedule {
            messages,
            routes: song
                .tracks()
                .iter()
                .map(|track| track.output().cloned())
                .collect(),
            tempo: song.tempo(),
            ticks_per_beat,
        }
    }

    pub fn messages(&self) -> &[ScheduledMessage] {
        &self.messages
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    /// The destination of the given track.
    pub fn route(&self, track: usize) -> Option<&DestinationId> {
        self.routes.get(track).and_then(Option::as_ref)
    }

    /// The distinct destinations referenced by the playable tracks.
    pub fn destinations(&self) -> BTreeSet<&DestinationId> {
        self.routes.iter().flatten().collect()
    }

    /// The wall clock length of the given number of ticks at the captured tempo.
    pub fn ticks_to_duration(&self, ticks: u64) -> Duration {
        let ticks_per_minute = self.tempo as f64 * self.ticks_per_beat as f64;
        Duration::from_secs_f64(ticks as f64 * 60.0 / ticks_per_minute)
    }

    /// The wall clock length of the whole schedule.
    pub fn duration(&self) -> Duration {
        self.messages
            .last()
            .map(|message| self.ticks_to_duration(message.tick))
            .unwrap_or_default()
    }
}
