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
use std::{fs, path::Path};

use midly::{
    num::{u15, u24, u28, u4, u7},
    Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind,
};
use tracing::{debug, info, span, Level};

use crate::{
    error::{Error, Result},
    midi::{BANK_SELECT_LSB, BANK_SELECT_MSB},
    pairing::{pair_all, ticks_to_beats, Signal},
    schedule::{track_messages, Payload},
    songs::{Song, Track, DEFAULT_TEMPO, UNTITLED_TRACK},
    util::filename_display,
};

const MICROSECONDS_PER_MINUTE: f64 = 60_000_000.0;

/// The largest delta time a track event can carry.
const MAX_DELTA: u64 = 0x0FFF_FFFF;

/// The largest tempo value, in microseconds per beat.
const MAX_TEMPO_MICROS: u32 = 0xFF_FFFF;

/// The largest metrical resolution a header can carry.
const MAX_TICKS_PER_BEAT: u16 = 0x7FFF;

/// A track as read from a file, before its notes are paired.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedTrack {
    pub name: String,
    /// The channel of the first channel message.
    pub channel: u8,
    /// Every program change in file order.
    pub program_changes: Vec<u8>,
    pub bank_msb: Option<u8>,
    pub bank_lsb: Option<u8>,
    /// Note starts and ends in file order, timed in beats.
    pub note_signals: Vec<Signal>,
}

impl DecodedTrack {
    /// The instrument is the last program change in the track.
    pub fn instrument(&self) -> u8 {
        self.program_changes.last().copied().unwrap_or_default()
    }
}

/// A file's contents as the sequencer sees them.
#[derive(Debug, Clone, PartialEq)]
pub struct DecodedSong {
    pub tempo: u32,
    pub ticks_per_beat: u16,
    pub tracks: Vec<DecodedTrack>,
}

/// Reads and writes songs as bytes.
pub trait Codec {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedSong>;

    fn encode(&self, song: &Song) -> Result<Vec<u8>>;
}

/// Standard MIDI File codec.
pub struct SmfCodec {
    /// The resolution used when encoding.
    ticks_per_beat: u16,
}

impl SmfCodec {
    pub fn new(ticks_per_beat: u16) -> SmfCodec {
        SmfCodec { ticks_per_beat }
    }

    /// Gets the tempo from the first tempo change in the first track.
    fn tempo(smf: &Smf) -> u32 {
        let micros = smf.tracks.first().and_then(|track| {
            track.iter().find_map(|event| match event.kind {
                TrackEventKind::Meta(MetaMessage::Tempo(micros)) => Some(micros.as_int()),
                _ => None,
            })
        });

        match micros {
            Some(micros) if micros > 0 => {
                let bpm = (MICROSECONDS_PER_MINUTE / micros as f64).round() as u32;
                bpm.max(1)
            }
            _ => DEFAULT_TEMPO,
        }
    }

    fn decode_track(events: &[TrackEvent], ticks_per_beat: u16) -> Option<DecodedTrack> {
        let mut name = None;
        let mut channel = None;
        let mut program_changes = Vec::new();
        let mut bank_msb = None;
        let mut bank_lsb = None;
        let mut note_signals = Vec::new();

        let mut tick: u64 = 0;
        for event in events {
            tick += u64::from(event.delta.as_int());
            let beats = ticks_to_beats(tick, ticks_per_beat);

            match event.kind {
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) if name.is_none() => {
                    name = Some(String::from_utf8_lossy(raw).trim().to_string());
                }
                TrackEventKind::Midi {
                    channel: event_channel,
                    message,
                } => {
                    if channel.is_none() {
                        channel = Some(event_channel.as_int());
                    }
                    match message {
                        MidiMessage::NoteOn { key, vel } => note_signals.push(Signal::start(
                            key.as_int(),
                            vel.as_int(),
                            beats,
                        )),
                        MidiMessage::NoteOff { key, .. } => {
                            note_signals.push(Signal::end(key.as_int(), beats))
                        }
                        MidiMessage::ProgramChange { program } => {
                            program_changes.push(program.as_int())
                        }
                        MidiMessage::Controller { controller, value } => {
                            match controller.as_int() {
                                BANK_SELECT_MSB => bank_msb = Some(value.as_int()),
                                BANK_SELECT_LSB => bank_lsb = Some(value.as_int()),
                                _ => {}
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }

        if note_signals.is_empty() {
            return None;
        }

        Some(DecodedTrack {
            name: name
                .filter(|name| !name.is_empty())
                .unwrap_or_else(|| UNTITLED_TRACK.to_string()),
            channel: channel.unwrap_or_default(),
            program_changes,
            bank_msb,
            bank_lsb,
            note_signals,
        })
    }

    fn midi_message(payload: Payload) -> MidiMessage {
        match payload {
            Payload::BankSelectMsb { bank } => MidiMessage::Controller {
                controller: u7::new(BANK_SELECT_MSB),
                value: u7::new(bank),
            },
            Payload::BankSelectLsb { bank } => MidiMessage::Controller {
                controller: u7::new(BANK_SELECT_LSB),
                value: u7::new(bank),
            },
            Payload::ProgramChange { program } => MidiMessage::ProgramChange {
                program: u7::new(program),
            },
            Payload::NoteOn { key, velocity } => MidiMessage::NoteOn {
                key: u7::new(key),
                vel: u7::new(velocity),
            },
            Payload::NoteOff { key, velocity } => MidiMessage::NoteOff {
                key: u7::new(key),
                vel: u7::new(velocity),
            },
        }
    }

    fn encode_track(
        index: usize,
        track: &Track,
        ticks_per_beat: u16,
    ) -> Result<Vec<TrackEvent<'_>>> {
        let mut messages = track_messages(index, track, ticks_per_beat);
        // Each note on is directly followed by its note off. A note shorter than a tick still
        // needs its off on a later tick, or it would be read back with no length at all.
        for i in 1..messages.len() {
            let (before, after) = messages.split_at_mut(i);
            let (on, off) = (&before[i - 1], &mut after[0]);
            if matches!(on.payload, Payload::NoteOn { .. })
                && matches!(off.payload, Payload::NoteOff { .. })
            {
                off.tick = off.tick.max(on.tick + 1);
            }
        }
        // sort_by_key is stable, so a note's on stays ahead of its off.
        messages.sort_by_key(|message| message.tick);

        let mut events = vec![TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(track.name().as_bytes())),
        }];

        let mut last_tick = 0;
        for message in messages {
            let delta = message.tick - last_tick;
            if delta > MAX_DELTA {
                return Err(Error::Codec(format!(
                    "track {} has a gap of {} ticks, more than a file can hold",
                    track.name(),
                    delta
                )));
            }
            events.push(TrackEvent {
                delta: u28::new(delta as u32),
                kind: TrackEventKind::Midi {
                    channel: u4::new(message.channel),
                    message: SmfCodec::midi_message(message.payload),
                },
            });
            last_tick = message.tick;
        }

        events.push(TrackEvent {
            delta: u28::new(0),
            kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
        });
        Ok(events)
    }
}

impl Codec for SmfCodec {
    fn decode(&self, bytes: &[u8]) -> Result<DecodedSong> {
        let smf = Smf::parse(bytes)?;
        let ticks_per_beat = match smf.header.timing {
            Timing::Metrical(ticks_per_beat) => ticks_per_beat.as_int(),
            Timing::Timecode(_, _) => {
                return Err(Error::Codec(
                    "timecode based timing is not supported".to_string(),
                ))
            }
        };
        if ticks_per_beat == 0 {
            return Err(Error::Codec("ticks per beat must be positive".to_string()));
        }

        let tempo = SmfCodec::tempo(&smf);
        let tracks: Vec<DecodedTrack> = smf
            .tracks
            .iter()
            .filter_map(|events| SmfCodec::decode_track(events, ticks_per_beat))
            .collect();

        debug!(
            tempo,
            ticks_per_beat,
            file_tracks = smf.tracks.len(),
            note_tracks = tracks.len(),
            "Decoded MIDI file."
        );
        Ok(DecodedSong {
            tempo,
            ticks_per_beat,
            tracks,
        })
    }

    fn encode(&self, song: &Song) -> Result<Vec<u8>> {
        if self.ticks_per_beat == 0 || self.ticks_per_beat > MAX_TICKS_PER_BEAT {
            return Err(Error::invalid(format!(
                "unable to encode with {} ticks per beat",
                self.ticks_per_beat
            )));
        }

        let mut smf = Smf::new(Header::new(
            Format::Parallel,
            Timing::Metrical(u15::new(self.ticks_per_beat)),
        ));

        let micros = (MICROSECONDS_PER_MINUTE / song.tempo() as f64).round() as u32;
        smf.tracks.push(vec![
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::new(
                    micros.min(MAX_TEMPO_MICROS),
                ))),
            },
            TrackEvent {
                delta: u28::new(0),
                kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
            },
        ]);
        for (index, track) in song.tracks().iter().enumerate() {
            smf.tracks
                .push(SmfCodec::encode_track(index, track, self.ticks_per_beat)?);
        }

        let mut buf = Vec::new();
        smf.write_std(&mut buf)?;
        Ok(buf)
    }
}

/// Builds a song out of a decoded file, pairing each track's notes.
pub fn import(decoded: &DecodedSong, name: &str) -> Result<Song> {
    let mut song = Song::new(name, decoded.tempo)?;
    for decoded_track in decoded.tracks.iter() {
        let mut track = Track::with_instrument(&decoded_track.name, decoded_track.instrument())?;
        track.set_channel(decoded_track.channel)?;
        track.set_bank(decoded_track.bank_msb, decoded_track.bank_lsb)?;
        for event in pair_all(decoded_track.note_signals.iter().copied()) {
            track.add_event(event);
        }
        song.add_track(track);
    }
    Ok(song)
}

/// Loads a song from a MIDI file. The song is named after the file.
pub fn load_file(codec: &dyn Codec, path: &Path) -> Result<Song> {
    let span = span!(Level::INFO, "load midi file");
    let _enter = span.enter();

    let bytes = fs::read(path)?;
    let song = import(&codec.decode(&bytes)?, filename_display(path))?;
    info!(
        file = filename_display(path),
        tracks = song.tracks().len(),
        tempo = song.tempo(),
        "Loaded MIDI file."
    );
    Ok(song)
}

/// Saves a song as a MIDI file.
pub fn save_file(codec: &dyn Codec, song: &Song, path: &Path) -> Result<()> {
    let span = span!(Level::INFO, "save midi file");
    let _enter = span.enter();

    fs::write(path, codec.encode(song)?)?;
    info!(
        file = filename_display(path),
        tracks = song.tracks().len(),
        "Saved MIDI file."
    );
    Ok(())
}
