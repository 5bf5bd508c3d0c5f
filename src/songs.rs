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
use std::fmt;

use crate::error::{Error, Result};
use crate::ports::DestinationId;

/// The largest value a 7 bit MIDI data byte can hold.
pub const MAX_DATA_VALUE: u8 = 127;

/// The largest MIDI channel number (channels are zero based).
pub const MAX_CHANNEL: u8 = 15;

/// The tempo used for new songs.
pub const DEFAULT_TEMPO: u32 = 120;

/// The name given to tracks that don't have one.
pub const UNTITLED_TRACK: &str = "Untitled Track";

fn check_data_value(field: &str, value: u8) -> Result<()> {
    if value > MAX_DATA_VALUE {
        return Err(Error::invalid(format!(
            "{} must be between 0 and {}, got {}",
            field, MAX_DATA_VALUE, value
        )));
    }
    Ok(())
}

/// A single musical note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Note {
    pitch: u8,
    velocity: u8,
    /// Duration in beats.
    duration: f64,
}

impl Note {
    /// Creates a new note. Fails if the pitch or velocity is out of the MIDI range or if the
    /// duration isn't a positive number of beats.
    pub fn new(pitch: u8, velocity: u8, duration: f64) -> Result<Note> {
        check_data_value("pitch", pitch)?;
        check_data_value("velocity", velocity)?;
        if !duration.is_finite() || duration <= 0.0 {
            return Err(Error::invalid(format!(
                "duration must be positive, got {}",
                duration
            )));
        }

        Ok(Note {
            pitch,
            velocity,
            duration,
        })
    }

    pub fn pitch(&self) -> u8 {
        self.pitch
    }

    pub fn velocity(&self) -> u8 {
        self.velocity
    }

    /// The duration of the note in beats.
    pub fn duration(&self) -> f64 {
        self.duration
    }
}

/// One or more notes that start at the same time.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    notes: Vec<Note>,
    /// Start time in beats from the beginning of the track.
    start_time: f64,
}

impl Event {
    /// Creates a new event. A chord can be expressed by passing more than one note.
    pub fn new(notes: Vec<Note>, start_time: f64) -> Result<Event> {
        if notes.is_empty() {
            return Err(Error::invalid("an event needs at least one note"));
        }
        if !start_time.is_finite() || start_time < 0.0 {
            return Err(Error::invalid(format!(
                "start time cannot be negative, got {}",
                start_time
            )));
        }

        Ok(Event { notes, start_time })
    }

    /// Creates an event holding a single note.
    pub fn single(note: Note, start_time: f64) -> Result<Event> {
        Event::new(vec![note], start_time)
    }

    pub fn notes(&self) -> &[Note] {
        &self.notes
    }

    pub fn start_time(&self) -> f64 {
        self.start_time
    }

    /// The time in beats at which the longest note of this event ends.
    pub fn end_time(&self) -> f64 {
        self.notes
            .iter()
            .map(|note| self.start_time + note.duration)
            .fold(self.start_time, f64::max)
    }
}

/// A sequence of events routed to a single MIDI channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Track {
    name: String,
    /// Events sorted by start time.
    events: Vec<Event>,
    /// The MIDI program number.
    instrument: u8,
    channel: u8,
    bank_msb: Option<u8>,
    bank_lsb: Option<u8>,
    /// Where this track is played. Tracks without an output are not played.
    output: Option<DestinationId>,
}

impl Track {
    /// Creates a new empty track on channel 0 using program 0.
    pub fn new(name: &str) -> Track {
        Track {
            name: name.to_string(),
            events: Vec::new(),
            instrument: 0,
            channel: 0,
            bank_msb: None,
            bank_lsb: None,
            output: None,
        }
    }

    /// Creates a new empty track with the given instrument.
    pub fn with_instrument(name: &str, instrument: u8) -> Result<Track> {
        let mut track = Track::new(name);
        track.set_program(instrument)?;
        Ok(track)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn events(&self) -> &[Event] {
        &self.events
    }

    pub fn instrument(&self) -> u8 {
        self.instrument
    }

    pub fn channel(&self) -> u8 {
        self.channel
    }

    pub fn bank_msb(&self) -> Option<u8> {
        self.bank_msb
    }

    pub fn bank_lsb(&self) -> Option<u8> {
        self.bank_lsb
    }

    pub fn output(&self) -> Option<&DestinationId> {
        self.output.as_ref()
    }

    /// Adds an event, keeping the events sorted by start time. Events with equal start times
    /// keep the order in which they were added.
    pub fn add_event(&mut self, event: Event) {
        let position = self
            .events
            .partition_point(|existing| existing.start_time <= event.start_time);
        self.events.insert(position, event);
    }

    /// Sets the MIDI channel (0-15).
    pub fn set_channel(&mut self, channel: u8) -> Result<()> {
        if channel > MAX_CHANNEL {
            return Err(Error::invalid(format!(
                "channel must be between 0 and {}, got {}",
                MAX_CHANNEL, channel
            )));
        }
        self.channel = channel;
        Ok(())
    }

    /// Sets the MIDI program (0-127).
    pub fn set_program(&mut self, program: u8) -> Result<()> {
        check_data_value("program", program)?;
        self.instrument = program;
        Ok(())
    }

    /// Sets the bank select values. Both are validated before either is applied.
    pub fn set_bank(&mut self, msb: Option<u8>, lsb: Option<u8>) -> Result<()> {
        if let Some(msb) = msb {
            check_data_value("bank MSB", msb)?;
        }
        if let Some(lsb) = lsb {
            check_data_value("bank LSB", lsb)?;
        }
        self.bank_msb = msb;
        self.bank_lsb = lsb;
        Ok(())
    }

    /// Routes the track to the given destination, or unroutes it.
    pub fn set_output(&mut self, output: Option<DestinationId>) {
        self.output = output;
    }

    /// The time in beats at which the last sounding note of the track ends.
    pub fn end_time(&self) -> f64 {
        self.events
            .iter()
            .map(Event::end_time)
            .fold(0.0, f64::max)
    }
}

/// A song is the root of the timeline: it owns every track and event.
#[derive(Debug, Clone, PartialEq)]
pub struct Song {
    name: String,
    /// Beats per minute.
    tempo: u32,
    tracks: Vec<Track>,
}

impl Default for Song {
    fn default() -> Self {
        Song {
            name: String::from("New Song"),
            tempo: DEFAULT_TEMPO,
            tracks: Vec::new(),
        }
    }
}

impl Song {
    /// Creates a new empty song.
    pub fn new(name: &str, tempo: u32) -> Result<Song> {
        let mut song = Song {
            name: name.to_string(),
            ..Default::default()
        };
        song.set_tempo(tempo)?;
        Ok(song)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn tracks(&self) -> &[Track] {
        &self.tracks
    }

    /// Sets the song tempo in beats per minute.
    pub fn set_tempo(&mut self, tempo: u32) -> Result<()> {
        if tempo == 0 {
            return Err(Error::invalid("tempo must be positive"));
        }
        self.tempo = tempo;
        Ok(())
    }

    /// Appends a track and returns its index.
    pub fn add_track(&mut self, track: Track) -> usize {
        self.tracks.push(track);
        self.tracks.len() - 1
    }

    /// Removes the track at the given index and returns it.
    pub fn delete_track(&mut self, index: usize) -> Result<Track> {
        self.check_index(index)?;
        Ok(self.tracks.remove(index))
    }

    pub fn track(&self, index: usize) -> Result<&Track> {
        self.check_index(index)?;
        Ok(&self.tracks[index])
    }

    pub fn track_mut(&mut self, index: usize) -> Result<&mut Track> {
        self.check_index(index)?;
        Ok(&mut self.tracks[index])
    }

    /// Finds the index of the first track with exactly the given name.
    pub fn find_track(&self, name: &str) -> Option<usize> {
        self.tracks.iter().position(|track| track.name == name)
    }

    /// Adds an event to the track at the given index.
    pub fn add_event(&mut self, index: usize, event: Event) -> Result<()> {
        self.track_mut(index)?.add_event(event);
        Ok(())
    }

    /// The time in beats at which the last note of the song ends.
    pub fn end_time(&self) -> f64 {
        self.tracks.iter().map(Track::end_time).fold(0.0, f64::max)
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.tracks.len() {
            return Err(Error::invalid(format!(
                "invalid track index {} ({} tracks)",
                index,
                self.tracks.len()
            )));
        }
        Ok(())
    }
}

impl fmt::Display for Song {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.tracks.is_empty() {
            return write!(f, "No tracks in the song.");
        }

        writeln!(f, "Song: {} | Tempo: {} BPM", self.name, self.tempo)?;
        writeln!(f, "{}", "=".repeat(20))?;
        for (index, track) in self.tracks.iter().enumerate() {
            write!(
                f,
                "[{}] {} (Instrument: {}, Channel: {}, {} events",
                index,
                track.name,
                track.instrument,
                track.channel,
                track.events.len()
            )?;
            match &track.output {
                Some(output) => writeln!(f, ", Port: {})", output)?,
                None => writeln!(f, ")")?,
            }
        }

        Ok(())
    }
}
