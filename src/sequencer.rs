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
use std::{
    path::Path,
    sync::Arc,
    time::{Duration, Instant},
};

use tracing::{info, span, Level, Span};

use crate::{
    codec::{self, SmfCodec},
    config,
    error::{Error, Result},
    midi::{self, Input, Transport},
    player::{Outcome, PlaybackState, Player},
    playsync::CancelHandle,
    ports::{DestinationId, PortManager},
    project::Project,
    recorder::Recorder,
    songs::{Song, Track},
};

/// An opened input waiting to be recorded into a track.
pub struct Recording {
    track: usize,
    offset: f64,
    input: Box<dyn Input>,
    origin: Instant,
}

impl Recording {
    pub fn track(&self) -> usize {
        self.track
    }

    pub fn input_name(&self) -> &str {
        self.input.name()
    }

    /// The beat recorded notes are placed after.
    pub fn offset(&self) -> f64 {
        self.offset
    }

    /// When the input was opened. Input times are measured from here.
    pub fn origin(&self) -> Instant {
        self.origin
    }
}

/// The sequencer owns the current song along with everything needed to play it, record into
/// it and store it.
pub struct Sequencer {
    // The player goes first so playback stops before the ports are closed.
    player: Player,
    ports: PortManager,
    song: Song,
    codec: SmfCodec,
    input_port: Option<String>,
    record_poll_interval: Duration,
    span: Span,
}

impl Sequencer {
    /// Creates a sequencer with an empty song that talks to the given transport. Fails if the
    /// settings are out of range.
    pub fn new(
        settings: &config::Sequencer,
        transport: Arc<dyn Transport>,
    ) -> Result<Sequencer> {
        settings
            .validate()
            .map_err(|e| Error::invalid(e.to_string()))?;
        let record_poll_interval = settings
            .record_poll_interval()
            .map_err(|e| Error::invalid(e.to_string()))?;

        Ok(Sequencer {
            player: Player::new(settings.ticks_per_beat()),
            ports: PortManager::new(transport),
            song: Song::new("New Song", settings.tempo())?,
            codec: SmfCodec::new(settings.ticks_per_beat()),
            input_port: settings.input_port().map(str::to_string),
            record_poll_interval,
            span: span!(Level::INFO, "sequencer"),
        })
    }

    /// Creates a sequencer using the transport named in the configuration.
    pub fn from_config(settings: &config::Sequencer) -> Result<Sequencer> {
        let transport = midi::get_transport(settings.transport(), settings.client_name());
        Sequencer::new(settings, transport)
    }

    pub fn song(&self) -> &Song {
        &self.song
    }

    pub fn ports(&self) -> &PortManager {
        &self.ports
    }

    pub fn state(&self) -> PlaybackState {
        self.player.state()
    }

    pub fn list_outputs(&self) -> Result<Vec<String>> {
        self.ports.transport().list_outputs()
    }

    pub fn list_inputs(&self) -> Result<Vec<String>> {
        self.ports.transport().list_inputs()
    }

    /// Adds an empty track and returns its index.
    pub fn add_track(&mut self, name: &str, instrument: Option<u8>) -> Result<usize> {
        if name.trim().is_empty() {
            return Err(Error::invalid("track name cannot be empty"));
        }
        let track = Track::with_instrument(name, instrument.unwrap_or_default())?;
        let index = self.song.add_track(track);
        info!(track = name, index, "Added track.");
        Ok(index)
    }

    pub fn delete_track(&mut self, index: usize) -> Result<Track> {
        let track = self.song.delete_track(index)?;
        info!(track = track.name(), index, "Deleted track.");
        Ok(track)
    }

    /// Sets the tempo. A song that is playing keeps its tempo until it's played again.
    pub fn set_tempo(&mut self, tempo: u32) -> Result<()> {
        self.song.set_tempo(tempo)
    }

    pub fn set_channel(&mut self, index: usize, channel: u8) -> Result<()> {
        self.song.track_mut(index)?.set_channel(channel)
    }

    pub fn set_program(&mut self, index: usize, program: u8) -> Result<()> {
        self.song.track_mut(index)?.set_program(program)
    }

    pub fn set_bank(&mut self, index: usize, msb: Option<u8>, lsb: Option<u8>) -> Result<()> {
        self.song.track_mut(index)?.set_bank(msb, lsb)
    }

    /// Routes a track to the port with exactly the given name. The port is resolved when
    /// playback starts.
    pub fn assign(&mut self, index: usize, port: &str) -> Result<()> {
        if port.trim().is_empty() {
            return Err(Error::invalid("port name cannot be empty"));
        }
        self.song
            .track_mut(index)?
            .set_output(Some(DestinationId::new(port)));
        Ok(())
    }

    pub fn unassign(&mut self, index: usize) -> Result<()> {
        self.song.track_mut(index)?.set_output(None);
        Ok(())
    }

    pub fn create_virtual_port(&mut self, name: &str) -> Result<DestinationId> {
        self.ports.create_virtual(name)
    }

    /// Removes a virtual port. Refused while playing, since the port may be in use.
    pub fn remove_virtual_port(&mut self, name: &str) -> Result<()> {
        self.require_stopped("remove a virtual port")?;
        self.ports.remove_virtual(name)
    }

    /// Replaces the song with the contents of a MIDI file. Playback is stopped first.
    pub fn load_file(&mut self, path: &Path) -> Result<()> {
        let _enter = self.span.enter();

        let song = codec::load_file(&self.codec, path)?;
        self.player.stop();
        self.song = song;
        Ok(())
    }

    /// Appends the tracks of a MIDI file to the song. Returns the number of tracks added.
    pub fn import_file(&mut self, path: &Path) -> Result<usize> {
        let _enter = self.span.enter();

        let imported = codec::load_file(&self.codec, path)?;
        let count = imported.tracks().len();
        for track in imported.tracks() {
            self.song.add_track(track.clone());
        }
        info!(tracks = count, "Imported tracks.");
        Ok(count)
    }

    pub fn save_file(&self, path: &Path) -> Result<()> {
        codec::save_file(&self.codec, &self.song, path)
    }

    /// Saves the song to the MIDI file and the routing to the project file. A relative MIDI
    /// file path is relative to the project file.
    pub fn save_project(&self, project_path: &Path, midi_file: &Path) -> Result<()> {
        let _enter = self.span.enter();

        let project = Project::new(midi_file, &self.song, &self.ports);
        codec::save_file(
            &self.codec,
            &self.song,
            &project.resolve_midi_file(project_path),
        )?;
        project.save(project_path)
    }

    /// Loads a project. The song is only replaced once its MIDI file has loaded; problems
    /// with the project's ports and assignments after that are returned as warnings.
    pub fn load_project(&mut self, project_path: &Path) -> Result<Vec<String>> {
        let _enter = self.span.enter();

        let project = Project::load(project_path)?;
        let song = codec::load_file(&self.codec, &project.resolve_midi_file(project_path))?;

        self.player.stop();
        self.song = song;
        let warnings = project.apply(&mut self.song, &mut self.ports);
        info!(
            project = project_path.display().to_string(),
            warnings = warnings.len(),
            "Loaded project."
        );
        Ok(warnings)
    }

    pub fn play(&self) -> Result<Outcome> {
        self.player.play(&self.song, &self.ports)
    }

    pub fn pause(&self) -> Outcome {
        self.player.pause()
    }

    pub fn resume(&self) -> Outcome {
        self.player.resume()
    }

    pub fn stop(&self) -> Outcome {
        self.player.stop()
    }

    /// Blocks until the current playback finishes.
    pub fn wait(&self) {
        self.player.wait()
    }

    /// Opens an input for recording into the given track. Uses the configured input port if
    /// none is given. Recording is only possible while stopped.
    pub fn begin_recording(&mut self, track: usize, input: Option<&str>) -> Result<Recording> {
        self.require_stopped("record")?;
        let offset = self.song.track(track)?.end_time();
        let input_name = match input.or(self.input_port.as_deref()) {
            Some(input_name) => input_name.to_string(),
            None => return Err(Error::invalid("no input port given")),
        };

        let input = self.ports.transport().open_input(&input_name)?;
        Ok(Recording {
            track,
            offset,
            input,
            origin: Instant::now(),
        })
    }

    /// Records into the track until the cancel handle fires or the input fails. Notes are
    /// added to the track as they complete. Returns the number of events recorded.
    pub fn record_into(&mut self, recording: Recording, cancel: &CancelHandle) -> Result<usize> {
        let _enter = self.span.enter();

        let mut recorder = Recorder::new(self.song.tempo(), recording.offset, recording.origin);
        let track = self.song.track_mut(recording.track)?;
        let recorded = recorder.run(
            recording.input.as_ref(),
            cancel,
            self.record_poll_interval,
            |event| track.add_event(event),
        );
        recording.input.close();
        Ok(recorded)
    }

    /// Records from the input into the track until the cancel handle fires.
    pub fn record(
        &mut self,
        track: usize,
        input: Option<&str>,
        cancel: &CancelHandle,
    ) -> Result<usize> {
        let recording = self.begin_recording(track, input)?;
        self.record_into(recording, cancel)
    }

    fn require_stopped(&self, action: &str) -> Result<()> {
        match self.player.state() {
            PlaybackState::Stopped => Ok(()),
            state => Err(Error::Busy(format!("unable to {} while {}", action, state))),
        }
    }
}
