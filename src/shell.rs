// Copyright (C) 2024 Michael Wilson <mike@mdwn.dev>
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
    io,
    path::{Path, PathBuf},
    str::FromStr,
    thread,
};

use tracing::{info, span, warn, Level};

use crate::{
    error::Error,
    player::PlaybackState,
    playsync::CancelHandle,
    sequencer::Sequencer,
    util::{beats_duration, duration_minutes_seconds},
};

const HELP: &str = "help";
const ADD: &str = "add";
const LOAD: &str = "load";
const IMPORT: &str = "import";
const LIST: &str = "list";
const RECORD: &str = "record";
const DELETE: &str = "delete";
const TEMPO: &str = "tempo";
const CHANNEL: &str = "channel";
const PROGRAM: &str = "program";
const BANK: &str = "bank";
const ASSIGN: &str = "assign";
const UNASSIGN: &str = "unassign";
const VIRTUAL: &str = "virtual";
const PORTS: &str = "ports";
const SAVE: &str = "save";
const PROJECT_SAVE: &str = "project-save";
const PROJECT_LOAD: &str = "project-load";
const PLAY: &str = "play";
const PAUSE: &str = "pause";
const RESUME: &str = "resume";
const STOP: &str = "stop";
const QUIT: &str = "quit";
const EXIT: &str = "exit";

const HELP_TEXT: &str = "
Commands:
  help                             - Shows this help message.
  add <name> [instrument]          - Adds a new track with an optional program number (0-127).
  load <file>                      - Replaces the song with a MIDI file.
  import <file>                    - Adds the tracks of a MIDI file to the song.
  list                             - Shows all tracks in the song.
  record <track> [input]           - Records MIDI input into a track. Press Enter to stop.
  delete <track>                   - Deletes a track.
  tempo <bpm>                      - Sets the song tempo in beats per minute.
  channel <track> <channel>        - Sets a track's MIDI channel (0-15).
  program <track> <program>        - Sets a track's program number (0-127).
  bank <track> <msb|-> [lsb|-]     - Sets a track's bank select, - clears it.
  assign <track> <port>            - Routes a track to an output port.
  unassign <track>                 - Removes a track's output port.
  virtual [add|remove] <name>      - Lists, creates or removes virtual output ports.
  ports                            - Lists the available ports.
  save <file>                      - Saves the song to a MIDI file.
  project-save <file> [midi file]  - Saves the song and its routing as a project.
  project-load <file>              - Loads a project.
  play                             - Plays the song, or resumes it if paused.
  pause                            - Pauses or resumes playback.
  resume                           - Resumes playback.
  stop                             - Stops playback.
  quit                             - Exits the sequencer.
";

/// Whether the shell should keep reading commands.
enum Flow {
    Continue,
    Quit,
}

/// Why a command couldn't be run.
enum Failure {
    Usage(&'static str),
    Error(Error),
}

impl From<Error> for Failure {
    fn from(e: Error) -> Self {
        Failure::Error(e)
    }
}

impl From<io::Error> for Failure {
    fn from(e: io::Error) -> Self {
        Failure::Error(Error::Io(e))
    }
}

type CommandResult = std::result::Result<Flow, Failure>;

/// An interactive, line oriented shell driving a sequencer.
pub struct Shell<'a, R, W> {
    sequencer: &'a mut Sequencer,
    reader: R,
    writer: W,
}

impl<'a, R, W> Shell<'a, R, W>
where
    R: io::BufRead + Send,
    W: io::Write,
{
    pub fn new(sequencer: &'a mut Sequencer, reader: R, writer: W) -> Shell<'a, R, W> {
        Shell {
            sequencer,
            reader,
            writer,
        }
    }

    /// Reads and runs commands until quit or the end of input. Playback is stopped on the way
    /// out.
    pub fn run(&mut self) -> Result<(), io::Error> {
        let span = span!(Level::INFO, "shell");
        let _enter = span.enter();

        info!("Shell started.");
        writeln!(self.writer, "Welcome to mseq!")?;
        write!(self.writer, "{}", HELP_TEXT)?;

        loop {
            write!(self.writer, "> ")?;
            self.writer.flush()?;

            let mut input = String::default();
            if self.reader.read_line(&mut input)? == 0 {
                break;
            }

            let parts: Vec<&str> = input.split_whitespace().collect();
            let (command, args) = match parts.split_first() {
                Some((command, args)) => (command.to_lowercase(), args),
                None => continue,
            };

            match self.execute(&command, args, &input) {
                Ok(Flow::Continue) => {}
                Ok(Flow::Quit) => break,
                Err(Failure::Usage(usage)) => writeln!(self.writer, "Usage: {}", usage)?,
                Err(Failure::Error(e)) => writeln!(self.writer, "Error: {}", e)?,
            }
        }

        if self.sequencer.state() != PlaybackState::Stopped {
            writeln!(self.writer, "Stopping playback before exiting...")?;
            self.sequencer.stop();
        }
        writeln!(self.writer, "Exiting sequencer. Goodbye!")?;
        info!("Shell finished.");
        Ok(())
    }

    fn execute(&mut self, command: &str, args: &[&str], line: &str) -> CommandResult {
        match command {
            HELP => write!(self.writer, "{}", HELP_TEXT)?,
            ADD => self.add(args)?,
            LOAD => {
                let path = path_arg(line, "load <file>")?;
                self.sequencer.load_file(&path)?;
                writeln!(
                    self.writer,
                    "Loaded '{}' with {} tracks.",
                    self.sequencer.song().name(),
                    self.sequencer.song().tracks().len()
                )?;
            }
            IMPORT => {
                let path = path_arg(line, "import <file>")?;
                let count = self.sequencer.import_file(&path)?;
                writeln!(self.writer, "Imported {} tracks.", count)?;
            }
            LIST => self.list()?,
            RECORD => self.record(args, line)?,
            DELETE => self.delete(args)?,
            TEMPO => {
                let usage = "tempo <bpm>";
                let tempo = parse_arg(args, 0, usage)?;
                self.sequencer.set_tempo(tempo)?;
                writeln!(self.writer, "Tempo set to {} BPM.", tempo)?;
            }
            CHANNEL => {
                let usage = "channel <track> <channel>";
                let track = parse_arg(args, 0, usage)?;
                let channel = parse_arg(args, 1, usage)?;
                self.sequencer.set_channel(track, channel)?;
                writeln!(self.writer, "Track {} now uses channel {}.", track, channel)?;
            }
            PROGRAM => {
                let usage = "program <track> <program>";
                let track = parse_arg(args, 0, usage)?;
                let program = parse_arg(args, 1, usage)?;
                self.sequencer.set_program(track, program)?;
                writeln!(self.writer, "Track {} now uses program {}.", track, program)?;
            }
            BANK => {
                let usage = "bank <track> <msb|-> [lsb|-]";
                let track = parse_arg(args, 0, usage)?;
                let msb = optional_arg(args.get(1).copied(), usage)?;
                let lsb = match args.get(2) {
                    Some(lsb) => optional_arg(Some(*lsb), usage)?,
                    None => None,
                };
                self.sequencer.set_bank(track, msb, lsb)?;
                writeln!(self.writer, "Bank updated for track {}.", track)?;
            }
            ASSIGN => {
                let usage = "assign <track> <port>";
                let track = parse_arg(args, 0, usage)?;
                let port = rest_arg(line, 2, usage)?;
                self.sequencer.assign(track, &port)?;
                writeln!(self.writer, "Track {} assigned to '{}'.", track, port)?;
            }
            UNASSIGN => {
                let track = parse_arg(args, 0, "unassign <track>")?;
                self.sequencer.unassign(track)?;
                writeln!(self.writer, "Track {} unassigned.", track)?;
            }
            VIRTUAL => self.virtual_ports(args, line)?,
            PORTS => self.ports()?,
            SAVE => {
                let path = path_arg(line, "save <file>")?;
                self.sequencer.save_file(&path)?;
                writeln!(self.writer, "Song saved to '{}'.", path.display())?;
            }
            PROJECT_SAVE => {
                let usage = "project-save <file> [midi file]";
                let project_path = args
                    .first()
                    .map(PathBuf::from)
                    .ok_or(Failure::Usage(usage))?;
                let midi_file = match args.get(1) {
                    Some(midi_file) => PathBuf::from(midi_file),
                    None => default_midi_file(&project_path),
                };
                self.sequencer.save_project(&project_path, &midi_file)?;
                writeln!(
                    self.writer,
                    "Project saved to '{}'.",
                    project_path.display()
                )?;
            }
            PROJECT_LOAD => {
                let project_path = path_arg(line, "project-load <file>")?;
                let warnings = self.sequencer.load_project(&project_path)?;
                for warning in warnings.iter() {
                    writeln!(self.writer, "Warning: {}", warning)?;
                }
                writeln!(
                    self.writer,
                    "Loaded project '{}'.",
                    project_path.display()
                )?;
            }
            PLAY => {
                let outcome = self.sequencer.play()?;
                writeln!(self.writer, "{}", outcome)?;
            }
            PAUSE => writeln!(self.writer, "{}", self.sequencer.pause())?,
            RESUME => writeln!(self.writer, "{}", self.sequencer.resume())?,
            STOP => writeln!(self.writer, "{}", self.sequencer.stop())?,
            QUIT | EXIT => return Ok(Flow::Quit),
            _ => {
                warn!(command, "Unrecognized command");
                writeln!(
                    self.writer,
                    "Unknown command: '{}'. Type 'help' for a list of commands.",
                    command
                )?;
            }
        }
        Ok(Flow::Continue)
    }

    fn add(&mut self, args: &[&str]) -> Result<(), Failure> {
        let usage = "add <name> [instrument]";
        let (name, instrument) = match args {
            [name] => (*name, None),
            [name, instrument] => (
                *name,
                Some(
                    instrument
                        .parse::<u8>()
                        .map_err(|_| Failure::Usage(usage))?,
                ),
            ),
            _ => return Err(Failure::Usage(usage)),
        };
        let index = self.sequencer.add_track(name, instrument)?;
        writeln!(self.writer, "Track '{}' added at index {}.", name, index)?;
        Ok(())
    }

    fn list(&mut self) -> Result<(), Failure> {
        let song = self.sequencer.song();
        writeln!(self.writer, "{}", song)?;
        if !song.tracks().is_empty() {
            writeln!(
                self.writer,
                "Length: {}",
                duration_minutes_seconds(beats_duration(song.end_time(), song.tempo()))
            )?;
        }
        writeln!(self.writer, "Playback: {}", self.sequencer.state())?;
        Ok(())
    }

    fn delete(&mut self, args: &[&str]) -> Result<(), Failure> {
        let index = parse_arg(args, 0, "delete <track>")?;
        let name = self.sequencer.song().track(index)?.name().to_string();

        write!(
            self.writer,
            "Are you sure you want to delete track '{}'? [y/N] ",
            name
        )?;
        self.writer.flush()?;
        let mut confirm = String::default();
        self.reader.read_line(&mut confirm)?;
        if confirm.trim().to_lowercase() != "y" {
            writeln!(self.writer, "Deletion cancelled.")?;
            return Ok(());
        }

        self.sequencer.delete_track(index)?;
        writeln!(self.writer, "Track '{}' deleted.", name)?;
        Ok(())
    }

    fn record(&mut self, args: &[&str], line: &str) -> Result<(), Failure> {
        let usage = "record <track> [input]";
        let track = parse_arg(args, 0, usage)?;
        let input = if args.len() > 1 {
            Some(rest_arg(line, 2, usage)?)
        } else {
            None
        };

        let recording = self.sequencer.begin_recording(track, input.as_deref())?;
        writeln!(
            self.writer,
            "Recording on '{}' into track {} from beat {:.2}. Press Enter to stop.",
            recording.input_name(),
            recording.track(),
            recording.offset()
        )?;
        self.writer.flush()?;

        let cancel = CancelHandle::new();
        let sequencer = &mut *self.sequencer;
        let reader = &mut self.reader;
        let writer = &mut self.writer;
        let recorded = thread::scope(|scope| {
            scope.spawn(|| {
                let mut line = String::default();
                if let Err(e) = reader.read_line(&mut line) {
                    warn!(err = e.to_string(), "Error waiting for Enter.");
                }
                cancel.cancel();
            });

            let recorded = sequencer.record_into(recording, &cancel);
            if !cancel.is_cancelled() {
                // The input went away, but the watcher still needs its line.
                let _ = writeln!(writer, "Input closed. Press Enter to continue.");
                let _ = writer.flush();
            }
            recorded
        })?;

        writeln!(self.writer, "Recorded {} events.", recorded)?;
        Ok(())
    }

    fn virtual_ports(&mut self, args: &[&str], line: &str) -> Result<(), Failure> {
        let usage = "virtual [add|remove] <name>";
        match args.first().map(|action| action.to_lowercase()).as_deref() {
            None | Some("list") => {
                let ports = self.sequencer.ports().virtual_ports();
                if ports.is_empty() {
                    writeln!(self.writer, "No virtual ports.")?;
                }
                for port in ports {
                    writeln!(self.writer, "  {}", port)?;
                }
            }
            Some("add") => {
                let name = rest_arg(line, 2, usage)?;
                self.sequencer.create_virtual_port(&name)?;
                writeln!(self.writer, "Virtual port '{}' created.", name)?;
            }
            Some("remove") => {
                let name = rest_arg(line, 2, usage)?;
                self.sequencer.remove_virtual_port(&name)?;
                writeln!(self.writer, "Virtual port '{}' removed.", name)?;
            }
            Some(_) => return Err(Failure::Usage(usage)),
        }
        Ok(())
    }

    fn ports(&mut self) -> Result<(), Failure> {
        writeln!(self.writer, "Outputs:")?;
        for port in self.sequencer.list_outputs()? {
            writeln!(self.writer, "  {}", port)?;
        }
        writeln!(self.writer, "Inputs:")?;
        for port in self.sequencer.list_inputs()? {
            writeln!(self.writer, "  {}", port)?;
        }
        writeln!(self.writer, "Virtual:")?;
        for port in self.sequencer.ports().virtual_ports() {
            writeln!(self.writer, "  {}", port)?;
        }
        Ok(())
    }
}

fn parse_arg<T: FromStr>(args: &[&str], index: usize, usage: &'static str) -> Result<T, Failure> {
    args.get(index)
        .and_then(|arg| arg.parse().ok())
        .ok_or(Failure::Usage(usage))
}

/// Parses a data byte, where - means none.
fn optional_arg(arg: Option<&str>, usage: &'static str) -> Result<Option<u8>, Failure> {
    match arg {
        Some("-") => Ok(None),
        Some(arg) => arg.parse().map(Some).map_err(|_| Failure::Usage(usage)),
        None => Err(Failure::Usage(usage)),
    }
}

/// The raw rest of the line after skipping the given number of words, the command included.
/// Port names and paths may contain spaces, which are kept as typed.
fn rest_arg(line: &str, skip: usize, usage: &'static str) -> Result<String, Failure> {
    let mut rest = line.trim();
    for _ in 0..skip {
        rest = match rest.find(char::is_whitespace) {
            Some(end) => rest[end..].trim_start(),
            None => "",
        };
    }
    if rest.is_empty() {
        return Err(Failure::Usage(usage));
    }
    Ok(rest.to_string())
}

fn path_arg(line: &str, usage: &'static str) -> Result<PathBuf, Failure> {
    rest_arg(line, 1, usage).map(PathBuf::from)
}

/// Places the MIDI file of a project next to it, named after it.
fn default_midi_file(project_path: &Path) -> PathBuf {
    let stem = project_path
        .file_stem()
        .map(|stem| stem.to_string_lossy().to_string())
        .unwrap_or_else(|| "project".to_string());
    PathBuf::from(format!("{}.mid", stem))
}
