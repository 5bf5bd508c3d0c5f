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
    fmt,
    sync::Arc,
    thread::{self, JoinHandle},
};

use parking_lot::Mutex;
use tracing::{debug, error, info, span, warn, Level, Span};

use crate::{
    error::Result,
    playsync::PlaybackSignal,
    ports::{PortManager, PortSession},
    schedule::{Schedule, ScheduledMessage},
    songs::Song,
};

/// The state of the player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackState {
    Stopped,
    Playing,
    Paused,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlaybackState::Stopped => write!(f, "stopped"),
            PlaybackState::Playing => write!(f, "playing"),
            PlaybackState::Paused => write!(f, "paused"),
        }
    }
}

/// What a player control call did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Started,
    AlreadyPlaying,
    Resumed,
    Paused,
    Stopped,
    NothingToPlay,
    NotPlaying,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let description = match self {
            Outcome::Started => "Playback started.",
            Outcome::AlreadyPlaying => "Already playing.",
            Outcome::Resumed => "Playback resumed.",
            Outcome::Paused => "Playback paused.",
            Outcome::Stopped => "Playback stopped.",
            Outcome::NothingToPlay => "No tracks have a port assigned, nothing to play.",
            Outcome::NotPlaying => "Nothing is playing.",
        };
        write!(f, "{}", description)
    }
}

struct PlayHandles {
    join: JoinHandle<()>,
    signal: PlaybackSignal,
    session: Arc<PortSession>,
}

/// Plays songs back through their assigned ports on a background worker.
pub struct Player {
    ticks_per_beat: u16,
    /// Keeps track of the player joins. There should only be one worker at a time.
    join: Mutex<Option<PlayHandles>>,
    /// The logging span.
    span: Span,
}

impl Player {
    /// Creates a new player.
    pub fn new(ticks_per_beat: u16) -> Player {
        Player {
            ticks_per_beat,
            join: Mutex::new(None),
            span: span!(Level::INFO, "player"),
        }
    }

    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    /// Reports the current state.
    pub fn state(&self) -> PlaybackState {
        match self.join.lock().as_ref() {
            None => PlaybackState::Stopped,
            Some(handles) if handles.signal.is_finished() => PlaybackState::Stopped,
            Some(handles) if handles.signal.is_paused() => PlaybackState::Paused,
            Some(_) => PlaybackState::Playing,
        }
    }

    /// Plays the song from the beginning, or resumes it if it's paused. The song is
    /// snapshotted here, so later edits and tempo changes apply to the next run.
    pub fn play(&self, song: &Song, ports: &PortManager) -> Result<Outcome> {
        let _enter = self.span.enter();

        let mut join = self.join.lock();
        Player::reap(&mut join);
        if let Some(handles) = join.as_ref() {
            if handles.signal.resume() {
                info!(song = song.name(), "Resuming playback.");
                return Ok(Outcome::Resumed);
            }
            info!(song = song.name(), "Player is already playing a song.");
            return Ok(Outcome::AlreadyPlaying);
        }

        let schedule = Schedule::build(song, self.ticks_per_beat);
        if schedule.destinations().is_empty() {
            info!(song = song.name(), "No track has a port assigned.");
            return Ok(Outcome::NothingToPlay);
        }

        let session = ports.open_session(schedule.destinations())?;
        let signal = PlaybackSignal::new();

        info!(
            song = song.name(),
            tempo = schedule.tempo(),
            messages = schedule.len(),
            duration = format!("{:?}", schedule.duration()),
            "Starting playback."
        );

        let spawned = {
            let session = session.clone();
            let signal = signal.clone();
            thread::Builder::new()
                .name("playback".to_string())
                .spawn(move || Player::deliver(schedule, session, signal))
        };
        let join_handle = match spawned {
            Ok(join_handle) => join_handle,
            Err(e) => {
                session.release();
                return Err(e.into());
            }
        };

        *join = Some(PlayHandles {
            join: join_handle,
            signal,
            session,
        });
        Ok(Outcome::Started)
    }

    /// Pauses playback, or resumes it if it's already paused. Sounding notes are silenced.
    pub fn pause(&self) -> Outcome {
        let _enter = self.span.enter();

        let mut join = self.join.lock();
        Player::reap(&mut join);
        let handles = match join.as_ref() {
            Some(handles) => handles,
            None => {
                info!("Player is not active, nothing to pause.");
                return Outcome::NotPlaying;
            }
        };

        if handles.signal.resume() {
            info!("Resuming playback.");
            return Outcome::Resumed;
        }
        // Suspend the worker before the panic so no note can follow it.
        if !handles.signal.pause() {
            return Outcome::NotPlaying;
        }
        handles.session.all_notes_off();
        info!("Paused playback.");
        Outcome::Paused
    }

    /// Resumes paused playback.
    pub fn resume(&self) -> Outcome {
        let _enter = self.span.enter();

        let mut join = self.join.lock();
        Player::reap(&mut join);
        match join.as_ref() {
            None => Outcome::NotPlaying,
            Some(handles) if handles.signal.resume() => {
                info!("Resuming playback.");
                Outcome::Resumed
            }
            Some(_) => Outcome::AlreadyPlaying,
        }
    }

    /// Stops playback. Blocks until the worker has exited, so nothing is delivered after this
    /// returns. The handles stay locked until then, so no other run can start in the meantime.
    pub fn stop(&self) -> Outcome {
        let _enter = self.span.enter();

        // The worker never takes this lock, so joining while holding it can't deadlock.
        let mut join = self.join.lock();
        let handles = match join.take() {
            Some(handles) => handles,
            None => {
                info!("Player is not active, nothing to stop.");
                return Outcome::NotPlaying;
            }
        };

        let finished = handles.signal.is_finished();
        if !finished {
            info!("Stopping playback.");
            handles.signal.cancel();
            handles.session.all_notes_off();
        }
        if let Err(e) = handles.join.join() {
            error!("Error waiting for playback to stop: {:?}", e);
        }
        handles.session.release();

        if finished {
            Outcome::NotPlaying
        } else {
            Outcome::Stopped
        }
    }

    /// Blocks until the current run ends, either by completing or by being stopped.
    pub fn wait(&self) {
        let signal = match self.join.lock().as_ref() {
            Some(handles) => handles.signal.clone(),
            None => return,
        };
        signal.wait_finished();
    }

    /// Drops the handles of a run that has already finished.
    fn reap(join: &mut Option<PlayHandles>) {
        let finished = join
            .as_ref()
            .is_some_and(|handles| handles.signal.is_finished());
        if !finished {
            return;
        }
        if let Some(handles) = join.take() {
            if let Err(e) = handles.join.join() {
                error!("Error waiting for playback to finish: {:?}", e);
            }
            handles.session.release();
        }
    }

    /// The worker. Paces the schedule against the wall clock and delivers each message to its
    /// track's destination.
    fn deliver(schedule: Schedule, session: Arc<PortSession>, signal: PlaybackSignal) {
        let span = span!(Level::INFO, "playback worker");
        let _enter = span.enter();

        let _cleanup = Cleanup {
            session: &session,
            signal: &signal,
        };

        let mut last_tick = 0;
        let mut skipped = 0;
        for message in schedule.messages() {
            let wait = schedule.ticks_to_duration(message.tick - last_tick);
            if !signal.sleep(wait) {
                info!("Playback cancelled.");
                return;
            }

            match signal.run_if_active(|| Player::send(&schedule, &session, message)) {
                Some(true) => {}
                Some(false) => skipped += 1,
                None => {
                    info!("Playback cancelled.");
                    return;
                }
            }
            last_tick = message.tick;
        }

        info!(
            delivered = schedule.len() - skipped,
            skipped, "Playback finished."
        );
    }

    /// Sends a single message. Returns false if it had to be skipped.
    fn send(schedule: &Schedule, session: &PortSession, message: &ScheduledMessage) -> bool {
        let output = match schedule
            .route(message.track)
            .and_then(|destination| session.get(destination))
        {
            Some(output) => output,
            None => {
                debug!(track = message.track, "No destination for track.");
                return false;
            }
        };

        if let Err(e) = output.send(&message.to_message()) {
            warn!(
                port = output.name(),
                track = message.track,
                err = e.to_string(),
                "Error delivering message, skipping it."
            );
            return false;
        }
        true
    }
}

impl Drop for Player {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Silences and releases the session when the worker exits, however it exits.
struct Cleanup<'a> {
    session: &'a PortSession,
    signal: &'a PlaybackSignal,
}

impl Drop for Cleanup<'_> {
    fn drop(&mut self) {
        if thread::panicking() {
            error!("Playback worker panicked.");
        }
        self.session.all_notes_off();
        self.session.release();
        self.signal.finish();
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use crate::{
        error::Error,
        midi::{mock, Message},
        ports::DestinationId,
        songs::{Event, Note, Track},
        testutil::eventually,
    };

    use super::*;

    fn note_event(pitch: u8, start: f64, duration: f64) -> Event {
        Event::single(Note::new(pitch, 100, duration).expect("valid note"), start)
            .expect("valid event")
    }

    fn routed_track(name: &str, port: &str, events: Vec<Event>) -> Track {
        let mut track = Track::new(name);
        track.set_output(Some(DestinationId::new(port)));
        for event in events {
            track.add_event(event);
        }
        track
    }

    fn setup(outputs: &[&str]) -> (Arc<mock::Transport>, PortManager, Player) {
        let transport = Arc::new(mock::Transport::new(outputs, &[]));
        let ports = PortManager::new(transport.clone());
        (transport, ports, Player::new(480))
    }

    fn note_on(key: u8) -> Message {
        Message::NoteOn {
            channel: 0,
            key,
            velocity: 100,
        }
    }

    fn note_off(key: u8) -> Message {
        Message::NoteOff {
            channel: 0,
            key,
            velocity: 100,
        }
    }

    #[test]
    fn test_play_empty_song() -> Result<()> {
        let (transport, ports, player) = setup(&["synth"]);
        let mut song = Song::default();
        // A track without a port isn't playable.
        song.add_track(Track::new("unassigned"));

        assert_eq!(Outcome::NothingToPlay, player.play(&song, &ports)?);
        assert_eq!(PlaybackState::Stopped, player.state());
        assert!(transport.opened().is_empty());
        Ok(())
    }

    #[test]
    fn test_single_note_timing() -> Result<()> {
        let (transport, ports, player) = setup(&["synth"]);
        let mut song = Song::new("scenario", 120)?;
        song.add_track(routed_track(
            "piano",
            "synth",
            vec![note_event(60, 0.0, 1.0)],
        ));

        assert_eq!(Outcome::Started, player.play(&song, &ports)?);
        player.wait();
        assert_eq!(PlaybackState::Stopped, player.state());

        let output = transport.output("synth").expect("expected output");
        let sent = output.timed_messages();
        assert_eq!(
            Message::ProgramChange {
                channel: 0,
                program: 0
            },
            sent[0].1
        );
        assert_eq!(note_on(60), sent[1].1);
        assert_eq!(note_off(60), sent[2].1);

        let gap = sent[2].0.duration_since(sent[1].0);
        assert!(gap >= Duration::from_millis(450), "gap too short: {:?}", gap);
        assert!(gap < Duration::from_millis(750), "gap too long: {:?}", gap);

        // The worker finishes with a panic on every channel and closes the port.
        assert_eq!(3 + 16, sent.len());
        assert_eq!(Message::all_notes_off(15), sent[18].1);
        assert!(output.is_closed());
        Ok(())
    }

    #[test]
    fn test_shared_destination_plays_lower_track_first() -> Result<()> {
        let (transport, ports, player) = setup(&["synth"]);
        let mut song = Song::new("shared", 600)?;
        song.add_track(routed_track("low", "synth", vec![note_event(60, 0.0, 0.5)]));
        song.add_track(routed_track("high", "synth", vec![note_event(72, 0.0, 0.5)]));

        assert_eq!(Outcome::Started, player.play(&song, &ports)?);
        player.wait();

        let notes = transport
            .output("synth")
            .expect("expected output")
            .note_messages();
        assert_eq!(
            vec![note_on(60), note_on(72), note_off(60), note_off(72)],
            notes
        );
        Ok(())
    }

    #[test]
    fn test_pause_then_stop() -> Result<()> {
        let (transport, ports, player) = setup(&["synth"]);
        let mut song = Song::new("pause", 120)?;
        song.add_track(routed_track(
            "piano",
            "synth",
            vec![note_event(60, 0.0, 8.0), note_event(62, 4.0, 1.0)],
        ));

        assert_eq!(Outcome::Started, player.play(&song, &ports)?);
        let output = transport.output("synth").expect("expected output");
        eventually(
            || !output.note_messages().is_empty(),
            "First note never played",
        );

        assert_eq!(Outcome::Paused, player.pause());
        assert_eq!(PlaybackState::Paused, player.state());
        let messages = output.messages();
        assert_eq!(Some(&Message::all_notes_off(15)), messages.last());

        assert_eq!(Outcome::Stopped, player.stop());
        assert_eq!(PlaybackState::Stopped, player.state());
        assert_eq!(vec![note_on(60)], output.note_messages());
        assert_eq!(Some(&Message::all_notes_off(15)), output.messages().last());
        assert!(output.is_closed());
        Ok(())
    }

    #[test]
    fn test_stop_is_idempotent() -> Result<()> {
        let (_transport, ports, player) = setup(&["synth"]);
        assert_eq!(Outcome::NotPlaying, player.stop());
        assert_eq!(Outcome::NotPlaying, player.pause());
        assert_eq!(Outcome::NotPlaying, player.resume());

        let mut song = Song::default();
        song.add_track(routed_track("piano", "synth", vec![note_event(60, 0.0, 16.0)]));
        assert_eq!(Outcome::Started, player.play(&song, &ports)?);
        assert_eq!(Outcome::Stopped, player.stop());
        assert_eq!(Outcome::NotPlaying, player.stop());
        assert_eq!(PlaybackState::Stopped, player.state());
        Ok(())
    }

    #[test]
    fn test_play_waits_for_stop_in_progress() -> Result<()> {
        let (transport, ports, player) = setup(&["synth"]);
        let mut song = Song::new("overlap", 120)?;
        song.add_track(routed_track("piano", "synth", vec![note_event(60, 0.0, 100.0)]));

        assert_eq!(Outcome::Started, player.play(&song, &ports)?);
        let first = transport.output("synth").expect("expected output");
        eventually(
            || !first.note_messages().is_empty(),
            "First note never played",
        );
        // Slow sends keep the stop busy while play is called.
        first.set_send_delay(Duration::from_millis(10));

        let (stopped, restarted) = thread::scope(|scope| {
            let stopping = scope.spawn(|| player.stop());
            eventually(|| first.messages().len() > 2, "Stop never started");
            let restarted = player.play(&song, &ports);
            (stopping.join().expect("stop panicked"), restarted)
        });
        assert_eq!(Outcome::Stopped, stopped);
        assert_eq!(Outcome::Started, restarted?);
        assert!(first.is_closed());

        let opened = transport.opened();
        assert_eq!(2, opened.len());
        let second = opened[1].clone();
        eventually(
            || !second.note_messages().is_empty(),
            "Second run never played",
        );

        // Everything from the first run, its panic included, came before the second run.
        let first_done = first
            .timed_messages()
            .last()
            .map(|(at, _)| *at)
            .expect("expected messages");
        let second_start = second
            .timed_messages()
            .first()
            .map(|(at, _)| *at)
            .expect("expected messages");
        assert!(first_done <= second_start);

        assert_eq!(Outcome::Stopped, player.stop());
        Ok(())
    }

    #[test]
    fn test_worker_panic_cleans_up() -> Result<()> {
        let (transport, ports, player) = setup(&["synth"]);
        let mut song = Song::new("panic", 120)?;
        song.add_track(routed_track("piano", "synth", vec![note_event(60, 1.0, 1.0)]));

        assert_eq!(Outcome::Started, player.play(&song, &ports)?);
        let output = transport.output("synth").expect("expected output");
        output.set_panic_on_notes(true);
        player.wait();

        assert_eq!(PlaybackState::Stopped, player.state());
        assert!(output.note_messages().is_empty());
        assert_eq!(Some(&Message::all_notes_off(15)), output.messages().last());
        assert!(output.is_closed());

        // The dead run is cleaned up and the player still works.
        assert_eq!(Outcome::NotPlaying, player.stop());
        assert_eq!(Outcome::Started, player.play(&song, &ports)?);
        player.wait();
        let replayed = transport.output("synth").expect("expected output");
        assert!(!Arc::ptr_eq(&output, &replayed));
        assert_eq!(vec![note_on(60), note_off(60)], replayed.note_messages());
        assert!(replayed.is_closed());
        Ok(())
    }

    #[test]
    fn test_play_while_playing_and_paused() -> Result<()> {
        let (_transport, ports, player) = setup(&["synth"]);
        let mut song = Song::default();
        song.add_track(routed_track("piano", "synth", vec![note_event(60, 0.0, 16.0)]));

        assert_eq!(Outcome::Started, player.play(&song, &ports)?);
        assert_eq!(PlaybackState::Playing, player.state());
        assert_eq!(Outcome::AlreadyPlaying, player.play(&song, &ports)?);
        assert_eq!(Outcome::AlreadyPlaying, player.resume());

        assert_eq!(Outcome::Paused, player.pause());
        assert_eq!(Outcome::Resumed, player.play(&song, &ports)?);
        assert_eq!(PlaybackState::Playing, player.state());

        // Pause toggles.
        assert_eq!(Outcome::Paused, player.pause());
        assert_eq!(Outcome::Resumed, player.pause());

        assert_eq!(Outcome::Stopped, player.stop());
        Ok(())
    }

    #[test]
    fn test_pause_holds_position() -> Result<()> {
        let (transport, ports, player) = setup(&["synth"]);
        let mut song = Song::new("hold", 120)?;
        song.add_track(routed_track(
            "piano",
            "synth",
            vec![note_event(60, 0.0, 0.25), note_event(62, 0.5, 0.25)],
        ));

        assert_eq!(Outcome::Started, player.play(&song, &ports)?);
        let output = transport.output("synth").expect("expected output");
        eventually(
            || output.note_messages().contains(&note_on(60)),
            "First note never played",
        );
        assert_eq!(Outcome::Paused, player.pause());

        thread::sleep(Duration::from_millis(400));
        assert!(!output.note_messages().contains(&note_on(62)));

        assert_eq!(Outcome::Resumed, player.resume());
        player.wait();
        assert_eq!(
            vec![note_on(60), note_off(60), note_on(62), note_off(62)],
            output.note_messages()
        );
        Ok(())
    }

    #[test]
    fn test_play_rolls_back_unavailable_ports() -> Result<()> {
        let (transport, ports, player) = setup(&["a", "b"]);
        transport.set_unavailable("b");
        let mut song = Song::default();
        song.add_track(routed_track("one", "a", vec![note_event(60, 0.0, 1.0)]));
        song.add_track(routed_track("two", "b", vec![note_event(62, 0.0, 1.0)]));

        assert!(matches!(
            player.play(&song, &ports),
            Err(Error::PortUnavailable(_))
        ));
        assert_eq!(PlaybackState::Stopped, player.state());
        let output = transport.output("a").expect("expected output");
        assert!(output.is_closed());
        assert!(output.messages().is_empty());
        Ok(())
    }

    #[test]
    fn test_virtual_ports_survive_playback() -> Result<()> {
        let (transport, mut ports, player) = setup(&["synth"]);
        let loopback = ports.create_virtual("loop")?;
        let mut song = Song::new("virtual", 600)?;
        song.add_track(routed_track(
            "virtual",
            loopback.as_str(),
            vec![note_event(60, 0.0, 0.5)],
        ));
        song.add_track(routed_track("real", "synth", vec![note_event(64, 0.0, 0.5)]));

        assert_eq!(Outcome::Started, player.play(&song, &ports)?);
        player.wait();
        // Let the next call clean up the finished run.
        assert_eq!(Outcome::NotPlaying, player.pause());

        let virtual_output = transport.output("loop").expect("expected output");
        assert!(!virtual_output.is_closed());
        assert_eq!(
            vec![note_on(60), note_off(60)],
            virtual_output.note_messages()
        );
        assert!(transport.output("synth").expect("expected output").is_closed());
        Ok(())
    }

    #[test]
    fn test_delivery_errors_skip_messages() -> Result<()> {
        let (transport, mut ports, player) = setup(&["good"]);
        ports.create_virtual("bad")?;
        transport
            .output("bad")
            .expect("expected output")
            .set_fail_sends(true);

        let mut song = Song::new("errors", 600)?;
        song.add_track(routed_track("bad", "bad", vec![note_event(60, 0.0, 0.5)]));
        song.add_track(routed_track(
            "good",
            "good",
            vec![note_event(64, 0.0, 0.5), note_event(65, 0.5, 0.5)],
        ));

        assert_eq!(Outcome::Started, player.play(&song, &ports)?);
        player.wait();

        assert_eq!(
            vec![note_on(64), note_off(64), note_on(65), note_off(65)],
            transport
                .output("good")
                .expect("expected output")
                .note_messages()
        );
        assert!(transport
            .output("bad")
            .expect("expected output")
            .messages()
            .is_empty());
        Ok(())
    }

    #[test]
    fn test_tempo_applies_on_next_play() -> Result<()> {
        let (transport, ports, player) = setup(&["synth"]);
        let mut song = Song::new("tempo", 60)?;
        song.add_track(routed_track("piano", "synth", vec![note_event(60, 0.0, 1.0)]));

        assert_eq!(Outcome::Started, player.play(&song, &ports)?);
        song.set_tempo(600)?;
        player.wait();

        let sent = transport
            .output("synth")
            .expect("expected output")
            .timed_messages();
        let gap = sent[2].0.duration_since(sent[1].0);
        // 60 BPM was captured when playback started.
        assert!(gap >= Duration::from_millis(900), "gap too short: {:?}", gap);
        Ok(())
    }
}
