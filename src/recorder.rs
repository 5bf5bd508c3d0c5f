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
use std::time::{Duration, Instant};

use tracing::{info, span, warn, Level};

use crate::{
    midi::{Input, InputEvent, Message},
    pairing::{seconds_to_beats, NotePairer, Signal},
    playsync::CancelHandle,
    songs::Event,
};

/// Turns live input into track events. Times are measured from the moment recording started
/// and placed after the given offset, in beats at the given tempo.
pub struct Recorder {
    tempo: u32,
    offset: f64,
    origin: Instant,
    pairer: NotePairer,
}

impl Recorder {
    pub fn new(tempo: u32, offset: f64, origin: Instant) -> Recorder {
        Recorder {
            tempo,
            offset,
            origin,
            pairer: NotePairer::new(),
        }
    }

    /// Processes a single input event. Returns an event once a note is complete. Anything
    /// other than note messages is ignored.
    pub fn process(&mut self, event: &InputEvent) -> Option<Event> {
        let seconds = event
            .received
            .saturating_duration_since(self.origin)
            .as_secs_f64();
        let time = self.offset + seconds_to_beats(seconds, self.tempo);

        match event.message {
            Message::NoteOn { key, velocity, .. } => {
                self.pairer.push(Signal::start(key, velocity, time))
            }
            Message::NoteOff { key, .. } => self.pairer.push(Signal::end(key, time)),
            _ => None,
        }
    }

    /// Records from the input until the cancel handle fires or the input fails. Every
    /// completed note is handed to `on_event` as soon as it's paired. Returns the number of
    /// events recorded. Notes still held when recording ends are dropped.
    pub fn run<F>(
        &mut self,
        input: &dyn Input,
        cancel: &CancelHandle,
        poll_interval: Duration,
        mut on_event: F,
    ) -> usize
    where
        F: FnMut(Event),
    {
        let span = span!(Level::INFO, "recorder");
        let _enter = span.enter();

        info!(input = input.name(), "Recording started.");
        let mut recorded = 0;
        while !cancel.is_cancelled() {
            match input.receive(poll_interval) {
                Ok(Some(event)) => {
                    if let Some(event) = self.process(&event) {
                        recorded += 1;
                        on_event(event);
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(
                        input = input.name(),
                        err = e.to_string(),
                        "Input failed, ending recording."
                    );
                    break;
                }
            }
        }

        let dropped = self.pairer.finish();
        info!(recorded, dropped, "Recording finished.");
        recorded
    }
}

#[cfg(test)]
mod test {
    use std::{sync::Arc, thread};

    use crate::{
        midi::{mock, Transport as _},
        testutil::input_at,
    };

    use super::*;

    fn note_on(key: u8, velocity: u8) -> Message {
        Message::NoteOn {
            channel: 0,
            key,
            velocity,
        }
    }

    fn note_off(key: u8) -> Message {
        Message::NoteOff {
            channel: 0,
            key,
            velocity: 0,
        }
    }

    #[test]
    fn test_process_converts_to_beats() {
        let origin = Instant::now();
        let mut recorder = Recorder::new(120, 4.0, origin);

        assert!(recorder
            .process(&input_at(origin, 500, note_on(60, 90)))
            .is_none());
        // Non note messages are ignored.
        assert!(recorder
            .process(&input_at(
                origin,
                600,
                Message::ProgramChange {
                    channel: 0,
                    program: 3
                }
            ))
            .is_none());

        let event = recorder
            .process(&input_at(origin, 1500, note_off(60)))
            .expect("expected event");
        assert!((event.start_time() - 5.0).abs() < 1e-9);
        assert_eq!(1, event.notes().len());
        assert_eq!(60, event.notes()[0].pitch());
        assert_eq!(90, event.notes()[0].velocity());
        assert!((event.notes()[0].duration() - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_note_on_without_velocity_ends_note() {
        let origin = Instant::now();
        let mut recorder = Recorder::new(60, 0.0, origin);
        recorder.process(&input_at(origin, 0, note_on(64, 100)));
        let event = recorder
            .process(&input_at(origin, 250, note_on(64, 0)))
            .expect("expected event");
        assert!((event.notes()[0].duration() - 0.25).abs() < 1e-9);
    }

    #[test]
    fn test_run_until_cancelled() {
        let transport = Arc::new(mock::Transport::new(&[], &["keys"]));
        let input = transport.open_input("keys").expect("expected input");
        let origin = Instant::now();
        let cancel = CancelHandle::new();

        transport.send_input("keys", input_at(origin, 0, note_on(60, 100)));
        transport.send_input("keys", input_at(origin, 100, note_on(62, 100)));
        transport.send_input("keys", input_at(origin, 200, note_off(60)));

        let join = {
            let cancel = cancel.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(100));
                cancel.cancel();
            })
        };

        let mut events = Vec::new();
        let mut recorder = Recorder::new(120, 0.0, origin);
        let recorded = recorder.run(
            input.as_ref(),
            &cancel,
            Duration::from_millis(5),
            |event| events.push(event),
        );
        join.join().expect("thread panicked");

        // The held note is dropped.
        assert_eq!(1, recorded);
        assert_eq!(1, events.len());
        assert_eq!(60, events[0].notes()[0].pitch());
    }

    #[test]
    fn test_stream_error_keeps_events() {
        let transport = Arc::new(mock::Transport::new(&[], &["keys"]));
        let input = transport.open_input("keys").expect("expected input");
        let origin = Instant::now();

        transport.send_input("keys", input_at(origin, 0, note_on(60, 100)));
        transport.send_input("keys", input_at(origin, 500, note_off(60)));
        transport.send_input("keys", input_at(origin, 600, note_on(62, 100)));
        transport.disconnect_input("keys");

        let mut events = Vec::new();
        let mut recorder = Recorder::new(120, 0.0, origin);
        let recorded = recorder.run(
            input.as_ref(),
            &CancelHandle::new(),
            Duration::from_millis(5),
            |event| events.push(event),
        );

        assert_eq!(1, recorded);
        assert!((events[0].notes()[0].duration() - 1.0).abs() < 1e-9);
    }
}
