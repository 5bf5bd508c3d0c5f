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
use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::songs::{Event, Note};

/// Whether a signal starts or ends a note.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SignalKind {
    Start,
    End,
}

/// A note started or ended at a point in time measured in beats.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Signal {
    pub pitch: u8,
    pub velocity: u8,
    /// Time in beats.
    pub time: f64,
    pub kind: SignalKind,
}

impl Signal {
    /// A note started. A velocity of zero is treated as the end of the note.
    pub fn start(pitch: u8, velocity: u8, time: f64) -> Signal {
        Signal {
            pitch,
            velocity,
            time,
            kind: SignalKind::Start,
        }
    }

    /// A note ended.
    pub fn end(pitch: u8, time: f64) -> Signal {
        Signal {
            pitch,
            velocity: 0,
            time,
            kind: SignalKind::End,
        }
    }

    fn is_end(&self) -> bool {
        self.kind == SignalKind::End || self.velocity == 0
    }
}

/// Converts wall clock seconds to beats at the given tempo.
pub fn seconds_to_beats(seconds: f64, tempo: u32) -> f64 {
    seconds * (tempo as f64 / 60.0)
}

/// Converts file ticks to beats.
pub fn ticks_to_beats(ticks: u64, ticks_per_beat: u16) -> f64 {
    ticks as f64 / ticks_per_beat as f64
}

/// Pairs note starts with note ends. Each pitch keeps a queue of pending starts and an end
/// always completes the oldest one, so overlapping notes of the same pitch pair in the order
/// they began.
#[derive(Debug, Default)]
pub struct NotePairer {
    /// Pending starts per pitch as (time, velocity).
    pending: HashMap<u8, VecDeque<(f64, u8)>>,
}

impl NotePairer {
    pub fn new() -> NotePairer {
        NotePairer::default()
    }

    /// Processes a signal. Returns an event when the signal completes a note.
    pub fn push(&mut self, signal: Signal) -> Option<Event> {
        if !signal.is_end() {
            self.pending
                .entry(signal.pitch)
                .or_default()
                .push_back((signal.time, signal.velocity));
            return None;
        }

        let (start, velocity) = match self
            .pending
            .get_mut(&signal.pitch)
            .and_then(VecDeque::pop_front)
        {
            Some(pending) => pending,
            None => {
                debug!(pitch = signal.pitch, "Ignoring note end without a start.");
                return None;
            }
        };

        let duration = signal.time - start;
        if duration <= 0.0 {
            debug!(
                pitch = signal.pitch,
                duration, "Discarding note without a positive duration."
            );
            return None;
        }

        match Note::new(signal.pitch, velocity, duration)
            .and_then(|note| Event::single(note, start))
        {
            Ok(event) => Some(event),
            Err(e) => {
                debug!(err = e.to_string(), "Discarding invalid note.");
                None
            }
        }
    }

    /// The number of starts still waiting for an end.
    pub fn pending(&self) -> usize {
        self.pending.values().map(VecDeque::len).sum()
    }

    /// Drops any incomplete notes and returns how many were dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.pending();
        self.pending.clear();
        if dropped > 0 {
            debug!(dropped, "Dropped incomplete notes.");
        }
        dropped
    }
}

/// Pairs a whole chronological stream of signals into events. Incomplete notes are dropped.
pub fn pair_all<I>(signals: I) -> Vec<Event>
where
    I: IntoIterator<Item = Signal>,
{
    let mut pairer = NotePairer::new();
    let events = signals
        .into_iter()
        .filter_map(|signal| pairer.push(signal))
        .collect();
    pairer.finish();
    events
}

#[cfg(test)]
mod test {
    use super::*;

    fn summary(events: &[Event]) -> Vec<(u8, u8, f64, f64)> {
        events
            .iter()
            .map(|event| {
                let note = event.notes()[0];
                (
                    note.pitch(),
                    note.velocity(),
                    event.start_time(),
                    note.duration(),
                )
            })
            .collect()
    }

    #[test]
    fn test_fifo_pairing() {
        let events = pair_all(vec![
            Signal::start(60, 100, 0.0),
            Signal::start(60, 80, 0.5),
            Signal::end(60, 1.0),
            Signal::end(60, 1.5),
        ]);

        assert_eq!(
            vec![(60, 100, 0.0, 1.0), (60, 80, 0.5, 1.0)],
            summary(&events)
        );
    }

    #[test]
    fn test_zero_velocity_start_ends_note() {
        let events = pair_all(vec![
            Signal::start(64, 90, 1.0),
            Signal::start(64, 0, 2.5),
        ]);
        assert_eq!(vec![(64, 90, 1.0, 1.5)], summary(&events));
    }

    #[test]
    fn test_orphan_end_is_ignored() {
        let mut pairer = NotePairer::new();
        assert!(pairer.push(Signal::end(60, 1.0)).is_none());
        assert_eq!(0, pairer.pending());

        // A later pair on the same pitch still works.
        assert!(pairer.push(Signal::start(60, 100, 2.0)).is_none());
        let event = pairer.push(Signal::end(60, 3.0)).expect("expected event");
        assert_eq!(2.0, event.start_time());
    }

    #[test]
    fn test_non_positive_durations_are_dropped() {
        let events = pair_all(vec![
            Signal::start(60, 100, 1.0),
            Signal::end(60, 1.0),
            Signal::start(62, 100, 2.0),
            Signal::end(62, 1.5),
        ]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_pitches_pair_independently() {
        let events = pair_all(vec![
            Signal::start(60, 100, 0.0),
            Signal::start(64, 100, 0.0),
            Signal::end(64, 0.5),
            Signal::end(60, 2.0),
        ]);
        assert_eq!(
            vec![(64, 100, 0.0, 0.5), (60, 100, 0.0, 2.0)],
            summary(&events)
        );
    }

    #[test]
    fn test_incomplete_notes_are_dropped() {
        let mut pairer = NotePairer::new();
        pairer.push(Signal::start(60, 100, 0.0));
        pairer.push(Signal::start(60, 100, 1.0));
        pairer.push(Signal::start(67, 100, 1.0));
        assert!(pairer.push(Signal::end(60, 2.0)).is_some());
        assert_eq!(2, pairer.pending());
        assert_eq!(2, pairer.finish());
        assert_eq!(0, pairer.pending());
    }

    #[test]
    fn test_out_of_range_pitch_is_discarded() {
        let events = pair_all(vec![Signal::start(200, 100, 0.0), Signal::end(200, 1.0)]);
        assert!(events.is_empty());
    }

    #[test]
    fn test_unit_conversions() {
        assert_eq!(1.0, seconds_to_beats(0.5, 120));
        assert_eq!(0.5, seconds_to_beats(0.5, 60));
        assert_eq!(1.5, ticks_to_beats(720, 480));
        assert_eq!(0.0, ticks_to_beats(0, 96));
    }
}
