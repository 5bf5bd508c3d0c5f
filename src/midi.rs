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
    time::{Duration, Instant},
};

use midly::{live::LiveEvent, MidiMessage};

use crate::error::{Error, Result};

pub mod midir;
pub mod mock;

/// The controller number for all notes off.
pub const ALL_NOTES_OFF: u8 = 123;

/// The controller number for the bank select MSB.
pub const BANK_SELECT_MSB: u8 = 0;

/// The controller number for the bank select LSB.
pub const BANK_SELECT_LSB: u8 = 32;

/// The number of MIDI channels.
pub const NUM_CHANNELS: u8 = 16;

/// A channel message exchanged with a transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    NoteOn { channel: u8, key: u8, velocity: u8 },
    NoteOff { channel: u8, key: u8, velocity: u8 },
    ProgramChange { channel: u8, program: u8 },
    ControlChange { channel: u8, controller: u8, value: u8 },
}

impl Message {
    /// The panic message for a single channel.
    pub fn all_notes_off(channel: u8) -> Message {
        Message::ControlChange {
            channel,
            controller: ALL_NOTES_OFF,
            value: 0,
        }
    }

    pub fn channel(&self) -> u8 {
        match self {
            Message::NoteOn { channel, .. }
            | Message::NoteOff { channel, .. }
            | Message::ProgramChange { channel, .. }
            | Message::ControlChange { channel, .. } => *channel,
        }
    }

    /// Converts the message into a midly live event. Out of range values are masked to
    /// their MIDI bit width.
    pub fn to_live_event(&self) -> LiveEvent<'static> {
        let (channel, message) = match *self {
            Message::NoteOn {
                channel,
                key,
                velocity,
            } => (
                channel,
                MidiMessage::NoteOn {
                    key: key.into(),
                    vel: velocity.into(),
                },
            ),
            Message::NoteOff {
                channel,
                key,
                velocity,
            } => (
                channel,
                MidiMessage::NoteOff {
                    key: key.into(),
                    vel: velocity.into(),
                },
            ),
            Message::ProgramChange { channel, program } => (
                channel,
                MidiMessage::ProgramChange {
                    program: program.into(),
                },
            ),
            Message::ControlChange {
                channel,
                controller,
                value,
            } => (
                channel,
                MidiMessage::Controller {
                    controller: controller.into(),
                    value: value.into(),
                },
            ),
        };

        LiveEvent::Midi {
            channel: channel.into(),
            message,
        }
    }

    /// Converts a midly live event into a message if it's one of the supported kinds.
    pub fn from_live_event(event: &LiveEvent) -> Option<Message> {
        let (channel, message) = match event {
            LiveEvent::Midi { channel, message } => (channel.as_int(), message),
            _ => return None,
        };

        match *message {
            MidiMessage::NoteOn { key, vel } => Some(Message::NoteOn {
                channel,
                key: key.as_int(),
                velocity: vel.as_int(),
            }),
            MidiMessage::NoteOff { key, vel } => Some(Message::NoteOff {
                channel,
                key: key.as_int(),
                velocity: vel.as_int(),
            }),
            MidiMessage::ProgramChange { program } => Some(Message::ProgramChange {
                channel,
                program: program.as_int(),
            }),
            MidiMessage::Controller { controller, value } => Some(Message::ControlChange {
                channel,
                controller: controller.as_int(),
                value: value.as_int(),
            }),
            _ => None,
        }
    }

    /// Encodes the message as raw MIDI bytes.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut buf: Vec<u8> = Vec::with_capacity(8);
        self.to_live_event()
            .write(&mut buf)
            .map_err(|e| Error::Transport(format!("unable to encode message: {:?}", e)))?;
        Ok(buf)
    }

    /// Parses raw MIDI bytes.
    pub fn parse(raw: &[u8]) -> Option<Message> {
        LiveEvent::parse(raw)
            .ok()
            .and_then(|event| Message::from_live_event(&event))
    }
}

/// A message received from an input along with the time it arrived.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InputEvent {
    pub received: Instant,
    pub message: Message,
}

/// An opened output port.
pub trait Output: fmt::Display + Send + Sync {
    /// Returns the name of the port.
    fn name(&self) -> &str;

    /// Sends a message through the port.
    fn send(&self, message: &Message) -> Result<()>;

    /// Closes the port. Sending afterwards fails.
    fn close(&self);
}

/// An opened input port.
pub trait Input: Send {
    /// Returns the name of the port.
    fn name(&self) -> &str;

    /// Waits up to the timeout for the next message. Returns None on timeout and an error
    /// once the input can no longer produce messages.
    fn receive(&self, timeout: Duration) -> Result<Option<InputEvent>>;

    /// Closes the port.
    fn close(&self);
}

/// Enumerates and opens MIDI ports.
pub trait Transport: Send + Sync {
    /// Lists the names of the available input ports.
    fn list_inputs(&self) -> Result<Vec<String>>;

    /// Lists the names of the available output ports.
    fn list_outputs(&self) -> Result<Vec<String>>;

    /// Opens the output port with exactly the given name.
    fn open_output(&self, name: &str) -> Result<Arc<dyn Output>>;

    /// Creates a virtual output port that other applications can connect to.
    fn open_virtual_output(&self, name: &str) -> Result<Arc<dyn Output>>;

    /// Opens the input port with exactly the given name.
    fn open_input(&self, name: &str) -> Result<Box<dyn Input>>;
}

/// Gets a transport by kind. Kinds starting with "mock" produce a mock transport with a
/// single output and input, everything else uses midir.
pub fn get_transport(kind: &str, client_name: &str) -> Arc<dyn Transport> {
    if kind.starts_with("mock") {
        return Arc::new(mock::Transport::new(&["mock-output"], &["mock-input"]));
    }

    Arc::new(midir::Transport::new(client_name))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_live_event_conversion() {
        let messages = vec![
            Message::NoteOn {
                channel: 3,
                key: 60,
                velocity: 100,
            },
            Message::NoteOff {
                channel: 15,
                key: 61,
                velocity: 0,
            },
            Message::ProgramChange {
                channel: 0,
                program: 42,
            },
            Message::all_notes_off(9),
        ];

        for message in messages {
            let bytes = message.to_bytes().expect("unable to encode");
            assert_eq!(Some(message), Message::parse(&bytes));
        }
    }

    #[test]
    fn test_all_notes_off() {
        let event = Message::all_notes_off(4).to_live_event();
        let expected = LiveEvent::Midi {
            channel: 4.into(),
            message: MidiMessage::Controller {
                controller: 123.into(),
                value: 0.into(),
            },
        };
        assert_eq!(expected, event);
        assert_eq!(4, Message::all_notes_off(4).channel());
    }

    #[test]
    fn test_unsupported_events() {
        let event = LiveEvent::Midi {
            channel: 0.into(),
            message: MidiMessage::ChannelAftertouch { vel: 10.into() },
        };
        assert_eq!(None, Message::from_live_event(&event));
        assert_eq!(None, Message::parse(&[]));
    }
}
