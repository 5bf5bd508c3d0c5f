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
    fmt, mem,
    sync::Arc,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError};
use midir::{MidiInput, MidiInputConnection, MidiInputPort, MidiOutput, MidiOutputConnection};
use parking_lot::Mutex;
use tracing::{debug, error, info, span, Level};

use crate::error::{Error, Result};

use super::{InputEvent, Message};

/// A transport backed by the platform MIDI system through midir.
pub struct Transport {
    client_name: String,
}

impl Transport {
    pub fn new(client_name: &str) -> Transport {
        Transport {
            client_name: client_name.to_string(),
        }
    }

    fn output(&self, purpose: &str) -> Result<MidiOutput> {
        MidiOutput::new(&format!("{} {}", self.client_name, purpose))
            .map_err(|e| Error::Transport(e.to_string()))
    }

    fn input(&self, purpose: &str) -> Result<MidiInput> {
        MidiInput::new(&format!("{} {}", self.client_name, purpose))
            .map_err(|e| Error::Transport(e.to_string()))
    }
}

impl super::Transport for Transport {
    fn list_inputs(&self) -> Result<Vec<String>> {
        let input = self.input("input listing")?;
        let mut names = input
            .ports()
            .iter()
            .map(|port| {
                input
                    .port_name(port)
                    .map_err(|e| Error::Transport(e.to_string()))
            })
            .collect::<Result<Vec<String>>>()?;
        names.sort();
        Ok(names)
    }

    fn list_outputs(&self) -> Result<Vec<String>> {
        let output = self.output("output listing")?;
        let mut names = output
            .ports()
            .iter()
            .map(|port| {
                output
                    .port_name(port)
                    .map_err(|e| Error::Transport(e.to_string()))
            })
            .collect::<Result<Vec<String>>>()?;
        names.sort();
        Ok(names)
    }

    fn open_output(&self, name: &str) -> Result<Arc<dyn super::Output>> {
        let span = span!(Level::INFO, "open output (midir)");
        let _enter = span.enter();

        let output = self.output("output")?;
        let port = output
            .ports()
            .into_iter()
            .find(|port| output.port_name(port).is_ok_and(|port_name| port_name == name))
            .ok_or_else(|| Error::PortUnavailable(format!("no output port named {}", name)))?;

        let connection = output
            .connect(&port, &self.client_name)
            .map_err(|e| Error::PortUnavailable(format!("{}: {}", name, e)))?;

        info!(port = name, "Opened MIDI output.");
        Ok(Arc::new(Output::new(name, connection, false)))
    }

    #[cfg(unix)]
    fn open_virtual_output(&self, name: &str) -> Result<Arc<dyn super::Output>> {
        use midir::os::unix::VirtualOutput;

        let connection = self
            .output("virtual output")?
            .create_virtual(name)
            .map_err(|e| Error::PortUnavailable(format!("{}: {}", name, e)))?;

        info!(port = name, "Created virtual MIDI output.");
        Ok(Arc::new(Output::new(name, connection, true)))
    }

    #[cfg(not(unix))]
    fn open_virtual_output(&self, name: &str) -> Result<Arc<dyn super::Output>> {
        Err(Error::PortUnavailable(format!(
            "{}: virtual ports are not supported on this platform",
            name
        )))
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn super::Input>> {
        let span = span!(Level::INFO, "open input (midir)");
        let _enter = span.enter();

        let input = self.input("input")?;
        let port: MidiInputPort = input
            .ports()
            .into_iter()
            .find(|port| input.port_name(port).is_ok_and(|port_name| port_name == name))
            .ok_or_else(|| Error::PortUnavailable(format!("no input port named {}", name)))?;

        let (sender, receiver) = crossbeam_channel::unbounded::<InputEvent>();
        let connection = input
            .connect(
                &port,
                &self.client_name,
                move |_, raw_event, _| {
                    let message = match Message::parse(raw_event) {
                        Some(message) => message,
                        None => return,
                    };
                    debug!(message = format!("{:?}", message), "Received MIDI event.");
                    let event = InputEvent {
                        received: Instant::now(),
                        message,
                    };
                    if let Err(e) = sender.send(event) {
                        error!(err = e.to_string(), "Error sending MIDI event to receiver.");
                    }
                },
                (),
            )
            .map_err(|e| Error::PortUnavailable(format!("{}: {}", name, e)))?;

        info!(port = name, "Opened MIDI input.");
        Ok(Box::new(Input {
            name: name.to_string(),
            connection: Mutex::new(Some(connection)),
            receiver,
        }))
    }
}

/// An output port connection.
pub struct Output {
    name: String,
    is_virtual: bool,
    connection: Mutex<Option<MidiOutputConnection>>,
}

impl Output {
    fn new(name: &str, connection: MidiOutputConnection, is_virtual: bool) -> Output {
        Output {
            name: name.to_string(),
            is_virtual,
            connection: Mutex::new(Some(connection)),
        }
    }
}

impl super::Output for Output {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: &Message) -> Result<()> {
        let buf = message.to_bytes()?;
        let mut connection = self.connection.lock();
        match connection.as_mut() {
            Some(connection) => connection
                .send(&buf)
                .map_err(|e| Error::Transport(format!("{}: {}", self.name, e))),
            None => Err(Error::PortClosed(self.name.clone())),
        }
    }

    fn close(&self) {
        if let Some(connection) = self.connection.lock().take() {
            info!(port = self.name, "Closing MIDI output.");
            mem::drop(connection.close());
        }
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_virtual {
            write!(f, "{} (Virtual)", self.name)
        } else {
            write!(f, "{} (Output)", self.name)
        }
    }
}

/// An input port connection. Events arrive on the midir callback thread and are handed over
/// through a channel.
pub struct Input {
    name: String,
    connection: Mutex<Option<MidiInputConnection<()>>>,
    receiver: Receiver<InputEvent>,
}

impl super::Input for Input {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&self, timeout: Duration) -> Result<Option<InputEvent>> {
        if self.connection.lock().is_none() {
            return Err(Error::InputClosed(self.name.clone()));
        }

        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::InputClosed(self.name.clone())),
        }
    }

    fn close(&self) {
        // Explicitly drop the connection.
        if let Some(connection) = self.connection.lock().take() {
            info!(port = self.name, "Closing MIDI input.");
            mem::drop(connection.close());
        }
    }
}

impl Drop for Input {
    fn drop(&mut self) {
        super::Input::close(self);
    }
}
