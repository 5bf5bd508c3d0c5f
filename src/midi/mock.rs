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
    collections::{HashMap, HashSet},
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    thread,
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, info};

use crate::error::{Error, Result};

use super::{InputEvent, Message};

/// A mock transport. Doesn't talk to any hardware, but remembers everything sent through it.
pub struct Transport {
    outputs: Vec<String>,
    inputs: Mutex<HashMap<String, (Option<Sender<InputEvent>>, Receiver<InputEvent>)>>,
    unavailable: Mutex<HashSet<String>>,
    opened: Mutex<Vec<Arc<Output>>>,
}

impl Transport {
    /// Creates a mock transport with the given output and input ports.
    pub fn new(outputs: &[&str], inputs: &[&str]) -> Transport {
        Transport {
            outputs: outputs.iter().map(|name| name.to_string()).collect(),
            inputs: Mutex::new(
                inputs
                    .iter()
                    .map(|name| {
                        let (sender, receiver) = crossbeam_channel::unbounded();
                        (name.to_string(), (Some(sender), receiver))
                    })
                    .collect(),
            ),
            unavailable: Mutex::new(HashSet::new()),
            opened: Mutex::new(Vec::new()),
        }
    }

    /// Makes opening the named port fail.
    pub fn set_unavailable(&self, name: &str) {
        self.unavailable.lock().insert(name.to_string());
    }

    /// Returns the most recently opened output with the given name.
    pub fn output(&self, name: &str) -> Option<Arc<Output>> {
        self.opened
            .lock()
            .iter()
            .rev()
            .find(|output| output.name == name)
            .cloned()
    }

    /// Returns every output opened so far, in the order they were opened.
    pub fn opened(&self) -> Vec<Arc<Output>> {
        self.opened.lock().clone()
    }

    /// Queues a message on the named input.
    pub fn send_input(&self, name: &str, event: InputEvent) {
        if let Some((Some(sender), _)) = self.inputs.lock().get(name) {
            let _ = sender.send(event);
        }
    }

    /// Ends the named input stream. Queued messages can still be received.
    pub fn disconnect_input(&self, name: &str) {
        if let Some((sender, _)) = self.inputs.lock().get_mut(name) {
            sender.take();
        }
    }

    fn check_available(&self, name: &str) -> Result<()> {
        if self.unavailable.lock().contains(name) {
            return Err(Error::PortUnavailable(format!("{} is unavailable", name)));
        }
        Ok(())
    }

    fn register(&self, name: &str, is_virtual: bool) -> Arc<Output> {
        let output = Arc::new(Output {
            name: name.to_string(),
            is_virtual,
            sent: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
            fail_sends: AtomicBool::new(false),
            panic_on_notes: AtomicBool::new(false),
            send_delay: Mutex::new(Duration::ZERO),
        });
        self.opened.lock().push(output.clone());
        output
    }
}

impl super::Transport for Transport {
    fn list_inputs(&self) -> Result<Vec<String>> {
        let mut names: Vec<String> = self.inputs.lock().keys().cloned().collect();
        names.sort();
        Ok(names)
    }

    fn list_outputs(&self) -> Result<Vec<String>> {
        Ok(self.outputs.clone())
    }

    fn open_output(&self, name: &str) -> Result<Arc<dyn super::Output>> {
        self.check_available(name)?;
        if !self.outputs.iter().any(|output| output == name) {
            return Err(Error::PortUnavailable(format!(
                "no output port named {}",
                name
            )));
        }

        info!(port = name, "Opened mock output.");
        Ok(self.register(name, false))
    }

    fn open_virtual_output(&self, name: &str) -> Result<Arc<dyn super::Output>> {
        self.check_available(name)?;
        info!(port = name, "Created mock virtual output.");
        Ok(self.register(name, true))
    }

    fn open_input(&self, name: &str) -> Result<Box<dyn super::Input>> {
        self.check_available(name)?;
        let receiver = match self.inputs.lock().get(name) {
            Some((_, receiver)) => receiver.clone(),
            None => {
                return Err(Error::PortUnavailable(format!(
                    "no input port named {}",
                    name
                )))
            }
        };

        Ok(Box::new(Input {
            name: name.to_string(),
            receiver,
            closed: AtomicBool::new(false),
        }))
    }
}

/// A mock output that records every message sent to it.
pub struct Output {
    name: String,
    is_virtual: bool,
    sent: Mutex<Vec<(Instant, Message)>>,
    closed: AtomicBool,
    fail_sends: AtomicBool,
    panic_on_notes: AtomicBool,
    send_delay: Mutex<Duration>,
}

impl Output {
    /// The messages sent so far.
    pub fn messages(&self) -> Vec<Message> {
        self.sent.lock().iter().map(|(_, message)| *message).collect()
    }

    /// The messages sent so far with the time they were sent.
    pub fn timed_messages(&self) -> Vec<(Instant, Message)> {
        self.sent.lock().clone()
    }

    /// The note on and note off messages sent so far.
    pub fn note_messages(&self) -> Vec<Message> {
        self.messages()
            .into_iter()
            .filter(|message| {
                matches!(message, Message::NoteOn { .. } | Message::NoteOff { .. })
            })
            .collect()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Relaxed)
    }

    pub fn is_virtual(&self) -> bool {
        self.is_virtual
    }

    /// Makes every following send fail.
    pub fn set_fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::Relaxed);
    }

    /// Makes the sending thread panic on every following note message.
    pub fn set_panic_on_notes(&self, panic: bool) {
        self.panic_on_notes.store(panic, Ordering::Relaxed);
    }

    /// Makes every following send take at least the given time.
    pub fn set_send_delay(&self, delay: Duration) {
        *self.send_delay.lock() = delay;
    }
}

impl super::Output for Output {
    fn name(&self) -> &str {
        &self.name
    }

    fn send(&self, message: &Message) -> Result<()> {
        if self.is_closed() {
            return Err(Error::PortClosed(self.name.clone()));
        }
        if self.fail_sends.load(Ordering::Relaxed) {
            return Err(Error::Transport(format!("{}: send failed", self.name)));
        }
        if self.panic_on_notes.load(Ordering::Relaxed)
            && matches!(message, Message::NoteOn { .. } | Message::NoteOff { .. })
        {
            panic!("{}: note sent to a panicking output", self.name);
        }

        let delay = *self.send_delay.lock();
        if !delay.is_zero() {
            thread::sleep(delay);
        }

        debug!(
            port = self.name,
            message = format!("{:?}", message),
            "Mock send."
        );
        self.sent.lock().push((Instant::now(), *message));
        Ok(())
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

impl fmt::Display for Output {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (Mock)", self.name)
    }
}

/// A mock input fed through the transport.
pub struct Input {
    name: String,
    receiver: Receiver<InputEvent>,
    closed: AtomicBool,
}

impl super::Input for Input {
    fn name(&self) -> &str {
        &self.name
    }

    fn receive(&self, timeout: Duration) -> Result<Option<InputEvent>> {
        if self.closed.load(Ordering::Relaxed) {
            return Err(Error::InputClosed(self.name.clone()));
        }

        match self.receiver.recv_timeout(timeout) {
            Ok(event) => Ok(Some(event)),
            Err(RecvTimeoutError::Timeout) => Ok(None),
            Err(RecvTimeoutError::Disconnected) => Err(Error::InputClosed(self.name.clone())),
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod test {
    use crate::midi::{Input as _, Output as _, Transport as _};

    use super::*;

    #[test]
    fn test_mock_output() -> Result<()> {
        let transport = Transport::new(&["synth"], &[]);
        assert!(transport.open_output("synt").is_err());

        let output = transport.open_output("synth")?;
        output.send(&Message::all_notes_off(0))?;
        let mock = transport.output("synth").expect("expected output");
        assert_eq!(vec![Message::all_notes_off(0)], mock.messages());

        mock.set_fail_sends(true);
        assert!(output.send(&Message::all_notes_off(1)).is_err());
        mock.set_fail_sends(false);

        output.close();
        assert!(mock.is_closed());
        assert!(matches!(
            output.send(&Message::all_notes_off(0)),
            Err(Error::PortClosed(_))
        ));

        transport.set_unavailable("synth");
        assert!(matches!(
            transport.open_output("synth"),
            Err(Error::PortUnavailable(_))
        ));
        Ok(())
    }

    #[test]
    fn test_mock_input() -> Result<()> {
        let transport = Transport::new(&[], &["keys"]);
        assert_eq!(vec!["keys".to_string()], transport.list_inputs()?);
        let input = transport.open_input("keys")?;
        assert_eq!(None, input.receive(Duration::from_millis(1))?);

        let event = InputEvent {
            received: Instant::now(),
            message: Message::NoteOn {
                channel: 0,
                key: 60,
                velocity: 100,
            },
        };
        transport.send_input("keys", event);
        transport.disconnect_input("keys");
        assert_eq!(Some(event), input.receive(Duration::from_millis(1))?);
        assert!(matches!(
            input.receive(Duration::from_millis(1)),
            Err(Error::InputClosed(_))
        ));
        Ok(())
    }
}
