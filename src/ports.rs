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
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use serde::{Deserialize, Serialize};
use tracing::{info, span, warn, Level, Span};

use crate::{
    error::{Error, Result},
    midi::{Message, Output, Transport, NUM_CHANNELS},
};

/// Identifies an output destination. Destinations are matched by exact name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DestinationId(String);

impl DestinationId {
    pub fn new(name: &str) -> DestinationId {
        DestinationId(name.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DestinationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Keeps the long lived virtual destinations and opens per playback sessions.
pub struct PortManager {
    transport: Arc<dyn Transport>,
    virtual_ports: BTreeMap<DestinationId, Arc<dyn Output>>,
    span: Span,
}

impl PortManager {
    pub fn new(transport: Arc<dyn Transport>) -> PortManager {
        PortManager {
            transport,
            virtual_ports: BTreeMap::new(),
            span: span!(Level::INFO, "ports"),
        }
    }

    pub fn transport(&self) -> Arc<dyn Transport> {
        self.transport.clone()
    }

    /// Creates a virtual destination that lives until it's removed.
    pub fn create_virtual(&mut self, name: &str) -> Result<DestinationId> {
        let _enter = self.span.enter();

        if name.trim().is_empty() {
            return Err(Error::invalid("port name cannot be empty"));
        }
        let id = DestinationId::new(name);
        if self.virtual_ports.contains_key(&id) {
            return Err(Error::invalid(format!(
                "virtual port {} already exists",
                name
            )));
        }

        let output = self.transport.open_virtual_output(name)?;
        info!(port = name, "Created virtual port.");
        self.virtual_ports.insert(id.clone(), output);
        Ok(id)
    }

    /// Closes and forgets a virtual destination.
    pub fn remove_virtual(&mut self, name: &str) -> Result<()> {
        let _enter = self.span.enter();

        match self.virtual_ports.remove(&DestinationId::new(name)) {
            Some(output) => {
                output.close();
                info!(port = name, "Removed virtual port.");
                Ok(())
            }
            None => Err(Error::invalid(format!("no virtual port named {}", name))),
        }
    }

    /// The virtual destinations, sorted by name.
    pub fn virtual_ports(&self) -> Vec<DestinationId> {
        self.virtual_ports.keys().cloned().collect()
    }

    pub fn is_virtual(&self, id: &DestinationId) -> bool {
        self.virtual_ports.contains_key(id)
    }

    /// Resolves every destination for a playback session. Virtual destinations are shared with
    /// the session, all others are opened for the session only. If any destination can't be
    /// opened, the ones already opened for this session are closed again.
    pub fn open_session<'a, I>(&self, ids: I) -> Result<Arc<PortSession>>
    where
        I: IntoIterator<Item = &'a DestinationId>,
    {
        let _enter = self.span.enter();

        let mut ports: HashMap<DestinationId, Arc<dyn Output>> = HashMap::new();
        let mut session_scoped: HashSet<DestinationId> = HashSet::new();
        for id in ids {
            if ports.contains_key(id) {
                continue;
            }

            if let Some(output) = self.virtual_ports.get(id) {
                ports.insert(id.clone(), output.clone());
                continue;
            }

            match self.transport.open_output(id.as_str()) {
                Ok(output) => {
                    session_scoped.insert(id.clone());
                    ports.insert(id.clone(), output);
                }
                Err(e) => {
                    warn!(
                        port = id.as_str(),
                        err = e.to_string(),
                        "Unable to open port, closing ports opened for this session."
                    );
                    for opened in session_scoped.iter() {
                        if let Some(output) = ports.get(opened) {
                            output.close();
                        }
                    }
                    return Err(match e {
                        Error::PortUnavailable(_) => e,
                        e => Error::PortUnavailable(format!("{}: {}", id, e)),
                    });
                }
            }
        }

        info!(
            destinations = ports.len(),
            session_scoped = session_scoped.len(),
            "Opened port session."
        );
        Ok(Arc::new(PortSession {
            ports,
            session_scoped,
            released: AtomicBool::new(false),
        }))
    }
}

impl Drop for PortManager {
    fn drop(&mut self) {
        for output in self.virtual_ports.values() {
            output.close();
        }
    }
}

/// The destinations in use by a single playback run.
pub struct PortSession {
    ports: HashMap<DestinationId, Arc<dyn Output>>,
    session_scoped: HashSet<DestinationId>,
    released: AtomicBool,
}

impl PortSession {
    /// Resolves a destination. Returns None if it isn't part of the session or the session has
    /// been released.
    pub fn get(&self, id: &DestinationId) -> Option<&Arc<dyn Output>> {
        if self.is_released() && self.session_scoped.contains(id) {
            return None;
        }
        self.ports.get(id)
    }

    /// The destinations in use, sorted by name.
    pub fn destinations(&self) -> Vec<DestinationId> {
        let mut destinations: Vec<DestinationId> = self.ports.keys().cloned().collect();
        destinations.sort();
        destinations
    }

    pub fn is_session_scoped(&self, id: &DestinationId) -> bool {
        self.session_scoped.contains(id)
    }

    pub fn is_released(&self) -> bool {
        self.released.load(Ordering::Acquire)
    }

    /// Sends all notes off on every channel of every destination.
    pub fn all_notes_off(&self) {
        for (id, output) in self.ports.iter() {
            if self.get(id).is_none() {
                continue;
            }
            for channel in 0..NUM_CHANNELS {
                if let Err(e) = output.send(&Message::all_notes_off(channel)) {
                    warn!(
                        port = id.as_str(),
                        err = e.to_string(),
                        "Error sending all notes off."
                    );
                    break;
                }
            }
        }
    }

    /// Closes the session scoped destinations. Virtual destinations stay open. Calling this
    /// more than once has no further effect.
    pub fn release(&self) {
        if self.released.swap(true, Ordering::AcqRel) {
            return;
        }

        for id in self.session_scoped.iter() {
            if let Some(output) = self.ports.get(id) {
                output.close();
            }
        }
        info!(closed = self.session_scoped.len(), "Released port session.");
    }
}

#[cfg(test)]
mod test {
    use crate::midi::mock;

    use super::*;

    fn manager(outputs: &[&str]) -> (Arc<mock::Transport>, PortManager) {
        let transport = Arc::new(mock::Transport::new(outputs, &[]));
        let manager = PortManager::new(transport.clone());
        (transport, manager)
    }

    #[test]
    fn test_virtual_ports() -> Result<()> {
        let (transport, mut manager) = manager(&[]);
        let id = manager.create_virtual("seq out")?;
        assert!(manager.is_virtual(&id));
        assert!(matches!(
            manager.create_virtual("seq out"),
            Err(Error::InvalidArgument(_))
        ));
        assert!(manager.create_virtual(" ").is_err());
        assert_eq!(vec![id.clone()], manager.virtual_ports());

        manager.remove_virtual("seq out")?;
        assert!(transport.output("seq out").expect("expected output").is_closed());
        assert!(manager.remove_virtual("seq out").is_err());
        assert!(manager.virtual_ports().is_empty());
        Ok(())
    }

    #[test]
    fn test_session_resolves_and_releases() -> Result<()> {
        let (transport, mut manager) = manager(&["synth", "drums"]);
        let virtual_id = manager.create_virtual("loop")?;
        let synth = DestinationId::new("synth");

        let session = manager.open_session(vec![&synth, &virtual_id, &synth])?;
        assert_eq!(
            vec![virtual_id.clone(), synth.clone()],
            session.destinations()
        );
        assert!(session.is_session_scoped(&synth));
        assert!(!session.is_session_scoped(&virtual_id));
        assert!(session.get(&DestinationId::new("drums")).is_none());

        session.all_notes_off();
        let synth_output = transport.output("synth").expect("expected output");
        assert_eq!(16, synth_output.messages().len());
        assert_eq!(Message::all_notes_off(15), synth_output.messages()[15]);

        session.release();
        session.release();
        assert!(synth_output.is_closed());
        assert!(session.get(&synth).is_none());
        // Virtual ports outlive the session.
        let loop_output = transport.output("loop").expect("expected output");
        assert!(!loop_output.is_closed());
        assert!(session.get(&virtual_id).is_some());
        Ok(())
    }

    #[test]
    fn test_session_rolls_back_on_failure() {
        let (transport, manager) = manager(&["a", "b", "c"]);
        transport.set_unavailable("c");

        let ids = [
            DestinationId::new("a"),
            DestinationId::new("b"),
            DestinationId::new("c"),
        ];
        assert!(matches!(
            manager.open_session(ids.iter()),
            Err(Error::PortUnavailable(_))
        ));

        let opened = transport.opened();
        assert_eq!(2, opened.len());
        assert!(opened.iter().all(|output| output.is_closed()));
    }

    #[test]
    fn test_unknown_port_is_unavailable() {
        let (_transport, manager) = manager(&["synth"]);
        let id = DestinationId::new("synthesizer");
        assert!(matches!(
            manager.open_session([&id]),
            Err(Error::PortUnavailable(_))
        ));
    }
}
