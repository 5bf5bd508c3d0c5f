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
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::{
    error::{Error, Result},
    ports::{DestinationId, PortManager},
    songs::Song,
};

/// Routes the track with the given name to the given port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackAssignment {
    pub track_name: String,
    pub port_name: String,
}

/// A project ties a MIDI file to the virtual ports and track routing it's played with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Project {
    pub midi_file: PathBuf,
    #[serde(default)]
    pub virtual_ports: Vec<String>,
    #[serde(default)]
    pub track_assignments: Vec<TrackAssignment>,
}

impl Project {
    /// Captures the routing of the given song.
    pub fn new(midi_file: &Path, song: &Song, ports: &PortManager) -> Project {
        Project {
            midi_file: midi_file.to_path_buf(),
            virtual_ports: ports
                .virtual_ports()
                .iter()
                .map(|id| id.as_str().to_string())
                .collect(),
            track_assignments: song
                .tracks()
                .iter()
                .filter_map(|track| {
                    track.output().map(|output| TrackAssignment {
                        track_name: track.name().to_string(),
                        port_name: output.as_str().to_string(),
                    })
                })
                .collect(),
        }
    }

    /// Reads a project document.
    pub fn load(path: &Path) -> Result<Project> {
        let project: Project = serde_json::from_str(&fs::read_to_string(path)?)?;
        if project.midi_file.as_os_str().is_empty() {
            return Err(Error::Project(format!(
                "{}: midi_file cannot be empty",
                path.display()
            )));
        }
        Ok(project)
    }

    /// Writes the project document.
    pub fn save(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        info!(path = path.display().to_string(), "Saved project.");
        Ok(())
    }

    /// The MIDI file's location. Relative paths are relative to the project file.
    pub fn resolve_midi_file(&self, project_path: &Path) -> PathBuf {
        if self.midi_file.is_absolute() {
            return self.midi_file.clone();
        }
        project_path
            .parent()
            .map(|dir| dir.join(&self.midi_file))
            .unwrap_or_else(|| self.midi_file.clone())
    }

    /// Creates the virtual ports and routes the tracks of a freshly loaded song. Nothing here
    /// is fatal: ports that can't be created and assignments naming an unknown track are
    /// returned as warnings.
    pub fn apply(&self, song: &mut Song, ports: &mut PortManager) -> Vec<String> {
        let mut warnings = Vec::new();

        for name in self.virtual_ports.iter() {
            if ports.is_virtual(&DestinationId::new(name)) {
                continue;
            }
            if let Err(e) = ports.create_virtual(name) {
                warn!(port = name, err = e.to_string(), "Unable to create virtual port.");
                warnings.push(format!("unable to create virtual port {}: {}", name, e));
            }
        }

        for assignment in self.track_assignments.iter() {
            let track = song
                .find_track(&assignment.track_name)
                .and_then(|index| song.track_mut(index).ok());
            match track {
                Some(track) => {
                    track.set_output(Some(DestinationId::new(&assignment.port_name)));
                }
                None => {
                    warn!(
                        track = assignment.track_name,
                        "No track found for assignment."
                    );
                    warnings.push(format!(
                        "no track named {} to assign to {}",
                        assignment.track_name, assignment.port_name
                    ));
                }
            }
        }

        warnings
    }
}
