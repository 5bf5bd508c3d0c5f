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
use std::path::Path;

use config::{Config, Environment, File};
use tracing::info;

pub mod error;
mod sequencer;

pub use self::error::ConfigError;
pub use self::sequencer::Sequencer;

/// The prefix of environment variables that override the configuration file.
pub const ENV_PREFIX: &str = "MSEQ";

/// Loads the sequencer configuration. Values come from the defaults, then the YAML file if
/// one is given, then MSEQ_* environment variables.
pub fn load(path: Option<&Path>) -> Result<Sequencer, ConfigError> {
    let mut builder = Config::builder();
    if let Some(path) = path {
        builder = builder.add_source(File::from(path));
    }

    let sequencer: Sequencer = builder
        .add_source(Environment::with_prefix(ENV_PREFIX))
        .build()?
        .try_deserialize()?;
    sequencer.validate()?;

    info!(
        transport = sequencer.transport(),
        ticks_per_beat = sequencer.ticks_per_beat(),
        "Loaded configuration."
    );
    Ok(sequencer)
}

#[cfg(test)]
mod test {
    use std::fs;

    use tempfile::tempdir;

    use super::*;

    #[test]
    fn test_load_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("mseq.yaml");
        fs::write(&path, "transport: mock\nticks_per_beat: 96\n")?;

        let sequencer = load(Some(&path))?;
        assert_eq!("mock", sequencer.transport());
        assert_eq!(96, sequencer.ticks_per_beat());
        assert_eq!(120, sequencer.tempo());
        Ok(())
    }

    #[test]
    fn test_load_invalid_file() -> Result<(), Box<dyn std::error::Error>> {
        let dir = tempdir()?;
        let path = dir.path().join("mseq.yaml");
        fs::write(&path, "tempo: 0\n")?;
        assert!(matches!(
            load(Some(&path)),
            Err(ConfigError::Invalid { key: "tempo", .. })
        ));

        assert!(matches!(
            load(Some(&dir.path().join("missing.yaml"))),
            Err(ConfigError::Load(_))
        ));
        Ok(())
    }
}
