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
use std::time::Duration;

use duration_string::DurationString;
use serde::Deserialize;

use crate::songs::DEFAULT_TEMPO;

use super::error::ConfigError;

pub const DEFAULT_TRANSPORT: &str = "midir";
pub const DEFAULT_CLIENT_NAME: &str = "mseq";
pub const DEFAULT_TICKS_PER_BEAT: u16 = 480;
pub const DEFAULT_RECORD_POLL_INTERVAL: &str = "50ms";

/// The largest resolution a MIDI file header can carry.
const MAX_TICKS_PER_BEAT: u16 = 0x7FFF;

/// The configuration for the sequencer.
#[derive(Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Sequencer {
    /// The MIDI transport to use, either midir or mock.
    transport: String,
    /// The client name announced to the MIDI system.
    client_name: String,
    /// The playback and file export resolution.
    ticks_per_beat: u16,
    /// The tempo of new songs.
    tempo: u32,
    /// How long recording waits for input before checking whether it should stop.
    record_poll_interval: String,
    /// The input recorded from when none is given.
    input_port: Option<String>,
}

impl Default for Sequencer {
    fn default() -> Self {
        Sequencer {
            transport: DEFAULT_TRANSPORT.to_string(),
            client_name: DEFAULT_CLIENT_NAME.to_string(),
            ticks_per_beat: DEFAULT_TICKS_PER_BEAT,
            tempo: DEFAULT_TEMPO,
            record_poll_interval: DEFAULT_RECORD_POLL_INTERVAL.to_string(),
            input_port: None,
        }
    }
}

impl Sequencer {
    /// Creates a default configuration that uses the given transport.
    pub fn new(transport: &str) -> Sequencer {
        Sequencer {
            transport: transport.to_string(),
            ..Default::default()
        }
    }

    pub fn transport(&self) -> &str {
        &self.transport
    }

    pub fn client_name(&self) -> &str {
        &self.client_name
    }

    pub fn ticks_per_beat(&self) -> u16 {
        self.ticks_per_beat
    }

    pub fn tempo(&self) -> u32 {
        self.tempo
    }

    pub fn input_port(&self) -> Option<&str> {
        self.input_port.as_deref()
    }

    /// Returns the record poll interval from the configuration.
    pub fn record_poll_interval(&self) -> Result<Duration, ConfigError> {
        let interval: Duration = DurationString::from_string(self.record_poll_interval.clone())
            .map_err(|e| {
                ConfigError::invalid(
                    "record_poll_interval",
                    format!("{}: {}", self.record_poll_interval, e),
                )
            })?
            .into();
        if interval.is_zero() {
            return Err(ConfigError::invalid(
                "record_poll_interval",
                "must be positive",
            ));
        }
        Ok(interval)
    }

    /// Checks that every value is in range.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.ticks_per_beat == 0 || self.ticks_per_beat > MAX_TICKS_PER_BEAT {
            return Err(ConfigError::invalid(
                "ticks_per_beat",
                format!(
                    "must be between 1 and {}, got {}",
                    MAX_TICKS_PER_BEAT, self.ticks_per_beat
                ),
            ));
        }
        if self.tempo == 0 {
            return Err(ConfigError::invalid("tempo", "must be positive"));
        }
        if self.client_name.trim().is_empty() {
            return Err(ConfigError::invalid("client_name", "cannot be empty"));
        }
        self.record_poll_interval()?;
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use config::{Config, File, FileFormat};

    use super::*;

    fn parse(yaml: &str) -> Sequencer {
        Config::builder()
            .add_source(File::from_str(yaml, FileFormat::Yaml))
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap()
    }

    #[test]
    fn test_defaults() {
        let sequencer = parse("{}");
        assert_eq!("midir", sequencer.transport());
        assert_eq!("mseq", sequencer.client_name());
        assert_eq!(480, sequencer.ticks_per_beat());
        assert_eq!(120, sequencer.tempo());
        assert_eq!(None, sequencer.input_port());
        assert_eq!(
            Duration::from_millis(50),
            sequencer.record_poll_interval().unwrap()
        );
        assert!(sequencer.validate().is_ok());
    }

    #[test]
    fn test_deserialize() {
        let yaml = r#"
            transport: mock
            client_name: studio
            ticks_per_beat: 960
            tempo: 90
            record_poll_interval: 1s
            input_port: keys
        "#;

        let sequencer = parse(yaml);
        assert_eq!("mock", sequencer.transport());
        assert_eq!("studio", sequencer.client_name());
        assert_eq!(960, sequencer.ticks_per_beat());
        assert_eq!(90, sequencer.tempo());
        assert_eq!(Some("keys"), sequencer.input_port());
        assert_eq!(
            Duration::from_secs(1),
            sequencer.record_poll_interval().unwrap()
        );
    }

    #[test]
    fn test_validate() {
        assert!(matches!(
            parse("ticks_per_beat: 0").validate(),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            parse("ticks_per_beat: 40000").validate(),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            parse("tempo: 0").validate(),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            parse("record_poll_interval: soon").validate(),
            Err(ConfigError::Invalid { .. })
        ));
        assert!(matches!(
            parse("record_poll_interval: 0ms").validate(),
            Err(ConfigError::Invalid { .. })
        ));
    }
}
