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

use std::path::Path;
use std::time::Duration;

/// Extracts a displayable file name from a path, returning a fallback if the name is unreadable.
pub fn filename_display(path: &Path) -> &str {
    path.file_name()
        .and_then(|f| f.to_str())
        .unwrap_or("unreadable file name")
}

/// How long the given number of beats lasts at the given tempo.
pub fn beats_duration(beats: f64, tempo: u32) -> Duration {
    if tempo == 0 || !beats.is_finite() || beats <= 0.0 {
        return Duration::ZERO;
    }
    Duration::from_secs_f64(beats * 60.0 / tempo as f64)
}

/// Outputs the given duration in a minutes:seconds format.
pub fn duration_minutes_seconds(duration: Duration) -> String {
    let minutes = duration.as_secs() / 60;
    let secs = duration.as_secs() - minutes * 60;
    format!("{}:{:02}", minutes, secs)
}

#[cfg(test)]
mod test {
    use std::{path::Path, time::Duration};

    use crate::util::{beats_duration, duration_minutes_seconds, filename_display};

    #[test]
    fn test_filename_display() {
        assert_eq!("song.mid", filename_display(Path::new("/songs/song.mid")));
        assert_eq!("song.mid", filename_display(Path::new("song.mid")));
        assert_eq!("unreadable file name", filename_display(Path::new("/")));
    }

    #[test]
    fn test_beats_duration() {
        assert_eq!(Duration::from_secs(2), beats_duration(4.0, 120));
        assert_eq!(Duration::from_secs(30), beats_duration(30.0, 60));
        assert_eq!(Duration::ZERO, beats_duration(0.0, 120));
        assert_eq!(Duration::ZERO, beats_duration(4.0, 0));
    }

    #[test]
    fn test_duration_minutes_strings() {
        assert_eq!("0:00", duration_minutes_seconds(Duration::new(0, 0)));
        assert_eq!("0:05", duration_minutes_seconds(Duration::new(5, 0)));
        assert_eq!("0:55", duration_minutes_seconds(Duration::new(55, 0)));
        assert_eq!("1:00", duration_minutes_seconds(Duration::new(60, 0)));
        assert_eq!("2:05", duration_minutes_seconds(Duration::new(125, 0)));
        assert_eq!("60:06", duration_minutes_seconds(Duration::new(3606, 0)));
        assert_eq!("1:00", duration_minutes_seconds(beats_duration(120.0, 120)));
    }
}
