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
use std::error::Error;
use std::io;
use std::path::PathBuf;

use clap::{crate_version, Parser, Subcommand};
use mseq::codec::{self, SmfCodec};
use mseq::config;
use mseq::player::Outcome;
use mseq::sequencer::Sequencer;
use mseq::shell::Shell;
use mseq::util::{beats_duration, duration_minutes_seconds};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[clap(
    author = "Michael Wilson",
    version = crate_version!(),
    about = "A multitrack MIDI sequencer."
)]
struct Cli {
    /// The path to the sequencer config.
    #[arg(short, long)]
    config: Option<PathBuf>,
    #[clap(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Lists the available MIDI input and output ports.
    Ports {},
    /// Describes the tracks of a MIDI file.
    Info {
        /// The MIDI file to describe.
        file: PathBuf,
    },
    /// Plays a MIDI file, routing every track to the given port.
    Play {
        /// The MIDI file to play.
        file: PathBuf,
        /// The output port to play through.
        port: String,
        /// Creates the port as a virtual port instead of opening an existing one.
        #[arg(short = 'v', long = "virtual")]
        create_virtual: bool,
    },
    /// Starts the interactive sequencer shell.
    Shell {
        /// A MIDI file or project to open on start.
        #[arg(short, long)]
        open: Option<PathBuf>,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    let settings = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Ports {} => {
            let sequencer = Sequencer::from_config(&settings)?;
            print_ports("Outputs", sequencer.list_outputs()?);
            print_ports("Inputs", sequencer.list_inputs()?);
        }
        Commands::Info { file } => {
            let song = codec::load_file(&SmfCodec::new(settings.ticks_per_beat()), &file)?;
            println!("{}", song);
            for track in song.tracks() {
                let notes: usize = track.events().iter().map(|event| event.notes().len()).sum();
                println!("- {}: {} notes", track.name(), notes);
            }
            println!(
                "Length: {}",
                duration_minutes_seconds(beats_duration(song.end_time(), song.tempo()))
            );
        }
        Commands::Play {
            file,
            port,
            create_virtual,
        } => {
            let mut sequencer = Sequencer::from_config(&settings)?;
            sequencer.load_file(&file)?;
            if create_virtual {
                sequencer.create_virtual_port(&port)?;
            }
            for index in 0..sequencer.song().tracks().len() {
                sequencer.assign(index, &port)?;
            }

            let outcome = sequencer.play()?;
            println!("{}", outcome);
            if outcome == Outcome::Started {
                sequencer.wait();
                println!("Playback finished.");
            }
        }
        Commands::Shell { open } => {
            let mut sequencer = Sequencer::from_config(&settings)?;
            if let Some(open) = open {
                if open.extension().is_some_and(|ext| ext == "json") {
                    for warning in sequencer.load_project(&open)? {
                        eprintln!("Warning: {}", warning);
                    }
                } else {
                    sequencer.load_file(&open)?;
                }
            }

            let stdin = io::BufReader::new(io::stdin());
            Shell::new(&mut sequencer, stdin, io::stdout()).run()?;
        }
    }

    Ok(())
}

fn print_ports(kind: &str, ports: Vec<String>) {
    if ports.is_empty() {
        println!("No {} found.", kind.to_lowercase());
        return;
    }

    println!("{}:", kind);
    for port in ports {
        println!("- {}", port);
    }
}
