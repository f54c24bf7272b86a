// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;
use midifw::action::{ActionError, PostUploadAction};
use midifw::file::{SysexFileSink, SysexFileSource};
use midifw::frame::DeviceFilter;
use midifw::link::{FanOut, TransportLink};
use midifw::protocol::*;
use midifw::serial::{self, SerialMidiLink, MIDI_BAUD};
use midifw::{receiver, sender};

#[derive(Parser)]
#[command(name = "midifw")]
#[command(about = "Firmware upload to audio devices over MIDI SysEx", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial MIDI port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long, global = true)]
    port: Option<String>,

    /// Baud rate (31250 for DIN MIDI, higher for USB serial bridges)
    #[arg(short, long, default_value_t = MIDI_BAUD, global = true)]
    baud: u32,

    /// Increase status output
    #[arg(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// Reduce status output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a firmware image
    Send {
        /// Image to send
        file: PathBuf,

        /// Write the SysEx stream to FILE as well as (or instead of) the port
        #[arg(long, value_name = "FILE")]
        save: Option<PathBuf>,

        /// Device id to address (127 addresses every device)
        #[arg(long, default_value_t = OMNI_DEVICE, value_parser = parse_device_id)]
        id: u8,

        /// Limit SysEx messages to NUM bytes
        #[arg(short = 's', long, default_value_t = DEFAULT_MESSAGE_SIZE, value_name = "NUM")]
        message_size: usize,

        /// Delay in milliseconds between messages [default: 20 with a port, 0 otherwise]
        #[arg(short, long, value_name = "MS")]
        delay: Option<u64>,

        /// Split into parts of no more than KB kilobytes
        #[arg(long, value_name = "KB")]
        split: Option<usize>,

        /// Device slot size in kilobytes, used to advance --store between parts
        #[arg(long, default_value_t = DEFAULT_SLOT_SIZE / 1024, value_name = "KB")]
        slot_size: u32,

        #[command(flatten)]
        action: ActionArgs,
    },
    /// Receive a firmware image
    Receive {
        /// File to write the received image to
        output: PathBuf,

        /// Read SysEx messages from FILE instead of the port
        #[arg(long, value_name = "FILE")]
        from: Option<PathBuf>,

        /// Only accept messages for this device id (and broadcasts)
        #[arg(long, value_parser = parse_device_id)]
        id: Option<u8>,

        /// Largest image accepted, in kilobytes
        #[arg(long, default_value_t = DEFAULT_CAPACITY / 1024, value_name = "KB")]
        capacity: usize,
    },
    /// List available serial ports
    List,
}

/// Device command sent after each uploaded part
#[derive(Args)]
#[group(multiple = false)]
struct ActionArgs {
    /// Store in slot NUM
    #[arg(long, value_name = "NUM")]
    store: Option<u32>,

    /// Save resource as NAME
    #[arg(long, value_name = "NAME")]
    name: Option<String>,

    /// Start patch after upload
    #[arg(long)]
    run: bool,

    /// Flash firmware with checksum CRC (hex)
    #[arg(long, value_name = "CRC", value_parser = parse_hex_u32)]
    flash: Option<u32>,
}

impl ActionArgs {
    fn into_action(self) -> Result<Option<PostUploadAction>, ActionError> {
        if let Some(slot) = self.store {
            Ok(Some(PostUploadAction::Store { slot }))
        } else if let Some(name) = self.name {
            PostUploadAction::save(&name).map(Some)
        } else if self.run {
            Ok(Some(PostUploadAction::Run))
        } else if let Some(checksum) = self.flash {
            Ok(Some(PostUploadAction::Flash { checksum }))
        } else {
            Ok(None)
        }
    }
}

fn parse_device_id(s: &str) -> Result<u8, String> {
    match s.parse::<u8>() {
        Ok(id) if id <= 0x7F => Ok(id),
        _ => Err(format!("Invalid device id: {}. Must be 0 to 127", s)),
    }
}

fn parse_hex_u32(s: &str) -> Result<u32, String> {
    let digits = s.trim_start_matches("0x").trim_start_matches("0X");
    u32::from_str_radix(digits, 16).map_err(|_| format!("Invalid checksum: {}. Must be hexadecimal", s))
}

fn init_logging(verbose: bool, quiet: bool) {
    let level = if verbose {
        "debug"
    } else if quiet {
        "warn"
    } else {
        "info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

/// Clears the returned flag on Ctrl-C so transfers stop between frames.
fn cancel_on_interrupt() -> Arc<AtomicBool> {
    let running = Arc::new(AtomicBool::new(true));
    let flag = running.clone();
    if let Err(e) = ctrlc::set_handler(move || {
        eprintln!("\nshutting down");
        flag.store(false, Ordering::SeqCst);
    }) {
        tracing::warn!("Could not install Ctrl-C handler: {}", e);
    }
    running
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.quiet);
    let running = cancel_on_interrupt();

    match cli.command {
        Commands::List => {
            match serial::list_ports() {
                Ok(ports) if ports.is_empty() => println!("No serial ports found"),
                Ok(ports) => {
                    for (i, name) in ports.iter().enumerate() {
                        println!("{}: {}", i, name);
                    }
                }
                Err(e) => {
                    eprintln!("Failed to list serial ports: {}", e);
                    std::process::exit(1);
                }
            }
        }
        Commands::Send { file, save, id, message_size, delay, split, slot_size, action } => {
            let action = match action.into_action() {
                Ok(a) => a,
                Err(e) => {
                    eprintln!("Error: {}", e);
                    std::process::exit(1);
                }
            };

            let mut links: Vec<Box<dyn TransportLink>> = Vec::new();
            if let Some(port) = &cli.port {
                links.push(Box::new(open_port(port, cli.baud, cli.quiet)));
            }
            if let Some(path) = &save {
                match SysexFileSink::create(path) {
                    Ok(sink) => links.push(Box::new(sink)),
                    Err(e) => {
                        eprintln!("Failed to create {}: {}", path.display(), e);
                        std::process::exit(1);
                    }
                }
                if !cli.quiet { println!("Writing SysEx file: {}", path.display()); }
            }
            let link: Box<dyn TransportLink> = match links.len() {
                0 => {
                    eprintln!("Error: nothing to send to, give --port and/or --save");
                    std::process::exit(1);
                }
                1 => links.remove(0),
                _ => Box::new(FanOut::new(links)),
            };

            let config = sender::SenderConfig {
                device_id: id,
                max_payload: message_size.saturating_sub(MESSAGE_OVERHEAD),
                frame_delay: delay
                    .map(Duration::from_millis)
                    .unwrap_or_else(|| sender::SenderConfig::default_frame_delay(cli.port.is_some())),
                part_size: split.map(|kb| kb.saturating_mul(1024)),
                slot_size: slot_size.saturating_mul(1024),
                action,
            };

            if !cli.quiet { println!("\nSending file: {}", file.display()); }
            if let Err(e) = send_file(link, file, config, &running) {
                eprintln!("Send failed: {}", e);
                std::process::exit(1);
            }
            if !cli.quiet { println!("\nFile sent successfully!"); }
        }
        Commands::Receive { output, from, id, capacity } => {
            let link: Box<dyn TransportLink> = match (&from, &cli.port) {
                (Some(path), _) => match SysexFileSource::open(path) {
                    Ok(source) => {
                        if !cli.quiet {
                            println!("Reading {} SysEx messages from {}", source.len(), path.display());
                        }
                        Box::new(source)
                    }
                    Err(e) => {
                        eprintln!("Failed to open {}: {}", path.display(), e);
                        std::process::exit(1);
                    }
                },
                (None, Some(port)) => Box::new(open_port(port, cli.baud, cli.quiet)),
                (None, None) => {
                    eprintln!("Error: nothing to receive from, give --port or --from");
                    std::process::exit(1);
                }
            };

            let config = receiver::ReceiverConfig {
                device: id.map_or(DeviceFilter::Any, DeviceFilter::Only),
                capacity: capacity.saturating_mul(1024),
                ..receiver::ReceiverConfig::default()
            };

            if !cli.quiet { println!("\nReceiving to file: {}", output.display()); }
            if let Err(e) = receive_file(link, output, config, &running) {
                eprintln!("Receive failed: {}", e);
                std::process::exit(1);
            }
            if !cli.quiet { println!("\nFile received successfully!"); }
        }
    }
}

fn open_port(port: &str, baud: u32, quiet: bool) -> SerialMidiLink {
    if !quiet { println!("Opening serial port: {} at {} baud", port, baud); }
    match SerialMidiLink::open(port, baud) {
        Ok(link) => link,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    }
}

fn send_file(
    link: Box<dyn TransportLink>,
    file: PathBuf,
    config: sender::SenderConfig,
    running: &AtomicBool,
) -> Result<(), sender::SenderError> {
    use sender::SenderFsm;

    if !file.exists() {
        return Err(sender::SenderError::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            format!("File not found: {}", file.display()),
        )));
    }

    let image = std::fs::read(&file)?;
    let state = SenderFsm::new(link, image, config)?;
    sender::run(state, running)
}

fn receive_file(
    link: Box<dyn TransportLink>,
    output: PathBuf,
    config: receiver::ReceiverConfig,
    running: &AtomicBool,
) -> Result<(), receiver::ReceiverError> {
    use receiver::Receiver;

    let mut rx = Receiver::new(link, config);
    let image = rx.run(running)?;

    std::fs::write(&output, &image.data)?;
    tracing::info!("Wrote {} bytes, checksum 0x{:08x}", image.data.len(), image.checksum);
    Ok(())
}
