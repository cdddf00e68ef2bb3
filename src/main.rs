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

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use tracing::level_filters::LevelFilter;
use tracing::{debug, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use h89trans::interrupt::{Interrupt, install_ctrl_c};
use h89trans::loader::LoaderImage;
use h89trans::protocol::{ABS_LOADER_SIZE, STAGE_TWO_SIZE, describe_byte};
use h89trans::serial::RealSerialPort;
use h89trans::session::{BAUD_RATES, DEFAULT_BAUD, Profile, ProtocolConfig};
use h89trans::volume::parse_volume;
use h89trans::{Error, ImageFile, Session};

#[derive(Parser)]
#[command(name = "h89trans")]
#[command(about = "Transfers disk images and programs to and from a Heathkit H89 over RS-232", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1)
    #[arg(short, long)]
    port: String,

    /// Baud rate (1200, 2400, 4800 or 9600)
    #[arg(short, long, default_value = "9600", value_parser = parse_baud)]
    baud: u32,

    /// Per-byte read timeout in milliseconds
    #[arg(long, default_value = "1000", value_name = "MS")]
    timeout_ms: u64,

    /// Loader generation running on the H89
    #[arg(long, value_enum, default_value_t = Profile::Ldr2)]
    profile: Profile,

    /// Number of volume query round trips before a read
    #[arg(long, value_name = "N")]
    volume_query_rounds: Option<u8>,

    /// Check that the loader answers before writing an image
    #[arg(long)]
    probe_before_write: bool,

    /// Only count tracks whose ack flags a read error
    #[arg(long)]
    count_flagged_only: bool,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a loader is listening
    Probe,
    /// Send the stage-two loader (H89LDR2 or QUARTERSHIM) to BOOTSTRP
    LoadLoader {
        /// Loader binary
        #[arg(default_value = "H89LDR2.BIN")]
        file: PathBuf,
        /// Expected size of the loader in bytes
        #[arg(long, default_value_t = STAGE_TWO_SIZE, value_name = "N")]
        size: usize,
    },
    /// Send ABSLDR into floppy RAM through QUARTERSHIM
    LoadAbsLoader {
        /// ABS loader binary
        #[arg(default_value = "ABSLDR.BIN")]
        file: PathBuf,
    },
    /// Have the running loader write itself to a bootable disk
    SaveLoader,
    /// Read a disk image from the H89 into a new file
    ReadImage {
        /// Image file to create
        file: PathBuf,
        /// Use this volume number instead of the disk's
        #[arg(long, value_parser = parse_volume)]
        volume: Option<u8>,
    },
    /// Write an existing disk image to the H89
    WriteImage {
        /// Image file to send
        file: PathBuf,
        /// Use this volume number instead of the image's
        #[arg(long, value_parser = parse_volume)]
        volume: Option<u8>,
        /// Sector interleave 1:N
        #[arg(long, default_value = "1", value_name = "N")]
        interleave: u8,
    },
    /// Send an ABS program to a running ABSLDR
    SendAbs {
        /// ABS file to send
        file: PathBuf,
    },
}

fn parse_baud(text: &str) -> Result<u32, String> {
    let baud: u32 = text
        .parse()
        .map_err(|_| format!("Invalid baud rate: {}", text))?;
    if BAUD_RATES.contains(&baud) {
        Ok(baud)
    } else {
        Err(format!("Invalid baud rate: {}. Must be 1200, 2400, 4800 or 9600", baud))
    }
}

fn setup_logging(debug: bool) {
    let default_level = if debug { LevelFilter::DEBUG } else { LevelFilter::INFO };
    let filter = EnvFilter::builder()
        .with_default_directive(default_level.into())
        .from_env_lossy();

    let console_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time();

    tracing_subscriber::registry()
        .with(filter)
        .with(console_layer)
        .init();
}

fn protocol_config(cli: &Cli) -> ProtocolConfig {
    let mut config = ProtocolConfig::for_profile(cli.profile);
    if let Some(rounds) = cli.volume_query_rounds {
        config.volume_query_rounds = rounds;
    }
    if cli.probe_before_write {
        config.probe_before_write = true;
    }
    if cli.count_flagged_only {
        config.count_every_track = false;
    }
    config
}

fn open_port(cli: &Cli, baud: u32) -> Result<RealSerialPort, serialport::Error> {
    RealSerialPort::open(&cli.port, baud, Duration::from_millis(cli.timeout_ms))
}

fn main() {
    let cli = Cli::parse();
    setup_logging(cli.debug);

    println!("Opening serial port: {}", cli.port);

    let serial_port = match open_port(&cli, DEFAULT_BAUD) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    };

    let interrupt = Interrupt::default();
    if let Err(e) = install_ctrl_c(interrupt.clone()) {
        warn!("Ctrl-C will not be caught: {}", e);
    }

    let mut session = Session::new(Box::new(serial_port), DEFAULT_BAUD, protocol_config(&cli))
        .with_read_timeout(Duration::from_millis(cli.timeout_ms))
        .with_interrupt(interrupt);

    if cli.baud != session.baud() {
        if let Err(e) = session.set_baud(cli.baud) {
            eprintln!("Error: {}", e);
            std::process::exit(1);
        }
    }
    println!("Settings: {} baud, 8 data bits, no parity, 2 stop bits", session.baud());

    match run(&mut session, &cli.command) {
        Ok(summary) => println!("\n{}", summary),
        Err(Error::Disconnected(e)) => {
            eprintln!("Connection lost: {}", e);
            reconnect(&mut session, &cli);
            std::process::exit(1);
        }
        Err(Error::Interrupted) => {
            eprintln!("\nInterrupted");
            std::process::exit(130);
        }
        Err(e) if e.is_usage() => {
            eprintln!("Error: {}", e);
            std::process::exit(2);
        }
        Err(e) => {
            eprintln!("Failed: {}", e);
            std::process::exit(1);
        }
    }
}

/// Runs one subcommand and returns the text to show when it succeeds.
fn run(session: &mut Session, command: &Commands) -> h89trans::Result<String> {
    match command {
        Commands::Probe => {
            let probe = session.config().probe_command;
            if session.probe_alive(probe)? {
                Ok("H89 loader is responding".to_string())
            } else {
                Err(Error::NotResponding { command: describe_byte(probe) })
            }
        }
        Commands::LoadLoader { file, size } => {
            let loader = LoaderImage::load(file, *size)?;
            Ok(session.upload_stage_loader(&loader)?.to_string())
        }
        Commands::LoadAbsLoader { file } => {
            let loader = LoaderImage::load(file, ABS_LOADER_SIZE)?;
            session.upload_abs_loader(&loader)?;
            Ok("ABSLDR loaded into floppy RAM".to_string())
        }
        Commands::SaveLoader => {
            session.save_loader_to_disk()?;
            Ok("Loader saved to bootable disk".to_string())
        }
        Commands::ReadImage { file, volume } => {
            if let Some(volume) = volume {
                session.override_volume(*volume);
            }
            let mut image = ImageFile::open(file)?;
            let result = session.read_image(&mut image);
            image.close()?;
            Ok(result?.to_string())
        }
        Commands::WriteImage { file, volume, interleave } => {
            session.set_interleave(*interleave)?;
            if let Some(volume) = volume {
                session.override_volume(*volume);
            }
            let mut image = ImageFile::open(file)?;
            let result = session.write_image(&mut image);
            image.close()?;
            Ok(result?.to_string())
        }
        Commands::SendAbs { file } => {
            let mut image = ImageFile::open(file)?;
            let result = session.send_abs(&mut image);
            image.close()?;
            Ok(result?.to_string())
        }
    }
}

/// Reopens the port after the link dropped and checks whether the loader survived.
fn reconnect(session: &mut Session, cli: &Cli) {
    match open_port(cli, session.baud()) {
        Ok(port) => {
            session.replace_channel(Box::new(port));
            let probe = session.config().probe_command;
            match session.probe_alive(probe) {
                Ok(true) => eprintln!("Reconnected to {}; H89 loader still responding", cli.port),
                Ok(false) => eprintln!("Reconnected to {}; H89 loader not responding", cli.port),
                Err(e) => debug!("Probe after reconnect failed: {}", e),
            }
        }
        Err(e) => eprintln!("Could not reopen {}: {}", cli.port, e),
    }
}
