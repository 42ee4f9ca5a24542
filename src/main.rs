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

// SPIFS: a tiny remote file store over a byte-synchronous duplex link
mod channel;
mod protocol;
mod requester;
mod responder;
mod serial;
mod shell;
mod storage;

use std::time::Duration;
use clap::{Parser, Subcommand};
use serialport::{DataBits, Parity, StopBits};
use tracing_subscriber::EnvFilter;
use channel::{DuplexChannel, LoopbackChannel, SerialChannel};
use protocol::Mode;
use requester::Requester;
use responder::Responder;
use serial::{LinkSettings, RealSerialPort};
use shell::Operation;

#[derive(Parser)]
#[command(name = "spifs")]
#[command(about = "Remote file store over a synchronous byte link", long_about = None)]
#[command(disable_help_subcommand = true)]
struct Cli {
    /// Serial port to use (e.g., /dev/ttyUSB0 or COM1). Without it an
    /// in-process responder is used.
    #[arg(short, long)]
    port: Option<String>,

    /// Baud rate
    #[arg(short, long, default_value = "9600")]
    baud: u32,

    /// Data bits (5, 6, 7, or 8)
    #[arg(long, default_value = "8", value_name = "BITS", value_parser = parse_data_bits)]
    data_bits: DataBits,

    /// Parity (none, odd, or even)
    #[arg(long, default_value = "none", value_parser = parse_parity)]
    parity: Parity,

    /// Stop bits (1 or 2)
    #[arg(long, default_value = "1", value_name = "BITS", value_parser = parse_stop_bits)]
    stop_bits: StopBits,

    /// Settling delay after each transfer [default: 50 on a port, 0 in-process]
    #[arg(long, value_name = "MS")]
    settle_ms: Option<u64>,

    /// How long a transfer waits for the responder's byte before reusing the last one
    #[arg(long, default_value = "200", value_name = "MS")]
    reply_timeout_ms: u64,

    /// Range-check identifiers and sizes and NACK unknown opcodes
    #[arg(long)]
    strict: bool,

    /// Enable debug output
    #[arg(long)]
    debug: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Act as the responder and serve the file table on --port
    Serve,
    /// Issue commands interactively
    Shell,
    #[command(flatten)]
    Op(Operation),
}

fn parse_data_bits(bits: &str) -> Result<DataBits, String> {
    match bits {
        "5" => Ok(DataBits::Five),
        "6" => Ok(DataBits::Six),
        "7" => Ok(DataBits::Seven),
        "8" => Ok(DataBits::Eight),
        _ => Err(format!("Invalid data bits: {}. Must be 5, 6, 7, or 8", bits)),
    }
}

fn parse_parity(parity: &str) -> Result<Parity, String> {
    match parity.to_lowercase().as_str() {
        "none" => Ok(Parity::None),
        "odd" => Ok(Parity::Odd),
        "even" => Ok(Parity::Even),
        _ => Err(format!("Invalid parity: {}. Must be 'none', 'odd', or 'even'", parity)),
    }
}

fn parse_stop_bits(bits: &str) -> Result<StopBits, String> {
    match bits {
        "1" => Ok(StopBits::One),
        "2" => Ok(StopBits::Two),
        _ => Err(format!("Invalid stop bits: {}. Must be 1 or 2", bits)),
    }
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn open_port(settings: &LinkSettings) -> RealSerialPort {
    match RealSerialPort::open(settings) {
        Ok(port) => port,
        Err(e) => {
            eprintln!("Failed to open serial port: {}", e);
            std::process::exit(1);
        }
    }
}

/// Requester over the serial port when one is named, else over an
/// in-process responder
fn connect(cli: &Cli, settings: Option<&LinkSettings>, mode: Mode) -> Requester<Box<dyn DuplexChannel>> {
    let (channel, default_settle): (Box<dyn DuplexChannel>, u64) = match settings {
        Some(settings) => {
            let port = open_port(settings);
            let reply_timeout = Duration::from_millis(cli.reply_timeout_ms);
            (Box::new(SerialChannel::new(Box::new(port), reply_timeout)), 50)
        }
        None => (Box::new(LoopbackChannel::new(mode)), 0),
    };
    let settle = Duration::from_millis(cli.settle_ms.unwrap_or(default_settle));
    Requester::new(channel, settle, mode)
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.debug);

    let mode = if cli.strict { Mode::Strict } else { Mode::Compatible };

    let settings = cli.port.as_ref().map(|port_name| LinkSettings {
        port_name: port_name.clone(),
        baud_rate: cli.baud,
        data_bits: cli.data_bits,
        parity: cli.parity,
        stop_bits: cli.stop_bits,
    });

    let stdout = std::io::stdout();
    match &cli.command {
        Commands::Serve => {
            let Some(settings) = settings else {
                eprintln!("Error: serve needs --port");
                std::process::exit(1);
            };
            let mut port = open_port(&settings);
            println!("Serving files on {} ({:?} mode)", settings.port_name, mode);
            if let Err(e) = Responder::new(mode).serve(&mut port) {
                eprintln!("Serve failed: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Shell => {
            let mut requester = connect(&cli, settings.as_ref(), mode);
            if settings.is_none() {
                println!("No --port given, using an in-process responder");
            }
            if let Err(e) = shell::run_shell(&mut requester, &mut std::io::stdin().lock(), &mut stdout.lock()) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
        Commands::Op(op) => {
            let mut requester = connect(&cli, settings.as_ref(), mode);
            if let Err(e) = shell::run_operation(&mut requester, op, &mut stdout.lock()) {
                eprintln!("Error: {}", e);
                std::process::exit(1);
            }
        }
    }
}
