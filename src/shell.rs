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

//! File operations shared by the command line and the interactive shell

use std::io::{BufRead, Write};
use clap::{Parser, Subcommand};
use thiserror::Error;
use crate::channel::DuplexChannel;
use crate::requester::{Requester, RequesterError};

#[derive(Debug, Error)]
pub enum ShellError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Requester(#[from] RequesterError),
}

#[derive(Debug, Clone, PartialEq, Eq, Subcommand)]
pub enum Operation {
    /// List files as "<id>  <size>"
    List,
    /// Create file <id> with room for <size> bytes
    Create {
        #[arg(value_parser = parse_byte)]
        id: u8,
        #[arg(value_parser = parse_byte)]
        size: u8,
    },
    /// Write bytes to file <id>; the count must match its size
    Write {
        #[arg(value_parser = parse_byte)]
        id: u8,
        #[arg(required = true, num_args = 1.., value_parser = parse_byte)]
        bytes: Vec<u8>,
    },
    /// Read <size> bytes from file <id>
    Read {
        #[arg(value_parser = parse_byte)]
        id: u8,
        #[arg(value_parser = parse_byte)]
        size: u8,
    },
    /// Delete file <id>
    Delete {
        #[arg(value_parser = parse_byte)]
        id: u8,
    },
    /// Clock one byte and print the reply
    #[command(alias = "s1b")]
    Raw {
        #[arg(value_parser = parse_byte)]
        byte: u8,
    },
}

/// Accepts decimal or 0x-prefixed hex
pub fn parse_byte(s: &str) -> Result<u8, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u8::from_str_radix(hex, 16),
        None => s.parse::<u8>(),
    };
    parsed.map_err(|_| format!("Invalid byte value: {}. Must be 0-255 or 0x00-0xFF", s))
}

pub fn run_operation<C: DuplexChannel>(
    requester: &mut Requester<C>,
    op: &Operation,
    out: &mut dyn Write,
) -> Result<(), ShellError> {
    match op {
        Operation::List => {
            let entries = requester.list()?;
            if entries.is_empty() {
                writeln!(out, "(no files)")?;
            }
            for entry in entries {
                writeln!(out, "{}  {}", entry.id, entry.size)?;
            }
        }
        Operation::Create { id, size } => requester.create(*id, *size)?,
        Operation::Write { id, bytes } => requester.write(*id, bytes)?,
        Operation::Read { id, size } => {
            let data = requester.read(*id, *size)?;
            let text: Vec<String> = data.iter().map(u8::to_string).collect();
            writeln!(out, "{}", text.join(" "))?;
        }
        Operation::Delete { id } => requester.delete(*id)?,
        Operation::Raw { byte } => {
            let reply = requester.raw(*byte)?;
            writeln!(out, "{}", reply)?;
        }
    }
    Ok(())
}

// ============================================================================
// Interactive Shell
// ============================================================================

#[derive(Debug, Parser)]
#[command(multicall = true)]
struct ShellLine {
    #[command(subcommand)]
    command: ShellCommand,
}

#[derive(Debug, Subcommand)]
enum ShellCommand {
    #[command(flatten)]
    Op(Operation),
    /// Leave the shell
    #[command(alias = "quit")]
    Exit,
}

/// Read commands line by line until `exit` or end of input.
///
/// A failed operation is reported and the shell carries on.
pub fn run_shell<C: DuplexChannel>(
    requester: &mut Requester<C>,
    input: &mut dyn BufRead,
    out: &mut dyn Write,
) -> Result<(), ShellError> {
    let mut line = String::new();
    loop {
        write!(out, "> ")?;
        out.flush()?;

        line.clear();
        if input.read_line(&mut line)? == 0 {
            writeln!(out)?;
            return Ok(());
        }

        let words: Vec<&str> = line.split_whitespace().collect();
        if words.is_empty() {
            continue;
        }

        match ShellLine::try_parse_from(words) {
            Ok(ShellLine { command: ShellCommand::Exit }) => return Ok(()),
            Ok(ShellLine { command: ShellCommand::Op(op) }) => {
                match run_operation(requester, &op, out) {
                    Ok(()) => {}
                    Err(ShellError::Requester(e)) => writeln!(out, "error: {}", e)?,
                    Err(e) => return Err(e),
                }
            }
            Err(e) => write!(out, "{}", e.render())?,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
