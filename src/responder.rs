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

use std::time::Duration;
use crate::protocol::*;
use crate::serial::SerialPort;
use crate::storage::SlotTable;

// ============================================================================
// Session States
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListPhase {
    Index,
    Size,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateStep {
    Dummy,
    Id,
    Size { id: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteStep {
    Dummy,
    Id,
    Check { id: u8 },
    Bulk { id: u8, offset: u8 },
    Last { id: u8, offset: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStep {
    Dummy,
    Id,
    Stream { id: u8, offset: u8 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteStep {
    Dummy,
    Id,
}

/// Progress of the command currently being received.
///
/// Each variant carries only what its command needs, so nothing leaks from
/// one command into the next.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Session {
    #[default]
    Sync,
    Command,
    List { cursor: u8, phase: ListPhase },
    Create(CreateStep),
    Write(WriteStep),
    Read(ReadStep),
    Delete(DeleteStep),
}

// ============================================================================
// Step Function
// ============================================================================

impl Session {
    /// Consume one received byte. Returns the next session and the byte to
    /// queue for the following transfer, if any.
    pub fn step(self, byte: u8, table: &mut SlotTable, mode: Mode) -> (Session, Option<u8>) {
        match self {
            Session::Sync => {
                if byte == SYNC {
                    (Session::Command, None)
                } else {
                    tracing::trace!("ignoring 0x{:02X} while out of sync", byte);
                    (Session::Sync, None)
                }
            }
            Session::Command => match Opcode::try_from(byte) {
                Ok(Opcode::List) => (Session::List { cursor: 1, phase: ListPhase::Index }, Some(ACK)),
                Ok(Opcode::Read) => (Session::Read(ReadStep::Dummy), Some(ACK)),
                Ok(Opcode::Write) => (Session::Write(WriteStep::Dummy), Some(ACK)),
                Ok(Opcode::Create) => (Session::Create(CreateStep::Dummy), Some(ACK)),
                Ok(Opcode::Delete) => (Session::Delete(DeleteStep::Dummy), Some(ACK)),
                Err(unknown) => {
                    tracing::warn!("unknown opcode 0x{:02X}", unknown);
                    match mode {
                        Mode::Compatible => (Session::Sync, None),
                        Mode::Strict => (Session::Sync, Some(NACK)),
                    }
                }
            },
            Session::List { cursor, phase } => step_list(cursor, phase, table),
            Session::Create(step) => step_create(step, byte, table, mode),
            Session::Write(step) => step_write(step, byte, table, mode),
            Session::Read(step) => step_read(step, byte, table, mode),
            Session::Delete(step) => step_delete(step, byte, table, mode),
        }
    }
}

fn reject_id(id: u8, mode: Mode) -> bool {
    if mode == Mode::Strict && !valid_id(id) {
        tracing::warn!("rejecting out-of-range identifier {}", id);
        true
    } else {
        false
    }
}

fn step_list(cursor: u8, phase: ListPhase, table: &SlotTable) -> (Session, Option<u8>) {
    match phase {
        ListPhase::Index => match table.next_occupied(cursor) {
            Some(id) => (Session::List { cursor: id, phase: ListPhase::Size }, Some(id)),
            None => (Session::Sync, Some(NACK)),
        },
        ListPhase::Size => (
            Session::List { cursor: cursor.saturating_add(1), phase: ListPhase::Index },
            Some(table.size(cursor)),
        ),
    }
}

fn step_create(step: CreateStep, byte: u8, table: &mut SlotTable, mode: Mode) -> (Session, Option<u8>) {
    match step {
        CreateStep::Dummy => (Session::Create(CreateStep::Id), Some(ACK)),
        CreateStep::Id => {
            if reject_id(byte, mode) {
                return (Session::Sync, Some(NACK));
            }
            (Session::Create(CreateStep::Size { id: byte }), Some(ACK))
        }
        // The final byte of CREATE is never acknowledged.
        CreateStep::Size { id } => {
            if mode == Mode::Strict && !valid_size(byte) {
                tracing::warn!("ignoring create of slot {} with size {}", id, byte);
            } else if table.create(id, byte) {
                tracing::info!("created slot {} ({} bytes)", id, byte);
            } else {
                tracing::warn!("create: slot {} is outside the table", id);
            }
            (Session::Sync, None)
        }
    }
}

fn step_write(step: WriteStep, byte: u8, table: &mut SlotTable, mode: Mode) -> (Session, Option<u8>) {
    match step {
        WriteStep::Dummy => (Session::Write(WriteStep::Id), None),
        WriteStep::Id => {
            if reject_id(byte, mode) {
                return (Session::Sync, Some(NACK));
            }
            (Session::Write(WriteStep::Check { id: byte }), None)
        }
        WriteStep::Check { id } => {
            // Single-byte (or free) slots go straight to the final byte.
            if table.size(id) <= 1 {
                (Session::Write(WriteStep::Last { id, offset: 0 }), Some(ACK))
            } else {
                (Session::Write(WriteStep::Bulk { id, offset: 0 }), None)
            }
        }
        WriteStep::Bulk { id, offset } => {
            store(table, id, offset, byte);
            let offset = offset.saturating_add(1);
            if offset as usize + 1 >= table.size(id) as usize {
                (Session::Write(WriteStep::Last { id, offset }), Some(ACK))
            } else {
                (Session::Write(WriteStep::Bulk { id, offset }), None)
            }
        }
        WriteStep::Last { id, offset } => {
            store(table, id, offset, byte);
            tracing::info!("wrote slot {} ({} bytes)", id, offset as usize + 1);
            (Session::Sync, None)
        }
    }
}

fn store(table: &mut SlotTable, id: u8, offset: u8, byte: u8) {
    if !table.write(id, offset as usize, byte) {
        tracing::warn!("write: dropping byte for slot {} offset {}", id, offset);
    }
}

fn step_read(step: ReadStep, byte: u8, table: &mut SlotTable, mode: Mode) -> (Session, Option<u8>) {
    match step {
        ReadStep::Dummy => (Session::Read(ReadStep::Id), None),
        ReadStep::Id => {
            if reject_id(byte, mode) {
                return (Session::Sync, Some(NACK));
            }
            (Session::Read(ReadStep::Stream { id: byte, offset: 0 }), Some(ACK))
        }
        ReadStep::Stream { id, offset } => {
            let out = table.read(id, offset as usize).unwrap_or(0);
            let next = offset as usize + 1;
            if next >= table.size(id) as usize {
                tracing::info!("read slot {} ({} bytes)", id, next);
                (Session::Sync, Some(out))
            } else {
                (Session::Read(ReadStep::Stream { id, offset: next as u8 }), Some(out))
            }
        }
    }
}

fn step_delete(step: DeleteStep, byte: u8, table: &mut SlotTable, mode: Mode) -> (Session, Option<u8>) {
    match step {
        DeleteStep::Dummy => (Session::Delete(DeleteStep::Id), None),
        DeleteStep::Id => {
            if reject_id(byte, mode) {
                return (Session::Sync, Some(NACK));
            }
            if table.delete(byte) {
                tracing::info!("deleted slot {}", byte);
            } else {
                tracing::warn!("delete: slot {} is outside the table", byte);
            }
            (Session::Sync, Some(ACK))
        }
    }
}

// ============================================================================
// Responder
// ============================================================================

/// The storage side of the link: session, transmit register and slot table.
pub struct Responder {
    session: Session,
    table: SlotTable,
    tx: u8,
    mode: Mode,
}

impl Responder {
    pub fn new(mode: Mode) -> Self {
        Responder {
            session: Session::Sync,
            table: SlotTable::new(),
            tx: 0,
            mode,
        }
    }

    /// Byte that will be shifted out on the next transfer
    pub fn transmit_register(&self) -> u8 {
        self.tx
    }

    #[cfg(test)]
    pub fn session(&self) -> Session {
        self.session
    }

    #[cfg(test)]
    pub fn table(&self) -> &SlotTable {
        &self.table
    }

    /// Handle one received byte. If nothing is queued the transmit
    /// register keeps its previous value.
    pub fn receive(&mut self, byte: u8) -> Option<u8> {
        let (next, queued) = self.session.step(byte, &mut self.table, self.mode);
        tracing::trace!("rx 0x{:02X}: {:?} -> {:?}, queued {:?}", byte, self.session, next, queued);
        self.session = next;
        if let Some(out) = queued {
            self.tx = out;
        }
        queued
    }

    /// Run the responder on a byte-stream port until it closes.
    ///
    /// Each received byte is answered with the current transmit register
    /// before the byte is processed, which reproduces the one-transfer
    /// latency of a synchronous duplex bus.
    pub fn serve(&mut self, port: &mut dyn SerialPort) -> std::io::Result<()> {
        let mut buf = [0u8; 1];
        loop {
            match port.read_timeout(&mut buf, Duration::from_secs(1)) {
                Ok(0) => {
                    tracing::info!("port closed, {} files held", self.table.entries().count());
                    return Ok(());
                }
                Ok(_) => {
                    port.write_all(&[self.tx])?;
                    self.receive(buf[0]);
                }
                Err(e) if e.kind() == std::io::ErrorKind::TimedOut => continue,
                Err(e) => return Err(e),
            }
        }
    }
}

// ============================================================================
// Tests
// ============================================================================
