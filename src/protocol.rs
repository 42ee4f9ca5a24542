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

//! SPIFS wire protocol constants

/// Sync - begins every command frame and resynchronizes the responder
pub const SYNC: u8 = 0xFE;

/// Filler - sent by the requester when it only wants to clock a reply out
pub const FILLER: u8 = 0xFF;

/// Acknowledge - responder accepted the opcode or identifier
pub const ACK: u8 = 1;

/// Negative acknowledge - end of list, or a rejected request in strict mode
pub const NACK: u8 = 0;

/// Highest usable slot identifier. Identifier 0 is reserved.
pub const MAX_FILES: u8 = 100;

/// Capacity of a single slot buffer in bytes
pub const MAX_FILE_SIZE: u8 = 100;

/// Command opcodes, sent right after `SYNC`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Opcode {
    List = 0x00,
    Read = 0x01,
    Write = 0x02,
    Create = 0x03,
    Delete = 0x04,
}

impl TryFrom<u8> for Opcode {
    type Error = u8;

    fn try_from(byte: u8) -> Result<Self, Self::Error> {
        match byte {
            0x00 => Ok(Opcode::List),
            0x01 => Ok(Opcode::Read),
            0x02 => Ok(Opcode::Write),
            0x03 => Ok(Opcode::Create),
            0x04 => Ok(Opcode::Delete),
            other => Err(other),
        }
    }
}

/// How strictly both ends interpret identifiers, sizes and opcodes
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Byte-for-byte the original wire behaviour. Table access is still
    /// bounds-checked, but bad input is absorbed silently.
    #[default]
    Compatible,
    /// Out-of-range identifiers and unknown opcodes are answered with NACK.
    /// Not wire-compatible with a compatible-mode peer in the error cases.
    Strict,
}

/// True if `id` addresses a real slot
pub fn valid_id(id: u8) -> bool {
    (1..=MAX_FILES).contains(&id)
}

/// True if `size` fits a slot and does not mean "free"
pub fn valid_size(size: u8) -> bool {
    (1..=MAX_FILE_SIZE).contains(&size)
}
