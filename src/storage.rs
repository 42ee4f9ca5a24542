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

//! Fixed-capacity slot table owned by the responder.
//!
//! A slot with `size == 0` is free. Deleting only clears the size, so the
//! old bytes stay in the buffer but can no longer be reached through the
//! protocol. Nothing here checks a write offset against the slot size;
//! the only bound enforced is the physical one of the table itself.

use crate::protocol::{MAX_FILES, MAX_FILE_SIZE};

#[derive(Debug, Clone, Copy)]
pub struct Slot {
    pub size: u8,
    pub data: [u8; MAX_FILE_SIZE as usize],
}

impl Default for Slot {
    fn default() -> Self {
        Slot {
            size: 0,
            data: [0; MAX_FILE_SIZE as usize],
        }
    }
}

/// One line of a directory listing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Entry {
    pub id: u8,
    pub size: u8,
}

pub struct SlotTable {
    // Index 0 exists but is never listed.
    slots: Vec<Slot>,
}

impl SlotTable {
    pub fn new() -> Self {
        SlotTable {
            slots: vec![Slot::default(); MAX_FILES as usize + 1],
        }
    }

    fn slot(&self, id: u8) -> Option<&Slot> {
        self.slots.get(id as usize)
    }

    fn slot_mut(&mut self, id: u8) -> Option<&mut Slot> {
        self.slots.get_mut(id as usize)
    }

    /// Overwrite the size of slot `id`. Existing content is kept.
    /// Returns false if `id` lies outside the table.
    pub fn create(&mut self, id: u8, size: u8) -> bool {
        match self.slot_mut(id) {
            Some(slot) => {
                slot.size = size;
                true
            }
            None => false,
        }
    }

    /// Store one byte. Returns false if `id` or `offset` lies outside the table.
    pub fn write(&mut self, id: u8, offset: usize, byte: u8) -> bool {
        match self.slot_mut(id).and_then(|slot| slot.data.get_mut(offset)) {
            Some(cell) => {
                *cell = byte;
                true
            }
            None => false,
        }
    }

    pub fn read(&self, id: u8, offset: usize) -> Option<u8> {
        self.slot(id).and_then(|slot| slot.data.get(offset)).copied()
    }

    /// Mark slot `id` free. Deleting a free slot is a no-op that still succeeds.
    pub fn delete(&mut self, id: u8) -> bool {
        match self.slot_mut(id) {
            Some(slot) => {
                slot.size = 0;
                true
            }
            None => false,
        }
    }

    /// Size of slot `id`, 0 when free or out of range
    pub fn size(&self, id: u8) -> u8 {
        self.slot(id).map_or(0, |slot| slot.size)
    }

    /// First occupied identifier at or after `from`
    pub fn next_occupied(&self, from: u8) -> Option<u8> {
        (from.max(1)..=MAX_FILES).find(|&id| self.size(id) != 0)
    }

    pub fn entries(&self) -> impl Iterator<Item = Entry> + '_ {
        (1..=MAX_FILES)
            .filter(|&id| self.size(id) != 0)
            .map(|id| Entry { id, size: self.size(id) })
    }

    /// Reachable content of slot `id`, clipped to the buffer capacity
    #[cfg(test)]
    pub fn contents(&self, id: u8) -> Option<&[u8]> {
        let slot = self.slot(id)?;
        if slot.size == 0 {
            return None;
        }
        let len = (slot.size as usize).min(slot.data.len());
        Some(&slot.data[..len])
    }
}
