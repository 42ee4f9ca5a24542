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
use thiserror::Error;
use crate::channel::{ChannelError, DuplexChannel};
use crate::protocol::*;
use crate::storage::Entry;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum RequesterError {
    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error("no ACK after {stage} (received 0x{received:02X})")]
    NoAck { stage: &'static str, received: u8 },

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("list not terminated after {0} replies")]
    ListOverrun(usize),
}

// ============================================================================
// Requester
// ============================================================================

/// Drives the fixed transfer script of each command over a duplex channel.
///
/// Replies arrive one transfer late, so the ACK for an opcode is checked on
/// the filler that follows it. A wrong ACK aborts the operation; there is
/// no retry.
pub struct Requester<C: DuplexChannel> {
    channel: C,
    settle: Duration,
    mode: Mode,
}

impl<C: DuplexChannel> Requester<C> {
    pub fn new(channel: C, settle: Duration, mode: Mode) -> Self {
        Requester { channel, settle, mode }
    }

    #[cfg(test)]
    pub fn channel(&self) -> &C {
        &self.channel
    }

    fn transfer(&mut self, out: u8) -> Result<u8, RequesterError> {
        while !self.channel.ready() || self.channel.busy() {
            std::hint::spin_loop();
        }

        let reply = self.channel.transfer(out)?;
        tracing::debug!("tx 0x{:02X} rx 0x{:02X}", out, reply);

        // Give the responder time to process the byte
        if !self.settle.is_zero() {
            std::thread::sleep(self.settle);
        }
        Ok(reply)
    }

    fn expect_ack(&mut self, out: u8, stage: &'static str) -> Result<(), RequesterError> {
        let received = self.transfer(out)?;
        if received == ACK {
            Ok(())
        } else {
            tracing::warn!("no ACK after {} (received 0x{:02X})", stage, received);
            Err(RequesterError::NoAck { stage, received })
        }
    }

    fn begin(&mut self, op: Opcode) -> Result<(), RequesterError> {
        tracing::debug!("begin {:?}", op);
        self.transfer(SYNC)?;
        self.transfer(op as u8)?;
        self.expect_ack(FILLER, "opcode")
    }

    /// In strict mode a rejected identifier sends the responder back to SYNC
    /// while the rest of the script is still in flight, so bad identifiers
    /// never leave this side.
    fn check_id(&self, id: u8) -> Result<(), RequesterError> {
        if self.mode == Mode::Strict && !valid_id(id) {
            return Err(RequesterError::InvalidRequest(format!(
                "identifier must be 1 to {}, got {}",
                MAX_FILES, id
            )));
        }
        Ok(())
    }

    /// Clock a single byte and return whatever the responder shifted back
    pub fn raw(&mut self, out: u8) -> Result<u8, RequesterError> {
        let reply = self.transfer(out)?;
        tracing::info!("raw 0x{:02X} -> 0x{:02X}", out, reply);
        Ok(reply)
    }

    /// Enumerate occupied slots in ascending identifier order
    pub fn list(&mut self) -> Result<Vec<Entry>, RequesterError> {
        self.begin(Opcode::List)?;

        let limit = 2 * MAX_FILES as usize + 1;
        let mut entries = Vec::new();
        let mut pending_id = None;

        for _ in 0..limit {
            let reply = self.transfer(FILLER)?;
            if reply == NACK {
                if let Some(id) = pending_id {
                    tracing::warn!("list ended after identifier {} without a size", id);
                }
                tracing::info!("listed {} slots", entries.len());
                return Ok(entries);
            }

            match pending_id.take() {
                None => pending_id = Some(reply),
                Some(id) => entries.push(Entry { id, size: reply }),
            }
        }

        Err(RequesterError::ListOverrun(limit))
    }

    pub fn create(&mut self, id: u8, size: u8) -> Result<(), RequesterError> {
        self.check_id(id)?;
        if self.mode == Mode::Strict && !valid_size(size) {
            return Err(RequesterError::InvalidRequest(format!(
                "size must be 1 to {}, got {}",
                MAX_FILE_SIZE, size
            )));
        }

        self.begin(Opcode::Create)?;
        self.transfer(id)?;
        // The identifier ACK rides on the size transfer. Only strict mode
        // looks at it; the size byte itself is never acknowledged.
        let received = self.transfer(size)?;
        if self.mode == Mode::Strict && received != ACK {
            tracing::warn!("create {} rejected (received 0x{:02X})", id, received);
            return Err(RequesterError::NoAck { stage: "identifier", received });
        }

        tracing::info!("create {} ({} bytes) sent", id, size);
        Ok(())
    }

    pub fn write(&mut self, id: u8, data: &[u8]) -> Result<(), RequesterError> {
        if data.is_empty() || data.len() > MAX_FILE_SIZE as usize {
            return Err(RequesterError::InvalidRequest(format!(
                "write needs 1 to {} bytes, got {}",
                MAX_FILE_SIZE,
                data.len()
            )));
        }
        self.check_id(id)?;

        self.begin(Opcode::Write)?;
        self.transfer(id)?;
        self.expect_ack(FILLER, "identifier")?;

        let mut last = NACK;
        for &byte in data {
            last = self.transfer(byte)?;
        }
        if last != ACK {
            tracing::warn!("no ACK after data (received 0x{:02X})", last);
            return Err(RequesterError::NoAck { stage: "data", received: last });
        }

        tracing::info!("wrote {} bytes to {}", data.len(), id);
        Ok(())
    }

    pub fn read(&mut self, id: u8, size: u8) -> Result<Vec<u8>, RequesterError> {
        if !valid_size(size) {
            return Err(RequesterError::InvalidRequest(format!(
                "read size must be 1 to {}, got {}",
                MAX_FILE_SIZE, size
            )));
        }
        self.check_id(id)?;

        self.begin(Opcode::Read)?;
        self.transfer(id)?;
        self.expect_ack(FILLER, "identifier")?;

        let data = (0..size)
            .map(|_| self.transfer(FILLER))
            .collect::<Result<Vec<u8>, _>>()?;

        tracing::info!("read {} bytes from {}", data.len(), id);
        Ok(data)
    }

    pub fn delete(&mut self, id: u8) -> Result<(), RequesterError> {
        self.check_id(id)?;

        self.begin(Opcode::Delete)?;
        self.transfer(id)?;
        self.expect_ack(FILLER, "identifier")?;

        tracing::info!("deleted {}", id);
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::{LoopbackChannel, MockChannel};
    use crate::responder::Session;
    use proptest::prelude::*;

    fn loopback(mode: Mode) -> Requester<LoopbackChannel> {
        Requester::new(LoopbackChannel::new(mode), Duration::ZERO, mode)
    }

    fn scripted(replies: Vec<u8>, expected_writes: Vec<u8>) -> Requester<MockChannel> {
        Requester::new(MockChannel::new(replies, expected_writes), Duration::ZERO, Mode::Compatible)
    }

    /// Replaces the byte sent on one particular transfer
    struct Corrupt<C> {
        inner: C,
        sent: usize,
        at: usize,
        with: u8,
    }

    impl<C: DuplexChannel> DuplexChannel for Corrupt<C> {
        fn transfer(&mut self, out: u8) -> Result<u8, ChannelError> {
            let out = if self.sent == self.at { self.with } else { out };
            self.sent += 1;
            self.inner.transfer(out)
        }
    }

    // ------------------------------------------------------------------------
    // Byte scripts
    // ------------------------------------------------------------------------

    #[test]
    fn test_create_script() {
        let mut req = scripted(
            vec![0, 0, ACK, ACK, ACK],
            vec![SYNC, Opcode::Create as u8, FILLER, 5, 3],
        );
        req.create(5, 3).expect("create should succeed");
    }

    #[test]
    fn test_delete_script() {
        let mut req = scripted(
            vec![0, 0, ACK, ACK, ACK],
            vec![SYNC, Opcode::Delete as u8, FILLER, 5, FILLER],
        );
        req.delete(5).expect("delete should succeed");
    }

    #[test]
    fn test_delete_without_final_ack_fails() {
        let mut req = scripted(
            vec![0, 0, ACK, ACK, NACK],
            vec![SYNC, Opcode::Delete as u8, FILLER, 5, FILLER],
        );
        match req.delete(5) {
            Err(RequesterError::NoAck { stage: "identifier", received: NACK }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_read_script() {
        let mut req = scripted(
            vec![0, 0, ACK, ACK, ACK, 10, 20, 30],
            vec![SYNC, Opcode::Read as u8, FILLER, 5, FILLER, FILLER, FILLER, FILLER],
        );
        assert_eq!(req.read(5, 3).expect("read should succeed"), vec![10, 20, 30]);
    }

    #[test]
    fn test_write_script() {
        let mut req = scripted(
            vec![0, 0, ACK, ACK, ACK, ACK, ACK, ACK],
            vec![SYNC, Opcode::Write as u8, FILLER, 5, FILLER, 10, 20, 30],
        );
        req.write(5, &[10, 20, 30]).expect("write should succeed");
    }

    #[test]
    fn test_list_script() {
        let mut req = scripted(
            vec![0, 0, ACK, 2, 4, 9, 7, NACK],
            vec![SYNC, Opcode::List as u8, FILLER, FILLER, FILLER, FILLER, FILLER, FILLER],
        );
        let entries = req.list().expect("list should succeed");
        assert_eq!(entries, vec![Entry { id: 2, size: 4 }, Entry { id: 9, size: 7 }]);
    }

    #[test]
    fn test_missing_opcode_ack_aborts_immediately() {
        let mut req = scripted(vec![0, 0, 0], vec![SYNC, Opcode::Create as u8, FILLER]);
        match req.create(5, 3) {
            Err(RequesterError::NoAck { stage: "opcode", received: 0 }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
    }

    #[test]
    fn test_list_overrun() {
        let limit = 2 * MAX_FILES as usize + 1;
        let mut replies = vec![0, 0, ACK];
        replies.extend(std::iter::repeat_n(5, limit));
        let mut writes = vec![SYNC, Opcode::List as u8, FILLER];
        writes.extend(std::iter::repeat_n(FILLER, limit));

        let mut req = scripted(replies, writes);
        assert!(matches!(req.list(), Err(RequesterError::ListOverrun(n)) if n == limit));
    }

    #[test]
    fn test_waits_for_channel_ready() {
        let ch = MockChannel::new(
            vec![0, 0, ACK, ACK, ACK],
            vec![SYNC, Opcode::Delete as u8, FILLER, 1, FILLER],
        )
        .not_ready_for(4);
        let mut req = Requester::new(ch, Duration::ZERO, Mode::Compatible);
        req.delete(1).expect("delete should succeed");
        // One poll per transfer plus the four refused ones
        assert_eq!(req.channel().polls, 9);
    }

    #[test]
    fn test_waits_while_channel_busy() {
        let ch = MockChannel::new(
            vec![0, 0, ACK, ACK, ACK],
            vec![SYNC, Opcode::Delete as u8, FILLER, 1, FILLER],
        )
        .busy_for(3);
        let mut req = Requester::new(ch, Duration::ZERO, Mode::Compatible);
        req.delete(1).expect("delete should succeed");
        // One busy check per transfer plus the three that reported busy
        assert_eq!(req.channel().busy_polls, 8);
        assert_eq!(req.channel().polls, 8);
    }

    #[test]
    fn test_raw_transfer() {
        let mut req = scripted(vec![0x5A], vec![0x42]);
        assert_eq!(req.raw(0x42).expect("raw should succeed"), 0x5A);
    }

    #[test]
    fn test_request_validation() {
        let mut req = scripted(vec![], vec![]);
        assert!(matches!(req.write(1, &[]), Err(RequesterError::InvalidRequest(_))));
        assert!(matches!(req.write(1, &[0; 101]), Err(RequesterError::InvalidRequest(_))));
        assert!(matches!(req.read(1, 0), Err(RequesterError::InvalidRequest(_))));
        assert!(matches!(req.read(1, 101), Err(RequesterError::InvalidRequest(_))));
    }

    // ------------------------------------------------------------------------
    // Against a live responder
    // ------------------------------------------------------------------------

    #[test]
    fn test_round_trip() {
        let mut req = loopback(Mode::Compatible);
        req.create(5, 3).expect("create");
        req.write(5, &[10, 20, 30]).expect("write");
        assert_eq!(req.read(5, 3).expect("read"), vec![10, 20, 30]);
    }

    #[test]
    fn test_delete_removes_from_list() {
        let mut req = loopback(Mode::Compatible);
        req.create(5, 3).expect("create");
        req.create(6, 1).expect("create");
        req.delete(5).expect("delete");

        let entries = req.list().expect("list");
        assert_eq!(entries, vec![Entry { id: 6, size: 1 }]);
    }

    #[test]
    fn test_list_is_ascending() {
        let mut req = loopback(Mode::Compatible);
        for (id, size) in [(5, 3), (2, 8), (9, 1)] {
            req.create(id, size).expect("create");
        }

        let ids: Vec<u8> = req.list().expect("list").iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![2, 5, 9]);
    }

    #[test]
    fn test_list_full_table() {
        let mut req = loopback(Mode::Compatible);
        for id in 1..=MAX_FILES {
            req.create(id, id).expect("create");
        }

        let entries = req.list().expect("list");
        assert_eq!(entries.len(), MAX_FILES as usize);
        assert!(entries.iter().all(|e| e.id == e.size));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let mut req = loopback(Mode::Compatible);
        req.create(4, 2).expect("create");
        req.delete(9).expect("delete of a free slot still acks");
        req.delete(9).expect("delete of a free slot still acks");
        assert_eq!(req.list().expect("list"), vec![Entry { id: 4, size: 2 }]);
    }

    #[test]
    fn test_single_byte_file() {
        let mut req = loopback(Mode::Compatible);
        req.create(3, 1).expect("create");
        req.write(3, &[7]).expect("write");
        assert_eq!(req.read(3, 1).expect("read"), vec![7]);
    }

    #[test]
    fn test_recovers_from_stray_byte() {
        let mut req = loopback(Mode::Compatible);
        req.raw(0x42).expect("raw");
        req.raw(FILLER).expect("raw");

        req.create(8, 2).expect("create");
        req.write(8, &[1, 2]).expect("write");
        assert_eq!(req.read(8, 2).expect("read"), vec![1, 2]);
    }

    #[test]
    fn test_garbage_opcode_reports_failure() {
        let ch = Corrupt {
            inner: LoopbackChannel::new(Mode::Compatible),
            sent: 0,
            at: 1,
            with: 0x09,
        };
        let mut req = Requester::new(ch, Duration::ZERO, Mode::Compatible);

        assert!(matches!(
            req.create(5, 3),
            Err(RequesterError::NoAck { stage: "opcode", .. })
        ));
        assert_eq!(req.channel().inner.responder().table().entries().count(), 0);

        // Only the first opcode was corrupted; the link is usable again
        req.create(5, 3).expect("create");
        assert_eq!(req.channel().inner.responder().table().size(5), 3);
    }

    #[test]
    fn test_stale_ack_masks_garbage_opcode_in_compatible_mode() {
        // A previous command leaves ACK in the transmit register
        let ch = Corrupt {
            inner: LoopbackChannel::new(Mode::Compatible),
            sent: 0,
            at: 6,
            with: 0x09,
        };
        let mut req = Requester::new(ch, Duration::ZERO, Mode::Compatible);
        req.delete(1).expect("delete");

        // The unknown opcode leaves that ACK in place, so the check passes
        // and the payload falls on a responder that is back in SYNC.
        req.create(5, 3).expect("stale ACK is indistinguishable");
        assert_eq!(req.channel().inner.responder().table().size(5), 0);
    }

    #[test]
    fn test_strict_mode_exposes_garbage_opcode() {
        let ch = Corrupt {
            inner: LoopbackChannel::new(Mode::Strict),
            sent: 0,
            at: 6,
            with: 0x09,
        };
        let mut req = Requester::new(ch, Duration::ZERO, Mode::Strict);
        req.delete(1).expect("delete");

        assert!(matches!(
            req.create(5, 3),
            Err(RequesterError::NoAck { stage: "opcode", received: NACK })
        ));
    }

    #[test]
    fn test_strict_mode_rejects_bad_requests_locally() {
        let mut req = loopback(Mode::Strict);
        assert!(matches!(req.create(0, SYNC), Err(RequesterError::InvalidRequest(_))));
        assert!(matches!(req.create(1, 0), Err(RequesterError::InvalidRequest(_))));
        assert!(matches!(req.create(1, SYNC), Err(RequesterError::InvalidRequest(_))));
        assert!(matches!(req.write(0, &[1]), Err(RequesterError::InvalidRequest(_))));
        assert!(matches!(req.read(MAX_FILES + 1, 1), Err(RequesterError::InvalidRequest(_))));
        assert!(matches!(req.delete(200), Err(RequesterError::InvalidRequest(_))));

        // Nothing reached the responder, so no phantom frame was started
        assert_eq!(req.channel().responder().session(), Session::Sync);
        assert_eq!(req.channel().responder().transmit_register(), 0);

        req.delete(7).expect("delete");
        req.create(1, 2).expect("create");
        req.write(1, &[3, 4]).expect("write");
        assert_eq!(req.read(1, 2).expect("read"), vec![3, 4]);
    }

    #[test]
    fn test_compatible_mode_sends_unchecked_identifiers() {
        let mut req = loopback(Mode::Compatible);
        req.create(0, 4).expect("create of slot 0 goes on the wire");
        req.delete(200).expect("out-of-table delete still acks");
        assert_eq!(req.channel().responder().table().size(0), 4);
        assert_eq!(req.list().expect("list"), vec![]);
    }

    #[test]
    fn test_strict_create_checks_identifier_ack() {
        let ch = MockChannel::new(
            vec![0, 0, ACK, ACK, NACK],
            vec![SYNC, Opcode::Create as u8, FILLER, 5, 3],
        );
        let mut req = Requester::new(ch, Duration::ZERO, Mode::Strict);
        assert!(matches!(
            req.create(5, 3),
            Err(RequesterError::NoAck { stage: "identifier", received: NACK })
        ));
    }

    proptest! {
        #[test]
        fn prop_contents_round_trip(
            id in 1u8..=MAX_FILES,
            data in proptest::collection::vec(any::<u8>(), 1..=MAX_FILE_SIZE as usize),
        ) {
            let mut req = loopback(Mode::Compatible);
            req.create(id, data.len() as u8).unwrap();
            req.write(id, &data).unwrap();
            prop_assert_eq!(req.read(id, data.len() as u8).unwrap(), data.clone());
            prop_assert_eq!(req.list().unwrap(), vec![Entry { id, size: data.len() as u8 }]);
        }
    }
}
