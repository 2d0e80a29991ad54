//! One full tag-interaction session: select, authenticate, operate.

use crate::block::{self, BlockPayload, ConfigError};
use crate::link::{AuthKey, CardLink, KeyType, LinkError, TagUid};
use std::fmt;

/// What to do with the target block once the sector is authenticated.
#[derive(Debug, Clone, Copy)]
pub enum Operation {
    Read,
    Write(BlockPayload),
}

/// The result of one tag encounter.  Failure variants carry the link
/// error so the log can say which physical cause is likely.
#[derive(Debug)]
pub enum SessionOutcome {
    Success(BlockPayload),
    SelectFailed(LinkError),
    AuthFailed(LinkError),
    ReadFailed(LinkError),
    WriteFailed(LinkError),
    VerifyMismatch {
        expected: BlockPayload,
        actual: BlockPayload,
    },
    NoTag,
}

impl fmt::Display for SessionOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionOutcome::Success(payload) => {
                write!(f, "success: {}", block::to_hex(payload))
            }
            SessionOutcome::SelectFailed(err) => write!(f, "tag selection failed: {}", err),
            SessionOutcome::AuthFailed(err) => write!(
                f,
                "sector authentication failed (wrong key, not a MIFARE Classic 1K, or tag left the field): {}",
                err
            ),
            SessionOutcome::ReadFailed(err) => write!(f, "block read failed: {}", err),
            SessionOutcome::WriteFailed(err) => write!(f, "block write failed: {}", err),
            SessionOutcome::VerifyMismatch { expected, actual } => write!(
                f,
                "verify mismatch: wrote {} but read back {}",
                block::to_hex(expected),
                block::to_hex(actual)
            ),
            SessionOutcome::NoTag => write!(f, "no tag in field"),
        }
    }
}

/// A validated session target.  Construction is the one place block
/// addresses are computed, so a sector trailer can never slip through
/// as a data address.
#[derive(Debug, Clone, Copy)]
pub struct Target {
    data_address: u8,
    trailer_address: u8,
    key: AuthKey,
    key_type: KeyType,
    operation: Operation,
}

impl Target {
    pub fn new(
        sector: u8,
        block: u8,
        key: AuthKey,
        key_type: KeyType,
        operation: Operation,
    ) -> Result<Target, ConfigError> {
        let data_address = block::data_block_address(sector, block)?;

        Ok(Target {
            data_address,
            trailer_address: block::trailer_address(sector),
            key,
            key_type,
            operation,
        })
    }
}

pub struct SessionController<'a, L: CardLink> {
    link: &'a mut L,
}

impl<'a, L: CardLink> SessionController<'a, L> {
    pub fn new(link: &'a mut L) -> SessionController<'a, L> {
        SessionController { link }
    }

    /// Drive one session against an already-detected tag.  Every step is
    /// fail-fast with no internal retry; a card that failed mid-session
    /// may have left the field, so retrying belongs to the next poll
    /// cycle, which re-selects and re-authenticates from scratch.
    pub fn run(&mut self, uid: &TagUid, target: &Target) -> SessionOutcome {
        if let Err(err) = self.link.select_tag(uid) {
            return SessionOutcome::SelectFailed(err);
        }

        let outcome = self.operate(uid, target);

        // Halt the card and drop Crypto1 so the next cycle starts clean
        let _ = self.link.release();

        outcome
    }

    fn operate(&mut self, uid: &TagUid, target: &Target) -> SessionOutcome {
        // Authentication always targets the sector trailer address
        if let Err(err) =
            self.link
                .authenticate(target.key_type, target.trailer_address, &target.key, uid)
        {
            return SessionOutcome::AuthFailed(err);
        }

        match target.operation {
            Operation::Read => match self.link.read(target.data_address) {
                Ok(payload) => SessionOutcome::Success(payload),
                Err(err) => SessionOutcome::ReadFailed(err),
            },
            Operation::Write(payload) => self.write_and_verify(target.data_address, &payload),
        }
    }

    /// Write, then immediately read the same address back.  A mismatch
    /// means a silent partial write or an authentication window that
    /// closed mid-operation, and must never be reported as success.
    fn write_and_verify(&mut self, address: u8, payload: &BlockPayload) -> SessionOutcome {
        if let Err(err) = self.link.write(address, payload) {
            return SessionOutcome::WriteFailed(err);
        }

        match self.link.read(address) {
            Ok(actual) if actual == *payload => SessionOutcome::Success(actual),
            Ok(actual) => SessionOutcome::VerifyMismatch {
                expected: *payload,
                actual,
            },
            Err(err) => SessionOutcome::WriteFailed(err),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::encode;
    use std::collections::HashMap;

    const DEFAULT_KEY: AuthKey = [0xff; 6];

    struct ScriptedLink {
        calls: Vec<String>,
        accept_key: AuthKey,
        fail_select: bool,
        fail_read: bool,
        fail_write: bool,
        blocks: HashMap<u8, BlockPayload>,
        readback_override: Option<BlockPayload>,
    }

    impl ScriptedLink {
        fn new() -> ScriptedLink {
            ScriptedLink {
                calls: Vec::new(),
                accept_key: DEFAULT_KEY,
                fail_select: false,
                fail_read: false,
                fail_write: false,
                blocks: HashMap::new(),
                readback_override: None,
            }
        }
    }

    impl CardLink for ScriptedLink {
        fn request(&mut self) -> Result<u16, LinkError> {
            self.calls.push("request".to_string());
            Ok(0x0004)
        }

        fn anticollision(&mut self) -> Result<TagUid, LinkError> {
            self.calls.push("anticollision".to_string());
            Ok([1, 2, 3, 4])
        }

        fn select_tag(&mut self, _uid: &TagUid) -> Result<(), LinkError> {
            self.calls.push("select".to_string());
            if self.fail_select {
                Err(LinkError::Timeout)
            } else {
                Ok(())
            }
        }

        fn authenticate(
            &mut self,
            _key_type: KeyType,
            block_address: u8,
            key: &AuthKey,
            _uid: &TagUid,
        ) -> Result<(), LinkError> {
            self.calls.push(format!("auth:{}", block_address));
            if *key == self.accept_key {
                Ok(())
            } else {
                // A wrong key shows up as the card going silent
                Err(LinkError::Timeout)
            }
        }

        fn read(&mut self, block_address: u8) -> Result<BlockPayload, LinkError> {
            self.calls.push(format!("read:{}", block_address));
            if self.fail_read {
                return Err(LinkError::Timeout);
            }
            if let Some(payload) = self.readback_override {
                return Ok(payload);
            }
            self.blocks
                .get(&block_address)
                .copied()
                .ok_or(LinkError::Timeout)
        }

        fn write(&mut self, block_address: u8, payload: &BlockPayload) -> Result<(), LinkError> {
            self.calls.push(format!("write:{}", block_address));
            if self.fail_write {
                return Err(LinkError::Nack);
            }
            self.blocks.insert(block_address, *payload);
            Ok(())
        }

        fn release(&mut self) -> Result<(), LinkError> {
            self.calls.push("release".to_string());
            Ok(())
        }
    }

    fn target(operation: Operation) -> Target {
        Target::new(1, 0, DEFAULT_KEY, KeyType::KeyA, operation).unwrap()
    }

    #[test]
    fn read_session_authenticates_the_trailer_then_reads_the_data_block() {
        let mut link = ScriptedLink::new();
        link.blocks.insert(4, encode("Hello Pico RFID!"));

        let outcome = SessionController::new(&mut link).run(&[1, 2, 3, 4], &target(Operation::Read));

        match outcome {
            SessionOutcome::Success(payload) => assert_eq!(&payload, b"Hello Pico RFID!"),
            other => panic!("expected success, got {}", other),
        }
        assert_eq!(link.calls, ["select", "auth:7", "read:4", "release"]);
    }

    #[test]
    fn select_failure_stops_the_session_before_authentication() {
        let mut link = ScriptedLink::new();
        link.fail_select = true;

        let outcome = SessionController::new(&mut link).run(&[1, 2, 3, 4], &target(Operation::Read));

        assert!(matches!(outcome, SessionOutcome::SelectFailed(_)));
        assert_eq!(link.calls, ["select"]);
    }

    #[test]
    fn wrong_key_stops_the_session_before_any_block_access() {
        let mut link = ScriptedLink::new();
        link.accept_key = [0xa0, 0xa1, 0xa2, 0xa3, 0xa4, 0xa5];

        let outcome = SessionController::new(&mut link)
            .run(&[1, 2, 3, 4], &target(Operation::Write(encode("Hi"))));

        assert!(matches!(outcome, SessionOutcome::AuthFailed(_)));
        assert_eq!(link.calls, ["select", "auth:7", "release"]);
    }

    #[test]
    fn write_session_verifies_by_reading_the_block_back() {
        let payload = encode("Hello Pico RFID!");
        let mut link = ScriptedLink::new();

        let outcome = SessionController::new(&mut link)
            .run(&[1, 2, 3, 4], &target(Operation::Write(payload)));

        match outcome {
            SessionOutcome::Success(read_back) => assert_eq!(read_back, payload),
            other => panic!("expected success, got {}", other),
        }
        assert_eq!(link.calls, ["select", "auth:7", "write:4", "read:4", "release"]);
        assert_eq!(link.blocks[&4], payload);
    }

    #[test]
    fn mismatched_read_back_is_never_reported_as_success() {
        let payload = encode("Hello Pico RFID!");
        let mut link = ScriptedLink::new();
        link.readback_override = Some(encode("corrupted bytes"));

        let outcome = SessionController::new(&mut link)
            .run(&[1, 2, 3, 4], &target(Operation::Write(payload)));

        match outcome {
            SessionOutcome::VerifyMismatch { expected, actual } => {
                assert_eq!(expected, payload);
                assert_eq!(&actual, b"corrupted bytes\0");
            }
            other => panic!("expected verify mismatch, got {}", other),
        }
    }

    #[test]
    fn rejected_write_is_write_failed() {
        let mut link = ScriptedLink::new();
        link.fail_write = true;

        let outcome = SessionController::new(&mut link)
            .run(&[1, 2, 3, 4], &target(Operation::Write(encode("Hi"))));

        assert!(matches!(outcome, SessionOutcome::WriteFailed(_)));
        assert!(!link.calls.iter().any(|c| c.starts_with("read")));
    }

    #[test]
    fn failed_read_back_after_a_write_is_write_failed() {
        let mut link = ScriptedLink::new();
        link.fail_read = true;

        let outcome = SessionController::new(&mut link)
            .run(&[1, 2, 3, 4], &target(Operation::Write(encode("Hi"))));

        assert!(matches!(outcome, SessionOutcome::WriteFailed(_)));
    }

    #[test]
    fn failed_read_session_is_read_failed() {
        let mut link = ScriptedLink::new();
        link.fail_read = true;

        let outcome = SessionController::new(&mut link).run(&[1, 2, 3, 4], &target(Operation::Read));

        assert!(matches!(outcome, SessionOutcome::ReadFailed(_)));
    }

    #[test]
    fn target_construction_rejects_the_sector_trailer() {
        assert_eq!(
            Target::new(1, 3, DEFAULT_KEY, KeyType::KeyA, Operation::Read).unwrap_err(),
            ConfigError::NotADataBlock(3)
        );
    }
}
