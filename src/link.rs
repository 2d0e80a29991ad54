use crate::block::BlockPayload;
use thiserror::Error;

/// A 4-byte single-size UID as returned by cascade level 1 anti-collision.
/// Only valid for the duration of one session; never persisted.
pub type TagUid = [u8; 4];

/// A 6-byte MIFARE sector key.
pub type AuthKey = [u8; 6];

/// Which of the two per-sector key slots to authenticate with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    KeyA,
    KeyB,
}

#[derive(Debug, Error)]
pub enum LinkError {
    #[error("SPI bus error: {0}")]
    Spi(#[from] rppal::spi::Error),
    #[error("no response from card")]
    Timeout,
    #[error("tag collision in field")]
    Collision,
    #[error("card NAK'd the command")]
    Nack,
    #[error("reader signalled protocol error ({0:#04x})")]
    Protocol(u8),
    #[error("malformed card response")]
    BadResponse,
}

/// The card-side operations a reader must provide.  The session and poll
/// layers treat any error as failure for the step that produced it; the
/// one distinction that matters is `Timeout` from `request`, which means
/// no tag is in the field.
pub trait CardLink {
    /// Probe for an idle tag; returns the ATQA tag type on success.
    fn request(&mut self) -> Result<u16, LinkError>;

    /// Resolve the UID of the tag that answered the request.
    fn anticollision(&mut self) -> Result<TagUid, LinkError>;

    /// Select the tag by UID, making it the active card.
    fn select_tag(&mut self, uid: &TagUid) -> Result<(), LinkError>;

    /// Authenticate a sector via its trailer block address.
    fn authenticate(
        &mut self,
        key_type: KeyType,
        block_address: u8,
        key: &AuthKey,
        uid: &TagUid,
    ) -> Result<(), LinkError>;

    /// Read one 16-byte block from the authenticated sector.
    fn read(&mut self, block_address: u8) -> Result<BlockPayload, LinkError>;

    /// Write one 16-byte block to the authenticated sector.
    fn write(&mut self, block_address: u8, payload: &BlockPayload) -> Result<(), LinkError>;

    /// Halt the card and drop the authenticated state.
    fn release(&mut self) -> Result<(), LinkError>;
}
