/// Commands sent over the air to the card (the PICC), from ISO 14443-3
/// and the MF1S503x MIFARE Classic datasheet Section 9.
#[allow(dead_code)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PiccCommand {
    /// REQuest type A, 7-bit frame; invites idle cards to anti-collision
    ReqA = 0x26,
    /// Wake-UP type A; like ReqA but also wakes halted cards
    WupA = 0x52,
    /// Anti-collision/select, cascade level 1 (4-byte UIDs)
    SelCl1 = 0x93,
    /// HaLT type A; puts the active card back to sleep
    HltA = 0x50,
    /// MIFARE sector authentication with Key A
    MfAuthKeyA = 0x60,
    /// MIFARE sector authentication with Key B
    MfAuthKeyB = 0x61,
    /// Read one 16 byte block from the authenticated sector
    MfRead = 0x30,
    /// Write one 16 byte block to the authenticated sector
    MfWrite = 0xA0,
}

impl From<PiccCommand> for u8 {
    fn from(command: PiccCommand) -> u8 {
        command as u8
    }
}
