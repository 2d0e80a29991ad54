use crate::block::BlockPayload;
use crate::link::{AuthKey, CardLink, KeyType, LinkError, TagUid};
use crate::picc::PiccCommand;
use crate::register::{Command, Register};
use rppal::spi::Spi;
use std::thread;
use std::time::{Duration, Instant};

type Result<T> = std::result::Result<T, LinkError>;

// MFRC522 chip frequency
const MFRC_FREQ: f64 = 13.56e6;
// See Section 9.3.3.10 - this is the desired MFRC522 countdown timer tick frequency
const TICK_FREQ: f64 = 1999.7;
// The inverse calculation to get the desired prescale value
static PRESCALE: f64 = (MFRC_FREQ - TICK_FREQ) / (2.0 * TICK_FREQ);
// The desired MFRC522 countdown timer interval
const TIMER_INTERVAL: f64 = 0.015;
// Our safety time when blocking and waiting for the card
const SAFETY_TIMER_INTERVAL: f64 = 0.025;
// Max size of FIFO buffer
const MAX_FIFO_BYTES: usize = 64;
// A MIFARE card acknowledges with this 4-bit pattern
const MIFARE_ACK: u8 = 0x0A;
// Section 9.3.1.5 - IRQ bits we wait on
const IRQ_RX: u8 = 0b0010_0000;
const IRQ_IDLE: u8 = 0b0001_0000;
const IRQ_TIMER: u8 = 0b0000_0001;
// Section 9.3.1.9 - MFCrypto1On, set once sector authentication succeeds
const CRYPTO1_ON: u8 = 0b0000_1000;

pub struct Mfrc522<'a> {
    spi: &'a mut Spi,
}

impl Mfrc522<'_> {
    pub fn new(spi: &mut Spi) -> Mfrc522 {
        Mfrc522 { spi }
    }

    fn write(&mut self, reg: Register, data: u8) -> Result<()> {
        // See Section 8.1.2.2 for details of writing to the Mifare registers over SPI

        // No zero needed to terminate the data when writing
        let write_buffer = [((reg as u8) << 1) & 0x7e, data];

        self.spi.write(&write_buffer)?;

        Ok(())
    }

    fn read(&mut self, reg: Register) -> Result<u8> {
        // See Section 8.1.2.1 for details of reading from the Mifare registers over SPI

        // The zero byte terminates the register addresses when reading.
        // You can read from more than one register in a single operation, but we don't
        let write_buffer = [(((reg as u8) << 1) & 0x7e) | 0x80, 0];
        let mut read_buffer = [0u8; 2];

        // Transfer will only receive as much as was sent
        self.spi.transfer(&mut read_buffer, &write_buffer)?;

        // The result is in the second byte, not the first
        Ok(read_buffer[1])
    }

    fn read_write(&mut self, reg: Register, func: impl FnOnce(u8) -> u8) -> Result<()> {
        let value = self.read(reg)?;
        let new_value = func(value);
        self.write(reg, new_value)?;

        Ok(())
    }

    pub fn reset(&mut self) -> Result<()> {
        // See Section 9.3.1.2 - soft reset the chip, setting all registers to defaults
        self.write(Register::CommandReg, Command::SoftReset.into())?;

        let prescale_bytes = (PRESCALE as u16).to_be_bytes();

        // See Section 9.3.3.10:
        // TAuto=1 - timer starts automatically at the end of the transmission in all communication modes at all speeds
        // TGated=0 - timer is not gated by pins MFIN or AUX1
        // TAutoRestart=0 - set IRQ bit instead of restarting timer
        // TPrescaler_Hi=hh - high 4-bits of prescaler value
        self.write(Register::TModeReg, 0x80 | (prescale_bytes[0] & 0xF))?;
        // TPreScalerLo=ll - low bits of prescaler value
        // e.g. 0xd3e = 3390, so f_timer = 13560000 / (2 * 3390 + 1) ~= 1999.7Hz.  1/1999.7 ~= 0.5ms per timer tick
        self.write(Register::TPrescalerReg, prescale_bytes[1])?;

        let timer_ticks = (TIMER_INTERVAL / (1.0 / TICK_FREQ)).ceil() as u16;
        let timer_tick_bytes = timer_ticks.to_be_bytes();

        // See Section 9.3.3.11 - timer reload value
        // e.g. with prescaler interval of 0.5ms, reload time with 30 gives 15ms timeout
        self.write(Register::TReloadRegLow, timer_tick_bytes[1])?;
        self.write(Register::TReloadRegHigh, timer_tick_bytes[0])?;

        // See Section 9.3.2.6
        // ForceASK100=1 - Force 100% ASK (Amplitude Shift Keying) modulation always
        self.write(Register::TxASKReg, 0b0100_0000)?;

        // See Section 9.3.2.2 - preset value for the CRC coprocessor for the CalcCRC command to 0x6363 (ISO 14443-3 part 6.2.4)
        // MSBFirst=0 - do not calc CRC with MSB first
        // TxWaitRF=1 - transmitter can only be started if RF field is generated
        // PolMFin=0 - MFIN is active LOW
        // CRCPreset=11 - CRC preset value is 0xFFFF
        self.write(Register::ModeReg, 0b0011_1101)?;

        // See Section 9.3.2.5
        // Tx2RFEn=1 and Tx1RFEn=1 - output 13.56MHz carrier signal on TX1 and TX2
        self.read_write(Register::TxControlReg, |value| (value | 0x03))?; // Turn on the antenna
        Ok(())
    }

    pub fn get_version(&mut self) -> Result<u8> {
        self.read(Register::VersionReg)
    }

    /// Run the CRC coprocessor over `data` and return the CRC_A bytes in
    /// wire order (LSB first).
    fn calculate_crc(&mut self, data: &[u8]) -> Result<[u8; 2]> {
        self.write(Register::CommandReg, Command::Idle.into())?;
        // Clear the CRCIRq bit
        self.write(Register::DivIrqReg, 0x04)?;
        // Flush the FIFO buffer
        self.read_write(Register::FIFOLevelReg, |value| value | 0x80)?;

        for &byte in data {
            self.write(Register::FIFODataReg, byte)?;
        }

        self.write(Register::CommandReg, Command::CalcCRC.into())?;

        let start_instant = Instant::now();
        let wait_duration = Duration::from_secs_f64(SAFETY_TIMER_INTERVAL);

        loop {
            if self.read(Register::DivIrqReg)? & 0x04 != 0 {
                break;
            }

            if Instant::now().duration_since(start_instant) > wait_duration {
                return Err(LinkError::Timeout);
            }
        }

        self.write(Register::CommandReg, Command::Idle.into())?;

        Ok([
            self.read(Register::CRCResultRegLow)?,
            self.read(Register::CRCResultRegHigh)?,
        ])
    }

    /// Send a frame to the card and collect its response.  `wait_irq` is
    /// the ComIrqReg bit set that marks completion for `command`; the
    /// chip's own countdown timer or our safety timer turn card silence
    /// into a timeout.
    fn communicate(
        &mut self,
        command: Command,
        wait_irq: u8,
        send_data: &[u8],
    ) -> Result<(Vec<u8>, usize)> {
        // See Section 9.3.1.3 - enable all IRQ's except HiAlertlEn
        self.write(Register::ComlEnReg, 0b1111_0111)?;

        // See Section 9.3.1.5 - clear all IRQ bits
        self.read_write(Register::ComIrqReg, |value| value & !0x80)?;

        // See Section 9.3.1.11 - clear FIFO buffer
        self.read_write(Register::FIFOLevelReg, |value| value | 0x80)?;

        // See Section 9.3.1.2 - idle, canceling outstanding commands
        self.write(Register::CommandReg, Command::Idle.into())?;

        // See Section 9.3.1.10 - write output data to 64 byte FIFO buffer
        assert!(send_data.len() <= MAX_FIFO_BYTES);

        for &byte in send_data {
            self.write(Register::FIFODataReg, byte)?;
        }

        self.write(Register::CommandReg, command.into())?;

        // See Section 9.3.1.14 - Transceive needs StartSend; MFAuthent starts on its own
        if command == Command::Transceive {
            self.read_write(Register::BitFramingReg, |value| value | 0x80)?;
        }

        // Wait for IRQ bits to indicate timeout or success
        let start_instant = Instant::now();
        let wait_duration = Duration::from_secs_f64(SAFETY_TIMER_INTERVAL);
        let mut timed_out = false;

        loop {
            let irq_bits = self.read(Register::ComIrqReg)?;

            // Completion for this command
            if irq_bits & wait_irq != 0 {
                break;
            }

            // The chip timer counted down with no answer from the card
            if irq_bits & IRQ_TIMER != 0 {
                timed_out = true;
                break;
            }

            // Exit if our safety time expires
            if Instant::now().duration_since(start_instant) > wait_duration {
                timed_out = true;
                break;
            }
        }

        // Acknowledge the data
        self.read_write(Register::BitFramingReg, |value| value & !0x80)?;

        if timed_out {
            return Err(LinkError::Timeout);
        }

        // BufferOvfl, CollErr, ParityErr, ProtocolErr
        let err = self.read(Register::ErrorReg)? & 0b0001_1011;

        if err & 0b0000_1000 != 0 {
            return Err(LinkError::Collision);
        }

        if err != 0 {
            return Err(LinkError::Protocol(err));
        }

        let mut num_fifo_bytes = self.read(Register::FIFOLevelReg)? as usize;

        num_fifo_bytes = usize::min(usize::max(num_fifo_bytes, 1), MAX_FIFO_BYTES);

        let mut valid_last_bits = (self.read(Register::ControlReg)? & 0x07) as usize;

        if valid_last_bits == 0 {
            // Per Section 9.3.1.13 - the whole last byte is valid
            valid_last_bits = 8;
        }

        let mut read_data = Vec::<u8>::with_capacity(num_fifo_bytes);

        for _ in 0..num_fifo_bytes {
            read_data.push(self.read(Register::FIFODataReg)?);
        }

        Ok((read_data, valid_last_bits))
    }

    fn transceive(&mut self, send_data: &[u8]) -> Result<(Vec<u8>, usize)> {
        self.communicate(Command::Transceive, IRQ_RX | IRQ_IDLE, send_data)
    }

    fn check_ack(response: &(Vec<u8>, usize)) -> Result<()> {
        let (data, valid_last_bits) = response;

        if data.len() == 1 && *valid_last_bits == 4 && data[0] & 0x0F == MIFARE_ACK {
            Ok(())
        } else {
            Err(LinkError::Nack)
        }
    }
}

impl CardLink for Mfrc522<'_> {
    fn request(&mut self) -> Result<u16> {
        // Section 9.3.1.14 - REQA is a short frame, only 7 bits of the last byte
        self.write(Register::BitFramingReg, 0x07)?;

        let (atqa, _) = self.transceive(&[PiccCommand::ReqA.into()])?;

        // ATQA is exactly 16 bits
        if atqa.len() != 2 {
            return Err(LinkError::BadResponse);
        }

        Ok(u16::from_be_bytes([atqa[0], atqa[1]]))
    }

    fn anticollision(&mut self) -> Result<TagUid> {
        // Mifare spec identification and selection takes 2.5ms to settle without collision
        thread::sleep(Duration::from_micros(2500));

        // Back to full-byte framing after the REQA short frame
        self.write(Register::BitFramingReg, 0)?;

        // NVB=0x20: no UID bits known yet, the card answers with all of them
        let (read_bytes, _) = self.transceive(&[PiccCommand::SelCl1.into(), 0x20])?;

        if read_bytes.len() != 5 {
            return Err(LinkError::BadResponse);
        }

        // Byte 4 is the BCC, the XOR of the four UID bytes
        let bcc = read_bytes[0] ^ read_bytes[1] ^ read_bytes[2] ^ read_bytes[3];

        if bcc != read_bytes[4] {
            return Err(LinkError::BadResponse);
        }

        Ok([read_bytes[0], read_bytes[1], read_bytes[2], read_bytes[3]])
    }

    fn select_tag(&mut self, uid: &TagUid) -> Result<()> {
        // SEL, NVB=0x70 (seven whole bytes), UID, BCC, CRC_A
        let mut frame = vec![PiccCommand::SelCl1.into(), 0x70];

        frame.extend_from_slice(uid);
        frame.push(uid.iter().fold(0, |bcc, byte| bcc ^ byte));

        let crc = self.calculate_crc(&frame)?;

        frame.extend_from_slice(&crc);

        // The card answers with its SAK
        let (sak, valid_last_bits) = self.transceive(&frame)?;

        if sak.is_empty() || valid_last_bits != 8 {
            return Err(LinkError::BadResponse);
        }

        Ok(())
    }

    fn authenticate(
        &mut self,
        key_type: KeyType,
        block_address: u8,
        key: &AuthKey,
        uid: &TagUid,
    ) -> Result<()> {
        let auth_command = match key_type {
            KeyType::KeyA => PiccCommand::MfAuthKeyA,
            KeyType::KeyB => PiccCommand::MfAuthKeyB,
        };

        // Section 10.3.1.9 - MFAuthent frame: command, block, key, UID
        let mut frame = Vec::with_capacity(12);

        frame.push(auth_command.into());
        frame.push(block_address);
        frame.extend_from_slice(key);
        frame.extend_from_slice(uid);

        self.communicate(Command::MFAuthent, IRQ_IDLE, &frame)?;

        // The chip only raises MFCrypto1On once the card accepts the key
        if self.read(Register::Status2Reg)? & CRYPTO1_ON == 0 {
            return Err(LinkError::Nack);
        }

        Ok(())
    }

    fn read(&mut self, block_address: u8) -> Result<BlockPayload> {
        let mut frame = vec![PiccCommand::MfRead.into(), block_address];
        let crc = self.calculate_crc(&frame)?;

        frame.extend_from_slice(&crc);

        let (data, valid_last_bits) = self.transceive(&frame)?;

        // A lone 4-bit answer is the card refusing the read
        if data.len() == 1 && valid_last_bits == 4 {
            return Err(LinkError::Nack);
        }

        // 16 data bytes plus CRC_A
        if data.len() != 18 || valid_last_bits != 8 {
            return Err(LinkError::BadResponse);
        }

        let crc = self.calculate_crc(&data[..16])?;

        if crc != [data[16], data[17]] {
            return Err(LinkError::BadResponse);
        }

        let mut payload = [0u8; 16];

        payload.copy_from_slice(&data[..16]);

        Ok(payload)
    }

    fn write(&mut self, block_address: u8, payload: &BlockPayload) -> Result<()> {
        // Step 1 - announce the write; the card must ACK before it will
        // accept any data
        let mut frame = vec![PiccCommand::MfWrite.into(), block_address];
        let crc = self.calculate_crc(&frame)?;

        frame.extend_from_slice(&crc);

        let response = self.transceive(&frame)?;

        Self::check_ack(&response)?;

        // Step 2 - the 16 data bytes, again ACK'd by the card
        let mut data_frame = payload.to_vec();
        let crc = self.calculate_crc(&data_frame)?;

        data_frame.extend_from_slice(&crc);

        let response = self.transceive(&data_frame)?;

        Self::check_ack(&response)?;

        Ok(())
    }

    fn release(&mut self) -> Result<()> {
        let mut frame = vec![PiccCommand::HltA.into(), 0x00];
        let crc = self.calculate_crc(&frame)?;

        frame.extend_from_slice(&crc);

        // HLTA succeeds by silence; any answer is a protocol violation
        match self.transceive(&frame) {
            Err(LinkError::Timeout) => {}
            Ok(_) => return Err(LinkError::BadResponse),
            Err(err) => return Err(err),
        }

        // Turn Crypto1 off so the next session starts unauthenticated
        self.read_write(Register::Status2Reg, |value| value & !CRYPTO1_ON)?;

        Ok(())
    }
}
