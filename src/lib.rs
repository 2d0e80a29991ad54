mod block;
mod cancellation_token;
mod link;
mod log_macros;
mod mfrc522;
mod picc;
mod poll;
mod register;
mod session;

pub use crate::block::{
    data_block_address, decode, encode, parse_key, to_hex, trailer_address, BlockPayload,
    ConfigError,
};
pub use crate::link::{AuthKey, CardLink, KeyType, LinkError, TagUid};
pub use crate::mfrc522::Mfrc522;
pub use crate::poll::{Pacing, PollLoop};
pub use crate::session::{Operation, SessionController, SessionOutcome, Target};

use cancellation_token::CancellationToken;
use clap::{Parser, ValueEnum};
use core::fmt::Arguments;
use ctrlc;
use rppal::{
    gpio::Gpio,
    spi::{Bus, Mode, SlaveSelect, Spi},
};
use std::error::Error;
use std::time::Duration;
use std::{thread, time};

pub trait RppalMifareLog {
    fn output(self: &Self, args: Arguments);
    fn warning(self: &Self, args: Arguments);
    fn error(self: &Self, args: Arguments);
}

pub struct RppalMifareTool<'a> {
    log: &'a dyn RppalMifareLog,
}

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum)]
#[repr(u8)]
enum BcmPin {
    Pin1 = 1,
    Pin2,
    Pin3,
    Pin4,
    Pin5,
    Pin6,
    Pin7,
    Pin8,
    Pin9,
    Pin10,
    Pin11,
    Pin12,
    Pin13,
    Pin14,
    Pin15,
    Pin16,
    Pin17,
    Pin18,
    Pin19,
    Pin20,
    Pin21,
    Pin22,
    Pin23,
    Pin24,
    Pin25,
    Pin26,
    Pin27,
}

#[derive(Parser)]
#[clap(version, about, long_about = None)]
struct Cli {
    /// Disable colors in output
    #[arg(long = "no-color", short = 'n', env = "NO_CLI_COLOR")]
    no_color: bool,
    /// Pins to drive high before releasing the reader from reset
    #[arg(long = "high", short = '1')]
    high_pins: Vec<BcmPin>,
    /// Pins to drive low before releasing the reader from reset
    #[arg(long = "low", short = '0')]
    low_pins: Vec<BcmPin>,
    /// The reader's reset pin
    #[arg(long = "reset", short = 'r')]
    reset_pin: BcmPin,
    /// Target sector (MIFARE Classic 1K has 16)
    #[arg(long = "sector", short = 's', default_value_t = 1)]
    sector: u8,
    /// Target data block within the sector; block 3 is the sector
    /// trailer and is refused
    #[arg(long = "block", short = 'b', default_value_t = 0)]
    block: u8,
    /// Sector key as 12 hex digits
    #[arg(long = "key", short = 'k', default_value = "ffffffffffff")]
    key: String,
    /// Authenticate with Key B instead of Key A
    #[arg(long = "key-b")]
    key_b: bool,
    /// Text to write to the target block; omit to read instead
    #[arg(long = "write", short = 'w')]
    write_text: Option<String>,
    /// Delay between polls while no tag is in the field, in milliseconds
    #[arg(long = "poll-interval", default_value_t = 50)]
    poll_interval_ms: u64,
    /// Delay after a session before polling again, in milliseconds
    #[arg(long = "cooldown", default_value_t = 2000)]
    cooldown_ms: u64,
    /// Delay after a reader fault before polling again, in milliseconds
    #[arg(long = "recovery-delay", default_value_t = 100)]
    recovery_delay_ms: u64,
}

impl<'a> RppalMifareTool<'a> {
    pub fn new(log: &'a dyn RppalMifareLog) -> RppalMifareTool<'a> {
        RppalMifareTool { log }
    }

    pub fn run(
        self: &mut Self,
        args: impl IntoIterator<Item = std::ffi::OsString>,
    ) -> Result<(), Box<dyn Error>> {
        let cli = match Cli::try_parse_from(args) {
            Ok(m) => m,
            Err(err) => {
                output!(self.log, "{}", err.to_string());
                return Ok(());
            }
        };

        // A bad target must be refused before any hardware is touched
        let key = parse_key(&cli.key)?;
        let key_type = if cli.key_b { KeyType::KeyB } else { KeyType::KeyA };
        let operation = match &cli.write_text {
            Some(text) => Operation::Write(encode(text)),
            None => Operation::Read,
        };
        let target = Target::new(cli.sector, cli.block, key, key_type, operation)?;
        let pacing = Pacing {
            poll_interval: Duration::from_millis(cli.poll_interval_ms),
            cooldown: Duration::from_millis(cli.cooldown_ms),
            recovery_delay: Duration::from_millis(cli.recovery_delay_ms),
        };

        let mut reset_pin = Gpio::new()?.get(cli.reset_pin as u8)?.into_output();

        reset_pin.set_reset_on_drop(false);

        reset_pin.set_low();
        thread::sleep(time::Duration::from_millis(100));

        for bcm_pin in cli.low_pins {
            let mut pin = Gpio::new()?.get(bcm_pin as u8)?.into_output();

            pin.set_reset_on_drop(false);
            pin.set_low();
        }

        for bcm_pin in cli.high_pins {
            let mut pin = Gpio::new()?.get(bcm_pin as u8)?.into_output();

            pin.set_reset_on_drop(false);
            pin.set_high();
        }

        reset_pin.set_high();
        thread::sleep(time::Duration::from_millis(50));

        let mut spi = Spi::new(Bus::Spi0, SlaveSelect::Ss0, 1_000_000, Mode::Mode0)?;
        let mfrc522 = {
            let mut mfrc522 = Mfrc522::new(&mut spi);

            mfrc522.reset()?;

            output!(
                self.log,
                "Reader Mfg Version: {:#04x}",
                mfrc522.get_version()?
            );

            mfrc522
        };

        output!(
            self.log,
            "{} sector {} block {} with Key {}, scan a tag...",
            if cli.write_text.is_some() {
                "Writing"
            } else {
                "Reading"
            },
            cli.sector,
            cli.block,
            if cli.key_b { "B" } else { "A" }
        );

        let token = CancellationToken::new();
        let token_clone = token.clone();

        ctrlc::set_handler(move || {
            eprintln!("Ctrl+C received, stopping...");
            token_clone.cancel();
        })?;

        PollLoop::new(mfrc522, pacing, token).run(&target, self.log);

        reset_pin.set_low();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct TestLogger;

    impl TestLogger {
        fn new() -> TestLogger {
            TestLogger {}
        }
    }

    impl RppalMifareLog for TestLogger {
        fn output(self: &Self, _args: Arguments) {}
        fn warning(self: &Self, _args: Arguments) {}
        fn error(self: &Self, _args: Arguments) {}
    }

    #[test]
    fn basic_test() {
        let logger = TestLogger::new();
        let mut tool = RppalMifareTool::new(&logger);
        let args: Vec<std::ffi::OsString> = vec!["".into(), "--help".into()];

        tool.run(args).unwrap();
    }

    #[test]
    fn a_sector_trailer_target_is_fatal_at_startup() {
        let logger = TestLogger::new();
        let mut tool = RppalMifareTool::new(&logger);
        let args: Vec<std::ffi::OsString> =
            vec!["".into(), "--reset".into(), "pin22".into(), "--block".into(), "3".into()];

        let err = tool.run(args).unwrap_err();

        assert!(err.to_string().contains("not a data block"));
    }

    #[test]
    fn a_malformed_key_is_fatal_at_startup() {
        let logger = TestLogger::new();
        let mut tool = RppalMifareTool::new(&logger);
        let args: Vec<std::ffi::OsString> =
            vec!["".into(), "--reset".into(), "pin22".into(), "--key".into(), "ffff".into()];

        let err = tool.run(args).unwrap_err();

        assert!(err.to_string().contains("12 hex digits"));
    }

    #[test]
    fn an_out_of_range_sector_is_fatal_at_startup() {
        let logger = TestLogger::new();
        let mut tool = RppalMifareTool::new(&logger);
        let args: Vec<std::ffi::OsString> = vec![
            "".into(),
            "--reset".into(),
            "pin22".into(),
            "--sector".into(),
            "16".into(),
        ];

        let err = tool.run(args).unwrap_err();

        assert!(err.to_string().contains("out of range"));
    }
}
