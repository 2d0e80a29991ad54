use core::fmt::Arguments;
use rppal_mifare::{error, RppalMifareLog, RppalMifareTool};
use termion::color;

struct RppalMifareLogger;

impl RppalMifareLogger {
    fn new() -> RppalMifareLogger {
        RppalMifareLogger {}
    }
}

impl RppalMifareLog for RppalMifareLogger {
    fn output(self: &Self, args: Arguments) {
        println!("{}", args);
    }
    fn warning(self: &Self, args: Arguments) {
        eprintln!("{}warning: {}", color::Fg(color::Yellow), args);
    }
    fn error(self: &Self, args: Arguments) {
        eprintln!("{}error: {}", color::Fg(color::Red), args);
    }
}

fn main() {
    let logger = RppalMifareLogger::new();

    if let Err(error) = RppalMifareTool::new(&logger).run(std::env::args_os()) {
        error!(logger, "{}", error);
        std::process::exit(1);
    }
}
