use std::env;

use clap::{ArgAction, Args};

pub mod runner;
pub mod trace;

/// Shared verbosity flag for both binaries.
#[derive(Args, Debug, Clone, Copy, Default)]
pub struct Verbosity {
    /// Pass many times for a more verbose output. Passing `-v` adds debug
    /// logs, `-vv` enables trace logging
    #[clap(short = 'v', long = "verbose", action = ArgAction::Count, global = true)]
    verbose: u8,
}

impl Verbosity {
    pub fn log_level_filter(&self) -> log::LevelFilter {
        match self.verbose {
            0 => log::LevelFilter::Info,
            1 => log::LevelFilter::Debug,
            2..=u8::MAX => log::LevelFilter::Trace,
        }
    }
}

fn show_backtrace() -> bool {
    if log::max_level() >= log::LevelFilter::Debug {
        return true;
    }

    if let Ok(true) = env::var("RUST_BACKTRACE").map(|s| s == "1") {
        return true;
    }

    false
}

pub fn report_error(e: &anyhow::Error) {
    // One error line covering the whole cause chain; the alternate form
    // prints the chain inline, the debug form adds the backtrace.
    if show_backtrace() {
        log::error!("{:?}", e);
    } else {
        log::error!("{:#}", e);
    }
}
