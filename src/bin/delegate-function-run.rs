//! Helper executable that resumes a delegate chain on the far side of a
//! process boundary.
//!
//! Reads the before-image, runs the delegated step of the chain it finds
//! there, and writes the after-image. Exits 0 on success; on any failure a
//! diagnostic goes to standard error and the exit status is non-zero.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

#[derive(Debug, Parser)]
#[command(name = "delegate-function-run")]
#[command(about = "Resume a serialized delegate chain and record its outcome")]
struct Cli {
    /// File with the serialized state of the delegate before execution.
    #[arg(long, value_name = "PATH")]
    delegate_before: PathBuf,

    /// File to write the delegate state and return value to after
    /// execution.
    #[arg(long, value_name = "PATH")]
    delegate_after: PathBuf,

    /// Verbosity, 0 (off) to 5 (trace). Defaults to RUST_LOG, then off.
    #[arg(long, value_name = "N")]
    log_level: Option<u8>,
}

fn init_logging(level: Option<u8>) {
    let mut builder = env_logger::Builder::from_default_env();
    if let Some(level) = level {
        builder.filter_level(match level {
            0 => log::LevelFilter::Off,
            1 => log::LevelFilter::Error,
            2 => log::LevelFilter::Warn,
            3 => log::LevelFilter::Info,
            4 => log::LevelFilter::Debug,
            _ => log::LevelFilter::Trace,
        });
    }
    builder.init();
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    if delegate_function::debug_enabled() {
        eprintln!(
            "WARNING: debug hooks are armed ({}=yes); arbitrary code can run at \
             every chain link. Do not leave this set in production.",
            delegate_function::DEBUG_ENABLED_VAR
        );
    }

    delegate_function::probe::register_builtins();

    match delegate_function::helper::run(&cli.delegate_before, &cli.delegate_after) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{}", err);
            eprintln!("delegate-function-run: {}", err);
            ExitCode::FAILURE
        }
    }
}
