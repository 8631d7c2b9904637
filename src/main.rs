//! Main application entry point.
//!
//! Parses the command line, sets up logging and hands over to [`GeoAlarm`],
//! which owns the rest of the lifecycle:
//!
//! 1. Argument parsing and early exit for help/version
//! 2. Configuration loading and lock file management
//! 3. Engine wiring and registration of configured alarms
//! 4. Main loop over stdin commands, timers and signals
//! 5. Graceful cleanup on shutdown

use anyhow::Result;

use geoalarm::args::{self, CliAction, ParsedArgs};
use geoalarm::constants::EXIT_FAILURE;
use geoalarm::logger::Log;
use geoalarm::{GeoAlarm, config, log_error, log_indented};

fn main() -> Result<()> {
    let parsed_args = ParsedArgs::from_env();

    match parsed_args.action {
        CliAction::ShowVersion => {
            args::display_version_info();
            Ok(())
        }
        CliAction::ShowHelp => {
            args::display_help();
            Ok(())
        }
        CliAction::ShowHelpDueToError => {
            args::display_help();
            std::process::exit(EXIT_FAILURE);
        }
        CliAction::Run {
            debug_enabled,
            config_dir,
            log_file,
        } => {
            Log::set_debug(debug_enabled);
            config::set_config_dir(config_dir)?;

            let log_guard = match log_file {
                Some(path) => Some(Log::start_file_logging(path)?),
                None => None,
            };

            let result = GeoAlarm::new(debug_enabled).run();
            if let Err(e) = &result {
                log_error!("geoalarm stopped: {e}");
                for cause in e.chain().skip(1) {
                    log_indented!("{cause}");
                }
            }

            // Flush the log file before a possible exit skips destructors
            drop(log_guard);
            if result.is_err() {
                std::process::exit(EXIT_FAILURE);
            }
            Ok(())
        }
    }
}
