/*
Copyright 2021 Jakub Lewandowski

This file is part of WRF Preparation System (WRFPREP).

WRF Preparation System (WRFPREP) is a free software: you can redistribute it and/or modify
it under the terms of the GNU General Public License as published by
the Free Software Foundation; either version 3 of the License, or
(at your option) any later version.

WRF Preparation System (WRFPREP) is distributed in the hope that it will be useful,
but WITHOUT ANY WARRANTY; without even the implied warranty of
MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
GNU General Public License for more details.

You should have received a copy of the GNU General Public License
along with WRF Preparation System (WRFPREP). If not, see https://www.gnu.org/licenses/.
*/

//! WRF Preparation System (WRFPREP) prepares multi-day WRF simulations.
//!
//! Given a date range and a per-job length it computes the sequence of
//! forecast jobs, checks that the WPS and WRF namelists agree on the
//! parameters they share, stages the static and meteorological input
//! data with the WPS preprocessing tools (reusing cached files whenever
//! they already exist) and generates the control scripts for every job.
//!
//! The simulation itself is launched by the generated scripts, not by
//! this program.

mod constants;
mod errors;
mod setup;

use clap::Parser;
use env_logger::Env;
use log::{error, info};
use std::path::PathBuf;
use std::process::ExitCode;

/// Command line arguments of the program.
#[derive(Parser, Debug)]
#[command(
    name = "wrfprep",
    about = "Prepare and stage a sequence of WRF simulation jobs"
)]
struct Args {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "configfile", default_value = "config.yaml")]
    configfile: PathBuf,
}

/// The main program function.
/// Prepares the runtime environment and calls [`setup::main`].
///
/// To provide meaningful and high-quality error messages the `env_logger`
/// needs to be initiated before any log messages are possible to occur.
fn main() -> ExitCode {
    // an optional .env file can override the process environment
    let _ = dotenvy::dotenv();

    #[cfg(not(feature = "debug"))]
    let logger_env = Env::new().filter_or("WRFPREP_LOG_LEVEL", "info");

    #[cfg(feature = "debug")]
    let logger_env = Env::new().filter_or("WRFPREP_LOG_LEVEL", "debug");

    env_logger::Builder::from_env(logger_env)
        .format_timestamp_millis()
        .init();

    let args = Args::parse();

    match setup::main(&args.configfile) {
        Ok(()) => {
            info!("Run preparation finished. Check the run directory and log.");
            ExitCode::SUCCESS
        }
        Err(err) => {
            error!("Run preparation failed with error: {}", err);
            ExitCode::FAILURE
        }
    }
}
