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

//! Module containing the actual run preparation logic.
//!
//! The preparation is strictly sequential: configuration and namelists
//! are checked once up front, then the jobs are staged one after
//! another. The first fatal error aborts the whole run, work already
//! done for earlier jobs is left in place.

mod configuration;
mod fetch;
mod fsutil;
mod namelist;
mod process;
mod schedule;
mod scripts;
mod staging;

use crate::constants::JOB_DIR_FORMAT;
use crate::errors::SetupError;
use configuration::Config;
use log::info;
use namelist::Namelist;
use std::fs;
use std::path::Path;

/// Main preparation function, responsible for all steps of the run
/// setup.
///
/// It loads and checks the configuration and both namelists, computes
/// the job windows covering the requested date range and then stages
/// every job in order.
pub fn main(config_path: &Path) -> Result<(), SetupError> {
    info!("Reading configuration from {}", config_path.display());
    let config = Config::new_from_file(config_path)?;

    let main_template = scripts::read_template(&config.templates.main)?;
    let run_template = scripts::read_template(&config.templates.run)?;
    let cleanup_template = scripts::read_template(&config.templates.cleanup)?;

    let mut wps = Namelist::from_file(&config.namelists.wps)?;
    let mut wrf = Namelist::from_file(&config.namelists.wrf)?;

    namelist::validate::check_consistency(&wps, &wrf)?;

    let ndom = wps.get_int("share", "max_dom")? as usize;

    let windows = schedule::schedule(
        config.run.start_date,
        config.run.end_date,
        config.run.hours_per_job,
        config.run.hours_spin_up,
    );
    info!(
        "Prepared {} jobs of {} usable hours each",
        windows.len(),
        config.run.hours_per_job
    );

    fs::create_dir_all(&config.run.run_dir)?;

    info!("Generate the main coordination script");
    let substitutions = [
        (
            "STARTDATE",
            config.run.start_date.format(JOB_DIR_FORMAT).to_string(),
        ),
        ("njobs", windows.len().to_string()),
        ("nhours", config.run.hours_per_job.to_string()),
        ("RUNNAME", config.run.name.clone()),
        ("NUDGING", (!config.run.restart).to_string()),
        ("runAsOneJob", config.run.run_as_one_job.to_string()),
        ("RUN_DIR", config.run.run_dir.display().to_string()),
    ];
    scripts::write_executable(
        &config.run.run_dir.join("main.sh"),
        &scripts::render(&main_template, &substitutions),
    )?;

    for window in &windows {
        info!(
            "Start preparation for the run beginning {}",
            window.usable_start.date()
        );

        let job_dir = config
            .run
            .run_dir
            .join(window.usable_start.format(JOB_DIR_FORMAT).to_string());
        fs::create_dir_all(&job_dir)?;

        staging::prepare_job(&config, &mut wps, &mut wrf, window, &job_dir, ndom)?;

        info!("Generate the run and cleanup scripts");
        let substitutions = [
            ("RUN_DIR", job_dir.display().to_string()),
            (
                "RUNSHORT",
                config.run.name.chars().take(8).collect::<String>(),
            ),
            (
                "STARTDATE",
                window.usable_start.format("%Y%m%d").to_string(),
            ),
            (
                "firstTimeToKeep",
                window.usable_start.format("%Y-%m-%dT%H%M").to_string(),
            ),
        ];
        scripts::write_executable(
            &job_dir.join("run.sh"),
            &scripts::render(&run_template, &substitutions),
        )?;
        scripts::write_executable(
            &job_dir.join("cleanup.sh"),
            &scripts::render(&cleanup_template, &substitutions),
        )?;
    }

    Ok(())
}
