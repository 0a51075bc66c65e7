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

//! Invocation of real.exe, the WRF initialization program.
//!
//! real.exe consumes the linked met_em files and produces the
//! boundary, initial and lower-boundary condition files in the job
//! directory. Like the WPS tools it signals success through a marker,
//! but writes it into its rank log `rsl.out.0000` instead of stdout.

use crate::constants::{REAL_LOG_FILE, REAL_SUCCESS};
use crate::errors::StagingError;
use crate::setup::configuration::Config;
use crate::setup::fsutil::purge;
use crate::setup::process::{contains_marker, run_command};
use log::info;
use std::fs;
use std::path::Path;

/// Runs real.exe through the MPI launcher and verifies its success
/// marker, then drops the preprocessing links the job no longer needs.
pub fn run_initialization(config: &Config, job_dir: &Path) -> Result<(), StagingError> {
    info!("Run real.exe");
    run_command(
        &[config.tools.mpi_command.as_str(), "-np", "1", "./real.exe"],
        job_dir,
        Some("real.log"),
    )?;

    let log_path = job_dir.join(REAL_LOG_FILE);
    if !log_path.exists() {
        return Err(StagingError::ToolProducedNoOutput {
            tool: "real.exe",
            expected: REAL_LOG_FILE.to_string(),
        });
    }

    let log_text = fs::read_to_string(&log_path)?;
    if !contains_marker(&log_text, REAL_SUCCESS) {
        return Err(StagingError::SuccessMarkerMissing { tool: "real.exe" });
    }

    // drop the preprocessing links, the initialization files are in place
    for name in ["link_grib.csh", "Vtable", "metgrid.exe", "ungrib.exe"] {
        let path = job_dir.join(name);
        if path.symlink_metadata().is_ok() {
            fs::remove_file(path)?;
        }
    }
    let metgrid_dir = job_dir.join("metgrid");
    if metgrid_dir.exists() {
        fs::remove_dir_all(metgrid_dir)?;
    }

    if config.analysis.delete_metem_files {
        purge(&config.analysis.metem_dir, "^met_em")?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::staging::test_config;
    use tempfile::tempdir;

    // the test config uses `true` as the MPI launcher, so the real.exe
    // invocation itself always "succeeds" and the marker logic decides

    #[test]
    fn missing_rank_log_means_no_output() {
        let root = tempdir().unwrap();
        let config = test_config(root.path());
        let job_dir = root.path().join("runs/2019070200");
        fs::create_dir_all(&job_dir).unwrap();

        let err = run_initialization(&config, &job_dir).unwrap_err();
        assert!(matches!(err, StagingError::ToolProducedNoOutput { .. }));
    }

    #[test]
    fn marker_missing_in_rank_log_is_fatal() {
        let root = tempdir().unwrap();
        let config = test_config(root.path());
        let job_dir = root.path().join("runs/2019070200");
        fs::create_dir_all(&job_dir).unwrap();

        fs::write(job_dir.join(REAL_LOG_FILE), "d01 starting wrf task\n").unwrap();

        let err = run_initialization(&config, &job_dir).unwrap_err();
        assert!(matches!(err, StagingError::SuccessMarkerMissing { .. }));
    }

    #[test]
    fn marker_in_rank_log_completes_and_cleans_up() {
        let root = tempdir().unwrap();
        let config = test_config(root.path());
        let job_dir = root.path().join("runs/2019070200");
        fs::create_dir_all(&job_dir).unwrap();

        fs::write(
            job_dir.join(REAL_LOG_FILE),
            "d01 2019-07-01_12:00:00 real_em: SUCCESS COMPLETE REAL_EM INIT\n",
        )
        .unwrap();
        fs::write(job_dir.join("Vtable"), b"").unwrap();
        fs::write(job_dir.join("ungrib.exe"), b"").unwrap();
        fs::create_dir_all(job_dir.join("metgrid")).unwrap();

        run_initialization(&config, &job_dir).unwrap();

        assert!(!job_dir.join("Vtable").exists());
        assert!(!job_dir.join("ungrib.exe").exists());
        assert!(!job_dir.join("metgrid").exists());
    }
}
