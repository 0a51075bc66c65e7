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

//! Optional staging of high-resolution sea-surface temperatures.
//!
//! When enabled, the daily and monthly SST files covering the window
//! are linked into a scratch directory and extracted by a dedicated
//! ungrib pass with its own Vtable and prefix, before the main
//! analysis extraction runs.

use crate::constants::UNGRIB_SUCCESS;
use crate::errors::StagingError;
use crate::setup::configuration::{Config, Sst};
use crate::setup::fsutil::{count_matching, purge, symlink_if_missing, symlink_replacing};
use crate::setup::namelist::{Namelist, Value};
use crate::setup::process::{contains_marker, require_tool, run_command};
use crate::setup::schedule::JobWindow;
use chrono::Duration;
use log::info;
use std::fs;
use std::path::Path;

/// Stages the SST fields for the window and runs the dedicated ungrib
/// pass over them.
pub fn stage_sst(
    config: &Config,
    sst: &Sst,
    wps: &mut Namelist,
    window: &JobWindow,
    job_dir: &Path,
    ndom: usize,
) -> Result<(), StagingError> {
    info!("Stage the high-resolution SST data");

    // the SST extraction reads whole days around the window
    let start_entry = format!(
        "{}_00:00:00",
        window.original_start.date().format("%Y-%m-%d")
    );
    let end_entry = format!(
        "{}_00:00:00",
        (window.end.date() + Duration::days(1)).format("%Y-%m-%d")
    );
    wps.set(
        "share",
        "start_date",
        Value::text_per_domain(&start_entry, ndom),
    );
    wps.set("share", "end_date", Value::text_per_domain(&end_entry, ndom));
    wps.set("share", "interval_seconds", Value::int(21600));
    wps.set("ungrib", "prefix", Value::text("SST"));
    wps.set(
        "geogrid",
        "geog_data_path",
        Value::text(config.geography.geog_data_path.display().to_string()),
    );
    wps.write_to(&job_dir.join("namelist.wps"))?;

    let scratch = job_dir.join("sst_tmp");
    fs::create_dir_all(&scratch)?;

    let first_day = window.original_start.date() - Duration::days(1);
    let last_day = window.end.date() + Duration::days(1);

    let mut day = first_day;
    while day <= last_day {
        let monthly = day.format(&sst.monthly_pattern).to_string();
        let monthly_source = sst.monthly_dir.join(&monthly);
        if monthly_source.exists() {
            symlink_if_missing(&monthly_source, &scratch.join(&monthly))?;
        }

        let daily = day.format(&sst.daily_pattern).to_string();
        let daily_source = sst.daily_dir.join(&daily);
        if daily_source.exists() {
            symlink_if_missing(&daily_source, &scratch.join(&daily))?;
        }

        day = day + Duration::days(1);
    }

    purge(job_dir, "^GRIBFILE")?;
    info!("Run link_grib for the SST data");
    run_command(
        &["./link_grib.csh", "sst_tmp/*"],
        job_dir,
        Some("link_grib_sst.log"),
    )?;

    if count_matching(job_dir, "^GRIBFILE")? == 0 {
        return Err(StagingError::NoGribLinked);
    }

    require_tool("SST Vtable", &sst.vtable)?;
    symlink_replacing(&sst.vtable, &job_dir.join("Vtable"))?;
    purge(job_dir, "^SST:")?;
    purge(job_dir, "^PFILE:")?;

    info!("Run ungrib for the SST data");
    let (stdout, _) = run_command(&["./ungrib.exe"], job_dir, Some("ungrib_sst.log"))?;
    if !contains_marker(&stdout, UNGRIB_SUCCESS) {
        return Err(StagingError::SuccessMarkerMissing {
            tool: "ungrib.exe (SST)",
        });
    }

    fs::rename(job_dir.join("namelist.wps"), job_dir.join("namelist.wps.sst"))?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::configuration::Sst;
    use crate::setup::schedule;
    use chrono::NaiveDate;
    use tempfile::tempdir;

    #[test]
    fn sst_staging_without_linked_gribs_fails() {
        let root = tempdir().unwrap();
        let config = crate::setup::staging::test_config(root.path());
        let job_dir = root.path().join("runs/2019070200");
        fs::create_dir_all(&job_dir).unwrap();

        let sst = Sst {
            monthly_dir: root.path().join("sst_monthly"),
            monthly_pattern: "sst_monthly_%Y%m.grib".to_string(),
            daily_dir: root.path().join("sst_daily"),
            daily_pattern: "sst_daily_%Y%m%d.grib".to_string(),
            vtable: root.path().join("Vtable.SST"),
        };

        // link_grib.csh is a no-op here, so no GRIBFILE links appear
        // and the staging must stop before ungrib
        let script = job_dir.join("link_grib.csh");
        fs::write(&script, b"#!/bin/sh\n").unwrap();
        let mut permissions = fs::metadata(&script).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut permissions, 0o755);
        fs::set_permissions(&script, permissions).unwrap();

        let start = NaiveDate::from_ymd_opt(2019, 7, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        let window =
            schedule::schedule(start, start + Duration::hours(24), 24, 12)[0];

        let mut wps =
            Namelist::parse("&share\n max_dom = 1,\n/\n&geogrid\n dx = 30000,\n/\n").unwrap();

        let err = stage_sst(&config, &sst, &mut wps, &window, &job_dir, 1).unwrap_err();
        assert!(matches!(err, StagingError::NoGribLinked));

        // the namelist was rewritten with the SST prefix before the failure
        assert_eq!(
            wps.get("ungrib", "prefix").unwrap(),
            &Value::text("SST")
        );
    }
}
