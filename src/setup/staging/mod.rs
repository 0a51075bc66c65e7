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

//! Module responsible for staging the input data of every job.
//!
//! Each class of input (geography tiles, analysis fields, interpolated
//! met_em files) follows the same protocol: check whether the expected
//! files already exist in the shared cache, regenerate them with the
//! external preprocessing tools when they do not, and symlink them
//! into the job working directory. Presence of an expected file name
//! is the only validity check the caches have, so they behave as
//! append-only and must not be shared by concurrent runs.

pub mod geography;
pub mod metfields;
pub mod realinit;
pub mod sst;

use super::configuration::{AnalysisSource, Config, Levels};
use super::fsutil::{link_pattern_to_dir, purge, symlink_if_missing, symlink_replacing};
use super::namelist::{Namelist, Value};
use super::process::require_tool;
use super::schedule::JobWindow;
use crate::errors::StagingError;
use chrono::{Datelike, Timelike};
use log::info;
use std::path::Path;

/// Formats the 1-based domain tag used in file names: `d01`, `d02`, ...
pub fn domain_tag(index: usize) -> String {
    format!("d{:02}", index + 1)
}

/// Stages one job window: input data, the per-job WRF namelist and the
/// executable links.
///
/// When the WRF initialization files of the job already exist, or the
/// run is in namelist-only mode, all data staging and the
/// initialization run are skipped and only the namelist and links are
/// refreshed.
pub fn prepare_job(
    config: &Config,
    wps: &mut Namelist,
    wrf: &mut Namelist,
    window: &JobWindow,
    job_dir: &Path,
    ndom: usize,
) -> Result<(), StagingError> {
    let total_hours = config.run.hours_per_job + config.run.hours_spin_up;

    info!("Check that the WRF initialisation files exist");
    let init_present = init_files_present(job_dir, ndom);
    let stage = !config.run.only_edit_namelists && !init_present;

    if stage {
        info!("The WRF initialisation files did not exist");
        geography::ensure_geo_files(config, wps, job_dir, ndom)?;
        metfields::ensure_met_fields(config, wps, window, job_dir, ndom, total_hours)?;
    }

    configure_wrf_namelist(
        wrf,
        window,
        ndom,
        config.run.restart,
        met_levels(config.levels, config.analysis.source),
    );
    wrf.write_to(&job_dir.join("namelist.input"))?;

    link_run_files(config, job_dir)?;

    if stage {
        realinit::run_initialization(config, job_dir)?;
    }

    // the met_em links are consumed by real.exe and no longer needed
    purge(job_dir, "^met_em")?;

    Ok(())
}

/// Checks for the boundary, initial and lower-boundary condition files
/// real.exe would have produced on an earlier run.
fn init_files_present(job_dir: &Path, ndom: usize) -> bool {
    let mut present = job_dir.join("wrfbdy_d01").exists();

    for idom in 0..ndom {
        let dom = domain_tag(idom);
        present = present && job_dir.join(format!("wrfinput_{}", dom)).exists();
        present = present && job_dir.join(format!("wrflowinp_{}", dom)).exists();
    }

    present
}

/// Level counts written into the WRF namelist: the configured override
/// when present, otherwise the per-source defaults.
fn met_levels(levels: Option<Levels>, source: AnalysisSource) -> (i64, i64) {
    match (levels, source) {
        (Some(levels), _) => (levels.metgrid, levels.soil),
        (None, AnalysisSource::Erai) => (38, 4),
        (None, AnalysisSource::Fnl) => (27, 4),
    }
}

/// Writes the window timestamps, restart flag and level counts into
/// the WRF namelist.
fn configure_wrf_namelist(
    wrf: &mut Namelist,
    window: &JobWindow,
    ndom: usize,
    restart: bool,
    levels: (i64, i64),
) {
    info!("Configure the WRF namelist");

    let start = window.original_start;
    let end = window.end;

    wrf.set(
        "time_control",
        "start_year",
        Value::int_per_domain(i64::from(start.year()), ndom),
    );
    wrf.set(
        "time_control",
        "start_month",
        Value::int_per_domain(i64::from(start.month()), ndom),
    );
    wrf.set(
        "time_control",
        "start_day",
        Value::int_per_domain(i64::from(start.day()), ndom),
    );
    wrf.set(
        "time_control",
        "start_hour",
        Value::int_per_domain(i64::from(start.hour()), ndom),
    );
    wrf.set(
        "time_control",
        "start_minute",
        Value::int_per_domain(i64::from(start.minute()), ndom),
    );
    wrf.set(
        "time_control",
        "start_second",
        Value::int_per_domain(i64::from(start.second()), ndom),
    );

    wrf.set(
        "time_control",
        "end_year",
        Value::int_per_domain(i64::from(end.year()), ndom),
    );
    wrf.set(
        "time_control",
        "end_month",
        Value::int_per_domain(i64::from(end.month()), ndom),
    );
    wrf.set(
        "time_control",
        "end_day",
        Value::int_per_domain(i64::from(end.day()), ndom),
    );
    wrf.set(
        "time_control",
        "end_hour",
        Value::int_per_domain(i64::from(end.hour()), ndom),
    );
    wrf.set(
        "time_control",
        "end_minute",
        Value::int_per_domain(i64::from(end.minute()), ndom),
    );
    wrf.set(
        "time_control",
        "end_second",
        Value::int_per_domain(i64::from(end.second()), ndom),
    );

    wrf.set("time_control", "restart", Value::logical(restart));

    let (nz_metem, nz_soil) = levels;
    wrf.set("domains", "num_metgrid_levels", Value::int(nz_metem));
    wrf.set("domains", "num_metgrid_soil_levels", Value::int(nz_soil));
}

/// Links the simulation executables, the WRF lookup tables and the
/// configured helper scripts into the job directory.
fn link_run_files(config: &Config, job_dir: &Path) -> Result<(), StagingError> {
    require_tool("real.exe", &config.tools.real_exe)?;
    symlink_replacing(&config.tools.real_exe, &job_dir.join("real.exe"))?;

    require_tool("wrf.exe", &config.tools.wrf_exe)?;
    symlink_replacing(&config.tools.wrf_exe, &job_dir.join("wrf.exe"))?;

    link_pattern_to_dir(
        &config.wrf_files.run_dir,
        &config.wrf_files.tables_pattern,
        job_dir,
    )?;

    for script in &config.wrf_files.link_scripts {
        require_tool("helper script", script)?;
        let name = script
            .file_name()
            .ok_or_else(|| StagingError::MissingTool {
                what: "helper script",
                path: script.clone(),
            })?;
        symlink_if_missing(script, &job_dir.join(name))?;
    }

    Ok(())
}

#[cfg(test)]
pub(crate) fn test_config(root: &Path) -> Config {
    use super::configuration::*;

    Config {
        run: Run {
            name: "testrun".to_string(),
            start_date: "2019-07-01T00:00:00".parse().unwrap(),
            end_date: "2019-07-03T00:00:00".parse().unwrap(),
            hours_per_job: 24,
            hours_spin_up: 12,
            restart: false,
            run_as_one_job: false,
            only_edit_namelists: false,
            run_dir: root.join("runs"),
        },
        namelists: Namelists {
            wps: root.join("namelist.wps"),
            wrf: root.join("namelist.input"),
        },
        templates: Templates {
            main: root.join("templates/main.sh"),
            run: root.join("templates/run.sh"),
            cleanup: root.join("templates/cleanup.sh"),
        },
        geography: Geography {
            geo_em_dir: root.join("geo_em"),
            geog_data_path: root.join("geog"),
            geogrid_tbl: root.join("GEOGRID.TBL"),
            geogrid_exe: root.join("geogrid.exe"),
        },
        analysis: Analysis {
            source: AnalysisSource::Fnl,
            metem_dir: root.join("metem"),
            delete_metem_files: false,
            pattern_surface: String::new(),
            pattern_upper: String::new(),
            vtable: root.join("Vtable.GFS"),
            subset: None,
        },
        sst: None,
        tools: Tools {
            link_grib_script: root.join("link_grib.csh"),
            ungrib_exe: root.join("ungrib.exe"),
            metgrid_exe: root.join("metgrid.exe"),
            metgrid_tbl: root.join("METGRID.TBL"),
            real_exe: root.join("real.exe"),
            wrf_exe: root.join("wrf.exe"),
            mpi_command: "true".to_string(),
        },
        wrf_files: WrfFiles {
            run_dir: root.join("wrfrun"),
            tables_pattern: "TBL$".to_string(),
            link_scripts: Vec::new(),
        },
        levels: None,
        download: Download::default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::schedule;
    use chrono::NaiveDate;
    use std::fs;
    use tempfile::tempdir;

    fn window() -> JobWindow {
        let start = NaiveDate::from_ymd_opt(2019, 7, 2)
            .unwrap()
            .and_hms_opt(0, 0, 0)
            .unwrap();
        schedule::schedule(
            start,
            start + chrono::Duration::hours(24),
            24,
            12,
        )[0]
    }

    #[test]
    fn domain_tags_are_one_based() {
        assert_eq!(domain_tag(0), "d01");
        assert_eq!(domain_tag(2), "d03");
    }

    #[test]
    fn level_defaults_follow_the_analysis_source() {
        assert_eq!(met_levels(None, AnalysisSource::Erai), (38, 4));
        assert_eq!(met_levels(None, AnalysisSource::Fnl), (27, 4));
        assert_eq!(
            met_levels(
                Some(Levels {
                    metgrid: 34,
                    soil: 4
                }),
                AnalysisSource::Fnl
            ),
            (34, 4)
        );
    }

    #[test]
    fn init_check_needs_every_domain_file() {
        let dir = tempdir().unwrap();
        assert!(!init_files_present(dir.path(), 2));

        for name in [
            "wrfbdy_d01",
            "wrfinput_d01",
            "wrflowinp_d01",
            "wrfinput_d02",
        ] {
            fs::write(dir.path().join(name), b"").unwrap();
        }
        assert!(!init_files_present(dir.path(), 2));

        fs::write(dir.path().join("wrflowinp_d02"), b"").unwrap();
        assert!(init_files_present(dir.path(), 2));
    }

    #[test]
    fn wrf_namelist_gets_the_window_timestamps() {
        let mut wrf = Namelist::parse(
            "\
&time_control
 interval_seconds = 21600,
/
&domains
 max_dom = 2,
/
",
        )
        .unwrap();

        configure_wrf_namelist(&mut wrf, &window(), 2, true, (27, 4));

        assert_eq!(
            wrf.get("time_control", "start_day").unwrap(),
            &Value::int_per_domain(1, 2)
        );
        assert_eq!(
            wrf.get("time_control", "start_hour").unwrap(),
            &Value::int_per_domain(12, 2)
        );
        assert_eq!(
            wrf.get("time_control", "end_day").unwrap(),
            &Value::int_per_domain(3, 2)
        );
        assert_eq!(
            wrf.get("time_control", "restart").unwrap(),
            &Value::logical(true)
        );
        assert_eq!(
            wrf.get("domains", "num_metgrid_levels").unwrap(),
            &Value::int(27)
        );
    }
}
