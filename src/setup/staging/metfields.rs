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

//! Staging of the interpolated meteorological fields (met_em files).
//!
//! The met_em files of a job cover every six-hourly timestamp of the
//! spin-up plus usable window for every domain. A single missing
//! timestamp regenerates the whole class for the window: raw analyses
//! are gathered (from a local archive mirror or by downloading),
//! linked for ungrib, extracted, optionally subset and finally
//! interpolated by metgrid. The products are moved into the shared
//! cache and linked into the job directory.

use super::{domain_tag, sst};
use crate::constants::{ANALYSIS_INTERVAL_HOURS, METEM_TIME_FORMAT, METGRID_SUCCESS, UNGRIB_SUCCESS};
use crate::errors::StagingError;
use crate::setup::configuration::{AnalysisSource, Config, RegionalSubset};
use crate::setup::fetch;
use crate::setup::fsutil::{
    count_matching, move_pattern_to_dir, purge, symlink_if_missing, symlink_replacing,
};
use crate::setup::namelist::{Namelist, Value};
use crate::setup::process::{contains_marker, require_tool, run_command};
use crate::setup::schedule::{hourly_range, JobWindow};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use log::info;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};

/// Name of the met_em file of a domain and timestamp.
pub fn met_file(idom: usize, time: NaiveDateTime) -> String {
    format!(
        "met_em.{}.{}.nc",
        domain_tag(idom),
        time.format(METEM_TIME_FORMAT)
    )
}

/// Checks whether the cache holds a met_em file for every timestamp
/// and domain combination.
pub(crate) fn cache_complete(cache: &Path, times: &[NaiveDateTime], ndom: usize) -> bool {
    times
        .iter()
        .all(|time| (0..ndom).all(|idom| cache.join(met_file(idom, *time)).exists()))
}

/// Makes sure the met_em files of the window exist in the shared cache
/// and are linked into the job directory.
pub fn ensure_met_fields(
    config: &Config,
    wps: &mut Namelist,
    window: &JobWindow,
    job_dir: &Path,
    ndom: usize,
    total_hours: i64,
) -> Result<(), StagingError> {
    info!("Check that the met_em files exist");

    let cache = &config.analysis.metem_dir;
    let times = hourly_range(window.original_start, total_hours, ANALYSIS_INTERVAL_HOURS);

    let cached = if cache.exists() {
        cache_complete(cache, &times, ndom)
    } else {
        fs::create_dir_all(cache)?;
        false
    };

    if !cached {
        info!("The met_em files did not exist - create them");
        regenerate(config, wps, window, job_dir, ndom, &times)?;
    }

    info!("Link to the met_em files");
    for time in &times {
        for idom in 0..ndom {
            let name = met_file(idom, *time);
            let source = cache.join(&name);
            if !source.exists() {
                return Err(StagingError::MissingCachedFile(source));
            }
            symlink_if_missing(&source, &job_dir.join(&name))?;
        }
    }

    Ok(())
}

/// Runs the full regeneration protocol for the window.
fn regenerate(
    config: &Config,
    wps: &mut Namelist,
    window: &JobWindow,
    job_dir: &Path,
    ndom: usize,
    times: &[NaiveDateTime],
) -> Result<(), StagingError> {
    require_tool("link_grib script", &config.tools.link_grib_script)?;
    symlink_replacing(&config.tools.link_grib_script, &job_dir.join("link_grib.csh"))?;
    require_tool("ungrib.exe", &config.tools.ungrib_exe)?;
    symlink_if_missing(&config.tools.ungrib_exe, &job_dir.join("ungrib.exe"))?;

    let sst_active = config.analysis.source == AnalysisSource::Erai && config.sst.is_some();
    if sst_active {
        if let Some(sst_config) = &config.sst {
            sst::stage_sst(config, sst_config, wps, window, job_dir, ndom)?;
        }
    }

    let link_grib_args = match config.analysis.source {
        AnalysisSource::Erai => stage_era_archives(config, window, job_dir)?,
        AnalysisSource::Fnl => stage_fnl_analyses(config, job_dir, times)?,
    };

    // window edits of the WPS namelist read by ungrib and metgrid
    wps.set(
        "share",
        "start_date",
        Value::text_per_domain(
            &window.original_start.format(METEM_TIME_FORMAT).to_string(),
            ndom,
        ),
    );
    wps.set(
        "share",
        "end_date",
        Value::text_per_domain(&window.end.format(METEM_TIME_FORMAT).to_string(), ndom),
    );
    wps.set(
        "share",
        "interval_seconds",
        Value::int(ANALYSIS_INTERVAL_HOURS * 3600),
    );
    wps.set("ungrib", "prefix", Value::text("ERA"));
    let mut fg_names = vec!["ERA".to_string()];
    if sst_active {
        fg_names.push("SST".to_string());
    }
    wps.set("metgrid", "fg_name", Value::text_sequence(fg_names));
    wps.write_to(&job_dir.join("namelist.wps"))?;

    purge(job_dir, "^GRIBFILE")?;
    info!("Run link_grib for the analysis data");
    let argv: Vec<&str> = link_grib_args.iter().map(String::as_str).collect();
    run_command(&argv, job_dir, Some("link_grib.log"))?;

    if count_matching(job_dir, "^GRIBFILE")? == 0 {
        return Err(StagingError::NoGribLinked);
    }

    require_tool("analysis Vtable", &config.analysis.vtable)?;
    symlink_replacing(&config.analysis.vtable, &job_dir.join("Vtable"))?;
    purge(job_dir, "^ERA:")?;

    info!("Run ungrib for the analysis data");
    let (stdout, _) = run_command(&["./ungrib.exe"], job_dir, Some("ungrib.log"))?;
    if !contains_marker(&stdout, UNGRIB_SUCCESS) {
        return Err(StagingError::SuccessMarkerMissing { tool: "ungrib.exe" });
    }

    // the downloaded analyses are no longer needed once extracted
    if config.analysis.source == AnalysisSource::Fnl {
        for time in times {
            fs::remove_file(job_dir.join(fetch::analysis_file_name(*time)))?;
        }
    }

    run_metgrid(config, job_dir)?;

    // scratch products are purged before the results move to the cache
    purge(job_dir, "^ERA:")?;
    if sst_active {
        purge(job_dir, "^SST:")?;
    }
    purge(job_dir, "^FILE:")?;
    purge(job_dir, "^PFILE:")?;
    purge(job_dir, "^GRIB:")?;
    purge(job_dir, r"^fort\.")?;

    move_pattern_to_dir(job_dir, "^met_em", &config.analysis.metem_dir)?;

    Ok(())
}

/// Gathers the FNL analyses for the window into the job directory,
/// downloading any that are not already there, and returns the
/// link_grib invocation.
fn stage_fnl_analyses(
    config: &Config,
    job_dir: &Path,
    times: &[NaiveDateTime],
) -> Result<Vec<String>, StagingError> {
    let names: Vec<String> = times.iter().map(|t| fetch::analysis_file_name(*t)).collect();

    let all_present = names.iter().all(|name| job_dir.join(name).exists());
    if all_present {
        info!("All FNL files were found - do not repeat the download");
    } else {
        fetch::download_analysis_batch(
            job_dir,
            times,
            &config.download.base_url,
            config.download.workers,
        )?;
    }

    if let Some(subset) = &config.analysis.subset {
        subset_grib_files(&names, subset, job_dir)?;
    }

    let mut args = vec!["./link_grib.csh".to_string()];
    args.extend(names);
    Ok(args)
}

/// Replaces each analysis file with its regional subset, cut out by
/// wgrib2. wgrib2 is silent on stderr when it succeeds.
fn subset_grib_files(
    names: &[String],
    subset: &RegionalSubset,
    job_dir: &Path,
) -> Result<(), StagingError> {
    let lon_range = subset.lon_range();
    let lat_range = subset.lat_range();

    for name in names {
        info!("Subset the grib file {}", name);
        let scratch = std::env::temp_dir().join(name);
        let scratch_arg = scratch.display().to_string();

        let (_, stderr) = run_command(
            &[
                "wgrib2",
                name,
                "-small_grib",
                &lon_range,
                &lat_range,
                &scratch_arg,
            ],
            job_dir,
            None,
        )?;
        if !stderr.is_empty() {
            return Err(StagingError::ToolFailed {
                tool: "wgrib2",
                output: stderr,
            });
        }

        // use the subset instead of the original
        fs::remove_file(job_dir.join(name))?;
        fs::copy(&scratch, job_dir.join(name))?;
    }

    Ok(())
}

/// Symlinks the locally mirrored analysis archive files covering the
/// window (padded by one day on both sides) into a scratch directory
/// and returns the link_grib invocation.
fn stage_era_archives(
    config: &Config,
    window: &JobWindow,
    job_dir: &Path,
) -> Result<Vec<String>, StagingError> {
    let scratch = job_dir.join("analysis_tmp");
    fs::create_dir_all(&scratch)?;

    let first_day = window.original_start.date() - Duration::days(1);
    let last_day = window.end.date() + Duration::days(1);

    for (pattern, upper) in [
        (&config.analysis.pattern_surface, false),
        (&config.analysis.pattern_upper, true),
    ] {
        let files = collect_archive_files(pattern, first_day, last_day)?;
        if files.is_empty() {
            continue;
        }

        // the surface archive is cut per month so every match is
        // taken; the upper-air archive embeds its covered date range
        // in the name and only the covering slice is used
        let (start_index, end_index) = if upper {
            select_covering_range(&files, first_day, last_day)?
        } else {
            (0, files.len() - 1)
        };

        for file in &files[start_index..=end_index] {
            if let Some(name) = file.file_name() {
                symlink_if_missing(file, &scratch.join(name))?;
            }
        }
    }

    Ok(vec![
        "./link_grib.csh".to_string(),
        "analysis_tmp/*".to_string(),
    ])
}

/// Expands the dated glob pattern for every day of the padded window
/// and returns the union of the matches in name order.
fn collect_archive_files(
    pattern: &str,
    first_day: NaiveDate,
    last_day: NaiveDate,
) -> Result<Vec<PathBuf>, StagingError> {
    let mut files = BTreeSet::new();

    let mut day = first_day;
    while day <= last_day {
        let dated_pattern = day.format(pattern).to_string();
        for entry in glob::glob(&dated_pattern)? {
            files.insert(entry.map_err(|err| err.into_error())?);
        }
        day = day + Duration::days(1);
    }

    Ok(files.into_iter().collect())
}

/// Finds the slice of archive files whose embedded date ranges cover
/// both ends of the padded window.
pub(crate) fn select_covering_range(
    files: &[PathBuf],
    first_day: NaiveDate,
    last_day: NaiveDate,
) -> Result<(usize, usize), StagingError> {
    let mut start_index = None;
    let mut end_index = None;

    for (index, file) in files.iter().enumerate() {
        let Some((file_start, file_end)) = embedded_date_range(file) else {
            continue;
        };

        if file_start <= first_day && first_day <= file_end {
            start_index = Some(index);
        }
        if file_start <= last_day && last_day <= file_end {
            end_index = Some(index);
        }
    }

    let start_index = start_index.ok_or(StagingError::AnalysisNotCovered(first_day))?;
    let end_index = end_index.ok_or(StagingError::AnalysisNotCovered(last_day))?;
    Ok((start_index, end_index))
}

/// Reads the `..._YYYYMMDD_YYYYMMDD` date range the upper-air archive
/// embeds in its file names.
fn embedded_date_range(file: &Path) -> Option<(NaiveDate, NaiveDate)> {
    let stem = file.file_stem()?.to_str()?;
    let mut parts: Vec<&str> = stem.split('_').collect();

    let end = NaiveDate::parse_from_str(parts.pop()?, "%Y%m%d").ok()?;
    let start = NaiveDate::parse_from_str(parts.pop()?, "%Y%m%d").ok()?;
    Some((start, end))
}

/// Runs metgrid and checks its success marker.
fn run_metgrid(config: &Config, job_dir: &Path) -> Result<(), StagingError> {
    info!("Run metgrid");

    let metgrid_dir = job_dir.join("metgrid");
    fs::create_dir_all(&metgrid_dir)?;

    require_tool("METGRID.TBL", &config.tools.metgrid_tbl)?;
    symlink_if_missing(&config.tools.metgrid_tbl, &metgrid_dir.join("METGRID.TBL"))?;
    require_tool("metgrid.exe", &config.tools.metgrid_exe)?;
    symlink_if_missing(&config.tools.metgrid_exe, &job_dir.join("metgrid.exe"))?;

    let (stdout, _) = run_command(&["./metgrid.exe"], job_dir, Some("metgrid.log"))?;
    if !contains_marker(&stdout, METGRID_SUCCESS) {
        return Err(StagingError::SuccessMarkerMissing {
            tool: "metgrid.exe",
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::setup::schedule;
    use crate::setup::staging::test_config;
    use tempfile::tempdir;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn window() -> JobWindow {
        schedule::schedule(dt(2019, 7, 2, 0), dt(2019, 7, 3, 0), 24, 12)[0]
    }

    #[test]
    fn met_file_names_embed_domain_and_timestamp() {
        assert_eq!(
            met_file(0, dt(2019, 7, 1, 18)),
            "met_em.d01.2019-07-01_18:00:00.nc"
        );
    }

    #[test]
    fn cache_scan_spans_every_timestamp_and_domain() {
        let cache = tempdir().unwrap();
        let times = hourly_range(dt(2019, 7, 1, 12), 36, 6);

        for time in &times {
            fs::write(cache.path().join(met_file(0, *time)), b"nc").unwrap();
        }
        // domain 2 is incomplete
        fs::write(cache.path().join(met_file(1, times[0])), b"nc").unwrap();

        assert!(cache_complete(cache.path(), &times, 1));
        assert!(!cache_complete(cache.path(), &times, 2));
    }

    #[test]
    fn complete_cache_skips_every_tool_and_links() {
        let root = tempdir().unwrap();
        let config = test_config(root.path());
        let job_dir = root.path().join("runs/2019070200");
        fs::create_dir_all(&job_dir).unwrap();

        let times = hourly_range(window().original_start, 36, 6);
        fs::create_dir_all(&config.analysis.metem_dir).unwrap();
        for time in &times {
            fs::write(config.analysis.metem_dir.join(met_file(0, *time)), b"nc").unwrap();
        }

        // none of the external tools exist under the temp root, so any
        // regeneration attempt would fail before linking
        let mut wps = Namelist::parse("&share\n max_dom = 1,\n/\n").unwrap();
        ensure_met_fields(&config, &mut wps, &window(), &job_dir, 1, 36).unwrap();
        ensure_met_fields(&config, &mut wps, &window(), &job_dir, 1, 36).unwrap();

        for time in &times {
            assert!(job_dir
                .join(met_file(0, *time))
                .symlink_metadata()
                .unwrap()
                .file_type()
                .is_symlink());
        }
    }

    #[test]
    fn incomplete_cache_fails_fast_on_the_first_missing_tool() {
        let root = tempdir().unwrap();
        let config = test_config(root.path());
        let job_dir = root.path().join("runs/2019070200");
        fs::create_dir_all(&job_dir).unwrap();

        let mut wps = Namelist::parse("&share\n max_dom = 1,\n/\n").unwrap();
        let err = ensure_met_fields(&config, &mut wps, &window(), &job_dir, 1, 36).unwrap_err();
        assert!(matches!(err, StagingError::MissingTool { .. }));
    }

    fn write_tool(path: &Path, content: &str) {
        fs::write(path, content).unwrap();
        let mut permissions = fs::metadata(path).unwrap().permissions();
        std::os::unix::fs::PermissionsExt::set_mode(&mut permissions, 0o755);
        fs::set_permissions(path, permissions).unwrap();
    }

    /// Builds a working set of fake WPS tools under the config root:
    /// link_grib creates one GRIBFILE link, metgrid creates the met_em
    /// files for the window and prints its marker.
    fn fake_tools(config: &Config, times: &[NaiveDateTime], ungrib_script: &str) {
        write_tool(
            &config.tools.link_grib_script,
            "#!/bin/sh\ntouch GRIBFILE.AAA\n",
        );
        write_tool(&config.tools.ungrib_exe, ungrib_script);

        let touches: String = times
            .iter()
            .map(|t| format!("touch '{}'\n", met_file(0, *t)))
            .collect();
        write_tool(
            &config.tools.metgrid_exe,
            &format!(
                "#!/bin/sh\n{}echo '!  Successful completion of metgrid  !'\n",
                touches
            ),
        );

        fs::write(&config.tools.metgrid_tbl, b"").unwrap();
        fs::write(&config.analysis.vtable, b"").unwrap();
    }

    #[test]
    fn marker_with_non_zero_exit_is_still_a_success() {
        let root = tempdir().unwrap();
        let config = test_config(root.path());
        let job_dir = root.path().join("runs/2019070200");
        fs::create_dir_all(&job_dir).unwrap();

        let times = hourly_range(window().original_start, 36, 6);
        // ungrib prints its marker but exits non-zero; only the marker counts
        fake_tools(
            &config,
            &times,
            "#!/bin/sh\necho 'Successful completion of ungrib'\nexit 1\n",
        );
        // the FNL analyses are already in place, no download happens
        for time in &times {
            fs::write(job_dir.join(fetch::analysis_file_name(*time)), b"grib").unwrap();
        }

        let mut wps = Namelist::parse(
            "&share\n max_dom = 1,\n/\n&ungrib\n prefix = 'ERA',\n/\n&metgrid\n fg_name = 'ERA',\n/\n",
        )
        .unwrap();
        ensure_met_fields(&config, &mut wps, &window(), &job_dir, 1, 36).unwrap();

        // products were moved to the cache and linked back into the job
        for time in &times {
            assert!(config.analysis.metem_dir.join(met_file(0, *time)).exists());
            assert!(job_dir
                .join(met_file(0, *time))
                .symlink_metadata()
                .unwrap()
                .file_type()
                .is_symlink());
        }
        // the consumed analyses were deleted
        assert!(!job_dir
            .join(fetch::analysis_file_name(times[0]))
            .exists());
    }

    #[test]
    fn clean_exit_without_marker_is_a_failure() {
        let root = tempdir().unwrap();
        let config = test_config(root.path());
        let job_dir = root.path().join("runs/2019070200");
        fs::create_dir_all(&job_dir).unwrap();

        let times = hourly_range(window().original_start, 36, 6);
        // ungrib exits cleanly but never prints the marker
        fake_tools(&config, &times, "#!/bin/sh\nexit 0\n");
        for time in &times {
            fs::write(job_dir.join(fetch::analysis_file_name(*time)), b"grib").unwrap();
        }

        let mut wps = Namelist::parse(
            "&share\n max_dom = 1,\n/\n&ungrib\n prefix = 'ERA',\n/\n&metgrid\n fg_name = 'ERA',\n/\n",
        )
        .unwrap();
        let err = ensure_met_fields(&config, &mut wps, &window(), &job_dir, 1, 36).unwrap_err();

        assert!(matches!(
            err,
            StagingError::SuccessMarkerMissing {
                tool: "ungrib.exe"
            }
        ));
    }

    #[test]
    fn upper_archive_selection_covers_both_window_ends() {
        let files = vec![
            PathBuf::from("/era/ERA_pl_20190601_20190610.grib"),
            PathBuf::from("/era/ERA_pl_20190611_20190620.grib"),
            PathBuf::from("/era/ERA_pl_20190621_20190630.grib"),
            PathBuf::from("/era/ERA_pl_20190701_20190710.grib"),
        ];

        let range = select_covering_range(
            &files,
            NaiveDate::from_ymd_opt(2019, 6, 15).unwrap(),
            NaiveDate::from_ymd_opt(2019, 7, 2).unwrap(),
        )
        .unwrap();
        assert_eq!(range, (1, 3));
    }

    #[test]
    fn uncovered_window_is_an_error() {
        let files = vec![PathBuf::from("/era/ERA_pl_20190601_20190610.grib")];

        let result = select_covering_range(
            &files,
            NaiveDate::from_ymd_opt(2019, 7, 1).unwrap(),
            NaiveDate::from_ymd_opt(2019, 7, 2).unwrap(),
        );
        assert!(matches!(
            result,
            Err(StagingError::AnalysisNotCovered(_))
        ));
    }

    #[test]
    fn archive_names_without_dates_are_skipped() {
        assert!(embedded_date_range(Path::new("/era/README")).is_none());
        assert_eq!(
            embedded_date_range(Path::new("/era/ERA_pl_20190601_20190610.grib")),
            Some((
                NaiveDate::from_ymd_opt(2019, 6, 1).unwrap(),
                NaiveDate::from_ymd_opt(2019, 6, 10).unwrap()
            ))
        );
    }
}
