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

//! Module responsible for parsing and checking the configuration file.
//!
//! The configuration file uses [YAML](https://en.wikipedia.org/wiki/YAML)
//! and `serde` to enforce strong typing and automatic type checking.
//!
//! The structures and their fields in this module directly correspond to
//! the fields inside the configuration file so you can check this
//! documentation for more details how to set the config file.

use crate::errors::ConfigError;
use chrono::NaiveDateTime;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

/// Fields describing the simulated period and how it is split into
/// separate jobs.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Run {
    /// Name of the run, substituted into the generated control scripts.
    pub name: String,

    /// First usable timestamp of the simulation.
    pub start_date: NaiveDateTime,

    /// End of the simulated period. The last job may extend slightly
    /// past this timestamp when the period length is not an exact
    /// multiple of the per-job length.
    pub end_date: NaiveDateTime,

    /// Usable length (in hours) of a single job.
    ///
    /// Cannot be smaller than `1`.
    pub hours_per_job: i64,

    /// Spin-up lead (in hours) prepended to every job so that the model
    /// has time to stabilise before the usable period starts.
    ///
    /// Cannot be negative.
    pub hours_spin_up: i64,

    /// Whether WRF starts from a restart file.
    pub restart: bool,

    /// Whether the generated main script chains all jobs into a single
    /// scheduler submission.
    pub run_as_one_job: bool,

    /// _(Optional)_ When set, only the namelists and control scripts are
    /// rewritten; no input data is staged and the initialization program
    /// is not run. Defaults to `false`.
    #[serde(default)]
    pub only_edit_namelists: bool,

    /// Root directory under which the per-job working directories are
    /// created.
    pub run_dir: PathBuf,
}

impl Run {
    /// Checks if the run specification follows conventions and limits.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.end_date <= self.start_date {
            return Err(ConfigError::OutOfBounds(
                "End date must be later than the start date",
            ));
        }

        if self.hours_per_job < 1 {
            return Err(ConfigError::OutOfBounds(
                "Job length cannot be shorter than 1 hour",
            ));
        }

        if self.hours_spin_up < 0 {
            return Err(ConfigError::OutOfBounds("Spin-up lead cannot be negative"));
        }

        Ok(())
    }
}

/// Paths of the two namelist documents kept consistent by the
/// preparation run.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Namelists {
    /// WPS-side namelist (`namelist.wps` template).
    pub wps: PathBuf,

    /// WRF-side namelist (`namelist.input` template).
    pub wrf: PathBuf,
}

/// Script templates from which the control scripts are generated.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Templates {
    /// Template of the top-level coordination script.
    pub main: PathBuf,

    /// Template of the per-job run script.
    pub run: PathBuf,

    /// Template of the per-job cleanup script.
    pub cleanup: PathBuf,
}

/// Fields describing the static geography inputs and the tool that
/// produces them.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Geography {
    /// Shared cache directory holding the `geo_em.dNN.nc` tiles.
    pub geo_em_dir: PathBuf,

    /// Root of the static geographical dataset read by geogrid.
    pub geog_data_path: PathBuf,

    /// `GEOGRID.TBL` used for the run.
    pub geogrid_tbl: PathBuf,

    /// The `geogrid.exe` executable.
    pub geogrid_exe: PathBuf,
}

/// Source of the meteorological analysis fields.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum AnalysisSource {
    /// ERA-Interim reanalysis mirrored as local archive files.
    Erai,

    /// NCEP GDAS/FNL 0.25 degree analyses fetched over HTTP.
    Fnl,
}

/// _(Optional)_ Longitude and latitude ranges passed to wgrib2 when the
/// downloaded analysis files are spatially subset before ungrib.
#[derive(Copy, Clone, PartialEq, Debug, Deserialize)]
pub struct RegionalSubset {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl RegionalSubset {
    /// Checks if the subset window is a valid geographic box.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.lon_min >= self.lon_max {
            return Err(ConfigError::OutOfBounds(
                "Subset longitude range is empty or inverted",
            ));
        }

        if self.lat_min >= self.lat_max {
            return Err(ConfigError::OutOfBounds(
                "Subset latitude range is empty or inverted",
            ));
        }

        if !(-90.0..=90.0).contains(&self.lat_min) || !(-90.0..=90.0).contains(&self.lat_max) {
            return Err(ConfigError::OutOfBounds(
                "Subset latitude is too low or too high",
            ));
        }

        Ok(())
    }

    /// Longitude range in the `min:max` form wgrib2 expects.
    pub fn lon_range(&self) -> String {
        format!("{}:{}", self.lon_min, self.lon_max)
    }

    /// Latitude range in the `min:max` form wgrib2 expects.
    pub fn lat_range(&self) -> String {
        format!("{}:{}", self.lat_min, self.lat_max)
    }
}

/// Fields describing the meteorological analysis inputs and the shared
/// met_em cache.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Analysis {
    /// Which analysis product drives the run.
    pub source: AnalysisSource,

    /// Shared cache directory holding the interpolated met_em files.
    pub metem_dir: PathBuf,

    /// _(Optional)_ Delete the met_em files from the cache once the
    /// initialization program consumed them. Defaults to `false`.
    #[serde(default)]
    pub delete_metem_files: bool,

    /// strftime pattern (with glob wildcards) locating the surface
    /// analysis archive files. Only used with the ERAI source.
    #[serde(default)]
    pub pattern_surface: String,

    /// strftime pattern (with glob wildcards) locating the upper-air
    /// analysis archive files. Only used with the ERAI source.
    #[serde(default)]
    pub pattern_upper: String,

    /// Vtable describing the analysis grib records for ungrib.
    pub vtable: PathBuf,

    /// _(Optional)_ Regional subset window cut out of the analysis
    /// files with wgrib2 before ungrib runs. Only used with the FNL
    /// source.
    pub subset: Option<RegionalSubset>,
}

/// _(Optional)_ Fields enabling the high-resolution SST staging path.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Sst {
    /// Directory of the monthly SST climatology files.
    pub monthly_dir: PathBuf,

    /// strftime pattern of the monthly file names.
    pub monthly_pattern: String,

    /// Directory of the daily SST analysis files.
    pub daily_dir: PathBuf,

    /// strftime pattern of the daily file names.
    pub daily_pattern: String,

    /// Vtable describing the SST grib records for ungrib.
    pub vtable: PathBuf,
}

/// Locations of the external WPS and WRF executables.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Tools {
    /// The `link_grib.csh` staging script shipped with WPS.
    pub link_grib_script: PathBuf,

    /// The `ungrib.exe` executable.
    pub ungrib_exe: PathBuf,

    /// The `metgrid.exe` executable.
    pub metgrid_exe: PathBuf,

    /// `METGRID.TBL` used for the run.
    pub metgrid_tbl: PathBuf,

    /// The `real.exe` initialization executable.
    pub real_exe: PathBuf,

    /// The `wrf.exe` simulation executable.
    pub wrf_exe: PathBuf,

    /// _(Optional)_ MPI launcher wrapping `real.exe`. Defaults to
    /// `mpirun`.
    #[serde(default = "Tools::default_mpi_command")]
    pub mpi_command: String,
}

impl Tools {
    fn default_mpi_command() -> String {
        "mpirun".to_string()
    }
}

/// Run-time lookup files linked from the WRF installation into every
/// job directory.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct WrfFiles {
    /// The `run/` directory of the WRF installation.
    pub run_dir: PathBuf,

    /// Pattern of the lookup tables linked from [`WrfFiles::run_dir`].
    pub tables_pattern: String,

    /// _(Optional)_ Helper scripts symlinked by basename into every job
    /// directory.
    #[serde(default)]
    pub link_scripts: Vec<PathBuf>,
}

/// _(Optional)_ Explicit level counts written into the WRF namelist.
///
/// When absent the per-source defaults are used (ERAI: 38 metgrid and 4
/// soil levels, FNL: 27 and 4). An explicit override stands in for
/// inspecting a produced met_em file.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Deserialize)]
pub struct Levels {
    /// Number of metgrid (atmospheric) levels in the analysis.
    pub metgrid: i64,

    /// Number of soil layers in the analysis.
    pub soil: i64,
}

/// _(Optional)_ Fields describing the FNL analysis download.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Download {
    /// _(Optional)_ Base URL of the ds083.3 archive mirror.
    #[serde(default = "Download::default_base_url")]
    pub base_url: String,

    /// _(Optional)_ Worker count of the download pool.
    ///
    /// Cannot be less than `1`. Defaults to `8`.
    #[serde(default = "Download::default_workers")]
    pub workers: usize,
}

impl Download {
    fn default_base_url() -> String {
        crate::setup::fetch::DEFAULT_DATASET_URL.to_string()
    }

    fn default_workers() -> usize {
        8
    }

    /// Checks if the worker count is above the limit.
    pub fn check_bounds(&self) -> Result<(), ConfigError> {
        if self.workers < 1 {
            return Err(ConfigError::OutOfBounds(
                "Download workers cannot be less than 1",
            ));
        }

        Ok(())
    }
}

impl Default for Download {
    fn default() -> Self {
        Download {
            base_url: Download::default_base_url(),
            workers: Download::default_workers(),
        }
    }
}

/// Main config structure representing the fields in the configuration
/// file.
#[derive(Clone, PartialEq, Debug, Deserialize)]
pub struct Config {
    pub run: Run,

    pub namelists: Namelists,

    pub templates: Templates,

    pub geography: Geography,

    pub analysis: Analysis,

    pub sst: Option<Sst>,

    pub tools: Tools,

    pub wrf_files: WrfFiles,

    pub levels: Option<Levels>,

    #[serde(default)]
    pub download: Download,
}

impl Config {
    /// Config structure constructor, responsible for deserializing the
    /// configuration and checking it.
    ///
    /// Files the whole run depends on (namelists and script templates)
    /// are required to exist here so that a bad path aborts the run
    /// before any job is touched.
    pub fn new_from_file(file_path: &Path) -> Result<Config, ConfigError> {
        let data = fs::read(file_path)?;
        let config: Config = serde_yaml::from_slice(data.as_slice())?;

        config.run.check_bounds()?;
        config.download.check_bounds()?;
        if let Some(subset) = &config.analysis.subset {
            subset.check_bounds()?;
        }

        for (what, path) in [
            ("WPS namelist", &config.namelists.wps),
            ("WRF namelist", &config.namelists.wrf),
            ("main script template", &config.templates.main),
            ("run script template", &config.templates.run),
            ("cleanup script template", &config.templates.cleanup),
        ] {
            if !path.exists() {
                return Err(ConfigError::MissingFile {
                    what,
                    path: path.clone(),
                });
            }
        }

        Ok(config)
    }
}
