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

//! Module containing constants used by the preparation steps.

/// Marker printed by `ungrib.exe` when the extraction succeeded.
///
/// The exit code of the WPS tools is unreliable, the presence of this
/// line in the captured output is the only authoritative success signal.
pub const UNGRIB_SUCCESS: &str = "Successful completion of ungrib";

/// Marker printed by `metgrid.exe` when the interpolation succeeded.
pub const METGRID_SUCCESS: &str = "Successful completion of metgrid";

/// Marker written by `real.exe` into its log file on success.
pub const REAL_SUCCESS: &str = "SUCCESS COMPLETE REAL_EM INIT";

/// Log file of the MPI rank 0 of `real.exe`. The success marker is
/// searched here, not in the captured stdout.
pub const REAL_LOG_FILE: &str = "rsl.out.0000";

/// Timestamp format embedded in met_em file names and in the WPS
/// namelist date entries.
pub const METEM_TIME_FORMAT: &str = "%Y-%m-%d_%H:%M:%S";

/// Format of the per-job working directory names under the run root.
pub const JOB_DIR_FORMAT: &str = "%Y%m%d%H";

/// Spacing of the analysis fields consumed by ungrib and metgrid.
pub const ANALYSIS_INTERVAL_HOURS: i64 = 6;
