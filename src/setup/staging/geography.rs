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

//! Staging of the static geography tiles (geo_em files).
//!
//! The tiles depend only on the domain definition, not on the job
//! window, so they are produced once by geogrid and cached for the
//! whole run sequence.

use super::domain_tag;
use crate::errors::StagingError;
use crate::setup::configuration::Config;
use crate::setup::fsutil::{compress_nc_file, symlink_if_missing, symlink_replacing};
use crate::setup::namelist::{Namelist, Value};
use crate::setup::process::{require_tool, run_command};
use log::info;
use std::fs;
use std::path::Path;

/// Name of the geography tile of a domain.
pub fn geo_file(idom: usize) -> String {
    format!("geo_em.{}.nc", domain_tag(idom))
}

/// Makes sure the geography tiles of every domain exist in the shared
/// cache and are linked into the job directory.
///
/// When every tile is already cached no external tool runs; otherwise
/// geogrid is invoked once and its compressed outputs are moved into
/// the cache.
pub fn ensure_geo_files(
    config: &Config,
    wps: &mut Namelist,
    job_dir: &Path,
    ndom: usize,
) -> Result<(), StagingError> {
    info!("Check that the geo_em files exist");

    let cache = &config.geography.geo_em_dir;
    fs::create_dir_all(cache)?;

    let all_present = (0..ndom).all(|idom| cache.join(geo_file(idom)).exists());

    if all_present {
        info!("The geo_em files were indeed found");
    } else {
        info!("The geo_em files did not exist - create them");
        run_geogrid(config, wps, job_dir, ndom)?;
    }

    for idom in 0..ndom {
        let name = geo_file(idom);
        symlink_if_missing(&cache.join(&name), &job_dir.join(&name))?;
    }

    Ok(())
}

fn run_geogrid(
    config: &Config,
    wps: &mut Namelist,
    job_dir: &Path,
    ndom: usize,
) -> Result<(), StagingError> {
    wps.set(
        "geogrid",
        "geog_data_path",
        Value::text(config.geography.geog_data_path.display().to_string()),
    );
    wps.write_to(&job_dir.join("namelist.wps"))?;

    require_tool("GEOGRID.TBL", &config.geography.geogrid_tbl)?;
    fs::create_dir_all(job_dir.join("geogrid"))?;
    symlink_replacing(
        &config.geography.geogrid_tbl,
        &job_dir.join("geogrid").join("GEOGRID.TBL"),
    )?;

    require_tool("geogrid.exe", &config.geography.geogrid_exe)?;
    symlink_if_missing(&config.geography.geogrid_exe, &job_dir.join("geogrid.exe"))?;

    info!("Run geogrid");
    run_command(&["./geogrid.exe"], job_dir, Some("geogrid.log"))?;

    // the innermost tile is written last, its presence proves the run
    let last_tile = geo_file(ndom - 1);
    if !job_dir.join(&last_tile).exists() {
        return Err(StagingError::ToolProducedNoOutput {
            tool: "geogrid.exe",
            expected: last_tile,
        });
    }

    fs::rename(
        job_dir.join("namelist.wps"),
        job_dir.join("namelist.wps.geogrid"),
    )?;

    info!("Compress the geo_em files");
    for idom in 0..ndom {
        let name = geo_file(idom);
        compress_nc_file(&name, job_dir)?;
        fs::rename(job_dir.join(&name), config.geography.geo_em_dir.join(&name))?;
    }

    Ok(())
}
