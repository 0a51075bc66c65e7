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

//! Small filesystem helpers shared by the staging steps.

use crate::errors::StagingError;
use crate::setup::process::run_command;
use log::{debug, info};
use regex::Regex;
use std::fs;
use std::os::unix::fs as unixfs;
use std::path::Path;

/// Deletes every file in `directory` whose name matches `pattern`.
pub fn purge(directory: &Path, pattern: &str) -> Result<(), StagingError> {
    let matcher = Regex::new(pattern)?;

    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        let name = entry.file_name();
        if matcher.is_match(&name.to_string_lossy()) {
            debug!("Deleting {}", entry.path().display());
            fs::remove_file(entry.path())?;
        }
    }

    Ok(())
}

/// Symlinks every file in `source_dir` whose name matches `pattern`
/// into `dest_dir`, skipping names already present there.
pub fn link_pattern_to_dir(
    source_dir: &Path,
    pattern: &str,
    dest_dir: &Path,
) -> Result<(), StagingError> {
    let matcher = Regex::new(pattern)?;

    for entry in fs::read_dir(source_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if matcher.is_match(&name.to_string_lossy()) {
            symlink_if_missing(&entry.path(), &dest_dir.join(&name))?;
        }
    }

    Ok(())
}

/// Moves every file in `source_dir` whose name matches `pattern` into
/// `dest_dir`.
pub fn move_pattern_to_dir(
    source_dir: &Path,
    pattern: &str,
    dest_dir: &Path,
) -> Result<(), StagingError> {
    let matcher = Regex::new(pattern)?;

    for entry in fs::read_dir(source_dir)? {
        let entry = entry?;
        let name = entry.file_name();
        if matcher.is_match(&name.to_string_lossy()) {
            fs::rename(entry.path(), dest_dir.join(&name))?;
        }
    }

    Ok(())
}

/// Creates a symlink at `dest` pointing to `source` unless `dest`
/// already exists.
pub fn symlink_if_missing(source: &Path, dest: &Path) -> Result<(), StagingError> {
    if !dest.exists() {
        unixfs::symlink(source, dest)?;
    }
    Ok(())
}

/// Replaces whatever is at `dest` with a symlink pointing to `source`.
pub fn symlink_replacing(source: &Path, dest: &Path) -> Result<(), StagingError> {
    if dest.exists() || dest.symlink_metadata().is_ok() {
        fs::remove_file(dest)?;
    }
    unixfs::symlink(source, dest)?;
    Ok(())
}

/// Counts the directory entries whose name matches `pattern`.
pub fn count_matching(directory: &Path, pattern: &str) -> Result<usize, StagingError> {
    let matcher = Regex::new(pattern)?;

    let mut count = 0;
    for entry in fs::read_dir(directory)? {
        let entry = entry?;
        if matcher.is_match(&entry.file_name().to_string_lossy()) {
            count += 1;
        }
    }

    Ok(count)
}

/// Recompresses a netCDF file in place with `ncks`.
///
/// ncks is silent on success, any output on either stream means the
/// compression failed.
pub fn compress_nc_file(filename: &str, workdir: &Path) -> Result<(), StagingError> {
    if !workdir.join(filename).exists() {
        info!("File {} not found, skipping compression", filename);
        return Ok(());
    }

    info!("Compress file {} with ncks", filename);
    let (stdout, stderr) = run_command(&["ncks", "-4", "-L4", "-O", filename, filename], workdir, None)?;

    if !stdout.is_empty() || !stderr.is_empty() {
        return Err(StagingError::ToolFailed {
            tool: "ncks",
            output: format!("{}{}", stdout, stderr),
        });
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn touch(path: &Path) {
        fs::write(path, b"").unwrap();
    }

    #[test]
    fn purge_removes_only_matching_files() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("GRIBFILE.AAA"));
        touch(&dir.path().join("GRIBFILE.AAB"));
        touch(&dir.path().join("namelist.wps"));

        purge(dir.path(), "^GRIBFILE").unwrap();

        assert!(!dir.path().join("GRIBFILE.AAA").exists());
        assert!(!dir.path().join("GRIBFILE.AAB").exists());
        assert!(dir.path().join("namelist.wps").exists());
    }

    #[test]
    fn link_pattern_skips_existing_destinations() {
        let source = tempdir().unwrap();
        let dest = tempdir().unwrap();
        touch(&source.path().join("LANDUSE.TBL"));
        touch(&source.path().join("RRTM_DATA"));
        touch(&dest.path().join("RRTM_DATA"));

        link_pattern_to_dir(source.path(), "TBL|DATA", dest.path()).unwrap();

        assert!(dest.path().join("LANDUSE.TBL").symlink_metadata().is_ok());
        // the pre-existing regular file is left alone
        assert!(!dest
            .path()
            .join("RRTM_DATA")
            .symlink_metadata()
            .unwrap()
            .file_type()
            .is_symlink());
    }

    #[test]
    fn move_pattern_relocates_files() {
        let source = tempdir().unwrap();
        let dest = tempdir().unwrap();
        touch(&source.path().join("met_em.d01.2019-07-01_00:00:00.nc"));
        touch(&source.path().join("namelist.wps"));

        move_pattern_to_dir(source.path(), "^met_em", dest.path()).unwrap();

        assert!(!source
            .path()
            .join("met_em.d01.2019-07-01_00:00:00.nc")
            .exists());
        assert!(dest
            .path()
            .join("met_em.d01.2019-07-01_00:00:00.nc")
            .exists());
        assert!(source.path().join("namelist.wps").exists());
    }

    #[test]
    fn symlink_if_missing_is_idempotent() {
        let dir = tempdir().unwrap();
        let target = dir.path().join("target");
        let link = dir.path().join("link");
        touch(&target);

        symlink_if_missing(&target, &link).unwrap();
        symlink_if_missing(&target, &link).unwrap();

        assert!(link.symlink_metadata().unwrap().file_type().is_symlink());
    }

    #[test]
    fn symlink_replacing_overwrites() {
        let dir = tempdir().unwrap();
        let old = dir.path().join("old");
        let new = dir.path().join("new");
        let link = dir.path().join("Vtable");
        touch(&old);
        touch(&new);

        symlink_replacing(&old, &link).unwrap();
        symlink_replacing(&new, &link).unwrap();

        assert_eq!(fs::read_link(&link).unwrap(), new);
    }

    #[test]
    fn count_matching_counts() {
        let dir = tempdir().unwrap();
        touch(&dir.path().join("GRIBFILE.AAA"));
        touch(&dir.path().join("GRIBFILE.AAB"));
        touch(&dir.path().join("Vtable"));

        assert_eq!(count_matching(dir.path(), "^GRIBFILE").unwrap(), 2);
        assert_eq!(count_matching(dir.path(), "^met_em").unwrap(), 0);
    }
}
