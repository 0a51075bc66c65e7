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

//! Module responsible for invoking the external preprocessing and
//! simulation executables.

use crate::errors::StagingError;
use log::{debug, warn};
use std::fs;
use std::path::Path;
use std::process::Command;

/// Runs an external command synchronously with `workdir` as its
/// working directory and returns the captured stdout and stderr.
///
/// When `log_prefix` is given both streams are also persisted verbatim
/// to `{log_prefix}.stdout` and `{log_prefix}.stderr` inside the
/// working directory.
///
/// A non-zero exit code is logged but deliberately not turned into an
/// error: the WPS and WRF executables signal success through marker
/// lines in their output and their exit codes are unreliable. Callers
/// check the marker with [`contains_marker`].
pub fn run_command(
    argv: &[&str],
    workdir: &Path,
    log_prefix: Option<&str>,
) -> Result<(String, String), std::io::Error> {
    debug!("Executing {:?} in {}", argv, workdir.display());

    let output = Command::new(argv[0])
        .args(&argv[1..])
        .current_dir(workdir)
        .output()?;

    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if let Some(prefix) = log_prefix {
        fs::write(workdir.join(format!("{}.stdout", prefix)), &stdout)?;
        fs::write(workdir.join(format!("{}.stderr", prefix)), &stderr)?;
    }

    if !output.status.success() {
        warn!("Command {:?} exited with {}", argv, output.status);
        warn!("stdout: {}", stdout);
        warn!("stderr: {}", stderr);
    }

    Ok((stdout, stderr))
}

/// Scans captured tool output for a literal success marker line.
pub fn contains_marker(text: &str, marker: &str) -> bool {
    text.lines().any(|line| line.contains(marker))
}

/// Checks that an external tool or auxiliary file configured by the
/// user exists before it is invoked or linked.
pub fn require_tool(what: &'static str, path: &Path) -> Result<(), StagingError> {
    if path.exists() {
        Ok(())
    } else {
        Err(StagingError::MissingTool {
            what,
            path: path.to_path_buf(),
        })
    }
}
