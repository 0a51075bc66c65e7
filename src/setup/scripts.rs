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

//! Module responsible for generating the control scripts from
//! templates.
//!
//! Templates contain `${KEY}` placeholders which are replaced by plain
//! text substitution. A placeholder with no mapping is left verbatim
//! so scheduler variables like `${PBS_JOBID}` survive rendering.

use std::fs;
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

/// Reads a script template as lines.
pub fn read_template(path: &Path) -> io::Result<Vec<String>> {
    Ok(fs::read_to_string(path)?
        .lines()
        .map(str::to_string)
        .collect())
}

/// Renders template lines by substituting every `${KEY}` placeholder
/// that has a mapping.
pub fn render(template: &[String], substitutions: &[(&str, String)]) -> Vec<String> {
    template
        .iter()
        .map(|line| {
            let mut rendered = line.clone();
            for (key, value) in substitutions {
                rendered = rendered.replace(&format!("${{{}}}", key), value);
            }
            rendered
        })
        .collect()
}

/// Writes rendered script lines to `path` and marks the file
/// executable for its owner.
pub fn write_executable(path: &Path, lines: &[String]) -> io::Result<()> {
    let mut content = lines.join("\n");
    content.push('\n');
    fs::write(path, content)?;

    let mut permissions = fs::metadata(path)?.permissions();
    permissions.set_mode(permissions.mode() | 0o100);
    fs::set_permissions(path, permissions)?;

    Ok(())
}
