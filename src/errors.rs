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

use chrono::NaiveDateTime;
use std::path::PathBuf;
use thiserror::Error;

/// Top-level error of the preparation run. Every error is fatal: the
/// run aborts on the first one and already completed jobs are left in
/// place.
#[derive(Error, Debug)]
pub enum SetupError {
    #[error("Error while reading configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Error in namelist handling: {0}")]
    Namelist(#[from] NamelistError),

    #[error("Error while staging input data: {0}")]
    Staging(#[from] StagingError),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Cannot open configuration file: {0}")]
    CantOpenFile(#[from] std::io::Error),

    #[error("Cannot deserialize configuration file: {0}")]
    CantDeserialize(#[from] serde_yaml::Error),

    #[error("Configuration component is out of bounds: {0}")]
    OutOfBounds(&'static str),

    #[error("Cannot find {what} at {path}")]
    MissingFile { what: &'static str, path: PathBuf },
}

#[derive(Error, Debug)]
pub enum NamelistError {
    #[error("Cannot read namelist file: {0}")]
    CantOpenFile(#[from] std::io::Error),

    #[error("Malformed namelist entry at line {line}: {text}")]
    Malformed { line: usize, text: String },

    #[error("Namelist group &{0} not found")]
    MissingGroup(String),

    #[error("Variable {variable} not found in namelist group &{group}")]
    MissingVariable { group: String, variable: String },

    #[error("Variable {variable} in namelist group &{group} has an unexpected type")]
    UnexpectedType { group: String, variable: String },

    #[error("Mismatched type for variable {0} between the WRF and WPS namelists")]
    KindMismatch(&'static str),

    #[error("Mismatched length for variable {0} between the WRF and WPS namelists")]
    LengthMismatch(&'static str),

    #[error(
        "Mismatched values for variable {parameter} between the WRF and WPS namelists: \
         WRF has {wrf}, WPS has {wps}"
    )]
    ValueMismatch {
        parameter: &'static str,
        wrf: String,
        wps: String,
    },
}

#[derive(Error, Debug)]
pub enum StagingError {
    #[error("Cannot find {what} at {path}")]
    MissingTool { what: &'static str, path: PathBuf },

    #[error("{tool} did not produce the expected output {expected}")]
    ToolProducedNoOutput { tool: &'static str, expected: String },

    #[error("No GRIBFILE links were created by the grib staging script")]
    NoGribLinked,

    #[error("Success message not found in the {tool} log")]
    SuccessMarkerMissing { tool: &'static str },

    #[error("{tool} reported errors: {output}")]
    ToolFailed { tool: &'static str, output: String },

    #[error("Expected cached file missing at {0}")]
    MissingCachedFile(PathBuf),

    #[error("No analysis archive file covers {0}")]
    AnalysisNotCovered(chrono::NaiveDate),

    #[error("Invalid file name pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("Invalid archive glob pattern: {0}")]
    Glob(#[from] glob::PatternError),

    #[error("Error while downloading analysis data: {0}")]
    Download(#[from] DownloadError),

    #[error("Error while editing namelist: {0}")]
    Namelist(#[from] NamelistError),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum DownloadError {
    #[error("Analysis time {0} is not staggered at 00Z, 06Z, 12Z or 18Z")]
    UnalignedTime(NaiveDateTime),

    #[error("Analysis time {0} is before the start of the FNL archive (2015-07-08)")]
    BeforeArchiveStart(NaiveDateTime),

    #[error("Download target {0} is not a directory")]
    BadTargetDir(PathBuf),

    #[error("Cannot create the HTTP client: {0}")]
    Client(reqwest::Error),

    #[error("Cannot create the download thread pool: {0}")]
    ThreadPool(#[from] rayon::ThreadPoolBuildError),

    #[error("Downloading {url} failed: {reason}")]
    Failed { url: String, reason: String },
}
