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

//! Module responsible for fetching NCEP GDAS/FNL 0.25 degree analyses
//! (dataset ds083.3, DOI 10.5065/D65Q4T4Z) from the NCAR GDEX archive.
//!
//! The batch is all-or-nothing: the files are fetched on a bounded
//! worker pool, each with its own retry budget, and a single file that
//! still fails afterwards fails the whole batch. No RDA credentials
//! are required, the raw grib files are publicly served.

use crate::errors::DownloadError;
use chrono::{NaiveDate, NaiveDateTime, Timelike};
use indicatif::{ProgressBar, ProgressStyle};
use log::{info, warn};
use rayon::ThreadPoolBuilder;
use reqwest::blocking::Client;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::mpsc;
use std::thread;
use std::time::Duration;

/// Default base URL of the OSDF mirror of ds083.3. A THREDDS mirror at
/// `https://tds.gdex.ucar.edu/thredds/fileServer/files/g/d083003/` can
/// be configured as a fallback.
pub const DEFAULT_DATASET_URL: &str = "https://osdf-director.osg-htc.org/ncar/gdex/d083003/";

/// Attempts made per file before the batch is failed.
const MAX_ATTEMPTS: u32 = 5;

/// Delay before the first retry, doubled after every further failure.
const INITIAL_RETRY_DELAY: Duration = Duration::from_secs(2);

/// Name of the archive file holding the analysis for `time`.
pub fn analysis_file_name(time: NaiveDateTime) -> String {
    time.format("gdas1.fnl0p25.%Y%m%d%H.f00.grib2").to_string()
}

/// Path of the analysis for `time` relative to the archive root.
fn relative_path(time: NaiveDateTime) -> String {
    time.format("%Y/%Y%m/gdas1.fnl0p25.%Y%m%d%H.f00.grib2")
        .to_string()
}

/// First analysis available in the 0.25 degree archive.
fn archive_start() -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2015, 7, 8)
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .expect("2015-07-08 00:00:00 is a valid timestamp")
}

fn validate_analysis_time(time: NaiveDateTime) -> Result<(), DownloadError> {
    if time.hour() % 6 != 0 || time.minute() != 0 || time.second() != 0 {
        return Err(DownloadError::UnalignedTime(time));
    }
    if time <= archive_start() {
        return Err(DownloadError::BeforeArchiveStart(time));
    }
    Ok(())
}

/// Downloads the analyses for all requested timestamps into
/// `target_dir` and returns the downloaded paths in name order.
///
/// The batch blocks until every file finished or failed. Any failure
/// is surfaced as a single error for the whole batch; files that did
/// download are left in place, partial files are deleted.
pub fn download_analysis_batch(
    target_dir: &Path,
    times: &[NaiveDateTime],
    base_url: &str,
    workers: usize,
) -> Result<Vec<PathBuf>, DownloadError> {
    info!("Downloading {} FNL analysis files", times.len());

    for time in times {
        validate_analysis_time(*time)?;
    }

    if !target_dir.is_dir() {
        return Err(DownloadError::BadTargetDir(target_dir.to_path_buf()));
    }

    let client = Client::builder()
        .timeout(Duration::from_secs(600))
        .connect_timeout(Duration::from_secs(30))
        .build()
        .map_err(DownloadError::Client)?;

    let pool = ThreadPoolBuilder::new().num_threads(workers).build()?;

    // set progress bar for the fetched files
    let files_bar = ProgressBar::new(times.len() as u64);
    files_bar.set_style(
        ProgressStyle::default_bar()
            .template("{prefix} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {pos}/{len} {msg}")
            .progress_chars("#>-"),
    );
    files_bar.set_prefix("Downloaded analyses");

    // deploy the downloads on to the threadpool
    let (tx, rx) = mpsc::channel();

    for time in times {
        let tx = tx.clone();
        let client = client.clone();
        let target = target_dir.to_path_buf();
        let url = format!("{}{}", base_url, relative_path(*time));

        pool.spawn(move || {
            tx.send(download_file(&client, &target, &url)).unwrap();
        });
    }
    drop(tx);

    let mut files = Vec::with_capacity(times.len());
    let mut first_error = None;

    for result in rx.iter().take(times.len()) {
        match result {
            Ok(path) => files.push(path),
            Err(err) => {
                if first_error.is_none() {
                    first_error = Some(err);
                }
            }
        }
        files_bar.inc(1);
    }

    files_bar.finish_with_message("All downloads finished");

    if let Some(err) = first_error {
        return Err(err);
    }

    files.sort();
    Ok(files)
}

/// Downloads a single file with a retry budget and exponential
/// backoff.
fn download_file(client: &Client, target_dir: &Path, url: &str) -> Result<PathBuf, DownloadError> {
    let filename = url.rsplit('/').next().unwrap_or(url);
    let path = target_dir.join(filename);

    let mut delay = INITIAL_RETRY_DELAY;

    for attempt in 1..=MAX_ATTEMPTS {
        match try_download(client, url, &path) {
            Ok(()) => return Ok(path),
            Err(reason) => {
                // a partial file must not be mistaken for a complete one
                let _ = fs::remove_file(&path);

                if attempt == MAX_ATTEMPTS {
                    return Err(DownloadError::Failed {
                        url: url.to_string(),
                        reason,
                    });
                }

                warn!(
                    "Downloading {} failed ({}), retrying in {} s",
                    url,
                    reason,
                    delay.as_secs()
                );
                thread::sleep(delay);
                delay *= 2;
            }
        }
    }

    unreachable!("the retry loop either returns the path or the error")
}

fn try_download(client: &Client, url: &str, path: &Path) -> Result<(), String> {
    let mut response = client.get(url).send().map_err(|err| err.to_string())?;

    if !response.status().is_success() {
        return Err(format!("HTTP status {}", response.status()));
    }

    let mut file = fs::File::create(path).map_err(|err| err.to_string())?;
    response.copy_to(&mut file).map_err(|err| err.to_string())?;

    Ok(())
}
