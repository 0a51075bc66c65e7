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

//! Module responsible for splitting the simulated period into
//! discrete job windows.

use chrono::{Duration, NaiveDateTime};

/// A single job window within the simulated period.
///
/// The model integrates from `original_start`, which is the usable
/// start moved back by the spin-up lead. Output before `usable_start`
/// is discarded by the cleanup scripts.
#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub struct JobWindow {
    /// Spin-up adjusted lower bound of the window.
    pub original_start: NaiveDateTime,

    /// First scientifically valid timestamp of the window.
    pub usable_start: NaiveDateTime,

    /// End of the window.
    pub end: NaiveDateTime,
}

/// Computes the ordered list of job windows covering the simulated
/// period.
///
/// The number of jobs is the run length divided by the per-job length,
/// rounded up. Every window spans the full per-job length, so when the
/// division is not even the final window extends past `end`. Downstream
/// steps rely on this and it must not be corrected here.
pub fn schedule(
    start: NaiveDateTime,
    end: NaiveDateTime,
    hours_per_job: i64,
    hours_spin_up: i64,
) -> Vec<JobWindow> {
    let run_length_hours = (end - start).num_seconds() as f64 / 3600.0;
    let job_count = (run_length_hours / hours_per_job as f64).ceil() as i64;

    (0..job_count)
        .map(|ind_job| {
            let usable_start = start + Duration::hours(ind_job * hours_per_job);

            JobWindow {
                original_start: usable_start - Duration::hours(hours_spin_up),
                usable_start,
                end: start + Duration::hours((ind_job + 1) * hours_per_job),
            }
        })
        .collect()
}

/// Returns the timestamps every `step` hours from `from` across
/// `total_hours` inclusive of both ends.
///
/// This is the sampling used for met_em files: one field every six
/// hours over the spin-up plus usable period.
pub fn hourly_range(from: NaiveDateTime, total_hours: i64, step: i64) -> Vec<NaiveDateTime> {
    (0..=total_hours)
        .step_by(step as usize)
        .map(|hour| from + Duration::hours(hour))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn dt(y: i32, m: u32, d: u32, h: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(y, m, d).unwrap().and_hms_opt(h, 0, 0).unwrap()
    }

    #[test]
    fn job_count_rounds_up() {
        // 120 hours split into 36-hour jobs needs four windows
        let windows = schedule(dt(2019, 7, 1, 0), dt(2019, 7, 6, 0), 36, 0);
        assert_eq!(windows.len(), 4);
    }

    #[test]
    fn windows_are_contiguous_without_overlap() {
        let windows = schedule(dt(2019, 7, 1, 0), dt(2019, 7, 11, 0), 24, 6);

        assert_eq!(windows.len(), 10);
        for pair in windows.windows(2) {
            assert_eq!(pair[0].end, pair[1].usable_start);
        }
        for window in &windows {
            assert_eq!(window.end - window.usable_start, Duration::hours(24));
        }
    }

    #[test]
    fn spin_up_offsets_the_original_start() {
        let windows = schedule(dt(2019, 7, 1, 0), dt(2019, 7, 3, 0), 24, 12);

        for window in &windows {
            assert_eq!(
                window.usable_start - window.original_start,
                Duration::hours(12)
            );
        }
        assert_eq!(windows[0].original_start, dt(2019, 6, 30, 12));
    }

    #[test]
    fn final_window_keeps_the_overshoot() {
        // 120 hours in 36-hour jobs: the last window ends 24 hours past
        // the requested end and stays that way
        let windows = schedule(dt(2019, 7, 1, 0), dt(2019, 7, 6, 0), 36, 0);
        assert_eq!(windows.last().unwrap().end, dt(2019, 7, 7, 0));
    }

    #[test]
    fn six_hourly_sampling_includes_both_ends() {
        let times = hourly_range(dt(2019, 7, 1, 0), 36, 6);
        assert_eq!(times.len(), 7);
        assert_eq!(times[0], dt(2019, 7, 1, 0));
        assert_eq!(*times.last().unwrap(), dt(2019, 7, 2, 12));
    }
}
