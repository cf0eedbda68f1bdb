//! GOES ABI training-file scheduling: channel selection, time rounding and
//! output naming, and the list of time steps still missing on disk.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Datelike, Duration, NaiveDate, TimeZone, Timelike, Utc};

use crate::error::{SceneError, SceneResult};

/// ABI bands matched to SEVIRI channels.
pub const GOES_CHANNELS: [u8; 11] = [
    2,  // 0.635 um
    3,  // 0.81 um
    5,  // 1.64 um
    7,  // 3.92 um
    8,  // 6.25 um
    10, // 7.35 um
    11, // 8.7 um
    12, // 9.66 um
    13, // 10.3 um
    15, // 12 um
    16, // 13.4 um
];

/// The first three channels are reflectances, the rest brightness temperatures.
pub const N_REFLECTIVE: usize = 3;

/// Name of the training-data sub-folder holding GOES files.
pub const SUBFOLDER: &str = "goes";

/// Time resolution of the GOES training files.
pub fn default_step() -> Duration {
    Duration::minutes(15)
}

/// Reader names of the selected channels, e.g. `C02`.
pub fn channel_names() -> Vec<String> {
    GOES_CHANNELS.iter().map(|c| format!("C{c:02}")).collect()
}

/// `(reflective, thermal)` channel numbers.
pub fn split_channels() -> (&'static [u8], &'static [u8]) {
    GOES_CHANNELS.split_at(N_REFLECTIVE)
}

/// Round `time` to the nearest multiple of `step` since the epoch; halves round up.
pub fn round_time(time: DateTime<Utc>, step: Duration) -> SceneResult<DateTime<Utc>> {
    let step_s = step.num_seconds();
    if step_s <= 0 {
        return Err(SceneError::configuration(format!(
            "time step must be at least one second, got {step}"
        )));
    }
    let ts = time.timestamp();
    let rounded = (ts + step_s / 2).div_euclid(step_s) * step_s;
    Utc.timestamp_opt(rounded, 0)
        .single()
        .ok_or_else(|| SceneError::invalid_input(format!("time {time} cannot be rounded")))
}

/// `goes_YYYYMMDD_HH_MM.nc` for `time` rounded to 15 minutes.
pub fn output_filename(time: DateTime<Utc>) -> SceneResult<String> {
    let t = round_time(time, default_step())?;
    Ok(format!(
        "goes_{:04}{:02}{:02}_{:02}_{:02}.nc",
        t.year(),
        t.month(),
        t.day(),
        t.hour(),
        t.minute()
    ))
}

/// `root/goes`.
pub fn output_folder(root: &Path) -> PathBuf {
    root.join(SUBFOLDER)
}

/// Time steps of `date`, from 00:00 up to but excluding 23:59.
pub fn daily_schedule(date: NaiveDate, step: Duration) -> SceneResult<Vec<DateTime<Utc>>> {
    if step.num_seconds() <= 0 {
        return Err(SceneError::configuration(format!(
            "time step must be at least one second, got {step}"
        )));
    }
    let midnight = date
        .and_hms_opt(0, 0, 0)
        .ok_or_else(|| SceneError::invalid_input(format!("invalid date {date}")))?;
    let start = Utc.from_utc_datetime(&midnight);
    let end = start + Duration::hours(23) + Duration::minutes(59);

    let mut times = Vec::new();
    let mut time = start;
    while time < end {
        times.push(time);
        time += step;
    }
    Ok(times)
}

/// Scheduled times of `date` whose output file does not exist in `folder`.
pub fn missing_times(folder: &Path, date: NaiveDate, step: Duration) -> SceneResult<Vec<DateTime<Utc>>> {
    let mut missing = Vec::new();
    for time in daily_schedule(date, step)? {
        if !folder.join(output_filename(time)?).exists() {
            missing.push(time);
        }
    }
    Ok(missing)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap()
    }

    #[test]
    fn channel_split() {
        let (refl, therm) = split_channels();
        assert_eq!(refl, &[2, 3, 5]);
        assert_eq!(therm.len(), 8);
        assert_eq!(channel_names()[0], "C02");
        assert_eq!(channel_names()[10], "C16");
    }

    #[test]
    fn rounds_to_nearest_quarter_hour() {
        let step = default_step();
        assert_eq!(round_time(utc(2020, 5, 1, 10, 7, 29), step).unwrap(), utc(2020, 5, 1, 10, 0, 0));
        assert_eq!(round_time(utc(2020, 5, 1, 10, 7, 30), step).unwrap(), utc(2020, 5, 1, 10, 15, 0));
        assert_eq!(round_time(utc(2020, 12, 31, 23, 53, 0), step).unwrap(), utc(2021, 1, 1, 0, 0, 0));
        assert!(round_time(utc(2020, 1, 1, 0, 0, 0), Duration::zero()).is_err());
    }

    #[test]
    fn filename_uses_rounded_time() {
        let name = output_filename(utc(2020, 1, 2, 3, 44, 0)).unwrap();
        assert_eq!(name, "goes_20200102_03_45.nc");
    }

    #[test]
    fn schedule_covers_day() {
        let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let times = daily_schedule(date, default_step()).unwrap();
        assert_eq!(times.len(), 96);
        assert_eq!(times[0], utc(2020, 1, 2, 0, 0, 0));
        assert_eq!(times[95], utc(2020, 1, 2, 23, 45, 0));
    }

    #[test]
    fn missing_times_skip_existing_files() {
        let root = std::env::temp_dir().join(format!("rainpatch_goes_{}", std::process::id()));
        let folder = output_folder(&root);
        fs::create_dir_all(&folder).unwrap();
        fs::write(folder.join("goes_20200102_00_15.nc"), b"").unwrap();

        let date = NaiveDate::from_ymd_opt(2020, 1, 2).unwrap();
        let missing = missing_times(&folder, date, default_step()).unwrap();
        let _ = fs::remove_dir_all(&root);

        assert_eq!(missing.len(), 95);
        assert!(!missing.contains(&utc(2020, 1, 2, 0, 15, 0)));
    }
}
