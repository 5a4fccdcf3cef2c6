//! Snow season dates and observation counts from daily stacks

use crate::types::{MaskStack, OccurrenceImage};
use ndarray::{ArrayView1, Axis, Zip};

/// Snow onset (SOD) and melt-out (SMOD) day indices per pixel
#[derive(Debug, Clone)]
pub struct SnowSeason {
    /// First day of the longest snow period
    pub onset: OccurrenceImage,
    /// Last day of the longest snow period
    pub melt_out: OccurrenceImage,
}

/// Day indices bounding the longest run of snow days of each pixel.
///
/// Only pixels with more than `min_snow_days` snow days get dates, the others
/// stay at 0. Among runs of equal length the earliest wins.
pub fn snow_season(daily: &MaskStack, min_snow_days: usize) -> SnowSeason {
    let (_, rows, cols) = daily.dim();
    let mut onset = OccurrenceImage::zeros((rows, cols));
    let mut melt_out = OccurrenceImage::zeros((rows, cols));

    Zip::from(daily.lanes(Axis(0)))
        .and(&mut onset)
        .and(&mut melt_out)
        .par_for_each(|series, sod, smod| {
            let snow_days = series.iter().filter(|&&v| v != 0).count();
            if snow_days <= min_snow_days {
                return;
            }
            if let Some((start, end)) = longest_run(series) {
                *sod = start.min(u16::MAX as usize) as u16;
                *smod = end.min(u16::MAX as usize) as u16;
            }
        });

    log::info!("Snow season dates computed for {}x{} pixels", rows, cols);
    SnowSeason { onset, melt_out }
}

/// Inclusive bounds of the first longest run of non-zero values
fn longest_run(series: ArrayView1<u8>) -> Option<(usize, usize)> {
    let mut best: Option<(usize, usize)> = None;
    let mut start = None;
    for (i, &v) in series.iter().enumerate() {
        match (v != 0, start) {
            (true, None) => start = Some(i),
            (false, Some(s)) => {
                best = longer(best, (s, i - 1));
                start = None;
            }
            _ => {}
        }
    }
    if let Some(s) = start {
        best = longer(best, (s, series.len() - 1));
    }
    best
}

fn longer(best: Option<(usize, usize)>, run: (usize, usize)) -> Option<(usize, usize)> {
    match best {
        Some((s, e)) if e - s >= run.1 - run.0 => Some((s, e)),
        _ => Some(run),
    }
}

/// Number of usable observations per pixel (NOBS)
pub fn observation_count(unusable: &MaskStack) -> OccurrenceImage {
    let n = unusable.len_of(Axis(0));
    unusable.map_axis(Axis(0), |series| {
        let cloudy = series.iter().filter(|&&v| v != 0).count();
        (n - cloudy).min(u16::MAX as usize) as u16
    })
}
