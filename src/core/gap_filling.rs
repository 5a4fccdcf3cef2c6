//! Temporal gap filling of binary snow series
//!
//! Each pixel's snow series is interpolated linearly in time between its
//! usable observations and sampled on the output calendar. Dates before the
//! first or after the last usable observation take the nearest usable value.

use crate::types::{Mask, MaskStack, SnowError, SnowResult};
use chrono::NaiveDate;
use ndarray::{ArrayView1, ArrayViewMut1, Axis, Zip};

/// Gap-filled stack on the output calendar
#[derive(Debug, Clone)]
pub struct GapFilled {
    /// output date x rows x cols, 0 or 1
    pub stack: MaskStack,
    /// 1 for pixels without a single usable observation, filled with 0
    pub no_observation: Mask,
}

impl GapFilled {
    pub fn no_observation_count(&self) -> usize {
        self.no_observation.iter().filter(|&&v| v != 0).count()
    }
}

pub struct GapFiller {
    input_days: Vec<i64>,
    output_days: Vec<i64>,
}

impl GapFiller {
    pub fn new(input_dates: &[NaiveDate], output_dates: &[NaiveDate]) -> SnowResult<Self> {
        if input_dates.windows(2).any(|w| w[1] < w[0]) {
            return Err(SnowError::Processing("Input dates must be sorted".to_string()));
        }
        let origin = match input_dates.first().or(output_dates.first()) {
            Some(d) => *d,
            None => NaiveDate::MIN,
        };
        let days = |dates: &[NaiveDate]| -> Vec<i64> {
            dates.iter().map(|d| (*d - origin).num_days()).collect()
        };
        Ok(Self {
            input_days: days(input_dates),
            output_days: days(output_dates),
        })
    }

    /// Interpolate `snow` where `unusable` is set.
    ///
    /// Both stacks are indexed by input date along the first axis.
    pub fn fill(&self, snow: &MaskStack, unusable: &MaskStack) -> SnowResult<GapFilled> {
        if snow.dim() != unusable.dim() {
            return Err(SnowError::GridMismatch(format!(
                "Snow stack {:?} and unusable stack {:?} differ",
                snow.dim(),
                unusable.dim()
            )));
        }
        let (n_dates, rows, cols) = snow.dim();
        if n_dates != self.input_days.len() {
            return Err(SnowError::Processing(format!(
                "Stack holds {} dates but {} input dates were given",
                n_dates,
                self.input_days.len()
            )));
        }
        log::info!(
            "Gap filling {} input dates onto {} output dates ({}x{} pixels)",
            n_dates,
            self.output_days.len(),
            rows,
            cols
        );

        let mut stack = MaskStack::zeros((self.output_days.len(), rows, cols));
        let mut no_observation = Mask::zeros((rows, cols));
        Zip::from(snow.lanes(Axis(0)))
            .and(unusable.lanes(Axis(0)))
            .and(stack.lanes_mut(Axis(0)))
            .and(&mut no_observation)
            .par_for_each(|s, u, out, flag| {
                if !self.fill_pixel(s, u, out) {
                    *flag = 1;
                }
            });

        let filled = GapFilled {
            stack,
            no_observation,
        };
        let missing = filled.no_observation_count();
        if missing > 0 {
            log::warn!("{} pixels have no usable observation and were set to no snow", missing);
        }
        Ok(filled)
    }

    /// Fill one pixel, false when it has no usable observation
    fn fill_pixel(&self, snow: ArrayView1<u8>, unusable: ArrayView1<u8>, mut out: ArrayViewMut1<u8>) -> bool {
        // usable observations, one per day, duplicates merged with max
        let mut observations: Vec<(i64, u8)> = Vec::new();
        for ((&day, &value), &bad) in self.input_days.iter().zip(snow.iter()).zip(unusable.iter()) {
            if bad != 0 {
                continue;
            }
            let value = u8::from(value != 0);
            match observations.last_mut() {
                Some((last_day, last_value)) if *last_day == day => {
                    *last_value = (*last_value).max(value);
                }
                _ => observations.push((day, value)),
            }
        }

        if observations.is_empty() {
            out.fill(0);
            return false;
        }

        for (slot, &day) in out.iter_mut().zip(self.output_days.iter()) {
            *slot = interpolate(&observations, day);
        }
        true
    }
}

/// Value at `day` from sorted, non-empty, unique-day observations
fn interpolate(observations: &[(i64, u8)], day: i64) -> u8 {
    match observations.binary_search_by_key(&day, |&(d, _)| d) {
        Ok(i) => observations[i].1,
        Err(0) => observations[0].1,
        Err(i) if i == observations.len() => observations[i - 1].1,
        Err(i) => {
            let (d0, v0) = observations[i - 1];
            let (d1, v1) = observations[i];
            let t = (day - d0) as f64 / (d1 - d0) as f64;
            let value = v0 as f64 + t * (v1 as f64 - v0 as f64);
            value.round() as u8
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array3;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 1, day).unwrap()
    }

    fn series(values: &[u8]) -> MaskStack {
        Array3::from_shape_vec((values.len(), 1, 1), values.to_vec()).unwrap()
    }

    #[test]
    fn test_interpolation_rounds_half_up() {
        let obs = [(0, 0u8), (4, 1)];
        assert_eq!(interpolate(&obs, 1), 0);
        assert_eq!(interpolate(&obs, 2), 1);
        assert_eq!(interpolate(&obs, 3), 1);
        assert_eq!(interpolate(&obs, -3), 0);
        assert_eq!(interpolate(&obs, 9), 1);
    }

    #[test]
    fn test_cloudy_dates_filled_from_neighbours() {
        let inputs = [date(1), date(2), date(3), date(4)];
        let outputs: Vec<NaiveDate> = (1..=6).map(date).collect();
        let filler = GapFiller::new(&inputs, &outputs).unwrap();

        let snow = series(&[1, 0, 0, 1]);
        let unusable = series(&[0, 1, 1, 0]);
        let filled = filler.fill(&snow, &unusable).unwrap();
        let values: Vec<u8> = filled.stack.iter().copied().collect();
        // day 2 is 1/3 of the way, day 3 is 2/3, days 5-6 extrapolate
        assert_eq!(values, vec![1, 1, 1, 1, 1, 1]);
        assert_eq!(filled.no_observation_count(), 0);
    }

    #[test]
    fn test_clear_dates_round_trip() {
        let inputs = [date(1), date(3), date(5)];
        let filler = GapFiller::new(&inputs, &inputs).unwrap();
        let snow = series(&[1, 0, 1]);
        let unusable = series(&[0, 0, 0]);
        let filled = filler.fill(&snow, &unusable).unwrap();
        assert_eq!(filled.stack, snow);
    }

    #[test]
    fn test_no_observation_filled_with_zero() {
        let inputs = [date(1), date(2)];
        let outputs = [date(1), date(2), date(3)];
        let filler = GapFiller::new(&inputs, &outputs).unwrap();
        let snow = series(&[1, 1]);
        let unusable = series(&[1, 1]);
        let filled = filler.fill(&snow, &unusable).unwrap();
        assert!(filled.stack.iter().all(|&v| v == 0));
        assert_eq!(filled.no_observation[[0, 0]], 1);
    }

    #[test]
    fn test_duplicate_dates_take_max() {
        let inputs = [date(1), date(1), date(3)];
        let outputs = [date(1)];
        let filler = GapFiller::new(&inputs, &outputs).unwrap();
        let filled = filler.fill(&series(&[0, 1, 0]), &series(&[0, 0, 0])).unwrap();
        assert_eq!(filled.stack[[0, 0, 0]], 1);
    }

    #[test]
    fn test_mismatched_stacks_rejected() {
        let inputs = [date(1)];
        let filler = GapFiller::new(&inputs, &inputs).unwrap();
        assert!(filler.fill(&series(&[1]), &series(&[0, 0])).is_err());
        assert!(filler.fill(&series(&[1, 0]), &series(&[0, 0])).is_err());
        assert!(GapFiller::new(&[date(2), date(1)], &inputs).is_err());
    }
}
