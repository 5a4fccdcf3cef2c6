//! Multitemporal snow occurrence from a series of classified scenes
//!
//! Classified masks are binarized into snow and unusable indicators, stacked
//! in date order, gap-filled onto the output calendar and summed per pixel.

use crate::core::gap_filling::{GapFilled, GapFiller};
use crate::core::snow_dates::{observation_count, snow_season, SnowSeason};
use crate::io::product::SnowProduct;
use crate::types::{Label, LabelImage, Mask, MaskStack, OccurrenceImage, SnowError, SnowResult};
use chrono::{Duration, NaiveDate};
use ndarray::Axis;
use std::collections::HashSet;

/// Classified mask of one acquisition
#[derive(Debug, Clone)]
pub struct DatedMask {
    pub date: NaiveDate,
    pub labels: LabelImage,
    /// Product the mask was read from
    pub source: String,
}

/// Products of `tile_id` acquired within `[start - margin, stop + margin]`
pub fn filter_products(
    products: Vec<SnowProduct>,
    tile_id: &str,
    start: NaiveDate,
    stop: NaiveDate,
    margin_days: i64,
) -> Vec<SnowProduct> {
    let first = start - Duration::days(margin_days);
    let last = stop + Duration::days(margin_days);
    let total = products.len();
    let kept: Vec<SnowProduct> = products
        .into_iter()
        .filter(|p| {
            let date = p.acquisition_date();
            p.tile_id().contains(tile_id) && date >= first && date <= last
        })
        .collect();
    log::info!(
        "{} of {} products of tile {} fall within {} .. {}",
        kept.len(),
        total,
        tile_id,
        first,
        last
    );
    kept
}

/// Secondary products whose date is not already covered by the primary series
pub fn select_densification(primary_dates: &HashSet<NaiveDate>, secondary: Vec<SnowProduct>) -> Vec<SnowProduct> {
    let kept: Vec<SnowProduct> = secondary
        .into_iter()
        .filter(|p| {
            let duplicate = primary_dates.contains(&p.acquisition_date());
            if duplicate {
                log::debug!("Densification product {} duplicates a primary date", p.name.name);
            }
            !duplicate
        })
        .collect();
    if kept.is_empty() {
        log::info!("No densification product adds a new date");
    } else {
        log::info!("{} densification products added", kept.len());
    }
    kept
}

/// Stable sort, masks sharing a date keep their relative order
pub fn sort_by_date(masks: &mut [DatedMask]) {
    masks.sort_by_key(|m| m.date);
}

/// Snow indicator and unusable (cloud or no-data) indicator of a classified mask
pub fn binarize(labels: &LabelImage) -> (Mask, Mask) {
    let snow = labels.mapv(|v| u8::from(v == Label::Snow.value()));
    let unusable = labels.mapv(|v| u8::from(Label::is_unusable(v)));
    (snow, unusable)
}

/// Stack the binarized masks along a new first axis, in slice order
pub fn stack_indicators(masks: &[DatedMask]) -> SnowResult<(MaskStack, MaskStack)> {
    let first = masks
        .first()
        .ok_or_else(|| SnowError::EmptyTimeSeries("No mask to stack".to_string()))?;
    let (rows, cols) = first.labels.dim();
    let mut snow = MaskStack::zeros((masks.len(), rows, cols));
    let mut unusable = MaskStack::zeros((masks.len(), rows, cols));

    for (k, mask) in masks.iter().enumerate() {
        if mask.labels.dim() != (rows, cols) {
            return Err(SnowError::GridMismatch(format!(
                "{} is {:?} but the series grid is {:?}",
                mask.source,
                mask.labels.dim(),
                (rows, cols)
            )));
        }
        let (s, u) = binarize(&mask.labels);
        snow.index_axis_mut(Axis(0), k).assign(&s);
        unusable.index_axis_mut(Axis(0), k).assign(&u);
    }
    Ok((snow, unusable))
}

fn sum_dates(stack: &MaskStack) -> OccurrenceImage {
    stack.map_axis(Axis(0), |series| {
        series.iter().map(|&v| u16::from(v != 0)).fold(0u16, |a, b| a.saturating_add(b))
    })
}

/// Results of a multitemporal aggregation
#[derive(Debug, Clone)]
pub struct Occurrence {
    pub input_dates: Vec<NaiveDate>,
    pub output_dates: Vec<NaiveDate>,
    /// Gap-filled snow days per pixel over the output calendar
    pub snow_occurrence: OccurrenceImage,
    /// Unusable dates per pixel over the input dates
    pub cloud_occurrence: OccurrenceImage,
    /// Usable observations per pixel
    pub observations: OccurrenceImage,
    pub daily: GapFilled,
    pub season: SnowSeason,
}

/// Aggregates a series of classified masks
pub struct MultitempAggregator {
    output_dates: Vec<NaiveDate>,
    snow_season_min_days: usize,
}

impl MultitempAggregator {
    pub fn new(output_dates: Vec<NaiveDate>, snow_season_min_days: usize) -> Self {
        Self {
            output_dates,
            snow_season_min_days,
        }
    }

    pub fn output_dates(&self) -> &[NaiveDate] {
        &self.output_dates
    }

    /// Sort, stack, gap-fill and sum the masks; they must share one grid
    pub fn aggregate(&self, mut masks: Vec<DatedMask>) -> SnowResult<Occurrence> {
        if masks.is_empty() {
            return Err(SnowError::EmptyTimeSeries(
                "No classified mask left after filtering".to_string(),
            ));
        }
        sort_by_date(&mut masks);
        let input_dates: Vec<NaiveDate> = masks.iter().map(|m| m.date).collect();
        log::info!(
            "Aggregating {} masks from {} to {}",
            masks.len(),
            input_dates[0],
            input_dates[input_dates.len() - 1]
        );

        let (snow, unusable) = stack_indicators(&masks)?;
        drop(masks);

        let filler = GapFiller::new(&input_dates, &self.output_dates)?;
        let daily = filler.fill(&snow, &unusable)?;

        let snow_occurrence = sum_dates(&daily.stack);
        let cloud_occurrence = sum_dates(&unusable);
        let observations = observation_count(&unusable);
        let season = snow_season(&daily.stack, self.snow_season_min_days);

        Ok(Occurrence {
            input_dates,
            output_dates: self.output_dates.clone(),
            snow_occurrence,
            cloud_occurrence,
            observations,
            daily,
            season,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    fn date(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2018, 2, day).unwrap()
    }

    fn mask(day: u32, labels: LabelImage, source: &str) -> DatedMask {
        DatedMask {
            date: date(day),
            labels,
            source: source.to_string(),
        }
    }

    #[test]
    fn test_binarize() {
        let (snow, unusable) = binarize(&array![[0u8, 100, 205, 254]]);
        assert_eq!(snow, array![[0u8, 1, 0, 0]]);
        assert_eq!(unusable, array![[0u8, 0, 1, 1]]);
    }

    #[test]
    fn test_sort_is_stable() {
        let mut masks = vec![
            mask(3, array![[0u8]], "c"),
            mask(1, array![[0u8]], "a"),
            mask(3, array![[0u8]], "d"),
            mask(1, array![[0u8]], "b"),
        ];
        sort_by_date(&mut masks);
        let order: Vec<&str> = masks.iter().map(|m| m.source.as_str()).collect();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[test]
    fn test_empty_series_is_an_error() {
        let aggregator = MultitempAggregator::new(vec![date(1)], 10);
        assert!(matches!(aggregator.aggregate(Vec::new()), Err(SnowError::EmptyTimeSeries(_))));
    }

    #[test]
    fn test_grid_mismatch_rejected() {
        let masks = vec![mask(1, array![[0u8]], "a"), mask(2, array![[0u8, 0]], "b")];
        assert!(matches!(stack_indicators(&masks), Err(SnowError::GridMismatch(_))));
    }

    #[test]
    fn test_occurrence_counts() {
        // pixel 0 snowy then cloudy, pixel 1 always clear of snow
        let masks = vec![
            mask(3, array![[205u8, 0]], "b"),
            mask(1, array![[100u8, 0]], "a"),
            mask(5, array![[100u8, 0]], "c"),
        ];
        let outputs: Vec<NaiveDate> = (1..=5).map(date).collect();
        let occurrence = MultitempAggregator::new(outputs, 2).aggregate(masks).unwrap();
        assert_eq!(occurrence.input_dates, vec![date(1), date(3), date(5)]);
        assert_eq!(occurrence.snow_occurrence, array![[5u16, 0]]);
        assert_eq!(occurrence.cloud_occurrence, array![[1u16, 0]]);
        assert_eq!(occurrence.observations, array![[2u16, 3]]);
        assert_eq!(occurrence.season.onset, array![[0u16, 0]]);
        assert_eq!(occurrence.season.melt_out, array![[4u16, 0]]);
    }
}
