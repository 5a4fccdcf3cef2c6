use ndarray::array;
use snowmap::core::snow_line::{
    ElevationHistogram, HistogramBin, ScanDirection, SnowLineEstimator, SnowLineParams, UNDETERMINED_ZS,
};

fn bin(k: i64, dz: f64, total: u64, clear: u64, snow: u64) -> HistogramBin {
    HistogramBin {
        lower: k as f64 * dz,
        upper: (k + 1) as f64 * dz,
        total,
        clear,
        snow,
    }
}

fn estimator(fsnow_lim: f64, fclear_lim: f64) -> SnowLineEstimator {
    SnowLineEstimator::new(SnowLineParams {
        dz: 1000.0,
        fsnow_lim,
        fclear_lim,
        ..SnowLineParams::default()
    })
}

#[test]
fn test_cloudy_summits_are_skipped() {
    let histogram = ElevationHistogram::from_bins(
        1000.0,
        vec![
            bin(0, 1000.0, 50, 50, 0),
            bin(1, 1000.0, 100, 100, 5),
            bin(2, 1000.0, 100, 100, 90),
            bin(3, 1000.0, 50, 0, 0),
            bin(4, 1000.0, 30, 0, 0),
        ],
    );
    assert_eq!(estimator(0.1, 0.1).snow_line(&histogram), 2000);
}

#[test]
fn test_bin_upper_bound_is_inclusive() {
    let dem = array![[2000.0f32, 2000.5]];
    let snow = array![[1u8, 1]];
    let cloud = array![[0u8, 0]];
    let histogram = ElevationHistogram::from_rasters(&dem, &snow, &cloud, None, 1000.0).unwrap();
    assert_eq!(histogram.bins().len(), 2);
    assert_eq!(histogram.bins()[0].lower, 1000.0);
    assert_eq!(histogram.bins()[0].total, 1);
    assert_eq!(histogram.bins()[1].lower, 2000.0);
    assert_eq!(histogram.bins()[1].total, 1);
}

#[test]
fn test_raising_snow_fraction_limit_never_lowers_the_line() {
    let histogram = ElevationHistogram::from_bins(
        1000.0,
        vec![
            bin(0, 1000.0, 10, 10, 0),
            bin(1, 1000.0, 10, 10, 3),
            bin(2, 1000.0, 10, 10, 6),
            bin(3, 1000.0, 10, 10, 9),
        ],
    );
    let lines: Vec<i32> = [0.05, 0.3, 0.5, 0.9, 0.95]
        .iter()
        .map(|&lim| estimator(lim, 0.1).snow_line(&histogram))
        .collect();
    assert_eq!(lines, vec![1000, 1000, 2000, 3000, UNDETERMINED_ZS]);

    let mut previous = i32::MIN;
    for zs in lines.into_iter().filter(|&zs| zs != UNDETERMINED_ZS) {
        assert!(zs >= previous);
        previous = zs;
    }
}

#[test]
fn test_fully_cloudy_histogram_is_undetermined() {
    let histogram = ElevationHistogram::from_bins(
        100.0,
        vec![bin(10, 100.0, 20, 0, 0), bin(11, 100.0, 0, 0, 0)],
    );
    for b in histogram.bins() {
        assert_eq!(b.snow_fraction(), 0.0);
        assert_eq!(b.clear_fraction(), 0.0);
        assert!(!b.is_conclusive(0.1));
    }
    assert_eq!(estimator(0.1, 0.1).snow_line(&histogram), UNDETERMINED_ZS);
}

#[test]
fn test_bottom_up_scan_takes_first_snowy_bin() {
    let histogram = ElevationHistogram::from_bins(
        1000.0,
        vec![
            bin(0, 1000.0, 10, 10, 0),
            bin(1, 1000.0, 10, 10, 5),
            bin(2, 1000.0, 10, 10, 0),
            bin(3, 1000.0, 10, 10, 9),
        ],
    );
    let top_down = estimator(0.4, 0.1);
    assert_eq!(top_down.snow_line(&histogram), 3000);

    let bottom_up = SnowLineEstimator::new(SnowLineParams {
        dz: 1000.0,
        fsnow_lim: 0.4,
        fclear_lim: 0.1,
        direction: ScanDirection::BottomUp,
        bin_offset: 0,
    });
    assert_eq!(bottom_up.snow_line(&histogram), 1000);
}

#[test]
fn test_histogram_text_export() {
    let dem = array![[150.0f32, 250.0, f32::NAN]];
    let snow = array![[1u8, 0, 1]];
    let cloud = array![[0u8, 1, 0]];
    let histogram = ElevationHistogram::from_rasters(&dem, &snow, &cloud, None, 100.0).unwrap();
    let text = histogram.to_text();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].starts_with('#'));
    assert_eq!(lines[1], "100 1 1 1 1.000000");
    assert_eq!(lines[2], "200 1 0 0 0.000000");
}
