use ndarray::{Array2, Zip};
use snowmap::config::{CloudConfig, SnowParams};
use snowmap::core::classifier::{SceneBands, SnowDetector};
use snowmap::core::disambiguation::{DisambiguationParams, Disambiguator};
use snowmap::types::{Elevation, Label, Mask};

const NODATA: f64 = -10000.0;

fn cloud_config(disambiguate: bool) -> CloudConfig {
    CloudConfig {
        resampling_factor: 1,
        disambiguate_cloud_surrounded_snow: disambiguate,
        dilation_radius: 2,
        min_component_area: 10,
        ..CloudConfig::default()
    }
}

fn detector(disambiguate: bool) -> SnowDetector {
    SnowDetector::new(cloud_config(disambiguate), SnowParams::default(), NODATA)
        .expect("valid detector")
}

/// 20x20 scene on a slope rising 100 m per row, snow on the upper half.
/// Column 0 of the upper half only passes the relaxed pass 2 thresholds.
fn mountain_scene() -> SceneBands {
    let shape = (20, 20);
    let mut green = Array2::from_elem(shape, 100.0f32);
    let mut red = Array2::from_elem(shape, 50.0f32);
    let mut swir = Array2::from_elem(shape, 100.0f32);
    for r in 10..20 {
        for c in 0..20 {
            if c == 0 {
                green[[r, c]] = 325.0;
                red[[r, c]] = 100.0;
                swir[[r, c]] = 175.0;
            } else {
                green[[r, c]] = 750.0;
                red[[r, c]] = 250.0;
                swir[[r, c]] = 250.0;
            }
        }
    }
    let dem = Elevation::from_shape_fn(shape, |(r, _)| r as f32 * 100.0 + 50.0);
    SceneBands {
        green,
        red,
        swir,
        dem,
        cloud_source: Array2::zeros(shape),
        slope_flag: None,
    }
}

/// Bright snow block of 5x5 in a 9x9 scene, everything else thick cloud
fn cloud_surrounded_scene() -> SceneBands {
    let shape = (9, 9);
    let inside = |r: usize, c: usize| (2..7).contains(&r) && (2..7).contains(&c);
    let green = Array2::from_shape_fn(shape, |(r, c)| if inside(r, c) { 750.0f32 } else { 900.0 });
    let red = Array2::from_shape_fn(shape, |(r, c)| if inside(r, c) { 250.0f32 } else { 900.0 });
    let swir = Array2::from_shape_fn(shape, |(r, c)| if inside(r, c) { 250.0f32 } else { 800.0 });
    let cloud_source = Array2::from_shape_fn(shape, |(r, c)| if inside(r, c) { 0u16 } else { 1 });
    SceneBands {
        green,
        red,
        swir,
        dem: Elevation::from_elem(shape, 1800.0),
        cloud_source,
        slope_flag: None,
    }
}

#[test]
fn test_pass1_bright_snow_pixel() {
    let detector = detector(false);
    let ndsi = ndarray::array![[0.5f32]];
    let red = ndarray::array![[250.0f32]];
    let cloud = ndarray::array![[0u8]];
    assert_eq!(detector.pass1(&ndsi, &red, &cloud), ndarray::array![[1u8]]);
}

#[test]
fn test_cloud_surrounded_snow_becomes_cloud() {
    let scene = cloud_surrounded_scene();

    let kept = detector(false).detect(&scene).expect("detection without pass 1.5");
    assert_eq!(kept.pass1.sum(), 25);
    assert_eq!(kept.labels[[4, 4]], Label::Snow.value());

    let result = detector(true).detect(&scene).expect("detection with pass 1.5");
    let report = result.disambiguation.clone().expect("pass 1.5 ran");
    assert_eq!(report.removed, 1);
    assert_eq!(report.pixels_removed, 25);
    for r in 2..7 {
        for c in 2..7 {
            assert_eq!(result.pass1[[r, c]], 0);
            assert_eq!(result.cloud_pass1[[r, c]], 1);
            assert_eq!(result.labels[[r, c]], Label::Cloud.value());
        }
    }
    assert!(result.labels.iter().all(|&v| v == Label::Cloud.value()));
}

#[test]
fn test_pass2_extends_snow_above_snow_line() {
    let result = detector(false).detect(&mountain_scene()).expect("detection");
    assert_eq!(result.zs, 1000);
    assert_eq!(result.pass1.sum(), 190);

    for r in 10..20 {
        assert_eq!(result.pass1[[r, 0]], 0);
        assert_eq!(result.pass2[[r, 0]], 1);
        assert_eq!(result.labels[[r, 0]], Label::Snow.value());
    }
    for r in 0..10 {
        assert!(result.labels.row(r).iter().all(|&v| v == Label::NoSnow.value()));
    }
    approx::assert_relative_eq!(result.snow_percent(), 50.0, epsilon = 1e-9);
    approx::assert_relative_eq!(result.cloud_percent(), 0.0);
}

#[test]
fn test_labels_stay_in_closed_set() {
    for scene in [mountain_scene(), cloud_surrounded_scene()] {
        for disambiguate in [false, true] {
            let result = detector(disambiguate).detect(&scene).expect("detection");
            assert!(result
                .labels
                .iter()
                .all(|&v| Label::from_value(v).is_some()));
        }
    }
}

#[test]
fn test_pass3_contains_both_snow_passes() {
    let result = detector(false).detect(&mountain_scene()).expect("detection");
    Zip::from(&result.pass3)
        .and(&result.pass1)
        .and(&result.pass2)
        .for_each(|&p3, &p1, &p2| {
            if p1 != 0 || p2 != 0 {
                assert_eq!(p3, 1);
            }
        });
}

#[test]
fn test_detection_is_deterministic() {
    let detector = detector(true);
    let scene = mountain_scene();
    let first = detector.detect(&scene).expect("first run");
    let second = detector.detect(&scene).expect("second run");
    assert_eq!(first.labels, second.labels);
    assert_eq!(first.zs, second.zs);
    assert_eq!(first.histogram, second.histogram);
}

#[test]
fn test_nodata_wins_over_every_label() {
    let mut scene = mountain_scene();
    scene.green[[15, 5]] = NODATA as f32;
    scene.swir[[2, 2]] = NODATA as f32;
    scene.cloud_source[[2, 2]] = 1;
    let result = detector(false).detect(&scene).expect("detection");
    assert_eq!(result.labels[[15, 5]], Label::NoData.value());
    assert_eq!(result.labels[[2, 2]], Label::NoData.value());
}

#[test]
fn test_disambiguation_only_removes_snow() {
    let shape = (12, 12);
    // two snow blocks: one in a cloud field, one next to clear ground
    let snow: Mask = Array2::from_shape_fn(shape, |(r, c)| {
        u8::from(((1..5).contains(&r) && (1..5).contains(&c)) || ((7..11).contains(&r) && (7..11).contains(&c)))
    });
    let cloud: Mask = Array2::from_shape_fn(shape, |(r, c)| u8::from(r < 6 && snow[[r, c]] == 0));

    let disambiguator = Disambiguator::new(DisambiguationParams {
        dilation_radius: 1,
        cloud_threshold: 0.85,
        min_component_area: 4,
    });
    let out = disambiguator.apply(&snow, &cloud).expect("disambiguation");

    assert_eq!(out.report.components, 2);
    assert_eq!(out.report.removed, 1);
    Zip::from(&out.snow).and(&snow).for_each(|&after, &before| assert!(after <= before));
    Zip::from(&out.cloud).and(&cloud).for_each(|&after, &before| assert!(after >= before));
    assert_eq!(out.snow[[2, 2]], 0);
    assert_eq!(out.snow[[8, 8]], 1);
}
