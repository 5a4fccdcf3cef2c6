use chrono::NaiveDate;
use snowmap::core::multitemp::{filter_products, select_densification};
use snowmap::io::metadata::{read_zs, SceneMetadata};
use snowmap::io::product::{extract_matching, find_products, SnowProduct};
use std::collections::HashSet;
use std::io::Write;
use std::path::Path;

fn touch(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"mask").unwrap();
}

fn date(day: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2018, 1, day).unwrap()
}

/// Products in the three layouts found on disk plus an unrelated directory
fn populate(root: &Path) {
    let flat = "SENTINEL2A_20180102-103551-370_L2B-SNOW_T32TLS_D_V1-0";
    touch(&root.join(flat).join(format!("{}_SNW_R2.tif", flat)));

    let nested = "SENTINEL2B_20180105-103551-370_L2B-SNOW_T32TLS_D_V1-0";
    touch(&root.join(nested).join(nested).join(format!("{}_SNW_R2.tif", nested)));

    let processed = "SENTINEL2A_20180109-103551-370_L2B-SNOW_T31TCH_D_V1-0";
    touch(&root.join(processed).join("LIS_PRODUCTS").join("LIS_SEB.TIF"));

    touch(&root.join("scratch").join("notes.txt"));
}

#[test]
fn test_find_products_in_every_layout() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());

    let products = find_products(dir.path()).unwrap();
    let names: Vec<&str> = products.iter().map(|p| p.name.name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "SENTINEL2A_20180102-103551-370_L2B-SNOW_T32TLS_D_V1-0",
            "SENTINEL2A_20180109-103551-370_L2B-SNOW_T31TCH_D_V1-0",
            "SENTINEL2B_20180105-103551-370_L2B-SNOW_T32TLS_D_V1-0",
        ]
    );

    let extract = tempfile::tempdir().unwrap();
    for product in &products {
        let mask = product.snow_mask(extract.path()).unwrap();
        assert!(mask.exists());
        assert!(mask.starts_with(dir.path()));
    }
}

#[test]
fn test_filter_by_tile_and_window() {
    let dir = tempfile::tempdir().unwrap();
    populate(dir.path());

    let products = find_products(dir.path()).unwrap();
    let kept = filter_products(products, "T32TLS", date(3), date(10), 0);
    let dates: Vec<NaiveDate> = kept.iter().map(|p| p.acquisition_date()).collect();
    assert_eq!(dates, vec![date(5)]);

    let products = find_products(dir.path()).unwrap();
    let kept = filter_products(products, "T32TLS", date(3), date(10), 1);
    assert_eq!(kept.len(), 2);
}

#[test]
fn test_densification_skips_primary_dates() {
    let dir = tempfile::tempdir().unwrap();
    for name in [
        "LANDSAT8_OLITIRS_XS_20180102_N2A_France-MetropoleD0005H0001",
        "LANDSAT8_OLITIRS_XS_20180104_N2A_France-MetropoleD0005H0001",
    ] {
        touch(&dir.path().join(name).join(format!("{}_SNW_R2.tif", name)));
    }
    let secondary = find_products(dir.path()).unwrap();
    let primary: HashSet<NaiveDate> = [date(2), date(5)].into_iter().collect();

    let kept = select_densification(&primary, secondary);
    assert_eq!(kept.len(), 1);
    assert_eq!(kept[0].acquisition_date(), date(4));
    assert_eq!(kept[0].tile_id(), "France-MetropoleD0005H0001");
}

#[test]
fn test_snow_mask_extracted_from_zip() {
    let dir = tempfile::tempdir().unwrap();
    let name = "SENTINEL2A_20180102-103551-370_L2B-SNOW_T32TLS_D_V1-0";
    let product_dir = dir.path().join(name);
    std::fs::create_dir_all(&product_dir).unwrap();

    let archive = product_dir.join(format!("{}.zip", name));
    let mut zip = zip::ZipWriter::new(std::fs::File::create(&archive).unwrap());
    let options = zip::write::FileOptions::default();
    zip.start_file(format!("{}/{}_QKL_ALL.png", name, name), options).unwrap();
    zip.write_all(b"quicklook").unwrap();
    zip.start_file(format!("{}/{}_SNW_R2.tif", name, name), options).unwrap();
    zip.write_all(b"snow mask").unwrap();
    zip.finish().unwrap();

    let product = SnowProduct::open(&product_dir).unwrap();
    let extract = tempfile::tempdir().unwrap();
    let mask = product.snow_mask(extract.path()).unwrap();
    assert_eq!(mask, extract.path().join(format!("{}_SNW_R2.tif", name)));
    assert_eq!(std::fs::read(&mask).unwrap(), b"snow mask");

    assert!(extract_matching(&archive, "_FSC_", extract.path()).is_err());
}

#[test]
fn test_product_without_mask() {
    let dir = tempfile::tempdir().unwrap();
    let name = "SENTINEL2A_20180102-103551-370_L2B-SNOW_T32TLS_D_V1-0";
    std::fs::create_dir_all(dir.path().join(name)).unwrap();
    let product = SnowProduct::open(dir.path().join(name)).unwrap();
    assert!(product.snow_mask(dir.path()).is_err());
}

#[test]
fn test_metadata_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("LIS_METADATA.XML");
    let metadata = SceneMetadata {
        product_id: "SENTINEL2A_20180102-103551-370_L2A_T32TLS_D_V1-0".to_string(),
        zs: -1,
        snow_percent: 0.0,
        cloud_percent: 87.25,
    };
    metadata.write(&path).unwrap();
    assert_eq!(SceneMetadata::read(&path).unwrap(), metadata);
    assert_eq!(read_zs(&path).unwrap(), -1);
}
