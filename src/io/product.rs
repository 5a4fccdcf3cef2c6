use crate::types::{SnowError, SnowResult};
use chrono::{NaiveDate, NaiveDateTime};
use regex::Regex;
use std::fs::File;
use std::path::{Path, PathBuf};
use zip::ZipArchive;

/// Suffix of the snow mask inside a distributed snow product
pub const SNOW_MASK_SUFFIX: &str = "_SNW_R2.tif";

const MUSCATE_DATETIME_FORMAT: &str = "%Y%m%d-%H%M%S-%3f";

/// Fields encoded in a snow product name.
///
/// Two layouts are recognised:
/// `SENTINEL2A_20160912-103551-370_L2B-SNOW_T32TLS_D_V1-0` and
/// `LANDSAT8_OLITIRS_XS_20160812_N2A_France-MetropoleD0005H0001`.
#[derive(Debug, Clone, PartialEq)]
pub struct ProductName {
    pub name: String,
    pub platform: String,
    pub acquisition: NaiveDateTime,
    pub level: String,
    pub tile_id: String,
    pub flag: Option<String>,
    pub version: Option<String>,
}

impl ProductName {
    pub fn parse(name: &str) -> SnowResult<Self> {
        let muscate = Regex::new(
            r"^(?P<platform>[A-Z0-9-]+)_(?P<date>\d{8}-\d{6}-\d{3})_(?P<level>[A-Z0-9-]+)_(?P<tile>[A-Za-z0-9-]+)_(?P<flag>[A-Z])_(?P<version>V[0-9-]+)$",
        )
        .map_err(|e| SnowError::Processing(format!("Invalid product pattern: {}", e)))?;
        let landsat_n2a = Regex::new(
            r"^(?P<platform>LANDSAT8[A-Z0-9_]*)_(?P<date>\d{8})_(?P<level>N2A)_(?P<tile>\S+)$",
        )
        .map_err(|e| SnowError::Processing(format!("Invalid product pattern: {}", e)))?;

        if let Some(captures) = muscate.captures(name) {
            let acquisition = NaiveDateTime::parse_from_str(&captures["date"], MUSCATE_DATETIME_FORMAT)
                .map_err(|e| {
                    SnowError::InvalidFormat(format!("Bad acquisition date in {}: {}", name, e))
                })?;
            return Ok(Self {
                name: name.to_string(),
                platform: captures["platform"].to_string(),
                acquisition,
                level: captures["level"].to_string(),
                tile_id: captures["tile"].to_string(),
                flag: Some(captures["flag"].to_string()),
                version: Some(captures["version"].to_string()),
            });
        }

        if let Some(captures) = landsat_n2a.captures(name) {
            let date = NaiveDate::parse_from_str(&captures["date"], "%Y%m%d").map_err(|e| {
                SnowError::InvalidFormat(format!("Bad acquisition date in {}: {}", name, e))
            })?;
            let acquisition = date.and_hms_opt(0, 0, 0).ok_or_else(|| {
                SnowError::InvalidFormat(format!("Bad acquisition date in {}", name))
            })?;
            return Ok(Self {
                name: name.to_string(),
                platform: captures["platform"].to_string(),
                acquisition,
                level: captures["level"].to_string(),
                tile_id: captures["tile"].to_string(),
                flag: None,
                version: None,
            });
        }

        Err(SnowError::InvalidFormat(format!("Unrecognised snow product name: {}", name)))
    }

    pub fn acquisition_date(&self) -> NaiveDate {
        self.acquisition.date()
    }
}

/// A snow product directory and where its snow mask lives
#[derive(Debug, Clone)]
pub struct SnowProduct {
    pub name: ProductName,
    pub path: PathBuf,
    snow_mask: Option<PathBuf>,
    zip_archive: Option<PathBuf>,
}

impl SnowProduct {
    /// Inspect a product directory named after the product
    pub fn open<P: AsRef<Path>>(path: P) -> SnowResult<Self> {
        let path = path.as_ref().to_path_buf();
        let dir_name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SnowError::InvalidFormat(format!("No product name in {}", path.display())))?;
        let name = ProductName::parse(dir_name)?;

        let mut snow_mask = None;
        let mut zip_archive = None;
        for entry in std::fs::read_dir(&path)? {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().to_string();
            let entry_path = entry.path();
            if file_name.to_lowercase().ends_with(".zip") {
                log::debug!("{} is stored in a zip", name.name);
                zip_archive = Some(entry_path.clone());
            }
            if file_name == name.name {
                // already extracted archive
                let candidate = entry_path.join(format!("{}{}", name.name, SNOW_MASK_SUFFIX));
                if candidate.exists() {
                    snow_mask = Some(candidate);
                }
            }
            if file_name.to_uppercase().ends_with(&SNOW_MASK_SUFFIX.to_uppercase()) {
                snow_mask = Some(entry_path.clone());
            }
            if file_name.to_uppercase() == "LIS_PRODUCTS" {
                let candidate = entry_path.join("LIS_SEB.TIF");
                if candidate.exists() {
                    snow_mask = Some(candidate);
                }
            }
        }

        Ok(Self {
            name,
            path,
            snow_mask,
            zip_archive,
        })
    }

    pub fn acquisition_date(&self) -> NaiveDate {
        self.name.acquisition_date()
    }

    pub fn tile_id(&self) -> &str {
        &self.name.tile_id
    }

    /// Snow mask location, extracting it from the zip into `extract_dir` if needed
    pub fn snow_mask(&self, extract_dir: &Path) -> SnowResult<PathBuf> {
        if let Some(mask) = &self.snow_mask {
            return Ok(mask.clone());
        }
        match &self.zip_archive {
            Some(archive) => extract_matching(archive, SNOW_MASK_SUFFIX, extract_dir),
            None => Err(SnowError::InvalidFormat(format!(
                "No snow mask found in {}",
                self.path.display()
            ))),
        }
    }
}

/// Extract the first archive entry whose name contains `pattern`
pub fn extract_matching(archive_path: &Path, pattern: &str, output_dir: &Path) -> SnowResult<PathBuf> {
    let file = File::open(archive_path)?;
    let mut archive = ZipArchive::new(file)
        .map_err(|e| SnowError::InvalidFormat(format!("Failed to open ZIP: {}", e)))?;

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| SnowError::InvalidFormat(format!("Failed to access entry {}: {}", i, e)))?;
        if !entry.name().contains(pattern) || entry.is_dir() {
            continue;
        }
        let file_name = Path::new(entry.name())
            .file_name()
            .map(|n| n.to_os_string())
            .ok_or_else(|| SnowError::InvalidFormat(format!("Bad entry name {}", entry.name())))?;
        std::fs::create_dir_all(output_dir)?;
        let target = output_dir.join(file_name);
        let mut out = File::create(&target)?;
        std::io::copy(&mut entry, &mut out)?;
        log::info!("Extracted {} to {}", entry.name(), target.display());
        return Ok(target);
    }

    Err(SnowError::InvalidFormat(format!(
        "No entry matching {} in {}",
        pattern,
        archive_path.display()
    )))
}

/// Products found directly under `dir`; unparseable entries are skipped
pub fn find_products<P: AsRef<Path>>(dir: P) -> SnowResult<Vec<SnowProduct>> {
    let dir = dir.as_ref();
    let mut entries: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_dir())
        .collect();
    entries.sort();

    let mut products = Vec::new();
    for path in entries {
        match SnowProduct::open(&path) {
            Ok(product) => products.push(product),
            Err(e) => log::warn!("Skipping {}: {}", path.display(), e),
        }
    }
    log::info!("Found {} snow products in {}", products.len(), dir.display());
    Ok(products)
}
