use crate::types::{SnowError, SnowResult};
use quick_xml::de::from_str;
use quick_xml::se::Serializer;
use serde::{Deserialize, Serialize};
use std::path::Path;

const ZS_INDEX: &str = "ZS";
const SNOW_PERCENT_INDEX: &str = "SnowPercent";
const CLOUD_PERCENT_INDEX: &str = "CloudPercent";

/// Scene-level quality indices written next to the snow product
#[derive(Debug, Clone, PartialEq)]
pub struct SceneMetadata {
    pub product_id: String,
    /// Snow line in metres, -1 when undetermined
    pub zs: i32,
    pub snow_percent: f64,
    pub cloud_percent: f64,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename = "Source_Product")]
struct SourceProduct {
    #[serde(rename = "PRODUCT_ID")]
    product_id: String,
    #[serde(rename = "Global_Index_List")]
    global_index_list: GlobalIndexList,
}

#[derive(Debug, Serialize, Deserialize)]
struct GlobalIndexList {
    #[serde(rename = "QUALITY_INDEX", default)]
    quality_index: Vec<QualityIndex>,
}

#[derive(Debug, Serialize, Deserialize)]
struct QualityIndex {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "$text")]
    value: String,
}

impl SceneMetadata {
    pub fn to_xml(&self) -> SnowResult<String> {
        let document = SourceProduct {
            product_id: self.product_id.clone(),
            global_index_list: GlobalIndexList {
                quality_index: vec![
                    QualityIndex {
                        name: ZS_INDEX.to_string(),
                        value: self.zs.to_string(),
                    },
                    QualityIndex {
                        name: SNOW_PERCENT_INDEX.to_string(),
                        value: self.snow_percent.to_string(),
                    },
                    QualityIndex {
                        name: CLOUD_PERCENT_INDEX.to_string(),
                        value: self.cloud_percent.to_string(),
                    },
                ],
            },
        };

        let mut xml = String::from("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
        document
            .serialize(Serializer::new(&mut xml))
            .map_err(|e| SnowError::Metadata(format!("Failed to serialize metadata: {}", e)))?;
        xml.push('\n');
        Ok(xml)
    }

    pub fn from_xml(xml: &str) -> SnowResult<Self> {
        let document: SourceProduct = from_str(xml)
            .map_err(|e| SnowError::Metadata(format!("Failed to parse metadata: {}", e)))?;
        let indices = &document.global_index_list.quality_index;
        let zs = find_index(indices, ZS_INDEX)?
            .parse::<i32>()
            .map_err(|e| SnowError::Metadata(format!("Bad {} value: {}", ZS_INDEX, e)))?;
        let parse_f64 = |name: &str| -> SnowResult<f64> {
            find_index(indices, name)?
                .parse::<f64>()
                .map_err(|e| SnowError::Metadata(format!("Bad {} value: {}", name, e)))
        };

        Ok(Self {
            product_id: document.product_id,
            zs,
            snow_percent: parse_f64(SNOW_PERCENT_INDEX)?,
            cloud_percent: parse_f64(CLOUD_PERCENT_INDEX)?,
        })
    }

    pub fn write<P: AsRef<Path>>(&self, path: P) -> SnowResult<()> {
        std::fs::write(path.as_ref(), self.to_xml()?)?;
        log::info!("Metadata written to {}", path.as_ref().display());
        Ok(())
    }

    pub fn read<P: AsRef<Path>>(path: P) -> SnowResult<Self> {
        let xml = std::fs::read_to_string(path.as_ref())?;
        Self::from_xml(&xml)
    }
}

fn find_index<'a>(indices: &'a [QualityIndex], name: &str) -> SnowResult<&'a str> {
    indices
        .iter()
        .find(|q| q.name == name)
        .map(|q| q.value.trim())
        .ok_or_else(|| SnowError::Metadata(format!("Quality index {} is missing", name)))
}

/// Snow line stored in a scene metadata file
pub fn read_zs<P: AsRef<Path>>(path: P) -> SnowResult<i32> {
    Ok(SceneMetadata::read(path)?.zs)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metadata_layout() {
        let metadata = SceneMetadata {
            product_id: "SENTINEL2A_20160912-103551-370_L2B-SNOW_T32TLS_D_V1-0".to_string(),
            zs: 1400,
            snow_percent: 12.5,
            cloud_percent: 3.0,
        };
        let xml = metadata.to_xml().unwrap();
        assert!(xml.starts_with("<?xml"));
        assert!(xml.contains("<Source_Product>"));
        assert!(xml.contains("<QUALITY_INDEX name=\"ZS\">1400</QUALITY_INDEX>"));
        assert!(xml.contains("<QUALITY_INDEX name=\"SnowPercent\">12.5</QUALITY_INDEX>"));
        assert_eq!(SceneMetadata::from_xml(&xml).unwrap(), metadata);
    }

    #[test]
    fn test_negative_zs_written_unpadded() {
        let metadata = SceneMetadata {
            product_id: "LANDSAT8-OLITIRS-XS_20180115-103629-617_L2A_D0005H0001_D_V1-0".to_string(),
            zs: -1,
            snow_percent: 0.0,
            cloud_percent: 100.0,
        };
        let xml = metadata.to_xml().unwrap();
        assert!(xml.contains("<QUALITY_INDEX name=\"ZS\">-1</QUALITY_INDEX>"));
        assert!(!xml.contains(">\n "));
        assert_eq!(SceneMetadata::from_xml(&xml).unwrap().zs, -1);
    }

    #[test]
    fn test_missing_index_is_an_error() {
        let xml = r#"<Source_Product>
            <PRODUCT_ID>x</PRODUCT_ID>
            <Global_Index_List>
                <QUALITY_INDEX name="ZS">-1</QUALITY_INDEX>
            </Global_Index_List>
        </Source_Product>"#;
        assert!(matches!(SceneMetadata::from_xml(xml), Err(SnowError::Metadata(_))));
    }
}
