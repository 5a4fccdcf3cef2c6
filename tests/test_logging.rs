use chrono::NaiveDate;
use log::{Level, LevelFilter, Log, Metadata, Record};
use snowmap::config::MultitempConfig;
use snowmap::core::annual_map::AnnualMapProcessor;
use snowmap::types::SnowError;
use std::sync::Mutex;

/// Keeps every record so tests can check what was reported and at which level
struct RecordingLogger {
    records: Mutex<Vec<(Level, String)>>,
}

impl Log for RecordingLogger {
    fn enabled(&self, _metadata: &Metadata) -> bool {
        true
    }

    fn log(&self, record: &Record) {
        if let Ok(mut records) = self.records.lock() {
            records.push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

static LOGGER: RecordingLogger = RecordingLogger {
    records: Mutex::new(Vec::new()),
};

#[test]
fn test_empty_series_is_logged_as_error() {
    log::set_logger(&LOGGER).unwrap();
    log::set_max_level(LevelFilter::Trace);

    let dir = tempfile::tempdir().unwrap();
    let root = dir.path();
    std::fs::create_dir_all(root.join("s2")).unwrap();
    let config = MultitempConfig {
        tile_id: "T32TLS".to_string(),
        date_start: NaiveDate::from_ymd_opt(2018, 1, 1).unwrap(),
        date_stop: NaiveDate::from_ymd_opt(2018, 1, 5).unwrap(),
        date_margin_days: 0,
        input_dir: root.join("s2"),
        output_dir: root.join("out"),
        output_dates_file: None,
        densification: None,
        thread_count: Some(1),
        snow_season_min_days: 1,
    };

    let result = AnnualMapProcessor::new(config).unwrap().run();
    assert!(matches!(result, Err(SnowError::EmptyTimeSeries(_))));

    let records = LOGGER.records.lock().unwrap();
    let errors: Vec<&String> = records
        .iter()
        .filter(|(level, _)| *level == Level::Error)
        .map(|(_, message)| message)
        .collect();
    assert_eq!(errors.len(), 1);
    assert!(errors[0].contains("T32TLS"));
}
