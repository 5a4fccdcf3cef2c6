use crate::types::{SnowError, SnowResult};
use chrono::NaiveDate;
use std::path::Path;

const DATE_FORMAT: &str = "%Y%m%d";

/// Read a date list, one `YYYYMMDD` per line; blank lines are ignored
pub fn read_dates<P: AsRef<Path>>(path: P) -> SnowResult<Vec<NaiveDate>> {
    let content = std::fs::read_to_string(path.as_ref())?;
    content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(|line| {
            NaiveDate::parse_from_str(line, DATE_FORMAT).map_err(|e| {
                SnowError::InvalidFormat(format!(
                    "Bad date '{}' in {}: {}",
                    line,
                    path.as_ref().display(),
                    e
                ))
            })
        })
        .collect()
}

pub fn write_dates<P: AsRef<Path>>(path: P, dates: &[NaiveDate]) -> SnowResult<()> {
    let mut content = String::with_capacity(dates.len() * 9);
    for date in dates {
        content.push_str(&date.format(DATE_FORMAT).to_string());
        content.push('\n');
    }
    std::fs::write(path.as_ref(), content)?;
    log::debug!("{} dates written to {}", dates.len(), path.as_ref().display());
    Ok(())
}

/// Every day from `start` to `stop`, both included
pub fn daily_calendar(start: NaiveDate, stop: NaiveDate) -> Vec<NaiveDate> {
    start.iter_days().take_while(|d| *d <= stop).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("dates.txt");
        let dates = daily_calendar(
            NaiveDate::from_ymd_opt(2017, 12, 30).unwrap(),
            NaiveDate::from_ymd_opt(2018, 1, 2).unwrap(),
        );
        assert_eq!(dates.len(), 4);
        write_dates(&path, &dates).unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap().lines().next(), Some("20171230"));
        assert_eq!(read_dates(&path).unwrap(), dates);

        std::fs::write(&path, "20180101\nnot-a-date\n").unwrap();
        assert!(read_dates(&path).is_err());
    }
}
