use crate::{
    bar::{Bar, Resolution},
    error::DataError,
    feed::{validate_stream, BarFeed},
};
use chrono::{DateTime, NaiveDate, NaiveTime, TimeDelta, Utc};
use csv::Reader;
use smol_str::SmolStr;
use std::path::Path;
use tracing::debug;

/// Column layout discovered from a CSV header row. Field parsing is
/// position-independent once the header is known.
#[derive(Debug, Default)]
struct ColumnMap {
    date: Option<usize>,
    time: Option<usize>,
    ms: Option<usize>,
    open: Option<usize>,
    high: Option<usize>,
    low: Option<usize>,
    close: Option<usize>,
    volume: Option<usize>,
    open_interest: Option<usize>,
}

impl ColumnMap {
    fn from_headers(headers: &csv::StringRecord) -> Result<Self, DataError> {
        let mut map = Self::default();
        for (index, raw) in headers.iter().enumerate() {
            match raw.trim().to_ascii_lowercase().as_str() {
                "date" => map.date = Some(index),
                "time" => map.time = Some(index),
                "ms" | "millisecond" => map.ms = Some(index),
                "open" => map.open = Some(index),
                "high" => map.high = Some(index),
                "low" => map.low = Some(index),
                "close" => map.close = Some(index),
                "volume" | "vol" => map.volume = Some(index),
                "openint" | "open_interest" | "oi" => map.open_interest = Some(index),
                _ => {}
            }
        }

        map.date.ok_or(DataError::MissingColumn("date"))?;
        map.open.ok_or(DataError::MissingColumn("open"))?;
        map.high.ok_or(DataError::MissingColumn("high"))?;
        map.low.ok_or(DataError::MissingColumn("low"))?;
        map.close.ok_or(DataError::MissingColumn("close"))?;

        Ok(map)
    }
}

/// Load bars for one instrument from a CSV file with a required header row.
pub fn load_csv_bars(
    path: impl AsRef<Path>,
    instrument: impl Into<SmolStr>,
    resolution: Resolution,
) -> Result<Vec<Bar>, DataError> {
    let path = path.as_ref();
    let instrument = instrument.into();
    let mut reader = Reader::from_path(path)?;

    let columns = ColumnMap::from_headers(reader.headers()?)?;

    let mut bars = Vec::new();
    for record in reader.records() {
        let record = record?;

        let date = field(&record, columns.date);
        let time = field(&record, columns.time);
        let ms = field(&record, columns.ms);
        let datetime = parse_datetime(date, time, ms)?;

        let bar = Bar {
            instrument: instrument.clone(),
            datetime,
            open: parse_f64(field(&record, columns.open))?,
            high: parse_f64(field(&record, columns.high))?,
            low: parse_f64(field(&record, columns.low))?,
            close: parse_f64(field(&record, columns.close))?,
            volume: parse_i64(field(&record, columns.volume))?,
            open_interest: parse_i64(field(&record, columns.open_interest))?,
            resolution,
            interval: 1,
            quote: None,
        };
        bars.push(bar);
    }

    validate_stream(&path.display().to_string(), &bars)?;
    debug!(file = %path.display(), bars = bars.len(), %instrument, "loaded csv bars");

    Ok(bars)
}

/// Load a CSV file straight into a [`BarFeed`].
pub fn load_csv_feed(
    path: impl AsRef<Path>,
    instrument: impl Into<SmolStr>,
    resolution: Resolution,
) -> Result<BarFeed, DataError> {
    let instrument = instrument.into();
    let bars = load_csv_bars(path, instrument.clone(), resolution)?;
    BarFeed::from_bars(instrument, resolution, 1, bars)
}

fn field<'a>(record: &'a csv::StringRecord, index: Option<usize>) -> Option<&'a str> {
    index.and_then(|index| record.get(index)).map(str::trim)
}

fn parse_f64(value: Option<&str>) -> Result<f64, DataError> {
    let Some(value) = value else { return Ok(0.0) };
    value
        .parse::<f64>()
        .map_err(|_| DataError::InvalidNumber(value.to_string()))
}

fn parse_i64(value: Option<&str>) -> Result<i64, DataError> {
    let Some(value) = value else { return Ok(0) };
    if value.is_empty() {
        return Ok(0);
    }
    // Some vendors emit volume as a float.
    value
        .parse::<i64>()
        .or_else(|_| value.parse::<f64>().map(|float| float as i64))
        .map_err(|_| DataError::InvalidNumber(value.to_string()))
}

/// Parse `YYYYMMDD`/`YYYY-MM-DD` dates and `HHMMSS`/`HH:MM:SS` times into a
/// UTC timestamp, with an optional millisecond column.
fn parse_datetime(
    date: Option<&str>,
    time: Option<&str>,
    ms: Option<&str>,
) -> Result<DateTime<Utc>, DataError> {
    let date = date.ok_or(DataError::MissingColumn("date"))?;

    let naive_date = NaiveDate::parse_from_str(date, "%Y%m%d")
        .or_else(|_| NaiveDate::parse_from_str(date, "%Y-%m-%d"))
        .or_else(|_| NaiveDate::parse_from_str(date, "%Y/%m/%d"))
        .map_err(|_| DataError::InvalidDateTime(date.to_string()))?;

    let naive_time = match time.filter(|time| !time.is_empty()) {
        None => NaiveTime::MIN,
        Some(time) => {
            // HHMMSS integers may drop leading zeros (eg/ 93000 for 09:30:00).
            let padded;
            let normalized = if !time.contains(':') && time.len() < 6 {
                padded = format!("{time:0>6}");
                padded.as_str()
            } else {
                time
            };
            NaiveTime::parse_from_str(normalized, "%H%M%S")
                .or_else(|_| NaiveTime::parse_from_str(normalized, "%H:%M:%S"))
                .or_else(|_| NaiveTime::parse_from_str(normalized, "%H:%M"))
                .map_err(|_| DataError::InvalidDateTime(time.to_string()))?
        }
    };

    let mut datetime = naive_date.and_time(naive_time).and_utc();
    if let Some(ms) = ms.filter(|ms| !ms.is_empty()) {
        let millis = ms
            .parse::<i64>()
            .map_err(|_| DataError::InvalidDateTime(ms.to_string()))?;
        datetime += TimeDelta::milliseconds(millis);
    }

    Ok(datetime)
}
