use crate::{
    bar::{Bar, Resolution},
    error::DataError,
    feed::{validate_stream, BarFeed},
    session::ActivePeriod,
};
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use smol_str::SmolStr;
use std::path::Path;
use tracing::debug;

/// Byte length of one packed record:
/// `instrument[8] + date u32 + time u32 + OHLC/volume/open-interest f64 ×6 + hot u32`,
/// little-endian with 4-byte alignment.
pub const RECORD_LEN: usize = 8 + 4 + 4 + 6 * 8 + 4;

/// One contiguous instrument run discovered in a packed file.
#[derive(Debug)]
pub struct PackedStream {
    pub instrument: SmolStr,
    pub bars: Vec<Bar>,
    /// Contiguous hot-flag runs, usable as runtime active periods.
    pub tradable_periods: Vec<ActivePeriod>,
}

impl PackedStream {
    pub fn into_feed(self, resolution: Resolution, interval: u32) -> Result<BarFeed, DataError> {
        let mut feed =
            BarFeed::from_bars(self.instrument, resolution, interval, self.bars)?;
        feed.set_tradable_periods(self.tradable_periods);
        Ok(feed)
    }
}

/// Scan a packed binary file sequentially, splitting it into contiguous
/// instrument runs and discovering tradable sub-periods from the hot flag.
pub fn load_packed_streams(
    path: impl AsRef<Path>,
    resolution: Resolution,
) -> Result<Vec<PackedStream>, DataError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let file = path.display().to_string();

    let mut streams: Vec<PackedStream> = Vec::new();
    let mut hot_run_start: Option<DateTime<Utc>> = None;
    let mut last_hot_end: Option<DateTime<Utc>> = None;

    for (index, chunk) in data.chunks(RECORD_LEN).enumerate() {
        if chunk.len() < RECORD_LEN {
            return Err(DataError::TruncatedRecord {
                file,
                index,
                len: chunk.len(),
                expected: RECORD_LEN,
            });
        }

        let record = decode_record(chunk, resolution)?;

        let new_run = streams
            .last()
            .map(|stream| stream.instrument != record.bar.instrument)
            .unwrap_or(true);
        if new_run {
            // Close any open hot run of the previous instrument.
            if let (Some(begin), Some(end), Some(stream)) =
                (hot_run_start.take(), last_hot_end.take(), streams.last_mut())
            {
                stream.tradable_periods.push(ActivePeriod { begin, end });
            }
            streams.push(PackedStream {
                instrument: record.bar.instrument.clone(),
                bars: Vec::new(),
                tradable_periods: Vec::new(),
            });
        }

        let stream = streams.last_mut().unwrap_or_else(|| unreachable!());
        match (record.hot, hot_run_start) {
            (true, None) => {
                hot_run_start = Some(record.bar.datetime);
                last_hot_end = Some(record.bar.datetime);
            }
            (true, Some(_)) => last_hot_end = Some(record.bar.datetime),
            (false, Some(begin)) => {
                stream.tradable_periods.push(ActivePeriod {
                    begin,
                    end: last_hot_end.unwrap_or(begin),
                });
                hot_run_start = None;
                last_hot_end = None;
            }
            (false, None) => {}
        }

        stream.bars.push(record.bar);
    }

    if let (Some(begin), Some(end), Some(stream)) =
        (hot_run_start, last_hot_end, streams.last_mut())
    {
        stream.tradable_periods.push(ActivePeriod { begin, end });
    }

    for stream in &streams {
        validate_stream(&file, &stream.bars)?;
    }

    debug!(file = %file, streams = streams.len(), "loaded packed bar file");

    Ok(streams)
}

struct PackedRecord {
    bar: Bar,
    hot: bool,
}

fn decode_record(chunk: &[u8], resolution: Resolution) -> Result<PackedRecord, DataError> {
    let instrument = decode_name(&chunk[0..8]);
    let date = u32::from_le_bytes(chunk[8..12].try_into().unwrap_or_default());
    let time = u32::from_le_bytes(chunk[12..16].try_into().unwrap_or_default());

    let mut doubles = [0.0f64; 6];
    for (slot, double) in doubles.iter_mut().enumerate() {
        let offset = 16 + slot * 8;
        *double = f64::from_le_bytes(chunk[offset..offset + 8].try_into().unwrap_or_default());
    }
    let hot = u32::from_le_bytes(chunk[64..68].try_into().unwrap_or_default());

    let datetime = datetime_from_nums(date, time)?;

    Ok(PackedRecord {
        bar: Bar {
            instrument,
            datetime,
            open: doubles[0],
            high: doubles[1],
            low: doubles[2],
            close: doubles[3],
            volume: doubles[4] as i64,
            open_interest: doubles[5] as i64,
            resolution,
            interval: 1,
            quote: None,
        },
        hot: hot != 0,
    })
}

pub(crate) fn decode_name(bytes: &[u8]) -> SmolStr {
    let end = bytes.iter().position(|byte| *byte == 0).unwrap_or(bytes.len());
    SmolStr::new(String::from_utf8_lossy(&bytes[..end]).trim())
}

/// Build a timestamp from `YYYYMMDD` and `HHMMSS` integers.
pub(crate) fn datetime_from_nums(date: u32, time: u32) -> Result<DateTime<Utc>, DataError> {
    let naive_date = NaiveDate::from_ymd_opt(
        (date / 10000) as i32,
        (date % 10000) / 100,
        date % 100,
    )
    .ok_or_else(|| DataError::InvalidDateTime(date.to_string()))?;
    let naive_time = NaiveTime::from_hms_opt(time / 10000, (time % 10000) / 100, time % 100)
        .ok_or_else(|| DataError::InvalidDateTime(time.to_string()))?;

    Ok(naive_date.and_time(naive_time).and_utc())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn encode_record(
        instrument: &str,
        date: u32,
        time: u32,
        ohlc: [f64; 4],
        volume: f64,
        open_interest: f64,
        hot: u32,
    ) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(RECORD_LEN);
        let mut name = [0u8; 8];
        name[..instrument.len()].copy_from_slice(instrument.as_bytes());
        bytes.extend_from_slice(&name);
        bytes.extend_from_slice(&date.to_le_bytes());
        bytes.extend_from_slice(&time.to_le_bytes());
        for price in ohlc {
            bytes.extend_from_slice(&price.to_le_bytes());
        }
        bytes.extend_from_slice(&volume.to_le_bytes());
        bytes.extend_from_slice(&open_interest.to_le_bytes());
        bytes.extend_from_slice(&hot.to_le_bytes());
        assert_eq!(bytes.len(), RECORD_LEN);
        bytes
    }

    #[test]
    fn test_load_discovers_instrument_runs_and_hot_periods() {
        let mut file = NamedTempFile::new().unwrap();
        let records = [
            encode_record("rb2405", 20240102, 93000, [100.0, 101.0, 99.0, 100.5], 10.0, 50.0, 1),
            encode_record("rb2405", 20240102, 93100, [100.5, 101.5, 100.0, 101.0], 12.0, 52.0, 1),
            encode_record("rb2405", 20240102, 93200, [101.0, 101.2, 100.2, 100.4], 9.0, 52.0, 0),
            encode_record("rb2410", 20240102, 93000, [200.0, 201.0, 199.0, 200.5], 7.0, 20.0, 1),
        ];
        for record in &records {
            file.write_all(record).unwrap();
        }

        let streams = load_packed_streams(file.path(), Resolution::Minute).unwrap();
        assert_eq!(streams.len(), 2);

        assert_eq!(streams[0].instrument, "rb2405");
        assert_eq!(streams[0].bars.len(), 3);
        assert_eq!(streams[0].bars[0].volume, 10);
        assert_eq!(streams[0].tradable_periods.len(), 1);
        assert_eq!(
            streams[0].tradable_periods[0],
            ActivePeriod {
                begin: datetime_from_nums(20240102, 93000).unwrap(),
                end: datetime_from_nums(20240102, 93100).unwrap(),
            }
        );

        assert_eq!(streams[1].instrument, "rb2410");
        assert_eq!(streams[1].bars.len(), 1);
        assert_eq!(streams[1].tradable_periods.len(), 1);
    }

    #[test]
    fn test_truncated_record_is_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(&encode_record(
            "rb2405",
            20240102,
            93000,
            [100.0, 101.0, 99.0, 100.5],
            10.0,
            50.0,
            1,
        ))
        .unwrap();
        file.write_all(&[0u8; 10]).unwrap();

        let result = load_packed_streams(file.path(), Resolution::Minute);
        assert!(matches!(result, Err(DataError::TruncatedRecord { index: 1, .. })));
    }
}
