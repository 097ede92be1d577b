use crate::{
    bar::{Bar, Resolution},
    error::DataError,
    feed::{packed::decode_name, validate_stream, BarFeed},
};
use chrono::DateTime;
use std::path::Path;
use tracing::debug;

/// Byte length of one time-series record:
/// `instrument[32] + datetime i64 + OHLC f64 ×4 + volume i64 + open-interest i64`,
/// packed without padding, little-endian. Datetimes are milliseconds since
/// the Unix epoch.
pub const RECORD_LEN: usize = 32 + 8 + 4 * 8 + 8 + 8;

/// Load a time-series binary file into per-instrument-run feeds.
pub fn load_tseries_feeds(
    path: impl AsRef<Path>,
    resolution: Resolution,
    interval: u32,
) -> Result<Vec<BarFeed>, DataError> {
    let path = path.as_ref();
    let data = std::fs::read(path)?;
    let file = path.display().to_string();

    let mut runs: Vec<Vec<Bar>> = Vec::new();

    for (index, chunk) in data.chunks(RECORD_LEN).enumerate() {
        if chunk.len() < RECORD_LEN {
            return Err(DataError::TruncatedRecord {
                file,
                index,
                len: chunk.len(),
                expected: RECORD_LEN,
            });
        }

        let bar = decode_record(chunk, resolution, interval)?;

        let new_run = runs
            .last()
            .and_then(|bars| bars.last())
            .map(|last| last.instrument != bar.instrument)
            .unwrap_or(true);
        if new_run {
            runs.push(Vec::new());
        }
        runs.last_mut().unwrap_or_else(|| unreachable!()).push(bar);
    }

    let mut feeds = Vec::with_capacity(runs.len());
    for bars in runs {
        validate_stream(&file, &bars)?;
        let instrument = bars[0].instrument.clone();
        feeds.push(BarFeed::from_bars(instrument, resolution, interval, bars)?);
    }

    debug!(file = %file, feeds = feeds.len(), "loaded time-series bar file");

    Ok(feeds)
}

fn decode_record(chunk: &[u8], resolution: Resolution, interval: u32) -> Result<Bar, DataError> {
    let instrument = decode_name(&chunk[0..32]);
    let millis = i64::from_le_bytes(chunk[32..40].try_into().unwrap_or_default());
    let datetime = DateTime::from_timestamp_millis(millis)
        .ok_or_else(|| DataError::InvalidDateTime(millis.to_string()))?;

    let mut doubles = [0.0f64; 4];
    for (slot, double) in doubles.iter_mut().enumerate() {
        let offset = 40 + slot * 8;
        *double = f64::from_le_bytes(chunk[offset..offset + 8].try_into().unwrap_or_default());
    }
    let volume = i64::from_le_bytes(chunk[72..80].try_into().unwrap_or_default());
    let open_interest = i64::from_le_bytes(chunk[80..88].try_into().unwrap_or_default());

    Ok(Bar {
        instrument,
        datetime,
        open: doubles[0],
        high: doubles[1],
        low: doubles[2],
        close: doubles[3],
        volume,
        open_interest,
        resolution,
        interval,
        quote: None,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn encode_record(
        instrument: &str,
        millis: i64,
        ohlc: [f64; 4],
        volume: i64,
        open_interest: i64,
    ) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(RECORD_LEN);
        let mut name = [0u8; 32];
        name[..instrument.len()].copy_from_slice(instrument.as_bytes());
        bytes.extend_from_slice(&name);
        bytes.extend_from_slice(&millis.to_le_bytes());
        for price in ohlc {
            bytes.extend_from_slice(&price.to_le_bytes());
        }
        bytes.extend_from_slice(&volume.to_le_bytes());
        bytes.extend_from_slice(&open_interest.to_le_bytes());
        assert_eq!(bytes.len(), RECORD_LEN);
        bytes
    }

    #[test]
    fn test_load_time_series_file() {
        let mut file = NamedTempFile::new().unwrap();
        let base_millis = 1_704_188_400_000; // 2024-01-02T09:00:00Z
        let records = [
            encode_record("IF2403", base_millis, [3500.0, 3510.0, 3495.0, 3505.0], 120, 8000),
            encode_record(
                "IF2403",
                base_millis + 60_000,
                [3505.0, 3520.0, 3500.0, 3515.0],
                90,
                8050,
            ),
        ];
        for record in &records {
            file.write_all(record).unwrap();
        }

        let mut feeds = load_tseries_feeds(file.path(), Resolution::Minute, 1).unwrap();
        assert_eq!(feeds.len(), 1);

        let feed = &mut feeds[0];
        assert_eq!(feed.instrument(), "IF2403");
        assert_eq!(feed.len(), 2);

        let first = feed.next_bar().unwrap();
        assert_eq!(first.open, 3500.0);
        assert_eq!(first.volume, 120);
        assert_eq!(first.datetime, DateTime::from_timestamp_millis(base_millis).unwrap());
    }
}
