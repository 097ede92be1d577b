use crate::{
    bar::Resolution,
    contract::Contract,
    error::DataError,
    feed::{csv::load_csv_feed, packed::load_packed_streams, tseries::load_tseries_feeds, BarFeed},
};
use smol_str::SmolStr;
use std::path::Path;
use tracing::info;

/// On-disk bar file formats the storage can ingest.
#[derive(Debug, Copy, Clone, Eq, PartialEq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FileFormat {
    Csv,
    Packed,
    TimeSeries,
}

impl std::str::FromStr for FileFormat {
    type Err = DataError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.to_ascii_lowercase().as_str() {
            "csv" => Ok(FileFormat::Csv),
            "bin" | "packed" => Ok(FileFormat::Packed),
            "ts" | "time_series" => Ok(FileFormat::TimeSeries),
            other => Err(DataError::UnknownFormat(other.to_string())),
        }
    }
}

/// Owns every loaded data stream for one run. Executors obtain cheap feed
/// clones (shared bars, fresh cursors) so parallel replays never duplicate
/// the underlying data.
#[derive(Debug, Default)]
pub struct DataStorage {
    streams: Vec<BarFeed>,
}

impl DataStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a prototype feed. Two feeds under the same
    /// `(name, resolution, interval)` key are a configuration error.
    pub fn register(&mut self, mut feed: BarFeed) -> Result<u32, DataError> {
        let duplicate = self.streams.iter().any(|existing| {
            existing.instrument() == feed.instrument()
                && existing.resolution() == feed.resolution()
                && existing.interval() == feed.interval()
        });
        if duplicate {
            return Err(DataError::DuplicateStream {
                name: feed.instrument().clone(),
                resolution: feed.resolution(),
                interval: feed.interval(),
            });
        }

        let id = self.streams.len() as u32;
        feed.set_id(id);
        info!(
            instrument = %feed.instrument(),
            resolution = %feed.resolution(),
            bars = feed.len(),
            id,
            "registered data stream"
        );
        self.streams.push(feed);
        Ok(id)
    }

    /// Load a bar file and register the streams it contains. Returns the ids
    /// assigned to the new streams.
    pub fn load_file(
        &mut self,
        path: impl AsRef<Path>,
        format: FileFormat,
        name: impl Into<SmolStr>,
        resolution: Resolution,
        contract: Contract,
    ) -> Result<Vec<u32>, DataError> {
        let mut ids = Vec::new();
        match format {
            FileFormat::Csv => {
                let mut feed = load_csv_feed(path, name, resolution)?;
                feed.set_contract(contract);
                ids.push(self.register(feed)?);
            }
            FileFormat::Packed => {
                for stream in load_packed_streams(path, resolution)? {
                    let mut feed = stream.into_feed(resolution, 1)?;
                    feed.set_contract(contract.clone());
                    ids.push(self.register(feed)?);
                }
            }
            FileFormat::TimeSeries => {
                for mut feed in load_tseries_feeds(path, resolution, 1)? {
                    feed.set_contract(contract.clone());
                    ids.push(self.register(feed)?);
                }
            }
        }
        Ok(ids)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    pub fn stream(&self, id: u32) -> Option<&BarFeed> {
        self.streams.get(id as usize)
    }

    /// Clone every registered feed for a new executor replay.
    pub fn clone_feeds(&self) -> Vec<BarFeed> {
        self.streams.iter().cloned().collect()
    }

    /// Contract table gathered from all registered streams.
    pub fn contracts(&self) -> Vec<Contract> {
        self.streams
            .iter()
            .map(|feed| {
                let mut contract = feed.contract().clone();
                if contract.instrument.is_empty() {
                    contract.instrument = feed.instrument().clone();
                }
                contract
            })
            .collect()
    }
}
