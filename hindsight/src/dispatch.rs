use crate::error::EngineError;
use chrono::{DateTime, Utc};
use hindsight_data::{bar::Bar, feed::BarFeed};
use tracing::debug;

/// Receives dispatched events. Bar handlers observe strictly non-decreasing
/// timestamps; within one timestamp, subjects dispatch in registration
/// order.
pub trait DispatchHandler {
    /// The dispatcher moved from one timestamp to a strictly later one.
    fn on_time_elapsed(
        &mut self,
        prev: DateTime<Utc>,
        next: DateTime<Utc>,
    ) -> Result<(), EngineError>;

    /// One subject produced its next bar.
    fn on_bar(&mut self, feed_id: u32, bar: Bar) -> Result<(), EngineError>;
}

/// N-way merge of bar feeds by timestamp.
///
/// Each loop turn peeks every subject, picks the smallest next datetime
/// (ties broken by registration order), emits a time-elapsed event when the
/// timeline advances, and dispatches every tied subject's bar in order.
/// Terminates when all subjects report EOF.
#[derive(Debug, Default)]
pub struct Dispatcher {
    subjects: Vec<BarFeed>,
    last_datetime: Option<DateTime<Utc>>,
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subject; dispatch order among equal timestamps follows
    /// registration order.
    pub fn register(&mut self, feed: BarFeed) -> usize {
        self.subjects.push(feed);
        self.subjects.len() - 1
    }

    pub fn subjects(&self) -> &[BarFeed] {
        &self.subjects
    }

    pub fn last_datetime(&self) -> Option<DateTime<Utc>> {
        self.last_datetime
    }

    /// Dispatch the next timestamp's bars. Returns false at EOF.
    pub fn step(&mut self, handler: &mut impl DispatchHandler) -> Result<bool, EngineError> {
        let Some(smallest) = self
            .subjects
            .iter()
            .filter_map(|subject| subject.peek_datetime())
            .min()
        else {
            return Ok(false);
        };

        if let Some(last) = self.last_datetime {
            if smallest > last {
                handler.on_time_elapsed(last, smallest)?;
            }
        }
        self.last_datetime = Some(smallest);

        for subject in &mut self.subjects {
            if subject.peek_datetime() == Some(smallest) {
                let feed_id = subject.id();
                let Some(bar) = subject.next_bar() else { continue };
                handler.on_bar(feed_id, bar)?;
            }
        }

        Ok(true)
    }

    /// Run to EOF.
    pub fn run(&mut self, handler: &mut impl DispatchHandler) -> Result<(), EngineError> {
        let mut steps = 0u64;
        while self.step(handler)? {
            steps += 1;
        }
        debug!(steps, "dispatcher exhausted");
        Ok(())
    }
}
