//! Query latency accumulators fed from explain results.
//!
//! Flushing is disabled unless [`PerfConfig::persist`] is set: with the default configuration a
//! flush leaves the accumulators untouched and only logs that it was skipped. Records handed out
//! by persisting flushes are also retained in memory for [`PerfAggregator::history`].

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::backend::ExplainResult;
use crate::logging::{LinkEvent, Logger};

pub const AGGREGATE_KEY: &str = "aggregate";
pub const DEFAULT_SLOW_QUERY_MILLIS: u64 = 300;
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;
pub const DEFAULT_HISTORY_HOURS: i64 = 24;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerfConfig {
    /// Latency above which a query is logged as slow.
    pub slow_query_millis: u64,
    /// Whether `flush` drains and resets the accumulators.
    pub persist: bool,
    /// Flushed records kept for `history`; the oldest are dropped first.
    pub history_capacity: usize,
}

impl Default for PerfConfig {
    fn default() -> Self {
        Self {
            slow_query_millis: DEFAULT_SLOW_QUERY_MILLIS,
            persist: false,
            history_capacity: DEFAULT_HISTORY_CAPACITY,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PerfStats {
    pub collection: String,
    pub total: u64,
    pub min: u64,
    pub max: u64,
    pub count: u64,
}

impl PerfStats {
    fn new(collection: &str) -> Self {
        Self {
            collection: collection.to_string(),
            total: 0,
            min: 0,
            max: 0,
            count: 0,
        }
    }

    fn observe(&mut self, millis: u64) {
        self.min = if self.count == 0 { millis } else { self.min.min(millis) };
        self.max = self.max.max(millis);
        self.total += millis;
        self.count += 1;
    }

    pub fn mean(&self) -> Option<f64> {
        (self.count > 0).then(|| self.total as f64 / self.count as f64)
    }
}

/// Accumulator snapshot as handed out by a flush.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerfRecord {
    #[serde(flatten)]
    pub stats: PerfStats,
    pub timestamp: DateTime<Utc>,
}

pub struct PerfAggregator {
    config: PerfConfig,
    logger: Arc<dyn Logger>,
    stats: Mutex<BTreeMap<String, PerfStats>>,
    history: Mutex<Vec<PerfRecord>>,
}

impl PerfAggregator {
    pub fn new(config: PerfConfig, logger: Arc<dyn Logger>) -> Self {
        Self {
            config,
            logger,
            stats: Mutex::new(BTreeMap::new()),
            history: Mutex::new(Vec::new()),
        }
    }

    pub fn config(&self) -> PerfConfig {
        self.config
    }

    /// Log the query and fold its latency into the collection and aggregate accumulators.
    pub fn record(&self, collection: &str, selector: &str, explain: &ExplainResult) {
        self.logger.log(LinkEvent::QueryProfiled {
            collection: collection.to_string(),
            selector: selector.to_string(),
            millis: explain.millis,
            returned: explain.n,
            scanned: explain.nscanned,
            slow: explain.millis > self.config.slow_query_millis,
        });

        let mut stats = self.stats.lock();
        stats
            .entry(collection.to_string())
            .or_insert_with(|| PerfStats::new(collection))
            .observe(explain.millis);
        stats
            .entry(AGGREGATE_KEY.to_string())
            .or_insert_with(|| PerfStats::new(AGGREGATE_KEY))
            .observe(explain.millis);
    }

    pub fn stats(&self, collection: &str) -> Option<PerfStats> {
        self.stats.lock().get(collection).cloned()
    }

    pub fn aggregate(&self) -> Option<PerfStats> {
        self.stats(AGGREGATE_KEY)
    }

    pub fn snapshot(&self) -> Vec<PerfStats> {
        self.stats.lock().values().cloned().collect()
    }

    /// Drain the accumulators into timestamped records. Returns `None` when persistence is off.
    pub fn flush(&self) -> Option<Vec<PerfRecord>> {
        if !self.config.persist {
            let pending = self.stats.lock().len();
            self.logger.log(LinkEvent::PerfFlushSkipped { pending });
            return None;
        }

        let timestamp = Utc::now();
        let drained = std::mem::take(&mut *self.stats.lock());
        let records: Vec<PerfRecord> = drained
            .into_values()
            .map(|stats| PerfRecord { stats, timestamp })
            .collect();
        self.logger.log(LinkEvent::PerfFlushed { records: records.len() });
        self.retain(&records);
        Some(records)
    }

    fn retain(&self, records: &[PerfRecord]) {
        let mut history = self.history.lock();
        history.extend_from_slice(records);
        let excess = history.len().saturating_sub(self.config.history_capacity);
        history.drain(..excess);
    }

    /// Flushed records of `collection` (the aggregate when `None`) stamped after `since`,
    /// oldest first.
    pub fn history(&self, since: DateTime<Utc>, collection: Option<&str>) -> Vec<PerfRecord> {
        let collection = collection.unwrap_or(AGGREGATE_KEY);
        self.history
            .lock()
            .iter()
            .filter(|record| record.stats.collection == collection && record.timestamp > since)
            .cloned()
            .collect()
    }

    /// [`history`](Self::history) over the last `hours` hours, 24 when `None`.
    pub fn recent(&self, hours: Option<i64>, collection: Option<&str>) -> Vec<PerfRecord> {
        let window = TimeDelta::try_hours(hours.unwrap_or(DEFAULT_HISTORY_HOURS)).unwrap_or(TimeDelta::MAX);
        let since = Utc::now().checked_sub_signed(window).unwrap_or(DateTime::<Utc>::MIN_UTC);
        self.history(since, collection)
    }
}
