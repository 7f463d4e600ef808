//! Bounded per-player sample streams.

use std::collections::{HashMap, HashSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use caissa_models::Sample;

/// Fixed-capacity, time-ascending sample history for one player.
///
/// Oldest samples are evicted first once the capacity is reached. The stream
/// outlives its monitor; `last_touch` feeds the idle-stream sweep.
#[derive(Debug, Clone)]
pub struct SampleStream {
    samples: VecDeque<Sample>,
    capacity: usize,
    last_touch: DateTime<Utc>,
}

impl SampleStream {
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::with_capacity(capacity.min(1024)),
            capacity,
            last_touch: Utc::now(),
        }
    }

    /// Append a sample, evicting the oldest beyond capacity.
    ///
    /// Rejects samples that do not advance the stream's time axis.
    pub fn push(&mut self, sample: Sample) -> bool {
        if let Some(last) = self.samples.back() {
            if sample.ts <= last.ts {
                return false;
            }
        }
        self.samples.push_back(sample);
        while self.samples.len() > self.capacity {
            self.samples.pop_front();
        }
        self.last_touch = Utc::now();
        true
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Most recent sample, if any.
    pub fn latest(&self) -> Option<&Sample> {
        self.samples.back()
    }

    /// The last `n` samples in time order (fewer if the stream is shorter).
    pub fn recent(&self, n: usize) -> Vec<Sample> {
        let skip = self.samples.len().saturating_sub(n);
        self.samples.iter().skip(skip).cloned().collect()
    }

    pub fn last_touch(&self) -> DateTime<Utc> {
        self.last_touch
    }
}

/// All sample streams, keyed by entity id.
#[derive(Debug, Default)]
pub struct StreamStore {
    streams: HashMap<String, SampleStream>,
    capacity: usize,
}

impl StreamStore {
    /// `capacity` is the per-stream sample cap (`max_data_points`).
    pub fn new(capacity: usize) -> Self {
        Self {
            streams: HashMap::new(),
            capacity,
        }
    }

    /// Create the stream for an entity if absent. Idempotent.
    pub fn ensure(&mut self, entity_id: &str) -> &mut SampleStream {
        let capacity = self.capacity;
        self.streams
            .entry(entity_id.to_string())
            .or_insert_with(|| SampleStream::new(capacity))
    }

    /// Append a sample to an entity's stream, creating it if absent.
    /// Returns `false` when the sample violates timestamp monotonicity.
    pub fn record(&mut self, entity_id: &str, sample: Sample) -> bool {
        self.ensure(entity_id).push(sample)
    }

    pub fn get(&self, entity_id: &str) -> Option<&SampleStream> {
        self.streams.get(entity_id)
    }

    pub fn stream_count(&self) -> usize {
        self.streams.len()
    }

    /// Drop streams that have no monitor and have been idle past `ttl`.
    /// Returns the evicted entity ids.
    pub fn sweep_idle(
        &mut self,
        ttl: Duration,
        now: DateTime<Utc>,
        monitored: &HashSet<String>,
    ) -> Vec<String> {
        let expired: Vec<String> = self
            .streams
            .iter()
            .filter(|(id, stream)| {
                !monitored.contains(*id) && now - stream.last_touch() > ttl
            })
            .map(|(id, _)| id.clone())
            .collect();
        for id in &expired {
            self.streams.remove(id);
        }
        expired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_at(secs: u32, value: f64) -> Sample {
        let ts = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap() + Duration::seconds(secs as i64);
        Sample::new(ts, value)
    }

    #[test]
    fn test_capacity_evicts_oldest_first() {
        let mut stream = SampleStream::new(3);
        for i in 0..5 {
            assert!(stream.push(sample_at(i, 1000.0 + i as f64)));
        }
        assert_eq!(stream.len(), 3);
        let values: Vec<f64> = stream.recent(3).iter().map(|s| s.value).collect();
        assert_eq!(values, vec![1002.0, 1003.0, 1004.0]);
    }

    #[test]
    fn test_length_never_exceeds_capacity() {
        let mut store = StreamStore::new(10);
        for i in 0..50 {
            store.record("magnus", sample_at(i, 2800.0));
        }
        assert_eq!(store.get("magnus").unwrap().len(), 10);
    }

    #[test]
    fn test_rejects_non_monotonic_timestamps() {
        let mut stream = SampleStream::new(10);
        assert!(stream.push(sample_at(10, 2800.0)));
        assert!(!stream.push(sample_at(10, 2801.0)));
        assert!(!stream.push(sample_at(5, 2802.0)));
        assert_eq!(stream.len(), 1);
    }

    #[test]
    fn test_recent_shorter_than_requested() {
        let mut stream = SampleStream::new(10);
        stream.push(sample_at(0, 1.0));
        stream.push(sample_at(1, 2.0));
        assert_eq!(stream.recent(5).len(), 2);
    }

    #[test]
    fn test_sweep_spares_monitored_streams() {
        let mut store = StreamStore::new(10);
        store.record("magnus", sample_at(0, 2800.0));
        store.record("hikaru", sample_at(0, 2780.0));

        let mut monitored = HashSet::new();
        monitored.insert("magnus".to_string());

        let future = Utc::now() + Duration::hours(2);
        let evicted = store.sweep_idle(Duration::hours(1), future, &monitored);
        assert_eq!(evicted, vec!["hikaru".to_string()]);
        assert!(store.get("magnus").is_some());
        assert!(store.get("hikaru").is_none());
    }
}
