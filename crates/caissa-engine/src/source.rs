//! Data source contract and the simulated stand-in.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use caissa_models::Sample;

/// External data source for player performance samples.
///
/// Implementations must return monotonically increasing timestamps per
/// entity. Errors are caught per entity by the sampling cycle and reported as
/// `monitor:error` events.
#[async_trait]
pub trait SampleSource: Send + Sync {
    async fn fetch_sample(&self, entity_id: &str) -> anyhow::Result<Sample>;

    /// Source name for logging.
    fn name(&self) -> &'static str {
        "source"
    }
}

/// Seeded random-walk source for the demo binary and tests.
///
/// Each entity gets an independent walk around a base rating, with a win rate
/// that tracks the walk's recent direction.
pub struct SimulatedSource {
    state: Mutex<SimState>,
    base_rating: f64,
}

struct SimState {
    rng: StdRng,
    walks: HashMap<String, WalkState>,
}

struct WalkState {
    value: f64,
    last_ts: DateTime<Utc>,
}

impl SimulatedSource {
    pub fn new(seed: u64) -> Self {
        Self {
            state: Mutex::new(SimState {
                rng: StdRng::seed_from_u64(seed),
                walks: HashMap::new(),
            }),
            base_rating: 2400.0,
        }
    }

    pub fn with_base_rating(mut self, rating: f64) -> Self {
        self.base_rating = rating;
        self
    }
}

#[async_trait]
impl SampleSource for SimulatedSource {
    async fn fetch_sample(&self, entity_id: &str) -> anyhow::Result<Sample> {
        let mut state = self.state.lock().expect("simulated source state poisoned");

        let base = self.base_rating;
        let step = state.rng.random_range(-8.0..8.0);
        let games = state.rng.random_range(0..5u32);
        let jitter = state.rng.random_range(-0.05..0.05);

        let now = Utc::now();
        let walk = state
            .walks
            .entry(entity_id.to_string())
            .or_insert(WalkState {
                value: base,
                last_ts: now - Duration::milliseconds(1),
            });

        walk.value += step;
        // Keep timestamps strictly increasing even under sub-millisecond polling.
        let ts = if now > walk.last_ts {
            now
        } else {
            walk.last_ts + Duration::milliseconds(1)
        };
        walk.last_ts = ts;

        let drift = (walk.value - base) / base;
        let win_rate = (0.5 + drift * 4.0 + jitter).clamp(0.0, 1.0);

        Ok(Sample::new(ts, walk.value)
            .with_win_rate(win_rate)
            .with_games(games))
    }

    fn name(&self) -> &'static str {
        "simulated"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_timestamps_strictly_increase() {
        let source = SimulatedSource::new(7);
        let a = source.fetch_sample("magnus").await.unwrap();
        let b = source.fetch_sample("magnus").await.unwrap();
        let c = source.fetch_sample("magnus").await.unwrap();
        assert!(a.ts < b.ts);
        assert!(b.ts < c.ts);
    }

    #[tokio::test]
    async fn test_entities_walk_independently() {
        let source = SimulatedSource::new(7);
        let magnus = source.fetch_sample("magnus").await.unwrap();
        let hikaru = source.fetch_sample("hikaru").await.unwrap();
        assert!(magnus.aux.win_rate.is_some());
        assert!(hikaru.aux.win_rate.is_some());
        // Both start from the base rating, then diverge per-entity.
        assert!((magnus.value - 2400.0).abs() < 50.0);
        assert!((hikaru.value - 2400.0).abs() < 50.0);
    }
}
