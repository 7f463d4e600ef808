//! Sample types for player performance streams.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Auxiliary per-sample fields reported by the data source alongside the
/// primary rating value.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SampleAux {
    /// Games played in the sampling window.
    #[serde(default)]
    pub games: u32,
    /// Win rate over the sampling window, in `[0.0, 1.0]`.
    /// `None` when the source did not report it; never fabricated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub win_rate: Option<f64>,
}

/// One performance observation for a tracked player.
///
/// Streams of samples are time-ascending; the data source contract requires
/// monotonically increasing timestamps per entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    /// Observation time.
    pub ts: DateTime<Utc>,
    /// Primary performance value (rating).
    pub value: f64,
    /// Auxiliary fields (games played, win rate).
    #[serde(default)]
    pub aux: SampleAux,
}

impl Sample {
    /// Create a sample with empty auxiliary fields.
    pub fn new(ts: DateTime<Utc>, value: f64) -> Self {
        Self {
            ts,
            value,
            aux: SampleAux::default(),
        }
    }

    /// Attach a win rate to the sample.
    pub fn with_win_rate(mut self, win_rate: f64) -> Self {
        self.aux.win_rate = Some(win_rate);
        self
    }

    /// Attach a games-played count to the sample.
    pub fn with_games(mut self, games: u32) -> Self {
        self.aux.games = games;
        self
    }
}
