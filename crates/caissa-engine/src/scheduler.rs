//! The monitoring engine: cycle scheduling and orchestration.
//!
//! `MonitorEngine` owns the registry, the stream store, the alert engine, and
//! the event bus, and drives the two periodic cycles:
//!
//! - **sampling** (default 5s): fetch one sample per active monitor, run the
//!   gated analytics, evaluate alert thresholds, emit one batched
//!   `data:update` per cycle;
//! - **anomaly scan** (default 30s): anomaly detection over recent history
//!   per active monitor, one aggregated `anomalies:detected` event, plus the
//!   idle-stream TTL sweep.
//!
//! Each cycle body is awaited inside its own timer task and missed ticks are
//! skipped, so a cycle that overruns its interval delays its next run instead
//! of overlapping itself. Per-entity failures inside a cycle are caught,
//! counted, and reported as `monitor:error`; the cycle continues with the
//! remaining entities.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::sync::Mutex as StdMutex;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde::Serialize;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use caissa_models::{
    EntityAnalysis, EntityAnomalies, Forecast, MonitorOptions, Sample, Severity, Thresholds,
};

use crate::alerts::AlertEngine;
use crate::analytics::{Analytics, VolatilityOptions};
use crate::error::EngineError;
use crate::events::{EngineEvent, EventBus};
use crate::registry::MonitorRegistry;
use crate::source::SampleSource;
use crate::store::StreamStore;

/// Engine tuning knobs. Defaults mirror the production cadence.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Per-stream sample cap.
    pub max_data_points: usize,
    pub sample_interval: Duration,
    pub anomaly_interval: Duration,
    /// Trend looks at the last `trend_window` samples, needs `trend_min`.
    pub trend_window: usize,
    pub trend_min: usize,
    /// Volatility sliding window and its minimum.
    pub volatility_window: usize,
    pub volatility_min: usize,
    /// Forecast fit window, horizon, and minimum.
    pub forecast_window: usize,
    pub forecast_horizon: usize,
    pub forecast_min: usize,
    /// Anomaly scan window and its minimum.
    pub anomaly_window: usize,
    pub anomaly_min: usize,
    /// Cap on anomalies reported per entity per scan.
    pub max_anomalies_per_entity: usize,
    /// Idle streams without a monitor are evicted after this long.
    pub stream_ttl: Duration,
    pub default_thresholds: Thresholds,
    pub bus_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_data_points: 1000,
            sample_interval: Duration::from_secs(5),
            anomaly_interval: Duration::from_secs(30),
            trend_window: 20,
            trend_min: 10,
            volatility_window: 100,
            volatility_min: 30,
            forecast_window: 100,
            forecast_horizon: 10,
            forecast_min: 50,
            anomaly_window: 100,
            anomaly_min: 20,
            max_anomalies_per_entity: 5,
            stream_ttl: Duration::from_secs(3600),
            default_thresholds: Thresholds::default(),
            bus_capacity: 1024,
        }
    }
}

#[derive(Debug, Default)]
struct EngineCounters {
    sampling_cycles: AtomicU64,
    anomaly_cycles: AtomicU64,
    samples_recorded: AtomicU64,
    entity_errors: AtomicU64,
}

/// Point-in-time engine metrics served via `metrics:get`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineMetricsSnapshot {
    pub uptime_secs: u64,
    pub sampling_cycles: u64,
    pub anomaly_cycles: u64,
    pub samples_recorded: u64,
    pub entity_errors: u64,
    pub alerts_generated: u64,
    pub alerts_retained: usize,
    pub monitors: usize,
    pub streams: usize,
}

/// The monitoring scheduler and its owned state.
pub struct MonitorEngine {
    cfg: EngineConfig,
    registry: RwLock<MonitorRegistry>,
    store: RwLock<StreamStore>,
    alerts: AlertEngine,
    source: Arc<dyn SampleSource>,
    analytics: Arc<dyn Analytics>,
    bus: EventBus,
    counters: EngineCounters,
    started: Instant,
    shutdown: watch::Sender<bool>,
    tasks: StdMutex<Vec<JoinHandle<()>>>,
}

impl MonitorEngine {
    pub fn new(
        cfg: EngineConfig,
        source: Arc<dyn SampleSource>,
        analytics: Arc<dyn Analytics>,
    ) -> Self {
        let bus = EventBus::new(cfg.bus_capacity);
        let (shutdown, _) = watch::channel(false);
        Self {
            registry: RwLock::new(MonitorRegistry::new(cfg.default_thresholds)),
            store: RwLock::new(StreamStore::new(cfg.max_data_points)),
            alerts: AlertEngine::new(bus.clone()),
            source,
            analytics,
            bus,
            counters: EngineCounters::default(),
            started: Instant::now(),
            shutdown,
            tasks: StdMutex::new(Vec::new()),
            cfg,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn alerts(&self) -> &AlertEngine {
        &self.alerts
    }

    // =========================================================================
    // Monitor lifecycle
    // =========================================================================

    /// Register (or refresh) a monitor and trigger one immediate sample pass.
    ///
    /// The stream is created if absent; re-adding an existing monitor merges
    /// the new options and reactivates it. Returns `true` when the monitor
    /// was newly created. A failing immediate fetch does not fail the add;
    /// it is reported as `monitor:error` like any cycle failure.
    pub async fn add_monitor(&self, entity_id: &str, opts: &MonitorOptions) -> bool {
        let created = {
            let mut registry = self.registry.write().await;
            self.store.write().await.ensure(entity_id);
            registry.insert(entity_id, opts)
        };
        info!(entity = entity_id, created, "monitor added");
        self.bus.publish(EngineEvent::MonitorAdded {
            entity_id: entity_id.to_string(),
            ts: Utc::now(),
        });

        if let Err(err) = self.sample_entity(entity_id).await {
            self.report_entity_error(entity_id, &err);
        }
        created
    }

    /// Remove the monitor only; the entity's stream is retained and reused if
    /// the monitor is re-added before the TTL sweep reclaims it.
    pub async fn remove_monitor(&self, entity_id: &str) -> bool {
        let removed = self.registry.write().await.remove(entity_id);
        if removed {
            info!(entity = entity_id, "monitor removed");
            self.bus.publish(EngineEvent::MonitorRemoved {
                entity_id: entity_id.to_string(),
                ts: Utc::now(),
            });
        }
        removed
    }

    pub async fn is_monitored(&self, entity_id: &str) -> bool {
        self.registry.read().await.contains(entity_id)
    }

    pub async fn monitored_entities(&self) -> Vec<String> {
        self.registry.read().await.active()
    }

    /// Bump the subscriber refcount for demand-driven activation.
    pub async fn retain_entity(&self, entity_id: &str) {
        self.registry.write().await.retain_entity(entity_id);
    }

    /// Release one subscriber reference; returns the remaining count.
    pub async fn release_entity(&self, entity_id: &str) -> usize {
        self.registry.write().await.release_entity(entity_id)
    }

    pub async fn subscriber_count(&self, entity_id: &str) -> usize {
        self.registry.read().await.subscriber_count(entity_id)
    }

    /// Append a sample directly (bypassing the data source).
    pub async fn record_sample(&self, entity_id: &str, sample: Sample) -> Result<(), EngineError> {
        if self.store.write().await.record(entity_id, sample) {
            self.counters.samples_recorded.fetch_add(1, Ordering::Relaxed);
            Ok(())
        } else {
            Err(EngineError::NonMonotonicSample(entity_id.to_string()))
        }
    }

    pub async fn sample_count(&self, entity_id: &str) -> usize {
        self.store
            .read()
            .await
            .get(entity_id)
            .map(|s| s.len())
            .unwrap_or(0)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// On-demand forecast; requires the forecast minimum sample count.
    pub async fn forecast(
        &self,
        entity_id: &str,
        horizon: Option<usize>,
    ) -> Result<Forecast, EngineError> {
        let series = {
            let store = self.store.read().await;
            let stream = store
                .get(entity_id)
                .ok_or_else(|| EngineError::UnknownEntity(entity_id.to_string()))?;
            if stream.len() < self.cfg.forecast_min {
                return Err(EngineError::InsufficientSamples {
                    entity: entity_id.to_string(),
                    have: stream.len(),
                    need: self.cfg.forecast_min,
                });
            }
            stream.recent(self.cfg.forecast_window)
        };
        let horizon = horizon.unwrap_or(self.cfg.forecast_horizon);
        self.analytics
            .generate_forecast(&series, horizon)
            .await
            .map_err(|e| EngineError::Analytics(e.to_string()))
    }

    pub async fn metrics_snapshot(&self) -> EngineMetricsSnapshot {
        EngineMetricsSnapshot {
            uptime_secs: self.started.elapsed().as_secs(),
            sampling_cycles: self.counters.sampling_cycles.load(Ordering::Relaxed),
            anomaly_cycles: self.counters.anomaly_cycles.load(Ordering::Relaxed),
            samples_recorded: self.counters.samples_recorded.load(Ordering::Relaxed),
            entity_errors: self.counters.entity_errors.load(Ordering::Relaxed),
            alerts_generated: self.alerts.total_generated(),
            alerts_retained: self.alerts.len(),
            monitors: self.registry.read().await.len(),
            streams: self.store.read().await.stream_count(),
        }
    }

    // =========================================================================
    // Cycles
    // =========================================================================

    /// One sampling pass over every active monitor.
    pub async fn run_sampling_cycle(&self) {
        let cycle_start = Instant::now();
        let entities = self.registry.read().await.active();
        let mut updates = Vec::with_capacity(entities.len());

        for entity_id in entities {
            match self.sample_entity(&entity_id).await {
                Ok(analysis) => updates.push(analysis),
                Err(err) => self.report_entity_error(&entity_id, &err),
            }
        }

        self.counters.sampling_cycles.fetch_add(1, Ordering::Relaxed);
        let cycle_ms = cycle_start.elapsed().as_millis() as u64;
        debug!(updates = updates.len(), cycle_ms, "sampling cycle complete");
        self.bus.publish(EngineEvent::DataUpdate {
            updates,
            cycle_ms,
            ts: Utc::now(),
        });
    }

    /// One anomaly scan over every active monitor with enough history,
    /// followed by the idle-stream sweep.
    pub async fn run_anomaly_cycle(&self) {
        let entities = self.registry.read().await.active();
        let mut entries: Vec<EntityAnomalies> = Vec::new();

        for entity_id in entities {
            let series = {
                let store = self.store.read().await;
                match store.get(&entity_id) {
                    Some(stream) if stream.len() >= self.cfg.anomaly_min => {
                        stream.recent(self.cfg.anomaly_window)
                    }
                    _ => continue,
                }
            };
            let cutoff = self.registry.read().await.thresholds_for(&entity_id).anomaly_score;

            match self.analytics.detect_anomalies(&series, cutoff).await {
                Ok(anomalies) if !anomalies.is_empty() => {
                    let mut ranked = anomalies;
                    ranked.sort_by(|a, b| {
                        b.score
                            .partial_cmp(&a.score)
                            .unwrap_or(std::cmp::Ordering::Equal)
                    });
                    let max_score = ranked[0].score;
                    ranked.truncate(self.cfg.max_anomalies_per_entity);
                    entries.push(EntityAnomalies {
                        entity_id,
                        anomalies: ranked,
                        max_score,
                        severity: Severity::from_anomaly_score(max_score),
                    });
                }
                Ok(_) => {}
                Err(err) => {
                    let err = EngineError::Analytics(err.to_string());
                    self.report_entity_error(&entity_id, &err);
                }
            }
        }

        self.counters.anomaly_cycles.fetch_add(1, Ordering::Relaxed);
        if !entries.is_empty() {
            let severity = entries
                .iter()
                .map(|e| e.severity)
                .max()
                .unwrap_or(Severity::Low);
            info!(entities = entries.len(), %severity, "anomalies detected");
            self.bus.publish(EngineEvent::AnomaliesDetected {
                entries,
                severity,
                ts: Utc::now(),
            });
        }

        self.sweep_idle_streams().await;
    }

    /// Fetch, record, analyze, and alert for one entity.
    async fn sample_entity(&self, entity_id: &str) -> Result<EntityAnalysis, EngineError> {
        let monitor = self
            .registry
            .read()
            .await
            .get(entity_id)
            .cloned()
            .ok_or_else(|| EngineError::UnknownEntity(entity_id.to_string()))?;

        let sample = self
            .source
            .fetch_sample(entity_id)
            .await
            .map_err(|e| EngineError::Source(e.to_string()))?;

        self.record_sample(entity_id, sample.clone()).await?;

        let (len, trend_series, vol_series, forecast_series) = {
            let store = self.store.read().await;
            let stream = store
                .get(entity_id)
                .ok_or_else(|| EngineError::UnknownEntity(entity_id.to_string()))?;
            (
                stream.len(),
                stream.recent(self.cfg.trend_window),
                stream.recent(self.cfg.volatility_window),
                stream.recent(self.cfg.forecast_window),
            )
        };

        // Each analysis is gated independently; below its minimum the field
        // is absent, not an error.
        let trend = if len >= self.cfg.trend_min {
            Some(
                self.analytics
                    .analyze_trend(&trend_series)
                    .await
                    .map_err(|e| EngineError::Analytics(e.to_string()))?,
            )
        } else {
            None
        };
        let volatility = if len >= self.cfg.volatility_min {
            Some(
                self.analytics
                    .analyze_volatility(
                        &vol_series,
                        VolatilityOptions {
                            window: self.cfg.volatility_window,
                        },
                    )
                    .await
                    .map_err(|e| EngineError::Analytics(e.to_string()))?,
            )
        } else {
            None
        };
        let forecast = if len >= self.cfg.forecast_min {
            Some(
                self.analytics
                    .generate_forecast(&forecast_series, self.cfg.forecast_horizon)
                    .await
                    .map_err(|e| EngineError::Analytics(e.to_string()))?,
            )
        } else {
            None
        };

        let analysis = EntityAnalysis {
            entity_id: entity_id.to_string(),
            sample,
            trend,
            volatility,
            forecast,
        };

        if monitor.config.alerts_enabled {
            let alerts = AlertEngine::evaluate(entity_id, &analysis, &monitor.thresholds);
            self.alerts.record(alerts);
        }

        self.registry
            .write()
            .await
            .set_last_check(entity_id, Utc::now());

        Ok(analysis)
    }

    async fn sweep_idle_streams(&self) {
        let monitored: HashSet<String> = self
            .registry
            .read()
            .await
            .entity_ids()
            .into_iter()
            .collect();
        let ttl = chrono::Duration::from_std(self.cfg.stream_ttl)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let evicted = self
            .store
            .write()
            .await
            .sweep_idle(ttl, Utc::now(), &monitored);
        if !evicted.is_empty() {
            debug!(count = evicted.len(), "evicted idle streams");
        }
    }

    fn report_entity_error(&self, entity_id: &str, err: &EngineError) {
        self.counters.entity_errors.fetch_add(1, Ordering::Relaxed);
        warn!(entity = entity_id, error = %err, "monitor error");
        self.bus.publish(EngineEvent::MonitorError {
            entity_id: entity_id.to_string(),
            error: err.to_string(),
            ts: Utc::now(),
        });
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Spawn the two cycle timers. Idempotent while running.
    pub fn start(self: &Arc<Self>) {
        let mut tasks = self.tasks.lock().expect("task list poisoned");
        if !tasks.is_empty() {
            return;
        }

        let sampler = Arc::clone(self);
        let mut sampler_shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut timer = tokio::time::interval(sampler.cfg.sample_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer.tick().await; // immediate first tick
            loop {
                tokio::select! {
                    _ = timer.tick() => sampler.run_sampling_cycle().await,
                    _ = sampler_shutdown.changed() => break,
                }
            }
        }));

        let scanner = Arc::clone(self);
        let mut scanner_shutdown = self.shutdown.subscribe();
        tasks.push(tokio::spawn(async move {
            let mut timer = tokio::time::interval(scanner.cfg.anomaly_interval);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
            timer.tick().await;
            loop {
                tokio::select! {
                    _ = timer.tick() => scanner.run_anomaly_cycle().await,
                    _ = scanner_shutdown.changed() => break,
                }
            }
        }));

        info!(
            sample_interval_secs = self.cfg.sample_interval.as_secs(),
            anomaly_interval_secs = self.cfg.anomaly_interval.as_secs(),
            "monitor engine started"
        );
    }

    /// Stop both cycle timers. In-flight cycle bodies are aborted with them.
    pub fn stop(&self) {
        let _ = self.shutdown.send(true);
        let mut tasks = self.tasks.lock().expect("task list poisoned");
        for task in tasks.drain(..) {
            task.abort();
        }
        info!("monitor engine stopped");
    }
}

impl Drop for MonitorEngine {
    fn drop(&mut self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for task in tasks.drain(..) {
                task.abort();
            }
        }
    }
}
