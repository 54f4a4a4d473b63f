//! Lightweight telemetry facade for the repeater simulator. Counters and
//! integer sample series live in memory and are handed out as an owned
//! snapshot, so tests and the CLI can inspect instrumentation without an
//! exporter.

use std::{collections::BTreeMap, sync::Arc, time::SystemTime};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[cfg(any(
    all(feature = "dev", feature = "test"),
    all(feature = "dev", feature = "prod"),
    all(feature = "test", feature = "prod")
))]
compile_error!(
    "Only one of the `dev`, `test`, or `prod` features may be enabled for qrepeater-telemetry."
);

#[cfg(feature = "dev")]
const DEFAULT_SAMPLE_CAP: usize = 1_000_000;
#[cfg(feature = "test")]
const DEFAULT_SAMPLE_CAP: usize = 1_024;
#[cfg(feature = "prod")]
const DEFAULT_SAMPLE_CAP: usize = 65_536;
#[cfg(not(any(feature = "dev", feature = "test", feature = "prod")))]
const DEFAULT_SAMPLE_CAP: usize = 65_536;

fn default_sample_cap() -> usize {
    DEFAULT_SAMPLE_CAP
}

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct TelemetryConfig {
    /// Labels attached to every snapshot.
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Samples kept per series between flushes; later samples are counted
    /// as dropped.
    #[serde(default = "default_sample_cap")]
    pub sample_cap: usize,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            labels: BTreeMap::new(),
            sample_cap: default_sample_cap(),
        }
    }
}

impl TelemetryConfig {
    pub fn sample(component: &str) -> Self {
        Self {
            labels: BTreeMap::from([("component".into(), component.to_owned())]),
            sample_cap: default_sample_cap(),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum TelemetryError {
    #[error("counter overflow for metric {0}")]
    CounterOverflow(String),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct TelemetrySnapshot {
    pub timestamp: SystemTime,
    pub labels: BTreeMap<String, String>,
    pub counters: BTreeMap<String, u64>,
    pub samples: BTreeMap<String, Vec<u64>>,
    /// Samples discarded per series because the cap was reached.
    pub dropped_samples: BTreeMap<String, u64>,
}

impl TelemetrySnapshot {
    /// Counter value, zero when never recorded.
    pub fn counter(&self, name: &str) -> u64 {
        self.counters.get(name).copied().unwrap_or(0)
    }

    pub fn sample_mean(&self, name: &str) -> Option<f64> {
        let values = self.samples.get(name).filter(|values| !values.is_empty())?;
        let sum: u128 = values.iter().map(|value| u128::from(*value)).sum();
        Some(sum as f64 / values.len() as f64)
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}

#[derive(Default)]
struct TelemetryState {
    counters: BTreeMap<String, u64>,
    samples: BTreeMap<String, Vec<u64>>,
    dropped_samples: BTreeMap<String, u64>,
}

#[derive(Clone)]
pub struct TelemetryHandle {
    config: TelemetryConfig,
    state: Arc<Mutex<TelemetryState>>,
}

impl Default for TelemetryHandle {
    fn default() -> Self {
        Self::from_config(TelemetryConfig::default())
    }
}

impl TelemetryHandle {
    pub fn from_config(config: TelemetryConfig) -> Self {
        Self {
            config,
            state: Arc::new(Mutex::new(TelemetryState::default())),
        }
    }

    pub fn config(&self) -> &TelemetryConfig {
        &self.config
    }

    pub fn record_counter(&self, name: &str, delta: u64) -> Result<(), TelemetryError> {
        let mut guard = self.state.lock();
        let entry = guard.counters.entry(name.to_owned()).or_default();
        *entry = entry
            .checked_add(delta)
            .ok_or_else(|| TelemetryError::CounterOverflow(name.to_owned()))?;
        Ok(())
    }

    pub fn record_sample(&self, name: &str, value: u64) {
        let mut guard = self.state.lock();
        let series = guard.samples.entry(name.to_owned()).or_default();
        if series.len() < self.config.sample_cap {
            series.push(value);
        } else {
            *guard.dropped_samples.entry(name.to_owned()).or_default() += 1;
        }
    }

    /// Current value of a counter without flushing.
    pub fn counter(&self, name: &str) -> u64 {
        self.state.lock().counters.get(name).copied().unwrap_or(0)
    }

    pub fn flush(&self) -> TelemetrySnapshot {
        let mut guard = self.state.lock();
        let state = std::mem::take(&mut *guard);
        TelemetrySnapshot {
            timestamp: SystemTime::now(),
            labels: self.config.labels.clone(),
            counters: state.counters,
            samples: state.samples,
            dropped_samples: state.dropped_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::*;

    fn handle() -> TelemetryHandle {
        TelemetryHandle::from_config(TelemetryConfig::sample("scheduler"))
    }

    #[test]
    fn records_counters_and_samples() {
        let handle = handle();
        handle.record_counter("requests.arrived", 1).unwrap();
        handle.record_counter("requests.arrived", 2).unwrap();
        handle.record_sample("protocol.generation_time", 4);
        handle.record_sample("protocol.generation_time", 8);
        let snapshot = handle.flush();
        assert_eq!(snapshot.counter("requests.arrived"), 3);
        assert_eq!(snapshot.samples["protocol.generation_time"], vec![4, 8]);
        assert_eq!(snapshot.sample_mean("protocol.generation_time"), Some(6.0));
        assert_eq!(snapshot.labels["component"], "scheduler");
    }

    #[test]
    fn detects_counter_overflow() {
        let handle = handle();
        handle.record_counter("requests.arrived", u64::MAX).unwrap();
        let err = handle.record_counter("requests.arrived", 1).unwrap_err();
        assert_eq!(err, TelemetryError::CounterOverflow("requests.arrived".into()));
    }

    #[test]
    fn flush_clears_state() {
        let handle = handle();
        handle.record_counter("requests.departed", 1).unwrap();
        handle.record_sample("protocol.links_used", 3);
        handle.flush();
        let second = handle.flush();
        assert!(second.counters.is_empty());
        assert!(second.samples.is_empty());
        assert_eq!(second.counter("requests.departed"), 0);
    }

    #[test]
    fn clones_share_state() {
        let handle = handle();
        let clone = handle.clone();
        clone.record_counter("requests.admitted", 5).unwrap();
        assert_eq!(handle.counter("requests.admitted"), 5);
    }

    #[test]
    fn samples_beyond_cap_are_dropped() {
        let handle = TelemetryHandle::from_config(TelemetryConfig {
            labels: BTreeMap::new(),
            sample_cap: 2,
        });
        for value in 0..5 {
            handle.record_sample("protocol.links_used", value);
        }
        let snapshot = handle.flush();
        assert_eq!(snapshot.samples["protocol.links_used"], vec![0, 1]);
        assert_eq!(snapshot.dropped_samples["protocol.links_used"], 3);
    }
}
