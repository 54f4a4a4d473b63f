use std::{
    fs,
    path::{Path, PathBuf},
};

use clap::ValueEnum;
use qrepeater_core::{DecoherenceModel, LinkParams, ProtocolConfig};
use qrepeater_telemetry::TelemetryConfig;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
pub enum ConfigFormat {
    Auto,
    Toml,
    Yaml,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unable to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {format:?} config: {details}")]
    Parse {
        format: ConfigFormat,
        details: String,
    },
    #[error("configuration invalid: {0}")]
    Validation(String),
}

#[derive(Clone, Debug, Default, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    #[serde(default)]
    pub network: NetworkSection,
    #[serde(default)]
    pub traffic: TrafficSection,
    #[serde(default)]
    pub admission: AdmissionSection,
    #[serde(default)]
    pub protocol: ProtocolConfig,
    #[serde(default)]
    pub run: RunSection,
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct NetworkSection {
    #[serde(default = "default_grid_side")]
    pub rows: usize,
    #[serde(default = "default_grid_side")]
    pub cols: usize,
    #[serde(default = "default_p_edge")]
    pub p_edge: f64,
    #[serde(default = "default_qc")]
    pub qc: u32,
    /// Physical link length in kilometres.
    #[serde(default = "default_link_length")]
    pub link_length: f64,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(rename_all = "kebab-case")]
pub struct TrafficSection {
    #[serde(default = "default_mean_interarrival")]
    pub mean_interarrival: f64,
    #[serde(default = "default_mean_service")]
    pub mean_service: f64,
    #[serde(default = "default_total_arrivals")]
    pub total_arrivals: u64,
    /// Peers drawn per request, not counting the center.
    #[serde(default = "default_min_peers")]
    pub min_peers: usize,
    #[serde(default = "default_max_peers")]
    pub max_peers: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct AdmissionSection {
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub struct RunSection {
    #[serde(default = "default_seed")]
    pub seed: u64,
}

const fn default_grid_side() -> usize {
    3
}

const fn default_p_edge() -> f64 {
    0.1
}

const fn default_qc() -> u32 {
    10
}

const fn default_link_length() -> f64 {
    1.0
}

const fn default_mean_interarrival() -> f64 {
    10.0
}

const fn default_mean_service() -> f64 {
    3.0
}

const fn default_total_arrivals() -> u64 {
    100
}

const fn default_min_peers() -> usize {
    2
}

const fn default_max_peers() -> usize {
    3
}

const fn default_max_concurrent() -> usize {
    5
}

const fn default_seed() -> u64 {
    42
}

impl Default for NetworkSection {
    fn default() -> Self {
        Self {
            rows: default_grid_side(),
            cols: default_grid_side(),
            p_edge: default_p_edge(),
            qc: default_qc(),
            link_length: default_link_length(),
        }
    }
}

impl NetworkSection {
    pub fn link_params(&self) -> LinkParams {
        LinkParams::new(self.p_edge, self.qc).with_length(self.link_length)
    }

    pub fn node_count(&self) -> usize {
        self.rows.saturating_mul(self.cols)
    }
}

impl Default for TrafficSection {
    fn default() -> Self {
        Self {
            mean_interarrival: default_mean_interarrival(),
            mean_service: default_mean_service(),
            total_arrivals: default_total_arrivals(),
            min_peers: default_min_peers(),
            max_peers: default_max_peers(),
        }
    }
}

impl Default for AdmissionSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
        }
    }
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            seed: default_seed(),
        }
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let network = &self.network;
        if network.rows == 0 || network.cols == 0 {
            return Err(ConfigError::Validation(format!(
                "grid must have at least one row and column, got {}x{}",
                network.rows, network.cols
            )));
        }
        if !(0.0..=1.0).contains(&network.p_edge) {
            return Err(ConfigError::Validation(format!(
                "p-edge must lie in [0, 1], got {}",
                network.p_edge
            )));
        }
        if network.qc == 0 {
            return Err(ConfigError::Validation(
                "qc must be at least one timestep".into(),
            ));
        }
        if !(network.link_length.is_finite() && network.link_length > 0.0) {
            return Err(ConfigError::Validation(format!(
                "link-length must be positive and finite, got {}",
                network.link_length
            )));
        }

        let traffic = &self.traffic;
        for (name, mean) in [
            ("mean-interarrival", traffic.mean_interarrival),
            ("mean-service", traffic.mean_service),
        ] {
            if !mean.is_finite() || mean <= 0.0 {
                return Err(ConfigError::Validation(format!(
                    "{name} must be positive and finite, got {mean}"
                )));
            }
        }
        if traffic.total_arrivals == 0 {
            return Err(ConfigError::Validation(
                "total-arrivals must be greater than zero".into(),
            ));
        }
        if traffic.min_peers < 2 || traffic.min_peers > traffic.max_peers {
            return Err(ConfigError::Validation(format!(
                "peer range must satisfy 2 <= min-peers <= max-peers, got {}..={}",
                traffic.min_peers, traffic.max_peers
            )));
        }

        if self.admission.max_concurrent == 0 {
            return Err(ConfigError::Validation(
                "max-concurrent must be greater than zero".into(),
            ));
        }
        self.protocol
            .validate()
            .map_err(|err| ConfigError::Validation(err.to_string()))?;
        Ok(())
    }

    /// Reference setup: a 3x3 grid with weak links under light load.
    pub fn sample() -> Self {
        Self {
            telemetry: TelemetryConfig::sample("qrepeater-sim"),
            ..Self::default()
        }
    }

    pub fn with_decoherence(mut self, decoherence: DecoherenceModel) -> Self {
        self.protocol.decoherence = decoherence;
        self
    }
}

pub fn load_config(path: &Path, format: ConfigFormat) -> Result<Config, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config = parse_config(&contents, resolve_format(path, format))?;
    config.validate()?;
    Ok(config)
}

/// Parse without validating. `Auto` is treated as TOML.
pub fn parse_config(contents: &str, format: ConfigFormat) -> Result<Config, ConfigError> {
    match format {
        ConfigFormat::Toml | ConfigFormat::Auto => {
            toml::from_str(contents).map_err(|err| ConfigError::Parse {
                format: ConfigFormat::Toml,
                details: err.to_string(),
            })
        }
        ConfigFormat::Yaml => serde_yaml::from_str(contents).map_err(|err| ConfigError::Parse {
            format,
            details: err.to_string(),
        }),
    }
}

fn resolve_format(path: &Path, format: ConfigFormat) -> ConfigFormat {
    match format {
        ConfigFormat::Auto => match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => ConfigFormat::Toml,
            Some("yaml") | Some("yml") => ConfigFormat::Yaml,
            _ => ConfigFormat::Toml,
        },
        _ => format,
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn defaults_match_reference_run() {
        let config = Config::default();
        assert_eq!(config.network.rows, 3);
        assert_eq!(config.network.cols, 3);
        assert_eq!(config.network.p_edge, 0.1);
        assert_eq!(config.network.qc, 10);
        assert_eq!(config.traffic.total_arrivals, 100);
        assert_eq!(config.admission.max_concurrent, 5);
        assert_eq!(config.protocol.timesteps, 1_000);
        assert_eq!(config.protocol.repetitions, 1);
        assert_eq!(config.run.seed, 42);
        config.validate().unwrap();
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut config = Config::sample();
        config.network.p_edge = 1.5;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::sample();
        config.traffic.mean_service = 0.0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::sample();
        config.traffic.min_peers = 1;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::sample();
        config.traffic.min_peers = 4;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::sample();
        config.admission.max_concurrent = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::sample();
        config.protocol.timesteps = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = Config::sample();
        config.network.qc = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn parses_toml_config() {
        let contents = r#"
            [network]
            rows = 4
            cols = 5
            p-edge = 0.25

            [traffic]
            mean-interarrival = 2.5
            total-arrivals = 10

            [protocol]
            timesteps = 50
            decoherence = "informational"

            [telemetry.labels]
            component = "bench"
        "#;

        let config = parse_config(contents, ConfigFormat::Toml).unwrap();
        assert_eq!(config.network.rows, 4);
        assert_eq!(config.network.cols, 5);
        assert_eq!(config.network.qc, 10);
        assert_eq!(config.traffic.mean_interarrival, 2.5);
        assert_eq!(config.traffic.mean_service, 3.0);
        assert_eq!(config.protocol.decoherence, DecoherenceModel::Informational);
        assert_eq!(config.telemetry.labels["component"], "bench");
        config.validate().unwrap();
    }

    #[test]
    fn parses_yaml_config() {
        let contents = r#"
            network:
              rows: 2
              cols: 2
            admission:
              max-concurrent: 1
            run:
              seed: 7
        "#;
        let config = parse_config(contents, ConfigFormat::Yaml).unwrap();
        assert_eq!(config.admission.max_concurrent, 1);
        assert_eq!(config.run.seed, 7);
        assert_eq!(config.traffic.max_peers, 3);
    }

    #[test]
    fn load_detects_format_and_validates() {
        let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        writeln!(file, "network:\n  p-edge: 2.0").unwrap();
        let err = load_config(file.path(), ConfigFormat::Auto).unwrap_err();
        assert!(matches!(err, ConfigError::Validation(_)));

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[run]\nseed = 9").unwrap();
        let config = load_config(file.path(), ConfigFormat::Auto).unwrap();
        assert_eq!(config.run.seed, 9);
    }

    #[test]
    fn missing_file_is_io_error() {
        let err = load_config(Path::new("/nonexistent/qrepeater.toml"), ConfigFormat::Auto)
            .unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
