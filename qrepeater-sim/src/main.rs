use std::path::PathBuf;

use clap::{Parser, ValueEnum};
use color_eyre::Result;
use qrepeater_sim::config::{load_config, Config, ConfigFormat};
use qrepeater_sim::scheduler::Simulation;
use qrepeater_telemetry::TelemetryHandle;
use tracing_subscriber::EnvFilter;

#[cfg(any(
    all(feature = "dev", feature = "test"),
    all(feature = "dev", feature = "prod"),
    all(feature = "test", feature = "prod")
))]
compile_error!(
    "Only one of the `dev`, `test`, or `prod` features may be enabled for qrepeater-sim."
);

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum LogFormat {
    Pretty,
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "qrepeater-sim",
    version,
    about = "Simulate entanglement requests arriving at a quantum repeater grid"
)]
struct Cli {
    /// Path to configuration file (TOML or YAML). Defaults apply when absent.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Explicit configuration format override.
    #[arg(long, value_enum, default_value_t = ConfigFormat::Auto)]
    config_format: ConfigFormat,
    #[arg(long)]
    seed: Option<u64>,
    /// Number of arrivals to simulate.
    #[arg(long)]
    arrivals: Option<u64>,
    /// Per-round link success probability.
    #[arg(long)]
    p_edge: Option<f64>,
    #[arg(long)]
    mean_interarrival: Option<f64>,
    #[arg(long)]
    mean_service: Option<f64>,
    #[arg(long)]
    rows: Option<usize>,
    #[arg(long)]
    cols: Option<usize>,
    /// Print the report and telemetry as JSON.
    #[arg(long)]
    json: bool,
    #[arg(long, value_enum, default_value_t = LogFormat::Pretty)]
    log_format: LogFormat,
}

impl Cli {
    fn apply_overrides(&self, config: &mut Config) {
        if let Some(seed) = self.seed {
            config.run.seed = seed;
        }
        if let Some(arrivals) = self.arrivals {
            config.traffic.total_arrivals = arrivals;
        }
        if let Some(p_edge) = self.p_edge {
            config.network.p_edge = p_edge;
        }
        if let Some(mean) = self.mean_interarrival {
            config.traffic.mean_interarrival = mean;
        }
        if let Some(mean) = self.mean_service {
            config.traffic.mean_service = mean;
        }
        if let Some(rows) = self.rows {
            config.network.rows = rows;
        }
        if let Some(cols) = self.cols {
            config.network.cols = cols;
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Pretty => builder.pretty().init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.log_format);

    let mut config = match &cli.config {
        Some(path) => load_config(path, cli.config_format)?,
        None => Config::sample(),
    };
    cli.apply_overrides(&mut config);
    config.validate()?;

    let telemetry = TelemetryHandle::from_config(config.telemetry.clone());
    let mut simulation = Simulation::new(&config, telemetry.clone())?;
    let report = simulation.run()?;
    let snapshot = telemetry.flush();

    if cli.json {
        let output = serde_json::json!({
            "report": report,
            "telemetry": snapshot,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
    } else {
        println!("{report}");
    }
    Ok(())
}
