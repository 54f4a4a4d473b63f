//! Library surface for the `qrepeater-sim` binary.
//!
//! The config loader, scheduler and report live here so integration tests and
//! runnable demos link against the same code the CLI drives.

pub mod config;
pub mod report;
pub mod scheduler;

pub use config::{load_config, Config, ConfigError, ConfigFormat};
pub use report::{BlockedCounts, SimulationReport};
pub use scheduler::{
    Admission, BlockReason, EntanglementRequest, SimError, SimEvent, SimResult, Simulation,
};
