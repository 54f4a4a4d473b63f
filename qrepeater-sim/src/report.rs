use std::fmt;

use serde::Serialize;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct BlockedCounts {
    pub contention: u64,
    pub concurrency: u64,
    pub timeout: u64,
}

impl BlockedCounts {
    pub fn total(&self) -> u64 {
        self.contention + self.concurrency + self.timeout
    }
}

/// End-of-run statistics for one scheduler run.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct SimulationReport {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub blocking_rate: f64,
    pub blocked: BlockedCounts,
    pub departures: u64,
    /// Requests still holding nodes when the arrival budget ran out.
    pub still_active: usize,
    /// Simulated time of the last processed event.
    pub end_time: f64,
    /// Mean generation time over requests that entangled.
    pub mean_generation_time: Option<f64>,
    /// Time-weighted rate over every protocol invocation of the run.
    pub entanglement_rate: f64,
    pub links_consumed: u64,
}

impl fmt::Display for SimulationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Simulation Complete")?;
        writeln!(f, "Total Requests: {}", self.total_requests)?;
        writeln!(f, "Successful Requests: {}", self.successful_requests)?;
        write!(f, "Blocking Rate: {:.2}", self.blocking_rate)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_prints_two_decimals() {
        let report = SimulationReport {
            total_requests: 3,
            successful_requests: 1,
            blocking_rate: 2.0 / 3.0,
            blocked: BlockedCounts {
                contention: 1,
                concurrency: 0,
                timeout: 1,
            },
            departures: 1,
            still_active: 0,
            end_time: 12.5,
            mean_generation_time: Some(4.0),
            entanglement_rate: 0.2,
            links_consumed: 5,
        };
        let text = report.to_string();
        assert!(text.contains("Total Requests: 3"));
        assert!(text.contains("Successful Requests: 1"));
        assert!(text.ends_with("Blocking Rate: 0.67"));
        assert_eq!(report.blocked.total(), 2);
    }
}
