//! Rate and blocking estimators. Degenerate denominators resolve to 0.0.

/// Time-weighted entanglement rate: successes divided by the timesteps spent,
/// where every failed repetition costs the full budget.
pub fn entanglement_rate(generation_times: &[Option<u32>], timestep_budget: u32) -> f64 {
    let mut successes = 0_u64;
    let mut total_time = 0_u64;
    for time in generation_times {
        match time {
            Some(t) => {
                successes += 1;
                total_time += u64::from(*t);
            }
            None => total_time += u64::from(timestep_budget),
        }
    }
    if total_time == 0 {
        0.0
    } else {
        successes as f64 / total_time as f64
    }
}

/// Fraction of requests that did not obtain service.
pub fn blocking_rate(total: u64, successful: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    1.0 - successful.min(total) as f64 / total as f64
}

/// Mean of the successful generation times, if any.
pub fn mean_generation_time(generation_times: &[Option<u32>]) -> Option<f64> {
    let (count, sum) = generation_times
        .iter()
        .flatten()
        .fold((0_u64, 0_u64), |(count, sum), t| (count + 1, sum + u64::from(*t)));
    (count > 0).then(|| sum as f64 / count as f64)
}
