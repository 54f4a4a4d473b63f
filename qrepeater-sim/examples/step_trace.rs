use qrepeater_sim::config::Config;
use qrepeater_sim::scheduler::{Admission, SimEvent, Simulation};
use qrepeater_telemetry::TelemetryHandle;

fn main() {
    let mut cfg = Config::sample();
    cfg.network.p_edge = 0.4;
    cfg.traffic.total_arrivals = 12;
    cfg.traffic.mean_interarrival = 2.0;
    let telemetry = TelemetryHandle::from_config(cfg.telemetry.clone());
    let mut sim = Simulation::new(&cfg, telemetry.clone()).expect("valid config");

    loop {
        match sim.step().expect("grid large enough for every request") {
            SimEvent::Arrival { request, admission } => {
                let verdict = match admission {
                    Admission::Admitted {
                        generation_time, ..
                    } => format!("entangled after {generation_time} rounds"),
                    Admission::Blocked(reason) => format!("blocked ({reason:?})"),
                };
                println!(
                    "[t={:8.3}] request {} {} -> {:?}: {verdict}",
                    request.arrival, request.id, request.center, request.peers
                );
            }
            SimEvent::Departure { time, request } => {
                println!("[t={time:8.3}] request {} departed", request.id);
            }
            SimEvent::Finished => break,
        }
    }

    println!("{}", sim.report());
    let snapshot = telemetry.flush();
    println!("[qrepeater-sim] counters={:?}", snapshot.counters);
}
