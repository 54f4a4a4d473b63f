use qrepeater_telemetry::{TelemetryConfig, TelemetryHandle};

fn main() {
    let telemetry = TelemetryHandle::from_config(TelemetryConfig::sample("scheduler"));

    for _ in 0..3 {
        telemetry
            .record_counter("requests.arrived", 1)
            .expect("within u64 range");
    }
    telemetry.record_sample("protocol.generation_time", 12);
    telemetry.record_sample("protocol.generation_time", 30);

    let snapshot = telemetry.flush();
    println!(
        "[qrepeater-telemetry] counters={:?} samples={:?}",
        snapshot.counters, snapshot.samples
    );
}
