use std::time::Duration;

use metrics::{counter, gauge};
use metrics_pusher_dogstatsd::{DogStatsDPusherBuilder, MetricKind};

fn main() {
    tracing_subscriber::fmt::init();

    let registry = DogStatsDPusherBuilder::default()
        .with_destination("localhost:9125,myinstance|#env:dev")
        .with_extra_tags("service:demo")
        .with_push_interval(Duration::from_secs(1))
        .install()
        .expect("failed to install DogStatsD pusher");

    // Counted per push: goes back to zero after every push.
    let ticks = registry.register_with("core.ticks", MetricKind::Counter, 0, true);

    // Loop over and over, pretending to be a server with a few workers.
    let mut iteration: u64 = 0;
    loop {
        iteration += 1;
        ticks.increment(1);

        for worker in 1..=4 {
            counter!(format!("worker.{worker}.requests")).increment(worker);
        }
        gauge!("core.busy_workers").set((iteration % 5) as f64);

        std::thread::sleep(Duration::from_millis(100));
    }
}
